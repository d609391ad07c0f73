//! Acquisition configuration model
//!
//! `DesiredConfig` is the value object built from an inbound control
//! document. `DerivedConfig` is computed from it in a single deterministic
//! step and drives buffer sizing and the spectral estimators. `SdrParams` is
//! the hardware-facing subset handed to the device layer.

use serde::{Deserialize, Serialize};

/// Output sample rate of the demodulated audio path (Hz).
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// I/Q sample pairs consumed per audio-pipeline chunk.
pub const AUDIO_CHUNK_SAMPLES: usize = 16_384;

/// Smallest segment length the estimators will run with.
pub const MIN_NPERSEG: usize = 256;

/// Substitute resolution bandwidth when the controller sends `rbw_hz: 0`.
pub const FALLBACK_RBW_HZ: f64 = 1000.0;

// Documented defaults for omitted inbound fields.
pub const DEFAULT_CENTER_FREQ_HZ: u64 = 98_000_000;
pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 8_000_000.0;
pub const DEFAULT_RBW_HZ: u32 = 100_000;
pub const DEFAULT_LNA_GAIN: i32 = 16;
pub const DEFAULT_VGA_GAIN: i32 = 20;
pub const DEFAULT_ANTENNA_PORT: u8 = 1;

/// Acquisition mode requested by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RfMode {
    Psd,
    Fm,
    Am,
}

impl RfMode {
    /// Case-insensitive name lookup; unknown strings fall back to PSD.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "fm" => Self::Fm,
            "am" => Self::Am,
            _ => Self::Psd,
        }
    }

    /// True when this mode drives the demodulation/audio path.
    pub fn is_audio(self) -> bool {
        matches!(self, Self::Fm | Self::Am)
    }
}

/// Spectral estimation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PsdMethod {
    Welch,
    Pfb,
}

impl PsdMethod {
    /// Case-insensitive name lookup; unknown strings fall back to Welch.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "pfb" => Self::Pfb,
            _ => Self::Welch,
        }
    }
}

/// Analysis window applied per segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowType {
    Hamming,
    Hann,
    Rectangular,
    Blackman,
    FlatTop,
    Kaiser,
    Tukey,
    Bartlett,
}

impl WindowType {
    /// Case-insensitive name lookup; unknown strings fall back to Hamming.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "hann" => Self::Hann,
            "rectangular" => Self::Rectangular,
            "blackman" => Self::Blackman,
            "flattop" => Self::FlatTop,
            "kaiser" => Self::Kaiser,
            "tukey" => Self::Tukey,
            "bartlett" => Self::Bartlett,
            _ => Self::Hamming,
        }
    }

    /// Equivalent noise bandwidth factor. Kaiser assumes beta = 6, Tukey
    /// alpha = 0.5.
    pub fn enbw_factor(self) -> f64 {
        match self {
            Self::Rectangular => 1.000,
            Self::Bartlett => 1.330,
            Self::Hamming => 1.363,
            Self::Hann => 1.500,
            Self::Tukey => 1.500,
            Self::Blackman => 1.730,
            Self::Kaiser => 1.800,
            Self::FlatTop => 3.770,
        }
    }
}

/// Absolute-frequency pass band for the optional channel filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRange {
    pub start_freq_hz: u64,
    pub end_freq_hz: u64,
}

impl FilterRange {
    /// Clips the range to the captured span `[center - fs/2, center + fs/2]`.
    /// A range entirely outside the span collapses to an empty band at the
    /// nearer edge; no error is raised.
    pub fn clipped_to_span(self, center_freq_hz: u64, sample_rate_hz: f64) -> Self {
        let half = sample_rate_hz / 2.0;
        let lo = center_freq_hz as f64 - half;
        let hi = center_freq_hz as f64 + half;
        let start = (self.start_freq_hz as f64).clamp(lo, hi);
        let end = (self.end_freq_hz as f64).clamp(lo, hi);
        Self {
            start_freq_hz: start.round() as u64,
            end_freq_hz: end.max(start).round() as u64,
        }
    }
}

/// Hardware-facing parameter subset applied to the RF front-end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SdrParams {
    pub center_freq_hz: u64,
    pub sample_rate_hz: f64,
    pub lna_gain: i32,
    pub vga_gain: i32,
    pub amp_enabled: bool,
    pub ppm_error: i32,
}

impl SdrParams {
    /// Frequency actually programmed into the synthesizer:
    /// `f_corrected = f_target * (1 + ppm / 1e6)`.
    pub fn corrected_freq_hz(&self) -> u64 {
        let correction = 1.0 + self.ppm_error as f64 / 1_000_000.0;
        (self.center_freq_hz as f64 * correction) as u64
    }

    /// Lazy-retune predicate: a new request touches the hardware only when
    /// the tuned quartet differs from the last applied state.
    pub fn needs_retune(&self, last_applied: Option<&SdrParams>) -> bool {
        match last_applied {
            None => true,
            Some(prev) => {
                self.center_freq_hz != prev.center_freq_hz
                    || self.sample_rate_hz != prev.sample_rate_hz
                    || self.lna_gain != prev.lna_gain
                    || self.vga_gain != prev.vga_gain
            }
        }
    }
}

/// A requested acquisition, as validated from one control document.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredConfig {
    pub mode: RfMode,
    pub psd_method: PsdMethod,
    pub center_freq_hz: u64,
    pub sample_rate_hz: f64,
    pub lna_gain: i32,
    pub vga_gain: i32,
    pub amp_enabled: bool,
    pub ppm_error: i32,
    pub antenna_port: u8,
    pub rbw_hz: u32,
    pub overlap: f64,
    pub window_type: WindowType,
    pub filter_enabled: bool,
    pub filter_range: Option<FilterRange>,
}

impl Default for DesiredConfig {
    fn default() -> Self {
        Self {
            mode: RfMode::Psd,
            psd_method: PsdMethod::Welch,
            center_freq_hz: DEFAULT_CENTER_FREQ_HZ,
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            lna_gain: DEFAULT_LNA_GAIN,
            vga_gain: DEFAULT_VGA_GAIN,
            amp_enabled: true,
            ppm_error: 0,
            antenna_port: DEFAULT_ANTENNA_PORT,
            rbw_hz: DEFAULT_RBW_HZ,
            overlap: 0.0,
            window_type: WindowType::Hamming,
            filter_enabled: false,
            filter_range: None,
        }
    }
}

impl DesiredConfig {
    /// Hardware subset for the device layer.
    pub fn sdr_params(&self) -> SdrParams {
        SdrParams {
            center_freq_hz: self.center_freq_hz,
            sample_rate_hz: self.sample_rate_hz,
            lna_gain: self.lna_gain,
            vga_gain: self.vga_gain,
            amp_enabled: self.amp_enabled,
            ppm_error: self.ppm_error,
        }
    }

    /// Lowest frequency of the captured span.
    pub fn span_start_hz(&self) -> f64 {
        self.center_freq_hz as f64 - self.sample_rate_hz / 2.0
    }

    /// Highest frequency of the captured span.
    pub fn span_end_hz(&self) -> f64 {
        self.center_freq_hz as f64 + self.sample_rate_hz / 2.0
    }
}

/// Parameters computed from a `DesiredConfig` in one deterministic step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedConfig {
    /// Segment length; always a power of two >= `MIN_NPERSEG`.
    pub nperseg: usize,
    /// Segment overlap in samples; always `< nperseg`.
    pub noverlap: usize,
    /// Bytes of interleaved I/Q per acquisition (~1 s of signal).
    pub acquisition_bytes: usize,
}

impl DerivedConfig {
    pub fn from_desired(desired: &DesiredConfig) -> Self {
        let safe_rbw = if desired.rbw_hz > 0 {
            desired.rbw_hz as f64
        } else {
            FALLBACK_RBW_HZ
        };

        let required = desired.window_type.enbw_factor() * desired.sample_rate_hz / safe_rbw;
        // Capped at 2^26 bins so a hostile rbw/fs pair cannot demand an
        // absurd FFT.
        let exponent = required.log2().ceil().clamp(0.0, 26.0) as u32;
        let nperseg = (1usize << exponent).max(MIN_NPERSEG);

        let mut noverlap = (nperseg as f64 * desired.overlap.max(0.0)) as usize;
        if noverlap >= nperseg {
            noverlap = nperseg - 1;
        }

        Self {
            nperseg,
            noverlap,
            acquisition_bytes: (desired.sample_rate_hz * 2.0) as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_hann_512_bins() {
        // 1.5 * 2 MHz / 10 kHz = 300 -> next power of two 512
        let desired = DesiredConfig {
            sample_rate_hz: 2_000_000.0,
            rbw_hz: 10_000,
            overlap: 0.5,
            window_type: WindowType::Hann,
            ..Default::default()
        };
        let derived = DerivedConfig::from_desired(&desired);
        assert_eq!(derived.nperseg, 512);
        assert_eq!(derived.noverlap, 256);
        assert_eq!(derived.acquisition_bytes, 4_000_000);
    }

    #[test]
    fn test_nperseg_floor() {
        let desired = DesiredConfig {
            sample_rate_hz: 100_000.0,
            rbw_hz: 100_000,
            window_type: WindowType::Rectangular,
            ..Default::default()
        };
        let derived = DerivedConfig::from_desired(&desired);
        assert_eq!(derived.nperseg, MIN_NPERSEG);
    }

    #[test]
    fn test_rbw_zero_fallback() {
        let desired = DesiredConfig {
            sample_rate_hz: 2_000_000.0,
            rbw_hz: 0,
            window_type: WindowType::Hann,
            ..Default::default()
        };
        // 1.5 * 2 MHz / 1 kHz = 3000 -> 4096
        let derived = DerivedConfig::from_desired(&desired);
        assert_eq!(derived.nperseg, 4096);
    }

    #[test]
    fn test_overlap_clamped_below_nperseg() {
        let desired = DesiredConfig {
            overlap: 1.5,
            ..Default::default()
        };
        let derived = DerivedConfig::from_desired(&desired);
        assert_eq!(derived.noverlap, derived.nperseg - 1);
    }

    #[test]
    fn test_nperseg_power_of_two() {
        for rbw in [1u32, 377, 9_999, 100_000] {
            let desired = DesiredConfig {
                rbw_hz: rbw,
                ..Default::default()
            };
            let derived = DerivedConfig::from_desired(&desired);
            assert!(derived.nperseg.is_power_of_two());
            assert!(derived.nperseg >= MIN_NPERSEG);
            assert!(derived.noverlap < derived.nperseg);
        }
    }

    #[test]
    fn test_filter_range_clip() {
        // Scenario: fs = 2 MHz around 100 MHz, request 98.5..101.5 MHz
        let range = FilterRange {
            start_freq_hz: 98_500_000,
            end_freq_hz: 101_500_000,
        };
        let clipped = range.clipped_to_span(100_000_000, 2_000_000.0);
        assert_eq!(clipped.start_freq_hz, 99_000_000);
        assert_eq!(clipped.end_freq_hz, 101_000_000);
    }

    #[test]
    fn test_retune_predicate() {
        let a = DesiredConfig::default().sdr_params();
        let mut b = a;
        assert!(a.needs_retune(None));
        assert!(!b.needs_retune(Some(&a)));
        b.center_freq_hz += 1_000_000;
        assert!(b.needs_retune(Some(&a)));
        // Amp/ppm changes alone do not count as a tune difference.
        let mut c = a;
        c.amp_enabled = !c.amp_enabled;
        assert!(!c.needs_retune(Some(&a)));
    }

    #[test]
    fn test_ppm_correction() {
        let params = SdrParams {
            center_freq_hz: 100_000_000,
            sample_rate_hz: 2_000_000.0,
            lna_gain: 16,
            vga_gain: 20,
            amp_enabled: false,
            ppm_error: 10,
        };
        assert_eq!(params.corrected_freq_hz(), 100_001_000);
    }

    #[test]
    fn test_mode_and_window_fallbacks() {
        assert_eq!(RfMode::from_name("FM"), RfMode::Fm);
        assert_eq!(RfMode::from_name("sweep"), RfMode::Psd);
        assert_eq!(PsdMethod::from_name("PFB"), PsdMethod::Pfb);
        assert_eq!(PsdMethod::from_name("burg"), PsdMethod::Welch);
        assert_eq!(WindowType::from_name("HANN"), WindowType::Hann);
        assert_eq!(WindowType::from_name("parzen"), WindowType::Hamming);
    }
}
