//! Spectrum scaling helpers shared by the Welch and PFB estimators
//!
//! Both estimators produce a power vector in FFT-standard bin order; the
//! helpers here re-center DC, scale to dBm over 50 ohm, and build the
//! matching frequency axis.

use rf_core::{DerivedConfig, DesiredConfig, WindowType};

/// Assumed termination when converting normalized power to Watts.
pub const IMPEDANCE_50_OHM: f64 = 50.0;

/// Floor applied before the log so empty bins stay finite.
pub const POWER_FLOOR_WATTS: f64 = 1e-20;

/// Estimator parameters for one acquisition cycle.
#[derive(Debug, Clone, Copy)]
pub struct SpectralConfig {
    pub window_type: WindowType,
    pub sample_rate_hz: f64,
    pub nperseg: usize,
    pub noverlap: usize,
}

impl SpectralConfig {
    pub fn new(desired: &DesiredConfig, derived: &DerivedConfig) -> Self {
        Self {
            window_type: desired.window_type,
            sample_rate_hz: desired.sample_rate_hz,
            nperseg: derived.nperseg,
            noverlap: derived.noverlap,
        }
    }
}

/// One PSD estimate: `pxx_dbm[i]` is the power at `freqs_hz[i]` (baseband
/// relative, DC centered).
#[derive(Debug, Clone)]
pub struct PsdOutput {
    pub freqs_hz: Vec<f64>,
    pub pxx_dbm: Vec<f64>,
}

/// Swaps the two halves of `data` so bin 0 lands on the most negative
/// frequency. Applying the shift twice is the identity for even lengths,
/// which every estimator length here is (powers of two).
pub fn fftshift(data: &mut [f64]) {
    let half = data.len() / 2;
    if data.len() % 2 == 0 {
        for i in 0..half {
            data.swap(i, half + i);
        }
    } else {
        data.rotate_left(half);
    }
}

/// Converts normalized power (W/Hz into 50 ohm) to dBm in place.
///
/// Without a system calibration these values are relative to the ADC full
/// scale, not absolute RF power.
pub fn to_dbm_inplace(pxx: &mut [f64]) {
    for p in pxx.iter_mut() {
        let watts = (*p / IMPEDANCE_50_OHM).max(POWER_FLOOR_WATTS);
        *p = 10.0 * (watts * 1000.0).log10();
    }
}

/// Baseband frequency axis: `f[i] = -fs/2 + i * fs/n`.
pub fn frequency_axis(sample_rate_hz: f64, n: usize) -> Vec<f64> {
    let df = sample_rate_hz / n as f64;
    (0..n)
        .map(|i| -sample_rate_hz / 2.0 + i as f64 * df)
        .collect()
}
