//! Frequency-domain channel mask
//!
//! Two-stage in-place filter applied ahead of the spectral estimators when
//! the controller requests a pass band:
//!
//! 1. **Anti-blooming** - out-of-band bins whose magnitude exceeds the OOB
//!    median by more than 6 dB are capped to that level, phase preserved.
//!    This keeps a strong neighbor from ringing through the mask skirts.
//! 2. **Mask** - unity inside the band, raised-cosine taper across the
//!    transition (30 % of the band width), -15 dB floor elsewhere.
//!
//! Shapes (plans + per-bin gains) are cached per `{N, fc, fs, start, end}`.
//! The cache is intentionally single-threaded: only the orchestrator touches
//! it.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use rf_core::{FilterRange, RfError, RfResult};

/// Fraction of the band width used for each raised-cosine transition.
pub const TRANS_FRAC: f64 = 0.30;

/// Stop-band floor in dB (linear amplitude applied to masked bins).
pub const OOB_REJECT_DB: f64 = -15.0;

/// Anti-blooming threshold above the out-of-band median, in dB.
const BLOOM_CAP_DB: f64 = 6.0;

/// Minimum fraction of bins that must be out of band before the
/// anti-blooming stage has a meaningful median to work with.
const BLOOM_MIN_OOB_FRAC: f64 = 0.05;

/// Where the requested band sits relative to the tuned center.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectralRegion {
    Positive,
    Negative,
    CrossDc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ShapeKey {
    n: usize,
    fc: u64,
    fs_bits: u64,
    start: u64,
    end: u64,
}

struct MaskShape {
    fft: Arc<dyn Fft<f64>>,
    ifft: Arc<dyn Fft<f64>>,
    gains: Vec<f64>,
    oob: Vec<bool>,
    oob_count: usize,
    region: SpectralRegion,
}

fn raised_cos(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    0.5 - 0.5 * (PI * t).cos()
}

fn db_to_lin_amp(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Channel filter with its process-lifetime shape cache. The FFT planner
/// itself is not kept (its recipe cache is thread-bound); only the
/// shareable plan handles are cached per shape.
pub struct ChannelMaskFilter {
    cache: HashMap<ShapeKey, MaskShape>,
    last_region: Option<SpectralRegion>,
}

impl Default for ChannelMaskFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelMaskFilter {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
            last_region: None,
        }
    }

    /// Region of the most recently applied mask.
    pub fn last_region(&self) -> Option<SpectralRegion> {
        self.last_region
    }

    /// Number of cached shapes (one per distinct filter geometry).
    pub fn cached_shapes(&self) -> usize {
        self.cache.len()
    }

    fn build_shape(
        n: usize,
        range: FilterRange,
        center_freq_hz: u64,
        sample_rate_hz: f64,
    ) -> MaskShape {
        let mut planner = FftPlanner::new();
        let half = sample_rate_hz / 2.0;
        let fi = (range.start_freq_hz as f64 - center_freq_hz as f64).clamp(-half, half);
        let ff = (range.end_freq_hz as f64 - center_freq_hz as f64).clamp(-half, half);
        let ff = ff.max(fi);

        let region = if fi >= 0.0 {
            SpectralRegion::Positive
        } else if ff <= 0.0 {
            SpectralRegion::Negative
        } else {
            SpectralRegion::CrossDc
        };

        let trans = TRANS_FRAC * (ff - fi);
        let stop = db_to_lin_amp(OOB_REJECT_DB);
        let df = sample_rate_hz / n as f64;

        let mut gains = vec![0.0f64; n];
        let mut oob = vec![false; n];
        let mut oob_count = 0usize;

        for k in 0..n {
            // FFT-standard order: positive frequencies first.
            let f = if k <= n / 2 {
                k as f64 * df
            } else {
                (k as f64 - n as f64) * df
            };

            let gain = if f >= fi && f <= ff {
                1.0
            } else if trans > 0.0 && f > ff && f < ff + trans {
                stop + (1.0 - stop) * raised_cos((ff + trans - f) / trans)
            } else if trans > 0.0 && f < fi && f > fi - trans {
                stop + (1.0 - stop) * raised_cos((f - (fi - trans)) / trans)
            } else {
                stop
            };

            gains[k] = gain;
            if f < fi - trans || f > ff + trans {
                oob[k] = true;
                oob_count += 1;
            }
        }

        MaskShape {
            fft: planner.plan_fft_forward(n),
            ifft: planner.plan_fft_inverse(n),
            gains,
            oob,
            oob_count,
            region,
        }
    }

    /// Applies the two-stage mask in place. The FFT length is the block
    /// length (not `nperseg`).
    pub fn apply_in_place(
        &mut self,
        signal: &mut [Complex<f64>],
        range: FilterRange,
        center_freq_hz: u64,
        sample_rate_hz: f64,
    ) -> RfResult<()> {
        let n = signal.len();
        if n == 0 {
            return Err(RfError::Dsp("channel filter on empty block".into()));
        }

        let key = ShapeKey {
            n,
            fc: center_freq_hz,
            fs_bits: sample_rate_hz.to_bits(),
            start: range.start_freq_hz,
            end: range.end_freq_hz,
        };

        if !self.cache.contains_key(&key) {
            let shape = Self::build_shape(n, range, center_freq_hz, sample_rate_hz);
            log::debug!(
                "[RF] Channel mask built: N={n}, band {}..{} Hz, region {:?}",
                range.start_freq_hz,
                range.end_freq_hz,
                shape.region
            );
            self.cache.insert(key, shape);
        }
        let shape = self
            .cache
            .get(&key)
            .ok_or_else(|| RfError::Dsp("shape cache lookup failed".into()))?;

        let mut scratch =
            vec![Complex::new(0.0, 0.0); shape.fft.get_inplace_scratch_len()];
        shape.fft.process_with_scratch(signal, &mut scratch);

        // Stage 1: anti-blooming over out-of-band bins.
        if shape.oob_count as f64 >= BLOOM_MIN_OOB_FRAC * n as f64 {
            let mut mags: Vec<f64> = signal
                .iter()
                .zip(&shape.oob)
                .filter(|&(_, &is_oob)| is_oob)
                .map(|(s, _)| s.norm())
                .collect();
            mags.sort_by(f64::total_cmp);
            let median = mags[mags.len() / 2];
            let cap = median * db_to_lin_amp(BLOOM_CAP_DB);

            if cap > 0.0 {
                for (s, &is_oob) in signal.iter_mut().zip(&shape.oob) {
                    if is_oob {
                        let mag = s.norm();
                        if mag > cap {
                            *s *= cap / mag;
                        }
                    }
                }
            } else {
                for (s, &is_oob) in signal.iter_mut().zip(&shape.oob) {
                    if is_oob {
                        *s = Complex::new(0.0, 0.0);
                    }
                }
            }
        }

        // Stage 2: tapered mask.
        for (s, &g) in signal.iter_mut().zip(&shape.gains) {
            *s *= g;
        }

        let mut iscratch =
            vec![Complex::new(0.0, 0.0); shape.ifft.get_inplace_scratch_len()];
        shape.ifft.process_with_scratch(signal, &mut iscratch);
        let inv_n = 1.0 / n as f64;
        for s in signal.iter_mut() {
            *s *= inv_n;
        }

        self.last_region = Some(shape.region);
        Ok(())
    }
}
