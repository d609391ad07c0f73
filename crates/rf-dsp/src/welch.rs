//! Welch PSD estimator
//!
//! Segment-averaged periodogram over complex baseband input. Segments fan
//! out across the rayon pool; each task owns its FFT work buffers and folds
//! a private power accumulator, so the cross-segment sum stays commutative
//! and the shared plan is read-only.

use num_complex::Complex;
use rayon::prelude::*;
use rustfft::FftPlanner;

use crate::spectrum::{self, PsdOutput, SpectralConfig};
use crate::window;

/// Runs the Welch estimate and returns the DC-centered spectrum in dBm.
///
/// Inputs shorter than one segment produce a floor-level spectrum (no
/// segments to average), never an error.
pub fn welch_psd(signal: &[Complex<f64>], cfg: &SpectralConfig) -> PsdOutput {
    let nperseg = cfg.nperseg;
    let step = nperseg.saturating_sub(cfg.noverlap).max(1);

    let k_segments = if signal.len() >= nperseg {
        (signal.len() - nperseg) / step + 1
    } else {
        0
    };

    let win = window::generate(cfg.window_type, nperseg);
    let u_norm: f64 = win.iter().map(|w| w * w).sum::<f64>() / nperseg as f64;

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(nperseg);
    let scratch_len = fft.get_inplace_scratch_len();

    let mut pxx = (0..k_segments)
        .into_par_iter()
        .fold(
            || {
                (
                    vec![Complex::new(0.0, 0.0); nperseg],
                    vec![Complex::new(0.0, 0.0); scratch_len],
                    vec![0.0f64; nperseg],
                )
            },
            |(mut buf, mut scratch, mut acc), k| {
                let start = k * step;
                for (i, slot) in buf.iter_mut().enumerate() {
                    *slot = signal[start + i] * win[i];
                }
                fft.process_with_scratch(&mut buf, &mut scratch);
                for (a, value) in acc.iter_mut().zip(&buf) {
                    *a += value.norm_sqr();
                }
                (buf, scratch, acc)
            },
        )
        .map(|(_, _, acc)| acc)
        .reduce(
            || vec![0.0f64; nperseg],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(&b) {
                    *x += y;
                }
                a
            },
        );

    if k_segments > 0 && u_norm > 0.0 {
        let scale = 1.0 / (cfg.sample_rate_hz * u_norm * k_segments as f64 * nperseg as f64);
        for p in pxx.iter_mut() {
            *p *= scale;
        }
    }

    spectrum::fftshift(&mut pxx);
    spectrum::to_dbm_inplace(&mut pxx);

    PsdOutput {
        freqs_hz: spectrum::frequency_axis(cfg.sample_rate_hz, nperseg),
        pxx_dbm: pxx,
    }
}
