//! Polyphase filter bank PSD estimator
//!
//! Channelizer path: a Kaiser-windowed prototype FIR of length `M * T` is
//! split into `T` polyphase components which are pre-summed over each input
//! block before a single `M`-point FFT. Compared to Welch this buys steep
//! channel skirts at the cost of `T` blocks of latency.

use num_complex::Complex;
use rayon::prelude::*;
use rustfft::FftPlanner;

use crate::spectrum::{self, PsdOutput, SpectralConfig};
use crate::window;

/// FIR taps contributed to each channel.
pub const PFB_TAPS_PER_CHANNEL: usize = 8;

/// Kaiser beta of the prototype filter (~80 dB sidelobe rejection).
pub const PFB_KAISER_BETA: f64 = 8.6;

/// Runs the PFB estimate and returns the DC-centered spectrum in dBm.
///
/// `cfg.nperseg` doubles as the channel count `M`; `noverlap` and the
/// window type play no role in this path (the prototype is fixed).
pub fn pfb_psd(signal: &[Complex<f64>], cfg: &SpectralConfig) -> PsdOutput {
    let m = cfg.nperseg;
    let taps = PFB_TAPS_PER_CHANNEL;
    let fir_len = m * taps;

    let proto = window::kaiser(fir_len, PFB_KAISER_BETA);

    let blocks = if signal.len() > fir_len {
        (signal.len() - fir_len) / m
    } else {
        0
    };

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(m);
    let scratch_len = fft.get_inplace_scratch_len();

    let mut pxx = (0..blocks)
        .into_par_iter()
        .fold(
            || {
                (
                    vec![Complex::new(0.0, 0.0); m],
                    vec![Complex::new(0.0, 0.0); scratch_len],
                    vec![0.0f64; m],
                )
            },
            |(mut buf, mut scratch, mut acc), b| {
                buf.fill(Complex::new(0.0, 0.0));
                for t in 0..taps {
                    let offset = b * m + t * m;
                    for i in 0..m {
                        buf[i] += signal[offset + i] * proto[t * m + i];
                    }
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
            || vec![0.0f64; m],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(&b) {
                    *x += y;
                }
                a
            },
        );

    if blocks > 0 {
        let scale = 1.0 / (blocks as f64 * cfg.sample_rate_hz * m as f64);
        for p in pxx.iter_mut() {
            *p *= scale;
        }
    }

    spectrum::fftshift(&mut pxx);
    spectrum::to_dbm_inplace(&mut pxx);

    PsdOutput {
        freqs_hz: spectrum::frequency_axis(cfg.sample_rate_hz, m),
        pxx_dbm: pxx,
    }
}
