//! Butterworth channel filter cascade on complex baseband
//!
//! The audio path narrows the captured span to the service bandwidth before
//! demodulation: an even-order Butterworth low-pass decomposed into RBJ
//! biquad sections at `bw / 2`, run independently over I and Q, optionally
//! preceded by a one-pole DC blocker on each rail.

use num_complex::Complex;
use std::f64::consts::PI;

use crate::biquad::{Biquad, BiquadCoeffs, DcBlocker};

/// Pole radius of the optional pre-cascade DC blocker.
const DC_BLOCK_R: f64 = 0.995;

/// Section Q for an even-order Butterworth:
/// `Q_k = 1 / (2 sin((2k + 1) pi / (2N)))`.
fn butterworth_q(order: usize, k: usize) -> f64 {
    let phi = PI * (2.0 * k as f64 + 1.0) / (2.0 * order as f64);
    1.0 / (2.0 * phi.sin().max(1e-9))
}

/// Low-pass channel filter over I and Q with independent section state.
#[derive(Debug, Clone)]
pub struct IqChannelFilter {
    sample_rate_hz: f64,
    bandwidth_hz: f64,
    order: usize,
    sections_i: Vec<Biquad>,
    sections_q: Vec<Biquad>,
    dc_i: Option<DcBlocker>,
    dc_q: Option<DcBlocker>,
}

impl IqChannelFilter {
    /// Designs the cascade. The order is clamped to `[2, 12]` and forced
    /// even; cutoff is `bandwidth / 2` (the bandwidth covers both sides of
    /// the carrier).
    pub fn new(sample_rate_hz: f64, bandwidth_hz: f64, order: usize, dc_block: bool) -> Self {
        let mut filter = Self {
            sample_rate_hz: 1.0,
            bandwidth_hz: 1.0,
            order: 0,
            sections_i: Vec::new(),
            sections_q: Vec::new(),
            dc_i: dc_block.then(|| DcBlocker::new(DC_BLOCK_R)),
            dc_q: dc_block.then(|| DcBlocker::new(DC_BLOCK_R)),
        };
        filter.configure(sample_rate_hz, bandwidth_hz, order);
        filter
    }

    /// Redesigns the sections for a new rate/bandwidth and clears state.
    pub fn configure(&mut self, sample_rate_hz: f64, bandwidth_hz: f64, order: usize) {
        self.sample_rate_hz = sample_rate_hz.max(1.0);
        self.bandwidth_hz = bandwidth_hz.max(1.0);

        let mut order = order.clamp(2, 12);
        if order % 2 == 1 {
            order += 1;
        }
        self.order = order;

        let cutoff = (self.bandwidth_hz / 2.0).clamp(1.0, 0.49 * self.sample_rate_hz);
        let sections = order / 2;
        self.sections_i = (0..sections)
            .map(|k| {
                Biquad::new(BiquadCoeffs::lowpass(
                    self.sample_rate_hz,
                    cutoff,
                    butterworth_q(order, k),
                ))
            })
            .collect();
        self.sections_q = self.sections_i.clone();
        self.reset();
    }

    /// Clears all section and DC-blocker state (used across retunes so no
    /// pre-tune energy rings into the new channel).
    pub fn reset(&mut self) {
        for s in self.sections_i.iter_mut().chain(self.sections_q.iter_mut()) {
            s.reset();
        }
        if let Some(dc) = self.dc_i.as_mut() {
            dc.reset();
        }
        if let Some(dc) = self.dc_q.as_mut() {
            dc.reset();
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Runs the cascade over the block in place.
    pub fn apply_in_place(&mut self, signal: &mut [Complex<f64>]) {
        for sample in signal.iter_mut() {
            let mut i = sample.re;
            let mut q = sample.im;

            if let Some(dc) = self.dc_i.as_mut() {
                i = dc.process(i);
            }
            if let Some(dc) = self.dc_q.as_mut() {
                q = dc.process(q);
            }

            for section in self.sections_i.iter_mut() {
                i = section.process(i);
            }
            for section in self.sections_q.iter_mut() {
                q = section.process(q);
            }

            sample.re = i;
            sample.im = q;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_clamped_and_forced_even() {
        assert_eq!(IqChannelFilter::new(2e6, 200e3, 5, false).order(), 6);
        assert_eq!(IqChannelFilter::new(2e6, 200e3, 1, false).order(), 2);
        assert_eq!(IqChannelFilter::new(2e6, 200e3, 99, false).order(), 12);
    }

    #[test]
    fn test_butterworth_q_values() {
        // Order 4: Q = 0.5412, 1.3066
        assert!((butterworth_q(4, 0) - 0.5412).abs() < 1e-3);
        assert!((butterworth_q(4, 1) - 1.3066).abs() < 1e-3);
    }

    #[test]
    fn test_passband_tone_survives_stopband_tone_dies() {
        let fs = 2_000_000.0;
        let mut filter = IqChannelFilter::new(fs, 200_000.0, 6, false);

        let n = 40_000;
        let tone = |f: f64| -> Vec<Complex<f64>> {
            (0..n)
                .map(|k| Complex::from_polar(1.0, 2.0 * PI * f * k as f64 / fs))
                .collect()
        };

        let mut inband = tone(30_000.0);
        filter.apply_in_place(&mut inband);
        let inband_rms = (inband[n / 2..].iter().map(|s| s.norm_sqr()).sum::<f64>()
            / (n / 2) as f64)
            .sqrt();

        filter.reset();
        let mut outband = tone(600_000.0);
        filter.apply_in_place(&mut outband);
        let outband_rms = (outband[n / 2..].iter().map(|s| s.norm_sqr()).sum::<f64>()
            / (n / 2) as f64)
            .sqrt();

        assert!(inband_rms > 0.7, "in-band rms {inband_rms}");
        assert!(outband_rms < 0.01, "out-of-band rms {outband_rms}");
    }

    #[test]
    fn test_dc_blocker_drains_offset() {
        let fs = 2_000_000.0;
        let mut filter = IqChannelFilter::new(fs, 200_000.0, 4, true);
        let mut block = vec![Complex::new(0.5, -0.25); 200_000];
        filter.apply_in_place(&mut block);
        let tail = block[199_000..]
            .iter()
            .map(|s| s.norm())
            .fold(0.0f64, f64::max);
        assert!(tail < 1e-3, "tail {tail}");
    }
}
