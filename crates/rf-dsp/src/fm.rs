//! FM discriminator
//!
//! Per-sample differential phase `arg(x[n] * conj(x[n-1]))`, decimated to
//! the audio rate by accumulate-and-average, then de-emphasis (75 us), DC
//! blocking, a 12 kHz audio low-pass and scaling to int16 PCM. Deviation
//! metrics (peak and EMA of the instantaneous frequency) ride along on the
//! decimated samples.

use num_complex::Complex;

use crate::biquad::{Biquad, BiquadCoeffs, DcBlocker};

/// EMA weight of the deviation tracker.
const DEV_EMA_ALPHA: f64 = 0.10;

/// Audio low-pass cutoff; conservative wideband-FM default.
const FM_AUDIO_LPF_HZ: f64 = 12_000.0;

/// Output scaling before the int16 clip.
const FM_PCM_GAIN: f64 = 60_000.0;

/// Pole radius of the audio DC blocker (~30 Hz at 48 kHz).
const FM_DC_BLOCK_R: f64 = 0.996;

/// Peak/EMA tracker of the instantaneous frequency excursion.
#[derive(Debug, Clone, Copy, Default)]
pub struct FmDeviationTracker {
    peak_hz: f64,
    ema_hz: f64,
    primed: bool,
}

impl FmDeviationTracker {
    /// Feeds one rectified instantaneous-frequency sample
    /// `f_i = |dphi| * fs / (2 pi)`.
    fn update(&mut self, phase_diff_rad: f64, sample_rate_hz: f64) {
        let fi_hz = phase_diff_rad.abs() * sample_rate_hz / (2.0 * std::f64::consts::PI);
        if fi_hz > self.peak_hz {
            self.peak_hz = fi_hz;
        }
        if self.primed {
            self.ema_hz = (1.0 - DEV_EMA_ALPHA) * self.ema_hz + DEV_EMA_ALPHA * fi_hz;
        } else {
            self.ema_hz = fi_hz;
            self.primed = true;
        }
    }

    /// Highest instantaneous deviation seen this epoch.
    pub fn peak_hz(&self) -> f64 {
        self.peak_hz
    }

    /// Smoothed deviation; this is what the result document reports.
    pub fn ema_hz(&self) -> f64 {
        self.ema_hz
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// FM demodulator state for one configuration epoch.
#[derive(Debug, Clone)]
pub struct FmDemodulator {
    sample_rate_hz: f64,
    prev_sample: Complex<f64>,
    audio_acc: f64,
    samples_in_acc: usize,
    decim_factor: usize,
    deemph_alpha: f64,
    deemph_acc: f64,
    dc: DcBlocker,
    lpf: Biquad,
}

impl FmDemodulator {
    /// `deemph_us` is the de-emphasis time constant (75 for broadcast FM in
    /// the Americas, 50 elsewhere).
    pub fn new(sample_rate_hz: f64, audio_rate_hz: u32, deemph_us: u32) -> Self {
        let audio_rate = audio_rate_hz as f64;
        let tau = deemph_us as f64 * 1e-6;
        let dt = 1.0 / audio_rate;

        Self {
            sample_rate_hz,
            prev_sample: Complex::new(1.0, 0.0),
            audio_acc: 0.0,
            samples_in_acc: 0,
            decim_factor: ((sample_rate_hz / audio_rate).round() as usize).max(1),
            deemph_alpha: dt / (tau + dt),
            deemph_acc: 0.0,
            dc: DcBlocker::new(FM_DC_BLOCK_R),
            lpf: Biquad::new(BiquadCoeffs::lowpass(audio_rate, FM_AUDIO_LPF_HZ, 0.707)),
        }
    }

    pub fn decim_factor(&self) -> usize {
        self.decim_factor
    }

    /// Clears all filter memory; used across retunes.
    pub fn reset(&mut self) {
        self.prev_sample = Complex::new(1.0, 0.0);
        self.audio_acc = 0.0;
        self.samples_in_acc = 0;
        self.deemph_acc = 0.0;
        self.dc.reset();
        self.lpf.reset();
    }

    /// Demodulates one IQ chunk, appending int16 PCM at the audio rate.
    /// Returns the number of samples produced.
    pub fn process(
        &mut self,
        iq: &[Complex<f64>],
        pcm_out: &mut Vec<i16>,
        deviation: &mut FmDeviationTracker,
    ) -> usize {
        let mut produced = 0;

        for &sample in iq {
            let diff = sample * self.prev_sample.conj();
            let angle = diff.im.atan2(diff.re);
            self.prev_sample = sample;

            self.audio_acc += angle;
            self.samples_in_acc += 1;

            if self.samples_in_acc >= self.decim_factor {
                let avg = self.audio_acc / self.samples_in_acc as f64;
                self.audio_acc = 0.0;
                self.samples_in_acc = 0;

                deviation.update(avg, self.sample_rate_hz);

                self.deemph_acc += self.deemph_alpha * (avg - self.deemph_acc);
                let mut audio = self.deemph_acc;
                audio = self.dc.process(audio);
                audio = self.lpf.process(audio);

                let pcm = (audio * FM_PCM_GAIN).clamp(-32768.0, 32767.0);
                pcm_out.push(pcm as i16);
                produced += 1;
            }
        }

        produced
    }
}
