//! AM envelope demodulator
//!
//! Robust chain: envelope detection, 2-stage CIC decimation to the audio
//! rate, slow carrier-mean tracking for normalization, DC blocking, a 5 kHz
//! audio low-pass, an RMS AGC with attack/release asymmetry, and a fixed
//! output gain. Modulation depth `(max - min) / (max + min)` is measured on
//! the decimated envelope over one-second windows and smoothed with an EMA.

use num_complex::Complex;

use crate::biquad::{Biquad, BiquadCoeffs, DcBlocker};

/// EMA weight of the windowed depth metric.
const DEPTH_EMA_ALPHA: f64 = 0.15;

/// Carrier-mean tracker smoothing (per decimated sample).
const ENV_MEAN_ALPHA: f64 = 5e-5;

/// Audio low-pass cutoff; voice-bandwidth default for AM.
const AM_AUDIO_LPF_HZ: f64 = 5_000.0;

/// Output scaling before the int16 clip.
const AM_PCM_GAIN: f64 = 20_000.0;

/// Pole radius of the audio DC blocker.
const AM_DC_BLOCK_R: f64 = 0.996;

/// Decimated outputs swallowed while the CIC settles after a reset.
const CIC_SETTLE_OUTPUTS: usize = 2;

/// RMS automatic gain control with asymmetric attack/release.
#[derive(Debug, Clone, Copy)]
struct RmsAgc {
    gain: f64,
    rms2: f64,
    target_rms: f64,
    attack: f64,
    release: f64,
    min_gain: f64,
    max_gain: f64,
}

impl RmsAgc {
    fn new() -> Self {
        Self {
            gain: 1.0,
            rms2: 0.0,
            target_rms: 0.08,
            attack: 0.10,
            release: 0.005,
            min_gain: 0.2,
            max_gain: 25.0,
        }
    }

    #[inline]
    fn process(&mut self, x: f64) -> f64 {
        let x2 = x * x;
        let alpha = if x2 > self.rms2 {
            self.attack
        } else {
            self.release
        };
        self.rms2 += alpha * (x2 - self.rms2);

        let rms = self.rms2.sqrt().max(1e-9);
        self.gain = (self.target_rms / rms).clamp(self.min_gain, self.max_gain);
        x * self.gain
    }

    fn reset(&mut self) {
        self.gain = 1.0;
        self.rms2 = 0.0;
    }
}

/// Windowed modulation-depth tracker over the decimated envelope.
#[derive(Debug, Clone, Copy)]
pub struct AmDepthTracker {
    env_min: f64,
    env_max: f64,
    counter: u32,
    report_samples: u32,
    depth_ema: f64,
    primed: bool,
}

impl AmDepthTracker {
    /// `report_samples` is the window length in decimated samples
    /// (typically one second of audio).
    pub fn new(report_samples: u32) -> Self {
        Self {
            env_min: f64::INFINITY,
            env_max: 0.0,
            counter: 0,
            report_samples,
            depth_ema: 0.0,
            primed: false,
        }
    }

    fn update(&mut self, env: f64) {
        if !env.is_finite() {
            return;
        }
        self.env_min = self.env_min.min(env);
        self.env_max = self.env_max.max(env);
        self.counter += 1;

        if self.report_samples > 0 && self.counter >= self.report_samples {
            let denom = self.env_max + self.env_min;
            let m = if denom > 1e-9 {
                ((self.env_max - self.env_min) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };

            if self.primed {
                self.depth_ema = (1.0 - DEPTH_EMA_ALPHA) * self.depth_ema + DEPTH_EMA_ALPHA * m;
            } else {
                self.depth_ema = m;
                self.primed = true;
            }

            self.env_min = f64::INFINITY;
            self.env_max = 0.0;
            self.counter = 0;
        }
    }

    /// Smoothed modulation depth in percent.
    pub fn depth_percent(&self) -> f64 {
        self.depth_ema * 100.0
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.report_samples);
    }
}

/// AM demodulator state for one configuration epoch.
#[derive(Debug, Clone)]
pub struct AmDemodulator {
    decim_factor: usize,
    samples_in: usize,
    settle_left: usize,
    cic_i1: f64,
    cic_i2: f64,
    cic_c1_z: f64,
    cic_c2_z: f64,
    env_mean: f64,
    mean_primed: bool,
    dc: DcBlocker,
    lpf: Biquad,
    agc: RmsAgc,
}

impl AmDemodulator {
    pub fn new(sample_rate_hz: f64, audio_rate_hz: u32) -> Self {
        let audio_rate = audio_rate_hz as f64;
        Self {
            decim_factor: ((sample_rate_hz / audio_rate).round() as usize).max(1),
            samples_in: 0,
            settle_left: CIC_SETTLE_OUTPUTS,
            cic_i1: 0.0,
            cic_i2: 0.0,
            cic_c1_z: 0.0,
            cic_c2_z: 0.0,
            env_mean: 0.0,
            mean_primed: false,
            dc: DcBlocker::new(AM_DC_BLOCK_R),
            lpf: Biquad::new(BiquadCoeffs::lowpass(audio_rate, AM_AUDIO_LPF_HZ, 0.707)),
            agc: RmsAgc::new(),
        }
    }

    pub fn decim_factor(&self) -> usize {
        self.decim_factor
    }

    /// Clears all filter and decimator memory; used across retunes.
    pub fn reset(&mut self) {
        self.samples_in = 0;
        self.settle_left = CIC_SETTLE_OUTPUTS;
        self.cic_i1 = 0.0;
        self.cic_i2 = 0.0;
        self.cic_c1_z = 0.0;
        self.cic_c2_z = 0.0;
        self.env_mean = 0.0;
        self.mean_primed = false;
        self.dc.reset();
        self.lpf.reset();
        self.agc.reset();
    }

    /// Demodulates one IQ chunk, appending int16 PCM at the audio rate.
    /// Returns the number of samples produced.
    pub fn process(
        &mut self,
        iq: &[Complex<f64>],
        pcm_out: &mut Vec<i16>,
        depth: &mut AmDepthTracker,
    ) -> usize {
        let r = self.decim_factor as f64;
        let cic_norm = 1.0 / (r * r);
        let mut produced = 0;

        for &sample in iq {
            // Integrator section runs at the input rate.
            self.cic_i1 += sample.norm();
            self.cic_i2 += self.cic_i1;
            self.samples_in += 1;

            if self.samples_in < self.decim_factor {
                continue;
            }
            self.samples_in = 0;

            // Comb section runs at the output rate.
            let y1 = self.cic_i2 - self.cic_c1_z;
            self.cic_c1_z = self.cic_i2;
            let y2 = y1 - self.cic_c2_z;
            self.cic_c2_z = y1;
            let env = y2 * cic_norm;

            if self.settle_left > 0 {
                self.settle_left -= 1;
                continue;
            }

            depth.update(env);

            if self.mean_primed {
                self.env_mean += ENV_MEAN_ALPHA * (env - self.env_mean);
            } else {
                self.env_mean = env;
                self.mean_primed = true;
            }

            let normalized = (env - self.env_mean) / self.env_mean.max(1e-6);
            let mut audio = self.dc.process(normalized);
            audio = self.lpf.process(audio);
            audio = self.agc.process(audio);

            let pcm = (audio * AM_PCM_GAIN).clamp(-32768.0, 32767.0);
            pcm_out.push(pcm as i16);
            produced += 1;
        }

        produced
    }
}
