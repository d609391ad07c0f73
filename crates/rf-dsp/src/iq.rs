//! IQ stream loading and imbalance compensation
//!
//! The front-end delivers interleaved signed-8-bit `{I, Q}` pairs. Loading
//! normalizes into roughly [-1, +1]; compensation removes per-channel DC,
//! balances channel gain, and decorrelates the phases, in that order.

use num_complex::Complex;

/// Converts interleaved signed-8-bit I/Q bytes into normalized complex
/// samples: `(i / 128) + j (q / 128)`. A trailing odd byte is ignored.
pub fn iq_from_bytes(bytes: &[u8]) -> Vec<Complex<f64>> {
    bytes
        .chunks_exact(2)
        .map(|pair| {
            let i = pair[0] as i8 as f64 / 128.0;
            let q = pair[1] as i8 as f64 / 128.0;
            Complex::new(i, q)
        })
        .collect()
}

/// Three-step IQ imbalance correction in place:
///
/// 1. DC removal per channel.
/// 2. Gain balance: scale Q by `sqrt(sum I^2 / sum Q^2)`.
/// 3. Phase decorrelation: `Q <- Q - rho * I` with `rho = sum(I*Q) / sum I^2`.
///
/// Degenerate blocks (all-zero I or Q energy) are left untouched after DC
/// removal.
pub fn compensate_iq(x: &mut [Complex<f64>]) {
    let n = x.len();
    if n == 0 {
        return;
    }

    let mean_i: f64 = x.iter().map(|s| s.re).sum::<f64>() / n as f64;
    let mean_q: f64 = x.iter().map(|s| s.im).sum::<f64>() / n as f64;
    for s in x.iter_mut() {
        s.re -= mean_i;
        s.im -= mean_q;
    }

    let mut p_i = 0.0;
    let mut p_q = 0.0;
    let mut cross = 0.0;
    for s in x.iter() {
        p_i += s.re * s.re;
        p_q += s.im * s.im;
        cross += s.re * s.im;
    }

    if p_i <= 0.0 || p_q <= 0.0 {
        return;
    }

    let gain = (p_i / p_q).sqrt();
    for s in x.iter_mut() {
        s.im *= gain;
    }

    // Cross term rescales with Q.
    let rho = cross * gain / p_i;
    for s in x.iter_mut() {
        s.im -= rho * s.re;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_byte_conversion() {
        let bytes = [0u8, 128, 127, 255, 64, 192];
        let iq = iq_from_bytes(&bytes);
        assert_eq!(iq.len(), 3);
        assert_eq!(iq[0], Complex::new(0.0, -1.0));
        assert_eq!(iq[1], Complex::new(127.0 / 128.0, -1.0 / 128.0));
        assert_eq!(iq[2], Complex::new(0.5, -0.5));
    }

    #[test]
    fn test_odd_trailing_byte_ignored() {
        assert_eq!(iq_from_bytes(&[1, 2, 3]).len(), 1);
    }

    #[test]
    fn test_compensation_residuals() {
        // Tone with deliberate DC offset, gain skew and a small quadrature
        // error (the residual power imbalance after decorrelation grows as
        // rho^2, so front-end-scale phase errors are what the bound covers).
        let n = 8192;
        let mut x: Vec<Complex<f64>> = (0..n)
            .map(|k| {
                let t = 2.0 * PI * 37.0 * k as f64 / n as f64;
                let i = 0.05 + t.cos();
                let q = -0.03 + 0.8 * (t + 5e-4).sin();
                Complex::new(i, q)
            })
            .collect();

        compensate_iq(&mut x);

        let n_f = n as f64;
        let mean_i: f64 = x.iter().map(|s| s.re).sum::<f64>() / n_f;
        let mean_q: f64 = x.iter().map(|s| s.im).sum::<f64>() / n_f;
        let p_i: f64 = x.iter().map(|s| s.re * s.re).sum();
        let p_q: f64 = x.iter().map(|s| s.im * s.im).sum();
        let cross: f64 = x.iter().map(|s| s.re * s.im).sum();

        assert!(mean_i.abs() < 1e-9);
        assert!(mean_q.abs() < 1e-9);
        assert!((cross / p_i).abs() < 1e-9);
        assert!(((p_i - p_q) / p_i).abs() < 1e-6);
    }

    #[test]
    fn test_empty_and_degenerate_blocks() {
        let mut empty: Vec<Complex<f64>> = vec![];
        compensate_iq(&mut empty);

        let mut flat = vec![Complex::new(1.0, 1.0); 16];
        compensate_iq(&mut flat);
        // After DC removal the block is all zero; no rescaling happens.
        assert!(flat.iter().all(|s| s.re == 0.0 && s.im == 0.0));
    }
}
