//! Analysis window generation
//!
//! All windows are evaluated over `M = len - 1` so the first and last
//! coefficients land on the window edges (periodic variants are not used;
//! the estimators average enough segments that scalloping is handled by the
//! ENBW factor in the derived configuration).

use std::f64::consts::PI;

use rf_core::WindowType;

/// Shape parameter of the Kaiser window used as a PSD analysis window
/// (matches the 1.8 ENBW table entry).
pub const KAISER_PSD_BETA: f64 = 6.0;

/// Taper fraction of the Tukey window.
pub const TUKEY_ALPHA: f64 = 0.5;

/// Zeroth-order modified Bessel function of the first kind, by power
/// series. The iteration stops once a term falls below 1e-12.
pub fn bessel_i0(x: f64) -> f64 {
    let y = x * x / 4.0;
    let mut sum = 1.0;
    let mut term = y;
    let mut k = 1u32;

    while term > 1e-12 {
        sum += term;
        k += 1;
        term *= y / (k as f64 * k as f64);
    }
    sum
}

/// Kaiser window of arbitrary beta, used both for the PSD analysis window
/// and as the PFB prototype filter.
pub fn kaiser(len: usize, beta: f64) -> Vec<f64> {
    if len <= 1 {
        return vec![1.0; len];
    }
    let denom = bessel_i0(beta);
    let m = (len - 1) as f64;
    (0..len)
        .map(|n| {
            let x = 2.0 * n as f64 / m - 1.0;
            bessel_i0(beta * (1.0 - x * x).max(0.0).sqrt()) / denom
        })
        .collect()
}

fn tukey(len: usize, alpha: f64) -> Vec<f64> {
    if len <= 1 {
        return vec![1.0; len];
    }
    let m = (len - 1) as f64;
    let edge = alpha * m / 2.0;
    (0..len)
        .map(|n| {
            let n = n as f64;
            if n < edge {
                0.5 * (1.0 + (PI * (n / edge - 1.0)).cos())
            } else if n > m - edge {
                0.5 * (1.0 + (PI * ((n - m + edge) / edge)).cos())
            } else {
                1.0
            }
        })
        .collect()
}

/// Generates the window coefficients for the selected type.
pub fn generate(window_type: WindowType, len: usize) -> Vec<f64> {
    if len <= 1 {
        return vec![1.0; len];
    }
    let m = (len - 1) as f64;

    match window_type {
        WindowType::Rectangular => vec![1.0; len],
        WindowType::Hann => (0..len)
            .map(|n| 0.5 * (1.0 - (2.0 * PI * n as f64 / m).cos()))
            .collect(),
        WindowType::Hamming => (0..len)
            .map(|n| 0.54 - 0.46 * (2.0 * PI * n as f64 / m).cos())
            .collect(),
        WindowType::Blackman => (0..len)
            .map(|n| {
                0.42 - 0.5 * (2.0 * PI * n as f64 / m).cos()
                    + 0.08 * (4.0 * PI * n as f64 / m).cos()
            })
            .collect(),
        WindowType::FlatTop => (0..len)
            .map(|n| {
                let t = 2.0 * PI * n as f64 / m;
                1.0 - 1.93 * t.cos() + 1.29 * (2.0 * t).cos() - 0.388 * (3.0 * t).cos()
                    + 0.032 * (4.0 * t).cos()
            })
            .collect(),
        WindowType::Bartlett => (0..len)
            .map(|n| 1.0 - ((n as f64 - m / 2.0) / (m / 2.0)).abs())
            .collect(),
        WindowType::Kaiser => kaiser(len, KAISER_PSD_BETA),
        WindowType::Tukey => tukey(len, TUKEY_ALPHA),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// ENBW measured from the coefficients: `N * sum(w^2) / sum(w)^2`.
    fn measured_enbw(w: &[f64]) -> f64 {
        let s1: f64 = w.iter().sum();
        let s2: f64 = w.iter().map(|v| v * v).sum();
        w.len() as f64 * s2 / (s1 * s1)
    }

    #[test]
    fn test_hann_shape() {
        let w = generate(WindowType::Hann, 1024);
        assert_relative_eq!(w[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(w[1023], 0.0, epsilon = 1e-12);
        assert!(w[512] > 0.999);
    }

    #[test]
    fn test_windows_match_enbw_table() {
        // The table values are the documented derivation factors; Flat-Top
        // and Kaiser tables are nominal, so allow a few percent. Tukey is
        // excluded: its documented factor is a deliberate Hann-equivalent
        // sizing constant, not the measured ENBW of the 0.5 taper.
        for (wt, tol) in [
            (WindowType::Rectangular, 0.001),
            (WindowType::Bartlett, 0.01),
            (WindowType::Hamming, 0.01),
            (WindowType::Hann, 0.01),
            (WindowType::Blackman, 0.01),
            (WindowType::FlatTop, 0.03),
            (WindowType::Kaiser, 0.05),
        ] {
            let w = generate(wt, 4096);
            let measured = measured_enbw(&w);
            let table = wt.enbw_factor();
            assert!(
                (measured - table).abs() / table < tol,
                "{wt:?}: measured {measured}, table {table}"
            );
        }
    }

    #[test]
    fn test_tukey_flat_middle_tapered_edges() {
        let w = generate(WindowType::Tukey, 1000);
        assert_relative_eq!(w[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(w[999], 0.0, epsilon = 1e-9);
        assert_relative_eq!(w[500], 1.0, epsilon = 1e-12);
        // Middle half is exactly flat for alpha = 0.5
        assert_relative_eq!(w[300], 1.0, epsilon = 1e-12);
        assert_relative_eq!(w[700], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_kaiser_symmetric_peak_center() {
        let w = kaiser(257, 8.6);
        assert_relative_eq!(w[128], 1.0, epsilon = 1e-12);
        for n in 0..257 {
            assert_relative_eq!(w[n], w[256 - n], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_bessel_i0_reference_values() {
        assert_relative_eq!(bessel_i0(0.0), 1.0, epsilon = 1e-12);
        // I0(1) = 1.26606587775..., I0(5) = 27.2398718236...
        assert_relative_eq!(bessel_i0(1.0), 1.2660658777520084, epsilon = 1e-9);
        assert_relative_eq!(bessel_i0(5.0), 27.239871823604442, epsilon = 1e-6);
    }
}
