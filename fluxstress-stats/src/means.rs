//! Means
//!
//! Rate-like samples are combined with a harmonic mean: workers that ran for
//! different effective durations then contribute in proportion to the work
//! they did rather than the time they happened to be scheduled.
//! Harmonic and geometric means only accept positive samples; non-positive
//! values are ignored, and an input with no positive value yields 0.

/// Harmonic mean of the positive samples
pub fn harmonic_mean(samples: &[f64]) -> f64 {
    let (count, inverse_sum) = samples
        .iter()
        .filter(|&&x| x > 0.0 && x.is_finite())
        .fold((0usize, 0.0f64), |(n, sum), &x| (n + 1, sum + 1.0 / x));
    if count == 0 || inverse_sum == 0.0 {
        0.0
    } else {
        count as f64 / inverse_sum
    }
}

/// Geometric mean of the positive samples, computed in log space
pub fn geometric_mean(samples: &[f64]) -> f64 {
    let (count, log_sum) = samples
        .iter()
        .filter(|&&x| x > 0.0 && x.is_finite())
        .fold((0usize, 0.0f64), |(n, sum), &x| (n + 1, sum + x.ln()));
    if count == 0 {
        0.0
    } else {
        (log_sum / count as f64).exp()
    }
}

/// Arithmetic mean of all finite samples
pub fn arithmetic_mean(samples: &[f64]) -> f64 {
    let (count, sum) = samples
        .iter()
        .filter(|x| x.is_finite())
        .fold((0usize, 0.0f64), |(n, sum), &x| (n + 1, sum + x));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harmonic_mean() {
        // 2 / (1/1 + 1/4) = 1.6
        assert!((harmonic_mean(&[1.0, 4.0]) - 1.6).abs() < 1e-12);
        assert!((harmonic_mean(&[5.0, 5.0, 5.0]) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_harmonic_mean_ignores_non_positive() {
        assert!((harmonic_mean(&[0.0, -3.0, 2.0, 2.0]) - 2.0).abs() < 1e-12);
        assert_eq!(harmonic_mean(&[0.0, -1.0]), 0.0);
        assert_eq!(harmonic_mean(&[]), 0.0);
    }

    #[test]
    fn test_geometric_mean() {
        assert!((geometric_mean(&[1.0, 100.0]) - 10.0).abs() < 1e-9);
        assert_eq!(geometric_mean(&[0.0]), 0.0);
    }

    #[test]
    fn test_arithmetic_mean() {
        assert!((arithmetic_mean(&[1.0, 2.0, 3.0, f64::NAN]) - 2.0).abs() < 1e-12);
        assert_eq!(arithmetic_mean(&[]), 0.0);
    }

    #[test]
    fn test_mean_ordering() {
        // HM <= GM <= AM for positive samples
        let samples = [3.0, 7.0, 11.0, 19.0];
        let hm = harmonic_mean(&samples);
        let gm = geometric_mean(&samples);
        let am = arithmetic_mean(&samples);
        assert!(hm <= gm && gm <= am);
    }
}
