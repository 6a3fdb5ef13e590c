//! Median and Median-Absolute-Deviation helpers over `f64` scores.

/// Median of a slice; even counts average the two middle values. Panics on
/// an empty slice -- callers must not reach this with zero inputs.
pub fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("scores are never NaN"));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Median absolute deviation from `center` (spec §4.5 step 2).
pub fn mad(values: &[f64], center: f64) -> f64 {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_odd_count() {
        assert_eq!(median(&[0.33, 0.45, 0.77]), 0.45);
    }

    #[test]
    fn median_of_even_count_averages_middle() {
        assert_eq!(median(&[0.33, 0.45]), 0.39);
    }

    #[test]
    fn mad_matches_worked_example() {
        // spec §8 scenario 2: median=0.45, deviations {0.12, 0.00, 0.32}, MAD=0.12
        let scores = [0.33, 0.45, 0.77];
        let m = median(&scores);
        assert!((m - 0.45).abs() < 1e-9);
        assert!((mad(&scores, m) - 0.12).abs() < 1e-9);
    }
}
