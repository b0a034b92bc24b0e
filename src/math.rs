//! Statistical primitives: Phred conversions, Poisson tail probabilities and the
//! pooled-variance t-test used for strand bias.

use statrs::distribution::{DiscreteCDF, Poisson};

/// Degrees of freedom below which the t-test never reports significance
pub const MIN_T_TEST_DEGREES_OF_FREEDOM: u64 = 30;

/// Convert a Phred-scaled quality to an error probability
pub fn q_to_p(q: f64) -> f64 {
    10f64.powf(-q / 10.0)
}

/// Convert an error probability to a Phred-scaled quality
pub fn p_to_q(p: f64) -> f64 {
    -10.0 * p.log10()
}

/// P(X <= k) for X ~ Poisson(lambda)
pub fn poisson_cdf(k: i64, lambda: f64) -> f64 {
    if k < 0 {
        return 0.0;
    }
    if lambda <= 0.0 {
        return 1.0;
    }
    match Poisson::new(lambda) {
        Ok(dist) => dist.cdf(k as u64),
        Err(_) => {
            log::warn!("Invalid Poisson rate {}, treating tail as certain", lambda);
            1.0
        }
    }
}

/// One-sided p-value of observing at least `observed` events when `lambda` are expected
pub fn poisson_p_value(observed: u32, lambda: f64) -> f64 {
    if observed == 0 {
        return 1.0;
    }
    1.0 - poisson_cdf(observed as i64 - 1, lambda)
}

/// Critical t values at 30 degrees of freedom for the supported one-sided alpha levels.
/// The same values are used at every larger df, so the test is slightly
/// conservative there (2.042 at 30 df against 1.960 in the limit for alpha 0.025).
const T_TEST_REJECTION_TABLE: [(f64, f64); 5] = [
    (0.005, 2.750),
    (0.01, 2.457),
    (0.025, 2.042),
    (0.05, 1.697),
    (0.1, 1.310),
];

/// Critical value for the given alpha/2, if it is one of the tabulated levels
pub fn t_test_critical_value(alpha_half: f64) -> Option<f64> {
    T_TEST_REJECTION_TABLE
        .iter()
        .find(|(alpha, _)| (alpha - alpha_half).abs() < 1e-9)
        .map(|(_, critical)| *critical)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TTestResult {
    pub score: f64,
    pub degrees_of_freedom: u64,
    pub significant: bool,
}

/// Pooled-variance two-sample t-test comparing two observed frequencies.
/// Each sample is treated as `n` Bernoulli trials with `successes` hits.
pub fn pooled_t_test(successes1: f64, n1: f64, successes2: f64, n2: f64, alpha_half: f64) -> TTestResult {
    let df = (n1 + n2 - 2.0).max(0.0) as u64;
    let not_significant = TTestResult {
        score: 0.0,
        degrees_of_freedom: df,
        significant: false,
    };

    if df < MIN_T_TEST_DEGREES_OF_FREEDOM || n1 < 1.0 || n2 < 1.0 {
        return not_significant;
    }
    let critical = match t_test_critical_value(alpha_half) {
        Some(critical) => critical,
        None => return not_significant,
    };

    let mean1 = (successes1 / n1).min(1.0);
    let mean2 = (successes2 / n2).min(1.0);

    // sum of squared deviations of a 0/1 sample is n * p * (1 - p)
    let ss1 = n1 * mean1 * (1.0 - mean1);
    let ss2 = n2 * mean2 * (1.0 - mean2);
    let pooled_variance = (ss1 + ss2) / df as f64;
    let standard_error = (pooled_variance * (1.0 / n1 + 1.0 / n2)).sqrt();

    let score = if standard_error > 0.0 {
        (mean1 - mean2) / standard_error
    } else if mean1 == mean2 {
        0.0
    } else {
        f64::INFINITY.copysign(mean1 - mean2)
    };

    TTestResult {
        score,
        degrees_of_freedom: df,
        significant: score.abs() > critical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_q_p_conversions() {
        assert!((q_to_p(20.0) - 0.01).abs() < 1e-12);
        assert!((q_to_p(30.0) - 0.001).abs() < 1e-12);
        assert!((p_to_q(0.01) - 20.0).abs() < 1e-9);
        assert!((p_to_q(q_to_p(37.0)) - 37.0).abs() < 1e-9);
    }

    #[test]
    fn test_poisson_cdf() {
        assert_eq!(poisson_cdf(-1, 2.0), 0.0);
        assert_eq!(poisson_cdf(3, 0.0), 1.0);
        // P(X = 0) for lambda 1 is e^-1
        assert!((poisson_cdf(0, 1.0) - (-1.0f64).exp()).abs() < 1e-9);
        assert!(poisson_cdf(5, 1.0) > poisson_cdf(2, 1.0));
    }

    #[test]
    fn test_poisson_p_value() {
        assert_eq!(poisson_p_value(0, 3.0), 1.0);
        let p = poisson_p_value(5, 1.0);
        assert!(p > 0.003 && p < 0.004);
        // far tail underflows to zero in double precision
        assert!(poisson_p_value(40, 1.0) <= 1e-15);
        assert!(poisson_p_value(2, 1.0) > poisson_p_value(3, 1.0));
    }

    #[test]
    fn test_critical_values() {
        assert_eq!(t_test_critical_value(0.025), Some(2.042));
        assert_eq!(t_test_critical_value(0.1), Some(1.310));
        assert_eq!(t_test_critical_value(0.2), None);
    }

    #[test]
    fn test_t_test_low_degrees_of_freedom() {
        let result = pooled_t_test(10.0, 10.0, 0.0, 10.0, 0.025);
        assert_eq!(result.degrees_of_freedom, 18);
        assert!(!result.significant);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_t_test_detects_difference() {
        let result = pooled_t_test(50.0, 100.0, 5.0, 100.0, 0.025);
        assert_eq!(result.degrees_of_freedom, 198);
        assert!(result.significant);
        assert!(result.score > 0.0);

        let balanced = pooled_t_test(20.0, 100.0, 21.0, 100.0, 0.025);
        assert!(!balanced.significant);
    }

    #[test]
    fn test_t_test_large_df_uses_30_df_critical_value() {
        // score of about 1.97: past the normal limit but under the 30 df value
        let result = pooled_t_test(128.0, 1000.0, 100.0, 1000.0, 0.025);
        assert_eq!(result.degrees_of_freedom, 1998);
        assert!(result.score > 1.96 && result.score < 2.042);
        assert!(!result.significant);
    }
}
