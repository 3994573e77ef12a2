//! Log-space helpers for the estimator

use statrs::function::gamma::digamma;

/// ln(e^a + e^b) without overflow or underflow
pub(crate) fn log_add(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// ln(sum(e^x)) over a slice
pub(crate) fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY || !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Variational Dirichlet weights in log space.
///
/// For expected counts `c` and a symmetric prior `prior`, returns
/// `digamma(c_k + prior) - digamma(sum(c) + K * prior)` per component. The
/// exponentiated weights are the geometric means of the Dirichlet posterior
/// and sum to less than one.
pub(crate) fn variational_log_weights(counts: &[f64], prior: f64) -> Vec<f64> {
    let total: f64 = counts.iter().sum::<f64>() + prior * counts.len() as f64;
    let norm = digamma(total);
    counts.iter().map(|c| digamma(c + prior) - norm).collect()
}

/// Shannon entropy in nats, clamped to `[0, ln(K)]`; zero-probability entries contribute nothing
pub fn entropy(distribution: &[f64]) -> f64 {
    if distribution.is_empty() {
        return 0.0;
    }
    let h: f64 = distribution
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| -p * p.ln())
        .sum();
    h.clamp(0.0, (distribution.len() as f64).ln())
}

/// Index of the largest value; ties go to the lowest index
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (idx, &value) in values.iter().enumerate().skip(1) {
        if value > values[best] {
            best = idx;
        }
    }
    best
}
