//! Evaluation metrics: recall under uncertainty, ranking quality, and
//! calibration.
//!
//! Acceptance gates operate on the Wilson lower bound, not the point
//! estimate: 154/154 observed recall is compatible with a true recall of
//! 97.6% at 95% confidence, and that is the number the gate must clear.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// z for a two-sided 95% interval.
pub const Z_95: f64 = 1.959964;

/// Wilson score interval for a binomial proportion.
pub fn wilson_interval(successes: usize, n: usize, z: f64) -> (f64, f64) {
    if n == 0 {
        return (0.0, 1.0);
    }
    let n_f = n as f64;
    let p = successes as f64 / n_f;
    let z2 = z * z;
    let denominator = 1.0 + z2 / n_f;
    let center = p + z2 / (2.0 * n_f);
    let spread = z * (p * (1.0 - p) / n_f + z2 / (4.0 * n_f * n_f)).sqrt();
    (
        ((center - spread) / denominator).max(0.0),
        ((center + spread) / denominator).min(1.0),
    )
}

/// Lower bound of the 95% Wilson interval.
pub fn wilson_lower_bound(successes: usize, n: usize) -> f64 {
    wilson_interval(successes, n, Z_95).0
}

/// NDCG@K with the observed score as the gain, ranking by predictions.
pub fn ndcg_at_k(predictions: &[f64], gains: &[f64], k: usize) -> f64 {
    debug_assert_eq!(predictions.len(), gains.len());
    let k = k.min(predictions.len());
    if k == 0 {
        return 0.0;
    }

    let mut order: Vec<usize> = (0..predictions.len()).collect();
    order.sort_by(|&a, &b| predictions[b].partial_cmp(&predictions[a]).expect("finite"));
    let dcg: f64 = order[..k]
        .iter()
        .enumerate()
        .map(|(i, &idx)| gains[idx] / ((i + 2) as f64).log2())
        .sum();

    let mut ideal = gains.to_vec();
    ideal.sort_by(|a, b| b.partial_cmp(a).expect("finite"));
    let idcg: f64 = ideal[..k]
        .iter()
        .enumerate()
        .map(|(i, g)| g / ((i + 2) as f64).log2())
        .sum();

    if idcg == 0.0 { 0.0 } else { dcg / idcg }
}

/// Average ranks, ties sharing the mean rank.
fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).expect("finite"));

    let mut out = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let mean_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            out[idx] = mean_rank;
        }
        i = j + 1;
    }
    out
}

/// Spearman rank correlation.
pub fn spearman(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    if a.len() < 2 {
        return 0.0;
    }
    let ra = ranks(a);
    let rb = ranks(b);
    pearson(&ra, &rb)
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    if var_a == 0.0 || var_b == 0.0 {
        0.0
    } else {
        cov / (var_a * var_b).sqrt()
    }
}

/// Expected Calibration Error over equal-mass bins.
pub fn expected_calibration_error(probs: &[f64], labels: &[bool], n_bins: usize) -> f64 {
    debug_assert_eq!(probs.len(), labels.len());
    if probs.is_empty() || n_bins == 0 {
        return 0.0;
    }

    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[a].partial_cmp(&probs[b]).expect("finite"));

    let n = probs.len();
    let mut ece = 0.0;
    for bin in 0..n_bins {
        let start = bin * n / n_bins;
        let end = ((bin + 1) * n / n_bins).min(n);
        if start >= end {
            continue;
        }
        let slice = &order[start..end];
        let confidence: f64 =
            slice.iter().map(|&i| probs[i]).sum::<f64>() / slice.len() as f64;
        let accuracy: f64 = slice.iter().filter(|&&i| labels[i]).count() as f64
            / slice.len() as f64;
        ece += (slice.len() as f64 / n as f64) * (confidence - accuracy).abs();
    }
    ece
}

/// Percentile bootstrap CI of a statistic over row indices.
pub fn bootstrap_ci(
    n: usize,
    resamples: usize,
    seed: u64,
    statistic: impl Fn(&[usize]) -> f64,
) -> (f64, f64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut values = Vec::with_capacity(resamples);
    for _ in 0..resamples {
        let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
        let value = statistic(&sample);
        if value.is_finite() {
            values.push(value);
        }
    }
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    values.sort_by(|a, b| a.partial_cmp(b).expect("finite"));
    let lo = values[((values.len() as f64) * 0.025) as usize];
    let hi = values[(((values.len() as f64) * 0.975) as usize).min(values.len() - 1)];
    (lo, hi)
}
