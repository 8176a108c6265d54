//! Distribution distances used by the drift score.

use std::collections::HashMap;

/// Element-wise mean of equally sized vectors; `None` when empty or ragged.
pub fn centroid<'a>(vectors: impl IntoIterator<Item = &'a [f32]>) -> Option<Vec<f64>> {
    let mut sum: Option<Vec<f64>> = None;
    let mut n = 0usize;
    for v in vectors {
        if v.is_empty() {
            continue;
        }
        let acc = sum.get_or_insert_with(|| vec![0.0; v.len()]);
        if acc.len() != v.len() {
            return None;
        }
        for (a, x) in acc.iter_mut().zip(v) {
            *a += *x as f64;
        }
        n += 1;
    }
    sum.map(|s| s.into_iter().map(|x| x / n as f64).collect())
}

/// `1 - cosine(a, b)` clamped to `[0, 1]`; 0 when either side is degenerate.
pub fn cosine_shift(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (1.0 - dot / (na * nb)).clamp(0.0, 1.0)
}

/// Normalized token distribution.
pub fn distribution<'a>(tokens: impl IntoIterator<Item = &'a u32>) -> HashMap<u32, f64> {
    let mut counts: HashMap<u32, f64> = HashMap::new();
    let mut total = 0.0;
    for t in tokens {
        *counts.entry(*t).or_insert(0.0) += 1.0;
        total += 1.0;
    }
    if total > 0.0 {
        for v in counts.values_mut() {
            *v /= total;
        }
    }
    counts
}

/// Total-variation distance in `[0, 1]`; 0 if either side is empty.
pub fn total_variation(p: &HashMap<u32, f64>, q: &HashMap<u32, f64>) -> f64 {
    if p.is_empty() || q.is_empty() {
        return 0.0;
    }
    let mut sum = 0.0;
    for (token, pv) in p {
        sum += (pv - q.get(token).copied().unwrap_or(0.0)).abs();
    }
    for (token, qv) in q {
        if !p.contains_key(token) {
            sum += qv;
        }
    }
    (sum / 2.0).clamp(0.0, 1.0)
}

/// Mean per-dimension population variance.
pub fn mean_variance(vectors: &[&[f32]]) -> f64 {
    let Some(mean) = centroid(vectors.iter().copied()) else {
        return 0.0;
    };
    let n = vectors.len() as f64;
    let per_dim: f64 = (0..mean.len())
        .map(|d| {
            vectors
                .iter()
                .map(|v| (v[d] as f64 - mean[d]).powi(2))
                .sum::<f64>()
                / n
        })
        .sum();
    per_dim / mean.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centroid() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        assert_eq!(centroid([&a[..], &b[..]]), Some(vec![0.5, 0.5]));
        assert_eq!(centroid(std::iter::empty()), None);
        let c = [1.0f32];
        assert_eq!(centroid([&a[..], &c[..]]), None);
    }

    #[test]
    fn test_cosine_shift() {
        assert_eq!(cosine_shift(&[1.0, 0.0], &[2.0, 0.0]), 0.0);
        assert!((cosine_shift(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-12);
        // Opposite directions clamp to 1.
        assert_eq!(cosine_shift(&[1.0, 0.0], &[-1.0, 0.0]), 1.0);
        assert_eq!(cosine_shift(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_total_variation() {
        let p = distribution(&[1, 1, 2, 2]);
        let q = distribution(&[3, 3]);
        assert_eq!(total_variation(&p, &q), 1.0);
        assert_eq!(total_variation(&p, &p), 0.0);
        let r = distribution(&[1, 1, 1, 2]);
        assert!((total_variation(&p, &r) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_mean_variance() {
        let a = [0.0f32, 2.0];
        let b = [2.0f32, 2.0];
        // dim 0 variance 1, dim 1 variance 0.
        assert_eq!(mean_variance(&[&a, &b]), 0.5);
        assert_eq!(mean_variance(&[]), 0.0);
    }
}
