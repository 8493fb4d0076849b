// stats/corr.rs
// Pearson and Spearman correlations plus the quantile helpers the choropleth
// classing uses.

/// Keep the rows where both series have a value.
pub fn paired(x: &[Option<f64>], y: &[Option<f64>]) -> (Vec<f64>, Vec<f64>) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for (a, b) in x.iter().zip(y.iter()) {
        if let (Some(a), Some(b)) = (a, b) {
            xs.push(*a);
            ys.push(*b);
        }
    }
    (xs, ys)
}

/// Pearson product-moment correlation. `None` when fewer than two pairs or
/// either series has zero variance.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = x[i] - mean_x;
        let dy = y[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= 0.0 || var_y <= 0.0 {
        return None;
    }
    Some(cov / (var_x * var_y).sqrt())
}

/// Spearman rank correlation: Pearson on average ranks.
pub fn spearman(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    pearson(&ranks(&x[..n]), &ranks(&y[..n]))
}

/// 1-based ranks with ties assigned their average rank.
pub fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut out = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            out[idx] = avg_rank;
        }
        i = j + 1;
    }
    out
}

/// Linear-interpolation quantile of unsorted data, `q` in 0..=1.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Upper break values for `k` quantile classes (the last break is the max).
pub fn quantile_breaks(values: &[f64], k: usize) -> Vec<f64> {
    (1..=k)
        .filter_map(|i| quantile(values, i as f64 / k as f64))
        .collect()
}

/// Class index of `value` against quantile `breaks` (first class whose upper
/// break is >= value).
pub fn class_of(value: f64, breaks: &[f64]) -> usize {
    for (i, b) in breaks.iter().enumerate() {
        if value <= *b {
            return i;
        }
    }
    breaks.len().saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pearson_of_exact_line_is_one() {
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let y = vec![2.0, 4.0, 6.0, 8.0];
        assert_relative_eq!(pearson(&x, &y).unwrap(), 1.0, epsilon = 1e-12);
        let y_neg: Vec<f64> = y.iter().map(|v| -v).collect();
        assert_relative_eq!(pearson(&x, &y_neg).unwrap(), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn pearson_rejects_degenerate_input() {
        assert!(pearson(&[1.0], &[2.0]).is_none());
        assert!(pearson(&[3.0, 3.0, 3.0], &[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn spearman_ignores_monotone_distortion() {
        let x: Vec<f64> = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let y: Vec<f64> = x.iter().map(|v| v.exp()).collect();
        assert_relative_eq!(spearman(&x, &y).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn tied_ranks_are_averaged() {
        let r = ranks(&[10.0, 20.0, 20.0, 30.0]);
        assert_eq!(r, vec![1.0, 2.5, 2.5, 4.0]);
    }

    #[test]
    fn quantile_interpolates() {
        let values = vec![0.0, 10.0, 20.0, 30.0];
        assert_relative_eq!(quantile(&values, 0.5).unwrap(), 15.0);
        assert_relative_eq!(quantile(&values, 0.0).unwrap(), 0.0);
        assert_relative_eq!(quantile(&values, 1.0).unwrap(), 30.0);
    }

    #[test]
    fn quantile_breaks_cover_the_range() {
        let values: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let breaks = quantile_breaks(&values, 5);
        assert_eq!(breaks.len(), 5);
        assert_relative_eq!(*breaks.last().unwrap(), 99.0);
        assert_eq!(class_of(0.0, &breaks), 0);
        assert_eq!(class_of(99.0, &breaks), 4);
        assert_eq!(class_of(50.0, &breaks), 2);
    }
}
