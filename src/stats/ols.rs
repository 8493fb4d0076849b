// stats/ols.rs
// Ordinary least squares with the diagnostics the analysis tables report:
// coefficient estimates, standard errors, t statistics, two-sided p-values,
// R² and adjusted R².

use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::error::{PipelineError, Result};

/// A model to fit: dependent variable regressed on the named independents
/// (an intercept is always included).
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub name: String,
    pub dependent: String,
    pub independents: Vec<String>,
}

impl ModelSpec {
    pub fn new(name: &str, dependent: &str, independents: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            dependent: dependent.to_string(),
            independents: independents.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// One fitted coefficient.
#[derive(Debug, Clone)]
pub struct Coefficient {
    pub term: String,
    pub estimate: f64,
    pub std_error: f64,
    pub t_stat: f64,
    pub p_value: f64,
}

/// A fitted model. Derived purely from the input rows and the spec; never
/// mutated after creation.
#[derive(Debug, Clone)]
pub struct ModelResult {
    pub name: String,
    pub dependent: String,
    pub coefficients: Vec<Coefficient>,
    pub r_squared: f64,
    pub adj_r_squared: f64,
    pub n: usize,
    pub df_resid: usize,
}

/// Listwise deletion: keep rows where the dependent and every independent
/// are present. Returns (y, columns) with the same row order as the input.
pub fn complete_cases(
    y: &[Option<f64>],
    xs: &[(String, Vec<Option<f64>>)],
) -> (Vec<f64>, Vec<Vec<f64>>) {
    let n = y.len();
    let mut kept_y = Vec::new();
    let mut kept_xs: Vec<Vec<f64>> = vec![Vec::new(); xs.len()];
    'rows: for row in 0..n {
        let Some(yv) = y[row] else { continue };
        let mut values = Vec::with_capacity(xs.len());
        for (_, col) in xs {
            match col.get(row).copied().flatten() {
                Some(v) => values.push(v),
                None => continue 'rows,
            }
        }
        kept_y.push(yv);
        for (out, v) in kept_xs.iter_mut().zip(values) {
            out.push(v);
        }
    }
    (kept_y, kept_xs)
}

/// Fit `y ~ 1 + xs` by least squares.
///
/// Errors on rank-deficient design matrices and on samples too small to
/// leave residual degrees of freedom.
pub fn fit(
    model_name: &str,
    dependent: &str,
    term_names: &[String],
    y: &[f64],
    xs: &[Vec<f64>],
) -> Result<ModelResult> {
    let n = y.len();
    let k = xs.len() + 1; // intercept
    if n < k + 2 {
        return Err(PipelineError::TooFewRows {
            model: model_name.to_string(),
            rows: n,
            cols: k,
        });
    }

    let mut design = DMatrix::<f64>::zeros(n, k);
    for row in 0..n {
        design[(row, 0)] = 1.0;
        for (j, col) in xs.iter().enumerate() {
            design[(row, j + 1)] = col[row];
        }
    }
    let y_vec = DVector::from_column_slice(y);

    let svd = design.clone().svd(true, true);
    let max_singular = svd.singular_values.max();
    let eps = max_singular * 1e-10 * n.max(k) as f64;
    let rank = svd.rank(eps);
    if rank < k {
        return Err(PipelineError::RankDeficient {
            model: model_name.to_string(),
            rank,
            cols: k,
        });
    }
    let beta = svd
        .solve(&y_vec, eps)
        .map_err(|_| PipelineError::RankDeficient {
            model: model_name.to_string(),
            rank,
            cols: k,
        })?;

    let fitted = &design * &beta;
    let residuals = &y_vec - &fitted;
    let rss: f64 = residuals.iter().map(|r| r * r).sum();
    let mean_y = y_vec.mean();
    let tss: f64 = y_vec.iter().map(|v| (v - mean_y).powi(2)).sum();
    let r_squared = if tss > 0.0 { 1.0 - rss / tss } else { f64::NAN };

    let df_resid = n - k;
    let sigma2 = rss / df_resid as f64;
    let xtx_inv = (design.transpose() * &design)
        .try_inverse()
        .ok_or_else(|| PipelineError::RankDeficient {
            model: model_name.to_string(),
            rank,
            cols: k,
        })?;

    // df_resid >= 2 here, so construction cannot fail; fall back to NaN
    // p-values rather than panicking if it ever does.
    let t_dist = StudentsT::new(0.0, 1.0, df_resid as f64).ok();

    let mut coefficients = Vec::with_capacity(k);
    let mut all_terms = Vec::with_capacity(k);
    all_terms.push("intercept".to_string());
    all_terms.extend(term_names.iter().cloned());
    for (j, term) in all_terms.into_iter().enumerate() {
        let estimate = beta[j];
        let std_error = (sigma2 * xtx_inv[(j, j)]).sqrt();
        let t_stat = if std_error > 0.0 {
            estimate / std_error
        } else {
            f64::INFINITY
        };
        let p_value = match &t_dist {
            Some(dist) if t_stat.is_finite() => 2.0 * (1.0 - dist.cdf(t_stat.abs())),
            Some(_) => 0.0,
            None => f64::NAN,
        };
        coefficients.push(Coefficient {
            term,
            estimate,
            std_error,
            t_stat,
            p_value,
        });
    }

    let adj_r_squared = if tss > 0.0 {
        1.0 - (1.0 - r_squared) * (n - 1) as f64 / df_resid as f64
    } else {
        f64::NAN
    };

    Ok(ModelResult {
        name: model_name.to_string(),
        dependent: dependent.to_string(),
        coefficients,
        r_squared,
        adj_r_squared,
        n,
        df_resid,
    })
}
