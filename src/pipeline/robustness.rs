// robustness.rs
// Stage 7: alternative specifications around the baseline models. Unlike the
// modeling stage, a specification that cannot be fit is recorded in the
// output table and the run keeps going, so one bad alternative never hides
// the rest.

use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::stats::corr::quantile;
use crate::stats::ols::{complete_cases, fit, ModelResult};
use crate::table::Table;

/// One alternative specification: a baseline model plus a single deliberate
/// change (different denominator, an added control, a log transform, or a
/// trimmed sample).
#[derive(Debug, Clone)]
pub struct Alternative {
    pub name: String,
    pub dependent: String,
    pub independents: Vec<String>,
    /// Replace the first independent with its natural log (non-positive
    /// values drop out of the sample).
    pub log_first_independent: bool,
    /// Drop rows in the top decile of the named column before fitting.
    pub trim_top_decile: Option<String>,
}

impl Alternative {
    fn new(name: &str, dependent: &str, independents: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            dependent: dependent.to_string(),
            independents: independents.iter().map(|s| s.to_string()).collect(),
            log_first_independent: false,
            trim_top_decile: None,
        }
    }

    fn logged(mut self) -> Self {
        self.log_first_independent = true;
        self
    }

    fn trimmed(mut self, column: &str) -> Self {
        self.trim_top_decile = Some(column.to_string());
        self
    }
}

/// The specification battery, one change at a time per baseline.
pub fn alternatives() -> Vec<Alternative> {
    vec![
        Alternative::new("owner_density_base", "owner_pct", &["node_density"]),
        Alternative::new("owner_edge_density", "owner_pct", &["edge_km_density"]),
        Alternative::new(
            "owner_density_control",
            "owner_pct",
            &["node_density", "black_pct"],
        ),
        Alternative::new("owner_log_density", "owner_pct", &["node_density"]).logged(),
        Alternative::new("owner_density_trimmed", "owner_pct", &["node_density"])
            .trimmed("node_density"),
        Alternative::new("vacancy_aspl_base", "vac_rate", &["aspl_mean"]),
        Alternative::new("vacancy_aspl_trimmed", "vac_rate", &["aspl_mean"])
            .trimmed("aspl_mean"),
        Alternative::new("owner_betweenness_base", "owner_pct", &["betweenness_mean"]),
    ]
}

#[derive(Debug, Clone, Copy)]
pub struct RobustnessReport {
    pub fitted: usize,
    pub failed: usize,
}

/// Run the robustness stage.
pub fn run(cfg: &PipelineConfig) -> Result<RobustnessReport> {
    let table = Table::read_csv(&cfg.bg_joined_csv())?;

    let mut out = Table::new(
        [
            "spec",
            "status",
            "dependent",
            "term",
            "estimate",
            "std_error",
            "t_stat",
            "p_value",
            "r_squared",
            "n",
            "error",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    );

    let mut fitted = 0usize;
    let mut failed = 0usize;
    for alt in alternatives() {
        match fit_alternative(&table, &alt) {
            Ok(result) => {
                info!("{}: n={}, R2={:.4}", alt.name, result.n, result.r_squared);
                push_result(&mut out, &alt, &result);
                fitted += 1;
            }
            Err(err) => {
                warn!("{} could not be fit: {err}", alt.name);
                let mut row = vec![alt.name.clone(), "error".into(), alt.dependent.clone()];
                row.resize(out.headers().len() - 1, String::new());
                row.push(err.to_string());
                out.push_row(row);
                failed += 1;
            }
        }
    }

    out.write_csv(&cfg.robustness_csv())?;
    info!("wrote robustness table: {}", cfg.robustness_csv().display());
    info!("{fitted} specifications fit, {failed} failed");
    Ok(RobustnessReport { fitted, failed })
}

/// Fit one alternative: apply its transform and trim, then regress.
pub fn fit_alternative(table: &Table, alt: &Alternative) -> Result<ModelResult> {
    let mut y = table.numeric_column(&alt.dependent);
    let mut xs: Vec<(String, Vec<Option<f64>>)> = alt
        .independents
        .iter()
        .map(|name| (name.clone(), table.numeric_column(name)))
        .collect();

    if alt.log_first_independent {
        if let Some((name, values)) = xs.first_mut() {
            *name = format!("log_{name}");
            for v in values.iter_mut() {
                *v = v.filter(|x| *x > 0.0).map(f64::ln);
            }
        }
    }

    if let Some(trim_col) = &alt.trim_top_decile {
        let column = table.numeric_column(trim_col);
        let present: Vec<f64> = column.iter().flatten().copied().collect();
        if let Some(cutoff) = quantile(&present, 0.9) {
            for (row, value) in column.iter().enumerate() {
                if value.is_some_and(|v| v > cutoff) {
                    y[row] = None;
                }
            }
        }
    }

    let term_names: Vec<String> = xs.iter().map(|(name, _)| name.clone()).collect();
    let (ky, kxs) = complete_cases(&y, &xs);
    fit(&alt.name, &alt.dependent, &term_names, &ky, &kxs)
}

fn push_result(out: &mut Table, alt: &Alternative, result: &ModelResult) {
    for coef in &result.coefficients {
        out.push_row(vec![
            alt.name.clone(),
            "ok".into(),
            result.dependent.clone(),
            coef.term.clone(),
            format!("{:.6}", coef.estimate),
            format!("{:.6}", coef.std_error),
            format!("{:.4}", coef.t_stat),
            format!("{:.6}", coef.p_value),
            format!("{:.4}", result.r_squared),
            result.n.to_string(),
            String::new(),
        ]);
    }
}
