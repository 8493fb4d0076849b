// models.rs
// Stage 6: the baseline OLS regressions on the joined block-group table.
// A model that cannot be fit here is a fatal error; the robustness stage is
// the place where failures are tolerated.

use tracing::info;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::stats::ols::{complete_cases, fit, ModelResult, ModelSpec};
use crate::table::Table;

/// The three baseline specifications.
pub fn baseline_specs() -> Vec<ModelSpec> {
    vec![
        ModelSpec::new("owner_density", "owner_pct", &["node_density"]),
        ModelSpec::new("vacancy_aspl", "vac_rate", &["aspl_mean"]),
        ModelSpec::new("owner_betweenness", "owner_pct", &["betweenness_mean"]),
    ]
}

/// Fit one spec against a joined table: pull the columns, drop incomplete
/// rows, regress.
pub fn fit_spec(table: &Table, spec: &ModelSpec) -> Result<ModelResult> {
    let y = table.numeric_column(&spec.dependent);
    let xs: Vec<(String, Vec<Option<f64>>)> = spec
        .independents
        .iter()
        .map(|name| (name.clone(), table.numeric_column(name)))
        .collect();
    let (ky, kxs) = complete_cases(&y, &xs);
    fit(&spec.name, &spec.dependent, &spec.independents, &ky, &kxs)
}

/// Run the modeling stage.
pub fn run(cfg: &PipelineConfig) -> Result<Vec<ModelResult>> {
    let table = Table::read_csv(&cfg.bg_joined_csv())?;
    let mut results = Vec::new();
    for spec in baseline_specs() {
        let result = fit_spec(&table, &spec)?;
        info!(
            "{}: n={}, R2={:.4}, adj R2={:.4}",
            result.name, result.n, result.r_squared, result.adj_r_squared
        );
        results.push(result);
    }
    write_results(cfg, &results)?;
    Ok(results)
}

fn write_results(cfg: &PipelineConfig, results: &[ModelResult]) -> Result<()> {
    let mut table = Table::new(
        [
            "model",
            "dependent",
            "term",
            "estimate",
            "std_error",
            "t_stat",
            "p_value",
            "r_squared",
            "adj_r_squared",
            "n",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    );
    for result in results {
        for coef in &result.coefficients {
            table.push_row(vec![
                result.name.clone(),
                result.dependent.clone(),
                coef.term.clone(),
                format!("{:.6}", coef.estimate),
                format!("{:.6}", coef.std_error),
                format!("{:.4}", coef.t_stat),
                format!("{:.6}", coef.p_value),
                format!("{:.4}", result.r_squared),
                format!("{:.4}", result.adj_r_squared),
                result.n.to_string(),
            ]);
        }
    }
    table.write_csv(&cfg.ols_models_csv())?;
    info!("wrote model table: {}", cfg.ols_models_csv().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_fixtures::FixtureDirs;

    /// Joined-table stand-in with a planted linear relationship:
    /// owner_pct = 40 + 2 * node_density, vac_rate = 20 - aspl_mean / 100.
    fn planted_table(n: usize) -> Table {
        let mut table = Table::new(
            [
                "GEOID_BG",
                "owner_pct",
                "vac_rate",
                "node_density",
                "aspl_mean",
                "betweenness_mean",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        );
        for i in 0..n {
            let density = 5.0 + i as f64 * 0.5;
            let aspl = 400.0 + i as f64 * 25.0;
            let noise = if i % 2 == 0 { 0.05 } else { -0.05 };
            table.push_row(vec![
                format!("17031750{i:04}"),
                format!("{:.4}", 40.0 + 2.0 * density + noise),
                format!("{:.4}", 20.0 - aspl / 100.0 - noise),
                format!("{density:.4}"),
                format!("{aspl:.2}"),
                format!("{:.6}", 0.01 + 0.002 * (i as f64).sin().abs()),
            ]);
        }
        table
    }

    #[test]
    fn recovers_the_planted_slopes() {
        let dirs = FixtureDirs::new();
        planted_table(20)
            .write_csv(&dirs.cfg.bg_joined_csv())
            .unwrap();

        let results = run(&dirs.cfg).unwrap();
        assert_eq!(results.len(), 3);

        let owner = &results[0];
        assert_eq!(owner.name, "owner_density");
        assert!((owner.coefficients[1].estimate - 2.0).abs() < 0.05);
        assert!(owner.r_squared > 0.99);

        let vacancy = &results[1];
        assert!((vacancy.coefficients[1].estimate + 0.01).abs() < 0.001);

        let out = Table::read_csv(&dirs.cfg.ols_models_csv()).unwrap();
        // Three bivariate models, two coefficients each.
        assert_eq!(out.len(), 6);
        assert_eq!(out.get(0, "term"), Some("intercept"));
        assert_eq!(out.get(1, "term"), Some("node_density"));
    }

    #[test]
    fn incomplete_rows_are_dropped_before_fitting() {
        let mut table = planted_table(12);
        table.set(3, "node_density", String::new());
        let spec = ModelSpec::new("owner_density", "owner_pct", &["node_density"]);
        let result = fit_spec(&table, &spec).unwrap();
        assert_eq!(result.n, 11);
    }

    #[test]
    fn unfittable_baseline_is_fatal() {
        let dirs = FixtureDirs::new();
        // Too few rows for any model.
        planted_table(3)
            .write_csv(&dirs.cfg.bg_joined_csv())
            .unwrap();
        assert!(run(&dirs.cfg).is_err());
    }
}
