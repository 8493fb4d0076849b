// check.rs
// Stage 1: validate the census CSV and the block-group geometry before
// anything downstream runs. Validation only, no side effects.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::config::{PipelineConfig, BG_LAYER, RATE_COLUMNS, REQUIRED_ACS_COLUMNS};
use crate::error::{PipelineError, Result};
use crate::spatial::read::read_block_groups;
use crate::table::{normalize_geoid, Table};

/// What the checker saw; `geometry_features` is `None` when the geometry
/// overlap check had to be skipped.
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub rows: usize,
    pub unique_geoids: usize,
    pub geometry_features: Option<usize>,
    pub geoids_in_common: Option<usize>,
}

/// Run all input checks, failing fast on the first problem.
pub fn run(cfg: &PipelineConfig) -> Result<CheckReport> {
    let acs_path = cfg.acs_csv();
    let table = Table::read_csv(&acs_path)?;

    // 1) Required columns.
    for column in REQUIRED_ACS_COLUMNS {
        if !table.has_column(column) {
            return Err(PipelineError::MissingColumn {
                column: column.to_string(),
                file: acs_path.display().to_string(),
            });
        }
    }

    // 2) GEOID normalization and uniqueness.
    let raw_geoids = table
        .column("GEOID_BG")
        .unwrap_or_default();
    let mut normalized = Vec::with_capacity(raw_geoids.len());
    for raw in &raw_geoids {
        match normalize_geoid(raw) {
            Some(geoid) => normalized.push(geoid),
            None => return Err(PipelineError::BadGeoid(raw.to_string())),
        }
    }
    let unique: BTreeSet<&String> = normalized.iter().collect();
    let duplicates = normalized.len() - unique.len();
    if duplicates > 0 {
        return Err(PipelineError::DuplicateGeoid(duplicates));
    }
    info!("CSV rows: {}; unique GEOIDs: {}", table.len(), unique.len());

    // 3) Rate fields: numeric coercion and range checks. The tolerance
    // admits rounding artifacts just past the endpoints.
    for column in RATE_COLUMNS {
        let values = table.numeric_column(column);
        let non_null = values.iter().flatten().count();
        info!("{column}: non-null {non_null}/{}", table.len());
        for value in values.into_iter().flatten() {
            if !(-0.01..=100.01).contains(&value) {
                return Err(PipelineError::OutOfRange {
                    field: column.to_string(),
                    value,
                });
            }
        }
    }

    // 4) Geometry overlap. An unreadable geometry file downgrades to a
    // warning; readable geometry with zero overlap is fatal.
    let (geometry_features, geoids_in_common) =
        match read_block_groups(&cfg.spatial_gpkg(), &cfg.spatial_geojson(), BG_LAYER) {
            Ok(bgs) => {
                let common = bgs
                    .iter()
                    .filter(|bg| unique.contains(&bg.geoid))
                    .count();
                if common == 0 {
                    return Err(PipelineError::Geometry(
                        "no overlap between CSV GEOIDs and block-group geometry".into(),
                    ));
                }
                info!(
                    "geometry features: {}; GEOIDs in common: {common}",
                    bgs.len()
                );
                (Some(bgs.len()), Some(common))
            }
            Err(err) => {
                warn!("skipping geometry overlap check: {err}");
                (None, None)
            }
        };

    info!("inputs pass checks");
    Ok(CheckReport {
        rows: table.len(),
        unique_geoids: unique.len(),
        geometry_features,
        geoids_in_common,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_fixtures::{write_acs_csv, write_bg_geojson, FixtureDirs};

    #[test]
    fn passes_on_complete_fixture() {
        let dirs = FixtureDirs::new();
        write_acs_csv(&dirs.cfg, &["170317501001", "170317501002"]);
        write_bg_geojson(&dirs.cfg, &["170317501001", "170317501002"]);
        let report = run(&dirs.cfg).unwrap();
        assert_eq!(report.rows, 2);
        assert_eq!(report.geoids_in_common, Some(2));
    }

    #[test]
    fn missing_required_column_fails_with_its_name() {
        let dirs = FixtureDirs::new();
        // Write a census CSV without owner_pct.
        let path = dirs.cfg.acs_csv();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let headers: Vec<&str> = REQUIRED_ACS_COLUMNS
            .iter()
            .copied()
            .filter(|c| *c != "owner_pct")
            .collect();
        std::fs::write(&path, format!("{}\n", headers.join(","))).unwrap();

        let err = run(&dirs.cfg).unwrap_err();
        match err {
            PipelineError::MissingColumn { column, .. } => assert_eq!(column, "owner_pct"),
            other => panic!("expected MissingColumn, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_geoids_fail() {
        let dirs = FixtureDirs::new();
        write_acs_csv(&dirs.cfg, &["170317501001", "170317501001"]);
        let err = run(&dirs.cfg).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateGeoid(1)));
    }

    #[test]
    fn out_of_range_rate_fails() {
        let dirs = FixtureDirs::new();
        write_acs_csv(&dirs.cfg, &["170317501001"]);
        // Patch owner_pct beyond 100.
        let path = dirs.cfg.acs_csv();
        let content = std::fs::read_to_string(&path).unwrap();
        let patched = content.replace(",55.0,", ",155.0,");
        assert_ne!(content, patched, "fixture must contain the marker value");
        std::fs::write(&path, patched).unwrap();

        let err = run(&dirs.cfg).unwrap_err();
        assert!(matches!(err, PipelineError::OutOfRange { .. }));
    }

    #[test]
    fn unreadable_geometry_downgrades_to_warning() {
        let dirs = FixtureDirs::new();
        write_acs_csv(&dirs.cfg, &["170317501001"]);
        // No geometry file at all.
        let report = run(&dirs.cfg).unwrap();
        assert_eq!(report.geometry_features, None);
    }

    #[test]
    fn zero_overlap_with_geometry_fails() {
        let dirs = FixtureDirs::new();
        write_acs_csv(&dirs.cfg, &["170317501001"]);
        write_bg_geojson(&dirs.cfg, &["170319999001"]);
        let err = run(&dirs.cfg).unwrap_err();
        assert!(matches!(err, PipelineError::Geometry(_)));
    }
}
