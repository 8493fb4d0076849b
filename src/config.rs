//! Fixed paths and study-area constants for the pipeline.
//!
//! Every stage reads and writes the same well-known locations under a data
//! directory and an outputs directory. Tests point both at temp dirs; the CLI
//! defaults to `data/` and `outputs/` in the working directory.

use std::path::PathBuf;

/// Layer name of the block-group features inside the GeoPackage.
pub const BG_LAYER: &str = "ca75_bg_acs";

/// Human-readable study area tag stamped into graph metadata.
pub const STUDY_AREA: &str = "Chicago CA 75 (Morgan Park)";

/// Public Overpass API endpoint.
pub const OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";

/// ACS columns the census CSV must carry before anything else runs.
pub const REQUIRED_ACS_COLUMNS: &[&str] = &[
    "GEOID_BG",
    "pop",
    "white",
    "black",
    "asian",
    "owner",
    "renter",
    "hisp_tot",
    "hisp",
    "units",
    "vac_units",
    "units_denom",
    "u_20_49",
    "u_50p",
    "black_pct",
    "owner_pct",
    "asian_pct",
    "hisp_pct",
    "vac_rate",
    "u_20plus_pct",
];

/// Percentage fields checked for the 0..100 range.
pub const RATE_COLUMNS: &[&str] = &[
    "black_pct",
    "owner_pct",
    "asian_pct",
    "hisp_pct",
    "vac_rate",
    "u_20plus_pct",
];

/// Highway classes that count as drivable. This is the OSMnx `drive` filter
/// restated as an allowlist.
pub const DRIVABLE_HIGHWAYS: &[&str] = &[
    "motorway",
    "motorway_link",
    "trunk",
    "trunk_link",
    "primary",
    "primary_link",
    "secondary",
    "secondary_link",
    "tertiary",
    "tertiary_link",
    "unclassified",
    "residential",
    "living_street",
];

/// Root paths shared by every stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub out_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            out_dir: PathBuf::from("outputs"),
        }
    }
}

impl PipelineConfig {
    pub fn new(data_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            out_dir: out_dir.into(),
        }
    }

    // ---- inputs ----

    pub fn acs_csv(&self) -> PathBuf {
        self.data_dir.join("census").join("ca75_acs_blockgroups.csv")
    }

    pub fn spatial_gpkg(&self) -> PathBuf {
        self.data_dir.join("spatial").join("ca75_blockgroups.gpkg")
    }

    /// Fallback geometry file, same stem as the GeoPackage.
    pub fn spatial_geojson(&self) -> PathBuf {
        self.data_dir
            .join("spatial")
            .join("ca75_blockgroups.geojson")
    }

    /// Overpass snapshot cache. Re-runs against the same cache file are the
    /// "same upstream map data snapshot" that makes the network stage
    /// deterministic.
    pub fn overpass_cache(&self) -> PathBuf {
        self.data_dir.join("cache").join("overpass_ca75.json")
    }

    // ---- outputs ----

    pub fn graph_json(&self) -> PathBuf {
        self.out_dir.join("ca75_graph.json")
    }

    pub fn tables_dir(&self) -> PathBuf {
        self.out_dir.join("tables")
    }

    pub fn figures_dir(&self) -> PathBuf {
        self.out_dir.join("figures")
    }

    pub fn nodes_csv(&self) -> PathBuf {
        self.tables_dir().join("nodes.csv")
    }

    pub fn edges_csv(&self) -> PathBuf {
        self.tables_dir().join("edges.csv")
    }

    pub fn bg_metrics_csv(&self) -> PathBuf {
        self.tables_dir().join("bg_metrics.csv")
    }

    pub fn bg_joined_csv(&self) -> PathBuf {
        self.tables_dir().join("bg_joined.csv")
    }

    pub fn correlations_csv(&self) -> PathBuf {
        self.tables_dir().join("correlations.csv")
    }

    pub fn ols_models_csv(&self) -> PathBuf {
        self.tables_dir().join("ols_models.csv")
    }

    pub fn robustness_csv(&self) -> PathBuf {
        self.tables_dir().join("robustness.csv")
    }

    pub fn overview_png(&self) -> PathBuf {
        self.figures_dir().join("ca75_graph_overview.png")
    }

    pub fn network_figures_dir(&self) -> PathBuf {
        self.figures_dir().join("networkmetrics")
    }

    pub fn outcome_figures_dir(&self) -> PathBuf {
        self.figures_dir().join("acsoutcomes")
    }

    pub fn scatter_figures_dir(&self) -> PathBuf {
        self.figures_dir().join("bivariatescatter")
    }

    /// Create the output directory tree (tables + figure subfolders).
    pub fn ensure_output_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.out_dir.clone(),
            self.tables_dir(),
            self.figures_dir(),
            self.network_figures_dir(),
            self.outcome_figures_dir(),
            self.scatter_figures_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Create the cache directory so the Overpass snapshot can be written.
    pub fn ensure_cache_dir(&self) -> std::io::Result<()> {
        if let Some(parent) = self.overpass_cache().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}
