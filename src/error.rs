//! Error types for the pipeline stages.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in any pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// GeoPackage (SQLite) error
    #[error("GeoPackage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON (graph file, Overpass cache) error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required input file is absent
    #[error("required input not found: {0}")]
    MissingInput(PathBuf),

    /// A required column is absent from a tabular input
    #[error("missing column `{column}` in {file}")]
    MissingColumn { column: String, file: String },

    /// A block-group id did not normalize to 12 digits
    #[error("bad GEOID_BG value: `{0}`")]
    BadGeoid(String),

    /// Duplicate block-group ids in the census table
    #[error("{0} duplicate GEOID_BG values in the census table")]
    DuplicateGeoid(usize),

    /// A rate field holds a value outside 0..100
    #[error("out-of-range value in `{field}`: {value}")]
    OutOfRange { field: String, value: f64 },

    /// Geometry decoding or consistency failure
    #[error("geometry error: {0}")]
    Geometry(String),

    /// Overpass API request failed
    #[error("Overpass request failed: {0}")]
    Overpass(String),

    /// The drivable graph came back empty
    #[error("street network is empty after drivable filtering and truncation")]
    EmptyNetwork,

    /// Design matrix has linearly dependent columns
    #[error("model `{model}`: design matrix is rank deficient (rank {rank} of {cols} columns)")]
    RankDeficient {
        model: String,
        rank: usize,
        cols: usize,
    },

    /// Not enough complete observations to fit a model
    #[error("model `{model}`: only {rows} complete rows for {cols} terms")]
    TooFewRows {
        model: String,
        rows: usize,
        cols: usize,
    },

    /// Figure rendering failed
    #[error("figure rendering failed: {0}")]
    Render(String),
}

/// Result alias used across the pipeline.
pub type Result<T> = std::result::Result<T, PipelineError>;
