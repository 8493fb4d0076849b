//! Street-network connectivity pipeline for Chicago Community Area 75
//! (Morgan Park).
//!
//! Seven stages run against a fixed file layout: validate the census inputs,
//! build the drivable OSM graph, compute connectivity metrics, aggregate to
//! census block groups, draw the descriptive maps, fit the baseline OLS
//! models, and sweep the robustness alternatives. Each stage reads what the
//! previous one wrote, so they can be run one at a time or end to end.

pub mod config;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod spatial;
pub mod stats;
pub mod table;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
