// graph/mod.rs
// The road graph: intersections and street segments for the study area.

pub mod builder;
pub mod metrics;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use petgraph::unionfind::UnionFind;

use crate::error::Result;
use crate::spatial;

/// OSM node identifier.
pub type OsmId = i64;

/// The drivable street network. Nodes are keyed by OSM id in a `BTreeMap` so
/// every iteration over the graph is deterministic; edges are kept sorted by
/// `(u, v, length)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadGraph {
    pub nodes: BTreeMap<OsmId, RoadNode>,
    pub edges: Vec<RoadEdge>,
    pub metadata: GraphMetadata,
}

/// An intersection (or dead end) in the street network.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RoadNode {
    pub id: OsmId,
    pub lon: f64,
    pub lat: f64,
}

impl RoadNode {
    pub fn point(&self) -> geo_types::Point<f64> {
        geo_types::Point::new(self.lon, self.lat)
    }
}

/// A street segment between two intersections. `geometry` is the full
/// lon/lat polyline including both endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoadEdge {
    pub u: OsmId,
    pub v: OsmId,
    pub length_m: f64,
    pub highway: String,
    pub name: Option<String>,
    pub geometry: Vec<[f64; 2]>,
}

impl RoadEdge {
    pub fn line_string(&self) -> geo_types::LineString<f64> {
        self.geometry
            .iter()
            .map(|c| geo_types::Coord { x: c[0], y: c[1] })
            .collect()
    }
}

/// Metadata about the graph build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub study_area: String,
    pub node_count: usize,
    pub edge_count: usize,
    pub created_at: String,
}

/// Headline numbers for logging and the metrics summary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub total_length_km: f64,
    pub mean_degree: f64,
    /// Network length over straight-line length, summed over all edges.
    pub circuity: f64,
}

impl RoadGraph {
    pub fn new(study_area: &str) -> Self {
        Self {
            nodes: BTreeMap::new(),
            edges: Vec::new(),
            metadata: GraphMetadata {
                study_area: study_area.to_string(),
                node_count: 0,
                edge_count: 0,
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        }
    }

    pub fn add_node(&mut self, node: RoadNode) {
        self.nodes.insert(node.id, node);
    }

    pub fn add_edge(&mut self, edge: RoadEdge) {
        self.edges.push(edge);
    }

    pub fn node(&self, id: OsmId) -> Option<&RoadNode> {
        self.nodes.get(&id)
    }

    /// Undirected degree per node.
    pub fn degrees(&self) -> BTreeMap<OsmId, usize> {
        let mut degrees: BTreeMap<OsmId, usize> =
            self.nodes.keys().map(|&id| (id, 0)).collect();
        for edge in &self.edges {
            if let Some(d) = degrees.get_mut(&edge.u) {
                *d += 1;
            }
            if let Some(d) = degrees.get_mut(&edge.v) {
                *d += 1;
            }
        }
        degrees
    }

    /// Sort edges by `(u, v, length)` and refresh metadata counts. Called
    /// after construction so persisted output is deterministic.
    pub fn finalize(&mut self) {
        self.edges.sort_by(|a, b| {
            (a.u, a.v)
                .cmp(&(b.u, b.v))
                .then(a.length_m.total_cmp(&b.length_m))
        });
        self.metadata.node_count = self.nodes.len();
        self.metadata.edge_count = self.edges.len();
    }

    /// Keep only the largest connected component, the standard prefilter
    /// before connectivity analysis.
    pub fn largest_component(mut self) -> Self {
        if self.nodes.is_empty() {
            return self;
        }
        let ids: Vec<OsmId> = self.nodes.keys().copied().collect();
        let index: BTreeMap<OsmId, usize> =
            ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let mut uf = UnionFind::<usize>::new(ids.len());
        for edge in &self.edges {
            if let (Some(&u), Some(&v)) = (index.get(&edge.u), index.get(&edge.v)) {
                uf.union(u, v);
            }
        }

        let labels = uf.into_labeling();
        let mut sizes: BTreeMap<usize, usize> = BTreeMap::new();
        for &label in &labels {
            *sizes.entry(label).or_insert(0) += 1;
        }
        let Some((&biggest, _)) = sizes.iter().max_by_key(|&(_, count)| *count) else {
            return self;
        };

        self.nodes = self
            .nodes
            .into_iter()
            .filter(|(id, _)| labels[index[id]] == biggest)
            .collect();
        let kept: Vec<OsmId> = self.nodes.keys().copied().collect();
        self.edges
            .retain(|e| kept.binary_search(&e.u).is_ok() && kept.binary_search(&e.v).is_ok());
        self.finalize();
        self
    }

    pub fn stats(&self) -> GraphStats {
        let total_length_m: f64 = self.edges.iter().map(|e| e.length_m).sum();
        let straight_m: f64 = self
            .edges
            .iter()
            .filter_map(|e| {
                let u = self.node(e.u)?;
                let v = self.node(e.v)?;
                Some(spatial::distance_m(u.point(), v.point()))
            })
            .sum();
        let mean_degree = if self.nodes.is_empty() {
            0.0
        } else {
            2.0 * self.edges.len() as f64 / self.nodes.len() as f64
        };
        GraphStats {
            node_count: self.nodes.len(),
            edge_count: self.edges.len(),
            total_length_km: total_length_m / 1000.0,
            mean_degree,
            circuity: if straight_m > 0.0 {
                total_length_m / straight_m
            } else {
                f64::NAN
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(crate::error::PipelineError::MissingInput(
                path.to_path_buf(),
            ));
        }
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
