// test_fixtures.rs
// Shared fixtures for the stage tests: temp-dir configs, a small census CSV,
// block-group squares near Morgan Park, and a four-node ring graph that sits
// inside the first square.

use tempfile::TempDir;

use crate::config::{PipelineConfig, REQUIRED_ACS_COLUMNS};
use crate::graph::{RoadEdge, RoadGraph, RoadNode};
use crate::spatial::polyline_length_m;

pub struct FixtureDirs {
    _tmp: TempDir,
    pub cfg: PipelineConfig,
}

impl FixtureDirs {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let cfg = PipelineConfig::new(tmp.path().join("data"), tmp.path().join("outputs"));
        Self { _tmp: tmp, cfg }
    }
}

/// Write a census CSV with every required column and one row per geoid.
/// Values are plausible but fixed; `owner_pct` is always `55.0` so tests can
/// patch it to probe the range checks.
pub fn write_acs_csv(cfg: &PipelineConfig, geoids: &[&str]) {
    let path = cfg.acs_csv();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut out = format!("{}\n", REQUIRED_ACS_COLUMNS.join(","));
    for (i, geoid) in geoids.iter().enumerate() {
        let pop = 1200 + 50 * i;
        out.push_str(&format!(
            "{geoid},{pop},300,700,50,280,120,1190,90,450,30,450,40,10,\
             58.3,55.0,4.2,7.6,6.7,11.1\n"
        ));
    }
    std::fs::write(&path, out).unwrap();
}

/// Corner of the i-th fixture square (0.01 degrees on a side, stepping east).
pub fn square_origin(i: usize) -> (f64, f64) {
    (-87.68 + 0.02 * i as f64, 41.68)
}

/// Write a GeoJSON FeatureCollection of disjoint squares, one per geoid.
pub fn write_bg_geojson(cfg: &PipelineConfig, geoids: &[&str]) {
    let path = cfg.spatial_geojson();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let features: Vec<String> = geoids
        .iter()
        .enumerate()
        .map(|(i, geoid)| {
            let (x, y) = square_origin(i);
            let (x2, y2) = (x + 0.01, y + 0.01);
            format!(
                r#"{{"type":"Feature","properties":{{"GEOID_BG":"{geoid}"}},"geometry":{{"type":"Polygon","coordinates":[[[{x},{y}],[{x2},{y}],[{x2},{y2}],[{x},{y2}],[{x},{y}]]]}}}}"#
            )
        })
        .collect();
    let fc = format!(
        r#"{{"type":"FeatureCollection","features":[{}]}}"#,
        features.join(",")
    );
    std::fs::write(&path, fc).unwrap();
}

/// A four-node ring inside the first fixture square. Every node has degree
/// two, so graph-level summaries are easy to predict by hand.
pub fn ring_graph() -> RoadGraph {
    let coords = [
        (1_i64, -87.678, 41.682),
        (2, -87.672, 41.682),
        (3, -87.672, 41.688),
        (4, -87.678, 41.688),
    ];
    let mut graph = RoadGraph::new("fixture ring");
    for (id, lon, lat) in coords {
        graph.add_node(RoadNode { id, lon, lat });
    }
    let pairs = [(1_i64, 2_i64), (2, 3), (3, 4), (4, 1)];
    for (u, v) in pairs {
        let a = coords.iter().find(|c| c.0 == u).unwrap();
        let b = coords.iter().find(|c| c.0 == v).unwrap();
        let geometry = vec![[a.1, a.2], [b.1, b.2]];
        let length_m = polyline_length_m(&geometry);
        graph.add_edge(RoadEdge {
            u,
            v,
            length_m,
            highway: "residential".into(),
            name: Some(format!("Ring {u}-{v}")),
            geometry,
        });
    }
    graph.finalize();
    graph
}
