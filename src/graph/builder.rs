// graph/builder.rs
// Turn a raw Overpass response into the drivable RoadGraph.

use std::collections::{BTreeMap, HashMap};

use geo_types::{MultiPolygon, Point, Rect};
use serde::Deserialize;
use tracing::debug;

use crate::config::DRIVABLE_HIGHWAYS;
use crate::error::{PipelineError, Result};
use crate::graph::{OsmId, RoadEdge, RoadGraph, RoadNode};
use crate::spatial;

/// Top-level Overpass JSON payload.
#[derive(Debug, Clone, Deserialize)]
pub struct OverpassResponse {
    pub elements: Vec<Element>,
}

/// One Overpass element. Relations and anything else fall into `Other`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    Node {
        id: i64,
        lat: f64,
        lon: f64,
    },
    Way {
        id: i64,
        nodes: Vec<i64>,
        #[serde(default)]
        tags: HashMap<String, String>,
    },
    #[serde(other)]
    Other,
}

/// Spatial extent the graph is truncated to. The normal path uses the
/// dissolved community-area polygon; the expanded-bbox retry uses a plain
/// rectangle.
#[derive(Debug, Clone)]
pub enum Extent<'a> {
    Polygon(&'a MultiPolygon<f64>),
    Rect(Rect<f64>),
}

impl Extent<'_> {
    fn contains(&self, point: Point<f64>) -> bool {
        match self {
            Extent::Polygon(poly) => {
                use geo::Contains;
                poly.contains(&point)
            }
            Extent::Rect(rect) => {
                let (x, y) = (point.x(), point.y());
                x >= rect.min().x && x <= rect.max().x && y >= rect.min().y && y <= rect.max().y
            }
        }
    }
}

/// Build the drivable street graph: keep allowlisted highway classes, merge
/// degree-2 way nodes into edge geometry so graph nodes are true
/// intersections and dead ends, truncate to the extent, and keep the largest
/// connected component.
pub fn build_graph(
    response: &OverpassResponse,
    extent: &Extent<'_>,
    study_area: &str,
) -> Result<RoadGraph> {
    let mut coords: BTreeMap<OsmId, (f64, f64)> = BTreeMap::new();
    for element in &response.elements {
        if let Element::Node { id, lat, lon } = element {
            coords.insert(*id, (*lon, *lat));
        }
    }

    let drivable: Vec<(&Vec<i64>, &HashMap<String, String>)> = response
        .elements
        .iter()
        .filter_map(|e| match e {
            Element::Way { nodes, tags, .. } if is_drivable(tags) => Some((nodes, tags)),
            _ => None,
        })
        .collect();
    debug!("{} drivable ways of {} elements", drivable.len(), response.elements.len());

    // A way node becomes a graph node when it ends a way or is shared by more
    // than one way segment; everything in between is edge geometry.
    let mut usage: BTreeMap<OsmId, usize> = BTreeMap::new();
    for (nodes, _) in &drivable {
        for (i, id) in nodes.iter().enumerate() {
            let weight = if i == 0 || i == nodes.len() - 1 { 2 } else { 1 };
            *usage.entry(*id).or_insert(0) += weight;
        }
    }

    let mut graph = RoadGraph::new(study_area);
    for (nodes, tags) in &drivable {
        let highway = tags.get("highway").cloned().unwrap_or_default();
        let name = tags.get("name").cloned();

        let mut polyline: Vec<[f64; 2]> = Vec::new();
        let mut start: Option<OsmId> = None;
        for id in nodes.iter() {
            let Some(&(lon, lat)) = coords.get(id) else {
                // Way references a node outside the downloaded bbox; break
                // the edge here.
                polyline.clear();
                start = None;
                continue;
            };
            polyline.push([lon, lat]);
            if start.is_none() {
                start = Some(*id);
                continue;
            }
            if usage.get(id).copied().unwrap_or(0) >= 2 {
                let u = start.take().unwrap_or(*id);
                if u != *id {
                    let length_m = spatial::polyline_length_m(&polyline);
                    graph.add_edge(RoadEdge {
                        u,
                        v: *id,
                        length_m,
                        highway: highway.clone(),
                        name: name.clone(),
                        geometry: std::mem::take(&mut polyline),
                    });
                }
                // Closed loops without an intersection (u == v) carry no
                // connectivity and are dropped.
                polyline = vec![[lon, lat]];
                start = Some(*id);
            }
        }
    }

    // Register endpoints as graph nodes.
    let endpoint_ids: Vec<(OsmId, OsmId)> = graph.edges.iter().map(|e| (e.u, e.v)).collect();
    for (u, v) in endpoint_ids {
        for id in [u, v] {
            if let Some(&(lon, lat)) = coords.get(&id) {
                graph.add_node(RoadNode { id, lon, lat });
            }
        }
    }

    // Truncate to the extent, then keep the biggest component.
    let outside: Vec<OsmId> = graph
        .nodes
        .values()
        .filter(|n| !extent.contains(n.point()))
        .map(|n| n.id)
        .collect();
    for id in &outside {
        graph.nodes.remove(id);
    }
    graph
        .edges
        .retain(|e| graph.nodes.contains_key(&e.u) && graph.nodes.contains_key(&e.v));

    graph.finalize();
    let graph = graph.largest_component();
    if graph.nodes.is_empty() {
        return Err(PipelineError::EmptyNetwork);
    }
    Ok(graph)
}

fn is_drivable(tags: &HashMap<String, String>) -> bool {
    if tags.get("area").map(String::as_str) == Some("yes") {
        return false;
    }
    tags.get("highway")
        .map(|h| DRIVABLE_HIGHWAYS.contains(&h.as_str()))
        .unwrap_or(false)
}
