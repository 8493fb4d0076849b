// graph/metrics.rs
// Connectivity metrics on the road graph. Definitions are fixed so re-runs
// on the same graph file produce identical values:
//   degree      — undirected node degree
//   betweenness — Brandes betweenness centrality, edge-length weighted,
//                 normalized by (n-1)(n-2)
//   aspl        — per node, mean Dijkstra shortest-path length (meters) to
//                 every other reachable node, self excluded
//   circuity    — per edge, segment length over great-circle endpoint
//                 distance; graph level, total length over total straight
//                 line

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

use crate::graph::{GraphStats, OsmId, RoadGraph};
use crate::spatial;

/// Metrics for one intersection.
#[derive(Debug, Clone, Copy)]
pub struct NodeMetrics {
    pub id: OsmId,
    pub degree: usize,
    pub betweenness: f64,
    /// Mean shortest-path length in meters; `None` for an isolated node.
    pub aspl_m: Option<f64>,
}

/// Metrics for one street segment.
#[derive(Debug, Clone)]
pub struct EdgeMetrics {
    pub u: OsmId,
    pub v: OsmId,
    pub length_m: f64,
    pub straight_m: f64,
    /// `None` when the endpoints coincide.
    pub circuity: Option<f64>,
}

/// Full metric table plus the graph-level summary.
#[derive(Debug, Clone)]
pub struct GraphMetrics {
    pub nodes: Vec<NodeMetrics>,
    pub edges: Vec<EdgeMetrics>,
    pub summary: GraphStats,
}

/// Compute all connectivity metrics in one in-memory pass.
pub fn compute(graph: &RoadGraph) -> GraphMetrics {
    let (pg, ids) = to_petgraph(graph);
    let betweenness = brandes_betweenness(&pg);
    let degrees = graph.degrees();

    let mut nodes = Vec::with_capacity(ids.len());
    for (i, &id) in ids.iter().enumerate() {
        let aspl_m = mean_shortest_path_m(&pg, NodeIndex::new(i));
        nodes.push(NodeMetrics {
            id,
            degree: degrees.get(&id).copied().unwrap_or(0),
            betweenness: betweenness[i],
            aspl_m,
        });
    }

    let edges = graph
        .edges
        .iter()
        .map(|e| {
            let straight_m = match (graph.node(e.u), graph.node(e.v)) {
                (Some(u), Some(v)) => spatial::distance_m(u.point(), v.point()),
                _ => 0.0,
            };
            EdgeMetrics {
                u: e.u,
                v: e.v,
                length_m: e.length_m,
                straight_m,
                circuity: (straight_m > 0.0).then(|| e.length_m / straight_m),
            }
        })
        .collect();

    GraphMetrics {
        nodes,
        edges,
        summary: graph.stats(),
    }
}

/// Build the petgraph view with length weights. Node indices follow the
/// BTreeMap key order, so everything downstream is deterministic.
fn to_petgraph(graph: &RoadGraph) -> (UnGraph<OsmId, f64>, Vec<OsmId>) {
    let mut pg = UnGraph::<OsmId, f64>::default();
    let mut index: BTreeMap<OsmId, NodeIndex> = BTreeMap::new();
    let mut ids = Vec::with_capacity(graph.nodes.len());
    for &id in graph.nodes.keys() {
        index.insert(id, pg.add_node(id));
        ids.push(id);
    }
    for edge in &graph.edges {
        if let (Some(&u), Some(&v)) = (index.get(&edge.u), index.get(&edge.v)) {
            pg.add_edge(u, v, edge.length_m);
        }
    }
    (pg, ids)
}

/// Mean weighted shortest-path length from `source` to all reachable nodes.
fn mean_shortest_path_m(pg: &UnGraph<OsmId, f64>, source: NodeIndex) -> Option<f64> {
    let dist = petgraph::algo::dijkstra(pg, source, None, |e| *e.weight());
    if dist.len() <= 1 {
        return None;
    }
    // Sum in index order: HashMap iteration order must not leak into output.
    let mut total = 0.0;
    for i in 0..pg.node_count() {
        let idx = NodeIndex::new(i);
        if idx == source {
            continue;
        }
        if let Some(d) = dist.get(&idx) {
            total += d;
        }
    }
    Some(total / (dist.len() - 1) as f64)
}

/// Min-heap entry for the Dijkstra phase of Brandes' algorithm.
struct HeapEntry {
    dist: f64,
    node: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.node == other.node
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap pops the smallest distance first.
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Brandes betweenness centrality with Dijkstra shortest paths, normalized
/// by (n-1)(n-2) as networkx does for undirected graphs.
fn brandes_betweenness(pg: &UnGraph<OsmId, f64>) -> Vec<f64> {
    let n = pg.node_count();
    let mut centrality = vec![0.0f64; n];
    if n < 3 {
        return centrality;
    }

    for s in 0..n {
        let mut dist = vec![f64::INFINITY; n];
        let mut sigma = vec![0.0f64; n];
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut settled_order: Vec<usize> = Vec::with_capacity(n);
        let mut settled = vec![false; n];

        dist[s] = 0.0;
        sigma[s] = 1.0;
        let mut heap = BinaryHeap::new();
        heap.push(HeapEntry { dist: 0.0, node: s });

        while let Some(HeapEntry { dist: d, node: v }) = heap.pop() {
            if settled[v] {
                continue;
            }
            settled[v] = true;
            settled_order.push(v);

            for edge in pg.edges(NodeIndex::new(v)) {
                let w = edge.target().index();
                let w = if w == v { edge.source().index() } else { w };
                if settled[w] {
                    continue;
                }
                let nd = d + *edge.weight();
                if nd < dist[w] - 1e-9 {
                    dist[w] = nd;
                    sigma[w] = sigma[v];
                    preds[w].clear();
                    preds[w].push(v);
                    heap.push(HeapEntry { dist: nd, node: w });
                } else if (nd - dist[w]).abs() <= 1e-9 {
                    sigma[w] += sigma[v];
                    preds[w].push(v);
                }
            }
        }

        // Dependency accumulation, farthest nodes first.
        let mut delta = vec![0.0f64; n];
        for &w in settled_order.iter().rev() {
            for &v in &preds[w] {
                delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
            }
            if w != s {
                centrality[w] += delta[w];
            }
        }
    }

    let scale = 1.0 / ((n - 1) as f64 * (n - 2) as f64);
    for c in &mut centrality {
        *c *= scale;
    }
    centrality
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{RoadEdge, RoadNode};
    use approx::assert_relative_eq;

    fn path_graph(lengths: &[f64]) -> RoadGraph {
        let mut g = RoadGraph::new("test");
        for i in 0..=lengths.len() {
            g.add_node(RoadNode {
                id: i as OsmId,
                lon: 0.001 * i as f64,
                lat: 41.68,
            });
        }
        for (i, &len) in lengths.iter().enumerate() {
            g.add_edge(RoadEdge {
                u: i as OsmId,
                v: (i + 1) as OsmId,
                length_m: len,
                highway: "residential".into(),
                name: None,
                geometry: vec![],
            });
        }
        g.finalize();
        g
    }

    /// On a 3-node path the middle node lies on the single s-t shortest
    /// path: raw betweenness 2, normalized by (n-1)(n-2) = 2 giving 1.0.
    #[test]
    fn betweenness_of_path_center() {
        let g = path_graph(&[100.0, 100.0]);
        let m = compute(&g);
        let center = m.nodes.iter().find(|n| n.id == 1).unwrap();
        assert_relative_eq!(center.betweenness, 1.0, epsilon = 1e-12);
        let end = m.nodes.iter().find(|n| n.id == 0).unwrap();
        assert_relative_eq!(end.betweenness, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn aspl_on_weighted_path() {
        let g = path_graph(&[100.0, 300.0]);
        let m = compute(&g);
        // From node 0: 100 and 400 -> 250. From node 1: 100 and 300 -> 200.
        let n0 = m.nodes.iter().find(|n| n.id == 0).unwrap();
        assert_relative_eq!(n0.aspl_m.unwrap(), 250.0, epsilon = 1e-9);
        let n1 = m.nodes.iter().find(|n| n.id == 1).unwrap();
        assert_relative_eq!(n1.aspl_m.unwrap(), 200.0, epsilon = 1e-9);
    }

    #[test]
    fn betweenness_splits_over_equal_paths() {
        // A square: two equal-length routes between opposite corners, so
        // each intermediate corner carries half a dependency per pair.
        let mut g = RoadGraph::new("test");
        for i in 0..4 {
            g.add_node(RoadNode {
                id: i,
                lon: 0.001 * (i % 2) as f64,
                lat: 41.0 + 0.001 * (i / 2) as f64,
            });
        }
        for (u, v) in [(0, 1), (1, 3), (3, 2), (2, 0)] {
            g.add_edge(RoadEdge {
                u,
                v,
                length_m: 100.0,
                highway: "residential".into(),
                name: None,
                geometry: vec![],
            });
        }
        g.finalize();
        let m = compute(&g);
        // Each node sits on half of the one shortest-path pair that passes
        // through it: raw 2 * 0.5 = 1 over scale (n-1)(n-2) = 6.
        for node in &m.nodes {
            assert_relative_eq!(node.betweenness, 1.0 / 6.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn circuity_is_length_over_straight_line() {
        let mut g = path_graph(&[100.0]);
        // Straight-line distance between the two nodes is ~83 m
        // (0.001 degrees of longitude at 41.68 N), so stretch the edge.
        g.edges[0].length_m = 166.0;
        let m = compute(&g);
        let edge = &m.edges[0];
        assert!(edge.circuity.unwrap() > 1.5);
        assert_relative_eq!(
            edge.circuity.unwrap(),
            edge.length_m / edge.straight_m,
            epsilon = 1e-12
        );
    }

    #[test]
    fn recomputation_is_identical() {
        let g = path_graph(&[120.0, 80.0, 240.0, 60.0]);
        let a = compute(&g);
        let b = compute(&g);
        for (x, y) in a.nodes.iter().zip(b.nodes.iter()) {
            assert_eq!(x.betweenness.to_bits(), y.betweenness.to_bits());
            assert_eq!(
                x.aspl_m.map(f64::to_bits),
                y.aspl_m.map(f64::to_bits)
            );
        }
    }
}
