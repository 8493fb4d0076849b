// metrics.rs
// Stage 3: connectivity metrics on the saved graph. Reads the graph JSON,
// computes per-node and per-edge metrics, and rewrites the node and edge
// tables with the metric columns attached.

use tracing::info;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::graph::metrics::{compute, GraphMetrics};
use crate::graph::{GraphStats, RoadGraph};
use crate::table::Table;

/// Run the metrics stage, returning the graph-level summary.
pub fn run(cfg: &PipelineConfig) -> Result<GraphStats> {
    let graph = RoadGraph::load_from_file(&cfg.graph_json())?;
    info!(
        "loaded graph: {} nodes, {} edges",
        graph.nodes.len(),
        graph.edges.len()
    );

    let metrics = compute(&graph);
    write_node_metrics(cfg, &graph, &metrics)?;
    write_edge_metrics(cfg, &graph, &metrics)?;

    let s = metrics.summary;
    info!(
        "summary: mean degree {:.3}, total length {:.1} km, circuity {:.3}",
        s.mean_degree, s.total_length_km, s.circuity
    );
    Ok(s)
}

fn write_node_metrics(
    cfg: &PipelineConfig,
    graph: &RoadGraph,
    metrics: &GraphMetrics,
) -> Result<()> {
    let mut table = Table::new(vec![
        "osmid".into(),
        "x".into(),
        "y".into(),
        "degree".into(),
        "betweenness".into(),
        "aspl_m".into(),
    ]);
    for nm in &metrics.nodes {
        let node = graph.node(nm.id).ok_or_else(|| {
            PipelineError::Geometry(format!("metric refers to unknown node {}", nm.id))
        })?;
        table.push_row(vec![
            nm.id.to_string(),
            format!("{:.7}", node.lon),
            format!("{:.7}", node.lat),
            nm.degree.to_string(),
            format!("{:.8}", nm.betweenness),
            nm.aspl_m.map(|v| format!("{v:.2}")).unwrap_or_default(),
        ]);
    }
    table.write_csv(&cfg.nodes_csv())?;
    info!("wrote node metrics: {}", cfg.nodes_csv().display());
    Ok(())
}

fn write_edge_metrics(
    cfg: &PipelineConfig,
    graph: &RoadGraph,
    metrics: &GraphMetrics,
) -> Result<()> {
    let mut table = Table::new(vec![
        "u".into(),
        "v".into(),
        "length_m".into(),
        "straight_m".into(),
        "circuity".into(),
        "highway".into(),
        "name".into(),
    ]);
    // compute() walks graph.edges in order, so the two sequences line up.
    for (em, edge) in metrics.edges.iter().zip(&graph.edges) {
        table.push_row(vec![
            em.u.to_string(),
            em.v.to_string(),
            format!("{:.2}", em.length_m),
            format!("{:.2}", em.straight_m),
            em.circuity.map(|c| format!("{c:.4}")).unwrap_or_default(),
            edge.highway.clone(),
            edge.name.clone().unwrap_or_default(),
        ]);
    }
    table.write_csv(&cfg.edges_csv())?;
    info!("wrote edge metrics: {}", cfg.edges_csv().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_fixtures::{ring_graph, FixtureDirs};

    #[test]
    fn missing_graph_is_a_missing_input() {
        let dirs = FixtureDirs::new();
        let err = run(&dirs.cfg).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput(_)));
    }

    #[test]
    fn writes_metric_tables_for_the_ring() {
        let dirs = FixtureDirs::new();
        let graph = ring_graph();
        graph.save_to_file(&dirs.cfg.graph_json()).unwrap();

        let stats = run(&dirs.cfg).unwrap();
        assert_eq!(stats.node_count, 4);
        assert_eq!(stats.edge_count, 4);
        // Every ring node has degree 2.
        assert!((stats.mean_degree - 2.0).abs() < 1e-12);

        let nodes = Table::read_csv(&dirs.cfg.nodes_csv()).unwrap();
        assert_eq!(nodes.len(), 4);
        assert_eq!(nodes.get(0, "degree"), Some("2"));
        assert!(nodes.has_column("betweenness"));
        assert!(nodes.has_column("aspl_m"));

        let edges = Table::read_csv(&dirs.cfg.edges_csv()).unwrap();
        assert_eq!(edges.len(), 4);
        assert!(edges.has_column("circuity"));
        assert_eq!(edges.get(0, "highway"), Some("residential"));
    }

    #[test]
    fn rerun_produces_identical_tables() {
        let dirs = FixtureDirs::new();
        ring_graph().save_to_file(&dirs.cfg.graph_json()).unwrap();

        run(&dirs.cfg).unwrap();
        let first = std::fs::read(dirs.cfg.nodes_csv()).unwrap();
        run(&dirs.cfg).unwrap();
        let second = std::fs::read(dirs.cfg.nodes_csv()).unwrap();
        assert_eq!(first, second);
    }
}
