// network.rs
// Stage 2: build the drivable street graph for the study area.
//
// The block-group polygons are dissolved into one community-area boundary,
// OSM ways are fetched for its bounding box from Overpass (or replayed from
// the snapshot cache), and the resulting graph is persisted as JSON plus
// node/edge CSV tables and an overview figure.

use std::time::Duration;

use geo_types::Rect;
use tracing::{info, warn};

use crate::config::{PipelineConfig, BG_LAYER, DRIVABLE_HIGHWAYS, OVERPASS_URL, STUDY_AREA};
use crate::error::{PipelineError, Result};
use crate::graph::builder::{build_graph, Extent, OverpassResponse};
use crate::graph::RoadGraph;
use crate::pipeline::maps::render_overview;
use crate::spatial::{bounding_rect, dissolve, expand_rect};
use crate::spatial::read::read_block_groups;
use crate::table::Table;

/// Knobs for the fetch; defaults match the fixed pipeline invocation.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub overpass_url: String,
    pub timeout_secs: u64,
    pub use_cache: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            overpass_url: OVERPASS_URL.to_string(),
            timeout_secs: 180,
            use_cache: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkReport {
    pub node_count: usize,
    pub edge_count: usize,
    pub from_cache: bool,
}

/// Run the network stage.
pub fn run(cfg: &PipelineConfig, net: &NetworkConfig) -> Result<NetworkReport> {
    cfg.ensure_output_dirs()?;

    let bgs = read_block_groups(&cfg.spatial_gpkg(), &cfg.spatial_geojson(), BG_LAYER)?;
    let boundary = dissolve(&bgs)?;
    let bbox = bounding_rect(&boundary)?;

    let (response, from_cache) = fetch_snapshot(cfg, net, bbox)?;

    let graph = match build_graph(&response, &Extent::Polygon(&boundary), STUDY_AREA) {
        Ok(graph) => graph,
        Err(PipelineError::EmptyNetwork) => {
            // Rare: boundary clipped everything away. Expand the bbox a
            // little, refetch, and truncate to the expanded rectangle.
            warn!("graph came back empty; expanding bounding box and retrying");
            let expanded = expand_rect(bbox, 150.0);
            let retry = fetch_overpass(&net.overpass_url, expanded, net.timeout_secs)?;
            build_graph(&retry, &Extent::Rect(expanded), STUDY_AREA)?
        }
        Err(err) => return Err(err),
    };

    graph.save_to_file(&cfg.graph_json())?;
    let stats = graph.stats();
    info!(
        "saved graph: {} (nodes={}, edges={}, {:.1} km)",
        cfg.graph_json().display(),
        stats.node_count,
        stats.edge_count,
        stats.total_length_km
    );

    write_node_table(cfg, &graph)?;
    write_edge_table(cfg, &graph)?;

    if let Err(err) = render_overview(&graph, &boundary, &cfg.overview_png()) {
        // The overview is a convenience; losing it should not sink the run.
        warn!("could not render overview figure: {err}");
    } else {
        info!("saved overview map: {}", cfg.overview_png().display());
    }

    Ok(NetworkReport {
        node_count: stats.node_count,
        edge_count: stats.edge_count,
        from_cache,
    })
}

/// Load the Overpass snapshot from cache or fetch and cache it.
fn fetch_snapshot(
    cfg: &PipelineConfig,
    net: &NetworkConfig,
    bbox: Rect<f64>,
) -> Result<(OverpassResponse, bool)> {
    let cache_path = cfg.overpass_cache();
    if net.use_cache && cache_path.is_file() {
        info!("using cached Overpass snapshot: {}", cache_path.display());
        let raw = std::fs::read_to_string(&cache_path)?;
        let response: OverpassResponse = serde_json::from_str(&raw)?;
        return Ok((response, true));
    }

    info!("downloading drivable network from Overpass");
    let body = fetch_overpass_raw(&net.overpass_url, bbox, net.timeout_secs)?;
    if net.use_cache {
        cfg.ensure_cache_dir()?;
        std::fs::write(&cache_path, &body)?;
        info!("cached Overpass snapshot: {}", cache_path.display());
    }
    let response: OverpassResponse = serde_json::from_str(&body)?;
    Ok((response, false))
}

fn fetch_overpass(url: &str, bbox: Rect<f64>, timeout_secs: u64) -> Result<OverpassResponse> {
    let body = fetch_overpass_raw(url, bbox, timeout_secs)?;
    Ok(serde_json::from_str(&body)?)
}

fn fetch_overpass_raw(url: &str, bbox: Rect<f64>, timeout_secs: u64) -> Result<String> {
    let query = overpass_query(bbox, timeout_secs);
    let response = ureq::post(url)
        .timeout(Duration::from_secs(timeout_secs))
        .send_string(&query)
        .map_err(|e| PipelineError::Overpass(e.to_string()))?;
    response
        .into_string()
        .map_err(|e| PipelineError::Overpass(e.to_string()))
}

/// Overpass QL for drivable ways in a (south, west, north, east) bbox.
fn overpass_query(bbox: Rect<f64>, timeout_secs: u64) -> String {
    let classes = DRIVABLE_HIGHWAYS.join("|");
    format!(
        "[out:json][timeout:{timeout_secs}];\
         (way[\"highway\"~\"^({classes})$\"]({s:.7},{w:.7},{n:.7},{e:.7});>;);\
         out body;",
        s = bbox.min().y,
        w = bbox.min().x,
        n = bbox.max().y,
        e = bbox.max().x,
    )
}

fn write_node_table(cfg: &PipelineConfig, graph: &RoadGraph) -> Result<()> {
    let mut table = Table::new(vec!["osmid".into(), "x".into(), "y".into()]);
    for node in graph.nodes.values() {
        table.push_row(vec![
            node.id.to_string(),
            format!("{:.7}", node.lon),
            format!("{:.7}", node.lat),
        ]);
    }
    table.write_csv(&cfg.nodes_csv())?;
    info!("wrote node table: {}", cfg.nodes_csv().display());
    Ok(())
}

fn write_edge_table(cfg: &PipelineConfig, graph: &RoadGraph) -> Result<()> {
    let mut table = Table::new(vec![
        "u".into(),
        "v".into(),
        "length".into(),
        "highway".into(),
        "name".into(),
    ]);
    for edge in &graph.edges {
        table.push_row(vec![
            edge.u.to_string(),
            edge.v.to_string(),
            format!("{:.2}", edge.length_m),
            edge.highway.clone(),
            edge.name.clone().unwrap_or_default(),
        ]);
    }
    table.write_csv(&cfg.edges_csv())?;
    info!("wrote edge table: {}", cfg.edges_csv().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::Coord;

    #[test]
    fn query_uses_south_west_north_east_order() {
        let bbox = Rect::new(
            Coord { x: -87.70, y: 41.67 },
            Coord { x: -87.63, y: 41.71 },
        );
        let q = overpass_query(bbox, 180);
        assert!(q.contains("(41.6700000,-87.7000000,41.7100000,-87.6300000)"));
        assert!(q.contains("[out:json][timeout:180]"));
        assert!(q.contains("residential"));
        assert!(!q.contains("footway"));
    }

    #[test]
    fn cached_snapshot_short_circuits_the_fetch() {
        use crate::pipeline::test_fixtures::FixtureDirs;
        let dirs = FixtureDirs::new();
        dirs.cfg.ensure_cache_dir().unwrap();
        std::fs::write(
            dirs.cfg.overpass_cache(),
            r#"{"elements": [{"type": "node", "id": 1, "lat": 41.68, "lon": -87.67}]}"#,
        )
        .unwrap();
        // Unroutable URL proves the cache path never touches the network.
        let net = NetworkConfig {
            overpass_url: "http://127.0.0.1:1/api".into(),
            timeout_secs: 1,
            use_cache: true,
        };
        let bbox = Rect::new(
            Coord { x: -87.7, y: 41.67 },
            Coord { x: -87.6, y: 41.7 },
        );
        let (response, from_cache) = fetch_snapshot(&dirs.cfg, &net, bbox).unwrap();
        assert!(from_cache);
        assert_eq!(response.elements.len(), 1);
    }
}
