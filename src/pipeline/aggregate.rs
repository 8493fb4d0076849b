// aggregate.rs
// Stage 4: bring the network down to census geography. Every node is
// assigned to exactly one block group (containment first, nearest centroid
// as the fallback), edge length is split by clipping each segment against
// the block-group polygons, and the per-BG metric table is merged onto the
// ACS table as a left join that keeps every census row.

use std::collections::BTreeMap;

use geo::BoundingRect;
use geo_types::{Point, Rect};
use tracing::{info, warn};

use crate::config::{PipelineConfig, BG_LAYER};
use crate::error::{PipelineError, Result};
use crate::graph::RoadGraph;
use crate::spatial::{clipped_length_km, nearest_block_group, BlockGroup};
use crate::spatial::read::read_block_groups;
use crate::stats::corr::quantile;
use crate::table::{normalize_geoid, Table};

#[derive(Debug, Clone, Copy)]
pub struct AggregateReport {
    pub block_groups: usize,
    pub nodes_assigned: usize,
    /// Nodes that fell outside every polygon and were assigned by centroid
    /// distance instead.
    pub nearest_fallback: usize,
    pub joined_rows: usize,
    pub unmatched_rows: usize,
}

/// Per-block-group accumulation before it becomes a CSV row.
#[derive(Debug, Clone, Default)]
struct BgAccumulator {
    nodes: usize,
    edges_km: f64,
    degrees: Vec<f64>,
    betweenness: Vec<f64>,
    aspl: Vec<f64>,
}

/// Metric columns appended to the ACS table by the join, in output order.
const METRIC_COLUMNS: &[&str] = &[
    "area_km2",
    "nodes_in_bg",
    "edges_km",
    "node_density",
    "edge_km_density",
    "betweenness_mean",
    "betweenness_p90",
    "aspl_mean",
    "degree_mean",
];

/// Run the aggregation stage.
pub fn run(cfg: &PipelineConfig) -> Result<AggregateReport> {
    cfg.ensure_output_dirs()?;

    let bgs = read_block_groups(&cfg.spatial_gpkg(), &cfg.spatial_geojson(), BG_LAYER)?;
    let graph = RoadGraph::load_from_file(&cfg.graph_json())?;
    let nodes = Table::read_csv(&cfg.nodes_csv())?;
    for column in ["osmid", "x", "y", "degree", "betweenness", "aspl_m"] {
        if !nodes.has_column(column) {
            return Err(PipelineError::MissingColumn {
                column: column.to_string(),
                file: cfg.nodes_csv().display().to_string(),
            });
        }
    }

    let mut acc: Vec<BgAccumulator> = vec![BgAccumulator::default(); bgs.len()];
    let nearest_fallback = assign_nodes(&bgs, &nodes, &mut acc)?;
    split_edge_length(&bgs, &graph, &mut acc);

    let metrics = bg_metrics_table(&bgs, &acc);
    metrics.write_csv(&cfg.bg_metrics_csv())?;
    info!("wrote block-group metrics: {}", cfg.bg_metrics_csv().display());

    let mut acs = Table::read_csv(&cfg.acs_csv())?;
    recompute_rates(&mut acs);
    let unmatched = join_metrics(&mut acs, &metrics)?;
    acs.write_csv(&cfg.bg_joined_csv())?;
    info!("wrote joined table: {}", cfg.bg_joined_csv().display());

    if unmatched > 0 {
        warn!("{unmatched} census rows have no network metrics (no geometry match)");
    }

    Ok(AggregateReport {
        block_groups: bgs.len(),
        nodes_assigned: nodes.len(),
        nearest_fallback,
        joined_rows: acs.len(),
        unmatched_rows: unmatched,
    })
}

/// Assign every node to one block group. Containment wins; polygons are
/// geoid-sorted, so a point on a shared boundary goes to the smaller geoid.
/// Returns how many nodes needed the nearest-centroid fallback.
fn assign_nodes(
    bgs: &[BlockGroup],
    nodes: &Table,
    acc: &mut [BgAccumulator],
) -> Result<usize> {
    let xs = nodes.numeric_column("x");
    let ys = nodes.numeric_column("y");
    let degrees = nodes.numeric_column("degree");
    let betweenness = nodes.numeric_column("betweenness");
    let aspl = nodes.numeric_column("aspl_m");

    let mut fallback = 0usize;
    for row in 0..nodes.len() {
        let (Some(x), Some(y)) = (xs[row], ys[row]) else {
            return Err(PipelineError::Geometry(format!(
                "node row {row} has no coordinates"
            )));
        };
        let point = Point::new(x, y);
        let bg_index = match bgs.iter().position(|bg| bg.contains(&point)) {
            Some(i) => i,
            None => {
                fallback += 1;
                nearest_block_group(bgs, point).ok_or_else(|| {
                    PipelineError::Geometry("no block group to assign nodes to".into())
                })?
            }
        };
        let slot = &mut acc[bg_index];
        slot.nodes += 1;
        if let Some(d) = degrees[row] {
            slot.degrees.push(d);
        }
        if let Some(b) = betweenness[row] {
            slot.betweenness.push(b);
        }
        if let Some(a) = aspl[row] {
            slot.aspl.push(a);
        }
    }
    if fallback > 0 {
        info!("{fallback} nodes assigned by nearest centroid");
    }
    Ok(fallback)
}

/// Split each edge's length across the block groups it crosses by clipping
/// its polyline against every candidate polygon.
fn split_edge_length(bgs: &[BlockGroup], graph: &RoadGraph, acc: &mut [BgAccumulator]) {
    let bg_rects: Vec<Option<Rect<f64>>> =
        bgs.iter().map(|bg| bg.geometry.bounding_rect()).collect();

    for edge in &graph.edges {
        let line = edge.line_string();
        let Some(edge_rect) = line.bounding_rect() else {
            continue;
        };
        for (i, bg) in bgs.iter().enumerate() {
            let overlaps = bg_rects[i].is_some_and(|r| rects_overlap(r, edge_rect));
            if !overlaps {
                continue;
            }
            let km = clipped_length_km(&bg.geometry, &line);
            if km > 0.0 {
                acc[i].edges_km += km;
            }
        }
    }
}

fn rects_overlap(a: Rect<f64>, b: Rect<f64>) -> bool {
    a.min().x <= b.max().x
        && b.min().x <= a.max().x
        && a.min().y <= b.max().y
        && b.min().y <= a.max().y
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    value
        .map(|v| format!("{v:.prec$}", prec = decimals))
        .unwrap_or_default()
}

fn bg_metrics_table(bgs: &[BlockGroup], acc: &[BgAccumulator]) -> Table {
    let mut headers = vec!["GEOID_BG".to_string()];
    headers.extend(METRIC_COLUMNS.iter().map(|c| c.to_string()));
    let mut table = Table::new(headers);

    for (bg, slot) in bgs.iter().zip(acc) {
        let area = bg.area_km2();
        let (node_density, edge_km_density) = if area > 0.0 {
            (
                Some(slot.nodes as f64 / area),
                Some(slot.edges_km / area),
            )
        } else {
            (None, None)
        };
        table.push_row(vec![
            bg.geoid.clone(),
            format!("{area:.6}"),
            slot.nodes.to_string(),
            format!("{:.4}", slot.edges_km),
            fmt_opt(node_density, 4),
            fmt_opt(edge_km_density, 4),
            fmt_opt(mean(&slot.betweenness), 8),
            fmt_opt(quantile(&slot.betweenness, 0.9), 8),
            fmt_opt(mean(&slot.aspl), 2),
            fmt_opt(mean(&slot.degrees), 4),
        ]);
    }
    table
}

/// Derived-rate recomputation: (numerator columns, denominator expression).
/// Only fills a rate column that is absent or entirely empty; reported
/// values in the source CSV are left alone.
fn recompute_rates(acs: &mut Table) {
    let specs: &[(&str, &[&str], &[&str])] = &[
        // (rate column, numerator columns, denominator columns)
        ("owner_pct", &["owner"], &["owner", "renter"]),
        ("vac_rate", &["vac_units"], &["units"]),
        ("black_pct", &["black"], &["pop"]),
        ("asian_pct", &["asian"], &["pop"]),
        ("hisp_pct", &["hisp"], &["hisp_tot"]),
        ("u_20plus_pct", &["u_20_49", "u_50p"], &["units_denom"]),
    ];

    for (rate, numerators, denominators) in specs {
        if acs.non_null_count(rate) > 0 {
            continue;
        }
        let num_cols: Vec<Vec<Option<f64>>> =
            numerators.iter().map(|c| acs.numeric_column(c)).collect();
        let den_cols: Vec<Vec<Option<f64>>> =
            denominators.iter().map(|c| acs.numeric_column(c)).collect();

        let values: Vec<String> = (0..acs.len())
            .map(|row| {
                let num: Option<f64> = num_cols
                    .iter()
                    .map(|col| col[row])
                    .sum::<Option<f64>>();
                let den: Option<f64> = den_cols
                    .iter()
                    .map(|col| col[row])
                    .sum::<Option<f64>>();
                match (num, den) {
                    (Some(n), Some(d)) if d > 0.0 => format!("{:.2}", n / d * 100.0),
                    _ => String::new(),
                }
            })
            .collect();

        if acs.has_column(rate) {
            for (row, value) in values.into_iter().enumerate() {
                acs.set(row, rate, value);
            }
        } else {
            acs.add_column(rate, values);
        }
        info!("recomputed {rate} from counts");
    }
}

/// Left join: every ACS row keeps its place; metric cells stay empty where
/// the geoid has no geometry match. Returns the unmatched row count.
fn join_metrics(acs: &mut Table, metrics: &Table) -> Result<usize> {
    let Some(geoid_col) = metrics.column("GEOID_BG") else {
        return Err(PipelineError::MissingColumn {
            column: "GEOID_BG".into(),
            file: "bg_metrics".into(),
        });
    };
    let by_geoid: BTreeMap<String, usize> = geoid_col
        .iter()
        .enumerate()
        .map(|(row, g)| (g.to_string(), row))
        .collect();

    let acs_geoids = acs
        .column("GEOID_BG")
        .map(|col| col.iter().map(|s| s.to_string()).collect::<Vec<_>>())
        .ok_or_else(|| PipelineError::MissingColumn {
            column: "GEOID_BG".into(),
            file: "census table".into(),
        })?;

    let mut unmatched = 0usize;
    let mut columns: Vec<Vec<String>> = vec![Vec::with_capacity(acs.len()); METRIC_COLUMNS.len()];
    for raw in &acs_geoids {
        let metric_row = normalize_geoid(raw).and_then(|g| by_geoid.get(&g).copied());
        if metric_row.is_none() {
            unmatched += 1;
        }
        for (j, column) in METRIC_COLUMNS.iter().enumerate() {
            let cell = metric_row
                .and_then(|row| metrics.get(row, column))
                .unwrap_or_default();
            columns[j].push(cell.to_string());
        }
    }
    for (column, values) in METRIC_COLUMNS.iter().zip(columns) {
        acs.add_column(column, values);
    }
    Ok(unmatched)
}
