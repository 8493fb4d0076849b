// maps.rs
// Stage 5: descriptive output. Quantile choropleths of the network metrics
// and the ACS outcomes, bivariate scatter plots with a least-squares trend
// line, and the Pearson/Spearman correlation table.

use std::collections::BTreeMap;
use std::path::Path;

use geo::BoundingRect;
use geo_types::MultiPolygon;
use plotters::prelude::*;
use tracing::{info, warn};

use crate::config::{PipelineConfig, BG_LAYER};
use crate::error::{PipelineError, Result};
use crate::graph::RoadGraph;
use crate::spatial::read::read_block_groups;
use crate::spatial::BlockGroup;
use crate::stats::corr::{class_of, paired, pearson, quantile_breaks, spearman};
use crate::table::{normalize_geoid, Table};

/// Network metric columns mapped, in order.
pub const NETWORK_FIELDS: &[&str] = &[
    "node_density",
    "edge_km_density",
    "betweenness_mean",
    "aspl_mean",
];

/// ACS outcome columns mapped and correlated against the metrics.
pub const OUTCOME_FIELDS: &[&str] = &["owner_pct", "vac_rate", "black_pct"];

/// Five-class sequential ramp (light to dark).
const RAMP: [RGBColor; 5] = [
    RGBColor(239, 243, 255),
    RGBColor(189, 215, 231),
    RGBColor(107, 174, 214),
    RGBColor(49, 130, 189),
    RGBColor(8, 81, 156),
];

#[derive(Debug, Clone, Copy)]
pub struct MapsReport {
    pub choropleths: usize,
    pub scatters: usize,
    pub correlation_rows: usize,
}

fn render_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Render(e.to_string())
}

/// Run the mapping stage.
pub fn run(cfg: &PipelineConfig) -> Result<MapsReport> {
    cfg.ensure_output_dirs()?;

    let bgs = read_block_groups(&cfg.spatial_gpkg(), &cfg.spatial_geojson(), BG_LAYER)?;
    let joined = Table::read_csv(&cfg.bg_joined_csv())?;
    let by_geoid = geoid_rows(&joined)?;

    let mut choropleths = 0usize;
    for (fields, dir) in [
        (NETWORK_FIELDS, cfg.network_figures_dir()),
        (OUTCOME_FIELDS, cfg.outcome_figures_dir()),
    ] {
        for field in fields {
            let values = field_by_bg(&joined, &by_geoid, &bgs, field);
            if values.iter().flatten().count() == 0 {
                warn!("skipping {field} map: no values to draw");
                continue;
            }
            let path = dir.join(format!("{field}.png"));
            choropleth(&path, field, &bgs, &values)?;
            info!("saved choropleth: {}", path.display());
            choropleths += 1;
        }
    }

    let mut scatters = 0usize;
    let mut corr_table = Table::new(
        ["metric", "outcome", "pearson", "spearman", "n"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    for metric in NETWORK_FIELDS {
        let xs = joined.numeric_column(metric);
        for outcome in OUTCOME_FIELDS {
            let ys = joined.numeric_column(outcome);
            let (px, py) = paired(&xs, &ys);
            let r = pearson(&px, &py);
            let rho = spearman(&px, &py);
            corr_table.push_row(vec![
                metric.to_string(),
                outcome.to_string(),
                r.map(|v| format!("{v:.4}")).unwrap_or_default(),
                rho.map(|v| format!("{v:.4}")).unwrap_or_default(),
                px.len().to_string(),
            ]);

            if px.len() >= 2 {
                let path = cfg
                    .scatter_figures_dir()
                    .join(format!("{metric}_vs_{outcome}.png"));
                scatter(&path, metric, outcome, &px, &py, r)?;
                scatters += 1;
            } else {
                warn!("skipping {metric} vs {outcome} scatter: {} pairs", px.len());
            }
        }
    }
    corr_table.write_csv(&cfg.correlations_csv())?;
    info!("wrote correlations: {}", cfg.correlations_csv().display());

    Ok(MapsReport {
        choropleths,
        scatters,
        correlation_rows: corr_table.len(),
    })
}

/// Normalized geoid -> row index of the joined table.
fn geoid_rows(joined: &Table) -> Result<BTreeMap<String, usize>> {
    let geoids = joined
        .column("GEOID_BG")
        .ok_or_else(|| PipelineError::MissingColumn {
            column: "GEOID_BG".into(),
            file: "joined table".into(),
        })?;
    Ok(geoids
        .iter()
        .enumerate()
        .filter_map(|(row, raw)| normalize_geoid(raw).map(|g| (g, row)))
        .collect())
}

/// Pull one numeric field in block-group order.
fn field_by_bg(
    joined: &Table,
    by_geoid: &BTreeMap<String, usize>,
    bgs: &[BlockGroup],
    field: &str,
) -> Vec<Option<f64>> {
    let column = joined.numeric_column(field);
    bgs.iter()
        .map(|bg| by_geoid.get(&bg.geoid).and_then(|&row| column[row]))
        .collect()
}

/// Draw a five-class quantile choropleth. Block groups with no value are
/// outlined but left unfilled.
fn choropleth(
    path: &Path,
    title: &str,
    bgs: &[BlockGroup],
    values: &[Option<f64>],
) -> Result<()> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let breaks = quantile_breaks(&present, RAMP.len());

    let (x_range, y_range) = map_extent(bgs)?;
    let root = BitMapBackend::new(path, (900, 700)).into_drawing_area();
    root.fill(&WHITE).map_err(render_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)
        .map_err(render_err)?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("longitude")
        .y_desc("latitude")
        .draw()
        .map_err(render_err)?;

    for (bg, value) in bgs.iter().zip(values) {
        for poly in &bg.geometry.0 {
            let ring: Vec<(f64, f64)> =
                poly.exterior().coords().map(|c| (c.x, c.y)).collect();
            if let Some(v) = value {
                let color = RAMP[class_of(*v, &breaks)];
                chart
                    .draw_series(std::iter::once(Polygon::new(ring.clone(), color.filled())))
                    .map_err(render_err)?;
            }
            chart
                .draw_series(std::iter::once(PathElement::new(ring, BLACK.stroke_width(1))))
                .map_err(render_err)?;
        }
    }
    root.present().map_err(render_err)?;
    Ok(())
}

/// Scatter plot with a least-squares trend line; the Pearson r goes in the
/// caption so the figure stands on its own.
fn scatter(
    path: &Path,
    x_label: &str,
    y_label: &str,
    xs: &[f64],
    ys: &[f64],
    r: Option<f64>,
) -> Result<()> {
    let caption = match r {
        Some(r) => format!("{y_label} vs {x_label} (r = {r:.3})"),
        None => format!("{y_label} vs {x_label}"),
    };
    let (x_range, y_range) = (padded_range(xs), padded_range(ys));

    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(render_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range.clone(), y_range)
        .map_err(render_err)?;
    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc(y_label)
        .draw()
        .map_err(render_err)?;

    chart
        .draw_series(
            xs.iter()
                .zip(ys)
                .map(|(&x, &y)| Circle::new((x, y), 4, BLUE.filled())),
        )
        .map_err(render_err)?;

    if let Some((slope, intercept)) = trend_line(xs, ys) {
        chart
            .draw_series(LineSeries::new(
                [x_range.start, x_range.end]
                    .iter()
                    .map(|&x| (x, intercept + slope * x)),
                RED.stroke_width(2),
            ))
            .map_err(render_err)?;
    }
    root.present().map_err(render_err)?;
    Ok(())
}

/// Simple regression slope and intercept; `None` when x has no variance.
fn trend_line(xs: &[f64], ys: &[f64]) -> Option<(f64, f64)> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let mean_x = xs[..n].iter().sum::<f64>() / n as f64;
    let mean_y = ys[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    for i in 0..n {
        cov += (xs[i] - mean_x) * (ys[i] - mean_y);
        var_x += (xs[i] - mean_x).powi(2);
    }
    if var_x <= 0.0 {
        return None;
    }
    let slope = cov / var_x;
    Some((slope, mean_y - slope * mean_x))
}

fn padded_range(values: &[f64]) -> std::ops::Range<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let pad = ((max - min) * 0.05).max(1e-6);
    (min - pad)..(max + pad)
}

fn map_extent(bgs: &[BlockGroup]) -> Result<(std::ops::Range<f64>, std::ops::Range<f64>)> {
    let mut rect: Option<geo_types::Rect<f64>> = None;
    for bg in bgs {
        if let Some(r) = bg.geometry.bounding_rect() {
            rect = Some(match rect {
                None => r,
                Some(acc) => geo_types::Rect::new(
                    geo_types::Coord {
                        x: acc.min().x.min(r.min().x),
                        y: acc.min().y.min(r.min().y),
                    },
                    geo_types::Coord {
                        x: acc.max().x.max(r.max().x),
                        y: acc.max().y.max(r.max().y),
                    },
                ),
            });
        }
    }
    let rect =
        rect.ok_or_else(|| PipelineError::Geometry("no geometry to map".into()))?;
    let pad_x = ((rect.max().x - rect.min().x) * 0.05).max(1e-4);
    let pad_y = ((rect.max().y - rect.min().y) * 0.05).max(1e-4);
    Ok((
        (rect.min().x - pad_x)..(rect.max().x + pad_x),
        (rect.min().y - pad_y)..(rect.max().y + pad_y),
    ))
}

/// Overview figure for the network stage: boundary outline plus every street
/// segment.
pub fn render_overview(
    graph: &RoadGraph,
    boundary: &MultiPolygon<f64>,
    path: &Path,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rect = boundary
        .bounding_rect()
        .ok_or_else(|| PipelineError::Geometry("boundary has no extent".into()))?;
    let pad_x = ((rect.max().x - rect.min().x) * 0.05).max(1e-4);
    let pad_y = ((rect.max().y - rect.min().y) * 0.05).max(1e-4);

    let root = BitMapBackend::new(path, (1000, 800)).into_drawing_area();
    root.fill(&WHITE).map_err(render_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(graph.metadata.study_area.as_str(), ("sans-serif", 26))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(
            (rect.min().x - pad_x)..(rect.max().x + pad_x),
            (rect.min().y - pad_y)..(rect.max().y + pad_y),
        )
        .map_err(render_err)?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("longitude")
        .y_desc("latitude")
        .draw()
        .map_err(render_err)?;

    for poly in &boundary.0 {
        let ring: Vec<(f64, f64)> = poly.exterior().coords().map(|c| (c.x, c.y)).collect();
        chart
            .draw_series(std::iter::once(PathElement::new(
                ring,
                RGBColor(60, 60, 60).stroke_width(2),
            )))
            .map_err(render_err)?;
    }
    for edge in &graph.edges {
        let line: Vec<(f64, f64)> = edge.geometry.iter().map(|c| (c[0], c[1])).collect();
        if line.len() < 2 {
            continue;
        }
        chart
            .draw_series(std::iter::once(PathElement::new(
                line,
                BLUE.stroke_width(1),
            )))
            .map_err(render_err)?;
    }
    root.present().map_err(render_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_fixtures::{
        ring_graph, write_acs_csv, write_bg_geojson, FixtureDirs,
    };
    use crate::spatial::dissolve;

    fn run_prior_stages(dirs: &FixtureDirs, geoids: &[&str]) {
        write_acs_csv(&dirs.cfg, geoids);
        write_bg_geojson(&dirs.cfg, geoids);
        ring_graph().save_to_file(&dirs.cfg.graph_json()).unwrap();
        crate::pipeline::metrics::run(&dirs.cfg).unwrap();
        crate::pipeline::aggregate::run(&dirs.cfg).unwrap();
    }

    #[test]
    fn writes_figures_and_the_correlation_table() {
        let dirs = FixtureDirs::new();
        run_prior_stages(&dirs, &["170317501001", "170317501002", "170317501003"]);

        let report = run(&dirs.cfg).unwrap();
        assert_eq!(report.correlation_rows, 12);
        // All four metric maps exist even where outcomes are constant.
        for field in NETWORK_FIELDS {
            assert!(dirs
                .cfg
                .network_figures_dir()
                .join(format!("{field}.png"))
                .is_file());
        }

        let corr = Table::read_csv(&dirs.cfg.correlations_csv()).unwrap();
        assert_eq!(corr.len(), 12);
        assert_eq!(corr.get(0, "metric"), Some("node_density"));
        assert_eq!(corr.get(0, "outcome"), Some("owner_pct"));
    }

    #[test]
    fn overview_renders_the_ring() {
        let dirs = FixtureDirs::new();
        write_bg_geojson(&dirs.cfg, &["170317501001"]);
        let bgs = read_block_groups(
            &dirs.cfg.spatial_gpkg(),
            &dirs.cfg.spatial_geojson(),
            BG_LAYER,
        )
        .unwrap();
        let boundary = dissolve(&bgs).unwrap();
        let path = dirs.cfg.overview_png();
        render_overview(&ring_graph(), &boundary, &path).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn trend_line_matches_a_perfect_fit() {
        let xs = vec![0.0, 1.0, 2.0, 3.0];
        let ys = vec![1.0, 3.0, 5.0, 7.0];
        let (slope, intercept) = trend_line(&xs, &ys).unwrap();
        assert!((slope - 2.0).abs() < 1e-12);
        assert!((intercept - 1.0).abs() < 1e-12);
        assert!(trend_line(&[2.0, 2.0], &[1.0, 5.0]).is_none());
    }
}
