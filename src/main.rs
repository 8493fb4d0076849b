// main.rs
// CLI entry point: run one pipeline stage or all of them in order.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use streetnet::pipeline::{aggregate, check, maps, metrics, models, network, robustness};
use streetnet::pipeline::network::NetworkConfig;
use streetnet::PipelineConfig;

#[derive(Parser)]
#[command(
    name = "streetnet",
    version,
    about = "Street-network connectivity pipeline for Chicago CA 75 (Morgan Park)"
)]
struct Cli {
    /// Input data directory (census CSV, block-group geometry, Overpass cache)
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    /// Output directory (graph JSON, tables, figures)
    #[arg(long, global = true, default_value = "outputs")]
    out_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the census CSV and block-group geometry
    Check,
    /// Build the drivable street graph from OSM
    Network {
        /// Ignore the Overpass snapshot cache and refetch
        #[arg(long)]
        no_cache: bool,
    },
    /// Compute connectivity metrics on the saved graph
    Metrics,
    /// Aggregate node and edge metrics to census block groups
    Aggregate,
    /// Draw choropleths and scatter plots, write the correlation table
    Maps,
    /// Fit the baseline OLS models
    Models,
    /// Sweep the alternative model specifications
    Robustness,
    /// Run every stage in order
    All,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = PipelineConfig::new(cli.data_dir, cli.out_dir);

    match cli.command {
        Command::Check => run_check(&cfg)?,
        Command::Network { no_cache } => run_network(&cfg, no_cache)?,
        Command::Metrics => run_metrics(&cfg)?,
        Command::Aggregate => run_aggregate(&cfg)?,
        Command::Maps => run_maps(&cfg)?,
        Command::Models => run_models(&cfg)?,
        Command::Robustness => run_robustness(&cfg)?,
        Command::All => {
            run_check(&cfg)?;
            run_network(&cfg, false)?;
            run_metrics(&cfg)?;
            run_aggregate(&cfg)?;
            run_maps(&cfg)?;
            run_models(&cfg)?;
            run_robustness(&cfg)?;
            info!("pipeline complete");
        }
    }
    Ok(())
}

fn run_check(cfg: &PipelineConfig) -> anyhow::Result<()> {
    info!("== stage 1: input checks ==");
    let report = check::run(cfg).context("input checks failed")?;
    info!(
        "{} census rows, {} unique GEOIDs",
        report.rows, report.unique_geoids
    );
    Ok(())
}

fn run_network(cfg: &PipelineConfig, no_cache: bool) -> anyhow::Result<()> {
    info!("== stage 2: network build ==");
    let net = NetworkConfig {
        use_cache: !no_cache,
        ..NetworkConfig::default()
    };
    let report = network::run(cfg, &net).context("network build failed")?;
    info!(
        "graph has {} nodes and {} edges ({})",
        report.node_count,
        report.edge_count,
        if report.from_cache {
            "from cache"
        } else {
            "freshly fetched"
        }
    );
    Ok(())
}

fn run_metrics(cfg: &PipelineConfig) -> anyhow::Result<()> {
    info!("== stage 3: connectivity metrics ==");
    metrics::run(cfg).context("metric computation failed")?;
    Ok(())
}

fn run_aggregate(cfg: &PipelineConfig) -> anyhow::Result<()> {
    info!("== stage 4: block-group aggregation ==");
    let report = aggregate::run(cfg).context("aggregation failed")?;
    info!(
        "{} block groups, {} nodes assigned ({} by nearest centroid)",
        report.block_groups, report.nodes_assigned, report.nearest_fallback
    );
    Ok(())
}

fn run_maps(cfg: &PipelineConfig) -> anyhow::Result<()> {
    info!("== stage 5: maps and correlations ==");
    let report = maps::run(cfg).context("mapping failed")?;
    info!(
        "{} choropleths, {} scatter plots, {} correlation rows",
        report.choropleths, report.scatters, report.correlation_rows
    );
    Ok(())
}

fn run_models(cfg: &PipelineConfig) -> anyhow::Result<()> {
    info!("== stage 6: baseline OLS models ==");
    let results = models::run(cfg).context("model fitting failed")?;
    info!("{} models fit", results.len());
    Ok(())
}

fn run_robustness(cfg: &PipelineConfig) -> anyhow::Result<()> {
    info!("== stage 7: robustness checks ==");
    let report = robustness::run(cfg).context("robustness sweep failed")?;
    info!(
        "{} specifications fit, {} failed",
        report.fitted, report.failed
    );
    Ok(())
}
