//! Boundary pipeline runner.
//!
//! Runs the selected stages over every configured country and prints what
//! each output directory holds afterwards.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use edgematch::config::Config;
use edgematch::io::{list_artifacts, StageArea};
use edgematch::{PipelineContext, Stage};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "boundaries")]
#[command(about = "Normalize, aggregate and edge-match administrative boundaries")]
struct Args {
    /// Path to the TOML configuration; defaults apply relative to the
    /// current directory when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stage to run, by name or label (repeatable; default: all)
    #[arg(short, long = "stage")]
    stages: Vec<Stage>,

    /// Only process these countries (comma separated iso3 codes)
    #[arg(long, value_delimiter = ',')]
    iso3: Vec<String>,

    /// Worker threads
    #[arg(long)]
    threads: Option<usize>,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::with_root(Path::new(".")),
    };
    if !args.iso3.is_empty() {
        config.run.iso3 = args.iso3.iter().map(|c| c.trim().to_uppercase()).collect();
    }
    if args.threads.is_some() {
        config.run.threads = args.threads;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = load_config(&args).context("Invalid configuration")?;
    info!("Outputs: {}", config.paths.outputs.display());

    let stages = if args.stages.is_empty() {
        Stage::ALL.to_vec()
    } else {
        let mut stages = args.stages.clone();
        stages.sort_by_key(|s| Stage::ALL.iter().position(|x| x == s));
        stages.dedup();
        stages
    };

    let ctx = PipelineContext::load(config)?;
    let reports = ctx.run(&stages)?;

    println!("\n=== Summary ===");
    for report in &reports {
        let dir = ctx.config.area_dir(report.stage.output());
        println!(
            "{:<11} {:>4} written  {:>4} no data  {:>4} failed  {:>5} files in {}",
            report.stage.to_string(),
            report.written(),
            report.no_data(),
            report.failures().count(),
            list_artifacts(&dir).len(),
            dir.display()
        );
    }
    let reviewed = list_artifacts(&ctx.config.area_dir(StageArea::Reviewed)).len();
    if reviewed > 0 {
        println!("{} reviewed layers in use", reviewed);
    }

    let failed: Vec<_> = reports
        .iter()
        .flat_map(|r| r.failures().map(move |(iso3, e)| (r.stage, iso3, e)))
        .collect();
    if !failed.is_empty() {
        for (stage, iso3, e) in &failed {
            error!("{} {}: {}", stage, iso3, e);
        }
        std::process::exit(1);
    }
    Ok(())
}
