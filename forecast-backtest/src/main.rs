//! Forecast backtest CLI.
//!
//! # Usage
//!
//! ```bash
//! # Backtest the configured model and write results/metrics tables
//! forecast-backtest run --data data/sales.csv --config config/default.toml --output results
//!
//! # Print the split layout without fitting anything
//! forecast-backtest splits --data data/sales.csv --config config/default.toml
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use forecast_backtest::data::series::{DEFAULT_DATE_COL, DEFAULT_RESPONSE_COL};
use forecast_backtest::report::write_report;
use forecast_backtest::{
    BacktestEngine, ExportFormat, RunConfig, Scorer, SeriesLoader, TimeSeries,
};

#[derive(Parser)]
#[command(name = "forecast-backtest")]
#[command(about = "Walk-forward backtesting for time-series forecasting models")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct DataArgs {
    /// CSV or Parquet file holding the series
    #[arg(short, long)]
    data: PathBuf,

    /// TOML run file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Date column name
    #[arg(long, default_value = DEFAULT_DATE_COL)]
    date_col: String,

    /// Response column name
    #[arg(long, default_value = DEFAULT_RESPONSE_COL)]
    response_col: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backtest and score it
    Run {
        #[command(flatten)]
        input: DataArgs,

        /// Directory for results and metrics tables
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Export format: csv or parquet
        #[arg(long, default_value = "csv")]
        format: String,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the split scheme for a series
    Splits {
        #[command(flatten)]
        input: DataArgs,
    },
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            RunConfig::from_toml_str(&text)
                .with_context(|| format!("Invalid config {}", path.display()))
        }
        None => Ok(RunConfig::default()),
    }
}

fn load_series(input: &DataArgs, config: &RunConfig) -> Result<TimeSeries> {
    let series = SeriesLoader::new(&input.date_col, &input.response_col)
        .with_regressors(config.model.regressors())
        .load(&input.data)
        .with_context(|| format!("Failed to load series from {}", input.data.display()))?;
    info!(
        "Loaded {} observations from {}",
        series.len(),
        input.data.display()
    );
    Ok(series)
}

fn run(input: DataArgs, output: Option<PathBuf>, format: &str, json: bool) -> Result<()> {
    let format = ExportFormat::from_str(format)?;
    let config = load_config(input.config.as_deref())?;
    let series = load_series(&input, &config)?;

    let engine = BacktestEngine::new(config.backtest.clone())?;
    let total = engine.plan(series.len())?.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} splits")?
            .progress_chars("=>-"),
    );
    let bar = pb.clone();
    let engine = engine.with_progress(Arc::new(move |done, _| bar.set_position(done as u64)));

    let started = Instant::now();
    let report = engine.run_kind(&series, &config.model)?;
    pb.finish_and_clear();
    info!(
        "Ran {} with {} splits in {:.2?}",
        config.model.name(),
        report.splits.len(),
        started.elapsed()
    );

    let scorer = Scorer::new(config.metric_set()).with_config(config.scoring);
    let scores = report.score(&scorer);
    let summary = report.summarize(&scores);

    if json {
        println!("{}", summary.to_json()?);
    } else {
        print!("{}", summary);
    }

    if let Some(dir) = output {
        let paths = write_report(&dir, &report, &scores, format)
            .with_context(|| format!("Failed to write results to {}", dir.display()))?;
        for path in paths {
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

fn splits(input: DataArgs) -> Result<()> {
    let config = load_config(input.config.as_deref())?;
    let series = load_series(&input, &config)?;
    let engine = BacktestEngine::new(config.backtest)?;
    let scheme = engine.scheme(series.len())?;
    print!("{}", scheme.describe(Some(series.dates())));
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("forecast_backtest=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            output,
            format,
            json,
        } => run(input, output, &format, json),
        Commands::Splits { input } => splits(input),
    }
}
