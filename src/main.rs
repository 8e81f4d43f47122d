// src/main.rs

/*
ARCHITECTURE OVERVIEW

This binary matches a query point set against a reference point set and
reports the closest reference(s) by great circle distance.

High-level flow:
1. Parse CLI arguments, merged over an optional TOML options file.
2. Load the reference CSV and the query CSV (or a single `--at` location).
   Each column is normalized from its coordinate format:
   - decimal       → direct numeric values
   - dms           → `degrees minutes [seconds]`
   - directional   → `73.9857 W`
   - symbolic      → `48°51'29"N`
   - auto          → detected per cell
3. Match in the selected mode:
   - nearest  → one match per query point
   - ranked   → top-k matches for the first query point
   - grouped  → one match per labeled query point
4. Write the report as text, JSON or CSV.

Malformed rows are skipped with a warning, or abort the run in strict mode.
All matching logic lives in the library; this module only does orchestration.
*/

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use geonear::config::{ConfigError, MatchOptions, ModeKind, StrategyKind};
use geonear::io::{
    ColumnSpec, CoordFormat, LoadError, OutputFormat, ReportError, load_points, parse_location,
    write_report,
};
use geonear::{LabeledPoint, MalformedCoordinate, MatchError, Matcher, PointSet};

/* ---------------- CLI ---------------- */

// Command-line interface definition.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Query points CSV file
    #[arg(short, long, required_unless_present = "at")]
    queries: Option<PathBuf>,

    /// Single query location as "lat,lon" instead of a query file
    #[arg(long, conflicts_with = "queries")]
    at: Option<String>,

    /// Reference points CSV file
    #[arg(short, long)]
    references: PathBuf,

    /// Latitude column of the query file
    #[arg(long, default_value = "latitude")]
    query_lat: String,

    /// Longitude column of the query file
    #[arg(long, default_value = "longitude")]
    query_lon: String,

    /// Label column of the query file
    #[arg(long)]
    query_label: Option<String>,

    /// Coordinate format of the query file
    #[arg(long, value_enum, default_value_t = CoordFormat::Auto)]
    query_format: CoordFormat,

    /// Latitude column of the reference file
    #[arg(long, default_value = "latitude")]
    ref_lat: String,

    /// Longitude column of the reference file
    #[arg(long, default_value = "longitude")]
    ref_lon: String,

    /// Label column of the reference file
    #[arg(long)]
    ref_label: Option<String>,

    /// Coordinate format of the reference file
    #[arg(long, value_enum, default_value_t = CoordFormat::Auto)]
    ref_format: CoordFormat,

    /// TOML options file (mode, k, strategy, index_threshold, parallel)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Matching mode
    #[arg(short, long, value_enum)]
    mode: Option<ModeKind>,

    /// Number of matches in ranked mode
    #[arg(short, long)]
    k: Option<usize>,

    /// Search strategy
    #[arg(short, long, value_enum)]
    strategy: Option<StrategyKind>,

    /// Evaluate queries on a single thread
    #[arg(long)]
    no_parallel: bool,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Report path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Render unlabeled coordinates as DMS in text reports
    #[arg(long)]
    dms: bool,

    /// Strict mode: stop on first malformed row
    #[arg(long)]
    strict: bool,
}

impl Cli {
    // Options file first, then command-line overrides.
    fn options(&self) -> Result<MatchOptions, AppError> {
        let mut options = match &self.config {
            Some(path) => MatchOptions::load_from_file(path)?,
            None => MatchOptions::default(),
        };

        if let Some(mode) = self.mode {
            options.mode = mode;
        }
        if let Some(k) = self.k {
            options.k = k;
        }
        if let Some(strategy) = self.strategy {
            options.strategy = strategy;
        }
        if self.no_parallel {
            options.parallel = false;
        }
        // A fixed location only makes sense as a ranked query.
        if self.at.is_some() && self.mode.is_none() && self.config.is_none() {
            options.mode = ModeKind::Ranked;
        }

        Ok(options)
    }

    fn query_columns(&self) -> ColumnSpec {
        ColumnSpec {
            latitude: self.query_lat.clone(),
            longitude: self.query_lon.clone(),
            label: self.query_label.clone(),
            format: self.query_format,
        }
    }

    fn reference_columns(&self) -> ColumnSpec {
        ColumnSpec {
            latitude: self.ref_lat.clone(),
            longitude: self.ref_lon.clone(),
            label: self.ref_label.clone(),
            format: self.ref_format,
        }
    }
}

/* ---------------- MAIN ERROR ---------------- */

// Application-level errors.
#[derive(Error, Debug)]
enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Options error: {0}")]
    Config(#[from] ConfigError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Invalid location: {0}")]
    Location(#[from] MalformedCoordinate),

    #[error("Match error: {0}")]
    Match(#[from] MatchError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Either --queries or --at is required")]
    MissingQueries,
}

/* ---------------- MAIN ---------------- */

fn main() {
    init_logging();

    if let Err(e) = run(Cli::parse()) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), AppError> {
    let options = cli.options()?;
    debug!(?options, "resolved options");

    let references = load_points(&cli.references, &cli.reference_columns(), cli.strict)?;
    let queries = load_queries(&cli)?;

    let matcher = Matcher::new(&references, &options)?;
    info!(
        queries = queries.len(),
        references = references.len(),
        strategy = ?matcher.strategy(),
        "matching"
    );
    let result = matcher.run(&queries, options.mode())?;

    match &cli.output {
        Some(path) => {
            let mut out = BufWriter::new(File::create(path)?);
            write_report(&mut out, &result, cli.format, cli.dms)?;
            out.flush()?;
            info!("Report saved to {}", path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            write_report(&mut out, &result, cli.format, cli.dms)?;
        }
    }

    Ok(())
}

fn load_queries(cli: &Cli) -> Result<PointSet, AppError> {
    if let Some(at) = &cli.at {
        let point = parse_location(at)?;
        return Ok([LabeledPoint::new(point)].into_iter().collect());
    }

    let path = cli.queries.as_ref().ok_or(AppError::MissingQueries)?;
    Ok(load_points(path, &cli.query_columns(), cli.strict)?)
}

/* ---------------- TEST ---------------- */
