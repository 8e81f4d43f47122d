// src/io.rs

/*
Thin CSV / JSON plumbing around the matching core.

Loading: one CSV file per point set, coordinates read from configurable
columns and normalized with the selected format. Malformed rows are skipped
with a warning, or abort the load in strict mode.

Reporting: any MatchResult can be written as JSON rows, CSV rows, or the
human-readable text lines.
*/

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use csv::{ReaderBuilder, StringRecord};
use tracing::{info, warn};

use crate::aggregate::{Match, MatchResult};
use crate::distance::{km_to_miles, round};
use crate::geo::{
    CoordError, CoordinateKind, GeoPoint, MalformedCoordinate, RawCoordinate, format_dms,
};
use crate::points::{LabeledPoint, NormalizedBatch, PointSet, RawRecord};

/* ---------------- INPUT ---------------- */

// Supported textual coordinate formats for a CSV column.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, ValueEnum)]
pub enum CoordFormat {
    #[default]
    Auto,
    Decimal,
    Dms,
    Directional,
    Symbolic,
}

impl CoordFormat {
    // Wraps one CSV cell into the matching raw coordinate.
    fn raw(self, text: &str, kind: CoordinateKind) -> Result<RawCoordinate, MalformedCoordinate> {
        let text = text.trim().to_string();
        Ok(match self {
            CoordFormat::Auto => RawCoordinate::Auto(text),
            CoordFormat::Decimal => match text.parse::<f64>() {
                Ok(value) => RawCoordinate::Decimal(value),
                Err(_) => {
                    return Err(MalformedCoordinate::new(kind, text, CoordError::InvalidFormat));
                }
            },
            CoordFormat::Dms => RawCoordinate::Dms(text),
            CoordFormat::Directional => RawCoordinate::Directional(text),
            CoordFormat::Symbolic => RawCoordinate::Symbolic(text),
        })
    }
}

/// Where to find a point set's columns and how to read them.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub latitude: String,
    pub longitude: String,
    pub label: Option<String>,
    pub format: CoordFormat,
}

impl Default for ColumnSpec {
    fn default() -> Self {
        Self {
            latitude: "latitude".to_string(),
            longitude: "longitude".to_string(),
            label: None,
            format: CoordFormat::Auto,
        }
    }
}

// Errors raised while loading a point set.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("CSV error in {}: {source}", .path.display())]
    Csv { path: PathBuf, source: csv::Error },

    #[error("Missing header field '{column}' in {}", .path.display())]
    MissingHeaderField { path: PathBuf, column: String },

    #[error("{} line {line}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        source: MalformedCoordinate,
    },
}

// Column positions resolved from the header row.
struct ColumnIndex {
    latitude: usize,
    longitude: usize,
    label: Option<usize>,
}

impl ColumnIndex {
    fn resolve(path: &Path, headers: &StringRecord, spec: &ColumnSpec) -> Result<Self, LoadError> {
        let find = |column: &str| {
            headers
                .iter()
                .position(|h| h.trim() == column)
                .ok_or_else(|| LoadError::MissingHeaderField {
                    path: path.to_path_buf(),
                    column: column.to_string(),
                })
        };

        Ok(Self {
            latitude: find(&spec.latitude)?,
            longitude: find(&spec.longitude)?,
            label: spec.label.as_deref().map(find).transpose()?,
        })
    }
}

/// Reads one CSV file into a point set.
///
/// Rows are numbered from 2 (the header is line 1) in log and error output.
pub fn load_points(path: &Path, spec: &ColumnSpec, strict: bool) -> Result<PointSet, LoadError> {
    let csv_error = |source: csv::Error| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(csv_error)?;

    let headers = reader.headers().map_err(csv_error)?.clone();
    let columns = ColumnIndex::resolve(path, &headers, spec)?;

    let mut results = Vec::new();
    let mut unreadable = 0usize;

    for (i, row) in reader.records().enumerate() {
        let line = i + 2;
        let row = match row {
            Ok(row) => row,
            Err(source) => {
                if strict {
                    return Err(csv_error(source));
                }
                warn!(line, "skipping unreadable row: {source}");
                unreadable += 1;
                continue;
            }
        };

        results.push((line, parse_row(&row, &columns, spec)));
    }

    let lines: Vec<usize> = results.iter().map(|(line, _)| *line).collect();
    let batch: NormalizedBatch = results.into_iter().map(|(_, result)| result).collect();

    if strict {
        if let Some(rejected) = batch.rejected.first() {
            return Err(LoadError::Malformed {
                path: path.to_path_buf(),
                line: lines[rejected.index],
                source: rejected.error.clone(),
            });
        }
    }

    let rejected = batch.rejected.len() + unreadable;
    let points = batch.into_lenient();
    info!(
        path = %path.display(),
        loaded = points.len(),
        rejected,
        "point set loaded"
    );

    Ok(points)
}

fn parse_row(
    row: &StringRecord,
    columns: &ColumnIndex,
    spec: &ColumnSpec,
) -> Result<LabeledPoint, MalformedCoordinate> {
    let cell = |index: usize| row.get(index).unwrap_or("");

    let record = RawRecord {
        latitude: spec
            .format
            .raw(cell(columns.latitude), CoordinateKind::Latitude)?,
        longitude: spec
            .format
            .raw(cell(columns.longitude), CoordinateKind::Longitude)?,
        label: columns.label.map(|index| cell(index).trim().to_string()),
    };
    record.normalize()
}

/// Parses a fixed `"lat,lon"` location given on the command line.
pub fn parse_location(text: &str) -> Result<GeoPoint, MalformedCoordinate> {
    let (lat, lon) = text.split_once(',').ok_or_else(|| {
        MalformedCoordinate::new(
            CoordinateKind::Longitude,
            text.to_string(),
            CoordError::TooFewFields { found: 1 },
        )
    })?;

    crate::geo::normalize_point(
        &RawCoordinate::Auto(lat.trim().to_string()),
        &RawCoordinate::Auto(lon.trim().to_string()),
    )
}

/* ---------------- OUTPUT ---------------- */

// Supported report formats.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

// Errors raised while writing a report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Writes a match result in the requested format.
pub fn write_report<W: Write>(
    out: W,
    result: &MatchResult,
    format: OutputFormat,
    dms: bool,
) -> Result<(), ReportError> {
    match format {
        OutputFormat::Json => write_json(out, result),
        OutputFormat::Csv => write_csv(out, result),
        OutputFormat::Text => write_text(out, result, dms),
    }
}

fn write_json<W: Write>(mut out: W, result: &MatchResult) -> Result<(), ReportError> {
    serde_json::to_writer_pretty(&mut out, &result.records())?;
    writeln!(out)?;
    Ok(())
}

fn write_csv<W: Write>(out: W, result: &MatchResult) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_writer(out);
    for record in result.records() {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

// Label if present, coordinates otherwise.
fn describe(point: &LabeledPoint, dms: bool) -> String {
    if let Some(label) = &point.label {
        return label.clone();
    }
    if dms {
        return format!(
            "({}, {})",
            format_dms(point.point.latitude(), CoordinateKind::Latitude),
            format_dms(point.point.longitude(), CoordinateKind::Longitude)
        );
    }
    point.point.to_string()
}

fn distance_text(m: &Match) -> String {
    format!(
        "{:.2} km ({:.2} mi)",
        round(m.distance_km, 2),
        round(km_to_miles(m.distance_km), 2)
    )
}

fn write_text<W: Write>(mut out: W, result: &MatchResult, dms: bool) -> Result<(), ReportError> {
    match result {
        MatchResult::Single(single) => {
            for m in &single.matches {
                writeln!(
                    out,
                    "{} -> closest: {}, Distance: {}",
                    describe(&m.query, dms),
                    describe(&m.reference, dms),
                    distance_text(m)
                )?;
            }
        }
        MatchResult::Ranked(ranked) => {
            writeln!(
                out,
                "The {} closest to {} are:",
                ranked.matches.len(),
                describe(&ranked.query, dms)
            )?;
            for m in &ranked.matches {
                writeln!(
                    out,
                    "{} is {} away.",
                    describe(&m.reference, dms),
                    distance_text(m)
                )?;
            }
        }
        MatchResult::Grouped(grouped) => {
            for (label, m) in &grouped.entries {
                writeln!(
                    out,
                    "{}: closest {}, Distance: {}",
                    label,
                    describe(&m.reference, dms),
                    distance_text(m)
                )?;
            }
        }
    }
    Ok(())
}

/* ---------------- TEST ---------------- */
