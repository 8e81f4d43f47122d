// src/geo.rs

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/* ---------------- DOMAIN TYPES ---------------- */

// Indicates whether a coordinate is a latitude or a longitude.
// Used to apply correct bounds and valid directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateKind {
    Latitude,
    Longitude,
}

impl CoordinateKind {
    // Largest absolute value allowed on this axis.
    pub fn limit(self) -> f64 {
        match self {
            CoordinateKind::Latitude => 90.0,
            CoordinateKind::Longitude => 180.0,
        }
    }
}

impl fmt::Display for CoordinateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinateKind::Latitude => write!(f, "latitude"),
            CoordinateKind::Longitude => write!(f, "longitude"),
        }
    }
}

// Identifies which field failed during parsing.
// This allows precise and explicit error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordField {
    Deg,
    Min,
    Sec,
    Dir,
}

// Human-readable representation of a coordinate field
// used in error messages.
impl fmt::Display for CoordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoordField::Deg => "degrees",
            CoordField::Min => "minutes",
            CoordField::Sec => "seconds",
            CoordField::Dir => "direction",
        };
        write!(f, "{s}")
    }
}

// Compass direction attached to a textual coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    // Accepts single letters and full words, any case.
    // `O` / `OUEST` is the French spelling of west.
    fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "N" | "NORTH" => Some(Direction::North),
            "S" | "SOUTH" => Some(Direction::South),
            "E" | "EAST" => Some(Direction::East),
            "W" | "WEST" | "O" | "OUEST" => Some(Direction::West),
            _ => None,
        }
    }

    fn axis(self) -> CoordinateKind {
        match self {
            Direction::North | Direction::South => CoordinateKind::Latitude,
            Direction::East | Direction::West => CoordinateKind::Longitude,
        }
    }

    fn is_negative(self) -> bool {
        matches!(self, Direction::South | Direction::West)
    }
}

/// A canonical position in signed decimal degrees.
///
/// Both fields are finite and within range; the only way to build one is
/// through [`GeoPoint::new`] or the normalizer, so holders never re-validate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

impl GeoPoint {
    /// Builds a point from decimal degrees, rejecting non-finite or
    /// out-of-range values.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, MalformedCoordinate> {
        let latitude = check_range(latitude, CoordinateKind::Latitude).map_err(|source| {
            MalformedCoordinate::new(CoordinateKind::Latitude, latitude.to_string(), source)
        })?;
        let longitude = check_range(longitude, CoordinateKind::Longitude).map_err(|source| {
            MalformedCoordinate::new(CoordinateKind::Longitude, longitude.to_string(), source)
        })?;

        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

// Internal normalized representation of a parsed sexagesimal coordinate.
// This structure is NOT exposed outside this module.
#[derive(PartialEq)]
struct Coordinate {
    deg: f64,
    min: f64,
    sec: f64,
    negative: bool,
    dir: Option<Direction>,
}

// How the fields of a sexagesimal coordinate are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldRules {
    // Symbol-delimited input: minutes and seconds below 60, marker on the
    // matching axis.
    Strict,
    // Whitespace triplets: fields are summed as given, any marker axis.
    Lenient,
}

/* ---------------- ERRORS ---------------- */

// Reason a single coordinate value could not be normalized.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordError {
    #[error("no numeric component")]
    NoNumeral,
    #[error("expected at least 2 DMS fields, found {found}")]
    TooFewFields { found: usize },
    #[error("expected at most 3 DMS fields, found {found}")]
    TooManyFields { found: usize },
    #[error("invalid {field} field")]
    InvalidField { field: CoordField },
    #[error("invalid minutes value `{min}`")]
    InvalidMinutes { min: f64 },
    #[error("invalid seconds value `{sec}`")]
    InvalidSeconds { sec: f64 },
    #[error("value `{value}` out of range")]
    OutOfRange { value: f64 },
    #[error("value is not finite")]
    NotFinite,
    #[error("direction `{0}` does not belong to this axis")]
    InvalidDirection(String),
    #[error("unrecognized coordinate format")]
    InvalidFormat,
}

/// A raw coordinate that could not be turned into signed decimal degrees.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("malformed {kind} `{input}`: {source}")]
pub struct MalformedCoordinate {
    pub kind: CoordinateKind,
    pub input: String,
    #[source]
    pub source: CoordError,
}

impl MalformedCoordinate {
    pub fn new(kind: CoordinateKind, input: String, source: CoordError) -> Self {
        Self {
            kind,
            input,
            source,
        }
    }
}

/* ---------------- RAW INPUT ---------------- */

/// One coordinate value as it arrives from a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "format", content = "value")]
pub enum RawCoordinate {
    /// Already numeric decimal degrees.
    Decimal(f64),
    /// Whitespace separated `degrees minutes [seconds]`, e.g. `40 26 46`.
    Dms(String),
    /// A numeral with an optional compass marker, e.g. `73.9857 W`.
    Directional(String),
    /// Symbol-delimited DMS or DDM, e.g. `48°51'29"N` or `48° 51.492' N`.
    Symbolic(String),
    /// Free text; the format is detected from its shape.
    Auto(String),
}

impl From<f64> for RawCoordinate {
    fn from(value: f64) -> Self {
        RawCoordinate::Decimal(value)
    }
}

impl fmt::Display for RawCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawCoordinate::Decimal(v) => write!(f, "{v}"),
            RawCoordinate::Dms(s)
            | RawCoordinate::Directional(s)
            | RawCoordinate::Symbolic(s)
            | RawCoordinate::Auto(s) => write!(f, "{s}"),
        }
    }
}

/* ---------------- NORMALIZATION ---------------- */

/// Converts one raw coordinate into signed decimal degrees on the given axis.
pub fn normalize(raw: &RawCoordinate, kind: CoordinateKind) -> Result<f64, MalformedCoordinate> {
    let value = match raw {
        RawCoordinate::Decimal(v) => check_range(*v, kind),
        RawCoordinate::Dms(s) => dms_triplet_to_dd(s, kind),
        RawCoordinate::Directional(s) => directional_to_dd(s, kind),
        RawCoordinate::Symbolic(s) => symbolic_to_dd(s, kind),
        RawCoordinate::Auto(s) => auto_to_dd(s, kind),
    };

    value.map_err(|source| MalformedCoordinate::new(kind, raw.to_string(), source))
}

/// Normalizes a latitude / longitude pair into a [`GeoPoint`].
pub fn normalize_point(
    latitude: &RawCoordinate,
    longitude: &RawCoordinate,
) -> Result<GeoPoint, MalformedCoordinate> {
    let lat = normalize(latitude, CoordinateKind::Latitude)?;
    let lon = normalize(longitude, CoordinateKind::Longitude)?;

    Ok(GeoPoint {
        latitude: lat,
        longitude: lon,
    })
}

// Final gate for every decimal value leaving this module.
fn check_range(value: f64, kind: CoordinateKind) -> Result<f64, CoordError> {
    if !value.is_finite() {
        return Err(CoordError::NotFinite);
    }
    if value.abs() > kind.limit() {
        return Err(CoordError::OutOfRange { value });
    }
    Ok(value)
}

// Validates a parsed coordinate and converts it to decimal degrees.
// This function is the single source of truth for sexagesimal rules.
fn coordinate_to_dd(
    coord: Coordinate,
    kind: CoordinateKind,
    rules: FieldRules,
) -> Result<f64, CoordError> {
    let strict = rules == FieldRules::Strict;

    if coord.deg < 0.0 {
        return Err(CoordError::InvalidField {
            field: CoordField::Deg,
        });
    }
    if coord.min < 0.0 || (strict && coord.min >= 60.0) {
        return Err(CoordError::InvalidMinutes { min: coord.min });
    }
    if coord.sec < 0.0 || (strict && coord.sec >= 60.0) {
        return Err(CoordError::InvalidSeconds { sec: coord.sec });
    }

    let mut negative = coord.negative;
    if let Some(dir) = coord.dir {
        if strict && dir.axis() != kind {
            return Err(CoordError::InvalidDirection(format!("{dir:?}")));
        }
        // A signed value and a compass marker together are ambiguous.
        if coord.negative {
            return Err(CoordError::InvalidField {
                field: CoordField::Dir,
            });
        }
        negative = dir.is_negative();
    }

    let magnitude = coord.deg + (coord.min / 60.0) + (coord.sec / 3600.0);
    let value = if negative { -magnitude } else { magnitude };

    check_range(value, kind)
}

// Parses one numeric field, refusing `inf` / `NaN` spellings.
fn parse_field(token: &str, field: CoordField) -> Result<f64, CoordError> {
    let value: f64 = token
        .trim()
        .parse()
        .map_err(|_| CoordError::InvalidField { field })?;
    if !value.is_finite() {
        return Err(CoordError::InvalidField { field });
    }
    Ok(value)
}

/* ---------------- DMS TRIPLET ---------------- */

// Parses `degrees minutes [seconds] [direction]`.
fn dms_triplet_to_dd(input: &str, kind: CoordinateKind) -> Result<f64, CoordError> {
    let mut tokens: Vec<&str> = input.split_whitespace().collect();

    let dir = match tokens.last().and_then(|t| Direction::from_token(t)) {
        Some(dir) => {
            tokens.pop();
            Some(dir)
        }
        None => None,
    };

    if tokens.len() < 2 {
        return Err(CoordError::TooFewFields {
            found: tokens.len(),
        });
    }
    if tokens.len() > 3 {
        return Err(CoordError::TooManyFields {
            found: tokens.len(),
        });
    }

    let deg = parse_field(tokens[0], CoordField::Deg)?;
    let min = parse_field(tokens[1], CoordField::Min)?;
    let sec = match tokens.get(2) {
        Some(token) => parse_field(token, CoordField::Sec)?,
        None => 0.0,
    };

    let coord = Coordinate {
        deg: deg.abs(),
        min,
        sec,
        negative: tokens[0].trim_start().starts_with('-'),
        dir,
    };
    coordinate_to_dd(coord, kind, FieldRules::Lenient)
}

/* ---------------- DIRECTIONAL ---------------- */

// First signed or unsigned decimal numeral in the string.
static NUMERAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?[0-9]*\.?[0-9]+").expect("Invalid numeral regex"));

// Compass marker standing alone, not inside a longer word.
static DIRECTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^A-Z])(NORTH|SOUTH|EAST|WEST|OUEST|N|S|E|W|O)(?:[^A-Z]|$)")
        .expect("Invalid direction regex")
});

// Parses values such as `73.9857 W`, `12.3S` or `N 40.5`.
fn directional_to_dd(input: &str, kind: CoordinateKind) -> Result<f64, CoordError> {
    let numeral = NUMERAL_RE.find(input).ok_or(CoordError::NoNumeral)?;
    let value = parse_field(numeral.as_str(), CoordField::Deg)?;

    let dir = DIRECTION_RE
        .captures(input)
        .and_then(|caps| caps.get(1))
        .and_then(|m| Direction::from_token(m.as_str()));

    // The marker only decides the sign, whatever axis it names.
    let value = match dir {
        Some(dir) if dir.is_negative() => -value.abs(),
        Some(_) => value.abs(),
        None => value,
    };

    check_range(value, kind)
}

/* ---------------- SYMBOLIC DMS / DDM ---------------- */

// Regex for Degrees / Minutes / Seconds format.
// Supports ASCII and Unicode symbols.
static DMS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?ix)^\s*
            (.+?)      # degrees
            \s*°\s*
            (.+?)      # minutes
            \s*['′]\s*
            (.+?)      # seconds
            \s*["″]\s*
            (\S+)      # direction
            \s*$"#,
    )
    .expect("Invalid DMS regex")
});

// Regex for Degrees / Decimal Minutes format.
static DDM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?ix)^\s*
            (.+?)      # degrees
            \s*°\s*
            (.+?)      # minutes
            \s*['′]\s*
            (\S+)      # direction
            \s*$"#,
    )
    .expect("Invalid DDM regex")
});

// Parses a symbol-delimited DMS or DDM string and converts it to decimal degrees.
fn symbolic_to_dd(input: &str, kind: CoordinateKind) -> Result<f64, CoordError> {
    let (deg, min, sec, dir) = if let Some(caps) = DMS_RE.captures(input) {
        let sec = parse_field(&caps[3], CoordField::Sec)?;
        (caps[1].to_string(), caps[2].to_string(), sec, caps[4].to_string())
    } else if let Some(caps) = DDM_RE.captures(input) {
        (caps[1].to_string(), caps[2].to_string(), 0.0, caps[3].to_string())
    } else {
        return Err(CoordError::InvalidFormat);
    };

    let deg_value = parse_field(&deg, CoordField::Deg)?;
    let min = parse_field(&min, CoordField::Min)?;
    let dir = Direction::from_token(dir.trim()).ok_or(CoordError::InvalidField {
        field: CoordField::Dir,
    })?;

    let coord = Coordinate {
        deg: deg_value,
        min,
        sec,
        negative: false,
        dir: Some(dir),
    };
    coordinate_to_dd(coord, kind, FieldRules::Strict)
}

/* ---------------- AUTO DETECTION ---------------- */

const SYMBOL_MARKS: &[char] = &['°', '\'', '′', '"', '″'];

// Picks a parser from the shape of the text.
fn auto_to_dd(input: &str, kind: CoordinateKind) -> Result<f64, CoordError> {
    let trimmed = input.trim();

    if trimmed.contains(SYMBOL_MARKS) {
        return symbolic_to_dd(trimmed, kind);
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        return check_range(value, kind);
    }

    let numeric_tokens = trimmed
        .split_whitespace()
        .filter(|t| t.parse::<f64>().is_ok())
        .count();
    if numeric_tokens >= 2 {
        return dms_triplet_to_dd(trimmed, kind);
    }

    directional_to_dd(trimmed, kind)
}

/* ---------------- FORMATTING ---------------- */

// Converts decimal degrees to a DMS string.
// This function does not perform validation.
pub fn format_dms(value: f64, kind: CoordinateKind) -> String {
    let dir = match kind {
        CoordinateKind::Latitude if value >= 0.0 => 'N',
        CoordinateKind::Latitude => 'S',
        CoordinateKind::Longitude if value >= 0.0 => 'E',
        CoordinateKind::Longitude => 'W',
    };

    // Work in hundredths of a second so rounding carries into minutes.
    let total = (value.abs() * 360_000.0).round() as u64;
    let deg = total / 360_000;
    let min = (total % 360_000) / 6_000;
    let sec = (total % 6_000) as f64 / 100.0;

    format!("{deg}°{min}'{sec:.2}\"{dir}")
}

/* ---------------- TEST ---------------- */
