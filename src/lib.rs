//! Nearest-neighbor matching of geographic point sets on a spherical Earth.
//!
//! Raw coordinates (decimal, DMS, directional, symbolic) are normalized into
//! [`GeoPoint`]s, matched with the haversine metric through a naive or
//! R-tree backed search, and aggregated into one of three result shapes.
//!
//! ```no_run
//! use geonear::{GeoPoint, MatchOptions, PointSet, match_points};
//!
//! let queries: PointSet = [GeoPoint::new(0.0, 0.0)?].into_iter().collect();
//! let references: PointSet = [GeoPoint::new(0.0, 1.0)?, GeoPoint::new(1.0, 0.0)?]
//!     .into_iter()
//!     .collect();
//! let result = match_points(&queries, &references, &MatchOptions::default())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod aggregate;
pub mod config;
pub mod distance;
pub mod geo;
pub(crate) mod index;
pub mod io;
pub mod matcher;
pub mod points;

pub use aggregate::{GroupedMatches, Match, MatchRecord, MatchResult, RankedMatches, SingleMatches};
pub use config::{MatchMode, MatchOptions, ModeKind, StrategyKind};
pub use distance::haversine_km;
pub use geo::{CoordinateKind, GeoPoint, MalformedCoordinate, RawCoordinate, normalize, normalize_point};
pub use matcher::{MatchError, Matcher, match_points};
pub use points::{LabeledPoint, NormalizedBatch, PointSet, RawRecord, normalize_batch};
