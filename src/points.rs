// src/points.rs

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::geo::{GeoPoint, MalformedCoordinate, RawCoordinate, normalize_point};

/* ---------------- POINTS ---------------- */

/// A normalized point with the optional identity it was loaded with
/// (city name, airport name, record id). The label is never used for
/// distance computation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledPoint {
    pub point: GeoPoint,
    pub label: Option<String>,
}

impl LabeledPoint {
    pub fn new(point: GeoPoint) -> Self {
        Self { point, label: None }
    }

    pub fn labeled(point: GeoPoint, label: impl Into<String>) -> Self {
        Self {
            point,
            label: Some(label.into()),
        }
    }
}

impl From<GeoPoint> for LabeledPoint {
    fn from(point: GeoPoint) -> Self {
        Self::new(point)
    }
}

/// Ordered set of points. Insertion order is the tie-break order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointSet {
    points: Vec<LabeledPoint>,
}

impl PointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, point: impl Into<LabeledPoint>) {
        self.points.push(point.into());
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LabeledPoint> {
        self.points.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LabeledPoint> {
        self.points.iter()
    }

    pub fn as_slice(&self) -> &[LabeledPoint] {
        &self.points
    }

    // True when every point carries a label.
    pub fn is_fully_labeled(&self) -> bool {
        self.points.iter().all(|p| p.label.is_some())
    }
}

impl FromIterator<LabeledPoint> for PointSet {
    fn from_iter<I: IntoIterator<Item = LabeledPoint>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

impl FromIterator<GeoPoint> for PointSet {
    fn from_iter<I: IntoIterator<Item = GeoPoint>>(iter: I) -> Self {
        iter.into_iter().map(LabeledPoint::new).collect()
    }
}

impl<'a> IntoIterator for &'a PointSet {
    type Item = &'a LabeledPoint;
    type IntoIter = std::slice::Iter<'a, LabeledPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/* ---------------- RAW RECORDS ---------------- */

/// One input row before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub latitude: RawCoordinate,
    pub longitude: RawCoordinate,
    pub label: Option<String>,
}

impl RawRecord {
    pub fn new(latitude: impl Into<RawCoordinate>, longitude: impl Into<RawCoordinate>) -> Self {
        Self {
            latitude: latitude.into(),
            longitude: longitude.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn normalize(&self) -> Result<LabeledPoint, MalformedCoordinate> {
        let point = normalize_point(&self.latitude, &self.longitude)?;
        Ok(LabeledPoint {
            point,
            label: self.label.clone(),
        })
    }
}

/* ---------------- BATCH ---------------- */

/// Normalizes every record independently. A malformed record fails only its
/// own slot; the rest of the batch is still processed.
pub fn normalize_batch<'a, I>(records: I) -> Vec<Result<LabeledPoint, MalformedCoordinate>>
where
    I: IntoIterator<Item = &'a RawRecord>,
{
    records.into_iter().map(RawRecord::normalize).collect()
}

/// Record that failed normalization, with its position in the input.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub index: usize,
    pub error: MalformedCoordinate,
}

/// Outcome of normalizing a batch, split into a valid point set and the
/// rejected records.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub points: PointSet,
    pub rejected: Vec<RejectedRecord>,
}

impl NormalizedBatch {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a RawRecord>,
    {
        normalize_batch(records).into_iter().collect()
    }

    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Returns the points, or the first rejection when any record failed.
    pub fn into_strict(self) -> Result<PointSet, MalformedCoordinate> {
        match self.rejected.into_iter().next() {
            Some(rejected) => Err(rejected.error),
            None => Ok(self.points),
        }
    }

    /// Returns the valid points, logging every rejected record.
    pub fn into_lenient(self) -> PointSet {
        for rejected in &self.rejected {
            warn!(index = rejected.index, "skipping record: {}", rejected.error);
        }
        self.points
    }
}

impl FromIterator<Result<LabeledPoint, MalformedCoordinate>> for NormalizedBatch {
    fn from_iter<I: IntoIterator<Item = Result<LabeledPoint, MalformedCoordinate>>>(
        iter: I,
    ) -> Self {
        let mut batch = NormalizedBatch::default();
        for (index, result) in iter.into_iter().enumerate() {
            match result {
                Ok(point) => batch.points.push(point),
                Err(error) => batch.rejected.push(RejectedRecord { index, error }),
            }
        }
        batch
    }
}

/* ---------------- TEST ---------------- */
