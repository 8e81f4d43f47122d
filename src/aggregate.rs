// src/aggregate.rs

use serde::Serialize;

use crate::matcher::{MatchError, sort_with_ties};
use crate::points::LabeledPoint;

/* ---------------- MATCH ---------------- */

/// One query point paired with a reference point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub query_index: usize,
    pub query: LabeledPoint,
    pub reference_index: usize,
    pub reference: LabeledPoint,
    pub distance_km: f64,
}

/// Flat row form of a [`Match`], ready for CSV or JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRecord {
    pub query_label: Option<String>,
    pub query_lat: f64,
    pub query_lon: f64,
    pub ref_label: Option<String>,
    pub ref_lat: f64,
    pub ref_lon: f64,
    pub distance_km: f64,
}

impl Match {
    pub fn record(&self) -> MatchRecord {
        MatchRecord {
            query_label: self.query.label.clone(),
            query_lat: self.query.point.latitude(),
            query_lon: self.query.point.longitude(),
            ref_label: self.reference.label.clone(),
            ref_lat: self.reference.point.latitude(),
            ref_lon: self.reference.point.longitude(),
            distance_km: self.distance_km,
        }
    }
}

/* ---------------- RESULT SHAPES ---------------- */

/// One match per query point, in query order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SingleMatches {
    pub matches: Vec<Match>,
}

/// Matches for one fixed query point, ascending by distance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedMatches {
    pub query: LabeledPoint,
    pub matches: Vec<Match>,
}

/// Nearest match per query label, in query order.
///
/// Duplicate labels stay as separate entries; [`GroupedMatches::get`]
/// returns the first one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupedMatches {
    pub entries: Vec<(String, Match)>,
}

impl GroupedMatches {
    pub fn get(&self, label: &str) -> Option<&Match> {
        self.entries
            .iter()
            .find(|(key, _)| key == label)
            .map(|(_, m)| m)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum MatchResult {
    Single(SingleMatches),
    Ranked(RankedMatches),
    Grouped(GroupedMatches),
}

impl MatchResult {
    pub fn matches(&self) -> Vec<&Match> {
        match self {
            MatchResult::Single(single) => single.matches.iter().collect(),
            MatchResult::Ranked(ranked) => ranked.matches.iter().collect(),
            MatchResult::Grouped(grouped) => grouped.entries.iter().map(|(_, m)| m).collect(),
        }
    }

    pub fn records(&self) -> Vec<MatchRecord> {
        self.matches().into_iter().map(Match::record).collect()
    }
}

/* ---------------- AGGREGATION ---------------- */

// k must be at least one for a ranked query.
pub fn check_rank_size(k: usize) -> Result<usize, MatchError> {
    if k == 0 {
        return Err(MatchError::InvalidRankSize { k });
    }
    Ok(k)
}

// Every query needs a label before grouping.
pub fn check_labels<'a, I>(queries: I) -> Result<(), MatchError>
where
    I: IntoIterator<Item = &'a LabeledPoint>,
{
    match queries.into_iter().position(|q| q.label.is_none()) {
        Some(query_index) => Err(MatchError::MissingLabel { query_index }),
        None => Ok(()),
    }
}

pub fn single(mut matches: Vec<Match>) -> SingleMatches {
    matches.sort_by_key(|m| m.query_index);
    SingleMatches { matches }
}

/// Orders matches for `query` ascending by distance (ties within the
/// matcher's tolerance by reference order) and keeps the first `k`.
pub fn ranked(query: LabeledPoint, mut matches: Vec<Match>, k: usize) -> Result<RankedMatches, MatchError> {
    let k = check_rank_size(k)?;

    sort_with_ties(&mut matches, |m| (m.distance_km, m.reference_index));
    matches.truncate(k);

    Ok(RankedMatches { query, matches })
}

pub fn grouped(matches: Vec<Match>) -> Result<GroupedMatches, MatchError> {
    let SingleMatches { matches } = single(matches);
    check_labels(matches.iter().map(|m| &m.query))?;

    let entries = matches
        .into_iter()
        .filter_map(|m| m.query.label.clone().map(|label| (label, m)))
        .collect();

    Ok(GroupedMatches { entries })
}

/* ---------------- TEST ---------------- */
