// src/matcher.rs

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::aggregate::{self, GroupedMatches, Match, MatchResult, RankedMatches, SingleMatches};
use crate::config::{MatchMode, MatchOptions, StrategyKind};
use crate::distance::haversine_km;
use crate::geo::{GeoPoint, MalformedCoordinate};
use crate::index::IndexedSearch;
use crate::points::{LabeledPoint, PointSet};

/* ---------------- CONSTANTES ---------------- */

/// Two distances closer than this are treated as a tie; the reference that
/// appears first wins.
pub const TIE_TOLERANCE_KM: f64 = 1e-9;

/* ---------------- ERRORS ---------------- */

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MatchError {
    #[error("reference set is empty")]
    EmptyReferenceSet,
    #[error("query set is empty")]
    EmptyQuerySet,
    #[error("rank size must be at least 1, got {k}")]
    InvalidRankSize { k: usize },
    #[error("query point {query_index} has no label")]
    MissingLabel { query_index: usize },
    #[error(transparent)]
    MalformedCoordinate(#[from] MalformedCoordinate),
}

/* ---------------- CANDIDATES ---------------- */

// A reference point (by position in the reference set) and its distance
// to the current query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Candidate {
    pub index: usize,
    pub distance_km: f64,
}

// Running nearest-neighbor reduction for one query point.
//
// Keeps every candidate within TIE_TOLERANCE_KM of the smallest distance
// seen so far; the winner is the lowest index among them. The outcome does
// not depend on the order candidates are pushed in.
#[derive(Debug)]
pub(crate) struct NearestFold {
    min: f64,
    near: Vec<Candidate>,
}

impl NearestFold {
    pub(crate) fn new() -> Self {
        Self {
            min: f64::INFINITY,
            near: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, candidate: Candidate) {
        if candidate.distance_km < self.min {
            self.min = candidate.distance_km;
            let limit = self.min + TIE_TOLERANCE_KM;
            self.near.retain(|c| c.distance_km <= limit);
        }
        if candidate.distance_km <= self.min + TIE_TOLERANCE_KM {
            self.near.push(candidate);
        }
    }

    pub(crate) fn finish(self) -> Option<Candidate> {
        self.near.into_iter().min_by_key(|c| c.index)
    }
}

// Sorts by distance, then reorders every run of distances within
// TIE_TOLERANCE_KM of the run's closest member by index. The first item is
// the one NearestFold would pick.
pub(crate) fn sort_with_ties<T>(items: &mut [T], key: impl Fn(&T) -> (f64, usize)) {
    items.sort_by(|a, b| {
        let (da, ia) = key(a);
        let (db, ib) = key(b);
        da.total_cmp(&db).then(ia.cmp(&ib))
    });

    let mut start = 0;
    while start < items.len() {
        let limit = key(&items[start]).0 + TIE_TOLERANCE_KM;
        let run = items[start..]
            .iter()
            .take_while(|item| key(*item).0 <= limit)
            .count();
        items[start..start + run].sort_by_key(|item| key(item).1);
        start += run;
    }
}

// Heap entry ordered by (distance, index).
#[derive(Debug, Clone, Copy)]
struct RankedEntry(Candidate);

impl PartialEq for RankedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankedEntry {}

impl PartialOrd for RankedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .distance_km
            .total_cmp(&other.0.distance_km)
            .then(self.0.index.cmp(&other.0.index))
    }
}

// Bounded max-heap keeping the k smallest candidates.
//
// Candidates pushed out of the heap are kept aside while they are still
// within TIE_TOLERANCE_KM of the k-th distance, since a lower index among
// them outranks the heap's own tail.
#[derive(Debug)]
pub(crate) struct TopK {
    k: usize,
    heap: BinaryHeap<RankedEntry>,
    spill: Vec<Candidate>,
    spill_cap: usize,
}

impl TopK {
    pub(crate) fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.saturating_add(1).min(1024)),
            spill: Vec::new(),
            spill_cap: k.saturating_add(64),
        }
    }

    pub(crate) fn push(&mut self, candidate: Candidate) {
        if self.k == 0 {
            return;
        }
        self.heap.push(RankedEntry(candidate));
        if self.heap.len() > self.k {
            if let Some(RankedEntry(evicted)) = self.heap.pop() {
                self.spill.push(evicted);
            }
            if self.spill.len() > self.spill_cap {
                let limit = self.tie_limit();
                self.spill.retain(|c| c.distance_km <= limit);
                self.spill_cap = self.spill_cap.max(self.spill.len() * 2);
            }
        }
    }

    fn tie_limit(&self) -> f64 {
        self.heap
            .peek()
            .map_or(f64::INFINITY, |entry| entry.0.distance_km + TIE_TOLERANCE_KM)
    }

    // Ascending by distance, ties within tolerance by index.
    pub(crate) fn finish(self) -> Vec<Candidate> {
        let limit = self.tie_limit();
        let mut selected: Vec<Candidate> = self
            .heap
            .into_vec()
            .into_iter()
            .map(|entry| entry.0)
            .chain(self.spill.into_iter().filter(|c| c.distance_km <= limit))
            .collect();

        sort_with_ties(&mut selected, |c| (c.distance_km, c.index));
        selected.truncate(self.k);
        selected
    }
}

/* ---------------- STRATEGIES ---------------- */

// Nearest-neighbor search over a fixed reference set.
// Every implementation must return exactly what NaiveScan returns for the
// same input.
pub(crate) trait SearchStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    // `None` only for an empty reference set.
    fn nearest(&self, query: &GeoPoint) -> Option<Candidate>;

    // Up to `k` nearest references, ascending.
    fn ranked(&self, query: &GeoPoint, k: usize) -> Vec<Candidate>;
}

// Exhaustive pairwise scan, O(|references|) per query.
pub(crate) struct NaiveScan<'a> {
    references: &'a [LabeledPoint],
}

impl<'a> NaiveScan<'a> {
    pub(crate) fn new(references: &'a [LabeledPoint]) -> Self {
        Self { references }
    }

    fn candidates<'q>(&'q self, query: &'q GeoPoint) -> impl Iterator<Item = Candidate> + 'q {
        self.references
            .iter()
            .enumerate()
            .map(move |(index, reference)| Candidate {
                index,
                distance_km: haversine_km(query, &reference.point),
            })
    }
}

impl SearchStrategy for NaiveScan<'_> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Naive
    }

    fn nearest(&self, query: &GeoPoint) -> Option<Candidate> {
        let mut fold = NearestFold::new();
        self.candidates(query).for_each(|c| fold.push(c));
        fold.finish()
    }

    fn ranked(&self, query: &GeoPoint, k: usize) -> Vec<Candidate> {
        let mut top = TopK::new(k);
        self.candidates(query).for_each(|c| top.push(c));
        top.finish()
    }
}

/* ---------------- MATCHER ---------------- */

/// Matches query points against a fixed reference set.
///
/// The reference set is borrowed immutably for the matcher's lifetime and
/// shared across worker threads when `parallel` is on.
pub struct Matcher<'a> {
    references: &'a PointSet,
    strategy: Box<dyn SearchStrategy + 'a>,
    parallel: bool,
}

impl<'a> Matcher<'a> {
    pub fn new(references: &'a PointSet, options: &MatchOptions) -> Result<Self, MatchError> {
        if references.is_empty() {
            return Err(MatchError::EmptyReferenceSet);
        }

        let kind = options.resolve_strategy(references.len());
        let strategy: Box<dyn SearchStrategy + 'a> = match kind {
            StrategyKind::Indexed => Box::new(IndexedSearch::build(references.as_slice())),
            StrategyKind::Naive | StrategyKind::Auto => {
                Box::new(NaiveScan::new(references.as_slice()))
            }
        };
        debug!(
            strategy = ?strategy.kind(),
            references = references.len(),
            "matcher ready"
        );

        Ok(Self {
            references,
            strategy,
            parallel: options.parallel,
        })
    }

    /// Matcher with an explicit strategy and default options otherwise.
    pub fn with_strategy(references: &'a PointSet, strategy: StrategyKind) -> Result<Self, MatchError> {
        let options = MatchOptions {
            strategy,
            ..MatchOptions::default()
        };
        Self::new(references, &options)
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy.kind()
    }

    // Strategies only return indices into `references`.
    fn to_match(&self, query_index: usize, query: &LabeledPoint, candidate: Candidate) -> Match {
        Match {
            query_index,
            query: query.clone(),
            reference_index: candidate.index,
            reference: self.references.as_slice()[candidate.index].clone(),
            distance_km: candidate.distance_km,
        }
    }

    fn nearest_match(&self, query_index: usize, query: &LabeledPoint) -> Result<Match, MatchError> {
        let candidate = self
            .strategy
            .nearest(&query.point)
            .ok_or(MatchError::EmptyReferenceSet)?;
        Ok(self.to_match(query_index, query, candidate))
    }

    // Per-query searches, merged back in query order.
    fn nearest_all(&self, queries: &PointSet) -> Result<Vec<Match>, MatchError> {
        if self.parallel {
            queries
                .as_slice()
                .par_iter()
                .enumerate()
                .map(|(i, q)| self.nearest_match(i, q))
                .collect()
        } else {
            queries
                .iter()
                .enumerate()
                .map(|(i, q)| self.nearest_match(i, q))
                .collect()
        }
    }

    /// Nearest reference for every query point.
    pub fn nearest_to_each(&self, queries: &PointSet) -> Result<SingleMatches, MatchError> {
        Ok(aggregate::single(self.nearest_all(queries)?))
    }

    /// The `k` nearest references to a single query point.
    pub fn ranked_for_query(&self, query: &LabeledPoint, k: usize) -> Result<RankedMatches, MatchError> {
        let k = aggregate::check_rank_size(k)?;

        let matches = self
            .strategy
            .ranked(&query.point, k)
            .into_iter()
            .map(|c| self.to_match(0, query, c))
            .collect();

        aggregate::ranked(query.clone(), matches, k)
    }

    /// Nearest reference for every query point, keyed by the query label.
    pub fn grouped_by_label(&self, queries: &PointSet) -> Result<GroupedMatches, MatchError> {
        aggregate::check_labels(queries)?;
        aggregate::grouped(self.nearest_all(queries)?)
    }

    /// Runs the requested mode. Ranked mode uses the first query point.
    pub fn run(&self, queries: &PointSet, mode: MatchMode) -> Result<MatchResult, MatchError> {
        match mode {
            MatchMode::NearestToEach => self.nearest_to_each(queries).map(MatchResult::Single),
            MatchMode::RankedForQuery { k } => {
                let query = queries.get(0).ok_or(MatchError::EmptyQuerySet)?;
                if queries.len() > 1 {
                    warn!(
                        ignored = queries.len() - 1,
                        "ranked mode uses only the first query point"
                    );
                }
                self.ranked_for_query(query, k).map(MatchResult::Ranked)
            }
            MatchMode::GroupedByQueryLabel => {
                self.grouped_by_label(queries).map(MatchResult::Grouped)
            }
        }
    }
}

/// One-shot helper: builds a matcher and runs `options.mode()`.
pub fn match_points(
    queries: &PointSet,
    references: &PointSet,
    options: &MatchOptions,
) -> Result<MatchResult, MatchError> {
    Matcher::new(references, options)?.run(queries, options.mode())
}

/* ---------------- TEST ---------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::EARTH_RADIUS_KM;

    fn pt(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    fn set(points: &[(f64, f64)]) -> PointSet {
        points.iter().map(|&(lat, lon)| pt(lat, lon)).collect()
    }

    fn labeled(points: &[(&str, f64, f64)]) -> PointSet {
        points
            .iter()
            .map(|&(label, lat, lon)| LabeledPoint::labeled(pt(lat, lon), label))
            .collect()
    }

    fn naive(references: &PointSet) -> Matcher<'_> {
        Matcher::with_strategy(references, StrategyKind::Naive).unwrap()
    }

    #[test]
    fn test_equator_neighbors() {
        let references = set(&[(0.0, 1.0), (1.0, 0.0)]);
        let result = naive(&references).nearest_to_each(&set(&[(0.0, 0.0)])).unwrap();

        let m = &result.matches[0];
        assert_eq!(m.reference_index, 0);
        assert_eq!(m.reference.point, pt(0.0, 1.0));
        assert!((m.distance_km - EARTH_RADIUS_KM * 1.0_f64.to_radians()).abs() < 1e-9);
        assert!((m.distance_km - 111.19).abs() < 0.01);
    }

    #[test]
    fn test_empty_reference_set() {
        let references = PointSet::new();
        assert!(matches!(
            Matcher::new(&references, &MatchOptions::default()),
            Err(MatchError::EmptyReferenceSet)
        ));
        assert!(matches!(
            match_points(&set(&[(0.0, 0.0)]), &references, &MatchOptions::default()),
            Err(MatchError::EmptyReferenceSet)
        ));
    }

    #[test]
    fn test_equidistant_prefers_first() {
        let references = set(&[(0.0, 2.0), (0.0, -2.0), (2.0, 0.0)]);
        let result = naive(&references).nearest_to_each(&set(&[(0.0, 0.0)])).unwrap();
        assert_eq!(result.matches[0].reference_index, 0);

        let references = set(&[(0.0, -2.0), (0.0, 2.0)]);
        let result = naive(&references).nearest_to_each(&set(&[(0.0, 0.0)])).unwrap();
        assert_eq!(result.matches[0].reference_index, 0);
        assert_eq!(result.matches[0].reference.point, pt(0.0, -2.0));
    }

    #[test]
    fn test_duplicates_prefer_first() {
        let references = set(&[(5.0, 5.0), (10.0, 10.0), (10.0, 10.0)]);
        let result = naive(&references).nearest_to_each(&set(&[(10.0, 10.0)])).unwrap();
        assert_eq!(result.matches[0].reference_index, 1);
        assert_eq!(result.matches[0].distance_km, 0.0);
    }

    #[test]
    fn test_nearest_fold_tolerance() {
        let mut fold = NearestFold::new();
        fold.push(Candidate { index: 4, distance_km: 10.0 });
        fold.push(Candidate { index: 2, distance_km: 10.0 + TIE_TOLERANCE_KM / 2.0 });
        fold.push(Candidate { index: 1, distance_km: 10.1 });
        assert_eq!(fold.finish().unwrap().index, 2);

        let mut fold = NearestFold::new();
        fold.push(Candidate { index: 0, distance_km: 10.0 });
        fold.push(Candidate { index: 1, distance_km: 9.0 });
        assert_eq!(fold.finish().unwrap().index, 1);

        assert!(NearestFold::new().finish().is_none());
    }

    #[test]
    fn test_ranked_for_query() {
        let references = set(&[(0.0, 5.0), (0.0, 1.0), (0.0, 3.0), (0.0, 2.0)]);
        let query = LabeledPoint::new(pt(0.0, 0.0));
        let result = naive(&references).ranked_for_query(&query, 3).unwrap();

        let order: Vec<_> = result.matches.iter().map(|m| m.reference_index).collect();
        assert_eq!(order, vec![1, 3, 2]);
        assert!(result.matches.windows(2).all(|w| w[0].distance_km <= w[1].distance_km));
    }

    #[test]
    fn test_ranked_near_pole_tie_agrees_with_nearest() {
        // Both references sit 10° from the pole; the distances differ only by
        // rounding.
        let references = set(&[(80.0, 41.0), (80.0, -40.5)]);
        let queries = set(&[(90.0, 0.0)]);
        let query = LabeledPoint::new(pt(90.0, 0.0));

        for strategy in [StrategyKind::Naive, StrategyKind::Indexed] {
            let matcher = Matcher::with_strategy(&references, strategy).unwrap();
            let nearest = matcher.nearest_to_each(&queries).unwrap();
            let ranked = matcher.ranked_for_query(&query, 1).unwrap();

            assert_eq!(nearest.matches[0].reference_index, 0, "{strategy:?}");
            assert_eq!(ranked.matches[0].reference_index, 0, "{strategy:?}");

            let order: Vec<_> = matcher
                .ranked_for_query(&query, 2)
                .unwrap()
                .matches
                .iter()
                .map(|m| m.reference_index)
                .collect();
            assert_eq!(order, vec![0, 1], "{strategy:?}");
        }
    }

    #[test]
    fn test_matches_carry_their_reference() {
        let references = labeled(&[("A", 0.0, 3.0), ("B", 0.0, 1.0), ("C", 0.0, 2.0)]);
        let query = LabeledPoint::new(pt(0.0, 0.0));
        let ranked = naive(&references).ranked_for_query(&query, 3).unwrap();

        for m in &ranked.matches {
            assert_eq!(Some(&m.reference), references.get(m.reference_index));
            assert_eq!(m.query, query);
        }
        assert_eq!(ranked.matches[0].reference.label.as_deref(), Some("B"));
    }

    #[test]
    fn test_top_k_keeps_evicted_near_ties() {
        let mut top = TopK::new(2);
        top.push(Candidate { index: 5, distance_km: 1.0 });
        top.push(Candidate { index: 7, distance_km: 2.0 });
        top.push(Candidate { index: 3, distance_km: 2.0 + TIE_TOLERANCE_KM / 2.0 });
        top.push(Candidate { index: 1, distance_km: 2.5 });

        let order: Vec<_> = top.finish().iter().map(|c| c.index).collect();
        assert_eq!(order, vec![5, 3]);
    }

    #[test]
    fn test_sort_with_ties_groups_from_closest() {
        let mut items = vec![(1.0 + 8e-10, 0), (1.0, 4), (1.0 + 1.6e-9, 1), (3.0, 2)];
        sort_with_ties(&mut items, |&(d, i)| (d, i));
        let order: Vec<_> = items.iter().map(|&(_, i)| i).collect();
        // The third value is within tolerance of the second but not the first.
        assert_eq!(order, vec![0, 4, 1, 2]);
    }

    #[test]
    fn test_ranked_length_is_capped() {
        let references = set(&[(0.0, 5.0), (0.0, 1.0)]);
        let query = LabeledPoint::new(pt(0.0, 0.0));
        let result = naive(&references).ranked_for_query(&query, 10).unwrap();
        assert_eq!(result.matches.len(), 2);
    }

    #[test]
    fn test_ranked_invalid_k() {
        let references = set(&[(0.0, 5.0)]);
        let query = LabeledPoint::new(pt(0.0, 0.0));
        assert!(matches!(
            naive(&references).ranked_for_query(&query, 0),
            Err(MatchError::InvalidRankSize { k: 0 })
        ));
    }

    #[test]
    fn test_run_ranked_uses_first_query() {
        let references = set(&[(0.0, 5.0), (0.0, 1.0)]);
        let matcher = naive(&references);

        let result = matcher
            .run(&set(&[(0.0, 0.0), (0.0, 6.0)]), MatchMode::RankedForQuery { k: 1 })
            .unwrap();
        match result {
            MatchResult::Ranked(ranked) => {
                assert_eq!(ranked.query.point, pt(0.0, 0.0));
                assert_eq!(ranked.matches[0].reference_index, 1);
            }
            other => panic!("unexpected result {other:?}"),
        }

        assert!(matches!(
            matcher.run(&PointSet::new(), MatchMode::RankedForQuery { k: 1 }),
            Err(MatchError::EmptyQuerySet)
        ));
    }

    #[test]
    fn test_grouped_cities_to_airports() {
        let airports = labeled(&[
            ("Logan International", 42.3656, -71.0096),
            ("Charles de Gaulle", 49.0097, 2.5479),
            ("Heathrow", 51.47, -0.4543),
        ]);
        let cities = labeled(&[
            ("Boston", 42.3601, -71.0589),
            ("London", 51.5074, -0.1278),
            ("Paris", 48.8566, 2.3522),
        ]);

        let result = naive(&airports).grouped_by_label(&cities).unwrap();
        let airport = |city: &str| result.get(city).unwrap().reference.label.clone().unwrap();
        assert_eq!(airport("Boston"), "Logan International");
        assert_eq!(airport("London"), "Heathrow");
        assert_eq!(airport("Paris"), "Charles de Gaulle");
    }

    #[test]
    fn test_grouped_missing_label() {
        let airports = labeled(&[("Heathrow", 51.47, -0.4543)]);
        let mut cities = labeled(&[("London", 51.5074, -0.1278)]);
        cities.push(pt(48.8566, 2.3522));

        assert!(matches!(
            naive(&airports).run(&cities, MatchMode::GroupedByQueryLabel),
            Err(MatchError::MissingLabel { query_index: 1 })
        ));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let references: PointSet = (0..200)
            .map(|i| pt((i as f64 * 0.83) % 180.0 - 90.0, (i as f64 * 7.31) % 360.0 - 180.0))
            .collect();
        let queries: PointSet = (0..300)
            .map(|i| pt((i as f64 * 1.37) % 180.0 - 90.0, (i as f64 * 3.77) % 360.0 - 180.0))
            .collect();

        let sequential = MatchOptions {
            strategy: StrategyKind::Naive,
            parallel: false,
            ..MatchOptions::default()
        };
        let parallel = MatchOptions {
            parallel: true,
            ..sequential.clone()
        };

        let a = match_points(&queries, &references, &sequential).unwrap();
        let b = match_points(&queries, &references, &parallel).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_deterministic_repeats() {
        let references = set(&[(0.0, 1.0), (1.0, 0.0), (0.0, -1.0), (-1.0, 0.0)]);
        let queries = set(&[(0.0, 0.0), (0.5, 0.5)]);
        let options = MatchOptions::default();

        let first = match_points(&queries, &references, &options).unwrap();
        for _ in 0..10 {
            assert_eq!(match_points(&queries, &references, &options).unwrap(), first);
        }
    }
}
