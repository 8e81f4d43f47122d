// src/index.rs

/*
Spatial index strategy for large reference sets.

Reference points are stored in an R-tree as unit vectors on the sphere.
Straight-line distance between unit vectors (the chord) orders points
exactly like great circle distance, so a 3-D box around the query holds
every reference within a given chord, whatever the latitude and without
any seam at ±180°. The box is grown until the answer is confirmed; final
selection goes through the same reductions as the naive scan, so both
strategies return identical results.
*/

use rstar::{AABB, RTree, RTreeObject};
use tracing::{debug, info};

use crate::config::StrategyKind;
use crate::distance::{chord_length, haversine_km, km_to_chord, unit_vector};
use crate::geo::GeoPoint;
use crate::matcher::{Candidate, NearestFold, SearchStrategy, TIE_TOLERANCE_KM, TopK};
use crate::points::LabeledPoint;

/* ---------------- CONSTANTES ---------------- */

// Largest possible chord on the unit sphere; a box this wide covers it all.
const MAX_CHORD: f64 = 2.0;
// Smallest starting box, so dense or duplicate-heavy sets still make progress.
const MIN_RADIUS: f64 = 1e-6;
// Extra slack on top of the tie tolerance, in km, absorbing rounding in the
// chord and haversine evaluations.
const SLACK_KM: f64 = 1e-3;

/* ---------------- TREE ENTRIES ---------------- */

// Reference point stored in the R-tree.
#[derive(Debug, Clone, Copy)]
struct IndexedReference {
    index: usize,
    position: [f64; 3],
}

impl RTreeObject for IndexedReference {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

/* ---------------- STRATEGY ---------------- */

pub struct IndexedSearch<'a> {
    references: &'a [LabeledPoint],
    tree: RTree<IndexedReference>,
    initial_radius: f64,
    // Chord margin that makes a candidate "confirmed".
    margin: f64,
}

impl<'a> IndexedSearch<'a> {
    // Build the R-tree over all reference points.
    pub fn build(references: &'a [LabeledPoint]) -> Self {
        let entries: Vec<IndexedReference> = references
            .iter()
            .enumerate()
            .map(|(index, reference)| IndexedReference {
                index,
                position: unit_vector(&reference.point),
            })
            .collect();

        let tree = RTree::bulk_load(entries);
        info!("Spatial index built with {} references", tree.size());

        // Typical spacing of n points spread over the unit sphere (area 4π).
        let n = references.len().max(1) as f64;
        let initial_radius = (4.0 * std::f64::consts::PI / n)
            .sqrt()
            .clamp(MIN_RADIUS, MAX_CHORD);

        Self {
            references,
            tree,
            initial_radius,
            margin: km_to_chord(TIE_TOLERANCE_KM + SLACK_KM),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    // Every reference inside the box of half-width `radius` around `origin`,
    // or all of them once the box spans the sphere.
    fn candidates(&self, query: &GeoPoint, origin: &[f64; 3], radius: f64) -> Vec<(Candidate, f64)> {
        let evaluate = |entry: &IndexedReference| {
            let candidate = Candidate {
                index: entry.index,
                distance_km: haversine_km(query, &self.references[entry.index].point),
            };
            (candidate, chord_length(origin, &entry.position))
        };

        if radius >= MAX_CHORD {
            return self.tree.iter().map(evaluate).collect();
        }

        let envelope = AABB::from_corners(
            [origin[0] - radius, origin[1] - radius, origin[2] - radius],
            [origin[0] + radius, origin[1] + radius, origin[2] + radius],
        );
        self.tree
            .locate_in_envelope(&envelope)
            .map(evaluate)
            .collect()
    }

    // A result whose chord sits at least `margin` inside the box cannot be
    // beaten, or tied, by anything outside it.
    fn confirmed(&self, chord: f64, radius: f64) -> bool {
        radius >= MAX_CHORD || chord + self.margin <= radius
    }

    fn grow(radius: f64) -> f64 {
        (radius * 2.0).min(MAX_CHORD)
    }
}

impl SearchStrategy for IndexedSearch<'_> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Indexed
    }

    fn nearest(&self, query: &GeoPoint) -> Option<Candidate> {
        if self.is_empty() {
            return None;
        }

        let origin = unit_vector(query);
        let mut radius = self.initial_radius;
        let mut rounds = 0;

        loop {
            let candidates = self.candidates(query, &origin, radius);

            let closest_chord = candidates
                .iter()
                .map(|(_, chord)| *chord)
                .min_by(f64::total_cmp);

            if let Some(chord) = closest_chord {
                if self.confirmed(chord, radius) {
                    let mut fold = NearestFold::new();
                    candidates.into_iter().for_each(|(c, _)| fold.push(c));
                    if rounds > 0 {
                        debug!(rounds, radius, "nearest confirmed after expanding");
                    }
                    return fold.finish();
                }
            }

            radius = Self::grow(radius);
            rounds += 1;
        }
    }

    fn ranked(&self, query: &GeoPoint, k: usize) -> Vec<Candidate> {
        if k == 0 || self.is_empty() {
            return Vec::new();
        }

        let origin = unit_vector(query);
        let wanted = k.min(self.len());
        let mut radius = (self.initial_radius * (wanted as f64).sqrt()).clamp(MIN_RADIUS, MAX_CHORD);
        let mut rounds = 0;

        loop {
            let candidates = self.candidates(query, &origin, radius);

            if candidates.len() >= wanted {
                let mut top = TopK::new(k);
                candidates.iter().for_each(|(c, _)| top.push(*c));
                let selected = top.finish();

                // Near-ties can lift a slightly farther reference into the
                // selection, so confirm against the farthest one kept.
                let farthest_chord = selected
                    .iter()
                    .map(|c| chord_length(&origin, &unit_vector(&self.references[c.index].point)))
                    .max_by(f64::total_cmp);

                if let Some(chord) = farthest_chord {
                    if self.confirmed(chord, radius) {
                        if rounds > 0 {
                            debug!(rounds, radius, k, "ranked set confirmed after expanding");
                        }
                        return selected;
                    }
                }
            }

            radius = Self::grow(radius);
            rounds += 1;
        }
    }
}

/* ---------------- TEST ---------------- */
