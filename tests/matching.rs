// tests/matching.rs

use geonear::{
    GeoPoint, LabeledPoint, MatchError, MatchMode, MatchOptions, MatchResult, Matcher, PointSet,
    RawCoordinate, RawRecord, StrategyKind, haversine_km, match_points, normalize_batch,
    normalize_point,
};

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

// Points on a coarse grid with a few exact duplicates.
fn grid() -> PointSet {
    let mut points = PointSet::new();
    for lat in (-80..=80).step_by(10) {
        for lon in (-180..180).step_by(15) {
            points.push(pt(lat as f64, lon as f64));
        }
    }
    points.push(pt(40.0, -75.0));
    points.push(pt(0.0, 0.0));
    points
}

#[test]
fn test_nearest_on_equator() {
    let queries = set(&[(0.0, 0.0)]);
    let references = set(&[(0.0, 1.0), (1.0, 0.0)]);

    let result = match_points(&queries, &references, &MatchOptions::default()).unwrap();
    let MatchResult::Single(single) = result else {
        panic!("expected single matches");
    };

    let m = &single.matches[0];
    assert_eq!(m.reference_index, 0);
    assert_eq!(m.distance_km, haversine_km(&pt(0.0, 0.0), &pt(0.0, 1.0)));
    assert!((m.distance_km - 111.19).abs() < 0.01);
}

#[test]
fn test_empty_references_fail() {
    let queries = set(&[(0.0, 0.0)]);
    let err = match_points(&queries, &PointSet::new(), &MatchOptions::default()).unwrap_err();
    assert_eq!(err, MatchError::EmptyReferenceSet);
}

#[test]
fn test_mixed_formats_normalize() {
    let p = normalize_point(
        &RawCoordinate::Dms("40 26 46".into()),
        &RawCoordinate::Directional("73.9857 W".into()),
    )
    .unwrap();
    assert!((p.latitude() - 40.446111).abs() < 1e-6);
    assert_eq!(p.longitude(), -73.9857);

    let records = vec![
        RawRecord::new(RawCoordinate::Decimal(48.8566), RawCoordinate::Decimal(2.3522)),
        RawRecord::new(
            RawCoordinate::Directional("91 N".into()),
            RawCoordinate::Decimal(0.0),
        ),
    ];
    let results = normalize_batch(&records);
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
}

#[test]
fn test_equidistant_references_pick_first() {
    let queries = set(&[(0.0, 0.0)]);
    let references = set(&[(0.0, 1.0), (0.0, -1.0)]);

    for strategy in [StrategyKind::Naive, StrategyKind::Indexed] {
        let matcher = Matcher::with_strategy(&references, strategy).unwrap();
        let single = matcher.nearest_to_each(&queries).unwrap();
        assert_eq!(single.matches[0].reference_index, 0, "{strategy:?}");
    }
}

#[test]
fn test_strategies_agree() {
    let references = grid();
    let queries = set(&[
        (40.7, -74.0),
        (0.0, 0.0),
        (-33.9, 151.2),
        (89.9, 12.0),
        (-89.9, -170.0),
        (12.5, 179.9),
        (12.5, -179.9),
        (5.0, 7.5),
    ]);

    let naive = Matcher::with_strategy(&references, StrategyKind::Naive).unwrap();
    let indexed = Matcher::with_strategy(&references, StrategyKind::Indexed).unwrap();
    assert_eq!(indexed.strategy(), StrategyKind::Indexed);

    assert_eq!(
        naive.nearest_to_each(&queries).unwrap(),
        indexed.nearest_to_each(&queries).unwrap()
    );

    for query in &queries {
        assert_eq!(
            naive.ranked_for_query(query, 7).unwrap(),
            indexed.ranked_for_query(query, 7).unwrap()
        );
    }
}

#[test]
fn test_ranked_is_sorted_and_capped() {
    let references = grid();
    let query = LabeledPoint::new(pt(40.7, -74.0));
    let matcher = Matcher::with_strategy(&references, StrategyKind::Auto).unwrap();

    let ranked = matcher.ranked_for_query(&query, 12).unwrap();
    assert_eq!(ranked.matches.len(), 12);
    assert!(
        ranked
            .matches
            .windows(2)
            .all(|w| w[0].distance_km <= w[1].distance_km)
    );
    // (40, -75) appears twice; exact duplicates come out in reference order.
    let (first, second) = (&ranked.matches[0], &ranked.matches[1]);
    assert_eq!(first.reference.point, pt(40.0, -75.0));
    assert_eq!(second.reference.point, pt(40.0, -75.0));
    assert_eq!(second.reference_index, references.len() - 2);
    assert!(first.reference_index < second.reference_index);

    let small = set(&[(0.0, 1.0), (0.0, 2.0)]);
    let matcher = Matcher::with_strategy(&small, StrategyKind::Naive).unwrap();
    assert_eq!(matcher.ranked_for_query(&query, 5).unwrap().matches.len(), 2);
    assert_eq!(
        matcher.ranked_for_query(&query, 0).unwrap_err(),
        MatchError::InvalidRankSize { k: 0 }
    );
}

#[test]
fn test_grouped_cities() {
    let cities = labeled(&[
        ("New York", 40.7128, -74.0060),
        ("Paris", 48.8566, 2.3522),
        ("Sydney", -33.8688, 151.2093),
    ]);
    let airports = labeled(&[
        ("CDG", 49.0097, 2.5479),
        ("SYD", -33.9399, 151.1753),
        ("JFK", 40.6413, -73.7781),
        ("ORY", 48.7262, 2.3652),
    ]);

    let options = MatchOptions {
        parallel: false,
        ..MatchOptions::default()
    };
    let matcher = Matcher::new(&airports, &options).unwrap();
    let result = matcher.run(&cities, MatchMode::GroupedByQueryLabel).unwrap();
    let MatchResult::Grouped(grouped) = result else {
        panic!("expected grouped matches");
    };

    let closest = |city: &str| grouped.get(city).and_then(|m| m.reference.label.clone());
    assert_eq!(closest("New York").as_deref(), Some("JFK"));
    assert_eq!(closest("Paris").as_deref(), Some("ORY"));
    assert_eq!(closest("Sydney").as_deref(), Some("SYD"));
    assert_eq!(closest("London"), None);
}

#[test]
fn test_grouped_requires_labels() {
    let queries = set(&[(0.0, 0.0)]);
    let references = set(&[(1.0, 1.0)]);
    let matcher = Matcher::with_strategy(&references, StrategyKind::Naive).unwrap();
    assert_eq!(
        matcher.grouped_by_label(&queries).unwrap_err(),
        MatchError::MissingLabel { query_index: 0 }
    );
}

#[test]
fn test_parallel_keeps_query_order() {
    let references = grid();
    let queries: PointSet = (0..200)
        .map(|i| pt((i % 170) as f64 - 85.0, (i * 7 % 360) as f64 - 180.0))
        .collect();

    let run = |parallel: bool| {
        let options = MatchOptions {
            parallel,
            ..MatchOptions::default()
        };
        match_points(&queries, &references, &options).unwrap()
    };

    let parallel = run(true);
    assert_eq!(parallel, run(false));

    let indices: Vec<usize> = parallel.matches().iter().map(|m| m.query_index).collect();
    assert_eq!(indices, (0..200).collect::<Vec<_>>());
}
