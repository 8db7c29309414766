//! Algebraic properties of aggregation and downsampling.
//!
//! Events are generated from a seeded RNG so failures are reproducible.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use heatforge_grid::{DownsampleEngine, Grid, GridLayout, SpatialAggregator};
use heatforge_types::{ActorId, EventKind, EventKindFilter, EventRecord, MapId, MatchId, Position};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

fn layout() -> GridLayout {
    GridLayout::new(-50.0, -50.0, 2.5, 40, 40).unwrap()
}

fn random_events(rng: &mut StdRng, match_id: MatchId, count: usize) -> Vec<EventRecord> {
    (0..count)
        .map(|tick| {
            let kind = match rng.random_range(0..3) {
                0 => EventKind::Footstep,
                1 => EventKind::Death,
                _ => EventKind::Other,
            };
            // Some samples fall outside the 100x100 box on purpose.
            let x = rng.random_range(-60.0..60.0);
            let y = rng.random_range(-60.0..60.0);
            EventRecord {
                match_id,
                actor_id: ActorId(rng.random_range(0..10)),
                event_kind: kind,
                position: Position::new(x, y, 0.0),
                tick: u64::try_from(tick).unwrap(),
            }
        })
        .collect()
}

#[test]
fn partitioned_aggregation_equals_single_fold() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let map = MapId::from("de_ancient");
    let aggregator = SpatialAggregator::new(map, layout());

    let matches: Vec<(MatchId, Vec<EventRecord>)> = (0..6)
        .map(|_| {
            let id = MatchId::new();
            let events = random_events(&mut rng, id, 400);
            (id, events)
        })
        .collect();

    for filter in [EventKindFilter::Any, EventKindFilter::Only(EventKind::Footstep)] {
        let all_at_once = aggregator.aggregate(filter, matches.clone()).grid;

        for _ in 0..10 {
            // Random partition into groups, merged in a random order.
            let mut shuffled = matches.clone();
            shuffled.shuffle(&mut rng);
            let split_a = rng.random_range(0..=shuffled.len());
            let split_b = rng.random_range(split_a..=shuffled.len());
            let groups = [
                shuffled[..split_a].to_vec(),
                shuffled[split_a..split_b].to_vec(),
                shuffled[split_b..].to_vec(),
            ];

            let mut partials: Vec<Grid> = groups
                .iter()
                .map(|group| aggregator.aggregate(filter, group.clone()).grid)
                .collect();
            partials.shuffle(&mut rng);

            let merged = partials
                .iter()
                .try_fold(Grid::empty(aggregator.map_id().clone(), layout(), filter), |acc, part| {
                    acc.merge(part)
                })
                .unwrap();
            assert_eq!(merged, all_at_once);
        }
    }
}

#[test]
fn merge_is_associative() {
    let mut rng = StdRng::seed_from_u64(42);
    let aggregator = SpatialAggregator::new(MapId::from("de_anubis"), layout());
    let grids: Vec<Grid> = (0..3)
        .map(|_| {
            let id = MatchId::new();
            let events = random_events(&mut rng, id, 250);
            aggregator.aggregate(EventKindFilter::Any, [(id, events)]).grid
        })
        .collect();

    let left = grids[0].merge(&grids[1]).unwrap().merge(&grids[2]).unwrap();
    let right = grids[0].merge(&grids[1].merge(&grids[2]).unwrap()).unwrap();
    assert_eq!(left, right);
}

#[test]
fn downsampling_preserves_mass_of_random_grids() {
    let mut rng = StdRng::seed_from_u64(7);
    let aggregator = SpatialAggregator::new(MapId::from("de_cache"), layout());
    let id = MatchId::new();
    let events = random_events(&mut rng, id, 2_000);
    let base = aggregator.aggregate(EventKindFilter::Any, [(id, events)]).grid;

    let levels = DownsampleEngine::default().pyramid(&base).unwrap();
    for level in &levels {
        assert!((level.total() - base.total()).abs() < 1e-6);
    }
}

#[test]
fn two_matches_of_ten_distinct_footsteps() {
    let layout = GridLayout::new(0.0, 0.0, 1.0, 100, 100).unwrap();
    let aggregator = SpatialAggregator::new(MapId::from("de_dust2"), layout);
    let first = MatchId::new();
    let second = MatchId::new();

    let footsteps = |match_id: MatchId, row: f64| -> Vec<EventRecord> {
        (0..10)
            .map(|i| EventRecord {
                match_id,
                actor_id: ActorId(1),
                event_kind: EventKind::Footstep,
                position: Position::new(f64::from(i) * 5.0 + 0.5, row, 0.0),
                tick: 0,
            })
            .collect()
    };

    let result = aggregator.aggregate(
        EventKindFilter::Only(EventKind::Footstep),
        [(first, footsteps(first, 10.5)), (second, footsteps(second, 60.5))],
    );
    assert_eq!(result.grid.nonzero_cells(), 20);
    assert!((result.grid.total() - 20.0).abs() < f64::EPSILON);
    assert_eq!(result.diagnostics.accepted, 20);
}
