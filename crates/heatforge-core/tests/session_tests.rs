//! Integration tests for the session API: background ingestion, cache
//! reuse, invalidation, partial matches, and resolution level selection.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use std::sync::{Arc, Barrier};

use futures::future::join_all;
use heatforge_core::config::EngineConfig;
use heatforge_core::ingest::{EventIngestor, EventStream, IngestionError, MemoryIngestor};
use heatforge_core::maps::{MapProvider, StaticMapProvider};
use heatforge_core::{SessionError, SessionManager, SessionPhase};
use heatforge_types::{
    ActorId, EventKind, EventKindFilter, EventRecord, HeatmapParams, MapId, MapInfo, MatchId, Position, ToneParams,
};

const MAP: &str = "de_test";
const OTHER_MAP: &str = "de_other";

// =========================================================================
// Helpers
// =========================================================================

/// A 100x100 map with one world unit per cell, and a smaller second map.
fn maps() -> Arc<dyn MapProvider> {
    Arc::new(
        StaticMapProvider::new()
            .with_map(MapInfo::from_radar(MapId::from(MAP), 0.0, 100.0, 1.0, 100, 100))
            .with_map(MapInfo::from_radar(MapId::from(OTHER_MAP), 0.0, 50.0, 1.0, 50, 50)),
    )
}

/// `count` footsteps of one actor, all inside the same cell.
fn footsteps(match_id: MatchId, count: u64) -> Vec<EventRecord> {
    (0..count)
        .map(|tick| EventRecord {
            match_id,
            actor_id: ActorId(1),
            event_kind: EventKind::Footstep,
            position: Position::new(10.5, 10.5, 0.0),
            tick,
        })
        .collect()
}

fn params(matches: impl IntoIterator<Item = MatchId>) -> HeatmapParams {
    HeatmapParams::new(MapId::from(MAP), EventKindFilter::Any, matches)
}

fn manager(config: &EngineConfig, ingestor: Arc<dyn EventIngestor>) -> SessionManager {
    SessionManager::new(config, ingestor, maps())
}

fn assert_max_count(heatmap: &heatforge_core::Heatmap, expected: f64) {
    let actual = heatmap.raster.max_count();
    assert!((actual - expected).abs() < 1e-9, "max count {actual}, expected {expected}");
}

/// Serves records only after the test releases the gate.
struct GatedIngestor {
    inner: MemoryIngestor,
    gate: Barrier,
}

impl EventIngestor for GatedIngestor {
    fn stream(&self, match_id: MatchId) -> Result<EventStream, IngestionError> {
        self.gate.wait();
        self.inner.stream(match_id)
    }
}

// =========================================================================
// Caching
// =========================================================================

#[tokio::test]
async fn repeated_request_is_served_from_cache() {
    let ingestor = Arc::new(MemoryIngestor::new());
    let (a, b) = (MatchId::new(), MatchId::new());
    ingestor.insert(a, footsteps(a, 10));
    ingestor.insert(b, footsteps(b, 10));
    let engine = manager(&EngineConfig::default(), ingestor);

    let session = engine.open_session([a, b], MapId::from(MAP)).await.unwrap();
    engine.wait_idle(session).await.unwrap();

    let first = engine.request_heatmap(session, &params([a, b])).await.unwrap();
    let computed = engine.status(session).await.unwrap().grid_cache.computations;
    let second = engine.request_heatmap(session, &params([b, a])).await.unwrap();
    let status = engine.status(session).await.unwrap();

    assert_eq!(first.raster, second.raster);
    assert_eq!(first.resolution_level, 0);
    assert_eq!(first.match_ids.len(), 2);
    assert!(first.omitted_matches.is_empty());
    assert_max_count(&first, 20.0);
    assert_eq!(status.grid_cache.computations, computed);
    assert_eq!(status.raster_cache.computations, 1);
    assert!(status.raster_cache.hits >= 1);
}

#[tokio::test]
async fn tone_change_reuses_the_grid() {
    let ingestor = Arc::new(MemoryIngestor::new());
    let a = MatchId::new();
    ingestor.insert(a, footsteps(a, 10));
    let engine = manager(&EngineConfig::default(), ingestor);
    let session = engine.open_session([a], MapId::from(MAP)).await.unwrap();
    engine.wait_idle(session).await.unwrap();

    let plain = engine.request_heatmap(session, &params([a])).await.unwrap();
    let before = engine.status(session).await.unwrap();

    let tone = ToneParams {
        gamma: 2.0,
        contrast: 1.5,
        ..ToneParams::IDENTITY
    };
    let toned = engine.update_params(session, &params([a]).with_tone(tone)).await.unwrap();
    let after = engine.status(session).await.unwrap();

    assert_eq!(after.grid_cache.computations, before.grid_cache.computations);
    assert_eq!(after.raster_cache.computations, before.raster_cache.computations + 1);
    assert_eq!(plain.raster.width(), toned.raster.width());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_computation() {
    let ingestor = Arc::new(MemoryIngestor::new());
    let (a, b) = (MatchId::new(), MatchId::new());
    ingestor.insert(a, footsteps(a, 10));
    ingestor.insert(b, footsteps(b, 5));
    let engine = Arc::new(manager(&EngineConfig::default(), ingestor));
    let session = engine.open_session([a, b], MapId::from(MAP)).await.unwrap();
    engine.wait_idle(session).await.unwrap();

    let requests = (0..16).map(|_| {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.request_heatmap(session, &params([a, b])).await })
    });
    let heatmaps: Vec<_> = join_all(requests)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert!(heatmaps.windows(2).all(|pair| pair[0].raster == pair[1].raster));
    let status = engine.status(session).await.unwrap();
    assert_eq!(status.grid_cache.computations, 1);
    assert_eq!(status.raster_cache.computations, 1);
}

// =========================================================================
// Match set changes
// =========================================================================

#[tokio::test]
async fn removing_a_match_invalidates_its_entries() {
    let ingestor = Arc::new(MemoryIngestor::new());
    let (a, b) = (MatchId::new(), MatchId::new());
    ingestor.insert(a, footsteps(a, 10));
    ingestor.insert(b, footsteps(b, 10));
    let engine = manager(&EngineConfig::default(), ingestor);
    let session = engine.open_session([a, b], MapId::from(MAP)).await.unwrap();
    engine.wait_idle(session).await.unwrap();

    engine.request_heatmap(session, &params([a, b])).await.unwrap();
    engine.request_heatmap(session, &params([a])).await.unwrap();
    assert_eq!(engine.status(session).await.unwrap().grid_cache.entries, 2);

    engine.remove_match(session, b).await.unwrap();
    let status = engine.status(session).await.unwrap();
    assert_eq!(status.grid_cache.entries, 1);
    assert!(!status.ready_matches.contains(&b));

    let heatmap = engine.request_heatmap(session, &params([a, b])).await.unwrap();
    assert_max_count(&heatmap, 10.0);
    assert!(heatmap.omitted_matches.contains(&b));

    let again = engine.remove_match(session, b).await;
    assert!(matches!(again, Err(SessionError::UnknownMatch { match_id, .. }) if match_id == b));
}

#[tokio::test]
async fn subset_requests_only_count_active_matches() {
    let ingestor = Arc::new(MemoryIngestor::new());
    let (a, b) = (MatchId::new(), MatchId::new());
    ingestor.insert(a, footsteps(a, 10));
    ingestor.insert(b, footsteps(b, 3));
    let engine = manager(&EngineConfig::default(), ingestor);
    let session = engine.open_session([a, b], MapId::from(MAP)).await.unwrap();
    engine.wait_idle(session).await.unwrap();

    let only_b = engine.request_heatmap(session, &params([b])).await.unwrap();
    assert_max_count(&only_b, 3.0);

    let stranger = MatchId::new();
    let with_stranger = engine.request_heatmap(session, &params([a, stranger])).await.unwrap();
    assert_max_count(&with_stranger, 10.0);
    assert_eq!(with_stranger.match_ids.len(), 1);
    assert!(with_stranger.omitted_matches.contains(&stranger));

    let none = engine.request_heatmap(session, &params(Vec::new())).await.unwrap();
    assert!(none.raster.is_blank());
}

#[tokio::test]
async fn refresh_picks_up_new_event_data() {
    let ingestor = Arc::new(MemoryIngestor::new());
    let a = MatchId::new();
    ingestor.insert(a, footsteps(a, 10));
    let engine = manager(&EngineConfig::default(), Arc::clone(&ingestor) as Arc<dyn EventIngestor>);
    let session = engine.open_session([a], MapId::from(MAP)).await.unwrap();
    engine.wait_idle(session).await.unwrap();
    assert_max_count(&engine.request_heatmap(session, &params([a])).await.unwrap(), 10.0);

    ingestor.insert(a, footsteps(a, 30));
    engine.refresh_match(session, a).await.unwrap();
    engine.wait_idle(session).await.unwrap();

    assert_max_count(&engine.request_heatmap(session, &params([a])).await.unwrap(), 30.0);
}

#[tokio::test]
async fn adding_a_loaded_match_is_a_no_op() {
    let ingestor = Arc::new(MemoryIngestor::new());
    let a = MatchId::new();
    ingestor.insert(a, footsteps(a, 4));
    let engine = manager(&EngineConfig::default(), ingestor);
    let session = engine.open_session([a], MapId::from(MAP)).await.unwrap();
    engine.wait_idle(session).await.unwrap();

    engine.add_match(session, a).await.unwrap();
    let status = engine.status(session).await.unwrap();
    assert!(status.pending_matches.is_empty());
    assert_eq!(status.phase, SessionPhase::Ready);
}

// =========================================================================
// Partial data
// =========================================================================

#[tokio::test]
async fn partial_match_is_served_and_flagged() {
    let ingestor = Arc::new(MemoryIngestor::new());
    let (a, b) = (MatchId::new(), MatchId::new());
    ingestor.insert(a, footsteps(a, 10));
    ingestor.insert_failing(b, footsteps(b, 10), 4);
    let engine = manager(&EngineConfig::default(), ingestor);
    let session = engine.open_session([a, b], MapId::from(MAP)).await.unwrap();
    engine.wait_idle(session).await.unwrap();

    let status = engine.status(session).await.unwrap();
    assert!(status.ready_matches.contains(&b));
    assert!(status.diagnostics[&b].is_partial());
    assert!(!status.diagnostics[&a].is_partial());
    assert_eq!(status.diagnostics[&b].events.accepted, 4);

    let heatmap = engine.request_heatmap(session, &params([a, b])).await.unwrap();
    assert_max_count(&heatmap, 14.0);
    assert!(heatmap.match_ids.contains(&b));
}

#[tokio::test]
async fn unknown_match_contributes_nothing() {
    let ingestor = Arc::new(MemoryIngestor::new());
    let (a, missing) = (MatchId::new(), MatchId::new());
    ingestor.insert(a, footsteps(a, 6));
    let engine = manager(&EngineConfig::default(), ingestor);
    let session = engine.open_session([a, missing], MapId::from(MAP)).await.unwrap();
    engine.wait_idle(session).await.unwrap();

    let status = engine.status(session).await.unwrap();
    assert!(status.diagnostics[&missing].is_partial());

    let heatmap = engine.request_heatmap(session, &params([a, missing])).await.unwrap();
    assert_max_count(&heatmap, 6.0);
}

// =========================================================================
// Validation
// =========================================================================

#[tokio::test]
async fn requests_for_another_map_are_rejected() {
    let ingestor = Arc::new(MemoryIngestor::new());
    let a = MatchId::new();
    ingestor.insert(a, footsteps(a, 10));
    let engine = manager(&EngineConfig::default(), ingestor);
    let session = engine.open_session([a], MapId::from(MAP)).await.unwrap();
    engine.wait_idle(session).await.unwrap();

    let other = HeatmapParams::new(MapId::from(OTHER_MAP), EventKindFilter::Any, [a]);
    assert!(matches!(
        engine.request_heatmap(session, &other).await,
        Err(SessionError::InactiveMap { .. })
    ));

    engine.set_active_map(session, MapId::from(OTHER_MAP)).await.unwrap();
    engine.wait_idle(session).await.unwrap();

    let heatmap = engine.request_heatmap(session, &other).await.unwrap();
    assert_eq!(heatmap.raster.width(), 50);
    assert_max_count(&heatmap, 10.0);
    assert!(matches!(
        engine.request_heatmap(session, &params([a])).await,
        Err(SessionError::InactiveMap { .. })
    ));

    let unknown = engine.set_active_map(session, MapId::from("de_nowhere")).await;
    assert!(matches!(unknown, Err(SessionError::Map(_))));
}

#[tokio::test]
async fn invalid_tone_is_rejected() {
    let ingestor = Arc::new(MemoryIngestor::new());
    let a = MatchId::new();
    ingestor.insert(a, footsteps(a, 2));
    let engine = manager(&EngineConfig::default(), ingestor);
    let session = engine.open_session([a], MapId::from(MAP)).await.unwrap();
    engine.wait_idle(session).await.unwrap();

    let tone = ToneParams {
        gamma: 0.0,
        ..ToneParams::IDENTITY
    };
    let result = engine.request_heatmap(session, &params([a]).with_tone(tone)).await;
    assert!(matches!(result, Err(SessionError::InvalidParams { field: "gamma" })));
}

#[tokio::test]
async fn unknown_map_cannot_open_a_session() {
    let engine = manager(&EngineConfig::default(), Arc::new(MemoryIngestor::new()));
    let result = engine.open_session([MatchId::new()], MapId::from("de_nowhere")).await;
    assert!(matches!(result, Err(SessionError::Map(_))));
    assert!(engine.session_ids().await.is_empty());
}

// =========================================================================
// Resolution levels
// =========================================================================

#[tokio::test]
async fn large_grids_render_at_a_coarser_level() {
    let ingestor = Arc::new(MemoryIngestor::new());
    let (a, b) = (MatchId::new(), MatchId::new());
    ingestor.insert(a, footsteps(a, 10));
    ingestor.insert(b, footsteps(b, 10));
    let mut config = EngineConfig::default();
    config.grid.max_render_cells = 1_000;
    let engine = manager(&config, ingestor);
    let session = engine.open_session([a, b], MapId::from(MAP)).await.unwrap();
    engine.wait_idle(session).await.unwrap();

    let heatmap = engine.request_heatmap(session, &params([a, b])).await.unwrap();
    assert!(heatmap.resolution_level > 0);
    let cells = u64::from(heatmap.raster.width()) * u64::from(heatmap.raster.height());
    assert!(cells <= 1_000);
    assert_max_count(&heatmap, 20.0);

    // Only the rendered level is built and cached.
    let status = engine.status(session).await.unwrap();
    assert_eq!(status.grid_cache.entries, 1);
}

#[tokio::test]
async fn memory_ceiling_falls_back_to_the_coarsest_level() {
    let ingestor = Arc::new(MemoryIngestor::new());
    let a = MatchId::new();
    ingestor.insert(a, footsteps(a, 7));
    let mut config = EngineConfig::default();
    config.grid.max_grid_bytes = 1;
    let engine = manager(&config, ingestor);
    let session = engine.open_session([a], MapId::from(MAP)).await.unwrap();
    engine.wait_idle(session).await.unwrap();

    let heatmap = engine.request_heatmap(session, &params([a])).await.unwrap();
    assert!(heatmap.resolution_level > 0);
    assert!(heatmap.raster.width() <= 4);
    assert_max_count(&heatmap, 7.0);
}

#[tokio::test]
async fn memory_ceiling_bounds_the_grid_cache() {
    let ingestor = Arc::new(MemoryIngestor::new());
    let a = MatchId::new();
    ingestor.insert(a, footsteps(a, 7));
    let mut config = EngineConfig::default();
    config.grid.max_grid_bytes = 1_000;
    let engine = manager(&config, ingestor);
    let session = engine.open_session([a], MapId::from(MAP)).await.unwrap();
    engine.wait_idle(session).await.unwrap();

    let heatmap = engine.request_heatmap(session, &params([a])).await.unwrap();
    let status = engine.status(session).await.unwrap();

    // 100x100 halves to 7x7 at level 4, the first level under 1000 bytes.
    assert_eq!(heatmap.resolution_level, 4);
    assert_max_count(&heatmap, 7.0);
    assert_eq!(status.grid_cache.entries, 1);
    assert!(status.grid_cache.total_bytes <= 1_000, "{} bytes cached", status.grid_cache.total_bytes);
    assert!(status.resident_bytes > 0);
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn phases_follow_ingestion() {
    let a = MatchId::new();
    let gated = Arc::new(GatedIngestor {
        inner: MemoryIngestor::new(),
        gate: Barrier::new(2),
    });
    gated.inner.insert(a, footsteps(a, 3));
    let engine = manager(&EngineConfig::default(), Arc::clone(&gated) as Arc<dyn EventIngestor>);

    let session = engine.open_session(Vec::new(), MapId::from(MAP)).await.unwrap();
    assert_eq!(engine.status(session).await.unwrap().phase, SessionPhase::Empty);
    assert!(matches!(
        engine.request_heatmap(session, &params([a])).await,
        Err(SessionError::NotReady(_))
    ));

    engine.add_match(session, a).await.unwrap();
    let loading = engine.status(session).await.unwrap();
    assert_eq!(loading.phase, SessionPhase::Loading);
    assert!(loading.loading);
    assert!(matches!(
        engine.request_heatmap(session, &params([a])).await,
        Err(SessionError::NotReady(_))
    ));

    let release = Arc::clone(&gated);
    tokio::task::spawn_blocking(move || {
        release.gate.wait();
    })
    .await
    .unwrap();
    engine.wait_idle(session).await.unwrap();

    let ready = engine.status(session).await.unwrap();
    assert_eq!(ready.phase, SessionPhase::Ready);
    assert!(!ready.loading);
    assert!(engine.request_heatmap(session, &params([a])).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ready_session_serves_while_another_match_loads() {
    let (a, b) = (MatchId::new(), MatchId::new());
    let gated = Arc::new(GatedIngestor {
        inner: MemoryIngestor::new(),
        gate: Barrier::new(2),
    });
    gated.inner.insert(a, footsteps(a, 4));
    gated.inner.insert(b, footsteps(b, 6));
    let engine = manager(&EngineConfig::default(), Arc::clone(&gated) as Arc<dyn EventIngestor>);
    let release = || {
        let gated = Arc::clone(&gated);
        tokio::task::spawn_blocking(move || {
            gated.gate.wait();
        })
    };

    let session = engine.open_session([a], MapId::from(MAP)).await.unwrap();
    release().await.unwrap();
    engine.wait_idle(session).await.unwrap();

    engine.add_match(session, b).await.unwrap();
    let status = engine.status(session).await.unwrap();
    assert_eq!(status.phase, SessionPhase::Ready);
    assert!(status.loading);
    assert!(status.pending_matches.contains(&b));

    let partial = engine.request_heatmap(session, &params([a, b])).await.unwrap();
    assert_eq!(partial.omitted_matches.len(), 1);
    assert!(partial.omitted_matches.contains(&b));
    assert_max_count(&partial, 4.0);

    release().await.unwrap();
    engine.wait_idle(session).await.unwrap();

    let full = engine.request_heatmap(session, &params([a, b])).await.unwrap();
    assert!(full.omitted_matches.is_empty());
    assert_eq!(full.match_ids.len(), 2);
    assert_max_count(&full, 10.0);
}

#[tokio::test]
async fn closed_sessions_are_gone() {
    let ingestor = Arc::new(MemoryIngestor::new());
    let a = MatchId::new();
    ingestor.insert(a, footsteps(a, 5));
    let engine = manager(&EngineConfig::default(), ingestor);
    let session = engine.open_session([a], MapId::from(MAP)).await.unwrap();
    engine.wait_idle(session).await.unwrap();
    engine.request_heatmap(session, &params([a])).await.unwrap();

    engine.close_session(session).await.unwrap();

    assert!(matches!(
        engine.status(session).await,
        Err(SessionError::SessionNotFound(id)) if id == session
    ));
    assert!(matches!(
        engine.request_heatmap(session, &params([a])).await,
        Err(SessionError::SessionNotFound(_))
    ));
    assert!(matches!(
        engine.close_session(session).await,
        Err(SessionError::SessionNotFound(_))
    ));
    assert!(engine.session_ids().await.is_empty());
}

#[tokio::test]
async fn sessions_do_not_share_state() {
    let ingestor = Arc::new(MemoryIngestor::new());
    let (a, b) = (MatchId::new(), MatchId::new());
    ingestor.insert(a, footsteps(a, 2));
    ingestor.insert(b, footsteps(b, 9));
    let engine = manager(&EngineConfig::default(), ingestor);
    let first = engine.open_session([a], MapId::from(MAP)).await.unwrap();
    let second = engine.open_session([b], MapId::from(MAP)).await.unwrap();
    engine.wait_idle(first).await.unwrap();
    engine.wait_idle(second).await.unwrap();

    assert_max_count(&engine.request_heatmap(first, &params([a, b])).await.unwrap(), 2.0);
    assert_max_count(&engine.request_heatmap(second, &params([a, b])).await.unwrap(), 9.0);

    engine.close_session(first).await.unwrap();
    assert!(engine.request_heatmap(second, &params([b])).await.is_ok());
}
