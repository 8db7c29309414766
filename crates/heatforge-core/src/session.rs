//! Session orchestration.
//!
//! A session is a working set of matches shown over one active map. The
//! [`SessionManager`] owns every open session and exposes the viewer-facing
//! API: open and close sessions, change their matches or map, and request
//! heatmaps.
//!
//! # Lifecycle
//!
//! ```text
//! Empty --add--> Loading --first match folded--> Ready --close--> Closed
//!                   ^                              |
//!                   +------- more matches ---------+  (Ready stays servable)
//! ```
//!
//! # Concurrency
//!
//! Each match is folded by its own worker task (bounded by a semaphore
//! shared across sessions) on a blocking thread. Finished partials are
//! merged into the session under its state mutex, which is the single
//! merge point. Every ingestion carries a generation number; a result
//! whose generation is no longer current (match removed or refreshed, map
//! switched) is discarded there.
//!
//! Requests snapshot the state under the same mutex, then release it and
//! go through the session's two cache partitions: `grids` for the density
//! grid at the level chosen for a request and `rasters` for tone-mapped
//! output. Changing only the tone controls therefore re-runs tone mapping
//! alone.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, Semaphore, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use heatforge_cache::{CacheEntry, CacheError, CacheKey, CachePayload, CacheStats, CacheStore};
use heatforge_grid::{DownsampleEngine, Grid, GridLayout, KindGrids};
use heatforge_render::{Raster, ToneMapper};
use heatforge_types::{HeatmapParams, MapId, MatchId, SessionId, ToneParams};

use crate::config::EngineConfig;
use crate::error::SessionError;
use crate::ingest::EventIngestor;
use crate::maps::MapProvider;
use crate::pipeline::{self, Admission, GridSource, KindTotals, LevelPolicy, MatchDiagnostics, MatchIngest, PipelineError};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No match has been aggregated and none is loading.
    Empty,
    /// Matches are being ingested; nothing is servable yet.
    Loading,
    /// At least one match is aggregated; heatmaps are servable.
    Ready,
    /// The session has been closed.
    Closed,
}

/// Snapshot of a session for display.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// The session.
    pub session_id: SessionId,
    /// Lifecycle phase.
    pub phase: SessionPhase,
    /// Whether any match is still being ingested (may be `true` while
    /// `Ready`).
    pub loading: bool,
    /// The map heatmaps are drawn over.
    pub active_map: MapId,
    /// Matches whose partials are merged and servable.
    pub ready_matches: BTreeSet<MatchId>,
    /// Matches still being ingested.
    pub pending_matches: BTreeSet<MatchId>,
    /// Per-match ingestion outcome for the active map.
    pub diagnostics: BTreeMap<MatchId, MatchDiagnostics>,
    /// Grid cache partition statistics.
    pub grid_cache: CacheStats,
    /// Raster cache partition statistics.
    pub raster_cache: CacheStats,
    /// Bytes held by the full-resolution partials of ready matches and the
    /// running totals. These live outside both cache budgets.
    pub resident_bytes: usize,
    /// When the session was opened.
    pub opened_at: DateTime<Utc>,
}

/// A rendered heatmap and what went into it.
#[derive(Debug, Clone)]
pub struct Heatmap {
    /// The tone-mapped raster.
    pub raster: Arc<Raster>,
    /// Resolution level the raster was rendered at (0 is full resolution).
    pub resolution_level: u32,
    /// Matches whose events are included.
    pub match_ids: BTreeSet<MatchId>,
    /// Requested matches left out because they are not ready.
    pub omitted_matches: BTreeSet<MatchId>,
}

// ---------------------------------------------------------------------------
// Session internals
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PendingMatch {
    generation: u64,
    worker: AbortHandle,
}

#[derive(Debug)]
struct ReadyMatch {
    generation: u64,
    partials: Arc<KindGrids>,
}

#[derive(Debug)]
struct SessionState {
    closed: bool,
    active_map: MapId,
    layout: GridLayout,
    loaded: BTreeSet<MatchId>,
    pending: BTreeMap<MatchId, PendingMatch>,
    ready: BTreeMap<MatchId, ReadyMatch>,
    totals: Arc<KindTotals>,
    diagnostics: BTreeMap<MatchId, MatchDiagnostics>,
    /// Bumped whenever a match's data is invalidated.
    revisions: BTreeMap<MatchId, u64>,
    next_generation: u64,
}

impl SessionState {
    fn new(active_map: MapId, layout: GridLayout) -> Self {
        Self {
            closed: false,
            active_map,
            layout,
            loaded: BTreeSet::new(),
            pending: BTreeMap::new(),
            ready: BTreeMap::new(),
            totals: Arc::new(KindTotals::default()),
            diagnostics: BTreeMap::new(),
            revisions: BTreeMap::new(),
            next_generation: 0,
        }
    }

    const fn ensure_open(&self, session_id: SessionId) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::SessionNotFound(session_id));
        }
        Ok(())
    }

    fn revision(&self, match_id: MatchId) -> u64 {
        self.revisions.get(&match_id).copied().unwrap_or(0)
    }

    fn bump_revision(&mut self, match_id: MatchId) {
        let next = self.revision(match_id).saturating_add(1);
        self.revisions.insert(match_id, next);
    }

    /// Drop a match's merged data and rebuild the running totals.
    fn forget_ready(&mut self, match_id: MatchId) -> Result<(), SessionError> {
        self.diagnostics.remove(&match_id);
        if self.ready.remove(&match_id).is_some() {
            let totals = KindTotals::from_partials(self.ready.values().map(|ready| ready.partials.as_ref()))?;
            self.totals = Arc::new(totals);
        }
        Ok(())
    }

    fn phase(&self) -> SessionPhase {
        if self.closed {
            SessionPhase::Closed
        } else if !self.ready.is_empty() {
            SessionPhase::Ready
        } else if !self.pending.is_empty() {
            SessionPhase::Loading
        } else {
            SessionPhase::Empty
        }
    }
}

/// What a request needs from the session state, captured under the lock.
#[derive(Debug)]
struct RequestSnapshot {
    map_id: MapId,
    layout: GridLayout,
    effective: BTreeSet<MatchId>,
    omitted: BTreeSet<MatchId>,
    revisions: BTreeMap<MatchId, u64>,
    source: GridSource,
}

#[derive(Debug)]
struct Session {
    id: SessionId,
    opened_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    grids: CacheStore,
    rasters: CacheStore,
    /// Number of in-flight ingestion workers.
    idle: watch::Sender<usize>,
}

impl Session {
    fn publish_pending(&self, state: &SessionState) {
        self.idle.send_replace(state.pending.len());
    }

    /// Merge point for finished ingestion workers.
    async fn complete(&self, match_id: MatchId, generation: u64, outcome: Result<MatchIngest, String>) {
        let mut state = self.state.lock().await;
        let current = !state.closed
            && state
                .pending
                .get(&match_id)
                .is_some_and(|pending| pending.generation == generation);
        if !current {
            debug!(session = %self.id, match_id = %match_id, generation, "Discarding stale ingestion result");
            return;
        }
        state.pending.remove(&match_id);

        let merged = outcome.and_then(|ingest| {
            let mut totals = KindTotals::clone(&state.totals);
            totals.absorb(&ingest.partials).map_err(|error| error.to_string())?;
            Ok((ingest, totals))
        });

        match merged {
            Ok((ingest, totals)) => {
                let events = ingest.diagnostics.events;
                if let Some(error) = &ingest.diagnostics.ingestion_error {
                    warn!(
                        session = %self.id,
                        match_id = %match_id,
                        accepted = events.accepted,
                        error = %error,
                        "Match ingested with partial data"
                    );
                } else {
                    info!(
                        session = %self.id,
                        match_id = %match_id,
                        accepted = events.accepted,
                        out_of_range = events.out_of_range,
                        non_finite = events.non_finite,
                        "Match ingested"
                    );
                }
                state.totals = Arc::new(totals);
                state.ready.insert(
                    match_id,
                    ReadyMatch {
                        generation,
                        partials: Arc::new(ingest.partials),
                    },
                );
                state.diagnostics.insert(match_id, ingest.diagnostics);
            }
            Err(message) => {
                warn!(session = %self.id, match_id = %match_id, error = %message, "Match ingestion failed");
                state.diagnostics.insert(
                    match_id,
                    MatchDiagnostics {
                        ingestion_error: Some(message),
                        ..MatchDiagnostics::default()
                    },
                );
            }
        }
        self.publish_pending(&state);
    }

    async fn snapshot(&self, params: &HeatmapParams) -> Result<RequestSnapshot, SessionError> {
        let state = self.state.lock().await;
        state.ensure_open(self.id)?;
        if params.map_id != state.active_map {
            return Err(SessionError::InactiveMap {
                requested: params.map_id.clone(),
                active: state.active_map.clone(),
            });
        }
        if state.ready.is_empty() {
            return Err(SessionError::NotReady(self.id));
        }

        let effective: BTreeSet<MatchId> = params
            .active_match_ids
            .iter()
            .filter(|id| state.ready.contains_key(*id))
            .copied()
            .collect();
        let omitted: BTreeSet<MatchId> = params.active_match_ids.difference(&effective).copied().collect();
        if !omitted.is_empty() {
            warn!(
                session = %self.id,
                omitted = omitted.len(),
                served = effective.len(),
                "Requested matches are not ready; serving without them"
            );
        }

        let source = if effective.len() == state.ready.len() {
            GridSource::Totals(Arc::clone(&state.totals))
        } else {
            GridSource::Matches(
                effective
                    .iter()
                    .filter_map(|id| state.ready.get(id))
                    .map(|ready| Arc::clone(&ready.partials))
                    .collect(),
            )
        };
        let revisions = effective.iter().map(|id| (*id, state.revision(*id))).collect();

        Ok(RequestSnapshot {
            map_id: state.active_map.clone(),
            layout: state.layout,
            effective,
            omitted,
            revisions,
            source,
        })
    }

    /// Returns `true` if none of the snapshot's matches were invalidated
    /// since it was taken.
    async fn unchanged_since(&self, snapshot: &RequestSnapshot) -> bool {
        let state = self.state.lock().await;
        snapshot
            .revisions
            .iter()
            .all(|(id, revision)| state.revision(*id) == *revision)
    }

    async fn invalidate_match(&self, match_id: MatchId) -> usize {
        let grids = self.grids.invalidate_match(match_id).await;
        let rasters = self.rasters.invalidate_match(match_id).await;
        grids.saturating_add(rasters)
    }
}

// ---------------------------------------------------------------------------
// Ingestion worker
// ---------------------------------------------------------------------------

struct IngestWorker {
    session: Arc<Session>,
    ingestor: Arc<dyn EventIngestor>,
    permits: Arc<Semaphore>,
    map_id: MapId,
    layout: GridLayout,
    match_id: MatchId,
    generation: u64,
}

impl IngestWorker {
    async fn run(self) {
        let outcome = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => {
                let ingestor = Arc::clone(&self.ingestor);
                let map_id = self.map_id.clone();
                let layout = self.layout;
                let match_id = self.match_id;
                let joined = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    pipeline::ingest_match(&*ingestor, &map_id, layout, match_id)
                })
                .await;
                match joined {
                    Ok(Ok(ingest)) => Ok(ingest),
                    Ok(Err(error)) => Err(error.to_string()),
                    Err(error) => Err(format!("ingestion worker failed: {error}")),
                }
            }
            Err(closed) => Err(closed.to_string()),
        };
        self.session.complete(self.match_id, self.generation, outcome).await;
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Settings {
    policy: LevelPolicy,
    downsampler: DownsampleEngine,
    mapper: ToneMapper,
    default_tone: ToneParams,
    grid_budget_bytes: usize,
    raster_budget_bytes: usize,
}

/// Owns every open session and serves the viewer-facing API.
pub struct SessionManager {
    ingestor: Arc<dyn EventIngestor>,
    maps: Arc<dyn MapProvider>,
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    permits: Arc<Semaphore>,
    settings: Settings,
}

impl SessionManager {
    /// Create a manager reading events from `ingestor` and map metadata
    /// from `maps`.
    pub fn new(config: &EngineConfig, ingestor: Arc<dyn EventIngestor>, maps: Arc<dyn MapProvider>) -> Self {
        let settings = Settings {
            policy: LevelPolicy {
                max_render_cells: config.grid.max_render_cells,
                max_grid_bytes: config.grid.max_grid_bytes,
            },
            downsampler: DownsampleEngine::new(config.grid.min_dimension),
            mapper: ToneMapper::new(config.render.palette),
            default_tone: config.render.default_tone,
            grid_budget_bytes: config.cache.grid_budget_bytes,
            raster_budget_bytes: config.cache.raster_budget_bytes,
        };
        Self {
            ingestor,
            maps,
            sessions: RwLock::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(config.ingest.max_parallel_matches.max(1))),
            settings,
        }
    }

    /// Tone controls from the configuration, for callers without their own.
    pub const fn default_tone(&self) -> ToneParams {
        self.settings.default_tone
    }

    /// Identifiers of every open session.
    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().copied().collect()
    }

    /// Open a session over `match_ids` drawn on `active_map` and start
    /// ingesting every match in the background.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Map`] or [`SessionError::Layout`] if the map
    /// cannot be resolved into a grid layout.
    pub async fn open_session(
        &self,
        match_ids: impl IntoIterator<Item = MatchId>,
        active_map: MapId,
    ) -> Result<SessionId, SessionError> {
        let layout = self.resolve_layout(&active_map)?;
        let session_id = SessionId::new();
        let (idle, _) = watch::channel(0);
        let session = Arc::new(Session {
            id: session_id,
            opened_at: Utc::now(),
            state: Mutex::new(SessionState::new(active_map, layout)),
            grids: CacheStore::new("grids", self.settings.grid_budget_bytes),
            rasters: CacheStore::new("rasters", self.settings.raster_budget_bytes),
            idle,
        });

        let mut state = session.state.lock().await;
        for match_id in match_ids {
            if state.loaded.insert(match_id) {
                self.start_ingestion(&session, &mut state, match_id);
            }
        }
        session.publish_pending(&state);
        info!(
            session = %session_id,
            map = %state.active_map,
            grid = %layout.describe(),
            matches = state.loaded.len(),
            "Session opened"
        );
        drop(state);

        self.sessions.write().await.insert(session_id, Arc::clone(&session));
        Ok(session_id)
    }

    /// Close a session, cancel its ingestion, and release its cache
    /// partitions. Later calls with this identifier fail with
    /// [`SessionError::SessionNotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionNotFound`] if the session is not open.
    pub async fn close_session(&self, session_id: SessionId) -> Result<(), SessionError> {
        let session = self
            .sessions
            .write()
            .await
            .remove(&session_id)
            .ok_or(SessionError::SessionNotFound(session_id))?;

        let mut state = session.state.lock().await;
        state.closed = true;
        for pending in std::mem::take(&mut state.pending).into_values() {
            pending.worker.abort();
        }
        session.publish_pending(&state);
        drop(state);

        let released = session.grids.clear().await.saturating_add(session.rasters.clear().await);
        info!(session = %session_id, released_entries = released, "Session closed");
        Ok(())
    }

    /// Load another match into the session. Already-loaded matches are
    /// left alone.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionNotFound`] if the session is not open.
    pub async fn add_match(&self, session_id: SessionId, match_id: MatchId) -> Result<(), SessionError> {
        let session = self.session(session_id).await?;
        let mut state = session.state.lock().await;
        state.ensure_open(session_id)?;
        if !state.loaded.insert(match_id) {
            debug!(session = %session_id, match_id = %match_id, "Match already loaded");
            return Ok(());
        }
        self.start_ingestion(&session, &mut state, match_id);
        session.publish_pending(&state);
        info!(session = %session_id, match_id = %match_id, "Match added");
        Ok(())
    }

    /// Unload a match and invalidate every cached entry it contributed to.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownMatch`] if the match is not loaded.
    pub async fn remove_match(&self, session_id: SessionId, match_id: MatchId) -> Result<(), SessionError> {
        let session = self.session(session_id).await?;
        let mut state = session.state.lock().await;
        state.ensure_open(session_id)?;
        if !state.loaded.remove(&match_id) {
            return Err(SessionError::UnknownMatch { session_id, match_id });
        }
        if let Some(pending) = state.pending.remove(&match_id) {
            pending.worker.abort();
        }
        state.bump_revision(match_id);
        state.forget_ready(match_id)?;
        session.publish_pending(&state);
        drop(state);

        let invalidated = session.invalidate_match(match_id).await;
        info!(session = %session_id, match_id = %match_id, invalidated, "Match removed");
        Ok(())
    }

    /// Re-ingest a match whose event data changed, invalidating every
    /// cached entry it contributed to.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownMatch`] if the match is not loaded.
    pub async fn refresh_match(&self, session_id: SessionId, match_id: MatchId) -> Result<(), SessionError> {
        let session = self.session(session_id).await?;
        let mut state = session.state.lock().await;
        state.ensure_open(session_id)?;
        if !state.loaded.contains(&match_id) {
            return Err(SessionError::UnknownMatch { session_id, match_id });
        }
        state.bump_revision(match_id);
        state.forget_ready(match_id)?;
        self.start_ingestion(&session, &mut state, match_id);
        session.publish_pending(&state);
        drop(state);

        let invalidated = session.invalidate_match(match_id).await;
        info!(session = %session_id, match_id = %match_id, invalidated, "Match refreshed");
        Ok(())
    }

    /// Switch the session to another map and re-ingest every loaded match
    /// for it. Entries cached for the previous map stay until evicted.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Map`] or [`SessionError::Layout`] if the new
    /// map cannot be resolved.
    pub async fn set_active_map(&self, session_id: SessionId, map_id: MapId) -> Result<(), SessionError> {
        let session = self.session(session_id).await?;
        let layout = self.resolve_layout(&map_id)?;
        let mut state = session.state.lock().await;
        state.ensure_open(session_id)?;
        if state.active_map == map_id {
            return Ok(());
        }

        let previous = std::mem::replace(&mut state.active_map, map_id);
        state.layout = layout;
        state.ready.clear();
        state.totals = Arc::new(KindTotals::default());
        state.diagnostics.clear();
        let loaded: Vec<MatchId> = state.loaded.iter().copied().collect();
        for match_id in loaded {
            self.start_ingestion(&session, &mut state, match_id);
        }
        session.publish_pending(&state);
        info!(
            session = %session_id,
            from = %previous,
            to = %state.active_map,
            matches = state.loaded.len(),
            "Active map changed"
        );
        Ok(())
    }

    /// Render the heatmap described by `params`.
    ///
    /// Only matches that are both requested and ready contribute; the rest
    /// are reported in [`Heatmap::omitted_matches`]. The resolution level is
    /// chosen automatically: the finest level within the configured cell
    /// and memory limits, or the coarsest level if none is.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidParams`] for unusable tone controls,
    /// [`SessionError::InactiveMap`] if `params` names another map,
    /// [`SessionError::NotReady`] before any match is aggregated, and
    /// [`SessionError::Cache`] if computing the grid or raster fails.
    pub async fn request_heatmap(&self, session_id: SessionId, params: &HeatmapParams) -> Result<Heatmap, SessionError> {
        if let Some(field) = params.tone.first_invalid_field() {
            return Err(SessionError::InvalidParams { field });
        }
        let session = self.session(session_id).await?;
        let snapshot = session.snapshot(params).await?;
        let heatmap = self.render(&session, params, &snapshot).await?;

        if !session.unchanged_since(&snapshot).await {
            // Matches were invalidated while this request computed; drop
            // what it may have stored under their identity.
            let removed_grids = session
                .grids
                .invalidate_where(|key| key.map_id == snapshot.map_id && key.match_ids == snapshot.effective)
                .await;
            let removed_rasters = session
                .rasters
                .invalidate_where(|key| key.map_id == snapshot.map_id && key.match_ids == snapshot.effective)
                .await;
            debug!(
                session = %session_id,
                removed = removed_grids.saturating_add(removed_rasters),
                "Dropped entries computed from invalidated data"
            );
        }
        Ok(heatmap)
    }

    /// Re-render with changed parameters. Identical to
    /// [`request_heatmap`](Self::request_heatmap): a pure cache lookup or
    /// compute that changes no session state beyond access bookkeeping.
    ///
    /// # Errors
    ///
    /// See [`request_heatmap`](Self::request_heatmap).
    pub async fn update_params(&self, session_id: SessionId, params: &HeatmapParams) -> Result<Heatmap, SessionError> {
        self.request_heatmap(session_id, params).await
    }

    /// Current phase, match sets, diagnostics, and cache statistics.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionNotFound`] if the session is not open.
    pub async fn status(&self, session_id: SessionId) -> Result<SessionStatus, SessionError> {
        let session = self.session(session_id).await?;
        let state = session.state.lock().await;
        let phase = state.phase();
        let active_map = state.active_map.clone();
        let ready_matches = state.ready.keys().copied().collect();
        let pending_matches: BTreeSet<MatchId> = state.pending.keys().copied().collect();
        let diagnostics = state.diagnostics.clone();
        let resident_bytes = state
            .ready
            .values()
            .map(|ready| ready.partials.size_bytes())
            .fold(state.totals.size_bytes(), usize::saturating_add);
        drop(state);

        Ok(SessionStatus {
            session_id,
            phase,
            loading: !pending_matches.is_empty(),
            active_map,
            ready_matches,
            pending_matches,
            diagnostics,
            grid_cache: session.grids.stats().await,
            raster_cache: session.rasters.stats().await,
            resident_bytes,
            opened_at: session.opened_at,
        })
    }

    /// Wait until no ingestion worker of the session is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionNotFound`] if the session is not open.
    pub async fn wait_idle(&self, session_id: SessionId) -> Result<(), SessionError> {
        let session = self.session(session_id).await?;
        let mut idle = session.idle.subscribe();
        if idle.wait_for(|pending| *pending == 0).await.is_err() {
            debug!(session = %session_id, "Session dropped while waiting for ingestion");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn session(&self, session_id: SessionId) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or(SessionError::SessionNotFound(session_id))
    }

    fn resolve_layout(&self, map_id: &MapId) -> Result<GridLayout, SessionError> {
        let info = self.maps.map_info(map_id)?;
        Ok(GridLayout::for_map(&info)?)
    }

    /// Spawn a worker folding `match_id` for the session's current map,
    /// superseding any worker already running for it.
    fn start_ingestion(&self, session: &Arc<Session>, state: &mut SessionState, match_id: MatchId) {
        state.next_generation = state.next_generation.saturating_add(1);
        let generation = state.next_generation;
        if let Some(previous) = state.pending.remove(&match_id) {
            previous.worker.abort();
        }
        let worker = IngestWorker {
            session: Arc::clone(session),
            ingestor: Arc::clone(&self.ingestor),
            permits: Arc::clone(&self.permits),
            map_id: state.active_map.clone(),
            layout: state.layout,
            match_id,
            generation,
        };
        let handle = tokio::spawn(worker.run());
        state.pending.insert(
            match_id,
            PendingMatch {
                generation,
                worker: handle.abort_handle(),
            },
        );
        debug!(session = %session.id, match_id = %match_id, generation, "Ingestion started");
    }

    /// Pick the first resolution level whose layout is admitted, build
    /// only that grid, then tone-map it.
    ///
    /// Levels are judged by their layout before anything is allocated, so
    /// rejected levels never exist in memory or in the grid cache.
    async fn render(
        &self,
        session: &Session,
        params: &HeatmapParams,
        snapshot: &RequestSnapshot,
    ) -> Result<Heatmap, SessionError> {
        let filter = params.event_kind_filter;
        let contributors = snapshot.effective.len();
        let downsampler = self.settings.downsampler;
        let mut layout = snapshot.layout;
        let mut level: u32 = 0;
        loop {
            let terminal = downsampler.is_terminal_layout(&layout);
            match self.settings.policy.admit(&layout, level, contributors, terminal) {
                Ok(Admission::Accept) => break,
                Ok(Admission::TooManyCells { cells, limit }) => {
                    debug!(session = %session.id, level, cells, limit, "Level exceeds render cell limit");
                }
                Err(PipelineError::ResourceExhausted {
                    level,
                    size_bytes,
                    limit_bytes,
                }) => {
                    warn!(session = %session.id, level, size_bytes, limit_bytes, "Grid would exceed memory ceiling; trying a coarser level");
                }
                Err(other) => return Err(other.into()),
            }
            layout = layout.coarser();
            level = level.saturating_add(1);
        }

        let key = CacheKey::grid(session.id, snapshot.map_id.clone(), filter, snapshot.effective.clone(), level);
        let digest = key.digest();
        let source = snapshot.source.clone();
        let map_id = snapshot.map_id.clone();
        let base = snapshot.layout;
        let entry = session
            .grids
            .get_or_compute(key, move || {
                compute_blocking(digest, move || {
                    source
                        .compose(&map_id, base, filter, &downsampler, level)
                        .map(CachePayload::from)
                })
            })
            .await?;

        let grid = grid_of(&entry)?;
        let raster_key = entry.key().raster(&params.tone);
        let digest = raster_key.digest();
        let mapper = self.settings.mapper;
        let tone = params.tone;
        let raster_entry = session
            .rasters
            .get_or_compute(raster_key, move || {
                compute_blocking(digest, move || mapper.render(&grid, &tone).map(CachePayload::from))
            })
            .await?;
        let raster = raster_entry
            .raster()
            .cloned()
            .ok_or_else(|| CacheError::compute(raster_entry.key().digest(), "entry holds no raster"))?;

        debug!(
            session = %session.id,
            level = entry.key().resolution_level,
            width = raster.width(),
            height = raster.height(),
            matches = snapshot.effective.len(),
            "Heatmap served"
        );
        Ok(Heatmap {
            raster,
            resolution_level: entry.key().resolution_level,
            match_ids: snapshot.effective.clone(),
            omitted_matches: snapshot.omitted.clone(),
        })
    }
}

/// Run a pure pipeline step on a blocking thread, mapping failures into
/// the cache's error type for the key with `digest`.
async fn compute_blocking<F, E>(digest: String, work: F) -> Result<CachePayload, CacheError>
where
    F: FnOnce() -> Result<CachePayload, E> + Send + 'static,
    E: Display + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(error)) => Err(CacheError::compute(digest, error.to_string())),
        Err(error) => Err(CacheError::compute(digest, format!("worker failed: {error}"))),
    }
}

fn grid_of(entry: &CacheEntry) -> Result<Arc<Grid>, SessionError> {
    entry
        .grid()
        .cloned()
        .ok_or_else(|| CacheError::compute(entry.key().digest(), "entry holds no grid").into())
}
