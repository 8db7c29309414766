//! Event ingestion seam and built-in ingestors.
//!
//! Parsing recorded match files is not the engine's job. An
//! [`EventIngestor`] hands the engine a finite, restartable stream of
//! [`EventRecord`]s per match. A stream may end early with an
//! [`IngestionError`]; everything delivered before the error still counts.
//!
//! Two implementations ship with the engine:
//!
//! - [`MemoryIngestor`] -- records held in memory, with an optional
//!   injected failure point per match
//! - [`JsonLinesIngestor`] -- one JSON object per line in a file per match

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Deserialize;

use heatforge_types::{ActorId, EventKind, EventRecord, MatchId, Position};

/// Errors raised while streaming a match's events.
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    /// The ingestor has no data for the match.
    #[error("no event source registered for match {0}")]
    UnknownMatch(MatchId),

    /// The match file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file being read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A record could not be decoded.
    #[error("malformed record at line {line}: {message}")]
    Malformed {
        /// One-based line number of the bad record.
        line: usize,
        /// What the decoder reported.
        message: String,
    },

    /// The stream ended before its declared end.
    #[error("match {match_id} truncated after {delivered} records")]
    Truncated {
        /// The affected match.
        match_id: MatchId,
        /// Records delivered before the stream broke off.
        delivered: usize,
    },
}

/// A single pass over one match's events.
pub type EventStream = Box<dyn Iterator<Item = Result<EventRecord, IngestionError>> + Send>;

/// A source of per-match event streams.
///
/// Calling [`stream`](Self::stream) again for the same match restarts the
/// sequence from the beginning.
pub trait EventIngestor: Send + Sync {
    /// Open a fresh stream over `match_id`'s events.
    ///
    /// # Errors
    ///
    /// Returns an [`IngestionError`] if the stream cannot be opened at all.
    fn stream(&self, match_id: MatchId) -> Result<EventStream, IngestionError>;
}

// ---------------------------------------------------------------------------
// In-memory ingestor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MemoryMatch {
    records: Arc<Vec<EventRecord>>,
    fail_after: Option<usize>,
}

/// Serves records held in memory.
///
/// Records can be replaced at any time, which is how updated event data
/// for a match is simulated before calling `refresh_match`.
#[derive(Debug, Default)]
pub struct MemoryIngestor {
    matches: RwLock<HashMap<MatchId, MemoryMatch>>,
}

impl MemoryIngestor {
    /// Create an empty ingestor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the records of `match_id`.
    pub fn insert(&self, match_id: MatchId, records: Vec<EventRecord>) {
        self.store(match_id, records, None);
    }

    /// Register records whose stream breaks with
    /// [`IngestionError::Truncated`] after `fail_after` records.
    pub fn insert_failing(&self, match_id: MatchId, records: Vec<EventRecord>, fail_after: usize) {
        self.store(match_id, records, Some(fail_after));
    }

    /// Forget the records of `match_id`.
    pub fn remove(&self, match_id: MatchId) -> bool {
        self.matches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&match_id)
            .is_some()
    }

    fn store(&self, match_id: MatchId, records: Vec<EventRecord>, fail_after: Option<usize>) {
        self.matches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                match_id,
                MemoryMatch {
                    records: Arc::new(records),
                    fail_after,
                },
            );
    }
}

impl EventIngestor for MemoryIngestor {
    fn stream(&self, match_id: MatchId) -> Result<EventStream, IngestionError> {
        let source = self
            .matches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&match_id)
            .cloned()
            .ok_or(IngestionError::UnknownMatch(match_id))?;
        Ok(Box::new(MemoryStream {
            match_id,
            source,
            position: 0,
            done: false,
        }))
    }
}

struct MemoryStream {
    match_id: MatchId,
    source: MemoryMatch,
    position: usize,
    done: bool,
}

impl Iterator for MemoryStream {
    type Item = Result<EventRecord, IngestionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.source.fail_after == Some(self.position) {
            self.done = true;
            return Some(Err(IngestionError::Truncated {
                match_id: self.match_id,
                delivered: self.position,
            }));
        }
        let record = self.source.records.get(self.position).cloned();
        if record.is_none() {
            self.done = true;
        }
        self.position = self.position.saturating_add(1);
        record.map(Ok)
    }
}

// ---------------------------------------------------------------------------
// JSON-lines ingestor
// ---------------------------------------------------------------------------

/// One line of a JSON-lines match file.
///
/// The match identity comes from registration, not from the file.
#[derive(Debug, Deserialize)]
struct LineRecord {
    actor_id: u64,
    event_kind: EventKind,
    x: f64,
    y: f64,
    #[serde(default)]
    z: f64,
    #[serde(default)]
    tick: u64,
}

/// Streams events from JSON-lines files, one file per match.
///
/// Each non-blank line is an object such as
/// `{"actor_id": 3, "event_kind": "footstep", "x": 12.5, "y": -40.0, "tick": 812}`.
/// A line that fails to decode ends the stream with
/// [`IngestionError::Malformed`].
#[derive(Debug, Default)]
pub struct JsonLinesIngestor {
    files: RwLock<HashMap<MatchId, PathBuf>>,
}

impl JsonLinesIngestor {
    /// Create an ingestor with no registered files.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path` under a fresh match identifier.
    pub fn register(&self, path: impl Into<PathBuf>) -> MatchId {
        let match_id = MatchId::new();
        self.register_as(match_id, path);
        match_id
    }

    /// Register `path` as the event source of `match_id`.
    pub fn register_as(&self, match_id: MatchId, path: impl Into<PathBuf>) {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(match_id, path.into());
    }

    /// The file registered for `match_id`, if any.
    pub fn path_of(&self, match_id: MatchId) -> Option<PathBuf> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&match_id)
            .cloned()
    }
}

impl EventIngestor for JsonLinesIngestor {
    fn stream(&self, match_id: MatchId) -> Result<EventStream, IngestionError> {
        let path = self.path_of(match_id).ok_or(IngestionError::UnknownMatch(match_id))?;
        let file = File::open(&path).map_err(|source| IngestionError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Box::new(JsonLinesStream {
            match_id,
            path,
            lines: BufReader::new(file).lines(),
            line: 0,
            done: false,
        }))
    }
}

struct JsonLinesStream {
    match_id: MatchId,
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line: usize,
    done: bool,
}

impl JsonLinesStream {
    fn decode(&self, text: &str) -> Result<EventRecord, IngestionError> {
        let parsed: LineRecord = serde_json::from_str(text).map_err(|error| IngestionError::Malformed {
            line: self.line,
            message: error.to_string(),
        })?;
        Ok(EventRecord {
            match_id: self.match_id,
            actor_id: ActorId(parsed.actor_id),
            event_kind: parsed.event_kind,
            position: Position::new(parsed.x, parsed.y, parsed.z),
            tick: parsed.tick,
        })
    }

    fn fail(&mut self, error: IngestionError) -> Option<Result<EventRecord, IngestionError>> {
        self.done = true;
        Some(Err(error))
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for JsonLinesStream {
    type Item = Result<EventRecord, IngestionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(source) => {
                    let path = self.path().to_path_buf();
                    return self.fail(IngestionError::Io { path, source });
                }
            };
            self.line = self.line.saturating_add(1);
            if text.trim().is_empty() {
                continue;
            }
            return match self.decode(&text) {
                Ok(record) => Some(Ok(record)),
                Err(error) => self.fail(error),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn records(match_id: MatchId, count: u32) -> Vec<EventRecord> {
        (0..count)
            .map(|i| EventRecord {
                match_id,
                actor_id: ActorId(1),
                event_kind: EventKind::Footstep,
                position: Position::new(f64::from(i), 0.0, 0.0),
                tick: u64::from(i),
            })
            .collect()
    }

    #[test]
    fn memory_stream_is_restartable() {
        let ingestor = MemoryIngestor::new();
        let id = MatchId::new();
        ingestor.insert(id, records(id, 5));

        for _ in 0..2 {
            let stream = ingestor.stream(id);
            assert!(stream.is_ok());
            if let Ok(stream) = stream {
                let delivered: Vec<_> = stream.collect();
                assert_eq!(delivered.len(), 5);
                assert!(delivered.iter().all(Result::is_ok));
            }
        }
    }

    #[test]
    fn memory_stream_fails_at_injected_point() {
        let ingestor = MemoryIngestor::new();
        let id = MatchId::new();
        ingestor.insert_failing(id, records(id, 10), 4);

        let stream = ingestor.stream(id);
        assert!(stream.is_ok());
        let Ok(stream) = stream else { return };
        let delivered: Vec<_> = stream.collect();
        assert_eq!(delivered.len(), 5);
        assert_eq!(delivered.iter().filter(|r| r.is_ok()).count(), 4);
        assert!(matches!(
            delivered.last(),
            Some(Err(IngestionError::Truncated { delivered: 4, .. }))
        ));
    }

    #[test]
    fn unknown_match_is_an_error() {
        let ingestor = MemoryIngestor::new();
        assert!(matches!(ingestor.stream(MatchId::new()), Err(IngestionError::UnknownMatch(_))));
        let files = JsonLinesIngestor::new();
        assert!(matches!(files.stream(MatchId::new()), Err(IngestionError::UnknownMatch(_))));
    }

    #[test]
    fn json_lines_stop_at_malformed_line() {
        let path = std::env::temp_dir().join(format!("heatforge-ingest-{}.jsonl", MatchId::new()));
        let written = File::create(&path).and_then(|mut file| {
            writeln!(file, r#"{{"actor_id": 1, "event_kind": "footstep", "x": 1.0, "y": 2.0, "tick": 5}}"#)?;
            writeln!(file)?;
            writeln!(file, r#"{{"actor_id": 2, "event_kind": "death", "x": -3.5, "y": 4.0}}"#)?;
            writeln!(file, "not json")?;
            writeln!(file, r#"{{"actor_id": 3, "event_kind": "other", "x": 0.0, "y": 0.0}}"#)
        });
        assert!(written.is_ok());

        let ingestor = JsonLinesIngestor::new();
        let id = ingestor.register(&path);
        let stream = ingestor.stream(id);
        assert!(stream.is_ok());
        if let Ok(stream) = stream {
            let delivered: Vec<_> = stream.collect();
            assert_eq!(delivered.len(), 3);
            assert!(matches!(delivered.first(), Some(Ok(_))));
            if let Some(Ok(first)) = delivered.first() {
                assert_eq!(first.match_id, id);
                assert_eq!(first.event_kind, EventKind::Footstep);
                assert_eq!(first.tick, 5);
            }
            if let Some(Ok(second)) = delivered.get(1) {
                assert_eq!(second.event_kind, EventKind::Death);
                assert!((second.position.x - -3.5).abs() < f64::EPSILON);
            }
            assert!(matches!(delivered.last(), Some(Err(IngestionError::Malformed { line: 4, .. }))));
        }
        let _ = std::fs::remove_file(&path);
    }
}
