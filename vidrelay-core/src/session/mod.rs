//! Per-upload session state and the registry that tracks live sessions.

mod registry;

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use registry::{InMemorySessionRegistry, SessionLease, SessionRegistry};

static NEXT_DISAMBIGUATOR: AtomicU64 = AtomicU64::new(0);
static CLOCK_ANCHOR: OnceLock<(u128, Instant)> = OnceLock::new();

/// Opaque, process-unique session identifier such as `process_1712345678901234567_42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(String);

impl SessionId {
    /// Allocates a new identifier from a monotonic clock reading anchored to
    /// the wall clock once per process, plus a counter so that two sessions
    /// created within the same clock tick never collide.
    pub fn generate(prefix: &str) -> Self {
        let (epoch_nanos, anchor) = CLOCK_ANCHOR.get_or_init(|| {
            let epoch_nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_nanos())
                .unwrap_or_default();
            (epoch_nanos, Instant::now())
        });
        let nanos = epoch_nanos + anchor.elapsed().as_nanos();
        let disambiguator = NEXT_DISAMBIGUATOR.fetch_add(1, Ordering::Relaxed);
        Self(format!("{prefix}_{nanos}_{disambiguator}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Receiving,
    IngestComplete,
    Processing,
}

impl SessionPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionPhase::IngestComplete,
            2 => SessionPhase::Processing,
            _ => SessionPhase::Receiving,
        }
    }
}

/// A chunk whose sequence number is not `cursor + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderingAnomaly {
    pub expected: i64,
    pub received: i64,
}

/// One upload-and-process attempt.
///
/// Counters are only ever written by the task that owns the session; other
/// tasks read them through the registry for observation.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    sequence_cursor: AtomicI64,
    bytes_received: AtomicU64,
    chunk_count: AtomicU64,
    anomalies: AtomicU64,
    phase: AtomicU8,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            sequence_cursor: AtomicI64::new(-1),
            bytes_received: AtomicU64::new(0),
            chunk_count: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            phase: AtomicU8::new(0),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sequence_cursor(&self) -> i64 {
        self.sequence_cursor.load(Ordering::Acquire)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Acquire)
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count.load(Ordering::Acquire)
    }

    pub fn anomalies(&self) -> u64 {
        self.anomalies.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn set_phase(&self, phase: SessionPhase) {
        let value = match phase {
            SessionPhase::Receiving => 0,
            SessionPhase::IngestComplete => 1,
            SessionPhase::Processing => 2,
        };
        self.phase.store(value, Ordering::Release);
    }

    /// Accounts for one received chunk. The cursor always moves to the
    /// received sequence; a gap or regression is reported but never rejected.
    pub fn record_chunk(&self, sequence: i32, len: usize) -> Option<OrderingAnomaly> {
        let sequence = i64::from(sequence);
        let expected = self.sequence_cursor() + 1;
        self.sequence_cursor.store(sequence, Ordering::Release);
        self.bytes_received.fetch_add(len as u64, Ordering::AcqRel);
        self.chunk_count.fetch_add(1, Ordering::AcqRel);
        if sequence == expected {
            return None;
        }
        self.anomalies.fetch_add(1, Ordering::AcqRel);
        Some(OrderingAnomaly {
            expected,
            received: sequence,
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            created_at: self.created_at,
            phase: self.phase(),
            sequence_cursor: self.sequence_cursor(),
            bytes_received: self.bytes_received(),
            chunk_count: self.chunk_count(),
            anomalies: self.anomalies(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub phase: SessionPhase,
    pub sequence_cursor: i64,
    pub bytes_received: u64,
    pub chunk_count: u64,
    pub anomalies: u64,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn identifiers_do_not_collide_under_concurrent_creation() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..2_000)
                        .map(|_| SessionId::generate("process"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(id.as_str().starts_with("process_"));
                assert!(seen.insert(id), "duplicate session id");
            }
        }
        assert_eq!(seen.len(), 16_000);
    }

    #[test]
    fn contiguous_chunks_accumulate_without_anomalies() {
        let session = Session::new(SessionId::generate("test"));
        assert_eq!(session.sequence_cursor(), -1);
        for (sequence, len) in [(0, 100), (1, 200), (2, 150)] {
            assert_eq!(session.record_chunk(sequence, len), None);
        }
        assert_eq!(session.bytes_received(), 450);
        assert_eq!(session.chunk_count(), 3);
        assert_eq!(session.sequence_cursor(), 2);
        assert_eq!(session.anomalies(), 0);
    }

    #[test]
    fn gaps_and_regressions_are_reported_and_followed() {
        let session = Session::new(SessionId::generate("test"));
        session.record_chunk(0, 10);
        session.record_chunk(1, 10);
        session.record_chunk(2, 10);
        session.record_chunk(3, 10);
        let gap = session.record_chunk(5, 10).expect("gap should be reported");
        assert_eq!(gap, OrderingAnomaly { expected: 4, received: 5 });
        let regression = session.record_chunk(4, 10).expect("regression should be reported");
        assert_eq!(regression, OrderingAnomaly { expected: 6, received: 4 });
        assert_eq!(session.sequence_cursor(), 4);
        assert_eq!(session.chunk_count(), 6);
        assert_eq!(session.anomalies(), 2);
    }
}
