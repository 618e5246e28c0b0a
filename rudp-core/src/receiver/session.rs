//! Receiver-side session state and the bounded session table. A flat
//! `Vec` with linear scan is acceptable at the fixed capacity of 100: the
//! receiver is a single task, so there is no need for an `Arc`/mutex-
//! guarded shared pool.

use std::time::Instant;

use tokio::io::{AsyncWriteExt, BufWriter};

use crate::config::{REAP_SWEEP_INTERVAL_MS, SESSION_IDLE_TIMEOUT_MS, SESSION_TABLE_CAPACITY};

/// An append-only byte sink for one session's reconstructed file.
/// Implemented over `tokio::fs::File` in the binaries; this trait keeps
/// the core receiver FSM independent of on-disk file I/O.
#[async_trait::async_trait]
pub trait OutputSink: Send {
    async fn append(&mut self, bytes: &[u8]) -> std::io::Result<()>;
    async fn flush(&mut self) -> std::io::Result<()>;
}

#[async_trait::async_trait]
impl<W> OutputSink for BufWriter<W>
where
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    async fn append(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.write_all(bytes).await
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        AsyncWriteExt::flush(self).await
    }
}

/// Receiver-side state for one in-progress inbound transfer.
pub struct Session {
    pub key: String,
    pub sink: Box<dyn OutputSink>,
    pub filename: String,
    pub total: u32,
    /// Next in-order sequence number expected.
    pub expected: u32,
    pub received: u32,
    /// Monotonically-derived identifier disambiguating repeat transfers
    /// from the same peer: the millisecond timestamp at handshake-accept
    /// time.
    pub session_id: u64,
    pub last_activity: Instant,
    pub target_path: String,
}

impl Session {
    /// The cumulative-ACK sequence number for the current `expected`
    /// value: `expected - 1` once something has been received, else `0`.
    ///
    /// This is ambiguous before any data arrives: an ACK of `0` then
    /// means "nothing beyond 0 yet", not "sequence 0 was received". This
    /// is a benign, intentional quirk rather than a bug to fix: the
    /// sender only ever slides `base` forward, so a premature ACK of `0`
    /// never causes it to advance incorrectly.
    pub fn ack_seq(&self) -> u32 {
        self.expected.saturating_sub(1)
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    fn is_idle(&self, now: Instant) -> bool {
        now.duration_since(self.last_activity).as_millis() as u64 > SESSION_IDLE_TIMEOUT_MS
    }
}

/// Bounded collection of sessions indexed by peer key.
pub struct SessionTable {
    sessions: Vec<Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: Vec::new(),
        }
    }

    pub fn lookup_mut(&mut self, key: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.key == key)
    }

    /// Inserts a new session. Returns `false` (without inserting) if the
    /// table is already at capacity; the caller is expected to drop the
    /// handshake silently in that case.
    pub fn insert(&mut self, session: Session) -> bool {
        if self.sessions.len() >= SESSION_TABLE_CAPACITY {
            return false;
        }
        self.sessions.push(session);
        true
    }

    /// Removes and returns the session under `key`, if any, flushing its
    /// sink first. Closing precedes removal.
    pub async fn evict(&mut self, key: &str) -> Option<Session> {
        let idx = self.sessions.iter().position(|s| s.key == key)?;
        let mut session = self.sessions.remove(idx);
        let _ = session.sink.flush().await;
        Some(session)
    }

    /// Evicts every session idle for more than
    /// [`SESSION_IDLE_TIMEOUT_MS`][crate::config::SESSION_IDLE_TIMEOUT_MS].
    pub async fn reap_idle(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.sessions.len() {
            if self.sessions[i].is_idle(now) {
                let mut session = self.sessions.remove(i);
                tracing::info!(key = %session.key, "reaping idle session");
                let _ = session.sink.flush().await;
            } else {
                i += 1;
            }
        }
    }

    /// Flushes and drops every open session, for process teardown.
    pub async fn teardown(&mut self) {
        for session in self.sessions.drain(..) {
            let mut session = session;
            let _ = session.sink.flush().await;
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Sweep cadence for [`SessionTable::reap_idle`] invocations from the
/// receiver's main loop.
pub const REAP_INTERVAL_MS: u64 = REAP_SWEEP_INTERVAL_MS;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct NullSink;

    #[async_trait::async_trait]
    impl OutputSink for NullSink {
        async fn append(&mut self, _bytes: &[u8]) -> std::io::Result<()> {
            Ok(())
        }
        async fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn session(key: &str, last_activity: Instant) -> Session {
        Session {
            key: key.to_string(),
            sink: Box::new(NullSink),
            filename: "f.bin".to_string(),
            total: 1,
            expected: 0,
            received: 0,
            session_id: 1,
            last_activity,
            target_path: "/tmp/f.bin".to_string(),
        }
    }

    #[test]
    fn ack_seq_is_zero_before_any_data() {
        let s = session("k", Instant::now());
        assert_eq!(s.ack_seq(), 0);
    }

    #[test]
    fn ack_seq_tracks_expected_minus_one() {
        let mut s = session("k", Instant::now());
        s.expected = 5;
        assert_eq!(s.ack_seq(), 4);
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let mut table = SessionTable::new();
        for i in 0..SESSION_TABLE_CAPACITY {
            assert!(table.insert(session(&format!("peer{i}"), Instant::now())));
        }
        assert!(!table.insert(session("overflow", Instant::now())));
        assert_eq!(table.len(), SESSION_TABLE_CAPACITY);
    }

    #[tokio::test]
    async fn reap_idle_evicts_only_stale_sessions() {
        let mut table = SessionTable::new();
        let now = Instant::now();
        let stale = now - Duration::from_millis(SESSION_IDLE_TIMEOUT_MS + 1);
        table.insert(session("fresh", now));
        table.insert(session("stale", stale));

        table.reap_idle(now).await;

        assert_eq!(table.len(), 1);
        assert!(table.lookup_mut("fresh").is_some());
        assert!(table.lookup_mut("stale").is_none());
    }

    #[tokio::test]
    async fn new_handshake_evicts_old_session_under_same_key() {
        let mut table = SessionTable::new();
        table.insert(session("peer", Instant::now()));
        let evicted = table.evict("peer").await;
        assert!(evicted.is_some());
        assert!(table.insert(session("peer", Instant::now())));
        assert_eq!(table.len(), 1);
    }
}
