use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::TransferError;

/// Assembler tuning.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// How long a session may sit idle before it is reclaimed.
    pub session_ttl: Duration,
    /// How often the background sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Result of feeding one chunk to the assembler.
#[derive(Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// More chunks outstanding.
    Incomplete { received: u32, total: u32 },
    /// The final chunk arrived; the session is gone and this is the
    /// reassembled payload.
    Complete(Vec<u8>),
}

struct Session {
    total_chunks: u32,
    /// chunk index -> bytes; duplicate indices overwrite.
    chunks: HashMap<u32, Vec<u8>>,
    created_at: Instant,
    last_seen: Instant,
}

struct AssemblerInner {
    sessions: HashMap<String, Session>,
    /// Reclaimed session ids, kept one TTL so a still-attached caller
    /// learns the session expired instead of silently starting over.
    tombstones: HashMap<String, Instant>,
    /// Ids of sessions that already reassembled, kept one TTL: a stray
    /// chunk for a finished upload is a protocol error, not a new session.
    finished: HashMap<String, Instant>,
}

/// Buffers out-of-order chunks per upload session and reassembles them.
///
/// One instance is owned by the subsystem root and shared by reference;
/// there is deliberately no process-global registry.
pub struct ChunkAssembler {
    inner: Mutex<AssemblerInner>,
    session_ttl: Duration,
}

impl ChunkAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self {
            inner: Mutex::new(AssemblerInner {
                sessions: HashMap::new(),
                tombstones: HashMap::new(),
                finished: HashMap::new(),
            }),
            session_ttl: config.session_ttl,
        }
    }

    /// Feeds one chunk into the session identified by `session_id`.
    ///
    /// Chunks may arrive in any order; reassembly is always in index order.
    /// The first chunk for an unknown id creates the session. When every
    /// index in `[0, total_chunks)` is present the session is discarded and
    /// the concatenated payload returned.
    pub fn put_chunk(
        &self,
        session_id: &str,
        index: u32,
        total_chunks: u32,
        bytes: Vec<u8>,
    ) -> Result<PutOutcome, TransferError> {
        if total_chunks == 0 {
            return Err(TransferError::InconsistentChunkCount {
                session: session_id.to_string(),
                detail: "totalChunks must be at least 1".into(),
            });
        }
        if index >= total_chunks {
            return Err(TransferError::InconsistentChunkCount {
                session: session_id.to_string(),
                detail: format!("chunk index {index} outside [0, {total_chunks})"),
            });
        }

        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        if let Some(expired_at) = inner.tombstones.get(session_id).copied() {
            if now.duration_since(expired_at) < self.session_ttl {
                return Err(TransferError::SessionExpired(session_id.to_string()));
            }
            // Tombstone lapsed; the id may start a fresh session.
            inner.tombstones.remove(session_id);
        }

        if let Some(finished_at) = inner.finished.get(session_id).copied() {
            if now.duration_since(finished_at) < self.session_ttl {
                return Err(TransferError::InconsistentChunkCount {
                    session: session_id.to_string(),
                    detail: "session already completed".into(),
                });
            }
            inner.finished.remove(session_id);
        }

        let session = inner
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session {
                total_chunks,
                chunks: HashMap::new(),
                created_at: now,
                last_seen: now,
            });

        if session.total_chunks != total_chunks {
            let expected = session.total_chunks;
            return Err(TransferError::InconsistentChunkCount {
                session: session_id.to_string(),
                detail: format!("session expects {expected} chunks, caller sent {total_chunks}"),
            });
        }

        session.chunks.insert(index, bytes);
        session.last_seen = now;

        if session.chunks.len() as u32 == session.total_chunks {
            let mut session = inner.sessions.remove(session_id).unwrap();
            inner.finished.insert(session_id.to_string(), now);
            let total_len: usize = session.chunks.values().map(Vec::len).sum();
            let mut data = Vec::with_capacity(total_len);
            for i in 0..session.total_chunks {
                // Every index is present: the key set is a subset of
                // [0, total) and its size equals total.
                data.extend_from_slice(&session.chunks.remove(&i).unwrap());
            }
            return Ok(PutOutcome::Complete(data));
        }

        Ok(PutOutcome::Incomplete {
            received: session.chunks.len() as u32,
            total: session.total_chunks,
        })
    }

    /// Number of in-flight sessions.
    pub fn session_count(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    /// Reclaims sessions idle longer than the TTL, returning their ids.
    ///
    /// Reclaimed ids are tombstoned for one further TTL so a late chunk is
    /// answered with `SessionExpired` rather than opening a fresh session.
    pub fn sweep_expired(&self) -> Vec<String> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let ttl = self.session_ttl;

        let expired: Vec<String> = inner
            .sessions
            .iter()
            .filter(|(_, s)| now.duration_since(s.last_seen) >= ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(session) = inner.sessions.remove(id) {
                tracing::debug!(
                    session = %id,
                    age = ?now.duration_since(session.created_at),
                    received = session.chunks.len(),
                    total = session.total_chunks,
                    "upload session expired"
                );
            }
            inner.tombstones.insert(id.clone(), now);
        }

        inner
            .tombstones
            .retain(|_, expired_at| now.duration_since(*expired_at) < ttl);
        inner
            .finished
            .retain(|_, finished_at| now.duration_since(*finished_at) < ttl);

        expired
    }

    /// Runs [`sweep_expired`](Self::sweep_expired) periodically until cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let assembler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let reclaimed = assembler.sweep_expired();
                        if !reclaimed.is_empty() {
                            tracing::info!(
                                count = reclaimed.len(),
                                sessions = ?reclaimed,
                                "reclaimed idle upload sessions"
                            );
                        }
                    }
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Chunk integrity
// ---------------------------------------------------------------------------

/// SHA-256 of `data`, hex-encoded.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verifies `data` against an expected hex digest.
///
/// An empty `expected` skips verification (the wire field is optional).
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<(), TransferError> {
    if expected.is_empty() {
        return Ok(());
    }
    if checksum_bytes(data) != expected {
        return Err(TransferError::ChecksumMismatch);
    }
    Ok(())
}
