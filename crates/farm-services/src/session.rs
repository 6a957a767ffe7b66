//! Transfer sessions: reassembly of artifact chunk streams.
//!
//! One session per artifact file name. Chunks are appended straight to the
//! session's temp file in the order they arrive; an empty chunk ends the
//! stream. Sessions that never see their end marker are pruned once they
//! reach their maximum lifetime. Pruning and removal never touch the file
//! on disk; whoever owns the temp directory decides what happens to it.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to create {0}: {1}")]
    Create(PathBuf, std::io::Error),
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("no transfer session for {0}")]
    Missing(String),
    #[error("chunk {got} for {file_name} arrived out of order (expected {expected})")]
    OutOfOrder {
        file_name: String,
        expected: u64,
        got: u64,
    },
}

/// Snapshot of a session, handed out by [`SessionRegistry::get_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: u64,
    pub file_name: String,
    pub path: PathBuf,
    pub created_at: Instant,
}

/// A fully received artifact.
#[derive(Debug, Clone)]
pub struct CompletedTransfer {
    pub file_name: String,
    pub path: PathBuf,
    pub bytes: u64,
    /// BLAKE3 of the reassembled bytes.
    pub digest: [u8; 32],
}

#[derive(Debug)]
pub enum AppendOutcome {
    /// More chunks expected.
    Pending { bytes: u64 },
    Complete(CompletedTransfer),
}

impl AppendOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, AppendOutcome::Complete(_))
    }
}

struct TransferSession {
    id: u64,
    path: PathBuf,
    file: File,
    bytes: u64,
    next_seq: u64,
    created_at: Instant,
    max_valid_time: Duration,
    hasher: blake3::Hasher,
}

impl TransferSession {
    fn expired(&self, now: Instant) -> bool {
        !self.max_valid_time.is_zero()
            && now.saturating_duration_since(self.created_at) >= self.max_valid_time
    }
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Artifact file name → in-flight transfer.
///
/// A single async mutex guards the map and every append, so the receive
/// path and the expiry sweep never interleave on one session.
pub struct SessionRegistry {
    active: Mutex<HashMap<String, TransferSession>>,
    /// Applied to sessions created from now on. Zero = never expire.
    max_valid_time: Duration,
}

impl SessionRegistry {
    pub fn new(max_valid_time: Duration) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            max_valid_time,
        }
    }

    /// Return the session for `file_name`, creating it (and truncating
    /// `destination`) only if none exists.
    pub async fn get_or_create(
        &self,
        file_name: &str,
        destination: &Path,
    ) -> Result<SessionHandle, SessionError> {
        let mut active = self.active.lock().await;
        if let Some(session) = active.get(file_name) {
            return Ok(SessionHandle {
                id: session.id,
                file_name: file_name.to_string(),
                path: session.path.clone(),
                created_at: session.created_at,
            });
        }

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SessionError::Create(parent.to_path_buf(), e))?;
        }
        let file = File::create(destination)
            .map_err(|e| SessionError::Create(destination.to_path_buf(), e))?;

        let session = TransferSession {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            path: destination.to_path_buf(),
            file,
            bytes: 0,
            next_seq: 0,
            created_at: Instant::now(),
            max_valid_time: self.max_valid_time,
            hasher: blake3::Hasher::new(),
        };
        let handle = SessionHandle {
            id: session.id,
            file_name: file_name.to_string(),
            path: session.path.clone(),
            created_at: session.created_at,
        };
        tracing::debug!(
            file_name,
            path = %destination.display(),
            "transfer session created"
        );
        active.insert(file_name.to_string(), session);
        Ok(handle)
    }

    /// Append one chunk. An empty payload ends the stream and writes nothing.
    ///
    /// A write failure is returned as is; the session and its partial file
    /// stay behind for the expiry sweep.
    pub async fn append_chunk(
        &self,
        file_name: &str,
        seq: u64,
        payload: &[u8],
    ) -> Result<AppendOutcome, SessionError> {
        let mut active = self.active.lock().await;
        let session = active
            .get_mut(file_name)
            .ok_or_else(|| SessionError::Missing(file_name.to_string()))?;

        if seq != session.next_seq {
            return Err(SessionError::OutOfOrder {
                file_name: file_name.to_string(),
                expected: session.next_seq,
                got: seq,
            });
        }

        if payload.is_empty() {
            session
                .file
                .sync_all()
                .map_err(|e| SessionError::Write(session.path.clone(), e))?;
            session.next_seq += 1;
            return Ok(AppendOutcome::Complete(CompletedTransfer {
                file_name: file_name.to_string(),
                path: session.path.clone(),
                bytes: session.bytes,
                digest: *session.hasher.finalize().as_bytes(),
            }));
        }

        session
            .file
            .write_all(payload)
            .map_err(|e| SessionError::Write(session.path.clone(), e))?;
        session.hasher.update(payload);
        session.bytes += payload.len() as u64;
        session.next_seq += 1;

        tracing::trace!(file_name, seq, bytes = session.bytes, "chunk appended");
        Ok(AppendOutcome::Pending {
            bytes: session.bytes,
        })
    }

    /// Drop the session. Its file is left where it is.
    pub async fn remove(&self, file_name: &str) -> bool {
        self.active.lock().await.remove(file_name).is_some()
    }

    /// Remove every session that has reached its maximum lifetime at `now`.
    /// Returns the pruned file names.
    pub async fn prune_expired(&self, now: Instant) -> Vec<String> {
        let mut active = self.active.lock().await;
        let mut pruned = Vec::new();
        active.retain(|file_name, session| {
            let expired = session.expired(now);
            if expired {
                tracing::warn!(
                    file_name,
                    bytes = session.bytes,
                    path = %session.path.display(),
                    "removing expired transfer session"
                );
                pruned.push(file_name.clone());
            }
            !expired
        });
        pruned
    }

    /// List files currently being received
    pub async fn in_progress(&self) -> Vec<String> {
        let mut names: Vec<String> = self.active.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.active.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.active.lock().await.is_empty()
    }
}
