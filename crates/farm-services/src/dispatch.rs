//! Inbound message handling on the receiving member.
//!
//! Chunk messages feed the session registry; a completed artifact is moved
//! into the deploy directory under the serviced lock of its target. Removal
//! messages undeploy under the same lock. Nothing is re-broadcast and no
//! failure is reported back to the sender.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use farm_core::message::{ChunkMessage, ClusterMessage, RemovalMessage};

use crate::deployment::{DeploymentController, ServicedLock};
use crate::local_ops::LocalDeploymentOps;
use crate::session::{AppendOutcome, CompletedTransfer, SessionRegistry};

/// What handling one message amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not a kind this dispatcher handles, or undecodable.
    Ignored,
    /// Chunk appended; more expected.
    Pending,
    /// Artifact moved into the deploy dir and reconciled.
    Deployed(PathBuf),
    Removed,
    /// Another trigger holds the target; nothing was changed.
    Busy,
    Failed(String),
}

pub struct MessageDispatcher {
    sessions: Arc<SessionRegistry>,
    controller: Arc<dyn DeploymentController>,
    ops: Arc<LocalDeploymentOps>,
    temp_dir: PathBuf,
}

impl MessageDispatcher {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        controller: Arc<dyn DeploymentController>,
        ops: Arc<LocalDeploymentOps>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sessions,
            controller,
            ops,
            temp_dir: temp_dir.into(),
        }
    }

    /// Kinds this dispatcher wants delivered.
    pub fn accepts(&self, msg: &ClusterMessage) -> bool {
        matches!(msg, ClusterMessage::Chunk(_) | ClusterMessage::Removal(_))
    }

    /// Decode a raw frame and handle it. Undecodable frames are dropped.
    pub async fn on_bytes(&self, data: &[u8]) -> DispatchOutcome {
        match ClusterMessage::from_bytes(data) {
            Ok(msg) => self.on_message(msg).await,
            Err(e) => {
                tracing::warn!(error = %e, len = data.len(), "dropping undecodable message");
                DispatchOutcome::Ignored
            }
        }
    }

    pub async fn on_message(&self, msg: ClusterMessage) -> DispatchOutcome {
        if !self.accepts(&msg) {
            tracing::trace!(kind = msg.kind(), "ignoring message");
            return DispatchOutcome::Ignored;
        }

        let result = match msg {
            ClusterMessage::Chunk(chunk) => self.handle_chunk(chunk).await,
            ClusterMessage::Removal(removal) => self.handle_removal(&removal),
            ClusterMessage::Unknown => return DispatchOutcome::Ignored,
        };
        result.unwrap_or_else(|e| DispatchOutcome::Failed(format!("{e:#}")))
    }

    async fn handle_chunk(&self, chunk: ChunkMessage) -> Result<DispatchOutcome> {
        if !is_plain_file_name(&chunk.file_name) {
            tracing::warn!(
                file_name = %chunk.file_name,
                origin = %chunk.origin,
                "rejecting chunk with unsafe file name"
            );
            return Ok(DispatchOutcome::Ignored);
        }

        tracing::trace!(
            target_name = %chunk.target_name,
            file_name = %chunk.file_name,
            seq = chunk.seq,
            origin = %chunk.origin,
            "chunk received"
        );

        let temp_path = self.temp_dir.join(&chunk.file_name);
        let appended = match self
            .sessions
            .get_or_create(&chunk.file_name, &temp_path)
            .await
        {
            Ok(_) => {
                self.sessions
                    .append_chunk(&chunk.file_name, chunk.seq, &chunk.payload)
                    .await
            }
            Err(e) => Err(e),
        };

        let completed = match appended {
            Ok(AppendOutcome::Pending { .. }) => return Ok(DispatchOutcome::Pending),
            Ok(AppendOutcome::Complete(done)) => done,
            Err(e) => {
                tracing::warn!(
                    file_name = %chunk.file_name,
                    seq = chunk.seq,
                    error = %e,
                    "chunk not applied"
                );
                return Ok(DispatchOutcome::Failed(e.to_string()));
            }
        };

        let outcome = self.deploy_completed(&chunk.target_name, &completed);
        self.sessions.remove(&chunk.file_name).await;
        if let Err(e) = &outcome {
            tracing::error!(
                target_name = %chunk.target_name,
                file_name = %chunk.file_name,
                error = %e,
                "failed to deploy received artifact"
            );
        }
        outcome
    }

    fn deploy_completed(
        &self,
        target_name: &str,
        completed: &CompletedTransfer,
    ) -> Result<DispatchOutcome> {
        let deployable = self.ops.deploy_path(&completed.file_name);
        tracing::info!(
            target_name,
            file_name = %completed.file_name,
            bytes = completed.bytes,
            digest = %hex::encode(&completed.digest[..8]),
            "artifact received"
        );

        let Some(lock) = ServicedLock::try_acquire(self.controller.as_ref(), target_name)? else {
            tracing::error!(
                target_name,
                staged = %completed.path.display(),
                "target is being serviced, received artifact left staged"
            );
            return Ok(DispatchOutcome::Busy);
        };

        self.ops
            .remove_local(target_name)
            .with_context(|| format!("failed to remove previous {target_name}"))?;
        let moved = self.ops.finish_install(&completed.path, &deployable);
        drop(lock);

        // The previous unit is already gone, so reconcile either way.
        self.controller.reconcile(target_name)?;
        if !moved {
            return Ok(DispatchOutcome::Failed(format!(
                "could not move {} into place",
                completed.path.display()
            )));
        }
        tracing::info!(target_name, path = %deployable.display(), "artifact deployed");
        Ok(DispatchOutcome::Deployed(deployable))
    }

    fn handle_removal(&self, removal: &RemovalMessage) -> Result<DispatchOutcome> {
        let target_name = removal.target_name.as_str();
        tracing::info!(
            target_name,
            origin = %removal.origin,
            token = %removal.correlation_token,
            "removal received"
        );

        let Some(lock) = ServicedLock::try_acquire(self.controller.as_ref(), target_name)? else {
            tracing::error!(target_name, "target is being serviced, removal skipped");
            return Ok(DispatchOutcome::Busy);
        };
        let removed = self.ops.remove_local(target_name);
        drop(lock);

        let removed = removed.with_context(|| format!("failed to remove {target_name}"))?;
        tracing::debug!(target_name, ?removed, "removal applied");
        Ok(DispatchOutcome::Removed)
    }
}

/// A bare file name: no directories, no parent references.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
}
