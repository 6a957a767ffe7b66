//! Outbound replication of installs and removals.
//!
//! Installs are streamed as fixed-size chunk messages, each sent to every
//! member individually, followed by an empty end marker. Nothing is
//! acknowledged: a member that misses a send simply diverges until the
//! artifact is installed again.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bytes::Bytes;

use farm_core::message::{now_millis, ChunkMessage, ClusterMessage, RemovalMessage};
use farm_core::ContextName;

use crate::channel::{ClusterChannel, SendTarget};
use crate::deployment::{DeploymentController, ServicedLock};
use crate::local_ops::LocalDeploymentOps;
use crate::watcher::ChangeEvent;

/// Payload bytes per chunk message.
pub const CHUNK_SIZE: usize = 10 * 1024;

/// Result of an install fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Chunk messages produced, end marker included.
    pub chunks: usize,
    pub sends: usize,
    pub failed_sends: usize,
}

pub struct ReplicationCoordinator {
    channel: Arc<dyn ClusterChannel>,
    controller: Arc<dyn DeploymentController>,
    ops: Arc<LocalDeploymentOps>,
}

impl ReplicationCoordinator {
    pub fn new(
        channel: Arc<dyn ClusterChannel>,
        controller: Arc<dyn DeploymentController>,
        ops: Arc<LocalDeploymentOps>,
    ) -> Self {
        Self {
            channel,
            controller,
            ops,
        }
    }

    /// Stream `artifact` to every other member as target `target_name`.
    /// A cluster with no other members is a silent no-op.
    pub fn install(&self, target_name: &str, artifact: &Path) -> Result<InstallReport> {
        let members = self.channel.members();
        if members.is_empty() {
            return Ok(InstallReport::default());
        }
        if artifact.is_dir() {
            bail!("cannot replicate directory {}", artifact.display());
        }

        let file_name = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("artifact has no file name: {}", artifact.display()))?
            .to_string();
        let mut file = File::open(artifact)
            .with_context(|| format!("failed to open artifact: {}", artifact.display()))?;

        tracing::info!(
            target_name,
            artifact = %artifact.display(),
            members = members.len(),
            "replicating install"
        );

        let origin = self.channel.local_member();
        let mut report = InstallReport::default();
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut seq = 0u64;

        loop {
            let len = read_chunk(&mut file, &mut buf)
                .with_context(|| format!("failed to read artifact: {}", artifact.display()))?;
            hasher.update(&buf[..len]);

            let msg = ClusterMessage::Chunk(ChunkMessage {
                origin: origin.clone(),
                file_name: file_name.clone(),
                target_name: target_name.to_string(),
                seq,
                payload: Bytes::copy_from_slice(&buf[..len]),
                timestamp: now_millis(),
            });

            for member in &members {
                tracing::trace!(target_name, seq, member = %member, "sending chunk");
                report.sends += 1;
                let target = SendTarget::Member {
                    name: member.clone(),
                };
                if let Err(e) = self.channel.send(&msg, &target) {
                    report.failed_sends += 1;
                    tracing::warn!(member = %member, seq, error = %e, "chunk send failed");
                }
            }
            report.chunks += 1;
            seq += 1;

            if len == 0 {
                break;
            }
        }

        tracing::info!(
            target_name,
            chunks = report.chunks,
            failed_sends = report.failed_sends,
            digest = %hex::encode(&hasher.finalize().as_bytes()[..8]),
            "install replicated"
        );
        Ok(report)
    }

    /// Broadcast removal of `target_name` and, if asked, undeploy it here.
    pub fn remove(&self, target_name: &str, undeploy_locally: bool) -> Result<()> {
        if !self.channel.members().is_empty() {
            tracing::info!(target_name, "replicating removal");
            let msg = ClusterMessage::Removal(RemovalMessage::new(
                self.channel.local_member(),
                target_name,
            ));
            if let Err(e) = self.channel.send(&msg, &SendTarget::Broadcast) {
                tracing::warn!(target_name, error = %e, "removal broadcast failed");
            }
        }

        if undeploy_locally {
            match ServicedLock::try_acquire(self.controller.as_ref(), target_name)? {
                Some(lock) => {
                    self.ops.remove_local(target_name)?;
                    drop(lock);
                    self.controller.reconcile(target_name)?;
                }
                None => {
                    tracing::error!(target_name, "target is being serviced, local removal skipped");
                }
            }
        }
        Ok(())
    }

    pub fn on_change(&self, event: &ChangeEvent) {
        match event {
            ChangeEvent::Modified(path) => self.file_modified(path),
            ChangeEvent::Removed(path) => self.file_removed(path),
        }
    }

    /// A watched archive appeared or changed: deploy it here, then replicate
    /// the deployed copy.
    pub fn file_modified(&self, watched: &Path) {
        if let Err(e) = self.install_watched(watched) {
            tracing::error!(file = %watched.display(), error = %e, "watch-triggered install failed");
        }
    }

    fn install_watched(&self, watched: &Path) -> Result<()> {
        let file_name = watched
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("watched file has no name: {}", watched.display()))?;
        let deployed = self.ops.deploy_dir().join(file_name);
        let cn = ContextName::from_file_name(file_name, self.ops.archive_suffix());

        if is_newer(&deployed, watched) {
            tracing::info!(target_name = %cn, "already deployed, newer than watched copy");
            return Ok(());
        }

        tracing::info!(target_name = %cn, deployed = %deployed.display(), "installing watched archive");
        match ServicedLock::try_acquire(self.controller.as_ref(), cn.name())? {
            Some(lock) => {
                self.ops.copy_artifact(watched, &deployed);
                drop(lock);
                self.controller.reconcile(cn.name())?;
            }
            None => {
                tracing::error!(
                    target_name = %cn,
                    file = file_name,
                    "target is being serviced, local install skipped"
                );
            }
        }

        self.install(cn.name(), &deployed)?;
        Ok(())
    }

    /// A watched archive disappeared: remove the target everywhere.
    pub fn file_removed(&self, watched: &Path) {
        let Some(file_name) = watched.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let cn = ContextName::from_file_name(file_name, self.ops.archive_suffix());
        tracing::info!(target_name = %cn, "watched archive removed");
        if let Err(e) = self.remove(cn.name(), true) {
            tracing::error!(target_name = %cn, error = %e, "watch-triggered removal failed");
        }
    }
}

/// Fill `buf` as far as the reader allows. Returns 0 only at end of file.
fn read_chunk(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn is_newer(a: &Path, b: &Path) -> bool {
    let modified = |p: &Path| p.metadata().and_then(|m| m.modified()).ok();
    match (modified(a), modified(b)) {
        (Some(a), Some(b)) => a > b,
        _ => false,
    }
}
