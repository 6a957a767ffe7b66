//! File-system side of local install and removal.
//!
//! Callers must hold the [`ServicedLock`](crate::deployment::ServicedLock)
//! for the target they pass in.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::deployment::DeploymentTarget;

pub struct LocalDeploymentOps {
    target: Arc<dyn DeploymentTarget>,
    deploy_dir: PathBuf,
    config_base: PathBuf,
    archive_suffix: String,
}

/// Which on-disk form a removal deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removed {
    /// Nothing was deployed under the name.
    NotDeployed,
    Archive(PathBuf),
    Directory(PathBuf),
    Descriptor(PathBuf),
    /// The unit was stopped but no file was found for it.
    NothingOnDisk,
}

impl LocalDeploymentOps {
    pub fn new(
        target: Arc<dyn DeploymentTarget>,
        deploy_dir: impl Into<PathBuf>,
        config_base: impl Into<PathBuf>,
        archive_suffix: &str,
    ) -> Self {
        Self {
            target,
            deploy_dir: deploy_dir.into(),
            config_base: config_base.into(),
            archive_suffix: archive_suffix.to_string(),
        }
    }

    pub fn deploy_dir(&self) -> &Path {
        &self.deploy_dir
    }

    pub fn archive_suffix(&self) -> &str {
        &self.archive_suffix
    }

    /// Deploy-ready name for a received file: the archive suffix is appended
    /// unless already present.
    pub fn deployable_name(&self, file_name: &str) -> String {
        let dotted = format!(".{}", self.archive_suffix);
        if file_name.ends_with(&dotted) {
            file_name.to_string()
        } else {
            format!("{file_name}{dotted}")
        }
    }

    pub fn deploy_path(&self, file_name: &str) -> PathBuf {
        self.deploy_dir.join(self.deployable_name(file_name))
    }

    /// Stop the unit registered under `name` and delete its files.
    ///
    /// The archive wins over the expanded directory, which wins over a bare
    /// descriptor. Absent units are a no-op.
    pub fn remove_local(&self, name: &str) -> Result<Removed> {
        let Some(unit) = self.target.find(name) else {
            tracing::debug!(target_name = name, "nothing deployed, removal is a no-op");
            return Ok(Removed::NotDeployed);
        };

        tracing::debug!(target_name = name, "undeploying locally");
        unit.stop()
            .with_context(|| format!("failed to stop unit {name}"))?;

        let base = unit.base_name();
        let archive = self
            .deploy_dir
            .join(format!("{base}.{}", self.archive_suffix));
        let dir = self.deploy_dir.join(&base);
        let descriptor = self.config_base.join(format!("{base}.xml"));

        let removed = if archive.exists() {
            if let Err(e) = fs::remove_file(&archive) {
                tracing::error!(path = %archive.display(), error = %e, "failed to delete");
            }
            Removed::Archive(archive)
        } else if dir.exists() {
            undeploy_dir(&dir);
            Removed::Directory(dir)
        } else if descriptor.exists() {
            if let Err(e) = fs::remove_file(&descriptor) {
                tracing::error!(path = %descriptor.display(), error = %e, "failed to delete");
            }
            Removed::Descriptor(descriptor)
        } else {
            tracing::warn!(target_name = name, base = %base, "unit stopped but nothing found on disk");
            Removed::NothingOnDisk
        };
        Ok(removed)
    }

    /// Move a fully received artifact into place. Rename only: a failure is
    /// logged and reported, never retried or replaced by a copy.
    pub fn finish_install(&self, source: &Path, destination: &Path) -> bool {
        match fs::rename(source, destination) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    from = %source.display(),
                    to = %destination.display(),
                    error = %e,
                    "failed to rename artifact into deploy dir"
                );
                false
            }
        }
    }

    /// Overwrite `to` with the contents of `from`.
    pub fn copy_artifact(&self, from: &Path, to: &Path) -> bool {
        match copy_file(from, to) {
            Ok(bytes) => {
                tracing::debug!(from = %from.display(), to = %to.display(), bytes, "artifact copied");
                true
            }
            Err(e) => {
                tracing::error!(
                    from = %from.display(),
                    to = %to.display(),
                    error = %e,
                    "failed to copy artifact"
                );
                false
            }
        }
    }
}

fn copy_file(from: &Path, to: &Path) -> io::Result<u64> {
    let mut reader = fs::File::open(from)?;
    let mut writer = fs::File::create(to)?;
    io::copy(&mut reader, &mut writer)
}

/// Best-effort recursive delete: files first, then subdirectories, then the
/// directory itself. Each failure is logged and the walk continues.
fn undeploy_dir(dir: &Path) {
    let mut subdirs = Vec::new();
    match fs::read_dir(dir) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    subdirs.push(path);
                } else if let Err(e) = fs::remove_file(&path) {
                    tracing::error!(path = %path.display(), error = %e, "failed to delete");
                }
            }
        }
        Err(e) => tracing::error!(path = %dir.display(), error = %e, "failed to list"),
    }
    for sub in subdirs {
        undeploy_dir(&sub);
    }
    if let Err(e) = fs::remove_dir(dir) {
        tracing::error!(path = %dir.display(), error = %e, "failed to delete");
    }
}
