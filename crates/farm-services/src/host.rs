//! In-process host: serviced-name set plus a registry of deployed units.
//!
//! Stands in for the container hierarchy and deploy controller when farm runs
//! as a standalone daemon. A unit exists for a target name whenever its
//! archive, expanded directory or descriptor is present after `reconcile`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::{DashMap, DashSet};

use farm_core::ContextName;

use crate::deployment::{DeployedUnit, DeploymentController, DeploymentTarget};

/// A unit registered with the [`LocalHost`].
#[derive(Debug)]
pub struct HostedUnit {
    name: String,
    base_name: String,
    running: AtomicBool,
}

impl HostedUnit {
    fn new(name: &ContextName) -> Self {
        Self {
            name: name.name().to_string(),
            base_name: name.base_name().to_string(),
            running: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl DeployedUnit for HostedUnit {
    fn stop(&self) -> Result<()> {
        if self.running.swap(false, Ordering::AcqRel) {
            tracing::info!(target_name = %self.name, "unit stopped");
        }
        Ok(())
    }

    fn base_name(&self) -> String {
        self.base_name.clone()
    }
}

pub struct LocalHost {
    deploy_dir: PathBuf,
    config_base: PathBuf,
    archive_suffix: String,
    serviced: DashSet<String>,
    units: DashMap<String, Arc<HostedUnit>>,
}

impl LocalHost {
    pub fn new(
        deploy_dir: impl Into<PathBuf>,
        config_base: impl Into<PathBuf>,
        archive_suffix: &str,
    ) -> Self {
        Self {
            deploy_dir: deploy_dir.into(),
            config_base: config_base.into(),
            archive_suffix: archive_suffix.to_string(),
            serviced: DashSet::new(),
            units: DashMap::new(),
        }
    }

    /// Register every unit already present in the deploy directory.
    /// Returns the number of units found.
    pub fn scan(&self) -> Result<usize> {
        let entries = std::fs::read_dir(&self.deploy_dir).with_context(|| {
            format!("failed to list deploy dir: {}", self.deploy_dir.display())
        })?;

        let mut found = 0;
        for entry in entries.flatten() {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            let is_archive = has_suffix(&path, &self.archive_suffix);
            if !(is_archive || path.is_dir()) {
                continue;
            }
            let cn = if is_archive {
                ContextName::from_file_name(&file_name, &self.archive_suffix)
            } else {
                ContextName::new(&file_name)
            };
            if !self.units.contains_key(cn.name()) {
                self.units
                    .insert(cn.name().to_string(), Arc::new(HostedUnit::new(&cn)));
                found += 1;
            }
        }
        tracing::info!(units = found, dir = %self.deploy_dir.display(), "deploy dir scanned");
        Ok(found)
    }

    pub fn is_serviced(&self, name: &str) -> bool {
        self.serviced.contains(name)
    }

    pub fn unit(&self, name: &str) -> Option<Arc<HostedUnit>> {
        self.units.get(name).map(|u| u.value().clone())
    }

    pub fn unit_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.units.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn on_disk(&self, cn: &ContextName) -> bool {
        let base = cn.base_name();
        self.deploy_dir
            .join(format!("{base}.{}", self.archive_suffix))
            .exists()
            || self.deploy_dir.join(base).is_dir()
            || self.config_base.join(format!("{base}.xml")).exists()
    }
}

impl DeploymentController for LocalHost {
    fn try_acquire(&self, name: &str) -> Result<bool> {
        Ok(self.serviced.insert(name.to_string()))
    }

    fn release(&self, name: &str) -> Result<()> {
        self.serviced.remove(name);
        Ok(())
    }

    fn reconcile(&self, name: &str) -> Result<()> {
        let cn = ContextName::new(name);
        if self.on_disk(&cn) {
            // A redeploy replaces a stopped unit with a fresh running one.
            let replace = self.units.get(name).map_or(true, |u| !u.is_running());
            if replace {
                self.units
                    .insert(name.to_string(), Arc::new(HostedUnit::new(&cn)));
                tracing::info!(target_name = name, "unit deployed");
            }
        } else if self.units.remove(name).is_some() {
            tracing::info!(target_name = name, "unit undeployed");
        }
        Ok(())
    }
}

impl DeploymentTarget for LocalHost {
    fn find(&self, name: &str) -> Option<Arc<dyn DeployedUnit>> {
        self.units
            .get(name)
            .map(|u| u.value().clone() as Arc<dyn DeployedUnit>)
    }
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(suffix))
}
