//! Deployment capabilities and the serviced lock.
//!
//! `DeploymentController` flips staged artifacts into running units and
//! arbitrates exclusive access to a target name. `DeploymentTarget` locates
//! running units. Both are provided by the host environment; [`crate::host`]
//! has an in-process implementation.

use std::sync::Arc;

use anyhow::Result;

pub trait DeploymentController: Send + Sync {
    /// Atomically mark `name` as being serviced. Returns false if another
    /// trigger already holds it.
    fn try_acquire(&self, name: &str) -> Result<bool>;

    /// Release `name`. Must be idempotent.
    fn release(&self, name: &str) -> Result<()>;

    /// Make whatever is on disk for `name` take effect.
    fn reconcile(&self, name: &str) -> Result<()>;
}

/// A running unit as seen through the container hierarchy.
pub trait DeployedUnit: Send + Sync {
    fn stop(&self) -> Result<()>;

    /// File-system name of the unit: `<base>.war`, `<base>/`, `<base>.xml`.
    fn base_name(&self) -> String;
}

pub trait DeploymentTarget: Send + Sync {
    fn find(&self, name: &str) -> Option<Arc<dyn DeployedUnit>>;
}

/// Exclusive hold on one target name. Released when dropped, on every exit
/// path.
pub struct ServicedLock<'a> {
    controller: &'a dyn DeploymentController,
    name: String,
}

impl<'a> ServicedLock<'a> {
    /// `Ok(None)` means another trigger is servicing `name` right now.
    pub fn try_acquire(
        controller: &'a dyn DeploymentController,
        name: &str,
    ) -> Result<Option<Self>> {
        if controller.try_acquire(name)? {
            tracing::trace!(target_name = name, "serviced lock acquired");
            Ok(Some(Self {
                controller,
                name: name.to_string(),
            }))
        } else {
            Ok(None)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ServicedLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.controller.release(&self.name) {
            tracing::error!(target_name = %self.name, error = %e, "failed to release serviced lock");
        } else {
            tracing::trace!(target_name = %self.name, "serviced lock released");
        }
    }
}
