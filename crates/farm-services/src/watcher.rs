//! Watch-directory polling.
//!
//! A [`ChangeSource`] reports archives that appeared, changed or vanished
//! since its previous check. [`WarWatcher`] does this by comparing
//! modification times of the archives in one directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Modified(PathBuf),
    Removed(PathBuf),
}

pub trait ChangeSource: Send {
    /// Events observed since the previous call.
    fn check(&mut self) -> Vec<ChangeEvent>;
}

pub struct WarWatcher {
    watch_dir: PathBuf,
    suffix: String,
    known: HashMap<PathBuf, SystemTime>,
}

impl WarWatcher {
    pub fn new(watch_dir: impl Into<PathBuf>, archive_suffix: &str) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            suffix: archive_suffix.to_string(),
            known: HashMap::new(),
        }
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    fn is_archive(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&self.suffix))
    }
}

impl ChangeSource for WarWatcher {
    fn check(&mut self) -> Vec<ChangeEvent> {
        let entries = match std::fs::read_dir(&self.watch_dir) {
            Ok(entries) => entries,
            Err(e) => {
                // An unreadable directory says nothing about its files.
                tracing::warn!(dir = %self.watch_dir.display(), error = %e, "watch dir unreadable");
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        let mut present = HashMap::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !self.is_archive(&path) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if self.known.get(&path) != Some(&modified) {
                tracing::debug!(file = %path.display(), "watched archive modified");
                events.push(ChangeEvent::Modified(path.clone()));
            }
            present.insert(path, modified);
        }

        let mut removed: Vec<&PathBuf> = self
            .known
            .keys()
            .filter(|p| !present.contains_key(*p))
            .collect();
        removed.sort();
        for path in removed {
            tracing::debug!(file = %path.display(), "watched archive removed");
            events.push(ChangeEvent::Removed(path.clone()));
        }

        self.known = present;
        events
    }
}
