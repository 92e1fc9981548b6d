//! Artifact triggers
//!
//! An `ArtifactEvent` announces a newly stored recording. Events whose key
//! matches one of the configured suffixes start an execution with the
//! artifact descriptor as `body`.
//!
//! With the `file-triggers` feature, `watch_directory` turns files created
//! in a local directory into events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;

/// A newly stored artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEvent {
    /// Bucket or directory holding the artifact
    pub location: String,
    pub key: String,
    pub size: u64,
    pub observed_at: DateTime<Utc>,
}

impl ArtifactEvent {
    pub fn new(location: impl Into<String>, key: impl Into<String>, size: u64) -> Self {
        Self {
            location: location.into(),
            key: key.into(),
            size,
            observed_at: Utc::now(),
        }
    }

    /// Describe a file on disk: its directory is the location, its name the key
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let location = path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let key = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(location, key, metadata.len()))
    }

    /// The `{location, key, size}` descriptor handed to the workflow
    pub fn descriptor(&self) -> Value {
        json!({
            "location": self.location,
            "key": self.key,
            "size": self.size,
        })
    }

    /// Initial context of an execution started by this event
    pub fn into_context(self) -> Value {
        json!({ "body": self.descriptor() })
    }
}

/// Decides which artifacts start an execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerFilter {
    suffixes: Vec<String>,
}

impl TriggerFilter {
    /// An empty suffix list accepts every artifact
    pub fn new(suffixes: Vec<String>) -> Self {
        Self { suffixes }
    }

    pub fn qualifies(&self, event: &ArtifactEvent) -> bool {
        self.suffixes.is_empty() || self.suffixes.iter().any(|s| event.key.ends_with(s.as_str()))
    }
}

impl Default for TriggerFilter {
    fn default() -> Self {
        Self::new(vec![".mp4".to_string()])
    }
}

/// Watch `dir` and send an event for every file created in it.
///
/// Events stop when the returned watcher is dropped.
#[cfg(feature = "file-triggers")]
pub fn watch_directory(
    dir: &Path,
    events: async_channel::Sender<ArtifactEvent>,
) -> Result<notify::RecommendedWatcher, notify::Error> {
    use notify::{EventKind, RecursiveMode, Watcher};
    use tracing::{debug, warn};

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                warn!("Watch error: {}", e);
                return;
            }
        };
        if !matches!(event.kind, EventKind::Create(_)) {
            return;
        }
        for path in event.paths {
            match ArtifactEvent::from_path(&path) {
                Ok(artifact) => {
                    debug!("Observed {}", path.display());
                    if events.send_blocking(artifact).is_err() {
                        return;
                    }
                }
                Err(e) => debug!("Skipping {}: {}", path.display(), e),
            }
        }
    })?;

    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}
