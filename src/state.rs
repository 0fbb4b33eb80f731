use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use netgen::{Engine, LifecycleState};
use reconcile::{ConnectionManager, SnapshotConnection};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// Run Snapshot
// ============================================================================

/// What `flownet run` left behind, shown by `flownet status`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RunSnapshot {
    /// System description the run was made from
    pub system: PathBuf,

    /// BLAKE3 digest of the system description at run time
    pub system_digest: String,

    pub ticks: u32,

    /// Whether the last tick left nothing held or deferred
    pub converged: bool,

    #[serde(default)]
    pub components: Vec<ComponentStatus>,

    #[serde(default)]
    pub connections: Vec<SnapshotConnection>,

    #[serde(default)]
    pub pending: PendingSummary,

    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ComponentStatus {
    pub id: u64,
    pub model: String,
    pub state: LifecycleState,
    /// `task@host` once bound to a live task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default)]
    pub executable: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct PendingSummary {
    pub components: usize,
    pub additions: usize,
    pub removals: usize,
}

impl RunSnapshot {
    /// Capture the plan and the live connections after a run
    pub fn capture(system: &Path, digest: &str, ticks: u32, converged: bool, engine: &Engine, manager: &ConnectionManager) -> Self {
        let components = engine
            .plan()
            .components()
            .filter(|c| c.is_deployable())
            .map(|c| ComponentStatus {
                id: c.id.0,
                model: c.model.clone(),
                state: c.state,
                task: c.remote_key().map(ToString::to_string),
                executable: c.executable,
            })
            .collect();
        let pending = manager
            .pending_changes()
            .map(|p| PendingSummary {
                components: p.tasks.len(),
                additions: p.addition_count(),
                removals: p.removal_count(),
            })
            .unwrap_or_default();

        Self {
            system: system.to_path_buf(),
            system_digest: digest.to_string(),
            ticks,
            converged,
            components,
            connections: manager.actual().snapshot(),
            pending,
            saved_at: Utc::now(),
        }
    }

    /// Path of the last snapshot in `dir`
    pub fn file_in(dir: &Path) -> PathBuf {
        dir.join("last-run.toml")
    }

    /// Load the snapshot saved in `dir`, if any
    pub fn load_from(dir: &Path) -> Result<Option<Self>> {
        let path = Self::file_in(dir);
        if !path.exists() {
            log::debug!("No snapshot at {}", path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
        let snapshot = toml::from_str(&content)
            .with_context(|| format!("Failed to parse snapshot: {}", path.display()))?;
        Ok(Some(snapshot))
    }

    pub fn save_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;

        let path = Self::file_in(dir);
        let content = toml::to_string_pretty(self).context("Failed to serialize snapshot to TOML")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write snapshot: {}", path.display()))?;

        log::debug!("Saved snapshot to {}", path.display());
        Ok(path)
    }

    /// Whether the system file changed since the run
    pub fn is_stale(&self, current_digest: &str) -> bool {
        self.system_digest != current_digest
    }

    pub fn running_count(&self) -> usize {
        self.components
            .iter()
            .filter(|c| c.state == LifecycleState::Running)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmodel::ConnectionPolicy;
    use netremote::RemoteKey;

    fn snapshot() -> RunSnapshot {
        RunSnapshot {
            system: PathBuf::from("/robots/rover.toml"),
            system_digest: "abc".to_string(),
            ticks: 4,
            converged: true,
            components: vec![
                ComponentStatus {
                    id: 3,
                    model: "Camera".to_string(),
                    state: LifecycleState::Running,
                    task: Some("camera@rover".to_string()),
                    executable: true,
                },
                ComponentStatus {
                    id: 4,
                    model: "Detector".to_string(),
                    state: LifecycleState::SettingUp,
                    task: None,
                    executable: false,
                },
            ],
            connections: vec![SnapshotConnection {
                source: RemoteKey::new("rover", "camera"),
                source_port: "frame".to_string(),
                sink: RemoteKey::new("rover", "detector"),
                sink_port: "image".to_string(),
                policy: ConnectionPolicy::buffer(4),
                static_port: true,
            }],
            pending: PendingSummary::default(),
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let saved = snapshot();
        let path = saved.save_to(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("last-run.toml"));

        let loaded = RunSnapshot::load_from(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.components, saved.components);
        assert_eq!(loaded.connections.len(), 1);
        assert_eq!(loaded.connections[0].policy, ConnectionPolicy::buffer(4));
        assert_eq!(loaded.running_count(), 1);
    }

    #[test]
    fn test_load_without_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RunSnapshot::load_from(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(RunSnapshot::file_in(dir.path()), "ticks = \"many\"").unwrap();
        let err = RunSnapshot::load_from(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse snapshot"));
    }

    #[test]
    fn test_stale_digest() {
        let snapshot = snapshot();
        assert!(!snapshot.is_stale("abc"));
        assert!(snapshot.is_stale("def"));
    }
}
