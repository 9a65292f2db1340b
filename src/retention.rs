use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::error::{EngineError, EngineResult};
use crate::verify::list_backup_artifacts;

/// Outcome of a [`Retention::cleanup`] call.
#[derive(Debug, Clone, Default)]
pub struct CleanupOutcome {
    pub deleted_artifacts: Vec<String>,
    pub deleted_state_files: Vec<String>,
}

/// Age-based deletion of backup artifacts, with hard safety invariants that
/// take priority over the caller's retention window.
pub struct Retention;

impl Retention {
    /// Deletes every artifact under `destination` older than `retention_days`,
    /// plus its orphaned `<backup-id>.json` state file. Refuses to run if
    /// doing so would remove every artifact currently present (almost
    /// always a sign of clock skew rather than genuinely stale backups).
    pub fn cleanup(destination: &Path, retention_days: u64, name_filter: Option<&str>) -> EngineResult<CleanupOutcome> {
        let artifacts = list_backup_artifacts(destination)?;
        if artifacts.is_empty() {
            return Ok(CleanupOutcome::default());
        }

        let cutoff = Duration::from_secs(retention_days.saturating_mul(24 * 60 * 60));
        let now = SystemTime::now();

        // The 100%-deletion safety check below must be scoped to the same
        // candidate set name_filter selects, not every artifact under
        // destination — otherwise an unrelated backup source sharing this
        // destination masks a filtered wipe-out that should abort.
        let candidates: Vec<_> = artifacts
            .iter()
            .filter(|artifact_path| match name_filter {
                Some(filter) => artifact_path.file_name().unwrap().to_string_lossy().starts_with(filter),
                None => true,
            })
            .cloned()
            .collect();

        let mut doomed = Vec::new();
        for artifact_path in &candidates {
            let created = artifact_created_at(artifact_path)?;
            let age = now.duration_since(created).unwrap_or(Duration::ZERO);
            if age > cutoff {
                doomed.push(artifact_path.clone());
            }
        }

        if doomed.is_empty() {
            return Ok(CleanupOutcome::default());
        }

        if doomed.len() == candidates.len() {
            return Err(EngineError::SafetyAbort(format!(
                "retention would delete all {} matching artifact(s) under {}; possible clock skew, aborting with zero deletions",
                candidates.len(),
                destination.display()
            )));
        }

        let states_dir = destination.join("states");
        let mut deleted_artifacts = Vec::new();
        let mut deleted_state_files = Vec::new();

        for artifact_path in &doomed {
            let name = artifact_path.file_name().unwrap().to_string_lossy().to_string();
            let backup_id = name.trim_end_matches(".zip").to_string();

            if artifact_path.is_dir() {
                fs::remove_dir_all(artifact_path).map_err(|e| EngineError::io(artifact_path, e))?;
            } else {
                fs::remove_file(artifact_path).map_err(|e| EngineError::io(artifact_path, e))?;
            }
            deleted_artifacts.push(backup_id.clone());

            let state_file = states_dir.join(format!("{backup_id}.json"));
            if state_file.exists() {
                fs::remove_file(&state_file).map_err(|e| EngineError::io(&state_file, e))?;
                deleted_state_files.push(backup_id);
            }
        }

        Ok(CleanupOutcome { deleted_artifacts, deleted_state_files })
    }
}

/// Uses mtime rather than platform birthtime: birthtime support is
/// inconsistent across filesystems (notably ext4 without extended
/// attributes), while mtime is universally available and is what the
/// Writer actually sets when it finishes an artifact.
fn artifact_created_at(path: &Path) -> EngineResult<SystemTime> {
    let metadata = fs::metadata(path).map_err(|e| EngineError::io(path, e))?;
    metadata.modified().or_else(|_| metadata.created()).map_err(|e| EngineError::io(path, e))
}
