use std::fs;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{EngineError, EngineResult};
use crate::model::{BackupMetadata, BackupType};
use crate::verify::{list_backup_artifacts, read_artifact_file, Verifier};
use crate::writer::METADATA_FILENAME;

/// One resolved member of a restore chain, in application order.
#[derive(Debug, Clone)]
struct ChainMember {
    artifact_path: PathBuf,
    metadata: BackupMetadata,
}

/// Stages a restore run passes through, in order; `Failed` is reachable
/// from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStage {
    Planning,
    Verifying,
    Applying,
    Cleaning,
    Done,
}

pub struct RestoreOutcome {
    /// Backup ids applied, oldest first: the resolved Full followed by its
    /// Incrementals.
    pub chain: Vec<String>,
    pub files_written: usize,
    pub files_deleted: usize,
}

/// Resolves and replays a chain of backups into a target tree. A failed
/// `Applying` step is not rolled back; the target is assumed empty or
/// caller-owned.
pub struct Restorer;

impl Restorer {
    /// Restores `destination`'s chain as of `point_in_time` (inclusive,
    /// `YYYYMMDD_HHMMSS`) into `target`, or the latest chain when `None`.
    pub fn restore(destination: &Path, target: &Path, point_in_time: Option<&str>) -> EngineResult<RestoreOutcome> {
        let chain = Self::resolve_chain(destination, point_in_time)?;
        if chain.is_empty() {
            return Err(EngineError::StateCorruption(format!(
                "no restorable backup chain found in {}",
                destination.display()
            )));
        }

        for member in &chain {
            let result = Verifier::verify_artifact(&member.artifact_path, &member.metadata)?;
            if !result.is_clean() {
                return Err(EngineError::IntegrityMismatch(format!(
                    "backup {} failed integrity check before restore: corrupted={:?} missing={:?} extra={:?}",
                    member.metadata.backup_id(),
                    result.corrupted,
                    result.missing,
                    result.extra
                )));
            }
        }

        fs::create_dir_all(target).map_err(|e| EngineError::io(target, e))?;

        let mut files_written = 0;
        let mut files_deleted = 0;

        for member in &chain {
            for entry in &member.metadata.entries {
                let dest_path = resolve_under(target, &entry.relative_path)?;
                if let Some(parent) = dest_path.parent() {
                    fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
                }
                match read_artifact_file(&member.artifact_path, &entry.relative_path)? {
                    Some(bytes) => {
                        fs::write(&dest_path, bytes).map_err(|e| EngineError::io(&dest_path, e))?;
                        files_written += 1;
                    }
                    None => log::warn!(
                        "backup {} lists {} in metadata but the artifact has no such file; skipping",
                        member.metadata.backup_id(),
                        entry.relative_path
                    ),
                }
            }

            for deleted in &member.metadata.deleted_files {
                let victim = resolve_under(target, deleted)?;
                if victim.is_dir() {
                    fs::remove_dir_all(&victim).map_err(|e| EngineError::io(&victim, e))?;
                    files_deleted += 1;
                } else if victim.exists() {
                    fs::remove_file(&victim).map_err(|e| EngineError::io(&victim, e))?;
                    files_deleted += 1;
                }
            }
        }

        strip_stray_metadata(target)?;

        Ok(RestoreOutcome {
            chain: chain.iter().map(|m| m.metadata.backup_id()).collect(),
            files_written,
            files_deleted,
        })
    }

    /// Resolves the chain without applying it: the latest Full on or before
    /// `point_in_time`, followed by every Incremental strictly newer than
    /// that Full and no later than `point_in_time`.
    fn resolve_chain(destination: &Path, point_in_time: Option<&str>) -> EngineResult<Vec<ChainMember>> {
        let mut candidates = Vec::new();
        for artifact_path in list_backup_artifacts(destination)? {
            let metadata = load_candidate_metadata(&artifact_path)?;
            candidates.push(ChainMember { artifact_path, metadata });
        }
        candidates.sort_by(|a, b| a.metadata.timestamp.cmp(&b.metadata.timestamp));

        let cutoff = point_in_time.unwrap_or("99999999_999999").to_string();

        let full_index = candidates
            .iter()
            .rposition(|c| c.metadata.backup_type == BackupType::Full && c.metadata.timestamp <= cutoff);

        let Some(full_index) = full_index else {
            return Ok(Vec::new());
        };

        let full_timestamp = candidates[full_index].metadata.timestamp.clone();
        let mut chain = vec![candidates[full_index].clone()];

        for candidate in candidates.into_iter().skip(full_index + 1) {
            if candidate.metadata.timestamp > cutoff {
                break;
            }
            if candidate.metadata.backup_type == BackupType::Incremental && candidate.metadata.timestamp > full_timestamp {
                chain.push(candidate);
            }
        }

        Ok(chain)
    }
}

/// Loads `.backup-metadata.json`, normalizing a loosely-cased `backup_type`
/// before the strict sum-type deserialization of the rest of the record.
fn load_candidate_metadata(artifact_path: &Path) -> EngineResult<BackupMetadata> {
    let raw = read_artifact_file(artifact_path, METADATA_FILENAME)?.ok_or_else(|| {
        EngineError::StateCorruption(format!("missing {METADATA_FILENAME} in {}", artifact_path.display()))
    })?;

    let mut value: serde_json::Value = serde_json::from_slice(&raw).map_err(|e| {
        EngineError::StateCorruption(format!("malformed metadata in {}: {e}", artifact_path.display()))
    })?;

    let raw_type = value
        .get("backup_type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            EngineError::StateCorruption(format!("missing backup_type in {}", artifact_path.display()))
        })?
        .to_string();
    let normalized = BackupType::normalize(&raw_type).ok_or_else(|| {
        EngineError::StateCorruption(format!(
            "unrecognized backup_type {raw_type:?} in {}",
            artifact_path.display()
        ))
    })?;
    let canonical = match normalized {
        BackupType::Full => "Full",
        BackupType::Incremental => "Incremental",
    };
    value["backup_type"] = serde_json::Value::String(canonical.to_string());

    serde_json::from_value(value).map_err(|e| {
        EngineError::StateCorruption(format!("malformed metadata in {}: {e}", artifact_path.display()))
    })
}

/// Joins `relative_path` onto `target`, refusing any path that would
/// resolve outside it.
fn resolve_under(target: &Path, relative_path: &str) -> EngineResult<PathBuf> {
    let mut resolved = target.to_path_buf();
    for component in Path::new(relative_path).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if resolved == target {
                    return Err(EngineError::IntegrityMismatch(format!(
                        "path {relative_path:?} escapes restore target"
                    )));
                }
                resolved.pop();
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(EngineError::IntegrityMismatch(format!("path {relative_path:?} is not relative")))
            }
        }
    }
    Ok(resolved)
}

/// Removes any `.backup-metadata.json` left behind inside the restored
/// tree. A correctness requirement, not tidiness: the restored tree must
/// look exactly like the original source.
fn strip_stray_metadata(target: &Path) -> EngineResult<()> {
    for entry in WalkDir::new(target).follow_links(false) {
        let entry = entry.map_err(|e| EngineError::IoMessage(e.to_string()))?;
        if entry.file_type().is_file() && entry.file_name() == METADATA_FILENAME {
            fs::remove_file(entry.path()).map_err(|e| EngineError::io(entry.path(), e))?;
        }
    }
    Ok(())
}
