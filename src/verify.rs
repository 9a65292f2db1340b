use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use ring::digest::{Context, SHA256};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::error::{EngineError, EngineResult};
use crate::model::{BackupMetadata, SweepResult, VerificationResult};
use crate::writer::METADATA_FILENAME;

/// Verifies backup artifacts against their recorded metadata. Entirely
/// read-only: never requires write access to the destination.
pub struct Verifier;

impl Verifier {
    /// Single-backup verification: recomputes the hash of every entry in
    /// `metadata` against the file found inside `artifact_path`, then
    /// classifies the artifact's actual contents against what metadata
    /// expects.
    pub fn verify_artifact(artifact_path: &Path, metadata: &BackupMetadata) -> EngineResult<VerificationResult> {
        let actual_paths = list_artifact_file_paths(artifact_path)?;

        let mut corrupted = Vec::new();
        let mut missing = Vec::new();

        for entry in &metadata.entries {
            match read_artifact_file(artifact_path, &entry.relative_path)? {
                None => missing.push(entry.relative_path.clone()),
                Some(bytes) => {
                    let actual_hash = hash_bytes(&bytes);
                    if entry.content_hash.as_deref() != Some(actual_hash.as_str()) {
                        corrupted.push(entry.relative_path.clone());
                    }
                }
            }
        }

        let expected: std::collections::HashSet<&str> =
            metadata.entries.iter().map(|e| e.relative_path.as_str()).collect();
        let mut extra: Vec<String> = actual_paths
            .into_iter()
            .filter(|p| !expected.contains(p.as_str()) && p != METADATA_FILENAME)
            .collect();
        extra.sort();
        corrupted.sort();
        missing.sort();

        let intact = corrupted.is_empty() && missing.is_empty() && extra.is_empty();

        Ok(VerificationResult {
            backup_id: metadata.backup_id(),
            intact,
            corrupted,
            missing,
            extra,
        })
    }

    /// Loads `<artifact>/.backup-metadata.json` (or the zip entry of the
    /// same name) and verifies it in one step.
    pub fn verify_backup(artifact_path: &Path) -> EngineResult<VerificationResult> {
        let metadata = load_metadata(artifact_path)?;
        Self::verify_artifact(artifact_path, &metadata)
    }

    /// Cross-backup sweep: verifies every sibling artifact under
    /// `destination` (skipping `states/`). Never mutates what it inspects.
    pub fn sweep(destination: &Path) -> EngineResult<SweepResult> {
        let mut checked = Vec::new();
        for artifact_path in list_backup_artifacts(destination)? {
            match Self::verify_backup(&artifact_path) {
                Ok(result) => checked.push(result),
                Err(e) => {
                    log::warn!("sweep could not verify {}: {e}", artifact_path.display());
                }
            }
        }
        Ok(SweepResult { checked })
    }
}

/// Lists backup artifacts (directories and `.zip` files) directly under
/// `destination`, skipping the `states/` directory.
pub fn list_backup_artifacts(destination: &Path) -> EngineResult<Vec<PathBuf>> {
    if !destination.exists() {
        return Ok(Vec::new());
    }
    let mut artifacts = Vec::new();
    for entry in fs::read_dir(destination).map_err(|e| EngineError::io(destination, e))? {
        let entry = entry.map_err(|e| EngineError::io(destination, e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name == "states" {
            continue;
        }
        if path.is_dir() || name.ends_with(".zip") {
            artifacts.push(path);
        }
    }
    artifacts.sort();
    Ok(artifacts)
}

pub fn load_metadata(artifact_path: &Path) -> EngineResult<BackupMetadata> {
    let raw = match read_artifact_file(artifact_path, METADATA_FILENAME)? {
        Some(bytes) => bytes,
        None => {
            return Err(EngineError::StateCorruption(format!(
                "missing {METADATA_FILENAME} in {}",
                artifact_path.display()
            )))
        }
    };
    serde_json::from_slice(&raw).map_err(|e| {
        EngineError::StateCorruption(format!("malformed metadata in {}: {e}", artifact_path.display()))
    })
}

pub(crate) fn list_artifact_file_paths(artifact_path: &Path) -> EngineResult<Vec<String>> {
    if artifact_path.is_dir() {
        let mut paths = Vec::new();
        for entry in WalkDir::new(artifact_path).follow_links(false) {
            let entry = entry.map_err(|e| EngineError::IoMessage(e.to_string()))?;
            if entry.file_type().is_file() {
                if let Ok(rel) = entry.path().strip_prefix(artifact_path) {
                    paths.push(normalize_components(rel));
                }
            }
        }
        Ok(paths)
    } else {
        let file = File::open(artifact_path).map_err(|e| EngineError::io(artifact_path, e))?;
        let mut archive =
            ZipArchive::new(file).map_err(|e| EngineError::IoMessage(format!("failed to open zip: {e}")))?;
        let mut paths = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let entry = archive
                .by_index(i)
                .map_err(|e| EngineError::IoMessage(format!("failed to read zip entry: {e}")))?;
            if !entry.is_dir() {
                paths.push(entry.name().to_string());
            }
        }
        Ok(paths)
    }
}

pub(crate) fn read_artifact_file(artifact_path: &Path, relative_path: &str) -> EngineResult<Option<Vec<u8>>> {
    if artifact_path.is_dir() {
        let file_path = artifact_path.join(relative_path);
        if !file_path.exists() {
            return Ok(None);
        }
        fs::read(&file_path).map(Some).map_err(|e| EngineError::io(&file_path, e))
    } else {
        let file = File::open(artifact_path).map_err(|e| EngineError::io(artifact_path, e))?;
        let mut archive =
            ZipArchive::new(file).map_err(|e| EngineError::IoMessage(format!("failed to open zip: {e}")))?;
        match archive.by_name(relative_path) {
            Ok(mut entry) => {
                let mut buf = Vec::with_capacity(entry.size() as usize);
                entry
                    .read_to_end(&mut buf)
                    .map_err(|e| EngineError::IoMessage(format!("failed to read zip entry: {e}")))?;
                Ok(Some(buf))
            }
            Err(zip::result::ZipError::FileNotFound) => Ok(None),
            Err(e) => Err(EngineError::IoMessage(format!("failed to read zip entry: {e}"))),
        }
    }
}

fn normalize_components(path: &Path) -> String {
    path.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect::<Vec<_>>().join("/")
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut context = Context::new(&SHA256);
    context.update(bytes);
    hex::encode(context.finish().as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackupType, FileEntry};
    use chrono::Utc;

    fn write_full_directory_backup(dest: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let artifact = dest.join(format!("{name}_20260101_000000"));
        fs::create_dir_all(&artifact).unwrap();
        let mut entries = Vec::new();
        for (path, content) in files {
            fs::write(artifact.join(path), content).unwrap();
            entries.push(FileEntry {
                relative_path: path.to_string(),
                size_bytes: content.len() as u64,
                modified_at: Utc::now(),
                content_hash: Some(hash_bytes(content.as_bytes())),
            });
        }
        let metadata = BackupMetadata {
            backup_name: name.to_string(),
            backup_type: BackupType::Full,
            timestamp: "20260101_000000".to_string(),
            source_path: "/src".to_string(),
            parent_backup: None,
            deleted_files: vec![],
            entries,
        };
        fs::write(artifact.join(METADATA_FILENAME), serde_json::to_vec_pretty(&metadata).unwrap()).unwrap();
        artifact
    }

    #[test]
    fn intact_backup_verifies_clean() {
        let dest = tempfile::tempdir().unwrap();
        let artifact = write_full_directory_backup(dest.path(), "job", &[("a.txt", "alpha")]);
        let result = Verifier::verify_backup(&artifact).unwrap();
        assert!(result.is_clean());
        assert!(result.intact);
    }

    #[test]
    fn tampered_file_is_corrupted() {
        let dest = tempfile::tempdir().unwrap();
        let artifact = write_full_directory_backup(dest.path(), "job", &[("a.txt", "alpha")]);
        fs::write(artifact.join("a.txt"), "ALPHX").unwrap();

        let result = Verifier::verify_backup(&artifact).unwrap();
        assert!(!result.intact);
        assert_eq!(result.corrupted, vec!["a.txt".to_string()]);
        assert!(result.missing.is_empty());
        assert!(result.extra.is_empty());
    }

    #[test]
    fn missing_file_is_reported() {
        let dest = tempfile::tempdir().unwrap();
        let artifact = write_full_directory_backup(dest.path(), "job", &[("a.txt", "alpha")]);
        fs::remove_file(artifact.join("a.txt")).unwrap();

        let result = Verifier::verify_backup(&artifact).unwrap();
        assert_eq!(result.missing, vec!["a.txt".to_string()]);
    }

    #[test]
    fn extra_file_is_reported() {
        let dest = tempfile::tempdir().unwrap();
        let artifact = write_full_directory_backup(dest.path(), "job", &[("a.txt", "alpha")]);
        fs::write(artifact.join("surprise.txt"), "oops").unwrap();

        let result = Verifier::verify_backup(&artifact).unwrap();
        assert_eq!(result.extra, vec!["surprise.txt".to_string()]);
    }

    #[test]
    fn sweep_skips_states_directory() {
        let dest = tempfile::tempdir().unwrap();
        write_full_directory_backup(dest.path(), "job1", &[("a.txt", "alpha")]);
        fs::create_dir_all(dest.path().join("states")).unwrap();
        fs::write(dest.path().join("states").join("latest.json"), "[]").unwrap();

        let sweep = Verifier::sweep(dest.path()).unwrap();
        assert_eq!(sweep.checked.len(), 1);
    }
}
