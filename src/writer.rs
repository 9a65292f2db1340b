use std::fs::{self, File};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{EngineError, EngineResult};
use crate::model::{BackupMetadata, BackupType, FileEntry};

pub const METADATA_FILENAME: &str = ".backup-metadata.json";

/// Outcome of a single [`Writer::write`] call.
pub struct WriteOutcome {
    pub artifact_path: PathBuf,
    pub metadata: BackupMetadata,
    pub files_copied: usize,
    pub soft_failures: Vec<String>,
}

/// Materializes a backup artifact (directory or ZIP) containing the files
/// selected by the Planner, plus the embedded `.backup-metadata.json`.
/// Runs on a single thread so artifact layout stays deterministic.
pub struct Writer;

#[allow(clippy::too_many_arguments)]
impl Writer {
    pub fn write(
        source_root: &Path,
        destination: &Path,
        backup_name: &str,
        timestamp: &str,
        backup_type: BackupType,
        parent_backup: Option<String>,
        files_to_copy: &[FileEntry],
        deleted_files: Vec<String>,
        as_archive: bool,
        cancel: Option<&Arc<AtomicBool>>,
    ) -> EngineResult<WriteOutcome> {
        fs::create_dir_all(destination).map_err(|e| EngineError::io(destination, e))?;

        let metadata = BackupMetadata {
            backup_name: backup_name.to_string(),
            backup_type,
            timestamp: timestamp.to_string(),
            source_path: source_root.to_string_lossy().to_string(),
            parent_backup,
            deleted_files,
            entries: files_to_copy.to_vec(),
        };

        let result = if as_archive {
            Self::write_archive(source_root, destination, backup_name, timestamp, &metadata, cancel)
        } else {
            Self::write_directory(source_root, destination, backup_name, timestamp, &metadata, cancel)
        };

        match result {
            Ok((artifact_path, files_copied, soft_failures)) => {
                Ok(WriteOutcome { artifact_path, metadata, files_copied, soft_failures })
            }
            Err(e) => Err(e),
        }
    }

    fn write_directory(
        source_root: &Path,
        destination: &Path,
        backup_name: &str,
        timestamp: &str,
        metadata: &BackupMetadata,
        cancel: Option<&Arc<AtomicBool>>,
    ) -> EngineResult<(PathBuf, usize, Vec<String>)> {
        let artifact_path = destination.join(format!("{backup_name}_{timestamp}"));
        fs::create_dir_all(&artifact_path).map_err(|e| EngineError::io(&artifact_path, e))?;

        let mut copied = 0;
        let mut soft_failures = Vec::new();

        for entry in &metadata.entries {
            if is_cancelled(cancel) {
                let _ = fs::remove_dir_all(&artifact_path);
                return Err(EngineError::Cancelled);
            }

            let src = source_root.join(&entry.relative_path);
            let dst = artifact_path.join(&entry.relative_path);
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
            }

            match fs::copy(&src, &dst) {
                Ok(_) => copied += 1,
                Err(e) => soft_failures.push(format!("{}: {e}", entry.relative_path)),
            }
        }

        let metadata_path = artifact_path.join(METADATA_FILENAME);
        write_metadata(&metadata_path, metadata)?;

        Ok((artifact_path, copied, soft_failures))
    }

    fn write_archive(
        source_root: &Path,
        destination: &Path,
        backup_name: &str,
        timestamp: &str,
        metadata: &BackupMetadata,
        cancel: Option<&Arc<AtomicBool>>,
    ) -> EngineResult<(PathBuf, usize, Vec<String>)> {
        let artifact_path = destination.join(format!("{backup_name}_{timestamp}.zip"));
        let file = File::create(&artifact_path).map_err(|e| EngineError::io(&artifact_path, e))?;
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut copied = 0;
        let mut soft_failures = Vec::new();

        let abort = |zip: ZipWriter<File>, path: &Path| -> EngineResult<()> {
            drop(zip);
            let _ = fs::remove_file(path);
            Ok(())
        };

        for entry in &metadata.entries {
            if is_cancelled(cancel) {
                abort(zip, &artifact_path)?;
                return Err(EngineError::Cancelled);
            }

            let src = source_root.join(&entry.relative_path);
            match fs::read(&src) {
                Ok(bytes) => {
                    zip.start_file(&entry.relative_path, options)
                        .map_err(|e| EngineError::IoMessage(format!("failed to start zip entry: {e}")))?;
                    zip.write_all(&bytes)
                        .map_err(|e| EngineError::IoMessage(format!("failed to write zip entry: {e}")))?;
                    copied += 1;
                }
                Err(e) => soft_failures.push(format!("{}: {e}", entry.relative_path)),
            }
        }

        let metadata_json = serde_json::to_vec_pretty(metadata)
            .map_err(|e| EngineError::StateCorruption(format!("failed to serialize metadata: {e}")))?;
        zip.start_file(METADATA_FILENAME, options)
            .map_err(|e| EngineError::IoMessage(format!("failed to start metadata entry: {e}")))?;
        zip.write_all(&metadata_json)
            .map_err(|e| EngineError::IoMessage(format!("failed to write metadata entry: {e}")))?;

        zip.finish().map_err(|e| EngineError::IoMessage(format!("failed to finalize zip: {e}")))?;

        Ok((artifact_path, copied, soft_failures))
    }
}

fn write_metadata(path: &Path, metadata: &BackupMetadata) -> EngineResult<()> {
    let json = serde_json::to_vec_pretty(metadata)
        .map_err(|e| EngineError::StateCorruption(format!("failed to serialize metadata: {e}")))?;
    fs::write(path, json).map_err(|e| EngineError::io(path, e))
}

fn is_cancelled(cancel: Option<&Arc<AtomicBool>>) -> bool {
    cancel.map(|flag| flag.load(Ordering::SeqCst)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(path: &str, size: u64) -> FileEntry {
        FileEntry { relative_path: path.to_string(), size_bytes: size, modified_at: Utc::now(), content_hash: Some("h".into()) }
    }

    #[test]
    fn writes_directory_artifact_with_metadata() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a.txt"), b"alpha").unwrap();
        let dest = tempfile::tempdir().unwrap();

        let outcome = Writer::write(
            src.path(),
            dest.path(),
            "job",
            "20260101_000000",
            BackupType::Full,
            None,
            &[entry("a.txt", 5)],
            vec![],
            false,
            None,
        )
        .unwrap();

        assert_eq!(outcome.files_copied, 1);
        assert!(outcome.soft_failures.is_empty());
        assert!(outcome.artifact_path.join("a.txt").exists());
        assert!(outcome.artifact_path.join(METADATA_FILENAME).exists());
    }

    #[test]
    fn writes_zip_artifact() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a.txt"), b"alpha").unwrap();
        let dest = tempfile::tempdir().unwrap();

        let outcome = Writer::write(
            src.path(),
            dest.path(),
            "job",
            "20260101_000000",
            BackupType::Full,
            None,
            &[entry("a.txt", 5)],
            vec![],
            true,
            None,
        )
        .unwrap();

        assert_eq!(outcome.files_copied, 1);
        assert!(outcome.artifact_path.extension().unwrap() == "zip");
        assert!(outcome.artifact_path.exists());
    }
}
