use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One record per source file, keyed externally by `relative_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub relative_path: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
    /// `None` when the file could not be hashed (permission denied). A
    /// `None` hash never compares equal to anything, including itself.
    pub content_hash: Option<String>,
}

impl FileEntry {
    /// Whether two entries would be considered the same content for diffing
    /// purposes. A soft-error entry (`content_hash: None`) is never unchanged.
    pub fn content_matches(&self, other: &FileEntry) -> bool {
        match (&self.content_hash, &other.content_hash) {
            (Some(a), Some(b)) => a == b && self.size_bytes == other.size_bytes,
            _ => false,
        }
    }
}

/// The set of [`FileEntry`] for one source tree at one instant, keyed by
/// `relative_path`. Construction enforces uniqueness; callers build one via
/// [`Snapshot::from_entries`] rather than touching the map directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    files: BTreeMap<String, FileEntry>,
}

impl Snapshot {
    pub fn from_entries(entries: Vec<FileEntry>) -> Self {
        let mut files = BTreeMap::new();
        for entry in entries {
            files.insert(entry.relative_path.clone(), entry);
        }
        Snapshot { files }
    }

    pub fn get(&self, relative_path: &str) -> Option<&FileEntry> {
        self.files.get(relative_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Paths that collide when compared case-insensitively but differ in
    /// case — the Planner and Restorer must fail the run when this is
    /// non-empty.
    pub fn case_collisions(&self) -> Vec<(String, String)> {
        let mut by_lower: BTreeMap<String, String> = BTreeMap::new();
        let mut collisions = Vec::new();
        for path in self.files.keys() {
            let lower = path.to_lowercase();
            if let Some(existing) = by_lower.get(&lower) {
                if existing != path {
                    collisions.push((existing.clone(), path.clone()));
                }
            } else {
                by_lower.insert(lower, path.clone());
            }
        }
        collisions
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum BackupType {
    Full,
    Incremental,
}

impl BackupType {
    /// Normalizes a loosely-cased/prefixed value (as produced by older
    /// tooling) into the canonical sum type. Anything else is rejected.
    pub fn normalize(raw: &str) -> Option<BackupType> {
        let trimmed = raw.trim().to_lowercase();
        if trimmed == "full" || trimmed.ends_with("full") {
            Some(BackupType::Full)
        } else if trimmed == "incremental" || trimmed.ends_with("incremental") || trimmed == "incr" {
            Some(BackupType::Incremental)
        } else {
            None
        }
    }
}

/// Written into each backup artifact as `.backup-metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub backup_name: String,
    pub backup_type: BackupType,
    /// `YYYYMMDD_HHMMSS`, local time.
    pub timestamp: String,
    pub source_path: String,
    pub parent_backup: Option<String>,
    #[serde(default)]
    pub deleted_files: Vec<String>,
    pub entries: Vec<FileEntry>,
}

impl BackupMetadata {
    /// The identifier used as this backup's key in `states/` and in
    /// `parent_backup` references: `<backup_name>_<timestamp>`.
    pub fn backup_id(&self) -> String {
        format!("{}_{}", self.backup_name, self.timestamp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "HMACSHA256")]
    HmacSha256,
    #[serde(rename = "HMACSHA1")]
    HmacSha1,
}

/// Side-car record binding a report's bytes to a MAC computed with a key
/// from the OS secret store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSignature {
    pub report_file: String,
    pub algorithm: HashAlgorithm,
    pub hash: String,
    pub signed_at: DateTime<Utc>,
    pub signed_by: String,
    pub credential_target: String,
}

/// Outcome of verifying one backup artifact against its metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationResult {
    pub backup_id: String,
    pub intact: bool,
    pub corrupted: Vec<String>,
    pub missing: Vec<String>,
    pub extra: Vec<String>,
}

impl VerificationResult {
    pub fn is_clean(&self) -> bool {
        self.corrupted.is_empty() && self.missing.is_empty() && self.extra.is_empty()
    }
}

/// Summary of the cross-backup sweep performed after every successful run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepResult {
    pub checked: Vec<VerificationResult>,
}

/// The engine-level summary assembled after a `Backup` run. This is the
/// canonical JSON the engine produces; HTML/CSV rendering of the same data
/// is left to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupReport {
    pub metadata: BackupMetadata,
    pub files_scanned: usize,
    pub files_copied: usize,
    pub files_deleted: usize,
    pub soft_failures: Vec<String>,
    pub duration_ms: u64,
    /// `false` when any per-file `IOFailure` occurred in the Snapshotter or
    /// Writer. A non-success report was never committed to `StateStore` and
    /// was not swept; callers must not sign it.
    pub success: bool,
    pub sweep: SweepResult,
}
