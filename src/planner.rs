use crate::error::{EngineError, EngineResult};
use crate::model::{BackupType, FileEntry, Snapshot};

/// The result of comparing two snapshots, keyed by `relative_path`.
#[derive(Debug, Clone, Default)]
pub struct SnapshotDiff {
    pub new_files: Vec<FileEntry>,
    pub modified_files: Vec<FileEntry>,
    pub deleted_paths: Vec<String>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty() && self.modified_files.is_empty() && self.deleted_paths.is_empty()
    }

    /// Files that must be physically copied into the artifact: New ∪ Modified.
    pub fn files_to_copy(&self) -> Vec<&FileEntry> {
        self.new_files.iter().chain(self.modified_files.iter()).collect()
    }
}

/// Decides Full vs Incremental and computes the snapshot diff that drives
/// the Writer. Stateless — all inputs are passed in explicitly.
pub struct Planner;

impl Planner {
    /// Diffs `old` against `new`. `Planner::diff(s, s)` is always empty
    /// (idempotence).
    pub fn diff(old: &Snapshot, new: &Snapshot) -> EngineResult<SnapshotDiff> {
        let collisions = new.case_collisions();
        if !collisions.is_empty() {
            return Err(EngineError::StateCorruption(format!(
                "case-only path collision(s) in snapshot: {:?}",
                collisions
            )));
        }

        let mut diff = SnapshotDiff::default();

        for entry in new.iter() {
            match old.get(&entry.relative_path) {
                None => diff.new_files.push(entry.clone()),
                Some(old_entry) => {
                    if !entry.content_matches(old_entry) {
                        diff.modified_files.push(entry.clone());
                    }
                }
            }
        }

        for entry in old.iter() {
            if new.get(&entry.relative_path).is_none() {
                diff.deleted_paths.push(entry.relative_path.clone());
            }
        }

        diff.new_files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        diff.modified_files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        diff.deleted_paths.sort();

        Ok(diff)
    }

    /// Decides the backup type for this run. Forcing Full always wins;
    /// requesting Incremental with no prior state degrades to Full with a
    /// warning; otherwise the caller's request is honored.
    pub fn decide_backup_type(requested: BackupType, has_latest_state: bool) -> BackupType {
        match requested {
            BackupType::Full => BackupType::Full,
            BackupType::Incremental if !has_latest_state => {
                log::warn!("incremental requested but no prior state exists; producing a Full backup");
                BackupType::Full
            }
            BackupType::Incremental => BackupType::Incremental,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(path: &str, hash: &str, size: u64) -> FileEntry {
        FileEntry {
            relative_path: path.to_string(),
            size_bytes: size,
            modified_at: Utc::now(),
            content_hash: Some(hash.to_string()),
        }
    }

    #[test]
    fn diff_is_empty_for_identical_snapshots() {
        let snap = Snapshot::from_entries(vec![entry("a.txt", "h1", 5), entry("b.txt", "h2", 7)]);
        let diff = Planner::diff(&snap, &snap).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn classifies_new_modified_deleted_unchanged() {
        let old = Snapshot::from_entries(vec![
            entry("a.txt", "h1", 5),
            entry("b.txt", "h2", 7),
            entry("c.txt", "h3", 3),
        ]);
        let new = Snapshot::from_entries(vec![
            entry("a.txt", "h1-changed", 6), // modified
            entry("b.txt", "h2", 7),          // unchanged
            entry("d.txt", "h4", 2),          // new
            // c.txt deleted
        ]);

        let diff = Planner::diff(&old, &new).unwrap();
        assert_eq!(diff.new_files.len(), 1);
        assert_eq!(diff.new_files[0].relative_path, "d.txt");
        assert_eq!(diff.modified_files.len(), 1);
        assert_eq!(diff.modified_files[0].relative_path, "a.txt");
        assert_eq!(diff.deleted_paths, vec!["c.txt".to_string()]);
    }

    #[test]
    fn null_hash_never_counts_as_unchanged() {
        let mut soft = entry("a.txt", "h1", 5);
        soft.content_hash = None;
        let old = Snapshot::from_entries(vec![soft.clone()]);
        let new = Snapshot::from_entries(vec![soft]);

        let diff = Planner::diff(&old, &new).unwrap();
        assert_eq!(diff.modified_files.len(), 1);
    }

    #[test]
    fn rejects_case_only_collisions() {
        let old = Snapshot::default();
        let new = Snapshot::from_entries(vec![entry("A.txt", "h1", 1), entry("a.txt", "h2", 2)]);
        let err = Planner::diff(&old, &new).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::StateCorruption);
    }

    #[test]
    fn mtime_alone_does_not_classify_as_modified() {
        let mut newer = entry("a.txt", "h1", 5);
        newer.modified_at = Utc::now() + chrono::Duration::seconds(60);
        let old = Snapshot::from_entries(vec![entry("a.txt", "h1", 5)]);
        let new = Snapshot::from_entries(vec![newer]);

        let diff = Planner::diff(&old, &new).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn incremental_without_state_degrades_to_full() {
        let decided = Planner::decide_backup_type(BackupType::Incremental, false);
        assert_eq!(decided, BackupType::Full);
    }

    #[test]
    fn forced_full_always_wins() {
        let decided = Planner::decide_backup_type(BackupType::Full, true);
        assert_eq!(decided, BackupType::Full);
    }
}
