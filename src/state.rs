use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::{EngineError, EngineResult};
use crate::model::{FileEntry, Snapshot};

const LATEST_FILE: &str = "latest.json";
const PREV_FILE: &str = "prev.json";
const LOCK_FILE: &str = ".lock";

/// Persists and loads the three state roles (`latest`, `prev`,
/// per-backup) that live under `<dest>/states/`.
pub struct StateStore {
    states_dir: PathBuf,
}

impl StateStore {
    pub fn new(destination: &Path) -> Self {
        StateStore { states_dir: destination.join("states") }
    }

    pub fn states_dir(&self) -> &Path {
        &self.states_dir
    }

    fn ensure_dir(&self) -> EngineResult<()> {
        fs::create_dir_all(&self.states_dir).map_err(|e| EngineError::io(&self.states_dir, e))
    }

    fn backup_file(&self, backup_id: &str) -> PathBuf {
        self.states_dir.join(format!("{backup_id}.json"))
    }

    pub fn load_latest(&self) -> EngineResult<Option<Snapshot>> {
        self.load_named(LATEST_FILE)
    }

    pub fn load_prev(&self) -> EngineResult<Option<Snapshot>> {
        self.load_named(PREV_FILE)
    }

    pub fn load_for_backup(&self, backup_id: &str) -> EngineResult<Option<Snapshot>> {
        self.load_path(&self.backup_file(backup_id))
    }

    fn load_named(&self, name: &str) -> EngineResult<Option<Snapshot>> {
        self.load_path(&self.states_dir.join(name))
    }

    fn load_path(&self, path: &Path) -> EngineResult<Option<Snapshot>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        let entries: Vec<FileEntry> = serde_json::from_str(&raw)
            .map_err(|e| EngineError::StateCorruption(format!("malformed state file {}: {e}", path.display())))?;
        Ok(Some(Snapshot::from_entries(entries)))
    }

    /// Atomically writes `<backup_id>.json`, then promotes the previous
    /// `latest.json` to `prev.json`, then writes the new `latest.json`.
    /// Every write goes through a temp-file-then-rename so a crash at any
    /// point leaves the store in a valid prior state, never a mix.
    pub fn commit(&self, snapshot: &Snapshot, backup_id: &str) -> EngineResult<()> {
        self.ensure_dir()?;

        let entries: Vec<&FileEntry> = snapshot.iter().collect();
        let backup_path = self.backup_file(backup_id);
        write_atomic(&backup_path, &entries)?;

        let latest_path = self.states_dir.join(LATEST_FILE);
        if latest_path.exists() {
            let prev_path = self.states_dir.join(PREV_FILE);
            fs::rename(&latest_path, &prev_path).map_err(|e| EngineError::io(&prev_path, e))?;
        }

        write_atomic(&latest_path, &entries)?;
        Ok(())
    }

    /// Acquires the process-local advisory lock guarding `commit` for this
    /// destination. Locks older than `staleness` are reclaimed with a
    /// warning rather than blocking forever on a crashed run.
    pub fn acquire_lock(&self, staleness: Duration) -> EngineResult<LockGuard> {
        self.ensure_dir()?;
        let lock_path = self.states_dir.join(LOCK_FILE);

        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                Ok(LockGuard { path: lock_path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let age = fs::metadata(&lock_path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| SystemTime::now().duration_since(t).ok())
                    .unwrap_or(Duration::ZERO);

                if age > staleness {
                    log::warn!(
                        "reclaiming stale lock at {} (age {:?} exceeds {:?})",
                        lock_path.display(),
                        age,
                        staleness
                    );
                    fs::remove_file(&lock_path).map_err(|e| EngineError::io(&lock_path, e))?;
                    let mut file = File::create(&lock_path).map_err(|e| EngineError::io(&lock_path, e))?;
                    let _ = write!(file, "{}", std::process::id());
                    Ok(LockGuard { path: lock_path })
                } else {
                    Err(EngineError::Concurrency(format!(
                        "destination is locked by another run: {}",
                        lock_path.display()
                    )))
                }
            }
            Err(e) => Err(EngineError::io(&lock_path, e)),
        }
    }
}

/// Releases the lock file when dropped.
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn write_atomic<T: serde::Serialize>(path: &Path, value: &T) -> EngineResult<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| EngineError::StateCorruption(format!("failed to serialize state: {e}")))?;

    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp_path).map_err(|e| EngineError::io(&tmp_path, e))?;
        file.write_all(&json).map_err(|e| EngineError::io(&tmp_path, e))?;
        file.sync_all().map_err(|e| EngineError::io(&tmp_path, e))?;
    }
    fs::rename(&tmp_path, path).map_err(|e| EngineError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(path: &str) -> FileEntry {
        FileEntry {
            relative_path: path.to_string(),
            size_bytes: 1,
            modified_at: Utc::now(),
            content_hash: Some("h".to_string()),
        }
    }

    #[test]
    fn commit_rotates_latest_into_prev() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());

        let first = Snapshot::from_entries(vec![entry("a.txt")]);
        store.commit(&first, "job_1").unwrap();
        assert!(store.load_prev().unwrap().is_none());
        assert_eq!(store.load_latest().unwrap().unwrap().len(), 1);

        let second = Snapshot::from_entries(vec![entry("a.txt"), entry("b.txt")]);
        store.commit(&second, "job_2").unwrap();

        assert_eq!(store.load_prev().unwrap().unwrap().len(), 1);
        assert_eq!(store.load_latest().unwrap().unwrap().len(), 2);
        assert_eq!(store.load_for_backup("job_1").unwrap().unwrap().len(), 1);
        assert_eq!(store.load_for_backup("job_2").unwrap().unwrap().len(), 2);
    }

    #[test]
    fn lock_blocks_concurrent_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let guard = store.acquire_lock(Duration::from_secs(3600)).unwrap();

        let err = store.acquire_lock(Duration::from_secs(3600)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Concurrency);

        drop(guard);
        assert!(store.acquire_lock(Duration::from_secs(3600)).is_ok());
    }

    #[test]
    fn malformed_state_file_is_state_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        fs::create_dir_all(store.states_dir()).unwrap();
        fs::write(store.states_dir().join(LATEST_FILE), b"not json").unwrap();

        let err = store.load_latest().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::StateCorruption);
    }
}
