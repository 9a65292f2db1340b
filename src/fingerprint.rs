use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use chrono::{DateTime, Utc};
use ring::digest::{Context, SHA256};

use crate::error::{EngineError, EngineResult};
use crate::model::FileEntry;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// One unit of fingerprinting work: an absolute path paired with the
/// relative path it will be recorded under.
#[derive(Debug, Clone)]
pub struct FingerprintTask {
    pub absolute_path: PathBuf,
    pub relative_path: String,
}

/// Computes `(size, mtime, sha256_hex)` for a single file. Streams the
/// file through a fixed-size buffer rather than reading it whole. A
/// permission-denied read is a soft error: the entry comes back with
/// `content_hash: None` rather than propagating as an `Err`.
pub fn fingerprint_file(task: &FingerprintTask) -> EngineResult<FileEntry> {
    let metadata = std::fs::symlink_metadata(&task.absolute_path)
        .map_err(|e| EngineError::io(&task.absolute_path, e))?;

    let size_bytes = metadata.len();
    let modified_at: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let content_hash = match hash_file(&task.absolute_path) {
        Ok(hash) => Some(hash),
        Err(e) => {
            log::warn!(
                "soft error fingerprinting {}: {e}; recording with null hash",
                task.absolute_path.display()
            );
            None
        }
    };

    Ok(FileEntry {
        relative_path: task.relative_path.clone(),
        size_bytes,
        modified_at,
        content_hash,
    })
}

fn hash_file(path: &Path) -> EngineResult<String> {
    let mut file = File::open(path).map_err(|e| EngineError::io(path, e))?;
    let mut context = Context::new(&SHA256);
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    loop {
        let count = file.read(&mut buffer).map_err(|e| EngineError::io(path, e))?;
        if count == 0 {
            break;
        }
        context.update(&buffer[..count]);
    }

    Ok(hex::encode(context.finish().as_ref()))
}

/// Fingerprints every task using a bounded worker pool of up to
/// `thread_count` threads. Results come back in arbitrary order; callers
/// that need path order should sort afterwards (the Snapshotter does).
pub fn fingerprint_all(tasks: Vec<FingerprintTask>, thread_count: usize) -> Vec<EngineResult<FileEntry>> {
    if tasks.is_empty() {
        return Vec::new();
    }

    let thread_count = thread_count.max(1).min(tasks.len());
    let (task_tx, task_rx) = mpsc::channel::<FingerprintTask>();
    let (result_tx, result_rx) = mpsc::channel::<EngineResult<FileEntry>>();
    let task_rx = std::sync::Mutex::new(task_rx);

    std::thread::scope(|scope| {
        for _ in 0..thread_count {
            let result_tx = result_tx.clone();
            let task_rx = &task_rx;
            scope.spawn(move || {
                while let Ok(task) = {
                    let rx = task_rx.lock().unwrap();
                    rx.recv()
                } {
                    let _ = result_tx.send(fingerprint_file(&task));
                }
            });
        }
        drop(result_tx);

        let total = tasks.len();
        for task in tasks {
            let _ = task_tx.send(task);
        }
        drop(task_tx);

        let mut results = Vec::with_capacity(total);
        for _ in 0..total {
            results.push(result_rx.recv().expect("worker pool dropped before finishing"));
        }
        results
    })
}
