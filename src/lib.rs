pub mod config;
pub mod error;
pub mod fingerprint;
pub mod model;
pub mod planner;
pub mod restore;
pub mod retention;
pub mod sign;
pub mod snapshot;
pub mod state;
pub mod verify;
pub mod writer;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;

pub use config::{EngineConfig, EngineContext};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use model::{
    BackupMetadata, BackupReport, BackupType, FileEntry, HashAlgorithm, ReportSignature, Snapshot, SweepResult,
    VerificationResult,
};
pub use restore::{RestoreOutcome, RestoreStage, Restorer};
pub use retention::{CleanupOutcome, Retention};

use planner::Planner;
use snapshot::Snapshotter;
use state::StateStore;
use verify::Verifier;
use writer::Writer;

/// Everything a `backup` call needs that isn't already in [`EngineContext`].
pub struct BackupRequest {
    pub source_root: PathBuf,
    pub destination: PathBuf,
    pub backup_name: String,
    pub requested_type: BackupType,
    pub as_archive: bool,
    pub cancel: Option<Arc<AtomicBool>>,
}

/// Runs one backup end to end: snapshot the source, diff it against the
/// stored `latest` snapshot, write the resulting artifact, commit the new
/// state, then sweep every sibling artifact for integrity. Nothing is
/// committed to `states/` unless the run completes cleanly (including when
/// cancelled); a run with any soft file failure still returns `Ok`, but with
/// `success: false`, and skips the commit and the sweep. Callers must not
/// sign a report whose `success` is `false`.
pub fn backup(ctx: &EngineContext, request: &BackupRequest) -> EngineResult<BackupReport> {
    let start = Instant::now();
    log::info!(
        "starting {:?} backup of {} into {}",
        request.requested_type,
        request.source_root.display(),
        request.destination.display()
    );

    let state_store = StateStore::new(&request.destination);
    let _lock = state_store.acquire_lock(Duration::from_secs(ctx.config.lock_staleness_secs))?;

    let previous_latest = state_store.load_latest()?;
    let backup_type = Planner::decide_backup_type(request.requested_type, previous_latest.is_some());

    let snapshotter = Snapshotter::new(ctx.config.default_exclude_patterns.clone(), ctx.config.hash_threads);
    let (snapshot, mut soft_failures) = snapshotter.snapshot(&request.source_root)?;

    let baseline = match backup_type {
        BackupType::Incremental => previous_latest.clone().unwrap_or_default(),
        BackupType::Full => Snapshot::default(),
    };
    let diff = Planner::diff(&baseline, &snapshot)?;
    let files_to_copy: Vec<FileEntry> = diff.files_to_copy().into_iter().cloned().collect();

    let parent_backup =
        if backup_type == BackupType::Incremental { latest_backup_id(&request.destination)? } else { None };
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

    let outcome = Writer::write(
        &request.source_root,
        &request.destination,
        &request.backup_name,
        &timestamp,
        backup_type,
        parent_backup,
        &files_to_copy,
        diff.deleted_paths.clone(),
        request.as_archive,
        request.cancel.as_ref(),
    )?;

    // A per-file IOFailure in either the Snapshotter or the Writer is
    // recovered locally but must not let the run look like a clean success:
    // committing `latest.json` here would mark the unread/uncopied files as
    // already backed up, and they would never be retried.
    let success = soft_failures.is_empty() && outcome.soft_failures.is_empty();

    if success {
        state_store.commit(&snapshot, &outcome.metadata.backup_id())?;
        log::info!(
            "committed state for {} ({} files copied, {} deleted)",
            outcome.metadata.backup_id(),
            outcome.files_copied,
            diff.deleted_paths.len()
        );
    } else {
        log::warn!(
            "backup {} had {} soft failure(s); skipping state commit, cross-backup sweep, and signing",
            outcome.metadata.backup_id(),
            soft_failures.len() + outcome.soft_failures.len()
        );
    }

    let sweep = if success {
        let sweep = Verifier::sweep(&request.destination)?;
        if sweep.checked.iter().any(|r| !r.is_clean()) {
            log::warn!("post-backup sweep found unclean sibling artifacts under {}", request.destination.display());
        }
        sweep
    } else {
        SweepResult::default()
    };

    soft_failures.extend(outcome.soft_failures);

    Ok(BackupReport {
        metadata: outcome.metadata,
        files_scanned: snapshot.len(),
        files_copied: outcome.files_copied,
        files_deleted: diff.deleted_paths.len(),
        soft_failures,
        success,
        duration_ms: start.elapsed().as_millis() as u64,
        sweep,
    })
}

/// Verifies a single backup artifact against its own embedded metadata.
pub fn verify_backup(artifact_path: &std::path::Path) -> EngineResult<VerificationResult> {
    Verifier::verify_backup(artifact_path)
}

/// Verifies every sibling artifact under `destination` (skipping `states/`).
pub fn verify_sweep(destination: &std::path::Path) -> EngineResult<SweepResult> {
    Verifier::sweep(destination)
}

/// Signs `report_bytes` with the key held under `ctx.config.credential_target`.
pub fn sign_report(ctx: &EngineContext, report_bytes: &[u8], report_file: &str, signed_by: &str) -> EngineResult<ReportSignature> {
    sign::sign_report(report_bytes, report_file, &ctx.config.credential_target, signed_by)
}

/// Recomputes and compares a report's MAC in constant time.
pub fn verify_report(report_bytes: &[u8], signature: &ReportSignature) -> EngineResult<bool> {
    sign::verify_report(report_bytes, signature)
}

/// Generates and stores a new signing key under `ctx.config.credential_target`.
pub fn provision_signing_key(ctx: &EngineContext, force: bool) -> EngineResult<()> {
    sign::provision_signing_key(&ctx.config.credential_target, force)
}

/// Resolves and replays a backup chain into `target`.
pub fn restore(
    destination: &std::path::Path,
    target: &std::path::Path,
    point_in_time: Option<&str>,
) -> EngineResult<RestoreOutcome> {
    Restorer::restore(destination, target, point_in_time)
}

/// Deletes artifacts older than `retention_days`, subject to the safety
/// invariants described in [`retention::Retention::cleanup`].
pub fn cleanup(
    destination: &std::path::Path,
    retention_days: u64,
    name_filter: Option<&str>,
) -> EngineResult<CleanupOutcome> {
    Retention::cleanup(destination, retention_days, name_filter)
}

/// Finds the backup id of the most recently written artifact under
/// `destination`, used to populate `parent_backup` on the next Incremental.
fn latest_backup_id(destination: &std::path::Path) -> EngineResult<Option<String>> {
    let mut latest: Option<BackupMetadata> = None;
    for artifact_path in verify::list_backup_artifacts(destination)? {
        if let Ok(metadata) = verify::load_metadata(&artifact_path) {
            let is_newer = latest.as_ref().map(|m| metadata.timestamp > m.timestamp).unwrap_or(true);
            if is_newer {
                latest = Some(metadata);
            }
        }
    }
    Ok(latest.map(|m| m.backup_id()))
}
