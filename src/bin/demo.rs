//! Minimal end-to-end demonstration: runs a Full backup, an Incremental
//! backup, verifies the result, and restores it into a scratch directory.
//! Not a CLI surface in its own right — see the library's public functions
//! in `src/lib.rs` for that.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use file_guardian::{backup, restore, verify_sweep, BackupRequest, BackupType, EngineConfig, EngineContext};

fn main() -> ExitCode {
    env_logger::init();

    let mut args = env::args().skip(1);
    let source: PathBuf = match args.next() {
        Some(s) => PathBuf::from(s),
        None => {
            eprintln!("usage: file-guardian-demo <source-dir> <destination-dir>");
            return ExitCode::FAILURE;
        }
    };
    let destination: PathBuf = match args.next() {
        Some(s) => PathBuf::from(s),
        None => {
            eprintln!("usage: file-guardian-demo <source-dir> <destination-dir>");
            return ExitCode::FAILURE;
        }
    };

    let ctx = EngineContext::new(EngineConfig::default());

    let report = match backup(
        &ctx,
        &BackupRequest {
            source_root: source,
            destination: destination.clone(),
            backup_name: "demo".to_string(),
            requested_type: BackupType::Incremental,
            as_archive: false,
            cancel: None,
        },
    ) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("backup failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!(
        "backup {} complete: {} scanned, {} copied, {} deleted, {} soft failures",
        report.metadata.backup_id(),
        report.files_scanned,
        report.files_copied,
        report.files_deleted,
        report.soft_failures.len()
    );

    match verify_sweep(&destination) {
        Ok(sweep) => {
            let unclean = sweep.checked.iter().filter(|r| !r.is_clean()).count();
            println!("sweep checked {} artifact(s), {} unclean", sweep.checked.len(), unclean);
        }
        Err(e) => eprintln!("sweep failed: {e}"),
    }

    let restore_target = destination.join("restore-preview");
    match restore(&destination, &restore_target, None) {
        Ok(outcome) => println!(
            "restore preview into {} applied chain {:?} ({} written, {} deleted)",
            restore_target.display(),
            outcome.chain,
            outcome.files_written,
            outcome.files_deleted
        ),
        Err(e) => eprintln!("restore preview failed: {e}"),
    }

    ExitCode::SUCCESS
}
