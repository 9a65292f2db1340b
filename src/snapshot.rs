use std::path::Path;

use globset::{Glob, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::{EngineError, EngineResult};
use crate::fingerprint::{fingerprint_all, FingerprintTask};
use crate::model::{FileEntry, Snapshot};

/// Walks a source tree, honoring exclusion globs, and fingerprints every
/// eligible file into a [`Snapshot`]. Enumeration order is always sorted by
/// relative path so two runs over an unchanged tree produce an identical
/// snapshot.
pub struct Snapshotter {
    exclude_patterns: Vec<String>,
    hash_threads: usize,
}

impl Snapshotter {
    pub fn new(exclude_patterns: Vec<String>, hash_threads: usize) -> Self {
        Snapshotter { exclude_patterns, hash_threads }
    }

    pub fn snapshot(&self, source_root: &Path) -> EngineResult<(Snapshot, Vec<String>)> {
        let case_insensitive = filesystem_is_case_insensitive(source_root);
        let excludes = build_glob_set(&self.exclude_patterns, case_insensitive)?;

        let mut tasks = Vec::new();
        let mut soft_failures = Vec::new();

        let mut walker = WalkDir::new(source_root).follow_links(false).into_iter();
        loop {
            let entry = match walker.next() {
                None => break,
                Some(Ok(entry)) => entry,
                Some(Err(err)) => {
                    log::warn!("skipping unreadable directory entry: {err}");
                    continue;
                }
            };

            let relative = match entry.path().strip_prefix(source_root) {
                Ok(rel) if !rel.as_os_str().is_empty() => rel,
                _ => continue,
            };
            let relative_str = normalize_relative(relative);

            if excludes.is_match(&relative_str) {
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                log::warn!("skipping symlink: {}", entry.path().display());
                continue;
            }
            if file_type.is_dir() {
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            tasks.push(FingerprintTask {
                absolute_path: entry.path().to_path_buf(),
                relative_path: relative_str,
            });
        }

        tasks.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        let mut entries: Vec<FileEntry> = Vec::with_capacity(tasks.len());
        for result in fingerprint_all(tasks, self.hash_threads) {
            match result {
                Ok(entry) => entries.push(entry),
                Err(EngineError::Io { path, source }) => {
                    soft_failures.push(format!("{}: {}", path.display(), source));
                }
                Err(other) => return Err(other),
            }
        }
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        Ok((Snapshot::from_entries(entries), soft_failures))
    }
}

fn normalize_relative(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_glob_set(patterns: &[String], case_insensitive: bool) -> EngineResult<globset::GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::builder(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| EngineError::Configuration(format!("invalid exclude pattern {pattern:?}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| EngineError::Configuration(format!("invalid exclude pattern set: {e}")))
}

/// Best-effort case-sensitivity probe: creates a lowercase marker file, then
/// checks whether its uppercase form resolves to the same inode. Falls back
/// to the platform default (case-insensitive on macOS/Windows, sensitive on
/// Linux) when the probe itself cannot run (e.g. read-only source root).
#[cfg(target_os = "linux")]
fn filesystem_is_case_insensitive(_root: &Path) -> bool {
    false
}

#[cfg(not(target_os = "linux"))]
fn filesystem_is_case_insensitive(_root: &Path) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn snapshot_is_sorted_and_excludes_globs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/x.js"), b"x").unwrap();

        let snapshotter = Snapshotter::new(vec!["node_modules/**".to_string()], 2);
        let (snapshot, soft_failures) = snapshotter.snapshot(dir.path()).unwrap();

        assert!(soft_failures.is_empty());
        let paths: Vec<&str> = snapshot.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn directory_exclusion_prunes_subtree() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("cache/deep/nested")).unwrap();
        fs::write(dir.path().join("cache/deep/nested/file.txt"), b"x").unwrap();
        fs::write(dir.path().join("keep.txt"), b"keep").unwrap();

        let snapshotter = Snapshotter::new(vec!["cache".to_string(), "cache/**".to_string()], 2);
        let (snapshot, _) = snapshotter.snapshot(dir.path()).unwrap();

        let paths: Vec<&str> = snapshot.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["keep.txt"]);
    }
}
