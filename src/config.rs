use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

fn default_hash_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(8))
        .unwrap_or(1)
}

fn default_credential_target() -> String {
    "FileGuardian.ReportSigning".to_string()
}

fn default_lock_staleness_secs() -> u64 {
    6 * 60 * 60
}

/// Engine-level knobs, distinct from the presentation-layer config (CLI
/// flags, scheduler entries) that is out of this crate's scope. Loaded from
/// TOML the same way the surrounding application loads its own config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(default = "default_hash_threads")]
    pub hash_threads: usize,
    #[serde(default)]
    pub default_exclude_patterns: Vec<String>,
    #[serde(default = "default_credential_target")]
    pub credential_target: String,
    #[serde(default = "default_lock_staleness_secs")]
    pub lock_staleness_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            hash_threads: default_hash_threads(),
            default_exclude_patterns: Vec::new(),
            credential_target: default_credential_target(),
            lock_staleness_secs: default_lock_staleness_secs(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> EngineResult<EngineConfig> {
        let raw = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        toml::from_str(&raw)
            .map_err(|e| EngineError::Configuration(format!("invalid config at {}: {e}", path.display())))
    }
}

/// Explicit value threaded through every engine operation instead of
/// process-global state: the engine's config plus nothing else mutable.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub config: EngineConfig,
}

impl EngineContext {
    pub fn new(config: EngineConfig) -> Self {
        EngineContext { config }
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        EngineContext { config: EngineConfig::default() }
    }
}
