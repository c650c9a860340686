//! Config loading and persistence.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dynstream::AreaSettings;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stream: StreamConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Number of dynamic streams in the parallel dispatcher.
    pub stream_count: usize,
    /// Worker threads per stream; 0 divides available parallelism evenly.
    pub workers_per_stream: usize,
    /// Max events a worker handles per dispatch before yielding the path.
    pub handle_batch: usize,
    pub default_area: AreaSettings,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_count: 8,
            workers_per_stream: 0,
            handle_batch: 32,
            default_area: AreaSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Upper bound on one serialized log record.
    pub max_record_bytes: usize,
    /// Budget for one persistent write; exceeding it is fatal.
    pub write_timeout_ms: u64,
    pub write_retry_attempts: u32,
    pub write_retry_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_record_bytes: 4 << 20,
            write_timeout_ms: 10_000,
            write_retry_attempts: 3,
            write_retry_backoff_ms: 100,
        }
    }
}

pub fn load(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .map_err(|e| config_error(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&contents)
        .map_err(|e| config_error(format!("failed to parse {}: {e}", path.display())))
}

pub fn load_or_default(path: &Path) -> Config {
    if path.exists() {
        match load(path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                tracing::warn!("config load failed, using defaults: {e}");
                return Config::default();
            }
        }
    }
    Config::default()
}

pub fn write_config(path: &Path, cfg: &Config) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .map_err(|e| config_error(format!("failed to create {}: {e}", dir.display())))?;
    }
    let contents = toml::to_string_pretty(cfg)
        .map_err(|e| config_error(format!("failed to render config: {e}")))?;
    atomic_write(path, contents.as_bytes())
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| config_error("config path missing parent directory".to_string()))?;
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        config_error(format!(
            "failed to create temp file in {}: {e}",
            dir.display()
        ))
    })?;
    fs::write(temp.path(), data)
        .map_err(|e| config_error(format!("failed to write config temp file: {e}")))?;
    temp.persist(path).map_err(|e| {
        config_error(format!(
            "failed to persist config to {}: {e}",
            path.display()
        ))
    })?;
    Ok(())
}

fn config_error(reason: String) -> Error {
    Error::Config { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let cfg = Config {
            stream: StreamConfig {
                stream_count: 4,
                workers_per_stream: 2,
                handle_batch: 16,
                default_area: AreaSettings {
                    memory_quota: 1024,
                    max_pending_size: 4096,
                },
            },
            storage: StorageConfig {
                max_record_bytes: 1 << 20,
                write_timeout_ms: 2_000,
                write_retry_attempts: 5,
                write_retry_backoff_ms: 50,
            },
        };
        write_config(&path, &cfg).expect("write config");
        let loaded = load(&path).expect("load config");
        assert_eq!(loaded.stream.stream_count, 4);
        assert_eq!(loaded.stream.default_area.memory_quota, 1024);
        assert_eq!(loaded.storage.write_timeout_ms, 2_000);
        assert_eq!(loaded.storage.write_retry_attempts, 5);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_or_default(&dir.path().join("absent.toml"));
        assert_eq!(cfg.stream.stream_count, 8);
        assert_eq!(cfg.storage.write_timeout_ms, 10_000);
    }
}
