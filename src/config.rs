use crate::cache::LockOptions;
use crate::constants::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("max_concurrency must be at least 1")]
    Concurrency,
}

/// Everything the cache, scheduler and plume pipeline need to know about
/// the host: where things live and how hard to push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root of the shared dispersion cache.
    pub cache_root: PathBuf,
    /// Local copy of the weather archive.
    pub weather_dir: PathBuf,
    /// Text conversions of particle dumps live here, never inside cache entries.
    pub scratch_dir: PathBuf,
    /// Simulator installation (contains `exec/` and `bdyfiles/`).
    pub simulator_root: PathBuf,
    pub weather_archive_url: String,
    pub max_concurrency: usize,
    pub lock_poll_ms: u64,
    pub stale_lock_secs: Option<u64>,
    pub lock_timeout_secs: Option<u64>,
    /// Concentration output; its presence marks a run complete.
    pub output_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("dispersion_cache"),
            weather_dir: PathBuf::from("hrrr"),
            scratch_dir: PathBuf::from("pardump_text"),
            simulator_root: PathBuf::from("/projects/hysplit"),
            weather_archive_url: DEFAULT_WEATHER_ARCHIVE_URL.to_string(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            lock_poll_ms: DEFAULT_LOCK_POLL_MS,
            stale_lock_secs: None,
            lock_timeout_secs: None,
            output_name: DEFAULT_OUTPUT_NAME.to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: PipelineConfig =
            serde_json::from_str(text).map_err(|source| ConfigError::Parse {
                path: origin.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text, path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Concurrency);
        }
        Ok(())
    }

    pub fn simulator_exec(&self) -> PathBuf {
        self.simulator_root.join(SIMULATOR_EXEC)
    }

    pub fn par2asc_exec(&self) -> PathBuf {
        self.simulator_root.join(PAR2ASC_EXEC)
    }

    pub fn boundary_dir(&self) -> PathBuf {
        self.simulator_root.join(BOUNDARY_DIR)
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            poll: Duration::from_millis(self.lock_poll_ms.max(1)),
            stale_after: self.stale_lock_secs.map(Duration::from_secs),
            timeout: self.lock_timeout_secs.map(Duration::from_secs),
        }
    }
}
