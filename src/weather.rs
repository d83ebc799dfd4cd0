//! Gridded weather input for the simulator.
//!
//! Each run needs the 6-hourly archive files covering its window. Files are
//! kept in a local directory keyed by file name and only fetched when absent.
use crate::constants::{WEATHER_REFORMAT_EPOCH, WEATHER_WINDOW_HOURS};
use crate::time_utils::floor_to;
use chrono::{DateTime, Duration, Timelike, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

#[derive(thiserror::Error, Debug)]
pub enum WeatherError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("fetch of {url} failed: {reason}")]
    Fetch { url: String, reason: String },
}

/// Downloads one remote file to a local path.
pub trait WeatherFetcher: Send + Sync {
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), WeatherError>;
}

/// Fetches with the `curl` executable, which speaks both ftp and http.
#[derive(Debug, Clone)]
pub struct CurlFetcher {
    pub program: PathBuf,
}

impl Default for CurlFetcher {
    fn default() -> Self {
        Self {
            program: PathBuf::from("curl"),
        }
    }
}

impl WeatherFetcher for CurlFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), WeatherError> {
        let output = Command::new(&self.program)
            .arg("--fail")
            .arg("--silent")
            .arg("--show-error")
            .arg("--output")
            .arg(dest)
            .arg(url)
            .output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(WeatherError::Fetch {
                url: url.to_string(),
                reason: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })
        }
    }
}

/// 6-hour-aligned UTC times whose files cover a run of `run_hours` from `start`.
pub fn weather_times(start: DateTime<Utc>, run_hours: u32) -> Vec<DateTime<Utc>> {
    let step_secs = WEATHER_WINDOW_HOURS * 3600;
    let cutoff = floor_to(
        start + Duration::hours(run_hours as i64 + WEATHER_WINDOW_HOURS),
        step_secs,
    );
    let mut times = Vec::new();
    let mut t = start;
    while t < cutoff {
        times.push(floor_to(t, step_secs));
        t += Duration::hours(WEATHER_WINDOW_HOURS);
    }
    times
}

pub fn weather_file_name(t: DateTime<Utc>) -> String {
    t.format("hysplit.%Y%m%d.%Hz.hrrra").to_string()
}

/// Remote location of the file for `t`. The archive layout changed in July 2019;
/// which one applies depends on the run start, not on `t`.
pub fn weather_url(base_url: &str, t: DateTime<Utc>, run_start: DateTime<Utc>) -> String {
    let base = base_url.trim_end_matches('/');
    if run_start.timestamp() > WEATHER_REFORMAT_EPOCH {
        format!(
            "{}/hrrr/{}{:02}_hrrr",
            base,
            t.format("%Y%m%d_%H-"),
            t.hour() + 5
        )
    } else {
        format!("{}/hrrr.v1/{}", base, weather_file_name(t))
    }
}

/// Local weather directory backed by a remote archive.
pub struct WeatherArchive {
    dir: PathBuf,
    base_url: String,
    fetcher: Box<dyn WeatherFetcher>,
}

impl WeatherArchive {
    pub fn new(dir: impl Into<PathBuf>, base_url: &str, fetcher: Box<dyn WeatherFetcher>) -> Self {
        Self {
            dir: dir.into(),
            base_url: base_url.to_string(),
            fetcher,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Local paths (present or not) for a run window.
    pub fn files_for(&self, start: DateTime<Utc>, run_hours: u32) -> Vec<PathBuf> {
        weather_times(start, run_hours)
            .into_iter()
            .map(|t| self.dir.join(weather_file_name(t)))
            .collect()
    }

    /// Make sure every file of the window is present locally, fetching missing ones.
    pub fn ensure(&self, start: DateTime<Utc>, run_hours: u32) -> Result<Vec<PathBuf>, WeatherError> {
        fs::create_dir_all(&self.dir)?;
        let mut paths = Vec::new();
        for t in weather_times(start, run_hours) {
            let path = self.dir.join(weather_file_name(t));
            if path.exists() {
                debug!(path = %path.display(), "weather file present");
            } else {
                let url = weather_url(&self.base_url, t, start);
                self.download(&url, &path)?;
            }
            paths.push(path);
        }
        Ok(paths)
    }

    fn download(&self, url: &str, path: &Path) -> Result<(), WeatherError> {
        // concurrent runs may want the same file; each downloads to its own part file
        let part = path.with_extension(format!("part_{}_{}", std::process::id(), crate::cache::thread_tag()));
        info!(url, dest = %path.display(), "fetching weather file");
        if let Err(err) = self.fetcher.fetch(url, &part) {
            let _ = fs::remove_file(&part);
            return Err(err);
        }
        if !part.exists() {
            return Err(WeatherError::Fetch {
                url: url.to_string(),
                reason: "fetcher reported success but wrote no file".to_string(),
            });
        }
        fs::rename(&part, path)?;
        Ok(())
    }
}
