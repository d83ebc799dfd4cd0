//! Content-addressed cache of dispersion runs.
//!
//! An entry is a directory named by the descriptor's cache key and is complete
//! once it holds the simulator's output file. Entries are built in a private
//! working directory next to the final path and published with one rename, so
//! readers never see a half-built entry and completed entries need no lock.

pub mod lock;
pub mod simulator;

pub use lock::{FileLockGuard, LockError, LockOptions};
pub use simulator::{ExecutableSimulator, Simulator, SimulatorExit};

use crate::config::PipelineConfig;
use crate::constants::RUN_LOG_FILE;
use crate::control_files::write_control_files;
use crate::run_descriptor::RunDescriptor;
use crate::weather::{CurlFetcher, WeatherArchive, WeatherError};
use chrono::Utc;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("weather input unavailable: {0}")]
    Weather(#[from] WeatherError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("simulator exited with {code:?} in {work_dir}: {detail}")]
    SimulatorExit {
        code: Option<i32>,
        detail: String,
        work_dir: PathBuf,
    },
    #[error("simulator exited cleanly but {missing} was not written")]
    MissingOutput { missing: PathBuf },
    #[error("cache entry {0} has no completion marker")]
    Incomplete(PathBuf),
}

/// Small per-thread number, stable for the thread's lifetime. Together with the
/// pid it names working directories and part files.
pub fn thread_tag() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static TAG: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    TAG.with(|tag| *tag)
}

/// `path` with `suffix` appended to its last component.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

pub struct RunCacheProps {
    pub cache_root: PathBuf,
    pub weather: WeatherArchive,
    pub simulator: Box<dyn Simulator>,
    pub boundary_dir: PathBuf,
    pub output_name: String,
    pub lock: LockOptions,
}

pub struct RunCache {
    cache_root: PathBuf,
    weather: WeatherArchive,
    simulator: Box<dyn Simulator>,
    boundary_dir: PathBuf,
    output_name: String,
    lock: LockOptions,
}

impl RunCache {
    pub fn new(props: RunCacheProps) -> RunCache {
        RunCache {
            cache_root: props.cache_root,
            weather: props.weather,
            simulator: props.simulator,
            boundary_dir: props.boundary_dir,
            output_name: props.output_name,
            lock: props.lock,
        }
    }

    /// Cache wired to the real simulator executable and a curl-backed weather archive.
    pub fn from_config(config: &PipelineConfig) -> RunCache {
        RunCache::new(RunCacheProps {
            cache_root: config.cache_root.clone(),
            weather: WeatherArchive::new(
                config.weather_dir.clone(),
                &config.weather_archive_url,
                Box::new(CurlFetcher::default()),
            ),
            simulator: Box::new(ExecutableSimulator::new(config.simulator_exec())),
            boundary_dir: config.boundary_dir(),
            output_name: config.output_name.clone(),
            lock: config.lock_options(),
        })
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn entry_path(&self, run: &RunDescriptor) -> PathBuf {
        run.cache_path(&self.cache_root)
    }

    pub fn is_complete(&self, entry: &Path) -> bool {
        entry.join(&self.output_name).is_file()
    }

    /// Minutely dumps contain everything an hourly run would, so an hourly
    /// request is served by a completed minutely entry when one exists.
    pub fn resolve_variant(&self, run: &RunDescriptor) -> RunDescriptor {
        if run.hourly_pardump() && !self.is_complete(&self.entry_path(run)) {
            let minutely = run.with_hourly_pardump(false);
            if self.is_complete(&self.entry_path(&minutely)) {
                debug!(key = %minutely.cache_key(), "reusing minutely dump for hourly request");
                return minutely;
            }
        }
        run.clone()
    }

    /// Path of the completed entry for `run`, running the simulator if no
    /// process has produced it yet.
    pub fn find_or_run(&self, run: &RunDescriptor) -> Result<PathBuf, RunError> {
        let run = self.resolve_variant(run);
        let entry = self.entry_path(&run);
        if self.is_complete(&entry) {
            debug!(entry = %entry.display(), "cache hit");
            return Ok(entry);
        }

        if let Some(parent) = entry.parent() {
            create_dir_tolerant(parent)?;
        }

        let guard = FileLockGuard::acquire(&sibling(&entry, ".lock"), &self.lock)?;

        // someone else may have finished while we waited
        if self.is_complete(&entry) {
            debug!(entry = %entry.display(), "completed by another worker");
            drop(guard);
            return Ok(entry);
        }

        let published = self.build_and_publish(&run, &entry);
        drop(guard);
        published?;

        if !self.is_complete(&entry) {
            return Err(RunError::Incomplete(entry));
        }
        Ok(entry)
    }

    /// Called with the entry lock held.
    fn build_and_publish(&self, run: &RunDescriptor, entry: &Path) -> Result<(), RunError> {
        let work_dir = sibling(
            entry,
            &format!(".tmp_{}_{}", std::process::id(), thread_tag()),
        );
        let built = self.build(run, entry, &work_dir);
        if let Err(err) = &built {
            error!(
                key = %run.cache_key(),
                work_dir = %work_dir.display(),
                entry = %entry.display(),
                settings = %run.settings_string(),
                at = %Utc::now().to_rfc3339(),
                error = %err,
                "dispersion run failed"
            );
        }
        built
    }

    fn build(&self, run: &RunDescriptor, entry: &Path, work_dir: &Path) -> Result<(), RunError> {
        // only this pid+thread could have created it, and it is not running anything now
        if work_dir.exists() {
            warn!(work_dir = %work_dir.display(), "removing leftover working directory");
            fs::remove_dir_all(work_dir)?;
        }
        if entry.exists() {
            warn!(entry = %entry.display(), "removing entry without completion marker");
            fs::remove_dir_all(entry)?;
        }
        fs::create_dir_all(work_dir)?;

        let mut log = RunLog::create(work_dir)?;
        log.line(&format!("run {} settings {}", run.cache_key(), run.settings_string()));
        info!(key = %run.cache_key(), work_dir = %work_dir.display(), "running dispersion");

        if let Err(err) = self.simulate(run, work_dir, &mut log) {
            log.line(&format!("failed: {err}"));
            return Err(err);
        }

        log.line("success");
        drop(log);
        fs::rename(work_dir, entry)?;
        info!(entry = %entry.display(), "dispersion run published");
        Ok(())
    }

    fn simulate(&self, run: &RunDescriptor, work_dir: &Path, log: &mut RunLog) -> Result<(), RunError> {
        let weather_files = self.weather.ensure(run.start_utc(), run.run_whole_hours())?;
        log.line(&format!("weather inputs: {}", weather_files.len()));

        write_control_files(
            work_dir,
            run,
            &weather_files,
            &self.boundary_dir,
            &self.output_name,
        )?;

        match self.simulator.run(work_dir)? {
            SimulatorExit::Success => {}
            SimulatorExit::Failed { code, detail } => {
                return Err(RunError::SimulatorExit {
                    code,
                    detail,
                    work_dir: work_dir.to_path_buf(),
                });
            }
        }

        let marker = work_dir.join(&self.output_name);
        if !marker.is_file() {
            return Err(RunError::MissingOutput { missing: marker });
        }
        Ok(())
    }
}

/// `create_dir_all` that shrugs off a concurrent creator.
fn create_dir_tolerant(dir: &Path) -> io::Result<()> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(err) => Err(err),
    }
}

/// Plain-text log kept inside the working directory so it travels with the entry.
struct RunLog {
    file: File,
}

impl RunLog {
    fn create(work_dir: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(work_dir.join(RUN_LOG_FILE))?;
        Ok(Self { file })
    }

    fn line(&mut self, message: &str) {
        let stamped = format!(
            "{} {} {} {}\n",
            std::process::id(),
            thread_tag(),
            Utc::now().to_rfc3339(),
            message
        );
        if let Err(err) = self.file.write_all(stamped.as_bytes()) {
            warn!(%err, "could not write run log");
        }
    }
}
