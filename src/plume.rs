//! One visualization day end to end: hourly dispersion runs for every source,
//! text conversion of their particle dumps, and a single packed artifact.

use crate::cache::{RunCache, RunError};
use crate::config::PipelineConfig;
use crate::convert::{ConvertError, DumpConverter};
use crate::pack::{PackError, PackOptions, PackedArtifact, default_palette, pack_multi_source};
use crate::run_descriptor::ModelSettings;
use crate::scheduler::{RunRequest, ScheduleError, run_request};
use crate::source::DispersionSource;
use crate::time_utils::{TimeError, parse_eastern};
use chrono::DateTime;
use chrono_tz::Tz;
use colored::Colorize;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum PlumeError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Pack(#[from] PackError),
    #[error("no sources given")]
    NoSources,
    #[error("source {0} produced no usable runs")]
    NoRuns(String),
}

#[derive(Debug, Clone)]
pub struct PlumeJob {
    /// First hour of the window, in the sources' local timezone.
    pub start_local: DateTime<Tz>,
    pub output: PathBuf,
    pub sources: Vec<Arc<DispersionSource>>,
    pub emit_hours: f64,
    pub duration_hours: u32,
    /// Probability of dropping each particle, for every source.
    pub filter_ratio: f64,
    pub settings: ModelSettings,
    pub pack: PackOptions,
}

impl PlumeJob {
    pub fn new(start_local: DateTime<Tz>, output: impl Into<PathBuf>, sources: Vec<Arc<DispersionSource>>) -> Self {
        Self {
            start_local,
            output: output.into(),
            sources,
            emit_hours: 1.0,
            duration_hours: 24,
            filter_ratio: 0.8,
            settings: ModelSettings::default(),
            pack: PackOptions::default(),
        }
    }

    /// Job starting at `YYYY-MM-DD HH:MM` US Eastern.
    pub fn eastern(
        start: &str,
        output: impl Into<PathBuf>,
        sources: Vec<Arc<DispersionSource>>,
    ) -> Result<Self, TimeError> {
        Ok(Self::new(parse_eastern(start)?, output, sources))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceOutcome {
    pub name: String,
    pub run_dirs: Vec<PathBuf>,
    pub failed_runs: usize,
    pub failed_conversions: usize,
}

#[derive(Debug, Clone)]
pub struct PlumeReport {
    pub artifact: PackedArtifact,
    pub sources: Vec<SourceOutcome>,
}

impl PlumeReport {
    /// Console summary, one line per source.
    pub fn print_summary(&self) {
        println!("{}", format!("packed {}", self.artifact.binary.display()).bold());
        for source in &self.sources {
            let ok = format!("{} runs", source.run_dirs.len()).green();
            let failed = source.failed_runs + source.failed_conversions;
            if failed == 0 {
                println!("   {:<12} {}", source.name, ok);
            } else {
                println!("   {:<12} {} {}", source.name, ok, format!("{failed} failed").red());
            }
        }
        println!("   {} records", self.artifact.records);
    }
}

/// Convert each run to text, keeping the successes in order.
fn convert_runs(
    converter: &DumpConverter,
    cache_root: &Path,
    runs: Vec<Result<PathBuf, RunError>>,
    outcome: &mut SourceOutcome,
) {
    let converted: Vec<Result<PathBuf, ConvertError>> = runs
        .into_par_iter()
        .filter_map(|run| match run {
            Ok(entry) => Some(converter.ensure_text(cache_root, &entry)),
            Err(_) => None,
        })
        .collect();

    for result in converted {
        match result {
            Ok(dir) => outcome.run_dirs.push(dir),
            Err(err) => {
                warn!(source = %outcome.name, %err, "particle dump conversion failed");
                outcome.failed_conversions += 1;
            }
        }
    }
}

/// Run the whole day for `job`. Individual failed runs are tolerated; a
/// source left with no runs at all is an error.
pub fn run_plume_job(config: &PipelineConfig, cache: &RunCache, job: &PlumeJob) -> Result<PlumeReport, PlumeError> {
    if job.sources.is_empty() {
        return Err(PlumeError::NoSources);
    }
    let colors = default_palette(job.sources.len())?;
    let start = job.start_local;
    let converter = DumpConverter::new(config.par2asc_exec(), config.scratch_dir.clone());

    info!(start = %start, output = %job.output.display(), sources = job.sources.len(), "plume job");

    let mut outcomes = Vec::new();
    for source in &job.sources {
        let mut request = RunRequest::new(source.clone(), start, job.emit_hours, job.duration_hours);
        request.settings = job.settings;

        let runs = run_request(cache, &request, config.max_concurrency)?;
        let mut outcome = SourceOutcome {
            name: source.name().to_string(),
            failed_runs: runs.iter().filter(|r| r.is_err()).count(),
            ..SourceOutcome::default()
        };
        convert_runs(&converter, cache.cache_root(), runs, &mut outcome);
        if outcome.run_dirs.is_empty() {
            return Err(PlumeError::NoRuns(outcome.name));
        }
        outcomes.push(outcome);
    }

    let run_dirs: Vec<Vec<PathBuf>> = outcomes.iter().map(|o| o.run_dirs.clone()).collect();
    let ratios = vec![job.filter_ratio; run_dirs.len()];
    let artifact = pack_multi_source(&run_dirs, &job.output, &colors, &ratios, &job.pack)?;

    Ok(PlumeReport {
        artifact,
        sources: outcomes,
    })
}

/// Batch-friendly wrapper: skips jobs whose output exists, logs failures and
/// reports them as `false` instead of stopping the batch.
pub fn plume_worker(config: &PipelineConfig, cache: &RunCache, job: &PlumeJob) -> bool {
    if job.output.is_file() {
        info!(output = %job.output.display(), "output exists, skipping");
        return true;
    }
    match run_plume_job(config, cache, job) {
        Ok(report) => {
            report.print_summary();
            true
        }
        Err(err) => {
            error!(output = %job.output.display(), start = %job.start_local, %err, "plume job failed");
            println!("{} {}", "failed".red().bold(), job.output.display());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn irvin() -> Vec<Arc<DispersionSource>> {
        vec![Arc::new(DispersionSource::new("Irvin", 40.328015, -79.903551, 0.0, 50.0).unwrap())]
    }

    #[test]
    fn test_job_keeps_its_local_start() {
        let start = chrono_tz::America::Denver.with_ymd_and_hms(2020, 3, 30, 0, 0, 0).unwrap();
        let job = PlumeJob::new(start, "day.bin", irvin());
        assert_eq!(job.start_local, start);
        assert_eq!(job.start_local.timezone(), chrono_tz::America::Denver);
        assert_eq!(job.duration_hours, 24);
    }

    #[test]
    fn test_eastern_job_start() {
        let job = PlumeJob::eastern("2020-03-30 00:00", "day.bin", irvin()).unwrap();
        assert_eq!(job.start_local.timezone(), chrono_tz::America::New_York);
        // midnight EDT
        assert_eq!(job.start_local.naive_utc().to_string(), "2020-03-30 04:00:00");

        assert!(PlumeJob::eastern("30/03/2020", "day.bin", irvin()).is_err());
    }
}
