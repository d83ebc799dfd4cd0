//! Fans one source and time window out into hourly dispersion runs and
//! drives them through the cache on a bounded pool.
use crate::cache::{RunCache, RunError};
use crate::constants::MAX_SLICE_RUN_HOURS;
use crate::run_descriptor::{DescriptorError, ModelSettings, RunDescriptor};
use crate::source::DispersionSource;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(thiserror::Error, Debug)]
pub enum ScheduleError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("window must cover at least one slice")]
    EmptyWindow,
    #[error("resolution must be at least one hour")]
    Resolution,
    #[error("could not build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// A source's time window, before it is cut into hourly slices.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub source: Arc<DispersionSource>,
    pub start_local: DateTime<Tz>,
    pub emit_hours: f64,
    pub total_hours: u32,
    /// Extra hours of emission simulated before `start_local`.
    pub backwards_hours: u32,
    pub resolution_hours: u32,
    pub settings: ModelSettings,
}

impl RunRequest {
    pub fn new(source: Arc<DispersionSource>, start_local: DateTime<Tz>, emit_hours: f64, total_hours: u32) -> Self {
        Self {
            source,
            start_local,
            emit_hours,
            total_hours,
            backwards_hours: 0,
            resolution_hours: 1,
            settings: ModelSettings::default(),
        }
    }

    /// One descriptor per slice. Slice `i` starts `i * resolution` hours after
    /// the (look-back extended) start and runs `min(remaining, 24)` hours.
    pub fn expand(&self) -> Result<Vec<RunDescriptor>, ScheduleError> {
        if self.resolution_hours == 0 {
            return Err(ScheduleError::Resolution);
        }
        if self.total_hours == 0 {
            return Err(ScheduleError::EmptyWindow);
        }

        let start_utc: DateTime<Utc> = self.start_local.with_timezone(&Utc);
        let first = start_utc - Duration::hours(self.backwards_hours as i64);
        let last = start_utc + Duration::hours(self.total_hours as i64 - 1);
        let window_hours = self.total_hours + self.backwards_hours;
        let tz = self.start_local.timezone();

        let mut runs = Vec::new();
        let mut slice = 0u32;
        loop {
            let offset = slice * self.resolution_hours;
            let slice_start = first + Duration::hours(offset as i64);
            if slice_start > last {
                break;
            }
            let run_hours = (window_hours - offset).min(MAX_SLICE_RUN_HOURS);
            runs.push(RunDescriptor::new(
                self.source.clone(),
                slice_start.with_timezone(&tz),
                self.emit_hours,
                run_hours as f64,
                self.settings,
            )?);
            slice += 1;
        }
        Ok(runs)
    }
}

/// Run every descriptor through `cache` with at most `max_concurrency` in flight.
/// Results come back in submission order; one failure does not stop the others.
pub fn run_all(
    cache: &RunCache,
    runs: &[RunDescriptor],
    max_concurrency: usize,
) -> Result<Vec<Result<PathBuf, RunError>>, ScheduleError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_concurrency.max(1))
        .thread_name(|i| format!("dispersion-{i}"))
        .build()?;

    let results: Vec<Result<PathBuf, RunError>> = pool.install(|| {
        runs.par_iter()
            .with_max_len(1)
            .map(|run| {
                let result = cache.find_or_run(run);
                if let Err(err) = &result {
                    warn!(key = %run.cache_key(), %err, "slice failed");
                }
                result
            })
            .collect()
    });

    let failed = results.iter().filter(|r| r.is_err()).count();
    info!(total = results.len(), failed, "dispersion slices finished");
    Ok(results)
}

/// Expand and run one request.
pub fn run_request(
    cache: &RunCache,
    request: &RunRequest,
    max_concurrency: usize,
) -> Result<Vec<Result<PathBuf, RunError>>, ScheduleError> {
    let runs = request.expand()?;
    info!(source = %request.source, slices = runs.len(), "scheduling dispersion runs");
    run_all(cache, &runs, max_concurrency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_utils::parse_eastern;
    use chrono::Timelike;

    fn irvin() -> Arc<DispersionSource> {
        Arc::new(DispersionSource::new("Irvin", 40.328015, -79.903551, 0.0, 50.0).unwrap())
    }

    #[test]
    fn test_day_expands_into_hourly_slices() {
        let request = RunRequest::new(irvin(), parse_eastern("2020-03-30 00:00").unwrap(), 1.0, 24);
        let runs = request.expand().unwrap();

        assert_eq!(runs.len(), 24);
        assert_eq!(runs[0].run_whole_hours(), 24);
        assert_eq!(runs[1].run_whole_hours(), 23);
        assert_eq!(runs[23].run_whole_hours(), 1);

        let window_end = runs[0].start_utc() + Duration::hours(24);
        for (i, run) in runs.iter().enumerate() {
            assert_eq!(run.start_local().hour() as usize, i);
            let end = run.start_utc() + Duration::hours(run.run_whole_hours() as i64);
            assert!(end <= window_end, "slice {i} overruns the window");
        }
    }

    #[test]
    fn test_look_back_extends_window() {
        let mut request = RunRequest::new(irvin(), parse_eastern("2020-03-30 00:00").unwrap(), 1.0, 24);
        request.backwards_hours = 3;
        let runs = request.expand().unwrap();

        assert_eq!(runs.len(), 27);
        assert_eq!(runs[0].start_local().hour(), 21);
        assert_eq!(runs[0].run_whole_hours(), 24);
        assert_eq!(runs[26].run_whole_hours(), 1);
    }

    #[test]
    fn test_long_window_caps_slices_at_a_day() {
        let request = RunRequest::new(irvin(), parse_eastern("2020-03-30 00:00").unwrap(), 1.0, 48);
        let runs = request.expand().unwrap();
        assert_eq!(runs.len(), 48);
        assert_eq!(runs[0].run_whole_hours(), 24);
        assert_eq!(runs[24].run_whole_hours(), 24);
        assert_eq!(runs[47].run_whole_hours(), 1);
    }

    #[test]
    fn test_coarser_resolution() {
        let mut request = RunRequest::new(irvin(), parse_eastern("2020-03-30 00:00").unwrap(), 1.0, 6);
        request.resolution_hours = 2;
        let hours: Vec<u32> = request
            .expand()
            .unwrap()
            .iter()
            .map(|r| r.run_whole_hours())
            .collect();
        assert_eq!(hours, vec![6, 4, 2]);
    }

    #[test]
    fn test_empty_window_rejected() {
        let request = RunRequest::new(irvin(), parse_eastern("2020-03-30 00:00").unwrap(), 1.0, 0);
        assert!(matches!(request.expand(), Err(ScheduleError::EmptyWindow)));
    }
}
