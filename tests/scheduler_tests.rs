// Scheduler scenarios: a day of hourly slices driven through a mock cache.

use plume_viz_rust::cache::{LockOptions, RunCache, RunCacheProps, Simulator, SimulatorExit};
use plume_viz_rust::run_descriptor::ModelSettings;
use plume_viz_rust::scheduler::{RunRequest, run_all, run_request};
use plume_viz_rust::source::DispersionSource;
use plume_viz_rust::time_utils::parse_eastern;
use plume_viz_rust::weather::{WeatherArchive, WeatherError, WeatherFetcher};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct StubFetcher;

impl WeatherFetcher for StubFetcher {
    fn fetch(&self, _url: &str, dest: &Path) -> Result<(), WeatherError> {
        fs::write(dest, b"grid")?;
        Ok(())
    }
}

/// Fails any run whose CONTROL starts at `fail_start` (`YY MM DD HH MM`, UTC)
/// and tracks how many runs are in flight at once.
struct ControlAwareSimulator {
    fail_start: Option<String>,
    running: AtomicUsize,
    peak: AtomicUsize,
    starts: Mutex<Vec<String>>,
}

impl ControlAwareSimulator {
    fn new(fail_start: Option<&str>) -> Self {
        Self {
            fail_start: fail_start.map(str::to_string),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            starts: Mutex::new(Vec::new()),
        }
    }
}

impl Simulator for ControlAwareSimulator {
    fn run(&self, work_dir: &Path) -> io::Result<SimulatorExit> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(5));

        let control = fs::read_to_string(work_dir.join("CONTROL"))?;
        let start = control.get(..14).unwrap_or_default().to_string();
        self.starts.lock().unwrap().push(start.clone());
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.fail_start.as_deref() == Some(start.as_str()) {
            return Ok(SimulatorExit::Failed {
                code: Some(2),
                detail: "met data gap".to_string(),
            });
        }
        fs::write(work_dir.join("cdump"), b"conc")?;
        Ok(SimulatorExit::Success)
    }
}

/// Lets the test keep a handle on the simulator the cache owns.
struct Shared(Arc<ControlAwareSimulator>);

impl Simulator for Shared {
    fn run(&self, work_dir: &Path) -> io::Result<SimulatorExit> {
        self.0.run(work_dir)
    }
}

fn make_cache(root: &Path, simulator: Arc<ControlAwareSimulator>) -> RunCache {
    RunCache::new(RunCacheProps {
        cache_root: root.join("cache"),
        weather: WeatherArchive::new(root.join("weather"), "ftp://archive", Box::new(StubFetcher)),
        simulator: Box::new(Shared(simulator)),
        boundary_dir: root.join("bdyfiles"),
        output_name: "cdump".to_string(),
        lock: LockOptions {
            poll: Duration::from_millis(10),
            ..LockOptions::default()
        },
    })
}

fn irvin_day() -> RunRequest {
    let source = Arc::new(DispersionSource::new("Irvin", 40.328015, -79.903551, 0.0, 50.0).unwrap());
    RunRequest::new(source, parse_eastern("2020-03-30 00:00").unwrap(), 1.0, 24)
}

#[test]
fn test_irvin_day_runs_every_slice() {
    println!("🗓️  Irvin, 2020-03-30, 24 hourly slices");
    let dir = tempfile::tempdir().unwrap();
    let simulator = Arc::new(ControlAwareSimulator::new(None));
    let cache = make_cache(dir.path(), simulator.clone());

    let results = run_request(&cache, &irvin_day(), 4).unwrap();
    assert_eq!(results.len(), 24);

    let paths: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
    let unique: HashSet<_> = paths.iter().collect();
    assert_eq!(unique.len(), 24, "every slice has its own entry");

    // results keep submission order: midnight local is 04:00 UTC in March
    let first = paths[0].file_name().unwrap().to_string_lossy().into_owned();
    let last = paths[23].file_name().unwrap().to_string_lossy().into_owned();
    println!("   first {first}\n   last  {last}");
    assert_eq!(first, "20200330_040000Z_1h_24h_0");
    assert_eq!(last, "20200331_030000Z_1h_1h_0");

    let peak = simulator.peak.load(Ordering::SeqCst);
    println!("   peak concurrency {peak}");
    assert!(peak <= 4, "pool exceeded its bound: {peak}");
    assert_eq!(simulator.starts.lock().unwrap().len(), 24);
}

#[test]
fn test_one_failed_slice_does_not_stop_the_rest() {
    println!("⚠️  Slice at 10:00 local fails");
    let dir = tempfile::tempdir().unwrap();
    // 10:00 EDT is 14:00 UTC
    let simulator = Arc::new(ControlAwareSimulator::new(Some("20 03 30 14 00")));
    let cache = make_cache(dir.path(), simulator.clone());

    let runs = irvin_day().expand().unwrap();
    let results = run_all(&cache, &runs, 8).unwrap();

    assert_eq!(results.len(), 24);
    for (i, result) in results.iter().enumerate() {
        if i == 10 {
            assert!(result.is_err(), "slice 10 should fail");
            assert!(!cache.entry_path(&runs[i]).exists());
        } else {
            assert!(result.is_ok(), "slice {i} failed: {:?}", result.as_ref().err());
        }
    }
}

#[test]
fn test_rerun_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let simulator = Arc::new(ControlAwareSimulator::new(None));
    let cache = make_cache(dir.path(), simulator.clone());

    let mut request = irvin_day();
    request.total_hours = 6;
    request.settings = ModelSettings::default();

    let first = run_request(&cache, &request, 3).unwrap();
    let second = run_request(&cache, &request, 3).unwrap();
    assert_eq!(simulator.starts.lock().unwrap().len(), 6, "second pass ran nothing");

    let first: Vec<_> = first.into_iter().map(|r| r.unwrap()).collect();
    let second: Vec<_> = second.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(first, second);
}

#[test]
fn test_single_worker_pool() {
    let dir = tempfile::tempdir().unwrap();
    let simulator = Arc::new(ControlAwareSimulator::new(None));
    let cache = make_cache(dir.path(), simulator.clone());

    let mut request = irvin_day();
    request.total_hours = 5;
    let results = run_request(&cache, &request, 1).unwrap();

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(simulator.peak.load(Ordering::SeqCst), 1);
}
