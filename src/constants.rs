// Simulator namelist defaults
pub const NUMPAR: u32 = 2500;
pub const MAXPAR: u32 = 25_000;
pub const MODEL_TOP_M_AGL: u32 = 10_000;
pub const CONC_GRID_SPACING_DEG: f64 = 0.003;
pub const CONC_GRID_SPAN_DEG: f64 = 1.0;
pub const CONC_LEVEL_M_AGL: u32 = 100;
pub const SAMPLING_INTERVAL_MIN: u32 = 15;

// file names inside a run directory
pub const SETUP_FILE: &str = "SETUP.CFG";
pub const ASCDATA_FILE: &str = "ASCDATA.CFG";
pub const CONTROL_FILE: &str = "CONTROL";
pub const RUN_LOG_FILE: &str = "log.txt";
pub const DEFAULT_OUTPUT_NAME: &str = "cdump";
pub const PARDUMP_PREFIX: &str = "PARDUMP";

// executables relative to the simulator root
pub const SIMULATOR_EXEC: &str = "exec/hycs_std";
pub const PAR2ASC_EXEC: &str = "exec/par2asc";
pub const BOUNDARY_DIR: &str = "bdyfiles";

// scheduling
pub const DEFAULT_MAX_CONCURRENCY: usize = 30;
pub const MAX_SLICE_RUN_HOURS: u32 = 24;
pub const DEFAULT_LOCK_POLL_MS: u64 = 250;

// weather archive
pub const WEATHER_WINDOW_HOURS: i64 = 6;
pub const DEFAULT_WEATHER_ARCHIVE_URL: &str = "ftp://arlftp.arlhq.noaa.gov/pub/archives";
/// Archive layout switched to the `hrrr/` naming after this instant (unix seconds, 2019-07-22T00:00Z).
pub const WEATHER_REFORMAT_EPOCH: i64 = 1_563_753_600;

// packing
pub const SAMPLE_MINUTES: u32 = 5;
pub const BUCKET_SECONDS: i64 = 3600;
pub const PARTICLE_STRIDE: usize = 9;
pub const PUFF_STRIDE: usize = 10;
pub const MAP_PIXELS: f64 = 256.0;
pub const METERS_PER_PIXEL_AT_EQUATOR: f64 = 157_000.0;

/// Per-source colors used when several sources share one visualization.
pub const SOURCE_COLORS: [[u8; 3]; 4] = [
    [250, 255, 99],
    [99, 255, 206],
    [206, 92, 247],
    [255, 119, 0],
];
