//! Text configuration the simulator reads from its working directory.
//!
//! Three files are produced per run: the `SETUP.CFG` namelist, the
//! `ASCDATA.CFG` grid description and the `CONTROL` file. Rendering is a pure
//! function of the descriptor and the weather file list.
use crate::constants::*;
use crate::math_utils::format_g;
use crate::run_descriptor::RunDescriptor;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub fn render_setup(run: &RunDescriptor) -> String {
    // hourly: dump every hour, cycling each hour. minutely: dump every minute for the whole run
    let ndump: i64 = if run.hourly_pardump() {
        1
    } else {
        -(run.run_whole_hours() as i64)
    };
    format!(
        "&SETUP\n\
         NUMPAR = {NUMPAR},\n\
         MAXPAR = {MAXPAR},\n\
         INITD ={},\n\
         CONAGE = 1,\n\
         KSPL = 1,\n\
         ndump = {ndump},\n\
         ncycl = 1,\n\
         delt = 1,\n\
         poutf = '{}',\n\
         /\n",
        run.mode().value(),
        pardump_name(run),
    )
}

/// Name of the particle dump the simulator writes for this run.
pub fn pardump_name(run: &RunDescriptor) -> String {
    format!("{}.h{}", PARDUMP_PREFIX, run.start_local_hour())
}

pub fn render_ascdata(boundary_dir: &Path) -> String {
    format!(
        "-90.0   -180.0  lat/lon of lower left corner\n\
         1.0     1.0     lat/lon spacing in degrees\n\
         180     360     lat/lon number of data points\n\
         2               default land use category\n\
         0.2             default roughness length (m)\n\
         '{}/'  directory of files",
        boundary_dir.display()
    )
}

pub fn render_control(run: &RunDescriptor, weather_files: &[PathBuf], output_name: &str) -> Result<String, fmt::Error> {
    let mut out = String::new();
    write_control(&mut out, run, weather_files, output_name)?;
    Ok(out)
}

/// `CONTROL` text for `run`, written to any formatter sink.
pub fn write_control<W: fmt::Write>(
    out: &mut W,
    run: &RunDescriptor,
    weather_files: &[PathBuf],
    output_name: &str,
) -> fmt::Result {
    let source = run.source();
    let start = run.start_utc().format("%y %m %d %H %M").to_string();

    writeln!(out, "{start} #1: run start time in YY MM DD HH MN (UTC)")?;
    writeln!(out, "2 #2: NUMBER OF SOURCE LOCATIONS")?;
    for height in [source.min_height_m(), source.max_height_m()] {
        writeln!(
            out,
            "{} {} {} 1 {} #3: SOURCE LATITUDE | LONGITUDE | HEIGHT(m-agl) | EMISSION RATE (per hour) | AREA (sq m)",
            source.lat(),
            source.lon(),
            format_g(height),
            format_g(source.area_sq_m())
        )?;
    }
    writeln!(out, "{} #4: TOTAL RUN TIME (hours)", run.run_whole_hours())?;
    writeln!(out, "0 #5: VERTICAL MOTION (USE MODEL VERTICAL VELOCITY)")?;
    writeln!(out, "{MODEL_TOP_M_AGL} #6: TOP OF MODEL DOMAIN (m-AGL)")?;
    writeln!(out, "{} #7: NUMBER OF INPUT DATA GRIDS", weather_files.len())?;
    for file in weather_files {
        let dir = file.parent().map(|p| p.display().to_string()).unwrap_or_default();
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        writeln!(out, "{dir}/")?;
        writeln!(out, "{name}")?;
    }
    writeln!(out, "1 #10: NUMBER OF DIFFERENT POLLUTANTS")?;
    writeln!(out, "TEST #11: POLLUTANT IDENTIFICATION")?;
    writeln!(out, "1 #12: EMISSION RATE (per hour)")?;
    writeln!(out, "{} #13: HOURS OF EMISSION", format_g(run.emit_hours()))?;
    writeln!(out, "{start} #14: EMISSION START TIME: YY mm dd HH MM")?;
    writeln!(out, "1 #15: NUMBER OF CONCENTRATION GRIDS")?;
    writeln!(out, "0 0 #16: CONC GRID CENTER (LATITUDE LONGITUDE); DEFAULT SOURCE LOC")?;
    writeln!(
        out,
        "{CONC_GRID_SPACING_DEG} {CONC_GRID_SPACING_DEG} #17: CONC GRID SPACING (degrees) LATITUDE LONGITUDE"
    )?;
    writeln!(
        out,
        "{} {} #18: CONC GRID SPAN (degrees) LATITUDE LONGITUDE",
        format_g(CONC_GRID_SPAN_DEG),
        format_g(CONC_GRID_SPAN_DEG)
    )?;
    writeln!(out, "./")?;
    writeln!(out, "{output_name}")?;
    writeln!(out, "1 #21: NUMBER OF VERTICAL CONCENTRATION LEVELS")?;
    writeln!(out, "{CONC_LEVEL_M_AGL} #22: HEIGHT OF EACH CONCENTRATION LEVEL (m-agl)")?;
    writeln!(out, "{start} #23: SAMPLING START TIME:YEAR MONTH DAY HOUR MINUTE")?;
    writeln!(
        out,
        "00 00 00 {} {} #24: SAMPLING STOP TIME:YEAR MONTH DAY HOUR MINUTE",
        run.run_whole_hours(),
        run.run_extra_minutes()
    )?;
    writeln!(out, "0 0 {SAMPLING_INTERVAL_MIN} #25: SAMPLING INTERVAL: TYPE (AVERAGING) HOUR MINUTE")?;
    writeln!(out, "0 #26: NUMBER OF DEPOSITING POLLUTANTS")?;
    writeln!(out, "0.0 0.0 0.0 #27: PARTICLE:DIAMETER (um), DENSITY (g/cc), SHAPE")?;
    writeln!(out, "0.0 0.0 0.0 0.0 0.0 #28: ATTRIBUTES, ZERO (NO DEPOSITING)")?;
    writeln!(out, "0.0 0.0 0.0 #29: WET REMOVAL, ZERO (NO DEPOSITING)")?;
    writeln!(out, "0 #30: RADIOACTIVE DECAY HALF-LIFE (days)")?;
    write!(out, "0.0 #31: POLLUTANT RESUSPENSION")
}

/// Write all three files into `work_dir`.
pub fn write_control_files(
    work_dir: &Path,
    run: &RunDescriptor,
    weather_files: &[PathBuf],
    boundary_dir: &Path,
    output_name: &str,
) -> io::Result<()> {
    fs::write(work_dir.join(SETUP_FILE), render_setup(run))?;
    fs::write(work_dir.join(ASCDATA_FILE), render_ascdata(boundary_dir))?;
    let control = render_control(run, weather_files, output_name).map_err(io::Error::other)?;
    fs::write(work_dir.join(CONTROL_FILE), control)?;
    Ok(())
}
