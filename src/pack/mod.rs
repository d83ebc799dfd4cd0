//! Segment packer: turns text particle dumps from many runs and sources into
//! one flat little-endian f32 file plus a JSON time index.
//!
//! Each record is `[x0, y0, z0, t0, x1, y1, z1, t1, color]`, with a trailing
//! `size` when packing puffs. x/y are web-mercator pixels (0,0 north-west,
//! 256,256 south-east), z is meters above ground and t is seconds after the
//! manifest's `epoch_base`.

pub mod manifest;
pub mod palette;

pub use manifest::{BucketEntry, SubsetManifest};
pub use palette::{Rgb, color_for_run, default_filter_ratio, default_palette, pack_color, unpack_color};

use crate::constants::{BUCKET_SECONDS, PARDUMP_PREFIX, PARTICLE_STRIDE, PUFF_STRIDE, SAMPLE_MINUTES};
use crate::pardump::{Sample, Trajectories, parse_trajectories};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(thiserror::Error, Debug)]
pub enum PackError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no text particle dump in {0}")]
    NoDump(PathBuf),
    #[error("{sources} sources but {colors} color tables and {ratios} filter ratios")]
    Mismatch {
        sources: usize,
        colors: usize,
        ratios: usize,
    },
    #[error("filter ratio {0} outside [0, 1]")]
    FilterRatio(f64),
    #[error("color table for source {0} is empty")]
    EmptyColorTable(usize),
    #[error("default palette supports 1 to 4 sources, got {0}")]
    Palette(usize),
}

/// A step between two consecutive retained samples of one particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub from: Sample,
    pub to: Sample,
    pub color: f32,
}

impl Segment {
    fn write_to<W: Write>(&self, out: &mut W, epoch_base: i64, with_size: bool) -> std::io::Result<()> {
        let fields = [
            self.from.x as f32,
            self.from.y as f32,
            self.from.z as f32,
            (self.from.epoch - epoch_base) as f32,
            self.to.x as f32,
            self.to.y as f32,
            self.to.z as f32,
            (self.to.epoch - epoch_base) as f32,
            self.color,
        ];
        for value in fields {
            out.write_all(&value.to_le_bytes())?;
        }
        if with_size {
            out.write_all(&(self.to.size as f32).to_le_bytes())?;
        }
        Ok(())
    }
}

/// Segments of every kept trajectory. The keep/drop draw is made once per
/// particle, so a trajectory is either whole or absent.
pub fn trajectory_segments<R: Rng>(
    trajectories: &Trajectories,
    color: f32,
    filter_ratio: f64,
    rng: &mut R,
) -> Vec<Segment> {
    let mut segments = Vec::new();
    for samples in trajectories.by_particle.values() {
        let keep = rng.random::<f64>() >= filter_ratio;
        if !keep || samples.len() < 2 {
            continue;
        }
        segments.extend(samples.windows(2).map(|pair| Segment {
            from: pair[0],
            to: pair[1],
            color,
        }));
    }
    segments
}

/// Text dumps (`PARDUMP*.txt`) inside a run directory, sorted by name.
pub fn text_dumps(dir: &Path) -> Result<Vec<PathBuf>, PackError> {
    let mut dumps: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(PARDUMP_PREFIX) && n.ends_with(".txt"))
        })
        .collect();
    if dumps.is_empty() {
        return Err(PackError::NoDump(dir.to_path_buf()));
    }
    dumps.sort();
    Ok(dumps)
}

/// Parse every text dump in `dir` and cut it into segments.
pub fn run_segments(
    dir: &Path,
    color: f32,
    filter_ratio: f64,
    sample_minutes: u32,
    seed: u64,
) -> Result<Vec<Segment>, PackError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut segments = Vec::new();
    for dump in text_dumps(dir)? {
        let mut text = String::new();
        File::open(&dump)?.read_to_string(&mut text)?;
        let trajectories = parse_trajectories(&text, sample_minutes);
        debug!(
            dump = %dump.display(),
            particles = trajectories.len(),
            skipped = trajectories.stats.skipped_lines,
            "parsed particle dump"
        );
        segments.extend(trajectory_segments(&trajectories, color, filter_ratio, &mut rng));
    }
    Ok(segments)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackOptions {
    /// Append the puff size to each record.
    pub with_size: bool,
    /// Fixed seed for reproducible filtering and shuffling.
    pub seed: Option<u64>,
    pub sample_minutes: u32,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            with_size: false,
            seed: None,
            sample_minutes: SAMPLE_MINUTES,
        }
    }
}

impl PackOptions {
    pub fn stride(&self) -> usize {
        if self.with_size { PUFF_STRIDE } else { PARTICLE_STRIDE }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackedArtifact {
    pub binary: PathBuf,
    pub manifest: PathBuf,
    pub records: usize,
    pub stride: usize,
}

/// Sidecar path for a binary artifact: `day.bin` -> `day.bin.json`.
pub fn manifest_path_for(binary: &Path) -> PathBuf {
    let mut name: OsString = binary.file_name().map(OsString::from).unwrap_or_default();
    name.push(".json");
    binary.with_file_name(name)
}

/// Pack the runs of several sources into one artifact.
///
/// `sources[i]` lists the run directories of source `i`; its segments are
/// colored from `colors[i]` and its particles dropped with probability
/// `filter_ratios[i]`. Parsing fans out over the rayon pool, the merge,
/// shuffle and write happen on the calling thread.
pub fn pack_multi_source(
    sources: &[Vec<PathBuf>],
    output: &Path,
    colors: &[Vec<Rgb>],
    filter_ratios: &[f64],
    options: &PackOptions,
) -> Result<PackedArtifact, PackError> {
    if colors.len() != sources.len() || filter_ratios.len() != sources.len() {
        return Err(PackError::Mismatch {
            sources: sources.len(),
            colors: colors.len(),
            ratios: filter_ratios.len(),
        });
    }
    if let Some(bad) = filter_ratios.iter().find(|r| !(0.0..=1.0).contains(*r)) {
        return Err(PackError::FilterRatio(*bad));
    }
    if let Some(empty) = colors.iter().position(|table| table.is_empty()) {
        return Err(PackError::EmptyColorTable(empty));
    }

    let mut rng = StdRng::seed_from_u64(options.seed.unwrap_or_else(rand::random));

    struct Job<'a> {
        dir: &'a Path,
        color: f32,
        filter_ratio: f64,
        seed: u64,
    }
    let mut jobs = Vec::new();
    for (source, dirs) in sources.iter().enumerate() {
        for (k, dir) in dirs.iter().enumerate() {
            let rgb = color_for_run(&colors[source], k, dirs.len())
                .ok_or(PackError::EmptyColorTable(source))?;
            jobs.push(Job {
                dir,
                color: pack_color(rgb),
                filter_ratio: filter_ratios[source],
                seed: rng.random(),
            });
        }
    }

    let per_run: Vec<Vec<Segment>> = jobs
        .par_iter()
        .map(|job| run_segments(job.dir, job.color, job.filter_ratio, options.sample_minutes, job.seed))
        .collect::<Result<_, _>>()?;

    let mut segments: Vec<Segment> = per_run.into_iter().flatten().collect();
    segments.shuffle(&mut rng);

    let epoch_base = segments
        .iter()
        .map(|s| s.from.epoch)
        .min()
        .map(|t| t.div_euclid(BUCKET_SECONDS) * BUCKET_SECONDS)
        .unwrap_or(0);

    let stride = options.stride();
    let binary = output.to_path_buf();
    write_segments(&binary, &segments, epoch_base, options.with_size)?;

    let starts: Vec<i64> = segments.iter().map(|s| s.from.epoch).collect();
    let manifest = SubsetManifest::build(&starts, stride, epoch_base, BUCKET_SECONDS);
    let manifest_path = manifest_path_for(output);
    manifest.save(&manifest_path)?;

    info!(
        output = %binary.display(),
        runs = jobs.len(),
        records = segments.len(),
        buckets = manifest.buckets.len(),
        "packed particle segments"
    );

    Ok(PackedArtifact {
        binary,
        manifest: manifest_path,
        records: segments.len(),
        stride,
    })
}

/// Write through a part file so a crash never leaves a truncated artifact.
fn write_segments(path: &Path, segments: &[Segment], epoch_base: i64, with_size: bool) -> Result<(), PackError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut part_name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    part_name.push(".part");
    let part = path.with_file_name(part_name);

    let mut out = BufWriter::new(File::create(&part)?);
    for segment in segments {
        segment.write_to(&mut out, epoch_base, with_size)?;
    }
    out.flush()?;
    drop(out);
    fs::rename(&part, path)?;
    Ok(())
}

/// Read a packed artifact back as raw floats.
pub fn read_floats(path: &Path) -> Result<Vec<f32>, PackError> {
    let bytes = fs::read(path)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump_for(particle: i64, minutes: &[u32]) -> String {
        let mut text = String::new();
        for (i, minute) in minutes.iter().enumerate() {
            text.push_str(&format!("1 1 20 3 30 0 {minute}\n"));
            text.push_str(&format!("40.{:05} -79.90000 {}.0 5.0 0.0 0.0\n", i * 100, 20 + i));
            text.push_str(&format!("0 0 0 1 {particle}\n"));
        }
        text
    }

    #[test]
    fn test_single_trajectory_segments() {
        let parsed = parse_trajectories(&dump_for(7, &[0, 5, 10]), 5);
        let color = pack_color([250, 255, 99]);
        let mut rng = StdRng::seed_from_u64(1);
        let segments = trajectory_segments(&parsed, color, 0.0, &mut rng);

        assert_eq!(segments.len(), 2);
        for segment in &segments {
            assert_eq!(segment.color, color);
            assert!(segment.from.epoch < segment.to.epoch);
        }
        assert!(segments[0].to.epoch < segments[1].to.epoch);
        assert_eq!(segments[0].to, segments[1].from);
    }

    #[test]
    fn test_full_filter_drops_everything() {
        let parsed = parse_trajectories(&dump_for(7, &[0, 5, 10]), 5);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(trajectory_segments(&parsed, 1.0, 1.0, &mut rng).is_empty());
    }

    #[test]
    fn test_filter_is_per_particle() {
        let mut text = String::new();
        for particle in 0..200 {
            text.push_str(&dump_for(particle, &[0, 5, 10]));
        }
        let parsed = parse_trajectories(&text, 5);
        let mut rng = StdRng::seed_from_u64(42);
        let segments = trajectory_segments(&parsed, 1.0, 0.5, &mut rng);

        // kept particles contribute both of their segments
        assert_eq!(segments.len() % 2, 0);
        let kept = segments.len() / 2;
        assert!(kept > 50 && kept < 150, "kept {kept} of 200");
    }

    #[test]
    fn test_single_sample_makes_no_segment() {
        let parsed = parse_trajectories(&dump_for(3, &[0, 7]), 5);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(trajectory_segments(&parsed, 1.0, 0.0, &mut rng).is_empty());
    }

    #[test]
    fn test_size_record_layout() {
        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("run");
        fs::create_dir(&run).unwrap();
        fs::write(run.join("PARDUMP.h0.txt"), dump_for(1, &[0, 5])).unwrap();

        let output = dir.path().join("puffs.bin");
        let options = PackOptions {
            with_size: true,
            seed: Some(3),
            ..PackOptions::default()
        };
        let artifact = pack_multi_source(
            &[vec![run]],
            &output,
            &[vec![[1, 2, 3]]],
            &[0.0],
            &options,
        )
        .unwrap();

        assert_eq!(artifact.stride, 10);
        let floats = read_floats(&output).unwrap();
        assert_eq!(floats.len(), 10);
        assert_eq!(unpack_color(floats[8]), [1, 2, 3]);
        // t0 is relative to the hour the file starts in
        assert_eq!(floats[3], 0.0);
        assert_eq!(floats[7], 300.0);
        assert!(floats[9] > 0.0);
    }

    #[test]
    fn test_rejects_mismatched_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("x.bin");
        let options = PackOptions::default();
        assert!(matches!(
            pack_multi_source(&[vec![]], &output, &[], &[0.0], &options),
            Err(PackError::Mismatch { .. })
        ));
        assert!(matches!(
            pack_multi_source(&[vec![]], &output, &[vec![[0, 0, 0]]], &[1.5], &options),
            Err(PackError::FilterRatio(_))
        ));
        assert!(matches!(
            pack_multi_source(&[vec![]], &output, &[vec![]], &[0.5], &options),
            Err(PackError::EmptyColorTable(0))
        ));
    }

    #[test]
    fn test_missing_dump_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("x.bin");
        let err = pack_multi_source(
            &[vec![dir.path().to_path_buf()]],
            &output,
            &[vec![[0, 0, 0]]],
            &[0.0],
            &PackOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PackError::NoDump(_)));
        assert!(!output.exists());
    }

    #[test]
    fn test_manifest_path() {
        assert_eq!(
            manifest_path_for(Path::new("/out/day.bin")),
            PathBuf::from("/out/day.bin.json")
        );
    }
}
