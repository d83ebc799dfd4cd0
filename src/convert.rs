//! Binary particle dump -> text, for the packer.
//!
//! Cache entries are never written to after they complete, so conversions
//! land in a scratch tree that mirrors the cache layout.
use crate::constants::PARDUMP_PREFIX;
use flate2::read::GzDecoder;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

#[derive(thiserror::Error, Debug)]
pub enum ConvertError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("no particle dump in {0}")]
    NoDump(PathBuf),
    #[error("{program} failed on {input}: {detail}")]
    Converter {
        program: PathBuf,
        input: PathBuf,
        detail: String,
    },
}

/// The binary dump in a completed entry: `PARDUMP.*`, plain or gzipped.
pub fn find_binary_dump(entry: &Path) -> Result<(PathBuf, bool), ConvertError> {
    let mut plain = None;
    let mut zipped = None;
    for item in fs::read_dir(entry)? {
        let path = item?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(&format!("{PARDUMP_PREFIX}.")) || name.ends_with(".txt") {
            continue;
        }
        if name.ends_with(".gz") {
            zipped.get_or_insert(path);
        } else {
            plain.get_or_insert(path);
        }
    }
    match (plain, zipped) {
        (Some(path), _) => Ok((path, false)),
        (None, Some(path)) => Ok((path, true)),
        (None, None) => Err(ConvertError::NoDump(entry.to_path_buf())),
    }
}

/// Decompress `gz` into `dest_dir`, returning the uncompressed file.
pub fn gunzip_into(gz: &Path, dest_dir: &Path) -> Result<PathBuf, ConvertError> {
    let stem = gz.file_stem().map(OsString::from).unwrap_or_default();
    let dest = dest_dir.join(stem);
    if dest.is_file() {
        return Ok(dest);
    }
    let mut decoder = GzDecoder::new(File::open(gz)?);
    let part = part_path(&dest);
    let copied = File::create(&part).and_then(|mut out| io::copy(&mut decoder, &mut out));
    if let Err(err) = copied {
        let _ = fs::remove_file(&part);
        return Err(err.into());
    }
    fs::rename(&part, &dest)?;
    Ok(dest)
}

/// Private sibling for writing `path` before it is renamed into place.
fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(format!(".part_{}_{}", std::process::id(), crate::cache::thread_tag()));
    path.with_file_name(name)
}

/// Converts binary dumps with the simulator's `par2asc` tool.
#[derive(Debug, Clone)]
pub struct DumpConverter {
    par2asc: PathBuf,
    scratch_root: PathBuf,
}

impl DumpConverter {
    pub fn new(par2asc: impl Into<PathBuf>, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            par2asc: par2asc.into(),
            scratch_root: scratch_root.into(),
        }
    }

    /// Scratch directory for the entry at `entry`, relative layout preserved.
    pub fn scratch_dir(&self, cache_root: &Path, entry: &Path) -> PathBuf {
        match entry.strip_prefix(cache_root) {
            Ok(relative) => self.scratch_root.join(relative),
            Err(_) => self.scratch_root.join(entry.file_name().unwrap_or_default()),
        }
    }

    /// Directory holding a text dump for `entry`, converting on first use.
    pub fn ensure_text(&self, cache_root: &Path, entry: &Path) -> Result<PathBuf, ConvertError> {
        let scratch = self.scratch_dir(cache_root, entry);
        if has_text_dump(&scratch) {
            debug!(dir = %scratch.display(), "text dump already converted");
            return Ok(scratch);
        }
        fs::create_dir_all(&scratch)?;

        let (dump, zipped) = find_binary_dump(entry)?;
        let binary = if zipped { gunzip_into(&dump, &scratch)? } else { dump };

        let mut txt_name = binary.file_name().map(OsString::from).unwrap_or_default();
        txt_name.push(".txt");
        let text = scratch.join(txt_name);

        // converters of the same entry each write their own part file
        let part = part_path(&text);
        info!(input = %binary.display(), output = %text.display(), "converting particle dump");
        let mut input_arg = OsString::from("-i");
        input_arg.push(&binary);
        let mut output_arg = OsString::from("-o");
        output_arg.push(&part);
        let output = match Command::new(&self.par2asc).arg(input_arg).arg(output_arg).output() {
            Ok(output) => output,
            Err(err) => {
                let _ = fs::remove_file(&part);
                return Err(err.into());
            }
        };

        if !output.status.success() || !part.is_file() {
            let _ = fs::remove_file(&part);
            return Err(ConvertError::Converter {
                program: self.par2asc.clone(),
                input: binary,
                detail: format!("{}: {}", output.status, String::from_utf8_lossy(&output.stderr).trim()),
            });
        }
        fs::rename(&part, &text)?;
        Ok(scratch)
    }
}

fn has_text_dump(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries.filter_map(Result::ok).any(|e| {
                e.file_name()
                    .to_str()
                    .is_some_and(|n| n.starts_with(PARDUMP_PREFIX) && n.ends_with(".txt"))
            })
        })
        .unwrap_or(false)
}
