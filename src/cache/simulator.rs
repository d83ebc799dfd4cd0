//! The external dispersion simulator, seen as a black box that is started in a
//! prepared working directory with no arguments.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, PartialEq)]
pub enum SimulatorExit {
    Success,
    Failed { code: Option<i32>, detail: String },
}

pub trait Simulator: Send + Sync {
    /// Run to completion inside `work_dir`.
    fn run(&self, work_dir: &Path) -> io::Result<SimulatorExit>;
}

/// Runs the simulator executable as a subprocess; its output is appended
/// to `log.txt` in the working directory.
#[derive(Debug, Clone)]
pub struct ExecutableSimulator {
    program: PathBuf,
}

impl ExecutableSimulator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Simulator for ExecutableSimulator {
    fn run(&self, work_dir: &Path) -> io::Result<SimulatorExit> {
        let output = Command::new(&self.program).current_dir(work_dir).output()?;

        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(work_dir.join(crate::constants::RUN_LOG_FILE))?;
        log.write_all(&output.stdout)?;
        log.write_all(&output.stderr)?;

        if output.status.success() {
            Ok(SimulatorExit::Success)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // the tail is where the simulator says what went wrong
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            Ok(SimulatorExit::Failed {
                code: output.status.code(),
                detail: tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
            })
        }
    }
}
