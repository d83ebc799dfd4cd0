use crate::math_utils::format_g;
use crate::source::DispersionSource;
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// INITD namelist value: how released mass is represented (3D particles,
/// puffs, or a mode that switches between them with particle age).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ModelMode {
    /// 3D particle horizontal and vertical
    #[default]
    ParticleHV,
    GaussianHTopHatV,
    TopHatHV,
    GaussianHParticleV,
    TopHatHParticleV,
    ParticleToGaussianHParticleV,
    /// The simulator's web front end uses this one
    ParticleToTopHatHParticleV,
    GaussianHParticleVToParticle,
    TopHatHParticleVToParticle,
    ParticleToGrid,
}

impl ModelMode {
    pub const ALL: [ModelMode; 10] = [
        ModelMode::ParticleHV,
        ModelMode::GaussianHTopHatV,
        ModelMode::TopHatHV,
        ModelMode::GaussianHParticleV,
        ModelMode::TopHatHParticleV,
        ModelMode::ParticleToGaussianHParticleV,
        ModelMode::ParticleToTopHatHParticleV,
        ModelMode::GaussianHParticleVToParticle,
        ModelMode::TopHatHParticleVToParticle,
        ModelMode::ParticleToGrid,
    ];

    pub fn value(self) -> u32 {
        match self {
            ModelMode::ParticleHV => 0,
            ModelMode::GaussianHTopHatV => 1,
            ModelMode::TopHatHV => 2,
            ModelMode::GaussianHParticleV => 3,
            ModelMode::TopHatHParticleV => 4,
            ModelMode::ParticleToGaussianHParticleV => 103,
            ModelMode::ParticleToTopHatHParticleV => 104,
            ModelMode::GaussianHParticleVToParticle => 130,
            ModelMode::TopHatHParticleVToParticle => 140,
            ModelMode::ParticleToGrid => 109,
        }
    }

    pub fn from_value(value: u32) -> Option<ModelMode> {
        Self::ALL.into_iter().find(|mode| mode.value() == value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ModelSettings {
    pub mode: ModelMode,
    /// Dump particles once an hour instead of every minute.
    pub hourly_pardump: bool,
}

impl fmt::Display for ModelSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pardump_mins = if self.hourly_pardump { 60 } else { 1 };
        write!(f, "<HMS initd={} pardump={}m>", self.mode.value(), pardump_mins)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("emission duration must be > 0 hours, got {0}")]
    EmitHours(f64),
    #[error("run duration must be at least one whole hour, got {0}")]
    RunHours(f64),
}

/// One schedulable simulation unit and the cache key derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct RunDescriptor {
    source: Arc<DispersionSource>,
    start_local: DateTime<Tz>,
    emit_hours: f64,
    run_hours: f64,
    settings: ModelSettings,
}

impl RunDescriptor {
    pub fn new(
        source: Arc<DispersionSource>,
        start_local: DateTime<Tz>,
        emit_hours: f64,
        run_hours: f64,
        settings: ModelSettings,
    ) -> Result<Self, DescriptorError> {
        if !(emit_hours > 0.0) || !emit_hours.is_finite() {
            return Err(DescriptorError::EmitHours(emit_hours));
        }
        if !(run_hours >= 1.0) || !run_hours.is_finite() {
            return Err(DescriptorError::RunHours(run_hours));
        }
        Ok(Self {
            source,
            start_local,
            emit_hours,
            run_hours,
            settings,
        })
    }

    pub fn source(&self) -> &DispersionSource {
        &self.source
    }

    pub fn start_local(&self) -> DateTime<Tz> {
        self.start_local
    }

    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start_local.with_timezone(&Utc)
    }

    pub fn emit_hours(&self) -> f64 {
        self.emit_hours
    }

    /// Requested run duration, possibly fractional.
    pub fn run_hours(&self) -> f64 {
        self.run_hours
    }

    /// Whole hours of the run; this is what appears in the cache key.
    pub fn run_whole_hours(&self) -> u32 {
        self.run_hours.trunc() as u32
    }

    /// Leftover minutes past the whole hours, used for the sampling stop time.
    pub fn run_extra_minutes(&self) -> u32 {
        ((self.run_hours - self.run_hours.trunc()) * 60.0) as u32
    }

    pub fn settings(&self) -> ModelSettings {
        self.settings
    }

    pub fn mode(&self) -> ModelMode {
        self.settings.mode
    }

    pub fn hourly_pardump(&self) -> bool {
        self.settings.hourly_pardump
    }

    /// Same run with a different dump cadence.
    pub fn with_hourly_pardump(&self, hourly_pardump: bool) -> Self {
        let mut other = self.clone();
        other.settings.hourly_pardump = hourly_pardump;
        other
    }

    /// Local hour the emission starts at; names the particle dump file.
    pub fn start_local_hour(&self) -> u32 {
        self.start_local.hour()
    }

    /// Cache key relative to the cache root:
    /// `{source}/{YYYYmmdd_HHMMSS}Z_{emit}h_{run}h_{mode}[_P60]`.
    ///
    /// The timestamp is the UTC instant, so descriptors built in different
    /// timezones for the same moment land in the same entry.
    pub fn cache_key(&self) -> String {
        let mut run_dir = format!(
            "{}Z_{}h_{}h_{}",
            self.start_utc().format("%Y%m%d_%H%M%S"),
            format_g(self.emit_hours),
            self.run_whole_hours(),
            self.settings.mode.value()
        );
        // minutely dumps carry no suffix
        if self.settings.hourly_pardump {
            run_dir.push_str("_P60");
        }
        format!("{}/{}", self.source.cache_path(), run_dir)
    }

    pub fn cache_path(&self, cache_root: &Path) -> PathBuf {
        cache_root.join(self.cache_key())
    }

    /// Compact one-line rendering for logs.
    pub fn settings_string(&self) -> String {
        format!(
            "{{sourceLoc:[{:.6},{:.6}],sourceHeight:[{},{}],runStartLocal:\"{}\",emitTimeHrs:{},runTimeHrs:{},initd:{}}}",
            self.source.lat(),
            self.source.lon(),
            format_g(self.source.min_height_m()),
            format_g(self.source.max_height_m()),
            self.start_local.format("%Y-%m-%d %H:%M:%S%:z"),
            format_g(self.emit_hours),
            self.run_whole_hours(),
            self.settings.mode.value()
        )
    }
}

impl fmt::Display for RunDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run start={} emit={}h run={}h {} source={}",
            self.start_local.format("%Y-%m-%d %H:%M%:z"),
            format_g(self.emit_hours),
            self.run_whole_hours(),
            self.settings,
            self.source
        )
    }
}
