use crate::math_utils::{format_g, round_to};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_SOURCE_HEIGHT_M: f64 = 1000.0;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("source name must not be empty")]
    EmptyName,
    #[error("latitude {0} outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} outside [-180, 180]")]
    Longitude(f64),
    #[error("heights must satisfy 0 <= min ({min}) <= max ({max}) <= 1000")]
    Heights { min: f64, max: f64 },
    #[error("emission area {0} must be >= 0")]
    Area(f64),
}

/// A pollution emission site.
///
/// Coordinates are rounded to six decimals at construction; heights are meters
/// above ground and the area is in square meters (0 means a point source).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispersionSource {
    name: String,
    lat: f64,
    lon: f64,
    min_height_m: f64,
    max_height_m: f64,
    area_sq_m: f64,
}

impl DispersionSource {
    pub fn new(
        name: &str,
        lat: f64,
        lon: f64,
        min_height_m: f64,
        max_height_m: f64,
    ) -> Result<Self, SourceError> {
        Self::with_area(name, lat, lon, min_height_m, max_height_m, 0.0)
    }

    pub fn with_area(
        name: &str,
        lat: f64,
        lon: f64,
        min_height_m: f64,
        max_height_m: f64,
        area_sq_m: f64,
    ) -> Result<Self, SourceError> {
        if name.trim().is_empty() {
            return Err(SourceError::EmptyName);
        }
        // written as negated ranges so NaN is rejected too
        if !(-90.0..=90.0).contains(&lat) {
            return Err(SourceError::Latitude(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(SourceError::Longitude(lon));
        }
        if !(0.0 <= min_height_m && min_height_m <= max_height_m && max_height_m <= MAX_SOURCE_HEIGHT_M) {
            return Err(SourceError::Heights {
                min: min_height_m,
                max: max_height_m,
            });
        }
        if !(area_sq_m >= 0.0) {
            return Err(SourceError::Area(area_sq_m));
        }

        Ok(Self {
            name: name.to_string(),
            lat: round_to(lat, 6),
            lon: round_to(lon, 6),
            min_height_m,
            max_height_m,
            area_sq_m,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }

    pub fn min_height_m(&self) -> f64 {
        self.min_height_m
    }

    pub fn max_height_m(&self) -> f64 {
        self.max_height_m
    }

    pub fn area_sq_m(&self) -> f64 {
        self.area_sq_m
    }

    /// Directory fragment shared by every run of this source, e.g.
    /// `40.328015,-79.903551_0-50` (with `_{area}` appended for area sources).
    /// The name is not part of it, so two names for the same site share runs.
    pub fn cache_path(&self) -> String {
        let mut path = format!(
            "{:.6},{:.6}_{}-{}",
            self.lat,
            self.lon,
            format_g(self.min_height_m),
            format_g(self.max_height_m)
        );
        if self.area_sq_m > 0.0 {
            path.push('_');
            path.push_str(&format_g(self.area_sq_m));
        }
        path
    }
}

impl fmt::Display for DispersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
