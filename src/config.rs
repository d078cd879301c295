//! Pipeline configuration
//!
//! All tunables of a monthly NDVI run live in [`PipelineConfig`]. Every field has a
//! default so partial JSON files are accepted.

use crate::core::composite::AggregationParams;
use crate::core::ndvi::NdviParams;
use crate::io::backend::RetryParams;
use crate::io::export::ExportParams;
use crate::types::{NdviError, NdviResult, DEFAULT_MAX_GRID_PIXELS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete configuration of the monthly NDVI pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Closed set of years an analysis may be run for
    pub supported_years: Vec<i32>,

    /// Month filtering and composite timestamp policies
    pub aggregation: AggregationParams,

    /// Fixed reflectance scaling for sources without per-image calibration
    pub ndvi: NdviParams,

    /// Drop scenes whose cloud-cover property exceeds this percentage
    pub max_cloud_cover: Option<f64>,

    /// Ground sample distance of the analysis and export grid, in meters
    pub gsd_meters: f64,

    /// Upper bound on `rows * cols` of the analysis and export grids
    pub max_grid_pixels: usize,

    pub retry: RetryParams,
    pub export: ExportParams,

    /// Base URL of an HTTP imagery backend
    pub backend_url: Option<String>,
    pub http_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            supported_years: (2017..=2024).collect(),
            aggregation: AggregationParams::default(),
            ndvi: NdviParams::default(),
            max_cloud_cover: None,
            gsd_meters: 30.0,
            max_grid_pixels: DEFAULT_MAX_GRID_PIXELS,
            retry: RetryParams::default(),
            export: ExportParams::default(),
            backend_url: None,
            http_timeout_secs: 120,
        }
    }
}

impl PipelineConfig {
    /// Read a JSON configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> NdviResult<Self> {
        log::info!("Loading configuration from: {}", path.as_ref().display());

        let content = std::fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the user configuration file when present, defaults otherwise
    pub fn load_or_default() -> NdviResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => {
                log::debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// `<config dir>/ndvine/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ndvine").join("config.json"))
    }

    /// Write the configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> NdviResult<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> NdviResult<()> {
        if self.supported_years.is_empty() {
            return Err(NdviError::UserInput(
                "At least one supported year is required".to_string(),
            ));
        }
        if !(self.gsd_meters > 0.0) {
            return Err(NdviError::UserInput(format!(
                "Ground sample distance must be positive, got {}",
                self.gsd_meters
            )));
        }
        if self.max_grid_pixels == 0 {
            return Err(NdviError::UserInput(
                "Grid pixel limit must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(NdviError::UserInput(
                "Retry policy needs at least one attempt".to_string(),
            ));
        }
        if !(self.ndvi.scale_factor > 0.0) {
            return Err(NdviError::UserInput(format!(
                "Reflectance scale factor must be positive, got {}",
                self.ndvi.scale_factor
            )));
        }
        if let Some(limit) = self.max_cloud_cover {
            if !(0.0..=100.0).contains(&limit) {
                return Err(NdviError::UserInput(format!(
                    "Cloud cover limit {} is outside 0..=100",
                    limit
                )));
            }
        }
        Ok(())
    }

    pub fn is_supported_year(&self, year: i32) -> bool {
        self.supported_years.contains(&year)
    }
}
