use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

use crate::error::ConfigError;
use crate::geometry;

pub const DEFAULT_MAX_SCALE: f32 = 2.5;

/// Content padding around the page. Narrow windows get the compact value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaddingPolicy {
    pub breakpoint_px: f32,
    pub compact_px: f32,
    pub regular_px: f32,
}

impl Default for PaddingPolicy {
    fn default() -> Self {
        Self {
            breakpoint_px: 640.0,
            compact_px: 16.0,
            regular_px: 32.0,
        }
    }
}

impl PaddingPolicy {
    pub fn for_window(&self, window_width_px: f32) -> f32 {
        if window_width_px < self.breakpoint_px {
            self.compact_px
        } else {
            self.regular_px
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub max_scale: f32,
    pub padding: PaddingPolicy,
    pub device_pixel_ratio: f32,
    /// Absent means a stalled load stays in the loading state indefinitely.
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub load_timeout: Option<Duration>,
    pub pdfium_library_path: Option<PathBuf>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            max_scale: DEFAULT_MAX_SCALE,
            padding: PaddingPolicy::default(),
            device_pixel_ratio: 1.0,
            load_timeout: None,
            pdfium_library_path: None,
        }
    }
}

impl ViewerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(?path, "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_scale.is_finite() && self.max_scale >= geometry::MIN_SCALE) {
            return Err(ConfigError::Invalid(format!(
                "max_scale must be at least {}, got {}",
                geometry::MIN_SCALE,
                self.max_scale
            )));
        }
        if !(self.device_pixel_ratio.is_finite() && self.device_pixel_ratio > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "device_pixel_ratio must be positive, got {}",
                self.device_pixel_ratio
            )));
        }
        let padding = &self.padding;
        if padding.compact_px < 0.0 || padding.regular_px < 0.0 {
            return Err(ConfigError::Invalid("padding must not be negative".into()));
        }
        if matches!(self.load_timeout, Some(timeout) if timeout.is_zero()) {
            return Err(ConfigError::Invalid("load_timeout must be non-zero".into()));
        }
        Ok(())
    }
}
