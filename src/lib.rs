pub mod capture;
pub mod error;
pub mod pipeline;
pub mod recognizer;
pub mod utils;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use crate::error::{CaptureError, ConfigError, ConvertError, DecodeError, PipelineError};
use crate::utils::{check_dimensions, default_device_path, Resolution};

/// Environment variable prefix, e.g. `QRSCAN_CAPTURE__DEVICE`
pub const ENV_PREFIX: &str = "QRSCAN";

/// Scanner configuration, built once at startup and passed down by reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub scanner: ScannerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub device: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Seconds a record stays suppressed after being reported; 0 disables
    pub dedup_timeout_secs: u64,
    /// Print version, ECC level, mask and type under each payload
    pub verbose: bool,
    /// Forget fingerprints idle for this long; unset keeps them forever
    pub evict_after_secs: Option<u64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: default_device_path(),
            width: 640,
            height: 480,
            fps: 25,
            buffer_count: 8,
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            dedup_timeout_secs: 2,
            verbose: false,
            evict_after_secs: None,
        }
    }
}

impl CaptureConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }

    pub fn set_resolution(&mut self, res: Resolution) {
        self.width = res.width;
        self.height = res.height;
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `QRSCAN_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_dimensions(u64::from(self.capture.width), u64::from(self.capture.height))
    }
}
