use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Largest accepted dimension is one below this
pub const MAX_DIMENSION: u64 = 10_000;

/// Platform default capture device
pub fn default_device_path() -> PathBuf {
    PathBuf::from("/dev/video0")
}

/// Requested capture size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_resolution(s)
    }
}

/// Parse `WxH` (either case of `x`), both sides in `1..10000`
pub fn parse_resolution(text: &str) -> Result<Resolution, ConfigError> {
    let mut seen_separator = false;
    let (mut w, mut h) = (0u64, 0u64);

    for c in text.chars() {
        match c {
            'x' | 'X' if !seen_separator => seen_separator = true,
            'x' | 'X' => return Err(ConfigError::ExtraSeparator(text.to_owned())),
            '0'..='9' => {
                let digit = u64::from(c as u8 - b'0');
                let side = if seen_separator { &mut h } else { &mut w };
                // Saturate so absurdly long inputs still land out of range
                *side = side.saturating_mul(10).saturating_add(digit);
            }
            other => return Err(ConfigError::InvalidChar(other)),
        }
    }

    check_dimensions(w, h)?;
    Ok(Resolution {
        width: w as u32,
        height: h as u32,
    })
}

pub fn check_dimensions(width: u64, height: u64) -> Result<(), ConfigError> {
    let valid = |d: u64| d > 0 && d < MAX_DIMENSION;
    if valid(width) && valid(height) {
        Ok(())
    } else {
        Err(ConfigError::SizeOutOfRange { width, height })
    }
}
