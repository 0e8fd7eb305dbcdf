//! Load and save options

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::encoding::LegacyEncoding;
use crate::error::PsdError;

/// Options controlling how a document is read
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Encoding of legacy Pascal strings
    pub encoding: LegacyEncoding,
    /// Force the cursor to a section's declared end when parsing consumed
    /// less than declared. Photoshop writes some sections with slack, so
    /// this is on by default. When off, any shortfall is a bounds error.
    pub clamp_sections: bool,
    /// Worker count for channel decoding; `None` uses available parallelism
    pub decode_threads: Option<usize>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            encoding: LegacyEncoding::Latin1,
            clamp_sections: true,
            decode_threads: None,
        }
    }
}

impl LoadOptions {
    /// Read options from a JSON file; missing fields take defaults
    pub fn from_json_file(path: &Path) -> Result<Self, PsdError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Effective decode worker count
    pub fn worker_count(&self) -> usize {
        self.decode_threads
            .filter(|&n| n > 0)
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
    }
}

/// Options controlling how a document is written
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveOptions {
    /// Encoding of legacy Pascal strings
    pub encoding: LegacyEncoding,
}

/// Both option sets, as stored in a CLI config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub load: LoadOptions,
    pub save: SaveOptions,
}

impl CodecConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, PsdError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
