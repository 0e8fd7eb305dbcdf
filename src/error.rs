//! PSD codec error types

use std::io;
use thiserror::Error;

/// Errors that can occur while loading or saving a PSD document
#[derive(Error, Debug)]
pub enum PsdError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid PSD signature: {0:?}")]
    InvalidSignature([u8; 4]),

    #[error("Unsupported PSD version: {0}")]
    UnsupportedVersion(u16),

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Unsupported bit depth: {0}")]
    UnsupportedBitDepth(u16),

    #[error("Unsupported color mode: {0}")]
    UnsupportedColorMode(u16),

    #[error("Unsupported compression: {0}")]
    UnsupportedCompression(u16),

    #[error("Invalid layer header: {0}")]
    InvalidLayerHeader(String),

    #[error("Invalid layer state: {0}")]
    InvalidLayerState(String),

    #[error("Unbalanced group markers: depth {depth} after layer {index}")]
    UnbalancedGroupMarkers { index: usize, depth: i32 },

    #[error("Buffer bounds error: {0}")]
    BufferBounds(String),

    #[error("Unsupported for save: {0}")]
    UnsupportedForSave(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<PsdError> for String {
    fn from(err: PsdError) -> Self {
        err.to_string()
    }
}

impl From<serde_json::Error> for PsdError {
    fn from(err: serde_json::Error) -> Self {
        PsdError::Config(err.to_string())
    }
}
