//! psdcodec - Adobe Photoshop (.psd) reader and writer
//!
//! Loads PSD files into an in-memory [`Document`] (layers, masks, groups,
//! image resources, composite image) and writes them back, keeping records
//! it does not understand byte-for-byte.

pub mod config;
pub mod encoding;
pub mod error;
pub mod groups;
pub mod psd;

pub use config::{CodecConfig, LoadOptions, SaveOptions};
pub use encoding::{LegacyEncoding, TextEncoding};
pub use error::PsdError;
pub use psd::Document;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a `RUST_LOG`-driven tracing subscriber
///
/// Does nothing if a global subscriber is already set.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "psdcodec=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
