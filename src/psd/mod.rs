//! Adobe Photoshop (.psd) format support
//!
//! Reads and writes PSD documents structurally: header, color mode data,
//! image resources, the layer and mask section and the composite image.
//! Layer pixel data is decoded after loading, in parallel.
//!
//! # Example
//!
//! ```ignore
//! use psdcodec::psd::Document;
//! use psdcodec::LegacyEncoding;
//!
//! let mut file = std::io::Cursor::new(std::fs::read("art.psd")?);
//! let mut doc = Document::load(&mut file, &LegacyEncoding::Latin1)?;
//! for layer in doc.layers() {
//!     println!("{} ({}x{})", layer.name, layer.rect.width, layer.rect.height);
//! }
//! doc.save_to_path("copy.psd".as_ref(), &Default::default())?;
//! ```

mod blend;
pub mod channel;
pub mod compression;
mod composite;
mod decode;
mod document;
pub mod info;
mod layer;
mod reader;
mod resources;
mod section;
pub mod stream;
mod types;
mod writer;


pub use blend::BlendMode;
pub use channel::Channel;
pub use composite::{composite_channel_ids, CompositeImage};
pub use document::Document;
pub use info::{InfoRegistry, LayerInfo, SectionDivider, SectionKind, TaggedBlock};
pub use layer::{
    BlendingRanges, Layer, MaskInfo, MaskParameters, UserMask, GROUP_END_NAME, MAX_LEGACY_NAME,
};
pub use resources::{ImageResource, ImageResources, ResourceData};
pub use types::{
    bytes_per_row, ColorMode, Compression, ImageResourceId, LayerFlags, MaskFlags, PsdHeader,
    Rect, ResolutionInfo,
};
