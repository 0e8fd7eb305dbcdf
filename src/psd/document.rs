//! In-memory PSD document

use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use super::composite::CompositeImage;
use super::info::TaggedBlock;
use super::layer::Layer;
use super::reader::read_document;
use super::resources::ImageResources;
use super::types::{ColorMode, Compression, PsdHeader};
use super::writer::write_document;
use crate::config::{LoadOptions, SaveOptions};
use crate::encoding::TextEncoding;
use crate::error::PsdError;

/// A PSD document: header, resources, layers and the composite image
///
/// Layers are kept in file order, bottom-most first. Groups are not a tree
/// here; see [`crate::groups`] for rebuilding the nesting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub header: PsdHeader,
    /// Color mode data (palette for indexed, curves for duotone)
    pub color_data: Vec<u8>,
    pub resources: ImageResources,
    pub layers: Vec<Layer>,
    /// The first alpha channel of the composite holds merged transparency
    pub merged_alpha: bool,
    pub global_mask: Vec<u8>,
    /// Tagged blocks stored after the layer list
    pub global_infos: Vec<TaggedBlock>,
    pub composite: CompositeImage,
}

impl Document {
    /// Empty 8-bit document with a zeroed composite image
    pub fn new(width: u32, height: u32, color_mode: ColorMode) -> Self {
        let header = PsdHeader::new(width, height, color_mode);
        let plane = vec![0u8; header.row_bytes() * height as usize];
        let planes = vec![plane; header.channels as usize];
        let composite = CompositeImage::from_planes(&header, Compression::Rle, planes);
        Self {
            header,
            color_data: Vec::new(),
            resources: ImageResources::new(),
            layers: Vec::new(),
            merged_alpha: false,
            global_mask: Vec::new(),
            global_infos: Vec::new(),
            composite,
        }
    }

    pub fn width(&self) -> u32 {
        self.header.width
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut Vec<Layer> {
        &mut self.layers
    }

    /// Load with default options and the given legacy encoding
    pub fn load<R: Read + Seek>(
        reader: &mut R,
        encoding: &dyn TextEncoding,
    ) -> Result<Self, PsdError> {
        Self::load_with(reader, encoding, &LoadOptions::default())
    }

    pub fn load_with<R: Read + Seek>(
        reader: &mut R,
        encoding: &dyn TextEncoding,
        options: &LoadOptions,
    ) -> Result<Self, PsdError> {
        read_document(reader, encoding, options)
    }

    /// Load a file, using the encoding from `options`
    pub fn open(path: &Path, options: &LoadOptions) -> Result<Self, PsdError> {
        tracing::info!("Loading PSD file: {:?}", path);
        let data = std::fs::read(path)?;
        Self::load_with(&mut Cursor::new(data), &options.encoding, options)
    }

    /// Validate, re-encode and write the document
    ///
    /// Fails before writing anything if the document cannot be saved.
    pub fn save<W: Write + Seek>(
        &mut self,
        writer: &mut W,
        encoding: &dyn TextEncoding,
    ) -> Result<(), PsdError> {
        write_document(self, writer, encoding)
    }

    pub fn save_with<W: Write + Seek>(
        &mut self,
        writer: &mut W,
        options: &SaveOptions,
    ) -> Result<(), PsdError> {
        write_document(self, writer, &options.encoding)
    }

    /// Write through a temporary file next to `path`, replacing it on success
    pub fn save_to_path(&mut self, path: &Path, options: &SaveOptions) -> Result<(), PsdError> {
        tracing::info!("Saving PSD file: {:?}", path);
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        // Encode fully in memory so a failed save never touches the target
        let mut buffer = Cursor::new(Vec::new());
        self.save_with(&mut buffer, options)?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(buffer.get_ref())?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| PsdError::Io(e.error))?;
        Ok(())
    }
}
