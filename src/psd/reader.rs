//! PSD file reader
//!
//! Sections are read strictly in file order; channel data stays compressed
//! until every section has been parsed, then is decoded in parallel.

use std::io::{Read, Seek};
use std::time::Instant;

use byteorder::{BigEndian, ReadBytesExt};

use super::composite::CompositeImage;
use super::decode::decode_channels;
use super::document::Document;
use super::info::InfoRegistry;
use super::resources::ImageResources;
use super::section::SectionReader;
use super::stream::PsdRead;
use super::types::PsdHeader;
use crate::config::LoadOptions;
use crate::encoding::TextEncoding;
use crate::error::PsdError;

/// Read a whole document
pub(crate) fn read_document<R: Read + Seek>(
    r: &mut R,
    encoding: &dyn TextEncoding,
    options: &LoadOptions,
) -> Result<Document, PsdError> {
    let start = Instant::now();

    let header = PsdHeader::read(r)?;
    tracing::debug!(
        "PSD header: {}x{}, {} channels, {}-bit {:?}",
        header.width,
        header.height,
        header.channels,
        header.depth,
        header.color_mode
    );

    let color_length = r.read_u32::<BigEndian>()?;
    let color_data = r.read_bytes(color_length as usize)?;

    let resources = ImageResources::read(r, encoding, options.clamp_sections)?;
    tracing::debug!("Read {} image resources", resources.len());

    let registry = InfoRegistry::default();
    let section = SectionReader {
        encoding,
        registry: &registry,
        clamp: options.clamp_sections,
    }
    .read(r)?;

    let mut composite = CompositeImage::read(r, &header)?;
    let parse_ms = start.elapsed().as_secs_f64() * 1000.0;
    tracing::info!("[PSD] Structure parse: {:.1}ms", parse_ms);

    let mut layers = section.layers;
    let decode_start = Instant::now();
    decode_channels(&mut layers, &mut composite, &header, options.worker_count())?;
    tracing::info!(
        "[PSD] Channel decode: {:.1}ms",
        decode_start.elapsed().as_secs_f64() * 1000.0
    );

    tracing::info!(
        "Loaded PSD: {}x{}, {} layers, {} tagged blocks",
        header.width,
        header.height,
        layers.len(),
        section.infos.len()
    );

    Ok(Document {
        header,
        color_data,
        resources,
        layers,
        merged_alpha: section.merged_alpha,
        global_mask: section.global_mask,
        global_infos: section.infos,
        composite,
    })
}
