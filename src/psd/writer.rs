//! PSD file writer
//!
//! Everything that can fail is checked and encoded before the first byte is
//! written, so a rejected save leaves the output untouched.

use std::io::{Seek, Write};

use byteorder::{BigEndian, WriteBytesExt};

use super::document::Document;
use super::section::{layer_count, SectionWriter};
use super::stream::length_field;
use crate::encoding::TextEncoding;
use crate::error::PsdError;
use crate::groups;

/// Validate and re-encode every channel
fn prepare_document(doc: &mut Document) -> Result<(), PsdError> {
    if doc.header.depth != 8 {
        return Err(PsdError::UnsupportedForSave(format!(
            "{}-bit documents; only 8-bit is written",
            doc.header.depth
        )));
    }
    doc.header.validate()?;
    layer_count(doc.layers.len())?;
    length_field::<u32>(doc.color_data.len(), "color mode data")?;
    length_field::<u32>(doc.global_mask.len(), "global mask")?;

    for layer in &mut doc.layers {
        layer.prepare_for_save(&doc.header)?;
    }
    doc.composite.prepare_for_save(&doc.header)?;
    groups::validate_balance(&doc.layers)?;
    Ok(())
}

/// Write a whole document
pub(crate) fn write_document<W: Write + Seek>(
    doc: &mut Document,
    w: &mut W,
    encoding: &dyn TextEncoding,
) -> Result<(), PsdError> {
    // 1. Prepare (validate and pre-compress channel data)
    prepare_document(doc)?;

    // 2. File header
    doc.header.write(w)?;

    // 3. Color mode data
    w.write_u32::<BigEndian>(length_field(doc.color_data.len(), "color mode data")?)?;
    w.write_all(&doc.color_data)?;

    // 4. Image resources
    doc.resources.write(w, encoding)?;

    // 5. Layer and mask information
    SectionWriter {
        layers: &doc.layers,
        merged_alpha: doc.merged_alpha,
        global_mask: &doc.global_mask,
        infos: &doc.global_infos,
    }
    .write(w, encoding)?;

    // 6. Composite image data
    doc.composite.write(w)?;

    w.flush()?;
    tracing::info!(
        "Saved PSD: {}x{}, {} layers",
        doc.header.width,
        doc.header.height,
        doc.layers.len()
    );
    Ok(())
}
