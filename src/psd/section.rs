//! Layer and mask information section
//!
//! ```text
//! u32 section length
//!   u32 layer info length
//!     i16 layer count (negative: first alpha channel is the merged alpha)
//!     layer records
//!     channel image data, layer by layer, channel by channel
//!     padding to a multiple of 4
//!   u32 global layer mask length + bytes
//!   tagged blocks, each padded to 4, until the section end
//! ```

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::info::{InfoRegistry, LayerInfo, TaggedBlock, KEY_LAYERS_16, KEY_LAYERS_32};
use super::layer::Layer;
use super::stream::{
    ensure_within, finish_section, length_field, write_length_block, PsdRead, PsdWrite,
};
use crate::encoding::TextEncoding;
use crate::error::PsdError;

/// Settings shared by every reader of the section
pub(crate) struct SectionReader<'a> {
    pub encoding: &'a dyn TextEncoding,
    pub registry: &'a InfoRegistry,
    pub clamp: bool,
}

/// Everything stored in the layer and mask section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerSection {
    pub layers: Vec<Layer>,
    pub merged_alpha: bool,
    /// Global layer mask, kept as stored
    pub global_mask: Vec<u8>,
    pub infos: Vec<TaggedBlock>,
}

impl SectionReader<'_> {
    pub fn read<R: Read + Seek>(&self, r: &mut R) -> Result<LayerSection, PsdError> {
        let mut section = LayerSection::default();

        let length = r.read_u32::<BigEndian>()? as u64;
        if length == 0 {
            return Ok(section);
        }
        let end = r.stream_position()? + length;
        tracing::debug!("Layer and mask section: {} bytes", length);

        let info_length = r.read_u32::<BigEndian>()? as u64;
        ensure_within(r, info_length, end, "layer info")?;
        let info_end = r.stream_position()? + info_length;
        if info_length > 0 {
            let (layers, merged_alpha) = self.read_layer_list(r, info_end)?;
            section.layers = layers;
            section.merged_alpha = merged_alpha;
        }
        self.finish_layer_info(r, info_end)?;

        if r.stream_position()? + 4 <= end {
            let mask_length = r.read_u32::<BigEndian>()? as u64;
            ensure_within(r, mask_length, end, "global layer mask")?;
            section.global_mask = r.read_bytes(mask_length as usize)?;
        }

        while r.stream_position()? + 12 <= end {
            let block = self.registry.read_block(r, end, 4)?;
            if block.key == KEY_LAYERS_16 || block.key == KEY_LAYERS_32 {
                if let LayerInfo::Raw(data) = &block.info {
                    let mut nested = Cursor::new(data.as_slice());
                    let (layers, merged_alpha) =
                        self.read_layer_list(&mut nested, data.len() as u64)?;
                    tracing::debug!(
                        "Nested layer list '{}' with {} layers",
                        block.key_str(),
                        layers.len()
                    );
                    section.layers = layers;
                    section.merged_alpha = merged_alpha;
                }
            }
            section.infos.push(block);
        }

        finish_section(r, end, self.clamp, "layer and mask section")?;
        Ok(section)
    }

    /// Layer count, records and channel data, all within `end`
    fn read_layer_list<R: Read + Seek>(
        &self,
        r: &mut R,
        end: u64,
    ) -> Result<(Vec<Layer>, bool), PsdError> {
        let count = r.read_i16::<BigEndian>()?;
        let merged_alpha = count < 0;
        let count = count.unsigned_abs() as usize;

        let mut layers = Vec::with_capacity(count);
        for _ in 0..count {
            layers.push(Layer::read_record(
                r,
                end,
                self.encoding,
                self.registry,
                self.clamp,
            )?);
        }

        for layer in &mut layers {
            for i in 0..layer.channels.len() {
                let rows = layer.channel_rect(layer.channels[i].id).pixel_height();
                let channel = &mut layer.channels[i];
                ensure_within(r, channel.length as u64, end, "channel data")?;
                channel.read_layer_data(r, rows)?;
            }
        }

        tracing::debug!(
            "Read {} layers (merged alpha: {})",
            layers.len(),
            merged_alpha
        );
        Ok((layers, merged_alpha))
    }

    /// Up to three bytes of alignment padding are always accepted
    fn finish_layer_info<R: Read + Seek>(&self, r: &mut R, end: u64) -> Result<(), PsdError> {
        let pos = r.stream_position()?;
        if pos < end && end - pos < 4 {
            r.seek(SeekFrom::Start(end))?;
            return Ok(());
        }
        finish_section(r, end, self.clamp, "layer info")
    }
}

/// Borrowed view of everything the section writes
pub(crate) struct SectionWriter<'a> {
    pub layers: &'a [Layer],
    pub merged_alpha: bool,
    pub global_mask: &'a [u8],
    pub infos: &'a [TaggedBlock],
}

impl LayerSection {
    pub(crate) fn writer(&self) -> SectionWriter<'_> {
        SectionWriter {
            layers: &self.layers,
            merged_alpha: self.merged_alpha,
            global_mask: &self.global_mask,
            infos: &self.infos,
        }
    }
}

/// Layer count as the signed 16-bit field stores it
pub(crate) fn layer_count(len: usize) -> Result<i16, PsdError> {
    i16::try_from(len)
        .map_err(|_| PsdError::InvalidLayerState(format!("{} layers exceed 32767", len)))
}

impl SectionWriter<'_> {
    /// Write the section; layer channels must already be encoded
    pub fn write<W: Write + Seek>(
        &self,
        w: &mut W,
        encoding: &dyn TextEncoding,
    ) -> Result<(), PsdError> {
        if self.layers.is_empty() && self.global_mask.is_empty() && self.infos.is_empty() {
            w.write_u32::<BigEndian>(0)?;
            return Ok(());
        }

        write_length_block(w, |w| -> Result<(), PsdError> {
            write_length_block(w, |w| self.write_layer_info(w, encoding))?;

            w.write_u32::<BigEndian>(length_field(self.global_mask.len(), "global mask")?)?;
            w.write_all(self.global_mask)?;

            for block in self.infos {
                block.write(w, 4)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn write_layer_info<W: Write + Seek>(
        &self,
        w: &mut W,
        encoding: &dyn TextEncoding,
    ) -> Result<(), PsdError> {
        if self.layers.is_empty() {
            return Ok(());
        }
        let start = w.stream_position()?;

        let count = layer_count(self.layers.len())?;
        w.write_i16::<BigEndian>(if self.merged_alpha { -count } else { count })?;

        for layer in self.layers {
            layer.write_record(w, encoding)?;
        }
        for layer in self.layers {
            for channel in &layer.channels {
                channel.write_layer_data(w)?;
            }
        }

        w.write_padding(start, 4)?;
        Ok(())
    }
}
