//! Layer records
//!
//! A layer record carries the bounds, the channel table, blend settings and
//! an "extra data" block with the mask, blending ranges, legacy name and the
//! tagged blocks. Pixel data for all layers follows the records separately.

use std::io::{Read, Seek, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::blend::BlendMode;
use super::channel::Channel;
use super::info::{
    InfoRegistry, LayerInfo, SectionDivider, SectionKind, TaggedBlock, KEY_UNICODE_NAME,
};
use super::stream::{
    ensure_within, finish_section, length_field, write_length_block, LengthBlock, PsdRead,
    PsdWrite,
};
use super::types::{
    ChannelInfo, ColorMode, Compression, LayerFlags, MaskFlags, PsdHeader, Rect, BIM_SIGNATURE,
};
use crate::encoding::TextEncoding;
use crate::error::PsdError;
use crate::groups::GroupRole;

/// Legacy names longer than this are cut on write; the full name lives in `luni`
pub const MAX_LEGACY_NAME: usize = 31;

/// Name Photoshop gives to the hidden marker closing a group
pub const GROUP_END_NAME: &str = "</Layer group>";

/// Parameters of the vector-derived ("real") user mask
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMask {
    pub rect: Rect,
    pub default_color: u8,
    pub flags: MaskFlags,
}

/// Density and feather applied to the user and vector masks
///
/// Present when the mask flags carry `has_parameters`. Each field is stored
/// only if its bit is set in the leading parameter byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaskParameters {
    pub user_density: Option<u8>,
    pub user_feather: Option<f64>,
    pub vector_density: Option<u8>,
    pub vector_feather: Option<f64>,
}

impl PartialEq for MaskParameters {
    fn eq(&self, other: &Self) -> bool {
        self.user_density == other.user_density
            && self.user_feather.map(f64::to_bits) == other.user_feather.map(f64::to_bits)
            && self.vector_density == other.vector_density
            && self.vector_feather.map(f64::to_bits) == other.vector_feather.map(f64::to_bits)
    }
}

impl Eq for MaskParameters {}

impl MaskParameters {
    fn read<R: Read>(r: &mut R) -> Result<(Self, u64), PsdError> {
        let present = r.read_u8()?;
        let mut params = Self::default();
        let mut consumed = 1;
        if present & 0x01 != 0 {
            params.user_density = Some(r.read_u8()?);
            consumed += 1;
        }
        if present & 0x02 != 0 {
            params.user_feather = Some(r.read_f64::<BigEndian>()?);
            consumed += 8;
        }
        if present & 0x04 != 0 {
            params.vector_density = Some(r.read_u8()?);
            consumed += 1;
        }
        if present & 0x08 != 0 {
            params.vector_feather = Some(r.read_f64::<BigEndian>()?);
            consumed += 8;
        }
        Ok((params, consumed))
    }

    fn write<W: Write>(&self, w: &mut W) -> Result<(), PsdError> {
        let present = (self.user_density.is_some() as u8)
            | (self.user_feather.is_some() as u8) << 1
            | (self.vector_density.is_some() as u8) << 2
            | (self.vector_feather.is_some() as u8) << 3;
        w.write_u8(present)?;
        if let Some(density) = self.user_density {
            w.write_u8(density)?;
        }
        if let Some(feather) = self.user_feather {
            w.write_f64::<BigEndian>(feather)?;
        }
        if let Some(density) = self.vector_density {
            w.write_u8(density)?;
        }
        if let Some(feather) = self.vector_feather {
            w.write_f64::<BigEndian>(feather)?;
        }
        Ok(())
    }
}

/// Layer mask data from the extra-data block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskInfo {
    pub rect: Rect,
    pub default_color: u8,
    pub flags: MaskFlags,
    /// Written only while `flags.has_parameters` is set
    pub parameters: Option<MaskParameters>,
    pub user_mask: Option<UserMask>,
    /// Bytes after the parsed fields, kept for re-save
    pub trailing: Vec<u8>,
    /// Decoded layer mask pixels (channel -2)
    pub data: Vec<u8>,
    /// Decoded user mask pixels (channel -3)
    pub user_data: Vec<u8>,
}

impl MaskInfo {
    pub fn new(rect: Rect, default_color: u8) -> Self {
        Self {
            rect,
            default_color,
            flags: MaskFlags::default(),
            parameters: None,
            // Pads the block to the usual 20 bytes
            trailing: vec![0, 0],
            user_mask: None,
            data: Vec::new(),
            user_data: Vec::new(),
        }
    }

    fn read<R: Read + Seek>(r: &mut R, length: u64) -> Result<Self, PsdError> {
        if length < 18 {
            return Err(PsdError::InvalidLayerHeader(format!(
                "mask data of {} bytes",
                length
            )));
        }
        let rect = r.read_rect()?;
        let default_color = r.read_u8()?;
        let flags = MaskFlags::from_byte(r.read_u8()?);
        let mut consumed = 18;

        let mut parameters = None;
        if flags.has_parameters {
            let (params, size) = MaskParameters::read(r)?;
            parameters = Some(params);
            consumed += size;
        }
        if consumed > length {
            return Err(PsdError::InvalidLayerHeader(format!(
                "mask parameters need {} bytes, {} declared",
                consumed, length
            )));
        }

        let mut user_mask = None;
        if length - consumed >= 18 {
            let user_flags = MaskFlags::from_byte(r.read_u8()?);
            let user_color = r.read_u8()?;
            let user_rect = r.read_rect()?;
            user_mask = Some(UserMask {
                rect: user_rect,
                default_color: user_color,
                flags: user_flags,
            });
            consumed += 18;
        }

        let trailing = r.read_bytes((length - consumed) as usize)?;
        Ok(Self {
            rect,
            default_color,
            flags,
            parameters,
            user_mask,
            trailing,
            data: Vec::new(),
            user_data: Vec::new(),
        })
    }

    fn write<W: Write + Seek>(&self, w: &mut W) -> Result<(), PsdError> {
        w.write_rect(&self.rect)?;
        w.write_u8(self.default_color)?;
        w.write_u8(self.flags.to_byte())?;
        if self.flags.has_parameters {
            self.parameters.unwrap_or_default().write(w)?;
        }
        if let Some(user) = &self.user_mask {
            w.write_u8(user.flags.to_byte())?;
            w.write_u8(user.default_color)?;
            w.write_rect(&user.rect)?;
        }
        w.write_all(&self.trailing)?;
        Ok(())
    }
}

/// Blending ranges, kept as stored (pairs of source/destination ranges)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlendingRanges {
    pub data: Vec<u8>,
}

impl BlendingRanges {
    /// (source, destination) ranges, composite gray first
    pub fn ranges(&self) -> impl Iterator<Item = ([u8; 4], [u8; 4])> + '_ {
        self.data.chunks_exact(8).map(|pair| {
            let mut source = [0u8; 4];
            let mut dest = [0u8; 4];
            source.copy_from_slice(&pair[..4]);
            dest.copy_from_slice(&pair[4..]);
            (source, dest)
        })
    }
}

/// A layer as stored in the layer list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub rect: Rect,
    pub channels: Vec<Channel>,
    pub blend_mode: BlendMode,
    pub opacity: u8,
    /// Clipped to the layer below
    pub clipping: bool,
    pub flags: LayerFlags,
    /// Display name; the Unicode name when present
    pub name: String,
    pub blending_ranges: Option<BlendingRanges>,
    pub mask: Option<MaskInfo>,
    pub infos: Vec<TaggedBlock>,
}

impl Layer {
    pub fn new(name: &str, rect: Rect) -> Self {
        Self {
            rect,
            channels: Vec::new(),
            blend_mode: BlendMode::Normal,
            opacity: 255,
            clipping: false,
            flags: LayerFlags::default(),
            name: name.to_string(),
            blending_ranges: None,
            mask: None,
            infos: Vec::new(),
        }
    }

    /// Empty-bounded layer with a section divider record
    fn marker(name: &str, kind: SectionKind, color_mode: ColorMode) -> Self {
        let mut layer = Self::new(name, Rect::default());
        layer.channels.push(Channel::new(Channel::ALPHA, Compression::Raw));
        for id in 0..color_mode.min_channels() as i16 {
            layer.channels.push(Channel::new(id, Compression::Raw));
        }
        let mut divider = SectionDivider::new(kind);
        if kind != SectionKind::Divider {
            layer.blend_mode = BlendMode::PassThrough;
            divider.blend_mode = Some(BlendMode::PassThrough);
        }
        layer.infos.push(TaggedBlock::section_divider(divider));
        layer
    }

    /// Layer opening a group; it sits above its children in document order
    pub fn group_start(name: &str, expanded: bool, color_mode: ColorMode) -> Self {
        let kind = if expanded {
            SectionKind::OpenFolder
        } else {
            SectionKind::ClosedFolder
        };
        Self::marker(name, kind, color_mode)
    }

    /// Hidden layer closing a group; it sits below its children
    pub fn group_end(color_mode: ColorMode) -> Self {
        let mut layer = Self::marker(GROUP_END_NAME, SectionKind::Divider, color_mode);
        layer.flags.visible = false;
        layer
    }

    pub fn channel(&self, id: i16) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn channel_mut(&mut self, id: i16) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| c.id == id)
    }

    /// Bounds covered by a channel
    pub fn channel_rect(&self, id: i16) -> Rect {
        match (id, &self.mask) {
            (Channel::LAYER_MASK, Some(mask)) => mask.rect,
            (Channel::USER_MASK, Some(mask)) => mask
                .user_mask
                .as_ref()
                .map_or(mask.rect, |user| user.rect),
            _ => self.rect,
        }
    }

    pub fn section_divider(&self) -> Option<&SectionDivider> {
        self.infos.iter().find_map(|block| match &block.info {
            LayerInfo::SectionDivider(divider) => Some(divider),
            _ => None,
        })
    }

    pub fn group_role(&self) -> GroupRole {
        match self.section_divider().map(|d| d.kind) {
            Some(SectionKind::OpenFolder) => GroupRole::GroupStart { expanded: true },
            Some(SectionKind::ClosedFolder) => GroupRole::GroupStart { expanded: false },
            Some(SectionKind::Divider) => GroupRole::GroupEnd,
            Some(SectionKind::Other) | None => GroupRole::Normal,
        }
    }

    /// Read one layer record; `end` bounds the layer info block
    pub(crate) fn read_record<R: Read + Seek>(
        r: &mut R,
        end: u64,
        encoding: &dyn TextEncoding,
        registry: &InfoRegistry,
        clamp: bool,
    ) -> Result<Self, PsdError> {
        let rect = r.read_rect()?;
        if rect.width < 0 || rect.height < 0 {
            return Err(PsdError::InvalidLayerHeader(format!(
                "negative bounds {}x{}",
                rect.width, rect.height
            )));
        }

        let channel_count = r.read_u16::<BigEndian>()?;
        ensure_within(
            r,
            channel_count as u64 * ChannelInfo::SIZE as u64,
            end,
            "channel table",
        )?;
        let mut channels = Vec::with_capacity(channel_count as usize);
        for _ in 0..channel_count {
            let info = ChannelInfo::read(r)?;
            let mut channel = Channel::new(info.id, Compression::Raw);
            channel.length = info.data_length;
            channels.push(channel);
        }

        let signature = r.read_key()?;
        if &signature != BIM_SIGNATURE {
            return Err(PsdError::InvalidLayerHeader(format!(
                "blend mode signature {:?}",
                String::from_utf8_lossy(&signature)
            )));
        }
        let blend_mode = BlendMode::from_key(r.read_key()?)?;
        let opacity = r.read_u8()?;
        let clipping = r.read_u8()? != 0;
        let flags = LayerFlags::from_byte(r.read_u8()?);
        let _filler = r.read_u8()?;

        let extra_length = r.read_u32::<BigEndian>()? as u64;
        ensure_within(r, extra_length, end, "layer extra data")?;
        let extra_end = r.stream_position()? + extra_length;

        let mask_length = r.read_u32::<BigEndian>()? as u64;
        ensure_within(r, mask_length, extra_end, "layer mask data")?;
        let mask = match mask_length {
            0 => None,
            len => Some(MaskInfo::read(r, len)?),
        };

        let ranges_length = r.read_u32::<BigEndian>()? as u64;
        ensure_within(r, ranges_length, extra_end, "blending ranges")?;
        let blending_ranges = match ranges_length {
            0 => None,
            len => Some(BlendingRanges {
                data: r.read_bytes(len as usize)?,
            }),
        };

        let mut name = r.read_pascal_string(4, encoding)?;

        let mut infos = Vec::new();
        while r.stream_position()? + 12 <= extra_end {
            infos.push(registry.read_block(r, extra_end, 1)?);
        }
        finish_section(r, extra_end, clamp, "layer extra data")?;

        if let Some(unicode) = infos.iter().find_map(|block| match &block.info {
            LayerInfo::UnicodeName(text) => Some(text),
            _ => None,
        }) {
            name = unicode.clone();
        }

        tracing::debug!(
            "Layer '{}': {}x{} at ({}, {}), {} channels, {} tagged blocks",
            name,
            rect.width,
            rect.height,
            rect.x,
            rect.y,
            channels.len(),
            infos.len()
        );

        Ok(Self {
            rect,
            channels,
            blend_mode,
            opacity,
            clipping,
            flags,
            name,
            blending_ranges,
            mask,
            infos,
        })
    }

    /// Write the layer record; channels must already be encoded
    pub(crate) fn write_record<W: Write + Seek>(
        &self,
        w: &mut W,
        encoding: &dyn TextEncoding,
    ) -> Result<(), PsdError> {
        w.write_rect(&self.rect)?;

        w.write_u16::<BigEndian>(length_field(self.channels.len(), "channel count")?)?;
        for channel in &self.channels {
            ChannelInfo {
                id: channel.id,
                data_length: channel.length,
            }
            .write(w)?;
        }

        w.write_key(BIM_SIGNATURE)?;
        w.write_key(&self.blend_mode.key())?;
        w.write_u8(self.opacity)?;
        w.write_u8(self.clipping as u8)?;
        w.write_u8(self.flags.to_byte())?;
        w.write_u8(0)?; // Filler

        let mut extra = LengthBlock::begin(w)?;

        match &self.mask {
            Some(mask) => {
                write_length_block(&mut *extra, |w| mask.write(w))?;
            }
            None => extra.write_u32::<BigEndian>(0)?,
        }

        match &self.blending_ranges {
            Some(ranges) => {
                let len = length_field(ranges.data.len(), "blending ranges")?;
                extra.write_u32::<BigEndian>(len)?;
                extra.write_all(&ranges.data)?;
            }
            None => extra.write_u32::<BigEndian>(0)?,
        }

        extra.write_pascal_string(&self.name, 4, MAX_LEGACY_NAME, encoding)?;

        for block in &self.infos {
            block.write(&mut *extra, 1)?;
        }

        extra.finish()?;
        Ok(())
    }

    /// Copy decoded mask channels into the mask info
    pub(crate) fn sync_mask_data(&mut self) {
        let Some(mask) = self.mask.as_mut() else {
            return;
        };
        for channel in &self.channels {
            match channel.id {
                Channel::LAYER_MASK => mask.data = channel.data.clone(),
                Channel::USER_MASK => mask.user_data = channel.data.clone(),
                _ => {}
            }
        }
    }

    /// Keep exactly one Unicode name block, matching `name`
    pub(crate) fn sync_unicode_name(&mut self) -> Result<(), PsdError> {
        let count = self
            .infos
            .iter()
            .filter(|block| block.key == KEY_UNICODE_NAME)
            .count();
        if count > 1 {
            return Err(PsdError::InvalidLayerState(format!(
                "layer '{}' has {} Unicode name records",
                self.name, count
            )));
        }

        let info = LayerInfo::UnicodeName(self.name.clone());
        match self
            .infos
            .iter_mut()
            .find(|block| block.key == KEY_UNICODE_NAME)
        {
            Some(block) => block.info = info,
            None => self.infos.push(TaggedBlock::new(KEY_UNICODE_NAME, info)),
        }
        Ok(())
    }

    /// Color plus transparency channels must match the color mode
    pub(crate) fn check_channel_count(&self, color_mode: ColorMode) -> Result<(), PsdError> {
        if color_mode == ColorMode::Multichannel {
            return Ok(());
        }
        let count = self.channels.iter().filter(|c| c.id >= Channel::ALPHA).count();
        let min = color_mode.min_channels() as usize;
        if count != min && count != min + 1 {
            return Err(PsdError::InvalidLayerState(format!(
                "layer '{}' has {} color channels, {:?} needs {} or {}",
                self.name,
                count,
                color_mode,
                min,
                min + 1
            )));
        }
        Ok(())
    }

    /// Validate and re-encode everything a save writes for this layer
    pub(crate) fn prepare_for_save(&mut self, header: &PsdHeader) -> Result<(), PsdError> {
        self.check_channel_count(header.color_mode)?;
        length_field::<u16>(self.channels.len(), "channel count")?;
        if let Some(ranges) = &self.blending_ranges {
            length_field::<u32>(ranges.data.len(), "blending ranges")?;
        }
        self.sync_unicode_name()?;

        if let Some(mask) = &self.mask {
            let (data, user_data) = (mask.data.clone(), mask.user_data.clone());
            for channel in &mut self.channels {
                match channel.id {
                    Channel::LAYER_MASK if !data.is_empty() => channel.data = data.clone(),
                    Channel::USER_MASK if !user_data.is_empty() => {
                        channel.data = user_data.clone()
                    }
                    _ => {}
                }
            }
        }

        for i in 0..self.channels.len() {
            let rect = self.channel_rect(self.channels[i].id);
            self.channels[i].encode(rect.pixel_width(), rect.pixel_height(), header.depth)?;
        }
        Ok(())
    }
}
