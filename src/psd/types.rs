//! Fixed-size PSD records and enums
//!
//! Everything here is big-endian on disk.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::PsdError;

/// PSD file signature
pub const PSD_SIGNATURE: &[u8; 4] = b"8BPS";

/// Signature preceding blend mode keys and most tagged blocks
pub const BIM_SIGNATURE: &[u8; 4] = b"8BIM";

/// PSD color modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ColorMode {
    Bitmap = 0,
    Grayscale = 1,
    Indexed = 2,
    Rgb = 3,
    Cmyk = 4,
    Multichannel = 7,
    Duotone = 8,
    Lab = 9,
}

impl ColorMode {
    pub fn from_u16(value: u16) -> Result<Self, PsdError> {
        Ok(match value {
            0 => ColorMode::Bitmap,
            1 => ColorMode::Grayscale,
            2 => ColorMode::Indexed,
            3 => ColorMode::Rgb,
            4 => ColorMode::Cmyk,
            7 => ColorMode::Multichannel,
            8 => ColorMode::Duotone,
            9 => ColorMode::Lab,
            _ => return Err(PsdError::UnsupportedColorMode(value)),
        })
    }

    /// Color channels required by the mode, not counting alpha
    pub fn min_channels(self) -> u16 {
        match self {
            ColorMode::Rgb | ColorMode::Lab => 3,
            ColorMode::Cmyk => 4,
            ColorMode::Bitmap
            | ColorMode::Grayscale
            | ColorMode::Indexed
            | ColorMode::Multichannel
            | ColorMode::Duotone => 1,
        }
    }
}

/// Channel pixel compression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Compression {
    Raw = 0,
    Rle = 1,
    Zip = 2,
    ZipPrediction = 3,
}

impl Compression {
    pub fn from_u16(value: u16) -> Result<Self, PsdError> {
        Ok(match value {
            0 => Compression::Raw,
            1 => Compression::Rle,
            2 => Compression::Zip,
            3 => Compression::ZipPrediction,
            _ => return Err(PsdError::UnsupportedCompression(value)),
        })
    }
}

/// Validate a bit depth
pub fn check_depth(depth: u16) -> Result<(), PsdError> {
    match depth {
        1 | 8 | 16 | 32 => Ok(()),
        _ => Err(PsdError::UnsupportedBitDepth(depth)),
    }
}

/// Bytes in one row of `width` samples at `depth` bits
pub fn bytes_per_row(width: u32, depth: u16) -> usize {
    let width = width as usize;
    match depth {
        1 => (width + 7) / 8,
        _ => width * (depth as usize / 8),
    }
}

/// Axis-aligned bounds; width/height are derived from right/bottom edges
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from the on-disk top/left/bottom/right quadruple
    pub fn from_edges(top: i32, left: i32, bottom: i32, right: i32) -> Self {
        Self {
            x: left,
            y: top,
            width: right.wrapping_sub(left),
            height: bottom.wrapping_sub(top),
        }
    }

    /// (top, left, bottom, right)
    pub fn edges(&self) -> (i32, i32, i32, i32) {
        (
            self.y,
            self.x,
            self.y.wrapping_add(self.height),
            self.x.wrapping_add(self.width),
        )
    }

    pub fn pixel_width(&self) -> u32 {
        self.width.max(0) as u32
    }

    pub fn pixel_height(&self) -> u32 {
        self.height.max(0) as u32
    }

    pub fn area(&self) -> usize {
        self.pixel_width() as usize * self.pixel_height() as usize
    }
}

/// File header
///
/// `8BPS`, version, six reserved bytes, then channel count, rows, columns,
/// bit depth and color mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsdHeader {
    pub version: u16,
    pub channels: u16,
    pub height: u32,
    pub width: u32,
    pub depth: u16,
    pub color_mode: ColorMode,
}

impl PsdHeader {
    pub const SIZE: usize = 26;
    pub const MAX_CHANNELS: u16 = 56;
    pub const MAX_DIMENSION: u32 = 30000;

    /// Create a new 8-bit header with the mode's minimum channel count
    pub fn new(width: u32, height: u32, color_mode: ColorMode) -> Self {
        Self {
            version: 1,
            channels: color_mode.min_channels(),
            height,
            width,
            depth: 8,
            color_mode,
        }
    }

    /// One extra channel beyond the color channels, read as alpha
    pub fn with_alpha(self) -> Self {
        Self {
            channels: self.color_mode.min_channels() + 1,
            ..self
        }
    }

    /// Read and validate the header, field by field
    pub fn read<R: Read>(r: &mut R) -> Result<Self, PsdError> {
        let mut signature = [0u8; 4];
        r.read_exact(&mut signature)?;
        if &signature != PSD_SIGNATURE {
            return Err(PsdError::InvalidSignature(signature));
        }

        let version = r.read_u16::<BigEndian>()?;
        if version != 1 {
            return Err(PsdError::UnsupportedVersion(version));
        }

        let mut reserved = [0u8; 6];
        r.read_exact(&mut reserved)?;

        let channels = r.read_u16::<BigEndian>()?;
        check_channels(channels)?;

        let height = r.read_u32::<BigEndian>()?;
        let width = r.read_u32::<BigEndian>()?;
        check_dimensions(width, height)?;

        let depth = r.read_u16::<BigEndian>()?;
        check_depth(depth)?;

        let color_mode = ColorMode::from_u16(r.read_u16::<BigEndian>()?)?;

        Ok(Self {
            version,
            channels,
            height,
            width,
            depth,
            color_mode,
        })
    }

    pub fn validate(&self) -> Result<(), PsdError> {
        if self.version != 1 {
            return Err(PsdError::UnsupportedVersion(self.version));
        }
        check_channels(self.channels)?;
        check_dimensions(self.width, self.height)?;
        check_depth(self.depth)
    }

    /// Bytes in one full-canvas row
    pub fn row_bytes(&self) -> usize {
        bytes_per_row(self.width, self.depth)
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(PSD_SIGNATURE);
        buf[4..6].copy_from_slice(&self.version.to_be_bytes());
        buf[12..14].copy_from_slice(&self.channels.to_be_bytes());
        buf[14..18].copy_from_slice(&self.height.to_be_bytes());
        buf[18..22].copy_from_slice(&self.width.to_be_bytes());
        buf[22..24].copy_from_slice(&self.depth.to_be_bytes());
        buf[24..26].copy_from_slice(&(self.color_mode as u16).to_be_bytes());
        w.write_all(&buf)
    }
}

fn check_channels(channels: u16) -> Result<(), PsdError> {
    if channels == 0 || channels > PsdHeader::MAX_CHANNELS {
        return Err(PsdError::InvalidDimensions(format!(
            "channel count {} outside 1-{}",
            channels,
            PsdHeader::MAX_CHANNELS
        )));
    }
    Ok(())
}

fn check_dimensions(width: u32, height: u32) -> Result<(), PsdError> {
    if width > PsdHeader::MAX_DIMENSION || height > PsdHeader::MAX_DIMENSION {
        return Err(PsdError::InvalidDimensions(format!(
            "{}x{} exceeds {}",
            width,
            height,
            PsdHeader::MAX_DIMENSION
        )));
    }
    Ok(())
}

/// Entry of a layer record's channel table
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: i16,
    /// Bytes of channel data, compression tag included
    pub data_length: u32,
}

impl ChannelInfo {
    pub const SIZE: usize = 6;

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        let id = r.read_i16::<BigEndian>()?;
        let data_length = r.read_u32::<BigEndian>()?;
        Ok(Self { id, data_length })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_i16::<BigEndian>(self.id)?;
        w.write_u32::<BigEndian>(self.data_length)
    }
}

/// Layer record flags; on disk bit 1 means hidden
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerFlags {
    pub transparency_protected: bool,
    pub visible: bool,
    pub obsolete: bool,
    pub has_useful_info: bool,
    pub pixel_data_irrelevant: bool,
}

impl Default for LayerFlags {
    fn default() -> Self {
        Self {
            transparency_protected: false,
            visible: true,
            obsolete: false,
            has_useful_info: true,
            pixel_data_irrelevant: false,
        }
    }
}

impl LayerFlags {
    pub fn to_byte(self) -> u8 {
        (self.transparency_protected as u8)
            | (!self.visible as u8) << 1
            | (self.obsolete as u8) << 2
            | (self.has_useful_info as u8) << 3
            | (self.pixel_data_irrelevant as u8) << 4
    }

    pub fn from_byte(b: u8) -> Self {
        Self {
            transparency_protected: b & 0x01 != 0,
            visible: b & 0x02 == 0,
            obsolete: b & 0x04 != 0,
            has_useful_info: b & 0x08 != 0,
            pixel_data_irrelevant: b & 0x10 != 0,
        }
    }
}

/// Layer mask flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaskFlags {
    pub position_relative: bool,
    pub disabled: bool,
    pub invert_on_blend: bool,
    pub from_rendering: bool,
    pub has_parameters: bool,
}

impl MaskFlags {
    pub fn to_byte(self) -> u8 {
        (self.position_relative as u8)
            | (self.disabled as u8) << 1
            | (self.invert_on_blend as u8) << 2
            | (self.from_rendering as u8) << 3
            | (self.has_parameters as u8) << 4
    }

    pub fn from_byte(b: u8) -> Self {
        Self {
            position_relative: (b & 0x01) != 0,
            disabled: (b & 0x02) != 0,
            invert_on_blend: (b & 0x04) != 0,
            from_rendering: (b & 0x08) != 0,
            has_parameters: (b & 0x10) != 0,
        }
    }
}

/// Image resource IDs the codec knows by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ImageResourceId {
    ResolutionInfo = 0x03ED,
    AlphaChannelNames = 0x03EE,
    LayerStateInfo = 0x0400,
    LayersGroupInfo = 0x0402,
    IccProfile = 0x040F,
    VersionInfo = 0x0421,
    XmpMetadata = 0x0424,
}

impl ImageResourceId {
    const ALL: [ImageResourceId; 7] = [
        Self::ResolutionInfo,
        Self::AlphaChannelNames,
        Self::LayerStateInfo,
        Self::LayersGroupInfo,
        Self::IccProfile,
        Self::VersionInfo,
        Self::XmpMetadata,
    ];

    pub fn from_u16(id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|known| *known as u16 == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ResolutionInfo => "resolution",
            Self::AlphaChannelNames => "alpha channel names",
            Self::LayerStateInfo => "layer state",
            Self::LayersGroupInfo => "layer groups",
            Self::IccProfile => "ICC profile",
            Self::VersionInfo => "version",
            Self::XmpMetadata => "XMP metadata",
        }
    }
}

/// Payload of the resolution resource
///
/// Resolutions are 16.16 fixed point; units are 1 for pixels/inch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionInfo {
    pub h_res: u32,
    pub h_res_unit: u16,
    pub width_unit: u16,
    pub v_res: u32,
    pub v_res_unit: u16,
    pub height_unit: u16,
}

impl ResolutionInfo {
    pub const SIZE: usize = 16;

    /// Same resolution on both axes, in inches
    pub fn new(dpi: u32) -> Self {
        let fixed = dpi << 16;
        Self {
            h_res: fixed,
            h_res_unit: 1,
            width_unit: 1,
            v_res: fixed,
            v_res_unit: 1,
            height_unit: 1,
        }
    }

    /// Horizontal resolution, integer part
    pub fn dpi(&self) -> u32 {
        self.h_res >> 16
    }

    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            h_res: r.read_u32::<BigEndian>()?,
            h_res_unit: r.read_u16::<BigEndian>()?,
            width_unit: r.read_u16::<BigEndian>()?,
            v_res: r.read_u32::<BigEndian>()?,
            v_res_unit: r.read_u16::<BigEndian>()?,
            height_unit: r.read_u16::<BigEndian>()?,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<BigEndian>(self.h_res)?;
        w.write_u16::<BigEndian>(self.h_res_unit)?;
        w.write_u16::<BigEndian>(self.width_unit)?;
        w.write_u32::<BigEndian>(self.v_res)?;
        w.write_u16::<BigEndian>(self.v_res_unit)?;
        w.write_u16::<BigEndian>(self.height_unit)?;
        Ok(())
    }
}
