//! Additional layer information ("tagged blocks")
//!
//! Every block is `signature key length payload`. A small registry maps keys
//! to typed parsers; anything without a parser, or whose payload a parser
//! rejects, is kept as raw bytes so that re-saving is lossless.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::blend::BlendMode;
use super::stream::{ensure_within, padding_len, write_length_block, PsdRead, PsdWrite};
use super::types::BIM_SIGNATURE;
use crate::error::PsdError;

/// Alternate block signature used by some 64-bit aware writers
pub const B64_SIGNATURE: &[u8; 4] = b"8B64";

pub const KEY_UNICODE_NAME: [u8; 4] = *b"luni";
pub const KEY_SECTION_DIVIDER: [u8; 4] = *b"lsct";
pub const KEY_NESTED_SECTION_DIVIDER: [u8; 4] = *b"lsdk";
pub const KEY_LAYERS_16: [u8; 4] = *b"Lr16";
pub const KEY_LAYERS_32: [u8; 4] = *b"Lr32";

/// Section divider kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Other,
    OpenFolder,
    ClosedFolder,
    /// Hidden marker closing a group
    Divider,
}

impl SectionKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => SectionKind::Other,
            1 => SectionKind::OpenFolder,
            2 => SectionKind::ClosedFolder,
            3 => SectionKind::Divider,
            _ => return None,
        })
    }

    pub fn to_u32(self) -> u32 {
        match self {
            SectionKind::Other => 0,
            SectionKind::OpenFolder => 1,
            SectionKind::ClosedFolder => 2,
            SectionKind::Divider => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionDivider {
    pub kind: SectionKind,
    /// Present when the payload is at least 12 bytes
    pub blend_mode: Option<BlendMode>,
    /// Present when the payload is at least 16 bytes
    pub sub_type: Option<u32>,
}

impl SectionDivider {
    pub fn new(kind: SectionKind) -> Self {
        Self {
            kind,
            blend_mode: None,
            sub_type: None,
        }
    }
}

/// Decoded payload of a tagged block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerInfo {
    UnicodeName(String),
    SectionDivider(SectionDivider),
    Raw(Vec<u8>),
}

/// One tagged block with its signature and key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedBlock {
    pub signature: [u8; 4],
    pub key: [u8; 4],
    pub info: LayerInfo,
}

impl TaggedBlock {
    pub fn new(key: [u8; 4], info: LayerInfo) -> Self {
        Self {
            signature: *BIM_SIGNATURE,
            key,
            info,
        }
    }

    pub fn unicode_name(name: &str) -> Self {
        Self::new(KEY_UNICODE_NAME, LayerInfo::UnicodeName(name.to_string()))
    }

    pub fn section_divider(divider: SectionDivider) -> Self {
        Self::new(KEY_SECTION_DIVIDER, LayerInfo::SectionDivider(divider))
    }

    pub fn key_str(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }

    /// Write the payload (without signature, key or length)
    fn write_payload<W: Write + Seek>(&self, w: &mut W) -> Result<(), PsdError> {
        match &self.info {
            LayerInfo::UnicodeName(name) => {
                let start = w.stream_position()?;
                w.write_unicode_string(name)?;
                w.write_padding(start, 4)?;
            }
            LayerInfo::SectionDivider(divider) => {
                w.write_u32::<BigEndian>(divider.kind.to_u32())?;
                if let Some(mode) = divider.blend_mode {
                    w.write_key(BIM_SIGNATURE)?;
                    w.write_key(&mode.key())?;
                    if let Some(sub_type) = divider.sub_type {
                        w.write_u32::<BigEndian>(sub_type)?;
                    }
                }
            }
            LayerInfo::Raw(data) => w.write_all(data)?,
        }
        Ok(())
    }

    /// Write the block; `pad_multiple` > 1 pads after the payload, outside
    /// the declared length, measured from the payload start
    pub fn write<W: Write + Seek>(&self, w: &mut W, pad_multiple: u64) -> Result<(), PsdError> {
        w.write_key(&self.signature)?;
        w.write_key(&self.key)?;
        let start = w.stream_position()? + 4;
        write_length_block(w, |w| self.write_payload(w))?;
        if pad_multiple > 1 {
            w.write_padding(start, pad_multiple)?;
        }
        Ok(())
    }
}

/// Parser for one tagged-block key
pub type InfoParser = fn(&[u8]) -> Result<LayerInfo, PsdError>;

/// Key → parser table
#[derive(Clone)]
pub struct InfoRegistry {
    parsers: HashMap<[u8; 4], InfoParser>,
}

impl Default for InfoRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(KEY_UNICODE_NAME, parse_unicode_name);
        registry.register(KEY_SECTION_DIVIDER, parse_section_divider);
        registry.register(KEY_NESTED_SECTION_DIVIDER, parse_section_divider);
        registry
    }
}

impl InfoRegistry {
    /// Registry without any parsers; every block stays raw
    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    pub fn register(&mut self, key: [u8; 4], parser: InfoParser) {
        self.parsers.insert(key, parser);
    }

    /// Decode a payload, falling back to raw bytes
    pub fn parse(&self, key: [u8; 4], data: Vec<u8>) -> LayerInfo {
        let Some(parser) = self.parsers.get(&key) else {
            return LayerInfo::Raw(data);
        };
        match parser(&data) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(
                    "Tagged block '{}' kept raw: {}",
                    String::from_utf8_lossy(&key),
                    e
                );
                LayerInfo::Raw(data)
            }
        }
    }

    /// Read one block whose payload must end at or before `end`
    pub fn read_block<R: Read + Seek>(
        &self,
        r: &mut R,
        end: u64,
        pad_multiple: u64,
    ) -> Result<TaggedBlock, PsdError> {
        let signature = r.read_key()?;
        if &signature != BIM_SIGNATURE && &signature != B64_SIGNATURE {
            return Err(PsdError::InvalidLayerHeader(format!(
                "tagged block signature {:?}",
                String::from_utf8_lossy(&signature)
            )));
        }
        let key = r.read_key()?;
        let length = r.read_u32::<BigEndian>()? as u64;
        ensure_within(r, length, end, "tagged block")?;

        let start = r.stream_position()?;
        let data = r.read_bytes(length as usize)?;
        if pad_multiple > 1 {
            // Trailing padding may be cut off at the very end of a section
            if start + length + padding_len(length, pad_multiple) <= end {
                r.read_padding(start, pad_multiple)?;
            }
        }

        tracing::debug!(
            "Tagged block '{}' ({} bytes)",
            String::from_utf8_lossy(&key),
            length
        );

        Ok(TaggedBlock {
            signature,
            key,
            info: self.parse(key, data),
        })
    }
}

fn parse_unicode_name(data: &[u8]) -> Result<LayerInfo, PsdError> {
    let mut cursor = Cursor::new(data);
    let name = cursor.read_unicode_string()?;
    // A trailing NUL is sometimes counted in the length
    Ok(LayerInfo::UnicodeName(
        name.trim_end_matches('\0').to_string(),
    ))
}

fn parse_section_divider(data: &[u8]) -> Result<LayerInfo, PsdError> {
    if !matches!(data.len(), 4 | 12 | 16) {
        return Err(PsdError::InvalidLayerHeader(format!(
            "section divider payload of {} bytes",
            data.len()
        )));
    }
    let mut cursor = Cursor::new(data);
    let raw_kind = cursor.read_u32::<BigEndian>()?;
    let kind = SectionKind::from_u32(raw_kind).ok_or_else(|| {
        PsdError::InvalidLayerHeader(format!("section divider kind {}", raw_kind))
    })?;

    let mut divider = SectionDivider::new(kind);
    if data.len() >= 12 {
        let signature = cursor.read_key()?;
        if &signature != BIM_SIGNATURE {
            return Err(PsdError::InvalidLayerHeader(
                "section divider blend signature".into(),
            ));
        }
        divider.blend_mode = Some(BlendMode::from_key(cursor.read_key()?)?);
    }
    if data.len() >= 16 {
        divider.sub_type = Some(cursor.read_u32::<BigEndian>()?);
    }
    Ok(LayerInfo::SectionDivider(divider))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn block_bytes(key: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"8BIM");
        buf.extend_from_slice(key);
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    fn read_one(bytes: Vec<u8>) -> TaggedBlock {
        let end = bytes.len() as u64;
        InfoRegistry::default()
            .read_block(&mut Cursor::new(bytes), end, 1)
            .unwrap()
    }

    #[test]
    fn test_unicode_name() {
        let mut payload = vec![0, 0, 0, 2, 0, b'O', 0, b'K'];
        payload.extend_from_slice(&[0, 0, 0, 0]);
        let block = read_one(block_bytes(b"luni", &payload));
        assert_eq!(block.info, LayerInfo::UnicodeName("OK".into()));
    }

    #[test]
    fn test_section_divider_lengths() {
        let block = read_one(block_bytes(b"lsct", &[0, 0, 0, 1]));
        assert_eq!(
            block.info,
            LayerInfo::SectionDivider(SectionDivider::new(SectionKind::OpenFolder))
        );

        let mut payload = vec![0, 0, 0, 3];
        payload.extend_from_slice(b"8BIMpass");
        payload.extend_from_slice(&[0, 0, 0, 7]);
        let block = read_one(block_bytes(b"lsdk", &payload));
        let LayerInfo::SectionDivider(divider) = block.info else {
            panic!("expected divider");
        };
        assert_eq!(divider.kind, SectionKind::Divider);
        assert_eq!(divider.blend_mode, Some(BlendMode::PassThrough));
        assert_eq!(divider.sub_type, Some(7));
    }

    #[test]
    fn test_malformed_divider_kept_raw() {
        let block = read_one(block_bytes(b"lsct", &[0, 0, 0, 1, 9, 9]));
        assert_eq!(block.info, LayerInfo::Raw(vec![0, 0, 0, 1, 9, 9]));
    }

    #[test]
    fn test_unknown_key_raw() {
        let block = read_one(block_bytes(b"zzzz", &[1, 2, 3]));
        assert_eq!(block.key, *b"zzzz");
        assert_eq!(block.info, LayerInfo::Raw(vec![1, 2, 3]));
    }

    #[test]
    fn test_bad_signature() {
        let mut bytes = block_bytes(b"luni", &[0, 0, 0, 0]);
        bytes[0] = b'X';
        let end = bytes.len() as u64;
        let err = InfoRegistry::default()
            .read_block(&mut Cursor::new(bytes), end, 1)
            .unwrap_err();
        assert!(matches!(err, PsdError::InvalidLayerHeader(_)));
    }

    #[test]
    fn test_length_past_end() {
        let bytes = block_bytes(b"zzzz", &[1, 2, 3]);
        let err = InfoRegistry::default()
            .read_block(&mut Cursor::new(bytes), 12, 1)
            .unwrap_err();
        assert!(matches!(err, PsdError::BufferBounds(_)));
    }

    #[test]
    fn test_raw_block_exact_rewrite() {
        let bytes = block_bytes(b"zzzz", &[1, 2, 3]);
        let block = read_one(bytes.clone());
        let mut out = Cursor::new(Vec::new());
        block.write(&mut out, 1).unwrap();
        assert_eq!(out.into_inner(), bytes);
    }

    #[test]
    fn test_global_block_padding() {
        let block = TaggedBlock::new(*b"zzzz", LayerInfo::Raw(vec![1, 2, 3]));
        let mut out = Cursor::new(Vec::new());
        block.write(&mut out, 4).unwrap();
        let bytes = out.into_inner();
        assert_eq!(bytes.len(), 12 + 4);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 3]);

        let end = bytes.len() as u64;
        let mut cursor = Cursor::new(bytes);
        InfoRegistry::default()
            .read_block(&mut cursor, end, 4)
            .unwrap();
        assert_eq!(cursor.position(), end);
    }

    #[test]
    fn test_unicode_name_written_padded() {
        let block = TaggedBlock::unicode_name("abc");
        let mut out = Cursor::new(Vec::new());
        block.write(&mut out, 1).unwrap();
        let bytes = out.into_inner();
        // 4 count + 6 text = 10, padded to 12
        assert_eq!(&bytes[8..12], &[0, 0, 0, 12]);
        assert_eq!(bytes.len(), 24);
        assert_eq!(read_one(bytes).info, LayerInfo::UnicodeName("abc".into()));
    }

    #[test]
    fn test_custom_parser() {
        fn parse_marker(_: &[u8]) -> Result<LayerInfo, PsdError> {
            Ok(LayerInfo::UnicodeName("marker".into()))
        }
        let mut registry = InfoRegistry::empty();
        registry.register(*b"mark", parse_marker);
        assert_eq!(
            registry.parse(*b"mark", vec![]),
            LayerInfo::UnicodeName("marker".into())
        );
        assert_eq!(
            registry.parse(*b"luni", vec![0, 0, 0, 0]),
            LayerInfo::Raw(vec![0, 0, 0, 0])
        );
    }
}
