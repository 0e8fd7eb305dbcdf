//! Image resource section
//!
//! Records of `signature id name length payload`, both name and payload
//! padded to even lengths. Resolution info is decoded; everything else is
//! carried as raw bytes. Record order is preserved.

use std::io::{Cursor, Read, Seek, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use indexmap::IndexMap;

use super::stream::{ensure_within, finish_section, write_length_block, PsdRead, PsdWrite};
use super::types::{ImageResourceId, ResolutionInfo, BIM_SIGNATURE};
use crate::encoding::TextEncoding;
use crate::error::PsdError;

/// Signatures other writers use for resource records
const RESOURCE_SIGNATURES: [&[u8; 4]; 4] = [BIM_SIGNATURE, b"MeSa", b"PHUT", b"AgHg"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceData {
    Resolution(ResolutionInfo),
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResource {
    pub signature: [u8; 4],
    pub id: u16,
    pub name: String,
    pub data: ResourceData,
}

impl ImageResource {
    pub fn new(id: u16, data: ResourceData) -> Self {
        Self {
            signature: *BIM_SIGNATURE,
            id,
            name: String::new(),
            data,
        }
    }

    fn payload(&self) -> Result<Vec<u8>, PsdError> {
        Ok(match &self.data {
            ResourceData::Resolution(info) => {
                let mut buf = Vec::with_capacity(ResolutionInfo::SIZE);
                info.write(&mut buf)?;
                buf
            }
            ResourceData::Raw(data) => data.clone(),
        })
    }
}

/// Image resources keyed by ID, in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageResources(pub IndexMap<u16, ImageResource>);

impl ImageResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u16) -> Option<&ImageResource> {
        self.0.get(&id)
    }

    pub fn insert(&mut self, resource: ImageResource) {
        self.0.insert(resource.id, resource);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageResource> {
        self.0.values()
    }

    pub fn resolution(&self) -> Option<&ResolutionInfo> {
        match self.get(ImageResourceId::ResolutionInfo as u16)?.data {
            ResourceData::Resolution(ref info) => Some(info),
            ResourceData::Raw(_) => None,
        }
    }

    pub fn set_resolution(&mut self, dpi: u32) {
        self.insert(ImageResource::new(
            ImageResourceId::ResolutionInfo as u16,
            ResourceData::Resolution(ResolutionInfo::new(dpi)),
        ));
    }

    /// Read the length-prefixed section
    pub fn read<R: Read + Seek>(
        r: &mut R,
        encoding: &dyn TextEncoding,
        clamp: bool,
    ) -> Result<Self, PsdError> {
        let length = r.read_u32::<BigEndian>()? as u64;
        let end = r.stream_position()? + length;
        let mut resources = Self::new();

        while r.stream_position()? + 12 <= end {
            let signature = r.read_key()?;
            if !RESOURCE_SIGNATURES.contains(&&signature) {
                tracing::warn!(
                    "Unknown image resource signature {:?}, skipping rest of section",
                    String::from_utf8_lossy(&signature)
                );
                r.seek(std::io::SeekFrom::Current(-4))?;
                break;
            }
            let id = r.read_u16::<BigEndian>()?;
            let name = r.read_pascal_string(2, encoding)?;
            let size = r.read_u32::<BigEndian>()? as u64;
            ensure_within(r, size, end, "image resource")?;

            let start = r.stream_position()?;
            let payload = r.read_bytes(size as usize)?;
            if r.stream_position()? < end {
                r.read_padding(start, 2)?;
            }

            let data = if id == ImageResourceId::ResolutionInfo as u16
                && payload.len() == ResolutionInfo::SIZE
            {
                ResourceData::Resolution(ResolutionInfo::read(&mut Cursor::new(&payload))?)
            } else {
                ResourceData::Raw(payload)
            };

            tracing::debug!("Image resource 0x{:04X} ({} bytes)", id, size);
            resources.insert(ImageResource {
                signature,
                id,
                name,
                data,
            });
        }

        finish_section(r, end, clamp, "image resources")?;
        Ok(resources)
    }

    pub fn write<W: Write + Seek>(
        &self,
        w: &mut W,
        encoding: &dyn TextEncoding,
    ) -> Result<(), PsdError> {
        write_length_block(w, |w| -> Result<(), PsdError> {
            for resource in self.iter() {
                w.write_key(&resource.signature)?;
                w.write_u16::<BigEndian>(resource.id)?;
                w.write_pascal_string(&resource.name, 2, 255, encoding)?;

                let payload = resource.payload()?;
                w.write_u32::<BigEndian>(payload.len() as u32)?;
                w.write_all(&payload)?;
                if payload.len() % 2 != 0 {
                    w.write_u8(0)?;
                }
            }
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::encoding::LegacyEncoding;

    fn written(resources: &ImageResources) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        resources.write(&mut buf, &LegacyEncoding::Latin1).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_roundtrip_keeps_order() {
        let mut resources = ImageResources::new();
        resources.insert(ImageResource::new(0x0421, ResourceData::Raw(vec![1, 2, 3])));
        resources.set_resolution(300);
        let mut named = ImageResource::new(0x0FA0, ResourceData::Raw(vec![9; 4]));
        named.name = "plug".into();
        resources.insert(named);

        let bytes = written(&resources);
        let read = ImageResources::read(
            &mut Cursor::new(bytes.clone()),
            &LegacyEncoding::Latin1,
            false,
        )
        .unwrap();
        assert_eq!(read, resources);
        assert_eq!(read.resolution().unwrap().dpi(), 300);
        let ids: Vec<u16> = read.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0x0421, 0x03ED, 0x0FA0]);
        assert_eq!(written(&read), bytes);
    }

    #[test]
    fn test_odd_payload_padded() {
        let mut resources = ImageResources::new();
        resources.insert(ImageResource::new(0x0400, ResourceData::Raw(vec![7])));
        let bytes = written(&resources);
        // length(4) + sig(4) + id(2) + name(2) + size(4) + data(1) + pad(1)
        assert_eq!(bytes.len(), 18);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 14]);
    }

    #[test]
    fn test_trailing_bytes_clamped_or_rejected() {
        let mut resources = ImageResources::new();
        resources.insert(ImageResource::new(0x0400, ResourceData::Raw(vec![1, 2])));
        let mut bytes = written(&resources);
        let len = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        bytes[0..4].copy_from_slice(&(len + 3).to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 0]);

        let mut cursor = Cursor::new(bytes.clone());
        let read = ImageResources::read(&mut cursor, &LegacyEncoding::Latin1, true).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(cursor.position(), bytes.len() as u64);

        let err = ImageResources::read(&mut Cursor::new(bytes), &LegacyEncoding::Latin1, false)
            .unwrap_err();
        assert!(matches!(err, PsdError::BufferBounds(_)));
    }

    #[test]
    fn test_unknown_signature_stops() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&16u32.to_be_bytes());
        bytes.extend_from_slice(b"XXXX");
        bytes.extend_from_slice(&[0u8; 12]);
        let mut cursor = Cursor::new(bytes);
        let read = ImageResources::read(&mut cursor, &LegacyEncoding::Latin1, true).unwrap();
        assert!(read.is_empty());
        assert_eq!(cursor.position(), 20);
    }

    #[test]
    fn test_size_past_section() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&16u32.to_be_bytes());
        bytes.extend_from_slice(b"8BIM");
        bytes.extend_from_slice(&0x0400u16.to_be_bytes());
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(&100u32.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 4]);
        let err = ImageResources::read(&mut Cursor::new(bytes), &LegacyEncoding::Latin1, true)
            .unwrap_err();
        assert!(matches!(err, PsdError::BufferBounds(_)));
    }
}
