//! Composite (merged) image data
//!
//! One compression tag for all channels. With RLE, the row tables of every
//! channel come first, followed by the compressed rows of every channel.

use std::io::{Read, Seek, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::channel::Channel;
use super::stream::PsdRead;
use super::types::{Compression, PsdHeader};
use crate::error::PsdError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeImage {
    pub compression: Compression,
    pub channels: Vec<Channel>,
}

impl Default for CompositeImage {
    fn default() -> Self {
        Self {
            compression: Compression::Raw,
            channels: Vec::new(),
        }
    }
}

/// Channel IDs for the composite: color channels in order, the extra one as alpha
pub fn composite_channel_ids(header: &PsdHeader) -> Vec<i16> {
    let count = header.channels as i16;
    let has_alpha = header.channels == header.color_mode.min_channels() + 1;
    (0..count)
        .map(|i| {
            if has_alpha && i == count - 1 {
                Channel::ALPHA
            } else {
                i
            }
        })
        .collect()
}

impl CompositeImage {
    /// Composite holding decoded samples, one buffer per header channel
    pub fn from_planes(
        header: &PsdHeader,
        compression: Compression,
        planes: Vec<Vec<u8>>,
    ) -> Self {
        let channels = composite_channel_ids(header)
            .into_iter()
            .zip(planes)
            .map(|(id, data)| Channel::with_data(id, compression, data))
            .collect();
        Self {
            compression,
            channels,
        }
    }

    pub fn channel(&self, id: i16) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn read<R: Read + Seek>(r: &mut R, header: &PsdHeader) -> Result<Self, PsdError> {
        let tag = r.read_u16::<BigEndian>()?;
        let compression = match Compression::from_u16(tag)? {
            Compression::Zip | Compression::ZipPrediction => {
                return Err(PsdError::UnsupportedCompression(tag));
            }
            kind => kind,
        };

        let rows = header.height as usize;
        let row_bytes = header.row_bytes();
        let mut channels: Vec<Channel> = composite_channel_ids(header)
            .into_iter()
            .map(|id| Channel::new(id, compression))
            .collect();

        match compression {
            Compression::Rle => {
                for channel in &mut channels {
                    let mut table = Vec::with_capacity(rows);
                    for _ in 0..rows {
                        table.push(r.read_u16::<BigEndian>()?);
                    }
                    channel.row_lengths = Some(table);
                }
                for channel in &mut channels {
                    let total: usize = channel
                        .row_lengths
                        .iter()
                        .flatten()
                        .map(|&n| n as usize)
                        .sum();
                    channel.encoded = r.read_bytes(total)?;
                }
            }
            _ => {
                for channel in &mut channels {
                    channel.encoded = r.read_bytes(rows * row_bytes)?;
                }
            }
        }

        tracing::debug!(
            "Composite image: {:?}, {} channels",
            compression,
            channels.len()
        );
        Ok(Self {
            compression,
            channels,
        })
    }

    /// Apply the shared compression and encode every channel
    pub(crate) fn prepare_for_save(&mut self, header: &PsdHeader) -> Result<(), PsdError> {
        if matches!(
            self.compression,
            Compression::Zip | Compression::ZipPrediction
        ) {
            return Err(PsdError::UnsupportedCompression(self.compression as u16));
        }
        if self.channels.len() != header.channels as usize {
            return Err(PsdError::InvalidDimensions(format!(
                "composite has {} channels, header declares {}",
                self.channels.len(),
                header.channels
            )));
        }
        for channel in &mut self.channels {
            channel.compression = self.compression;
            channel.encode(header.width, header.height, header.depth)?;
        }
        Ok(())
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), PsdError> {
        w.write_u16::<BigEndian>(self.compression as u16)?;
        if self.compression == Compression::Rle {
            for channel in &self.channels {
                for &count in channel.row_lengths.iter().flatten() {
                    w.write_u16::<BigEndian>(count)?;
                }
            }
        }
        for channel in &self.channels {
            w.write_all(&channel.encoded)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::psd::types::ColorMode;
    use std::io::Cursor;

    #[test]
    fn test_channel_ids() {
        let rgb = PsdHeader::new(1, 1, ColorMode::Rgb);
        assert_eq!(composite_channel_ids(&rgb), vec![0, 1, 2]);
        assert_eq!(
            composite_channel_ids(&PsdHeader::new(1, 1, ColorMode::Rgb).with_alpha()),
            vec![0, 1, 2, -1]
        );
        let spot = PsdHeader {
            channels: 5,
            ..rgb
        };
        assert_eq!(composite_channel_ids(&spot), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_rle_roundtrip() {
        let header = PsdHeader::new(3, 2, ColorMode::Rgb).with_alpha();
        let planes: Vec<Vec<u8>> = (0..4).map(|c| vec![c as u8 * 10; 6]).collect();
        let mut composite = CompositeImage::from_planes(&header, Compression::Rle, planes.clone());
        composite.prepare_for_save(&header).unwrap();

        let mut buf = Vec::new();
        composite.write(&mut buf).unwrap();
        // tag + 4 channels * 2 rows * u16 + 4 * 2 rows * 2 bytes
        assert_eq!(buf.len(), 2 + 16 + 16);

        let mut read = CompositeImage::read(&mut Cursor::new(buf), &header).unwrap();
        assert_eq!(read.compression, Compression::Rle);
        for (channel, plane) in read.channels.iter_mut().zip(&planes) {
            channel.decode(3, 2, 8).unwrap();
            assert_eq!(&channel.data, plane);
        }
        assert_eq!(read.channels[3].id, Channel::ALPHA);
    }

    #[test]
    fn test_zip_rejected() {
        let header = PsdHeader::new(1, 1, ColorMode::Grayscale);
        let err = CompositeImage::read(&mut Cursor::new(vec![0, 2, 0]), &header).unwrap_err();
        assert!(matches!(err, PsdError::UnsupportedCompression(2)));

        let mut composite = CompositeImage::from_planes(&header, Compression::Zip, vec![vec![0]]);
        let err = composite.prepare_for_save(&header).unwrap_err();
        assert!(matches!(err, PsdError::UnsupportedCompression(2)));
    }

    #[test]
    fn test_channel_count_mismatch() {
        let header = PsdHeader::new(1, 1, ColorMode::Rgb);
        let mut composite = CompositeImage::from_planes(&header, Compression::Raw, vec![vec![0]]);
        let err = composite.prepare_for_save(&header).unwrap_err();
        assert!(matches!(err, PsdError::InvalidDimensions(_)));
    }
}
