//! Image channels and their per-channel compression

use std::io::{Read, Seek, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::compression::{
    apply_prediction, decode_rle_rows, encode_rle_rows, undo_prediction, zip_decode, zip_encode,
};
use super::stream::PsdRead;
use super::types::{bytes_per_row, Compression};
use crate::error::PsdError;

/// One channel of a layer or of the composite image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// 0.. = color, -1 = transparency, -2 = layer mask, -3 = user mask
    pub id: i16,
    pub compression: Compression,
    /// Declared byte length; for layer channels this includes the
    /// compression tag and the RLE row table
    pub length: u32,
    /// RLE row byte counts, one per row
    pub row_lengths: Option<Vec<u16>>,
    /// Compressed bytes, without compression tag or row table
    pub encoded: Vec<u8>,
    /// Decoded samples, `rows * bytes_per_row` once decoded
    pub data: Vec<u8>,
}

impl Channel {
    pub const ALPHA: i16 = -1;
    pub const LAYER_MASK: i16 = -2;
    pub const USER_MASK: i16 = -3;

    pub fn new(id: i16, compression: Compression) -> Self {
        Self {
            id,
            compression,
            length: 0,
            row_lengths: None,
            encoded: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Channel holding already decoded samples
    pub fn with_data(id: i16, compression: Compression, data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::new(id, compression)
        }
    }

    pub fn is_mask(&self) -> bool {
        self.id == Self::LAYER_MASK || self.id == Self::USER_MASK
    }

    /// Decode `encoded` into `data`
    pub fn decode(&mut self, width: u32, height: u32, depth: u16) -> Result<(), PsdError> {
        let row_bytes = bytes_per_row(width, depth);
        let rows = height as usize;
        let expected = row_bytes * rows;

        self.data = match self.compression {
            Compression::Raw => {
                if self.encoded.len() != expected {
                    return Err(PsdError::BufferBounds(format!(
                        "raw channel {} has {} bytes, expected {}",
                        self.id,
                        self.encoded.len(),
                        expected
                    )));
                }
                self.encoded.clone()
            }
            Compression::Rle => {
                let table = self.row_lengths.as_deref().unwrap_or(&[]);
                if table.len() != rows {
                    return Err(PsdError::BufferBounds(format!(
                        "RLE channel {} has {} row lengths for {} rows",
                        self.id,
                        table.len(),
                        rows
                    )));
                }
                decode_rle_rows(&self.encoded, table, row_bytes)?
            }
            Compression::Zip => zip_decode(&self.encoded, expected)?,
            Compression::ZipPrediction => {
                let mut data = zip_decode(&self.encoded, expected)?;
                undo_prediction(&mut data, row_bytes, depth)?;
                data
            }
        };

        Ok(())
    }

    /// Encode `data` into `encoded` using the declared compression
    ///
    /// Recomputes the RLE row table and the declared length.
    pub fn encode(&mut self, width: u32, height: u32, depth: u16) -> Result<(), PsdError> {
        let row_bytes = bytes_per_row(width, depth);
        let expected = row_bytes * height as usize;
        if self.data.len() != expected {
            return Err(PsdError::BufferBounds(format!(
                "channel {} holds {} bytes, expected {} for {}x{}",
                self.id,
                self.data.len(),
                expected,
                width,
                height
            )));
        }

        let (row_lengths, encoded) = match self.compression {
            Compression::Raw => (None, self.data.clone()),
            Compression::Rle => {
                let (table, encoded) = encode_rle_rows(&self.data, row_bytes)?;
                (Some(table), encoded)
            }
            Compression::Zip => (None, zip_encode(&self.data)?),
            Compression::ZipPrediction => {
                let mut predicted = self.data.clone();
                apply_prediction(&mut predicted, row_bytes, depth)?;
                (None, zip_encode(&predicted)?)
            }
        };

        let table_bytes = row_lengths.as_ref().map_or(0, |t| t.len() * 2);
        self.length = u32::try_from(2 + table_bytes + encoded.len()).map_err(|_| {
            PsdError::BufferBounds(format!("channel {} exceeds 4 GiB encoded", self.id))
        })?;
        self.row_lengths = row_lengths;
        self.encoded = encoded;
        Ok(())
    }

    /// Read this channel's image data from the layer section
    ///
    /// `length` was declared in the layer record; `rows` is the height of the
    /// rectangle the channel covers.
    pub(crate) fn read_layer_data<R: Read + Seek>(
        &mut self,
        r: &mut R,
        rows: u32,
    ) -> Result<(), PsdError> {
        if self.length < 2 {
            // Nothing stored, not even the compression tag
            r.read_bytes(self.length as usize)?;
            self.compression = Compression::Raw;
            return Ok(());
        }

        self.compression = Compression::from_u16(r.read_u16::<BigEndian>()?)?;
        let mut remaining = self.length as usize - 2;

        if self.compression == Compression::Rle {
            let table_bytes = rows as usize * 2;
            if table_bytes > remaining {
                return Err(PsdError::BufferBounds(format!(
                    "channel {} row table needs {} bytes, only {} declared",
                    self.id, table_bytes, remaining
                )));
            }
            let mut table = Vec::with_capacity(rows as usize);
            for _ in 0..rows {
                table.push(r.read_u16::<BigEndian>()?);
            }
            self.row_lengths = Some(table);
            remaining -= table_bytes;
        }

        self.encoded = r.read_bytes(remaining)?;
        Ok(())
    }

    /// Write compression tag, row table and encoded bytes
    pub(crate) fn write_layer_data<W: Write>(&self, w: &mut W) -> Result<(), PsdError> {
        w.write_u16::<BigEndian>(self.compression as u16)?;
        if let Some(table) = &self.row_lengths {
            for &count in table {
                w.write_u16::<BigEndian>(count)?;
            }
        }
        w.write_all(&self.encoded)?;
        Ok(())
    }

    /// Whether anything was stored for this channel on disk
    pub(crate) fn is_stored(&self) -> bool {
        self.length >= 2 || !self.encoded.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_decode_raw() {
        let mut channel = Channel::new(0, Compression::Raw);
        channel.encoded = vec![10, 20, 30, 40];
        channel.decode(2, 2, 8).unwrap();
        assert_eq!(channel.data, vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_decode_raw_length_mismatch() {
        let mut channel = Channel::new(0, Compression::Raw);
        channel.encoded = vec![1, 2, 3];
        let err = channel.decode(2, 2, 8).unwrap_err();
        assert!(matches!(err, PsdError::BufferBounds(_)));
    }

    #[test]
    fn test_decode_rle_literal_row() {
        let mut channel = Channel::new(0, Compression::Rle);
        channel.row_lengths = Some(vec![2]);
        channel.encoded = vec![0x01, 0xAA, 0xBB];
        channel.decode(2, 1, 8).unwrap();
        assert_eq!(channel.data, vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_decode_rle_missing_table() {
        let mut channel = Channel::new(0, Compression::Rle);
        channel.encoded = vec![0x01, 0xAA, 0xBB];
        let err = channel.decode(2, 1, 8).unwrap_err();
        assert!(matches!(err, PsdError::BufferBounds(_)));
    }

    #[test]
    fn test_encode_decode_each_kind() {
        let data: Vec<u8> = (0..48).map(|i| (i / 5) as u8).collect();
        for compression in [
            Compression::Raw,
            Compression::Rle,
            Compression::Zip,
            Compression::ZipPrediction,
        ] {
            let mut channel = Channel::with_data(1, compression, data.clone());
            channel.encode(8, 6, 8).unwrap();
            channel.data.clear();
            channel.decode(8, 6, 8).unwrap();
            assert_eq!(channel.data, data, "{:?}", compression);
        }
    }

    #[test]
    fn test_encode_sets_length() {
        let mut channel = Channel::with_data(0, Compression::Rle, vec![0u8; 12]);
        channel.encode(4, 3, 8).unwrap();
        let table = channel.row_lengths.clone().unwrap();
        assert_eq!(table, vec![2, 2, 2]);
        assert_eq!(channel.length as usize, 2 + 6 + channel.encoded.len());
    }

    #[test]
    fn test_encode_wrong_size() {
        let mut channel = Channel::with_data(0, Compression::Raw, vec![0u8; 5]);
        let err = channel.encode(2, 2, 8).unwrap_err();
        assert!(matches!(err, PsdError::BufferBounds(_)));
    }

    #[test]
    fn test_layer_data_roundtrip() {
        let mut channel = Channel::with_data(-1, Compression::Rle, vec![9u8; 6]);
        channel.encode(3, 2, 8).unwrap();

        let mut buf = Vec::new();
        channel.write_layer_data(&mut buf).unwrap();
        assert_eq!(buf.len(), channel.length as usize);

        let mut read = Channel::new(-1, Compression::Raw);
        read.length = channel.length;
        read.read_layer_data(&mut Cursor::new(buf), 2).unwrap();
        assert_eq!(read.compression, Compression::Rle);
        assert_eq!(read.row_lengths, channel.row_lengths);
        assert_eq!(read.encoded, channel.encoded);
    }

    #[test]
    fn test_layer_data_table_exceeds_length() {
        let mut channel = Channel::new(0, Compression::Raw);
        channel.length = 4;
        let bytes = vec![0, 1, 0, 2, 0, 2];
        let err = channel
            .read_layer_data(&mut Cursor::new(bytes), 2)
            .unwrap_err();
        assert!(matches!(err, PsdError::BufferBounds(_)));
    }
}
