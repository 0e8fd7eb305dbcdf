//! Big-endian primitives shared by every PSD section
//!
//! Scalars go through `byteorder` directly (`read_u16::<BigEndian>()` and
//! friends). This module adds the PSD-specific forms on top: padding,
//! Pascal and UTF-16 strings, rectangles, 4-byte keys and the length
//! back-patching used by every bounded block.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::{Deref, DerefMut};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::types::Rect;
use crate::encoding::TextEncoding;
use crate::error::PsdError;

/// Number of filler bytes needed after `consumed` bytes to reach a multiple
pub fn padding_len(consumed: u64, multiple: u64) -> u64 {
    if multiple == 0 {
        return 0;
    }
    (multiple - consumed % multiple) % multiple
}

/// Reading side of the primitive codec
pub trait PsdRead: Read + Seek + Sized {
    /// Read a 4-byte signature or key
    fn read_key(&mut self) -> io::Result<[u8; 4]> {
        let mut key = [0u8; 4];
        self.read_exact(&mut key)?;
        Ok(key)
    }

    /// Read exactly `len` bytes without trusting `len` for the allocation
    fn read_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.by_ref().take(len as u64).read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes, got {}", len, buf.len()),
            ));
        }
        Ok(buf)
    }

    /// Skip filler so that the bytes consumed since `start` are a multiple of `multiple`
    fn read_padding(&mut self, start: u64, multiple: u64) -> io::Result<u64> {
        let consumed = self.stream_position()?.saturating_sub(start);
        let count = padding_len(consumed, multiple);
        if count > 0 {
            self.seek(SeekFrom::Current(count as i64))?;
        }
        Ok(count)
    }

    /// Length byte, text in the legacy encoding, padding from the string start
    fn read_pascal_string(
        &mut self,
        pad_multiple: u64,
        encoding: &dyn TextEncoding,
    ) -> io::Result<String> {
        let start = self.stream_position()?;
        let len = self.read_u8()? as usize;
        let bytes = self.read_bytes(len)?;
        self.read_padding(start, pad_multiple)?;
        Ok(encoding.decode(&bytes))
    }

    /// u32 code-unit count followed by UTF-16BE code units
    fn read_unicode_string(&mut self) -> io::Result<String> {
        let count = self.read_u32::<BigEndian>()? as usize;
        let bytes = self.read_bytes(count * 2)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    /// Top, left, bottom, right
    fn read_rect(&mut self) -> io::Result<Rect> {
        let top = self.read_i32::<BigEndian>()?;
        let left = self.read_i32::<BigEndian>()?;
        let bottom = self.read_i32::<BigEndian>()?;
        let right = self.read_i32::<BigEndian>()?;
        Ok(Rect::from_edges(top, left, bottom, right))
    }
}

impl<T: Read + Seek> PsdRead for T {}

/// Writing side of the primitive codec
pub trait PsdWrite: Write + Seek + Sized {
    fn write_key(&mut self, key: &[u8; 4]) -> io::Result<()> {
        self.write_all(key)
    }

    /// Emit zero bytes so that the bytes written since `start` are a multiple of `multiple`
    fn write_padding(&mut self, start: u64, multiple: u64) -> io::Result<u64> {
        let written = self.stream_position()?.saturating_sub(start);
        let count = padding_len(written, multiple);
        for _ in 0..count {
            self.write_u8(0)?;
        }
        Ok(count)
    }

    /// Pascal string clamped to `max_len` encoded bytes, padded from the string start
    fn write_pascal_string(
        &mut self,
        text: &str,
        pad_multiple: u64,
        max_len: usize,
        encoding: &dyn TextEncoding,
    ) -> io::Result<()> {
        let start = self.stream_position()?;
        let bytes = encoding.encode(text);
        let len = bytes.len().min(max_len).min(255);

        self.write_u8(len as u8)?;
        self.write_all(&bytes[..len])?;
        self.write_padding(start, pad_multiple)?;
        Ok(())
    }

    fn write_unicode_string(&mut self, text: &str) -> io::Result<()> {
        let units: Vec<u16> = text.encode_utf16().collect();
        self.write_u32::<BigEndian>(units.len() as u32)?;
        for unit in units {
            self.write_u16::<BigEndian>(unit)?;
        }
        Ok(())
    }

    fn write_rect(&mut self, rect: &Rect) -> io::Result<()> {
        let (top, left, bottom, right) = rect.edges();
        self.write_i32::<BigEndian>(top)?;
        self.write_i32::<BigEndian>(left)?;
        self.write_i32::<BigEndian>(bottom)?;
        self.write_i32::<BigEndian>(right)?;
        Ok(())
    }
}

impl<T: Write + Seek> PsdWrite for T {}

/// Scoped u32 length prefix
///
/// `begin` reserves four bytes; content is written through the guard;
/// `finish` seeks back and stores the content length. Dropping the guard
/// without `finish` (an early `?` return) still patches the length.
pub struct LengthBlock<'a, W: Write + Seek> {
    writer: &'a mut W,
    length_pos: u64,
    finished: bool,
}

impl<'a, W: Write + Seek> LengthBlock<'a, W> {
    pub fn begin(writer: &'a mut W) -> io::Result<Self> {
        let length_pos = writer.stream_position()?;
        writer.write_u32::<BigEndian>(0)?;
        Ok(Self {
            writer,
            length_pos,
            finished: false,
        })
    }

    /// Stream position of the first content byte
    pub fn content_start(&self) -> u64 {
        self.length_pos + 4
    }

    /// Patch the length and return it
    pub fn finish(mut self) -> io::Result<u64> {
        self.finished = true;
        self.patch()
    }

    fn patch(&mut self) -> io::Result<u64> {
        let end = self.writer.stream_position()?;
        let len = end.checked_sub(self.content_start()).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "block end before block start")
        })?;
        let len32 = u32::try_from(len).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "block exceeds 4 GiB")
        })?;
        self.writer.seek(SeekFrom::Start(self.length_pos))?;
        self.writer.write_u32::<BigEndian>(len32)?;
        self.writer.seek(SeekFrom::Start(end))?;
        Ok(len)
    }
}

impl<W: Write + Seek> Deref for LengthBlock<'_, W> {
    type Target = W;

    fn deref(&self) -> &W {
        self.writer
    }
}

impl<W: Write + Seek> DerefMut for LengthBlock<'_, W> {
    fn deref_mut(&mut self) -> &mut W {
        self.writer
    }
}

impl<W: Write + Seek> Drop for LengthBlock<'_, W> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.patch() {
                tracing::warn!("Failed to patch block length on early exit: {}", e);
            }
        }
    }
}

/// Write a length-prefixed block whose content comes from `body`
pub fn write_length_block<W, F, E>(writer: &mut W, body: F) -> Result<u64, E>
where
    W: Write + Seek,
    F: FnOnce(&mut W) -> Result<(), E>,
    E: From<io::Error>,
{
    let mut block = LengthBlock::begin(writer)?;
    body(&mut *block)?;
    Ok(block.finish()?)
}

/// Convert an in-memory size to the integer type of its on-disk field
pub fn length_field<T: TryFrom<usize>>(len: usize, what: &str) -> Result<T, PsdError> {
    T::try_from(len).map_err(|_| {
        PsdError::UnsupportedForSave(format!("{} of {} does not fit its field", what, len))
    })
}

/// Bring the cursor to a bounded section's declared end
///
/// Overrunning the end is always an error. Stopping short is repaired by a
/// forward seek when `clamp` is set, and an error otherwise.
pub fn finish_section<R: Read + Seek>(
    reader: &mut R,
    end: u64,
    clamp: bool,
    section: &str,
) -> Result<(), PsdError> {
    let pos = reader.stream_position()?;
    if pos > end {
        return Err(PsdError::BufferBounds(format!(
            "{} overran its declared end by {} bytes",
            section,
            pos - end
        )));
    }
    if pos < end {
        if !clamp {
            return Err(PsdError::BufferBounds(format!(
                "{} left {} unparsed bytes",
                section,
                end - pos
            )));
        }
        tracing::warn!(
            "{}: skipping {} unparsed bytes to the declared end",
            section,
            end - pos
        );
        reader.seek(SeekFrom::Start(end))?;
    }
    Ok(())
}

/// Check that `len` bytes starting at the cursor stay inside `end`
pub fn ensure_within<R: Seek>(
    reader: &mut R,
    len: u64,
    end: u64,
    what: &str,
) -> Result<(), PsdError> {
    let pos = reader.stream_position()?;
    if pos.saturating_add(len) > end {
        return Err(PsdError::BufferBounds(format!(
            "{} of {} bytes at offset {} runs past {}",
            what, len, pos, end
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::encoding::LegacyEncoding;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn test_padding_len() {
        assert_eq!(padding_len(0, 4), 0);
        assert_eq!(padding_len(1, 4), 3);
        assert_eq!(padding_len(5, 4), 3);
        assert_eq!(padding_len(8, 4), 0);
        assert_eq!(padding_len(3, 2), 1);
    }

    #[test]
    fn test_write_pascal_string() {
        let mut buf = Cursor::new(Vec::new());
        buf.write_pascal_string("Test", 4, 255, &LegacyEncoding::Latin1)
            .unwrap();
        let bytes = buf.into_inner();
        // Length(1) + "Test"(4) = 5, padded to 8
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes[0], 4);
        assert_eq!(&bytes[1..5], b"Test");
    }

    #[test]
    fn test_write_pascal_string_empty() {
        let mut buf = Cursor::new(Vec::new());
        buf.write_pascal_string("", 2, 255, &LegacyEncoding::Latin1)
            .unwrap();
        assert_eq!(buf.into_inner(), vec![0, 0]);
    }

    #[test]
    fn test_pascal_string_truncated() {
        let mut buf = Cursor::new(Vec::new());
        let long = "x".repeat(40);
        buf.write_pascal_string(&long, 4, 31, &LegacyEncoding::Latin1)
            .unwrap();
        let bytes = buf.into_inner();
        assert_eq!(bytes[0], 31);
        assert_eq!(bytes.len(), 32);
    }

    #[test]
    fn test_pascal_string_roundtrip() {
        let mut buf = Cursor::new(Vec::new());
        buf.write_pascal_string("Ebene 1", 4, 255, &LegacyEncoding::Latin1)
            .unwrap();
        buf.write_u8(0x7F).unwrap();

        buf.set_position(0);
        let text = buf.read_pascal_string(4, &LegacyEncoding::Latin1).unwrap();
        assert_eq!(text, "Ebene 1");
        assert_eq!(buf.read_u8().unwrap(), 0x7F);
    }

    #[test]
    fn test_unicode_string_roundtrip() {
        let mut buf = Cursor::new(Vec::new());
        buf.write_unicode_string("Layer \u{00e9}\u{4e2d}").unwrap();
        let bytes = buf.get_ref().clone();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 8]);
        assert_eq!(bytes.len(), 4 + 16);

        buf.set_position(0);
        assert_eq!(buf.read_unicode_string().unwrap(), "Layer \u{00e9}\u{4e2d}");
    }

    #[test]
    fn test_unicode_string_no_terminator() {
        let mut buf = Cursor::new(vec![0, 0, 0, 2, 0, b'h', 0, b'i', 0xAB]);
        assert_eq!(buf.read_unicode_string().unwrap(), "hi");
        assert_eq!(buf.position(), 8);
    }

    #[test]
    fn test_read_rect_order() {
        // top=1, left=2, bottom=11, right=22
        let mut data = Vec::new();
        for v in [1i32, 2, 11, 22] {
            data.extend_from_slice(&v.to_be_bytes());
        }
        let rect = Cursor::new(data).read_rect().unwrap();
        assert_eq!(rect, Rect::new(2, 1, 20, 10));
    }

    #[test]
    fn test_length_block_patch() {
        let mut buf = Cursor::new(Vec::new());
        let len = write_length_block::<_, _, io::Error>(&mut buf, |w| {
            w.write_all(&[1, 2, 3])?;
            Ok(())
        })
        .unwrap();
        assert_eq!(len, 3);
        assert_eq!(buf.into_inner(), vec![0, 0, 0, 3, 1, 2, 3]);
    }

    #[test]
    fn test_length_block_nested() {
        let mut buf = Cursor::new(Vec::new());
        let mut outer = LengthBlock::begin(&mut buf).unwrap();
        outer.write_u8(9).unwrap();
        {
            let mut inner = LengthBlock::begin(&mut *outer).unwrap();
            inner.write_all(&[7, 7]).unwrap();
            inner.finish().unwrap();
        }
        outer.finish().unwrap();
        assert_eq!(
            buf.into_inner(),
            vec![0, 0, 0, 7, 9, 0, 0, 0, 2, 7, 7]
        );
    }

    #[test]
    fn test_length_block_patched_on_error() {
        let mut buf = Cursor::new(Vec::new());
        let result = write_length_block(&mut buf, |w| -> Result<(), PsdError> {
            w.write_all(&[5, 5])?;
            Err(PsdError::InvalidLayerState("stop".into()))
        });
        assert!(result.is_err());
        assert_eq!(buf.into_inner(), vec![0, 0, 0, 2, 5, 5]);
    }

    #[test]
    fn test_finish_section_clamps() {
        let mut cursor = Cursor::new(vec![0u8; 10]);
        cursor.set_position(4);
        finish_section(&mut cursor, 8, true, "test").unwrap();
        assert_eq!(cursor.position(), 8);
    }

    #[test]
    fn test_finish_section_strict() {
        let mut cursor = Cursor::new(vec![0u8; 10]);
        cursor.set_position(4);
        let err = finish_section(&mut cursor, 8, false, "test").unwrap_err();
        assert!(matches!(err, PsdError::BufferBounds(_)));
    }

    #[test]
    fn test_finish_section_overrun() {
        let mut cursor = Cursor::new(vec![0u8; 10]);
        cursor.set_position(9);
        let err = finish_section(&mut cursor, 8, true, "test").unwrap_err();
        assert!(matches!(err, PsdError::BufferBounds(_)));
    }

    #[test]
    fn test_read_bytes_short() {
        let mut cursor = Cursor::new(vec![1u8, 2]);
        let err = cursor.read_bytes(3).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_length_field_range() {
        assert_eq!(length_field::<u16>(65535, "count").unwrap(), 65535u16);
        let err = length_field::<u16>(65536, "count").unwrap_err();
        assert!(matches!(err, PsdError::UnsupportedForSave(_)));
        assert_eq!(length_field::<u32>(12, "data").unwrap(), 12u32);
    }

    proptest! {
        #[test]
        fn padding_matches_formula(start in 0u64..64, extra in 0u64..64, multiple in 1u64..9) {
            let mut writer = Cursor::new(vec![0u8; (start + extra) as usize]);
            writer.set_position(start + extra);
            let written = writer.write_padding(start, multiple).unwrap();
            prop_assert_eq!(written, (multiple - extra % multiple) % multiple);
            prop_assert!(written < multiple);
            prop_assert_eq!((writer.position() - start) % multiple, 0);

            let mut reader = Cursor::new(writer.into_inner());
            reader.set_position(start + extra);
            let skipped = reader.read_padding(start, multiple).unwrap();
            prop_assert_eq!(skipped, written);
        }

        #[test]
        fn rect_edges_roundtrip(top in -5000i32..5000, left in -5000i32..5000, h in 0i32..30000, w in 0i32..30000) {
            let bottom = top + h;
            let right = left + w;
            let mut buf = Cursor::new(Vec::new());
            for v in [top, left, bottom, right] {
                buf.write_i32::<BigEndian>(v).unwrap();
            }
            let original = buf.get_ref().clone();
            buf.set_position(0);
            let rect = buf.read_rect().unwrap();
            prop_assert_eq!(rect.width, w);
            prop_assert_eq!(rect.height, h);

            let mut out = Cursor::new(Vec::new());
            out.write_rect(&rect).unwrap();
            prop_assert_eq!(out.into_inner(), original);
        }
    }
}
