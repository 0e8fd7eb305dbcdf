//! Channel pixel compression: PackBits RLE, zlib and zlib with prediction
//!
//! PackBits control bytes: 0..=127 copies the next n+1 bytes, -127..=-1
//! repeats the next byte 1-n times, -128 is skipped.

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression as ZlibLevel;

use crate::error::PsdError;

/// Pixel codec error
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Unexpected end of data at offset {0}")]
    UnexpectedEof(usize),

    #[error("Decompression output size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("RLE row {row} ends at offset {end}, past the {len} encoded bytes")]
    RowOutOfRange { row: usize, end: usize, len: usize },

    #[error("Encoded row of {0} bytes does not fit the 16-bit row table")]
    RowTooLong(usize),

    #[error("Prediction is not defined for {0}-bit samples")]
    UnsupportedPrediction(u16),
}

impl From<CompressionError> for PsdError {
    fn from(err: CompressionError) -> Self {
        match err {
            CompressionError::Io(e) => PsdError::Io(e),
            CompressionError::UnsupportedPrediction(depth) => PsdError::UnsupportedBitDepth(depth),
            other => PsdError::BufferBounds(other.to_string()),
        }
    }
}

/// Longest literal or run a single PackBits packet can carry
const MAX_PACKET: usize = 128;

/// PackBits-encode one buffer
///
/// Runs of three or more equal bytes become repeat packets, everything else
/// goes into literal packets.
pub fn packbits_encode(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len() + input.len() / MAX_PACKET + 1);
    let mut literal_start = 0;
    let mut i = 0;

    while i < input.len() {
        let run = run_length(&input[i..]);
        if run >= 3 {
            push_literal(&mut output, &input[literal_start..i]);
            output.push((1 - run as i16) as u8);
            output.push(input[i]);
            i += run;
            literal_start = i;
        } else {
            i += 1;
            if i - literal_start == MAX_PACKET {
                push_literal(&mut output, &input[literal_start..i]);
                literal_start = i;
            }
        }
    }
    push_literal(&mut output, &input[literal_start..]);

    output
}

/// Equal bytes at the start of a non-empty slice, capped at one packet
fn run_length(data: &[u8]) -> usize {
    let first = data[0];
    data.iter()
        .take(MAX_PACKET)
        .take_while(|&&b| b == first)
        .count()
}

fn push_literal(output: &mut Vec<u8>, literal: &[u8]) {
    if let Some(last) = literal.len().checked_sub(1) {
        output.push(last as u8);
        output.extend_from_slice(literal);
    }
}

/// Decode PackBits data into `output`, stopping once it is full
///
/// A run that would overrun `output` is truncated at its end. Returns the
/// number of bytes written, which is short if `input` ran out first.
pub fn packbits_decode_into(input: &[u8], output: &mut [u8]) -> Result<usize, CompressionError> {
    let mut pos = 0;
    let mut written = 0;

    while written < output.len() && pos < input.len() {
        let n = input[pos] as i8;
        pos += 1;

        if n >= 0 {
            // Literal: copy next (n + 1) bytes
            let count = n as usize + 1;
            let literal = input
                .get(pos..pos + count)
                .ok_or(CompressionError::UnexpectedEof(pos))?;
            let take = count.min(output.len() - written);
            output[written..written + take].copy_from_slice(&literal[..take]);
            written += take;
            pos += count;
        } else if n > -128 {
            // Run: repeat next byte (1 - n) times
            let count = (1 - n as i16) as usize;
            let byte = *input.get(pos).ok_or(CompressionError::UnexpectedEof(pos))?;
            pos += 1;
            let take = count.min(output.len() - written);
            output[written..written + take].fill(byte);
            written += take;
        }
        // n == -128 is a no-op
    }

    Ok(written)
}

/// Decode exactly `expected_len` bytes of PackBits data
pub fn packbits_decode(input: &[u8], expected_len: usize) -> Result<Vec<u8>, CompressionError> {
    let mut output = vec![0u8; expected_len];
    let written = packbits_decode_into(input, &mut output)?;

    if written != expected_len {
        return Err(CompressionError::SizeMismatch {
            expected: expected_len,
            actual: written,
        });
    }

    Ok(output)
}

/// Encode one row, checking the result fits a row-table entry
pub fn encode_scanline(row: &[u8]) -> Result<(u16, Vec<u8>), CompressionError> {
    let compressed = packbits_encode(row);
    let count =
        u16::try_from(compressed.len()).map_err(|_| CompressionError::RowTooLong(compressed.len()))?;
    Ok((count, compressed))
}

/// Encode a channel row by row into a row-length table and the packed rows
pub fn encode_rle_rows(
    data: &[u8],
    bytes_per_row: usize,
) -> Result<(Vec<u16>, Vec<u8>), CompressionError> {
    if bytes_per_row == 0 {
        return Ok((Vec::new(), Vec::new()));
    }

    let mut table = Vec::with_capacity(data.len() / bytes_per_row);
    let mut packed = Vec::new();
    for row in data.chunks(bytes_per_row) {
        let (len, bytes) = encode_scanline(row)?;
        table.push(len);
        packed.extend(bytes);
    }
    Ok((table, packed))
}

/// Decode a channel row by row using its row-length table
///
/// Row `i` is the table-declared slice starting at the sum of the previous
/// entries. Rows that end early are zero-filled; packets needing more bytes
/// than the row declares are an error.
pub fn decode_rle_rows(
    encoded: &[u8],
    row_lengths: &[u16],
    bytes_per_row: usize,
) -> Result<Vec<u8>, CompressionError> {
    let mut output = vec![0u8; bytes_per_row * row_lengths.len()];
    if bytes_per_row == 0 {
        return Ok(output);
    }

    let mut offset = 0usize;
    for (row, (&len, dst)) in row_lengths
        .iter()
        .zip(output.chunks_mut(bytes_per_row))
        .enumerate()
    {
        let end = offset + len as usize;
        let packets = encoded
            .get(offset..end)
            .ok_or(CompressionError::RowOutOfRange {
                row,
                end,
                len: encoded.len(),
            })?;

        let written = packbits_decode_into(packets, dst).map_err(|e| match e {
            CompressionError::UnexpectedEof(pos) => CompressionError::UnexpectedEof(offset + pos),
            other => other,
        })?;
        if written < bytes_per_row {
            tracing::warn!(
                "RLE row {} decoded to {} of {} bytes, zero-filling",
                row,
                written,
                bytes_per_row
            );
        }

        offset = end;
    }

    Ok(output)
}

/// Inflate a zlib stream into exactly `expected_len` bytes
pub fn zip_decode(input: &[u8], expected_len: usize) -> Result<Vec<u8>, CompressionError> {
    let mut output = Vec::with_capacity(expected_len);
    ZlibDecoder::new(input)
        .take(expected_len as u64)
        .read_to_end(&mut output)?;

    if output.len() != expected_len {
        return Err(CompressionError::SizeMismatch {
            expected: expected_len,
            actual: output.len(),
        });
    }

    Ok(output)
}

/// Deflate into a zlib stream
pub fn zip_encode(input: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), ZlibLevel::default());
    encoder.write_all(input)?;
    Ok(encoder.finish()?)
}

/// Undo horizontal delta coding, row by row
pub fn undo_prediction(
    data: &mut [u8],
    bytes_per_row: usize,
    depth: u16,
) -> Result<(), CompressionError> {
    if bytes_per_row == 0 {
        return Ok(());
    }

    match depth {
        8 => {
            for row in data.chunks_mut(bytes_per_row) {
                for i in 1..row.len() {
                    row[i] = row[i].wrapping_add(row[i - 1]);
                }
            }
        }
        16 => {
            for row in data.chunks_mut(bytes_per_row) {
                let samples = row.len() / 2;
                for i in 1..samples {
                    let prev = u16::from_be_bytes([row[2 * i - 2], row[2 * i - 1]]);
                    let cur = u16::from_be_bytes([row[2 * i], row[2 * i + 1]]);
                    let value = cur.wrapping_add(prev).to_be_bytes();
                    row[2 * i] = value[0];
                    row[2 * i + 1] = value[1];
                }
            }
        }
        _ => return Err(CompressionError::UnsupportedPrediction(depth)),
    }

    Ok(())
}

/// Apply horizontal delta coding, row by row
pub fn apply_prediction(
    data: &mut [u8],
    bytes_per_row: usize,
    depth: u16,
) -> Result<(), CompressionError> {
    if bytes_per_row == 0 {
        return Ok(());
    }

    match depth {
        8 => {
            for row in data.chunks_mut(bytes_per_row) {
                for i in (1..row.len()).rev() {
                    row[i] = row[i].wrapping_sub(row[i - 1]);
                }
            }
        }
        16 => {
            for row in data.chunks_mut(bytes_per_row) {
                let samples = row.len() / 2;
                for i in (1..samples).rev() {
                    let prev = u16::from_be_bytes([row[2 * i - 2], row[2 * i - 1]]);
                    let cur = u16::from_be_bytes([row[2 * i], row[2 * i + 1]]);
                    let value = cur.wrapping_sub(prev).to_be_bytes();
                    row[2 * i] = value[0];
                    row[2 * i + 1] = value[1];
                }
            }
        }
        _ => return Err(CompressionError::UnsupportedPrediction(depth)),
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_packets() {
        let cases: [(&[u8], &[u8]); 5] = [
            (&[], &[]),
            (&[42], &[0, 42]),
            (&[1, 2, 3, 4], &[3, 1, 2, 3, 4]),
            (&[0xAA; 5], &[0xFC, 0xAA]),
            (&[1, 2, 3, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA], &[2, 1, 2, 3, 0xFC, 0xAA]),
        ];
        for (input, expected) in cases {
            assert_eq!(packbits_encode(input), expected, "input {:?}", input);
        }
    }

    #[test]
    fn test_pairs_stay_literal() {
        assert_eq!(packbits_encode(&[5, 5, 6]), vec![2, 5, 5, 6]);
    }

    #[test]
    fn test_long_literal_split() {
        let input: Vec<u8> = (0..200).map(|i| (i % 2) as u8).collect();
        let encoded = packbits_encode(&input);
        assert_eq!(encoded[0], 127);
        assert_eq!(encoded[129], 71);
        assert_eq!(encoded.len(), 202);
    }

    #[test]
    fn test_encode_long_run_split() {
        let result = packbits_encode(&[7u8; 300]);
        // 128 + 128 + 44
        assert_eq!(result, vec![0x81, 7, 0x81, 7, 0xD5, 7]);
    }

    #[test]
    fn test_decode_packets() {
        assert_eq!(packbits_decode(&[3, 1, 2, 3, 4], 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(packbits_decode(&[0xFC, 0xAA], 5).unwrap(), vec![0xAA; 5]);
    }

    #[test]
    fn test_decode_noop() {
        let compressed = vec![0x80, 0x01, 0xAA, 0xBB];
        assert_eq!(packbits_decode(&compressed, 2).unwrap(), vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_decode_overrun_truncated() {
        // Run of 5 into a 3-byte row
        let mut row = [0u8; 3];
        let written = packbits_decode_into(&[0xFC, 0x11], &mut row).unwrap();
        assert_eq!(written, 3);
        assert_eq!(row, [0x11; 3]);
    }

    #[test]
    fn test_decode_truncated_literal() {
        let err = packbits_decode(&[0x03, 1, 2], 4).unwrap_err();
        assert!(matches!(err, CompressionError::UnexpectedEof(_)));
    }

    #[test]
    fn test_decode_rows_single_literal() {
        let out = decode_rle_rows(&[0x01, 0xAA, 0xBB], &[2], 2).unwrap();
        assert_eq!(out, vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_decode_rows_uses_table_offsets() {
        // Row 0 carries a trailing no-op; row 1 must start after it
        let encoded = [0x01, 1, 2, 0x80, 0xFF, 9];
        let out = decode_rle_rows(&encoded, &[4, 2], 2).unwrap();
        assert_eq!(out, vec![1, 2, 9, 9]);
    }

    #[test]
    fn test_decode_rows_table_past_end() {
        let err = decode_rle_rows(&[0x00, 1], &[5, 2], 1).unwrap_err();
        assert!(matches!(err, CompressionError::RowOutOfRange { row: 0, end: 5, len: 2 }));
    }

    #[test]
    fn test_decode_rows_table_total_past_end() {
        // Row 0 fits, row 1 declares bytes that are not there
        let err = decode_rle_rows(&[0x01, 1, 2], &[3, 3], 2).unwrap_err();
        assert!(matches!(err, CompressionError::RowOutOfRange { row: 1, end: 6, len: 3 }));
    }

    #[test]
    fn test_decode_rows_stay_inside_declared_length() {
        // Row 0 declares one byte but its literal needs three
        let err = decode_rle_rows(&[0x01, 0xAA, 0xBB, 0x00, 0xCC], &[1, 4], 2).unwrap_err();
        assert!(matches!(err, CompressionError::UnexpectedEof(1)));
    }

    #[test]
    fn test_decode_rows_short_row_zero_filled() {
        let out = decode_rle_rows(&[0x00, 7, 0xFF, 9], &[2, 2], 2).unwrap();
        assert_eq!(out, vec![7, 0, 9, 9]);
    }

    #[test]
    fn test_flat_areas_compress() {
        let mut original = vec![0u8; 100];
        original.extend((0..50).map(|i| (i * 5) as u8));
        original.extend([255u8; 80]);

        let compressed = packbits_encode(&original);
        assert!(compressed.len() < original.len());
        assert_eq!(packbits_decode(&compressed, original.len()).unwrap(), original);
    }

    #[test]
    fn test_encode_rle_rows() {
        let mut data = vec![0u8; 10];
        data.extend(vec![255u8; 10]);

        let (counts, encoded) = encode_rle_rows(&data, 10).unwrap();
        assert_eq!(counts, vec![2, 2]);
        assert_eq!(decode_rle_rows(&encoded, &counts, 10).unwrap(), data);
    }

    #[test]
    fn test_zip_roundtrip() {
        let data: Vec<u8> = (0..1000).map(|i| (i % 7) as u8).collect();
        let encoded = zip_encode(&data).unwrap();
        assert_eq!(zip_decode(&encoded, data.len()).unwrap(), data);
    }

    #[test]
    fn test_zip_short_stream() {
        let encoded = zip_encode(&[1, 2, 3]).unwrap();
        let err = zip_decode(&encoded, 4).unwrap_err();
        assert!(matches!(err, CompressionError::SizeMismatch { expected: 4, actual: 3 }));
    }

    #[test]
    fn test_prediction_8bit() {
        let mut data = vec![10, 12, 15, 15, 1, 1, 1, 1];
        apply_prediction(&mut data, 4, 8).unwrap();
        assert_eq!(data, vec![10, 2, 3, 0, 1, 0, 0, 0]);
        undo_prediction(&mut data, 4, 8).unwrap();
        assert_eq!(data, vec![10, 12, 15, 15, 1, 1, 1, 1]);
    }

    #[test]
    fn test_prediction_8bit_wraps() {
        let mut data = vec![250, 4];
        undo_prediction(&mut data, 2, 8).unwrap();
        assert_eq!(data, vec![250, 254]);
        let mut data = vec![250, 10];
        undo_prediction(&mut data, 2, 8).unwrap();
        assert_eq!(data, vec![250, 4]);
    }

    #[test]
    fn test_prediction_16bit() {
        // Samples 0x0100, 0x0102 -> delta 0x0002
        let mut data = vec![0x01, 0x00, 0x00, 0x02];
        undo_prediction(&mut data, 4, 16).unwrap();
        assert_eq!(data, vec![0x01, 0x00, 0x01, 0x02]);
        apply_prediction(&mut data, 4, 16).unwrap();
        assert_eq!(data, vec![0x01, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn test_prediction_32bit_unsupported() {
        let mut data = vec![0u8; 8];
        let err = undo_prediction(&mut data, 8, 32).unwrap_err();
        assert!(matches!(err, CompressionError::UnsupportedPrediction(32)));
    }

    proptest! {
        #[test]
        fn packbits_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..600)) {
            let encoded = packbits_encode(&data);
            prop_assert_eq!(packbits_decode(&encoded, data.len()).unwrap(), data);
        }

        #[test]
        fn packbits_runs_bounded(data in proptest::collection::vec(0u8..3, 0..600)) {
            let encoded = packbits_encode(&data);
            let mut pos = 0;
            while pos < encoded.len() {
                let n = encoded[pos] as i8;
                prop_assert!(n != -128);
                if n >= 0 {
                    pos += n as usize + 2;
                } else {
                    prop_assert!((1 - n as i16) <= 128);
                    pos += 2;
                }
            }
            prop_assert_eq!(pos, encoded.len());
        }

        #[test]
        fn rle_rows_roundtrip(width in 1usize..40, row_count in 0usize..8, seed in any::<u8>()) {
            let data: Vec<u8> = (0..width * row_count)
                .map(|i| if (i / 3) % 2 == 0 { seed } else { (i as u8).wrapping_mul(31) })
                .collect();
            let (table, encoded) = encode_rle_rows(&data, width).unwrap();
            prop_assert_eq!(table.len(), row_count);
            prop_assert_eq!(table.iter().map(|&n| n as usize).sum::<usize>(), encoded.len());
            prop_assert_eq!(decode_rle_rows(&encoded, &table, width).unwrap(), data);
        }
    }
}
