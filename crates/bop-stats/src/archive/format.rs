//! Tokens, limits and primitive codecs of the archive wire format.
//!
//! All multi-byte values are big-endian. Strings use a `u16` byte length
//! followed by modified UTF-8 (NUL as `C0 80`, supplementary characters as
//! two three-byte surrogates), which is what Java's `DataOutput::writeUTF`
//! produces.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{StatsError, StatsResult};

pub const ARCHIVE_VERSION: u8 = 4;

pub const SAMPLE_TOKEN: u8 = 0;
pub const RESOURCE_TYPE_TOKEN: u8 = 1;
pub const RESOURCE_INSTANCE_CREATE_TOKEN: u8 = 2;
pub const RESOURCE_INSTANCE_DELETE_TOKEN: u8 = 3;
/// Reserved by the format; never written.
pub const RESOURCE_INSTANCE_INITIALIZE_TOKEN: u8 = 4;
pub const HEADER_TOKEN: u8 = 77;

/// Terminates a sample's instance list.
pub const ILLEGAL_RESOURCE_INST_ID: i32 = -1;
pub const MAX_BYTE_RESOURCE_INST_ID: i32 = 252;
pub const SHORT_RESOURCE_INST_ID_TOKEN: u8 = 253;
pub const INT_RESOURCE_INST_ID_TOKEN: u8 = 254;
pub const ILLEGAL_RESOURCE_INST_ID_TOKEN: u8 = 255;
pub const MAX_SHORT_RESOURCE_INST_ID: i32 = 65535;

/// Terminates one instance's descriptor/value pairs.
pub const ILLEGAL_STAT_OFFSET: u8 = 255;

pub const MAX_SHORT_TIMESTAMP: i64 = 65534;
pub const INT_TIMESTAMP_TOKEN: u16 = 65535;

pub const MAX_1BYTE_COMPACT_VALUE: i64 = i8::MAX as i64;
pub const MIN_1BYTE_COMPACT_VALUE: i64 = i8::MIN as i64 + 7;
pub const MAX_2BYTE_COMPACT_VALUE: i64 = i16::MAX as i64;
pub const MIN_2BYTE_COMPACT_VALUE: i64 = i16::MIN as i64;
pub const COMPACT_VALUE_2_TOKEN: i8 = i8::MIN;

/// Longest string the `u16` length prefix can describe.
pub const MAX_UTF_BYTES: usize = u16::MAX as usize;

/// Writes `value` in the fewest bytes the compact encoding allows.
pub fn write_compact_value<W: Write>(out: &mut W, value: i64) -> io::Result<()> {
    if (MIN_1BYTE_COMPACT_VALUE..=MAX_1BYTE_COMPACT_VALUE).contains(&value) {
        return out.write_i8(value as i8);
    }
    if (MIN_2BYTE_COMPACT_VALUE..=MAX_2BYTE_COMPACT_VALUE).contains(&value) {
        out.write_i8(COMPACT_VALUE_2_TOKEN)?;
        return out.write_i16::<BigEndian>(value as i16);
    }
    let width = compact_width(value);
    out.write_i8(COMPACT_VALUE_2_TOKEN + (width as i8 - 2))?;
    out.write_int::<BigEndian>(value, width)
}

/// Smallest two's complement width in 3..=8 bytes that holds `value`.
fn compact_width(value: i64) -> usize {
    (3..8)
        .find(|&n| {
            let bits = 8 * n as u32;
            let min = -(1i64 << (bits - 1));
            let max = (1i64 << (bits - 1)) - 1;
            (min..=max).contains(&value)
        })
        .unwrap_or(8)
}

/// Number of bytes [`write_compact_value`] emits for `value`.
pub fn compact_value_len(value: i64) -> usize {
    if (MIN_1BYTE_COMPACT_VALUE..=MAX_1BYTE_COMPACT_VALUE).contains(&value) {
        1
    } else if (MIN_2BYTE_COMPACT_VALUE..=MAX_2BYTE_COMPACT_VALUE).contains(&value) {
        3
    } else {
        1 + compact_width(value)
    }
}

pub fn read_compact_value<R: Read>(input: &mut R) -> StatsResult<i64> {
    let token = input.read_i8()?;
    if i64::from(token) >= MIN_1BYTE_COMPACT_VALUE {
        return Ok(i64::from(token));
    }
    if token == COMPACT_VALUE_2_TOKEN {
        return Ok(i64::from(input.read_i16::<BigEndian>()?));
    }
    let width = (i16::from(token) - i16::from(COMPACT_VALUE_2_TOKEN) + 2) as usize;
    if !(3..=8).contains(&width) {
        return Err(StatsError::corruption(format!(
            "invalid compact value token {token}"
        )));
    }
    Ok(input.read_int::<BigEndian>(width)?)
}

/// Writes an archive instance id, or the end-of-sample marker for
/// [`ILLEGAL_RESOURCE_INST_ID`].
pub fn write_resource_inst_id<W: Write>(out: &mut W, id: i32) -> io::Result<()> {
    if id == ILLEGAL_RESOURCE_INST_ID {
        out.write_u8(ILLEGAL_RESOURCE_INST_ID_TOKEN)
    } else if (0..=MAX_BYTE_RESOURCE_INST_ID).contains(&id) {
        out.write_u8(id as u8)
    } else if (0..=MAX_SHORT_RESOURCE_INST_ID).contains(&id) {
        out.write_u8(SHORT_RESOURCE_INST_ID_TOKEN)?;
        out.write_u16::<BigEndian>(id as u16)
    } else {
        out.write_u8(INT_RESOURCE_INST_ID_TOKEN)?;
        out.write_i32::<BigEndian>(id)
    }
}

pub fn read_resource_inst_id<R: Read>(input: &mut R) -> StatsResult<i32> {
    Ok(match input.read_u8()? {
        ILLEGAL_RESOURCE_INST_ID_TOKEN => ILLEGAL_RESOURCE_INST_ID,
        SHORT_RESOURCE_INST_ID_TOKEN => i32::from(input.read_u16::<BigEndian>()?),
        INT_RESOURCE_INST_ID_TOKEN => input.read_i32::<BigEndian>()?,
        byte => i32::from(byte),
    })
}

/// Writes the milliseconds elapsed since the previous sample.
pub fn write_timestamp_delta<W: Write>(out: &mut W, delta_ms: i64) -> io::Result<()> {
    let delta = delta_ms.clamp(0, i64::from(i32::MAX));
    if delta > MAX_SHORT_TIMESTAMP {
        out.write_u16::<BigEndian>(INT_TIMESTAMP_TOKEN)?;
        out.write_i32::<BigEndian>(delta as i32)
    } else {
        out.write_u16::<BigEndian>(delta as u16)
    }
}

pub fn read_timestamp_delta<R: Read>(input: &mut R) -> StatsResult<i64> {
    let short = input.read_u16::<BigEndian>()?;
    if short == INT_TIMESTAMP_TOKEN {
        Ok(i64::from(input.read_i32::<BigEndian>()?))
    } else {
        Ok(i64::from(short))
    }
}

/// Appends the modified UTF-8 form of `s` (without length prefix).
pub fn encode_modified_utf8(s: &str, out: &mut Vec<u8>) {
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
}

pub fn decode_modified_utf8(bytes: &[u8]) -> StatsResult<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    let malformed = |at: usize| StatsError::corruption(format!("malformed UTF string at byte {at}"));
    while i < bytes.len() {
        let b0 = u16::from(bytes[i]);
        if b0 & 0x80 == 0 {
            units.push(b0);
            i += 1;
        } else if b0 & 0xE0 == 0xC0 {
            let b1 = u16::from(*bytes.get(i + 1).ok_or_else(|| malformed(i))?);
            if b1 & 0xC0 != 0x80 {
                return Err(malformed(i));
            }
            units.push(((b0 & 0x1F) << 6) | (b1 & 0x3F));
            i += 2;
        } else if b0 & 0xF0 == 0xE0 {
            let b1 = u16::from(*bytes.get(i + 1).ok_or_else(|| malformed(i))?);
            let b2 = u16::from(*bytes.get(i + 2).ok_or_else(|| malformed(i))?);
            if b1 & 0xC0 != 0x80 || b2 & 0xC0 != 0x80 {
                return Err(malformed(i));
            }
            units.push(((b0 & 0x0F) << 12) | ((b1 & 0x3F) << 6) | (b2 & 0x3F));
            i += 3;
        } else {
            return Err(malformed(i));
        }
    }
    String::from_utf16(&units).map_err(|err| StatsError::corruption(format!("UTF string: {err}")))
}

pub fn read_utf<R: Read>(input: &mut R) -> StatsResult<String> {
    let len = input.read_u16::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf)?;
    decode_modified_utf8(&buf)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use proptest::prelude::*;

    use super::*;

    fn compact(value: i64) -> Vec<u8> {
        let mut buf = Vec::new();
        write_compact_value(&mut buf, value).unwrap();
        buf
    }

    #[test]
    fn compact_boundaries() {
        assert_eq!(compact(0), vec![0]);
        assert_eq!(compact(127), vec![0x7F]);
        assert_eq!(compact(-121), vec![0x87]);
        assert_eq!(compact(-122), vec![0x80, 0xFF, 0x86]);
        assert_eq!(compact(128), vec![0x80, 0x00, 0x80]);
        assert_eq!(compact(32_768), vec![0x81, 0x00, 0x80, 0x00]);
        assert_eq!(compact(-32_769), vec![0x81, 0xFF, 0x7F, 0xFF]);
        assert_eq!(compact(i64::MAX).len(), 9);
        assert_eq!(compact(i64::MAX)[0] as i8, -122);
        assert_eq!(compact(i64::MIN).len(), 9);
    }

    #[test]
    fn compact_len_matches_encoding() {
        for value in [0, 127, -121, -122, 128, 40_000, 1 << 23, 1 << 40, i64::MIN] {
            assert_eq!(compact_value_len(value), compact(value).len(), "value {value}");
        }
    }

    #[test]
    fn instance_ids_use_narrowest_form() {
        let mut buf = Vec::new();
        write_resource_inst_id(&mut buf, 252).unwrap();
        write_resource_inst_id(&mut buf, 253).unwrap();
        write_resource_inst_id(&mut buf, 70_000).unwrap();
        write_resource_inst_id(&mut buf, ILLEGAL_RESOURCE_INST_ID).unwrap();
        assert_eq!(
            buf,
            vec![252, 253, 0x00, 0xFD, 254, 0x00, 0x01, 0x11, 0x70, 255]
        );
        let mut cursor = Cursor::new(buf);
        for expected in [252, 253, 70_000, ILLEGAL_RESOURCE_INST_ID] {
            assert_eq!(read_resource_inst_id(&mut cursor).unwrap(), expected);
        }
    }

    #[test]
    fn timestamp_escape_above_short_range() {
        let mut buf = Vec::new();
        write_timestamp_delta(&mut buf, 65_534).unwrap();
        write_timestamp_delta(&mut buf, 65_535).unwrap();
        assert_eq!(buf, vec![0xFF, 0xFE, 0xFF, 0xFF, 0x00, 0x00, 0xFF, 0xFF]);
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_timestamp_delta(&mut cursor).unwrap(), 65_534);
        assert_eq!(read_timestamp_delta(&mut cursor).unwrap(), 65_535);
    }

    #[test]
    fn modified_utf8_special_cases() {
        let mut buf = Vec::new();
        encode_modified_utf8("a\0é😀", &mut buf);
        assert_eq!(&buf[..5], &[b'a', 0xC0, 0x80, 0xC3, 0xA9]);
        // One supplementary character becomes two three-byte surrogates.
        assert_eq!(buf.len(), 5 + 6);
        assert_eq!(decode_modified_utf8(&buf).unwrap(), "a\0é😀");
        assert!(decode_modified_utf8(&[0xC3]).is_err());
    }

    proptest! {
        #[test]
        fn compact_value_decodes_to_written_value(value in any::<i64>()) {
            let bytes = compact(value);
            prop_assert_eq!(bytes.len(), compact_value_len(value));
            let decoded = read_compact_value(&mut Cursor::new(bytes)).unwrap();
            prop_assert_eq!(decoded, value);
        }
    }
}
