use std::io::{self, Write};

use byteorder::{BigEndian, ByteOrder};

use super::format::{MAX_UTF_BYTES, encode_modified_utf8};

/// In-memory staging buffer for archive records.
///
/// Records are encoded here between flushes; the session drains the buffer
/// into the active file with [`ArchiveBuffer::take`].
#[derive(Debug, Default)]
pub struct ArchiveBuffer {
    buf: Vec<u8>,
    scratch: Vec<u8>,
}

impl ArchiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Removes and returns everything written since the last take.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    /// Drops everything written after `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    pub fn write_byte(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn write_i16(&mut self, value: i16) {
        let mut bytes = [0u8; 2];
        BigEndian::write_i16(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn write_i32(&mut self, value: i32) {
        let mut bytes = [0u8; 4];
        BigEndian::write_i32(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn write_i64(&mut self, value: i64) {
        let mut bytes = [0u8; 8];
        BigEndian::write_i64(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    /// Writes a length-prefixed modified UTF-8 string.
    ///
    /// Strings whose encoding exceeds the `u16` prefix are rejected before
    /// anything is appended.
    pub fn write_utf(&mut self, value: &str) -> io::Result<()> {
        self.scratch.clear();
        encode_modified_utf8(value, &mut self.scratch);
        if self.scratch.len() > MAX_UTF_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "string of {} encoded bytes exceeds the archive limit of {MAX_UTF_BYTES}",
                    self.scratch.len()
                ),
            ));
        }
        let mut prefix = [0u8; 2];
        BigEndian::write_u16(&mut prefix, self.scratch.len() as u16);
        self.buf.extend_from_slice(&prefix);
        self.buf.extend_from_slice(&self.scratch);
        Ok(())
    }
}

impl Write for ArchiveBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_writes_are_big_endian() {
        let mut out = ArchiveBuffer::new();
        out.write_byte(77);
        out.write_i16(-2);
        out.write_i32(0x0102_0304);
        out.write_i64(1);
        out.write_bool(true);
        assert_eq!(
            out.as_slice(),
            &[77, 0xFF, 0xFE, 1, 2, 3, 4, 0, 0, 0, 0, 0, 0, 0, 1, 1]
        );
        assert_eq!(out.take().len(), 16);
        assert!(out.is_empty());
    }

    #[test]
    fn extremes_decode_with_the_reader_byte_order() {
        use byteorder::ReadBytesExt;

        let mut out = ArchiveBuffer::new();
        out.write_i16(i16::MIN);
        out.write_i32(i32::MAX);
        out.write_i64(i64::MIN + 1);
        let mut input = io::Cursor::new(out.take());
        assert_eq!(input.read_i16::<BigEndian>().unwrap(), i16::MIN);
        assert_eq!(input.read_i32::<BigEndian>().unwrap(), i32::MAX);
        assert_eq!(input.read_i64::<BigEndian>().unwrap(), i64::MIN + 1);
    }

    #[test]
    fn utf_is_length_prefixed() {
        let mut out = ArchiveBuffer::new();
        out.write_utf("puts").unwrap();
        assert_eq!(out.as_slice(), &[0, 4, b'p', b'u', b't', b's']);
    }

    #[test]
    fn oversized_utf_is_rejected_without_partial_write() {
        let mut out = ArchiveBuffer::new();
        out.write_byte(1);
        let huge = "x".repeat(MAX_UTF_BYTES + 1);
        assert!(out.write_utf(&huge).is_err());
        assert_eq!(out.len(), 1);
    }
}
