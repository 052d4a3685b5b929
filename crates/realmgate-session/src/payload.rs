//! Little-endian payload reading and writing for handlers.
//!
//! Every read checks the remaining length and reports
//! [`HandlerError::Truncated`] instead of panicking, so a short packet
//! only costs the packet.

use crate::HandlerError;

#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], HandlerError> {
        if self.remaining() < len {
            return Err(HandlerError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], HandlerError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, HandlerError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, HandlerError> {
        self.read_array().map(u16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, HandlerError> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64, HandlerError> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// A `u16` length prefix followed by UTF-8 bytes.
    pub fn read_string(&mut self) -> Result<String, HandlerError> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|err| HandlerError::Malformed(format!("string is not UTF-8: {err}")))
    }

    /// Errors if unread bytes remain.
    pub fn finish(self) -> Result<(), HandlerError> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(HandlerError::Malformed(format!("{extra} trailing bytes"))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(mut self, value: u8) -> Self {
        self.buf.push(value);
        self
    }

    pub fn put_u16(mut self, value: u16) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_u32(mut self, value: u32) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_u64(mut self, value: u64) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Strings longer than `u16::MAX` bytes are cut at the last character
    /// boundary that fits.
    pub fn put_string(mut self, value: &str) -> Self {
        let mut end = value.len().min(u16::MAX as usize);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        let bytes = &value.as_bytes()[..end];
        self = self.put_u16(bytes.len() as u16);
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u32_short_buffer_is_truncated() {
        let mut reader = PayloadReader::new(&[1, 2]);
        let err = reader.read_u32().unwrap_err();
        assert!(matches!(err, HandlerError::Truncated { needed: 4, available: 2 }));
    }

    #[test]
    fn test_writer_output_reads_back() {
        let payload = PayloadWriter::new()
            .put_u8(7)
            .put_u32(0xDEAD_BEEF)
            .put_string("Elwynn")
            .finish();

        let mut reader = PayloadReader::new(&payload);
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert_eq!(reader.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(reader.read_string().unwrap(), "Elwynn");
        reader.finish().unwrap();
    }

    #[test]
    fn test_put_string_oversized_cut_on_char_boundary() {
        // 'é' is two bytes; the 65_535-byte cut would land inside one.
        let long = "é".repeat(40_000);
        let payload = PayloadWriter::new().put_string(&long).finish();

        let mut reader = PayloadReader::new(&payload);
        let read = reader.read_string().unwrap();
        assert_eq!(read.len(), 65_534);
        assert!(long.starts_with(read.as_str()));
        reader.finish().unwrap();
    }

    #[test]
    fn test_read_string_invalid_utf8_is_malformed() {
        let mut reader = PayloadReader::new(&[2, 0, 0xFF, 0xFE]);
        assert!(matches!(reader.read_string(), Err(HandlerError::Malformed(_))));
    }

    #[test]
    fn test_finish_with_trailing_bytes_is_malformed() {
        let mut reader = PayloadReader::new(&[1, 2, 3]);
        reader.read_u16().unwrap();
        assert!(matches!(reader.finish(), Err(HandlerError::Malformed(_))));
    }
}
