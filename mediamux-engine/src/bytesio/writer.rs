use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

use super::bytes_errors::BytesWriteError;

/// Append-only byte buffer used by the AMF0 encoder and the chunk
/// packetizer.
#[derive(Default)]
pub struct BytesWriter {
    buf: BytesMut,
}

impl BytesWriter {
    #[must_use]
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), BytesWriteError> {
        self.buf.put_u8(v);
        Ok(())
    }

    pub fn write_u16_be(&mut self, v: u16) -> Result<(), BytesWriteError> {
        let mut tmp = [0u8; 2];
        BigEndian::write_u16(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
        Ok(())
    }

    pub fn write_u24_be(&mut self, v: u32) -> Result<(), BytesWriteError> {
        let mut tmp = [0u8; 4];
        BigEndian::write_u32(&mut tmp, v);
        self.buf.extend_from_slice(&tmp[1..]);
        Ok(())
    }

    pub fn write_u32_be(&mut self, v: u32) -> Result<(), BytesWriteError> {
        let mut tmp = [0u8; 4];
        BigEndian::write_u32(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
        Ok(())
    }

    pub fn write_u32_le(&mut self, v: u32) -> Result<(), BytesWriteError> {
        self.buf.extend_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub fn write_f64_be(&mut self, v: f64) -> Result<(), BytesWriteError> {
        let mut tmp = [0u8; 8];
        BigEndian::write_f64(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
        Ok(())
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), BytesWriteError> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    #[must_use]
    pub fn extract_current_bytes(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
