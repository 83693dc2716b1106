use byteorder::{BigEndian, ByteOrder, LittleEndian};
use bytes::{Buf, BytesMut};

use super::bytes_errors::{BytesReadError, BytesReadErrorValue};

/// A FIFO byte cursor: `extend_from_slice` appends incoming network bytes,
/// the `read_*` methods consume from the front. Used by the chunk
/// unpacketizer and the AMF0 decoder, both of which see their input in
/// arbitrarily-sized TCP read chunks rather than one message at a time.
#[derive(Default)]
pub struct BytesReader {
    buf: BytesMut,
}

impl BytesReader {
    #[must_use]
    pub fn new(buf: BytesMut) -> Self {
        Self { buf }
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) -> Result<(), BytesReadError> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn get_remaining_bytes(&self) -> BytesMut {
        self.buf.clone()
    }

    fn need(&self, n: usize) -> Result<(), BytesReadError> {
        if self.buf.len() < n {
            Err(BytesReadError {
                value: BytesReadErrorValue::NotEnoughBytes,
            })
        } else {
            Ok(())
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, BytesReadError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<BytesMut, BytesReadError> {
        self.need(n)?;
        Ok(self.buf.split_to(n))
    }

    pub fn peek_bytes(&self, n: usize) -> Result<&[u8], BytesReadError> {
        self.need(n)?;
        Ok(&self.buf[..n])
    }

    pub fn advance(&mut self, n: usize) -> Result<(), BytesReadError> {
        self.need(n)?;
        self.buf.advance(n);
        Ok(())
    }

    pub fn read_u16_be(&mut self) -> Result<u16, BytesReadError> {
        self.need(2)?;
        let v = BigEndian::read_u16(&self.buf[..2]);
        self.buf.advance(2);
        Ok(v)
    }

    pub fn read_u24_be(&mut self) -> Result<u32, BytesReadError> {
        self.need(3)?;
        let v = BigEndian::read_u24(&self.buf[..3]);
        self.buf.advance(3);
        Ok(v)
    }

    pub fn read_u32_be(&mut self) -> Result<u32, BytesReadError> {
        self.need(4)?;
        let v = BigEndian::read_u32(&self.buf[..4]);
        self.buf.advance(4);
        Ok(v)
    }

    pub fn read_u32_le(&mut self) -> Result<u32, BytesReadError> {
        self.need(4)?;
        let v = LittleEndian::read_u32(&self.buf[..4]);
        self.buf.advance(4);
        Ok(v)
    }

    pub fn read_f64_be(&mut self) -> Result<f64, BytesReadError> {
        self.need(8)?;
        let v = BigEndian::read_f64(&self.buf[..8]);
        self.buf.advance(8);
        Ok(v)
    }
}
