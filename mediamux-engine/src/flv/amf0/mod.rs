//! AMF0 encode/decode for RTMP command messages (`connect`, `createStream`,
//! `publish`, `play`, `_result`, `onStatus`) and FLV `onMetaData` tags.
//!
//! Grounded in the teacher's `flv::amf0` error split
//! (`Amf0ReadError`/`Amf0WriteError`); the (de)serializer itself is written
//! fresh against the AMF0 spec markers since the teacher's reader/writer
//! structs weren't part of the retrieved sample.

pub mod errors;

use std::collections::BTreeMap;

use crate::bytesio::{BytesReader, BytesWriter};
use errors::{Amf0ReadError, Amf0ReadErrorValue, Amf0WriteError, Amf0WriteErrorValue};

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_STRICT_ARRAY: u8 = 0x0a;
const OBJECT_END_KEY_AND_MARKER: [u8; 3] = [0x00, 0x00, 0x09];
const MAX_STRING_LEN: usize = 64 * 1024;

/// An AMF0 value. Object/ECMA-array key order is preserved for
/// deterministic re-encoding, hence `Vec<(String, Amf0Value)>` rather than a
/// `HashMap`.
#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    Utf8String(String),
    Object(Vec<(String, Amf0Value)>),
    EcmaArray(Vec<(String, Amf0Value)>),
    StrictArray(Vec<Amf0Value>),
    Null,
    Undefined,
}

impl Amf0Value {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Utf8String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn object_get(&self, key: &str) -> Option<&Amf0Value> {
        match self {
            Self::Object(fields) | Self::EcmaArray(fields) => {
                fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }
}

pub fn decode_all(data: &[u8]) -> Result<Vec<Amf0Value>, Amf0ReadError> {
    let mut reader = BytesReader::new(bytes::BytesMut::from(data));
    let mut values = Vec::new();
    while !reader.is_empty() {
        values.push(decode_value(&mut reader)?);
    }
    Ok(values)
}

fn decode_value(reader: &mut BytesReader) -> Result<Amf0Value, Amf0ReadError> {
    let marker = reader.read_u8()?;
    match marker {
        MARKER_NUMBER => Ok(Amf0Value::Number(reader.read_f64_be()?)),
        MARKER_BOOLEAN => Ok(Amf0Value::Boolean(reader.read_u8()? != 0)),
        MARKER_STRING => Ok(Amf0Value::Utf8String(decode_short_string(reader)?)),
        MARKER_OBJECT => Ok(Amf0Value::Object(decode_object_fields(reader)?)),
        MARKER_ECMA_ARRAY => {
            // 4-byte approximate element count, not authoritative.
            reader.advance(4)?;
            Ok(Amf0Value::EcmaArray(decode_object_fields(reader)?))
        }
        MARKER_STRICT_ARRAY => {
            let count = reader.read_u32_be()?;
            let mut items = Vec::with_capacity(count.min(4096) as usize);
            for _ in 0..count {
                items.push(decode_value(reader)?);
            }
            Ok(Amf0Value::StrictArray(items))
        }
        MARKER_NULL => Ok(Amf0Value::Null),
        MARKER_UNDEFINED => Ok(Amf0Value::Undefined),
        other => Err(Amf0ReadError {
            value: Amf0ReadErrorValue::UnknownMarker { marker: other },
        }),
    }
}

fn decode_object_fields(
    reader: &mut BytesReader,
) -> Result<Vec<(String, Amf0Value)>, Amf0ReadError> {
    let mut fields = Vec::new();
    loop {
        if reader.len() >= 3 {
            let peek = reader.peek_bytes(3)?;
            if peek == OBJECT_END_KEY_AND_MARKER {
                reader.advance(3)?;
                break;
            }
        }
        let key = decode_short_string(reader)?;
        let value = decode_value(reader)?;
        fields.push((key, value));
    }
    Ok(fields)
}

fn decode_short_string(reader: &mut BytesReader) -> Result<String, Amf0ReadError> {
    let len = reader.read_u16_be()? as usize;
    if len > MAX_STRING_LEN {
        return Err(Amf0ReadError {
            value: Amf0ReadErrorValue::StringTooLong {
                length: len,
                max: MAX_STRING_LEN,
            },
        });
    }
    let bytes = reader.read_bytes(len)?;
    String::from_utf8(bytes.to_vec()).map_err(Amf0ReadError::from)
}

pub fn encode_all(values: &[Amf0Value]) -> Result<Vec<u8>, Amf0WriteError> {
    let mut writer = BytesWriter::new();
    for v in values {
        encode_value(&mut writer, v)?;
    }
    Ok(writer.extract_current_bytes().to_vec())
}

fn encode_value(writer: &mut BytesWriter, value: &Amf0Value) -> Result<(), Amf0WriteError> {
    match value {
        Amf0Value::Number(n) => {
            writer.write_u8(MARKER_NUMBER)?;
            writer.write_f64_be(*n)?;
        }
        Amf0Value::Boolean(b) => {
            writer.write_u8(MARKER_BOOLEAN)?;
            writer.write_u8(u8::from(*b))?;
        }
        Amf0Value::Utf8String(s) => {
            writer.write_u8(MARKER_STRING)?;
            encode_short_string(writer, s)?;
        }
        Amf0Value::Object(fields) => {
            writer.write_u8(MARKER_OBJECT)?;
            encode_object_fields(writer, fields)?;
        }
        Amf0Value::EcmaArray(fields) => {
            writer.write_u8(MARKER_ECMA_ARRAY)?;
            writer.write_u32_be(fields.len() as u32)?;
            encode_object_fields(writer, fields)?;
        }
        Amf0Value::StrictArray(items) => {
            writer.write_u8(MARKER_STRICT_ARRAY)?;
            writer.write_u32_be(items.len() as u32)?;
            for item in items {
                encode_value(writer, item)?;
            }
        }
        Amf0Value::Null => writer.write_u8(MARKER_NULL)?,
        Amf0Value::Undefined => writer.write_u8(MARKER_UNDEFINED)?,
    }
    Ok(())
}

fn encode_object_fields(
    writer: &mut BytesWriter,
    fields: &[(String, Amf0Value)],
) -> Result<(), Amf0WriteError> {
    for (key, value) in fields {
        encode_short_string(writer, key)?;
        encode_value(writer, value)?;
    }
    writer.write(&OBJECT_END_KEY_AND_MARKER)?;
    Ok(())
}

/// Build the key/value pairs of an AMF0 object from a `BTreeMap`, used by
/// command builders where field order doesn't matter to the peer.
#[must_use]
pub fn object_from_map(map: BTreeMap<&str, Amf0Value>) -> Amf0Value {
    Amf0Value::Object(map.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

fn encode_short_string(writer: &mut BytesWriter, s: &str) -> Result<(), Amf0WriteError> {
    if s.len() > u16::MAX as usize {
        return Err(Amf0WriteError {
            value: Amf0WriteErrorValue::NormalStringTooLong,
        });
    }
    writer.write_u16_be(s.len() as u16)?;
    writer.write(s.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_number_and_string() {
        let values = vec![
            Amf0Value::Utf8String("connect".to_string()),
            Amf0Value::Number(1.0),
        ];
        let encoded = encode_all(&values).unwrap();
        let decoded = decode_all(&encoded).unwrap();
        assert_eq!(values, decoded);
    }

    #[test]
    fn round_trips_object() {
        let obj = Amf0Value::Object(vec![
            ("app".to_string(), Amf0Value::Utf8String("live".to_string())),
            ("flashVer".to_string(), Amf0Value::Utf8String("FMLE/3.0".to_string())),
        ]);
        let encoded = encode_all(std::slice::from_ref(&obj)).unwrap();
        let decoded = decode_all(&encoded).unwrap();
        assert_eq!(decoded, vec![obj]);
    }
}
