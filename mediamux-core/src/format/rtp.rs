//! FU-A fragmentation/reassembly and the simple one-packet-per-unit path
//! used by codecs that don't need it (Opus, VP8/VP9 in this driver set).
//!
//! Grounded in the teacher's `mpeg4_avc` NAL handling; this module adds the
//! RFC 6184 FU-A framing the teacher's RTMP-only pipeline never needed.

use bytes::{Bytes, BytesMut};

use crate::error::FormatError;
use crate::model::{AccessUnit, RtpPacket};

pub const MAX_RTP_PAYLOAD_SIZE: usize = 1400;

const FU_INDICATOR_TYPE: u8 = 28;
const FU_START_BIT: u8 = 0x80;
const FU_END_BIT: u8 = 0x40;

pub fn fragment_fu_a(nal: &Bytes) -> Result<Vec<Bytes>, FormatError> {
    if nal.is_empty() {
        return Err(FormatError::Undecodable("empty NAL unit".to_string()));
    }
    if nal.len() <= MAX_RTP_PAYLOAD_SIZE {
        return Ok(vec![nal.clone()]);
    }

    let header = nal[0];
    let nal_type = header & 0x1f;
    let nri = header & 0x60;
    let payload = nal.slice(1..);
    let chunk_size = MAX_RTP_PAYLOAD_SIZE - 2;

    let mut fragments = Vec::new();
    let chunks: Vec<&[u8]> = payload.chunks(chunk_size).collect();
    for (i, chunk) in chunks.iter().enumerate() {
        let mut flags = nal_type;
        if i == 0 {
            flags |= FU_START_BIT;
        }
        if i == chunks.len() - 1 {
            flags |= FU_END_BIT;
        }
        let mut buf = BytesMut::with_capacity(chunk.len() + 2);
        buf.extend_from_slice(&[FU_INDICATOR_TYPE | nri, flags]);
        buf.extend_from_slice(chunk);
        fragments.push(buf.freeze());
    }
    Ok(fragments)
}

pub fn reassemble_fu_a(packets: &[RtpPacket]) -> Result<Vec<AccessUnit>, FormatError> {
    let mut units = Vec::new();
    let mut current: Option<BytesMut> = None;

    for packet in packets {
        if packet.payload.is_empty() {
            continue;
        }
        let header = packet.payload[0];
        if header & 0x1f == FU_INDICATOR_TYPE {
            if packet.payload.len() < 2 {
                return Err(FormatError::Undecodable("FU-A packet too short".to_string()));
            }
            let fu_header = packet.payload[1];
            let start = fu_header & FU_START_BIT != 0;
            let end = fu_header & FU_END_BIT != 0;
            let nal_type = fu_header & 0x1f;
            let nri = header & 0x60;

            if start {
                let mut buf = BytesMut::with_capacity(packet.payload.len());
                buf.extend_from_slice(&[nri | nal_type]);
                buf.extend_from_slice(&packet.payload[2..]);
                current = Some(buf);
            } else if let Some(buf) = current.as_mut() {
                buf.extend_from_slice(&packet.payload[2..]);
            } else {
                continue; // fragment lost its start, drop silently
            }

            if end {
                if let Some(buf) = current.take() {
                    let is_key_frame = nal_type == 5;
                    units.push(AccessUnit { data: buf.freeze(), is_key_frame });
                }
            }
        } else {
            let nal_type = header & 0x1f;
            units.push(AccessUnit {
                data: packet.payload.clone(),
                is_key_frame: nal_type == 5,
            });
        }
    }
    Ok(units)
}

pub fn fragment_generic(data: &Bytes) -> Result<Vec<Bytes>, FormatError> {
    if data.len() > MAX_RTP_PAYLOAD_SIZE {
        return Err(FormatError::PacketTooLarge {
            size: data.len(),
            max: MAX_RTP_PAYLOAD_SIZE,
        });
    }
    Ok(vec![data.clone()])
}

pub fn reassemble_generic(packets: &[RtpPacket]) -> Result<Vec<AccessUnit>, FormatError> {
    Ok(packets
        .iter()
        .map(|p| AccessUnit {
            data: p.payload.clone(),
            is_key_frame: true,
        })
        .collect())
}
