//! FLV tag-body parsing for RTMP `Audio`/`Video` message payloads, plus
//! ([`mux`]/[`http`]) the reverse direction for the HTTP-FLV egress driver.
//!
//! RTMP streams the same `VideoTagBody`/`AudioTagBody` layout that the FLV
//! container uses for its tag data, just without the outer FLV tag header
//! (type/size/timestamp) or `PreviousTagSize` framing — that framing is
//! carried by the RTMP chunk stream instead. Grounded in the teacher's
//! `flv::demuxer`/`flv::errors` split; rewritten against
//! [`define`] to parse AVC (H.264) video and AAC audio payloads directly
//! into NAL units / raw AAC frames for the core crate's format processor.

pub mod amf0;
pub mod define;
pub mod errors;
pub mod http;
pub mod mux;

use bytes::Bytes;

use define::{aac_packet_type, avc_packet_type, frame_type, AvcCodecId, SoundFormat};
use errors::{TagParseError, TagParseErrorValue};

/// A decoded RTMP `Video` message payload.
#[derive(Debug, Clone)]
pub enum VideoTag {
    /// `AVCDecoderConfigurationRecord` carrying SPS/PPS (`AVCPacketType == 0`).
    AvcSequenceHeader { avc_config: Bytes },
    /// One or more length-prefixed NAL units (`AVCPacketType == 1`).
    Nalus {
        is_key_frame: bool,
        composition_time: i32,
        nalus: Vec<Bytes>,
    },
    EndOfSequence,
}

/// A decoded RTMP `Audio` message payload.
#[derive(Debug, Clone)]
pub enum AudioTag {
    /// `AudioSpecificConfig` (`AACPacketType == 0`).
    AacSequenceHeader { asc: Bytes },
    /// One raw AAC access unit (`AACPacketType == 1`).
    AacRaw { data: Bytes },
    /// Non-AAC codec, passed through undecoded.
    Other { sound_format: SoundFormat, data: Bytes },
}

/// Parses an RTMP `Video` message payload (`FrameType|CodecID` header byte
/// followed by codec-specific data). Only AVC (H.264) is decoded structurally;
/// other codec IDs are rejected since the format processor only speaks H.264
/// for this driver.
pub fn parse_video_tag(payload: &Bytes) -> Result<VideoTag, TagParseError> {
    if payload.len() < 2 {
        return Err(TagParseError {
            value: TagParseErrorValue::TagDataLength,
        });
    }
    let header = payload[0];
    let frame_type = (header >> 4) & 0x0f;
    let codec_id = header & 0x0f;
    if !matches!(AvcCodecId::from_u8(codec_id), AvcCodecId::H264) {
        return Err(TagParseError {
            value: TagParseErrorValue::UnknownTagType,
        });
    }

    let packet_type = payload[1];
    match packet_type {
        avc_packet_type::SEQUENCE_HEADER => Ok(VideoTag::AvcSequenceHeader {
            avc_config: payload.slice(5..),
        }),
        avc_packet_type::NALU => {
            if payload.len() < 5 {
                return Err(TagParseError {
                    value: TagParseErrorValue::TagDataLength,
                });
            }
            let composition_time = i32::from(payload[2]) << 16 | i32::from(payload[3]) << 8 | i32::from(payload[4]);
            let nalus = split_length_prefixed(&payload.slice(5..))?;
            Ok(VideoTag::Nalus {
                is_key_frame: frame_type == frame_type::KEY_FRAME,
                composition_time,
                nalus,
            })
        }
        avc_packet_type::END_OF_SEQUENCE => Ok(VideoTag::EndOfSequence),
        _ => Err(TagParseError {
            value: TagParseErrorValue::UnknownTagType,
        }),
    }
}

/// Splits a run of 4-byte-length-prefixed NAL units (the AVC-in-FLV framing)
/// into individual NAL unit byte slices.
fn split_length_prefixed(data: &Bytes) -> Result<Vec<Bytes>, TagParseError> {
    let mut nalus = Vec::new();
    let mut offset = 0usize;
    while offset + 4 <= data.len() {
        let len = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        offset += 4;
        if offset + len > data.len() {
            return Err(TagParseError {
                value: TagParseErrorValue::TagDataLength,
            });
        }
        nalus.push(data.slice(offset..offset + len));
        offset += len;
    }
    Ok(nalus)
}

/// Extracts the first SPS and first PPS out of an `AVCDecoderConfigurationRecord`
/// (ISO 14496-15), the payload carried by [`VideoTag::AvcSequenceHeader`].
/// Only the parameter sets are needed here — profile/level/NAL-length-size
/// fields are for a demuxer reconstructing Annex-B streams, which this
/// driver doesn't do.
pub fn parse_avc_decoder_config(data: &Bytes) -> Result<(Bytes, Bytes), TagParseError> {
    let too_short = || TagParseError {
        value: TagParseErrorValue::TagDataLength,
    };
    if data.len() < 6 {
        return Err(too_short());
    }
    let num_sps = (data[5] & 0x1f) as usize;
    let mut offset = 6;
    let mut sps = None;
    for _ in 0..num_sps {
        if offset + 2 > data.len() {
            return Err(too_short());
        }
        let len = u16::from_be_bytes([data[offset], data[offset + 1]]) as usize;
        offset += 2;
        if offset + len > data.len() {
            return Err(too_short());
        }
        if sps.is_none() {
            sps = Some(data.slice(offset..offset + len));
        }
        offset += len;
    }
    if offset >= data.len() {
        return Err(too_short());
    }
    let num_pps = (data[offset] & 0x1f) as usize;
    offset += 1;
    let mut pps = None;
    for _ in 0..num_pps {
        if offset + 2 > data.len() {
            return Err(too_short());
        }
        let len = u16::from_be_bytes([data[offset], data[offset + 1]]) as usize;
        offset += 2;
        if offset + len > data.len() {
            return Err(too_short());
        }
        if pps.is_none() {
            pps = Some(data.slice(offset..offset + len));
        }
        offset += len;
    }
    match (sps, pps) {
        (Some(sps), Some(pps)) => Ok((sps, pps)),
        _ => Err(too_short()),
    }
}

/// Parses an RTMP `Audio` message payload (`SoundFormat|SoundRate|SoundSize|SoundType`
/// header byte followed by codec-specific data).
pub fn parse_audio_tag(payload: &Bytes) -> Result<AudioTag, TagParseError> {
    if payload.is_empty() {
        return Err(TagParseError {
            value: TagParseErrorValue::TagDataLength,
        });
    }
    let header = payload[0];
    let sound_format = SoundFormat::from_u8(header >> 4);
    if sound_format != SoundFormat::Aac {
        return Ok(AudioTag::Other {
            sound_format,
            data: payload.slice(1..),
        });
    }

    if payload.len() < 2 {
        return Err(TagParseError {
            value: TagParseErrorValue::TagDataLength,
        });
    }
    match payload[1] {
        aac_packet_type::SEQUENCE_HEADER => Ok(AudioTag::AacSequenceHeader {
            asc: payload.slice(2..),
        }),
        aac_packet_type::RAW => Ok(AudioTag::AacRaw {
            data: payload.slice(2..),
        }),
        _ => Err(TagParseError {
            value: TagParseErrorValue::UnknownTagType,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_avc_sequence_header() {
        let mut payload = vec![0x17, 0x00, 0x00, 0x00, 0x00];
        payload.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let tag = parse_video_tag(&Bytes::from(payload)).unwrap();
        match tag {
            VideoTag::AvcSequenceHeader { avc_config } => {
                assert_eq!(&avc_config[..], &[0xde, 0xad, 0xbe, 0xef]);
            }
            other => panic!("unexpected tag: {other:?}"),
        }
    }

    #[test]
    fn parses_single_nalu_key_frame() {
        let mut payload = vec![0x17, 0x01, 0x00, 0x00, 0x00];
        payload.extend_from_slice(&4u32.to_be_bytes());
        payload.extend_from_slice(&[1, 2, 3, 4]);
        let tag = parse_video_tag(&Bytes::from(payload)).unwrap();
        match tag {
            VideoTag::Nalus { is_key_frame, nalus, .. } => {
                assert!(is_key_frame);
                assert_eq!(nalus.len(), 1);
                assert_eq!(&nalus[0][..], &[1, 2, 3, 4]);
            }
            other => panic!("unexpected tag: {other:?}"),
        }
    }

    #[test]
    fn parses_aac_raw_frame() {
        let payload = Bytes::from_static(&[0xaf, 0x01, 0x11, 0x22, 0x33]);
        let tag = parse_audio_tag(&payload).unwrap();
        match tag {
            AudioTag::AacRaw { data } => assert_eq!(&data[..], &[0x11, 0x22, 0x33]),
            other => panic!("unexpected tag: {other:?}"),
        }
    }

    #[test]
    fn parses_avc_decoder_config_sps_and_pps() {
        let mut config = vec![1, 0x42, 0x00, 0x1f, 0xff, 0xe1];
        config.extend_from_slice(&3u16.to_be_bytes());
        config.extend_from_slice(&[0x67, 0x01, 0x02]);
        config.push(1); // numOfPictureParameterSets
        config.extend_from_slice(&2u16.to_be_bytes());
        config.extend_from_slice(&[0x68, 0x03]);

        let (sps, pps) = parse_avc_decoder_config(&Bytes::from(config)).unwrap();
        assert_eq!(&sps[..], &[0x67, 0x01, 0x02]);
        assert_eq!(&pps[..], &[0x68, 0x03]);
    }

    #[test]
    fn truncated_avc_decoder_config_is_rejected() {
        let config = Bytes::from_static(&[1, 0x42, 0x00, 0x1f, 0xff, 0xe1]);
        assert!(parse_avc_decoder_config(&config).is_err());
    }
}
