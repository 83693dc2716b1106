//! FLV container muxing: the tag-header/`PreviousTagSize` framing that wraps
//! the same `VideoTagBody`/`AudioTagBody` layout RTMP streams bare, for the
//! HTTP-FLV driver. Grounded in the same `define::msg_type_id` constants
//! [`super`] already parses against, just run the other direction.

use bytes::{Bytes, BytesMut};

use super::define::msg_type_id;

/// `"FLV" | version 1 | audio+video flags | header size (9)`, followed by the
/// mandatory zero `PreviousTagSize0`.
#[must_use]
pub fn file_header(has_audio: bool, has_video: bool) -> Bytes {
    let mut flags = 0u8;
    if has_audio {
        flags |= 0x04;
    }
    if has_video {
        flags |= 0x01;
    }
    let mut out = BytesMut::with_capacity(13);
    out.extend_from_slice(b"FLV");
    out.push(1);
    out.push(flags);
    out.extend_from_slice(&9u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.freeze()
}

/// One FLV tag: `type | data size (u24) | timestamp (u24 + extended byte) |
/// stream id (u24, always 0) | data`, followed by its own length as a
/// trailing `PreviousTagSize`.
#[must_use]
pub fn write_tag(tag_type: u8, timestamp_ms: u32, data: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(data.len() + 15);
    out.push(tag_type);
    let size = data.len() as u32;
    out.extend_from_slice(&size.to_be_bytes()[1..]);
    out.extend_from_slice(&timestamp_ms.to_be_bytes()[1..]);
    out.push((timestamp_ms >> 24) as u8);
    out.extend_from_slice(&0u32.to_be_bytes()[1..]);
    out.extend_from_slice(data);
    out.extend_from_slice(&(data.len() as u32 + 11).to_be_bytes());
    out.freeze()
}

/// Builds the `AVCDecoderConfigurationRecord` (ISO 14496-15) carrying one
/// SPS/PPS pair, the payload of the `AVCPacketType == 0` sequence-header tag.
#[must_use]
pub fn avc_decoder_config(sps: &[u8], pps: &[u8]) -> Bytes {
    let mut out = BytesMut::new();
    out.push(1); // configurationVersion
    out.push(sps.get(1).copied().unwrap_or(0x42)); // AVCProfileIndication
    out.push(sps.get(2).copied().unwrap_or(0)); // profile_compatibility
    out.push(sps.get(3).copied().unwrap_or(0x1f)); // AVCLevelIndication
    out.push(0xff); // reserved | lengthSizeMinusOne = 3
    out.push(0xe1); // reserved | numOfSequenceParameterSets = 1
    out.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    out.extend_from_slice(sps);
    out.push(1); // numOfPictureParameterSets
    out.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    out.extend_from_slice(pps);
    out.freeze()
}

/// `FrameType|CodecID` header plus `AVCPacketType|CompositionTime` followed
/// by 4-byte-length-prefixed NAL units — the `VIDEODATA` tag body for one
/// access unit (§C11's re-muxing of the core's Annex-B-free [`crate::flv`]
/// representation back into AVCC framing).
#[must_use]
pub fn video_tag_body(is_key_frame: bool, nalus: &[bytes::Bytes]) -> Bytes {
    let mut out = BytesMut::new();
    out.push(if is_key_frame { 0x17 } else { 0x27 });
    out.push(1); // AVCPacketType::NALU
    out.extend_from_slice(&[0, 0, 0]); // composition time
    for nalu in nalus {
        out.extend_from_slice(&(nalu.len() as u32).to_be_bytes());
        out.extend_from_slice(nalu);
    }
    out.freeze()
}

#[must_use]
pub fn video_sequence_header_body(sps: &[u8], pps: &[u8]) -> Bytes {
    let mut out = BytesMut::new();
    out.push(0x17);
    out.push(0); // AVCPacketType::SEQUENCE_HEADER
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(&avc_decoder_config(sps, pps));
    out.freeze()
}

#[must_use]
pub fn audio_tag_body(aac_frame: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(aac_frame.len() + 2);
    out.extend_from_slice(&[0xaf, 1]); // AAC, 44kHz/16-bit/stereo placeholder, AACPacketType::RAW
    out.extend_from_slice(aac_frame);
    out.freeze()
}

#[must_use]
pub fn audio_sequence_header_body(audio_specific_config: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(audio_specific_config.len() + 2);
    out.extend_from_slice(&[0xaf, 0]);
    out.extend_from_slice(audio_specific_config);
    out.freeze()
}

pub const TAG_TYPE_AUDIO: u8 = msg_type_id::AUDIO;
pub const TAG_TYPE_VIDEO: u8 = msg_type_id::VIDEO;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_header_sets_audio_and_video_flags() {
        let header = file_header(true, true);
        assert_eq!(&header[0..3], b"FLV");
        assert_eq!(header[4], 0x05);
    }

    #[test]
    fn tag_trailer_matches_tag_length() {
        let tag = write_tag(TAG_TYPE_VIDEO, 0, &[1, 2, 3]);
        let trailer = u32::from_be_bytes(tag[tag.len() - 4..].try_into().unwrap());
        assert_eq!(trailer, 3 + 11);
    }

    #[test]
    fn video_tag_body_marks_key_frames() {
        let body = video_tag_body(true, &[Bytes::from_static(&[1, 2])]);
        assert_eq!(body[0], 0x17);
    }

    #[test]
    fn avc_decoder_config_carries_sps_and_pps() {
        let config = avc_decoder_config(&[0x67, 0x42, 0x00, 0x1f], &[0x68, 0xce]);
        assert_eq!(config[0], 1);
        assert!(config.ends_with(&[0x68, 0xce]));
    }
}
