//! FLV/RTMP tag-body constants (ISO 14496-12 style AVC packaging as used by
//! RTMP `Video`/`Audio` messages). Grounded in the teacher's
//! `flv::define` module naming (`tag_type`, `avc_packet_type`,
//! `aac_packet_type`, `AvcCodecId`, `SoundFormat`).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcCodecId {
    H264,
    H265,
    Unknown(u8),
}

impl AvcCodecId {
    #[must_use]
    pub fn from_u8(v: u8) -> Self {
        match v {
            7 => Self::H264,
            12 => Self::H265,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundFormat {
    Aac,
    Mp3,
    Other(u8),
}

impl SoundFormat {
    #[must_use]
    pub fn from_u8(v: u8) -> Self {
        match v {
            10 => Self::Aac,
            2 | 14 => Self::Mp3,
            other => Self::Other(other),
        }
    }
}

pub mod avc_packet_type {
    pub const SEQUENCE_HEADER: u8 = 0;
    pub const NALU: u8 = 1;
    pub const END_OF_SEQUENCE: u8 = 2;
}

pub mod aac_packet_type {
    pub const SEQUENCE_HEADER: u8 = 0;
    pub const RAW: u8 = 1;
}

pub mod frame_type {
    pub const KEY_FRAME: u8 = 1;
    pub const INTER_FRAME: u8 = 2;
}

pub mod msg_type_id {
    pub const AUDIO: u8 = 8;
    pub const VIDEO: u8 = 9;
    pub const DATA_AMF0: u8 = 18;
    pub const SET_CHUNK_SIZE: u8 = 1;
    pub const WINDOW_ACK_SIZE: u8 = 5;
    pub const SET_PEER_BANDWIDTH: u8 = 6;
    pub const COMMAND_AMF0: u8 = 20;
    pub const USER_CONTROL: u8 = 4;
}
