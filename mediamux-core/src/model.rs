//! Data model shared by every component: path names, credentials, access
//! requests, media descriptions and the media-unit sum type.
//!
//! Grounded in the teacher's `streamhub::define` module (`FrameData`/
//! `PacketData`/`SubscriberInfo`/`PublisherInfo`), generalized from RTMP's
//! two-shape (frame/packet) world to the closed, per-codec sum type the
//! design notes call for (§9 "dynamic dispatch on media units").

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A resolved path name plus any regex capture groups picked up while
/// resolving it (see [`crate::path_manager::PathManager::resolve`]).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathCaptures(pub Vec<String>);

impl PathCaptures {
    #[must_use]
    pub fn get(&self, n: usize) -> Option<&str> {
        self.0.get(n.checked_sub(1)?).map(String::as_str)
    }

    /// Substitute `$G1`, `$G2`, ... in `template` with the captured groups.
    #[must_use]
    pub fn substitute(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '$' && template[i + 1..].starts_with('G') {
                let rest = &template[i + 2..];
                let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
                if !digits.is_empty() {
                    if let Ok(n) = digits.parse::<usize>() {
                        if let Some(value) = self.get(n) {
                            out.push_str(value);
                            for _ in 0..(1 + digits.len()) {
                                chars.next();
                            }
                            continue;
                        }
                    }
                }
            }
            out.push(c);
        }
        out
    }
}

/// One of the three credential shapes a `publishUser`/`publishPass`/
/// `readUser`/`readPass` config value can take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(pub String);

impl Credential {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn kind(&self) -> CredentialKind {
        if let Some(rest) = self.0.strip_prefix("sha256:") {
            CredentialKind::Sha256(rest.to_string())
        } else if let Some(rest) = self.0.strip_prefix("argon2:") {
            CredentialKind::Argon2(rest.to_string())
        } else {
            CredentialKind::Plaintext(self.0.clone())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialKind {
    Plaintext(String),
    /// The value after `sha256:`, expected to be `base64(sha256(salt || password))`.
    Sha256(String),
    /// The value after `argon2:`, a full PHC string.
    Argon2(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Rtsp,
    Rtsps,
    Rtmp,
    Rtmps,
    Hls,
    Webrtc,
    Srt,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rtsp => "rtsp",
            Self::Rtsps => "rtsps",
            Self::Rtmp => "rtmp",
            Self::Rtmps => "rtmps",
            Self::Hls => "hls",
            Self::Webrtc => "webrtc",
            Self::Srt => "srt",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Publish,
    Read,
}

/// `{ pathName, query, user, pass, ip, protocol, action, id? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub path_name: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    pub ip: IpAddr,
    pub protocol: Protocol,
    pub action: Action,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// A codec configuration bound to a [`Media`] track.
#[derive(Debug, Clone, PartialEq)]
pub enum Format {
    H264 {
        payload_type: u8,
        clock_rate: u32,
        packetization_mode: u8,
        sps: Option<Bytes>,
        pps: Option<Bytes>,
    },
    H265 {
        payload_type: u8,
        clock_rate: u32,
        vps: Option<Bytes>,
        sps: Option<Bytes>,
        pps: Option<Bytes>,
    },
    Av1 {
        payload_type: u8,
        clock_rate: u32,
        sequence_header: Option<Bytes>,
    },
    Vp8 {
        payload_type: u8,
        clock_rate: u32,
    },
    Vp9 {
        payload_type: u8,
        clock_rate: u32,
    },
    Mpeg4AudioGeneric {
        payload_type: u8,
        clock_rate: u32,
        channel_count: u8,
        config: Option<Bytes>,
    },
    Mpeg4AudioLatm {
        payload_type: u8,
        clock_rate: u32,
        channel_count: u8,
    },
    Mpeg1Or2Audio {
        payload_type: u8,
        clock_rate: u32,
    },
    Opus {
        payload_type: u8,
        clock_rate: u32,
        channel_count: u8,
    },
    GenericRtp {
        payload_type: u8,
        clock_rate: u32,
        encoding_name: String,
    },
}

impl Format {
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::H264 { .. } | Self::H265 { .. } | Self::Av1 { .. } | Self::Vp8 { .. } | Self::Vp9 { .. } => {
                MediaKind::Video
            }
            Self::Mpeg4AudioGeneric { .. }
            | Self::Mpeg4AudioLatm { .. }
            | Self::Mpeg1Or2Audio { .. }
            | Self::Opus { .. } => MediaKind::Audio,
            Self::GenericRtp { .. } => MediaKind::Video,
        }
    }

    #[must_use]
    pub fn payload_type(&self) -> u8 {
        match self {
            Self::H264 { payload_type, .. }
            | Self::H265 { payload_type, .. }
            | Self::Av1 { payload_type, .. }
            | Self::Vp8 { payload_type, .. }
            | Self::Vp9 { payload_type, .. }
            | Self::Mpeg4AudioGeneric { payload_type, .. }
            | Self::Mpeg4AudioLatm { payload_type, .. }
            | Self::Mpeg1Or2Audio { payload_type, .. }
            | Self::Opus { payload_type, .. }
            | Self::GenericRtp { payload_type, .. } => *payload_type,
        }
    }

    #[must_use]
    pub fn requires_key_frame_gating(&self) -> bool {
        matches!(self.kind(), MediaKind::Video)
    }
}

/// A track (video, audio, ...) carrying one or more [`Format`]s — in
/// practice one, since the format processor tracks exactly one negotiated
/// format per track once a publisher connects.
#[derive(Debug, Clone)]
pub struct Media {
    pub kind: MediaKind,
    pub formats: Vec<Format>,
}

/// Ordered list of [`Media`] describing the current publisher.
#[derive(Debug, Clone, Default)]
pub struct MediaDescription {
    pub medias: Vec<Media>,
}

impl MediaDescription {
    #[must_use]
    pub fn new(medias: Vec<Media>) -> Self {
        Self { medias }
    }
}

/// An RTP packet, kept as an opaque byte buffer plus the fields the format
/// processor needs without re-parsing the header.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub marker: bool,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub payload: Bytes,
}

/// One coded access unit (H264/H265 NAL unit, AV1 OBU, AAC access unit, ...).
#[derive(Debug, Clone)]
pub struct AccessUnit {
    pub data: Bytes,
    pub is_key_frame: bool,
}

/// A timestamped packet bundle for one `(media, format)`, carrying RTP
/// packets and/or access units. Per the data model, a unit produced by a
/// driver may start with only one side populated; the format processor
/// fills in whichever side is missing that a currently attached reader
/// needs.
#[derive(Debug, Clone)]
pub struct MediaUnit {
    pub media_index: usize,
    pub pts: Duration,
    pub ntp: Option<std::time::SystemTime>,
    pub rtp_packets: Vec<RtpPacket>,
    pub access_units: Vec<AccessUnit>,
}

impl MediaUnit {
    #[must_use]
    pub fn contains_key_frame(&self) -> bool {
        self.access_units.iter().any(|au| au.is_key_frame)
    }
}

pub type ReaderId = u64;
pub type PublisherId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartyKind {
    Publisher,
    Reader,
    Source,
    Keepalive,
}

/// A handle identifying whoever is attached to a [`crate::path::Path`] —
/// the "open-typed interface per role" from the original source collapsed
/// into one tagged variant at the Path boundary (§9 design note).
#[derive(Debug, Clone)]
pub struct Party {
    pub id: u64,
    pub kind: PartyKind,
    pub created_at: std::time::Instant,
    pub path_name: String,
    pub remote_addr: Option<std::net::SocketAddr>,
}

/// Metadata about the currently attached publisher.
#[derive(Debug, Clone)]
pub struct PublisherHandle {
    pub id: PublisherId,
    pub party: Party,
    pub tracks_len: usize,
}

/// Per-reader statistics exposed through the admin API.
#[derive(Debug, Clone, Default)]
pub struct ReaderStats {
    pub bytes_sent: u64,
    pub units_delivered: u64,
    pub units_dropped: u64,
}

/// A snapshot of the current set of paths, as returned by
/// `GET /v3/paths/list`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PathsListItem {
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub ready: bool,
    pub tracks: Vec<String>,
}

pub type PathsList = HashMap<String, PathsListItem>;
