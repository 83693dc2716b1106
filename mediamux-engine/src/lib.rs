//! Wire-protocol driver for the mediamux relay (C11): RTMP ingest/playback,
//! the shared FLV tag codec it reads and writes, an HTTP-FLV egress server,
//! an HLS pull egress (MPEG-TS segmenter + HTTP server), and the pluggable
//! storage backends the segmenter writes into.
//!
//! [`mediamux_core`] owns admission, fan-out and format processing; this
//! crate only translates between a protocol's bytes on the wire and the
//! core's [`mediamux_core::model::MediaUnit`]/[`mediamux_core::model::MediaDescription`]
//! types.

pub mod bytesio;
pub mod flv;
pub mod hls;
pub mod rtmp;
pub mod storage;

pub use rtmp::RtmpServer;
