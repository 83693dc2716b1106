//! HLS pull egress: MPEG-TS remuxing, sliding-window segmenter, and the HTTP
//! server that serves the playlist/segments — the C11 HLS half alongside
//! [`crate::rtmp`].

pub mod http;
pub mod segmenter;
pub mod ts;

pub use http::{router, HlsHttpState};
pub use segmenter::HlsMuxer;
