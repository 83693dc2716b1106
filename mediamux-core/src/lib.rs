//! Path manager, per-path state machine, stream fan-out engine and
//! authentication gate for the mediamux relay (C1-C8).
//!
//! Everything a wire-protocol driver (RTSP/RTMP/SRT/WebRTC/HLS, in
//! `mediamux-engine` or elsewhere) needs to admit a publisher or reader
//! lives behind [`path_manager::PathManager`]; once admitted, drivers talk
//! to [`stream::Stream`] directly for media transfer.

pub mod auth;
pub mod config;
pub mod error;
pub mod format;
pub mod hooks;
pub mod keepalive;
pub mod model;
pub mod ondemand;
pub mod path;
pub mod path_manager;
pub mod stream;
pub mod util;

pub use config::{GlobalConfig, PathConfig, RelayConfig};
pub use error::{AuthFailure, ConfigError, FormatError, HookError, OnDemandError, PathError, StreamError};
pub use model::{
    AccessRequest, Action, Credential, Format as MediaFormat, Media, MediaDescription, MediaKind,
    MediaUnit, Protocol, PublisherId, ReaderId,
};
pub use path::{Path, PathState};
pub use path_manager::PathManager;
pub use stream::Stream;
