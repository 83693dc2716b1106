//! Typed error variants for the relay core.
//!
//! Mirrors the error-handling design: each variant here corresponds to a row
//! in the error-kind table — `AuthNotCritical`/`AuthCritical` carry enough
//! information for a driver to answer the client, the rest are plain
//! `thiserror` leaves that drivers translate into protocol-specific replies.

use std::net::IpAddr;

use thiserror::Error;

/// Failure returned by [`crate::auth::authenticate`].
#[derive(Debug, Error)]
pub enum AuthFailure {
    /// Reply with the carried response and keep the connection open — the
    /// client may retry with credentials (RTSP digest/basic challenge, first
    /// bad attempt).
    #[error("authentication required: {response}")]
    NotCritical { response: String },
    /// Reply with the carried response, then close after the anti-brute
    /// force sleep.
    #[error("authentication rejected: {message}")]
    Critical { response: String, message: String },
}

impl AuthFailure {
    #[must_use]
    pub fn response(&self) -> &str {
        match self {
            Self::NotCritical { response } | Self::Critical { response, .. } => response,
        }
    }
}

/// Errors raised while admitting a publisher or reader into a [`crate::path::Path`].
#[derive(Debug, Error)]
pub enum PathError {
    #[error(transparent)]
    Auth(#[from] AuthFailure),
    #[error("a publisher is already active on this path")]
    PublisherExists,
    #[error("no publisher and no source configured for this path")]
    NoOnePublishing,
    #[error("path is shutting down")]
    Terminated,
    #[error("reader limit ({max}) reached for this path")]
    ReaderLimitReached { max: usize },
    #[error("timed out waiting for on-demand source to become ready")]
    SourceStartTimeout,
    #[error("redirect to fallback: {0}")]
    Fallback(String),
    #[error("path manager is shutting down")]
    ManagerClosed,
    #[error("unknown path: {0}")]
    UnknownPath(String),
}

/// Errors raised by the fan-out engine (C2).
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("reader {0} is not attached to this stream")]
    UnknownReader(u64),
    #[error("reader queue overflowed, reader evicted")]
    SlowReader,
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("stream already closed")]
    Closed,
}

/// Errors raised by the per-codec format processor (C3). Per the error
/// table, these are logged and the offending unit is dropped — they never
/// terminate the stream.
#[derive(Debug, Error, Clone)]
pub enum FormatError {
    #[error("payload of {size} bytes exceeds the maximum RTP packet size of {max}")]
    PacketTooLarge { size: usize, max: usize },
    #[error("undecodable access unit: {0}")]
    Undecodable(String),
    #[error("no parameter sets (SPS/PPS) tracked yet for this format")]
    MissingParameterSets,
    #[error("unsupported codec for this operation: {0}")]
    UnsupportedCodec(String),
}

/// Errors raised while loading or applying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("invalid path pattern {name:?}: {reason}")]
    InvalidPathPattern { name: String, reason: String },
    #[error("duplicate path name: {0}")]
    DuplicatePath(String),
    #[error("invalid listen address {addr:?} for {field}: {source}")]
    InvalidAddress {
        field: String,
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },
}

/// Errors raised by the hooks dispatcher (C7).
#[derive(Debug, Error)]
pub enum HookError {
    #[error("failed to spawn hook command {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("hook command {command:?} exited with non-zero status {code}")]
    NonZeroExit { command: String, code: i32 },
}

/// Errors raised by the on-demand controller (C6).
#[derive(Debug, Error)]
pub enum OnDemandError {
    #[error("source url blocked by network policy: {0}")]
    BlockedAddress(IpAddr),
    #[error("source url could not be parsed: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error("upstream source is gone: {0}")]
    UpstreamGone(String),
    /// `source:` names a bare pull URL with no `runOnDemand` command and no
    /// `redirect://` prefix. Dialing an upstream URL directly has no driver
    /// behind it in this relay (see DESIGN.md); configure `runOnDemand` to
    /// shell out to a puller instead.
    #[error("path has no runOnDemand command configured for pull source: {0}")]
    PullNotSupported(String),
}
