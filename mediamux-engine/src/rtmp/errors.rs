use crate::bytesio::bytes_errors::{BytesReadError, BytesWriteError};
use crate::flv::amf0::errors::{Amf0ReadError, Amf0WriteError};
use crate::flv::errors::TagParseError;

#[derive(Debug, thiserror::Error)]
pub enum ChunkReadErrorValue {
    #[error("bytes read error: {0}")]
    BytesReadError(#[source] BytesReadError),
    #[error("chunk stream id {0} exceeds the 65599 basic-header limit")]
    StreamIdOutOfRange(u32),
    #[error("message length {0} exceeds the configured maximum")]
    MessageTooLarge(usize),
    #[error("unknown chunk type {0}")]
    UnknownChunkType(u8),
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ChunkReadError(#[from] pub ChunkReadErrorValue);

impl From<BytesReadError> for ChunkReadError {
    fn from(error: BytesReadError) -> Self {
        Self(ChunkReadErrorValue::BytesReadError(error))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChunkWriteErrorValue {
    #[error("bytes write error: {0}")]
    BytesWriteError(#[source] BytesWriteError),
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ChunkWriteError(#[from] pub ChunkWriteErrorValue);

impl From<BytesWriteError> for ChunkWriteError {
    fn from(error: BytesWriteError) -> Self {
        Self(ChunkWriteErrorValue::BytesWriteError(error))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeErrorValue {
    #[error("peer sent an unsupported handshake version {0}")]
    UnsupportedVersion(u8),
    #[error("io error: {0}")]
    Io(#[source] std::io::Error),
    #[error("connection closed during handshake")]
    ConnectionClosed,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandshakeError(#[from] pub HandshakeErrorValue);

impl From<std::io::Error> for HandshakeError {
    fn from(error: std::io::Error) -> Self {
        Self(HandshakeErrorValue::Io(error))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionErrorValue {
    #[error("io error: {0}")]
    Io(#[source] std::io::Error),
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("chunk stream error: {0}")]
    Chunk(#[from] ChunkReadError),
    #[error("chunk write error: {0}")]
    ChunkWrite(#[from] ChunkWriteError),
    #[error("amf0 decode error: {0}")]
    Amf0Read(#[from] Amf0ReadError),
    #[error("amf0 encode error: {0}")]
    Amf0Write(#[from] Amf0WriteError),
    #[error("flv tag parse error: {0}")]
    TagParse(#[from] TagParseError),
    #[error("peer did not send connect before {0}")]
    MissingConnect(&'static str),
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),
    #[error("core path error: {0}")]
    Path(#[from] mediamux_core::error::PathError),
    #[error("core auth failure: {0:?}")]
    Auth(mediamux_core::error::AuthFailure),
    #[error("peer disconnected")]
    Disconnected,
    #[error("publisher was evicted by an overriding publish or path close")]
    PublisherEvicted,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SessionError(#[from] pub SessionErrorValue);

impl From<std::io::Error> for SessionError {
    fn from(error: std::io::Error) -> Self {
        Self(SessionErrorValue::Io(error))
    }
}

impl From<HandshakeError> for SessionError {
    fn from(error: HandshakeError) -> Self {
        Self(SessionErrorValue::Handshake(error))
    }
}

impl From<ChunkReadError> for SessionError {
    fn from(error: ChunkReadError) -> Self {
        Self(SessionErrorValue::Chunk(error))
    }
}

impl From<ChunkWriteError> for SessionError {
    fn from(error: ChunkWriteError) -> Self {
        Self(SessionErrorValue::ChunkWrite(error))
    }
}

impl From<Amf0ReadError> for SessionError {
    fn from(error: Amf0ReadError) -> Self {
        Self(SessionErrorValue::Amf0Read(error))
    }
}

impl From<Amf0WriteError> for SessionError {
    fn from(error: Amf0WriteError) -> Self {
        Self(SessionErrorValue::Amf0Write(error))
    }
}

impl From<TagParseError> for SessionError {
    fn from(error: TagParseError) -> Self {
        Self(SessionErrorValue::TagParse(error))
    }
}

impl From<mediamux_core::error::PathError> for SessionError {
    fn from(error: mediamux_core::error::PathError) -> Self {
        Self(SessionErrorValue::Path(error))
    }
}
