pub mod chunk;
pub mod errors;
pub mod handshake;
pub mod registry;
pub mod session;

pub use registry::{ConnectionInfo, ConnectionRegistry};
pub use session::RtmpServer;
