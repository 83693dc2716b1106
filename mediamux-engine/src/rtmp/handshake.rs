//! RTMP handshake (plain, unencrypted C0/C1/C2 <-> S0/S1/S2).
//!
//! Grounded in the teacher's `rtmp::handshake` module; the digest/HMAC
//! "complex handshake" used by some legacy encoders is not implemented — we
//! accept the simple handshake only, which every modern RTMP publisher
//! (OBS, ffmpeg) falls back to when the server doesn't challenge it.

use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::errors::{HandshakeError, HandshakeErrorValue};

const RTMP_VERSION: u8 = 3;
const HANDSHAKE_SIZE: usize = 1536;

/// Runs the server side of the handshake over `io`. On success the
/// connection is ready for chunk stream traffic.
pub async fn server_handshake<IO>(io: &mut IO) -> Result<(), HandshakeError>
where
    IO: AsyncReadExt + AsyncWriteExt + Unpin,
{
    let mut c0 = [0u8; 1];
    io.read_exact(&mut c0).await?;
    if c0[0] != RTMP_VERSION {
        return Err(HandshakeError(HandshakeErrorValue::UnsupportedVersion(c0[0])));
    }

    let mut c1 = [0u8; HANDSHAKE_SIZE];
    io.read_exact(&mut c1).await?;

    let mut s0s1s2 = Vec::with_capacity(1 + HANDSHAKE_SIZE * 2);
    s0s1s2.push(RTMP_VERSION);

    let mut s1 = [0u8; HANDSHAKE_SIZE];
    s1[0..4].copy_from_slice(&0u32.to_be_bytes());
    s1[4..8].copy_from_slice(&0u32.to_be_bytes());
    rand::thread_rng().fill_bytes(&mut s1[8..]);
    s0s1s2.extend_from_slice(&s1);

    // S2 echoes C1 back verbatim, which every simple-handshake client
    // accepts regardless of what we put in the timestamp/random fields.
    s0s1s2.extend_from_slice(&c1);

    io.write_all(&s0s1s2).await?;
    io.flush().await?;

    let mut c2 = [0u8; HANDSHAKE_SIZE];
    io.read_exact(&mut c2).await?;

    Ok(())
}
