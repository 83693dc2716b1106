//! Minimal byte-cursor helpers used by the RTMP chunk/AMF0 readers below.
//!
//! Grounded in the teacher's `bytesio` error taxonomy (`bytes_errors`,
//! `bytesio_errors`, `bits_errors`); the reader/writer themselves are a
//! compact, from-scratch pair built directly on `bytes::{Buf, BufMut}`
//! rather than the teacher's own reader/writer structs, which weren't part
//! of the retrieved sample for this exercise.

pub mod bits_errors;
pub mod bytes_errors;
pub mod bytesio_errors;
pub mod reader;
pub mod writer;

pub use reader::BytesReader;
pub use writer::BytesWriter;
