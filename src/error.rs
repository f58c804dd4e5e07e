// ABOUTME: Typed error taxonomy for the framing layer, session driver, and value codec
// ABOUTME: Splits precise per-layer thiserror enums from an anyhow-based alias for the CLI/driver layer

use thiserror::Error;

/// Errors raised while parsing a single frame out of a byte buffer.
///
/// Only the two faults the parser cannot resynchronise past on its own are
/// represented here; everything else (garbage, incomplete frames, EOB runs)
/// is encoded as `Ok(None)` from [`crate::frame::FrameParser::parse`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The byte following a start sentinel did not map to a known command,
    /// or was `EXTENSION`.
    #[error("invalid command byte {byte:#04x} at offset {offset}")]
    InvalidCommand { byte: u8, offset: usize },

    /// CRC verification failed and `ignore_crc_mismatch` was not set.
    #[error("frame CRC mismatch at offset {offset}: received {received:#06x}, computed {computed:#06x}")]
    FrameCRCMismatch {
        received: u16,
        computed: u16,
        offset: usize,
    },
}

/// Errors raised by [`crate::session::SessionReader`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// A frame could not be parsed out of the receive buffer.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The object id in a response frame is not present in the registry.
    #[error("unknown object id {oid:#010x}")]
    InvalidOid { oid: u32 },

    /// The socket receive timed out before a frame (or the requested count
    /// of frames) could be read. The receive buffer is left intact so a
    /// retry resumes parsing the same partial frame.
    #[error("receive timed out")]
    Timeout,

    /// The peer closed the connection (a zero-byte read) while no partial
    /// frame was pending, or mid-frame.
    #[error("remote closed the connection")]
    RemoteClose,

    /// Any other I/O failure (connect refused, reset, etc).
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),
}

/// Errors raised while decoding or encoding a primitive payload.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("payload of {got} bytes is too short to decode {data_type:?} (needs {expected})")]
    TooShort {
        data_type: crate::registry::DataType,
        expected: usize,
        got: usize,
    },

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("cannot encode a value of this type as {0:?}")]
    TypeMismatch(crate::registry::DataType),
}

/// Crate-wide convenience error for the CLI/driver layer, which aggregates
/// I/O errors, [`SessionError`], and [`ParseError`] uniformly. Internal,
/// hot-path code uses the precise enums above instead.
pub type Error = anyhow::Error;

/// Convenience result alias for the CLI/driver layer.
pub type Result<T> = anyhow::Result<T>;
