use std::net::SocketAddr;

/// Failures while decoding an Art-Net frame. Never fatal — the bridge loop
/// logs these at Info and moves on to the next frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame shorter than the Art-Net header ({len} bytes)")]
    TooShort { len: usize },
    #[error("missing \"Art-Net\\0\" literal header")]
    BadHeader,
    #[error("ArtPollReply body truncated ({len} bytes, need at least {needed})")]
    TruncatedPollReply { len: usize, needed: usize },
    #[error("ArtDmx body truncated ({len} bytes, need at least {needed})")]
    TruncatedDmx { len: usize, needed: usize },
    #[error("invalid DMX data: {0}")]
    InvalidDmx(#[from] InvalidDmx),
}

/// `DMXData` invariant violation (length or universe out of range).
#[derive(Debug, thiserror::Error)]
pub enum InvalidDmx {
    #[error("length {length} exceeds maximum of 512 channels")]
    LengthOutOfRange { length: u16 },
    #[error("universe {universe:#x} exceeds maximum of 0x7FFF")]
    UniverseOutOfRange { universe: u16 },
}

/// Non-fatal UDP I/O failure, logged by the caller at the level the error
/// handling design specifies (Warn for read, Error for write).
#[derive(Debug, thiserror::Error)]
pub enum UdpError {
    #[error("read from {0:?} failed: {1}")]
    Read(Option<SocketAddr>, #[source] std::io::Error),
    #[error("write to {0} failed: {1}")]
    Write(SocketAddr, #[source] std::io::Error),
}
