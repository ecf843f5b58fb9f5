use thiserror::Error;

/// Errors that can occur when talking to a swim machine
#[derive(Error, Debug)]
pub enum PoolError {
    /// Socket level failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet does not have the length its format requires
    #[error("Invalid packet length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Required length in bytes
        expected: usize,
        /// Length actually received
        got: usize,
    },

    /// Packet does not start with the 0x0A 0xF0 magic header
    #[error("Invalid magic header: {0:02X?}")]
    BadMagic([u8; 2]),

    /// Stored checksum disagrees with the computed one
    #[error("CRC mismatch: expected {expected:08X}, got {got:08X}")]
    ChecksumMismatch {
        /// Checksum stored in the packet
        expected: u32,
        /// Checksum computed over the packet body
        got: u32,
    },

    /// Command packet trailer constant is wrong
    #[error("Invalid command constant: {0}")]
    BadConstant(u32),

    /// Command byte does not name a known command
    #[error("Unknown command kind: {0:02X}")]
    UnknownCommand(u8),

    /// Invalid caller supplied parameters
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Telemetry listener is no longer running
    #[error("Telemetry listener stopped")]
    ListenerStopped,

    /// Internal channel closed
    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

impl PoolError {
    /// Check if this error means a received packet was rejected by the codec
    #[must_use]
    pub const fn is_packet_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidLength { .. }
                | Self::BadMagic(_)
                | Self::ChecksumMismatch { .. }
                | Self::BadConstant(_)
                | Self::UnknownCommand(_)
        )
    }

    /// Check if retrying the operation may succeed
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
