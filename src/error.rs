use thiserror::Error;

/// Errors that can occur when working with a WalkingPad treadmill
#[derive(Error, Debug)]
pub enum WalkingPadError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Device not found during scanning
    #[error("WalkingPad device not found")]
    DeviceNotFound,

    /// Device connection failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// Device disconnected unexpectedly
    #[error("Device disconnected")]
    Disconnected,

    /// Connect or poll timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Invalid command parameters
    #[error("Invalid command parameters: {0}")]
    InvalidParameters(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Frame parsing failed
    #[error("Failed to parse frame: {0}")]
    ParseError(String),

    /// Other errors
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for WalkingPad operations
pub type Result<T> = std::result::Result<T, WalkingPadError>;

impl WalkingPadError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_)
                | Self::ConnectionFailed(_)
                | Self::Disconnected
                | Self::DeviceNotFound
                | Self::Protocol(_)
        )
    }

    /// Check if this error is recovered by the next poll or command
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. }) || self.is_connection_error()
    }
}
