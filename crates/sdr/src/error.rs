// Copyright 2025-2026 CEMAXECUTER LLC

use thiserror::Error;

/// Errors surfaced by the source and its device backends.
///
/// Nothing here is retried internally: every variant is returned to the
/// caller of the configuration call that triggered it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SdrError {
    /// Invalid or unsupported parameter value (spec string, antenna name, clock source)
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Transport-level failure talking to the device
    #[error("hardware communication error: {0}")]
    HardwareCommunication(String),
    /// The device has no way to honor the request
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("channel {chan} out of range (source has {num_channels} channels)")]
    ChannelOutOfRange { chan: usize, num_channels: usize },
}

impl SdrError {
    pub fn config(msg: impl Into<String>) -> Self {
        SdrError::Configuration(msg.into())
    }

    pub fn comm(msg: impl Into<String>) -> Self {
        SdrError::HardwareCommunication(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        SdrError::UnsupportedOperation(msg.into())
    }

    /// True for errors caused by the caller's arguments rather than the device link.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SdrError::Configuration(_) | SdrError::ChannelOutOfRange { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SdrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_error_is_configuration() {
        let err = SdrError::ChannelOutOfRange { chan: 3, num_channels: 2 };
        assert!(err.is_configuration());
        assert_eq!(
            err.to_string(),
            "channel 3 out of range (source has 2 channels)"
        );
        assert!(!SdrError::comm("usb reset").is_configuration());
    }
}
