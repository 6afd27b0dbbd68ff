use rusb::Direction;

use crate::pattern::Mismatch;

/// Coarse classification of a failure, used by the test cases to tell an
/// expected stall or timeout apart from everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Device or configuration could not be located.
    Setup,
    /// The device answered with a STALL handshake.
    Stall,
    /// The host stack gave up waiting for the transfer.
    Timeout,
    /// Any other host stack failure.
    Transport,
    /// The transfer completed but moved or carried the wrong bytes.
    Data,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no device {vendor_id:04x}:{product_id:04x} with serial {serial:?}")]
    NotFound {
        vendor_id: u16,
        product_id: u16,
        serial: String,
    },

    #[error("configuration {0} is not declared by the device")]
    MissingConfiguration(u8),

    #[error("configuration {configuration} has no interface {interface}")]
    MissingInterface { configuration: u8, interface: u8 },

    #[error("interface {interface} of configuration {configuration} has no bulk {direction:?} endpoint")]
    MissingEndpoint {
        configuration: u8,
        interface: u8,
        direction: Direction,
    },

    #[error("transfer moved {actual} bytes, expected {expected}")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("source data: {0}")]
    Mismatch(#[from] Mismatch),

    #[error("usb error: {0}")]
    Usb(#[from] rusb::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. }
            | Error::MissingConfiguration(_)
            | Error::MissingInterface { .. }
            | Error::MissingEndpoint { .. } => ErrorKind::Setup,
            Error::ShortTransfer { .. } | Error::Mismatch(_) => ErrorKind::Data,
            Error::Usb(rusb::Error::Pipe) => ErrorKind::Stall,
            Error::Usb(rusb::Error::Timeout) => ErrorKind::Timeout,
            Error::Usb(_) => ErrorKind::Transport,
        }
    }

    pub fn is_stall(&self) -> bool {
        self.kind() == ErrorKind::Stall
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}
