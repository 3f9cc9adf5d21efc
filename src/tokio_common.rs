//! This module provides common data structures and error types for the
//! `tokio-serial` based clients.
//!
//! It defines the `Error` enum, which encapsulates all possible communication
//! errors, and the serial line settings of the BLSD controller.
use crate::protocol as proto;
use std::time::Duration;

/// Represents all possible errors that can occur while talking to the controller.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wraps `proto::Error`, raised for invalid arguments or undecodable replies.
    #[error(transparent)]
    ProtocolError(#[from] proto::Error),

    /// The serial port could not be opened or configured.
    #[error("Serial port error: {0}")]
    SerialError(#[from] tokio_serial::Error),

    /// Reading, writing or clearing the transport failed.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The client was already closed.
    #[error("Connection already closed")]
    Closed,
}

impl Error {
    /// Returns `true` if an argument was rejected before any I/O took place.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::ProtocolError(err) if err.is_validation())
    }

    /// Returns `true` if the reply could not be decoded.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::ProtocolError(err) if !err.is_validation())
    }

    /// Returns `true` if the transport failed or is closed.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::SerialError(..) | Error::IoError(..) | Error::Closed
        )
    }
}

/// The result type for client operations.
pub type Result<T> = std::result::Result<T, crate::tokio_common::Error>;

/// The baud rate used when none is given.
pub const DEFAULT_BAUD_RATE: u32 = 9600;
/// The read timeout used when none is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// The parity used for serial communication.
pub const PARITY: &tokio_serial::Parity = &tokio_serial::Parity::None;
/// The number of stop bits used for serial communication.
pub const STOP_BITS: &tokio_serial::StopBits = &tokio_serial::StopBits::One;
/// The number of data bits used for serial communication.
pub const DATA_BITS: &tokio_serial::DataBits = &tokio_serial::DataBits::Eight;

/// Creates a `tokio_serial::SerialPortBuilder` with the specified settings.
///
/// # Arguments
///
/// * `device` - The path to the serial port device (e.g., `/dev/ttyUSB0`).
/// * `baud_rate` - The baud rate for the serial communication.
/// * `timeout` - The read timeout.
pub fn serial_port_builder(
    device: &str,
    baud_rate: u32,
    timeout: Duration,
) -> tokio_serial::SerialPortBuilder {
    tokio_serial::new(device, baud_rate)
        .parity(*PARITY)
        .stop_bits(*STOP_BITS)
        .data_bits(*DATA_BITS)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(timeout)
}
