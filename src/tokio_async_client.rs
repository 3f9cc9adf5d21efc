//! Asynchronous client for the BLSD motor controller.
//!
//! Same command surface as [`crate::tokio_sync_client::Blsd`], but every
//! round-trip is an `async fn`. The reply is awaited for at most the
//! configured timeout.
//!
//! ```no_run
//! use blsd_lib::{protocol::Address, tokio_async_client::Blsd, tokio_common::DEFAULT_TIMEOUT};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Blsd::open("/dev/ttyUSB0", Address::default(), DEFAULT_TIMEOUT)?;
//!     client.set_speed(100).await?;
//!     client.start_move().await?;
//!     println!("State: {}", client.query_state().await?);
//!     client.stop_move().await?;
//!     Ok(())
//! }
//! ```

use crate::{
    protocol as proto,
    tokio_common::{self, Error, Result},
};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// An asynchronous byte stream the client can talk over.
pub trait AsyncTransport: AsyncRead + AsyncWrite + Unpin {
    /// Discards all bytes received but not yet read.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Discards all bytes written but not yet transmitted.
    fn clear_output(&mut self) -> io::Result<()>;

    /// Releases the transport. Called at most once by the client.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncTransport for tokio_serial::SerialStream {
    fn clear_input(&mut self) -> io::Result<()> {
        Ok(tokio_serial::SerialPort::clear(self, tokio_serial::ClearBuffer::Input)?)
    }

    fn clear_output(&mut self) -> io::Result<()> {
        Ok(tokio_serial::SerialPort::clear(self, tokio_serial::ClearBuffer::Output)?)
    }
}

/// Reads up to `len` bytes until the deadline expires.
async fn read_reply<T: AsyncTransport>(
    transport: &mut T,
    len: usize,
    timeout: Duration,
) -> io::Result<Vec<u8>> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut reply = vec![0; len];
    let mut received = 0;
    while received < len {
        match tokio::time::timeout_at(deadline, transport.read(&mut reply[received..])).await {
            Err(_elapsed) => break,
            Ok(Ok(0)) => break,
            Ok(Ok(count)) => received += count,
            Ok(Err(err)) if err.kind() == io::ErrorKind::TimedOut => break,
            Ok(Err(err)) => return Err(err),
        }
    }
    reply.truncate(received);
    Ok(reply)
}

/// Asynchronous client for a single BLSD controller on the bus.
pub struct Blsd<T: AsyncTransport = tokio_serial::SerialStream> {
    port: String,
    unit: proto::Address,
    timeout: Duration,
    transport: Option<T>,
}

impl Blsd {
    /// Opens the serial port `device` with the default baud rate.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(device: &str, unit: proto::Address, timeout: Duration) -> Result<Self> {
        Self::open_with_baud_rate(device, unit, tokio_common::DEFAULT_BAUD_RATE, timeout)
    }

    /// Same as [`Blsd::open`] with an explicit baud rate.
    pub fn open_with_baud_rate(
        device: &str,
        unit: proto::Address,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Self> {
        use tokio_serial::SerialPortBuilderExt;

        let stream =
            tokio_common::serial_port_builder(device, baud_rate, timeout).open_native_async()?;
        log::debug!("Opened {device} at {baud_rate} baud, timeout {timeout:?}");
        Ok(Self::from_transport(device, unit, stream, timeout))
    }
}

impl<T: AsyncTransport> Blsd<T> {
    /// Creates a client over an already opened transport.
    pub fn from_transport(
        port: impl Into<String>,
        unit: proto::Address,
        transport: T,
        timeout: Duration,
    ) -> Self {
        Self {
            port: port.into(),
            unit,
            timeout,
            transport: Some(transport),
        }
    }

    /// The name of the transport.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// The address of the controller this client talks to.
    pub fn unit(&self) -> proto::Address {
        self.unit
    }

    /// The timeout for reading a reply.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sets the timeout for reading a reply.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Returns `false` once the client was closed.
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Releases the transport. Closing an already closed client does nothing.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut transport) = self.transport.take() {
            log::debug!("Closing {}", self.port);
            transport.close()?;
        }
        Ok(())
    }

    /// Sends one frame and reads the reply, see
    /// [`crate::tokio_sync_client::Blsd::exchange`].
    pub async fn exchange(
        &mut self,
        command: proto::Command,
        value: Option<u8>,
    ) -> Result<Vec<u8>> {
        let frame = proto::build_frame(*self.unit, command.code(), value);
        let timeout = self.timeout;
        let transport = self.transport.as_mut().ok_or(Error::Closed)?;

        transport.clear_input()?;
        transport.clear_output()?;

        log::debug!("Send frame = {frame:?}");
        transport.write_all(&frame).await?;
        transport.flush().await?;

        let reply = read_reply(transport, proto::REPLY_LENGTH, timeout).await?;
        log::debug!("Recv frame = {reply:?}");
        Ok(reply)
    }

    async fn send_command(
        &mut self,
        command: proto::Command,
        value: Option<u8>,
    ) -> Result<Vec<u8>> {
        let value = command.encode_value(value)?;
        self.exchange(command, value).await
    }

    async fn send_acknowledged(
        &mut self,
        command: proto::Command,
        value: Option<u8>,
    ) -> Result<bool> {
        Ok(!self.send_command(command, value).await?.is_empty())
    }

    /// Assigns a new address (0 to 254) to the controller.
    pub async fn assign_address(&mut self, address: u8) -> Result<bool> {
        self.send_acknowledged(proto::Command::AssignAddress, Some(address)).await
    }

    /// Cancels a pending address assignment. The reply is ignored.
    pub async fn release_address(&mut self) -> Result<()> {
        self.send_command(proto::Command::ReleaseAddress, None).await?;
        Ok(())
    }

    /// Sets the number of Hall sensor pulses per turn (0 to 255).
    pub async fn set_pulse_per_turn(&mut self, value: u8) -> Result<bool> {
        self.send_acknowledged(proto::Command::PulsePerTurn, Some(value)).await
    }

    /// Sets the speed in turns per second (0 to 250).
    pub async fn set_speed(&mut self, value: u8) -> Result<bool> {
        self.send_acknowledged(proto::Command::Speed, Some(value)).await
    }

    /// Sets the maximum speed in turns per second (0 to 250).
    pub async fn set_max_speed(&mut self, value: u8) -> Result<bool> {
        self.send_acknowledged(proto::Command::MaxSpeed, Some(value)).await
    }

    /// Sets the acceleration (1 to 24).
    pub async fn set_acceleration(&mut self, value: u8) -> Result<bool> {
        self.send_acknowledged(proto::Command::Acceleration, Some(value)).await
    }

    /// Sets the slowdown (1 to 24).
    pub async fn set_slowdown(&mut self, value: u8) -> Result<bool> {
        self.send_acknowledged(proto::Command::Slowdown, Some(value)).await
    }

    /// Sets the direction of rotation (0 or 1).
    pub async fn set_direction(&mut self, value: u8) -> Result<bool> {
        self.send_acknowledged(proto::Command::Direction, Some(value)).await
    }

    /// Queries and decodes the status word.
    pub async fn query_state(&mut self) -> Result<proto::StatusWord> {
        let reply = self.send_command(proto::Command::QueryState, None).await?;
        Ok(proto::decode_status(&reply)?)
    }

    /// Starts the motor.
    pub async fn start_move(&mut self) -> Result<bool> {
        self.send_acknowledged(proto::Command::StartMove, None).await
    }

    /// Stops the motor.
    pub async fn stop_move(&mut self) -> Result<bool> {
        self.send_acknowledged(proto::Command::StopMove, None).await
    }
}

impl<T: AsyncTransport> Drop for Blsd<T> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("Cannot close {}: {err}", self.port);
        }
    }
}

impl<T: AsyncTransport> std::fmt::Display for Blsd<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Blsd(port={}, unit={})", self.port, *self.unit)
    }
}
