//! Synchronous client for the BLSD motor controller.
//!
//! The client owns the serial port for its whole lifetime. Every command is a
//! single blocking round-trip: the transport buffers are discarded, the request
//! frame is written and up to [`proto::REPLY_LENGTH`] reply bytes are read
//! within the configured timeout.
//!
//! # Example
//!
//! ```no_run
//! use blsd_lib::{protocol::Address, tokio_common::DEFAULT_TIMEOUT, tokio_sync_client::Blsd};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Blsd::open("/dev/ttyUSB0", Address::try_from(0)?, DEFAULT_TIMEOUT)?;
//!     println!("{client}");
//!
//!     client.set_speed(100)?;
//!     client.start_move()?;
//!     println!("State: {}", client.query_state()?);
//!     client.stop_move()?;
//!     client.close()?;
//!     Ok(())
//! }
//! ```

use crate::{
    protocol as proto,
    tokio_common::{self, Error, Result},
};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// A blocking byte stream the client can talk over.
///
/// Implemented for serial ports opened with `tokio_serial`; other transports
/// (e.g. a TCP to serial gateway or a test double) can implement it as well.
pub trait Transport: Read + Write {
    /// Discards all bytes received but not yet read.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Discards all bytes written but not yet transmitted.
    fn clear_output(&mut self) -> io::Result<()>;

    /// Changes the read timeout.
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    /// Releases the transport. Called at most once by the client.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Reads up to `len` bytes within `timeout`.
    ///
    /// The timeout covers the whole reply: every read is given only the time
    /// left until the deadline. Stops early at end of stream or when the
    /// deadline passes, so a short or empty reply is not an error.
    fn read_reply(&mut self, len: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut reply = vec![0; len];
        let mut received = 0;
        while received < len {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.set_timeout(remaining)?;
            match self.read(&mut reply[received..]) {
                Ok(0) => break,
                Ok(count) => received += count,
                Err(err) if err.kind() == io::ErrorKind::TimedOut => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        reply.truncate(received);
        Ok(reply)
    }
}

impl Transport for Box<dyn tokio_serial::SerialPort> {
    fn clear_input(&mut self) -> io::Result<()> {
        Ok(tokio_serial::SerialPort::clear(&**self, tokio_serial::ClearBuffer::Input)?)
    }

    fn clear_output(&mut self) -> io::Result<()> {
        Ok(tokio_serial::SerialPort::clear(&**self, tokio_serial::ClearBuffer::Output)?)
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        Ok(tokio_serial::SerialPort::set_timeout(&mut **self, timeout)?)
    }
}

/// Synchronous client for a single BLSD controller on the bus.
///
/// The transport is opened on construction and released by [`Blsd::close`]
/// or when the client is dropped, whichever comes first.
pub struct Blsd<T: Transport = Box<dyn tokio_serial::SerialPort>> {
    port: String,
    unit: proto::Address,
    timeout: Duration,
    transport: Option<T>,
}

impl Blsd {
    /// Opens the serial port `device` with the default baud rate and creates a
    /// client for the controller with address `unit`.
    ///
    /// # Errors
    ///
    /// * [`Error::SerialError`] if the serial port cannot be opened.
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
        let port = tokio_common::serial_port_builder(device, baud_rate, timeout).open()?;
        log::debug!("Opened {device} at {baud_rate} baud, timeout {timeout:?}");
        Ok(Self::from_transport(device, unit, port, timeout))
    }
}

impl<T: Transport> Blsd<T> {
    /// Creates a client over an already opened transport.
    ///
    /// # Arguments
    ///
    /// * `port` - Name of the transport, used for display only.
    /// * `unit` - Address of the controller.
    /// * `transport` - The opened transport, owned by the client from now on.
    /// * `timeout` - Time allowed for the whole reply of one exchange.
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

    /// Returns `false` once the client was closed.
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// The timeout for reading a reply.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sets the timeout for reading a reply.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Releases the transport.
    ///
    /// Closing an already closed client does nothing.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut transport) = self.transport.take() {
            log::debug!("Closing {}", self.port);
            transport.close()?;
        }
        Ok(())
    }

    fn transport_mut(&mut self) -> Result<&mut T> {
        self.transport.as_mut().ok_or(Error::Closed)
    }

    /// Sends one frame and reads the reply.
    ///
    /// The value is sent as given, without validation. The reply holds at most
    /// [`proto::REPLY_LENGTH`] bytes; a shorter or empty reply means the device
    /// did not answer in time and is returned as-is.
    ///
    /// # Errors
    ///
    /// * [`Error::Closed`] if the client was closed.
    /// * [`Error::IoError`] if the transport fails.
    pub fn exchange(&mut self, command: proto::Command, value: Option<u8>) -> Result<Vec<u8>> {
        let frame = proto::build_frame(*self.unit, command.code(), value);
        let timeout = self.timeout;
        let transport = self.transport_mut()?;

        transport.clear_input()?;
        transport.clear_output()?;

        log::debug!("Send frame = {frame:?}");
        transport.write_all(&frame)?;
        transport.flush()?;

        let reply = transport.read_reply(proto::REPLY_LENGTH, timeout)?;
        log::debug!("Recv frame = {reply:?}");
        Ok(reply)
    }

    /// Validates the value against the command table, then exchanges the frame.
    fn send_command(&mut self, command: proto::Command, value: Option<u8>) -> Result<Vec<u8>> {
        let value = command.encode_value(value)?;
        self.exchange(command, value)
    }

    /// Like [`Self::send_command`], reporting whether the device acknowledged.
    fn send_acknowledged(&mut self, command: proto::Command, value: Option<u8>) -> Result<bool> {
        Ok(!self.send_command(command, value)?.is_empty())
    }

    /// Assigns a new address (0 to 254) to the controller.
    ///
    /// The client keeps talking to its original unit address.
    ///
    /// # Errors
    ///
    /// * [`Error::ProtocolError`] with [`proto::Error::ValueOutOfRange`] for 255.
    pub fn assign_address(&mut self, address: u8) -> Result<bool> {
        self.send_acknowledged(proto::Command::AssignAddress, Some(address))
    }

    /// Cancels a pending address assignment. The reply is ignored.
    pub fn release_address(&mut self) -> Result<()> {
        self.send_command(proto::Command::ReleaseAddress, None)?;
        Ok(())
    }

    /// Sets the number of Hall sensor pulses per turn (0 to 255).
    pub fn set_pulse_per_turn(&mut self, value: u8) -> Result<bool> {
        self.send_acknowledged(proto::Command::PulsePerTurn, Some(value))
    }

    /// Sets the speed in turns per second (0 to 250).
    pub fn set_speed(&mut self, value: u8) -> Result<bool> {
        self.send_acknowledged(proto::Command::Speed, Some(value))
    }

    /// Sets the maximum speed in turns per second (0 to 250).
    pub fn set_max_speed(&mut self, value: u8) -> Result<bool> {
        self.send_acknowledged(proto::Command::MaxSpeed, Some(value))
    }

    /// Sets the acceleration (1 to 24).
    pub fn set_acceleration(&mut self, value: u8) -> Result<bool> {
        self.send_acknowledged(proto::Command::Acceleration, Some(value))
    }

    /// Sets the slowdown (1 to 24).
    pub fn set_slowdown(&mut self, value: u8) -> Result<bool> {
        self.send_acknowledged(proto::Command::Slowdown, Some(value))
    }

    /// Sets the direction of rotation (0 or 1).
    pub fn set_direction(&mut self, value: u8) -> Result<bool> {
        self.send_acknowledged(proto::Command::Direction, Some(value))
    }

    /// Queries and decodes the status word.
    ///
    /// # Errors
    ///
    /// * [`Error::ProtocolError`] with [`proto::Error::ReplySize`] if the
    ///   device answered with less than 5 bytes.
    pub fn query_state(&mut self) -> Result<proto::StatusWord> {
        let reply = self.send_command(proto::Command::QueryState, None)?;
        Ok(proto::decode_status(&reply)?)
    }

    /// Starts the motor.
    pub fn start_move(&mut self) -> Result<bool> {
        self.send_acknowledged(proto::Command::StartMove, None)
    }

    /// Stops the motor.
    pub fn stop_move(&mut self) -> Result<bool> {
        self.send_acknowledged(proto::Command::StopMove, None)
    }
}

impl<T: Transport> Drop for Blsd<T> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("Cannot close {}: {err}", self.port);
        }
    }
}

impl<T: Transport> std::fmt::Display for Blsd<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Blsd(port={}, unit={})", self.port, *self.unit)
    }
}

impl<T: Transport> std::fmt::Debug for Blsd<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blsd")
            .field("port", &self.port)
            .field("unit", &self.unit)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::cell::RefCell;
    use std::rc::Rc;

    const ACK: [u8; 5] = [0x00, 0x11, 0x22, 0x33, 0x44];

    #[derive(Default)]
    struct StubState {
        reply: Vec<u8>,
        pending: Vec<u8>,
        written: Vec<Vec<u8>>,
        input_cleared: usize,
        output_cleared: usize,
        closed: usize,
    }

    /// Answers every written frame with a canned reply.
    #[derive(Clone, Default)]
    struct Stub(Rc<RefCell<StubState>>);

    impl Stub {
        fn replying(reply: &[u8]) -> Self {
            let stub = Self::default();
            stub.0.borrow_mut().reply = reply.to_vec();
            stub
        }

        fn last_frame(&self) -> Vec<u8> {
            self.0.borrow().written.last().cloned().unwrap_or_default()
        }
    }

    impl Read for Stub {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut state = self.0.borrow_mut();
            if state.pending.is_empty() {
                return Err(io::ErrorKind::TimedOut.into());
            }
            let count = buf.len().min(state.pending.len());
            buf[..count].copy_from_slice(&state.pending[..count]);
            state.pending.drain(..count);
            Ok(count)
        }
    }

    impl Write for Stub {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut state = self.0.borrow_mut();
            state.written.push(buf.to_vec());
            state.pending = state.reply.clone();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for Stub {
        fn clear_input(&mut self) -> io::Result<()> {
            let mut state = self.0.borrow_mut();
            state.pending.clear();
            state.input_cleared += 1;
            Ok(())
        }

        fn clear_output(&mut self) -> io::Result<()> {
            self.0.borrow_mut().output_cleared += 1;
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            self.0.borrow_mut().closed += 1;
            Ok(())
        }
    }

    fn stub_client(stub: &Stub) -> Blsd<Stub> {
        Blsd::from_transport(
            "stub",
            proto::Address::try_from(3).unwrap(),
            stub.clone(),
            Duration::from_millis(200),
        )
    }

    #[test]
    fn display() {
        let stub = Stub::default();
        assert_eq!(stub_client(&stub).to_string(), "Blsd(port=stub, unit=3)");
    }

    #[test]
    fn exchange_writes_frame_and_reads_reply() {
        let stub = Stub::replying(&ACK);
        let mut client = stub_client(&stub);
        let reply = client.exchange(proto::Command::Speed, Some(100)).unwrap();
        assert_eq!(reply, ACK);
        assert_eq!(stub.last_frame(), proto::build_frame(3, 0xA3, Some(100)));
        let state = stub.0.borrow();
        assert_eq!(state.input_cleared, 1);
        assert_eq!(state.output_cleared, 1);
    }

    #[test]
    fn exchange_discards_stale_input() {
        let stub = Stub::replying(&ACK);
        stub.0.borrow_mut().pending = vec![0xDE, 0xAD];
        let mut client = stub_client(&stub);
        assert_eq!(client.exchange(proto::Command::StartMove, Some(0)).unwrap(), ACK);
    }

    #[test]
    fn exchange_short_reply_is_not_an_error() {
        let stub = Stub::replying(&[0x01, 0x02]);
        let mut client = stub_client(&stub);
        assert_eq!(
            client.exchange(proto::Command::QueryState, None).unwrap(),
            vec![0x01, 0x02]
        );

        let stub = Stub::default();
        let mut client = stub_client(&stub);
        assert!(client.exchange(proto::Command::QueryState, None).unwrap().is_empty());
    }

    #[test]
    fn setters_acknowledged() {
        let stub = Stub::replying(&ACK);
        let mut client = stub_client(&stub);
        assert!(client.assign_address(10).unwrap());
        assert!(client.set_pulse_per_turn(255).unwrap());
        assert!(client.set_speed(100).unwrap());
        assert!(client.set_max_speed(250).unwrap());
        assert!(client.set_acceleration(10).unwrap());
        assert!(client.set_slowdown(10).unwrap());
        assert!(client.set_direction(1).unwrap());
        assert!(client.start_move().unwrap());
        assert!(client.stop_move().unwrap());
        client.release_address().unwrap();
        assert_eq!(stub.0.borrow().written.len(), 10);
    }

    #[test]
    fn setters_not_acknowledged() {
        let stub = Stub::default();
        let mut client = stub_client(&stub);
        assert!(!client.assign_address(10).unwrap());
        assert!(!client.set_pulse_per_turn(0).unwrap());
        assert!(!client.set_speed(0).unwrap());
        assert!(!client.set_max_speed(0).unwrap());
        assert!(!client.set_acceleration(1).unwrap());
        assert!(!client.set_slowdown(1).unwrap());
        assert!(!client.set_direction(0).unwrap());
        assert!(!client.start_move().unwrap());
        assert!(!client.stop_move().unwrap());
        client.release_address().unwrap();
    }

    #[test]
    fn setter_boundaries() {
        let stub = Stub::replying(&ACK);
        let mut client = stub_client(&stub);

        assert!(client.set_speed(250).unwrap());
        assert_matches!(
            client.set_speed(251),
            Err(Error::ProtocolError(proto::Error::ValueOutOfRange { value: 251, .. }))
        );
        assert!(client.set_max_speed(0).unwrap());
        assert!(client.set_max_speed(250).unwrap());
        assert!(client.set_max_speed(251).unwrap_err().is_validation());
        assert!(client.set_acceleration(1).unwrap());
        assert!(client.set_acceleration(24).unwrap());
        assert!(client.set_acceleration(0).unwrap_err().is_validation());
        assert!(client.set_acceleration(25).unwrap_err().is_validation());
        assert!(client.set_slowdown(1).unwrap());
        assert!(client.set_slowdown(24).unwrap());
        assert!(client.set_slowdown(0).unwrap_err().is_validation());
        assert!(client.set_slowdown(25).unwrap_err().is_validation());
        assert!(client.set_direction(0).unwrap());
        assert!(client.set_direction(1).unwrap());
        assert!(client.set_direction(2).unwrap_err().is_validation());
        assert!(client.assign_address(0).unwrap());
        assert!(client.assign_address(254).unwrap());
        assert!(client.assign_address(255).unwrap_err().is_validation());
        assert!(client.set_pulse_per_turn(0).unwrap());
        assert!(client.set_pulse_per_turn(255).unwrap());
    }

    #[test]
    fn validation_happens_before_io() {
        let stub = Stub::replying(&ACK);
        let mut client = stub_client(&stub);
        assert!(client.set_direction(7).is_err());
        let state = stub.0.borrow();
        assert!(state.written.is_empty());
        assert_eq!(state.input_cleared, 0);
    }

    #[test]
    fn fixed_value_commands_send_zero() {
        let stub = Stub::replying(&ACK);
        let mut client = stub_client(&stub);

        client.release_address().unwrap();
        assert_eq!(stub.last_frame(), proto::build_frame(3, 0xA1, Some(0)));
        client.start_move().unwrap();
        assert_eq!(stub.last_frame(), proto::build_frame(3, 0x51, Some(0)));
        client.set_speed(99).unwrap();
        client.stop_move().unwrap();
        assert_eq!(stub.last_frame(), proto::build_frame(3, 0x52, Some(0)));
    }

    #[test]
    fn query_state_decodes_reply() {
        let stub = Stub::replying(&[0x00, 0b1011_0101, 0x02, 0x64, 0x00]);
        let mut client = stub_client(&stub);
        let status = client.query_state().unwrap();
        assert_eq!(stub.last_frame(), proto::build_frame(3, 0x50, None));
        assert_eq!(stub.last_frame().len(), 4);
        assert!(status.synchro);
        assert!(!status.overflow);
        assert_eq!(status.turn, 1282);
        assert_eq!(status.speed, 100);
    }

    #[test]
    fn query_state_without_reply() {
        let stub = Stub::default();
        let mut client = stub_client(&stub);
        let err = client.query_state().unwrap_err();
        assert!(err.is_protocol());
        assert_matches!(
            err,
            Error::ProtocolError(proto::Error::ReplySize { received: 0, .. })
        );
    }

    #[test]
    fn close_is_idempotent() {
        let stub = Stub::replying(&ACK);
        {
            let mut client = stub_client(&stub);
            client.close().unwrap();
            client.close().unwrap();
            assert!(!client.is_open());
            assert_matches!(client.start_move(), Err(Error::Closed));
        }
        assert_eq!(stub.0.borrow().closed, 1);
    }

    #[test]
    fn drop_closes_transport() {
        let stub = Stub::replying(&ACK);
        drop(stub_client(&stub));
        assert_eq!(stub.0.borrow().closed, 1);
    }

    /// Sends one byte per `interval`, honouring the read timeout like a serial port.
    struct Trickle {
        interval: Duration,
        timeout: Duration,
        remaining: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 || self.interval > self.timeout {
                std::thread::sleep(self.timeout);
                return Err(io::ErrorKind::TimedOut.into());
            }
            std::thread::sleep(self.interval);
            self.remaining -= 1;
            buf[0] = 0xAA;
            Ok(1)
        }
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for Trickle {
        fn clear_input(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn clear_output(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
            self.timeout = timeout;
            Ok(())
        }
    }

    #[test]
    fn timeout_bounds_whole_reply() {
        let trickle = Trickle {
            interval: Duration::from_millis(150),
            timeout: Duration::from_secs(10),
            remaining: proto::REPLY_LENGTH,
        };
        let timeout = Duration::from_millis(200);
        let mut client =
            Blsd::from_transport("trickle", proto::Address::default(), trickle, timeout);

        let started = Instant::now();
        let reply = client.exchange(proto::Command::QueryState, None).unwrap();
        let elapsed = started.elapsed();

        assert_eq!(reply, vec![0xAA]);
        assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
    }

    #[test]
    fn timeout_accessor() {
        let stub = Stub::default();
        let mut client = stub_client(&stub);
        assert_eq!(client.timeout(), Duration::from_millis(200));
        client.set_timeout(Duration::from_secs(2));
        assert_eq!(client.timeout(), Duration::from_secs(2));
    }

    #[test]
    fn open_missing_port_fails() {
        let err = Blsd::open(
            "/dev/blsd-port-does-not-exist",
            proto::Address::default(),
            tokio_common::DEFAULT_TIMEOUT,
        )
        .unwrap_err();
        assert!(err.is_transport());
        assert_matches!(err, Error::SerialError(..));
    }
}
