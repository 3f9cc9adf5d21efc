//! Wire protocol of the BLSD motor controller.
//!
//! Every request is a single frame `[START, unit, command, value?, checksum]`
//! and every reply is a fixed 5 byte frame. The functions in this module are
//! pure: they build request frames, compute the checksum and decode the status
//! reply. The transport handling lives in the client modules.
//!
//! The allowed value of every command is described by a single table, see
//! [`Command::value_spec`].

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// First byte of every request frame.
pub const START_BYTE: u8 = 0xE6;
/// Number of bytes the device answers with.
pub const REPLY_LENGTH: usize = 5;
/// Value sent for commands which carry a mandatory but meaningless parameter.
pub const FIXED_VALUE: u8 = 0;

/// Errors of the pure protocol layer.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The value of a command is outside of its allowed range.
    #[error("{command} value {value} out of range, value must be in range from {min} to {max}")]
    ValueOutOfRange {
        command: Command,
        value: u8,
        min: u8,
        max: u8,
    },

    /// A command which carries a value was issued without one.
    #[error("{0} requires a value")]
    MissingValue(Command),

    /// The unit address is outside of the allowed range.
    #[error("Address {0} out of range, address must be in range from 0 to 254")]
    AddressOutOfRange(u8),

    /// The reply is too short to be decoded.
    #[error("Invalid reply size - required={expected} received={received}")]
    ReplySize { expected: usize, received: usize },
}

impl Error {
    /// Returns `true` if the error was raised by argument validation, before any I/O.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Error::ReplySize { .. })
    }
}

/// Unit address of a controller on the shared bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct Address(u8);

impl Address {
    pub const MIN: Address = Address(0);
    pub const MAX: Address = Address(254);
}

impl Default for Address {
    fn default() -> Self {
        Self::MIN
    }
}

impl std::ops::Deref for Address {
    type Target = u8;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u8> for Address {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (*Self::MIN..=*Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::AddressOutOfRange(value))
        }
    }
}

impl From<Address> for u8 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Commands understood by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Assign a new unit address.
    AssignAddress = 0xA0,
    /// Cancel a pending address assignment.
    ReleaseAddress = 0xA1,
    /// Number of Hall sensor pulses per turn.
    PulsePerTurn = 0xA2,
    /// Speed in turns per second.
    Speed = 0xA3,
    /// Maximum speed in turns per second.
    MaxSpeed = 0xA4,
    Acceleration = 0xA5,
    Slowdown = 0xA6,
    Direction = 0xA7,
    /// Query the status word.
    QueryState = 0x50,
    StartMove = 0x51,
    StopMove = 0x52,
}

/// How the value byte of a command is formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSpec {
    /// The frame carries no value byte.
    None,
    /// The frame always carries this value.
    Fixed(u8),
    /// The frame carries a caller supplied value within `min..=max`.
    Range { min: u8, max: u8 },
}

impl Command {
    pub const ALL: [Command; 11] = [
        Command::AssignAddress,
        Command::ReleaseAddress,
        Command::PulsePerTurn,
        Command::Speed,
        Command::MaxSpeed,
        Command::Acceleration,
        Command::Slowdown,
        Command::Direction,
        Command::QueryState,
        Command::StartMove,
        Command::StopMove,
    ];

    /// The command code on the wire.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// The value policy of this command.
    pub fn value_spec(self) -> ValueSpec {
        match self {
            Command::AssignAddress => ValueSpec::Range {
                min: *Address::MIN,
                max: *Address::MAX,
            },
            Command::PulsePerTurn => ValueSpec::Range { min: 0, max: 255 },
            Command::Speed | Command::MaxSpeed => ValueSpec::Range { min: 0, max: 250 },
            Command::Acceleration | Command::Slowdown => ValueSpec::Range { min: 1, max: 24 },
            Command::Direction => ValueSpec::Range { min: 0, max: 1 },
            Command::ReleaseAddress | Command::StartMove | Command::StopMove => {
                ValueSpec::Fixed(FIXED_VALUE)
            }
            Command::QueryState => ValueSpec::None,
        }
    }

    /// Validates `value` against the value policy and returns the value byte to send.
    ///
    /// For [`ValueSpec::Fixed`] and [`ValueSpec::None`] the given value is ignored.
    pub fn encode_value(self, value: Option<u8>) -> Result<Option<u8>, Error> {
        match self.value_spec() {
            ValueSpec::None => Ok(None),
            ValueSpec::Fixed(fixed) => Ok(Some(fixed)),
            ValueSpec::Range { min, max } => {
                let value = value.ok_or(Error::MissingValue(self))?;
                if (min..=max).contains(&value) {
                    Ok(Some(value))
                } else {
                    Err(Error::ValueOutOfRange {
                        command: self,
                        value,
                        min,
                        max,
                    })
                }
            }
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Command::ALL
            .into_iter()
            .find(|command| command.code() == code)
            .ok_or(code)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::AssignAddress => "Assign address",
            Command::ReleaseAddress => "Release address",
            Command::PulsePerTurn => "Pulse per turn",
            Command::Speed => "Speed",
            Command::MaxSpeed => "Max speed",
            Command::Acceleration => "Acceleration",
            Command::Slowdown => "Slowdown",
            Command::Direction => "Direction",
            Command::QueryState => "Query state",
            Command::StartMove => "Start move",
            Command::StopMove => "Stop move",
        };
        write!(f, "{name} ({:#04x})", self.code())
    }
}

/// Folds one byte into the running checksum.
fn checksum_step(crc: u8, byte: u8) -> u8 {
    (0..8).fold(crc, |crc, i| {
        if (crc ^ (byte >> i)) & 1 != 0 {
            ((crc ^ 0x18) >> 1) | 0x80
        } else {
            crc >> 1
        }
    })
}

/// Calculates the frame checksum over `bytes`.
///
/// The checksum covers the unit, the command and the optional value, but
/// neither the start byte nor the checksum itself.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |crc, byte| checksum_step(crc, *byte))
}

/// Builds a request frame.
///
/// The value is not validated here, see [`Command::encode_value`].
pub fn build_frame(unit: u8, command: u8, value: Option<u8>) -> Vec<u8> {
    let mut frame = Vec::with_capacity(REPLY_LENGTH);
    frame.push(START_BYTE);
    frame.push(unit);
    frame.push(command);
    frame.extend(value);
    frame.push(checksum(&frame[1..]));
    frame
}

/// A macro to read a specific bit from a byte.
macro_rules! read_bit {
    ($byte:expr,$position:expr) => {
        ($byte >> $position) & 1 != 0
    };
}

/// Decoded status word of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StatusWord {
    pub synchro: bool,
    pub overflow: bool,
    pub default: bool,
    /// Current direction of rotation.
    pub direction: bool,
    /// 12 bit turn counter.
    pub turn: u16,
    /// Current speed in turns per second.
    pub speed: u8,
}

impl StatusWord {
    /// Decodes a state query reply. The first byte is the echo byte and ignored.
    pub fn decode(reply: &[u8]) -> Result<Self, Error> {
        if reply.len() < REPLY_LENGTH {
            log::warn!(
                "Invalid reply size - required={} received={}",
                REPLY_LENGTH,
                reply.len()
            );
            return Err(Error::ReplySize {
                expected: REPLY_LENGTH,
                received: reply.len(),
            });
        }
        Ok(Self {
            synchro: read_bit!(reply[1], 7),
            overflow: read_bit!(reply[1], 6),
            default: read_bit!(reply[1], 5),
            direction: read_bit!(reply[1], 4),
            turn: (u16::from(reply[1] & 0x0F) << 8) + u16::from(reply[2]),
            speed: reply[3],
        })
    }
}

impl std::fmt::Display for StatusWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "synchro={}, overflow={}, default={}, direction={}, turn={}, speed={}",
            u8::from(self.synchro),
            u8::from(self.overflow),
            u8::from(self.default),
            u8::from(self.direction),
            self.turn,
            self.speed
        )
    }
}

/// Decodes a state query reply, see [`StatusWord::decode`].
pub fn decode_status(reply: &[u8]) -> Result<StatusWord, Error> {
    StatusWord::decode(reply)
}
