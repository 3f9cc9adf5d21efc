use blsd_lib::{protocol as proto, tokio_common};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

fn parse_address(s: &str) -> Result<proto::Address, String> {
    let address_val =
        clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid address format: {e}"))?;
    proto::Address::try_from(address_val).map_err(|e| e.to_string())
}

/// Parses a decimal or hexadecimal value and checks it against the command table.
fn parse_command_value(command: proto::Command, s: &str) -> Result<u8, String> {
    let value = clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid value format: {e}"))?;
    command
        .encode_value(Some(value))
        .map_err(|e| e.to_string())?;
    Ok(value)
}

fn parse_pulse_per_turn(s: &str) -> Result<u8, String> {
    parse_command_value(proto::Command::PulsePerTurn, s)
}

fn parse_speed(s: &str) -> Result<u8, String> {
    parse_command_value(proto::Command::Speed, s)
}

fn parse_max_speed(s: &str) -> Result<u8, String> {
    parse_command_value(proto::Command::MaxSpeed, s)
}

fn parse_acceleration(s: &str) -> Result<u8, String> {
    parse_command_value(proto::Command::Acceleration, s)
}

fn parse_slowdown(s: &str) -> Result<u8, String> {
    parse_command_value(proto::Command::Slowdown, s)
}

/// Accepts `cw` (0), `ccw` (1) or the raw value.
fn parse_direction(s: &str) -> Result<u8, String> {
    match s.to_ascii_lowercase().as_str() {
        "cw" => Ok(0),
        "ccw" => Ok(1),
        _ => parse_command_value(proto::Command::Direction, s),
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Query and display the status word of the controller.
    State {
        /// Keep polling the state at this interval (e.g., "500ms", "2s") until interrupted.
        #[arg(short, long, value_parser = humantime::parse_duration, verbatim_doc_comment)]
        watch: Option<Duration>,
    },

    /// Assign a new unit address to the controller.
    /// **Important:** After changing the address, you must use the new address
    /// for subsequent communication with this controller.
    #[clap(verbatim_doc_comment)]
    AssignAddress {
        /// The new unit address (0 to 254).
        /// Can be specified in decimal or hexadecimal (e.g., "0x00" to "0xFE").
        #[arg(value_parser = parse_address, verbatim_doc_comment)]
        address: proto::Address,
    },

    /// Cancel a pending address assignment.
    ReleaseAddress,

    /// Set the number of Hall sensor pulses per turn (0 to 255).
    PulsePerTurn {
        #[arg(value_parser = parse_pulse_per_turn)]
        value: u8,
    },

    /// Set the speed in turns per second (0 to 250).
    Speed {
        #[arg(value_parser = parse_speed)]
        value: u8,
    },

    /// Set the maximum speed in turns per second (0 to 250).
    MaxSpeed {
        #[arg(value_parser = parse_max_speed)]
        value: u8,
    },

    /// Set the acceleration (1 to 24).
    Acceleration {
        #[arg(value_parser = parse_acceleration)]
        value: u8,
    },

    /// Set the slowdown (1 to 24).
    Slowdown {
        #[arg(value_parser = parse_slowdown)]
        value: u8,
    },

    /// Set the direction of rotation: "cw" or 0, "ccw" or 1.
    Direction {
        #[arg(value_parser = parse_direction)]
        value: u8,
    },

    /// Start the motor.
    Start,

    /// Stop the motor.
    Stop,

    /// Run a demonstration sequence: configure the motion parameters,
    /// start the motor, wait, and stop it again.
    #[clap(verbatim_doc_comment)]
    Demo {
        /// How long the motor runs before it is stopped (e.g., "5s").
        #[arg(long, default_value = "5s", value_parser = humantime::parse_duration, verbatim_doc_comment)]
        run_time: Duration,
    },
}

const fn about_text() -> &'static str {
    "BLSD CLI - Control BLSD brushless motor controllers over a serial bus."
}

#[derive(Parser, Debug)]
#[command(name="blsdctl", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warnings only.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// Serial port device name.
    /// Examples: "/dev/ttyUSB0" (Linux), "COM3" (Windows).
    #[arg(global = true, short, long, default_value_t = default_device_name(), verbatim_doc_comment)]
    pub device: String,

    /// Baud rate for serial communication.
    #[arg(global = true, long, default_value_t = tokio_common::DEFAULT_BAUD_RATE)]
    pub baud_rate: u32,

    /// The unit address of the controller (0 to 254).
    /// Can be specified in decimal or hexadecimal.
    #[arg(global = true, short, long, default_value_t = proto::Address::default(), value_parser = parse_address, verbatim_doc_comment)]
    pub unit: proto::Address,

    /// Timeout for reading a reply.
    /// Examples: "1s", "500ms".
    #[arg(global = true, long, default_value = "1s", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Duration,

    /// Minimum delay between multiple commands sent to the same controller.
    /// Examples: "50ms", "100ms".
    #[arg(global = true, long, default_value = "50ms", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub delay: Duration,

    #[command(subcommand)]
    pub command: CliCommands,
}
