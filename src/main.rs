//! BLSD motor controller CLI
//!
//! A command-line interface (CLI) application for interacting with BLSD
//! brushless motor controllers over a serial bus.
//!
//! This tool allows users to:
//! - Query the status word of a controller, once or continuously.
//! - Configure pulses per turn, speed, maximum speed, acceleration, slowdown
//!   and direction.
//! - Start and stop the motor.
//! - Assign a new unit address.
//! - Run a short demonstration sequence.
//!
//! The CLI leverages the `blsd_lib` crate for protocol definitions and client operations.

use anyhow::{Context, Result};
use blsd_lib::tokio_sync_client::Blsd;
use clap::Parser;
use dialoguer::Confirm;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{panic, time::Duration};

mod commandline;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

/// Prints the outcome of a command which is answered with an acknowledgment.
fn print_ack(name: &str, acknowledged: bool) {
    if !acknowledged {
        warn!("{name}: no reply from controller");
    }
    println!("{name} = {acknowledged}");
}

macro_rules! print_state {
    ($client:expr) => {
        let state = $client
            .query_state()
            .with_context(|| "Cannot query state")?;
        println!("State: {}", state);
    };
}

/// Prompts the user for confirmation before the unit address is changed.
fn confirm_assign_address(client: &Blsd, address: blsd_lib::protocol::Address) -> Result<bool> {
    println!(
        "WARNING: The controller at unit {} will be assigned the new address {}.",
        *client.unit(),
        *address
    );
    println!("Subsequent communication must use the new address.");
    Confirm::new()
        .with_prompt("Do you want to continue?")
        .default(false)
        .show_default(true)
        .interact()
        .context("Failed to get user confirmation.")
}

/// Configures the motion parameters, runs the motor for `run_time` and stops it.
fn run_demo(client: &mut Blsd, delay: Duration, run_time: Duration) -> Result<()> {
    let steps: [(&str, fn(&mut Blsd) -> blsd_lib::tokio_common::Result<bool>); 6] = [
        ("set_pulse_per_turn", |c| c.set_pulse_per_turn(255)),
        ("set_speed", |c| c.set_speed(100)),
        ("set_max_speed", |c| c.set_max_speed(250)),
        ("set_acceleration", |c| c.set_acceleration(10)),
        ("set_slowdown", |c| c.set_slowdown(10)),
        ("set_direction", |c| c.set_direction(1)),
    ];
    for (name, step) in steps {
        let acknowledged = step(client).with_context(|| format!("Failed to execute {name}"))?;
        print_ack(name, acknowledged);
        std::thread::sleep(delay);
    }

    print_ack(
        "start_move",
        client.start_move().context("Failed to start the motor")?,
    );
    info!("Running for {run_time:?}");
    std::thread::sleep(run_time);
    print_ack(
        "stop_move",
        client.stop_move().context("Failed to stop the motor")?,
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "BLSD CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    info!(
        "Attempting to open {} (Unit: {}, Baud: {})...",
        args.device, args.unit, args.baud_rate
    );
    let mut client =
        Blsd::open_with_baud_rate(&args.device, args.unit, args.baud_rate, args.timeout)
            .with_context(|| format!("Cannot open serial port {}", args.device))?;
    info!("Connected: {client}");

    match &args.command {
        commandline::CliCommands::State { watch: None } => {
            print_state!(client);
        }
        commandline::CliCommands::State {
            watch: Some(interval),
        } => {
            info!("Polling state every {interval:?}");
            loop {
                print_state!(client);
                std::thread::sleep(args.delay.max(*interval));
            }
        }
        commandline::CliCommands::AssignAddress { address } => {
            if !confirm_assign_address(&client, *address)? {
                info!("Address assignment aborted by user.");
                return Ok(());
            }
            let acknowledged = client
                .assign_address(**address)
                .with_context(|| format!("Failed to assign address {address}"))?;
            print_ack("assign_address", acknowledged);
        }
        commandline::CliCommands::ReleaseAddress => {
            client
                .release_address()
                .context("Failed to release address")?;
            println!("release_address sent");
        }
        commandline::CliCommands::PulsePerTurn { value } => {
            let acknowledged = client
                .set_pulse_per_turn(*value)
                .with_context(|| format!("Failed to set pulses per turn to {value}"))?;
            print_ack("set_pulse_per_turn", acknowledged);
        }
        commandline::CliCommands::Speed { value } => {
            let acknowledged = client
                .set_speed(*value)
                .with_context(|| format!("Failed to set speed to {value}"))?;
            print_ack("set_speed", acknowledged);
        }
        commandline::CliCommands::MaxSpeed { value } => {
            let acknowledged = client
                .set_max_speed(*value)
                .with_context(|| format!("Failed to set max speed to {value}"))?;
            print_ack("set_max_speed", acknowledged);
        }
        commandline::CliCommands::Acceleration { value } => {
            let acknowledged = client
                .set_acceleration(*value)
                .with_context(|| format!("Failed to set acceleration to {value}"))?;
            print_ack("set_acceleration", acknowledged);
        }
        commandline::CliCommands::Slowdown { value } => {
            let acknowledged = client
                .set_slowdown(*value)
                .with_context(|| format!("Failed to set slowdown to {value}"))?;
            print_ack("set_slowdown", acknowledged);
        }
        commandline::CliCommands::Direction { value } => {
            let acknowledged = client
                .set_direction(*value)
                .with_context(|| format!("Failed to set direction to {value}"))?;
            print_ack("set_direction", acknowledged);
        }
        commandline::CliCommands::Start => {
            let acknowledged = client.start_move().context("Failed to start the motor")?;
            print_ack("start_move", acknowledged);
        }
        commandline::CliCommands::Stop => {
            let acknowledged = client.stop_move().context("Failed to stop the motor")?;
            print_ack("stop_move", acknowledged);
        }
        commandline::CliCommands::Demo { run_time } => {
            info!("Executing: Demo sequence");
            run_demo(&mut client, args.delay, *run_time)?;
        }
    }

    client.close().context("Cannot close serial port")?;
    Ok(())
}
