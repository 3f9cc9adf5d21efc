//! A library for controlling the BLSD brushless motor controller over a serial bus.
//!
//! The controller speaks a small binary protocol: every request is a frame
//! `[0xE6, unit, command, value?, checksum]` addressed to one unit on the bus,
//! and every reply is 5 bytes long.
//!
//! This crate provides:
//!
//! 1.  **Protocol Implementation**: Frame building, the checksum and the
//!     status word decoder in [`protocol`]. These functions are pure and do no I/O.
//!
//! 2.  **Clients**: A client owns the serial port and exposes one method per
//!     device command. See [`tokio_sync_client::Blsd`] (blocking) and
//!     [`tokio_async_client::Blsd`] (`async`).
//!
//! Frames are logged with the [`log`] crate at debug level. Without a logger
//! installed nothing is emitted.
//!
//! The blocking client is enabled by the `tokio-serial-sync` feature (part of
//! the default features). The async client needs `tokio-serial-async`, which
//! is not a default feature, so run `cargo test --all-features` to include
//! its tests.
//!
//! ## Quick Start
//!
//! ```no_run
//! use blsd_lib::{protocol::Address, tokio_common::DEFAULT_TIMEOUT, tokio_sync_client::Blsd};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Blsd::open("/dev/ttyUSB0", Address::try_from(0)?, DEFAULT_TIMEOUT)?;
//!
//!     println!("set_speed = {}", client.set_speed(100)?);
//!     println!("start_move = {}", client.start_move()?);
//!     println!("state = {}", client.query_state()?);
//!     println!("stop_move = {}", client.stop_move()?);
//!
//!     Ok(())
//! }
//! ```

pub mod protocol;

#[cfg(any(feature = "tokio-serial-sync", feature = "tokio-serial-async"))]
pub mod tokio_common;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-serial-sync")))]
#[cfg(feature = "tokio-serial-sync")]
pub mod tokio_sync_client;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-serial-async")))]
#[cfg(feature = "tokio-serial-async")]
pub mod tokio_async_client;
