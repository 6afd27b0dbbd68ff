//! Host-side tests for boards running the gadget-zero USB firmware.
//!
//! The device is found by VID/PID and serial number, switched between its
//! configurations, and then exercised through its source/sink interface:
//! bulk writes of assorted sizes into the sink, pattern-checked reads from
//! the source, and vendor requests that pick the source pattern.

use std::time::Duration;

mod bus;
mod descriptor;
pub mod device;
mod error;
pub mod pattern;
pub mod perf;
pub mod source_sink;
pub mod suite;

#[cfg(test)]
mod sim;

pub use bus::Bus;
pub use descriptor::{ConfigLayout, Endpoint, EndpointInfo, EndpointPair, InterfaceLayout};
pub use device::{Gadget, Selector};
pub use error::{Error, ErrorKind, Result};
pub use pattern::Pattern;
pub use source_sink::SourceSink;

pub const GADGET0_VID: u16 = 0xcafe;
pub const GADGET0_PID: u16 = 0xcafe;

/// Serial number of the board used when none is given.
pub const DEFAULT_SERIAL: &str = "stm32f4disco";

/// Timeout for control and ordinary bulk transfers.
pub const TIMEOUT: Duration = Duration::from_millis(1000);
