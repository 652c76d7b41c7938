//! Firmware core for a networked analog data-acquisition node.
//!
//! A microcontroller samples an analog input, keeps every sample that clears
//! a configurable threshold, groups the survivors into fixed-size batches and
//! ships each batch as one UDP datagram to a remote collector. The same UDP
//! socket answers a small request/response control protocol (start/stop,
//! reconfiguration, health pings, status queries).
//!
//! The crate is the portable part of the firmware. Everything that needs a
//! concrete board is reached through narrow seams:
//!
//! - [`time::Clock`]: monotonic time and task delays, provided by the RTOS.
//! - [`drivers::adc::AdcHardware`]: the register-level ADC accesses.
//! - [`drivers::uart::UartHardware`]: the register-level UART accesses.
//! - [`net::stack::IpStack`]: the UDP/IP stack. [`net::iface`] ships a
//!   smoltcp-backed implementation of this seam.
//!
//! The embedding firmware constructs the drivers, calls [`boot::init_node`]
//! and spawns [`net::NetworkTask::run`] and
//! [`acquisition::AcquisitionTask::run`] at the priorities from [`config`].
//! The scheduler itself stays outside the crate.

#![cfg_attr(not(test), no_std)]
#![warn(rust_2018_idioms)]

extern crate alloc;

pub mod acquisition;
pub mod boot;
pub mod config;
pub mod drivers;
mod error;
pub mod fatal;
pub mod logging;
pub mod net;
pub mod protocol;
pub mod state;
pub mod synch;
pub mod time;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::error::{Error, Result};
