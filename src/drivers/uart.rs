//! Logging UART with interrupt-driven transmission.

use crate::config;
use crate::error::{Error, Result};
use crate::logging::LineSink;
use crate::synch::Semaphore;
use crate::time::Clock;

/// Register-level UART accesses, implemented by the board crate.
pub trait UartHardware: Send + Sync {
	/// Apply pin muxing, clocking and the given baud rate.
	fn configure(&self, baud: u32);

	/// Begin an interrupt-driven transmission of `bytes`. Completion is
	/// reported through the TX interrupt.
	fn start_transmit(&self, bytes: &[u8]);

	/// Push `bytes` out by polling, with interrupts ignored. Reserved for
	/// the fatal path.
	fn write_blocking(&self, bytes: &[u8]);
}

/// One transmission in flight at a time; the completion interrupt releases
/// the semaphore and the sender blocks on it, so `bytes` stays alive for
/// the whole transfer.
pub struct UartDriver<H: UartHardware> {
	hardware: H,
	tx_done: Semaphore,
	clock: &'static dyn Clock,
}

impl<H: UartHardware> UartDriver<H> {
	pub fn new(hardware: H, clock: &'static dyn Clock) -> Self {
		hardware.configure(config::UART_BAUD);
		Self {
			hardware,
			tx_done: Semaphore::new(0),
			clock,
		}
	}

	/// The raw hardware, for the fatal path which bypasses the driver.
	pub fn hardware(&self) -> &H {
		&self.hardware
	}

	/// Transmits `bytes` and waits for the completion interrupt.
	pub fn transmit(&self, bytes: &[u8]) -> Result<()> {
		self.hardware.start_transmit(bytes);
		if self.tx_done.acquire(self.clock, Some(config::UART_TX_TIMEOUT)) {
			Ok(())
		} else {
			Err(Error::Timeout)
		}
	}

	/// TX-complete interrupt entry point.
	pub fn handle_tx_complete(&self) {
		self.tx_done.release();
	}
}

impl<H: UartHardware> LineSink for UartDriver<H> {
	fn write_line(&self, line: &[u8]) {
		// A lost line is not worth wedging the logger over.
		let _ = self.transmit(line);
		let _ = self.transmit(b"\r\n");
	}
}
