//! Single-channel ADC driver with interrupt completion.

use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};

use crate::config;
use crate::error::{Error, Result};

/// Mask of a 12-bit conversion result.
const SAMPLE_MASK: u16 = 0x0fff;

/// Register-level ADC accesses, implemented by the board crate.
pub trait AdcHardware: Send + Sync {
	/// Pin muxing, clock divider, power and interrupt line for `channel`.
	fn power_up(&self, channel: u8) -> Result<()>;

	/// Reverse of [`AdcHardware::power_up`].
	fn power_down(&self);

	/// Arm the peripheral for one conversion.
	fn start_conversion(&self);

	/// Whether the armed conversion has finished (end-of-conversion flag).
	fn conversion_complete(&self) -> bool;

	/// Data register of the last finished conversion.
	fn read_sample(&self) -> u16;
}

/// Driver state machine. At most one conversion is in flight at any time.
///
/// The driver is not thread-safe; tasks coordinate access among themselves.
/// The fields below are atomics only because [`AdcDriver::handle_interrupt`]
/// runs in interrupt context concurrently with the owning task.
pub struct AdcDriver<H: AdcHardware> {
	hardware: H,
	initialized: AtomicBool,
	channel: AtomicU8,
	in_flight: AtomicBool,
	done: AtomicBool,
	value: AtomicU16,
}

impl<H: AdcHardware> AdcDriver<H> {
	pub const fn new(hardware: H) -> Self {
		Self {
			hardware,
			initialized: AtomicBool::new(false),
			channel: AtomicU8::new(0),
			in_flight: AtomicBool::new(false),
			done: AtomicBool::new(false),
			value: AtomicU16::new(0),
		}
	}

	/// Configures the converter for `channel`. Idempotent: re-initializing
	/// on the already-active channel is a no-op.
	pub fn init(&self, channel: u8) -> Result<()> {
		if channel > config::MAX_CHANNEL {
			return Err(Error::InvalidArgument);
		}
		if self.initialized.load(Ordering::Acquire) {
			if self.channel.load(Ordering::Relaxed) == channel {
				return Ok(());
			}
			// Channel moves require a full power cycle.
			self.deinit();
		}

		self.hardware.power_up(channel)?;
		self.channel.store(channel, Ordering::Relaxed);
		self.in_flight.store(false, Ordering::Relaxed);
		self.done.store(false, Ordering::Relaxed);
		self.initialized.store(true, Ordering::Release);
		Ok(())
	}

	pub fn deinit(&self) {
		if self.initialized.swap(false, Ordering::AcqRel) {
			self.hardware.power_down();
			self.in_flight.store(false, Ordering::Relaxed);
			self.done.store(false, Ordering::Relaxed);
		}
	}

	/// The channel the converter is configured for.
	pub fn channel(&self) -> u8 {
		self.channel.load(Ordering::Relaxed)
	}

	/// Arms one asynchronous conversion.
	pub fn start_conversion(&self) -> Result<()> {
		if !self.initialized.load(Ordering::Acquire) {
			return Err(Error::InvalidArgument);
		}
		if self.in_flight.swap(true, Ordering::AcqRel) {
			return Err(Error::Busy);
		}

		self.done.store(false, Ordering::Relaxed);
		self.hardware.start_conversion();
		Ok(())
	}

	/// Whether the last armed conversion has completed.
	pub fn conversion_done(&self) -> bool {
		self.done.load(Ordering::Acquire)
	}

	/// Result of the last conversion, or `Busy` while one is in flight.
	pub fn value(&self) -> Result<u16> {
		if self.conversion_done() {
			Ok(self.value.load(Ordering::Relaxed))
		} else {
			Err(Error::Busy)
		}
	}

	/// Starts a conversion and busy-waits for the result.
	///
	/// The wait is bounded; a converter that never signals completion
	/// yields `Timeout` instead of wedging the sampling loop.
	pub fn read_sync(&self) -> Result<u16> {
		self.start_conversion()?;

		for _ in 0..config::ADC_SYNC_POLL_LIMIT {
			if self.done.load(Ordering::Acquire) {
				return self.value();
			}
			if self.hardware.conversion_complete() {
				self.capture();
				return self.value();
			}
			core::hint::spin_loop();
		}

		self.in_flight.store(false, Ordering::Relaxed);
		Err(Error::Timeout)
	}

	/// Conversion-complete interrupt entry point.
	pub fn handle_interrupt(&self) {
		self.capture();
	}

	#[cfg(test)]
	pub(crate) fn hardware(&self) -> &H {
		&self.hardware
	}

	fn capture(&self) {
		self.value
			.store(self.hardware.read_sample() & SAMPLE_MASK, Ordering::Relaxed);
		self.done.store(true, Ordering::Release);
		self.in_flight.store(false, Ordering::Release);
	}
}

/// Converts a threshold in millivolts to the raw ADC scale.
pub fn mv_to_adc(mv: u16) -> u16 {
	(u32::from(mv) * config::ADC_FULL_SCALE / config::VREF_MV) as u16
}

/// Converts a raw 12-bit sample to millivolts.
pub fn adc_to_mv(sample: u16) -> u16 {
	(u32::from(sample) * config::VREF_MV / config::ADC_FULL_SCALE) as u16
}
