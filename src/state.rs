//! State shared between the network and acquisition tasks.
//!
//! Configuration scalars are written only by the network task (command
//! handlers) and read by the acquisition task. Every field fits one machine
//! word and is validated before the store, so readers tolerate observing
//! either the old or the new value and no mutex is needed. The transmit
//! target is the one multi-word record; a ticket mutex makes its latching
//! atomic with respect to the acquisition loop.

use core::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, Ordering};

use hermit_sync::TicketMutex;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use smoltcp::wire::IpEndpoint;

use crate::config;
use crate::error::{Error, Result};
use crate::net::socket::UdpSocket;

#[derive(TryFromPrimitive, IntoPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AcquisitionState {
	Idle = 0,
	Running = 1,
	Error = 2,
}

#[derive(TryFromPrimitive, IntoPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NetworkState {
	Init = 0,
	WaitLink = 1,
	WaitIp = 2,
	Ready = 3,
	Error = 4,
}

static ACQUISITION_STATE: AtomicU8 = AtomicU8::new(AcquisitionState::Idle as u8);
static NETWORK_STATE: AtomicU8 = AtomicU8::new(NetworkState::Init as u8);

pub fn acquisition_state() -> AcquisitionState {
	AcquisitionState::try_from(ACQUISITION_STATE.load(Ordering::Relaxed))
		.unwrap_or(AcquisitionState::Error)
}

pub fn set_acquisition_state(state: AcquisitionState) {
	ACQUISITION_STATE.store(state.into(), Ordering::Relaxed);
}

pub fn network_state() -> NetworkState {
	NetworkState::try_from(NETWORK_STATE.load(Ordering::Relaxed)).unwrap_or(NetworkState::Error)
}

pub fn set_network_state(state: NetworkState) {
	NETWORK_STATE.store(state.into(), Ordering::Relaxed);
}

/// Acquisition parameters, atomic per field.
///
/// The epoch counter ticks on every change that invalidates an in-progress
/// batch (batch size, channel); the acquisition loop compares it against
/// its own copy and discards the batch on mismatch.
pub struct RuntimeConfig {
	threshold_mv: AtomicU16,
	channel: AtomicU8,
	batch_size: AtomicU16,
	epoch: AtomicU32,
}

pub static CONFIG: RuntimeConfig = RuntimeConfig {
	threshold_mv: AtomicU16::new(config::DEFAULT_THRESHOLD_MV),
	channel: AtomicU8::new(config::DEFAULT_CHANNEL),
	batch_size: AtomicU16::new(config::DEFAULT_BATCH_SIZE),
	epoch: AtomicU32::new(0),
};

impl RuntimeConfig {
	pub fn threshold_mv(&self) -> u16 {
		self.threshold_mv.load(Ordering::Relaxed)
	}

	/// Sets the threshold in millivolts; values above the reference voltage
	/// are rejected.
	pub fn set_threshold_mv(&self, mv: u16) -> Result<()> {
		if u32::from(mv) > config::VREF_MV {
			return Err(Error::InvalidArgument);
		}
		self.threshold_mv.store(mv, Ordering::Relaxed);
		Ok(())
	}

	/// Sets the threshold as a percentage of the reference voltage.
	pub fn set_threshold_percent(&self, percent: u16) -> Result<()> {
		if percent > 100 {
			return Err(Error::InvalidArgument);
		}
		let mv = (u32::from(percent) * config::VREF_MV / 100) as u16;
		self.set_threshold_mv(mv)
	}

	pub fn channel(&self) -> u8 {
		self.channel.load(Ordering::Relaxed)
	}

	/// Selects the ADC channel. The acquisition loop re-initializes the
	/// converter and discards the in-progress batch when it observes the
	/// change.
	pub fn set_channel(&self, channel: u8) -> Result<()> {
		if channel > config::MAX_CHANNEL {
			return Err(Error::InvalidArgument);
		}
		self.channel.store(channel, Ordering::Relaxed);
		self.bump_epoch();
		Ok(())
	}

	pub fn batch_size(&self) -> u16 {
		self.batch_size.load(Ordering::Relaxed)
	}

	/// Sets the batch size; any in-progress batch is discarded.
	pub fn set_batch_size(&self, batch_size: u16) -> Result<()> {
		if batch_size == 0 || usize::from(batch_size) > config::MAX_BATCH_SIZE {
			return Err(Error::InvalidArgument);
		}
		self.batch_size.store(batch_size, Ordering::Relaxed);
		self.bump_epoch();
		Ok(())
	}

	pub fn epoch(&self) -> u32 {
		self.epoch.load(Ordering::Relaxed)
	}

	fn bump_epoch(&self) {
		self.epoch.fetch_add(1, Ordering::Relaxed);
	}

	#[cfg(test)]
	pub(crate) fn reset(&self) {
		self.threshold_mv
			.store(config::DEFAULT_THRESHOLD_MV, Ordering::Relaxed);
		self.channel.store(config::DEFAULT_CHANNEL, Ordering::Relaxed);
		self.batch_size
			.store(config::DEFAULT_BATCH_SIZE, Ordering::Relaxed);
		self.epoch.store(0, Ordering::Relaxed);
	}
}

/// Destination of DATA bursts. Unset at boot; latched from the source
/// address of every START command.
static TRANSMIT_TARGET: TicketMutex<Option<IpEndpoint>> = TicketMutex::new(None);

pub fn transmit_target() -> Option<IpEndpoint> {
	*TRANSMIT_TARGET.lock()
}

pub fn set_transmit_target(target: IpEndpoint) {
	*TRANSMIT_TARGET.lock() = Some(target);
}

/// The bound control/data socket, published by the network task once the
/// node reaches `Ready` so the acquisition task can transmit on it.
static DATA_SOCKET: TicketMutex<Option<UdpSocket>> = TicketMutex::new(None);

pub fn data_socket() -> Option<UdpSocket> {
	*DATA_SOCKET.lock()
}

pub fn set_data_socket(socket: UdpSocket) {
	*DATA_SOCKET.lock() = Some(socket);
}

macro_rules! counters {
	(
		$(#[$meta:meta])*
		$name:ident, $snapshot:ident { $($field:ident),+ $(,)? }
	) => {
		$(#[$meta])*
		pub struct $name {
			$($field: AtomicU32,)+
		}

		#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
		pub struct $snapshot {
			$(pub $field: u32,)+
		}

		impl $name {
			const fn new() -> Self {
				Self {
					$($field: AtomicU32::new(0),)+
				}
			}

			/// Consistent-enough point-in-time copy; counters only grow.
			pub fn snapshot(&self) -> $snapshot {
				$snapshot {
					$($field: self.$field.load(Ordering::Relaxed),)+
				}
			}

			#[cfg(test)]
			pub(crate) fn reset(&self) {
				$(self.$field.store(0, Ordering::Relaxed);)+
			}
		}
	};
}

counters! {
	/// Counters of the network task. Monotonic; reset only on reboot.
	NetStats, NetStatsSnapshot {
		packets_sent,
		packets_received,
		bytes_sent,
		bytes_received,
		errors,
	}
}

counters! {
	/// Counters of the acquisition task. Monotonic; reset only on reboot.
	AcqStats, AcqStatsSnapshot {
		samples_collected,
		packets_sent,
		errors,
	}
}

pub static NET_STATS: NetStats = NetStats::new();
pub static ACQ_STATS: AcqStats = AcqStats::new();

impl NetStats {
	pub fn record_sent(&self, bytes: usize) {
		self.packets_sent.fetch_add(1, Ordering::Relaxed);
		self.bytes_sent.fetch_add(bytes as u32, Ordering::Relaxed);
	}

	pub fn record_received(&self, bytes: usize) {
		self.packets_received.fetch_add(1, Ordering::Relaxed);
		self.bytes_received.fetch_add(bytes as u32, Ordering::Relaxed);
	}

	pub fn record_error(&self) {
		self.errors.fetch_add(1, Ordering::Relaxed);
	}
}

impl AcqStats {
	pub fn record_sample(&self) {
		self.samples_collected.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_packet(&self) {
		self.packets_sent.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_error(&self) {
		self.errors.fetch_add(1, Ordering::Relaxed);
	}
}

#[cfg(test)]
pub(crate) fn reset() {
	set_acquisition_state(AcquisitionState::Idle);
	set_network_state(NetworkState::Init);
	CONFIG.reset();
	*TRANSMIT_TARGET.lock() = None;
	*DATA_SOCKET.lock() = None;
	NET_STATS.reset();
	ACQ_STATS.reset();
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support;

	#[test]
	fn threshold_percent_conversion() {
		let _guard = test_support::serialize();

		CONFIG.set_threshold_percent(0).unwrap();
		assert_eq!(CONFIG.threshold_mv(), 0);

		CONFIG.set_threshold_percent(100).unwrap();
		assert_eq!(CONFIG.threshold_mv(), 3300);

		CONFIG.set_threshold_percent(50).unwrap();
		assert_eq!(CONFIG.threshold_mv(), 1650);

		assert_eq!(
			CONFIG.set_threshold_percent(101),
			Err(Error::InvalidArgument)
		);
		assert_eq!(CONFIG.threshold_mv(), 1650);
	}

	#[test]
	fn threshold_mv_bounds() {
		let _guard = test_support::serialize();

		CONFIG.set_threshold_mv(3300).unwrap();
		assert_eq!(CONFIG.set_threshold_mv(3301), Err(Error::InvalidArgument));
		assert_eq!(CONFIG.threshold_mv(), 3300);
	}

	#[test]
	fn batch_size_bounds() {
		let _guard = test_support::serialize();

		assert_eq!(CONFIG.set_batch_size(0), Err(Error::InvalidArgument));
		assert_eq!(CONFIG.set_batch_size(501), Err(Error::InvalidArgument));
		CONFIG.set_batch_size(1).unwrap();
		assert_eq!(CONFIG.batch_size(), 1);
		CONFIG.set_batch_size(500).unwrap();
		assert_eq!(CONFIG.batch_size(), 500);
	}

	#[test]
	fn batch_and_channel_changes_tick_the_epoch() {
		let _guard = test_support::serialize();

		let before = CONFIG.epoch();
		CONFIG.set_batch_size(10).unwrap();
		CONFIG.set_channel(2).unwrap();
		assert_eq!(CONFIG.epoch(), before + 2);

		// Threshold changes do not invalidate the batch.
		CONFIG.set_threshold_mv(100).unwrap();
		assert_eq!(CONFIG.epoch(), before + 2);
	}

	#[test]
	fn channel_bounds() {
		let _guard = test_support::serialize();

		assert_eq!(CONFIG.set_channel(8), Err(Error::InvalidArgument));
		CONFIG.set_channel(7).unwrap();
		assert_eq!(CONFIG.channel(), 7);
	}
}
