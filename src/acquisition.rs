//! Sampling loop: threshold gating, batch assembly, transmission.
//!
//! One iteration per millisecond nominal. Samples at or above the
//! configured threshold accumulate in the batch buffer; a full batch is
//! built into a DATA packet for the current transmit target and the buffer
//! is emptied whether or not the send worked. Transient ADC and send
//! failures are counted and the loop keeps going.

use heapless::Vec;
use log::{debug, error, info, warn};

use crate::config;
use crate::drivers::adc::{self, AdcDriver, AdcHardware};
use crate::error::{Error, Result};
use crate::protocol;
use crate::state::{self, AcquisitionState, NetworkState, ACQ_STATS, CONFIG};
use crate::time::Clock;

/// Largest DATA frame: header plus a full batch.
const DATA_FRAME_CAPACITY: usize =
	protocol::HEADER_LEN + protocol::DATA_HEADER_LEN + 2 * config::MAX_BATCH_SIZE;

pub struct AcquisitionTask<'a, H: AdcHardware> {
	clock: &'a dyn Clock,
	adc: &'a AdcDriver<H>,
	batch: Vec<u16, { config::MAX_BATCH_SIZE }>,
	/// Channel the converter is currently initialized for.
	channel: u8,
	/// Configuration epoch the batch buffer was filled under.
	epoch: u32,
	tx: [u8; DATA_FRAME_CAPACITY],
}

impl<'a, H: AdcHardware> AcquisitionTask<'a, H> {
	/// The driver is expected to be initialized (see [`crate::boot`]).
	pub fn new(clock: &'a dyn Clock, adc: &'a AdcDriver<H>) -> Self {
		Self {
			clock,
			adc,
			batch: Vec::new(),
			channel: adc.channel(),
			epoch: CONFIG.epoch(),
			tx: [0; DATA_FRAME_CAPACITY],
		}
	}

	/// Task entry point.
	pub fn run(&mut self) -> ! {
		info!("acquisition task up");
		loop {
			self.step();
		}
	}

	/// One iteration of the sampling loop.
	pub fn step(&mut self) {
		if state::acquisition_state() != AcquisitionState::Running {
			self.clock.delay(config::IDLE_DELAY);
			return;
		}

		if !self.sync_config() {
			return;
		}

		if state::network_state() != NetworkState::Ready {
			self.clock.delay(config::IDLE_DELAY);
			return;
		}

		match self.adc.read_sync() {
			Ok(sample) => {
				let threshold = adc::mv_to_adc(CONFIG.threshold_mv());
				if sample >= threshold {
					if self.batch.push(sample).is_err() {
						// Cannot happen while batch_size <= capacity.
						ACQ_STATS.record_error();
					} else {
						ACQ_STATS.record_sample();
					}
				}

				if self.batch.len() >= usize::from(CONFIG.batch_size()) {
					self.flush();
				}
			}
			Err(err) => {
				warn!("sample read failed: {err}");
				ACQ_STATS.record_error();
			}
		}

		self.clock.delay(config::SAMPLE_PERIOD);
	}

	/// Applies configuration changes observed since the last iteration.
	/// Returns whether the task may continue sampling.
	fn sync_config(&mut self) -> bool {
		let epoch = CONFIG.epoch();
		if epoch == self.epoch {
			return true;
		}

		// Batch-size and channel changes both invalidate the batch.
		self.epoch = epoch;
		self.batch.clear();

		let channel = CONFIG.channel();
		if channel != self.channel {
			self.adc.deinit();
			if let Err(err) = self.adc.init(channel) {
				error!("channel {channel} re-initialization failed: {err}");
				ACQ_STATS.record_error();
				state::set_acquisition_state(AcquisitionState::Error);
				return false;
			}
			info!("sampling channel {channel}");
			self.channel = channel;
		}
		true
	}

	/// Ships the batch to the transmit target. The buffer is reset
	/// regardless of the outcome.
	fn flush(&mut self) {
		let outcome = self.transmit();
		match outcome {
			Ok(len) => {
				ACQ_STATS.record_packet();
				debug!("data packet sent ({len} bytes)");
			}
			Err(err) => {
				warn!("data packet dropped: {err}");
				ACQ_STATS.record_error();
			}
		}
		self.batch.clear();
	}

	fn transmit(&mut self) -> Result<usize> {
		let target = state::transmit_target().ok_or(Error::InvalidArgument)?;
		let socket = state::data_socket().ok_or(Error::InvalidArgument)?;
		let len = protocol::build_data(&mut self.tx, self.channel, &self.batch)?;
		socket.send_to(target, &self.tx[..len])?;
		Ok(len)
	}

	#[cfg(test)]
	pub(crate) fn pending_samples(&self) -> usize {
		self.batch.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::net::socket::UdpSocket;
	use crate::net::stack::{notify_link, IpEndpoint, LinkEvent};
	use crate::protocol::DataPayload;
	use crate::test_support::{self, ScriptedAdc, SimClock};
	use smoltcp::wire::Ipv4Address;

	fn collector() -> IpEndpoint {
		IpEndpoint::new(Ipv4Address::new(192, 168, 1, 10).into(), 6000)
	}

	/// Puts the shared state into "acquiring towards a live collector".
	fn arm(stack: &'static test_support::MockStack) {
		stack.set_ip(Some(Ipv4Address::new(10, 0, 0, 3)));
		notify_link(LinkEvent::Up);
		let socket = UdpSocket::bind(stack, config::LOCAL_PORT).unwrap();
		state::set_data_socket(socket);
		state::set_transmit_target(collector());
		state::set_network_state(NetworkState::Ready);
		state::set_acquisition_state(AcquisitionState::Running);
	}

	#[test]
	fn thresholded_batch_is_transmitted_in_order() {
		let _guard = test_support::serialize();
		let stack = test_support::leak_stack();
		let clock = SimClock::new();
		arm(stack);
		CONFIG.set_batch_size(3).unwrap();

		let adc = AdcDriver::new(ScriptedAdc::new(&[100, 2500, 3000, 4000, 500, 2100]));
		adc.init(0).unwrap();
		let mut task = AcquisitionTask::new(&clock, &adc);

		for _ in 0..6 {
			task.step();
		}

		let sent = stack.take_sent();
		assert_eq!(sent.len(), 1);
		let frame = &sent[0].2;
		assert_eq!(sent[0].1, collector());
		assert_eq!(frame.len(), 17);

		let (header, payload) = protocol::parse(frame).unwrap();
		assert_eq!(header.message_type, 0x10);
		assert_eq!(usize::from(header.payload_len), 4 + 2 * 3);

		let data = DataPayload::parse(payload).unwrap();
		assert_eq!(data.channel, 0);
		assert_eq!(data.sample_count, 3);
		assert!(data.samples().eq([2500u16, 3000, 4000]));

		// 2100 qualified after the flush and waits in the next batch.
		assert_eq!(task.pending_samples(), 1);

		let snapshot = ACQ_STATS.snapshot();
		assert_eq!(snapshot.samples_collected, 4);
		assert_eq!(snapshot.packets_sent, 1);
		assert_eq!(snapshot.errors, 0);
	}

	#[test]
	fn sub_threshold_samples_never_reach_the_wire() {
		let _guard = test_support::serialize();
		let stack = test_support::leak_stack();
		let clock = SimClock::new();
		arm(stack);
		CONFIG.set_batch_size(2).unwrap();

		// threshold_adc(1650 mV) == 2047: 2047 qualifies, 2046 does not.
		let adc = AdcDriver::new(ScriptedAdc::new(&[2046, 2047, 2048]));
		adc.init(0).unwrap();
		let mut task = AcquisitionTask::new(&clock, &adc);

		for _ in 0..3 {
			task.step();
		}

		let sent = stack.take_sent();
		assert_eq!(sent.len(), 1);
		let (_, payload) = protocol::parse(&sent[0].2).unwrap();
		let data = DataPayload::parse(payload).unwrap();
		assert!(data.samples().eq([2047u16, 2048]));
	}

	#[test]
	fn link_down_send_counts_one_error_and_drops_the_batch() {
		let _guard = test_support::serialize();
		let stack = test_support::leak_stack();
		let clock = SimClock::new();
		arm(stack);
		CONFIG.set_batch_size(1).unwrap();
		notify_link(LinkEvent::Down);

		let adc = AdcDriver::new(ScriptedAdc::new(&[3000]));
		adc.init(0).unwrap();
		let mut task = AcquisitionTask::new(&clock, &adc);
		task.step();

		assert!(stack.take_sent().is_empty());
		assert_eq!(ACQ_STATS.snapshot().errors, 1);
		assert_eq!(task.pending_samples(), 0);
	}

	#[test]
	fn batch_size_change_discards_in_progress_batch() {
		let _guard = test_support::serialize();
		let stack = test_support::leak_stack();
		let clock = SimClock::new();
		arm(stack);
		CONFIG.set_batch_size(5).unwrap();

		let adc = AdcDriver::new(ScriptedAdc::new(&[3000, 3100, 3200, 3300]));
		adc.init(0).unwrap();
		let mut task = AcquisitionTask::new(&clock, &adc);

		task.step();
		task.step();
		assert_eq!(task.pending_samples(), 2);

		CONFIG.set_batch_size(2).unwrap();
		task.step(); // discards the old batch, then collects one sample
		assert_eq!(task.pending_samples(), 1);

		task.step(); // second sample completes the new batch
		let sent = stack.take_sent();
		assert_eq!(sent.len(), 1);
		let (_, payload) = protocol::parse(&sent[0].2).unwrap();
		assert_eq!(DataPayload::parse(payload).unwrap().sample_count, 2);
	}

	#[test]
	fn channel_change_reinitializes_the_converter() {
		let _guard = test_support::serialize();
		let stack = test_support::leak_stack();
		let clock = SimClock::new();
		arm(stack);
		CONFIG.set_batch_size(10).unwrap();

		let adc = AdcDriver::new(ScriptedAdc::new(&[3000, 3000]));
		adc.init(0).unwrap();
		let mut task = AcquisitionTask::new(&clock, &adc);
		task.step();

		CONFIG.set_channel(4).unwrap();
		task.step();

		assert_eq!(adc.channel(), 4);
		assert_eq!(task.pending_samples(), 1);
		assert_eq!(state::acquisition_state(), AcquisitionState::Running);
	}

	#[test]
	fn failed_channel_reinit_moves_to_error_state() {
		let _guard = test_support::serialize();
		let stack = test_support::leak_stack();
		let clock = SimClock::new();
		arm(stack);

		let adc = AdcDriver::new(ScriptedAdc::new(&[3000]));
		adc.init(0).unwrap();
		adc.hardware().fail_power(true);
		let mut task = AcquisitionTask::new(&clock, &adc);

		CONFIG.set_channel(2).unwrap();
		task.step();

		assert_eq!(state::acquisition_state(), AcquisitionState::Error);

		// The loop idles in error state instead of sampling.
		task.step();
		assert!(stack.take_sent().is_empty());
	}

	#[test]
	fn idle_task_does_not_sample() {
		let _guard = test_support::serialize();
		let stack = test_support::leak_stack();
		let clock = SimClock::new();
		arm(stack);
		state::set_acquisition_state(AcquisitionState::Idle);

		let adc = AdcDriver::new(ScriptedAdc::new(&[4000]));
		adc.init(0).unwrap();
		let mut task = AcquisitionTask::new(&clock, &adc);
		task.step();

		assert_eq!(ACQ_STATS.snapshot().samples_collected, 0);
		assert!(clock.now() >= crate::time::Instant::from_millis(100));
	}

	#[test]
	fn not_ready_network_pauses_sampling() {
		let _guard = test_support::serialize();
		let stack = test_support::leak_stack();
		let clock = SimClock::new();
		arm(stack);
		state::set_network_state(NetworkState::WaitLink);

		let adc = AdcDriver::new(ScriptedAdc::new(&[4000]));
		adc.init(0).unwrap();
		let mut task = AcquisitionTask::new(&clock, &adc);
		task.step();

		assert_eq!(ACQ_STATS.snapshot().samples_collected, 0);
	}
}
