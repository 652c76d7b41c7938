//! Shared fixtures for the unit tests.
//!
//! The crate models firmware: configuration, statistics, the socket pool
//! and the sequence counter are module statics, exactly one of each per
//! node. Tests that touch them grab [`serialize`], which both holds a
//! process-wide lock and rolls every static back to its boot value.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use smoltcp::wire::Ipv4Address;

use crate::error::{Error, Result};
use crate::drivers::adc::AdcHardware;
use crate::net::stack::{IpEndpoint, IpStack, RawHandle};
use crate::net::socket;
use crate::time::{Clock, Duration, Instant};
use crate::{logging, protocol, state};

static TEST_LOCK: Mutex<()> = Mutex::new(());

/// Serializes access to the node-wide statics and resets them to their
/// power-on values.
pub(crate) fn serialize() -> MutexGuard<'static, ()> {
	let guard = TEST_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
	state::reset();
	protocol::reset_sequence();
	logging::set_level(logging::Level::Info);
	crate::net::stack::reset_link();
	socket::reset_pool();
	guard
}

/// Clock whose delays advance virtual time, so second-scale timeouts
/// elapse instantly.
pub(crate) struct SimClock {
	now_micros: AtomicI64,
}

impl SimClock {
	pub(crate) fn new() -> Self {
		Self {
			now_micros: AtomicI64::new(0),
		}
	}
}

impl Clock for SimClock {
	fn now(&self) -> Instant {
		Instant::from_micros(self.now_micros.load(Ordering::Relaxed))
	}

	fn delay(&self, duration: Duration) {
		self.now_micros
			.fetch_add(duration.total_micros() as i64, Ordering::Relaxed);
	}
}

/// Scriptable stand-in for the IP stack: records sends, injects received
/// datagrams through the real dispatch routine.
pub(crate) struct MockStack {
	next_handle: AtomicUsize,
	local_ip: Mutex<Option<Ipv4Address>>,
	sent: Mutex<Vec<(RawHandle, IpEndpoint, Vec<u8>)>>,
	closed: Mutex<Vec<RawHandle>>,
}

impl MockStack {
	pub(crate) fn new() -> Self {
		Self {
			next_handle: AtomicUsize::new(0),
			local_ip: Mutex::new(None),
			sent: Mutex::new(Vec::new()),
			closed: Mutex::new(Vec::new()),
		}
	}

	pub(crate) fn set_ip(&self, address: Option<Ipv4Address>) {
		*self.local_ip.lock().unwrap() = address;
	}

	/// Delivers a datagram the way the stack's receive callback would.
	pub(crate) fn inject(&self, handle: RawHandle, remote: IpEndpoint, payload: &[u8]) {
		socket::dispatch(handle, remote, payload);
	}

	pub(crate) fn take_sent(&self) -> Vec<(RawHandle, IpEndpoint, Vec<u8>)> {
		std::mem::take(&mut self.sent.lock().unwrap())
	}

	pub(crate) fn closed(&self) -> Vec<RawHandle> {
		self.closed.lock().unwrap().clone()
	}
}

impl IpStack for MockStack {
	fn udp_open(&self, _local_port: u16) -> Result<RawHandle> {
		Ok(self.next_handle.fetch_add(1, Ordering::Relaxed))
	}

	fn udp_close(&self, handle: RawHandle) {
		self.closed.lock().unwrap().push(handle);
	}

	fn udp_send(&self, handle: RawHandle, remote: IpEndpoint, payload: &[u8]) -> Result<()> {
		self.sent
			.lock()
			.unwrap()
			.push((handle, remote, payload.to_vec()));
		Ok(())
	}

	fn local_ip(&self) -> Option<Ipv4Address> {
		*self.local_ip.lock().unwrap()
	}
}

/// A fresh leaked stack per test: slots in the pool refer to it by
/// `&'static` reference.
pub(crate) fn leak_stack() -> &'static MockStack {
	Box::leak(Box::new(MockStack::new()))
}

/// ADC register file with a scripted sample series.
pub(crate) struct ScriptedAdc {
	samples: Mutex<VecDeque<u16>>,
	armed: AtomicBool,
	hold: AtomicBool,
	fail_power: AtomicBool,
	power_ups: AtomicUsize,
	power_downs: AtomicUsize,
}

impl ScriptedAdc {
	pub(crate) fn new(samples: &[u16]) -> Self {
		Self {
			samples: Mutex::new(samples.iter().copied().collect()),
			armed: AtomicBool::new(false),
			hold: AtomicBool::new(false),
			fail_power: AtomicBool::new(false),
			power_ups: AtomicUsize::new(0),
			power_downs: AtomicUsize::new(0),
		}
	}

	/// Keep conversions pending until `handle_interrupt` is driven
	/// manually.
	pub(crate) fn hold_completion(&self, hold: bool) {
		self.hold.store(hold, Ordering::Relaxed);
	}

	/// Make the next power-up fail, as a broken channel would.
	pub(crate) fn fail_power(&self, fail: bool) {
		self.fail_power.store(fail, Ordering::Relaxed);
	}

	pub(crate) fn power_ups(&self) -> usize {
		self.power_ups.load(Ordering::Relaxed)
	}

	pub(crate) fn power_downs(&self) -> usize {
		self.power_downs.load(Ordering::Relaxed)
	}
}

impl AdcHardware for ScriptedAdc {
	fn power_up(&self, _channel: u8) -> Result<()> {
		if self.fail_power.load(Ordering::Relaxed) {
			return Err(Error::Busy);
		}
		self.power_ups.fetch_add(1, Ordering::Relaxed);
		Ok(())
	}

	fn power_down(&self) {
		self.power_downs.fetch_add(1, Ordering::Relaxed);
	}

	fn start_conversion(&self) {
		self.armed.store(true, Ordering::Relaxed);
	}

	fn conversion_complete(&self) -> bool {
		self.armed.load(Ordering::Relaxed) && !self.hold.load(Ordering::Relaxed)
	}

	fn read_sample(&self) -> u16 {
		self.armed.store(false, Ordering::Relaxed);
		self.samples.lock().unwrap().pop_front().unwrap_or(0)
	}
}
