//! Pooled UDP sockets bridging callback-context delivery into a blocking
//! receive API.
//!
//! The stack hands datagrams to [`dispatch`] in its own (callback or poll)
//! context; each slot buffers them in a bounded queue so a task can block
//! on [`UdpSocket::recv_from`] with a timeout. Alternatively a slot carries
//! a registered callback, exclusive with blocking receives. Producers never
//! block: when the queue is full the datagram is dropped and counted.

use alloc::boxed::Box;
use alloc::collections::vec_deque::VecDeque;
use alloc::vec::Vec;

use bitflags::bitflags;
use hermit_sync::TicketMutex;

use crate::config;
use crate::error::{Error, Result};
use crate::net::stack::{self, IpEndpoint, IpStack, RawHandle};
use crate::time::Clock;

bitflags! {
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	struct SlotFlags: u8 {
		const IN_USE = 0b0001;
		const BOUND = 0b0010;
		const HAS_CALLBACK = 0b0100;
		const CLOSING = 0b1000;
	}
}

/// Datagram delivery callback. Runs in the dispatcher's context with the
/// pool mutex released; returns whether it consumed the datagram. An
/// unconsumed datagram falls back to the slot's queue.
pub type RecvCallback = fn(token: usize, remote: &IpEndpoint, payload: &[u8]) -> bool;

/// One buffered datagram. Payloads longer than the record are truncated at
/// delivery, not rejected.
struct Datagram {
	len: usize,
	remote: IpEndpoint,
	data: [u8; config::DATAGRAM_CAPACITY],
}

impl Datagram {
	fn store(remote: IpEndpoint, payload: &[u8]) -> Box<Self> {
		let mut datagram = Box::new(Self {
			len: 0,
			remote,
			data: [0; config::DATAGRAM_CAPACITY],
		});
		let len = payload.len().min(config::DATAGRAM_CAPACITY);
		datagram.data[..len].copy_from_slice(&payload[..len]);
		datagram.len = len;
		datagram
	}
}

enum QueueEntry {
	Datagram(Box<Datagram>),
	/// Sentinel enqueued by close to wake a blocked receiver.
	Closing,
}

struct Slot {
	stack: Option<&'static dyn IpStack>,
	raw: RawHandle,
	local_port: u16,
	flags: SlotFlags,
	callback: Option<(RecvCallback, usize)>,
	queue: VecDeque<QueueEntry>,
	/// Returned records kept for reuse, so steady-state reception does not
	/// allocate.
	cache: Vec<Box<Datagram>>,
	dropped: u32,
}

impl Slot {
	const fn empty() -> Self {
		Self {
			stack: None,
			raw: 0,
			local_port: 0,
			flags: SlotFlags::empty(),
			callback: None,
			queue: VecDeque::new(),
			cache: Vec::new(),
			dropped: 0,
		}
	}

	fn clear(&mut self) {
		*self = Self::empty();
	}

	fn enqueue(&mut self, remote: IpEndpoint, payload: &[u8]) {
		if self.queue.len() >= config::RECV_QUEUE_DEPTH {
			self.dropped = self.dropped.wrapping_add(1);
			return;
		}

		let datagram = match self.cache.pop() {
			Some(mut cached) => {
				let len = payload.len().min(config::DATAGRAM_CAPACITY);
				cached.data[..len].copy_from_slice(&payload[..len]);
				cached.len = len;
				cached.remote = remote;
				cached
			}
			None => Datagram::store(remote, payload),
		};
		self.queue.push_back(QueueEntry::Datagram(datagram));
	}
}

const EMPTY_SLOT: Slot = Slot::empty();

/// The socket pool. One mutex covers slot allocation, lookup and free.
static SOCKETS: TicketMutex<[Slot; config::SOCKET_SLOTS]> =
	TicketMutex::new([EMPTY_SLOT; config::SOCKET_SLOTS]);

/// Handle to a pool slot. Copyable so the network task can publish the
/// bound socket for the acquisition task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpSocket {
	index: usize,
}

impl UdpSocket {
	/// Binds a UDP socket on `local_port`, taking a pool slot.
	pub fn bind(stack: &'static dyn IpStack, local_port: u16) -> Result<Self> {
		let raw = stack.udp_open(local_port)?;

		let mut slots = SOCKETS.lock();
		// Reclaim slots whose close sentinel was never consumed.
		for slot in slots.iter_mut() {
			if slot.flags.contains(SlotFlags::CLOSING) {
				slot.clear();
			}
		}

		let Some(index) = slots
			.iter()
			.position(|slot| !slot.flags.contains(SlotFlags::IN_USE))
		else {
			drop(slots);
			stack.udp_close(raw);
			return Err(Error::NoMemory);
		};

		let slot = &mut slots[index];
		slot.clear();
		slot.stack = Some(stack);
		slot.raw = raw;
		slot.local_port = local_port;
		slot.flags = SlotFlags::IN_USE | SlotFlags::BOUND;
		Ok(Self { index })
	}

	/// Blocks until a datagram arrives, the socket is closed or `timeout`
	/// expires. The payload is copied into `buf`, truncated to its length;
	/// returns the stored length and the remote endpoint.
	pub fn recv_from(
		&self,
		clock: &dyn Clock,
		buf: &mut [u8],
		timeout: crate::time::Duration,
	) -> Result<(usize, IpEndpoint)> {
		let stack = {
			let slots = SOCKETS.lock();
			let slot = &slots[self.index];
			// A closing slot stays receivable until its sentinel is
			// consumed, so only IN_USE is required here.
			if !slot.flags.contains(SlotFlags::IN_USE) {
				return Err(Error::InvalidArgument);
			}
			if slot.flags.contains(SlotFlags::HAS_CALLBACK) {
				return Err(Error::InvalidArgument);
			}
			slot.stack
		};

		let deadline = clock.now() + timeout;
		loop {
			if let Some(stack) = stack {
				stack.poll();
			}

			{
				let mut slots = SOCKETS.lock();
				let slot = &mut slots[self.index];
				match slot.queue.pop_front() {
					Some(QueueEntry::Datagram(datagram)) => {
						let len = datagram.len.min(buf.len());
						buf[..len].copy_from_slice(&datagram.data[..len]);
						let remote = datagram.remote;
						if slot.cache.len() < config::RECV_QUEUE_DEPTH {
							slot.cache.push(datagram);
						}
						return Ok((len, remote));
					}
					Some(QueueEntry::Closing) => {
						slot.clear();
						return Err(Error::Closed);
					}
					None => {}
				}
			}

			if clock.now() >= deadline {
				return Err(Error::Timeout);
			}
			clock.delay(config::RECV_POLL_INTERVAL);
		}
	}

	/// Sends one datagram to `remote`. Requires a bound slot and the link
	/// up; the stack owns its transmit buffer from submission on.
	pub fn send_to(&self, remote: IpEndpoint, payload: &[u8]) -> Result<()> {
		let (stack, raw) = {
			let slots = SOCKETS.lock();
			let slot = &slots[self.index];
			if !slot.flags.contains(SlotFlags::IN_USE | SlotFlags::BOUND)
				|| slot.flags.contains(SlotFlags::CLOSING)
			{
				return Err(Error::InvalidArgument);
			}
			match slot.stack {
				Some(stack) => (stack, slot.raw),
				None => return Err(Error::InvalidArgument),
			}
		};

		if !stack::link_up(stack) {
			return Err(Error::LinkDown);
		}
		stack.udp_send(raw, remote, payload)
	}

	/// Registers `callback` for inline delivery. Exclusive with
	/// [`UdpSocket::recv_from`] on the same socket.
	pub fn set_callback(&self, callback: RecvCallback, token: usize) -> Result<()> {
		let mut slots = SOCKETS.lock();
		let slot = &mut slots[self.index];
		if !slot.flags.contains(SlotFlags::IN_USE | SlotFlags::BOUND) {
			return Err(Error::InvalidArgument);
		}
		slot.callback = Some((callback, token));
		slot.flags.insert(SlotFlags::HAS_CALLBACK);
		Ok(())
	}

	/// Removes a registered callback; delivery falls back to the queue.
	pub fn clear_callback(&self) {
		let mut slots = SOCKETS.lock();
		let slot = &mut slots[self.index];
		slot.callback = None;
		slot.flags.remove(SlotFlags::HAS_CALLBACK);
	}

	/// Datagrams discarded on this slot because the queue was full.
	pub fn dropped(&self) -> u32 {
		SOCKETS.lock()[self.index].dropped
	}

	/// The local port the socket was bound on.
	pub fn local_port(&self) -> u16 {
		SOCKETS.lock()[self.index].local_port
	}

	/// Closes the socket: drains the queue, wakes a blocked receiver with
	/// the close sentinel and releases the stack entity. The slot itself is
	/// recycled when the sentinel is consumed or on the next bind.
	pub fn close(self) {
		let stack = {
			let mut slots = SOCKETS.lock();
			let slot = &mut slots[self.index];
			if !slot.flags.contains(SlotFlags::IN_USE) {
				return;
			}
			slot.flags.remove(SlotFlags::BOUND | SlotFlags::HAS_CALLBACK);
			slot.flags.insert(SlotFlags::CLOSING);
			slot.callback = None;
			slot.queue.clear();
			slot.cache.clear();
			slot.queue.push_back(QueueEntry::Closing);
			slot.stack.take().map(|stack| (stack, slot.raw))
		};

		if let Some((stack, raw)) = stack {
			stack.udp_close(raw);
		}
	}
}

/// Shared delivery routine: every backend funnels received datagrams
/// through here, in callback or poll context.
pub fn dispatch(raw: RawHandle, remote: IpEndpoint, payload: &[u8]) {
	let callback = {
		let mut slots = SOCKETS.lock();
		let Some(slot) = slots.iter_mut().find(|slot| {
			slot.flags.contains(SlotFlags::IN_USE | SlotFlags::BOUND)
				&& !slot.flags.contains(SlotFlags::CLOSING)
				&& slot.raw == raw
		}) else {
			return;
		};

		if let Some(callback) = slot.callback {
			callback
		} else {
			slot.enqueue(remote, payload);
			return;
		}
	};

	// Callback runs with the pool mutex released.
	let (callback, token) = callback;
	if callback(token, &remote, payload) {
		return;
	}

	// Not consumed: fall back to the queue, re-checking the slot.
	let mut slots = SOCKETS.lock();
	if let Some(slot) = slots.iter_mut().find(|slot| {
		slot.flags.contains(SlotFlags::IN_USE | SlotFlags::BOUND)
			&& !slot.flags.contains(SlotFlags::CLOSING)
			&& slot.raw == raw
	}) {
		slot.enqueue(remote, payload);
	}
}

#[cfg(test)]
pub(crate) fn reset_pool() {
	for slot in SOCKETS.lock().iter_mut() {
		slot.clear();
	}
}
