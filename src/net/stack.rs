//! Seam toward the UDP/IP stack and the cached Ethernet link state.

use core::sync::atomic::{AtomicBool, Ordering};

use smoltcp::wire::Ipv4Address;

use crate::error::{Error, Result};

pub use smoltcp::wire::IpEndpoint;

/// Stack-side identifier of one UDP entity.
pub type RawHandle = usize;

/// The UDP/IP stack as the socket layer consumes it.
///
/// Backends deliver received datagrams by calling
/// [`crate::net::socket::dispatch`]; sends hand the payload over
/// synchronously and the backend owns its transmit buffers from then on,
/// including when the send fails inside the stack.
pub trait IpStack: Send + Sync {
	/// Creates a UDP entity bound to `local_port`.
	fn udp_open(&self, local_port: u16) -> Result<RawHandle>;

	/// Destroys a UDP entity. Unknown handles are ignored.
	fn udp_close(&self, handle: RawHandle);

	/// Sends one datagram to `remote`.
	fn udp_send(&self, handle: RawHandle, remote: IpEndpoint, payload: &[u8]) -> Result<()>;

	/// The assigned local IPv4 address, once there is one.
	fn local_ip(&self) -> Option<Ipv4Address>;

	/// Gives the stack a chance to move packets. Poll-driven backends
	/// deliver pending datagrams from here; callback-driven ones need not
	/// implement it.
	fn poll(&self) {}
}

/// Ethernet PHY notification, forwarded from the stack's link callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
	Up,
	Down,
}

/// Whether a link notification has been seen since boot.
static LINK_KNOWN: AtomicBool = AtomicBool::new(false);
/// Last notified link state. Meaningless until `LINK_KNOWN`.
static LINK_UP: AtomicBool = AtomicBool::new(false);

/// Link notification entry point. ISR-safe: two plain stores.
pub fn notify_link(event: LinkEvent) {
	LINK_UP.store(event == LinkEvent::Up, Ordering::Relaxed);
	LINK_KNOWN.store(true, Ordering::Release);
}

/// Cached link state, read without locking. Until the first notification
/// arrives the state is inferred from having a non-zero local address.
pub fn link_up(stack: &dyn IpStack) -> bool {
	if LINK_KNOWN.load(Ordering::Acquire) {
		LINK_UP.load(Ordering::Relaxed)
	} else {
		stack
			.local_ip()
			.is_some_and(|address| !address.is_unspecified())
	}
}

#[cfg(test)]
pub(crate) fn reset_link() {
	LINK_KNOWN.store(false, Ordering::Relaxed);
	LINK_UP.store(false, Ordering::Relaxed);
}

/// Parses a dotted-quad IPv4 address, rejecting octets above 255.
pub fn ipv4_from_str(text: &str) -> Result<Ipv4Address> {
	text.parse().map_err(|_| Error::InvalidArgument)
}

/// The four octets of `address` in network order.
pub fn ipv4_octets(address: Ipv4Address) -> [u8; 4] {
	address.octets()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{self, MockStack};

	#[test]
	fn dotted_quad_conversion() {
		assert_eq!(
			ipv4_from_str("192.168.1.20"),
			Ok(Ipv4Address::new(192, 168, 1, 20))
		);
		assert_eq!(
			ipv4_octets(Ipv4Address::new(10, 0, 0, 7)),
			[10, 0, 0, 7]
		);

		assert_eq!(ipv4_from_str("192.168.1.256"), Err(Error::InvalidArgument));
		assert_eq!(ipv4_from_str("192.168.1"), Err(Error::InvalidArgument));
		assert_eq!(ipv4_from_str("not an address"), Err(Error::InvalidArgument));
	}

	#[test]
	fn link_heuristic_before_first_notification() {
		let _guard = test_support::serialize();
		let stack = MockStack::new();

		assert!(!link_up(&stack));
		stack.set_ip(Some(Ipv4Address::new(10, 0, 0, 2)));
		assert!(link_up(&stack));
	}

	#[test]
	fn notifications_override_the_heuristic() {
		let _guard = test_support::serialize();
		let stack = MockStack::new();
		stack.set_ip(Some(Ipv4Address::new(10, 0, 0, 2)));

		notify_link(LinkEvent::Down);
		assert!(!link_up(&stack));

		notify_link(LinkEvent::Up);
		assert!(link_up(&stack));
	}
}
