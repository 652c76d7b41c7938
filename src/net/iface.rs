//! smoltcp-backed implementation of the [`IpStack`] seam.
//!
//! One ticket mutex guards the interface, its socket set and the device;
//! received datagrams are copied out under the lock and dispatched into the
//! socket pool after it is released, so a receive callback may send without
//! deadlocking. Address configuration is either static or DHCPv4; DHCP
//! events update the interface address and the default route as they
//! arrive.

use alloc::vec;
use alloc::vec::Vec;

use hermit_sync::TicketMutex;
use log::{debug, info};
use smoltcp::iface::{Config, Interface, SocketHandle, SocketSet};
use smoltcp::phy::Device;
use smoltcp::socket::{dhcpv4, udp};
use smoltcp::wire::{EthernetAddress, HardwareAddress, IpCidr, Ipv4Address, Ipv4Cidr};

use crate::error::{Error, Result};
use crate::net::socket;
use crate::net::stack::{IpEndpoint, IpStack, RawHandle};
use crate::time::Clock;

/// Per-socket receive buffering inside smoltcp.
const RX_METADATA_SLOTS: usize = 8;
const RX_BUFFER_SIZE: usize = 16 * 1024;
/// Transmit side only ever holds packets briefly; sends poll immediately.
const TX_METADATA_SLOTS: usize = 4;
const TX_BUFFER_SIZE: usize = 4 * 1024;

/// How the interface obtains its IPv4 address.
pub enum IpConfig {
	/// Acquire an address lease over DHCPv4.
	Dhcp,
	/// Fixed address and optional default gateway.
	Static {
		address: Ipv4Cidr,
		gateway: Option<Ipv4Address>,
	},
}

struct Inner<D: Device> {
	iface: Interface,
	sockets: SocketSet<'static>,
	device: D,
	dhcp_handle: Option<SocketHandle>,
	/// Raw handle (index) to smoltcp handle; `None` marks closed entries.
	udp_handles: Vec<Option<SocketHandle>>,
}

/// The node's network interface over any smoltcp PHY device.
pub struct NetworkInterface<D: Device + Send> {
	inner: TicketMutex<Inner<D>>,
	clock: &'static dyn Clock,
}

impl<D: Device + Send> NetworkInterface<D> {
	pub fn new(
		mut device: D,
		mac: EthernetAddress,
		ip: IpConfig,
		clock: &'static dyn Clock,
	) -> Result<Self> {
		let mut config = Config::new(HardwareAddress::Ethernet(mac));
		config.random_seed = clock.now().total_micros() as u64;

		let mut iface = Interface::new(config, &mut device, clock.now());
		let mut sockets = SocketSet::new(Vec::new());

		let dhcp_handle = match ip {
			IpConfig::Dhcp => Some(sockets.add(dhcpv4::Socket::new())),
			IpConfig::Static { address, gateway } => {
				iface.update_ip_addrs(|addrs| {
					let _ = addrs.push(IpCidr::Ipv4(address));
				});
				if let Some(gateway) = gateway {
					iface
						.routes_mut()
						.add_default_ipv4_route(gateway)
						.map_err(|_| Error::NetError)?;
				}
				None
			}
		};

		Ok(Self {
			inner: TicketMutex::new(Inner {
				iface,
				sockets,
				device,
				dhcp_handle,
				udp_handles: Vec::new(),
			}),
			clock,
		})
	}
}

impl<D: Device + Send> Inner<D> {
	fn poll_common(&mut self, timestamp: crate::time::Instant) {
		let _ = self
			.iface
			.poll(timestamp, &mut self.device, &mut self.sockets);

		let Some(dhcp_handle) = self.dhcp_handle else {
			return;
		};
		match self.sockets.get_mut::<dhcpv4::Socket<'_>>(dhcp_handle).poll() {
			None => {}
			Some(dhcpv4::Event::Configured(config)) => {
				info!("DHCP lease acquired: {}", config.address);
				self.iface.update_ip_addrs(|addrs| {
					if let Some(dest) = addrs.iter_mut().next() {
						*dest = IpCidr::Ipv4(config.address);
					} else {
						let _ = addrs.push(IpCidr::Ipv4(config.address));
					}
				});
				if let Some(router) = config.router {
					let _ = self.iface.routes_mut().add_default_ipv4_route(router);
				} else {
					self.iface.routes_mut().remove_default_ipv4_route();
				}
			}
			Some(dhcpv4::Event::Deconfigured) => {
				info!("DHCP lease lost");
				let unspecified = Ipv4Cidr::new(Ipv4Address::UNSPECIFIED, 0);
				self.iface.update_ip_addrs(|addrs| {
					if let Some(dest) = addrs.iter_mut().next() {
						*dest = IpCidr::Ipv4(unspecified);
					}
				});
				self.iface.routes_mut().remove_default_ipv4_route();
			}
		}
	}
}

impl<D: Device + Send> IpStack for NetworkInterface<D> {
	fn udp_open(&self, local_port: u16) -> Result<RawHandle> {
		let rx_buffer = udp::PacketBuffer::new(
			vec![udp::PacketMetadata::EMPTY; RX_METADATA_SLOTS],
			vec![0; RX_BUFFER_SIZE],
		);
		let tx_buffer = udp::PacketBuffer::new(
			vec![udp::PacketMetadata::EMPTY; TX_METADATA_SLOTS],
			vec![0; TX_BUFFER_SIZE],
		);
		let mut udp_socket = udp::Socket::new(rx_buffer, tx_buffer);
		udp_socket.bind(local_port).map_err(|_| Error::NetError)?;

		let mut inner = self.inner.lock();
		let handle = inner.sockets.add(udp_socket);
		if let Some(raw) = inner.udp_handles.iter().position(Option::is_none) {
			inner.udp_handles[raw] = Some(handle);
			Ok(raw)
		} else {
			let raw = inner.udp_handles.len();
			inner.udp_handles.push(Some(handle));
			Ok(raw)
		}
	}

	fn udp_close(&self, raw: RawHandle) {
		let mut inner = self.inner.lock();
		if let Some(handle) = inner.udp_handles.get_mut(raw).and_then(Option::take) {
			inner.sockets.remove(handle);
		}
	}

	fn udp_send(&self, raw: RawHandle, remote: IpEndpoint, payload: &[u8]) -> Result<()> {
		let timestamp = self.clock.now();
		let mut inner = self.inner.lock();
		let handle = inner
			.udp_handles
			.get(raw)
			.copied()
			.flatten()
			.ok_or(Error::InvalidArgument)?;

		inner
			.sockets
			.get_mut::<udp::Socket<'_>>(handle)
			.send_slice(payload, remote)
			.map_err(|err| match err {
				udp::SendError::BufferFull => Error::NoMemory,
				udp::SendError::Unaddressable => Error::NetError,
			})?;

		// Flush the datagram toward the wire before returning.
		inner.poll_common(timestamp);
		Ok(())
	}

	fn local_ip(&self) -> Option<Ipv4Address> {
		self.inner
			.lock()
			.iface
			.ipv4_addr()
			.filter(|address| !address.is_unspecified())
	}

	fn poll(&self) {
		let timestamp = self.clock.now();
		let mut delivered: Vec<(RawHandle, IpEndpoint, Vec<u8>)> = Vec::new();

		{
			let mut inner = self.inner.lock();
			inner.poll_common(timestamp);

			let Inner {
				sockets,
				udp_handles,
				..
			} = &mut *inner;
			for (raw, handle) in udp_handles.iter().enumerate() {
				let Some(handle) = handle else { continue };
				let udp_socket = sockets.get_mut::<udp::Socket<'_>>(*handle);
				while let Ok((payload, metadata)) = udp_socket.recv() {
					delivered.push((raw, metadata.endpoint, payload.to_vec()));
				}
			}
		}

		// Dispatch with the interface unlocked.
		for (raw, remote, payload) in delivered {
			debug!("udp rx {} bytes from {}", payload.len(), remote);
			socket::dispatch(raw, remote, &payload);
		}
	}
}
