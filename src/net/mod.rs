//! Network service loop.
//!
//! Bring-up walks WaitLink → WaitIp → Ready against a 30 s deadline per
//! phase; a lost link drops the task back to WaitLink and the bound socket
//! survives the outage. In Ready the task blocks on the control socket and
//! dispatches the application protocol: pings are answered, commands are
//! applied, everything else is logged and dropped.

pub mod iface;
pub mod socket;
pub mod stack;

use log::{debug, info, warn};

use crate::config;
use crate::error::Error;
use crate::logging;
use crate::protocol::{self, CommandCode, CommandPayload, ConfigParam, MessageType, StatusPayload};
use crate::state::{self, AcquisitionState, NetworkState, ACQ_STATS, CONFIG, NET_STATS};
use crate::net::socket::UdpSocket;
use crate::net::stack::{IpEndpoint, IpStack};
use crate::time::{Clock, Instant};

/// What a received frame asks of the node. Computed from the borrowed
/// receive buffer, acted upon afterwards.
enum Request {
	Ping,
	Pong { sequence: u16 },
	Command(CommandPayload),
	Ignored { message_type: u8 },
	Malformed,
}

pub struct NetworkTask<'a> {
	clock: &'a dyn Clock,
	stack: &'static dyn IpStack,
	socket: Option<UdpSocket>,
	/// Deadline of the bring-up phase currently in progress.
	phase_deadline: Option<Instant>,
	rx: [u8; config::MAX_PAYLOAD],
	tx: [u8; config::MAX_PAYLOAD],
}

impl<'a> NetworkTask<'a> {
	pub fn new(clock: &'a dyn Clock, stack: &'static dyn IpStack) -> Self {
		Self {
			clock,
			stack,
			socket: None,
			phase_deadline: None,
			rx: [0; config::MAX_PAYLOAD],
			tx: [0; config::MAX_PAYLOAD],
		}
	}

	/// Task entry point.
	pub fn run(&mut self) -> ! {
		info!("network task up");
		loop {
			self.poll();
		}
	}

	/// One iteration of the task loop.
	pub fn poll(&mut self) {
		match state::network_state() {
			NetworkState::Init => self.enter(NetworkState::WaitLink),
			NetworkState::WaitLink => self.wait_link(),
			NetworkState::WaitIp => self.wait_ip(),
			NetworkState::Ready => self.serve(),
			NetworkState::Error => self.clock.delay(config::ERROR_IDLE_DELAY),
		}
	}

	fn enter(&mut self, next: NetworkState) {
		self.phase_deadline = match next {
			NetworkState::WaitLink | NetworkState::WaitIp => {
				Some(self.clock.now() + config::ACQUIRE_TIMEOUT)
			}
			_ => None,
		};
		debug!("network state -> {next:?}");
		state::set_network_state(next);
	}

	fn phase_expired(&self) -> bool {
		self.phase_deadline
			.is_some_and(|deadline| self.clock.now() >= deadline)
	}

	fn wait_link(&mut self) {
		if stack::link_up(self.stack) {
			info!("link up");
			self.enter(NetworkState::WaitIp);
		} else if self.phase_expired() {
			warn!("no link within {} s", config::ACQUIRE_TIMEOUT.secs());
			self.enter(NetworkState::Error);
		} else {
			self.clock.delay(config::LINK_POLL_INTERVAL);
		}
	}

	fn wait_ip(&mut self) {
		self.stack.poll();
		if let Some(address) = self.stack.local_ip() {
			info!("address acquired: {address}");
			self.bind_socket();
		} else if self.phase_expired() {
			warn!("no address within {} s", config::ACQUIRE_TIMEOUT.secs());
			self.enter(NetworkState::Error);
		} else {
			self.clock.delay(config::LINK_POLL_INTERVAL);
		}
	}

	/// Creates the control socket once; recoveries after a link flap reuse
	/// the bound socket.
	fn bind_socket(&mut self) {
		if self.socket.is_none() {
			match UdpSocket::bind(self.stack, config::LOCAL_PORT) {
				Ok(bound) => {
					info!("listening on udp port {}", config::LOCAL_PORT);
					state::set_data_socket(bound);
					self.socket = Some(bound);
				}
				Err(err) => {
					warn!("socket creation failed: {err}");
					self.enter(NetworkState::Error);
					return;
				}
			}
		}
		self.enter(NetworkState::Ready);
	}

	fn serve(&mut self) {
		if !stack::link_up(self.stack) {
			warn!("link lost, waiting for recovery");
			self.enter(NetworkState::WaitLink);
			return;
		}

		let Some(bound) = self.socket else {
			self.enter(NetworkState::Error);
			return;
		};

		match bound.recv_from(self.clock, &mut self.rx, config::RECV_TIMEOUT) {
			Ok((len, remote)) => {
				NET_STATS.record_received(len);
				self.handle_frame(len, remote);
			}
			Err(Error::Timeout) => {}
			Err(err) => {
				warn!("receive failed: {err}");
				NET_STATS.record_error();
			}
		}
	}

	fn handle_frame(&mut self, len: usize, remote: IpEndpoint) {
		let request = match protocol::parse(&self.rx[..len]) {
			Ok((header, payload)) => match MessageType::try_from(header.message_type) {
				Ok(MessageType::Ping) => Request::Ping,
				Ok(MessageType::Pong) => Request::Pong {
					sequence: header.sequence,
				},
				Ok(MessageType::Command) => match CommandPayload::parse(payload) {
					Ok(command) => Request::Command(command),
					Err(_) => Request::Malformed,
				},
				Ok(other) => Request::Ignored {
					message_type: other.into(),
				},
				Err(_) => Request::Ignored {
					message_type: header.message_type,
				},
			},
			Err(_) => Request::Malformed,
		};

		match request {
			Request::Ping => {
				debug!("ping from {remote}");
				self.send_pong(remote);
			}
			Request::Pong { sequence } => {
				debug!("pong from {remote} (sequence {sequence})");
			}
			Request::Command(command) => self.handle_command(command, remote),
			Request::Ignored { message_type } => {
				debug!("dropping message type {message_type:#04x} from {remote}");
			}
			Request::Malformed => {
				warn!("malformed packet from {remote}");
				NET_STATS.record_error();
			}
		}
	}

	fn handle_command(&mut self, command: CommandPayload, remote: IpEndpoint) {
		match CommandCode::try_from(command.code) {
			Ok(CommandCode::StartAcq) => {
				// The sender becomes the data destination, replacing any
				// previous target.
				state::set_transmit_target(remote);
				match state::acquisition_state() {
					AcquisitionState::Idle => {
						info!("acquisition started by {remote}");
						state::set_acquisition_state(AcquisitionState::Running);
					}
					AcquisitionState::Running => debug!("start while already running"),
					AcquisitionState::Error => warn!("start refused in error state"),
				}
			}
			Ok(CommandCode::StopAcq) => {
				if state::acquisition_state() == AcquisitionState::Running {
					info!("acquisition stopped");
					state::set_acquisition_state(AcquisitionState::Idle);
				}
			}
			Ok(CommandCode::GetStatus) => self.send_status(remote),
			Ok(CommandCode::Configure) => {
				Self::apply_config(command.param_type, command.value);
			}
			Err(_) => debug!("dropping unknown command {:#04x}", command.code),
		}
	}

	fn send_pong(&mut self, remote: IpEndpoint) {
		match protocol::build_pong(&mut self.tx) {
			Ok(len) => self.send_reply(len, remote),
			Err(err) => {
				warn!("pong build failed: {err}");
				NET_STATS.record_error();
			}
		}
	}

	/// Status replies always go to the requester, independent of the
	/// transmit target.
	fn send_status(&mut self, remote: IpEndpoint) {
		let status = StatusPayload {
			acquiring: state::acquisition_state() == AcquisitionState::Running,
			channel: CONFIG.channel(),
			threshold_mv: CONFIG.threshold_mv(),
			uptime_seconds: (self.clock.now().total_millis() / 1000) as u32,
			samples_sent: ACQ_STATS.snapshot().samples_collected,
		};

		match protocol::build_status(&mut self.tx, &status) {
			Ok(len) => self.send_reply(len, remote),
			Err(err) => {
				warn!("status build failed: {err}");
				NET_STATS.record_error();
			}
		}
	}

	fn send_reply(&mut self, len: usize, remote: IpEndpoint) {
		let Some(bound) = self.socket else {
			NET_STATS.record_error();
			return;
		};
		match bound.send_to(remote, &self.tx[..len]) {
			Ok(()) => NET_STATS.record_sent(len),
			Err(err) => {
				warn!("reply to {remote} failed: {err}");
				NET_STATS.record_error();
			}
		}
	}

	/// Applies one CONFIGURE parameter. Out-of-range values are rejected
	/// and unknown tags ignored, in both cases silently on the wire.
	fn apply_config(param_type: u8, value: u16) {
		let applied = match ConfigParam::try_from(param_type) {
			Ok(ConfigParam::ThresholdPercent) => CONFIG.set_threshold_percent(value),
			Ok(ConfigParam::ThresholdMv) => CONFIG.set_threshold_mv(value),
			Ok(ConfigParam::BatchSize) => CONFIG.set_batch_size(value),
			Ok(ConfigParam::Channel) => u8::try_from(value)
				.map_err(|_| Error::InvalidArgument)
				.and_then(|channel| CONFIG.set_channel(channel)),
			Ok(ConfigParam::ResetSequence) => {
				protocol::reset_sequence();
				Ok(())
			}
			Ok(ConfigParam::LogLevel) => u8::try_from(value)
				.ok()
				.and_then(|raw| logging::Level::try_from(raw).ok())
				.map(|level| {
					logging::set_level(level);
				})
				.ok_or(Error::InvalidArgument),
			Err(_) => {
				debug!("ignoring unknown config parameter {param_type}");
				return;
			}
		};

		match applied {
			Ok(()) => info!("config parameter {param_type} set to {value}"),
			Err(err) => warn!("config parameter {param_type} = {value} rejected: {err}"),
		}
	}
}
