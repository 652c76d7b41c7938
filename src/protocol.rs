//! Application packet codec.
//!
//! Pure byte-level build and parse; no I/O. Every packet starts with a
//! 7-byte little-endian header:
//!
//! | offset | size | field          |
//! |--------|------|----------------|
//! | 0      | 2    | magic `0xDA7A` |
//! | 2      | 1    | message type   |
//! | 3      | 2    | sequence       |
//! | 5      | 2    | payload length |
//!
//! The only state in the codec is the node-wide sequence counter, bumped
//! exactly once per successfully built packet. Both task loops build
//! packets, so the counter is a bare atomic.

use core::sync::atomic::{AtomicU16, Ordering};

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::config;
use crate::error::{Error, Result};

/// Constant leading every application packet, `7A DA` on the wire.
pub const MAGIC: u16 = 0xDA7A;

/// Size of the packet header.
pub const HEADER_LEN: usize = 7;

/// Fixed part of a DATA payload (channel, reserved, sample count).
pub const DATA_HEADER_LEN: usize = 4;

/// Size of a COMMAND payload.
pub const COMMAND_PAYLOAD_LEN: usize = 4;

/// Size of a STATUS payload.
pub const STATUS_PAYLOAD_LEN: usize = 12;

/// Most samples one DATA payload can carry without exceeding
/// [`config::MAX_DATA_PAYLOAD`].
pub const MAX_DATA_SAMPLES: usize = (config::MAX_DATA_PAYLOAD - DATA_HEADER_LEN) / 2;

#[derive(TryFromPrimitive, IntoPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
	Ping = 0x01,
	Pong = 0x02,
	Data = 0x10,
	Command = 0x20,
	Status = 0x30,
}

#[derive(TryFromPrimitive, IntoPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
	StartAcq = 0x01,
	StopAcq = 0x02,
	GetStatus = 0x03,
	Configure = 0x04,
}

/// Parameter selector of the CONFIGURE command.
#[derive(TryFromPrimitive, IntoPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConfigParam {
	ThresholdPercent = 0,
	ThresholdMv = 1,
	BatchSize = 2,
	Channel = 3,
	ResetSequence = 4,
	LogLevel = 5,
}

/// Decoded packet header. The message type stays raw so the dispatcher can
/// log-and-drop unknown types; semantic validation is the caller's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
	pub message_type: u8,
	pub sequence: u16,
	pub payload_len: u16,
}

static SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Current value of the sequence counter (the value the next packet will
/// carry).
pub fn sequence() -> u16 {
	SEQUENCE.load(Ordering::Relaxed)
}

/// Resets the sequence counter, as requested by CONFIGURE.
pub fn reset_sequence() {
	SEQUENCE.store(0, Ordering::Relaxed);
}

#[cfg(test)]
pub(crate) fn set_sequence(value: u16) {
	SEQUENCE.store(value, Ordering::Relaxed);
}

/// Claims the next sequence number. Wraps at 65536. Only called once all
/// argument and capacity checks have passed, so a failed build never
/// advances the counter.
fn next_sequence() -> u16 {
	SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

fn write_header(buf: &mut [u8], message_type: MessageType, payload_len: u16) {
	buf[0..2].copy_from_slice(&MAGIC.to_le_bytes());
	buf[2] = message_type.into();
	buf[3..5].copy_from_slice(&next_sequence().to_le_bytes());
	buf[5..7].copy_from_slice(&payload_len.to_le_bytes());
}

/// Builds a PING packet. Empty payload.
pub fn build_ping(buf: &mut [u8]) -> Result<usize> {
	build_empty(buf, MessageType::Ping)
}

/// Builds a PONG packet. Empty payload.
pub fn build_pong(buf: &mut [u8]) -> Result<usize> {
	build_empty(buf, MessageType::Pong)
}

fn build_empty(buf: &mut [u8], message_type: MessageType) -> Result<usize> {
	if buf.len() < HEADER_LEN {
		return Err(Error::BufferTooSmall);
	}

	write_header(buf, message_type, 0);
	Ok(HEADER_LEN)
}

/// Builds a DATA packet carrying one batch of samples in acquisition order.
pub fn build_data(buf: &mut [u8], channel: u8, samples: &[u16]) -> Result<usize> {
	if channel > config::MAX_CHANNEL || samples.len() > MAX_DATA_SAMPLES {
		return Err(Error::InvalidArgument);
	}

	let payload_len = DATA_HEADER_LEN + 2 * samples.len();
	let total = HEADER_LEN + payload_len;
	if buf.len() < total {
		return Err(Error::BufferTooSmall);
	}

	write_header(buf, MessageType::Data, payload_len as u16);
	buf[7] = channel;
	buf[8] = 0;
	buf[9..11].copy_from_slice(&(samples.len() as u16).to_le_bytes());
	for (slot, sample) in buf[11..total].chunks_exact_mut(2).zip(samples) {
		slot.copy_from_slice(&sample.to_le_bytes());
	}

	Ok(total)
}

/// Builds a COMMAND packet (host side of the control protocol).
pub fn build_command(buf: &mut [u8], code: CommandCode, param_type: u8, value: u16) -> Result<usize> {
	let total = HEADER_LEN + COMMAND_PAYLOAD_LEN;
	if buf.len() < total {
		return Err(Error::BufferTooSmall);
	}

	write_header(buf, MessageType::Command, COMMAND_PAYLOAD_LEN as u16);
	buf[7] = code.into();
	buf[8] = param_type;
	buf[9..11].copy_from_slice(&value.to_le_bytes());

	Ok(total)
}

/// Builds a STATUS packet.
pub fn build_status(buf: &mut [u8], status: &StatusPayload) -> Result<usize> {
	let total = HEADER_LEN + STATUS_PAYLOAD_LEN;
	if buf.len() < total {
		return Err(Error::BufferTooSmall);
	}

	write_header(buf, MessageType::Status, STATUS_PAYLOAD_LEN as u16);
	buf[7] = status.acquiring.into();
	buf[8] = status.channel;
	buf[9..11].copy_from_slice(&status.threshold_mv.to_le_bytes());
	buf[11..15].copy_from_slice(&status.uptime_seconds.to_le_bytes());
	buf[15..19].copy_from_slice(&status.samples_sent.to_le_bytes());

	Ok(total)
}

/// Splits a received frame into header and payload view.
///
/// Only framing is checked: minimum length, magic, and that the declared
/// payload fits the frame. Trailing bytes beyond the declared payload are
/// ignored. Payload contents are not validated here.
pub fn parse(frame: &[u8]) -> Result<(Header, &[u8])> {
	if frame.len() < HEADER_LEN {
		return Err(Error::InvalidMessage);
	}
	if u16::from_le_bytes([frame[0], frame[1]]) != MAGIC {
		return Err(Error::InvalidMessage);
	}

	let header = Header {
		message_type: frame[2],
		sequence: u16::from_le_bytes([frame[3], frame[4]]),
		payload_len: u16::from_le_bytes([frame[5], frame[6]]),
	};

	let end = HEADER_LEN + usize::from(header.payload_len);
	if frame.len() < end {
		return Err(Error::InvalidMessage);
	}

	Ok((header, &frame[HEADER_LEN..end]))
}

/// Body of a COMMAND packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandPayload {
	pub code: u8,
	pub param_type: u8,
	pub value: u16,
}

impl CommandPayload {
	pub fn parse(payload: &[u8]) -> Result<Self> {
		if payload.len() < COMMAND_PAYLOAD_LEN {
			return Err(Error::InvalidMessage);
		}
		Ok(Self {
			code: payload[0],
			param_type: payload[1],
			value: u16::from_le_bytes([payload[2], payload[3]]),
		})
	}
}

/// Body of a STATUS packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPayload {
	pub acquiring: bool,
	pub channel: u8,
	pub threshold_mv: u16,
	pub uptime_seconds: u32,
	pub samples_sent: u32,
}

impl StatusPayload {
	pub fn parse(payload: &[u8]) -> Result<Self> {
		if payload.len() < STATUS_PAYLOAD_LEN {
			return Err(Error::InvalidMessage);
		}
		Ok(Self {
			acquiring: payload[0] != 0,
			channel: payload[1],
			threshold_mv: u16::from_le_bytes([payload[2], payload[3]]),
			uptime_seconds: u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]),
			samples_sent: u32::from_le_bytes([payload[8], payload[9], payload[10], payload[11]]),
		})
	}
}

/// Body of a DATA packet. The sample words stay borrowed; callers that need
/// values use [`DataPayload::samples`].
#[derive(Debug, Clone, Copy)]
pub struct DataPayload<'a> {
	pub channel: u8,
	pub sample_count: u16,
	raw_samples: &'a [u8],
}

impl<'a> DataPayload<'a> {
	pub fn parse(payload: &'a [u8]) -> Result<Self> {
		if payload.len() < DATA_HEADER_LEN {
			return Err(Error::InvalidMessage);
		}
		let sample_count = u16::from_le_bytes([payload[2], payload[3]]);
		let end = DATA_HEADER_LEN + 2 * usize::from(sample_count);
		if payload.len() < end {
			return Err(Error::InvalidMessage);
		}
		Ok(Self {
			channel: payload[0],
			sample_count,
			raw_samples: &payload[DATA_HEADER_LEN..end],
		})
	}

	pub fn samples(&self) -> impl Iterator<Item = u16> + 'a {
		self.raw_samples
			.chunks_exact(2)
			.map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
	}
}
