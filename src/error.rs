//! Crate-wide error taxonomy.
//!
//! Every fallible operation reports one of these variants; there is no
//! application-level retry machinery. Fatal conditions (bring-up failures,
//! structural corruption) do not appear here; they halt the node through
//! [`crate::fatal`] instead of propagating.

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
	/// Caller-supplied value out of range.
	#[error("invalid argument")]
	InvalidArgument,
	/// Output buffer capacity insufficient for the packet.
	#[error("buffer too small")]
	BufferTooSmall,
	/// Received bytes violate the framing rules.
	#[error("malformed message")]
	InvalidMessage,
	/// Resource held or result not yet available; poll again.
	#[error("busy")]
	Busy,
	/// A bounded wait expired. Normal control-flow signal.
	#[error("timed out")]
	Timeout,
	/// A fixed pool (socket slots, datagram records, stack buffers) is
	/// exhausted.
	#[error("out of memory")]
	NoMemory,
	/// The underlying IP stack reported a failure.
	#[error("network stack error")]
	NetError,
	/// The Ethernet link is down; the data path is unavailable.
	#[error("link down")]
	LinkDown,
	/// The socket was closed while the operation was in progress.
	#[error("socket closed")]
	Closed,
}

pub type Result<T> = core::result::Result<T, Error>;
