//! Level-filtered line logger behind the [`log`] facade.
//!
//! Records are rendered into a fixed line buffer, serialized by a mutex for
//! the duration of one line and handed to a [`LineSink`] (the UART driver).
//! The active level is runtime-mutable so the CONFIGURE command can lower or
//! raise it, including to [`Level::None`] which suppresses all output until
//! a later command re-enables it.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicU8, Ordering};

use hermit_sync::TicketMutex;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::config::LOG_LINE_CAPACITY;

/// Marker appended to lines that exceeded the line buffer.
const TRUNCATION_MARK: &[u8] = b"...[TRUNCATED]...";

/// Verbosity levels, least to most severe. The discriminants are the wire
/// encoding used by the CONFIGURE command.
#[derive(TryFromPrimitive, IntoPrimitive, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
	Debug = 0,
	Info = 1,
	Warning = 2,
	Error = 3,
	Critical = 4,
	/// Suppress all output.
	None = 5,
}

impl Level {
	fn from_record(level: log::Level) -> Self {
		match level {
			log::Level::Error => Level::Error,
			log::Level::Warn => Level::Warning,
			log::Level::Info => Level::Info,
			log::Level::Debug | log::Level::Trace => Level::Debug,
		}
	}

	fn tag(self) -> &'static str {
		match self {
			Level::Debug => "DEBUG",
			Level::Info => "INFO",
			Level::Warning => "WARNING",
			Level::Error => "ERROR",
			Level::Critical => "CRITICAL",
			Level::None => "NONE",
		}
	}
}

static LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// Sets the active log level.
pub fn set_level(level: Level) {
	LEVEL.store(level.into(), Ordering::Relaxed);
}

/// Returns the active log level.
pub fn level() -> Level {
	Level::try_from(LEVEL.load(Ordering::Relaxed)).unwrap_or(Level::None)
}

/// Consumer of finished log lines. Implementations block until the line has
/// left the device or a transmit deadline expires.
pub trait LineSink: Send + Sync {
	fn write_line(&self, line: &[u8]);
}

/// Fixed-capacity line assembly buffer. Overflowing writes are dropped and
/// the line is marked truncated.
pub(crate) struct LineBuffer {
	buf: [u8; LOG_LINE_CAPACITY],
	len: usize,
	truncated: bool,
}

impl LineBuffer {
	pub(crate) const fn new() -> Self {
		Self {
			buf: [0; LOG_LINE_CAPACITY],
			len: 0,
			truncated: false,
		}
	}

	/// Finished line, with the truncation mark stamped over the tail of an
	/// overflowed buffer.
	pub(crate) fn as_bytes(&mut self) -> &[u8] {
		if self.truncated {
			let tail = LOG_LINE_CAPACITY - TRUNCATION_MARK.len();
			self.buf[tail..].copy_from_slice(TRUNCATION_MARK);
			self.len = LOG_LINE_CAPACITY;
		}
		&self.buf[..self.len]
	}
}

impl fmt::Write for LineBuffer {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		let room = LOG_LINE_CAPACITY - self.len;
		let take = s.len().min(room);
		self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
		self.len += take;
		if take < s.len() {
			self.truncated = true;
		}
		Ok(())
	}
}

/// The logger registered with the [`log`] facade. The mutex both protects
/// the sink slot and serializes callers per line.
pub struct SerialLogger {
	sink: TicketMutex<Option<&'static dyn LineSink>>,
}

static LOGGER: SerialLogger = SerialLogger {
	sink: TicketMutex::new(None),
};

impl log::Log for SerialLogger {
	fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
		Level::from_record(metadata.level()) >= level() && level() != Level::None
	}

	fn log(&self, record: &log::Record<'_>) {
		if !self.enabled(record.metadata()) {
			return;
		}

		let mut line = LineBuffer::new();
		let _ = write!(
			line,
			"[{}] {}",
			Level::from_record(record.level()).tag(),
			record.args()
		);

		let guard = self.sink.lock();
		if let Some(sink) = *guard {
			sink.write_line(line.as_bytes());
		}
	}

	fn flush(&self) {}
}

/// Attaches the sink and registers the logger with the facade. Filtering
/// happens in [`SerialLogger::enabled`], so the facade itself stays wide
/// open.
pub fn init(sink: &'static dyn LineSink, level: Level) {
	*LOGGER.sink.lock() = Some(sink);
	set_level(level);
	// Re-registration only happens in tests; the facade keeps the first one.
	let _ = log::set_logger(&LOGGER);
	log::set_max_level(log::LevelFilter::Trace);
}
