//! Last-resort diagnostics and halt.
//!
//! Bring-up failures and fatal faults (stack overflow, memory corruption,
//! hard faults, IP-stack fatal errors) end here: one diagnostic line goes
//! straight over the UART hardware, bypassing the logger and its locks,
//! and the core parks in a low-power wait loop. Nothing returns.

use core::fmt::Write;

use hermit_sync::TicketMutex;

use crate::drivers::uart::UartHardware;
use crate::logging::LineBuffer;

static CONSOLE: TicketMutex<Option<&'static dyn UartHardware>> = TicketMutex::new(None);

/// Registers the raw console used by the fatal path.
pub fn install(console: &'static dyn UartHardware) {
	*CONSOLE.lock() = Some(console);
}

/// Emits a diagnostic line and halts the system.
pub fn fatal(message: &str) -> ! {
	report(format_args!("{message}"));
	halt()
}

fn report(args: core::fmt::Arguments<'_>) {
	let console = *CONSOLE.lock();
	if let Some(console) = console {
		let mut line = LineBuffer::new();
		let _ = write!(line, "FATAL: {args}");
		console.write_blocking(line.as_bytes());
		console.write_blocking(b"\r\n");
	}
}

/// Parks the core. On real hardware the board crate's idle hook turns this
/// into a wait-for-interrupt sleep; the loop is the portable fallback.
pub fn halt() -> ! {
	loop {
		core::hint::spin_loop();
	}
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
	report(format_args!("{info}"));
	halt()
}
