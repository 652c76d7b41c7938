//! Node bring-up.
//!
//! The init task runs once at the highest priority: console and logging
//! first so later failures are visible, then the converter, then the two
//! long-lived task objects. Spawning them (network at
//! [`crate::config::NETWORK_TASK_PRIO`], acquisition at
//! [`crate::config::ACQUISITION_TASK_PRIO`]) is the embedding RTOS's job,
//! after which the init task exits.

use log::info;

use crate::acquisition::AcquisitionTask;
use crate::config;
use crate::drivers::adc::{AdcDriver, AdcHardware};
use crate::drivers::uart::{UartDriver, UartHardware};
use crate::error::Result;
use crate::fatal;
use crate::logging;
use crate::net::stack::IpStack;
use crate::net::NetworkTask;
use crate::time::Clock;

/// Brings the peripherals up and builds the two task objects.
///
/// An error here is a failed bring-up; the caller escalates it through
/// [`crate::fatal::fatal`].
pub fn init_node<'a, U, A>(
	clock: &'static dyn Clock,
	uart: &'static UartDriver<U>,
	adc: &'a AdcDriver<A>,
	stack: &'static dyn IpStack,
) -> Result<(NetworkTask<'static>, AcquisitionTask<'a, A>)>
where
	U: UartHardware + 'static,
	A: AdcHardware,
{
	logging::init(uart, logging::Level::Info);
	fatal::install(uart.hardware());
	info!(
		"daq-node {} booting (channel {}, threshold {} mV, batch {})",
		env!("CARGO_PKG_VERSION"),
		config::DEFAULT_CHANNEL,
		config::DEFAULT_THRESHOLD_MV,
		config::DEFAULT_BATCH_SIZE
	);

	adc.init(config::DEFAULT_CHANNEL)?;

	Ok((
		NetworkTask::new(clock, stack),
		AcquisitionTask::new(clock, adc),
	))
}
