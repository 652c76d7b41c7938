use core::sync::atomic::{AtomicIsize, Ordering};

use crate::config;
use crate::time::{Clock, Duration};

/// A counting semaphore usable from interrupt context.
///
/// [`Semaphore::release`] is a single atomic add and may be called from an
/// ISR. [`Semaphore::acquire`] polls the counter with short task delays, so
/// it must only run in task context. There is no wait queue; the crate does
/// not schedule tasks itself.
pub struct Semaphore {
	/// Resource available count.
	count: AtomicIsize,
}

impl Semaphore {
	/// Creates a new semaphore with the initial count specified.
	pub const fn new(count: isize) -> Self {
		Self {
			count: AtomicIsize::new(count),
		}
	}

	/// Takes one resource if any is available.
	pub fn try_acquire(&self) -> bool {
		self.count
			.fetch_update(Ordering::Acquire, Ordering::Relaxed, |count| {
				(count > 0).then(|| count - 1)
			})
			.is_ok()
	}

	/// Takes one resource, waiting up to `timeout` for it to appear.
	///
	/// With `timeout == None` the wait is unbounded. Returns whether a
	/// resource was obtained.
	pub fn acquire(&self, clock: &dyn Clock, timeout: Option<Duration>) -> bool {
		let deadline = timeout.map(|timeout| clock.now() + timeout);

		loop {
			if self.try_acquire() {
				return true;
			}

			if let Some(deadline) = deadline {
				if clock.now() >= deadline {
					return false;
				}
			}

			clock.delay(config::RECV_POLL_INTERVAL);
		}
	}

	/// Returns one resource, waking at most one poller.
	pub fn release(&self) {
		self.count.fetch_add(1, Ordering::Release);
	}
}
