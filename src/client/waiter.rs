//! A request waiting for a connection to free up.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;

/// The state of a waiter.
enum Slot<T> {
	/// Nothing has been delivered and the waiter still wants something.
	Waiting,

	/// A value has been delivered but not yet collected.
	Ready(T),

	/// The waiter has collected its value or given up; any later delivery is refused.
	Done,
}

/// A one-shot handover point between the task releasing a connection and a task waiting for one.
///
/// A waiter that times out is marked done under the same lock a delivery takes, so a value is
/// either collected by the waiter or handed back to the deliverer, never lost.
pub(super) struct Waiter<T> {
	slot: Mutex<Slot<T>>,
	ready: Notify,
}

impl<T> Waiter<T> {
	pub(super) fn new() -> Arc<Self> {
		Arc::new(Self {
			slot: Mutex::new(Slot::Waiting),
			ready: Notify::new(),
		})
	}

	/// Returns `true` if the waiter still accepts a delivery.
	pub(super) fn is_waiting(&self) -> bool {
		matches!(*self.slot.lock(), Slot::Waiting)
	}

	/// Delivers `value`.
	///
	/// # Errors
	/// This function hands `value` back if the waiter has already given up or been served.
	pub(super) fn deliver(&self, value: T) -> Result<(), T> {
		{
			let mut slot = self.slot.lock();
			if !matches!(*slot, Slot::Waiting) {
				return Err(value);
			}
			*slot = Slot::Ready(value);
		}
		self.ready.notify_one();
		Ok(())
	}

	/// Waits for a delivery until `deadline`, returning `None` if nothing arrived in time.
	pub(super) async fn wait(&self, deadline: Instant) -> Option<T> {
		loop {
			if let Some(value) = self.take() {
				return Some(value);
			}
			if tokio::time::timeout_at(deadline, self.ready.notified())
				.await
				.is_err()
			{
				// A delivery racing with the deadline still wins.
				return self.cancel();
			}
		}
	}

	/// Refuses further deliveries, returning a value delivered but not yet collected.
	pub(super) fn cancel(&self) -> Option<T> {
		let mut slot = self.slot.lock();
		match std::mem::replace(&mut *slot, Slot::Done) {
			Slot::Ready(value) => Some(value),
			Slot::Waiting | Slot::Done => None,
		}
	}

	/// Collects a delivered value.
	fn take(&self) -> Option<T> {
		let mut slot = self.slot.lock();
		match std::mem::replace(&mut *slot, Slot::Done) {
			Slot::Ready(value) => Some(value),
			other => {
				*slot = other;
				None
			}
		}
	}
}
