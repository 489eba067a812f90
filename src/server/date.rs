use parking_lot::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// The formatted value of the `Date` header, refreshed at most once a second.
#[derive(Debug, Default)]
pub(crate) struct DateCache {
	/// The second the value was formatted for, and the value.
	current: Mutex<(u64, Vec<u8>)>,
}

impl DateCache {
	/// Calls `f` with the current date.
	pub(crate) fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
		let now = SystemTime::now();
		let second = now
			.duration_since(UNIX_EPOCH)
			.map_or(0, |d| d.as_secs());
		let mut current = self.current.lock();
		if current.0 != second || current.1.is_empty() {
			current.1.clear();
			current
				.1
				.extend_from_slice(httpdate::fmt_http_date(now).as_bytes());
			current.0 = second;
		}
		f(&current.1)
	}

	/// Returns a copy of the current date.
	pub(crate) fn get(&self) -> Vec<u8> {
		self.with(<[u8]>::to_vec)
	}
}
