//! Object and buffer pools.
//!
//! Request handling acquires its messages, contexts and I/O buffers from pools and releases them
//! afterwards, so a server or client in steady state allocates nothing per request. A pool is a
//! short critical section around a free list; the lock is never held while an item is in use.
//!
//! Ownership moves out of the pool on [`Pool::acquire`] and back in on [`Pool::release`]. Every
//! released item is reset before it becomes available again.

use parking_lot::Mutex;

/// The default number of idle items a pool keeps.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// An object that can be returned to its initial state while keeping its allocations.
pub trait Reset {
	/// Clears all contents.
	fn reset(&mut self);
}

impl Reset for Vec<u8> {
	fn reset(&mut self) {
		self.clear();
	}
}

/// A free list of reusable objects.
#[derive(Debug)]
pub struct Pool<T> {
	/// Idle objects.
	items: Mutex<Vec<T>>,

	/// The number of idle objects beyond which released objects are dropped.
	max_idle: usize,
}

impl<T: Reset + Default> Pool<T> {
	/// Creates an empty pool retaining at most `max_idle` idle objects.
	pub fn new(max_idle: usize) -> Self {
		Self {
			items: Mutex::new(Vec::new()),
			max_idle,
		}
	}

	/// Takes an object from the pool, or creates a new one if the pool is empty.
	pub fn acquire(&self) -> T {
		self.items.lock().pop().unwrap_or_default()
	}

	/// Resets an object and gives it back to the pool.
	pub fn release(&self, mut item: T) {
		item.reset();
		let mut items = self.items.lock();
		if items.len() < self.max_idle {
			items.push(item);
		}
	}

	/// Returns the number of idle objects.
	pub fn idle(&self) -> usize {
		self.items.lock().len()
	}
}

impl<T: Reset + Default> Default for Pool<T> {
	fn default() -> Self {
		Self::new(DEFAULT_MAX_IDLE)
	}
}

/// A pool of read and write buffers of fixed sizes.
#[derive(Debug)]
pub struct BufferPool {
	/// Size of each read buffer.
	read_size: usize,

	/// Capacity of each write buffer.
	write_size: usize,

	/// Idle read buffers, each of length `read_size`.
	read: Mutex<Vec<Vec<u8>>>,

	/// Idle write buffers, each empty with capacity `write_size`.
	write: Mutex<Vec<Vec<u8>>>,

	/// The number of idle buffers of each kind beyond which released buffers are dropped.
	max_idle: usize,
}

impl BufferPool {
	/// Creates a pool handing out read buffers of `read_size` bytes and write buffers of
	/// `write_size` bytes.
	pub fn new(read_size: usize, write_size: usize) -> Self {
		Self {
			read_size: std::cmp::max(read_size, 1),
			write_size: std::cmp::max(write_size, 1),
			read: Mutex::new(Vec::new()),
			write: Mutex::new(Vec::new()),
			max_idle: DEFAULT_MAX_IDLE,
		}
	}

	/// Returns the size of the read buffers.
	pub fn read_size(&self) -> usize {
		self.read_size
	}

	/// Takes a read buffer.
	pub fn acquire_read(&self) -> Vec<u8> {
		self.read
			.lock()
			.pop()
			.unwrap_or_else(|| vec![0; self.read_size])
	}

	/// Takes an empty write buffer.
	pub fn acquire_write(&self) -> Vec<u8> {
		self.write
			.lock()
			.pop()
			.unwrap_or_else(|| Vec::with_capacity(self.write_size))
	}

	/// Returns a read buffer to the pool.
	///
	/// Buffers of the wrong size are dropped.
	pub fn release_read(&self, buf: Vec<u8>) {
		if buf.len() == self.read_size {
			let mut idle = self.read.lock();
			if idle.len() < self.max_idle {
				idle.push(buf);
			}
		}
	}

	/// Returns a write buffer to the pool.
	///
	/// Buffers that have grown beyond twice the configured size are dropped.
	pub fn release_write(&self, mut buf: Vec<u8>) {
		buf.clear();
		if buf.capacity() >= self.write_size && buf.capacity() <= 2 * self.write_size {
			let mut idle = self.write.lock();
			if idle.len() < self.max_idle {
				idle.push(buf);
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	/// Tests that released objects are reset and reused with their allocation.
	#[test]
	fn test_reuse() {
		let pool: Pool<Vec<u8>> = Pool::new(4);
		let mut v = pool.acquire();
		v.extend_from_slice(b"hello");
		let capacity = v.capacity();
		pool.release(v);
		assert_eq!(pool.idle(), 1);
		let v = pool.acquire();
		assert!(v.is_empty());
		assert_eq!(v.capacity(), capacity);
		assert_eq!(pool.idle(), 0);
	}

	/// Tests that the pool does not grow past its idle limit.
	#[test]
	fn test_max_idle() {
		let pool: Pool<Vec<u8>> = Pool::new(1);
		pool.release(Vec::new());
		pool.release(Vec::new());
		assert_eq!(pool.idle(), 1);
	}

	/// Tests buffer sizes and size checks on release.
	#[test]
	fn test_buffers() {
		let pool = BufferPool::new(16, 8);
		let r = pool.acquire_read();
		assert_eq!(r.len(), 16);
		let w = pool.acquire_write();
		assert!(w.is_empty() && w.capacity() >= 8);
		pool.release_read(r);
		pool.release_read(vec![0; 3]);
		assert_eq!(pool.read.lock().len(), 1);
		pool.release_write(w);
		assert_eq!(pool.write.lock().len(), 1);
	}
}
