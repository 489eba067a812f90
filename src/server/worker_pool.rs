//! A bounded pool of long-lived worker tasks.
//!
//! Each worker owns a channel that carries at most one job. Idle workers park on a LIFO ready
//! list, so the most recently used worker (whose stack and buffers are still warm) takes the next
//! job. A cleaner task stops workers that stay idle longer than the configured duration.

use crate::transport::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// The function a worker runs for each job.
pub(crate) type Work<J> = Arc<dyn Fn(J) -> BoxFuture<'static, ()> + Send + Sync>;

/// A message to a worker.
enum Message<J> {
	/// Run a job.
	Job(J),

	/// Exit.
	Stop,
}

/// An idle worker.
struct Ready<J> {
	/// The worker’s channel.
	tx: mpsc::Sender<Message<J>>,

	/// When the worker finished its last job.
	last_use: Instant,
}

/// The mutable part of the pool.
struct State<J> {
	/// Idle workers, least recently used first.
	ready: Vec<Ready<J>>,

	/// The number of live workers, idle or busy.
	workers: usize,

	/// Whether the pool has been stopped.
	stopped: bool,
}

/// The shared part of the pool.
struct Shared<J> {
	/// The largest number of workers.
	max_workers: usize,

	/// The time after which an idle worker is stopped.
	max_idle: Duration,

	/// The work function.
	work: Work<J>,

	/// The mutable state.
	state: Mutex<State<J>>,
}

/// A pool of worker tasks.
pub(crate) struct WorkerPool<J: Send + 'static> {
	shared: Arc<Shared<J>>,
}

impl<J: Send + 'static> WorkerPool<J> {
	/// Creates a pool with at most `max_workers` workers running `work`, and starts its cleaner.
	///
	/// Must be called within a `tokio` runtime.
	pub(crate) fn start(max_workers: usize, max_idle: Duration, work: Work<J>) -> Self {
		let shared = Arc::new(Shared {
			max_workers: std::cmp::max(max_workers, 1),
			max_idle,
			work,
			state: Mutex::new(State {
				ready: Vec::new(),
				workers: 0,
				stopped: false,
			}),
		});
		let _ = tokio::spawn(clean(Arc::downgrade(&shared)));
		Self { shared }
	}

	/// Hands `job` to an idle worker, or to a new one if the pool is not full.
	///
	/// # Errors
	/// This function gives the job back if every worker is busy or the pool is stopped.
	pub(crate) fn serve(&self, job: J) -> Result<(), J> {
		let tx = {
			let mut state = self.shared.state.lock();
			if state.stopped {
				return Err(job);
			}
			match state.ready.pop() {
				Some(ready) => ready.tx,
				None if state.workers < self.shared.max_workers => {
					state.workers += 1;
					let (tx, rx) = mpsc::channel(1);
					let _ = tokio::spawn(run(Arc::clone(&self.shared), tx.clone(), rx));
					tx
				}
				None => return Err(job),
			}
		};
		match tx.try_send(Message::Job(job)) {
			Ok(()) => Ok(()),
			Err(e) => match e.into_inner() {
				Message::Job(job) => Err(job),
				Message::Stop => Ok(()),
			},
		}
	}

	/// Stops every idle worker and makes busy workers exit after their current job.
	pub(crate) fn stop(&self) {
		let ready = {
			let mut state = self.shared.state.lock();
			state.stopped = true;
			std::mem::take(&mut state.ready)
		};
		for worker in ready {
			let _ = worker.tx.try_send(Message::Stop);
		}
	}

	/// Returns the number of live workers.
	#[cfg(test)]
	pub(crate) fn workers(&self) -> usize {
		self.shared.state.lock().workers
	}
}

impl<J: Send + 'static> Drop for WorkerPool<J> {
	fn drop(&mut self) {
		self.stop();
	}
}

/// Decrements the worker count when a worker exits, including by panic.
struct WorkerGuard<J>(Arc<Shared<J>>);

impl<J> Drop for WorkerGuard<J> {
	fn drop(&mut self) {
		self.0.state.lock().workers -= 1;
	}
}

/// The body of a worker task.
async fn run<J: Send + 'static>(
	shared: Arc<Shared<J>>,
	tx: mpsc::Sender<Message<J>>,
	mut rx: mpsc::Receiver<Message<J>>,
) {
	let guard = WorkerGuard(shared);
	while let Some(Message::Job(job)) = rx.recv().await {
		(guard.0.work)(job).await;
		let mut state = guard.0.state.lock();
		if state.stopped {
			break;
		}
		state.ready.push(Ready {
			tx: tx.clone(),
			last_use: Instant::now(),
		});
	}
}

/// Periodically stops workers idle for longer than the pool’s limit.
async fn clean<J>(shared: std::sync::Weak<Shared<J>>) {
	loop {
		let max_idle = match shared.upgrade() {
			Some(shared) => shared.max_idle,
			None => return,
		};
		tokio::time::sleep(max_idle).await;
		let Some(strong) = shared.upgrade() else {
			return;
		};
		let Some(cutoff) = Instant::now().checked_sub(max_idle) else {
			continue;
		};
		let expired: Vec<Ready<J>> = {
			let mut state = strong.state.lock();
			if state.stopped {
				return;
			}
			let n = state
				.ready
				.iter()
				.take_while(|r| r.last_use <= cutoff)
				.count();
			state.ready.drain(..n).collect()
		};
		if !expired.is_empty() {
			tracing::trace!(count = expired.len(), "stopping idle workers");
		}
		for worker in expired {
			let _ = worker.tx.try_send(Message::Stop);
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use tokio::sync::oneshot;

	/// Builds a pool whose jobs are oneshot receivers the worker waits on.
	fn pool(max: usize, max_idle: Duration) -> WorkerPool<oneshot::Receiver<()>> {
		WorkerPool::start(
			max,
			max_idle,
			Arc::new(|rx: oneshot::Receiver<()>| -> BoxFuture<'static, ()> {
				Box::pin(async move {
					let _ = rx.await;
				})
			}),
		)
	}

	/// Tests that jobs beyond the worker limit are refused and served again once a worker frees up.
	#[tokio::test]
	async fn test_limit() {
		let pool = pool(2, Duration::from_secs(60));
		let (a_tx, a_rx) = oneshot::channel();
		let (_b_tx, b_rx) = oneshot::channel();
		assert!(pool.serve(a_rx).is_ok());
		assert!(pool.serve(b_rx).is_ok());
		let (_c_tx, c_rx) = oneshot::channel();
		let c_rx = pool.serve(c_rx).unwrap_err();
		assert_eq!(pool.workers(), 2);

		a_tx.send(()).unwrap();
		let mut c_rx = Some(c_rx);
		for _ in 0..100 {
			match pool.serve(c_rx.take().unwrap()) {
				Ok(()) => break,
				Err(back) => c_rx = Some(back),
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		assert!(c_rx.is_none());
		assert_eq!(pool.workers(), 2);
	}

	/// Tests that idle workers are stopped by the cleaner.
	#[tokio::test]
	async fn test_idle_workers_exit() {
		let pool = pool(4, Duration::from_millis(20));
		let (tx, rx) = oneshot::channel();
		assert!(pool.serve(rx).is_ok());
		tx.send(()).unwrap();
		for _ in 0..100 {
			if pool.workers() == 0 {
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		assert_eq!(pool.workers(), 0);
	}

	/// Tests that a panicking job gives its worker slot back.
	#[tokio::test]
	async fn test_panic_releases_slot() {
		let pool: WorkerPool<()> = WorkerPool::start(
			1,
			Duration::from_secs(60),
			Arc::new(|()| -> BoxFuture<'static, ()> { Box::pin(async { panic!("handler failure") }) }),
		);
		assert!(pool.serve(()).is_ok());
		for _ in 0..100 {
			if pool.workers() == 0 {
				break;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		assert_eq!(pool.workers(), 0);
		assert!(pool.serve(()).is_ok());
	}
}
