//! The connection pool and request loop for one upstream host.

use super::config::{ConnPoolStrategy, HostClientConfig};
use super::dial::{split_host_port, Dial, TcpDialer};
use super::redirect::{self, Exchange};
use super::waiter::Waiter;
use crate::error::{Error, FramingError, ParseError, Phase};
use crate::message::{ReadOptions, Request, Response};
use crate::pool::BufferPool;
use crate::transport::{BoxFuture, BoxTransport, TlsConnect};
use crate::util::io::{AsyncWriteExt as _, BufConn};
use crate::util::{deadline, deadline_after};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;

/// A predicate deciding whether a failed request may be sent again.
pub(crate) type RetryIf = dyn Fn(&Request) -> bool + Send + Sync;

/// What a request waiting for a connection receives.
type Acquired = Result<ClientConn, Error>;

/// One unit of the host’s connection limit.
///
/// Dropping a slot frees the unit, or hands it on to a request waiting for a connection.
struct Slot(Weak<Shared>);

impl Drop for Slot {
	fn drop(&mut self) {
		if let Some(shared) = self.0.upgrade() {
			shared.release_slot();
		}
	}
}

/// A pooled connection.
struct ClientConn {
	conn: BufConn<BoxTransport>,
	created: Instant,
	last_use: Instant,
	slot: Slot,
}

/// The mutable part of the pool.
struct State {
	/// Connections ready for reuse, released last at the back.
	idle: VecDeque<ClientConn>,

	/// The number of open or opening connections.
	conns: usize,

	/// Requests waiting for a connection, oldest first.
	waiters: VecDeque<Arc<Waiter<Acquired>>>,

	/// Whether the idle sweeper is running.
	sweeping: bool,
}

struct Shared {
	config: HostClientConfig,
	addrs: Vec<String>,
	next_addr: AtomicUsize,
	dialer: Arc<dyn Dial>,
	tls: Option<Arc<dyn TlsConnect>>,
	retry_if: Option<Arc<RetryIf>>,
	buffers: BufferPool,
	state: Mutex<State>,
	pending: AtomicUsize,
	last_use: Mutex<Instant>,
}

/// Counts a request in flight.
struct Pending<'a>(&'a AtomicUsize);

impl<'a> Pending<'a> {
	fn new(counter: &'a AtomicUsize) -> Self {
		let _ = counter.fetch_add(1, Ordering::Relaxed);
		Self(counter)
	}
}

impl Drop for Pending<'_> {
	fn drop(&mut self) {
		let _ = self.0.fetch_sub(1, Ordering::Relaxed);
	}
}

/// Marks a waiter as gone when the waiting request finishes or is cancelled, returning a
/// connection delivered too late to the pool.
struct CancelWait<'a> {
	shared: &'a Arc<Shared>,
	waiter: &'a Waiter<Acquired>,
}

impl Drop for CancelWait<'_> {
	fn drop(&mut self) {
		if let Some(Ok(conn)) = self.waiter.cancel() {
			self.shared.release_conn(conn);
		}
	}
}

/// Returns the earlier of two optional deadlines.
fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
	match (a, b) {
		(Some(a), Some(b)) => Some(std::cmp::min(a, b)),
		(a, None) => a,
		(None, b) => b,
	}
}

impl Shared {
	fn max_conns(&self) -> usize {
		std::cmp::max(self.config.max_conns, 1)
	}

	/// Takes an idle connection, opens a new one, or waits for one.
	async fn acquire(self: &Arc<Self>, request_deadline: Option<Instant>) -> Result<ClientConn, Error> {
		enum Next {
			Idle(ClientConn),
			Dial(Slot, bool),
			Wait(Arc<Waiter<Acquired>>, Duration),
			Full,
		}

		let next = {
			let mut state = self.state.lock();
			let popped = match self.config.conn_pool_strategy {
				ConnPoolStrategy::Fifo => state.idle.pop_front(),
				ConnPoolStrategy::Lifo => state.idle.pop_back(),
			};
			match popped {
				Some(conn) => Next::Idle(conn),
				None if state.conns < self.max_conns() => {
					state.conns += 1;
					let start_sweeper = !state.sweeping;
					state.sweeping = true;
					Next::Dial(Slot(Arc::downgrade(self)), start_sweeper)
				}
				None => match self.config.max_conn_wait_timeout.filter(|d| !d.is_zero()) {
					Some(wait) => {
						state.waiters.retain(|w| w.is_waiting());
						let waiter = Waiter::new();
						state.waiters.push_back(Arc::clone(&waiter));
						Next::Wait(waiter, wait)
					}
					None => Next::Full,
				},
			}
		};

		match next {
			Next::Idle(conn) => Ok(conn),
			Next::Dial(slot, start_sweeper) => {
				if start_sweeper {
					let _ = tokio::spawn(sweep(Arc::downgrade(self)));
				}
				self.connect(slot, request_deadline).await
			}
			Next::Wait(waiter, wait) => {
				let _cancel = CancelWait {
					shared: self,
					waiter: &waiter,
				};
				let wait_deadline = Instant::now() + wait;
				let (until, request_bound) = match request_deadline {
					Some(d) if d <= wait_deadline => (d, true),
					_ => (wait_deadline, false),
				};
				match waiter.wait(until).await {
					Some(acquired) => acquired,
					None if request_bound => Err(Error::Timeout(Phase::Wait)),
					None => Err(Error::NoFreeConnection),
				}
			}
			Next::Full => Err(Error::NoFreeConnection),
		}
	}

	/// Returns the next upstream address.
	fn next_addr(&self) -> Result<&str, Error> {
		if self.addrs.is_empty() {
			return Err(Error::Io(io::Error::new(
				io::ErrorKind::InvalidInput,
				"no upstream address configured",
			)));
		}
		let i = self.next_addr.fetch_add(1, Ordering::Relaxed) % self.addrs.len();
		Ok(&self.addrs[i])
	}

	/// Opens a connection occupying `slot`.
	async fn connect(&self, slot: Slot, request_deadline: Option<Instant>) -> Result<ClientConn, Error> {
		let now = Instant::now();
		let dial_deadline = now + self.config.dial_timeout;
		let dial_deadline = earliest(request_deadline, Some(dial_deadline)).unwrap_or(dial_deadline);
		let timeout = dial_deadline.saturating_duration_since(now);
		if timeout.is_zero() {
			return Err(Error::Timeout(Phase::Dial));
		}
		let addr = self.next_addr()?;
		let io = match self.dialer.dial(addr, timeout).await {
			Ok(io) => io,
			Err(e) => {
				tracing::debug!(addr, error = %e, "cannot dial host");
				return Err(e);
			}
		};
		let io = if self.config.is_tls {
			let tls = self.tls.as_ref().ok_or_else(|| {
				Error::Io(io::Error::new(
					io::ErrorKind::InvalidInput,
					"TLS requested without a TLS connector",
				))
			})?;
			let (host, _) = split_host_port(addr)?;
			deadline(Some(dial_deadline), Phase::Dial, async {
				Ok(tls.connect(host, io).await?)
			})
			.await?
		} else {
			io
		};
		let now = Instant::now();
		Ok(ClientConn {
			conn: BufConn::new(io, self.buffers.acquire_read(), self.buffers.acquire_write()),
			created: now,
			last_use: now,
			slot,
		})
	}

	/// Hands `value` to the first request still waiting, or returns it if there is none.
	fn hand_over(state: &mut State, mut value: Acquired) -> Option<Acquired> {
		while let Some(waiter) = state.waiters.pop_front() {
			match waiter.deliver(value) {
				Ok(()) => return None,
				Err(back) => value = back,
			}
		}
		Some(value)
	}

	/// Makes a connection available for the next request.
	fn release_conn(&self, mut conn: ClientConn) {
		conn.last_use = Instant::now();
		let mut state = self.state.lock();
		if let Some(Ok(conn)) = Self::hand_over(&mut state, Ok(conn)) {
			state.idle.push_back(conn);
		}
	}

	/// Closes a connection, keeping its buffers.
	fn discard(&self, conn: ClientConn) {
		let ClientConn { conn, slot, .. } = conn;
		let parts = conn.into_parts();
		self.buffers.release_read(parts.read_buf);
		self.buffers.release_write(parts.write_buf);
		drop(parts.io);
		drop(slot);
	}

	/// Frees the slot of a closed connection, or dials a replacement for a waiting request.
	fn release_slot(self: &Arc<Self>) {
		let runtime = tokio::runtime::Handle::try_current().ok();
		let waiter = {
			let mut state = self.state.lock();
			let mut waiter = None;
			if runtime.is_some() {
				while let Some(w) = state.waiters.pop_front() {
					if w.is_waiting() {
						waiter = Some(w);
						break;
					}
				}
			}
			if waiter.is_none() {
				state.conns -= 1;
			}
			waiter
		};
		if let (Some(waiter), Some(runtime)) = (waiter, runtime) {
			let slot = Slot(Arc::downgrade(self));
			let _ = runtime.spawn(Arc::clone(self).dial_for(slot, waiter));
		}
	}

	/// Opens a connection on behalf of a waiting request.
	async fn dial_for(self: Arc<Self>, slot: Slot, waiter: Arc<Waiter<Acquired>>) {
		let acquired = self.connect(slot, None).await;
		match waiter.deliver(acquired) {
			Ok(()) => (),
			Err(Ok(conn)) => {
				let mut state = self.state.lock();
				if let Some(Ok(conn)) = Self::hand_over(&mut state, Ok(conn)) {
					state.idle.push_back(conn);
				}
			}
			// The failure belongs to a request that stopped waiting.
			Err(Err(e)) => tracing::debug!(error = %e, "dial for abandoned waiter failed"),
		}
	}

	/// Decides whether a failed attempt may be repeated.
	///
	/// A connection closed before any response byte is always retried. A transport failure later
	/// on, including a response cut short in its header block or body, is retried only for
	/// requests the retry predicate accepts.
	fn may_retry(&self, req: &Request, e: &Error) -> bool {
		match e {
			Error::ConnectionClosedEarly => true,
			Error::Io(_)
			| Error::Parse(ParseError::Truncated)
			| Error::Framing(FramingError::UnexpectedEndOfBody) => match &self.retry_if {
				Some(retry_if) => retry_if(req),
				None => req.header().is_idempotent(),
			},
			_ => false,
		}
	}

	/// Sends a request, retrying failed attempts that may be repeated.
	async fn execute(
		self: &Arc<Self>,
		req: &mut Request,
		resp: &mut Response,
		request_deadline: Option<Instant>,
	) -> Result<(), Error> {
		if let Some(url) = req.uri() {
			if (url.scheme() == "https") != self.config.is_tls {
				return Err(Error::SchemeMismatch);
			}
		}
		if !self.config.no_default_user_agent_header && req.header().user_agent().is_empty() {
			req.header_mut().set_user_agent(self.config.name.as_bytes());
		}
		*self.last_use.lock() = Instant::now();
		let _pending = Pending::new(&self.pending);

		let attempts = std::cmp::max(self.config.max_idempotent_call_attempts, 1);
		let mut attempt = 1;
		loop {
			let e = match self.attempt(req, resp, request_deadline).await {
				Ok(()) => return Ok(()),
				Err(e) => e,
			};
			if attempt >= attempts || !self.may_retry(req, &e) {
				return Err(e);
			}
			tracing::debug!(attempt, error = %e, "retrying request");
			attempt += 1;
		}
	}

	/// Sends a request once over a pooled connection.
	async fn attempt(
		self: &Arc<Self>,
		req: &mut Request,
		resp: &mut Response,
		request_deadline: Option<Instant>,
	) -> Result<(), Error> {
		let mut conn = self.acquire(request_deadline).await?;
		let aged = self
			.config
			.max_conn_duration
			.map_or(false, |max| conn.created.elapsed() >= max);
		let asked_close = req.header().connection_close();
		if aged {
			req.header_mut().set_connection_close(true);
		}
		let result = self.exchange(&mut conn, req, resp, request_deadline).await;
		if aged && !asked_close {
			req.header_mut().set_connection_close(false);
		}
		if let Err(e) = result {
			self.discard(conn);
			return Err(e);
		}
		let reusable = !asked_close
			&& !aged
			&& !resp.header().connection_close()
			&& conn.conn.buffered().is_empty();
		if reusable {
			self.release_conn(conn);
		} else {
			self.discard(conn);
		}
		Ok(())
	}

	/// Writes a request and reads its response.
	async fn exchange(
		&self,
		conn: &mut ClientConn,
		req: &mut Request,
		resp: &mut Response,
		request_deadline: Option<Instant>,
	) -> Result<(), Error> {
		let socket = &mut conn.conn;
		let write_deadline = earliest(request_deadline, deadline_after(self.config.write_timeout));
		deadline(write_deadline, Phase::Write, async {
			req.write(Pin::new(&mut *socket)).await?;
			Ok(Pin::new(&mut *socket).flush().await?)
		})
		.await?;

		crate::pool::Reset::reset(resp);
		if self.config.disable_header_names_normalizing {
			resp.header_mut().disable_normalizing();
		}
		resp.set_skip_body(req.header().is_head());
		let options = ReadOptions {
			max_header_size: socket.read_capacity(),
			max_body_size: self.config.max_response_body_size,
			secure: self.config.secure_error_log_message,
		};
		let read_deadline = earliest(request_deadline, deadline_after(self.config.read_timeout));
		deadline(read_deadline, Phase::Read, resp.read(Pin::new(&mut *socket), &options)).await
	}
}

/// Closes connections idle for longer than the configured duration, until the host has none.
async fn sweep(shared: Weak<Shared>) {
	loop {
		let period = match shared.upgrade() {
			Some(shared) => std::cmp::max(shared.config.max_idle_conn_duration, Duration::from_millis(1)),
			None => return,
		};
		tokio::time::sleep(period).await;
		let Some(strong) = shared.upgrade() else {
			return;
		};
		let expired = {
			let mut state = strong.state.lock();
			let now = Instant::now();
			let (keep, expired): (VecDeque<ClientConn>, VecDeque<ClientConn>) = std::mem::take(&mut state.idle)
				.into_iter()
				.partition(|c| now.duration_since(c.last_use) < period);
			state.idle = keep;
			expired
		};
		if !expired.is_empty() {
			tracing::debug!(count = expired.len(), "closing idle connections");
		}
		for conn in expired {
			strong.discard(conn);
		}
		let mut state = strong.state.lock();
		if state.conns == 0 {
			state.sweeping = false;
			return;
		}
	}
}

/// Builds a [`HostClient`] with non-default collaborators.
pub struct HostClientBuilder {
	config: HostClientConfig,
	dialer: Option<Arc<dyn Dial>>,
	tls: Option<Arc<dyn TlsConnect>>,
	retry_if: Option<Arc<RetryIf>>,
}

impl std::fmt::Debug for HostClientBuilder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HostClientBuilder")
			.field("config", &self.config)
			.field("tls", &self.tls.is_some())
			.field("retry_if", &self.retry_if.is_some())
			.finish_non_exhaustive()
	}
}

impl HostClientBuilder {
	/// Sets the dialer; a [`TcpDialer`] is used by default.
	pub fn dialer(mut self, dialer: Arc<dyn Dial>) -> Self {
		self.dialer = Some(dialer);
		self
	}

	/// Sets the TLS connector used when [`HostClientConfig::is_tls`] is set.
	pub fn tls(mut self, tls: Arc<dyn TlsConnect>) -> Self {
		self.tls = Some(tls);
		self
	}

	/// Replaces the default retry predicate, which allows `GET`, `HEAD` and `PUT`.
	///
	/// A request the server closed the connection on before answering is retried regardless.
	pub fn retry_if(mut self, retry_if: impl Fn(&Request) -> bool + Send + Sync + 'static) -> Self {
		self.retry_if = Some(Arc::new(retry_if));
		self
	}

	/// Sets a retry predicate shared with other clients.
	pub(crate) fn shared_retry_if(mut self, retry_if: Option<Arc<RetryIf>>) -> Self {
		self.retry_if = retry_if;
		self
	}

	/// Creates the client.
	pub fn build(self) -> HostClient {
		let addrs = self.config.addrs().map(str::to_owned).collect();
		let buffers = BufferPool::new(self.config.read_buffer_size, self.config.write_buffer_size);
		HostClient {
			shared: Arc::new(Shared {
				addrs,
				next_addr: AtomicUsize::new(0),
				dialer: self.dialer.unwrap_or_else(|| Arc::new(TcpDialer::default())),
				tls: self.tls,
				retry_if: self.retry_if,
				buffers,
				state: Mutex::new(State {
					idle: VecDeque::new(),
					conns: 0,
					waiters: VecDeque::new(),
					sweeping: false,
				}),
				pending: AtomicUsize::new(0),
				last_use: Mutex::new(Instant::now()),
				config: self.config,
			}),
		}
	}
}

/// A client for a single upstream host, which may be reachable at several addresses.
///
/// Connections are kept alive and reused. At most [`HostClientConfig::max_conns`] are open at
/// once; further requests wait up to [`HostClientConfig::max_conn_wait_timeout`] or fail with
/// [`Error::NoFreeConnection`]. Cloning is cheap and clones share the pool.
#[derive(Clone)]
pub struct HostClient {
	shared: Arc<Shared>,
}

impl std::fmt::Debug for HostClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HostClient")
			.field("addr", &self.shared.config.addr)
			.field("conns", &self.conns_count())
			.field("pending", &self.pending_requests())
			.finish_non_exhaustive()
	}
}

impl HostClient {
	/// Creates a client with the default dialer and no TLS connector.
	pub fn new(config: HostClientConfig) -> Self {
		Self::builder(config).build()
	}

	/// Starts building a client.
	pub fn builder(config: HostClientConfig) -> HostClientBuilder {
		HostClientBuilder {
			config,
			dialer: None,
			tls: None,
			retry_if: None,
		}
	}

	/// Returns the configuration.
	pub fn config(&self) -> &HostClientConfig {
		&self.shared.config
	}

	/// Sends `req` and reads the response into `resp`.
	///
	/// The request’s [timeout](Request::set_timeout), if any, bounds the whole call including
	/// retries. A `User-Agent` is added unless disabled. Redirects are returned as is.
	///
	/// # Errors
	/// This function returns [`Error::SchemeMismatch`] if the request URL does not match
	/// [`HostClientConfig::is_tls`], [`Error::NoFreeConnection`] or a [`Phase::Wait`] timeout if
	/// no connection becomes available, and the error of the last attempt otherwise.
	pub async fn do_request(&self, req: &mut Request, resp: &mut Response) -> Result<(), Error> {
		let request_deadline = deadline_after(req.timeout());
		self.shared.execute(req, resp, request_deadline).await
	}

	/// Sends `req` like [`do_request`](Self::do_request), giving up after `timeout`.
	///
	/// # Errors
	/// See [`do_request`](Self::do_request).
	pub async fn do_timeout(
		&self,
		req: &mut Request,
		resp: &mut Response,
		timeout: Duration,
	) -> Result<(), Error> {
		self.shared
			.execute(req, resp, Some(Instant::now() + timeout))
			.await
	}

	/// Sends `req`, following up to `max_redirects` redirects.
	///
	/// Every request goes to this host, whatever host a `Location` names; use
	/// [`Client`](super::Client) to follow redirects across hosts.
	///
	/// # Errors
	/// This function returns [`Error::TooManyRedirects`] after `max_redirects + 1` requests that
	/// all redirected, [`Error::MissingRedirectLocation`] for a redirect without target, and
	/// any error of [`do_request`](Self::do_request).
	pub async fn do_redirects(
		&self,
		req: &mut Request,
		resp: &mut Response,
		max_redirects: usize,
	) -> Result<(), Error> {
		redirect::follow(self, req, resp, max_redirects).await
	}

	/// Returns the number of open connections.
	pub fn conns_count(&self) -> usize {
		self.shared.state.lock().conns
	}

	/// Returns the number of requests in progress.
	pub fn pending_requests(&self) -> usize {
		self.shared.pending.load(Ordering::Relaxed)
	}

	/// Returns when a request was last started.
	pub(crate) fn last_use(&self) -> Instant {
		*self.shared.last_use.lock()
	}
}

impl Exchange for HostClient {
	fn exchange<'a>(
		&'a self,
		req: &'a mut Request,
		resp: &'a mut Response,
		request_deadline: Option<Instant>,
	) -> BoxFuture<'a, Result<(), Error>> {
		Box::pin(self.shared.execute(req, resp, request_deadline))
	}
}

#[cfg(test)]
pub(crate) mod test {
	use super::*;
	use std::net::SocketAddr;
	use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
	use tokio::net::TcpListener;

	/// A bodyless keep-alive reply.
	pub(crate) const OK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

	/// How the mock server treats one request.
	#[derive(Clone, Copy, Debug)]
	pub(crate) enum Reply {
		/// Writes these bytes.
		Send(&'static [u8]),

		/// Closes the connection without answering.
		Close,

		/// Writes these bytes, then closes the connection.
		Cut(&'static [u8]),
	}

	/// A running mock server.
	pub(crate) struct Mock {
		pub(crate) addr: SocketAddr,
		pub(crate) requests: Arc<AtomicUsize>,
		pub(crate) accepts: Arc<AtomicUsize>,
	}

	/// Starts a server that answers the n-th request, counted from 0 across connections, with
	/// `script(n)` after `delay`. Requests must not carry a body.
	pub(crate) async fn mock(delay: Duration, script: fn(usize) -> Reply) -> Mock {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let requests = Arc::new(AtomicUsize::new(0));
		let accepts = Arc::new(AtomicUsize::new(0));
		let counters = (Arc::clone(&requests), Arc::clone(&accepts));
		let _ = tokio::spawn(async move {
			let (requests, accepts) = counters;
			while let Ok((mut stream, _)) = listener.accept().await {
				let _ = accepts.fetch_add(1, Ordering::SeqCst);
				let requests = Arc::clone(&requests);
				let _ = tokio::spawn(async move {
					let mut buf = Vec::new();
					let mut chunk = [0_u8; 1024];
					loop {
						let end = loop {
							if let Some(i) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
								break i + 4;
							}
							match stream.read(&mut chunk).await {
								Ok(0) | Err(_) => return,
								Ok(n) => buf.extend_from_slice(&chunk[..n]),
							}
						};
						let _ = buf.drain(..end);
						let n = requests.fetch_add(1, Ordering::SeqCst);
						tokio::time::sleep(delay).await;
						match script(n) {
							Reply::Close => return,
							Reply::Cut(partial) => {
								let _ = stream.write_all(partial).await;
								return;
							}
							Reply::Send(reply) => {
								if stream.write_all(reply).await.is_err() {
									return;
								}
							}
						}
					}
				});
			}
		});
		Mock {
			addr,
			requests,
			accepts,
		}
	}

	/// Builds a request for the root of `addr`.
	pub(crate) fn get(addr: SocketAddr) -> Request {
		let mut req = Request::new();
		req.set_uri(&format!("http://{addr}/")).unwrap();
		req
	}

	fn config(mock: &Mock) -> HostClientConfig {
		HostClientConfig {
			addr: mock.addr.to_string(),
			..HostClientConfig::default()
		}
	}

	/// Polls `f` for up to two seconds.
	async fn eventually(f: impl Fn() -> bool) -> bool {
		for _ in 0..200 {
			if f() {
				return true;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		false
	}

	/// Tests that sequential requests share one connection.
	#[tokio::test]
	async fn test_keep_alive() {
		let mock = mock(Duration::ZERO, |_| Reply::Send(OK)).await;
		let client = HostClient::new(config(&mock));
		for _ in 0..3 {
			let mut resp = Response::new();
			client.do_request(&mut get(mock.addr), &mut resp).await.unwrap();
			assert_eq!(resp.body(), b"ok");
		}
		assert_eq!(mock.requests.load(Ordering::SeqCst), 3);
		assert_eq!(mock.accepts.load(Ordering::SeqCst), 1);
		assert_eq!(client.conns_count(), 1);
		assert_eq!(client.pending_requests(), 0);
	}

	/// Tests that a request beyond the connection limit fails at once without a wait timeout.
	#[tokio::test]
	async fn test_no_free_connection() {
		let mock = mock(Duration::from_millis(300), |_| Reply::Send(OK)).await;
		let client = HostClient::new(HostClientConfig {
			max_conns: 1,
			..config(&mock)
		});
		let first = {
			let client = client.clone();
			let addr = mock.addr;
			tokio::spawn(async move {
				let mut resp = Response::new();
				client.do_request(&mut get(addr), &mut resp).await.map(|()| resp.status())
			})
		};
		assert!(eventually(|| mock.requests.load(Ordering::SeqCst) == 1).await);
		let e = client
			.do_request(&mut get(mock.addr), &mut Response::new())
			.await
			.unwrap_err();
		assert!(matches!(e, Error::NoFreeConnection));
		assert_eq!(first.await.unwrap().unwrap(), 200);
	}

	/// Tests that a waiting request gets the connection released by another.
	#[tokio::test]
	async fn test_wait_for_connection() {
		let mock = mock(Duration::from_millis(200), |_| Reply::Send(OK)).await;
		let client = HostClient::new(HostClientConfig {
			max_conns: 1,
			max_conn_wait_timeout: Some(Duration::from_secs(5)),
			..config(&mock)
		});
		let first = {
			let client = client.clone();
			let addr = mock.addr;
			tokio::spawn(async move { client.do_request(&mut get(addr), &mut Response::new()).await })
		};
		assert!(eventually(|| mock.requests.load(Ordering::SeqCst) == 1).await);
		let mut resp = Response::new();
		client.do_request(&mut get(mock.addr), &mut resp).await.unwrap();
		assert_eq!(resp.status(), 200);
		first.await.unwrap().unwrap();
		assert_eq!(mock.accepts.load(Ordering::SeqCst), 1);

		// A request whose own timeout ends the wait reports a wait timeout.
		let held = {
			let client = client.clone();
			let addr = mock.addr;
			tokio::spawn(async move { client.do_request(&mut get(addr), &mut Response::new()).await })
		};
		assert!(eventually(|| mock.requests.load(Ordering::SeqCst) == 3).await);
		let mut req = get(mock.addr);
		req.set_timeout(Some(Duration::from_millis(20)));
		let e = client.do_request(&mut req, &mut Response::new()).await.unwrap_err();
		assert!(matches!(e, Error::Timeout(Phase::Wait)));
		held.await.unwrap().unwrap();
		assert_eq!(client.conns_count(), 1);
	}

	/// Tests that a connection closed before any response is retried even for `POST`.
	#[tokio::test]
	async fn test_retry_after_early_close() {
		let mock = mock(Duration::ZERO, |n| if n == 0 { Reply::Close } else { Reply::Send(OK) }).await;
		let client = HostClient::new(config(&mock));
		let mut req = get(mock.addr);
		req.header_mut().set_method(b"POST");
		let mut resp = Response::new();
		client.do_request(&mut req, &mut resp).await.unwrap();
		assert_eq!(resp.body(), b"ok");
		assert_eq!(mock.requests.load(Ordering::SeqCst), 2);
		assert_eq!(mock.accepts.load(Ordering::SeqCst), 2);
	}

	/// Sends a request of `method` to a server answering with `script`, returning the outcome and
	/// the number of requests the server saw.
	async fn send_once(method: &[u8], script: fn(usize) -> Reply) -> (Result<Response, Error>, usize) {
		let mock = mock(Duration::ZERO, script).await;
		let client = HostClient::new(config(&mock));
		let mut req = get(mock.addr);
		req.header_mut().set_method(method);
		let mut resp = Response::new();
		let result = client.do_request(&mut req, &mut resp).await.map(|()| resp);
		(result, mock.requests.load(Ordering::SeqCst))
	}

	/// Tests that a response cut short in its header block or body is retried for `GET` but not
	/// for `POST`.
	#[tokio::test]
	async fn test_retry_after_partial_response() {
		const HEAD_CUT: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Le";
		const BODY_CUT: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nab";

		let (result, requests) =
			send_once(b"GET", |n| if n == 0 { Reply::Cut(HEAD_CUT) } else { Reply::Send(OK) }).await;
		assert_eq!(result.unwrap().body(), b"ok");
		assert_eq!(requests, 2);

		let (result, requests) =
			send_once(b"GET", |n| if n == 0 { Reply::Cut(BODY_CUT) } else { Reply::Send(OK) }).await;
		assert_eq!(result.unwrap().body(), b"ok");
		assert_eq!(requests, 2);

		let (result, requests) =
			send_once(b"POST", |n| if n == 0 { Reply::Cut(BODY_CUT) } else { Reply::Send(OK) }).await;
		assert!(matches!(
			result,
			Err(Error::Framing(FramingError::UnexpectedEndOfBody))
		));
		assert_eq!(requests, 1);
	}

	/// Tests that the attempt ceiling bounds retries.
	#[tokio::test]
	async fn test_attempt_ceiling() {
		let mock = mock(Duration::ZERO, |_| Reply::Close).await;
		let client = HostClient::new(HostClientConfig {
			max_idempotent_call_attempts: 3,
			..config(&mock)
		});
		let e = client
			.do_request(&mut get(mock.addr), &mut Response::new())
			.await
			.unwrap_err();
		assert!(matches!(e, Error::ConnectionClosedEarly));
		assert_eq!(mock.requests.load(Ordering::SeqCst), 3);
	}

	/// Tests that a timeout is reported and not retried.
	#[tokio::test]
	async fn test_timeout_not_retried() {
		let mock = mock(Duration::from_millis(200), |_| Reply::Send(OK)).await;
		let client = HostClient::new(HostClientConfig {
			read_timeout: Some(Duration::from_millis(50)),
			..config(&mock)
		});
		let e = client
			.do_request(&mut get(mock.addr), &mut Response::new())
			.await
			.unwrap_err();
		assert!(matches!(e, Error::Timeout(Phase::Read)));
		tokio::time::sleep(Duration::from_millis(300)).await;
		assert_eq!(mock.requests.load(Ordering::SeqCst), 1);
		assert_eq!(client.conns_count(), 0);
	}

	/// A dialer that refuses its first connection and never finishes any later one.
	struct RefuseThenHang(AtomicUsize);

	impl Dial for RefuseThenHang {
		fn dial<'a>(&'a self, _: &'a str, _: Duration) -> BoxFuture<'a, Result<BoxTransport, Error>> {
			let first = self.0.fetch_add(1, Ordering::SeqCst) == 0;
			Box::pin(async move {
				if first {
					return Err(Error::Io(io::ErrorKind::ConnectionRefused.into()));
				}
				std::future::pending().await
			})
		}
	}

	/// Tests that a failed dial for a request that stopped waiting is not handed to another
	/// waiting request.
	#[tokio::test]
	async fn test_failed_dial_not_passed_on() {
		let client = HostClient::builder(HostClientConfig {
			addr: "127.0.0.1:9".to_owned(),
			max_conns: 1,
			..HostClientConfig::default()
		})
		.dialer(Arc::new(RefuseThenHang(AtomicUsize::new(0))))
		.build();
		let shared = &client.shared;
		let (gone, next, last) = (Waiter::new(), Waiter::new(), Waiter::new());
		assert!(gone.cancel().is_none());
		{
			let mut state = shared.state.lock();
			state.conns = 1;
			state.waiters.push_back(Arc::clone(&next));
			state.waiters.push_back(Arc::clone(&last));
		}
		Arc::clone(shared)
			.dial_for(Slot(Arc::downgrade(shared)), gone)
			.await;

		// The freed slot went to `next` as a new dial, and `last` is still queued.
		assert!(next.is_waiting());
		assert!(last.is_waiting());
		assert_eq!(shared.state.lock().waiters.len(), 1);
		assert_eq!(client.conns_count(), 1);
	}

	/// Tests that the sweeper closes idle connections.
	#[tokio::test]
	async fn test_idle_sweep() {
		let mock = mock(Duration::ZERO, |_| Reply::Send(OK)).await;
		let client = HostClient::new(HostClientConfig {
			max_idle_conn_duration: Duration::from_millis(50),
			..config(&mock)
		});
		client.do_request(&mut get(mock.addr), &mut Response::new()).await.unwrap();
		assert_eq!(client.conns_count(), 1);
		assert!(eventually(|| client.conns_count() == 0).await);
	}

	/// Tests that connections are not reused after `Connection: close` or past their lifetime.
	#[tokio::test]
	async fn test_close_not_pooled() {
		const CLOSE: &[u8] = b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";
		let closing = mock(Duration::ZERO, |_| Reply::Send(CLOSE)).await;
		let client = HostClient::new(config(&closing));
		client.do_request(&mut get(closing.addr), &mut Response::new()).await.unwrap();
		assert_eq!(client.conns_count(), 0);
		client.do_request(&mut get(closing.addr), &mut Response::new()).await.unwrap();
		assert_eq!(closing.accepts.load(Ordering::SeqCst), 2);

		let aging = mock(Duration::ZERO, |_| Reply::Send(OK)).await;
		let client = HostClient::new(HostClientConfig {
			max_conn_duration: Some(Duration::from_millis(50)),
			..config(&aging)
		});
		let mut req = get(aging.addr);
		client.do_request(&mut req, &mut Response::new()).await.unwrap();
		assert_eq!(client.conns_count(), 1);
		tokio::time::sleep(Duration::from_millis(100)).await;
		client.do_request(&mut req, &mut Response::new()).await.unwrap();
		assert!(!req.header().connection_close());
		assert_eq!(client.conns_count(), 0);
		assert_eq!(aging.accepts.load(Ordering::SeqCst), 1);
	}

	/// Tests that a URL of the other scheme is refused before any connection is made.
	#[tokio::test]
	async fn test_scheme_mismatch() {
		let mock = mock(Duration::ZERO, |_| Reply::Send(OK)).await;
		let client = HostClient::new(config(&mock));
		let mut req = Request::new();
		req.set_uri(&format!("https://{}/", mock.addr)).unwrap();
		let e = client.do_request(&mut req, &mut Response::new()).await.unwrap_err();
		assert!(matches!(e, Error::SchemeMismatch));
		assert_eq!(client.conns_count(), 0);
		assert_eq!(mock.accepts.load(Ordering::SeqCst), 0);
	}

	/// Tests a request over TLS against the server.
	#[tokio::test]
	async fn test_tls() {
		use crate::server::{RequestCtx, Server};
		use crate::transport::test::InvertedTls;
		let server = Server::builder(|ctx: &mut RequestCtx| ctx.success(b"text/plain", b"sealed"))
			.tls(Arc::new(InvertedTls))
			.build();
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let _ = tokio::spawn(async move { server.serve(listener).await });

		let client = HostClient::builder(HostClientConfig {
			addr: addr.to_string(),
			is_tls: true,
			..HostClientConfig::default()
		})
		.tls(Arc::new(InvertedTls))
		.build();
		let mut req = Request::new();
		req.set_uri(&format!("https://{addr}/")).unwrap();
		let mut resp = Response::new();
		client.do_request(&mut req, &mut resp).await.unwrap();
		assert_eq!(resp.body(), b"sealed");
		assert_eq!(resp.header().server(), b"fastwire");
	}
}
