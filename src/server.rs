//! The HTTP server.
//!
//! A [`Server`] accepts connections on one or more listeners and hands each one to a bounded
//! pool of worker tasks. A worker runs the keep-alive loop of its connection: read a request,
//! call the [`Handler`] synchronously, write the response, and repeat until either side asks to
//! close. Connections beyond the pool’s capacity get an immediate `503 Service Unavailable`.
//!
//! ```no_run
//! # async fn run() -> Result<(), fastwire::Error> {
//! let server = fastwire::Server::builder(|ctx: &mut fastwire::server::RequestCtx| {
//! 	ctx.success(b"text/plain", b"hello");
//! })
//! .build();
//! server.listen_and_serve("127.0.0.1:8080").await
//! # }
//! ```

pub mod config;
mod conn;
pub mod ctx;
mod date;
mod worker_pool;

pub use config::{RequestConfig, ServerConfig};
pub use ctx::{Hijacked, RequestCtx};

use crate::body::Framing;
use crate::error::Error;
use crate::header::request::RequestHeader;
use crate::header::response::ResponseHeader;
use crate::pool::{BufferPool, Pool};
use crate::transport::{BoxFuture, TlsAccept};
use date::DateCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use worker_pool::WorkerPool;

/// The body of the reply to connections beyond the concurrency limit.
const CONCURRENCY_LIMIT_BODY: &str =
	"The connection cannot be served because Server.Concurrency limit exceeded";

/// The body of the reply to connections beyond the per-IP limit.
const PER_IP_LIMIT_BODY: &str = "The number of connections from your ip exceeds MaxConnsPerIP";

/// The shortest time between two warnings about the concurrency limit.
const OVERFLOW_WARNING_INTERVAL: Duration = Duration::from_secs(60);

/// The pause after a failed accept.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Serves requests.
///
/// Handlers run synchronously on the connection’s worker task; they see the whole request body
/// and build the whole response body in memory.
pub trait Handler: Send + Sync + 'static {
	/// Handles one request.
	fn handle(&self, ctx: &mut RequestCtx);
}

impl<F: Fn(&mut RequestCtx) + Send + Sync + 'static> Handler for F {
	fn handle(&self, ctx: &mut RequestCtx) {
		self(ctx)
	}
}

/// The stages a connection passes through, as reported to the connection-state hook.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ConnState {
	/// The connection has been accepted.
	New,

	/// A request is being read or served.
	Active,

	/// The connection waits for the next request.
	Idle,

	/// The connection has been handed to a hijack handler.
	Hijacked,

	/// The connection has been closed.
	Closed,
}

/// A hook called once a request header has been read.
type HeaderReceivedHook = dyn Fn(&RequestHeader) -> RequestConfig + Send + Sync;

/// A hook deciding whether to accept a request that expects `100 Continue`.
type ContinueHook = dyn Fn(&RequestHeader) -> bool + Send + Sync;

/// A hook building the response to a malformed request.
type ErrorHook = dyn Fn(&mut RequestCtx, &Error) + Send + Sync;

/// A hook observing connection state changes.
type ConnStateHook = dyn Fn(SocketAddr, ConnState) + Send + Sync;

/// The optional hooks of a server.
#[derive(Default)]
struct Hooks {
	header_received: Option<Box<HeaderReceivedHook>>,
	continue_handler: Option<Box<ContinueHook>>,
	error_handler: Option<Box<ErrorHook>>,
	conn_state: Option<Box<ConnStateHook>>,
}

/// State shared by the accept loops and all connections of a server.
struct Shared {
	config: ServerConfig,
	handler: Box<dyn Handler>,
	hooks: Hooks,
	tls: Option<Arc<dyn TlsAccept>>,
	date: DateCache,
	buffers: BufferPool,
	contexts: Pool<RequestCtx>,

	/// The number of accepted connections not yet closed or hijacked.
	open: AtomicUsize,

	/// The next connection number.
	next_conn_id: AtomicU64,

	/// Open connections per peer address, maintained only with a per-IP limit.
	per_ip: Mutex<HashMap<IpAddr, usize>>,

	/// Set once shutdown begins.
	stop: watch::Sender<bool>,

	/// Notified when `open` drops to zero.
	closed: Notify,

	/// When the concurrency limit was last logged.
	last_overflow_warning: Mutex<Option<Instant>>,
}

impl Shared {
	/// Reports a connection state change to the hook.
	fn conn_state(&self, addr: SocketAddr, state: ConnState) {
		tracing::trace!(remote = %addr, state = ?state, "connection state");
		if let Some(hook) = &self.hooks.conn_state {
			hook(addr, state);
		}
	}

	/// Logs an error that ended a connection.
	fn log_conn_error(&self, addr: SocketAddr, e: &Error) {
		if self.config.log_all_errors {
			tracing::warn!(remote = %addr, error = %e, "error when serving connection");
		} else {
			tracing::debug!(remote = %addr, error = %e, "error when serving connection");
		}
	}

	/// Counts a new connection, unless its peer already has too many.
	fn admit(self: &Arc<Self>, ip: IpAddr) -> Option<ConnGuard> {
		let limit = self.config.max_conns_per_ip;
		if limit > 0 {
			let mut per_ip = self.per_ip.lock();
			let count = per_ip.entry(ip).or_insert(0);
			if *count >= limit {
				return None;
			}
			*count += 1;
		}
		let _ = self.open.fetch_add(1, Ordering::SeqCst);
		Some(ConnGuard {
			shared: Arc::clone(self),
			ip,
		})
	}

	/// Logs that the concurrency limit was hit, at most once per interval.
	fn warn_overflow(&self) {
		let now = Instant::now();
		let mut last = self.last_overflow_warning.lock();
		if last.map_or(true, |t| now.duration_since(t) >= OVERFLOW_WARNING_INTERVAL) {
			*last = Some(now);
			tracing::warn!(
				concurrency = self.config.concurrency,
				error = %Error::ConcurrencyLimitExceeded,
				"consider raising the concurrency limit",
			);
		}
	}

	/// Adds the automatic `Server` and `Date` headers.
	fn add_default_headers(&self, header: &mut ResponseHeader) {
		if !self.config.no_default_server_header && header.server().is_empty() {
			header.set_server(self.config.name.as_bytes());
		}
		if !self.config.no_default_date {
			self.date.with(|date| header.set(b"Date", date));
		}
	}

	/// Builds a complete reply that closes the connection.
	fn fast_reply(&self, status: u16, body: &str) -> Vec<u8> {
		let mut header = ResponseHeader::new();
		header.set_status(status);
		header.set_content_type(b"text/plain");
		header.set_connection_close(true);
		self.add_default_headers(&mut header);
		let mut reply = Vec::with_capacity(256);
		header.append_head(&mut reply, Framing::Fixed(body.len() as u64));
		reply.extend_from_slice(body.as_bytes());
		reply
	}

	/// Sends a fast reply without waiting and drops the connection.
	///
	/// Over TLS there is no handshake yet, so the connection is just dropped.
	fn reject(&self, stream: TcpStream, addr: SocketAddr, status: u16, body: &str) {
		if self.tls.is_none() {
			if let Err(e) = stream.try_write(&self.fast_reply(status, body)) {
				tracing::debug!(remote = %addr, error = %e, "cannot send rejection");
			}
		}
	}
}

/// Keeps a connection counted for as long as it is served.
struct ConnGuard {
	shared: Arc<Shared>,
	ip: IpAddr,
}

impl Drop for ConnGuard {
	fn drop(&mut self) {
		if self.shared.config.max_conns_per_ip > 0 {
			let mut per_ip = self.shared.per_ip.lock();
			if let Some(count) = per_ip.get_mut(&self.ip) {
				*count -= 1;
				if *count == 0 {
					let _ = per_ip.remove(&self.ip);
				}
			}
		}
		if self.shared.open.fetch_sub(1, Ordering::SeqCst) == 1 {
			self.shared.closed.notify_waiters();
		}
	}
}

/// Builds a [`Server`].
pub struct ServerBuilder {
	config: ServerConfig,
	handler: Box<dyn Handler>,
	hooks: Hooks,
	tls: Option<Arc<dyn TlsAccept>>,
}

impl std::fmt::Debug for ServerBuilder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServerBuilder")
			.field("config", &self.config)
			.field("tls", &self.tls.is_some())
			.finish_non_exhaustive()
	}
}

impl ServerBuilder {
	/// Replaces the configuration.
	pub fn config(mut self, config: ServerConfig) -> Self {
		self.config = config;
		self
	}

	/// Sets a hook called once a request header has been read, before the body.
	///
	/// The returned [`RequestConfig`] overrides timeouts and the body limit for that request.
	pub fn header_received(
		mut self,
		f: impl Fn(&RequestHeader) -> RequestConfig + Send + Sync + 'static,
	) -> Self {
		self.hooks.header_received = Some(Box::new(f));
		self
	}

	/// Sets a hook deciding whether a request with `Expect: 100-continue` may send its body.
	///
	/// A refused request gets `417 Expectation Failed`, and the connection is closed.
	pub fn continue_handler(
		mut self,
		f: impl Fn(&RequestHeader) -> bool + Send + Sync + 'static,
	) -> Self {
		self.hooks.continue_handler = Some(Box::new(f));
		self
	}

	/// Sets a hook that customizes the response to a request that could not be read.
	///
	/// The hook sees the default error response and may change it; the connection is closed
	/// afterwards regardless.
	pub fn error_handler(
		mut self,
		f: impl Fn(&mut RequestCtx, &Error) + Send + Sync + 'static,
	) -> Self {
		self.hooks.error_handler = Some(Box::new(f));
		self
	}

	/// Sets a hook observing connection state changes.
	pub fn conn_state(mut self, f: impl Fn(SocketAddr, ConnState) + Send + Sync + 'static) -> Self {
		self.hooks.conn_state = Some(Box::new(f));
		self
	}

	/// Serves every connection over TLS.
	pub fn tls(mut self, acceptor: Arc<dyn TlsAccept>) -> Self {
		self.tls = Some(acceptor);
		self
	}

	/// Builds the server.
	pub fn build(self) -> Server {
		let buffers = BufferPool::new(self.config.read_buffer_size, self.config.write_buffer_size);
		let (stop, _) = watch::channel(false);
		Server {
			shared: Arc::new(Shared {
				config: self.config,
				handler: self.handler,
				hooks: self.hooks,
				tls: self.tls,
				date: DateCache::default(),
				buffers,
				contexts: Pool::default(),
				open: AtomicUsize::new(0),
				next_conn_id: AtomicU64::new(1),
				per_ip: Mutex::new(HashMap::new()),
				stop,
				closed: Notify::new(),
				last_overflow_warning: Mutex::new(None),
			}),
		}
	}
}

/// An HTTP/1.1 server.
///
/// Cloning a server gives another handle to the same server, sharing its connections, pools
/// and shutdown state.
#[derive(Clone)]
pub struct Server {
	shared: Arc<Shared>,
}

impl std::fmt::Debug for Server {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Server")
			.field("config", &self.shared.config)
			.field("open", &self.open_connections())
			.finish_non_exhaustive()
	}
}

impl Server {
	/// Starts building a server around `handler`, with the default configuration.
	pub fn builder(handler: impl Handler) -> ServerBuilder {
		ServerBuilder {
			config: ServerConfig::default(),
			handler: Box::new(handler),
			hooks: Hooks::default(),
			tls: None,
		}
	}

	/// Returns the configuration.
	pub fn config(&self) -> &ServerConfig {
		&self.shared.config
	}

	/// Returns the number of connections currently being served.
	pub fn open_connections(&self) -> usize {
		self.shared.open.load(Ordering::SeqCst)
	}

	/// Binds `addr` and serves connections on it until shutdown.
	///
	/// # Errors
	/// This function returns an error if the address cannot be bound.
	pub async fn listen_and_serve(&self, addr: impl ToSocketAddrs) -> Result<(), Error> {
		let listener = TcpListener::bind(addr).await.map_err(Error::Io)?;
		self.serve(listener).await
	}

	/// Serves connections accepted by `listener` until shutdown.
	///
	/// A server may serve several listeners at once; they share the connection counters but each
	/// has its own worker pool.
	///
	/// # Errors
	/// This function currently always returns `Ok`; failed accepts are logged and retried.
	pub async fn serve(&self, listener: TcpListener) -> Result<(), Error> {
		let mut stop = self.shared.stop.subscribe();
		if *stop.borrow() {
			return Ok(());
		}
		let shared = Arc::clone(&self.shared);
		let pool: WorkerPool<conn::Job> = WorkerPool::start(
			self.shared.config.concurrency,
			self.shared.config.max_idle_worker_duration,
			Arc::new(move |job: conn::Job| -> BoxFuture<'static, ()> {
				Box::pin(conn::serve(Arc::clone(&shared), job))
			}),
		);
		if let Ok(addr) = listener.local_addr() {
			tracing::debug!(local = %addr, "serving");
		}
		loop {
			let (stream, addr) = tokio::select! {
				accepted = listener.accept() => match accepted {
					Ok(accepted) => accepted,
					Err(e) => {
						tracing::warn!(error = %e, "cannot accept connection");
						tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
						continue;
					}
				},
				_ = stop.changed() => break,
			};
			let guard = match self.shared.admit(addr.ip()) {
				Some(guard) => guard,
				None => {
					tracing::debug!(remote = %addr, "too many connections from one address");
					self.shared.reject(stream, addr, 429, PER_IP_LIMIT_BODY);
					continue;
				}
			};
			if let Err(job) = pool.serve(conn::Job {
				stream,
				addr,
				guard,
			}) {
				self.shared.warn_overflow();
				self.shared
					.reject(job.stream, job.addr, 503, CONCURRENCY_LIMIT_BODY);
			}
		}
		pool.stop();
		Ok(())
	}

	/// Stops accepting connections, closes idle ones, and waits until every connection has
	/// finished.
	pub async fn shutdown(&self) {
		let _ = self.shared.stop.send_replace(true);
		loop {
			let closed = self.shared.closed.notified();
			if self.shared.open.load(Ordering::SeqCst) == 0 {
				return;
			}
			closed.await;
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::message::{ReadOptions, Response};
	use crate::transport::{self, BoxTransport};
	use crate::util::io::{AsyncWriteExt as _, BufConn};
	use std::pin::Pin;
	use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

	/// Starts `server` on a loopback port.
	async fn start(server: Server) -> SocketAddr {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let _ = tokio::spawn(async move { server.serve(listener).await.unwrap() });
		addr
	}

	/// Opens a buffered client connection.
	async fn connect(addr: SocketAddr) -> BufConn<BoxTransport> {
		let stream = TcpStream::connect(addr).await.unwrap();
		BufConn::new(transport::tcp(stream), vec![0; 4096], Vec::with_capacity(4096))
	}

	/// Sends raw request bytes.
	async fn send(conn: &mut BufConn<BoxTransport>, raw: &[u8]) {
		Pin::new(&mut *conn).write_all(raw).await.unwrap();
		Pin::new(&mut *conn).flush().await.unwrap();
	}

	/// Reads one response.
	async fn receive(conn: &mut BufConn<BoxTransport>) -> Response {
		let mut resp = Response::new();
		resp.read(Pin::new(conn), &ReadOptions::default())
			.await
			.unwrap();
		resp
	}

	/// Reads everything until the server closes the connection.
	async fn read_until_close(addr: SocketAddr, raw: &[u8]) -> String {
		let mut stream = TcpStream::connect(addr).await.unwrap();
		stream.write_all(raw).await.unwrap();
		let mut out = Vec::new();
		let _ = stream.read_to_end(&mut out).await.unwrap();
		String::from_utf8(out).unwrap()
	}

	/// A handler echoing the method, path and body.
	fn echo(ctx: &mut RequestCtx) {
		let mut body = ctx.method().to_vec();
		body.push(b' ');
		body.extend_from_slice(ctx.path());
		body.push(b' ');
		body.extend_from_slice(ctx.body());
		ctx.set_body(&body);
	}

	/// Tests keep-alive and pipelined requests on one connection.
	#[tokio::test]
	async fn test_keep_alive_pipelined() {
		let addr = start(Server::builder(echo).build()).await;
		let mut conn = connect(addr).await;
		send(&mut conn, b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\nxyzGET /b HTTP/1.1\r\n\r\n").await;
		let first = receive(&mut conn).await;
		assert_eq!(first.body(), b"POST /a xyz");
		assert_eq!(first.header().server(), b"fastwire");
		assert!(first.header().get(b"Date").is_some());
		assert_eq!(first.header().content_type(), b"text/plain; charset=utf-8");
		let second = receive(&mut conn).await;
		assert_eq!(second.body(), b"GET /b ");
		assert!(!second.header().connection_close());

		send(&mut conn, b"GET /c HTTP/1.1\r\nConnection: close\r\n\r\n").await;
		let third = receive(&mut conn).await;
		assert_eq!(third.body(), b"GET /c ");
		assert!(third.header().connection_close());
	}

	/// Tests that exactly the connection beyond the concurrency limit gets a 503.
	#[tokio::test]
	async fn test_concurrency_limit() {
		let config = ServerConfig {
			concurrency: 2,
			..ServerConfig::default()
		};
		let addr = start(Server::builder(echo).config(config).build()).await;
		let mut held = Vec::new();
		for _ in 0..2 {
			let mut conn = connect(addr).await;
			send(&mut conn, b"GET / HTTP/1.1\r\n\r\n").await;
			assert_eq!(receive(&mut conn).await.status(), 200);
			held.push(conn);
		}
		let rejected = read_until_close(addr, b"").await;
		assert!(rejected.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
		assert!(rejected.contains("Connection: close\r\n"));
		assert!(rejected.ends_with(CONCURRENCY_LIMIT_BODY));

		for conn in &mut held {
			send(conn, b"GET /again HTTP/1.1\r\n\r\n").await;
			assert_eq!(receive(conn).await.body(), b"GET /again ");
		}
	}

	/// Tests the per-IP connection limit.
	#[tokio::test]
	async fn test_per_ip_limit() {
		let config = ServerConfig {
			max_conns_per_ip: 1,
			..ServerConfig::default()
		};
		let addr = start(Server::builder(echo).config(config).build()).await;
		let mut conn = connect(addr).await;
		send(&mut conn, b"GET / HTTP/1.1\r\n\r\n").await;
		let _ = receive(&mut conn).await;
		let rejected = read_until_close(addr, b"").await;
		assert!(rejected.starts_with("HTTP/1.1 429 "));
	}

	/// Tests the status codes of requests that cannot be read.
	#[tokio::test]
	async fn test_error_responses() {
		let config = ServerConfig {
			read_buffer_size: 256,
			max_request_body_size: 8,
			..ServerConfig::default()
		};
		let addr = start(Server::builder(echo).config(config).build()).await;

		let big = format!("GET / HTTP/1.1\r\nX-Big: {}\r\n\r\n", "a".repeat(1000));
		let reply = read_until_close(addr, big.as_bytes()).await;
		assert!(reply.starts_with("HTTP/1.1 431 "));
		assert!(reply.ends_with("Too big request header"));

		let reply = read_until_close(addr, b"POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\n").await;
		assert!(reply.starts_with("HTTP/1.1 413 "));

		let reply = read_until_close(addr, b"GARBAGE\r\n\r\n").await;
		assert!(reply.starts_with("HTTP/1.1 400 "));
		assert!(reply.contains("Connection: close\r\n"));
	}

	/// Tests the error hook and the read timeout.
	#[tokio::test]
	async fn test_error_handler_timeout() {
		let config = ServerConfig {
			read_timeout: Some(Duration::from_millis(50)),
			..ServerConfig::default()
		};
		let server = Server::builder(echo)
			.config(config)
			.error_handler(|ctx, e| {
				if e.is_timeout() {
					ctx.set_body(b"too slow");
				}
			})
			.build();
		let addr = start(server).await;
		let reply = read_until_close(addr, b"GET / HTTP/1.1\r\n").await;
		assert!(reply.starts_with("HTTP/1.1 408 "));
		assert!(reply.ends_with("too slow"));
	}

	/// Tests HTTP/1.0 keep-alive and a response to HEAD.
	#[tokio::test]
	async fn test_http10_and_head() {
		let addr = start(Server::builder(echo).build()).await;
		let mut conn = connect(addr).await;
		send(&mut conn, b"GET /x HTTP/1.0\r\nConnection: keep-alive\r\n\r\n").await;
		let resp = receive(&mut conn).await;
		assert_eq!(resp.header().get(b"Connection"), Some(&b"keep-alive"[..]));
		assert_eq!(resp.body(), b"GET /x ");

		send(&mut conn, b"HEAD /y HTTP/1.1\r\n\r\n").await;
		let mut head = Response::new();
		head.set_skip_body(true);
		head.read(Pin::new(&mut conn), &ReadOptions::default())
			.await
			.unwrap();
		assert_eq!(head.header().content_length(), Some(8));
		assert!(head.body().is_empty());

		let reply = read_until_close(addr, b"GET /z HTTP/1.0\r\n\r\n").await;
		assert!(reply.contains("Connection: close\r\n"));
		assert!(reply.ends_with("GET /z "));
	}

	/// Tests `100 Continue` handling, both accepted and refused.
	#[tokio::test]
	async fn test_expect_continue() {
		let server = Server::builder(echo)
			.continue_handler(|header| header.request_uri() != b"/refuse")
			.build();
		let addr = start(server).await;

		let mut conn = connect(addr).await;
		send(&mut conn, b"POST /ok HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\n").await;
		let mut interim = [0_u8; 25];
		crate::util::io::read_all(Pin::new(&mut conn), &mut interim)
			.await
			.unwrap();
		assert_eq!(&interim, b"HTTP/1.1 100 Continue\r\n\r\n");
		send(&mut conn, b"hi").await;
		assert_eq!(receive(&mut conn).await.body(), b"POST /ok hi");

		let reply = read_until_close(
			addr,
			b"POST /refuse HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\n",
		)
		.await;
		assert!(reply.starts_with("HTTP/1.1 417 "));
	}

	/// Tests that a hijacked connection keeps read-ahead bytes and leaves the server.
	#[tokio::test]
	async fn test_hijack() {
		use crate::util::io::AsyncReadExt as _;
		let server = Server::builder(|ctx: &mut RequestCtx| {
			ctx.set_body(b"switching");
			ctx.hijack(|mut conn| async move {
				let mut buf = [0_u8; 4];
				if crate::util::io::read_all(Pin::new(&mut conn), &mut buf)
					.await
					.is_ok()
				{
					let _ = Pin::new(&mut conn).write_all(&buf).await;
					let _ = Pin::new(&mut conn).flush().await;
				}
				let _ = Pin::new(&mut conn).read(&mut buf).await;
			});
		})
		.build();
		let addr = start(server.clone()).await;
		let mut conn = connect(addr).await;
		send(&mut conn, b"GET / HTTP/1.1\r\n\r\nping").await;
		assert_eq!(receive(&mut conn).await.body(), b"switching");
		let mut echoed = [0_u8; 4];
		crate::util::io::read_all(Pin::new(&mut conn), &mut echoed)
			.await
			.unwrap();
		assert_eq!(&echoed, b"ping");
		for _ in 0..100 {
			if server.open_connections() == 0 {
				break;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		assert_eq!(server.open_connections(), 0);
	}

	/// Tests that shutdown closes idle connections and reports every state change.
	#[tokio::test]
	async fn test_shutdown() {
		let states = Arc::new(Mutex::new(Vec::new()));
		let seen = Arc::clone(&states);
		let server = Server::builder(echo)
			.conn_state(move |_, state| seen.lock().push(state))
			.build();
		let addr = start(server.clone()).await;
		let mut conn = connect(addr).await;
		send(&mut conn, b"GET / HTTP/1.1\r\n\r\n").await;
		let _ = receive(&mut conn).await;
		assert_eq!(server.open_connections(), 1);
		tokio::time::timeout(Duration::from_secs(5), server.shutdown())
			.await
			.unwrap();
		assert_eq!(server.open_connections(), 0);
		let states = states.lock();
		assert_eq!(states.first(), Some(&ConnState::New));
		assert!(states.contains(&ConnState::Idle));
		assert_eq!(states.last(), Some(&ConnState::Closed));
	}

	/// Tests a server behind a TLS acceptor.
	#[tokio::test]
	async fn test_tls() {
		use crate::transport::test::{Inverted, InvertedTls};
		let server = Server::builder(echo).tls(Arc::new(InvertedTls)).build();
		let addr = start(server).await;
		let stream = TcpStream::connect(addr).await.unwrap();
		let io: BoxTransport = Box::new(Inverted(transport::tcp(stream)));
		let mut conn = BufConn::new(io, vec![0; 1024], Vec::with_capacity(1024));
		send(&mut conn, b"GET /secure HTTP/1.1\r\n\r\n").await;
		assert_eq!(receive(&mut conn).await.body(), b"GET /secure ");
	}
}
