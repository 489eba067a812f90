//! The keep-alive loop of one server connection.

use super::ctx::{HijackHandler, Hijacked, RequestCtx};
use super::{ConnGuard, ConnState, RequestConfig, Shared};
use crate::error::{Error, Phase};
use crate::header::headers_length;
use crate::message::ReadOptions;
use crate::transport::{self, BoxTransport};
use crate::util::io::{AsyncBufReadExt as _, AsyncReadExt as _, AsyncWriteExt as _, BufConn};
use crate::util::{deadline, deadline_after};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;

/// The interim response sent to requests that expect it.
const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// The longest time spent discarding input before closing a connection after an error.
const LINGER_TIMEOUT: Duration = Duration::from_secs(1);

/// The most input discarded before closing a connection after an error.
const LINGER_LIMIT: usize = 64 * 1024;

/// An accepted connection waiting for a worker.
pub(super) struct Job {
	pub(super) stream: TcpStream,
	pub(super) addr: SocketAddr,
	pub(super) guard: ConnGuard,
}

/// How the request loop of a connection ended.
enum End {
	/// The connection is to be closed normally.
	Close,

	/// A request could not be read and has been answered with an error; unread input may remain.
	Failed(Error),

	/// The connection is handed to a hijack handler.
	Hijack(HijackHandler),
}

/// Serves a connection until it closes or is hijacked.
pub(super) async fn serve(shared: Arc<Shared>, job: Job) {
	let Job { stream, addr, guard } = job;
	shared.conn_state(addr, ConnState::New);
	let mut io = transport::tcp(stream);
	if let Some(tls) = &shared.tls {
		let handshake = async { tls.accept(io).await.map_err(Error::from) };
		io = match deadline(deadline_after(shared.config.read_timeout), Phase::Read, handshake).await {
			Ok(io) => io,
			Err(e) => {
				tracing::debug!(remote = %addr, error = %e, "TLS handshake failed");
				shared.conn_state(addr, ConnState::Closed);
				return;
			}
		};
	}

	let mut conn = BufConn::new(io, shared.buffers.acquire_read(), shared.buffers.acquire_write());
	let mut ctx = shared.contexts.acquire();
	let conn_id = shared.next_conn_id.fetch_add(1, Ordering::Relaxed);
	ctx.attach(addr, shared.tls.is_some(), conn_id);
	if shared.config.disable_header_names_normalizing {
		ctx.request_mut().header_mut().disable_normalizing();
		ctx.response_mut().header_mut().disable_normalizing();
	}
	ctx.response_mut()
		.header_mut()
		.set_no_default_content_type(shared.config.no_default_content_type);

	let mut stop = shared.stop.subscribe();
	let end = match serve_requests(&shared, &mut conn, &mut ctx, &mut stop).await {
		Ok(end) => end,
		Err(e) => {
			shared.log_conn_error(addr, &e);
			End::Close
		}
	};
	shared.contexts.release(ctx);

	match end {
		End::Hijack(handler) => {
			let parts = conn.into_parts();
			shared.buffers.release_read(parts.read_buf);
			shared.buffers.release_write(parts.write_buf);
			shared.conn_state(addr, ConnState::Hijacked);
			tracing::debug!(remote = %addr, "connection hijacked");
			let _ = tokio::spawn(handler(Hijacked::new(parts.io, parts.unread, addr)));
		}
		End::Failed(e) => {
			shared.log_conn_error(addr, &e);
			linger(&mut conn).await;
			release(&shared, conn);
			shared.conn_state(addr, ConnState::Closed);
		}
		End::Close => {
			let _ = Pin::new(&mut conn).close().await;
			release(&shared, conn);
			shared.conn_state(addr, ConnState::Closed);
		}
	}
	drop(guard);
}

/// Returns the buffers of a finished connection to the pool.
fn release(shared: &Shared, conn: BufConn<BoxTransport>) {
	let parts = conn.into_parts();
	shared.buffers.release_read(parts.read_buf);
	shared.buffers.release_write(parts.write_buf);
}

/// Shuts down the write side and discards input for a while, so the peer sees the error
/// response instead of a reset caused by unread data.
async fn linger(conn: &mut BufConn<BoxTransport>) {
	if Pin::new(&mut *conn).close().await.is_err() {
		return;
	}
	let drain = async {
		let mut scratch = [0_u8; 1024];
		let mut total = 0;
		while total < LINGER_LIMIT {
			match Pin::new(&mut *conn).read(&mut scratch).await {
				Ok(0) | Err(_) => break,
				Ok(n) => total += n,
			}
		}
	};
	let _ = tokio::time::timeout(LINGER_TIMEOUT, drain).await;
}

/// Flushes pending response bytes before the connection would block on reading.
async fn flush(conn: &mut BufConn<BoxTransport>, timeout: Option<Duration>) -> Result<(), Error> {
	if conn.pending_write() == 0 {
		return Ok(());
	}
	deadline(deadline_after(timeout), Phase::Write, async {
		Ok(Pin::new(&mut *conn).flush().await?)
	})
	.await
}

/// Maps an error reading a request to the status and body of the reply.
fn error_reply(e: &Error) -> (u16, &'static str) {
	match e {
		Error::BufferTooSmall(_) => (431, "Too big request header"),
		Error::Timeout(_) => (408, "Request timeout"),
		Error::BodyTooLarge => (413, "Request Entity Too Large"),
		_ => (400, "Error when parsing request"),
	}
}

/// Replies to a request that could not be read and returns the error.
async fn write_error(
	shared: &Shared,
	conn: &mut BufConn<BoxTransport>,
	ctx: &mut RequestCtx,
	e: Error,
) -> Result<End, Error> {
	if let Error::Io(_) = e {
		return Err(e);
	}
	let (status, message) = error_reply(&e);
	ctx.error(message, status);
	if let Some(hook) = &shared.hooks.error_handler {
		hook(ctx, &e);
	}
	ctx.set_connection_close();
	shared.add_default_headers(ctx.response_mut().header_mut());
	let write_deadline = deadline_after(shared.config.write_timeout);
	deadline(write_deadline, Phase::Write, async {
		ctx.response_mut().write(Pin::new(&mut *conn), true).await?;
		Ok(Pin::new(&mut *conn).flush().await?)
	})
	.await?;
	Ok(End::Failed(e))
}

/// Runs the request loop.
async fn serve_requests(
	shared: &Shared,
	conn: &mut BufConn<BoxTransport>,
	ctx: &mut RequestCtx,
	stop: &mut watch::Receiver<bool>,
) -> Result<End, Error> {
	let config = &shared.config;
	let addr = ctx.remote_addr();
	let mut served = 0_usize;
	loop {
		// Pipelined requests are answered in one batch; everything else is flushed before
		// blocking on the socket.
		if headers_length(conn.buffered()).is_none() {
			flush(conn, config.write_timeout).await?;
		}

		if served > 0 {
			if conn.buffered().is_empty() {
				shared.conn_state(addr, ConnState::Idle);
				let idle = deadline_after(config.idle_timeout());
				let wait = deadline(idle, Phase::Read, async {
					let readable = Pin::new(&mut *conn)
						.read_buf(|b: &[u8]| (0, !b.is_empty()))
						.await?;
					Ok(readable)
				});
				let readable = tokio::select! {
					readable = wait => readable,
					_ = stop.changed() => return Ok(End::Close),
				};
				match readable {
					Ok(true) => (),
					Ok(false) | Err(Error::Timeout(_)) => return Ok(End::Close),
					Err(e) => return Err(e),
				}
			}
			shared.conn_state(addr, ConnState::Active);
		}

		let mut options = ReadOptions {
			max_header_size: conn.read_capacity(),
			max_body_size: config.max_request_body_size,
			secure: config.secure_error_log_message,
		};
		let mut read_deadline = deadline_after(config.read_timeout);
		let header = deadline(
			read_deadline,
			Phase::Read,
			ctx.request_mut().read_header(Pin::new(&mut *conn), &options),
		)
		.await;
		match header {
			Ok(()) => (),
			Err(Error::ConnectionClosedEarly) => return Ok(End::Close),
			Err(e) => return write_error(shared, conn, ctx, e).await,
		}
		ctx.begin();
		served += 1;

		let overrides = shared
			.hooks
			.header_received
			.as_ref()
			.map_or_else(RequestConfig::default, |hook| hook(ctx.header()));
		if let Some(timeout) = overrides.read_timeout {
			read_deadline = deadline_after(Some(timeout));
		}
		if let Some(max) = overrides.max_request_body_size {
			options.max_body_size = max;
		}
		let write_timeout = overrides.write_timeout.or(config.write_timeout);

		if ctx.header().expects_continue() {
			let proceed = shared
				.hooks
				.continue_handler
				.as_ref()
				.map_or(true, |hook| hook(ctx.header()));
			if !proceed {
				ctx.error("Expectation Failed", 417);
				ctx.set_connection_close();
				shared.add_default_headers(ctx.response_mut().header_mut());
				let write = ctx.response_mut().write(Pin::new(&mut *conn), true);
				deadline(deadline_after(write_timeout), Phase::Write, write).await?;
				return Ok(End::Close);
			}
			deadline(deadline_after(write_timeout), Phase::Write, async {
				Pin::new(&mut *conn).write_all(CONTINUE).await?;
				Ok(Pin::new(&mut *conn).flush().await?)
			})
			.await?;
		}

		let body = deadline(
			read_deadline,
			Phase::Read,
			ctx.request_mut().continue_read_body(Pin::new(&mut *conn), &options),
		)
		.await;
		if let Err(e) = body {
			return write_error(shared, conn, ctx, e).await;
		}

		shared.handler.handle(ctx);
		let hijack = ctx.take_hijack();

		let request = ctx.header();
		let http10 = request.minor_version() == 0;
		let keep_alive_10 = http10 && request.keep_alive();
		let is_head = request.is_head();
		let close = config.disable_keepalive
			|| request.connection_close()
			|| (config.max_requests_per_conn > 0 && served >= config.max_requests_per_conn)
			|| (config.close_on_shutdown && *stop.borrow());
		if close {
			ctx.set_connection_close();
		}
		let response = ctx.response_mut();
		response.set_skip_body(is_head);
		if keep_alive_10 && !response.header().connection_close() {
			response.header_mut().set(b"Connection", b"keep-alive");
		}
		shared.add_default_headers(response.header_mut());

		let skip_response = hijack.is_some() && ctx.hijack_no_response();
		if !skip_response {
			let write = ctx.response_mut().write(Pin::new(&mut *conn), !http10);
			deadline(deadline_after(write_timeout), Phase::Write, write).await?;
		}
		if let Some(handler) = hijack {
			flush(conn, write_timeout).await?;
			return Ok(End::Hijack(handler));
		}
		if ctx.response().header().connection_close() {
			flush(conn, write_timeout).await?;
			return Ok(End::Close);
		}
		ctx.next_request();
	}
}
