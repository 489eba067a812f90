use crate::header::request::RequestHeader;
use crate::message::{Request, Response};
use crate::transport::{BoxFuture, BoxTransport};
use futures_io::{AsyncRead, AsyncWrite};
use std::future::Future;
use std::io::Result;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

/// A function that takes over a connection after the response has been sent.
pub(crate) type HijackHandler = Box<dyn FnOnce(Hijacked) -> BoxFuture<'static, ()> + Send>;

/// The state of one request being served: the request, the response under construction, and
/// facts about the connection it arrived on.
///
/// Contexts are pooled by the server and reset between requests, so a handler must not keep
/// references to one beyond its own invocation.
pub struct RequestCtx {
	/// The request.
	request: Request,

	/// The response.
	response: Response,

	/// The peer address.
	remote_addr: SocketAddr,

	/// Whether the connection runs over TLS.
	tls: bool,

	/// The server-unique connection number.
	conn_id: u64,

	/// The 1-based number of this request on its connection.
	conn_request_num: u64,

	/// When the connection was accepted.
	conn_time: Instant,

	/// When the request header was received.
	time: Instant,

	/// The function taking over the connection, if any.
	hijack: Option<HijackHandler>,

	/// Whether the response is not written before hijacking.
	hijack_no_response: bool,
}

impl std::fmt::Debug for RequestCtx {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RequestCtx")
			.field("request", &self.request)
			.field("response", &self.response)
			.field("remote_addr", &self.remote_addr)
			.field("conn_id", &self.conn_id)
			.field("conn_request_num", &self.conn_request_num)
			.field("hijacked", &self.hijack.is_some())
			.finish_non_exhaustive()
	}
}

impl Default for RequestCtx {
	fn default() -> Self {
		let now = Instant::now();
		Self {
			request: Request::new(),
			response: Response::new(),
			remote_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
			tls: false,
			conn_id: 0,
			conn_request_num: 0,
			conn_time: now,
			time: now,
			hijack: None,
			hijack_no_response: false,
		}
	}
}

impl RequestCtx {
	/// Binds the context to a newly accepted connection.
	pub(crate) fn attach(&mut self, remote_addr: SocketAddr, tls: bool, conn_id: u64) {
		self.remote_addr = remote_addr;
		self.tls = tls;
		self.conn_id = conn_id;
		self.conn_request_num = 0;
		self.conn_time = Instant::now();
	}

	/// Clears the messages for the next request on the same connection.
	pub(crate) fn next_request(&mut self) {
		crate::pool::Reset::reset(&mut self.request);
		crate::pool::Reset::reset(&mut self.response);
		self.hijack = None;
		self.hijack_no_response = false;
	}

	/// Records that a new request header has been received.
	pub(crate) fn begin(&mut self) {
		self.conn_request_num += 1;
		self.time = Instant::now();
	}

	/// Returns the request.
	pub fn request(&self) -> &Request {
		&self.request
	}

	/// Returns the request for modification.
	pub fn request_mut(&mut self) -> &mut Request {
		&mut self.request
	}

	/// Returns the request header.
	pub fn header(&self) -> &RequestHeader {
		self.request.header()
	}

	/// Returns the response.
	pub fn response(&self) -> &Response {
		&self.response
	}

	/// Returns the response for modification.
	pub fn response_mut(&mut self) -> &mut Response {
		&mut self.response
	}

	/// Returns the request method.
	pub fn method(&self) -> &[u8] {
		self.request.header().method()
	}

	/// Returns the request target.
	pub fn request_uri(&self) -> &[u8] {
		self.request.header().request_uri()
	}

	/// Returns the path part of the request target.
	pub fn path(&self) -> &[u8] {
		let uri = self.request_uri();
		match memchr::memchr2(b'?', b'#', uri) {
			Some(i) => &uri[..i],
			None => uri,
		}
	}

	/// Returns the request body.
	pub fn body(&self) -> &[u8] {
		self.request.body()
	}

	/// Returns the peer address.
	pub fn remote_addr(&self) -> SocketAddr {
		self.remote_addr
	}

	/// Returns the peer IP address.
	pub fn remote_ip(&self) -> IpAddr {
		self.remote_addr.ip()
	}

	/// Returns `true` if the connection runs over TLS.
	pub fn is_tls(&self) -> bool {
		self.tls
	}

	/// Returns the server-unique number of the connection.
	pub fn conn_id(&self) -> u64 {
		self.conn_id
	}

	/// Returns the 1-based number of this request on its connection.
	pub fn conn_request_num(&self) -> u64 {
		self.conn_request_num
	}

	/// Returns when the connection was accepted.
	pub fn conn_time(&self) -> Instant {
		self.conn_time
	}

	/// Returns when the request header was received.
	pub fn time(&self) -> Instant {
		self.time
	}

	/// Sets the response status code.
	pub fn set_status_code(&mut self, status: u16) {
		self.response.set_status(status);
	}

	/// Sets the response `Content-Type`.
	pub fn set_content_type(&mut self, content_type: &[u8]) {
		self.response.header_mut().set_content_type(content_type);
	}

	/// Replaces the response body.
	pub fn set_body(&mut self, body: &[u8]) {
		self.response.set_body(body);
	}

	/// Sets a successful response with the given type and body.
	pub fn success(&mut self, content_type: &[u8], body: &[u8]) {
		self.set_content_type(content_type);
		self.set_body(body);
	}

	/// Replaces the response with a plain text error.
	pub fn error(&mut self, message: &str, status: u16) {
		crate::pool::Reset::reset(&mut self.response);
		self.response.set_status(status);
		self.response
			.header_mut()
			.set_content_type(b"text/plain; charset=utf-8");
		self.response.set_body(message.as_bytes());
	}

	/// Asks for the connection to be closed after this response.
	pub fn set_connection_close(&mut self) {
		self.response.header_mut().set_connection_close(true);
	}

	/// Takes over the connection once the response has been sent.
	///
	/// After the handler returns, the response is written and flushed, and `handler` then runs on
	/// its own task with the raw connection. The server forgets the connection.
	pub fn hijack<F, Fut>(&mut self, handler: F)
	where
		F: FnOnce(Hijacked) -> Fut + Send + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		self.hijack = Some(Box::new(move |conn| Box::pin(handler(conn))));
	}

	/// Returns `true` if [`hijack`](Self::hijack) has been called.
	pub fn hijacked(&self) -> bool {
		self.hijack.is_some()
	}

	/// Sets whether the hijacked connection is handed over without writing the response.
	pub fn hijack_set_no_response(&mut self, no_response: bool) {
		self.hijack_no_response = no_response;
	}

	/// Returns `true` if the response is skipped for a hijacked connection.
	pub(crate) fn hijack_no_response(&self) -> bool {
		self.hijack_no_response
	}

	/// Removes the hijack handler.
	pub(crate) fn take_hijack(&mut self) -> Option<HijackHandler> {
		self.hijack.take()
	}
}

impl crate::pool::Reset for RequestCtx {
	fn reset(&mut self) {
		self.next_request();
		self.conn_request_num = 0;
		self.conn_id = 0;
	}
}

/// A connection taken over from the server.
///
/// Bytes the server had read ahead of the current request are returned first.
pub struct Hijacked {
	/// The transport.
	io: BoxTransport,

	/// Bytes read ahead by the server.
	unread: Vec<u8>,

	/// The number of bytes of `unread` already returned.
	pos: usize,

	/// The peer address.
	remote_addr: SocketAddr,
}

impl Hijacked {
	/// Wraps a transport and the bytes already read from it.
	pub(crate) fn new(io: BoxTransport, unread: Vec<u8>, remote_addr: SocketAddr) -> Self {
		Self {
			io,
			unread,
			pos: 0,
			remote_addr,
		}
	}

	/// Returns the peer address.
	pub fn remote_addr(&self) -> SocketAddr {
		self.remote_addr
	}

	/// Returns the transport and whatever read-ahead bytes have not been returned yet.
	pub fn into_inner(mut self) -> (BoxTransport, Vec<u8>) {
		let _ = self.unread.drain(..self.pos);
		(self.io, self.unread)
	}
}

impl std::fmt::Debug for Hijacked {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Hijacked")
			.field("unread", &(self.unread.len() - self.pos))
			.field("remote_addr", &self.remote_addr)
			.finish_non_exhaustive()
	}
}

impl AsyncRead for Hijacked {
	fn poll_read(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<Result<usize>> {
		let this = &mut *self;
		if this.pos < this.unread.len() {
			let available = &this.unread[this.pos..];
			let n = std::cmp::min(available.len(), buf.len());
			buf[..n].copy_from_slice(&available[..n]);
			this.pos += n;
			return Ok(n).into();
		}
		Pin::new(&mut this.io).poll_read(cx, buf)
	}
}

impl AsyncWrite for Hijacked {
	fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize>> {
		Pin::new(&mut self.io).poll_write(cx, buf)
	}

	fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		Pin::new(&mut self.io).poll_flush(cx)
	}

	fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		Pin::new(&mut self.io).poll_close(cx)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::util::io::buffered::test::Pipe;
	use crate::util::io::AsyncReadExt as _;
	use futures_executor::block_on;

	/// Tests that read-ahead bytes come before the transport’s own.
	#[test]
	fn test_hijacked_read_ahead() {
		block_on(async {
			let mut conn = Hijacked::new(
				Box::new(Pipe::new(b"world")),
				b"hello ".to_vec(),
				SocketAddr::from(([127, 0, 0, 1], 1)),
			);
			let mut buf = [0_u8; 4];
			assert_eq!(Pin::new(&mut conn).read(&mut buf).await.unwrap(), 4);
			assert_eq!(&buf, b"hell");
			let (_, rest) = conn.into_inner();
			assert_eq!(rest, b"o ");
		});
	}

	/// Tests path extraction and the reset between requests.
	#[test]
	fn test_ctx() {
		let mut ctx = RequestCtx::default();
		ctx.request_mut()
			.header_mut()
			.set_request_uri(b"/a/b?x=1");
		assert_eq!(ctx.path(), b"/a/b");
		ctx.begin();
		ctx.error("nope", 404);
		ctx.hijack(|_| async {});
		assert!(ctx.hijacked());
		assert_eq!(ctx.response().status(), 404);
		ctx.next_request();
		assert!(!ctx.hijacked());
		assert_eq!(ctx.response().status(), 200);
		assert_eq!(ctx.conn_request_num(), 1);
	}
}
