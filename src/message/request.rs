use super::ReadOptions;
use crate::body::send::Send;
use crate::body::Framing;
use crate::error::Error;
use crate::header::request::RequestHeader;
use crate::header::{read_block, Length};
use crate::util::io::AsyncWriteExt as _;
use futures_io::{AsyncBufRead, AsyncWrite};
use std::pin::Pin;
use std::time::Duration;

/// An HTTP request with a fully buffered body.
#[derive(Clone, Debug, Default)]
pub struct Request {
	/// The header.
	header: RequestHeader,

	/// The body.
	body: Vec<u8>,

	/// The absolute URL the request is sent to, for client use.
	url: Option<url::Url>,

	/// The overall deadline budget of a client call.
	timeout: Option<Duration>,

	/// Scratch space for the header block on its way in or out.
	head: Vec<u8>,
}

impl Request {
	/// Creates a `GET /` request with an empty body.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the header.
	pub fn header(&self) -> &RequestHeader {
		&self.header
	}

	/// Returns the header for modification.
	pub fn header_mut(&mut self) -> &mut RequestHeader {
		&mut self.header
	}

	/// Returns the body.
	pub fn body(&self) -> &[u8] {
		&self.body
	}

	/// Returns the body for modification.
	pub fn body_mut(&mut self) -> &mut Vec<u8> {
		&mut self.body
	}

	/// Replaces the body.
	pub fn set_body(&mut self, body: &[u8]) {
		self.body.clear();
		self.body.extend_from_slice(body);
	}

	/// Returns the absolute URL set by [`set_uri`](Self::set_uri).
	pub fn uri(&self) -> Option<&url::Url> {
		self.url.as_ref()
	}

	/// Points the request at an absolute URL.
	///
	/// The request target and the `Host` header are derived from the URL.
	///
	/// # Errors
	/// This function returns [`Error::Url`] if `uri` is not a valid absolute URL.
	pub fn set_uri(&mut self, uri: &str) -> Result<(), Error> {
		let url = url::Url::parse(uri)?;
		self.set_url(url);
		Ok(())
	}

	/// Points the request at an already parsed URL.
	pub fn set_url(&mut self, url: url::Url) {
		let mut target = url.path().to_owned();
		if let Some(query) = url.query() {
			target.push('?');
			target.push_str(query);
		}
		self.header.set_request_uri(target.as_bytes());
		let host = url.host_str().unwrap_or_default();
		match url.port() {
			Some(port) => self.header.set_host(format!("{host}:{port}").as_bytes()),
			None => self.header.set_host(host.as_bytes()),
		}
		self.url = Some(url);
	}

	/// Returns the overall time budget of a client call.
	pub fn timeout(&self) -> Option<Duration> {
		self.timeout
	}

	/// Sets the overall time budget of a client call, covering connection wait, dial, write and
	/// read.
	pub fn set_timeout(&mut self, timeout: Option<Duration>) {
		self.timeout = timeout;
	}

	/// Reads a request header from `socket`.
	///
	/// Leading empty lines are skipped. The body, if any, is left unread.
	///
	/// # Errors
	/// This function returns [`Error::ConnectionClosedEarly`] if the socket is at end of file,
	/// [`Error::BufferTooSmall`] if the header exceeds `options.max_header_size`, and any parse
	/// or I/O error.
	pub async fn read_header<Socket: AsyncBufRead + ?Sized>(
		&mut self,
		socket: Pin<&mut Socket>,
		options: &ReadOptions,
	) -> Result<(), Error> {
		let _ = read_block(
			socket,
			&mut self.head,
			options.max_header_size,
			"request",
			options.secure,
			true,
		)
		.await?;
		let _ = self.header.parse(&self.head)?;
		Ok(())
	}

	/// Reads the body announced by a header read with [`read_header`](Self::read_header).
	///
	/// Trailer fields of a chunked body are parsed into the header.
	///
	/// # Errors
	/// This function returns [`Error::BodyTooLarge`] if the body exceeds
	/// `options.max_body_size`, and any framing, trailer or I/O error.
	pub async fn continue_read_body<Socket: AsyncBufRead + ?Sized>(
		&mut self,
		socket: Pin<&mut Socket>,
		options: &ReadOptions,
	) -> Result<(), Error> {
		let framing = self.header.framing();
		let trailer = super::read_body(socket, framing, options, &mut self.body).await?;
		if !trailer.is_empty() {
			self.header.parse_trailer(&trailer)?;
		}
		Ok(())
	}

	/// Reads a complete request.
	///
	/// # Errors
	/// See [`read_header`](Self::read_header) and
	/// [`continue_read_body`](Self::continue_read_body).
	pub async fn read<Socket: AsyncBufRead + ?Sized>(
		&mut self,
		mut socket: Pin<&mut Socket>,
		options: &ReadOptions,
	) -> Result<(), Error> {
		self.read_header(socket.as_mut(), options).await?;
		self.continue_read_body(socket, options).await
	}

	/// Returns the framing the body will be sent with.
	///
	/// A chunked header is honoured for HTTP/1.1; otherwise the body length is announced.
	pub fn send_framing(&self) -> Framing {
		if self.header.length() == Length::Chunked && self.header.minor_version() != 0 {
			Framing::Chunked
		} else {
			Framing::Fixed(self.body.len() as u64)
		}
	}

	/// Writes the request to `socket`.
	///
	/// The socket is not flushed.
	///
	/// # Errors
	/// This function returns any error of the socket.
	pub async fn write<Socket: AsyncWrite + ?Sized>(
		&mut self,
		mut socket: Pin<&mut Socket>,
	) -> Result<(), Error> {
		let framing = self.send_framing();
		self.head.clear();
		self.header.append_head(&mut self.head, framing);
		socket.as_mut().write_all(&self.head).await?;
		if self.body.is_empty() && framing != Framing::Chunked {
			return Ok(());
		}
		self.head.clear();
		self.header.trailers().append_lines(&mut self.head);
		let mut body = Send::new(socket, framing);
		Pin::new(&mut body).write_all(&self.body).await?;
		body.finish(&self.head).await?;
		Ok(())
	}
}

impl crate::pool::Reset for Request {
	fn reset(&mut self) {
		self.header.reset();
		self.body.clear();
		self.url = None;
		self.timeout = None;
		self.head.clear();
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::util::io::buffered::test::Pipe;
	use crate::util::io::BufConn;
	use futures_executor::block_on;

	/// Wraps raw bytes into a buffered connection.
	fn conn(input: &[u8]) -> BufConn<Pipe> {
		BufConn::new(Pipe::new(input), vec![0; 64], Vec::with_capacity(64))
	}

	/// Tests that a written request reads back identically.
	#[test]
	fn test_round_trip() {
		block_on(async {
			let mut req = Request::new();
			req.set_uri("http://example.com:8080/path?q=1").unwrap();
			req.header_mut().set_method(b"POST");
			req.header_mut().add(b"X-Test", b"yes");
			req.set_body(b"hello body");
			let mut out = Pipe::default();
			req.write(Pin::new(&mut out)).await.unwrap();

			let mut socket = conn(&out.output);
			let mut back = Request::new();
			back.read(Pin::new(&mut socket), &ReadOptions::default())
				.await
				.unwrap();
			assert_eq!(back.header().method(), b"POST");
			assert_eq!(back.header().request_uri(), b"/path?q=1");
			assert_eq!(back.header().host(), b"example.com:8080");
			assert_eq!(back.header().headers().get(b"x-test"), Some(&b"yes"[..]));
			assert_eq!(back.body(), b"hello body");
		});
	}

	/// Tests a chunked request with trailers, one of them forbidden.
	#[test]
	fn test_chunked_with_trailers() {
		block_on(async {
			let mut socket = conn(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\nX-Sum: 5\r\nHost: no\r\n\r\nGET /next HTTP/1.1\r\n\r\n");
			let mut req = Request::new();
			let e = req
				.read(Pin::new(&mut socket), &ReadOptions::default())
				.await
				.unwrap_err();
			assert!(matches!(
				e,
				Error::Parse(crate::error::ParseError::ForbiddenTrailer(_))
			));
			assert_eq!(req.body(), b"hello");
			assert_eq!(req.header().trailers().get(b"X-Sum"), Some(&b"5"[..]));

			// The pipelined request is untouched.
			let mut next = Request::new();
			next.read(Pin::new(&mut socket), &ReadOptions::default())
				.await
				.unwrap();
			assert_eq!(next.header().request_uri(), b"/next");
		});
	}

	/// Tests that a chunked header is downgraded to a length for HTTP/1.0.
	#[test]
	fn test_http10_never_chunked() {
		let mut req = Request::new();
		req.header_mut().set_chunked();
		req.header_mut().set_minor_version(0);
		req.set_body(b"abc");
		assert_eq!(req.send_framing(), Framing::Fixed(3));
		req.header_mut().set_minor_version(1);
		assert_eq!(req.send_framing(), Framing::Chunked);
	}
}
