use super::ReadOptions;
use crate::body::send::Send;
use crate::body::Framing;
use crate::error::{Error, ParseError};
use crate::header::response::ResponseHeader;
use crate::header::{read_block, Length};
use crate::status;
use crate::util::io::AsyncWriteExt as _;
use futures_io::{AsyncBufRead, AsyncWrite};
use std::pin::Pin;

/// An HTTP response with a fully buffered body.
#[derive(Clone, Debug, Default)]
pub struct Response {
	/// The header.
	header: ResponseHeader,

	/// The body.
	body: Vec<u8>,

	/// Whether the body is neither read nor written, as for a response to `HEAD`.
	skip_body: bool,

	/// Scratch space for the header block on its way in or out.
	head: Vec<u8>,
}

impl Response {
	/// Creates an empty `200 OK` response.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the header.
	pub fn header(&self) -> &ResponseHeader {
		&self.header
	}

	/// Returns the header for modification.
	pub fn header_mut(&mut self) -> &mut ResponseHeader {
		&mut self.header
	}

	/// Returns the status code.
	pub fn status(&self) -> u16 {
		self.header.status()
	}

	/// Sets the status code.
	pub fn set_status(&mut self, status: u16) {
		self.header.set_status(status);
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

	/// Returns `true` if the body is skipped.
	pub fn skip_body(&self) -> bool {
		self.skip_body
	}

	/// Sets whether the body is skipped when reading and writing.
	///
	/// A client sets this for responses to `HEAD`, which announce a length but carry no body.
	pub fn set_skip_body(&mut self, skip: bool) {
		self.skip_body = skip;
	}

	/// Reads a complete response from `socket`.
	///
	/// Interim `1xx` responses other than `101 Switching Protocols` are skipped.
	///
	/// # Errors
	/// This function returns [`Error::ConnectionClosedEarly`] if the socket is at end of file
	/// before the first byte, [`Error::BufferTooSmall`] or [`Error::BodyTooLarge`] if a limit
	/// in `options` is exceeded, and any parse, framing or I/O error.
	pub async fn read<Socket: AsyncBufRead + ?Sized>(
		&mut self,
		mut socket: Pin<&mut Socket>,
		options: &ReadOptions,
	) -> Result<(), Error> {
		loop {
			let _ = read_block(
				socket.as_mut(),
				&mut self.head,
				options.max_header_size,
				"response",
				options.secure,
				true,
			)
			.await?;
			let _ = self.header.parse(&self.head)?;
			let code = self.header.status();
			if code >= 200 || code == status::SWITCHING_PROTOCOLS {
				break;
			}
			tracing::trace!(status = code, "skipping interim response");
		}
		self.body.clear();
		if self.skip_body {
			return Ok(());
		}
		let framing = self.header.framing();
		let trailer = super::read_body(socket, framing, options, &mut self.body).await?;
		if !trailer.is_empty() {
			self.header.parse_trailer(&trailer)?;
		}
		Ok(())
	}

	/// Settles the framing of the response before it is written and returns it.
	///
	/// A chunked header is honoured only if `allow_chunked` is set; otherwise, and whenever no
	/// length was set, the length of the body is announced. After this call
	/// [`ResponseHeader::connection_close`] reflects the final framing.
	pub fn prepare(&mut self, allow_chunked: bool) -> Framing {
		if self.header.length() != Length::Chunked || !allow_chunked {
			self.header.set_content_length(self.body.len() as u64);
		}
		self.header.framing()
	}

	/// Writes the response to `socket`.
	///
	/// The framing is settled as by [`prepare`](Self::prepare). The body is omitted if the status
	/// forbids one or the body is skipped. The socket is not flushed.
	///
	/// # Errors
	/// This function returns any error of the socket.
	pub async fn write<Socket: AsyncWrite + ?Sized>(
		&mut self,
		mut socket: Pin<&mut Socket>,
		allow_chunked: bool,
	) -> Result<(), Error> {
		let framing = self.prepare(allow_chunked);
		self.head.clear();
		self.header.append_head(&mut self.head, framing);
		socket.as_mut().write_all(&self.head).await?;
		if self.skip_body || self.header.is_bodyless() || framing == Framing::Upgrade {
			return Ok(());
		}
		self.head.clear();
		self.header.trailers().append_lines(&mut self.head);
		let mut body = Send::new(socket, framing);
		Pin::new(&mut body).write_all(&self.body).await?;
		body.finish(&self.head).await?;
		Ok(())
	}

	/// Compresses the body with `codec` and sets `Content-Encoding`.
	///
	/// # Errors
	/// This function returns an error if the codec fails.
	pub fn compress_body(
		&mut self,
		codec: &dyn crate::compress::Codec,
		level: u32,
	) -> Result<(), Error> {
		let mut compressed = Vec::with_capacity(self.body.len() / 2);
		codec.compress(&self.body, level, &mut compressed)?;
		self.body = compressed;
		self.header.set_content_encoding(codec.name().as_bytes());
		Ok(())
	}

	/// Undoes the `Content-Encoding` of the body using the matching codec from `codecs`.
	///
	/// A body without `Content-Encoding` is left alone.
	///
	/// # Errors
	/// This function returns [`ParseError::UnsupportedEncoding`] if no codec matches, and the
	/// codec's error if decompression fails.
	pub fn decompress_body(
		&mut self,
		codecs: &[&dyn crate::compress::Codec],
	) -> Result<(), Error> {
		let encoding = crate::util::trim(self.header.content_encoding());
		if encoding.is_empty() || encoding.eq_ignore_ascii_case(b"identity") {
			return Ok(());
		}
		let codec = codecs
			.iter()
			.find(|c| c.name().as_bytes().eq_ignore_ascii_case(encoding))
			.ok_or_else(|| {
				ParseError::UnsupportedEncoding(String::from_utf8_lossy(encoding).into_owned())
			})?;
		let mut plain = Vec::with_capacity(self.body.len() * 2);
		codec.decompress(&self.body, &mut plain)?;
		self.body = plain;
		self.header.set_content_encoding(b"");
		Ok(())
	}
}

impl crate::pool::Reset for Response {
	fn reset(&mut self) {
		self.header.reset();
		self.body.clear();
		self.skip_body = false;
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
		BufConn::new(Pipe::new(input), vec![0; 128], Vec::with_capacity(64))
	}

	/// Tests that interim responses are skipped.
	#[test]
	fn test_skip_interim() {
		block_on(async {
			let mut socket = conn(b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
			let mut resp = Response::new();
			resp.read(Pin::new(&mut socket), &ReadOptions::default())
				.await
				.unwrap();
			assert_eq!(resp.status(), 200);
			assert_eq!(resp.body(), b"ok");
		});
	}

	/// Tests reading a body delimited by end of file.
	#[test]
	fn test_identity_body() {
		block_on(async {
			let mut socket = conn(b"HTTP/1.0 200 OK\r\n\r\nuntil the end");
			let mut resp = Response::new();
			resp.read(Pin::new(&mut socket), &ReadOptions::default())
				.await
				.unwrap();
			assert_eq!(resp.body(), b"until the end");
			assert!(resp.header().connection_close());
		});
	}

	/// Tests that a response to HEAD announces the length without a body.
	#[test]
	fn test_head_response() {
		block_on(async {
			let mut resp = Response::new();
			resp.set_body(b"12345");
			resp.set_skip_body(true);
			let mut out = Pipe::default();
			resp.write(Pin::new(&mut out), true).await.unwrap();
			assert!(out.output.ends_with(b"Content-Length: 5\r\n\r\n"));

			let mut socket = conn(&out.output);
			let mut back = Response::new();
			back.set_skip_body(true);
			back.read(Pin::new(&mut socket), &ReadOptions::default())
				.await
				.unwrap();
			assert_eq!(back.header().content_length(), Some(5));
			assert!(back.body().is_empty());
		});
	}

	/// Tests a chunked response with a trailer, and the downgrade for HTTP/1.0 peers.
	#[test]
	fn test_chunked_write() {
		block_on(async {
			let mut resp = Response::new();
			resp.header_mut().set_chunked();
			resp.header_mut().set_trailer(b"X-Sum", b"3").unwrap();
			resp.set_body(b"abc");
			let mut out = Pipe::default();
			resp.write(Pin::new(&mut out), true).await.unwrap();
			assert!(out.output.ends_with(b"\r\n\r\n3\r\nabc\r\n0\r\nX-Sum: 3\r\n\r\n"));

			let mut socket = conn(&out.output);
			let mut back = Response::new();
			back.read(Pin::new(&mut socket), &ReadOptions::default())
				.await
				.unwrap();
			assert_eq!(back.body(), b"abc");
			assert_eq!(back.header().trailers().get(b"x-sum"), Some(&b"3"[..]));

			resp.header_mut().set_chunked();
			assert_eq!(resp.prepare(false), Framing::Fixed(3));
		});
	}

	/// Tests that an encoding without a matching codec is reported by name and leaves the body
	/// untouched, while an identity encoding needs no codec.
	#[test]
	fn test_decompress_unsupported() {
		let mut resp = Response::new();
		resp.set_body(b"opaque");
		resp.header_mut().set_content_encoding(b" br ");
		match resp.decompress_body(&[]) {
			Err(Error::Parse(ParseError::UnsupportedEncoding(name))) => assert_eq!(name, "br"),
			other => panic!("unexpected {other:?}"),
		}
		assert_eq!(resp.body(), b"opaque");

		resp.header_mut().set_content_encoding(b"identity");
		resp.decompress_body(&[]).unwrap();
		assert_eq!(resp.body(), b"opaque");
	}
}
