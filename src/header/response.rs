use super::scanner::{Scan, Scanner};
use super::{append_line, cookie, trailer, HeaderSet, Length, Special};
use crate::body::Framing;
use crate::error::{Error, ParseError};
use crate::status;
use crate::util::{append_uint, has_token, trim};

/// The `Content-Type` sent when none is set.
pub const DEFAULT_CONTENT_TYPE: &[u8] = b"text/plain; charset=utf-8";

/// The header of an HTTP response.
#[derive(Clone, Debug)]
pub struct ResponseHeader {
	/// The status code.
	status: u16,

	/// The reason phrase; the canonical phrase is used when empty.
	reason: Vec<u8>,

	/// The minor HTTP version, 0 or 1.
	minor_version: u8,

	/// The `Content-Type` header.
	content_type: Vec<u8>,

	/// The `Content-Encoding` header.
	content_encoding: Vec<u8>,

	/// The `Server` header.
	server: Vec<u8>,

	/// The framing announced by `Content-Length` and `Transfer-Encoding`.
	length: Length,

	/// Whether the connection is to be closed after this response.
	connection_close: bool,

	/// Whether `Connection` carried the `keep-alive` token.
	keep_alive: bool,

	/// Whether `Connection` carried the `upgrade` token.
	upgrade: bool,

	/// `Set-Cookie` values keyed by cookie name.
	cookies: HeaderSet,

	/// Keys announced by the `Trailer` header.
	trailer_keys: Vec<Vec<u8>>,

	/// Trailer fields.
	trailers: HeaderSet,

	/// All other fields.
	fields: HeaderSet,

	/// Whether key normalization is disabled.
	disable_normalizing: bool,

	/// Whether the default `Content-Type` is suppressed.
	no_default_content_type: bool,
}

impl Default for ResponseHeader {
	fn default() -> Self {
		Self {
			status: status::OK,
			reason: Vec::new(),
			minor_version: 1,
			content_type: Vec::new(),
			content_encoding: Vec::new(),
			server: Vec::new(),
			length: Length::Unset,
			connection_close: false,
			keep_alive: false,
			upgrade: false,
			cookies: HeaderSet::new(),
			trailer_keys: Vec::new(),
			trailers: HeaderSet::new(),
			fields: HeaderSet::new(),
			disable_normalizing: false,
			no_default_content_type: false,
		}
	}
}

impl ResponseHeader {
	/// Creates a `200 OK` header.
	pub fn new() -> Self {
		Self::default()
	}

	/// Clears the header back to its defaults, keeping its settings and allocations.
	pub fn reset(&mut self) {
		self.status = status::OK;
		self.reason.clear();
		self.minor_version = 1;
		self.content_type.clear();
		self.content_encoding.clear();
		self.server.clear();
		self.length = Length::Unset;
		self.connection_close = false;
		self.keep_alive = false;
		self.upgrade = false;
		self.cookies.reset();
		self.trailer_keys.clear();
		self.trailers.reset();
		self.fields.reset();
	}

	/// Disables key normalization.
	pub fn disable_normalizing(&mut self) {
		self.disable_normalizing = true;
	}

	/// Suppresses the default `Content-Type` when none is set.
	pub fn set_no_default_content_type(&mut self, no_default: bool) {
		self.no_default_content_type = no_default;
	}

	/// Returns `true` unless key normalization has been disabled.
	fn normalize(&self) -> bool {
		!self.disable_normalizing
	}

	/// Returns the status code.
	pub fn status(&self) -> u16 {
		self.status
	}

	/// Sets the status code.
	pub fn set_status(&mut self, status: u16) {
		self.status = status;
	}

	/// Returns the reason phrase, falling back to the canonical phrase of the status code.
	pub fn reason(&self) -> &[u8] {
		if self.reason.is_empty() {
			status::reason(self.status).as_bytes()
		} else {
			&self.reason
		}
	}

	/// Sets a custom reason phrase.
	pub fn set_reason(&mut self, reason: &[u8]) {
		self.reason.clear();
		self.reason.extend_from_slice(reason);
	}

	/// Returns the minor HTTP version.
	pub fn minor_version(&self) -> u8 {
		self.minor_version
	}

	/// Returns the `Content-Type` header as it will be sent.
	pub fn content_type(&self) -> &[u8] {
		if self.content_type.is_empty() && !self.no_default_content_type {
			DEFAULT_CONTENT_TYPE
		} else {
			&self.content_type
		}
	}

	/// Sets the `Content-Type` header.
	pub fn set_content_type(&mut self, content_type: &[u8]) {
		self.content_type.clear();
		self.content_type.extend_from_slice(content_type);
	}

	/// Returns the `Content-Encoding` header.
	pub fn content_encoding(&self) -> &[u8] {
		&self.content_encoding
	}

	/// Sets the `Content-Encoding` header.
	pub fn set_content_encoding(&mut self, encoding: &[u8]) {
		self.content_encoding.clear();
		self.content_encoding.extend_from_slice(encoding);
	}

	/// Returns the `Server` header.
	pub fn server(&self) -> &[u8] {
		&self.server
	}

	/// Sets the `Server` header.
	pub fn set_server(&mut self, server: &[u8]) {
		self.server.clear();
		self.server.extend_from_slice(server);
	}

	/// Returns the declared body framing.
	pub fn length(&self) -> Length {
		self.length
	}

	/// Returns the value of `Content-Length`, if the body is not chunked.
	pub fn content_length(&self) -> Option<u64> {
		match self.length {
			Length::Fixed(n) => Some(n),
			Length::Unset | Length::Chunked => None,
		}
	}

	/// Announces a body of `n` bytes.
	pub fn set_content_length(&mut self, n: u64) {
		self.length = Length::Fixed(n);
	}

	/// Announces a chunked body.
	pub fn set_chunked(&mut self) {
		self.length = Length::Chunked;
	}

	/// Forgets any announced length.
	pub(crate) fn clear_length(&mut self) {
		self.length = Length::Unset;
	}

	/// Returns `true` if the connection will be closed after this response.
	///
	/// Besides `Connection: close` and HTTP/1.0 without keep-alive, a body delimited by closing
	/// the connection implies closing.
	pub fn connection_close(&self) -> bool {
		self.connection_close || self.framing() == Framing::Identity
	}

	/// Sets or clears `Connection: close`.
	pub fn set_connection_close(&mut self, close: bool) {
		self.connection_close = close;
	}

	/// Returns `true` if `Connection` carries the `upgrade` token.
	pub fn connection_upgrade(&self) -> bool {
		self.upgrade
	}

	/// Returns the `Set-Cookie` values keyed by cookie name.
	pub fn cookies(&self) -> &HeaderSet {
		&self.cookies
	}

	/// Returns the full `Set-Cookie` value for a cookie name.
	pub fn cookie(&self, name: &[u8]) -> Option<&[u8]> {
		self.cookies.get(name)
	}

	/// Adds a `Set-Cookie` value, replacing an earlier value for the same cookie name.
	pub fn set_cookie(&mut self, value: &[u8]) {
		let name = cookie::set_cookie_key(value);
		self.cookies.set(name, value);
	}

	/// Returns the fields that have no dedicated accessor.
	pub fn headers(&self) -> &HeaderSet {
		&self.fields
	}

	/// Returns the value of a header.
	pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
		let value = match Special::classify(key) {
			Special::ContentType => &self.content_type,
			Special::ContentEncoding => &self.content_encoding,
			Special::Server => &self.server,
			_ => return self.fields.get(key),
		};
		(!value.is_empty()).then_some(&value[..])
	}

	/// Sets a header, replacing earlier values.
	pub fn set(&mut self, key: &[u8], value: &[u8]) {
		if !self.apply_special(key, value) {
			let normalize = self.normalize();
			self.fields.set_with(key, value, normalize);
		}
	}

	/// Adds a header without replacing earlier values.
	pub fn add(&mut self, key: &[u8], value: &[u8]) {
		if !self.apply_special(key, value) {
			let normalize = self.normalize();
			self.fields.add_with(key, value, normalize);
		}
	}

	/// Removes a header.
	pub fn remove(&mut self, key: &[u8]) {
		match Special::classify(key) {
			Special::ContentType => self.content_type.clear(),
			Special::ContentEncoding => self.content_encoding.clear(),
			Special::Server => self.server.clear(),
			Special::ContentLength | Special::TransferEncoding => self.length = Length::Unset,
			Special::SetCookie => self.cookies.reset(),
			Special::Trailer => self.trailer_keys.clear(),
			Special::Connection => {
				self.connection_close = false;
				self.keep_alive = false;
				self.upgrade = false;
				let _ = self.fields.remove(key);
			}
			_ => {
				let _ = self.fields.remove(key);
			}
		}
	}

	/// Stores a special header set through the API, returning `false` for ordinary keys.
	fn apply_special(&mut self, key: &[u8], value: &[u8]) -> bool {
		match Special::classify(key) {
			Special::ContentType => self.set_content_type(value),
			Special::ContentEncoding => self.set_content_encoding(value),
			Special::Server => self.set_server(value),
			Special::ContentLength => {
				if let Ok(n) = crate::util::parse_uint(trim(value)) {
					self.length = Length::Fixed(n);
				}
			}
			Special::TransferEncoding => self.length.apply_transfer_encoding(value),
			Special::Connection if has_token(value, b"close") => self.connection_close = true,
			Special::SetCookie => self.set_cookie(value),
			Special::Trailer => {
				let normalize = self.normalize();
				trailer::parse_declaration(value, &mut self.trailer_keys, normalize);
			}
			_ => return false,
		}
		true
	}

	/// Returns the keys announced by the `Trailer` header.
	pub fn trailer_keys(&self) -> &[Vec<u8>] {
		&self.trailer_keys
	}

	/// Returns the trailer fields.
	pub fn trailers(&self) -> &HeaderSet {
		&self.trailers
	}

	/// Sets a trailer field to send after a chunked body and announces it in the `Trailer`
	/// header.
	///
	/// # Errors
	/// This function returns [`ParseError::ForbiddenTrailer`] if the key may not appear in a
	/// trailer.
	pub fn set_trailer(&mut self, key: &[u8], value: &[u8]) -> Result<(), ParseError> {
		if trailer::is_forbidden(key) {
			return Err(ParseError::ForbiddenTrailer(
				String::from_utf8_lossy(key).into_owned(),
			));
		}
		let normalize = self.normalize();
		trailer::parse_declaration(key, &mut self.trailer_keys, normalize);
		self.trailers.set_with(key, value, normalize);
		Ok(())
	}

	/// Parses a received trailer block into the trailer fields.
	pub(crate) fn parse_trailer(&mut self, block: &[u8]) -> Result<(), ParseError> {
		let normalize = self.normalize();
		trailer::parse(block, &mut self.trailers, normalize)
	}

	/// Returns `true` if the status code never carries a body.
	pub fn is_bodyless(&self) -> bool {
		status::is_bodyless(self.status)
	}

	/// Returns the framing of the body that follows this header.
	pub fn framing(&self) -> Framing {
		if self.status == status::SWITCHING_PROTOCOLS {
			return Framing::Upgrade;
		}
		if self.is_bodyless() {
			return Framing::Fixed(0);
		}
		match self.length {
			Length::Chunked => Framing::Chunked,
			Length::Fixed(n) => Framing::Fixed(n),
			Length::Unset if self.upgrade => Framing::Upgrade,
			Length::Unset => Framing::Identity,
		}
	}

	/// Parses a complete header block.
	///
	/// Previous contents are discarded first. Returns the length of the block.
	///
	/// # Errors
	/// This function returns a [`ParseError`] for a malformed status line or field, and a
	/// [`FramingError`](crate::error::FramingError) for an invalid `Content-Length`.
	pub fn parse(&mut self, block: &[u8]) -> Result<usize, Error> {
		self.reset();
		let start = super::fields_start(block)?;
		{
			let mut headers: [httparse::Header<'_>; 0] = [];
			let mut response = httparse::Response::new(&mut headers);
			super::check_start_line(response.parse(block))?;
			self.status = response.code.unwrap_or(status::OK);
			self.minor_version = response.version.unwrap_or(1);
			if let Some(reason) = response.reason {
				if reason.as_bytes() != status::reason(self.status).as_bytes() {
					self.set_reason(reason.as_bytes());
				}
			}
		}

		let normalize = self.normalize();
		let mut scanner = Scanner::new(&block[start..]);
		loop {
			let field = match scanner.next()? {
				Scan::Field(field) => field,
				Scan::End => break,
				Scan::NeedMore => return Err(ParseError::Truncated.into()),
			};
			let value = field.value;
			match Special::classify(field.key) {
				Special::ContentType => self.set_content_type(value),
				Special::ContentEncoding => self.set_content_encoding(value),
				Special::Server => self.set_server(value),
				Special::ContentLength => self.length.apply_content_length(value)?,
				Special::TransferEncoding => self.length.apply_transfer_encoding(value),
				Special::Connection if has_token(value, b"close") => self.connection_close = true,
				Special::Connection => {
					self.keep_alive |= has_token(value, b"keep-alive");
					self.upgrade |= has_token(value, b"upgrade");
					self.fields.add_raw(&field, normalize);
				}
				Special::SetCookie => {
					let name = cookie::set_cookie_key(value);
					self.cookies.set(name, value);
				}
				Special::Trailer => {
					trailer::parse_declaration(value, &mut self.trailer_keys, normalize);
				}
				_ => self.fields.add_raw(&field, normalize),
			}
		}
		if self.minor_version == 0 && !self.keep_alive {
			self.connection_close = true;
		}
		Ok(start + scanner.position())
	}

	/// Serializes the status line and header block into `dst`.
	///
	/// The length headers written follow `framing`. Responses whose status forbids a body get
	/// neither a length nor a default `Content-Type`.
	pub fn append_head(&self, dst: &mut Vec<u8>, framing: Framing) {
		dst.extend_from_slice(b"HTTP/1.1 ");
		append_uint(dst, u64::from(self.status));
		dst.push(b' ');
		dst.extend_from_slice(self.reason());
		dst.extend_from_slice(b"\r\n");
		if !self.server.is_empty() {
			append_line(dst, b"Server", &self.server);
		}
		let bodyless = self.is_bodyless();
		if !bodyless {
			let content_type = self.content_type();
			if !content_type.is_empty() {
				append_line(dst, b"Content-Type", content_type);
			}
		}
		if !self.content_encoding.is_empty() {
			append_line(dst, b"Content-Encoding", &self.content_encoding);
		}
		match framing {
			_ if bodyless => (),
			Framing::Fixed(n) => {
				dst.extend_from_slice(b"Content-Length: ");
				append_uint(dst, n);
				dst.extend_from_slice(b"\r\n");
			}
			Framing::Chunked => {
				append_line(dst, b"Transfer-Encoding", b"chunked");
				trailer::append_declaration(dst, &self.trailer_keys);
			}
			Framing::Identity | Framing::Upgrade => (),
		}
		for cookie in &self.cookies {
			append_line(dst, b"Set-Cookie", cookie.value());
		}
		self.fields.append_lines(dst);
		if self.connection_close {
			append_line(dst, b"Connection", b"close");
		}
		dst.extend_from_slice(b"\r\n");
	}
}

impl crate::pool::Reset for ResponseHeader {
	fn reset(&mut self) {
		ResponseHeader::reset(self);
	}
}

#[cfg(test)]
mod test {
	use super::*;

	/// Parses a block, panicking on error.
	fn parse(block: &[u8]) -> ResponseHeader {
		let mut h = ResponseHeader::new();
		let n = h.parse(block).unwrap();
		assert_eq!(n, block.len());
		h
	}

	/// Tests parsing a typical response.
	#[test]
	fn test_parse() {
		let h = parse(b"HTTP/1.1 404 Not Found\r\nServer: s\r\nContent-Type: text/html\r\nContent-Length: 3\r\nSet-Cookie: a=1; Path=/\r\nSet-Cookie: b=2\r\nSet-Cookie: a=3\r\nX-Y: z\r\n\r\n");
		assert_eq!(h.status(), 404);
		assert_eq!(h.reason(), b"Not Found");
		assert_eq!(h.server(), b"s");
		assert_eq!(h.content_type(), b"text/html");
		assert_eq!(h.framing(), Framing::Fixed(3));
		assert_eq!(h.cookies().len(), 2);
		assert_eq!(h.cookie(b"a"), Some(&b"a=3"[..]));
		assert_eq!(h.get(b"x-y"), Some(&b"z"[..]));
		assert!(!h.connection_close());
	}

	/// Tests connection-close inference from the version and the Connection header.
	#[test]
	fn test_connection_close() {
		assert!(parse(b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n").connection_close());
		assert!(!parse(b"HTTP/1.0 200 OK\r\nConnection: keep-alive\r\nContent-Length: 0\r\n\r\n")
			.connection_close());
		assert!(!parse(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").connection_close());
	}

	/// Tests the framing chosen for assorted statuses and headers.
	#[test]
	fn test_framing() {
		assert_eq!(
			parse(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\nTransfer-Encoding: chunked\r\n\r\n")
				.framing(),
			Framing::Chunked
		);
		let h = parse(b"HTTP/1.1 200 OK\r\n\r\n");
		assert_eq!(h.framing(), Framing::Identity);
		assert!(h.connection_close());
		assert_eq!(
			parse(b"HTTP/1.1 204 No Content\r\n\r\n").framing(),
			Framing::Fixed(0)
		);
		assert_eq!(
			parse(b"HTTP/1.1 304 Not Modified\r\nContent-Length: 40\r\n\r\n").framing(),
			Framing::Fixed(0)
		);
		assert_eq!(
			parse(b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n")
				.framing(),
			Framing::Upgrade
		);
	}

	/// Tests that a custom reason phrase is kept.
	#[test]
	fn test_custom_reason() {
		let h = parse(b"HTTP/1.1 200 Fine\r\nContent-Length: 0\r\n\r\n");
		assert_eq!(h.reason(), b"Fine");
	}

	/// Tests that serialized headers parse back to the same values.
	#[test]
	fn test_round_trip() {
		let mut h = ResponseHeader::new();
		h.set_status(201);
		h.set_server(b"fastwire");
		h.set_cookie(b"sid=1; HttpOnly");
		h.add(b"x-a", b"1");
		let mut wire = Vec::new();
		h.append_head(&mut wire, Framing::Fixed(4));
		assert!(wire.starts_with(b"HTTP/1.1 201 Created\r\n"));
		let back = parse(&wire);
		assert_eq!(back.status(), 201);
		assert_eq!(back.server(), b"fastwire");
		assert_eq!(back.content_type(), DEFAULT_CONTENT_TYPE);
		assert_eq!(back.framing(), Framing::Fixed(4));
		assert_eq!(back.cookie(b"sid"), Some(&b"sid=1; HttpOnly"[..]));
		assert_eq!(back.get(b"X-A"), Some(&b"1"[..]));
	}

	/// Tests that bodyless statuses carry neither a length nor a default type.
	#[test]
	fn test_bodyless_head() {
		let mut h = ResponseHeader::new();
		h.set_status(204);
		let mut wire = Vec::new();
		h.append_head(&mut wire, Framing::Fixed(0));
		assert_eq!(wire, b"HTTP/1.1 204 No Content\r\n\r\n");
	}

	/// Tests that the default content type can be turned off.
	#[test]
	fn test_no_default_content_type() {
		let mut h = ResponseHeader::new();
		h.set_no_default_content_type(true);
		let mut wire = Vec::new();
		h.append_head(&mut wire, Framing::Fixed(0));
		assert_eq!(wire, b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
	}
}
