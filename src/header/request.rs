use super::scanner::{Scan, Scanner};
use super::{append_line, cookie, trailer, HeaderSet, Length, Special};
use crate::body::Framing;
use crate::error::{Error, ParseError};
use crate::util::{append_uint, has_token, trim};

/// The header of an HTTP request.
///
/// Framing-relevant and frequently used fields live in dedicated members; all other fields are
/// kept in arrival order in [`headers`](Self::headers).
#[derive(Clone, Debug)]
pub struct RequestHeader {
	/// The request method.
	method: Vec<u8>,

	/// The request target as it appears in the request line.
	request_uri: Vec<u8>,

	/// The minor HTTP version, 0 or 1.
	minor_version: u8,

	/// The `Host` header.
	host: Vec<u8>,

	/// The `User-Agent` header.
	user_agent: Vec<u8>,

	/// The `Content-Type` header.
	content_type: Vec<u8>,

	/// The framing announced by `Content-Length` and `Transfer-Encoding`.
	length: Length,

	/// Whether the connection is to be closed after this request.
	connection_close: bool,

	/// Whether `Connection` carried the `keep-alive` token.
	keep_alive: bool,

	/// Cookies from the `Cookie` header.
	cookies: HeaderSet,

	/// Keys announced by the `Trailer` header.
	trailer_keys: Vec<Vec<u8>>,

	/// Trailer fields, received after a chunked body or to be sent after one.
	trailers: HeaderSet,

	/// All other fields.
	fields: HeaderSet,

	/// Whether key normalization is disabled.
	disable_normalizing: bool,
}

impl Default for RequestHeader {
	fn default() -> Self {
		Self {
			method: b"GET".to_vec(),
			request_uri: b"/".to_vec(),
			minor_version: 1,
			host: Vec::new(),
			user_agent: Vec::new(),
			content_type: Vec::new(),
			length: Length::Unset,
			connection_close: false,
			keep_alive: false,
			cookies: HeaderSet::new(),
			trailer_keys: Vec::new(),
			trailers: HeaderSet::new(),
			fields: HeaderSet::new(),
			disable_normalizing: false,
		}
	}
}

impl RequestHeader {
	/// Creates a header for `GET /` over HTTP/1.1.
	pub fn new() -> Self {
		Self::default()
	}

	/// Clears the header back to its defaults, keeping the normalization setting and all
	/// allocations.
	pub fn reset(&mut self) {
		self.method.clear();
		self.method.extend_from_slice(b"GET");
		self.request_uri.clear();
		self.request_uri.push(b'/');
		self.minor_version = 1;
		self.host.clear();
		self.user_agent.clear();
		self.content_type.clear();
		self.length = Length::Unset;
		self.connection_close = false;
		self.keep_alive = false;
		self.cookies.reset();
		self.trailer_keys.clear();
		self.trailers.reset();
		self.fields.reset();
	}

	/// Disables key normalization, so keys are stored and sent exactly as given.
	pub fn disable_normalizing(&mut self) {
		self.disable_normalizing = true;
	}

	/// Returns `true` unless key normalization has been disabled.
	fn normalize(&self) -> bool {
		!self.disable_normalizing
	}

	/// Returns the method.
	pub fn method(&self) -> &[u8] {
		&self.method
	}

	/// Sets the method.
	pub fn set_method(&mut self, method: &[u8]) {
		self.method.clear();
		self.method.extend_from_slice(method);
	}

	/// Checks whether the method is `GET`.
	pub fn is_get(&self) -> bool {
		self.method == b"GET"
	}

	/// Checks whether the method is `HEAD`.
	pub fn is_head(&self) -> bool {
		self.method == b"HEAD"
	}

	/// Checks whether the method is one that may be safely repeated by default: `GET`, `HEAD`
	/// or `PUT`.
	pub fn is_idempotent(&self) -> bool {
		matches!(&self.method[..], b"GET" | b"HEAD" | b"PUT")
	}

	/// Returns the request target.
	pub fn request_uri(&self) -> &[u8] {
		&self.request_uri
	}

	/// Sets the request target.
	pub fn set_request_uri(&mut self, uri: &[u8]) {
		self.request_uri.clear();
		self.request_uri.extend_from_slice(uri);
	}

	/// Returns the minor HTTP version.
	pub fn minor_version(&self) -> u8 {
		self.minor_version
	}

	/// Sets the minor HTTP version.
	pub fn set_minor_version(&mut self, minor: u8) {
		self.minor_version = minor;
	}

	/// Returns the `Host` header.
	pub fn host(&self) -> &[u8] {
		&self.host
	}

	/// Sets the `Host` header.
	pub fn set_host(&mut self, host: &[u8]) {
		self.host.clear();
		self.host.extend_from_slice(host);
	}

	/// Returns the `User-Agent` header.
	pub fn user_agent(&self) -> &[u8] {
		&self.user_agent
	}

	/// Sets the `User-Agent` header.
	pub fn set_user_agent(&mut self, user_agent: &[u8]) {
		self.user_agent.clear();
		self.user_agent.extend_from_slice(user_agent);
	}

	/// Returns the `Content-Type` header.
	pub fn content_type(&self) -> &[u8] {
		&self.content_type
	}

	/// Sets the `Content-Type` header.
	pub fn set_content_type(&mut self, content_type: &[u8]) {
		self.content_type.clear();
		self.content_type.extend_from_slice(content_type);
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

	/// Returns `true` if the connection will be closed after this request.
	///
	/// This is the case for an explicit `Connection: close` and for an HTTP/1.0 request without
	/// `Connection: keep-alive`.
	pub fn connection_close(&self) -> bool {
		self.connection_close
	}

	/// Sets or clears `Connection: close`.
	pub fn set_connection_close(&mut self, close: bool) {
		self.connection_close = close;
	}

	/// Returns `true` if `Connection` carries the `keep-alive` token.
	pub fn keep_alive(&self) -> bool {
		self.keep_alive
	}

	/// Returns the cookies.
	pub fn cookies(&self) -> &HeaderSet {
		&self.cookies
	}

	/// Returns the value of the first cookie with the given name.
	pub fn cookie(&self, name: &[u8]) -> Option<&[u8]> {
		self.cookies.get(name)
	}

	/// Sets a cookie, replacing any previous cookie of the same name.
	pub fn set_cookie(&mut self, name: &[u8], value: &[u8]) {
		self.cookies.set(name, value);
	}

	/// Returns the fields that have no dedicated accessor.
	pub fn headers(&self) -> &HeaderSet {
		&self.fields
	}

	/// Returns the value of a header.
	///
	/// `Host`, `User-Agent` and `Content-Type` are looked up in their dedicated storage;
	/// framing headers are available through [`length`](Self::length) instead.
	pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
		let value = match Special::classify(key) {
			Special::Host => &self.host,
			Special::UserAgent => &self.user_agent,
			Special::ContentType => &self.content_type,
			_ => return self.fields.get(key),
		};
		(!value.is_empty()).then_some(&value[..])
	}

	/// Sets a header, replacing earlier values.
	///
	/// Special keys update their dedicated storage. An invalid `Content-Length` is ignored.
	pub fn set(&mut self, key: &[u8], value: &[u8]) {
		if !self.apply_special(key, value) {
			let normalize = self.normalize();
			self.fields.set_with(key, value, normalize);
		}
	}

	/// Adds a header without replacing earlier values.
	///
	/// Special keys behave as in [`set`](Self::set).
	pub fn add(&mut self, key: &[u8], value: &[u8]) {
		if !self.apply_special(key, value) {
			let normalize = self.normalize();
			self.fields.add_with(key, value, normalize);
		}
	}

	/// Removes a header.
	pub fn remove(&mut self, key: &[u8]) {
		match Special::classify(key) {
			Special::Host => self.host.clear(),
			Special::UserAgent => self.user_agent.clear(),
			Special::ContentType => self.content_type.clear(),
			Special::ContentLength | Special::TransferEncoding => self.length = Length::Unset,
			Special::Connection => {
				self.connection_close = false;
				self.keep_alive = false;
				let _ = self.fields.remove(key);
			}
			Special::Cookie => self.cookies.reset(),
			Special::Trailer => self.trailer_keys.clear(),
			_ => {
				let _ = self.fields.remove(key);
			}
		}
	}

	/// Stores a special header set through the API, returning `false` for ordinary keys.
	fn apply_special(&mut self, key: &[u8], value: &[u8]) -> bool {
		match Special::classify(key) {
			Special::Host => self.set_host(value),
			Special::UserAgent => self.set_user_agent(value),
			Special::ContentType => self.set_content_type(value),
			Special::ContentLength => {
				if let Ok(n) = crate::util::parse_uint(trim(value)) {
					self.length = Length::Fixed(n);
				}
			}
			Special::TransferEncoding => self.length.apply_transfer_encoding(value),
			Special::Connection if has_token(value, b"close") => self.connection_close = true,
			Special::Cookie => cookie::parse_cookies(value, &mut self.cookies),
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
	///
	/// # Errors
	/// This function returns [`ParseError::ForbiddenTrailer`] for the last forbidden key after
	/// storing every allowed field.
	pub(crate) fn parse_trailer(&mut self, block: &[u8]) -> Result<(), ParseError> {
		let normalize = self.normalize();
		trailer::parse(block, &mut self.trailers, normalize)
	}

	/// Checks whether the client asked for `100 Continue` before sending the body.
	pub fn expects_continue(&self) -> bool {
		self.fields
			.get(b"Expect")
			.map_or(false, |v| has_token(v, b"100-continue"))
	}

	/// Returns the framing of the body that follows this header.
	///
	/// A request without `Content-Length` or `Transfer-Encoding` has no body.
	pub fn framing(&self) -> Framing {
		match self.length {
			Length::Chunked => Framing::Chunked,
			Length::Fixed(n) => Framing::Fixed(n),
			Length::Unset => Framing::Fixed(0),
		}
	}

	/// Parses a complete header block.
	///
	/// Previous contents are discarded first. Returns the length of the block.
	///
	/// # Errors
	/// This function returns a [`ParseError`] for a malformed request line or field, and a
	/// [`FramingError`](crate::error::FramingError) for an invalid `Content-Length`.
	pub fn parse(&mut self, block: &[u8]) -> Result<usize, Error> {
		self.reset();
		let start = super::fields_start(block)?;
		{
			let mut headers: [httparse::Header<'_>; 0] = [];
			let mut request = httparse::Request::new(&mut headers);
			super::check_start_line(request.parse(block))?;
			if let Some(method) = request.method {
				self.set_method(method.as_bytes());
			}
			if let Some(path) = request.path {
				self.set_request_uri(path.as_bytes());
			}
			self.minor_version = request.version.unwrap_or(1);
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
				Special::Host => self.set_host(value),
				Special::UserAgent => self.set_user_agent(value),
				Special::ContentType => self.set_content_type(value),
				Special::ContentLength => self.length.apply_content_length(value)?,
				Special::TransferEncoding => self.length.apply_transfer_encoding(value),
				Special::Connection if has_token(value, b"close") => self.connection_close = true,
				Special::Connection => {
					self.keep_alive |= has_token(value, b"keep-alive");
					self.fields.add_raw(&field, normalize);
				}
				Special::Cookie => cookie::parse_cookies(value, &mut self.cookies),
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

	/// Serializes the request line and header block into `dst`.
	///
	/// The length headers written follow `framing`; `Content-Length: 0` is omitted for `GET`
	/// and `HEAD`.
	pub fn append_head(&self, dst: &mut Vec<u8>, framing: Framing) {
		dst.extend_from_slice(&self.method);
		dst.push(b' ');
		dst.extend_from_slice(&self.request_uri);
		dst.extend_from_slice(if self.minor_version == 0 {
			b" HTTP/1.0\r\n"
		} else {
			b" HTTP/1.1\r\n"
		});
		if !self.host.is_empty() {
			append_line(dst, b"Host", &self.host);
		}
		if !self.user_agent.is_empty() {
			append_line(dst, b"User-Agent", &self.user_agent);
		}
		if !self.content_type.is_empty() {
			append_line(dst, b"Content-Type", &self.content_type);
		}
		match framing {
			Framing::Fixed(0) if self.is_get() || self.is_head() => (),
			Framing::Fixed(n) => {
				dst.extend_from_slice(b"Content-Length: ");
				append_uint(dst, n);
				dst.extend_from_slice(b"\r\n");
			}
			Framing::Chunked => append_line(dst, b"Transfer-Encoding", b"chunked"),
			Framing::Identity | Framing::Upgrade => (),
		}
		if framing == Framing::Chunked {
			trailer::append_declaration(dst, &self.trailer_keys);
		}
		cookie::append_cookie_header(dst, &self.cookies);
		self.fields.append_lines(dst);
		if self.connection_close {
			append_line(dst, b"Connection", b"close");
		}
		dst.extend_from_slice(b"\r\n");
	}
}

impl crate::pool::Reset for RequestHeader {
	fn reset(&mut self) {
		RequestHeader::reset(self);
	}
}
