//! Errors that originate inside `fastwire` or `httparse`.
//!
//! `fastwire` API functions report errors as [`Error`]. The variants separate malformed data
//! ([`Error::Parse`], [`Error::Framing`]) from resource limits ([`Error::BodyTooLarge`],
//! [`Error::BufferTooSmall`]), timeouts ([`Error::Timeout`]), premature closure by the peer
//! ([`Error::ConnectionClosedEarly`]) and pool or redirect failures. Errors passed up from the
//! underlying socket are carried unmodified in [`Error::Io`].
//!
//! The body codecs implement [`AsyncRead`](futures_io::AsyncRead) and
//! [`AsyncWrite`](futures_io::AsyncWrite), so they report through [`std::io::Error`]. An error
//! that originates in `fastwire` is nested inside the [`std::io::Error`] with kind
//! [`InvalidData`](std::io::ErrorKind::InvalidData), and converting such an error back into
//! [`Error`] recovers the original value.

use std::fmt::{Display, Formatter};

/// The ways in which a received `Content-Length` header can be invalid.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum BadContentLength {
	/// The header is not a nonnegative decimal integer.
	#[error("value is not a nonnegative decimal integer")]
	NotDecimal,

	/// The header does not fit into a `u64`.
	#[error("value does not fit in 64 bits")]
	NotU64,

	/// Two `Content-Length` headers disagree.
	#[error("conflicting values received")]
	Conflicting,
}

/// The ways in which a chunk header can be invalid.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum BadChunkHeader {
	/// A byte in the chunk size is not a hex digit.
	#[error("chunk size is not a hex number")]
	SizeNotHex,

	/// The size does not fit in a `u64`.
	#[error("chunk size is too large")]
	SizeNotU64,

	/// A character in the chunk header extensions section was not permitted to appear there.
	#[error("chunk extensions contain an invalid character")]
	ExtChar,

	/// A newline character (CR or LF) was not present where required, either after the chunk
	/// header or after a chunk’s data.
	#[error("chunk framing contains incorrect newlines")]
	Newline,
}

/// Errors in the start line or header block of a message.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseError {
	/// The request line or status line is malformed.
	#[error("cannot parse start line: {0}")]
	StartLine(httparse::Error),

	/// A header line ended before any colon.
	#[error("header line has no colon")]
	MissingColon,

	/// A header key is empty or contains a space or a tab.
	#[error("header key is empty or contains whitespace")]
	InvalidKey,

	/// The header block ended in the middle of a line.
	#[error("header block is truncated")]
	Truncated,

	/// A trailer carried a key that is not allowed to appear in trailers.
	#[error("forbidden trailer key {0:?}")]
	ForbiddenTrailer(String),

	/// A `Content-Encoding` names a coding no available codec handles.
	#[error("unsupported content encoding {0:?}")]
	UnsupportedEncoding(String),

	/// A `Range` header value could not be parsed.
	#[error("cannot parse byte range: {0}")]
	ByteRange(#[from] crate::byterange::ByteRangeError),
}

impl From<httparse::Error> for ParseError {
	fn from(inner: httparse::Error) -> Self {
		Self::StartLine(inner)
	}
}

/// Errors in the framing of a message body.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum FramingError {
	/// The `Content-Length` header is invalid.
	#[error("invalid Content-Length header received: {0}")]
	ContentLength(#[from] BadContentLength),

	/// A chunk header or chunk terminator is invalid.
	#[error("invalid chunk header received: {0}")]
	Chunk(#[from] BadChunkHeader),

	/// The source reached end of file before the declared body length was delivered.
	#[error("body ended before its declared length")]
	UnexpectedEndOfBody,
}

/// The phase of an exchange that ran out of time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
	/// Waiting for bytes from the peer.
	Read,

	/// Sending bytes to the peer.
	Write,

	/// Establishing a new connection.
	Dial,

	/// Waiting for a pooled connection to become free.
	Wait,
}

impl Display for Phase {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			Self::Read => "read",
			Self::Write => "write",
			Self::Dial => "dial",
			Self::Wait => "connection wait",
		})
	}
}

/// The number of bytes shown from each end of a buffer in error messages.
const SNIPPET_LEN: usize = 200;

/// A header block did not fit into the configured read buffer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BufferTooSmall {
	/// Which message was being read, `"request"` or `"response"`.
	pub message: &'static str,

	/// The size of the buffer that overflowed.
	pub size: usize,

	/// A printable excerpt of the buffer, absent in secure logging mode.
	pub snippet: Option<String>,
}

impl BufferTooSmall {
	/// Builds the error for a full buffer.
	///
	/// The `contents` are included as an excerpt of at most 200 bytes from each end unless
	/// `secure` is set.
	pub(crate) fn new(message: &'static str, contents: &[u8], secure: bool) -> Self {
		Self {
			message,
			size: contents.len(),
			snippet: (!secure).then(|| snippet(contents)),
		}
	}
}

impl Display for BufferTooSmall {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"error when reading {} headers: small read buffer. Increase ReadBufferSize. Buffer size={}",
			self.message, self.size
		)?;
		if let Some(snippet) = &self.snippet {
			write!(f, ", contents: {snippet:?}")?;
		}
		Ok(())
	}
}

impl std::error::Error for BufferTooSmall {}

/// Renders the first and last [`SNIPPET_LEN`] bytes of a buffer.
fn snippet(b: &[u8]) -> String {
	if b.len() <= 2 * SNIPPET_LEN {
		String::from_utf8_lossy(b).into_owned()
	} else {
		format!(
			"{}...{}",
			String::from_utf8_lossy(&b[..SNIPPET_LEN]),
			String::from_utf8_lossy(&b[b.len() - SNIPPET_LEN..])
		)
	}
}

/// The error type of every fallible `fastwire` operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// A start line, header block or trailer is malformed.
	#[error(transparent)]
	Parse(#[from] ParseError),

	/// The body framing is malformed.
	#[error(transparent)]
	Framing(#[from] FramingError),

	/// The body is larger than the configured limit.
	#[error("body size exceeds the given limit")]
	BodyTooLarge,

	/// The header block does not fit into the read buffer.
	#[error(transparent)]
	BufferTooSmall(#[from] BufferTooSmall),

	/// An operation did not complete before its deadline.
	#[error("{0} timeout")]
	Timeout(Phase),

	/// The peer closed the connection before the first byte of a message.
	#[error("the peer closed the connection before sending the first byte of a message")]
	ConnectionClosedEarly,

	/// The server refused a connection because every worker is busy.
	#[error("the connection cannot be served because the concurrency limit was exceeded")]
	ConcurrencyLimitExceeded,

	/// All pooled connections to the host are busy.
	#[error("no free connections available to host")]
	NoFreeConnection,

	/// A response chain redirected more often than allowed.
	#[error("too many redirects detected when doing the request")]
	TooManyRedirects,

	/// A redirect status arrived without a `Location` header.
	#[error("missing Location header for http redirect")]
	MissingRedirectLocation,

	/// A request URL or redirect target cannot be parsed.
	#[error("invalid URL: {0}")]
	Url(#[from] url::ParseError),

	/// The request scheme does not match the transport of the host client.
	#[error("host client cannot send a request with a different scheme")]
	SchemeMismatch,

	/// An error passed up from the transport.
	#[error(transparent)]
	Io(std::io::Error),
}

impl Error {
	/// Returns `true` if the error is a timeout of any phase.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout(_))
	}
}

impl From<BadContentLength> for Error {
	fn from(inner: BadContentLength) -> Self {
		FramingError::from(inner).into()
	}
}

impl From<BadChunkHeader> for Error {
	fn from(inner: BadChunkHeader) -> Self {
		FramingError::from(inner).into()
	}
}

impl From<std::io::Error> for Error {
	fn from(inner: std::io::Error) -> Self {
		if !inner.get_ref().map_or(false, |e| e.is::<Self>()) {
			return match inner.kind() {
				std::io::ErrorKind::TimedOut => Self::Timeout(Phase::Read),
				_ => Self::Io(inner),
			};
		}
		let kind = inner.kind();
		match inner.into_inner().map(|e| e.downcast::<Self>()) {
			Some(Ok(e)) => *e,
			Some(Err(e)) => Self::Io(std::io::Error::new(kind, e)),
			None => Self::Io(kind.into()),
		}
	}
}

impl From<Error> for std::io::Error {
	fn from(inner: Error) -> Self {
		match inner {
			Error::Io(e) => e,
			Error::Timeout(_) => Self::new(std::io::ErrorKind::TimedOut, inner),
			Error::ConnectionClosedEarly => Self::new(std::io::ErrorKind::UnexpectedEof, inner),
			_ => Self::new(std::io::ErrorKind::InvalidData, inner),
		}
	}
}

impl From<FramingError> for std::io::Error {
	fn from(inner: FramingError) -> Self {
		Error::from(inner).into()
	}
}

impl From<BadChunkHeader> for std::io::Error {
	fn from(inner: BadChunkHeader) -> Self {
		Error::from(inner).into()
	}
}
