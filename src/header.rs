//! The header object model.
//!
//! A header block is scanned by [`scanner::Scanner`] into raw fields. The fields that determine
//! framing or are looked up on every message (see [`Special`]) are lifted into dedicated
//! members of [`RequestHeader`](request::RequestHeader) and
//! [`ResponseHeader`](response::ResponseHeader) during the same pass; everything else lands in a
//! [`HeaderSet`] in arrival order.

pub mod cookie;
pub mod request;
pub mod response;
pub mod scanner;
pub mod trailer;

use crate::error::{BufferTooSmall, Error, ParseError};
use crate::util::io::AsyncBufReadExt as _;
use futures_io::AsyncBufRead;
use std::pin::Pin;

/// One header field.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Field {
	/// The key, normalized unless normalization was disabled.
	key: Vec<u8>,

	/// The value, with folding already undone.
	value: Vec<u8>,
}

impl Field {
	/// Returns the key.
	pub fn key(&self) -> &[u8] {
		&self.key
	}

	/// Returns the value.
	pub fn value(&self) -> &[u8] {
		&self.value
	}
}

/// An ordered multimap of header fields.
///
/// Lookups compare keys case-insensitively. Storage for removed or reset fields is kept and
/// reused by later insertions.
#[derive(Clone, Debug, Default)]
pub struct HeaderSet {
	/// Field slots; only the first `len` are live.
	fields: Vec<Field>,

	/// The number of live fields.
	len: usize,
}

impl HeaderSet {
	/// Creates an empty set.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the number of fields.
	pub fn len(&self) -> usize {
		self.len
	}

	/// Returns `true` if there are no fields.
	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Iterates over the fields in order.
	pub fn iter(&self) -> std::slice::Iter<'_, Field> {
		self.fields[..self.len].iter()
	}

	/// Returns the value of the first field with the given key.
	pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
		self.iter()
			.find(|f| f.key.eq_ignore_ascii_case(key))
			.map(Field::value)
	}

	/// Iterates over the values of every field with the given key.
	pub fn get_all<'a>(&'a self, key: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
		self.iter()
			.filter(move |f| f.key.eq_ignore_ascii_case(key))
			.map(Field::value)
	}

	/// Returns `true` if a field with the given key is present.
	pub fn contains(&self, key: &[u8]) -> bool {
		self.get(key).is_some()
	}

	/// Appends a field without touching existing fields of the same key.
	pub fn add(&mut self, key: &[u8], value: &[u8]) {
		self.add_with(key, value, false);
	}

	/// Replaces the value of the first field with the given key and removes the others, or
	/// appends a new field if there is none.
	pub fn set(&mut self, key: &[u8], value: &[u8]) {
		self.set_with(key, value, false);
	}

	/// Appends a field, normalizing the stored key if `normalize` is set.
	pub(crate) fn add_with(&mut self, key: &[u8], value: &[u8], normalize: bool) {
		let slot = self.push_slot();
		slot.key.extend_from_slice(key);
		if normalize {
			normalize_key(&mut slot.key);
		}
		slot.value.extend_from_slice(value);
	}

	/// Like [`set`](Self::set), normalizing the key of a newly appended field if `normalize` is
	/// set.
	pub(crate) fn set_with(&mut self, key: &[u8], value: &[u8], normalize: bool) {
		match self.fields[..self.len]
			.iter()
			.position(|f| f.key.eq_ignore_ascii_case(key))
		{
			Some(i) => {
				let slot = &mut self.fields[i];
				slot.value.clear();
				slot.value.extend_from_slice(value);
				self.remove_from(key, i + 1);
			}
			None => self.add_with(key, value, normalize),
		}
	}

	/// Removes every field with the given key.
	///
	/// Returns `true` if a field was removed.
	pub fn remove(&mut self, key: &[u8]) -> bool {
		let before = self.len;
		self.remove_from(key, 0);
		before != self.len
	}

	/// Removes all fields.
	pub fn reset(&mut self) {
		self.len = 0;
	}

	/// Appends a field scanned from the wire.
	///
	/// The key is normalized if `normalize` is set, and a folded value has its line breaks
	/// replaced by single spaces.
	pub(crate) fn add_raw(&mut self, field: &scanner::RawField<'_>, normalize: bool) {
		let slot = self.push_slot();
		slot.key.extend_from_slice(field.key);
		if normalize {
			normalize_key(&mut slot.key);
		}
		scanner::append_value(&mut slot.value, field.value, field.folded);
	}

	/// Claims the next slot, clearing its previous contents.
	fn push_slot(&mut self) -> &mut Field {
		if self.len == self.fields.len() {
			self.fields.push(Field::default());
		}
		let slot = &mut self.fields[self.len];
		slot.key.clear();
		slot.value.clear();
		self.len += 1;
		slot
	}

	/// Removes every field with the given key at or after index `start`, preserving the order of
	/// the remaining fields.
	fn remove_from(&mut self, key: &[u8], start: usize) {
		let mut write = start;
		for read in start..self.len {
			if !self.fields[read].key.eq_ignore_ascii_case(key) {
				self.fields.swap(write, read);
				write += 1;
			}
		}
		self.len = write;
	}

	/// Appends every field as a `Key: Value` line.
	pub(crate) fn append_lines(&self, dst: &mut Vec<u8>) {
		for field in self.iter() {
			append_line(dst, &field.key, &field.value);
		}
	}
}

impl<'a> IntoIterator for &'a HeaderSet {
	type Item = &'a Field;
	type IntoIter = std::slice::Iter<'a, Field>;

	fn into_iter(self) -> Self::IntoIter {
		self.iter()
	}
}

/// Appends one `Key: Value` line.
pub(crate) fn append_line(dst: &mut Vec<u8>, key: &[u8], value: &[u8]) {
	dst.extend_from_slice(key);
	dst.extend_from_slice(b": ");
	dst.extend_from_slice(value);
	dst.extend_from_slice(b"\r\n");
}

/// Normalizes a header key in place.
///
/// The first letter and every letter following a `-` are uppercased and all other letters are
/// lowercased, so `content-TYPE` becomes `Content-Type`.
pub fn normalize_key(key: &mut [u8]) {
	let mut upper = true;
	for b in key.iter_mut() {
		if upper {
			b.make_ascii_uppercase();
		} else {
			b.make_ascii_lowercase();
		}
		upper = *b == b'-';
	}
}

/// Header keys with dedicated storage.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Special {
	ContentLength,
	ContentType,
	ContentEncoding,
	Connection,
	Cookie,
	Host,
	UserAgent,
	SetCookie,
	Server,
	TransferEncoding,
	Trailer,
	Other,
}

/// Special keys starting with `c`.
const KEYS_C: &[(&[u8], Special)] = &[
	(b"content-length", Special::ContentLength),
	(b"content-type", Special::ContentType),
	(b"content-encoding", Special::ContentEncoding),
	(b"connection", Special::Connection),
	(b"cookie", Special::Cookie),
];

/// Special keys starting with `h`.
const KEYS_H: &[(&[u8], Special)] = &[(b"host", Special::Host)];

/// Special keys starting with `s`.
const KEYS_S: &[(&[u8], Special)] = &[
	(b"set-cookie", Special::SetCookie),
	(b"server", Special::Server),
];

/// Special keys starting with `t`.
const KEYS_T: &[(&[u8], Special)] = &[
	(b"transfer-encoding", Special::TransferEncoding),
	(b"trailer", Special::Trailer),
];

/// Special keys starting with `u`.
const KEYS_U: &[(&[u8], Special)] = &[(b"user-agent", Special::UserAgent)];

impl Special {
	/// Classifies a key, ignoring case.
	pub(crate) fn classify(key: &[u8]) -> Self {
		let candidates = match key.first().map(u8::to_ascii_lowercase) {
			Some(b'c') => KEYS_C,
			Some(b'h') => KEYS_H,
			Some(b's') => KEYS_S,
			Some(b't') => KEYS_T,
			Some(b'u') => KEYS_U,
			_ => return Self::Other,
		};
		candidates
			.iter()
			.find(|(name, _)| name.eq_ignore_ascii_case(key))
			.map_or(Self::Other, |(_, special)| *special)
	}
}

/// The length framing declared by `Content-Length` and `Transfer-Encoding`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Length {
	/// Neither header is present.
	Unset,

	/// `Transfer-Encoding` names a coding other than `identity`.
	Chunked,

	/// `Content-Length` gives the body size.
	Fixed(u64),
}

impl Default for Length {
	fn default() -> Self {
		Self::Unset
	}
}

impl Length {
	/// Applies a received `Content-Length` value.
	///
	/// A chunked marker takes precedence and the value is ignored.
	///
	/// # Errors
	/// This function returns an error if the value is not a decimal integer or disagrees with an
	/// earlier `Content-Length`.
	pub(crate) fn apply_content_length(&mut self, value: &[u8]) -> Result<(), Error> {
		if *self == Self::Chunked {
			return Ok(());
		}
		let n = crate::util::parse_uint(value)?;
		match *self {
			Self::Fixed(m) if m != n => Err(crate::error::BadContentLength::Conflicting.into()),
			_ => {
				*self = Self::Fixed(n);
				Ok(())
			}
		}
	}

	/// Applies a received `Transfer-Encoding` value.
	///
	/// Any coding other than `identity` switches to chunked framing, overriding a
	/// `Content-Length`.
	pub(crate) fn apply_transfer_encoding(&mut self, value: &[u8]) {
		if !crate::util::trim(value).eq_ignore_ascii_case(b"identity") {
			*self = Self::Chunked;
		}
	}
}

/// Determines the length of a header block.
///
/// If the buffer holds an empty line, returns `Some(n)` where `n` is the length of the block in
/// bytes, including the final [CR]LF[CR]LF. Otherwise returns `None`.
pub(crate) fn headers_length(buffer: &[u8]) -> Option<usize> {
	let mut start = 0;
	while let Some(dist) = memchr::memchr(b'\n', &buffer[start..]) {
		let lf = start + dist;
		match buffer.get(lf + 1) {
			Some(b'\n') => return Some(lf + 2),
			Some(b'\r') if buffer.get(lf + 2) == Some(&b'\n') => return Some(lf + 3),
			_ => start = lf + 1,
		}
	}
	None
}

/// Returns the offset of the first header field in a block, just past the start line.
///
/// Empty lines preceding the start line are skipped.
///
/// # Errors
/// This function returns [`ParseError::Truncated`] if the start line is incomplete.
fn fields_start(block: &[u8]) -> Result<usize, ParseError> {
	let skipped = block
		.iter()
		.take_while(|b| **b == b'\r' || **b == b'\n')
		.count();
	memchr::memchr(b'\n', &block[skipped..])
		.map(|i| skipped + i + 1)
		.ok_or(ParseError::Truncated)
}

/// Interprets the result of parsing a start line with an empty header array.
///
/// A complete parse or a parse that stopped at the first header field both mean the start line
/// was well formed.
fn check_start_line(status: httparse::Result<usize>) -> Result<(), ParseError> {
	match status {
		Ok(httparse::Status::Complete(_)) | Err(httparse::Error::TooManyHeaders) => Ok(()),
		Ok(httparse::Status::Partial) => Err(ParseError::Truncated),
		Err(e) => Err(e.into()),
	}
}

/// What happened to one chunk of input while reading a header block.
enum Progress {
	/// The block is complete and has the given length.
	Done(usize),

	/// More input is needed.
	More,

	/// The source reached end of file.
	Eof,
}

/// Reads one complete header block from `socket` into `buffer`.
///
/// Bytes are copied into `buffer` until it contains an empty line; only the bytes belonging to
/// the block are consumed from `socket`, so a body or a pipelined message following it stays
/// unread. Leading empty lines are skipped if `skip_leading_newlines` is set.
///
/// Returns the length of the block, which is also the length of `buffer` afterwards.
///
/// # Errors
/// This function returns [`Error::ConnectionClosedEarly`] at end of file before any byte of the
/// block, [`ParseError::Truncated`] at end of file within the block, and
/// [`Error::BufferTooSmall`] if no complete block fits into `max` bytes. In the last case the
/// error message includes an excerpt of the buffer unless `secure` is set.
pub(crate) async fn read_block<Socket: AsyncBufRead + ?Sized>(
	mut socket: Pin<&mut Socket>,
	buffer: &mut Vec<u8>,
	max: usize,
	message: &'static str,
	secure: bool,
	skip_leading_newlines: bool,
) -> Result<usize, Error> {
	buffer.clear();
	loop {
		let progress = socket
			.as_mut()
			.read_buf(|bytes: &[u8]| -> (usize, Progress) {
				if bytes.is_empty() {
					return (0, Progress::Eof);
				}
				let skipped = if skip_leading_newlines && buffer.is_empty() {
					bytes
						.iter()
						.take_while(|b| **b == b'\r' || **b == b'\n')
						.count()
				} else {
					0
				};
				let bytes = &bytes[skipped..];
				let before = buffer.len();
				let take = std::cmp::min(max.saturating_sub(before), bytes.len());
				buffer.extend_from_slice(&bytes[..take]);
				// Only the block is consumed; anything after it belongs to the body.
				match headers_length(buffer) {
					Some(n) => {
						buffer.truncate(n);
						(skipped + n - before, Progress::Done(n))
					}
					None => (skipped + take, Progress::More),
				}
			})
			.await?;
		match progress {
			Progress::Done(n) => return Ok(n),
			Progress::Eof if buffer.is_empty() => return Err(Error::ConnectionClosedEarly),
			Progress::Eof => return Err(ParseError::Truncated.into()),
			Progress::More if buffer.len() >= max => {
				return Err(BufferTooSmall::new(message, buffer, secure).into());
			}
			Progress::More => (),
		}
	}
}
