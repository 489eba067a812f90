//! Trailer fields sent after a chunked body.

use super::scanner::{Scan, Scanner};
use super::HeaderSet;
use crate::error::ParseError;

/// Keys that must not appear in a trailer, since they affect framing, routing or authentication
/// and the message has already been acted upon by the time trailers arrive.
const FORBIDDEN: &[&[u8]] = &[
	b"authorization",
	b"content-encoding",
	b"content-length",
	b"content-range",
	b"content-type",
	b"connection",
	b"expect",
	b"host",
	b"keep-alive",
	b"max-forwards",
	b"proxy-authenticate",
	b"proxy-authorization",
	b"proxy-connection",
	b"range",
	b"te",
	b"trailer",
	b"transfer-encoding",
	b"www-authenticate",
];

/// Checks whether a key is forbidden in trailers, ignoring case.
pub fn is_forbidden(key: &[u8]) -> bool {
	FORBIDDEN.iter().any(|k| k.eq_ignore_ascii_case(key))
}

/// Parses a trailer block into `dst`.
///
/// `block` holds the trailer lines together with the terminating empty line. Every allowed field
/// is added to `dst` even if some other field is forbidden.
///
/// # Errors
/// This function returns [`ParseError::ForbiddenTrailer`] naming the last forbidden key in the
/// block, after all allowed fields have been stored. Malformed lines abort parsing immediately.
pub(crate) fn parse(block: &[u8], dst: &mut HeaderSet, normalize: bool) -> Result<(), ParseError> {
	let mut scanner = Scanner::new(block);
	let mut forbidden = None;
	loop {
		match scanner.next()? {
			Scan::Field(field) if is_forbidden(field.key) => {
				forbidden = Some(String::from_utf8_lossy(field.key).into_owned());
			}
			Scan::Field(field) => dst.add_raw(&field, normalize),
			Scan::End => break,
			Scan::NeedMore => return Err(ParseError::Truncated),
		}
	}
	forbidden.map_or(Ok(()), |key| Err(ParseError::ForbiddenTrailer(key)))
}

/// Records the keys announced by a `Trailer` header.
///
/// Forbidden keys are dropped.
pub(crate) fn parse_declaration(value: &[u8], keys: &mut Vec<Vec<u8>>, normalize: bool) {
	for name in value.split(|b| *b == b',').map(crate::util::trim) {
		if name.is_empty() {
			continue;
		}
		if is_forbidden(name) {
			tracing::debug!(key = %String::from_utf8_lossy(name), "dropping forbidden key from Trailer declaration");
			continue;
		}
		let mut name = name.to_vec();
		if normalize {
			super::normalize_key(&mut name);
		}
		if !keys.iter().any(|k| k.eq_ignore_ascii_case(&name)) {
			keys.push(name);
		}
	}
}

/// Appends a `Trailer` header announcing `keys`, if there are any.
pub(crate) fn append_declaration(dst: &mut Vec<u8>, keys: &[Vec<u8>]) {
	if keys.is_empty() {
		return;
	}
	dst.extend_from_slice(b"Trailer: ");
	for (i, key) in keys.iter().enumerate() {
		if i != 0 {
			dst.extend_from_slice(b", ");
		}
		dst.extend_from_slice(key);
	}
	dst.extend_from_slice(b"\r\n");
}
