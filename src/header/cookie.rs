//! Cookie key/value handling.
//!
//! Only the name and value of a cookie are interpreted. Attributes of `Set-Cookie` values are
//! carried along verbatim.

use super::HeaderSet;
use crate::util::trim;

/// Splits a `Cookie` header value into pairs and appends them to `dst`.
///
/// A part without `=` is stored with an empty key.
pub fn parse_cookies(value: &[u8], dst: &mut HeaderSet) {
	for part in value.split(|b| *b == b';').map(trim) {
		if part.is_empty() {
			continue;
		}
		match memchr::memchr(b'=', part) {
			Some(eq) => dst.add(trim(&part[..eq]), trim(&part[eq + 1..])),
			None => dst.add(b"", part),
		}
	}
}

/// Appends a `Cookie` header carrying every pair in `cookies`, if there are any.
pub(crate) fn append_cookie_header(dst: &mut Vec<u8>, cookies: &HeaderSet) {
	if cookies.is_empty() {
		return;
	}
	dst.extend_from_slice(b"Cookie: ");
	for (i, cookie) in cookies.iter().enumerate() {
		if i != 0 {
			dst.extend_from_slice(b"; ");
		}
		if !cookie.key().is_empty() {
			dst.extend_from_slice(cookie.key());
			dst.push(b'=');
		}
		dst.extend_from_slice(cookie.value());
	}
	dst.extend_from_slice(b"\r\n");
}

/// Returns the cookie name of a `Set-Cookie` value.
pub fn set_cookie_key(value: &[u8]) -> &[u8] {
	let end = memchr::memchr2(b'=', b';', value).unwrap_or(value.len());
	trim(&value[..end])
}
