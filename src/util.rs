//! Byte-string helpers and deadline plumbing shared across the crate.

pub mod io;

use crate::error::{BadContentLength, Error, Phase};
use std::future::Future;
use tokio::time::Instant;

/// Checks whether a byte is a `tchar` (token character).
pub fn is_tchar(b: u8) -> bool {
	b.is_ascii_alphanumeric()
		|| matches!(
			b,
			b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~'
		)
}

/// Checks whether a byte string is a token.
pub fn is_token(name: &[u8]) -> bool {
	!name.is_empty() && name.iter().copied().all(is_tchar)
}

/// Removes leading and trailing spaces and tabs.
pub fn trim(mut value: &[u8]) -> &[u8] {
	while let [b' ' | b'\t', rest @ ..] = value {
		value = rest;
	}
	while let [rest @ .., b' ' | b'\t'] = value {
		value = rest;
	}
	value
}

/// Checks whether a comma-separated header value such as `Connection: keep-alive, Upgrade`
/// contains `token`, ignoring case and surrounding whitespace.
pub fn has_token(value: &[u8], token: &[u8]) -> bool {
	value
		.split(|b| *b == b',')
		.any(|option| trim(option).eq_ignore_ascii_case(token))
}

/// Parses a nonnegative decimal integer consisting only of ASCII digits.
///
/// # Errors
/// This function returns an error if `value` is empty, contains anything other than digits, or
/// does not fit into a `u64`.
pub fn parse_uint(value: &[u8]) -> Result<u64, BadContentLength> {
	if value.is_empty() {
		return Err(BadContentLength::NotDecimal);
	}
	value.iter().try_fold(0_u64, |acc, &b| {
		if !b.is_ascii_digit() {
			return Err(BadContentLength::NotDecimal);
		}
		acc.checked_mul(10)
			.and_then(|acc| acc.checked_add(u64::from(b - b'0')))
			.ok_or(BadContentLength::NotU64)
	})
}

/// Appends the decimal form of `n` to `dst`.
pub fn append_uint(dst: &mut Vec<u8>, n: u64) {
	dst.extend_from_slice(itoa::Buffer::new().format(n).as_bytes());
}

/// Runs `fut` to completion or until `deadline`, whichever comes first.
///
/// Without a deadline the future runs unbounded. Expiry is reported as a timeout of `phase`.
pub(crate) async fn deadline<T, F: Future<Output = Result<T, Error>>>(
	deadline: Option<Instant>,
	phase: Phase,
	fut: F,
) -> Result<T, Error> {
	match deadline {
		None => fut.await,
		Some(at) => tokio::time::timeout_at(at, fut)
			.await
			.map_err(|_| Error::Timeout(phase))?,
	}
}

/// Returns the deadline `timeout` from now, if there is a timeout.
pub(crate) fn deadline_after(timeout: Option<std::time::Duration>) -> Option<Instant> {
	timeout.map(|t| Instant::now() + t)
}
