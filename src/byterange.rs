//! Parsing of single `Range: bytes=...` headers.

use crate::util::parse_uint;

/// The ways in which a `Range` header can be unusable.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ByteRangeError {
	/// The value does not start with `bytes=`.
	#[error("unsupported range units")]
	Units,

	/// The range lacks a `-` separator.
	#[error("missing '-' separator")]
	MissingDash,

	/// A bound is not a nonnegative decimal number.
	#[error("range bound is not a decimal number")]
	NotDecimal,

	/// The range does not overlap the content.
	#[error("range does not overlap a body of {0} bytes")]
	Unsatisfiable(u64),
}

/// Parses a `Range` header value against a body of `content_length` bytes.
///
/// Returns the first and last byte positions, both inclusive. A suffix range `bytes=-n` selects
/// the last `n` bytes, and an open range `bytes=a-` everything from `a`. An end beyond the body is
/// clipped to its last byte.
///
/// # Errors
/// This function returns an error if the value has units other than `bytes`, is malformed, or
/// selects no byte of the body.
pub fn parse_byte_range(value: &[u8], content_length: u64) -> Result<(u64, u64), ByteRangeError> {
	let range = value
		.strip_prefix(b"bytes=")
		.ok_or(ByteRangeError::Units)?;
	let dash = memchr::memchr(b'-', range).ok_or(ByteRangeError::MissingDash)?;
	let (first, last) = (&range[..dash], &range[dash + 1..]);
	let number = |b: &[u8]| parse_uint(b).map_err(|_| ByteRangeError::NotDecimal);
	if content_length == 0 {
		return Err(ByteRangeError::Unsatisfiable(0));
	}
	let end_of_body = content_length - 1;

	if first.is_empty() {
		let suffix = number(last)?;
		return Ok((content_length.saturating_sub(suffix), end_of_body));
	}
	let start = number(first)?;
	if start > end_of_body {
		return Err(ByteRangeError::Unsatisfiable(content_length));
	}
	if last.is_empty() {
		return Ok((start, end_of_body));
	}
	let end = std::cmp::min(number(last)?, end_of_body);
	if end < start {
		return Err(ByteRangeError::Unsatisfiable(content_length));
	}
	Ok((start, end))
}
