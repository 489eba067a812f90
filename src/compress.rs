//! Body compression.
//!
//! Codecs are only ever applied to complete bodies at the message boundary; the body codecs in
//! [`body`](crate::body) never see compressed data as anything but opaque bytes.

#[cfg(feature = "flate")]
mod flate;

#[cfg(feature = "flate")]
pub use flate::{Deflate, Gzip};

use crate::header::request::RequestHeader;
use crate::message::Response;

/// Bodies shorter than this are not worth compressing.
pub const MIN_COMPRESS_LEN: usize = 200;

/// The default compression level.
pub const DEFAULT_LEVEL: u32 = 6;

/// A content coding such as `gzip`.
///
/// Implementations keep whatever state they pool internally, so a single instance is shared by
/// all connections.
pub trait Codec: Send + Sync {
	/// Returns the token naming the coding in `Content-Encoding` and `Accept-Encoding`.
	fn name(&self) -> &'static str;

	/// Compresses `src` at `level` and appends the result to `dst`.
	///
	/// # Errors
	/// This function returns an error if the codec fails.
	fn compress(&self, src: &[u8], level: u32, dst: &mut Vec<u8>) -> std::io::Result<()>;

	/// Decompresses `src` and appends the result to `dst`.
	///
	/// # Errors
	/// This function returns an error if `src` is not valid compressed data.
	fn decompress(&self, src: &[u8], dst: &mut Vec<u8>) -> std::io::Result<()>;
}

/// Checks whether an `Accept-Encoding` value accepts the coding `name`.
///
/// Parameters other than `q=0` are ignored.
pub fn accepts(accept_encoding: &[u8], name: &str) -> bool {
	accept_encoding.split(|b| *b == b',').any(|item| {
		let mut parts = item.split(|b| *b == b';').map(crate::util::trim);
		let coding = parts.next().unwrap_or_default();
		let refused = parts.any(|p| {
			p.strip_prefix(b"q=")
				.map_or(false, |q| q.iter().all(|b| *b == b'0' || *b == b'.'))
		});
		!refused && (coding.eq_ignore_ascii_case(name.as_bytes()) || coding == b"*")
	})
}

/// Compresses a response body if the client accepts one of `codecs`.
///
/// Nothing happens if the body is shorter than [`MIN_COMPRESS_LEN`], if it is already encoded,
/// or if the status forbids a body. Otherwise the body is compressed with the first accepted
/// codec and `Vary: Accept-Encoding` is added.
///
/// Returns `true` if the body was compressed.
///
/// # Errors
/// This function returns an error if the codec fails.
pub fn compress_response(
	request: &RequestHeader,
	response: &mut Response,
	codecs: &[&dyn Codec],
	level: u32,
) -> Result<bool, crate::Error> {
	if response.body().len() < MIN_COMPRESS_LEN
		|| !response.header().content_encoding().is_empty()
		|| response.header().is_bodyless()
	{
		return Ok(false);
	}
	let accept = match request.headers().get(b"Accept-Encoding") {
		Some(accept) => accept,
		None => return Ok(false),
	};
	let codec = match codecs.iter().find(|c| accepts(accept, c.name())) {
		Some(codec) => *codec,
		None => return Ok(false),
	};
	response.compress_body(codec, level)?;
	response.header_mut().add(b"Vary", b"Accept-Encoding");
	Ok(true)
}
