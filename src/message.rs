//! Complete HTTP messages: a header plus a fully buffered body.

pub mod request;
pub mod response;

pub use request::Request;
pub use response::Response;

use crate::body::receive::Receive;
use crate::body::{Framing, Limit};
use crate::error::Error;
use futures_io::AsyncBufRead;
use std::pin::Pin;

/// The largest amount of memory reserved up front for a body of known length.
const MAX_PREALLOCATION: u64 = 64 * 1024;

/// Limits applied while reading a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReadOptions {
	/// The largest header block, and the largest trailer block, in bytes.
	pub max_header_size: usize,

	/// The largest body in bytes, or 0 for no limit.
	pub max_body_size: usize,

	/// Whether error messages must not quote received bytes.
	pub secure: bool,
}

impl Default for ReadOptions {
	fn default() -> Self {
		Self {
			max_header_size: 4096,
			max_body_size: 0,
			secure: false,
		}
	}
}

/// Reads a body with the given framing into `dst`, returning its raw trailer block.
///
/// # Errors
/// This function returns [`Error::BodyTooLarge`] if the body exceeds `options.max_body_size`,
/// which for a fixed-length body is detected before any byte is read, and any framing or I/O
/// error of the socket.
pub(crate) async fn read_body<Socket: AsyncBufRead + ?Sized>(
	socket: Pin<&mut Socket>,
	framing: Framing,
	options: &ReadOptions,
	dst: &mut Vec<u8>,
) -> Result<Vec<u8>, Error> {
	dst.clear();
	let limit = match options.max_body_size {
		0 => u64::MAX,
		n => n as u64,
	};
	let size_hint = match framing {
		Framing::Fixed(n) if n > limit => return Err(Error::BodyTooLarge),
		Framing::Fixed(0) | Framing::Upgrade => return Ok(Vec::new()),
		Framing::Fixed(n) => std::cmp::min(n, MAX_PREALLOCATION) as usize,
		Framing::Chunked | Framing::Identity => 0,
	};
	let mut body = Limit::new(
		Receive::new(socket, framing, options.max_header_size),
		limit,
	);
	let _ = crate::util::io::read_to_end(Pin::new(&mut body), dst, size_hint).await?;
	Ok(body.into_inner().into_trailer())
}
