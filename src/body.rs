//! Message body framing and the body codecs.
//!
//! A body is read through [`receive::Receive`] and written through [`send::Send`], both of which
//! are chosen from the [`Framing`] of the message header. The codecs borrow the connection for as
//! long as the body is being transferred.

pub mod receive;
pub mod send;

use crate::error::Error;
use futures_core::ready;
use futures_io::AsyncRead;
use std::io::Result;
use std::pin::Pin;
use std::task::{Context, Poll};

/// How the end of a message body is determined.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Framing {
	/// Exactly this many bytes follow the header.
	Fixed(u64),

	/// The body uses chunked transfer coding.
	Chunked,

	/// The body extends until the connection is closed.
	Identity,

	/// The connection switches protocols after the header; there is no HTTP body.
	Upgrade,
}

impl Framing {
	/// Returns `true` if the framing says nothing follows the header.
	pub fn is_empty(self) -> bool {
		matches!(self, Self::Fixed(0) | Self::Upgrade)
	}
}

/// A reader that fails once more than a fixed number of bytes has been delivered.
#[derive(Debug)]
pub struct Limit<R> {
	/// The wrapped reader.
	inner: R,

	/// How many more bytes may be delivered.
	remaining: u64,
}

impl<R> Limit<R> {
	/// Wraps `inner`, allowing at most `limit` bytes.
	pub fn new(inner: R, limit: u64) -> Self {
		Self {
			inner,
			remaining: limit,
		}
	}

	/// Unwraps the reader.
	pub fn into_inner(self) -> R {
		self.inner
	}

	/// Returns a reference to the wrapped reader.
	pub fn get_ref(&self) -> &R {
		&self.inner
	}
}

impl<R: AsyncRead + Unpin> AsyncRead for Limit<R> {
	fn poll_read(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<Result<usize>> {
		if buf.is_empty() {
			return Ok(0).into();
		}
		// One byte more than allowed is requested so that an oversized body is noticed.
		let window = self.remaining.saturating_add(1);
		let to_read = std::cmp::min(buf.len() as u64, window) as usize;
		let bytes_read = ready!(Pin::new(&mut self.inner).poll_read(cx, &mut buf[..to_read]))?;
		if bytes_read as u64 > self.remaining {
			return Err(Error::BodyTooLarge.into()).into();
		}
		self.remaining -= bytes_read as u64;
		Ok(bytes_read).into()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::util::io::AsyncReadExt as _;
	use futures_executor::block_on;

	/// Tests that reads up to the limit pass and the first byte beyond it fails.
	#[test]
	fn test_limit() {
		block_on(async {
			let mut limited = Limit::new(&b"abcdef"[..], 4);
			let mut buffer = [0_u8; 2];
			assert_eq!(Pin::new(&mut limited).read(&mut buffer).await.unwrap(), 2);
			assert_eq!(Pin::new(&mut limited).read(&mut buffer[..1]).await.unwrap(), 1);
			assert_eq!(Pin::new(&mut limited).read(&mut buffer[..1]).await.unwrap(), 1);
			let e = Pin::new(&mut limited).read(&mut buffer).await.unwrap_err();
			assert!(matches!(Error::from(e), Error::BodyTooLarge));
		});
	}

	/// Tests that a body of exactly the limit is accepted.
	#[test]
	fn test_limit_exact() {
		block_on(async {
			let mut limited = Limit::new(&b"abcd"[..], 4);
			let mut out = Vec::new();
			let n = crate::util::io::read_to_end(Pin::new(&mut limited), &mut out, 0)
				.await
				.unwrap();
			assert_eq!(n, 4);
		});
	}
}
