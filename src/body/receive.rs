mod chunked;
mod eof;
mod fixed;

use super::Framing;
use futures_io::{AsyncBufRead, AsyncRead};
use std::io::Result;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The framing-specific decoder behind a [`Receive`].
#[derive(Debug)]
enum Mode<'socket, Socket: AsyncBufRead + ?Sized> {
	/// The body has a length known from the header.
	Fixed(fixed::Receive<'socket, Socket>),

	/// The body uses chunked transfer coding.
	Chunked(chunked::Receive<'socket, Socket>),

	/// The body extends until end of file.
	Eof(eof::Receive<'socket, Socket>),
}

/// A message body being received.
///
/// This type implements [`AsyncRead`]; a read returning zero bytes marks the end of the body.
/// Errors in the body framing are reported as [`std::io::Error`]s of kind
/// [`InvalidData`](std::io::ErrorKind::InvalidData) that convert back into
/// [`Error`](crate::Error).
#[derive(Debug)]
pub struct Receive<'socket, Socket: AsyncBufRead + ?Sized> {
	/// The decoder.
	inner: Mode<'socket, Socket>,
}

impl<'socket, Socket: AsyncBufRead + ?Sized> Receive<'socket, Socket> {
	/// Constructs a decoder for a body with the given framing.
	///
	/// `max_trailer` bounds the size of the trailer block of a chunked body. A body framed as
	/// [`Framing::Upgrade`] is empty.
	pub fn new(socket: Pin<&'socket mut Socket>, framing: Framing, max_trailer: usize) -> Self {
		let inner = match framing {
			Framing::Fixed(n) => Mode::Fixed(fixed::Receive::new(socket, n)),
			Framing::Upgrade => Mode::Fixed(fixed::Receive::new(socket, 0)),
			Framing::Chunked => Mode::Chunked(chunked::Receive::new(socket, max_trailer)),
			Framing::Identity => Mode::Eof(eof::Receive::new(socket)),
		};
		Self { inner }
	}

	/// Returns `true` if the entire body has been received.
	pub fn is_finished(&self) -> bool {
		match &self.inner {
			Mode::Fixed(r) => r.is_finished(),
			Mode::Chunked(r) => r.is_finished(),
			Mode::Eof(r) => r.is_finished(),
		}
	}

	/// Destroys a `Receive`, returning the raw trailer block of a chunked body.
	///
	/// The block includes its terminating empty line. It is empty for other framings and for a
	/// body that has not been read to the end.
	pub fn into_trailer(self) -> Vec<u8> {
		match self.inner {
			Mode::Chunked(r) => r.into_trailer(),
			Mode::Fixed(_) | Mode::Eof(_) => Vec::new(),
		}
	}
}

impl<Socket: AsyncBufRead + ?Sized> AsyncRead for Receive<'_, Socket> {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<Result<usize>> {
		match &mut self.get_mut().inner {
			Mode::Fixed(r) => Pin::new(r).poll_read(cx, buf),
			Mode::Chunked(r) => Pin::new(r).poll_read(cx, buf),
			Mode::Eof(r) => Pin::new(r).poll_read(cx, buf),
		}
	}
}
