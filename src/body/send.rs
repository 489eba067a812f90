mod chunked;
mod fixed;

use super::Framing;
use futures_io::AsyncWrite;
use std::io::Result;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The framing-specific encoder behind a [`Send`].
#[derive(Debug)]
enum Mode<'socket, Socket: AsyncWrite + ?Sized> {
	/// The body length was announced in the header.
	Fixed(fixed::Send<'socket, Socket>),

	/// The body is encoded using chunked transfer coding.
	Chunked(chunked::Send<'socket, Socket>),

	/// The body is delimited by closing the connection, or there is no HTTP body at all.
	Raw(Pin<&'socket mut Socket>),
}

/// A message body being sent.
///
/// After the header has been written, an instance of this type implements [`AsyncWrite`] for
/// the body. When the body is complete, [`finish`](Self::finish) must be called to terminate it.
#[derive(Debug)]
pub struct Send<'socket, Socket: AsyncWrite + ?Sized> {
	/// The encoder.
	inner: Mode<'socket, Socket>,
}

impl<'socket, Socket: AsyncWrite + ?Sized> Send<'socket, Socket> {
	/// Constructs an encoder for a body with the given framing.
	pub fn new(socket: Pin<&'socket mut Socket>, framing: Framing) -> Self {
		let inner = match framing {
			Framing::Fixed(n) => Mode::Fixed(fixed::Send::new(socket, n)),
			Framing::Chunked => Mode::Chunked(chunked::Send::new(socket)),
			Framing::Identity | Framing::Upgrade => Mode::Raw(socket),
		};
		Self { inner }
	}

	/// Finishes the body.
	///
	/// For a chunked body this sends the terminal chunk followed by `trailer`, which must consist
	/// of complete `Key: Value` lines; for other framings `trailer` is ignored.
	///
	/// *Important*: This function does not flush the socket.
	///
	/// # Panics
	/// This function panics in a debug build if a fixed-length body is incomplete.
	///
	/// # Errors
	/// This function returns an error if writing to the underlying socket fails.
	pub async fn finish(self, trailer: &[u8]) -> Result<()> {
		match self.inner {
			Mode::Fixed(body) => {
				debug_assert!(body.remaining() == 0);
				Ok(())
			}
			Mode::Chunked(body) => body.finish(trailer).await,
			Mode::Raw(_) => Ok(()),
		}
	}
}

impl<Socket: AsyncWrite + ?Sized> AsyncWrite for Send<'_, Socket> {
	fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize>> {
		match &mut self.get_mut().inner {
			Mode::Fixed(w) => Pin::new(w).poll_write(cx, buf),
			Mode::Chunked(w) => Pin::new(w).poll_write(cx, buf),
			Mode::Raw(w) => w.as_mut().poll_write(cx, buf),
		}
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		match &mut self.get_mut().inner {
			Mode::Fixed(w) => Pin::new(w).poll_flush(cx),
			Mode::Chunked(w) => Pin::new(w).poll_flush(cx),
			Mode::Raw(w) => w.as_mut().poll_flush(cx),
		}
	}

	fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		match &mut self.get_mut().inner {
			Mode::Fixed(w) => Pin::new(w).poll_close(cx),
			Mode::Chunked(w) => Pin::new(w).poll_close(cx),
			Mode::Raw(w) => w.as_mut().poll_close(cx),
		}
	}
}
