use crate::error::FramingError;
use futures_core::ready;
use futures_io::{AsyncBufRead, AsyncRead};
use std::io::Result;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A body whose length is known from a `Content-Length` header or from the message itself.
#[derive(Debug)]
pub(super) struct Receive<'socket, Socket: AsyncBufRead + ?Sized> {
	/// The underlying socket.
	socket: Pin<&'socket mut Socket>,

	/// The amount of body left for the caller to receive.
	remaining: u64,
}

impl<'socket, Socket: AsyncBufRead + ?Sized> Receive<'socket, Socket> {
	/// Constructs a new `Receive` for a body of `length` bytes.
	pub(super) fn new(socket: Pin<&'socket mut Socket>, length: u64) -> Self {
		Self {
			socket,
			remaining: length,
		}
	}

	/// Returns `true` if the entire body has been received.
	pub(super) fn is_finished(&self) -> bool {
		self.remaining == 0
	}
}

impl<Socket: AsyncBufRead + ?Sized> AsyncRead for Receive<'_, Socket> {
	fn poll_read(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<Result<usize>> {
		if self.remaining == 0 || buf.is_empty() {
			return Ok(0).into();
		}
		let to_read = std::cmp::min(buf.len() as u64, self.remaining) as usize;
		let bytes_read = ready!(self.socket.as_mut().poll_read(cx, &mut buf[..to_read]))?;
		if bytes_read == 0 {
			return Err(FramingError::UnexpectedEndOfBody.into()).into();
		}
		self.remaining -= bytes_read as u64;
		Ok(bytes_read).into()
	}
}
