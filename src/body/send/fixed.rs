use futures_core::ready;
use futures_io::AsyncWrite;
use std::io::Result;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A body being sent with a length announced by `Content-Length`.
#[derive(Debug)]
pub(super) struct Send<'socket, Socket: AsyncWrite + ?Sized> {
	/// The underlying socket.
	socket: Pin<&'socket mut Socket>,

	/// How many bytes of body are left to send.
	remaining: u64,
}

impl<'socket, Socket: AsyncWrite + ?Sized> Send<'socket, Socket> {
	/// Constructs a new `Send` for a body of `length` bytes.
	pub(super) fn new(socket: Pin<&'socket mut Socket>, length: u64) -> Self {
		Self {
			socket,
			remaining: length,
		}
	}

	/// Returns the number of bytes still owed to the peer.
	pub(super) fn remaining(&self) -> u64 {
		self.remaining
	}
}

impl<Socket: AsyncWrite + ?Sized> AsyncWrite for Send<'_, Socket> {
	fn poll_write(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<Result<usize>> {
		debug_assert!(
			buf.len() as u64 <= self.remaining,
			"Attempted to write {} bytes, but Content-Length indicates only {} should be left to send",
			buf.len(),
			self.remaining
		);
		let to_write = std::cmp::min(buf.len() as u64, self.remaining) as usize;
		if to_write == 0 {
			return Ok(0).into();
		}
		let bytes_written = ready!(self.socket.as_mut().poll_write(cx, &buf[..to_write]))?;
		self.remaining -= bytes_written as u64;
		Ok(bytes_written).into()
	}

	fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		self.socket.as_mut().poll_flush(cx)
	}

	fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		self.socket.as_mut().poll_close(cx)
	}
}

#[cfg(test)]
mod test {
	use super::Send;
	use crate::util::io::AsyncWriteExt as _;
	use futures_executor::block_on;
	use std::pin::Pin;

	/// Tests sending a body in pieces.
	#[test]
	fn test_pieces() {
		block_on(async {
			let mut sink = crate::util::io::buffered::test::Pipe::default();
			let mut body = Send::new(Pin::new(&mut sink), 12);
			Pin::new(&mut body).write_all(b"Hello ").await.unwrap();
			Pin::new(&mut body).write_all(b"World!").await.unwrap();
			assert_eq!(body.remaining(), 0);
			assert_eq!(sink.output, b"Hello World!");
		});
	}

	/// Tests that overflowing the declared length panics in debug builds.
	#[test]
	#[should_panic]
	#[cfg(debug_assertions)]
	fn test_overflow() {
		block_on(async {
			let mut sink = crate::util::io::buffered::test::Pipe::default();
			let mut body = Send::new(Pin::new(&mut sink), 2);
			let _ = Pin::new(&mut body).write_all(b"abc").await;
		});
	}
}
