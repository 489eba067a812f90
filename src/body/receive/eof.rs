use futures_core::ready;
use futures_io::{AsyncBufRead, AsyncRead};
use std::io::Result;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A body that runs until the peer closes the connection.
#[derive(Debug)]
pub(super) struct Receive<'socket, Socket: AsyncBufRead + ?Sized> {
	/// The underlying socket.
	socket: Pin<&'socket mut Socket>,

	/// Whether end of file has been seen.
	eof: bool,
}

impl<'socket, Socket: AsyncBufRead + ?Sized> Receive<'socket, Socket> {
	/// Constructs a new `Receive`.
	pub(super) fn new(socket: Pin<&'socket mut Socket>) -> Self {
		Self { socket, eof: false }
	}

	/// Returns `true` once end of file has been reached.
	pub(super) fn is_finished(&self) -> bool {
		self.eof
	}
}

impl<Socket: AsyncBufRead + ?Sized> AsyncRead for Receive<'_, Socket> {
	fn poll_read(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<Result<usize>> {
		if self.eof || buf.is_empty() {
			return Ok(0).into();
		}
		let bytes_read = ready!(self.socket.as_mut().poll_read(cx, buf))?;
		self.eof = bytes_read == 0;
		Ok(bytes_read).into()
	}
}

#[cfg(test)]
mod test {
	use super::Receive;
	use futures_executor::block_on;
	use std::pin::Pin;

	/// Tests that everything up to end of file is delivered.
	#[test]
	fn test_until_eof() {
		block_on(async {
			let mut data = &b"all of it"[..];
			let mut rx = Receive::new(Pin::new(&mut data));
			let mut out = Vec::new();
			let n = crate::util::io::read_to_end(Pin::new(&mut rx), &mut out, 0)
				.await
				.unwrap();
			assert_eq!(n, 9);
			assert_eq!(out, b"all of it");
			assert!(rx.is_finished());
		});
	}
}
