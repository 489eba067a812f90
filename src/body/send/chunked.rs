use crate::util::io::AsyncWriteExt as _;
use futures_core::ready;
use futures_io::AsyncWrite;
use std::io::Result;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The size of the chunk header buffer: sixteen hex digits plus CRLF.
const HEADER_LEN: usize = 18;

/// Writes the hexadecimal form of `n` followed by CRLF into `buf`, returning the length.
fn format_chunk_header(n: u64, buf: &mut [u8; HEADER_LEN]) -> usize {
	const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
	let digits = std::cmp::max(1, (64 - n.leading_zeros() as usize + 3) / 4);
	for i in 0..digits {
		let shift = 4 * (digits - 1 - i);
		buf[i] = DIGITS[((n >> shift) & 0xF) as usize];
	}
	buf[digits..digits + 2].copy_from_slice(b"\r\n");
	digits + 2
}

/// A body being sent using chunked transfer coding.
///
/// Every nonempty write becomes one chunk.
#[derive(Debug)]
pub(super) struct Send<'socket, Socket: AsyncWrite + ?Sized> {
	/// The underlying socket.
	socket: Pin<&'socket mut Socket>,

	/// A buffer holding a chunk header or the CRLF after a chunk.
	header_footer_buffer: [u8; HEADER_LEN],

	/// The number of bytes of `header_footer_buffer` that are filled.
	header_footer_buffer_used: usize,

	/// The number of bytes of `header_footer_buffer` that have been sent over the socket.
	header_footer_buffer_sent: usize,

	/// The number of bytes left to send in the current chunk.
	chunk_bytes_left: u64,
}

impl<'socket, Socket: AsyncWrite + ?Sized> Send<'socket, Socket> {
	/// Constructs a new `Send`.
	pub(super) fn new(socket: Pin<&'socket mut Socket>) -> Self {
		Self {
			socket,
			header_footer_buffer: [0; HEADER_LEN],
			header_footer_buffer_used: 0,
			header_footer_buffer_sent: 0,
			chunk_bytes_left: 0,
		}
	}

	/// Sends whatever is left of the buffered chunk header or footer.
	fn poll_send_header_footer(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
		while self.header_footer_buffer_sent != self.header_footer_buffer_used {
			let bytes_written = ready!(self.socket.as_mut().poll_write(
				cx,
				&self.header_footer_buffer
					[self.header_footer_buffer_sent..self.header_footer_buffer_used],
			))?;
			if bytes_written == 0 {
				return Err(std::io::ErrorKind::WriteZero.into()).into();
			}
			self.header_footer_buffer_sent += bytes_written;
		}
		Ok(()).into()
	}

	/// Sends the terminal chunk, the trailer block and the final empty line.
	///
	/// `trailer` holds complete `Key: Value` lines. The socket is not flushed.
	///
	/// # Panics
	/// This function panics in a debug build if the most recent chunk was not fully sent.
	///
	/// # Errors
	/// This function returns an error if writing to the underlying socket fails.
	pub(super) async fn finish(mut self, trailer: &[u8]) -> Result<()> {
		debug_assert!(self.chunk_bytes_left == 0);
		std::future::poll_fn(|cx| self.poll_send_header_footer(cx)).await?;
		self.socket.as_mut().write_all(b"0\r\n").await?;
		self.socket.as_mut().write_all(trailer).await?;
		self.socket.as_mut().write_all(b"\r\n").await
	}
}

impl<Socket: AsyncWrite + ?Sized> AsyncWrite for Send<'_, Socket> {
	fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize>> {
		if buf.is_empty() {
			return Ok(0).into();
		}
		let this = Pin::into_inner(self);

		if this.chunk_bytes_left == 0 {
			// The footer of the previous chunk may still be buffered.
			ready!(this.poll_send_header_footer(cx))?;
			this.header_footer_buffer_used =
				format_chunk_header(buf.len() as u64, &mut this.header_footer_buffer);
			this.header_footer_buffer_sent = 0;
			this.chunk_bytes_left = buf.len() as u64;
		}
		ready!(this.poll_send_header_footer(cx))?;

		let to_write = std::cmp::min(buf.len() as u64, this.chunk_bytes_left) as usize;
		let bytes_written = ready!(this.socket.as_mut().poll_write(cx, &buf[..to_write]))?;
		this.chunk_bytes_left -= bytes_written as u64;
		if this.chunk_bytes_left == 0 {
			this.header_footer_buffer[..2].copy_from_slice(b"\r\n");
			this.header_footer_buffer_sent = 0;
			this.header_footer_buffer_used = 2;
		}
		Ok(bytes_written).into()
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		let this = Pin::into_inner(self);
		ready!(this.poll_send_header_footer(cx))?;
		this.socket.as_mut().poll_flush(cx)
	}

	fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		let this = Pin::into_inner(self);
		ready!(this.poll_send_header_footer(cx))?;
		this.socket.as_mut().poll_close(cx)
	}
}
