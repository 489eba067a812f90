use futures_core::ready;
use futures_io::{AsyncBufRead, AsyncRead, AsyncWrite};
use std::io::Result;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A transport with a read buffer and a write buffer.
///
/// Reads are served from the read buffer, which is refilled with a single read of the
/// underlying transport once empty. Writes accumulate in the write buffer until it would
/// overflow or the connection is flushed; a write at least as large as the whole buffer bypasses
/// it after the buffered bytes have been sent.
///
/// Both buffers are supplied by the caller, normally from a [`BufferPool`](crate::pool::BufferPool),
/// and handed back by [`into_parts`](Self::into_parts).
#[derive(Debug)]
pub struct BufConn<T> {
	/// The underlying transport.
	io: T,

	/// The read buffer, whose length is the read capacity.
	rbuf: Vec<u8>,

	/// Offset of the first unconsumed byte in `rbuf`.
	rpos: usize,

	/// Offset one past the last filled byte in `rbuf`.
	rend: usize,

	/// Bytes accepted from callers but not yet written to `io`.
	wbuf: Vec<u8>,

	/// Number of bytes at the start of `wbuf` already written to `io`.
	wpos: usize,

	/// The size at which `wbuf` is written out.
	wcap: usize,
}

/// The pieces of a dismantled [`BufConn`].
#[derive(Debug)]
pub struct Parts<T> {
	/// The underlying transport.
	pub io: T,

	/// Bytes that had been read from the transport but not consumed.
	pub unread: Vec<u8>,

	/// The read buffer, for return to a pool.
	pub read_buf: Vec<u8>,

	/// The write buffer, for return to a pool.
	pub write_buf: Vec<u8>,
}

impl<T> BufConn<T> {
	/// Wraps a transport.
	///
	/// The length of `read_buf` is the read buffer size and the capacity of `write_buf` is the
	/// write buffer size. Buffers of size zero are replaced by one-byte buffers.
	pub fn new(io: T, mut read_buf: Vec<u8>, mut write_buf: Vec<u8>) -> Self {
		if read_buf.is_empty() {
			read_buf.resize(1, 0);
		}
		write_buf.clear();
		let wcap = std::cmp::max(write_buf.capacity(), 1);
		Self {
			io,
			rbuf: read_buf,
			rpos: 0,
			rend: 0,
			wbuf: write_buf,
			wpos: 0,
			wcap,
		}
	}

	/// Returns the bytes that have been read from the transport but not yet consumed.
	pub fn buffered(&self) -> &[u8] {
		&self.rbuf[self.rpos..self.rend]
	}

	/// Returns the number of bytes waiting to be written to the transport.
	pub fn pending_write(&self) -> usize {
		self.wbuf.len() - self.wpos
	}

	/// Returns the size of the read buffer.
	pub fn read_capacity(&self) -> usize {
		self.rbuf.len()
	}

	/// Returns a shared reference to the underlying transport.
	pub fn get_ref(&self) -> &T {
		&self.io
	}

	/// Returns a mutable reference to the underlying transport.
	///
	/// Reading or writing the transport directly bypasses the buffers.
	pub fn get_mut(&mut self) -> &mut T {
		&mut self.io
	}

	/// Dismantles the connection.
	///
	/// Bytes still pending in the write buffer are discarded; callers that care flush first.
	pub fn into_parts(self) -> Parts<T> {
		Parts {
			unread: self.rbuf[self.rpos..self.rend].to_vec(),
			io: self.io,
			read_buf: self.rbuf,
			write_buf: self.wbuf,
		}
	}
}

impl<T: AsyncRead + Unpin> BufConn<T> {
	/// Refills the read buffer if it is empty.
	///
	/// At end of file the buffer stays empty.
	fn poll_fill(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
		if self.rpos == self.rend {
			let n = ready!(Pin::new(&mut self.io).poll_read(cx, &mut self.rbuf[..]))?;
			self.rpos = 0;
			self.rend = n;
		}
		Ok(()).into()
	}
}

impl<T: AsyncWrite + Unpin> BufConn<T> {
	/// Writes out everything in the write buffer.
	fn poll_write_buf(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
		while self.wpos < self.wbuf.len() {
			let n = ready!(Pin::new(&mut self.io).poll_write(cx, &self.wbuf[self.wpos..]))?;
			if n == 0 {
				return Err(std::io::ErrorKind::WriteZero.into()).into();
			}
			self.wpos += n;
		}
		self.wbuf.clear();
		self.wpos = 0;
		Ok(()).into()
	}
}

impl<T: AsyncRead + Unpin> AsyncRead for BufConn<T> {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<Result<usize>> {
		let this = self.get_mut();
		if this.rpos == this.rend && buf.len() >= this.rbuf.len() {
			return Pin::new(&mut this.io).poll_read(cx, buf);
		}
		ready!(this.poll_fill(cx))?;
		let available = &this.rbuf[this.rpos..this.rend];
		let n = std::cmp::min(available.len(), buf.len());
		buf[..n].copy_from_slice(&available[..n]);
		this.rpos += n;
		Ok(n).into()
	}
}

impl<T: AsyncRead + Unpin> AsyncBufRead for BufConn<T> {
	fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<&[u8]>> {
		let this = self.get_mut();
		ready!(this.poll_fill(cx))?;
		Ok(&this.rbuf[this.rpos..this.rend]).into()
	}

	fn consume(self: Pin<&mut Self>, amt: usize) {
		let this = self.get_mut();
		this.rpos = std::cmp::min(this.rpos + amt, this.rend);
	}
}

impl<T: AsyncWrite + Unpin> AsyncWrite for BufConn<T> {
	fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize>> {
		let this = self.get_mut();
		if this.wbuf.len() + buf.len() > this.wcap {
			ready!(this.poll_write_buf(cx))?;
		}
		if buf.len() >= this.wcap {
			Pin::new(&mut this.io).poll_write(cx, buf)
		} else {
			this.wbuf.extend_from_slice(buf);
			Ok(buf.len()).into()
		}
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		let this = self.get_mut();
		ready!(this.poll_write_buf(cx))?;
		Pin::new(&mut this.io).poll_flush(cx)
	}

	fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		let this = self.get_mut();
		ready!(this.poll_write_buf(cx))?;
		Pin::new(&mut this.io).poll_close(cx)
	}
}
