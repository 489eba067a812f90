use crate::error::{BadChunkHeader, BufferTooSmall, Error, FramingError};
use futures_core::ready;
use futures_io::{AsyncBufRead, AsyncRead};
use std::io::Result;
use std::num::NonZeroU64;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Checks whether a character can legally appear in the chunk extensions section.
fn is_chunk_ext_char(b: u8) -> bool {
	b == b'\t' || !b.is_ascii_control()
}

/// Returns the value of a hex digit.
fn hex_value(b: u8) -> Option<u64> {
	char::from(b).to_digit(16).map(u64::from)
}

/// Checks whether a trailer block has seen its terminating empty line.
fn trailer_complete(trailer: &[u8]) -> bool {
	match trailer.strip_suffix(b"\n") {
		Some(head) => {
			let head = head.strip_suffix(b"\r").unwrap_or(head);
			head.is_empty() || head.ends_with(b"\n")
		}
		None => false,
	}
}

/// The different states that the decoder can be in.
#[derive(Debug, Eq, PartialEq)]
enum State {
	/// The size part of a chunk header is being read, and no characters have been seen yet.
	SizeFirst,

	/// The size part of a chunk header is being read, and at least one hex digit has been seen.
	///
	/// The contained value is the decoded chunk size read so far.
	SizeRest(u64),

	/// The chunk extensions are being read.
	///
	/// The contained value is the chunk size.
	Ext(u64),

	/// The LF at the end of a chunk header is being read.
	///
	/// The contained value is the chunk size.
	HeaderLF(u64),

	/// The chunk data is being read.
	///
	/// The contained value is the remaining chunk size.
	Data(NonZeroU64),

	/// The CR following the chunk data is being read.
	DataCR,

	/// The LF following the chunk data is being read.
	DataLF,

	/// The trailer block after the terminal chunk is being collected.
	Trailer,

	/// Everything has been read.
	Done,
}

/// A body that is encoded using chunked transfer coding.
///
/// The trailer lines following the terminal chunk are collected, undecoded, and can be taken
/// with [`into_trailer`](Self::into_trailer).
#[derive(Debug)]
pub(super) struct Receive<'socket, Socket: AsyncBufRead + ?Sized> {
	/// The underlying socket.
	socket: Pin<&'socket mut Socket>,

	/// The current state.
	state: State,

	/// The trailer block received so far.
	trailer: Vec<u8>,

	/// The largest permitted trailer block.
	max_trailer: usize,
}

impl<'socket, Socket: AsyncBufRead + ?Sized> Receive<'socket, Socket> {
	/// Constructs a new `Receive`.
	///
	/// The `socket` parameter is the underlying socket to read from. A trailer block larger than
	/// `max_trailer` bytes is an error.
	pub(super) fn new(socket: Pin<&'socket mut Socket>, max_trailer: usize) -> Self {
		Self {
			socket,
			state: State::SizeFirst,
			trailer: Vec::new(),
			max_trailer,
		}
	}

	/// Returns `true` if the terminal chunk and the trailer have been received.
	pub(super) fn is_finished(&self) -> bool {
		self.state == State::Done
	}

	/// Destroys a `Receive`, returning the trailer block.
	pub(super) fn into_trailer(self) -> Vec<u8> {
		self.trailer
	}

	/// Reads and returns one byte from the socket.
	fn poll_read_byte(&mut self, cx: &mut Context<'_>) -> Poll<Result<u8>> {
		let first = ready!(self.socket.as_mut().poll_fill_buf(cx))?.first().copied();
		match first {
			Some(b) => {
				self.socket.as_mut().consume(1);
				Ok(b).into()
			}
			None => Err(FramingError::UnexpectedEndOfBody.into()).into(),
		}
	}

	/// Advances the state to either [`State::Data`] or [`State::Done`].
	///
	/// This function returns `Some(n)` in the case of [`State::Data`], where `n` is the number of
	/// bytes of body data that can be fetched, or `None` in the case of [`State::Done`].
	fn poll_advance_to_data(&mut self, cx: &mut Context<'_>) -> Poll<Result<Option<NonZeroU64>>> {
		loop {
			match self.state {
				State::SizeFirst => {
					let b = ready!(self.poll_read_byte(cx))?;
					match hex_value(b) {
						Some(nybble) => self.state = State::SizeRest(nybble),
						None => break Err(BadChunkHeader::SizeNotHex.into()).into(),
					}
				}

				State::SizeRest(size_so_far) => match ready!(self.poll_read_byte(cx))? {
					b';' => self.state = State::Ext(size_so_far),
					b'\r' => self.state = State::HeaderLF(size_so_far),
					b => match hex_value(b) {
						// Adding another digit would overflow.
						Some(_) if size_so_far >= 0x1000_0000_0000_0000_u64 => {
							break Err(BadChunkHeader::SizeNotU64.into()).into();
						}
						Some(nybble) => self.state = State::SizeRest((size_so_far << 4) | nybble),
						None => break Err(BadChunkHeader::SizeNotHex.into()).into(),
					},
				},

				State::Ext(chunk_size) => match ready!(self.poll_read_byte(cx))? {
					b'\r' => self.state = State::HeaderLF(chunk_size),
					b if is_chunk_ext_char(b) => (),
					_ => break Err(BadChunkHeader::ExtChar.into()).into(),
				},

				State::HeaderLF(chunk_size) => {
					if ready!(self.poll_read_byte(cx))? != b'\n' {
						break Err(BadChunkHeader::Newline.into()).into();
					}
					self.state = match NonZeroU64::new(chunk_size) {
						Some(n) => State::Data(n),
						None => State::Trailer,
					};
				}

				State::Data(chunk_remaining) => break Ok(Some(chunk_remaining)).into(),

				State::DataCR => {
					if ready!(self.poll_read_byte(cx))? != b'\r' {
						break Err(BadChunkHeader::Newline.into()).into();
					}
					self.state = State::DataLF;
				}

				State::DataLF => {
					if ready!(self.poll_read_byte(cx))? != b'\n' {
						break Err(BadChunkHeader::Newline.into()).into();
					}
					self.state = State::SizeFirst;
				}

				State::Trailer => {
					let b = ready!(self.poll_read_byte(cx))?;
					self.trailer.push(b);
					if trailer_complete(&self.trailer) {
						self.state = State::Done;
					} else if self.trailer.len() >= self.max_trailer {
						let e = BufferTooSmall::new("trailer", &self.trailer, true);
						break Err(Error::from(e).into()).into();
					}
				}

				State::Done => break Ok(None).into(),
			}
		}
	}
}

impl<Socket: AsyncBufRead + ?Sized> AsyncRead for Receive<'_, Socket> {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<Result<usize>> {
		let this = self.get_mut();
		if buf.is_empty() {
			return Ok(0).into();
		}
		match ready!(this.poll_advance_to_data(cx))? {
			None => Ok(0).into(),
			Some(bytes_available) => {
				let data = ready!(this.socket.as_mut().poll_fill_buf(cx))?;
				if data.is_empty() {
					return Err(FramingError::UnexpectedEndOfBody.into()).into();
				}
				let to_read = std::cmp::min(
					std::cmp::min(buf.len(), data.len()) as u64,
					bytes_available.get(),
				) as usize;
				buf[..to_read].copy_from_slice(&data[..to_read]);
				this.socket.as_mut().consume(to_read);
				let bytes_remaining = bytes_available.get() - to_read as u64;
				this.state = match NonZeroU64::new(bytes_remaining) {
					Some(bytes_remaining) => State::Data(bytes_remaining),
					None => State::DataCR,
				};
				Ok(to_read).into()
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::Receive;
	use crate::error::{BadChunkHeader, Error, FramingError};
	use crate::util::io::AsyncReadExt as _;
	use futures_executor::block_on;
	use std::pin::Pin;

	/// Reads a whole chunked body, returning the data and the trailer, and checks that the input
	/// is consumed exactly.
	async fn decode(mut input: &[u8]) -> (Vec<u8>, Vec<u8>) {
		let mut rx = Receive::new(Pin::new(&mut input), 1024);
		let mut out = Vec::new();
		crate::util::io::read_to_end(Pin::new(&mut rx), &mut out, 0)
			.await
			.unwrap();
		assert!(rx.is_finished());
		let trailer = rx.into_trailer();
		assert!(input.is_empty());
		(out, trailer)
	}

	/// Reads a chunked body that is expected to fail.
	async fn decode_err(mut input: &[u8]) -> Error {
		let mut rx = Receive::new(Pin::new(&mut input), 16);
		let mut out = Vec::new();
		crate::util::io::read_to_end(Pin::new(&mut rx), &mut out, 0)
			.await
			.unwrap_err()
			.into()
	}

	/// Tests reading some chunked data.
	#[test]
	fn test_poll_read() {
		block_on(async {
			let (out, trailer) = decode(b"006\r\nHello \r\n006\r\nWorld!\r\n0\r\n\r\n").await;
			assert_eq!(out, b"Hello World!");
			assert_eq!(trailer, b"\r\n");
		});
	}

	/// Tests reading some chunked data with chunk extensions.
	#[test]
	fn test_poll_read_exts() {
		block_on(async {
			let (out, _) = decode(b"006; cext-name=cext-value\r\nHello \r\n006; cext-name=\"quoted-cext-value-with\ttabs-in-it\"\r\nWorld!\r\n0\r\n\r\n").await;
			assert_eq!(out, b"Hello World!");
		});
	}

	/// Tests that trailer lines are collected verbatim.
	#[test]
	fn test_trailer() {
		block_on(async {
			let (out, trailer) =
				decode(b"3\r\nabc\r\n0\r\nX-Sum: 1\r\nX-Other: 2\r\n\r\n").await;
			assert_eq!(out, b"abc");
			assert_eq!(trailer, b"X-Sum: 1\r\nX-Other: 2\r\n\r\n");
		});
	}

	/// Tests small reads that split chunks.
	#[test]
	fn test_small_reads() {
		block_on(async {
			let mut input = &b"a\r\n0123456789\r\n0\r\n\r\n"[..];
			let mut rx = Receive::new(Pin::new(&mut input), 1024);
			let mut buffer = [0_u8; 3];
			let mut out = Vec::new();
			loop {
				let n = Pin::new(&mut rx).read(&mut buffer).await.unwrap();
				if n == 0 {
					break;
				}
				assert!(n <= 3);
				out.extend_from_slice(&buffer[..n]);
			}
			assert_eq!(out, b"0123456789");
		});
	}

	/// Tests the framing errors.
	#[test]
	fn test_errors() {
		block_on(async {
			assert!(matches!(
				decode_err(b"zz\r\n").await,
				Error::Framing(FramingError::Chunk(BadChunkHeader::SizeNotHex))
			));
			assert!(matches!(
				decode_err(b"3\r\nabcX\r\n0\r\n\r\n").await,
				Error::Framing(FramingError::Chunk(BadChunkHeader::Newline))
			));
			assert!(matches!(
				decode_err(b"11111111111111111\r\n").await,
				Error::Framing(FramingError::Chunk(BadChunkHeader::SizeNotU64))
			));
			assert!(matches!(
				decode_err(b"5\r\nab").await,
				Error::Framing(FramingError::UnexpectedEndOfBody)
			));
			assert!(matches!(
				decode_err(b"0\r\nX-Long-Trailer: 0123456789\r\n\r\n").await,
				Error::BufferTooSmall(_)
			));
		});
	}
}
