//! The byte streams that servers and clients run over.
//!
//! Everything above this module sees a connection as a [`BoxTransport`]: a boxed bidirectional
//! byte stream implementing the `futures-io` traits. A TCP stream from `tokio` is adapted with
//! [`tcp`]; TLS is layered on by an external [`TlsConnect`] or [`TlsAccept`] implementation that
//! takes one transport and returns another.

use futures_io::{AsyncRead, AsyncWrite};
use std::future::Future;
use std::io::Result;
use std::pin::Pin;

/// A bidirectional byte stream.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Transport for T {}

/// A type-erased transport.
pub type BoxTransport = Box<dyn Transport>;

/// A boxed future that can move between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Wraps a `tokio` TCP stream into a transport.
///
/// Nagle’s algorithm is disabled, since messages are written in batches already.
pub fn tcp(stream: tokio::net::TcpStream) -> BoxTransport {
	if let Err(e) = stream.set_nodelay(true) {
		tracing::debug!(error = %e, "cannot disable Nagle's algorithm");
	}
	Box::new(async_compat::Compat::new(stream))
}

/// The client side of a TLS handshake.
pub trait TlsConnect: Send + Sync {
	/// Performs a handshake over `io` with the server named `server_name`, returning the
	/// encrypted transport.
	///
	/// # Errors
	/// This function returns an error if the handshake fails.
	fn connect<'a>(
		&'a self,
		server_name: &'a str,
		io: BoxTransport,
	) -> BoxFuture<'a, Result<BoxTransport>>;
}

/// The server side of a TLS handshake.
pub trait TlsAccept: Send + Sync {
	/// Performs a handshake over an accepted `io`, returning the encrypted transport.
	///
	/// # Errors
	/// This function returns an error if the handshake fails.
	fn accept(&self, io: BoxTransport) -> BoxFuture<'_, Result<BoxTransport>>;
}

#[cfg(test)]
pub(crate) mod test {
	use super::*;
	use std::task::{Context, Poll};

	/// A stand-in for TLS that flips every bit on the wire.
	pub(crate) struct Inverted(pub(crate) BoxTransport);

	impl AsyncRead for Inverted {
		fn poll_read(
			mut self: Pin<&mut Self>,
			cx: &mut Context<'_>,
			buf: &mut [u8],
		) -> Poll<Result<usize>> {
			let n = futures_core::ready!(Pin::new(&mut self.0).poll_read(cx, buf))?;
			buf[..n].iter_mut().for_each(|b| *b = !*b);
			Ok(n).into()
		}
	}

	impl AsyncWrite for Inverted {
		fn poll_write(
			mut self: Pin<&mut Self>,
			cx: &mut Context<'_>,
			buf: &[u8],
		) -> Poll<Result<usize>> {
			let flipped: Vec<u8> = buf.iter().map(|b| !*b).collect();
			Pin::new(&mut self.0).poll_write(cx, &flipped)
		}

		fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
			Pin::new(&mut self.0).poll_flush(cx)
		}

		fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
			Pin::new(&mut self.0).poll_close(cx)
		}
	}

	/// Both handshake sides of [`Inverted`].
	#[derive(Debug)]
	pub(crate) struct InvertedTls;

	impl TlsConnect for InvertedTls {
		fn connect<'a>(
			&'a self,
			_server_name: &'a str,
			io: BoxTransport,
		) -> BoxFuture<'a, Result<BoxTransport>> {
			Box::pin(async move { Ok(Box::new(Inverted(io)) as BoxTransport) })
		}
	}

	impl TlsAccept for InvertedTls {
		fn accept(&self, io: BoxTransport) -> BoxFuture<'_, Result<BoxTransport>> {
			Box::pin(async move { Ok(Box::new(Inverted(io)) as BoxTransport) })
		}
	}

	/// Tests that a TCP transport carries bytes both ways.
	#[tokio::test]
	async fn test_tcp() {
		use crate::util::io::AsyncWriteExt as _;
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let dial = tokio::spawn(async move { tokio::net::TcpStream::connect(addr).await.unwrap() });
		let (accepted, _) = listener.accept().await.unwrap();
		let mut server = InvertedTls.accept(tcp(accepted)).await.unwrap();
		let mut client = InvertedTls
			.connect("localhost", tcp(dial.await.unwrap()))
			.await
			.unwrap();
		Pin::new(&mut client).write_all(b"ping").await.unwrap();
		Pin::new(&mut client).flush().await.unwrap();
		let mut buf = [0_u8; 4];
		crate::util::io::read_all(Pin::new(&mut server), &mut buf)
			.await
			.unwrap();
		assert_eq!(&buf, b"ping");
	}
}
