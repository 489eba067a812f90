#![forbid(unsafe_code)]
#![warn(
	future_incompatible,
	nonstandard_style,
	rust_2018_idioms,
	rustdoc,
	unused
)]
#![warn(
	deprecated_in_future,
	missing_crate_level_docs,
	missing_debug_implementations,
	missing_docs,
	missing_doc_code_examples,
	// Disabled due to <https://github.com/rust-lang/rust/issues/69952> and
	// <https://github.com/rust-lang/rust/issues/77217>.
	// single_use_lifetimes,
	trivial_casts,
	trivial_numeric_casts,
	unused_crate_dependencies,
	unused_import_braces,
	// Disabled due to <https://github.com/rust-lang/rust/issues/77217>.
	// unused_lifetimes,
	unused_qualifications,
	unused_results
)]
#![warn(clippy::pedantic, clippy::cargo)]
// Disabled because we frequently mix u64 and usize, where the former is used for message body
// lengths and the latter for in-memory buffer sizes.
#![allow(clippy::cast_possible_truncation)]

//! Low-allocation HTTP/1.1 wire engine
//!
//! This crate implements the HTTP/1.1 wire protocol for servers and clients that handle many
//! requests per second. Messages are parsed in place from pooled connection buffers, the small
//! set of framing headers is resolved during the same scan, and request contexts, messages and
//! buffers are reused through [`pool`] instead of allocated per request.
//!
//! The [`server`] accepts connections into a bounded pool of worker tasks and runs a keep-alive
//! loop per connection, answering malformed requests with a minimal error response. The
//! [`client`] keeps per-host connection pools with bounded waiting, idle expiry, retries of
//! idempotent requests and redirect following.
//!
//! Both sides run on `tokio` and see connections as [`transport::BoxTransport`]s, so TLS is
//! layered on by any implementation of [`transport::TlsAccept`] or [`transport::TlsConnect`].
//!
//! # Example
//! ```no_run
//! # async fn run() -> Result<(), fastwire::Error> {
//! use fastwire::server::RequestCtx;
//!
//! let server = fastwire::Server::builder(|ctx: &mut RequestCtx| {
//!		let greeting = format!("hello from {}", ctx.remote_ip());
//!		ctx.success(b"text/plain", greeting.as_bytes());
//! })
//! .build();
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! tokio::spawn(async move { server.serve(listener).await });
//!
//! let client = fastwire::Client::new();
//! let mut resp = fastwire::Response::new();
//! client.get("http://127.0.0.1:8080/", &mut resp).await?;
//! assert_eq!(resp.status(), 200);
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod byterange;
pub mod client;
pub mod compress;
pub mod error;
pub mod header;
pub mod message;
pub mod pool;
pub mod server;
pub mod status;
pub mod transport;
pub mod util;

pub use byterange::parse_byte_range;
pub use client::{Client, HostClient, HostClientConfig};
pub use error::Error;
pub use message::{Request, Response};
pub use server::{Server, ServerConfig};
