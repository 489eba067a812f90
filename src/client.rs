//! The HTTP client.
//!
//! A [`HostClient`] pools keep-alive connections to one upstream host. A [`Client`] keeps one
//! `HostClient` per scheme, host and port, and picks the right one from each request URL, so it
//! can follow redirects across hosts.
//!
//! ```no_run
//! # async fn run() -> Result<(), fastwire::Error> {
//! let client = fastwire::Client::new();
//! let mut resp = fastwire::Response::new();
//! client.get("http://example.com/", &mut resp).await?;
//! println!("{} {}", resp.status(), String::from_utf8_lossy(resp.body()));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dial;
mod host;
mod redirect;
mod waiter;

pub use config::{ConnPoolStrategy, HostClientConfig};
pub use dial::{Dial, Resolve, ResolveCache, Resolved, SystemResolver, TcpDialer};
pub use host::{HostClient, HostClientBuilder};
pub use redirect::DEFAULT_MAX_REDIRECTS;

use crate::error::Error;
use crate::message::{Request, Response};
use crate::transport::{BoxFuture, TlsConnect};
use crate::util::deadline_after;
use host::RetryIf;
use parking_lot::Mutex;
use redirect::Exchange;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// The time after which an unused host client is dropped.
const HOST_CLIENT_IDLE: Duration = Duration::from_secs(60);

struct Shared {
	/// The template for every host client; `addr` and `is_tls` are filled in per host.
	config: HostClientConfig,
	dialer: Arc<dyn Dial>,
	tls: Option<Arc<dyn TlsConnect>>,
	retry_if: Option<Arc<RetryIf>>,
	hosts: Mutex<HashMap<String, HostClient>>,
}

/// Builds a [`Client`].
pub struct ClientBuilder {
	config: HostClientConfig,
	dialer: Option<Arc<dyn Dial>>,
	tls: Option<Arc<dyn TlsConnect>>,
	retry_if: Option<Arc<RetryIf>>,
}

impl std::fmt::Debug for ClientBuilder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClientBuilder")
			.field("config", &self.config)
			.field("tls", &self.tls.is_some())
			.finish_non_exhaustive()
	}
}

impl ClientBuilder {
	/// Sets the settings applied to every host.
	///
	/// `addr` and `is_tls` are ignored; they come from each request URL.
	pub fn config(mut self, config: HostClientConfig) -> Self {
		self.config = config;
		self
	}

	/// Sets the dialer shared by all hosts.
	pub fn dialer(mut self, dialer: Arc<dyn Dial>) -> Self {
		self.dialer = Some(dialer);
		self
	}

	/// Sets the TLS connector for `https` URLs.
	pub fn tls(mut self, tls: Arc<dyn TlsConnect>) -> Self {
		self.tls = Some(tls);
		self
	}

	/// Replaces the default retry predicate of every host.
	pub fn retry_if(mut self, retry_if: impl Fn(&Request) -> bool + Send + Sync + 'static) -> Self {
		self.retry_if = Some(Arc::new(retry_if));
		self
	}

	/// Creates the client.
	pub fn build(self) -> Client {
		Client {
			shared: Arc::new(Shared {
				config: self.config,
				dialer: self.dialer.unwrap_or_else(|| Arc::new(TcpDialer::default())),
				tls: self.tls,
				retry_if: self.retry_if,
				hosts: Mutex::new(HashMap::new()),
			}),
		}
	}
}

/// A client for any number of hosts.
///
/// Cloning is cheap and clones share their connection pools.
#[derive(Clone)]
pub struct Client {
	shared: Arc<Shared>,
}

impl std::fmt::Debug for Client {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Client")
			.field("hosts", &self.shared.hosts.lock().len())
			.finish_non_exhaustive()
	}
}

impl Default for Client {
	fn default() -> Self {
		Self::builder().build()
	}
}

impl Client {
	/// Creates a client with default settings.
	pub fn new() -> Self {
		Self::default()
	}

	/// Starts building a client.
	pub fn builder() -> ClientBuilder {
		ClientBuilder {
			config: HostClientConfig::default(),
			dialer: None,
			tls: None,
			retry_if: None,
		}
	}

	/// Returns the host client serving `url`, creating it if needed.
	fn host_client(&self, url: &url::Url) -> Result<HostClient, Error> {
		let is_tls = match url.scheme() {
			"http" => false,
			"https" => true,
			_ => return Err(Error::SchemeMismatch),
		};
		let host = url
			.host_str()
			.filter(|h| !h.is_empty())
			.ok_or(Error::Url(url::ParseError::EmptyHost))?;
		let port = url
			.port_or_known_default()
			.unwrap_or(if is_tls { 443 } else { 80 });
		let key = format!("{}://{host}:{port}", url.scheme());

		let mut hosts = self.shared.hosts.lock();
		if let Some(client) = hosts.get(&key) {
			return Ok(client.clone());
		}
		let now = Instant::now();
		hosts.retain(|_, c| {
			c.pending_requests() > 0 || now.duration_since(c.last_use()) < HOST_CLIENT_IDLE
		});
		let config = HostClientConfig {
			addr: format!("{host}:{port}"),
			is_tls,
			..self.shared.config.clone()
		};
		let mut builder = HostClient::builder(config)
			.dialer(Arc::clone(&self.shared.dialer))
			.shared_retry_if(self.shared.retry_if.clone());
		if let Some(tls) = &self.shared.tls {
			builder = builder.tls(Arc::clone(tls));
		}
		let client = builder.build();
		let _ = hosts.insert(key, client.clone());
		Ok(client)
	}

	/// Sends a request with an absolute URL and reads the response into `resp`.
	///
	/// Redirects are returned as is.
	///
	/// # Errors
	/// This function returns [`Error::Url`] if the request has no URL, [`Error::SchemeMismatch`]
	/// for a scheme other than `http` and `https`, and any error of
	/// [`HostClient::do_request`].
	pub async fn do_request(&self, req: &mut Request, resp: &mut Response) -> Result<(), Error> {
		let request_deadline = deadline_after(req.timeout());
		self.exchange(req, resp, request_deadline).await
	}

	/// Sends a request like [`do_request`](Self::do_request), giving up after `timeout`.
	///
	/// # Errors
	/// See [`do_request`](Self::do_request).
	pub async fn do_timeout(
		&self,
		req: &mut Request,
		resp: &mut Response,
		timeout: Duration,
	) -> Result<(), Error> {
		self.exchange(req, resp, Some(Instant::now() + timeout)).await
	}

	/// Sends a request, following up to `max_redirects` redirects to any host.
	///
	/// # Errors
	/// This function returns [`Error::TooManyRedirects`] after `max_redirects + 1` requests that
	/// all redirected, [`Error::MissingRedirectLocation`] for a redirect without target, and any
	/// error of [`do_request`](Self::do_request).
	pub async fn do_redirects(
		&self,
		req: &mut Request,
		resp: &mut Response,
		max_redirects: usize,
	) -> Result<(), Error> {
		redirect::follow(self, req, resp, max_redirects).await
	}

	/// Fetches `url` with `GET`, following up to [`DEFAULT_MAX_REDIRECTS`] redirects.
	///
	/// # Errors
	/// This function returns [`Error::Url`] if `url` is invalid, and any error of
	/// [`do_redirects`](Self::do_redirects).
	pub async fn get(&self, url: &str, resp: &mut Response) -> Result<(), Error> {
		let mut req = Request::new();
		req.set_uri(url)?;
		self.do_redirects(&mut req, resp, DEFAULT_MAX_REDIRECTS).await
	}
}

impl Exchange for Client {
	fn exchange<'a>(
		&'a self,
		req: &'a mut Request,
		resp: &'a mut Response,
		deadline: Option<Instant>,
	) -> BoxFuture<'a, Result<(), Error>> {
		Box::pin(async move {
			let host = match req.uri() {
				Some(url) => self.host_client(url)?,
				None => return Err(Error::Url(url::ParseError::RelativeUrlWithoutBase)),
			};
			host.exchange(req, resp, deadline).await
		})
	}
}

#[cfg(test)]
mod test {
	use super::host::test::{get, mock, Reply, OK};
	use super::*;
	use std::sync::atomic::Ordering;

	/// Tests that a server redirecting to itself forever exhausts the redirect limit.
	#[tokio::test]
	async fn test_redirect_loop() {
		const FOUND: &[u8] = b"HTTP/1.1 302 Found\r\nLocation: /\r\nContent-Length: 0\r\n\r\n";
		let server = mock(Duration::ZERO, |_| Reply::Send(FOUND)).await;
		let client = Client::new();
		let e = client
			.do_redirects(&mut get(server.addr), &mut Response::new(), 3)
			.await
			.unwrap_err();
		assert!(matches!(e, Error::TooManyRedirects));
		assert_eq!(server.requests.load(Ordering::SeqCst), 4);
		assert_eq!(server.accepts.load(Ordering::SeqCst), 1);
	}

	/// Tests that `get` follows a redirect to the final response.
	#[tokio::test]
	async fn test_get_follows() {
		const MOVED: &[u8] =
			b"HTTP/1.1 301 Moved Permanently\r\nLocation: /moved\r\nContent-Length: 0\r\n\r\n";
		let server = mock(Duration::ZERO, |n| {
			Reply::Send(if n == 0 { MOVED } else { OK })
		})
		.await;
		let client = Client::new();
		let mut resp = Response::new();
		client
			.get(&format!("http://{}/start", server.addr), &mut resp)
			.await
			.unwrap();
		assert_eq!(resp.status(), 200);
		assert_eq!(resp.body(), b"ok");
		assert_eq!(server.requests.load(Ordering::SeqCst), 2);
	}

	/// Tests that requests to one host share a host client, and that unknown schemes and
	/// requests without a URL are refused.
	#[tokio::test]
	async fn test_host_clients() {
		let server = mock(Duration::ZERO, |_| Reply::Send(OK)).await;
		let client = Client::new();
		for _ in 0..2 {
			client
				.do_request(&mut get(server.addr), &mut Response::new())
				.await
				.unwrap();
		}
		assert_eq!(client.shared.hosts.lock().len(), 1);
		assert_eq!(server.accepts.load(Ordering::SeqCst), 1);

		let mut req = Request::new();
		req.set_uri("ftp://example.com/file").unwrap();
		let e = client.do_request(&mut req, &mut Response::new()).await.unwrap_err();
		assert!(matches!(e, Error::SchemeMismatch));

		let e = client
			.do_request(&mut Request::new(), &mut Response::new())
			.await
			.unwrap_err();
		assert!(matches!(e, Error::Url(_)));
	}
}
