use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings of a [`Server`](super::Server).
///
/// Every field has a default, so a TOML document only names what it changes:
///
/// ```toml
/// name = "edge"
/// concurrency = 1000
/// read_timeout = { secs = 5, nanos = 0 }
/// ```
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ServerConfig {
	/// The value of the `Server` header.
	pub name: String,

	/// The largest number of connections served at once. Further connections get `503`.
	pub concurrency: usize,

	/// The size of each connection’s read buffer, which also bounds the request header size.
	pub read_buffer_size: usize,

	/// The size of each connection’s write buffer.
	pub write_buffer_size: usize,

	/// The time allowed to read a whole request, from its first byte.
	pub read_timeout: Option<Duration>,

	/// The time allowed to write a whole response.
	pub write_timeout: Option<Duration>,

	/// The time a keep-alive connection may wait for its next request; `read_timeout` if unset.
	pub idle_timeout: Option<Duration>,

	/// The largest number of concurrent connections from one IP address, or 0 for no limit.
	pub max_conns_per_ip: usize,

	/// The number of requests after which a connection is closed, or 0 for no limit.
	pub max_requests_per_conn: usize,

	/// The time after which an idle worker task exits.
	pub max_idle_worker_duration: Duration,

	/// The largest request body in bytes.
	pub max_request_body_size: usize,

	/// Closes every connection after its first response.
	pub disable_keepalive: bool,

	/// Logs connection errors at `warn` instead of `debug`.
	pub log_all_errors: bool,

	/// Keeps received bytes out of error messages.
	pub secure_error_log_message: bool,

	/// Keeps header keys exactly as received.
	pub disable_header_names_normalizing: bool,

	/// Omits the `Server` header.
	pub no_default_server_header: bool,

	/// Omits the `Date` header.
	pub no_default_date: bool,

	/// Omits `Content-Type` when the handler sets none.
	pub no_default_content_type: bool,

	/// Adds `Connection: close` to responses once shutdown has begun.
	pub close_on_shutdown: bool,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			name: String::from("fastwire"),
			concurrency: 256 * 1024,
			read_buffer_size: 4096,
			write_buffer_size: 4096,
			read_timeout: None,
			write_timeout: None,
			idle_timeout: None,
			max_conns_per_ip: 0,
			max_requests_per_conn: 0,
			max_idle_worker_duration: Duration::from_secs(10),
			max_request_body_size: 4 * 1024 * 1024,
			disable_keepalive: false,
			log_all_errors: false,
			secure_error_log_message: false,
			disable_header_names_normalizing: false,
			no_default_server_header: false,
			no_default_date: false,
			no_default_content_type: false,
			close_on_shutdown: false,
		}
	}
}

impl ServerConfig {
	/// Parses a configuration from a TOML document.
	///
	/// # Errors
	/// This function returns an error if the document is not valid TOML or a field has the wrong
	/// type.
	pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
		toml::from_str(s)
	}

	/// Returns the timeout for waiting on the next request of a keep-alive connection.
	pub fn idle_timeout(&self) -> Option<Duration> {
		self.idle_timeout.or(self.read_timeout)
	}
}

/// Per-request overrides returned by the header-received hook.
///
/// Fields left as `None` keep the server-wide setting.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RequestConfig {
	/// The time allowed to read the body.
	pub read_timeout: Option<Duration>,

	/// The time allowed to write the response.
	pub write_timeout: Option<Duration>,

	/// The largest request body in bytes.
	pub max_request_body_size: Option<usize>,
}
