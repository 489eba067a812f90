use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The order in which idle connections are reused.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum ConnPoolStrategy {
	/// The connection idle the longest is reused first, spreading load over all connections.
	#[default]
	Fifo,

	/// The connection released last is reused first, letting surplus connections go idle and
	/// expire.
	Lifo,
}

/// Settings of a [`HostClient`](super::HostClient).
///
/// Every field has a default, so a TOML document only names what it changes:
///
/// ```toml
/// addr = "10.0.0.1:8080,10.0.0.2:8080"
/// max_conns = 64
/// read_timeout = { secs = 2, nanos = 0 }
/// conn_pool_strategy = "Lifo"
/// ```
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct HostClientConfig {
	/// Comma-separated `host:port` upstream addresses, used in turn for new connections.
	pub addr: String,

	/// The default `User-Agent`.
	pub name: String,

	/// Sends no `User-Agent` unless the request carries one.
	pub no_default_user_agent_header: bool,

	/// Runs connections over TLS.
	pub is_tls: bool,

	/// The largest number of connections to the host.
	pub max_conns: usize,

	/// The age after which a connection is closed after its next request.
	pub max_conn_duration: Option<Duration>,

	/// The time after which an unused connection is closed.
	pub max_idle_conn_duration: Duration,

	/// The largest number of attempts for a request that may be retried.
	pub max_idempotent_call_attempts: usize,

	/// The size of each connection’s read buffer, which also bounds the response header size.
	pub read_buffer_size: usize,

	/// The size of each connection’s write buffer.
	pub write_buffer_size: usize,

	/// The time allowed to read a whole response.
	pub read_timeout: Option<Duration>,

	/// The time allowed to write a whole request.
	pub write_timeout: Option<Duration>,

	/// The largest response body in bytes, or 0 for no limit.
	pub max_response_body_size: usize,

	/// The time a request may wait for a connection once `max_conns` are busy; without it such
	/// a request fails at once.
	pub max_conn_wait_timeout: Option<Duration>,

	/// The order of connection reuse.
	pub conn_pool_strategy: ConnPoolStrategy,

	/// Keeps header keys exactly as received.
	pub disable_header_names_normalizing: bool,

	/// Keeps received bytes out of error messages.
	pub secure_error_log_message: bool,

	/// The time allowed to establish a connection, including name resolution.
	pub dial_timeout: Duration,
}

impl Default for HostClientConfig {
	fn default() -> Self {
		Self {
			addr: String::new(),
			name: String::from("fastwire"),
			no_default_user_agent_header: false,
			is_tls: false,
			max_conns: 512,
			max_conn_duration: None,
			max_idle_conn_duration: Duration::from_secs(10),
			max_idempotent_call_attempts: 5,
			read_buffer_size: 4096,
			write_buffer_size: 4096,
			read_timeout: None,
			write_timeout: None,
			max_response_body_size: 0,
			max_conn_wait_timeout: None,
			conn_pool_strategy: ConnPoolStrategy::Fifo,
			disable_header_names_normalizing: false,
			secure_error_log_message: false,
			dial_timeout: Duration::from_secs(3),
		}
	}
}

impl HostClientConfig {
	/// Parses a configuration from a TOML document.
	///
	/// # Errors
	/// This function returns an error if the document is not valid TOML or a field has the wrong
	/// type.
	pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
		toml::from_str(s)
	}

	/// Returns the upstream addresses.
	pub fn addrs(&self) -> impl Iterator<Item = &str> {
		self.addr
			.split(',')
			.map(str::trim)
			.filter(|a| !a.is_empty())
	}
}
