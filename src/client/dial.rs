//! Name resolution and connection establishment.

use crate::error::{Error, Phase};
use crate::transport::{self, BoxFuture, BoxTransport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;

/// The default time a resolved address list is used before it is refreshed.
pub const DEFAULT_DNS_CACHE_DURATION: Duration = Duration::from_secs(60);

/// Translates host names to addresses.
pub trait Resolve: Send + Sync {
	/// Resolves `host`.
	///
	/// # Errors
	/// This function returns an error if the name cannot be resolved.
	fn resolve<'a>(&'a self, host: &'a str) -> BoxFuture<'a, io::Result<Vec<IpAddr>>>;
}

/// The resolver of the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
	fn resolve<'a>(&'a self, host: &'a str) -> BoxFuture<'a, io::Result<Vec<IpAddr>>> {
		Box::pin(async move {
			let addrs = tokio::net::lookup_host((host, 0)).await?;
			Ok(addrs.map(|a| a.ip()).collect())
		})
	}
}

/// A cached address list.
struct Entry {
	/// The addresses.
	addrs: Arc<[IpAddr]>,

	/// When the addresses were resolved.
	resolved: Instant,

	/// Whether a task is refreshing the entry.
	refreshing: bool,

	/// The index to start the next connection attempt at.
	next: usize,
}

/// Addresses for one connection attempt.
#[derive(Clone, Debug)]
pub struct Resolved {
	addrs: Arc<[IpAddr]>,
	start: usize,
}

impl Resolved {
	/// Returns the addresses in the order they should be tried.
	pub fn iter(&self) -> impl Iterator<Item = IpAddr> + '_ {
		let (head, tail) = self.addrs.split_at(self.start);
		tail.iter().chain(head).copied()
	}
}

/// A resolver front end that caches results.
///
/// Once an entry is older than the TTL, one caller refreshes it while concurrent callers keep
/// using the old addresses. Entries untouched for twice the TTL are dropped.
pub struct ResolveCache {
	resolver: Box<dyn Resolve>,
	ttl: Duration,
	entries: Mutex<HashMap<String, Entry>>,
}

impl std::fmt::Debug for ResolveCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ResolveCache")
			.field("ttl", &self.ttl)
			.field("entries", &self.entries.lock().len())
			.finish_non_exhaustive()
	}
}

/// What a lookup has to do after inspecting the cache.
enum Lookup {
	/// Use the cached addresses.
	Hit(Resolved),

	/// Refresh a stale entry, falling back to its addresses on failure.
	Refresh(Resolved),

	/// Resolve a name not in the cache.
	Miss,
}

/// Clears the refreshing flag of an entry, even if the refreshing task is cancelled.
struct RefreshGuard<'a> {
	cache: &'a ResolveCache,
	host: &'a str,
}

impl Drop for RefreshGuard<'_> {
	fn drop(&mut self) {
		if let Some(entry) = self.cache.entries.lock().get_mut(self.host) {
			entry.refreshing = false;
		}
	}
}

impl ResolveCache {
	/// Creates a cache in front of `resolver`.
	pub fn new(resolver: impl Resolve + 'static, ttl: Duration) -> Self {
		Self {
			resolver: Box::new(resolver),
			ttl,
			entries: Mutex::new(HashMap::new()),
		}
	}

	/// Returns the addresses of `host`, rotated by one position on every call.
	///
	/// An IP address literal is returned as is.
	///
	/// # Errors
	/// This function returns an error if the name is not cached and cannot be resolved, or
	/// resolves to nothing.
	pub async fn lookup(&self, host: &str) -> io::Result<Resolved> {
		if let Ok(ip) = host.parse::<IpAddr>() {
			return Ok(Resolved {
				addrs: Arc::from(vec![ip]),
				start: 0,
			});
		}
		let lookup = {
			let now = Instant::now();
			let mut entries = self.entries.lock();
			match entries.get_mut(host) {
				Some(entry) => {
					let resolved = Resolved {
						addrs: Arc::clone(&entry.addrs),
						start: entry.next % entry.addrs.len(),
					};
					entry.next = entry.next.wrapping_add(1);
					if entry.refreshing || now.duration_since(entry.resolved) < self.ttl {
						Lookup::Hit(resolved)
					} else {
						entry.refreshing = true;
						Lookup::Refresh(resolved)
					}
				}
				None => Lookup::Miss,
			}
		};
		match lookup {
			Lookup::Hit(resolved) => Ok(resolved),
			Lookup::Refresh(stale) => {
				let _guard = RefreshGuard { cache: self, host };
				match self.resolve(host).await {
					Ok(addrs) => Ok(self.store(host, addrs)),
					Err(e) => {
						tracing::debug!(host, error = %e, "cannot refresh cached addresses, using stale ones");
						Ok(stale)
					}
				}
			}
			Lookup::Miss => {
				let addrs = self.resolve(host).await?;
				Ok(self.store(host, addrs))
			}
		}
	}

	/// Asks the resolver, rejecting empty answers.
	async fn resolve(&self, host: &str) -> io::Result<Arc<[IpAddr]>> {
		let addrs = self.resolver.resolve(host).await?;
		if addrs.is_empty() {
			return Err(io::Error::new(
				io::ErrorKind::NotFound,
				format!("no addresses found for {host}"),
			));
		}
		Ok(addrs.into())
	}

	/// Records fresh addresses and purges expired entries.
	fn store(&self, host: &str, addrs: Arc<[IpAddr]>) -> Resolved {
		let now = Instant::now();
		let ttl = self.ttl;
		let mut entries = self.entries.lock();
		entries.retain(|_, e| e.refreshing || now.duration_since(e.resolved) < ttl * 2);
		let entry = entries.entry(host.to_owned()).or_insert_with(|| Entry {
			addrs: Arc::clone(&addrs),
			resolved: now,
			refreshing: false,
			next: 0,
		});
		entry.addrs = addrs;
		entry.resolved = now;
		let start = entry.next % entry.addrs.len();
		entry.next = entry.next.wrapping_add(1);
		Resolved {
			addrs: Arc::clone(&entry.addrs),
			start,
		}
	}
}

/// Opens transports to upstream addresses.
pub trait Dial: Send + Sync {
	/// Connects to `addr`, given as `host:port`, within `timeout`.
	///
	/// # Errors
	/// This function returns [`Error::Timeout`] with [`Phase::Dial`] if `timeout` elapses, and
	/// any resolution or connection error.
	fn dial<'a>(&'a self, addr: &'a str, timeout: Duration) -> BoxFuture<'a, Result<BoxTransport, Error>>;
}

/// A TCP dialer with a resolver cache.
///
/// The addresses of a name are tried in turn until one accepts or the dial deadline passes.
/// Successive dials start at successive addresses.
#[derive(Debug)]
pub struct TcpDialer {
	cache: ResolveCache,
}

impl Default for TcpDialer {
	fn default() -> Self {
		Self::new(ResolveCache::new(SystemResolver, DEFAULT_DNS_CACHE_DURATION))
	}
}

impl TcpDialer {
	/// Creates a dialer resolving through `cache`.
	pub fn new(cache: ResolveCache) -> Self {
		Self { cache }
	}

	async fn dial_tcp(&self, addr: &str, timeout: Duration) -> Result<BoxTransport, Error> {
		let deadline = Instant::now() + timeout;
		let (host, port) = split_host_port(addr)?;
		let resolved = crate::util::deadline(Some(deadline), Phase::Dial, async {
			Ok(self.cache.lookup(host).await?)
		})
		.await?;
		let mut last_error = None;
		for ip in resolved.iter() {
			let target = SocketAddr::new(ip, port);
			match tokio::time::timeout_at(deadline, TcpStream::connect(target)).await {
				Ok(Ok(stream)) => return Ok(transport::tcp(stream)),
				Ok(Err(e)) => {
					tracing::debug!(addr = %target, error = %e, "dial failed");
					last_error = Some(e);
				}
				Err(_) => return Err(Error::Timeout(Phase::Dial)),
			}
		}
		Err(last_error.map_or(Error::Timeout(Phase::Dial), Error::from))
	}
}

impl Dial for TcpDialer {
	fn dial<'a>(&'a self, addr: &'a str, timeout: Duration) -> BoxFuture<'a, Result<BoxTransport, Error>> {
		Box::pin(self.dial_tcp(addr, timeout))
	}
}

/// Splits `host:port`, removing the brackets of an IPv6 literal.
///
/// # Errors
/// This function returns an error if the port is missing or not a number.
pub(crate) fn split_host_port(addr: &str) -> io::Result<(&str, u16)> {
	let invalid = || io::Error::new(io::ErrorKind::InvalidInput, format!("invalid address {addr:?}"));
	let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
	let port = port.parse().map_err(|_| invalid())?;
	let host = host
		.strip_prefix('[')
		.and_then(|h| h.strip_suffix(']'))
		.unwrap_or(host);
	if host.is_empty() {
		return Err(invalid());
	}
	Ok((host, port))
}

#[cfg(test)]
mod test {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use tracing_test::traced_test;

	/// A resolver that counts its calls and fails after the first `ok` of them.
	struct Counting {
		calls: Arc<AtomicUsize>,
		ok: usize,
	}

	impl Resolve for Counting {
		fn resolve<'a>(&'a self, _: &'a str) -> BoxFuture<'a, io::Result<Vec<IpAddr>>> {
			let n = self.calls.fetch_add(1, Ordering::SeqCst);
			let ok = n < self.ok;
			Box::pin(async move {
				if ok {
					Ok(vec![IpAddr::from([127, 0, 0, 1]), IpAddr::from([127, 0, 0, 2])])
				} else {
					Err(io::Error::new(io::ErrorKind::Other, "resolver down"))
				}
			})
		}
	}

	/// Tests splitting addresses.
	#[test]
	fn test_split_host_port() {
		assert_eq!(split_host_port("example.com:80").unwrap(), ("example.com", 80));
		assert_eq!(split_host_port("[::1]:8443").unwrap(), ("::1", 8443));
		assert!(split_host_port("example.com").is_err());
		assert!(split_host_port(":80").is_err());
		assert!(split_host_port("host:http").is_err());
	}

	/// Tests caching and round-robin rotation.
	#[tokio::test]
	async fn test_cache_hit() {
		let calls = Arc::new(AtomicUsize::new(0));
		let cache = ResolveCache::new(
			Counting {
				calls: Arc::clone(&calls),
				ok: usize::MAX,
			},
			Duration::from_secs(60),
		);
		let first: Vec<_> = cache.lookup("upstream").await.unwrap().iter().collect();
		let second: Vec<_> = cache.lookup("upstream").await.unwrap().iter().collect();
		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert_eq!(first[0], second[1]);
		assert_eq!(first[1], second[0]);

		let literal: Vec<_> = cache.lookup("10.1.2.3").await.unwrap().iter().collect();
		assert_eq!(literal, [IpAddr::from([10, 1, 2, 3])]);
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	/// Tests that a failed refresh falls back to the stale addresses.
	#[tokio::test]
	#[traced_test]
	async fn test_stale_on_refresh_failure() {
		let calls = Arc::new(AtomicUsize::new(0));
		let cache = ResolveCache::new(
			Counting {
				calls: Arc::clone(&calls),
				ok: 1,
			},
			Duration::from_millis(20),
		);
		assert!(cache.lookup("upstream").await.is_ok());
		tokio::time::sleep(Duration::from_millis(30)).await;
		let stale = cache.lookup("upstream").await.unwrap();
		assert_eq!(stale.iter().count(), 2);
		assert_eq!(calls.load(Ordering::SeqCst), 2);
		assert!(logs_contain("using stale ones"));

		// The flag is cleared, so the next caller tries again.
		let _ = cache.lookup("upstream").await.unwrap();
		assert_eq!(calls.load(Ordering::SeqCst), 3);
		assert!(cache.lookup("elsewhere").await.is_err());
	}

	/// Tests dialing a local listener and a port nobody listens on.
	#[tokio::test]
	async fn test_dial() {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap().to_string();
		let dialer = TcpDialer::default();
		assert!(dialer.dial(&addr, Duration::from_secs(2)).await.is_ok());
		drop(listener);
		assert!(dialer.dial(&addr, Duration::from_secs(2)).await.is_err());
	}
}
