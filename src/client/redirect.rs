//! Following redirect responses.

use crate::error::Error;
use crate::message::{Request, Response};
use crate::status;
use crate::transport::BoxFuture;
use crate::util::deadline_after;
use tokio::time::Instant;

/// The number of redirects [`Client::get`](super::Client::get) follows.
pub const DEFAULT_MAX_REDIRECTS: usize = 16;

/// Something that sends one request and reads its response.
pub(crate) trait Exchange: Sync {
	/// Sends `req` and reads the response into `resp`, giving up at `deadline`.
	fn exchange<'a>(
		&'a self,
		req: &'a mut Request,
		resp: &'a mut Response,
		deadline: Option<Instant>,
	) -> BoxFuture<'a, Result<(), Error>>;
}

/// Sends `req` through `client`, reissuing it at the `Location` of every redirect response until
/// a response is not a redirect.
///
/// The request’s timeout covers the whole chain. `303 See Other`, and `301` or `302` in reply to
/// `POST`, turn the next request into a bodyless `GET`.
pub(crate) async fn follow<C: Exchange + ?Sized>(
	client: &C,
	req: &mut Request,
	resp: &mut Response,
	max_redirects: usize,
) -> Result<(), Error> {
	let deadline = deadline_after(req.timeout());
	let mut redirects = 0;
	loop {
		client.exchange(req, resp, deadline).await?;
		let code = resp.status();
		if !status::is_redirect(code) {
			return Ok(());
		}
		if redirects >= max_redirects {
			return Err(Error::TooManyRedirects);
		}
		redirects += 1;

		let location = match resp.header().get(b"Location") {
			Some(location) if !location.is_empty() => String::from_utf8_lossy(location).into_owned(),
			_ => return Err(Error::MissingRedirectLocation),
		};
		let next = match req.uri() {
			Some(base) => base.join(&location)?,
			None => url::Url::parse(&location)?,
		};
		tracing::debug!(status = code, location = %next, "following redirect");
		if code == 303 || (req.header().method() == b"POST" && (code == 301 || code == 302)) {
			req.header_mut().set_method(b"GET");
			req.body_mut().clear();
			req.header_mut().remove(b"Content-Type");
		}
		req.set_url(next);
	}
}
