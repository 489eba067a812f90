//! Status codes.

/// 200 OK.
pub const OK: u16 = 200;

/// 101 Switching Protocols.
pub const SWITCHING_PROTOCOLS: u16 = 101;

/// 100 Continue.
pub const CONTINUE: u16 = 100;

/// Returns the canonical reason phrase of a status code, or `"Unknown Status Code"`.
pub fn reason(code: u16) -> &'static str {
	match code {
		100 => "Continue",
		101 => "Switching Protocols",
		102 => "Processing",
		103 => "Early Hints",
		200 => "OK",
		201 => "Created",
		202 => "Accepted",
		203 => "Non-Authoritative Information",
		204 => "No Content",
		205 => "Reset Content",
		206 => "Partial Content",
		207 => "Multi-Status",
		208 => "Already Reported",
		226 => "IM Used",
		300 => "Multiple Choices",
		301 => "Moved Permanently",
		302 => "Found",
		303 => "See Other",
		304 => "Not Modified",
		305 => "Use Proxy",
		307 => "Temporary Redirect",
		308 => "Permanent Redirect",
		400 => "Bad Request",
		401 => "Unauthorized",
		402 => "Payment Required",
		403 => "Forbidden",
		404 => "Not Found",
		405 => "Method Not Allowed",
		406 => "Not Acceptable",
		407 => "Proxy Authentication Required",
		408 => "Request Timeout",
		409 => "Conflict",
		410 => "Gone",
		411 => "Length Required",
		412 => "Precondition Failed",
		413 => "Request Entity Too Large",
		414 => "Request URI Too Long",
		415 => "Unsupported Media Type",
		416 => "Requested Range Not Satisfiable",
		417 => "Expectation Failed",
		418 => "I'm a teapot",
		421 => "Misdirected Request",
		422 => "Unprocessable Entity",
		423 => "Locked",
		424 => "Failed Dependency",
		425 => "Too Early",
		426 => "Upgrade Required",
		428 => "Precondition Required",
		429 => "Too Many Requests",
		431 => "Request Header Fields Too Large",
		451 => "Unavailable For Legal Reasons",
		500 => "Internal Server Error",
		501 => "Not Implemented",
		502 => "Bad Gateway",
		503 => "Service Unavailable",
		504 => "Gateway Timeout",
		505 => "HTTP Version Not Supported",
		506 => "Variant Also Negotiates",
		507 => "Insufficient Storage",
		508 => "Loop Detected",
		510 => "Not Extended",
		511 => "Network Authentication Required",
		_ => "Unknown Status Code",
	}
}

/// Checks whether a status code asks the client to follow `Location`.
pub fn is_redirect(code: u16) -> bool {
	matches!(code, 301 | 302 | 303 | 307 | 308)
}

/// Checks whether a response with this status code never carries a body.
pub fn is_bodyless(code: u16) -> bool {
	(100..200).contains(&code) || code == 204 || code == 304
}

#[cfg(test)]
mod test {
	use super::*;

	/// Tests the classification helpers.
	#[test]
	fn test_classes() {
		assert!(is_redirect(308));
		assert!(!is_redirect(304));
		assert!(is_bodyless(101));
		assert!(is_bodyless(304));
		assert!(!is_bodyless(200));
		assert_eq!(reason(404), "Not Found");
		assert_eq!(reason(299), "Unknown Status Code");
	}
}
