use crate::error::ParseError;

/// One header line as it appears on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct RawField<'a> {
	/// The key, exactly as received.
	pub key: &'a [u8],

	/// The value with leading and trailing whitespace removed.
	///
	/// If `folded` is set, the value still contains the line breaks of its continuation lines.
	pub value: &'a [u8],

	/// Whether the value spans more than one line.
	pub folded: bool,
}

/// The result of one scanning step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Scan<'a> {
	/// A complete field.
	Field(RawField<'a>),

	/// The empty line terminating the block.
	End,

	/// The buffer ends before the current line (or the line after it) is complete.
	NeedMore,
}

/// Checks whether a byte is horizontal whitespace.
fn is_space(b: u8) -> bool {
	b == b' ' || b == b'\t'
}

/// Walks through the fields of a header block.
#[derive(Debug)]
pub(crate) struct Scanner<'a> {
	/// The header block, starting at its first field.
	buf: &'a [u8],

	/// The offset of the next unscanned byte.
	pos: usize,
}

impl<'a> Scanner<'a> {
	/// Constructs a scanner over `buf`.
	pub(crate) fn new(buf: &'a [u8]) -> Self {
		Self { buf, pos: 0 }
	}

	/// Returns the number of bytes scanned so far.
	///
	/// After [`Scan::End`] this is the length of the block including the terminating empty line.
	pub(crate) fn position(&self) -> usize {
		self.pos
	}

	/// Scans the next field.
	///
	/// # Errors
	/// This function returns [`ParseError::MissingColon`] if a line ends before any colon, and
	/// [`ParseError::InvalidKey`] if a key is empty or contains whitespace.
	pub(crate) fn next(&mut self) -> Result<Scan<'a>, ParseError> {
		let rest = &self.buf[self.pos..];
		match rest {
			[] | [b'\r'] => return Ok(Scan::NeedMore),
			[b'\r', b'\n', ..] => {
				self.pos += 2;
				return Ok(Scan::End);
			}
			[b'\n', ..] => {
				self.pos += 1;
				return Ok(Scan::End);
			}
			_ => (),
		}

		let colon = match memchr::memchr2(b':', b'\n', rest) {
			None => return Ok(Scan::NeedMore),
			Some(i) if rest[i] == b'\n' => return Err(ParseError::MissingColon),
			Some(i) => i,
		};
		let key = &rest[..colon];
		if key.is_empty() || key.iter().copied().any(is_space) {
			return Err(ParseError::InvalidKey);
		}

		let mut value_start = colon + 1;
		while rest.get(value_start).copied().map_or(false, is_space) {
			value_start += 1;
		}
		let mut line_end = match memchr::memchr(b'\n', &rest[value_start..]) {
			None => return Ok(Scan::NeedMore),
			Some(i) => value_start + i,
		};

		// A following line that starts with whitespace and holds no colon continues this value.
		let mut folded = false;
		loop {
			let next = match rest.get(line_end + 1) {
				None => return Ok(Scan::NeedMore),
				Some(b) => *b,
			};
			if !is_space(next) {
				break;
			}
			let next_end = match memchr::memchr(b'\n', &rest[line_end + 1..]) {
				None => return Ok(Scan::NeedMore),
				Some(i) => line_end + 1 + i,
			};
			if memchr::memchr(b':', &rest[line_end + 1..next_end]).is_some() {
				break;
			}
			folded = true;
			line_end = next_end;
		}

		let mut value = &rest[value_start.min(line_end)..line_end];
		while let [head @ .., b'\r' | b' ' | b'\t'] = value {
			value = head;
		}
		self.pos += line_end + 1;
		Ok(Scan::Field(RawField { key, value, folded }))
	}
}

/// Appends a scanned value to `dst`.
///
/// For a folded value each line break, together with the indentation that follows it, becomes a
/// single space.
pub(crate) fn append_value(dst: &mut Vec<u8>, raw: &[u8], folded: bool) {
	if !folded {
		dst.extend_from_slice(raw);
		return;
	}
	let mut i = 0;
	while i < raw.len() {
		match raw[i] {
			b'\r' | b'\n' => {
				while i < raw.len() && matches!(raw[i], b'\r' | b'\n' | b' ' | b'\t') {
					i += 1;
				}
				dst.push(b' ');
			}
			b => {
				dst.push(b);
				i += 1;
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	/// Scans a whole block and returns the fields with folding undone.
	fn scan_all(block: &[u8]) -> Result<(Vec<(Vec<u8>, Vec<u8>)>, usize), ParseError> {
		let mut scanner = Scanner::new(block);
		let mut fields = Vec::new();
		loop {
			match scanner.next()? {
				Scan::Field(f) => {
					let mut value = Vec::new();
					append_value(&mut value, f.value, f.folded);
					fields.push((f.key.to_vec(), value));
				}
				Scan::End => return Ok((fields, scanner.position())),
				Scan::NeedMore => panic!("block is incomplete"),
			}
		}
	}

	/// Tests scanning ordinary fields with assorted spacing and line endings.
	#[test]
	fn test_plain() {
		let (fields, len) = scan_all(b"Host: example.com\r\nX-A:1\nX-B:   two words  \r\n\r\nbody").unwrap();
		assert_eq!(len, 47);
		assert_eq!(
			fields,
			vec![
				(b"Host".to_vec(), b"example.com".to_vec()),
				(b"X-A".to_vec(), b"1".to_vec()),
				(b"X-B".to_vec(), b"two words".to_vec()),
			]
		);
	}

	/// Tests that an empty value is accepted.
	#[test]
	fn test_empty_value() {
		let (fields, _) = scan_all(b"X-Empty:\r\nX-Spaces:   \r\n\r\n").unwrap();
		assert_eq!(fields[0].1, b"");
		assert_eq!(fields[1].1, b"");
	}

	/// Tests that continuation lines are merged with single spaces.
	#[test]
	fn test_folding() {
		let (fields, _) =
			scan_all(b"X-Fold: first\r\n  second\r\n\tthird\r\nNext: v\r\n\r\n").unwrap();
		assert_eq!(fields[0], (b"X-Fold".to_vec(), b"first second third".to_vec()));
		assert_eq!(fields[1], (b"Next".to_vec(), b"v".to_vec()));
	}

	/// Tests that an indented line containing a colon is not treated as a continuation.
	#[test]
	fn test_indented_with_colon() {
		let mut scanner = Scanner::new(b"A: 1\r\n B: 2\r\n\r\n");
		match scanner.next().unwrap() {
			Scan::Field(f) => assert!(!f.folded),
			other => panic!("unexpected {other:?}"),
		}
		assert_eq!(scanner.next(), Err(ParseError::InvalidKey));
	}

	/// Tests the malformed line errors.
	#[test]
	fn test_errors() {
		assert_eq!(
			Scanner::new(b"no colon here\r\n\r\n").next(),
			Err(ParseError::MissingColon)
		);
		assert_eq!(
			Scanner::new(b"Bad Key: v\r\n\r\n").next(),
			Err(ParseError::InvalidKey)
		);
		assert_eq!(Scanner::new(b": v\r\n\r\n").next(), Err(ParseError::InvalidKey));
	}

	/// Tests that incomplete input asks for more instead of failing.
	#[test]
	fn test_need_more() {
		assert_eq!(Scanner::new(b"").next(), Ok(Scan::NeedMore));
		assert_eq!(Scanner::new(b"\r").next(), Ok(Scan::NeedMore));
		assert_eq!(Scanner::new(b"Host: exa").next(), Ok(Scan::NeedMore));
		// The field might still be folded.
		assert_eq!(Scanner::new(b"Host: example\r\n").next(), Ok(Scan::NeedMore));
		assert_eq!(
			Scanner::new(b"Host: example\r\n more").next(),
			Ok(Scan::NeedMore)
		);
	}
}
