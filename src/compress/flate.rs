use super::Codec;
use flate2::{Compress, Compression, Crc, Decompress, FlushCompress, FlushDecompress, Status};
use parking_lot::Mutex;
use std::io::{Error, ErrorKind, Read as _, Result};

/// The number of compression levels, 0 through 9.
const LEVELS: usize = 10;

/// The fixed gzip member header: magic, deflate method, no flags, no mtime, unknown OS.
const GZIP_HEADER: [u8; 10] = [0x1F, 0x8B, 8, 0, 0, 0, 0, 0, 0, 0xFF];

/// Idle compressors, one free list per level.
#[derive(Debug)]
struct CompressPool {
	/// Whether the streams carry a zlib wrapper.
	zlib: bool,

	/// Free lists indexed by level.
	levels: [Mutex<Vec<Compress>>; LEVELS],
}

impl CompressPool {
	/// Creates an empty pool.
	fn new(zlib: bool) -> Self {
		Self {
			zlib,
			levels: std::array::from_fn(|_| Mutex::new(Vec::new())),
		}
	}

	/// Compresses all of `src` into `dst` with a pooled stream.
	fn run(&self, src: &[u8], level: u32, dst: &mut Vec<u8>) -> Result<()> {
		let level = std::cmp::min(level as usize, LEVELS - 1);
		let mut stream = self.levels[level]
			.lock()
			.pop()
			.unwrap_or_else(|| Compress::new(Compression::new(level as u32), self.zlib));
		let result = compress_all(&mut stream, src, dst);
		stream.reset();
		self.levels[level].lock().push(stream);
		result
	}
}

/// Feeds `src` through `stream` to the end of the stream.
fn compress_all(stream: &mut Compress, src: &[u8], dst: &mut Vec<u8>) -> Result<()> {
	let start = stream.total_in();
	loop {
		if dst.capacity() - dst.len() < 64 {
			dst.reserve(std::cmp::max(1024, src.len() / 2));
		}
		let consumed = (stream.total_in() - start) as usize;
		let status = stream
			.compress_vec(&src[consumed..], dst, FlushCompress::Finish)
			.map_err(|e| Error::new(ErrorKind::Other, e))?;
		if status == Status::StreamEnd {
			return Ok(());
		}
	}
}

/// Feeds `src` through `stream` until the compressed stream ends.
fn decompress_all(stream: &mut Decompress, src: &[u8], dst: &mut Vec<u8>) -> Result<()> {
	let start = stream.total_in();
	loop {
		if dst.capacity() - dst.len() < 64 {
			dst.reserve(std::cmp::max(1024, src.len() * 2));
		}
		let consumed = (stream.total_in() - start) as usize;
		let before_out = stream.total_out();
		let status = stream
			.decompress_vec(&src[consumed..], dst, FlushDecompress::Finish)
			.map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
		match status {
			Status::StreamEnd => return Ok(()),
			// Neither input consumed nor output produced with room to spare: the input is cut short.
			_ if consumed == src.len() && stream.total_out() == before_out => {
				return Err(ErrorKind::UnexpectedEof.into());
			}
			_ => (),
		}
	}
}

/// The `deflate` coding: a zlib stream.
#[derive(Debug)]
pub struct Deflate {
	/// Idle compressors.
	compressors: CompressPool,

	/// Idle decompressors.
	decompressors: Mutex<Vec<Decompress>>,
}

impl Deflate {
	/// Creates the codec with empty pools.
	pub fn new() -> Self {
		Self {
			compressors: CompressPool::new(true),
			decompressors: Mutex::new(Vec::new()),
		}
	}
}

impl Default for Deflate {
	fn default() -> Self {
		Self::new()
	}
}

impl Codec for Deflate {
	fn name(&self) -> &'static str {
		"deflate"
	}

	fn compress(&self, src: &[u8], level: u32, dst: &mut Vec<u8>) -> Result<()> {
		self.compressors.run(src, level, dst)
	}

	fn decompress(&self, src: &[u8], dst: &mut Vec<u8>) -> Result<()> {
		let mut stream = self
			.decompressors
			.lock()
			.pop()
			.unwrap_or_else(|| Decompress::new(true));
		let result = decompress_all(&mut stream, src, dst);
		stream.reset(true);
		self.decompressors.lock().push(stream);
		result
	}
}

/// The `gzip` coding.
#[derive(Debug)]
pub struct Gzip {
	/// Idle raw deflate compressors.
	compressors: CompressPool,
}

impl Gzip {
	/// Creates the codec with an empty pool.
	pub fn new() -> Self {
		Self {
			compressors: CompressPool::new(false),
		}
	}
}

impl Default for Gzip {
	fn default() -> Self {
		Self::new()
	}
}

impl Codec for Gzip {
	fn name(&self) -> &'static str {
		"gzip"
	}

	fn compress(&self, src: &[u8], level: u32, dst: &mut Vec<u8>) -> Result<()> {
		dst.extend_from_slice(&GZIP_HEADER);
		self.compressors.run(src, level, dst)?;
		let mut crc = Crc::new();
		crc.update(src);
		dst.extend_from_slice(&crc.sum().to_le_bytes());
		dst.extend_from_slice(&crc.amount().to_le_bytes());
		Ok(())
	}

	fn decompress(&self, src: &[u8], dst: &mut Vec<u8>) -> Result<()> {
		let _ = flate2::read::GzDecoder::new(src).read_to_end(dst)?;
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	/// Returns some compressible bytes.
	fn sample() -> Vec<u8> {
		b"the quick brown fox jumps over the lazy dog. "
			.iter()
			.copied()
			.cycle()
			.take(5000)
			.collect()
	}

	/// Tests that gzip output is a standard gzip member.
	#[test]
	fn test_gzip_interop() {
		let gzip = Gzip::new();
		let mut compressed = Vec::new();
		gzip.compress(&sample(), 6, &mut compressed).unwrap();
		assert!(compressed.len() < 5000);
		let mut plain = Vec::new();
		let _ = flate2::read::GzDecoder::new(&compressed[..])
			.read_to_end(&mut plain)
			.unwrap();
		assert_eq!(plain, sample());
	}

	/// Tests that pooled deflate streams produce identical output when reused.
	#[test]
	fn test_deflate_reuse() {
		let deflate = Deflate::new();
		let mut first = Vec::new();
		deflate.compress(&sample(), 9, &mut first).unwrap();
		let mut second = Vec::new();
		deflate.compress(&sample(), 9, &mut second).unwrap();
		assert_eq!(first, second);
		assert_eq!(deflate.compressors.levels[9].lock().len(), 1);
		let mut plain = Vec::new();
		deflate.decompress(&first, &mut plain).unwrap();
		assert_eq!(plain, sample());
	}

	/// Tests that truncated input is an error.
	#[test]
	fn test_deflate_truncated() {
		let deflate = Deflate::new();
		let mut compressed = Vec::new();
		deflate.compress(&sample(), 6, &mut compressed).unwrap();
		compressed.truncate(compressed.len() / 2);
		let mut plain = Vec::new();
		assert!(deflate.decompress(&compressed, &mut plain).is_err());
	}
}
