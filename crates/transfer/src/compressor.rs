//! Single-pass block compressor and checksummer.
//!
//! Every block read from the source is either gzip-compressed on its own (one
//! gzip member per block) or passed through, then hashed and written. The hash
//! therefore always covers exactly the bytes the sink received. Concatenated
//! gzip members form a valid gzip file, so readers decompress the upload as one
//! stream.

use std::io::{self, ErrorKind, Read, Write};

use flate2::write::GzEncoder;
use flate2::Compression;
use md5::{Digest, Md5};

/// Default block size: 8 KiB.
pub const DEFAULT_BLOCK_SIZE: usize = 8 * 1024;

/// Default gzip level, matching zlib's.
pub const DEFAULT_LEVEL: u32 = 6;

/// Leading bytes of every gzip stream.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const CHECKSUM_SUFFIX: &str = ".md5";

/// Whether `head` starts with the gzip magic number.
pub fn is_gzip(head: &[u8]) -> bool {
    head.starts_with(&GZIP_MAGIC)
}

/// Name of the sidecar object holding the checksum of `file_name`.
pub fn checksum_file_name(file_name: &str) -> String {
    format!("{}{}", file_name, CHECKSUM_SUFFIX)
}

/// Lowercase hex MD5 of `data`.
pub fn checksum_bytes(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Result of streaming one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Lowercase hex MD5 of the bytes written.
    pub checksum: String,
    pub bytes_written: u64,
    pub bytes_read: u64,
}

/// Streams a source into a sink block by block.
#[derive(Debug, Clone)]
pub struct ChecksumingCompressor {
    block_size: usize,
    level: Compression,
}

impl Default for ChecksumingCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl ChecksumingCompressor {
    /// If `block_size` is 0, [`DEFAULT_BLOCK_SIZE`] is used.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: if block_size == 0 {
                DEFAULT_BLOCK_SIZE
            } else {
                block_size
            },
            level: Compression::new(DEFAULT_LEVEL),
        }
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = Compression::new(level.min(9));
        self
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Copy `source` into `sink`, compressing each block when `compress` is set.
    ///
    /// `on_progress` receives the number of source bytes consumed per block.
    pub fn stream<R, W, F>(
        &self,
        source: &mut R,
        sink: &mut W,
        compress: bool,
        mut on_progress: F,
    ) -> io::Result<StreamOutcome>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
        F: FnMut(u64),
    {
        let mut hasher = Md5::new();
        let mut block = vec![0u8; self.block_size];
        let mut bytes_read = 0u64;
        let mut bytes_written = 0u64;

        loop {
            let n = read_block(source, &mut block)?;
            if n == 0 {
                break;
            }

            if compress {
                let member = self.gzip(&block[..n])?;
                hasher.update(&member);
                sink.write_all(&member)?;
                bytes_written += member.len() as u64;
            } else {
                hasher.update(&block[..n]);
                sink.write_all(&block[..n])?;
                bytes_written += n as u64;
            }

            bytes_read += n as u64;
            on_progress(n as u64);
        }

        // An empty upload is not valid gzip; send one empty member instead.
        if compress && bytes_read == 0 {
            let member = self.gzip(&[])?;
            hasher.update(&member);
            sink.write_all(&member)?;
            bytes_written += member.len() as u64;
        }

        sink.flush()?;

        Ok(StreamOutcome {
            checksum: hex::encode(hasher.finalize()),
            bytes_written,
            bytes_read,
        })
    }

    fn gzip(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), self.level);
        encoder.write_all(data)?;
        encoder.finish()
    }
}

/// Fill `buf` from `source`, stopping early only at end of input.
fn read_block<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::MultiGzDecoder;

    /// Reader that hands out at most `step` bytes per call.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        b"ACGTTGCAAGCT\n".iter().copied().cycle().take(len).collect()
    }

    #[test]
    fn test_gzip_magic_detection() {
        assert!(is_gzip(&[0x1f, 0x8b]));
        assert!(is_gzip(&[0x1f, 0x8b, 0x08]));
        assert!(!is_gzip(&[0x1f]));
        assert!(!is_gzip(b"@SRR"));
        assert!(!is_gzip(&[]));
    }

    #[test]
    fn test_checksum_file_name() {
        assert_eq!(checksum_file_name("reads.fastq.gz"), "reads.fastq.gz.md5");
    }

    #[test]
    fn test_checksum_bytes_known_value() {
        assert_eq!(checksum_bytes(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(checksum_bytes(b"hello world"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_raw_stream_is_byte_identical() {
        let data = sample(20_000);
        let mut sink = Vec::new();
        let outcome = ChecksumingCompressor::new(4096)
            .stream(&mut data.as_slice(), &mut sink, false, |_| {})
            .unwrap();

        assert_eq!(sink, data);
        assert_eq!(outcome.bytes_read, 20_000);
        assert_eq!(outcome.bytes_written, 20_000);
        assert_eq!(outcome.checksum, checksum_bytes(&data));
    }

    #[test]
    fn test_compressed_checksum_covers_sent_bytes() {
        let data = sample(50_000);
        let mut sink = Vec::new();
        let outcome = ChecksumingCompressor::new(4096)
            .stream(&mut data.as_slice(), &mut sink, true, |_| {})
            .unwrap();

        assert!(is_gzip(&sink));
        assert_eq!(outcome.bytes_written, sink.len() as u64);
        assert_eq!(outcome.checksum, checksum_bytes(&sink));
        assert_ne!(outcome.checksum, checksum_bytes(&data));

        let mut restored = Vec::new();
        MultiGzDecoder::new(sink.as_slice())
            .read_to_end(&mut restored)
            .unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_progress_counts_source_bytes() {
        let data = sample(10_000);
        let mut reported = Vec::new();
        let mut sink = Vec::new();
        ChecksumingCompressor::new(4096)
            .stream(&mut data.as_slice(), &mut sink, true, |n| reported.push(n))
            .unwrap();

        assert_eq!(reported, vec![4096, 4096, 1808]);
        assert!((sink.len() as u64) < 10_000);
    }

    #[test]
    fn test_short_reads_still_fill_blocks() {
        let data = sample(9000);
        let mut reported = Vec::new();
        let mut sink = Vec::new();
        let mut source = Trickle {
            data: &data,
            step: 7,
        };
        ChecksumingCompressor::new(4096)
            .stream(&mut source, &mut sink, false, |n| reported.push(n))
            .unwrap();

        assert_eq!(reported, vec![4096, 4096, 808]);
        assert_eq!(sink, data);
    }

    #[test]
    fn test_empty_source_compressed_is_valid_gzip() {
        let mut sink = Vec::new();
        let outcome = ChecksumingCompressor::default()
            .stream(&mut io::empty(), &mut sink, true, |_| {})
            .unwrap();

        assert_eq!(outcome.bytes_read, 0);
        assert!(outcome.bytes_written > 0);
        let mut restored = Vec::new();
        MultiGzDecoder::new(sink.as_slice())
            .read_to_end(&mut restored)
            .unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn test_empty_source_raw_writes_nothing() {
        let mut sink = Vec::new();
        let outcome = ChecksumingCompressor::default()
            .stream(&mut io::empty(), &mut sink, false, |_| {})
            .unwrap();
        assert!(sink.is_empty());
        assert_eq!(outcome.checksum, "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_level_zero_stores_blocks() {
        let data = sample(8192);
        let compress = |compressor: ChecksumingCompressor| {
            let mut sink = Vec::new();
            compressor
                .stream(&mut data.as_slice(), &mut sink, true, |_| {})
                .unwrap();
            sink
        };

        let stored = compress(ChecksumingCompressor::new(4096).with_level(0));
        let packed = compress(ChecksumingCompressor::new(4096));
        assert!(stored.len() > data.len());
        assert!(packed.len() < stored.len());

        let mut restored = Vec::new();
        MultiGzDecoder::new(stored.as_slice())
            .read_to_end(&mut restored)
            .unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_zero_block_size_uses_default() {
        assert_eq!(ChecksumingCompressor::new(0).block_size(), DEFAULT_BLOCK_SIZE);
    }
}
