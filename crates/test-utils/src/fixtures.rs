//! Common test fixtures for archiver tests.
//!
//! Bucket names follow the production `<prefix>-<environment>` convention and
//! submission ids are real UUIDs, so locators built from them place correctly.

use std::io::{Read, Write};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use archive_common::SourceLocator;

/// Upload bucket of the `dev` environment.
pub const DEV_BUCKET: &str = "org-hca-data-archive-upload-dev";

/// Upload bucket of the `prod` environment.
pub const PROD_BUCKET: &str = "org-hca-data-archive-upload-prod";

pub const SUBMISSION: &str = "0169d6f3-f65b-4d8a-b04c-857eec3b805e";

pub const OTHER_SUBMISSION: &str = "9b1e4d3c-2a57-4f8e-9c61-0d2f7a5b8e14";

/// Locator of `name` inside a submission's key prefix.
pub fn locator(bucket: &str, submission: &str, name: &str) -> SourceLocator {
    SourceLocator::new(bucket, format!("{}/{}", submission, name))
}

/// Gzip `data` as a single member.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("write to Vec cannot fail");
    encoder.finish().expect("write to Vec cannot fail")
}

/// Decompress every member of a gzip stream.
pub fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    MultiGzDecoder::new(data)
        .read_to_end(&mut out)
        .expect("invalid gzip data");
    out
}

/// Creates FASTQ-like text of exactly `len` bytes.
///
/// The content is deterministic and highly compressible.
pub fn sequence_data(len: usize) -> Vec<u8> {
    const RECORD: &[u8] = b"@SRR3562314.1 1 length=36\nACGTTGCAAGCTTAGCCGATAGGCTTACGATCGATG\n+\nIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIIII\n";
    RECORD.iter().copied().cycle().take(len).collect()
}

/// Creates `len` pseudo-random bytes from `seed`.
///
/// Poorly compressible, and never starts with the gzip magic number.
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    let mut data: Vec<u8> = (0..len)
        .map(|_| {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect();
    if let Some(first) = data.first_mut() {
        if *first == 0x1f {
            *first = 0x00;
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_data_has_exact_length() {
        assert_eq!(sequence_data(0).len(), 0);
        assert_eq!(sequence_data(1000).len(), 1000);
        assert!(sequence_data(10).starts_with(b"@SRR"));
    }

    #[test]
    fn test_random_bytes_are_deterministic() {
        assert_eq!(random_bytes(64, 7), random_bytes(64, 7));
        assert_ne!(random_bytes(64, 7), random_bytes(64, 8));
    }

    #[test]
    fn test_gzip_round_trip() {
        let data = sequence_data(4096);
        let packed = gzip(&data);
        assert_eq!(&packed[..2], &[0x1f, 0x8b]);
        assert_eq!(gunzip(&packed), data);
    }

    #[test]
    fn test_locator_uses_submission_prefix() {
        let locator = locator(DEV_BUCKET, SUBMISSION, "a.fastq");
        assert_eq!(locator.key, format!("{}/a.fastq", SUBMISSION));
    }
}
