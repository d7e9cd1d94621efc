//! Streaming transfer of sequence files from object storage to the upload area.
//!
//! Files are read, optionally gzip-compressed, MD5-hashed and sent in a single
//! pass, so memory use is bounded by the block size rather than the file size.

pub mod compressor;
pub mod coordinator;
pub mod progress;
pub mod streamer;

pub use compressor::{
    checksum_bytes, checksum_file_name, is_gzip, ChecksumingCompressor, StreamOutcome,
    DEFAULT_BLOCK_SIZE, DEFAULT_LEVEL, GZIP_MAGIC,
};
pub use coordinator::{CoordinatorConfig, TransferCoordinator};
pub use progress::TransferProgress;
pub use streamer::FileStreamer;
