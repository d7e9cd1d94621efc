//! Common types shared across the sequence data archiver crates.

pub mod descriptor;
pub mod error;
pub mod locator;

pub use descriptor::{
    BatchResult, FileDescriptor, FileResult, FileStatus, TransferBatch, NOT_FOUND_MESSAGE,
};
pub use error::{ArchiveError, ArchiveResult};
pub use locator::{RemoteTarget, SourceLocator};
