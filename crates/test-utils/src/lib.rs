//! Shared test utilities for the archiver workspace.
//!
//! This crate provides common testing infrastructure including:
//! - An in-memory source store ([`MemorySource`])
//! - An in-memory upload area ([`MemoryRemote`])
//! - Sequence data generators and gzip helpers
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{fixtures, MemoryRemote, MemorySource};
//! ```

pub mod fixtures;
pub mod remote;
pub mod source;

pub use remote::MemoryRemote;
pub use source::MemorySource;

/// Assert the status of every file in a batch, in order.
///
/// # Usage
///
/// ```ignore
/// use archive_common::FileStatus;
/// use test_utils::assert_statuses;
///
/// assert_statuses!(batch, [FileStatus::NotFound, FileStatus::Archived]);
/// ```
#[macro_export]
macro_rules! assert_statuses {
    ($batch:expr, [$($status:expr),* $(,)?]) => {{
        let actual: Vec<_> = $batch.files.iter().map(|f| f.status).collect();
        let expected = vec![$($status),*];
        if actual != expected {
            let errors: Vec<_> = $batch.files.iter().map(|f| (&f.name, &f.error)).collect();
            panic!(
                "assertion failed: batch statuses\n  actual: `{:?}`,\nexpected: `{:?}`,\n  errors: `{:?}`",
                actual, expected, errors
            );
        }
    }};
}

#[cfg(test)]
mod tests {
    use archive_common::{FileStatus, TransferBatch};

    use super::*;

    #[test]
    fn test_assert_statuses_passes() {
        let source = MemorySource::new();
        let file = source.add(fixtures::DEV_BUCKET, fixtures::SUBMISSION, "a.txt", b"a".to_vec());
        let batch = TransferBatch::new("sub", vec![file]);
        assert_statuses!(batch, [FileStatus::Pending]);
    }

    #[test]
    #[should_panic(expected = "batch statuses")]
    fn test_assert_statuses_fails() {
        let batch = TransferBatch::new("sub", vec![]);
        assert_statuses!(batch, [FileStatus::Archived]);
    }
}
