//! The read interface the transfer pipeline consumes.

use std::io::Read;

use archive_common::{ArchiveError, ArchiveResult, SourceLocator};

/// Blocking read access to source objects.
///
/// Implementations are called from worker threads, never from async tasks.
pub trait SourceStore: Send + Sync {
    /// Size of the object, or `None` if it does not exist.
    fn head(&self, locator: &SourceLocator) -> ArchiveResult<Option<u64>>;

    /// Open a sequential reader over the whole object.
    fn open_read(&self, locator: &SourceLocator) -> ArchiveResult<Box<dyn Read + Send>>;

    /// Read up to `len` bytes starting at `offset`. Short objects return fewer bytes.
    fn peek(&self, locator: &SourceLocator, offset: u64, len: usize) -> ArchiveResult<Vec<u8>>;

    fn exists(&self, locator: &SourceLocator) -> ArchiveResult<bool> {
        Ok(self.head(locator)?.is_some())
    }

    fn size(&self, locator: &SourceLocator) -> ArchiveResult<u64> {
        self.head(locator)?
            .ok_or_else(|| ArchiveError::SourceNotFound(locator.to_string()))
    }
}
