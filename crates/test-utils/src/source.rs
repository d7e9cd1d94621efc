//! In-memory source store.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex, MutexGuard};

use archive_common::{ArchiveError, ArchiveResult, FileDescriptor, SourceLocator};
use storage::SourceStore;

use crate::fixtures;

#[derive(Debug, Default)]
struct SourceState {
    objects: BTreeMap<(String, String), Vec<u8>>,
    failing: BTreeSet<String>,
    panicking: BTreeSet<String>,
    heads: usize,
    reads: usize,
}

/// Shared in-memory object store. Clones refer to the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    state: Arc<Mutex<SourceState>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn put(&self, locator: &SourceLocator, data: impl Into<Vec<u8>>) {
        self.state().objects.insert(
            (locator.bucket.clone(), locator.key.clone()),
            data.into(),
        );
    }

    /// Store `data` under the submission prefix and return a descriptor for it.
    pub fn add(
        &self,
        bucket: &str,
        submission: &str,
        name: &str,
        data: impl Into<Vec<u8>>,
    ) -> FileDescriptor {
        let locator = fixtures::locator(bucket, submission, name);
        self.put(&locator, data);
        FileDescriptor::new(name, locator)
    }

    /// A descriptor for an object that does not exist.
    pub fn missing(&self, bucket: &str, submission: &str, name: &str) -> FileDescriptor {
        FileDescriptor::new(name, fixtures::locator(bucket, submission, name))
    }

    /// Make every lookup of a key containing `pattern` fail.
    pub fn fail_lookup_of(&self, pattern: impl Into<String>) {
        self.state().failing.insert(pattern.into());
    }

    /// Make opening a key containing `pattern` panic.
    pub fn panic_on_read_of(&self, pattern: impl Into<String>) {
        self.state().panicking.insert(pattern.into());
    }

    pub fn head_count(&self) -> usize {
        self.state().heads
    }

    pub fn read_count(&self) -> usize {
        self.state().reads
    }

    fn object(&self, locator: &SourceLocator) -> ArchiveResult<Option<Vec<u8>>> {
        let state = self.state();
        if state.failing.iter().any(|p| locator.key.contains(p.as_str())) {
            return Err(ArchiveError::Source(format!(
                "Failed to check {}: connection reset",
                locator
            )));
        }
        Ok(state
            .objects
            .get(&(locator.bucket.clone(), locator.key.clone()))
            .cloned())
    }
}

impl SourceStore for MemorySource {
    fn head(&self, locator: &SourceLocator) -> ArchiveResult<Option<u64>> {
        self.state().heads += 1;
        Ok(self.object(locator)?.map(|data| data.len() as u64))
    }

    fn open_read(&self, locator: &SourceLocator) -> ArchiveResult<Box<dyn Read + Send>> {
        let panics = {
            let mut state = self.state();
            state.reads += 1;
            state.panicking.iter().any(|p| locator.key.contains(p.as_str()))
        };
        if panics {
            panic!("injected panic reading {}", locator);
        }
        let data = self
            .object(locator)?
            .ok_or_else(|| ArchiveError::SourceNotFound(locator.to_string()))?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn peek(&self, locator: &SourceLocator, offset: u64, len: usize) -> ArchiveResult<Vec<u8>> {
        let data = self
            .object(locator)?
            .ok_or_else(|| ArchiveError::SourceNotFound(locator.to_string()))?;
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len).min(data.len());
        Ok(data[start..end].to_vec())
    }
}
