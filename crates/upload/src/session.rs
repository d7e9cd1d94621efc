//! Session traits and the scoped session guard.

use std::io::Write;
use std::ops::{Deref, DerefMut};

use tracing::warn;

use archive_common::ArchiveResult;

use crate::listing::RemoteEntry;

/// Callback that writes one object's content into the remote sink.
pub type StoreFn<'a> = dyn FnMut(&mut dyn Write) -> ArchiveResult<()> + 'a;

/// One authenticated control connection to the upload area.
///
/// Sessions keep a working directory and are not shareable between threads;
/// every worker opens its own.
pub trait RemoteSession: Send {
    /// Current working directory.
    fn pwd(&mut self) -> ArchiveResult<String>;

    fn cwd(&mut self, path: &str) -> ArchiveResult<()>;

    fn mkdir(&mut self, name: &str) -> ArchiveResult<()>;

    /// Entries of the current working directory.
    fn list(&mut self) -> ArchiveResult<Vec<RemoteEntry>>;

    /// Size of a file in the current directory as reported by the server.
    fn size(&mut self, name: &str) -> ArchiveResult<u64>;

    /// Create `name` in the current directory and let `write` fill it.
    ///
    /// The data connection is finalized by the session whether or not
    /// `write` succeeds.
    fn store(&mut self, name: &str, write: &mut StoreFn<'_>) -> ArchiveResult<()>;

    fn close(&mut self) -> ArchiveResult<()>;
}

/// Opens new sessions.
pub trait Connector: Send + Sync {
    fn connect(&self) -> ArchiveResult<Box<dyn RemoteSession>>;
}

/// A session that is closed when dropped.
pub struct Session {
    inner: Box<dyn RemoteSession>,
    closed: bool,
}

impl Session {
    pub fn open(connector: &dyn Connector) -> ArchiveResult<Self> {
        Ok(Self {
            inner: connector.connect()?,
            closed: false,
        })
    }

    /// Close once the work is done. A failing `QUIT` is logged, not returned.
    pub fn finish(mut self) {
        self.closed = true;
        if let Err(e) = self.inner.close() {
            warn!(error = %e, "Upload session did not close cleanly");
        }
    }
}

impl Deref for Session {
    type Target = dyn RemoteSession;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl DerefMut for Session {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.inner.close() {
                warn!(error = %e, "Failed to close upload session");
            }
        }
    }
}
