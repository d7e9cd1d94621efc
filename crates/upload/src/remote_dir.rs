//! Directory and file lookups in the session's current remote directory.
//!
//! All lookups are list based: servers disagree on `MLST`/`STAT` support but
//! every one of them answers `LIST`.

use tracing::{debug, info};

use archive_common::ArchiveResult;

use crate::session::RemoteSession;

/// Make sure `name` exists as a directory here, then change into it.
pub fn ensure_dir(session: &mut dyn RemoteSession, name: &str) -> ArchiveResult<()> {
    if !dir_exists(session, name)? {
        info!(dir = %name, "Creating remote directory");
        session.mkdir(name)?;
    }
    session.cwd(name)
}

pub fn dir_exists(session: &mut dyn RemoteSession, name: &str) -> ArchiveResult<bool> {
    Ok(session
        .list()?
        .iter()
        .any(|entry| entry.is_dir && entry.name == name))
}

pub fn file_exists(session: &mut dyn RemoteSession, name: &str) -> ArchiveResult<bool> {
    Ok(session
        .list()?
        .iter()
        .any(|entry| !entry.is_dir && entry.name == name))
}

/// Size of a remote file, or `None` when the server will not tell us.
///
/// Some servers refuse `SIZE` for certain files; the listing's size column is
/// used as a fallback.
pub fn file_size(session: &mut dyn RemoteSession, name: &str) -> ArchiveResult<Option<u64>> {
    match session.size(name) {
        Ok(size) => Ok(Some(size)),
        Err(e) => {
            debug!(file = %name, error = %e, "SIZE refused, falling back to listing");
            Ok(session
                .list()?
                .into_iter()
                .find(|entry| !entry.is_dir && entry.name == name)
                .and_then(|entry| entry.size))
        }
    }
}
