//! In-memory upload area.
//!
//! Behaves like a strict FTP server: `MKD` on an existing directory fails,
//! `CWD` into a missing directory fails, and an interrupted `STOR` leaves the
//! partial file behind.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use archive_common::{ArchiveError, ArchiveResult};
use upload::{Connector, RemoteEntry, RemoteSession, StoreFn};

#[derive(Debug, Default)]
struct RemoteState {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    refuse_size: bool,
    fail_mkdir: bool,
    fail_store: Option<String>,
    fail_close: bool,
    connects: usize,
    closes: usize,
    stores: usize,
    mkdirs: usize,
    open: usize,
    max_open: usize,
}

/// Shared in-memory upload area. Clones refer to the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pre-populate a file, creating its parent directories.
    pub fn put_file(&self, path: &str, content: impl Into<Vec<u8>>) {
        let path = resolve("/", path);
        let mut state = self.state();
        let mut dir = parent(&path);
        while dir != "/" {
            state.dirs.insert(dir.clone());
            dir = parent(&dir);
        }
        state.files.insert(path, content.into());
    }

    pub fn put_dir(&self, path: &str) {
        let path = resolve("/", path);
        let mut state = self.state();
        let mut dir = path;
        while dir != "/" {
            state.dirs.insert(dir.clone());
            dir = parent(&dir);
        }
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(&resolve("/", path)).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        let path = resolve("/", path);
        path == "/" || self.state().dirs.contains(&path)
    }

    pub fn store_count(&self) -> usize {
        self.state().stores
    }

    pub fn mkdir_count(&self) -> usize {
        self.state().mkdirs
    }

    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    pub fn close_count(&self) -> usize {
        self.state().closes
    }

    /// Highest number of sessions open at the same time.
    pub fn max_concurrent_sessions(&self) -> usize {
        self.state().max_open
    }

    /// Make `SIZE` fail for every file, like servers that refuse it.
    pub fn refuse_size(&self, refuse: bool) {
        self.state().refuse_size = refuse;
    }

    pub fn fail_mkdir(&self, fail: bool) {
        self.state().fail_mkdir = fail;
    }

    /// Make `store` of any name containing `pattern` fail after writing.
    pub fn fail_store_of(&self, pattern: impl Into<String>) {
        self.state().fail_store = Some(pattern.into());
    }

    /// Make `QUIT` fail. The session still counts as closed.
    pub fn fail_close(&self, fail: bool) {
        self.state().fail_close = fail;
    }
}

impl Connector for MemoryRemote {
    fn connect(&self) -> ArchiveResult<Box<dyn RemoteSession>> {
        let mut state = self.state();
        state.connects += 1;
        state.open += 1;
        state.max_open = state.max_open.max(state.open);
        Ok(Box::new(MemorySession {
            remote: self.clone(),
            cwd: "/".to_string(),
            closed: false,
        }))
    }
}

/// A session against a [`MemoryRemote`].
#[derive(Debug)]
pub struct MemorySession {
    remote: MemoryRemote,
    cwd: String,
    closed: bool,
}

impl RemoteSession for MemorySession {
    fn pwd(&mut self) -> ArchiveResult<String> {
        Ok(self.cwd.clone())
    }

    fn cwd(&mut self, path: &str) -> ArchiveResult<()> {
        let target = resolve(&self.cwd, path);
        if !self.remote.has_dir(&target) {
            return Err(ArchiveError::Remote(format!(
                "550 {}: No such directory",
                target
            )));
        }
        self.cwd = target;
        Ok(())
    }

    fn mkdir(&mut self, name: &str) -> ArchiveResult<()> {
        let target = resolve(&self.cwd, name);
        let mut state = self.remote.state();
        if state.fail_mkdir {
            return Err(ArchiveError::Remote(format!(
                "550 {}: Permission denied",
                target
            )));
        }
        if state.dirs.contains(&target) || state.files.contains_key(&target) {
            return Err(ArchiveError::Remote(format!("550 {}: File exists", target)));
        }
        state.dirs.insert(target);
        state.mkdirs += 1;
        Ok(())
    }

    fn list(&mut self) -> ArchiveResult<Vec<RemoteEntry>> {
        let state = self.remote.state();
        let dirs = state
            .dirs
            .iter()
            .filter(|d| parent(d) == self.cwd)
            .map(|d| RemoteEntry::dir(base_name(d)));
        let files = state
            .files
            .iter()
            .filter(|(f, _)| parent(f) == self.cwd)
            .map(|(f, data)| RemoteEntry::file(base_name(f), data.len() as u64));
        Ok(dirs.chain(files).collect())
    }

    fn size(&mut self, name: &str) -> ArchiveResult<u64> {
        let target = resolve(&self.cwd, name);
        let state = self.remote.state();
        if state.refuse_size {
            return Err(ArchiveError::Remote(
                "550 SIZE not allowed in ASCII mode".to_string(),
            ));
        }
        state
            .files
            .get(&target)
            .map(|data| data.len() as u64)
            .ok_or_else(|| ArchiveError::Remote(format!("550 {}: No such file", target)))
    }

    fn store(&mut self, name: &str, write: &mut StoreFn<'_>) -> ArchiveResult<()> {
        let target = resolve(&self.cwd, name);
        self.remote.state().stores += 1;

        let mut sink = Vec::new();
        let written = write(&mut sink);

        let mut state = self.remote.state();
        let injected = state
            .fail_store
            .as_deref()
            .map_or(false, |pattern| name.contains(pattern));
        state.files.insert(target.clone(), sink);
        written?;
        if injected {
            return Err(ArchiveError::Remote(format!(
                "426 {}: Connection closed; transfer aborted",
                target
            )));
        }
        Ok(())
    }

    fn close(&mut self) -> ArchiveResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.remote.state();
        state.closes += 1;
        state.open = state.open.saturating_sub(1);
        if state.fail_close {
            return Err(ArchiveError::Remote("421 QUIT timeout".to_string()));
        }
        Ok(())
    }
}

fn resolve(cwd: &str, path: &str) -> String {
    let mut parts: Vec<&str> = if path.starts_with('/') {
        Vec::new()
    } else {
        cwd.split('/').filter(|s| !s.is_empty()).collect()
    };
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((dir, _)) => dir.to_string(),
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
