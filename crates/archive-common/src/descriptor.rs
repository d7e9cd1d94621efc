//! File descriptors and transfer batches.
//!
//! A [`FileDescriptor`] is created by the caller with a name and locator,
//! sized during pre-flight, then handed to exactly one worker which drives it
//! to a terminal state.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, ArchiveResult};
use crate::locator::{RemoteTarget, SourceLocator};

/// Message recorded when a file is missing from the source store.
pub const NOT_FOUND_MESSAGE: &str = "File not found.";

/// Lifecycle state of a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Not yet attempted.
    Pending,
    /// Streamed to the upload area.
    Archived,
    /// Skipped because an identical upload already exists.
    AlreadyUploaded,
    /// Missing from the source store.
    NotFound,
    /// Transfer attempted and failed.
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Archived => "archived",
            FileStatus::AlreadyUploaded => "already_uploaded",
            FileStatus::NotFound => "not_found",
            FileStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, FileStatus::Pending)
    }
}

/// Transfer-tracking record for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileDescriptor {
    /// External identifier used when reporting back upstream.
    pub id: Option<String>,
    pub name: String,
    pub locator: Option<SourceLocator>,
    /// Size at the source, set during pre-flight.
    pub size: Option<u64>,
    /// True until something goes wrong (or the file is skipped).
    pub success: bool,
    pub status: FileStatus,
    pub error: Option<String>,
    /// Whether compression was applied during upload.
    pub compressed: bool,
    /// Lowercase hex MD5 of the uploaded bytes.
    pub checksum: Option<String>,
    /// Bytes written to the upload area.
    pub uploaded_size: Option<u64>,
    /// Remote path of the uploaded file. Fixed before the transfer starts and
    /// only kept when the file ends up in the upload area.
    pub destination_path: Option<String>,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, locator: SourceLocator) -> Self {
        Self {
            id: None,
            name: name.into(),
            locator: Some(locator),
            size: None,
            success: true,
            status: FileStatus::Pending,
            error: None,
            compressed: false,
            checksum: None,
            uploaded_size: None,
            destination_path: None,
        }
    }

    /// A requested file that could not be resolved to any source object.
    pub fn unresolved(id: impl Into<String>) -> Self {
        let id = id.into();
        let mut file = Self {
            id: Some(id.clone()),
            name: id,
            locator: None,
            size: None,
            success: true,
            status: FileStatus::Pending,
            error: None,
            compressed: false,
            checksum: None,
            uploaded_size: None,
            destination_path: None,
        };
        file.mark_not_found();
        file
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Still waiting for a worker.
    pub fn is_eligible(&self) -> bool {
        self.success && self.status == FileStatus::Pending
    }

    /// Upload area placement for this file.
    pub fn target(&self) -> ArchiveResult<RemoteTarget> {
        let locator = self
            .locator
            .as_ref()
            .ok_or_else(|| ArchiveError::SourceNotFound(self.name.clone()))?;
        RemoteTarget::for_locator(locator)
    }

    /// Record the destination path. Once set it cannot change.
    pub fn set_destination(&mut self, path: impl Into<String>) -> ArchiveResult<()> {
        let path = path.into();
        match &self.destination_path {
            Some(existing) if *existing != path => Err(ArchiveError::Internal(format!(
                "destination of {} already fixed at {}",
                self.name, existing
            ))),
            Some(_) => Ok(()),
            None => {
                self.destination_path = Some(path);
                Ok(())
            }
        }
    }

    pub fn mark_archived(&mut self, checksum: String, compressed: bool, uploaded_size: u64) {
        self.checksum = Some(checksum);
        self.compressed = compressed;
        self.uploaded_size = Some(uploaded_size);
        self.success = true;
        self.status = FileStatus::Archived;
        self.error = None;
    }

    pub fn mark_not_found(&mut self) {
        self.mark_failed(FileStatus::NotFound, NOT_FOUND_MESSAGE);
    }

    pub fn mark_failed(&mut self, status: FileStatus, error: impl Into<String>) {
        self.success = false;
        self.status = status;
        self.error = Some(error.into());
        if status != FileStatus::AlreadyUploaded {
            self.destination_path = None;
        }
    }

    /// Record an error, classifying it into the matching status.
    pub fn mark_error(&mut self, err: &ArchiveError) {
        match err {
            ArchiveError::SourceNotFound(_) => self.mark_not_found(),
            ArchiveError::AlreadyUploaded(_) => {
                self.mark_failed(FileStatus::AlreadyUploaded, err.to_string())
            }
            _ => self.mark_failed(FileStatus::Failed, err.to_string()),
        }
    }

    pub fn result(&self) -> FileResult {
        FileResult {
            uuid: self.id.clone(),
            name: self.name.clone(),
            destination_path: self.destination_path.clone(),
            size: self.size,
            compressed: self.compressed,
            checksum: self.checksum.clone(),
            success: self.success,
            status: self.status,
            error: self.error.clone(),
        }
    }
}

/// The set of files archived together for one submission.
#[derive(Debug, Clone)]
pub struct TransferBatch {
    pub submission_id: String,
    pub files: Vec<FileDescriptor>,
    /// Environment → submission directories needed in the upload area.
    pub directories: BTreeMap<String, BTreeSet<String>>,
    pub success: bool,
    pub error: Option<String>,
}

impl TransferBatch {
    pub fn new(submission_id: impl Into<String>, files: Vec<FileDescriptor>) -> Self {
        Self {
            submission_id: submission_id.into(),
            files,
            directories: BTreeMap::new(),
            success: true,
            error: None,
        }
    }

    /// A batch that failed before any file could be considered.
    pub fn rejected(submission_id: impl Into<String>, error: impl Into<String>) -> Self {
        let mut batch = Self::new(submission_id, Vec::new());
        batch.success = false;
        batch.error = Some(error.into());
        batch
    }

    pub fn add_directory(&mut self, target: &RemoteTarget) {
        self.directories
            .entry(target.environment.clone())
            .or_default()
            .insert(target.subdirectory.clone());
    }

    /// Every (environment, subdirectory) pair, in a stable order.
    pub fn targets(&self) -> Vec<RemoteTarget> {
        self.directories
            .iter()
            .flat_map(|(env, subs)| subs.iter().map(move |sub| RemoteTarget::new(env, sub)))
            .collect()
    }

    pub fn failed_count(&self) -> usize {
        self.files.iter().filter(|f| !f.success).count()
    }

    pub fn count_with_status(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }

    /// Recompute the aggregate outcome from the file flags.
    pub fn update_status(&mut self) {
        let failed = self.failed_count();
        self.success = failed == 0;
        if failed > 0 {
            self.error = Some(format!(
                "{} of {} files failed to archive",
                failed,
                self.files.len()
            ));
        }
    }

    pub fn result(&self) -> BatchResult {
        BatchResult {
            submission_id: self.submission_id.clone(),
            success: self.success,
            error: self.error.clone(),
            files: self.files.iter().map(FileDescriptor::result).collect(),
        }
    }
}

/// Per-file entry of a [`BatchResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    pub uuid: Option<String>,
    pub name: String,
    pub destination_path: Option<String>,
    pub size: Option<u64>,
    pub compressed: bool,
    pub checksum: Option<String>,
    pub success: bool,
    pub status: FileStatus,
    pub error: Option<String>,
}

/// Outcome of archiving one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub submission_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub files: Vec<FileResult>,
}
