//! Archive request handling.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use archive_common::{BatchResult, FileDescriptor, SourceLocator, TransferBatch};
use transfer::TransferCoordinator;

use crate::ingest::{IngestClient, SequenceFile};

pub const NO_SEQUENCE_FILES: &str = "No sequence files in submission.";

/// Request to archive a submission's sequence files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRequest {
    pub sub_uuid: String,
    /// File uuids to archive; empty means every sequence file.
    #[serde(default)]
    pub files: Vec<String>,
}

/// Ties the Ingest API to the transfer pipeline.
pub struct Archiver {
    ingest: IngestClient,
    coordinator: Arc<TransferCoordinator>,
}

impl Archiver {
    pub fn new(ingest: IngestClient, coordinator: Arc<TransferCoordinator>) -> Self {
        Self {
            ingest,
            coordinator,
        }
    }

    /// Archive the requested files and report results upstream.
    #[instrument(skip(self, request), fields(submission = %request.sub_uuid))]
    pub async fn archive(&self, request: &ArchiveRequest) -> BatchResult {
        let sequence_files = match self.ingest.get_sequence_files(&request.sub_uuid).await {
            Ok(files) => files,
            Err(e) => {
                error!(error = %e, "Could not fetch sequence files");
                Vec::new()
            }
        };

        let mut batch = build_batch(request, &sequence_files);
        if batch.files.is_empty() {
            info!(error = ?batch.error, "Nothing to archive");
            return batch.result();
        }

        if let Err(e) = self.coordinator.run(&mut batch).await {
            error!(error = %e, "Archive run aborted");
        }

        self.ingest.patch_file_results(&batch.files).await;
        batch.result()
    }
}

/// Turn a request and the submission's sequence files into a batch.
///
/// Requested uuids that are not sequence files of the submission are kept as
/// not-found entries so every requested file shows up in the result.
pub fn build_batch(request: &ArchiveRequest, sequence_files: &[SequenceFile]) -> TransferBatch {
    if sequence_files.is_empty() {
        return TransferBatch::rejected(&request.sub_uuid, NO_SEQUENCE_FILES);
    }

    let files = if request.files.is_empty() {
        sequence_files.iter().map(descriptor).collect()
    } else {
        request
            .files
            .iter()
            .map(|uuid| match sequence_files.iter().find(|f| &f.uuid == uuid) {
                Some(file) => descriptor(file),
                None => {
                    warn!(uuid = %uuid, "Requested file is not a sequence file of the submission");
                    FileDescriptor::unresolved(uuid)
                }
            })
            .collect()
    };

    TransferBatch::new(&request.sub_uuid, files)
}

fn descriptor(file: &SequenceFile) -> FileDescriptor {
    match SourceLocator::parse(&file.cloud_url) {
        Ok(locator) => FileDescriptor::new(&file.file_name, locator).with_id(&file.uuid),
        Err(e) => {
            warn!(uuid = %file.uuid, error = %e, "Unusable cloud URL");
            let mut descriptor = FileDescriptor::unresolved(&file.uuid);
            descriptor.name = file.file_name.clone();
            descriptor.mark_error(&e);
            descriptor
        }
    }
}
