//! One file's end-to-end transfer.

use std::io::Write;
use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, instrument, warn};

use archive_common::{ArchiveError, ArchiveResult, FileDescriptor};
use storage::SourceStore;
use upload::remote_dir::{file_exists, file_size};
use upload::{Connector, Session};

use crate::compressor::{checksum_file_name, is_gzip, ChecksumingCompressor, GZIP_MAGIC};
use crate::progress::TransferProgress;

const GZIP_SUFFIX: &str = ".gz";

/// Streams single files from the source store into the upload area.
///
/// Each call opens its own session, so one streamer can be shared by any
/// number of workers.
pub struct FileStreamer {
    source: Arc<dyn SourceStore>,
    connector: Arc<dyn Connector>,
    compressor: ChecksumingCompressor,
    base_dir: Option<String>,
}

impl FileStreamer {
    pub fn new(
        source: Arc<dyn SourceStore>,
        connector: Arc<dyn Connector>,
        compressor: ChecksumingCompressor,
        base_dir: Option<String>,
    ) -> Self {
        Self {
            source,
            connector,
            compressor,
            base_dir,
        }
    }

    /// Transfer `file` and record the outcome on it. Never fails: every error
    /// ends up on the descriptor.
    #[instrument(skip_all, fields(file = %file.name))]
    pub fn transfer(&self, file: &mut FileDescriptor, progress: &TransferProgress) {
        match self.try_transfer(file, progress) {
            Ok(()) => {
                counter!("archiver_files_total", "status" => file.status.as_str()).increment(1);
            }
            Err(e) => {
                file.mark_error(&e);
                counter!("archiver_files_total", "status" => file.status.as_str()).increment(1);
                if matches!(e, ArchiveError::AlreadyUploaded(_)) {
                    info!(error = %e, "Skipping file");
                } else {
                    warn!(error = %e, "File transfer failed");
                }
            }
        }
    }

    fn try_transfer(
        &self,
        file: &mut FileDescriptor,
        progress: &TransferProgress,
    ) -> ArchiveResult<()> {
        let target = file.target()?;
        let locator = file
            .locator
            .clone()
            .ok_or_else(|| ArchiveError::SourceNotFound(file.name.clone()))?;
        let directory = target.directory(self.base_dir.as_deref());

        let mut session = Session::open(self.connector.as_ref())?;
        session.cwd(&directory)?;

        let head = self.source.peek(&locator, 0, GZIP_MAGIC.len())?;
        let compress = !is_gzip(&head);
        let final_name = if compress {
            format!("{}{}", file.name, GZIP_SUFFIX)
        } else {
            file.name.clone()
        };
        let checksum_name = checksum_file_name(&final_name);
        file.set_destination(format!("{}/{}", directory, final_name))?;

        if self.already_uploaded(&mut session, file, &final_name, compress)? {
            return Err(ArchiveError::AlreadyUploaded(final_name));
        }

        info!(
            destination = %directory,
            name = %final_name,
            compress = compress,
            size = ?file.size,
            "Uploading file"
        );

        let mut reader = self.source.open_read(&locator)?;
        let compressor = &self.compressor;
        let mut outcome = None;
        session.store(&final_name, &mut |sink: &mut dyn Write| {
            let streamed = compressor.stream(reader.as_mut(), sink, compress, |n| {
                progress.add(n);
            })?;
            outcome = Some(streamed);
            Ok(())
        })?;
        let outcome = outcome
            .ok_or_else(|| ArchiveError::Internal(format!("no outcome for {}", final_name)))?;

        let digest = outcome.checksum.clone();
        session.store(&checksum_name, &mut |sink: &mut dyn Write| {
            sink.write_all(digest.as_bytes())?;
            Ok(())
        })?;

        counter!("archiver_bytes_uploaded_total").increment(outcome.bytes_written);
        debug!(
            bytes_read = outcome.bytes_read,
            bytes_written = outcome.bytes_written,
            md5 = %outcome.checksum,
            "Upload complete"
        );

        file.mark_archived(outcome.checksum, compress, outcome.bytes_written);
        session.finish();
        Ok(())
    }

    /// Whether an earlier run already delivered this file.
    ///
    /// Raw uploads compare the remote size against the source size. Compressed
    /// sizes cannot be predicted, so a compressed upload counts as delivered
    /// once its checksum sidecar exists, since the sidecar is written last.
    fn already_uploaded(
        &self,
        session: &mut Session,
        file: &FileDescriptor,
        final_name: &str,
        compress: bool,
    ) -> ArchiveResult<bool> {
        if !file_exists(&mut **session, final_name)? {
            return Ok(false);
        }
        if compress {
            return file_exists(&mut **session, &checksum_file_name(final_name));
        }
        let remote = file_size(&mut **session, final_name)?;
        Ok(remote.is_some() && remote == file.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archive_common::{FileStatus, RemoteTarget};
    use test_utils::{fixtures, MemoryRemote, MemorySource};

    fn setup(remote: &MemoryRemote, source: &MemorySource) -> FileStreamer {
        FileStreamer::new(
            Arc::new(source.clone()),
            Arc::new(remote.clone()),
            ChecksumingCompressor::new(1024),
            None,
        )
    }

    fn sized(source: &MemorySource, file: &mut FileDescriptor) {
        file.size = source.size(file.locator.as_ref().unwrap()).ok();
    }

    fn prepare_dir(remote: &MemoryRemote, file: &FileDescriptor) -> String {
        let dir = format!("/{}", file.target().unwrap().directory(None));
        remote.put_dir(&dir);
        dir
    }

    #[test]
    fn test_raw_file_is_compressed_with_sidecar() {
        let source = MemorySource::new();
        let remote = MemoryRemote::new();
        let data = fixtures::sequence_data(5000);
        let mut file = source.add(fixtures::DEV_BUCKET, fixtures::SUBMISSION, "reads.fastq", data.clone());
        sized(&source, &mut file);
        let dir = prepare_dir(&remote, &file);

        setup(&remote, &source).transfer(&mut file, &TransferProgress::new(5000));

        assert_eq!(file.status, FileStatus::Archived);
        assert!(file.success);
        assert!(file.compressed);
        let uploaded = remote.file(&format!("{}/reads.fastq.gz", dir)).unwrap();
        assert_eq!(fixtures::gunzip(&uploaded), data);
        assert_eq!(file.checksum.as_deref(), Some(crate::checksum_bytes(&uploaded).as_str()));
        assert_eq!(
            remote.file(&format!("{}/reads.fastq.gz.md5", dir)).unwrap(),
            file.checksum.clone().unwrap().into_bytes()
        );
        assert_eq!(
            file.destination_path,
            Some(format!("dev/{}/reads.fastq.gz", fixtures::SUBMISSION))
        );
    }

    #[test]
    fn test_gzip_content_uploaded_verbatim_regardless_of_name() {
        let source = MemorySource::new();
        let remote = MemoryRemote::new();
        let data = fixtures::gzip(&fixtures::sequence_data(3000));
        let mut file = source.add(fixtures::DEV_BUCKET, fixtures::SUBMISSION, "cells.mtx", data.clone());
        sized(&source, &mut file);
        let dir = prepare_dir(&remote, &file);

        setup(&remote, &source).transfer(&mut file, &TransferProgress::new(0));

        assert_eq!(file.status, FileStatus::Archived);
        assert!(!file.compressed);
        assert_eq!(remote.file(&format!("{}/cells.mtx", dir)), Some(data.clone()));
        assert_eq!(file.checksum, Some(crate::checksum_bytes(&data)));
        assert_eq!(file.uploaded_size, Some(data.len() as u64));
    }

    #[test]
    fn test_existing_raw_file_with_matching_size_is_skipped() {
        let source = MemorySource::new();
        let remote = MemoryRemote::new();
        let data = fixtures::gzip(b"ACGT");
        let mut file = source.add(fixtures::DEV_BUCKET, fixtures::SUBMISSION, "r.fastq.gz", data.clone());
        sized(&source, &mut file);
        let dir = prepare_dir(&remote, &file);
        remote.put_file(&format!("{}/r.fastq.gz", dir), data);

        setup(&remote, &source).transfer(&mut file, &TransferProgress::new(0));

        assert_eq!(file.status, FileStatus::AlreadyUploaded);
        assert!(!file.success);
        assert!(file.error.as_deref().unwrap().contains("already present"));
        assert_eq!(remote.store_count(), 0);
    }

    #[test]
    fn test_existing_raw_file_with_other_size_is_replaced() {
        let source = MemorySource::new();
        let remote = MemoryRemote::new();
        let data = fixtures::gzip(&fixtures::sequence_data(2000));
        let mut file = source.add(fixtures::DEV_BUCKET, fixtures::SUBMISSION, "r.fastq.gz", data.clone());
        sized(&source, &mut file);
        let dir = prepare_dir(&remote, &file);
        remote.put_file(&format!("{}/r.fastq.gz", dir), b"partial".to_vec());

        setup(&remote, &source).transfer(&mut file, &TransferProgress::new(0));

        assert_eq!(file.status, FileStatus::Archived);
        assert_eq!(remote.file(&format!("{}/r.fastq.gz", dir)), Some(data));
    }

    #[test]
    fn test_compressed_upload_without_sidecar_is_retried() {
        let source = MemorySource::new();
        let remote = MemoryRemote::new();
        let mut file = source.add(fixtures::DEV_BUCKET, fixtures::SUBMISSION, "a.tsv", b"x\ty\n".to_vec());
        sized(&source, &mut file);
        let dir = prepare_dir(&remote, &file);
        remote.put_file(&format!("{}/a.tsv.gz", dir), b"\x1f\x8b broken".to_vec());

        setup(&remote, &source).transfer(&mut file, &TransferProgress::new(0));
        assert_eq!(file.status, FileStatus::Archived);

        let mut again = file.clone();
        again.status = FileStatus::Pending;
        again.success = true;
        setup(&remote, &source).transfer(&mut again, &TransferProgress::new(0));
        assert_eq!(again.status, FileStatus::AlreadyUploaded);
    }

    #[test]
    fn test_missing_directory_fails_file_and_closes_session() {
        let source = MemorySource::new();
        let remote = MemoryRemote::new();
        let mut file = source.add(fixtures::DEV_BUCKET, fixtures::SUBMISSION, "a.txt", b"a".to_vec());

        setup(&remote, &source).transfer(&mut file, &TransferProgress::new(0));

        assert_eq!(file.status, FileStatus::Failed);
        assert!(file.destination_path.is_none());
        assert_eq!(remote.connect_count(), 1);
        assert_eq!(remote.close_count(), 1);
    }

    #[test]
    fn test_store_failure_marks_failed() {
        let source = MemorySource::new();
        let remote = MemoryRemote::new();
        remote.fail_store_of("a.txt");
        let mut file = source.add(fixtures::DEV_BUCKET, fixtures::SUBMISSION, "a.txt", b"abc".to_vec());
        sized(&source, &mut file);
        prepare_dir(&remote, &file);

        setup(&remote, &source).transfer(&mut file, &TransferProgress::new(3));

        assert_eq!(file.status, FileStatus::Failed);
        assert!(file.error.as_deref().unwrap().contains("426"));
        assert!(file.checksum.is_none());
        assert!(file.destination_path.is_none());
        assert!(file.result().destination_path.is_none());
        assert_eq!(remote.close_count(), remote.connect_count());
    }

    #[test]
    fn test_failed_quit_after_upload_keeps_file_archived() {
        let source = MemorySource::new();
        let remote = MemoryRemote::new();
        remote.fail_close(true);
        let mut file = source.add(fixtures::DEV_BUCKET, fixtures::SUBMISSION, "a.txt", b"abc".to_vec());
        sized(&source, &mut file);
        let dir = prepare_dir(&remote, &file);

        setup(&remote, &source).transfer(&mut file, &TransferProgress::new(3));

        assert_eq!(file.status, FileStatus::Archived);
        assert!(file.success);
        assert!(file.error.is_none());
        assert!(remote.file(&format!("{}/a.txt.gz.md5", dir)).is_some());
        assert_eq!(
            file.destination_path,
            Some(format!("dev/{}/a.txt.gz", fixtures::SUBMISSION))
        );
        assert_eq!(remote.close_count(), 1);
    }

    #[test]
    fn test_base_dir_prefixes_destination() {
        let source = MemorySource::new();
        let remote = MemoryRemote::new();
        let mut file = source.add(fixtures::DEV_BUCKET, fixtures::SUBMISSION, "a.txt", b"abc".to_vec());
        sized(&source, &mut file);
        let target = RemoteTarget::new("dev", fixtures::SUBMISSION);
        remote.put_dir(&target.directory(Some("/upload")));

        let streamer = FileStreamer::new(
            Arc::new(source.clone()),
            Arc::new(remote.clone()),
            ChecksumingCompressor::default(),
            Some("/upload".to_string()),
        );
        streamer.transfer(&mut file, &TransferProgress::new(3));

        assert_eq!(file.status, FileStatus::Archived);
        assert_eq!(
            file.destination_path,
            Some(format!("/upload/dev/{}/a.txt.gz", fixtures::SUBMISSION))
        );
    }
}
