//! Batch coordination: pre-flight, directory bootstrap, bounded fan-out.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{error, info, instrument, warn};

use archive_common::{
    ArchiveError, ArchiveResult, FileDescriptor, FileStatus, RemoteTarget, TransferBatch,
};
use storage::SourceStore;
use upload::remote_dir::ensure_dir;
use upload::{Connector, Session};

use crate::compressor::{ChecksumingCompressor, DEFAULT_BLOCK_SIZE, DEFAULT_LEVEL};
use crate::progress::TransferProgress;
use crate::streamer::FileStreamer;

/// Coordinator tuning.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum number of files in flight.
    pub workers: usize,
    /// Process one file at a time regardless of `workers`.
    pub sequential: bool,
    pub block_size: usize,
    /// gzip level, 0 (store) to 9 (best).
    pub compression_level: u32,
    /// Directory under which `environment/subdirectory` is created. Relative
    /// paths start at the login directory.
    pub base_dir: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            sequential: false,
            block_size: DEFAULT_BLOCK_SIZE,
            compression_level: DEFAULT_LEVEL,
            base_dir: None,
        }
    }
}

impl CoordinatorConfig {
    /// Effective concurrency.
    pub fn concurrency(&self) -> usize {
        if self.sequential {
            1
        } else {
            self.workers.max(1)
        }
    }
}

/// Runs transfer batches.
pub struct TransferCoordinator {
    source: Arc<dyn SourceStore>,
    connector: Arc<dyn Connector>,
    streamer: Arc<FileStreamer>,
    config: CoordinatorConfig,
}

impl TransferCoordinator {
    pub fn new(
        source: Arc<dyn SourceStore>,
        connector: Arc<dyn Connector>,
        config: CoordinatorConfig,
    ) -> Self {
        let streamer = Arc::new(FileStreamer::new(
            source.clone(),
            connector.clone(),
            ChecksumingCompressor::new(config.block_size).with_level(config.compression_level),
            config.base_dir.clone(),
        ));
        Self {
            source,
            connector,
            streamer,
            config,
        }
    }

    /// Transfer every eligible file of `batch`.
    ///
    /// Per-file failures are recorded on the descriptors. An error is returned
    /// only when the batch as a whole could not run, in which case every file
    /// that was still pending is marked failed as well.
    #[instrument(skip_all, fields(submission = %batch.submission_id, files = batch.files.len()))]
    pub async fn run(&self, batch: &mut TransferBatch) -> ArchiveResult<()> {
        let total_bytes = match self.preflight(batch).await {
            Ok(total) => total,
            Err(e) => return Err(abort(batch, e)),
        };

        let targets = batch.targets();
        info!(
            eligible = batch.files.iter().filter(|f| f.is_eligible()).count(),
            total_bytes = total_bytes,
            directories = targets.len(),
            "Pre-flight complete"
        );

        if let Err(e) = self.bootstrap(targets).await {
            return Err(abort(batch, e));
        }

        let progress = Arc::new(TransferProgress::new(total_bytes));
        self.fan_out(batch, progress.clone()).await;

        batch.update_status();
        info!(
            archived = batch.count_with_status(FileStatus::Archived),
            already_uploaded = batch.count_with_status(FileStatus::AlreadyUploaded),
            not_found = batch.count_with_status(FileStatus::NotFound),
            failed = batch.count_with_status(FileStatus::Failed),
            transferred = progress.transferred(),
            success = batch.success,
            "Batch complete"
        );
        Ok(())
    }

    /// Size every candidate file and collect destination directories.
    async fn preflight(&self, batch: &mut TransferBatch) -> ArchiveResult<u64> {
        let source = self.source.clone();
        let mut files = std::mem::take(&mut batch.files);
        let fallback = files.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let (total, targets) = size_files(source.as_ref(), &mut files);
            (files, total, targets)
        })
        .await;

        match joined {
            Ok((files, total, targets)) => {
                batch.files = files;
                for target in &targets {
                    batch.add_directory(target);
                }
                Ok(total)
            }
            Err(e) => {
                batch.files = fallback;
                Err(ArchiveError::Internal(format!("pre-flight task failed: {}", e)))
            }
        }
    }

    /// Create every destination directory over one session, before any
    /// worker starts.
    async fn bootstrap(&self, targets: Vec<RemoteTarget>) -> ArchiveResult<()> {
        if targets.is_empty() {
            return Ok(());
        }
        let connector = self.connector.clone();
        let base = self.config.base_dir.clone();

        tokio::task::spawn_blocking(move || {
            create_directories(connector.as_ref(), &targets, base.as_deref())
        })
        .await
        .map_err(|e| ArchiveError::Internal(format!("bootstrap task failed: {}", e)))?
    }

    async fn fan_out(&self, batch: &mut TransferBatch, progress: Arc<TransferProgress>) {
        let files = std::mem::take(&mut batch.files);

        let jobs = files.into_iter().enumerate().map(|(index, file)| {
            let streamer = self.streamer.clone();
            let progress = progress.clone();
            async move {
                if !file.is_eligible() {
                    return (index, file);
                }
                let fallback = file.clone();
                let worker = tokio::task::spawn_blocking(move || {
                    let mut file = file;
                    streamer.transfer(&mut file, &progress);
                    file
                });
                match worker.await {
                    Ok(file) => (index, file),
                    Err(e) => {
                        error!(file = %fallback.name, error = %e, "Transfer worker died");
                        let mut file = fallback;
                        file.mark_error(&ArchiveError::Internal(format!(
                            "transfer worker died: {}",
                            e
                        )));
                        (index, file)
                    }
                }
            }
        });

        let mut finished: Vec<(usize, FileDescriptor)> = stream::iter(jobs)
            .buffer_unordered(self.config.concurrency())
            .collect()
            .await;

        finished.sort_by_key(|(index, _)| *index);
        batch.files = finished.into_iter().map(|(_, file)| file).collect();
    }
}

fn size_files(
    source: &dyn SourceStore,
    files: &mut [FileDescriptor],
) -> (u64, Vec<RemoteTarget>) {
    let mut total = 0u64;
    let mut targets = Vec::new();

    for file in files.iter_mut().filter(|f| f.success) {
        let looked_up = match &file.locator {
            Some(locator) => source.head(locator),
            None => Ok(None),
        };
        match looked_up {
            Ok(Some(size)) => match file.target() {
                Ok(target) => {
                    file.size = Some(size);
                    total += size;
                    targets.push(target);
                }
                Err(e) => {
                    warn!(file = %file.name, error = %e, "Cannot place file");
                    file.mark_error(&e);
                }
            },
            Ok(None) => {
                warn!(file = %file.name, "File not found in source store");
                file.mark_not_found();
            }
            Err(e) => {
                warn!(file = %file.name, error = %e, "Source lookup failed");
                file.mark_error(&e);
            }
        }
    }

    (total, targets)
}

fn create_directories(
    connector: &dyn Connector,
    targets: &[RemoteTarget],
    base: Option<&str>,
) -> ArchiveResult<()> {
    let bootstrap_error = |path: String, e: ArchiveError| ArchiveError::DirectoryBootstrap {
        path,
        message: e.to_string(),
    };
    let root = targets
        .first()
        .map(|t| t.directory(base))
        .unwrap_or_default();

    let mut session = Session::open(connector).map_err(|e| bootstrap_error(root.clone(), e))?;
    let start = match base {
        Some(b) if b.starts_with('/') => "/".to_string(),
        _ => session.pwd().map_err(|e| bootstrap_error(root.clone(), e))?,
    };

    for target in targets {
        let path = target.directory(base);
        session
            .cwd(&start)
            .map_err(|e| bootstrap_error(path.clone(), e))?;
        for segment in target.segments(base) {
            ensure_dir(&mut *session, &segment).map_err(|e| bootstrap_error(path.clone(), e))?;
        }
    }

    session.finish();
    Ok(())
}

/// Fail every still-pending file and record `err` on the batch.
fn abort(batch: &mut TransferBatch, err: ArchiveError) -> ArchiveError {
    error!(error = %err, "Batch aborted");
    for file in batch.files.iter_mut().filter(|f| f.is_eligible()) {
        file.mark_failed(FileStatus::Failed, err.to_string());
    }
    batch.success = false;
    batch.error = Some(err.to_string());
    err
}
