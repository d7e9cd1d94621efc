//! Ingest API client.
//!
//! Resolves the sequence files of a submission and reports archive results
//! back onto each file entity. The API is HAL: collections arrive in pages
//! under `_embedded` with a `_links.next` link.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use archive_common::FileDescriptor;

const SEQUENCE_FILE_SCHEMA_SUFFIX: &str = "sequence_file";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A sequence file registered in a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceFile {
    pub uuid: String,
    pub file_name: String,
    /// `s3://bucket/key` of the uploaded file
    pub cloud_url: String,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(rename = "self")]
    self_link: Option<Link>,
    files: Option<Link>,
    next: Option<Link>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    #[serde(rename = "_links", default)]
    links: Links,
}

#[derive(Debug, Deserialize)]
struct FilePage {
    #[serde(rename = "_embedded")]
    embedded: Option<EmbeddedFiles>,
    #[serde(rename = "_links", default)]
    links: Links,
}

#[derive(Debug, Deserialize)]
struct EmbeddedFiles {
    #[serde(default)]
    files: Vec<FileEntity>,
}

#[derive(Debug, Deserialize)]
struct FileEntity {
    uuid: EntityUuid,
    content: FileContent,
    #[serde(rename = "cloudUrl")]
    cloud_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EntityUuid {
    uuid: String,
}

#[derive(Debug, Deserialize)]
struct FileContent {
    #[serde(rename = "describedBy", default)]
    described_by: String,
    file_core: Option<FileCore>,
}

#[derive(Debug, Deserialize)]
struct FileCore {
    file_name: String,
}

/// HTTP client for the Ingest API.
pub struct IngestClient {
    http: Client,
    base_url: String,
}

impl IngestClient {
    /// `base_url` must end in `/`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build Ingest API client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// All sequence files of a submission.
    #[instrument(skip(self))]
    pub async fn get_sequence_files(&self, submission_uuid: &str) -> Result<Vec<SequenceFile>> {
        let url = format!(
            "{}submissionEnvelopes/search/findByUuidUuid?uuid={}",
            self.base_url, submission_uuid
        );
        let submission: Resource = self.get_json(&url).await?;
        let files_url = submission
            .links
            .files
            .map(|l| l.href)
            .with_context(|| format!("Submission {} has no files link", submission_uuid))?;

        let mut next = Some(files_url);
        let mut files = Vec::new();
        while let Some(url) = next {
            let page: FilePage = self.get_json(&url).await?;
            files.extend(extract_sequence_files(&page));
            next = page.links.next.map(|l| l.href);
        }

        info!(count = files.len(), "Fetched sequence files");
        Ok(files)
    }

    /// Record each file's archive result on its Ingest entity.
    ///
    /// Files without an external id are skipped. Failures are logged and do
    /// not stop the remaining updates.
    pub async fn patch_file_results(&self, files: &[FileDescriptor]) {
        let now = Utc::now();
        for file in files {
            let Some(uuid) = file.id.as_deref() else {
                continue;
            };
            if let Err(e) = self.patch_file_result(uuid, file, now).await {
                warn!(file = %file.name, uuid = %uuid, error = %e, "Could not patch file");
            }
        }
    }

    async fn patch_file_result(
        &self,
        uuid: &str,
        file: &FileDescriptor,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let url = format!("{}files/search/findByUuid?uuid={}", self.base_url, uuid);
        let entity: Resource = self.get_json(&url).await?;
        let file_url = entity
            .links
            .self_link
            .map(|l| l.href)
            .with_context(|| format!("File {} has no self link", uuid))?;

        let payload = archive_result_payload(file, now);
        let response = self
            .http
            .patch(&file_url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("PATCH {} failed", file_url))?;

        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED => {
                info!(url = %file_url, "Patched file archive result");
                Ok(())
            }
            status => anyhow::bail!("PATCH {} returned {}", file_url, status),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        debug!(url = %url, "GET");
        self.http
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("GET {} failed", url))?
            .json()
            .await
            .with_context(|| format!("Invalid response from {}", url))
    }
}

/// Sequence files on one page of a file collection.
fn extract_sequence_files(page: &FilePage) -> Vec<SequenceFile> {
    let Some(embedded) = &page.embedded else {
        return Vec::new();
    };

    embedded
        .files
        .iter()
        .filter(|f| f.content.described_by.ends_with(SEQUENCE_FILE_SCHEMA_SUFFIX))
        .filter_map(|f| {
            let (Some(core), Some(cloud_url)) = (&f.content.file_core, &f.cloud_url) else {
                warn!(uuid = %f.uuid.uuid, "Sequence file without name or cloud URL");
                return None;
            };
            Some(SequenceFile {
                uuid: f.uuid.uuid.clone(),
                file_name: core.file_name.clone(),
                cloud_url: cloud_url.clone(),
            })
        })
        .collect()
}

/// Body of the `fileArchiveResult` update for one file.
pub fn archive_result_payload(file: &FileDescriptor, archived_at: DateTime<Utc>) -> Value {
    json!({
        "fileArchiveResult": {
            "lastArchived": archived_at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            "compressed": file.compressed,
            "md5": file.checksum,
            "enaUploadPath": file.destination_path,
            "error": file.error,
        }
    })
}
