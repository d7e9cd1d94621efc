//! Archiver configuration.

use std::env;

use anyhow::{anyhow, Context, Result};
use tracing::warn;

use storage::ObjectStorageConfig;
use transfer::{CoordinatorConfig, DEFAULT_BLOCK_SIZE, DEFAULT_LEVEL};
use upload::FtpConfig;

const DEFAULT_FTP_PORT: u16 = 21;
const DEFAULT_REGION: &str = "us-east-1";

/// Top-level archiver configuration.
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    /// Ingest API base URL, always ending in `/`
    pub ingest_api: String,

    /// Source object storage
    pub storage: ObjectStorageConfig,

    /// ENA upload area
    pub ftp: FtpConfig,

    /// Base directory in the upload area
    pub ftp_dir: Option<String>,

    /// Transfer one file at a time
    pub sequential: bool,

    /// Compression block size in bytes
    pub block_size: usize,

    /// gzip level (0-9)
    pub compression_level: u32,
}

impl ArchiverConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a
    /// variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| anyhow!("Missing required environment variable {}", key))
        };

        let mut ingest_api = required("INGEST_API")?;
        if !ingest_api.ends_with('/') {
            ingest_api.push('/');
        }

        let storage = ObjectStorageConfig {
            endpoint: get("S3_ENDPOINT"),
            access_key_id: required("AWS_ACCESS_KEY_ID")?,
            secret_access_key: required("AWS_ACCESS_KEY_SECRET")?,
            region: get("INGEST_S3_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            allow_http: get("S3_ENDPOINT").map_or(false, |e| e.starts_with("http://")),
        };

        let port = match get("ENA_FTP_PORT") {
            Some(port) => port
                .parse::<u16>()
                .with_context(|| format!("Invalid ENA_FTP_PORT '{}'", port))?,
            None => DEFAULT_FTP_PORT,
        };

        let ftp = FtpConfig {
            host: required("ENA_FTP_HOST")?,
            port,
            username: required("ENA_WEBIN_USERNAME")?,
            password: required("ENA_WEBIN_PASSWORD")?,
            secure: get("ENA_FTP_SECURE").map_or(false, |v| is_truthy(&v)),
        };

        if !is_webin_user(&ftp.username) {
            warn!(
                username = %ftp.username,
                "ENA_WEBIN_USERNAME does not look like a Webin account (Webin-<number>)"
            );
        }

        let sequential = get("ARCHIVER_SEQUENTIAL").map_or(false, |v| is_truthy(&v));

        let block_size = match get("ARCHIVER_BLOCK_SIZE") {
            Some(size) => size
                .parse::<usize>()
                .with_context(|| format!("Invalid ARCHIVER_BLOCK_SIZE '{}'", size))?,
            None => DEFAULT_BLOCK_SIZE,
        };

        let compression_level = match get("ARCHIVER_COMPRESSION_LEVEL") {
            Some(level) => match level.parse::<u32>() {
                Ok(n) if n <= 9 => n,
                _ => return Err(anyhow!("Invalid ARCHIVER_COMPRESSION_LEVEL '{}' (0-9)", level)),
            },
            None => DEFAULT_LEVEL,
        };

        Ok(Self {
            ingest_api,
            storage,
            ftp,
            ftp_dir: get("ENA_FTP_DIR"),
            sequential,
            block_size,
            compression_level,
        })
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            sequential: self.sequential,
            block_size: self.block_size,
            compression_level: self.compression_level,
            base_dir: self.ftp_dir.clone(),
            ..Default::default()
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes")
}

/// Whether `name` is a Webin submission account (`Webin-` followed by digits).
pub fn is_webin_user(name: &str) -> bool {
    name.strip_prefix("Webin-")
        .map_or(false, |id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
}
