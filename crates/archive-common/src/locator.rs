//! Source locators and the mapping from source bucket layout to upload area layout.
//!
//! Upload buckets are named `<prefix>-<environment>` (for example
//! `org-hca-data-archive-upload-dev`) and keys start with the submission UUID:
//! `<submission-uuid>/<file name>`. Files land in the upload area under
//! `[<base>/]<environment>/<submission-uuid>/`.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ArchiveError, ArchiveResult};

/// Length of the hyphenated UUID that prefixes every source key.
pub const SUBMISSION_PREFIX_LEN: usize = 36;

const S3_SCHEME: &str = "s3://";

/// Location of an object in the source store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocator {
    pub bucket: String,
    pub key: String,
}

impl SourceLocator {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse `s3://bucket/key` (the scheme is optional).
    pub fn parse(url: &str) -> ArchiveResult<Self> {
        let rest = url.strip_prefix(S3_SCHEME).unwrap_or(url);
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| ArchiveError::InvalidLocator(format!("missing key in '{}'", url)))?;

        let key = key.trim_start_matches('/');
        if bucket.is_empty() || key.is_empty() {
            return Err(ArchiveError::InvalidLocator(format!(
                "expected s3://bucket/key, got '{}'",
                url
            )));
        }

        Ok(Self::new(bucket, key))
    }

    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", S3_SCHEME, self.bucket, self.key)
    }
}

/// Upload area placement derived from a source locator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RemoteTarget {
    /// Deployment environment, taken from the bucket name suffix.
    pub environment: String,
    /// Submission directory, taken from the key's UUID prefix.
    pub subdirectory: String,
}

impl RemoteTarget {
    pub fn new(environment: impl Into<String>, subdirectory: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            subdirectory: subdirectory.into(),
        }
    }

    /// Derive the placement for a locator.
    pub fn for_locator(locator: &SourceLocator) -> ArchiveResult<Self> {
        let environment = locator
            .bucket
            .rsplit('-')
            .next()
            .filter(|env| !env.is_empty())
            .ok_or_else(|| {
                ArchiveError::InvalidLocator(format!(
                    "bucket '{}' has no environment suffix",
                    locator.bucket
                ))
            })?;

        let prefix = locator.key.get(..SUBMISSION_PREFIX_LEN).ok_or_else(|| {
            ArchiveError::InvalidLocator(format!(
                "key '{}' does not start with a submission UUID",
                locator.key
            ))
        })?;

        Uuid::parse_str(prefix).map_err(|e| {
            ArchiveError::InvalidLocator(format!("invalid submission UUID '{}': {}", prefix, e))
        })?;

        Ok(Self::new(environment, prefix))
    }

    /// Directory path relative to the session's login directory, or absolute
    /// when `base` is absolute.
    pub fn directory(&self, base: Option<&str>) -> String {
        match base.map(|b| b.trim_end_matches('/')).filter(|b| !b.is_empty()) {
            Some(base) => format!("{}/{}/{}", base, self.environment, self.subdirectory),
            None => format!("{}/{}", self.environment, self.subdirectory),
        }
    }

    /// Individual directory names to create, outermost first.
    pub fn segments(&self, base: Option<&str>) -> Vec<String> {
        base.unwrap_or_default()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .chain([self.environment.clone(), self.subdirectory.clone()])
            .collect()
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.environment, self.subdirectory)
    }
}
