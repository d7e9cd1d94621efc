//! FTP sessions backed by `suppaftp`, optionally secured with explicit TLS.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use suppaftp::rustls::{ClientConfig, RootCertStore};
use suppaftp::types::FileType;
use suppaftp::{FtpError, RustlsConnector, RustlsFtpStream};
use tracing::{debug, instrument};

use archive_common::{ArchiveError, ArchiveResult};

use crate::listing::{parse_list_line, RemoteEntry};
use crate::session::{Connector, RemoteSession, StoreFn};

/// Connection settings for the upload area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Upgrade the control and data connections with `AUTH TLS` / `PROT P`.
    #[serde(default)]
    pub secure: bool,
}

fn default_port() -> u16 {
    21
}

impl FtpConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Opens a fresh, logged-in binary-mode FTP session per call.
///
/// The stream type is TLS capable either way; plain sessions never upgrade.
pub struct FtpConnector {
    config: FtpConfig,
}

impl FtpConnector {
    pub fn new(config: FtpConfig) -> Self {
        Self { config }
    }
}

impl Connector for FtpConnector {
    #[instrument(skip(self), fields(host = %self.config.host, secure = self.config.secure))]
    fn connect(&self) -> ArchiveResult<Box<dyn RemoteSession>> {
        let mut ftp = RustlsFtpStream::connect(self.config.address())
            .map_err(|e| remote_error("connect", e))?;
        if self.config.secure {
            ftp = ftp
                .into_secure(tls_connector()?, &self.config.host)
                .map_err(|e| remote_error("AUTH TLS", e))?;
        }
        ftp.login(self.config.username.as_str(), self.config.password.as_str())
            .map_err(|e| remote_error("login", e))?;
        ftp.transfer_type(FileType::Binary)
            .map_err(|e| remote_error("TYPE I", e))?;

        debug!("FTP session established");
        Ok(Box::new(FtpSession { ftp, closed: false }))
    }
}

/// One FTP control connection.
pub struct FtpSession {
    ftp: RustlsFtpStream,
    closed: bool,
}

impl RemoteSession for FtpSession {
    fn pwd(&mut self) -> ArchiveResult<String> {
        self.ftp.pwd().map_err(|e| remote_error("PWD", e))
    }

    fn cwd(&mut self, path: &str) -> ArchiveResult<()> {
        self.ftp
            .cwd(path)
            .map_err(|e| remote_error(&format!("CWD {}", path), e))
    }

    fn mkdir(&mut self, name: &str) -> ArchiveResult<()> {
        self.ftp
            .mkdir(name)
            .map_err(|e| remote_error(&format!("MKD {}", name), e))
    }

    fn list(&mut self) -> ArchiveResult<Vec<RemoteEntry>> {
        let lines = self.ftp.list(None).map_err(|e| remote_error("LIST", e))?;
        Ok(lines.iter().filter_map(|l| parse_list_line(l)).collect())
    }

    fn size(&mut self, name: &str) -> ArchiveResult<u64> {
        self.ftp
            .size(name)
            .map(|size| size as u64)
            .map_err(|e| remote_error(&format!("SIZE {}", name), e))
    }

    fn store(&mut self, name: &str, write: &mut StoreFn<'_>) -> ArchiveResult<()> {
        let mut stream = self
            .ftp
            .put_with_stream(name)
            .map_err(|e| remote_error(&format!("STOR {}", name), e))?;

        let written = write(&mut stream);
        // Always finalize so the control connection reads the transfer reply.
        let finalized = self
            .ftp
            .finalize_put_stream(stream)
            .map_err(|e| remote_error(&format!("STOR {}", name), e));

        written?;
        finalized
    }

    fn close(&mut self) -> ArchiveResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.ftp.quit().map_err(|e| remote_error("QUIT", e))
    }
}

/// TLS client trusting the Mozilla root set.
fn tls_connector() -> ArchiveResult<RustlsConnector> {
    let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let provider = Arc::new(suppaftp::rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ArchiveError::Remote(format!("TLS setup failed: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(RustlsConnector::from(Arc::new(config)))
}

fn remote_error(command: &str, err: FtpError) -> ArchiveError {
    ArchiveError::Remote(format!("{} failed: {}", command, err))
}
