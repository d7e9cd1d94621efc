//! Sessions against the remote upload area.
//!
//! The transfer pipeline only sees the [`Connector`] and [`RemoteSession`]
//! traits; [`FtpConnector`] is the production implementation.

pub mod ftp;
pub mod listing;
pub mod remote_dir;
pub mod session;

pub use ftp::{FtpConfig, FtpConnector};
pub use listing::{parse_list_line, RemoteEntry};
pub use session::{Connector, RemoteSession, Session, StoreFn};
