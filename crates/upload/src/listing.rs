//! Parsing of FTP `LIST` output.
//!
//! Servers answer `LIST` with free-form text. `suppaftp` understands the two
//! layouts we meet, Unix `ls -l` and MS-DOS/IIS.

use serde::{Deserialize, Serialize};
use suppaftp::list::File;
use tracing::debug;

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
    /// Size as printed by the listing, when it has one.
    pub size: Option<u64>,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size: Some(size),
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            size: None,
        }
    }
}

impl From<&File> for RemoteEntry {
    fn from(file: &File) -> Self {
        if file.is_directory() {
            Self::dir(file.name())
        } else {
            Self::file(file.name(), file.size() as u64)
        }
    }
}

/// Parse one `LIST` line. Totals and blank lines yield `None`.
///
/// Lines in neither layout keep their last token as the name.
pub fn parse_list_line(line: &str) -> Option<RemoteEntry> {
    let mut fields = line.split_whitespace();
    let first = fields.next()?;
    if first.eq_ignore_ascii_case("total") && fields.clone().count() == 1 {
        return None;
    }

    match line.parse::<File>() {
        Ok(file) => Some(RemoteEntry::from(&file)),
        Err(e) => {
            debug!(line = %line, error = ?e, "Unrecognised LIST line");
            Some(RemoteEntry {
                name: fields.last().unwrap_or(first).to_string(),
                is_dir: first.starts_with(['d', 'D']),
                size: None,
            })
        }
    }
}
