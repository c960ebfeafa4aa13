//! MIME parts and the attachment artifacts derived from them.
//!
//! A [`MimePart`] borrows its decoded body from the parsed message, so it
//! only lives as long as the message that owns it. [`SavedAttachment`] and
//! [`CommandResult`] are the owned results of writing and post-processing.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitStatus;

use chrono::{DateTime, Utc};

/// A leaf node of a message's MIME tree.
#[derive(Debug, Clone)]
pub struct MimePart<'a> {
    /// Position of the part in top-to-bottom order (0 for a single-part message).
    pub index: usize,

    /// Lower-cased `type/subtype`, `None` when the part has no `Content-Type` header.
    pub content_type: Option<String>,

    /// `true` if a `Content-Type` header is present but could not be parsed.
    pub content_type_malformed: bool,

    /// `Content-Type` parameters, keys lower-cased (e.g. `name`, `charset`).
    pub content_type_params: BTreeMap<String, String>,

    /// `Content-Disposition` parameters, keys lower-cased (e.g. `filename`).
    pub disposition_params: BTreeMap<String, String>,

    /// Decoded body (transfer encoding already removed).
    pub body: &'a [u8],
}

/// A part that passed the allow-list and has a usable filename.
#[derive(Debug, Clone)]
pub struct AttachmentCandidate<'a> {
    /// The underlying part.
    pub part: MimePart<'a>,

    /// Sanitized filename (a single path component).
    pub filename: String,

    /// Destination: the output directory joined with `filename`.
    pub path: PathBuf,
}

/// An attachment persisted to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedAttachment {
    /// Where the file was written.
    pub path: PathBuf,

    /// Envelope date of the owning message, applied as access/modification time.
    pub original_timestamp: DateTime<Utc>,

    /// Number of bytes written.
    pub size: u64,
}

impl SavedAttachment {
    /// Path of the sidecar file that holds captured command output.
    pub fn sidecar_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".out");
        PathBuf::from(name)
    }
}

/// Outcome of running the post-processing command once.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the shell.
    pub status: ExitStatus,

    /// Interleaved stdout and stderr. Empty unless output was captured.
    pub output: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_path_appends_suffix() {
        let saved = SavedAttachment {
            path: PathBuf::from("output/report.v2.pdf"),
            original_timestamp: DateTime::UNIX_EPOCH,
            size: 0,
        };
        assert_eq!(saved.sidecar_path(), PathBuf::from("output/report.v2.pdf.out"));
    }
}
