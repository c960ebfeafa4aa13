//! Attachment selection: content-type allow-list and filename resolution.

pub mod filename;

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::attachment::{AttachmentCandidate, MimePart};

/// Content type assumed for parts without a `Content-Type` header (RFC 2045 §5.2).
const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// The set of content types eligible for extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList(BTreeSet<String>);

impl AllowList {
    /// Parse a single type or a comma-separated list (`application/pdf,image/png`).
    ///
    /// Entries are trimmed and lower-cased; empty entries are ignored.
    pub fn parse(list: &str) -> Self {
        Self(
            list.split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        )
    }

    /// Whether `content_type` (already lower-cased) is allowed.
    pub fn contains(&self, content_type: &str) -> bool {
        self.0.contains(content_type)
    }

    /// `true` when no type is allowed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::parse("application/pdf")
    }
}

impl fmt::Display for AllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.0.iter().map(String::as_str).collect();
        f.write_str(&joined.join(","))
    }
}

/// Why a part was not turned into an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The content type is not in the allow-list.
    ContentType(String),
    /// Neither a `name` nor a `filename` parameter gave a usable name.
    NoName,
}

/// Result of running a part through the filter.
#[derive(Debug)]
pub enum Decision<'a> {
    /// The part should be written to disk.
    Accepted(AttachmentCandidate<'a>),
    /// The part is skipped. Not an error.
    Rejected(Rejection),
}

/// Decides which parts become attachments and where they are written.
#[derive(Debug, Clone)]
pub struct AttachmentFilter {
    allow: AllowList,
    output_dir: PathBuf,
}

impl AttachmentFilter {
    /// Create a filter writing accepted parts under `output_dir`.
    pub fn new(allow: AllowList, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            allow,
            output_dir: output_dir.into(),
        }
    }

    /// Classify one part.
    ///
    /// An unparseable `Content-Type` header is an error: it means the
    /// message itself is malformed.
    pub fn accept<'a>(&self, part: MimePart<'a>) -> Result<Decision<'a>> {
        if part.content_type_malformed {
            return Err(Error::ContentType(format!(
                "unparseable Content-Type header on part {}",
                part.index
            )));
        }

        let kind = part
            .content_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        if !self.allow.contains(&kind) {
            debug!(
                part = part.index,
                content_type = %kind,
                expected = %self.allow,
                "Skipping part with content"
            );
            return Ok(Decision::Rejected(Rejection::ContentType(kind)));
        }

        let Some(filename) = resolve_name(&part).and_then(filename::sanitize) else {
            return Ok(Decision::Rejected(Rejection::NoName));
        };

        let path = self.output_dir.join(&filename);
        Ok(Decision::Accepted(AttachmentCandidate {
            part,
            filename,
            path,
        }))
    }
}

/// `name` from `Content-Type`, else `filename` from `Content-Disposition`.
fn resolve_name<'p>(part: &'p MimePart<'_>) -> Option<&'p str> {
    let non_empty = |v: &&String| !v.trim().is_empty();
    part.content_type_params
        .get("name")
        .filter(non_empty)
        .or_else(|| part.disposition_params.get("filename").filter(non_empty))
        .map(String::as_str)
}
