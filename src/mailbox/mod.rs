//! The mailbox collaborator: folder selection, search and streaming fetch.
//!
//! [`MailboxSession`] is the only surface the pipeline needs from the mail
//! server. [`imap::ImapSession`] implements it over IMAP/TLS; tests drive the
//! pipeline with an in-memory implementation.

pub mod imap;

use std::sync::mpsc::SyncSender;

use crate::error::Result;
use crate::model::message::{Message, MessageId};

/// Folder state reported on selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxInfo {
    /// Folder name as selected.
    pub name: String,
    /// Number of messages in the folder. Zero is a normal state, not an error.
    pub message_count: u32,
}

/// Search filters; every criterion that is set must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    /// Only messages without the `\Seen` flag.
    pub unseen_only: bool,
    /// Substring the subject must contain.
    pub subject_contains: Option<String>,
    /// Substring the `From` header must contain.
    pub sender_contains: Option<String>,
}

impl SearchCriteria {
    /// Render as an IMAP `SEARCH` key list (`ALL` when nothing is set).
    pub fn to_imap_query(&self) -> String {
        let mut keys = Vec::new();
        if self.unseen_only {
            keys.push("UNSEEN".to_string());
        }
        if let Some(subject) = non_empty(&self.subject_contains) {
            keys.push(format!("SUBJECT {}", quote(subject)));
        }
        if let Some(sender) = non_empty(&self.sender_contains) {
            keys.push(format!("FROM {}", quote(sender)));
        }
        if keys.is_empty() {
            return "ALL".to_string();
        }
        let query = keys.join(" ");
        if query.is_ascii() {
            query
        } else {
            format!("CHARSET UTF-8 {query}")
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// IMAP quoted string (RFC 3501 §4.3): backslash-escape `"` and `\`.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// A logged-in mailbox connection.
///
/// `fetch` runs on the producer thread while the pipeline consumes on the
/// caller's thread, hence the `Send` bound.
pub trait MailboxSession: Send {
    /// Select `name`; `read_only` opens it without changing flags.
    fn select_folder(&mut self, name: &str, read_only: bool) -> Result<MailboxInfo>;

    /// Return the identifiers of all messages matching `criteria`.
    fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<MessageId>>;

    /// Stream the full messages for `ids` into `sink`, in order.
    ///
    /// Blocks whenever the bounded channel is full. Returns early without
    /// error if the receiving side hangs up.
    fn fetch(&mut self, ids: &[MessageId], sink: SyncSender<Message>) -> Result<()>;

    /// End the session. Errors are ignored.
    fn logout(&mut self);
}
