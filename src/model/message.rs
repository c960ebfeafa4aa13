//! Fetched message and its envelope.

use chrono::{DateTime, Utc};

/// Identifier the mailbox assigns to a message (an IMAP UID).
pub type MessageId = u32;

/// Message metadata, independent of the body content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Decoded subject line (RFC 2047 encoded-words resolved).
    pub subject: String,

    /// Date from the `Date:` header, falling back to the server's
    /// INTERNALDATE, then to the Unix epoch.
    pub date: DateTime<Utc>,

    /// First `From:` address.
    pub sender: String,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            subject: String::new(),
            date: DateTime::UNIX_EPOCH,
            sender: String::new(),
        }
    }
}

/// A message streamed from the mailbox.
///
/// Consumed exactly once by the pipeline and dropped afterwards.
#[derive(Debug, Clone)]
pub struct Message {
    /// Mailbox-assigned identity.
    pub id: MessageId,

    /// Subject, date and sender.
    pub envelope: Envelope,

    /// Raw RFC 5322 bytes (headers + body).
    pub body: Vec<u8>,
}

impl Message {
    /// Build a message from raw RFC 5322 bytes, deriving the envelope from its headers.
    ///
    /// `internal_date` is the server-side arrival time, used when the
    /// `Date:` header is missing or unparseable.
    pub fn from_rfc822(
        id: MessageId,
        body: Vec<u8>,
        internal_date: Option<DateTime<Utc>>,
    ) -> Self {
        let envelope = crate::parser::envelope::read_envelope(&body, internal_date);
        Self { id, envelope, body }
    }
}
