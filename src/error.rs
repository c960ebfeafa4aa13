//! Centralized error types for mailgrab.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::model::message::MessageId;

/// All errors produced by the mailgrab library.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The output directory could not be created.
    #[error("Error creating output dir '{path}': {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The mailbox server could not be reached or the TLS handshake failed.
    #[error("Failed to connect to '{server}': {reason}")]
    Connect { server: String, reason: String },

    /// The server rejected the credentials.
    #[error("Authentication failed for '{user}': {reason}")]
    Auth { user: String, reason: String },

    /// The folder could not be selected.
    #[error("Failed to select mailbox '{folder}': {reason}")]
    Select { folder: String, reason: String },

    /// The search command failed.
    #[error("Failed to search for messages: {0}")]
    Search(String),

    /// The bulk fetch failed part-way.
    #[error("Failed to fetch messages: {0}")]
    Fetch(String),

    /// A whole message could not be parsed as a MIME entity.
    #[error("Failed to read body of message {id}: {reason}")]
    MessageParse { id: MessageId, reason: String },

    /// A single MIME section could not be read.
    #[error("Failed to read multipart section {index}: {reason}")]
    PartParse { index: usize, reason: String },

    /// A part carries a `Content-Type` header that does not parse.
    #[error("Failed to get content type: {0}")]
    ContentType(String),

    /// Creating, writing or closing an output file failed.
    #[error("Error writing file '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The post-processing command could not be started.
    #[error("Failed to start command for '{path}': {source}")]
    CommandSpawn {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The post-processing command exited unsuccessfully.
    #[error("Command execution failed for '{path}': {status}")]
    Command { path: PathBuf, status: ExitStatus },

    /// A message-level failure stopped the run.
    #[error("Processing stopped at message {id}: {source}")]
    MessageAborted {
        id: MessageId,
        #[source]
        source: Box<Error>,
    },

    /// The fetch thread panicked before reporting its outcome.
    #[error("Fetch thread panicked")]
    ProducerPanicked,
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a `Write` variant from a path and an `io::Error`.
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}
