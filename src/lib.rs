//! `mailgrab`: pull attachments out of an IMAP mailbox.
//!
//! Messages matching a search are streamed from the server, their MIME
//! trees are walked for parts whose content type is on an allow-list, and
//! each such part is written to an output directory and optionally handed
//! to a shell command.

pub mod config;
pub mod error;
pub mod export;
pub mod filter;
pub mod mailbox;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod postprocess;
