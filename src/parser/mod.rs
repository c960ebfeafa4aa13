//! Message parsing: envelope extraction and MIME part traversal.

pub mod envelope;
pub mod mime;
