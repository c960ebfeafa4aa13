//! Persisting extracted attachments to the output directory.

pub mod attachment;
