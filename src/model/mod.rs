//! Core data model types for fetched messages and the attachments cut out of them.

pub mod attachment;
pub mod message;
