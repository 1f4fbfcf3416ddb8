//! Core data models for the bucket client.
//!
//! Descriptors are read-only snapshots of remote objects; the multipart
//! types describe how a local file is partitioned for transfer and for
//! entity-tag calculation.

pub mod bucket;
pub mod multipart;
pub mod object;
