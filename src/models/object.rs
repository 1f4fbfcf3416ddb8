//! Represents an object (file) stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};

/// User-defined metadata attached to an object (`x-amz-meta-*` without the prefix).
pub type ObjectMetadata = HashMap<String, String>;

/// Snapshot of a single remote object.
///
/// Produced by listing or by a direct key lookup and never changed in place.
/// Listing results carry no user metadata; a key lookup does.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ObjectDescriptor {
    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Size in bytes.
    pub size: u64,

    /// Entity tag without surrounding quotes.
    pub etag: String,

    /// Timestamp when object was last modified, if the store reported one.
    pub last_modified: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: ObjectMetadata,
}

impl ObjectDescriptor {
    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.split('/').last().unwrap_or(&self.key)
    }

    /// Zero-content placeholder keys like `run1/` that some clients create
    /// for folders.
    pub fn is_directory_marker(&self) -> bool {
        self.key.ends_with('/')
    }
}

impl fmt::Display for ObjectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}  {} bytes  {}", self.key, self.size, self.etag)
    }
}

/// Strip the quotes S3 puts around entity tags.
pub fn normalize_etag(raw: &str) -> String {
    raw.trim_matches('"').to_string()
}

/// What a download is asked to fetch: a known descriptor or a bare key that
/// still has to be looked up.
#[derive(Clone, Copy, Debug)]
pub enum ObjectRef<'a> {
    Key(&'a str),
    Descriptor(&'a ObjectDescriptor),
}

impl<'a> From<&'a str> for ObjectRef<'a> {
    fn from(key: &'a str) -> Self {
        ObjectRef::Key(key)
    }
}

impl<'a> From<&'a String> for ObjectRef<'a> {
    fn from(key: &'a String) -> Self {
        ObjectRef::Key(key.as_str())
    }
}

impl<'a> From<&'a ObjectDescriptor> for ObjectRef<'a> {
    fn from(descriptor: &'a ObjectDescriptor) -> Self {
        ObjectRef::Descriptor(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_last_key_segment() {
        let obj = ObjectDescriptor {
            key: "run1/lane2/sampleA.fastq".into(),
            size: 10,
            etag: "x".into(),
            last_modified: None,
            metadata: ObjectMetadata::new(),
        };
        assert_eq!(obj.file_name(), "sampleA.fastq");
    }

    #[test]
    fn trailing_slash_marks_a_directory() {
        let mut obj = ObjectDescriptor {
            key: "run1/".into(),
            size: 0,
            etag: "x".into(),
            last_modified: None,
            metadata: ObjectMetadata::new(),
        };
        assert!(obj.is_directory_marker());
        assert_eq!(obj.file_name(), "");

        obj.key = "run1/a.fastq".into();
        assert!(!obj.is_directory_marker());
    }

    #[test]
    fn normalize_etag_strips_quotes_only() {
        assert_eq!(normalize_etag("\"abc-2\""), "abc-2");
        assert_eq!(normalize_etag("abc"), "abc");
    }
}
