//! Identifies the remote bucket a session is bound to.

use std::fmt;

/// A remote bucket, addressed by name.
///
/// Holding one means the bucket was attached; it is not a proof that the
/// bucket exists on the endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketHandle {
    pub name: String,
}

impl BucketHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for BucketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
