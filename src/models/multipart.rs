//! Multipart partitioning of a local file.
//!
//! The same [`PartPlan`] drives both the transfer and the local entity-tag
//! calculation, so the part boundaries cannot drift apart.

use std::ops::Range;

const MIB: u64 = 1024 * 1024;

/// Smallest part size S3 accepts for every part but the last.
pub const MIN_PART_SIZE: u64 = 5 * MIB;
/// Largest single part S3 accepts.
pub const MAX_PART_SIZE: u64 = 5 * 1024 * MIB;
/// Maximum number of parts in one multipart upload.
pub const MAX_PARTS: u64 = 10_000;

/// Tunables for large-file transfers, read once at startup.
#[derive(Clone, Debug, PartialEq)]
pub struct TransferConfig {
    /// Files of at least this many bytes are sent as multipart uploads.
    pub size_threshold: u64,

    /// Parts transferred in parallel.
    pub max_concurrency: usize,

    /// Requested bytes per part.
    pub chunk_size: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            size_threshold: 8 * MIB,
            max_concurrency: 10,
            chunk_size: 8 * MIB,
        }
    }
}

/// How a file of a given size is split for upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartPlan {
    size: u64,
    part_size: u64,
    multipart: bool,
}

impl PartPlan {
    pub fn new(size: u64, config: &TransferConfig) -> Self {
        if size < config.size_threshold {
            return Self {
                size,
                part_size: size,
                multipart: false,
            };
        }

        let mut part_size = config.chunk_size.clamp(MIN_PART_SIZE, MAX_PART_SIZE);
        while size.div_ceil(part_size) > MAX_PARTS {
            part_size *= 2;
        }

        Self {
            size,
            part_size,
            multipart: true,
        }
    }

    pub fn is_multipart(&self) -> bool {
        self.multipart
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn part_count(&self) -> u64 {
        if !self.multipart {
            return 1;
        }
        // An empty file still uploads one (empty) part.
        self.size.div_ceil(self.part_size).max(1)
    }

    /// Byte ranges of every part, in part-number order.
    pub fn parts(&self) -> impl Iterator<Item = (i32, Range<u64>)> + '_ {
        (0..self.part_count()).map(move |idx| {
            let start = idx * self.part_size;
            let end = (start + self.part_size).min(self.size);
            ((idx + 1) as i32, start..end)
        })
    }
}

/// A part the store acknowledged.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletedPart {
    /// Part number (1-based).
    pub part_number: i32,

    /// ETag hash for this part, unquoted.
    pub etag: String,
}
