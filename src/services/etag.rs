//! Local reproduction of the entity tags an S3-compatible store assigns.
//!
//! Single-part uploads get the plain md5 of the content. Multipart uploads get
//! the md5 of the concatenated binary part digests, hex encoded, followed by
//! `-<part count>`.

use crate::{errors::HcpResult, models::multipart::PartPlan};
use md5::{Context, Digest};
use std::path::Path;
use tokio::{fs::File, io::AsyncReadExt};

const READ_BUFFER: usize = 256 * 1024;

/// Entity tag of a body stored in one piece.
pub fn single_etag(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Entity tag of a multipart object built from its part digests, in part order.
pub fn composite_etag(part_digests: &[Digest]) -> String {
    let mut outer = Context::new();
    for digest in part_digests {
        outer.consume(digest.0);
    }
    format!("{:x}-{}", outer.compute(), part_digests.len())
}

/// md5 digest of every part of `path` as laid out by `plan`, in part order.
/// A single-part plan yields one digest of the whole file.
pub async fn part_digests(path: &Path, plan: &PartPlan) -> HcpResult<Vec<Digest>> {
    let mut file = File::open(path).await?;
    let mut buf = vec![0u8; READ_BUFFER];

    let mut digests = Vec::with_capacity(plan.part_count() as usize);
    for (_, range) in plan.parts() {
        let mut remaining = range.end - range.start;
        let mut ctx = Context::new();
        while remaining > 0 {
            let want = remaining.min(READ_BUFFER as u64) as usize;
            file.read_exact(&mut buf[..want]).await?;
            ctx.consume(&buf[..want]);
            remaining -= want as u64;
        }
        digests.push(ctx.compute());
    }
    Ok(digests)
}

/// Entity tag the store will report for an upload with these part digests.
pub fn plan_etag(digests: &[Digest], plan: &PartPlan) -> String {
    match digests {
        [single] if !plan.is_multipart() => format!("{:x}", single),
        _ => composite_etag(digests),
    }
}
