//! One handler per CLI subcommand.
//!
//! Handlers work on an attached bucket, print results to the writer they are
//! given and report progress through `tracing`.

use crate::{
    errors::{HcpError, HcpResult},
    handlers::{
        fastq::{TagMap, collect_candidates, remote_key, verify_fq_suffix},
        prompt::Confirm,
    },
    models::object::ObjectMetadata,
    services::manager::{AttachedBucket, HcpManager},
};
use std::{
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, warn};

/// Queries to run for `search`: the single query, the non-blank lines of
/// `file`, or the empty query (matches everything) when neither is given.
pub fn collect_queries(query: Option<String>, file: Option<&Path>) -> HcpResult<Vec<String>> {
    let mut queries: Vec<String> = query.into_iter().collect();
    if let Some(file) = file {
        let text = std::fs::read_to_string(file)?;
        queries.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
    }
    if queries.is_empty() {
        queries.push(String::new());
    }
    Ok(queries)
}

/// Print every hit for each query. Returns the number of hits printed.
pub async fn search(
    bucket: &mut AttachedBucket,
    queries: &[String],
    json: bool,
    reload: bool,
    out: &mut impl Write,
) -> HcpResult<usize> {
    if reload {
        bucket.reload_objects().await?;
    } else {
        bucket.get_objects().await?;
    }

    let mut printed = 0;
    for query in queries {
        if queries.len() > 1 {
            info!("[-- query: {} --]", query);
        }
        let hits = bucket.search_objects(query).await?;
        if hits.is_empty() {
            info!("No results found for: {}", query);
            continue;
        }
        for hit in &hits {
            if json {
                writeln!(out, "{}", serde_json::to_string(hit)?)?;
            } else {
                writeln!(out, "{}", hit)?;
            }
        }
        printed += hits.len();
    }
    Ok(printed)
}

/// Delete every match of `query` the operator confirms.
pub async fn delete(
    bucket: &mut AttachedBucket,
    query: &str,
    confirm: &mut dyn Confirm,
) -> HcpResult<usize> {
    let hits = bucket.search_objects(query).await?;
    if hits.is_empty() {
        info!("File: {} does not exist on {}", query, bucket.name());
        return Ok(0);
    }
    info!("Found {} files matching query", hits.len());

    let mut deleted = 0;
    for obj in &hits {
        if !confirm.confirm(&format!("Delete {}?", obj.key))? {
            debug!("kept {}", obj.key);
            continue;
        }
        bucket.delete_object(obj).await?;
        info!("deleted {}", obj.key);
        deleted += 1;
    }
    Ok(deleted)
}

#[derive(Debug, Default, PartialEq)]
pub struct UploadSummary {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Upload FASTQ files under `input`, keyed `<destination>/<relative path>`
/// and tagged with `tag`, then upload the tag map written to `meta_path`.
///
/// Files without a FASTQ suffix are skipped. A failed file does not stop
/// the others; it is counted in the summary.
pub async fn upload(
    bucket: &mut AttachedBucket,
    input: &Path,
    destination: Option<&str>,
    tag: &str,
    meta_path: &Path,
) -> HcpResult<UploadSummary> {
    let mut summary = UploadSummary::default();
    let mut tags = TagMap::load_or_default(meta_path)?;
    let mut metadata = ObjectMetadata::new();
    metadata.insert("tag".to_string(), tag.to_string());

    for candidate in collect_candidates(input)? {
        if let Err(err) = verify_fq_suffix(&candidate.path) {
            debug!("skipping: {}", err);
            summary.skipped += 1;
            continue;
        }

        let key = remote_key(destination, &candidate.relative_key);
        match bucket.upload_file(&candidate.path, &key, &metadata).await {
            Ok(_) => {
                tags.insert(&key, &candidate.path, tag)?;
                summary.uploaded += 1;
            }
            Err(err) => {
                error!("failed to upload {}: {}", candidate.path.display(), err);
                summary.failed += 1;
            }
        }
    }

    if summary.uploaded == 0 {
        warn!("nothing uploaded from {}", input.display());
        return Ok(summary);
    }

    tags.save(meta_path)?;
    let meta_name = meta_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| HcpError::InvalidUploadFile {
            path: meta_path.to_path_buf(),
            reason: "metadata path has no file name".into(),
        })?;
    let meta_key = remote_key(destination, &meta_name);
    bucket
        .upload_file(meta_path, &meta_key, &ObjectMetadata::new())
        .await?;
    info!(
        "uploaded {} file(s), tag map at {} and {}",
        summary.uploaded,
        meta_path.display(),
        meta_key
    );
    Ok(summary)
}

/// Download matches of `query` into `destination`.
///
/// `fast` treats the query as an exact key. Directory markers among the
/// matches are skipped. A single match is downloaded directly; with several,
/// each one is offered through `confirm`.
pub async fn download(
    bucket: &mut AttachedBucket,
    destination: &Path,
    query: &str,
    fast: bool,
    force: bool,
    confirm: &mut dyn Confirm,
) -> HcpResult<Vec<PathBuf>> {
    if fast {
        let saved = bucket.download_file(query, destination, force).await?;
        return Ok(vec![saved]);
    }

    let (markers, hits): (Vec<_>, Vec<_>) = bucket
        .search_objects(query)
        .await?
        .into_iter()
        .partition(|obj| obj.is_directory_marker());
    for marker in &markers {
        debug!("skipping directory marker {}", marker.key);
    }

    match hits.as_slice() {
        [] => {
            info!("File: {} does not exist on {}", query, bucket.name());
            Ok(Vec::new())
        }
        [only] => {
            let saved = bucket.download_file(only, destination, force).await?;
            Ok(vec![saved])
        }
        many => {
            info!("Found {} files matching query", many.len());
            let mut saved = Vec::new();
            for obj in many {
                if confirm.confirm(&format!("Download {}?", obj.key))? {
                    saved.push(bucket.download_file(obj, destination, force).await?);
                }
            }
            Ok(saved)
        }
    }
}

/// Print every bucket name visible at the endpoint.
pub async fn buckets(manager: &HcpManager, out: &mut impl Write) -> HcpResult<usize> {
    let names = manager.list_buckets().await?;
    for name in &names {
        writeln!(out, "{}", name)?;
    }
    Ok(names.len())
}

/// Print the text of the object stored under `key`.
pub async fn read(bucket: &AttachedBucket, key: &str, out: &mut impl Write) -> HcpResult<()> {
    let obj = bucket
        .get_object(key)
        .await?
        .ok_or_else(|| HcpError::ObjectNotFound(key.to_string()))?;
    let text = bucket.read_object(&obj).await?;
    if text.is_empty() && obj.size > 0 {
        warn!("{} is {} bytes, too large to print", key, obj.size);
        return Ok(());
    }
    write!(out, "{}", text)?;
    Ok(())
}
