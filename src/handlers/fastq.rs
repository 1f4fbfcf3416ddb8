//! Upload-side file checks and the tag-map file that accompanies an upload.

use crate::errors::{HcpError, HcpResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

const FASTQ_SUFFIXES: [&str; 4] = [".fastq", ".fq", ".fastq.gz", ".fq.gz"];

/// Reject files that do not carry a FASTQ suffix.
pub fn verify_fq_suffix(path: &Path) -> HcpResult<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if FASTQ_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
        Ok(())
    } else {
        Err(HcpError::InvalidUploadFile {
            path: path.to_path_buf(),
            reason: format!("expected one of {}", FASTQ_SUFFIXES.join(", ")),
        })
    }
}

/// A local file scheduled for upload and its key relative to the destination.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadCandidate {
    pub path: PathBuf,
    pub relative_key: String,
}

/// Every regular file under `input` (or `input` itself), with `/`-joined
/// keys relative to the input directory.
pub fn collect_candidates(input: &Path) -> HcpResult<Vec<UploadCandidate>> {
    if !input.is_dir() {
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| HcpError::InvalidUploadFile {
                path: input.to_path_buf(),
                reason: "path has no file name".into(),
            })?;
        return Ok(vec![UploadCandidate {
            path: input.to_path_buf(),
            relative_key: name,
        }]);
    }

    let mut candidates = Vec::new();
    for entry in WalkDir::new(input).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|err| HcpError::Io(err.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(input).unwrap_or(entry.path());
        let relative_key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        candidates.push(UploadCandidate {
            path: entry.path().to_path_buf(),
            relative_key,
        });
    }
    Ok(candidates)
}

/// Join an optional remote directory and a relative key.
pub fn remote_key(destination: Option<&str>, relative: &str) -> String {
    match destination.map(|d| d.trim_matches('/')) {
        Some(dir) if !dir.is_empty() => format!("{}/{}", dir, relative),
        _ => relative.to_string(),
    }
}

/// One uploaded file as recorded in the tag map.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TagEntry {
    pub tag: String,
    pub file_name: String,
    pub size: u64,
    pub added_at: DateTime<Utc>,
}

/// Remote key -> tag entry, persisted as pretty JSON next to the upload.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct TagMap {
    pub entries: BTreeMap<String, TagEntry>,
}

impl TagMap {
    /// Load an existing map, or start an empty one when `path` is absent.
    pub fn load_or_default(path: &Path) -> HcpResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn insert(&mut self, key: &str, path: &Path, tag: &str) -> HcpResult<()> {
        let size = std::fs::metadata(path)?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.entries.insert(
            key.to_string(),
            TagEntry {
                tag: tag.to_string(),
                file_name,
                size,
                added_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn save(&self, path: &Path) -> HcpResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
