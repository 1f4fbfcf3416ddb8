//! src/services/manager.rs
//!
//! HcpManager: bucket attachment, cached listing, search and verified
//! transfers on top of an [`ObjectBackend`].
//!
//! Object-level operations only exist on [`AttachedBucket`]. The manager
//! hands one out through [`HcpManager::bucket`], which is the single place
//! the "no bucket attached" condition is checked.

use crate::{
    config::AppConfig,
    errors::{HcpError, HcpResult},
    models::{
        bucket::BucketHandle,
        multipart::{CompletedPart, PartPlan, TransferConfig},
        object::{ObjectDescriptor, ObjectMetadata, ObjectRef},
    },
    services::{
        backend::{ObjectBackend, S3Backend, UploadBody},
        etag::{part_digests, plan_etag},
        progress::{ProgressReporter, ProgressSink, ProgressSource},
    },
};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use md5::Digest;
use std::{
    io::{self, ErrorKind, SeekFrom},
    ops::Range,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Objects at least this large are not read into memory by `read_object`.
const READ_OBJECT_LIMIT: u64 = 100_000;

/// Read size for upload bodies; progress is reported once per chunk.
const BODY_CHUNK: usize = 64 * 1024;

/// Entry point: owns the storage client and, once attached, one bucket session.
pub struct HcpManager {
    backend: Arc<dyn ObjectBackend>,
    transfer: TransferConfig,
    sink: ProgressSink,
    session: Option<AttachedBucket>,
}

impl HcpManager {
    /// Connect to the configured S3 endpoint. Progress goes to `sink`.
    pub fn new(config: &AppConfig, sink: ProgressSink) -> Self {
        let backend = S3Backend::new(&config.endpoint);
        Self::with_backend(Arc::new(backend), config.transfer.clone(), sink)
    }

    pub fn with_backend(
        backend: Arc<dyn ObjectBackend>,
        transfer: TransferConfig,
        sink: ProgressSink,
    ) -> Self {
        Self {
            backend,
            transfer,
            sink,
            session: None,
        }
    }

    /// List all available buckets at the endpoint.
    pub async fn list_buckets(&self) -> HcpResult<Vec<String>> {
        self.backend.list_buckets().await
    }

    /// Bind to `bucket`, dropping any session (and cached listing) held before.
    pub fn attach_bucket(&mut self, bucket: &str) -> &mut AttachedBucket {
        info!("attaching bucket {}", bucket);
        self.session.insert(AttachedBucket {
            handle: BucketHandle::new(bucket),
            backend: Arc::clone(&self.backend),
            transfer: self.transfer.clone(),
            sink: Arc::clone(&self.sink),
            objects: None,
        })
    }

    /// The attached session, or `UnattachedBucket`.
    pub fn bucket(&mut self) -> HcpResult<&mut AttachedBucket> {
        self.session.as_mut().ok_or(HcpError::UnattachedBucket)
    }
}

/// A session bound to one bucket, owning that bucket's cached listing.
pub struct AttachedBucket {
    handle: BucketHandle,
    backend: Arc<dyn ObjectBackend>,
    transfer: TransferConfig,
    sink: ProgressSink,
    objects: Option<Vec<ObjectDescriptor>>,
}

impl AttachedBucket {
    pub fn name(&self) -> &str {
        &self.handle.name
    }

    /// Return object with exact matching key, or `None` if it does not exist.
    pub async fn get_object(&self, key: &str) -> HcpResult<Option<ObjectDescriptor>> {
        self.backend.head_object(&self.handle.name, key).await
    }

    /// Return all objects in the bucket, listing the store only when no
    /// listing is cached or `force_reload` is set.
    pub async fn list_objects(&mut self, force_reload: bool) -> HcpResult<&[ObjectDescriptor]> {
        if force_reload || self.objects.is_none() {
            let listed = self.backend.list_objects(&self.handle.name).await?;
            debug!("cached {} objects from {}", listed.len(), self.handle);
            self.objects = Some(listed);
        }
        Ok(self.objects.as_deref().unwrap_or_default())
    }

    pub async fn get_objects(&mut self) -> HcpResult<&[ObjectDescriptor]> {
        self.list_objects(false).await
    }

    pub async fn reload_objects(&mut self) -> HcpResult<&[ObjectDescriptor]> {
        self.list_objects(true).await
    }

    /// Return all cached objects whose keys contain `needle` (case-sensitive).
    pub async fn search_objects(&mut self, needle: &str) -> HcpResult<Vec<ObjectDescriptor>> {
        let objects = self.list_objects(false).await?;
        Ok(objects
            .iter()
            .filter(|obj| obj.key.contains(needle))
            .cloned()
            .collect())
    }

    /// Upload a local file as `remote_key`, then verify the stored entity tag.
    ///
    /// On a checksum mismatch the remote object is deleted and
    /// `MismatchChecksum` is returned.
    #[instrument(skip(self, metadata))]
    pub async fn upload_file(
        &mut self,
        local_path: &Path,
        remote_key: &str,
        metadata: &ObjectMetadata,
    ) -> HcpResult<ObjectDescriptor> {
        let reporter = Arc::new(ProgressReporter::new(
            ProgressSource::LocalFile(local_path),
            Arc::clone(&self.sink),
        )?);
        let plan = PartPlan::new(reporter.total(), &self.transfer);
        let digests = part_digests(local_path, &plan).await?;
        let local_etag = plan_etag(&digests, &plan);
        debug!(
            "uploading {} bytes in {} part(s) of {} bytes",
            plan.size(),
            plan.part_count(),
            plan.part_size()
        );

        let sent = if plan.is_multipart() {
            self.send_multipart(local_path, remote_key, metadata, &plan, &digests, &reporter)
                .await
        } else {
            self.send_single(local_path, remote_key, metadata, &plan, &digests, &reporter)
                .await
        };
        reporter.finish();
        sent?;

        let remote = self.get_object(remote_key).await?;

        match remote {
            Some(obj) if obj.etag == local_etag => {
                info!("uploaded {} ({})", remote_key, obj.etag);
                self.remember(obj.clone());
                Ok(obj)
            }
            other => {
                let remote_etag = other.map(|obj| obj.etag);
                warn!(
                    "checksum mismatch for {}: local {}, remote {:?}",
                    remote_key, local_etag, remote_etag
                );
                if let Err(err) = self.delete_key(remote_key).await {
                    warn!("failed to remove {} after mismatch: {}", remote_key, err);
                }
                Err(HcpError::MismatchChecksum {
                    key: remote_key.to_string(),
                    local: local_etag,
                    remote: remote_etag,
                })
            }
        }
    }

    async fn send_single(
        &self,
        local_path: &Path,
        remote_key: &str,
        metadata: &ObjectMetadata,
        plan: &PartPlan,
        digests: &[Digest],
        reporter: &Arc<ProgressReporter>,
    ) -> HcpResult<()> {
        let whole = 0..plan.size();
        let digest = digests.first().copied().unwrap_or_else(|| md5::compute(b""));
        let body = file_body(local_path, whole, digest, Arc::clone(reporter)).await?;
        self.backend
            .put_object(&self.handle.name, remote_key, body, metadata)
            .await
    }

    async fn send_multipart(
        &self,
        local_path: &Path,
        remote_key: &str,
        metadata: &ObjectMetadata,
        plan: &PartPlan,
        digests: &[Digest],
        reporter: &Arc<ProgressReporter>,
    ) -> HcpResult<()> {
        let bucket = self.handle.name.as_str();
        let upload_id = self
            .backend
            .create_multipart_upload(bucket, remote_key, metadata)
            .await?;

        let uploaded = self
            .upload_parts(local_path, remote_key, &upload_id, plan, digests, reporter)
            .await;
        let completed = match uploaded {
            Ok(mut parts) => {
                parts.sort_by_key(|part| part.part_number);
                self.backend
                    .complete_multipart_upload(bucket, remote_key, &upload_id, parts)
                    .await
            }
            Err(err) => Err(err),
        };

        if let Err(err) = completed {
            if let Err(abort_err) = self
                .backend
                .abort_multipart_upload(bucket, remote_key, &upload_id)
                .await
            {
                warn!("failed to abort upload {}: {}", upload_id, abort_err);
            }
            return Err(err);
        }
        Ok(())
    }

    async fn upload_parts(
        &self,
        local_path: &Path,
        remote_key: &str,
        upload_id: &str,
        plan: &PartPlan,
        digests: &[Digest],
        reporter: &Arc<ProgressReporter>,
    ) -> HcpResult<Vec<CompletedPart>> {
        let bucket = self.handle.name.as_str();
        futures::stream::iter(plan.parts().zip(digests.iter().copied()))
            .map(|((part_number, range), digest)| async move {
                let body = file_body(local_path, range, digest, Arc::clone(reporter)).await?;
                self.backend
                    .upload_part(bucket, remote_key, upload_id, part_number, body)
                    .await
            })
            .buffer_unordered(self.transfer.max_concurrency.max(1))
            .try_collect()
            .await
    }

    /// Download an object to `local_path`.
    ///
    /// A directory destination receives the key's base name. An existing
    /// file is only replaced when `force` is set; otherwise
    /// `LocalFileExists` is returned and nothing is written.
    #[instrument(skip(self, obj))]
    pub async fn download_file<'a>(
        &self,
        obj: impl Into<ObjectRef<'a>>,
        local_path: &Path,
        force: bool,
    ) -> HcpResult<PathBuf> {
        let resolved;
        let obj = match obj.into() {
            ObjectRef::Descriptor(descriptor) => descriptor,
            ObjectRef::Key(key) => {
                resolved = self
                    .get_object(key)
                    .await?
                    .ok_or_else(|| HcpError::ObjectNotFound(key.to_string()))?;
                &resolved
            }
        };

        if obj.is_directory_marker() {
            return Err(HcpError::DirectoryMarker(obj.key.clone()));
        }

        let is_dir = match fs::metadata(local_path).await {
            Ok(meta) => meta.is_dir(),
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => return Err(err.into()),
        };
        let target = if is_dir {
            local_path.join(obj.file_name())
        } else {
            local_path.to_path_buf()
        };

        if !force && fs::try_exists(&target).await? {
            return Err(HcpError::LocalFileExists(target));
        }

        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(&parent).await?;
        }
        let file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| obj.file_name().to_string());
        let tmp_path = parent.join(format!(".{}.tmp-{}", file_name, Uuid::new_v4()));

        let reporter =
            ProgressReporter::new(ProgressSource::Remote(obj), Arc::clone(&self.sink))?;
        let written = self.stream_to(&obj.key, &tmp_path, &reporter).await;
        reporter.finish();
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        if let Err(err) = fs::rename(&tmp_path, &target).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&target).await?;
                fs::rename(&tmp_path, &target).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(HcpError::Io(err));
            }
        }

        info!("downloaded {} to {}", obj.key, target.display());
        Ok(target)
    }

    async fn stream_to(
        &self,
        key: &str,
        tmp_path: &Path,
        reporter: &ProgressReporter,
    ) -> HcpResult<()> {
        let mut body = self.backend.get_object(&self.handle.name, key).await?;
        let mut file = File::create(tmp_path).await?;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            reporter.sample(chunk.len() as u64);
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Delete the provided object with a single-key batch request.
    pub async fn delete_object(&mut self, obj: &ObjectDescriptor) -> HcpResult<()> {
        self.delete_key(&obj.key).await
    }

    async fn delete_key(&mut self, key: &str) -> HcpResult<()> {
        self.backend
            .delete_objects(&self.handle.name, &[key.to_string()])
            .await?;
        debug!("deleted {} from {}", key, self.handle);
        self.forget(key);
        Ok(())
    }

    /// Read the object content as text. Objects of 100 000 bytes or more
    /// yield an empty string.
    pub async fn read_object(&self, obj: &ObjectDescriptor) -> HcpResult<String> {
        if obj.size >= READ_OBJECT_LIMIT {
            return Ok(String::new());
        }
        let body = self.backend.get_object(&self.handle.name, &obj.key).await?;
        let chunks: Vec<Bytes> = body.try_collect().await?;
        String::from_utf8(chunks.concat())
            .map_err(|err| HcpError::Io(io::Error::new(ErrorKind::InvalidData, err)))
    }

    fn remember(&mut self, obj: ObjectDescriptor) {
        if let Some(objects) = self.objects.as_mut() {
            match objects.iter_mut().find(|cached| cached.key == obj.key) {
                Some(cached) => *cached = obj,
                None => objects.push(obj),
            }
        }
    }

    fn forget(&mut self, key: &str) {
        if let Some(objects) = self.objects.as_mut() {
            objects.retain(|cached| cached.key != key);
        }
    }
}

/// Stream `range` of `path` as a request body, sampling progress per chunk.
async fn file_body(
    path: &Path,
    range: Range<u64>,
    md5: Digest,
    reporter: Arc<ProgressReporter>,
) -> HcpResult<UploadBody> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(range.start)).await?;
    let length = range.end - range.start;
    let stream = ReaderStream::with_capacity(file.take(length), BODY_CHUNK)
        .inspect_ok(move |chunk| reporter.sample(chunk.len() as u64));
    Ok(UploadBody {
        stream: Box::pin(stream),
        length,
        md5,
    })
}
