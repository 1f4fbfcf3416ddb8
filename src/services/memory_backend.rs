//! In-memory [`ObjectBackend`] with S3 entity-tag semantics, used by the tests.

use crate::{
    errors::{HcpError, HcpResult},
    models::{
        multipart::CompletedPart,
        object::{ObjectDescriptor, ObjectMetadata},
    },
    services::{
        backend::{ObjectBackend, ObjectBody, UploadBody},
        etag::{composite_etag, single_etag},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use std::{
    collections::{BTreeMap, HashMap},
    io,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use uuid::Uuid;

const BODY_CHUNK: usize = 64 * 1024;

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    metadata: ObjectMetadata,
}

struct PendingUpload {
    bucket: String,
    key: String,
    metadata: ObjectMetadata,
    parts: BTreeMap<i32, Bytes>,
}

#[derive(Default)]
pub struct MemoryBackend {
    buckets: Mutex<BTreeMap<String, BTreeMap<String, StoredObject>>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    tamper_etags: AtomicBool,
    list_calls: AtomicUsize,
    aborted: AtomicUsize,
    fail_part: Mutex<Option<i32>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(self, name: &str) -> Self {
        self.buckets
            .lock()
            .unwrap()
            .insert(name.to_string(), BTreeMap::new());
        self
    }

    /// Store `data` under `key` as a single-part object.
    pub fn seed(&self, bucket: &str, key: &str, data: &[u8]) {
        let stored = StoredObject {
            data: Bytes::copy_from_slice(data),
            etag: single_etag(data),
            metadata: ObjectMetadata::new(),
        };
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), stored);
    }

    /// Make every subsequent write record a wrong entity tag.
    pub fn tamper_etags(&self) {
        self.tamper_etags.store(true, Ordering::SeqCst);
    }

    /// Make uploads of `part_number` fail.
    pub fn fail_part(&self, part_number: i32) {
        *self.fail_part.lock().unwrap() = Some(part_number);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn aborted_uploads(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn pending_uploads(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .is_some_and(|objs| objs.contains_key(key))
    }

    pub fn data(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .and_then(|objs| objs.get(key))
            .map(|o| o.data.clone())
    }

    fn store(&self, bucket: &str, key: &str, data: Bytes, etag: String, metadata: ObjectMetadata) {
        let etag = if self.tamper_etags.load(Ordering::SeqCst) {
            format!("0{etag}")
        } else {
            etag
        };
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    data,
                    etag,
                    metadata,
                },
            );
    }

    fn describe(key: &str, obj: &StoredObject, with_metadata: bool) -> ObjectDescriptor {
        ObjectDescriptor {
            key: key.to_string(),
            size: obj.data.len() as u64,
            etag: obj.etag.clone(),
            last_modified: Some(Utc::now()),
            metadata: if with_metadata {
                obj.metadata.clone()
            } else {
                ObjectMetadata::new()
            },
        }
    }
}

/// Drain an upload body chunk by chunk, rejecting it like S3 would when the
/// length or Content-MD5 disagree with what arrived.
async fn receive(body: UploadBody) -> HcpResult<Bytes> {
    let chunks: Vec<Bytes> = body.stream.try_collect().await?;
    let data = Bytes::from(chunks.concat());
    if data.len() as u64 != body.length {
        return Err(HcpError::backend(io::Error::new(
            io::ErrorKind::InvalidData,
            "IncompleteBody",
        )));
    }
    if md5::compute(&data) != body.md5 {
        return Err(HcpError::backend(io::Error::new(
            io::ErrorKind::InvalidData,
            "BadDigest",
        )));
    }
    Ok(data)
}

fn missing_bucket(bucket: &str) -> HcpError {
    HcpError::backend(io::Error::new(
        io::ErrorKind::NotFound,
        format!("NoSuchBucket: {bucket}"),
    ))
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn list_buckets(&self) -> HcpResult<Vec<String>> {
        Ok(self.buckets.lock().unwrap().keys().cloned().collect())
    }

    async fn list_objects(&self, bucket: &str) -> HcpResult<Vec<ObjectDescriptor>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let buckets = self.buckets.lock().unwrap();
        let objects = buckets.get(bucket).ok_or_else(|| missing_bucket(bucket))?;
        Ok(objects
            .iter()
            .map(|(key, obj)| Self::describe(key, obj, false))
            .collect())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> HcpResult<Option<ObjectDescriptor>> {
        let buckets = self.buckets.lock().unwrap();
        let objects = buckets.get(bucket).ok_or_else(|| missing_bucket(bucket))?;
        Ok(objects.get(key).map(|obj| Self::describe(key, obj, true)))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: UploadBody,
        metadata: &ObjectMetadata,
    ) -> HcpResult<()> {
        let body = receive(body).await?;
        let etag = single_etag(&body);
        self.store(bucket, key, body, etag, metadata.clone());
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> HcpResult<String> {
        let upload_id = Uuid::new_v4().to_string();
        self.uploads.lock().unwrap().insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                metadata: metadata.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: UploadBody,
    ) -> HcpResult<CompletedPart> {
        if *self.fail_part.lock().unwrap() == Some(part_number) {
            return Err(HcpError::backend(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset during part upload",
            )));
        }
        let body = receive(body).await?;
        let etag = single_etag(&body);
        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads.get_mut(upload_id).ok_or_else(|| {
            HcpError::backend(io::Error::new(io::ErrorKind::NotFound, "NoSuchUpload"))
        })?;
        upload.parts.insert(part_number, body);
        Ok(CompletedPart { part_number, etag })
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> HcpResult<()> {
        let upload = self.uploads.lock().unwrap().remove(upload_id).ok_or_else(|| {
            HcpError::backend(io::Error::new(io::ErrorKind::NotFound, "NoSuchUpload"))
        })?;

        let mut data = Vec::new();
        let mut digests = Vec::with_capacity(parts.len());
        for part in &parts {
            let body = upload.parts.get(&part.part_number).ok_or_else(|| {
                HcpError::backend(io::Error::new(io::ErrorKind::InvalidInput, "InvalidPart"))
            })?;
            digests.push(md5::compute(body));
            data.extend_from_slice(body);
        }

        let etag = composite_etag(&digests);
        self.store(
            &upload.bucket,
            &upload.key,
            Bytes::from(data),
            etag,
            upload.metadata,
        );
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> HcpResult<()> {
        self.uploads.lock().unwrap().remove(upload_id);
        self.aborted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> HcpResult<ObjectBody> {
        let data = self.data(bucket, key).ok_or_else(|| {
            HcpError::backend(io::Error::new(io::ErrorKind::NotFound, "NoSuchKey"))
        })?;
        let chunks: Vec<io::Result<Bytes>> = data
            .chunks(BODY_CHUNK)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> HcpResult<()> {
        let mut buckets = self.buckets.lock().unwrap();
        let objects = buckets.get_mut(bucket).ok_or_else(|| missing_bucket(bucket))?;
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }
}
