//! Storage client seam.
//!
//! [`ObjectBackend`] exposes the primitive calls the bucket manager
//! orchestrates. [`S3Backend`] talks to any S3-compatible endpoint through
//! `aws-sdk-s3`; transport, signing and retries stay inside the SDK.

use crate::{
    errors::{HcpError, HcpResult},
    models::{
        multipart::CompletedPart,
        object::{ObjectDescriptor, ObjectMetadata, normalize_etag},
    },
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{
        BehaviorVersion, Builder as S3ConfigBuilder, Credentials, Region,
        RequestChecksumCalculation, ResponseChecksumValidation,
    },
    primitives::{ByteStream, DateTime as SmithyDateTime},
    types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart, Delete, ObjectIdentifier},
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, TryStreamExt};
use http_body::Frame;
use http_body_util::StreamBody;
use md5::Digest;
use std::{io, pin::Pin};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Streaming body of a downloaded object.
pub type ObjectBody = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Chunks of an upload request body, read from disk as they are sent.
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>;

/// One upload request body with the length and digest the store checks it against.
pub struct UploadBody {
    pub stream: BodyStream,
    pub length: u64,
    pub md5: Digest,
}

#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Names of all buckets visible at the endpoint.
    async fn list_buckets(&self) -> HcpResult<Vec<String>>;

    /// Every object in `bucket`, in the store's listing order.
    async fn list_objects(&self, bucket: &str) -> HcpResult<Vec<ObjectDescriptor>>;

    /// Metadata for `key`; `Ok(None)` when the key does not exist.
    async fn head_object(&self, bucket: &str, key: &str) -> HcpResult<Option<ObjectDescriptor>>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: UploadBody,
        metadata: &ObjectMetadata,
    ) -> HcpResult<()>;

    /// Start a multipart upload and return its upload id.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> HcpResult<String>;

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: UploadBody,
    ) -> HcpResult<CompletedPart>;

    /// `parts` must be sorted by part number.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> HcpResult<()>;

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str)
    -> HcpResult<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> HcpResult<ObjectBody>;

    /// Batch delete. Keys that are already absent are not an error.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> HcpResult<()>;
}

/// Connection parameters for an S3-compatible endpoint.
#[derive(Clone)]
pub struct S3Endpoint {
    pub url: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// [`ObjectBackend`] over `aws-sdk-s3`.
#[derive(Clone)]
pub struct S3Backend {
    client: Client,
}

impl S3Backend {
    pub fn new(endpoint: &S3Endpoint) -> Self {
        let credentials = Credentials::new(
            &endpoint.access_key_id,
            &endpoint.secret_access_key,
            None,
            None,
            "hcp-static",
        );
        let config = S3ConfigBuilder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&endpoint.url)
            .region(Region::new(endpoint.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true)
            // Appliances that predate flexible checksums reject the SDK defaults.
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            .build();

        Self {
            client: Client::from_conf(config),
        }
    }
}

fn content_md5(digest: &Digest) -> String {
    general_purpose::STANDARD.encode(digest.0)
}

/// Hand a streamed body to the SDK. The SDK cannot rewind it, so a failed
/// request is not retried.
fn byte_stream(stream: BodyStream) -> ByteStream {
    ByteStream::from_body_1_x(StreamBody::new(stream.map_ok(Frame::data)))
}

fn content_length(length: u64) -> HcpResult<i64> {
    i64::try_from(length).map_err(HcpError::backend)
}

fn to_chrono(ts: &SmithyDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn list_buckets(&self) -> HcpResult<Vec<String>> {
        let resp = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(HcpError::backend)?;

        Ok(resp
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(str::to_string))
            .collect())
    }

    async fn list_objects(&self, bucket: &str) -> HcpResult<Vec<ObjectDescriptor>> {
        let mut objects = Vec::new();
        let mut continuation_token = None;
        loop {
            let mut req = self.client.list_objects_v2().bucket(bucket);
            if let Some(token) = continuation_token {
                req = req.continuation_token(token);
            }
            let resp = req.send().await.map_err(HcpError::backend)?;

            for obj in resp.contents() {
                let Some(key) = obj.key() else {
                    continue;
                };
                objects.push(ObjectDescriptor {
                    key: key.to_string(),
                    size: obj.size().unwrap_or_default().max(0) as u64,
                    etag: obj.e_tag().map(normalize_etag).unwrap_or_default(),
                    last_modified: obj.last_modified().and_then(to_chrono),
                    metadata: ObjectMetadata::new(),
                });
            }

            continuation_token = resp.next_continuation_token().map(str::to_string);
            if continuation_token.is_none() {
                break;
            }
        }
        debug!("listed {} objects in bucket {}", objects.len(), bucket);
        Ok(objects)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> HcpResult<Option<ObjectDescriptor>> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(resp) => Ok(Some(ObjectDescriptor {
                key: key.to_string(),
                size: resp.content_length().unwrap_or_default().max(0) as u64,
                etag: resp.e_tag().map(normalize_etag).unwrap_or_default(),
                last_modified: resp.last_modified().and_then(to_chrono),
                metadata: resp.metadata().cloned().unwrap_or_default(),
            })),
            Err(err) => {
                let not_found = err.as_service_error().is_some_and(|e| e.is_not_found())
                    || err.raw_response().is_some_and(|r| r.status().as_u16() == 404);
                if not_found {
                    debug!("object {} not found in bucket {}", key, bucket);
                    Ok(None)
                } else {
                    Err(HcpError::backend(err))
                }
            }
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: UploadBody,
        metadata: &ObjectMetadata,
    ) -> HcpResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_md5(content_md5(&body.md5))
            .content_length(content_length(body.length)?)
            .set_metadata(Some(metadata.clone()))
            .body(byte_stream(body.stream))
            .send()
            .await
            .map_err(HcpError::backend)?;
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> HcpResult<String> {
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .map_err(HcpError::backend)?;

        resp.upload_id().map(str::to_string).ok_or_else(|| {
            HcpError::backend(io::Error::new(
                io::ErrorKind::InvalidData,
                "store returned no multipart upload id",
            ))
        })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: UploadBody,
    ) -> HcpResult<CompletedPart> {
        let resp = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_md5(content_md5(&body.md5))
            .content_length(content_length(body.length)?)
            .body(byte_stream(body.stream))
            .send()
            .await
            .map_err(HcpError::backend)?;

        Ok(CompletedPart {
            part_number,
            etag: resp.e_tag().map(normalize_etag).unwrap_or_default(),
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> HcpResult<()> {
        let parts = parts
            .into_iter()
            .map(|p| {
                S3CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(format!("\"{}\"", p.etag))
                    .build()
            })
            .collect::<Vec<_>>();
        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(upload)
            .send()
            .await
            .map_err(HcpError::backend)?;
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> HcpResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(HcpError::backend)?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> HcpResult<ObjectBody> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(HcpError::backend)?;

        let reader = resp.body.into_async_read();
        Ok(ReaderStream::new(reader).boxed())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> HcpResult<()> {
        let identifiers = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(HcpError::backend)?;
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(HcpError::backend)?;

        let resp = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(HcpError::backend)?;

        if let Some(failed) = resp.errors().first() {
            return Err(HcpError::DeleteRejected {
                key: failed.key().unwrap_or_default().to_string(),
                reason: failed
                    .message()
                    .or(failed.code())
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(())
    }
}
