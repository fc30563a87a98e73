//! S3 driver implementation
//!
//! Wraps aws-sdk-s3 and implements the StorageDriver trait from objio-core.
//! Keys are `bucket/key`; the bucket is the first path segment.

use std::ops::Range;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};

use objio_core::{
    CompletedPart, DriverCapabilities, Error, ObjectInfo, Result, StorageDriver, dir_marker,
};

use crate::capability::{check_part, map_sdk_error, s3_capabilities};
use crate::factory::{BucketLookup, S3Settings};

/// S3 driver
pub struct S3Driver {
    inner: aws_sdk_s3::Client,
    settings: S3Settings,
}

impl S3Driver {
    /// Create a new driver from connection settings
    pub async fn connect(settings: S3Settings) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.region.clone()));

        if let Some((access_key, secret_key)) = &settings.credentials {
            let credentials = aws_credential_types::Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None, // session token
                None, // expiry
                "objio-static-credentials",
            );
            loader = loader.credentials_provider(credentials);
        }
        if let Some(endpoint) = &settings.endpoint {
            loader = loader.endpoint_url(endpoint.as_str());
        }
        let config = loader.load().await;

        // Custom endpoints are usually S3-compatible servers that only
        // understand path-style addressing
        let force_path_style = match settings.bucket_lookup {
            BucketLookup::Path => true,
            BucketLookup::Dns => false,
            BucketLookup::Auto => settings.endpoint.is_some(),
        };
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(force_path_style)
            .build();

        tracing::debug!(
            endpoint = settings.endpoint.as_deref().unwrap_or("aws"),
            region = %settings.region,
            force_path_style,
            "connected s3 client"
        );

        Ok(Self {
            inner: aws_sdk_s3::Client::from_conf(s3_config),
            settings,
        })
    }

    /// Get the underlying aws-sdk-s3 client
    pub fn inner(&self) -> &aws_sdk_s3::Client {
        &self.inner
    }

    pub fn settings(&self) -> &S3Settings {
        &self.settings
    }
}

/// Split `bucket/key` into its parts; the key may be empty
pub fn split_key(key: &str) -> Result<(&str, &str)> {
    let (bucket, object) = key.split_once('/').unwrap_or((key, ""));
    if bucket.is_empty() {
        return Err(Error::InvalidPath(format!(
            "'{key}' does not name a bucket"
        )));
    }
    Ok((bucket, object))
}

/// Split `bucket/key`, requiring a non-empty object key
fn object_key(key: &str) -> Result<(&str, &str)> {
    match split_key(key)? {
        (bucket, "") => Err(Error::InvalidPath(format!(
            "'{bucket}' is a bucket, not an object"
        ))),
        parts => Ok(parts),
    }
}

fn timestamp(time: &aws_smithy_types::DateTime) -> Option<jiff::Timestamp> {
    jiff::Timestamp::new(time.secs(), time.subsec_nanos() as i32).ok()
}

fn unquote(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

#[async_trait]
impl StorageDriver for S3Driver {
    fn capabilities(&self) -> DriverCapabilities {
        s3_capabilities()
    }

    async fn stat(&self, key: &str) -> Result<ObjectInfo> {
        let (bucket, object) = split_key(key)?;

        if object.is_empty() || object.ends_with('/') {
            let listing = self
                .inner
                .list_objects_v2()
                .bucket(bucket)
                .prefix(object)
                .max_keys(1)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, key))?;
            if object.is_empty() || listing.key_count().unwrap_or(0) > 0 {
                return Ok(ObjectInfo::dir(key));
            }
            return Err(Error::NotFound(key.to_string()));
        }

        let response = self
            .inner
            .head_object()
            .bucket(bucket)
            .key(object)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        let size = response.content_length().unwrap_or(0).max(0) as u64;
        let mut info = ObjectInfo::file(key, size);
        info.last_modified = response.last_modified().and_then(timestamp);
        info.etag = response.e_tag().map(unquote);
        info.content_type = response.content_type().map(str::to_string);
        Ok(info)
    }

    async fn get_range(
        &self,
        key: &str,
        range: Range<u64>,
        if_match: Option<String>,
    ) -> Result<Vec<u8>> {
        let (bucket, object) = object_key(key)?;
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .inner
            .get_object()
            .bucket(bucket)
            .key(object)
            .range(format!("bytes={}-{}", range.start, range.end - 1))
            .set_if_match(if_match.map(|etag| format!("\"{etag}\"")))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| Error::BackendUnavailable(format!("{key}: {e}")))?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let (bucket, object) = object_key(key)?;
        self.inner
            .put_object()
            .bucket(bucket)
            .key(object)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(())
    }

    async fn create_multipart(&self, key: &str) -> Result<String> {
        let (bucket, object) = object_key(key)?;
        let response = self
            .inner
            .create_multipart_upload()
            .bucket(bucket)
            .key(object)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        response
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| Error::General(format!("{key}: no upload id in response")))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> Result<CompletedPart> {
        let (bucket, object) = object_key(key)?;
        check_part(part_number, data.len())?;

        let response = self
            .inner
            .upload_part()
            .bucket(bucket)
            .key(object)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        let etag = response
            .e_tag()
            .ok_or_else(|| Error::General(format!("{key}: no etag for part {part_number}")))?;
        Ok(CompletedPart {
            part_number,
            etag: etag.to_string(),
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        let (bucket, object) = object_key(key)?;
        let parts = parts
            .into_iter()
            .map(|part| {
                S3CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(part.etag)
                    .build()
            })
            .collect();
        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.inner
            .complete_multipart_upload()
            .bucket(bucket)
            .key(object)
            .upload_id(upload_id)
            .multipart_upload(upload)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        let (bucket, object) = object_key(key)?;
        self.inner
            .abort_multipart_upload()
            .bucket(bucket)
            .key(object)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let (bucket, object) = object_key(key)?;
        self.inner
            .delete_object()
            .bucket(bucket)
            .key(object)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        if prefix.is_empty() {
            let response = self
                .inner
                .list_buckets()
                .send()
                .await
                .map_err(|e| map_sdk_error(e, "buckets"))?;
            return Ok(response
                .buckets()
                .iter()
                .filter_map(|bucket| {
                    let mut info = ObjectInfo::dir(format!("{}/", bucket.name()?));
                    info.last_modified = bucket.creation_date().and_then(timestamp);
                    Some(info)
                })
                .collect());
        }

        let (bucket, object_prefix) = split_key(prefix)?;
        let mut items = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .inner
                .list_objects_v2()
                .bucket(bucket)
                .prefix(object_prefix)
                .delimiter("/")
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| map_sdk_error(e, prefix))?;

            // Add common prefixes (directories)
            for common in response.common_prefixes() {
                if let Some(p) = common.prefix() {
                    items.push(ObjectInfo::dir(format!("{bucket}/{p}")));
                }
            }

            for object in response.contents() {
                let key = object.key().unwrap_or_default();
                let size = object.size().unwrap_or(0).max(0) as u64;
                let mut info = ObjectInfo::file(format!("{bucket}/{key}"), size);
                info.last_modified = object.last_modified().and_then(timestamp);
                info.etag = object.e_tag().map(unquote);
                items.push(info);
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(items)
    }

    async fn stat_dir(&self, key: &str) -> Result<ObjectInfo> {
        if key.is_empty() {
            return Ok(ObjectInfo::dir(key));
        }
        // A trailing slash makes `stat` look for a marker or any object below it.
        self.stat(&dir_marker(key)).await
    }

    /// A bare bucket name creates the bucket; anything deeper a marker object
    async fn make_dir(&self, key: &str, _parents: bool) -> Result<()> {
        match split_key(key)? {
            (bucket, "") => {
                self.inner
                    .create_bucket()
                    .bucket(bucket)
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(e, key))?;
                Ok(())
            }
            _ => self.put(&dir_marker(key), Vec::new()).await,
        }
    }

    async fn remove_dir(&self, key: &str) -> Result<()> {
        match split_key(key)? {
            (bucket, "") => {
                self.inner
                    .delete_bucket()
                    .bucket(bucket)
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(e, key))?;
                Ok(())
            }
            _ => self.delete(&dir_marker(key)).await,
        }
    }
}
