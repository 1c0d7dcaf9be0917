//! S3-compatible client built on rust-s3.
//!
//! Works against AWS and anything speaking the same API (MinIO, R2, Ceph)
//! through a custom endpoint and path-style addressing.

use std::fmt;
use std::time::SystemTime;

use anyhow::{Context, Result};
use bytes::Bytes;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use s3::Bucket;

use super::client::{ClientFuture, ListPage, ObjectClient, ObjectError, ObjectMeta, ObjectResult};
use crate::config::ObjectConfig;

/// Object client talking to an S3-compatible endpoint.
pub struct S3Client {
    bucket: Box<Bucket>,
}

impl S3Client {
    /// Build a client from configuration.
    ///
    /// Without explicit keys, credentials are taken from the environment or
    /// the shared AWS profile.
    pub fn new(config: &ObjectConfig) -> Result<Self> {
        let region = match &config.endpoint {
            Some(endpoint) => Region::Custom {
                region: config.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => config
                .region
                .parse::<Region>()
                .with_context(|| format!("Invalid S3 region: {}", config.region))?,
        };

        let credentials = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            }
            _ => Credentials::default(),
        }
        .context("Failed to load S3 credentials")?;

        let mut bucket = Bucket::new(&config.bucket, region, credentials)
            .with_context(|| format!("Failed to open bucket: {}", config.bucket))?;
        if config.path_style {
            bucket = bucket.with_path_style();
        }

        tracing::debug!(bucket = %config.bucket, path_style = config.path_style, "S3 client ready");
        Ok(Self { bucket: Box::new(bucket) })
    }
}

impl fmt::Debug for S3Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Client")
            .field("bucket", &self.bucket.name())
            .finish_non_exhaustive()
    }
}

impl ObjectClient for S3Client {
    fn list_page<'a>(
        &'a self,
        prefix: &'a str,
        delimiter: Option<&'a str>,
        token: Option<String>,
        max_keys: usize,
    ) -> ClientFuture<'a, ListPage> {
        Box::pin(async move {
            let (result, status) = self
                .bucket
                .list_page(
                    prefix.to_string(),
                    delimiter.map(str::to_string),
                    token,
                    None,
                    Some(max_keys),
                )
                .await
                .map_err(classify)?;
            check_status(status, prefix)?;

            let objects = result
                .contents
                .into_iter()
                .map(|object| ObjectMeta {
                    last_modified: parse_rfc3339(&object.last_modified),
                    key: object.key,
                    size: object.size,
                })
                .collect();
            let common_prefixes = result
                .common_prefixes
                .unwrap_or_default()
                .into_iter()
                .map(|common| common.prefix)
                .collect();
            let next_token = if result.is_truncated {
                result.next_continuation_token
            } else {
                None
            };

            Ok(ListPage {
                objects,
                common_prefixes,
                next_token,
            })
        })
    }

    fn head<'a>(&'a self, key: &'a str) -> ClientFuture<'a, Option<ObjectMeta>> {
        Box::pin(async move {
            let (head, status) = self.bucket.head_object(key).await.map_err(classify)?;
            if status == 404 {
                return Ok(None);
            }
            check_status(status, key)?;
            Ok(Some(ObjectMeta {
                key: key.to_string(),
                size: head.content_length.unwrap_or(0).max(0) as u64,
                last_modified: head.last_modified.as_deref().and_then(parse_http_date),
            }))
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> ClientFuture<'a, Option<Bytes>> {
        Box::pin(async move {
            let response = self.bucket.get_object(key).await.map_err(classify)?;
            if response.status_code() == 404 {
                return Ok(None);
            }
            check_status(response.status_code(), key)?;
            Ok(Some(Bytes::copy_from_slice(response.bytes())))
        })
    }

    fn put<'a>(&'a self, key: &'a str, data: Bytes) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let response = self.bucket.put_object(key, &data).await.map_err(classify)?;
            check_status(response.status_code(), key)
        })
    }

    fn copy<'a>(&'a self, from: &'a str, to: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let status = self
                .bucket
                .copy_object_internal(from, to)
                .await
                .map_err(classify)?;
            check_status(status, to)
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let response = self.bucket.delete_object(key).await.map_err(classify)?;
            match response.status_code() {
                404 => Ok(()),
                status => check_status(status, key),
            }
        })
    }
}

fn classify(err: S3Error) -> ObjectError {
    match err {
        S3Error::HttpFailWithBody(status, body) => ObjectError::from_status(status, body),
        other => ObjectError::Transport(other.to_string()),
    }
}

fn check_status(status: u16, key: &str) -> ObjectResult<()> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(ObjectError::from_status(status, key))
    }
}

/// Listing timestamps are ISO 8601.
fn parse_rfc3339(value: &str) -> Option<SystemTime> {
    chrono::DateTime::parse_from_rfc3339(value)
        .ok()
        .map(SystemTime::from)
}

/// HEAD responses carry an HTTP date.
fn parse_http_date(value: &str) -> Option<SystemTime> {
    chrono::DateTime::parse_from_rfc2822(value)
        .ok()
        .map(SystemTime::from)
}
