//! Cloudflare R2 artifact store over the S3 API.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{content_type_for, ArtifactStore, StorageError};
use crate::net::safe::ensure_public_host;

/// Credentials and bucket configuration for R2.
#[derive(Debug, Clone, Default)]
pub struct R2Config {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub public_url: String,
}

impl R2Config {
    /// True when every required value is present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.account_id.is_empty()
            && !self.access_key_id.is_empty()
            && !self.secret_access_key.is_empty()
            && !self.bucket.is_empty()
    }
}

/// Object store client against an R2-style S3 endpoint.
#[derive(Debug, Clone)]
pub struct R2Store {
    client: aws_sdk_s3::Client,
    bucket: String,
    endpoint: String,
}

impl R2Store {
    /// Builds a client for the account-scoped R2 endpoint with static
    /// credentials, path-style addressing, and region `auto`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] when required values are missing
    /// or the derived endpoint is not a public host.
    #[instrument(skip(config), fields(bucket = %config.bucket))]
    pub fn new(config: &R2Config) -> Result<Self, StorageError> {
        if !config.is_complete() {
            return Err(StorageError::Config(
                "R2 requires account id, access key id, secret access key, and bucket".to_string(),
            ));
        }

        let endpoint = format!("https://{}.r2.cloudflarestorage.com", config.account_id);

        // The endpoint derives from operator config, not user input, but
        // it still goes through the outbound IP policy.
        let parsed = Url::parse(&endpoint)
            .map_err(|err| StorageError::Config(format!("invalid endpoint {endpoint}: {err}")))?;
        ensure_public_host(&parsed)
            .map_err(|err| StorageError::Config(format!("endpoint rejected: {err}")))?;

        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "r2-static",
        );

        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("auto"))
            .endpoint_url(&endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        info!(bucket = %config.bucket, endpoint = %endpoint, "object store client initialized");

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(sdk_config),
            bucket: config.bucket.clone(),
            endpoint,
        })
    }

    /// The account-scoped endpoint this client talks to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ArtifactStore for R2Store {
    fn is_object_store(&self) -> bool {
        true
    }

    #[instrument(skip(self, path), fields(path = %path.display()))]
    async fn upload(&self, path: &Path, key: &str) -> Result<(), StorageError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|source| StorageError::Io {
                path: path.display().to_string(),
                source,
            })?;

        let body = ByteStream::from_path(path)
            .await
            .map_err(|err| StorageError::Io {
                path: path.display().to_string(),
                source: std::io::Error::other(err),
            })?;

        #[allow(clippy::cast_possible_wrap)]
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type_for(path))
            .content_length(metadata.len() as i64)
            .send()
            .await
            .map_err(|err| StorageError::Upload {
                key: key.to_string(),
                message: err.to_string(),
            })?;

        info!(
            key,
            size = metadata.len(),
            content_type = content_type_for(path),
            "artifact uploaded"
        );

        Ok(())
    }

    #[instrument(skip(self))]
    async fn download_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let presigning = PresigningConfig::expires_in(ttl).map_err(|err| StorageError::Presign {
            key: key.to_string(),
            message: err.to_string(),
        })?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|err| StorageError::Presign {
                key: key.to_string(),
                message: err.to_string(),
            })?;

        debug!(key, ttl_secs = ttl.as_secs(), "issued presigned URL");

        Ok(presigned.uri().to_string())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| StorageError::Delete {
                key: key.to_string(),
                message: err.to_string(),
            })?;

        debug!(key, "object deleted");
        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| StorageError::List(err.to_string()))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
        }

        Ok(keys)
    }

    async fn list_older_than(&self, age: Duration) -> Result<Vec<String>, StorageError> {
        let threshold = SystemTime::now()
            .checked_sub(age)
            .unwrap_or(UNIX_EPOCH)
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| StorageError::List(err.to_string()))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                let Some(modified) = object.last_modified() else {
                    continue;
                };

                #[allow(clippy::cast_sign_loss)]
                let modified_secs = modified.secs().max(0) as u64;
                if modified_secs < threshold {
                    keys.push(key.to_string());
                }
            }
        }

        Ok(keys)
    }

    #[instrument(skip(self))]
    async fn delete_older_than(&self, age: Duration) -> Result<usize, StorageError> {
        let keys = self.list_older_than(age).await?;

        let mut deleted = 0;
        for key in keys {
            match self.delete(&key).await {
                Ok(()) => deleted += 1,
                Err(error) => warn!(%key, %error, "failed to delete aged object"),
            }
        }

        if deleted > 0 {
            info!(deleted, age_secs = age.as_secs(), "aged objects removed");
        }

        Ok(deleted)
    }
}
