//! S3-compatible artifact store (MinIO, AWS) backed by `aws-sdk-s3`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use avatar_core::config::StorageConfig;
use avatar_core::error::{AppError, ErrorKind};
use avatar_core::result::AppResult;
use avatar_core::traits::storage::ArtifactStore;

/// S3-compatible artifact store scoped to one bucket.
#[derive(Debug, Clone)]
pub struct S3ArtifactStore {
    client: Client,
    bucket: String,
}

impl S3ArtifactStore {
    /// Create a client for the configured endpoint using static credentials.
    ///
    /// Path-style addressing is forced so MinIO deployments without
    /// wildcard DNS work.
    pub async fn new(config: &StorageConfig) -> AppResult<Self> {
        let endpoint = config.endpoint_url();
        info!(
            endpoint = %endpoint,
            region = %config.region,
            bucket = %config.bucket,
            "Initializing S3 artifact store"
        );

        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "avatar-config",
        );

        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        })
    }

    async fn bucket_exists(&self) -> AppResult<bool> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(AppError::storage(format!(
                "Failed to check bucket {}: {}",
                self.bucket,
                DisplayErrorContext(&e)
            ))),
        }
    }

    async fn open_object(&self, key: &str) -> AppResult<ByteStream> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    AppError::not_found(format!("Object not found: {}/{key}", self.bucket))
                } else {
                    AppError::storage(format!(
                        "Failed to get object {}/{key}: {}",
                        self.bucket,
                        DisplayErrorContext(&e)
                    ))
                }
            })?;
        Ok(output.body)
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    fn provider_type(&self) -> &str {
        "s3"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn health_check(&self) -> AppResult<bool> {
        self.bucket_exists().await
    }

    async fn get_bytes(&self, key: &str) -> AppResult<Bytes> {
        let body = self.open_object(key).await?;
        let data = body.collect().await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to read object body: {key}"),
                e,
            )
        })?;
        Ok(data.into_bytes())
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> AppResult<u64> {
        let mut body = self.open_object(key).await?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(dest).await?;

        let mut written = 0u64;
        while let Some(chunk) = body.try_next().await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to stream object body: {key}"),
                e,
            )
        })? {
            written += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(key, dest = %dest.display(), bytes = written, "Downloaded object");
        Ok(written)
    }

    async fn put_file(&self, key: &str, src: &Path, content_type: &str) -> AppResult<()> {
        let body = ByteStream::from_path(src).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to open upload source: {}", src.display()),
                e,
            )
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                AppError::storage(format!(
                    "Failed to upload {}/{key}: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                ))
            })?;

        info!(bucket = %self.bucket, key, "Uploaded object");
        Ok(())
    }

    async fn ensure_bucket(&self) -> AppResult<()> {
        if self.bucket_exists().await? {
            return Ok(());
        }

        match self.client.create_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                info!(bucket = %self.bucket, "Created bucket");
                Ok(())
            }
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_bucket_already_owned_by_you()) =>
            {
                Ok(())
            }
            Err(e) => Err(AppError::storage(format!(
                "Failed to create bucket {}: {}",
                self.bucket,
                DisplayErrorContext(&e)
            ))),
        }
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> AppResult<String> {
        let presigning = PresigningConfig::expires_in(expires_in).map_err(|e| {
            AppError::with_source(ErrorKind::Configuration, "Invalid presign expiry", e)
        })?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| {
                AppError::storage(format!(
                    "Failed to presign {}/{key}: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(request.uri().to_string())
    }
}
