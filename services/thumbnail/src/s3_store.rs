use crate::config::S3Config;
use crate::file_store::{generate_file_name, FileStore, FileStoreError, UploadedImage};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, info, instrument};

/// File store backed by an S3-compatible bucket
pub struct S3FileStore {
    client: S3Client,
    bucket: String,
    prefix: String,
}

impl S3FileStore {
    /// Create a new S3 file store
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 file store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
            prefix: config.prefix.trim_matches('/').to_string(),
        }
    }

    /// Object key for a freshly uploaded original
    fn object_key(&self, file_name: &str) -> String {
        object_key(&self.prefix, file_name)
    }
}

fn object_key(prefix: &str, file_name: &str) -> String {
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{prefix}/{file_name}")
    }
}

/// Only a modeled `NotFound` means absent; any other failure is an error
fn is_missing_object(err: Option<&HeadObjectError>) -> bool {
    err.map(HeadObjectError::is_not_found).unwrap_or(false)
}

fn s3_error(key: &str, err: impl std::fmt::Display) -> FileStoreError {
    FileStoreError::S3 {
        key: key.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl FileStore for S3FileStore {
    #[instrument(skip(self, upload), fields(file_name = %upload.file_name, size_bytes = upload.data.len()))]
    async fn store(&self, upload: &UploadedImage) -> Result<String, FileStoreError> {
        let key = self.object_key(&generate_file_name(&upload.file_name, Utc::now()));
        let content_type = upload
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");

        debug!(s3_key = %key, "Uploading image to S3");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(upload.data.clone()))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| s3_error(&key, e))?;

        Ok(key)
    }

    async fn exists(&self, path: &str) -> Result<bool, FileStoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_missing_object(e.as_service_error()) => Ok(false),
            Err(e) => Err(s3_error(path, e)),
        }
    }

    async fn read(&self, path: &str) -> Result<Bytes, FileStoreError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| s3_error(path, e))?;

        let data = object
            .body
            .collect()
            .await
            .map_err(|e| s3_error(path, e))?;

        Ok(data.into_bytes())
    }
}
