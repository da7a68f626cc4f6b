use crate::config::RedisConfig;
use crate::job_status::{ImageId, ImageRecord, JobStatus, UnknownJobStatus};
use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Hash field names shared with the worker
pub const FIELD_FILE_PATH: &str = "filepath";
pub const FIELD_JOB_STATUS: &str = "jobstatus";
pub const FIELD_THUMBNAIL_PATH: &str = "thumbnailpath";

/// Errors raised by the metadata store
#[derive(Debug, Error)]
pub enum MetadataStoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Metadata store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Index key produced an unusable image id: {0}")]
    InvalidId(i64),

    #[error("Corrupt record for image {image_id}: {source}")]
    Corrupt {
        image_id: ImageId,
        #[source]
        source: UnknownJobStatus,
    },
}

/// Key-value store holding one record per image
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Allocate a new image id and write its initial record
    async fn create_record(&self, file_path: &str) -> Result<ImageId, MetadataStoreError>;

    /// Fetch a record; `Ok(None)` means the id was never created
    async fn read_record(&self, image_id: ImageId)
        -> Result<Option<ImageRecord>, MetadataStoreError>;

    /// Round-trip to the store (for readiness checks)
    async fn ping(&self) -> Result<(), MetadataStoreError>;
}

/// Metadata store kept in Redis hashes keyed by image id
pub struct RedisMetadataStore {
    redis: ConnectionManager,
    index_key: String,
}

impl RedisMetadataStore {
    /// Connect to Redis
    pub async fn new(config: &RedisConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .context("Failed to parse Redis connection URL")?;
        let redis = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!(index_key = %config.index_key, "Connected to Redis metadata store");

        Ok(Self {
            redis,
            index_key: config.index_key.clone(),
        })
    }
}

#[async_trait]
impl MetadataStore for RedisMetadataStore {
    #[instrument(skip(self))]
    async fn create_record(&self, file_path: &str) -> Result<ImageId, MetadataStoreError> {
        let raw_id: i64 = self.redis.clone().incr(&self.index_key, 1).await?;
        let image_id = u64::try_from(raw_id)
            .ok()
            .and_then(ImageId::new)
            .ok_or(MetadataStoreError::InvalidId(raw_id))?;

        // Increment and write are two commands; an id may be burnt if the write fails
        let record = ImageRecord::new(file_path);
        let _: () = self
            .redis
            .clone()
            .hset_multiple(image_id.to_string(), &encode_record(&record))
            .await?;

        debug!(image_id = %image_id, "Image record created");

        Ok(image_id)
    }

    #[instrument(skip(self), fields(image_id = %image_id))]
    async fn read_record(
        &self,
        image_id: ImageId,
    ) -> Result<Option<ImageRecord>, MetadataStoreError> {
        let fields: HashMap<String, String> =
            self.redis.clone().hgetall(image_id.to_string()).await?;

        decode_record(image_id, &fields)
    }

    async fn ping(&self) -> Result<(), MetadataStoreError> {
        let mut conn = self.redis.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Flat field/value pairs written to the record's hash
pub fn encode_record(record: &ImageRecord) -> [(&'static str, String); 3] {
    [
        (FIELD_FILE_PATH, record.file_path.clone()),
        (FIELD_JOB_STATUS, record.job_status.encode()),
        (FIELD_THUMBNAIL_PATH, record.thumbnail_path.clone()),
    ]
}

/// Decode a hash by field name.
///
/// Existence is decided by the presence of the status field, never by its
/// value: `READY_FOR_PROCESSING` is stored as `"0"` and is a real record.
pub fn decode_record(
    image_id: ImageId,
    fields: &HashMap<String, String>,
) -> Result<Option<ImageRecord>, MetadataStoreError> {
    let Some(raw_status) = fields.get(FIELD_JOB_STATUS) else {
        return Ok(None);
    };

    let job_status = JobStatus::decode(raw_status)
        .map_err(|source| MetadataStoreError::Corrupt { image_id, source })?;

    Ok(Some(ImageRecord {
        file_path: fields.get(FIELD_FILE_PATH).cloned().unwrap_or_default(),
        job_status,
        thumbnail_path: fields.get(FIELD_THUMBNAIL_PATH).cloned().unwrap_or_default(),
    }))
}
