//! Image lifecycle orchestration.
//!
//! Ingestion runs file store -> metadata store -> job queue, each step
//! gating the next. A failed step aborts the request with that step's error
//! and nothing is rolled back: an orphaned upload, or a record whose job was
//! never sent, is an accepted outcome.
//!
//! Status retrieval only reads. It never writes the job status; the worker
//! owns every transition after the initial record.

use crate::config::TimeoutConfig;
use crate::error::ImageError;
use crate::file_store::{content_type_for, FileStore, FileStoreError, UploadedImage};
use crate::job_queue::{JobQueue, JobQueueError};
use crate::job_status::{ImageId, ImageRecord, JobStatus};
use crate::metadata_store::{MetadataStore, MetadataStoreError};
use bytes::Bytes;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

pub const MSG_IMAGE_SUBMITTED: &str = "Successfully processed image file.";

/// Upper bound for each collaborator call
#[derive(Debug, Clone, Copy)]
pub struct CallTimeouts {
    pub file_store: Duration,
    pub metadata_store: Duration,
    pub job_queue: Duration,
}

impl From<&TimeoutConfig> for CallTimeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            file_store: config.file_store(),
            metadata_store: config.metadata_store(),
            job_queue: config.job_queue(),
        }
    }
}

/// Successful ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submitted {
    pub msg: &'static str,
    pub image_id: ImageId,
}

/// Status reported while no thumbnail can be served
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEnvelope {
    pub msg: &'static str,
    pub job_status: JobStatus,
    pub thumbnail_path: String,
}

impl From<&ImageRecord> for StatusEnvelope {
    fn from(record: &ImageRecord) -> Self {
        Self {
            msg: record.job_status.message(),
            job_status: record.job_status,
            thumbnail_path: record.thumbnail_path.clone(),
        }
    }
}

/// Outcome of a status request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailResult {
    /// The job has not completed; report where it stands
    Pending(StatusEnvelope),
    /// The thumbnail itself
    Ready {
        content: Bytes,
        content_type: &'static str,
    },
}

/// Sequences file storage, metadata and the job queue for one image
pub struct ImageService {
    files: Arc<dyn FileStore>,
    metadata: Arc<dyn MetadataStore>,
    queue: Arc<dyn JobQueue>,
    timeouts: CallTimeouts,
}

impl ImageService {
    pub fn new(
        files: Arc<dyn FileStore>,
        metadata: Arc<dyn MetadataStore>,
        queue: Arc<dyn JobQueue>,
        timeouts: CallTimeouts,
    ) -> Self {
        Self {
            files,
            metadata,
            queue,
            timeouts,
        }
    }

    /// Store an upload, record it and enqueue its thumbnail job
    #[instrument(skip(self, upload), fields(file_name = %upload.file_name, size_bytes = upload.data.len()))]
    pub async fn submit(&self, upload: UploadedImage) -> Result<Submitted, ImageError> {
        let file_path = within(
            self.timeouts.file_store,
            FileStoreError::Timeout,
            self.files.store(&upload),
        )
        .await
        .map_err(|e| {
            ingest_failed("file_store", &e);
            ImageError::FileUpload(e)
        })?;

        let image_id = within(
            self.timeouts.metadata_store,
            MetadataStoreError::Timeout,
            self.metadata.create_record(&file_path),
        )
        .await
        .map_err(|e| {
            ingest_failed("metadata_store", &e);
            ImageError::MetadataWrite(e)
        })?;

        within(
            self.timeouts.job_queue,
            JobQueueError::Timeout,
            self.queue.enqueue(image_id),
        )
        .await
        .map_err(|e| {
            ingest_failed("job_queue", &e);
            ImageError::QueueDispatch(e)
        })?;

        info!(image_id = %image_id, file_path = %file_path, "Image submitted for processing");
        metrics::counter!("thumbnail.images.submitted").increment(1);

        Ok(Submitted {
            msg: MSG_IMAGE_SUBMITTED,
            image_id,
        })
    }

    /// Report the job status of `raw_image_id`, or the thumbnail once complete
    #[instrument(skip(self))]
    pub async fn get_status(&self, raw_image_id: &str) -> Result<ThumbnailResult, ImageError> {
        let result = self.resolve_status(raw_image_id).await;

        let outcome = match &result {
            Ok(ThumbnailResult::Pending(_)) => "pending",
            Ok(ThumbnailResult::Ready { .. }) => "ready",
            Err(e) => e.code(),
        };
        metrics::counter!("thumbnail.status.requests", "outcome" => outcome).increment(1);

        result
    }

    async fn resolve_status(&self, raw_image_id: &str) -> Result<ThumbnailResult, ImageError> {
        let image_id: ImageId = raw_image_id.parse()?;

        let record = within(
            self.timeouts.metadata_store,
            MetadataStoreError::Timeout,
            self.metadata.read_record(image_id),
        )
        .await
        .map_err(|e| {
            error!(image_id = %image_id, error = %e, "Failed to read image record");
            match e {
                MetadataStoreError::Corrupt { .. } => ImageError::CorruptRecord(e),
                other => ImageError::MetadataRead(other),
            }
        })?
        .ok_or(ImageError::NotFound(image_id))?;

        let envelope = StatusEnvelope::from(&record);
        debug!(image_id = %image_id, job_status = %record.job_status, msg = envelope.msg, "Image record read");

        match record.job_status {
            JobStatus::Complete => self.load_thumbnail(image_id, &record.thumbnail_path).await,
            JobStatus::ReadyForProcessing
            | JobStatus::Processing
            | JobStatus::ErrorDuringProcessing => Ok(ThumbnailResult::Pending(envelope)),
        }
    }

    async fn load_thumbnail(
        &self,
        image_id: ImageId,
        path: &str,
    ) -> Result<ThumbnailResult, ImageError> {
        if path.is_empty() {
            warn!(image_id = %image_id, "Job is complete but no thumbnail path was recorded");
            return Err(ImageError::ThumbnailPathEmpty(image_id));
        }

        let exists = within(
            self.timeouts.file_store,
            FileStoreError::Timeout,
            self.files.exists(path),
        )
        .await
        .map_err(|e| {
            error!(image_id = %image_id, error = %e, "Failed to check thumbnail");
            ImageError::ThumbnailRead(e)
        })?;

        if !exists {
            warn!(image_id = %image_id, path, "Job is complete but the thumbnail file is missing");
            return Err(ImageError::ThumbnailMissing {
                image_id,
                path: path.to_string(),
            });
        }

        let content = within(
            self.timeouts.file_store,
            FileStoreError::Timeout,
            self.files.read(path),
        )
        .await
        .map_err(|e| {
            error!(image_id = %image_id, error = %e, "Failed to read thumbnail");
            ImageError::ThumbnailRead(e)
        })?;

        Ok(ThumbnailResult::Ready {
            content,
            content_type: content_type_for(path),
        })
    }

    /// Whether the metadata store is reachable
    pub async fn ready(&self) -> Result<(), MetadataStoreError> {
        within(
            self.timeouts.metadata_store,
            MetadataStoreError::Timeout,
            self.metadata.ping(),
        )
        .await
    }
}

/// Bound `call` by `limit`, reporting expiry as the collaborator's own error
async fn within<T, E>(
    limit: Duration,
    timed_out: impl FnOnce(Duration) -> E,
    call: impl Future<Output = Result<T, E>>,
) -> Result<T, E> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(timed_out(limit)),
    }
}

fn ingest_failed(step: &'static str, err: &dyn std::error::Error) {
    error!(step, error = %err, "Image ingestion aborted");
    metrics::counter!("thumbnail.ingest.failed", "step" => step).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::file_store::MockFileStore;
    use crate::job_queue::MockJobQueue;
    use crate::job_status::MSG_READY_FOR_PROCESSING;
    use crate::metadata_store::MockMetadataStore;
    use async_trait::async_trait;
    use mockall::predicate::eq;

    const STORED_PATH: &str = "img/uploaded/1700000000000_abc_test.png";

    fn timeouts() -> CallTimeouts {
        CallTimeouts {
            file_store: Duration::from_secs(1),
            metadata_store: Duration::from_secs(1),
            job_queue: Duration::from_secs(1),
        }
    }

    fn id(raw: u64) -> ImageId {
        ImageId::new(raw).unwrap()
    }

    fn upload() -> UploadedImage {
        UploadedImage {
            file_name: "test.png".to_string(),
            content_type: Some("image/png".to_string()),
            data: Bytes::from_static(b"\x89PNG"),
        }
    }

    fn service(files: MockFileStore, metadata: MockMetadataStore, queue: MockJobQueue) -> ImageService {
        ImageService::new(Arc::new(files), Arc::new(metadata), Arc::new(queue), timeouts())
    }

    fn record(status: JobStatus, thumbnail_path: &str) -> ImageRecord {
        ImageRecord {
            file_path: STORED_PATH.to_string(),
            job_status: status,
            thumbnail_path: thumbnail_path.to_string(),
        }
    }

    fn metadata_returning(image_id: ImageId, found: Option<ImageRecord>) -> MockMetadataStore {
        let mut metadata = MockMetadataStore::new();
        metadata
            .expect_read_record()
            .with(eq(image_id))
            .returning(move |_| Ok(found.clone()));
        metadata
    }

    #[tokio::test]
    async fn test_submit_runs_all_steps_in_order() {
        let mut seq = mockall::Sequence::new();
        let mut files = MockFileStore::new();
        let mut metadata = MockMetadataStore::new();
        let mut queue = MockJobQueue::new();

        files
            .expect_store()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(STORED_PATH.to_string()));
        metadata
            .expect_create_record()
            .with(eq(STORED_PATH))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(ImageId::new(1).unwrap()));
        queue
            .expect_enqueue()
            .with(eq(id(1)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let submitted = service(files, metadata, queue).submit(upload()).await.unwrap();
        assert_eq!(
            submitted,
            Submitted {
                msg: MSG_IMAGE_SUBMITTED,
                image_id: id(1)
            }
        );
    }

    #[tokio::test]
    async fn test_file_store_failure_stops_ingestion() {
        let mut files = MockFileStore::new();
        let mut metadata = MockMetadataStore::new();
        let mut queue = MockJobQueue::new();

        files.expect_store().returning(|_| {
            Err(FileStoreError::Io {
                path: "img/uploaded".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        });
        metadata.expect_create_record().never();
        queue.expect_enqueue().never();

        let err = service(files, metadata, queue).submit(upload()).await.unwrap_err();
        assert!(matches!(err, ImageError::FileUpload(_)));
        assert_eq!(err.kind(), ErrorKind::UpstreamWrite);
    }

    #[tokio::test]
    async fn test_metadata_failure_leaves_file_and_skips_queue() {
        let mut files = MockFileStore::new();
        let mut metadata = MockMetadataStore::new();
        let mut queue = MockJobQueue::new();

        files
            .expect_store()
            .returning(|_| Ok(STORED_PATH.to_string()));
        metadata
            .expect_create_record()
            .returning(|_| Err(MetadataStoreError::InvalidId(0)));
        queue.expect_enqueue().never();

        let err = service(files, metadata, queue).submit(upload()).await.unwrap_err();
        assert!(matches!(err, ImageError::MetadataWrite(_)));
        assert_eq!(err.to_string(), "Saving image info failed.");
    }

    #[tokio::test]
    async fn test_queue_failure_is_reported_once() {
        let mut files = MockFileStore::new();
        let mut metadata = MockMetadataStore::new();
        let mut queue = MockJobQueue::new();

        files
            .expect_store()
            .returning(|_| Ok(STORED_PATH.to_string()));
        metadata
            .expect_create_record()
            .returning(|_| Ok(ImageId::new(2).unwrap()));
        queue.expect_enqueue().times(1).returning(|_| {
            Err(JobQueueError::Connect("no brokers".to_string()))
        });

        let err = service(files, metadata, queue).submit(upload()).await.unwrap_err();
        assert!(matches!(err, ImageError::QueueDispatch(JobQueueError::Connect(_))));
    }

    struct StalledQueue;

    #[async_trait]
    impl JobQueue for StalledQueue {
        async fn enqueue(&self, _image_id: ImageId) -> Result<(), JobQueueError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_queue_timeout_surfaces_as_dispatch_error() {
        let mut files = MockFileStore::new();
        let mut metadata = MockMetadataStore::new();
        files
            .expect_store()
            .returning(|_| Ok(STORED_PATH.to_string()));
        metadata
            .expect_create_record()
            .returning(|_| Ok(ImageId::new(3).unwrap()));

        let mut limits = timeouts();
        limits.job_queue = Duration::from_millis(20);
        let service = ImageService::new(
            Arc::new(files),
            Arc::new(metadata),
            Arc::new(StalledQueue),
            limits,
        );

        let err = service.submit(upload()).await.unwrap_err();
        assert!(matches!(
            err,
            ImageError::QueueDispatch(JobQueueError::Timeout(d)) if d == Duration::from_millis(20)
        ));
    }

    struct StalledFileStore;

    #[async_trait]
    impl FileStore for StalledFileStore {
        async fn store(&self, _upload: &UploadedImage) -> Result<String, FileStoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(STORED_PATH.to_string())
        }

        async fn exists(&self, _path: &str) -> Result<bool, FileStoreError> {
            Ok(true)
        }

        async fn read(&self, _path: &str) -> Result<Bytes, FileStoreError> {
            Ok(Bytes::new())
        }
    }

    #[tokio::test]
    async fn test_file_store_timeout_surfaces_as_upload_error() {
        let mut metadata = MockMetadataStore::new();
        let mut queue = MockJobQueue::new();
        metadata.expect_create_record().never();
        queue.expect_enqueue().never();

        let mut limits = timeouts();
        limits.file_store = Duration::from_millis(20);
        let service = ImageService::new(
            Arc::new(StalledFileStore),
            Arc::new(metadata),
            Arc::new(queue),
            limits,
        );

        let err = service.submit(upload()).await.unwrap_err();
        assert!(matches!(err, ImageError::FileUpload(FileStoreError::Timeout(_))));
        assert_eq!(err.code(), "FILE_UPLOAD_ERROR");
    }

    #[tokio::test]
    async fn test_malformed_id_never_reaches_the_store() {
        let mut metadata = MockMetadataStore::new();
        metadata.expect_read_record().never();
        let service = service(MockFileStore::new(), metadata, MockJobQueue::new());

        for raw in ["abc", "0", "-4", "1.5", ""] {
            let err = service.get_status(raw).await.unwrap_err();
            assert!(matches!(err, ImageError::InvalidImageId(_)), "{raw:?}");
            assert_eq!(err.kind(), ErrorKind::InputValidation);
        }
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let metadata = metadata_returning(id(999), None);
        let service = service(MockFileStore::new(), metadata, MockJobQueue::new());

        let err = service.get_status("999").await.unwrap_err();
        assert!(matches!(err, ImageError::NotFound(found) if found == id(999)));
    }

    #[tokio::test]
    async fn test_store_failure_is_not_not_found() {
        let mut metadata = MockMetadataStore::new();
        metadata.expect_read_record().returning(|_| {
            Err(MetadataStoreError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))))
        });
        let service = service(MockFileStore::new(), metadata, MockJobQueue::new());

        let err = service.get_status("1").await.unwrap_err();
        assert!(matches!(err, ImageError::MetadataRead(_)));
        assert_eq!(err.kind(), ErrorKind::UpstreamRead);
    }

    #[tokio::test]
    async fn test_corrupt_status_is_a_decoding_fault() {
        let mut metadata = MockMetadataStore::new();
        metadata.expect_read_record().returning(|image_id| {
            Err(MetadataStoreError::Corrupt {
                image_id,
                source: crate::job_status::UnknownJobStatus("9".to_string()),
            })
        });
        let service = service(MockFileStore::new(), metadata, MockJobQueue::new());

        let err = service.get_status("4").await.unwrap_err();
        assert!(matches!(err, ImageError::CorruptRecord(_)));
    }

    #[tokio::test]
    async fn test_ready_for_processing_reports_waiting() {
        let metadata = metadata_returning(id(1), Some(record(JobStatus::ReadyForProcessing, "")));
        let mut files = MockFileStore::new();
        files.expect_exists().never();
        let service = service(files, metadata, MockJobQueue::new());

        let result = service.get_status("1").await.unwrap();
        assert_eq!(
            result,
            ThumbnailResult::Pending(StatusEnvelope {
                msg: MSG_READY_FOR_PROCESSING,
                job_status: JobStatus::ReadyForProcessing,
                thumbnail_path: String::new(),
            })
        );
    }

    #[tokio::test]
    async fn test_every_unfinished_status_maps_to_its_message() {
        for status in [
            JobStatus::ReadyForProcessing,
            JobStatus::Processing,
            JobStatus::ErrorDuringProcessing,
        ] {
            let metadata = metadata_returning(id(8), Some(record(status, "")));
            let service = service(MockFileStore::new(), metadata, MockJobQueue::new());

            match service.get_status("8").await.unwrap() {
                ThumbnailResult::Pending(envelope) => {
                    assert_eq!(envelope.job_status, status);
                    assert_eq!(envelope.msg, status.message());
                }
                other => panic!("expected pending for {status}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_repeated_reads_are_identical() {
        let metadata = metadata_returning(id(6), Some(record(JobStatus::Processing, "")));
        let service = service(MockFileStore::new(), metadata, MockJobQueue::new());

        let first = service.get_status("6").await.unwrap();
        let second = service.get_status("6").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_complete_without_path_is_consistency_fault() {
        let metadata = metadata_returning(id(2), Some(record(JobStatus::Complete, "")));
        let mut files = MockFileStore::new();
        files.expect_exists().never();
        let service = service(files, metadata, MockJobQueue::new());

        let err = service.get_status("2").await.unwrap_err();
        assert!(matches!(err, ImageError::ThumbnailPathEmpty(_)));
        assert_eq!(err.kind(), ErrorKind::ConsistencyFault);
    }

    #[tokio::test]
    async fn test_complete_with_missing_file_is_consistency_fault() {
        let metadata =
            metadata_returning(id(2), Some(record(JobStatus::Complete, "/store/a.png")));
        let mut files = MockFileStore::new();
        files
            .expect_exists()
            .with(eq("/store/a.png"))
            .returning(|_| Ok(false));
        files.expect_read().never();
        let service = service(files, metadata, MockJobQueue::new());

        let err = service.get_status("2").await.unwrap_err();
        assert!(matches!(err, ImageError::ThumbnailMissing { ref path, .. } if path == "/store/a.png"));
        assert_eq!(err.kind(), ErrorKind::ConsistencyFault);
    }

    #[tokio::test]
    async fn test_complete_with_file_returns_content() {
        let metadata =
            metadata_returning(id(3), Some(record(JobStatus::Complete, "/store/a.png")));
        let mut files = MockFileStore::new();
        files.expect_exists().returning(|_| Ok(true));
        files
            .expect_read()
            .with(eq("/store/a.png"))
            .returning(|_| Ok(Bytes::from_static(b"thumbnail-bytes")));
        let service = service(files, metadata, MockJobQueue::new());

        let result = service.get_status("3").await.unwrap();
        assert_eq!(
            result,
            ThumbnailResult::Ready {
                content: Bytes::from_static(b"thumbnail-bytes"),
                content_type: "image/png",
            }
        );
    }

    #[tokio::test]
    async fn test_thumbnail_check_failure_is_upstream_read() {
        let metadata =
            metadata_returning(id(3), Some(record(JobStatus::Complete, "/store/a.png")));
        let mut files = MockFileStore::new();
        files.expect_exists().returning(|path| {
            Err(FileStoreError::Io {
                path: path.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        });
        files.expect_read().never();
        let service = service(files, metadata, MockJobQueue::new());

        let err = service.get_status("3").await.unwrap_err();
        assert!(matches!(err, ImageError::ThumbnailRead(FileStoreError::Io { .. })));
        assert_eq!(err.code(), "THUMBNAIL_READ_ERROR");
        assert_eq!(err.kind(), ErrorKind::UpstreamRead);
    }

    #[tokio::test]
    async fn test_thumbnail_read_failure_is_upstream_read() {
        let metadata =
            metadata_returning(id(3), Some(record(JobStatus::Complete, "/store/a.png")));
        let mut files = MockFileStore::new();
        files.expect_exists().returning(|_| Ok(true));
        files.expect_read().returning(|path| {
            Err(FileStoreError::Io {
                path: path.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        });
        let service = service(files, metadata, MockJobQueue::new());

        let err = service.get_status("3").await.unwrap_err();
        assert!(matches!(err, ImageError::ThumbnailRead(_)));
    }
}
