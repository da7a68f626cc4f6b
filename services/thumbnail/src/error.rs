use crate::file_store::FileStoreError;
use crate::job_queue::JobQueueError;
use crate::job_status::{ImageId, InvalidImageId};
use crate::metadata_store::MetadataStoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Coarse classification of an [`ImageError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed identifier, missing or oversized upload
    InputValidation,
    /// A store failed while ingesting; the request was abandoned
    UpstreamWrite,
    /// A store, or the request body, could not be read or decoded
    UpstreamRead,
    /// The identifier was never allocated
    NotFound,
    /// Metadata and file storage disagree
    ConsistencyFault,
}

/// The one failure reported for a request
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("No files were uploaded.")]
    MissingUpload,

    #[error("Uploaded file is too large.")]
    PayloadTooLarge,

    #[error("Reading uploaded file failed.")]
    UploadRead(String),

    #[error("Invalid value")]
    InvalidImageId(#[from] InvalidImageId),

    #[error("File upload failed.")]
    FileUpload(#[source] FileStoreError),

    #[error("Saving image info failed.")]
    MetadataWrite(#[source] MetadataStoreError),

    #[error("Sending job failed.")]
    QueueDispatch(#[source] JobQueueError),

    #[error("Getting image info failed.")]
    MetadataRead(#[source] MetadataStoreError),

    #[error("Getting image info failed.")]
    CorruptRecord(#[source] MetadataStoreError),

    #[error("Requested imageId does not exist.")]
    NotFound(ImageId),

    #[error("Thumbnail file path does not exist.")]
    ThumbnailPathEmpty(ImageId),

    #[error("Thumbnail file does not exist.")]
    ThumbnailMissing { image_id: ImageId, path: String },

    #[error("Getting thumbnail file failed.")]
    ThumbnailRead(#[source] FileStoreError),
}

impl ImageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImageError::MissingUpload
            | ImageError::PayloadTooLarge
            | ImageError::InvalidImageId(_) => ErrorKind::InputValidation,
            ImageError::FileUpload(_)
            | ImageError::MetadataWrite(_)
            | ImageError::QueueDispatch(_) => ErrorKind::UpstreamWrite,
            ImageError::MetadataRead(_)
            | ImageError::CorruptRecord(_)
            | ImageError::ThumbnailRead(_)
            | ImageError::UploadRead(_) => ErrorKind::UpstreamRead,
            ImageError::NotFound(_) => ErrorKind::NotFound,
            ImageError::ThumbnailPathEmpty(_) | ImageError::ThumbnailMissing { .. } => {
                ErrorKind::ConsistencyFault
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        if let ImageError::PayloadTooLarge = self {
            return StatusCode::PAYLOAD_TOO_LARGE;
        }
        match self.kind() {
            ErrorKind::InputValidation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::UpstreamWrite | ErrorKind::UpstreamRead | ErrorKind::ConsistencyFault => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for API clients
    pub fn code(&self) -> &'static str {
        match self {
            ImageError::MissingUpload => "NO_FILE",
            ImageError::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ImageError::UploadRead(_) => "UPLOAD_READ_ERROR",
            ImageError::InvalidImageId(_) => "INVALID_IMAGE_ID",
            ImageError::FileUpload(_) => "FILE_UPLOAD_ERROR",
            ImageError::MetadataWrite(_) => "METADATA_WRITE_ERROR",
            ImageError::QueueDispatch(_) => "QUEUE_DISPATCH_ERROR",
            ImageError::MetadataRead(_) | ImageError::CorruptRecord(_) => "METADATA_READ_ERROR",
            ImageError::NotFound(_) => "NOT_FOUND",
            ImageError::ThumbnailPathEmpty(_) => "THUMBNAIL_PATH_EMPTY",
            ImageError::ThumbnailMissing { .. } => "THUMBNAIL_MISSING",
            ImageError::ThumbnailRead(_) => "THUMBNAIL_READ_ERROR",
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ImageError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
