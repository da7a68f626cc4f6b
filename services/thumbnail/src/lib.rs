//! Nier Thumbnail Service
//!
//! Accepts image uploads and tracks the asynchronous thumbnail job created
//! for each one. An upload is written to file storage, recorded in Redis
//! with status `READY_FOR_PROCESSING`, and its id is published to a Kafka
//! topic consumed by the thumbnail worker. Clients poll by id until the
//! worker marks the job `COMPLETE`, at which point the thumbnail itself is
//! served.
//!
//! ## Architecture
//!
//! ```text
//!   POST /image                          GET /image/{id}/thumbnail
//!        │                                         │
//!        ▼                                         ▼
//! ┌──────────────┐                         ┌──────────────┐
//! │ Image        │────────────────────────▶│ Image        │
//! │ Service      │                         │ Service      │
//! └──────────────┘                         └──────────────┘
//!   │    │    │                               │        │
//!   │    │    └──────────┐                    │        │
//!   ▼    ▼               ▼                    ▼        ▼
//! ┌──────┐ ┌─────────┐ ┌───────────┐   ┌─────────┐ ┌──────┐
//! │ File │ │ Redis   │ │ Kafka     │   │ Redis   │ │ File │
//! │ Store│ │ records │ │ job topic │   │ records │ │ Store│
//! └──────┘ └─────────┘ └───────────┘   └─────────┘ └──────┘
//!                            │               ▲          ▲
//!                            ▼               │          │
//!                      ┌─────────────────────┴──────────┘
//!                      │ Thumbnail worker (external)
//!                      └──────────────────────────────
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod file_store;
pub mod image_service;
pub mod job_queue;
pub mod job_status;
pub mod metadata_store;
pub mod s3_store;

pub use api::{create_router, AppState};
pub use config::Config;
pub use error::{ErrorKind, ImageError};
pub use file_store::{FileStore, LocalFileStore, UploadedImage};
pub use image_service::{CallTimeouts, ImageService, StatusEnvelope, ThumbnailResult};
pub use job_queue::{JobQueue, KafkaJobQueue, LazyChannel};
pub use job_status::{ImageId, ImageRecord, JobStatus};
pub use metadata_store::{MetadataStore, RedisMetadataStore};
pub use s3_store::S3FileStore;
