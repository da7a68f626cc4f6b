//! Image identifiers, the job-status state machine and the stored record.
//!
//! The worker that renders thumbnails owns every status transition:
//!
//! ```text
//! READY_FOR_PROCESSING -> PROCESSING -> COMPLETE
//!                                    -> ERROR_DURING_PROCESSING
//! ```
//!
//! This service only writes the initial `READY_FOR_PROCESSING` record and
//! afterwards interprets whatever the worker left behind.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const MSG_READY_FOR_PROCESSING: &str = "Job for this imageId is waiting to be processed.";
pub const MSG_PROCESSING: &str = "Job for this imageId is still being processed.";
pub const MSG_ERROR_DURING_PROCESSING: &str =
    "An error occurred during processing of this imageId.";
pub const MSG_COMPLETE: &str = "Successfully get image thumbnail.";

/// Positive identifier allocated by the metadata store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ImageId(u64);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid image id: {0:?}")]
pub struct InvalidImageId(pub String);

impl ImageId {
    /// Wrap a store-allocated id; zero is never allocated
    pub fn new(raw: u64) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ImageId {
    type Err = InvalidImageId;

    /// Accepts only plain ASCII digits: no sign, no whitespace, no zero
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidImageId(s.to_string()));
        }
        s.parse::<u64>()
            .ok()
            .and_then(ImageId::new)
            .ok_or_else(|| InvalidImageId(s.to_string()))
    }
}

/// Processing stage of one image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    ErrorDuringProcessing,
    ReadyForProcessing,
    Processing,
    Complete,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown job status ordinal: {0:?}")]
pub struct UnknownJobStatus(pub String);

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::ReadyForProcessing,
        JobStatus::Processing,
        JobStatus::ErrorDuringProcessing,
        JobStatus::Complete,
    ];

    /// Ordinal shared with the worker
    pub fn ordinal(self) -> i8 {
        match self {
            JobStatus::ErrorDuringProcessing => -1,
            JobStatus::ReadyForProcessing => 0,
            JobStatus::Processing => 1,
            JobStatus::Complete => 2,
        }
    }

    pub fn from_ordinal(ordinal: i8) -> Option<Self> {
        match ordinal {
            -1 => Some(JobStatus::ErrorDuringProcessing),
            0 => Some(JobStatus::ReadyForProcessing),
            1 => Some(JobStatus::Processing),
            2 => Some(JobStatus::Complete),
            _ => None,
        }
    }

    /// Stored representation: the stringified ordinal
    pub fn encode(self) -> String {
        self.ordinal().to_string()
    }

    pub fn decode(raw: &str) -> Result<Self, UnknownJobStatus> {
        raw.trim()
            .parse::<i8>()
            .ok()
            .and_then(JobStatus::from_ordinal)
            .ok_or_else(|| UnknownJobStatus(raw.to_string()))
    }

    /// Caller-facing message for this stage
    pub fn message(self) -> &'static str {
        match self {
            JobStatus::ReadyForProcessing => MSG_READY_FOR_PROCESSING,
            JobStatus::Processing => MSG_PROCESSING,
            JobStatus::ErrorDuringProcessing => MSG_ERROR_DURING_PROCESSING,
            JobStatus::Complete => MSG_COMPLETE,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::ErrorDuringProcessing => "ERROR_DURING_PROCESSING",
            JobStatus::ReadyForProcessing => "READY_FOR_PROCESSING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Complete => "COMPLETE",
        };
        f.write_str(name)
    }
}

/// Decoded metadata of one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub file_path: String,
    pub job_status: JobStatus,
    /// Empty until the worker has produced a thumbnail
    pub thumbnail_path: String,
}

impl ImageRecord {
    /// Record written at ingestion time
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            job_status: JobStatus::ReadyForProcessing,
            thumbnail_path: String::new(),
        }
    }
}
