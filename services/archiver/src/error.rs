//! Error types for the archiver service

use common::error::DatabaseError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to retrieve a binary from the chat platform
#[derive(Error, Debug)]
pub enum FetchError {
    /// `getFile` failed or was rejected by the platform
    #[error("getFile failed: {0}")]
    Request(#[from] teloxide::RequestError),

    #[error("Download failed: {0}")]
    Download(#[from] teloxide::DownloadError),

    /// Reported or actual size is above the download limit
    #[error("File is {size} bytes, above the {limit} byte download limit")]
    TooLarge { size: u64, limit: u64 },

    /// `getFile` succeeded but gave no downloadable path
    #[error("File {0} has no download path")]
    MissingPath(String),
}

/// Outcome of a failed save, returned to the command dispatcher
#[derive(Error, Debug)]
pub enum SaveError {
    /// The replied-to message carries nothing the archiver accepts
    #[error("No saveable media found")]
    NoMediaFound,

    /// Content retrieval failed; nothing was written
    #[error("Failed to fetch content {content_id}: {source}")]
    FetchFailed {
        content_id: String,
        #[source]
        source: FetchError,
    },

    /// Disk I/O failed; no partial file is left behind
    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is on disk but its metadata row was not committed
    #[error("File {path} written but metadata commit failed: {source}")]
    StoreFailed {
        path: PathBuf,
        #[source]
        source: DatabaseError,
    },
}

impl SaveError {
    /// Short reason suitable for showing to chat users.
    pub fn user_message(&self) -> &'static str {
        match self {
            SaveError::NoMediaFound => "The replied message doesn't contain any saveable media!",
            SaveError::FetchFailed {
                source: FetchError::TooLarge { .. },
                ..
            } => "Failed to save media: the file is too large to download.",
            SaveError::FetchFailed { .. } => {
                "Failed to download media. Please try again."
            }
            SaveError::WriteFailed { .. } => "Failed to write media to storage. Please try again.",
            SaveError::StoreFailed { .. } => {
                "Media was downloaded but could not be indexed. Please try again."
            }
        }
    }
}
