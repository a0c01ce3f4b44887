use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Transport-level failure talking to the remote store. No response was received.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The store answered, but refused a call whose answer carries no other information.
    #[error("store rejected the request: {status} - {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Terminal failure of a single upload. HTTP variants carry the raw response body untouched.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("refusing to upload an empty payload to {path}")]
    EmptyPayload { path: String },

    #[error("target path is empty")]
    EmptyPath,

    #[error("declared length {declared} does not match payload length {actual}")]
    LengthMismatch { declared: u64, actual: u64 },

    #[error("direct upload failed: {status} - {body}")]
    DirectUploadFailed { status: StatusCode, body: String },

    #[error("failed to create upload session: {status} - {body}")]
    SessionCreationFailed { status: StatusCode, body: String },

    #[error("upload session response did not contain an uploadUrl")]
    MissingSessionUrl,

    #[error("chunk {chunk_index} failed after {attempts} attempts: {status} - {body}")]
    ChunkUploadFailed {
        status: StatusCode,
        body: String,
        chunk_index: u64,
        attempts: u32,
    },

    #[error("chunk {chunk_index} got no response after {attempts} attempts: {source}")]
    ChunkTransportFailed {
        chunk_index: u64,
        attempts: u32,
        #[source]
        source: RemoteError,
    },

    #[error("{operation} failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: RemoteError,
    },

    #[error(
        "upload loop for {path} sent all {total_bytes} bytes without a completion response"
    )]
    UnexpectedLoopTermination { path: String, total_bytes: u64 },
}

impl UploadError {
    pub(crate) fn transport(operation: &'static str) -> impl FnOnce(RemoteError) -> Self {
        move |source| UploadError::Transport { operation, source }
    }

    /// HTTP status of the failing response, if the store answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            UploadError::DirectUploadFailed { status, .. }
            | UploadError::SessionCreationFailed { status, .. }
            | UploadError::ChunkUploadFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the failure points at our own sequencing rather than the remote store.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, UploadError::UnexpectedLoopTermination { .. })
    }
}
