use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::policy::ByteRange;

/// What the store does when a session targets a name that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictBehavior {
    Fail,
    Rename,
    Replace,
}

/// A raw response from the store. The body is passed through untouched.
#[derive(Debug, Clone)]
pub struct RemoteResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl RemoteResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The capabilities the upload orchestrator needs from an object store.
///
/// Every method returns the store's answer as-is; interpreting status codes is
/// left to the caller. `Err` means no answer was received.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create_upload_session(
        &self,
        path: &str,
        conflict: ConflictBehavior,
    ) -> Result<RemoteResponse, RemoteError>;

    async fn put_chunk(
        &self,
        upload_url: &str,
        range: ByteRange,
        bytes: Bytes,
    ) -> Result<RemoteResponse, RemoteError>;

    async fn put_whole(&self, path: &str, bytes: Bytes) -> Result<RemoteResponse, RemoteError>;

    async fn get_object_metadata(&self, path: &str) -> Result<RemoteResponse, RemoteError>;

    /// Best-effort cancellation of an abandoned session. Stores without one let it expire.
    async fn abort_session(&self, _upload_url: &str) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// Folder management used by the submission flow, on top of the upload capabilities.
#[async_trait]
pub trait FolderStore: RemoteStore {
    async fn create_folder(&self, parent: &str, name: &str) -> Result<RemoteResponse, RemoteError>;
}
