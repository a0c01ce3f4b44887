use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response, header};
use url::Url;

use crate::error::RemoteError;
use crate::policy::ByteRange;
use crate::remote::{ConflictBehavior, FolderStore, RemoteResponse, RemoteStore};
use crate::rest_types::{CreateFolderRequest, CreateUploadSessionRequest, UploadSessionItem};

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0/";

const DRIVE_ROOT_ROUTE: &str = "me/drive/root";

/// OneDrive (Microsoft Graph) as a [`RemoteStore`], addressed by path from the drive root.
pub struct GraphStore {
    client: Client,
    base_url: Url,
    access_token: String,
}

impl GraphStore {
    pub fn new(client: Client, base_url: Url, access_token: String) -> Result<Self> {
        // Url::join drops the last segment unless the base ends with a slash.
        let base_url = if base_url.path().ends_with('/') {
            base_url
        } else {
            Url::parse(&format!("{}/", base_url)).context("Failed to normalize Graph base URL")?
        };

        Ok(Self {
            client,
            base_url,
            access_token,
        })
    }

    fn item_url(&self, path: &str, suffix: &str) -> Result<Url, RemoteError> {
        let encoded = encode_path(path);
        let route = if encoded.is_empty() {
            format!("{DRIVE_ROOT_ROUTE}{suffix}")
        } else if suffix.is_empty() {
            format!("{DRIVE_ROOT_ROUTE}:/{encoded}")
        } else {
            format!("{DRIVE_ROOT_ROUTE}:/{encoded}:{suffix}")
        };
        Ok(self.base_url.join(&route)?)
    }
}

/// Percent-encodes each segment of a slash-separated path for colon addressing.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

async fn into_remote_response(response: Response) -> Result<RemoteResponse, RemoteError> {
    let status = response.status();
    let body = response.bytes().await?;
    Ok(RemoteResponse { status, body })
}

fn ensure_accepted(response: RemoteResponse) -> Result<(), RemoteError> {
    if response.is_success() {
        return Ok(());
    }
    Err(RemoteError::Rejected {
        status: response.status,
        body: response.text(),
    })
}

#[async_trait]
impl RemoteStore for GraphStore {
    async fn create_upload_session(
        &self,
        path: &str,
        conflict: ConflictBehavior,
    ) -> Result<RemoteResponse, RemoteError> {
        let url = self.item_url(path, "/createUploadSession")?;
        let request = CreateUploadSessionRequest {
            item: UploadSessionItem {
                conflict_behavior: conflict,
            },
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await?;

        into_remote_response(response).await
    }

    async fn put_chunk(
        &self,
        upload_url: &str,
        range: ByteRange,
        bytes: Bytes,
    ) -> Result<RemoteResponse, RemoteError> {
        // The session URL is pre-authenticated; Graph rejects a bearer token on it.
        let response = self
            .client
            .put(upload_url)
            .header(header::CONTENT_LENGTH, range.len())
            .header(header::CONTENT_RANGE, range.content_range())
            .body(bytes)
            .send()
            .await?;

        into_remote_response(response).await
    }

    async fn put_whole(&self, path: &str, bytes: Bytes) -> Result<RemoteResponse, RemoteError> {
        let url = self.item_url(path, "/content")?;

        let response = self
            .client
            .put(url)
            .bearer_auth(&self.access_token)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;

        into_remote_response(response).await
    }

    async fn get_object_metadata(&self, path: &str) -> Result<RemoteResponse, RemoteError> {
        let url = self.item_url(path, "")?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        into_remote_response(response).await
    }

    async fn abort_session(&self, upload_url: &str) -> Result<(), RemoteError> {
        let response = self.client.delete(upload_url).send().await?;
        ensure_accepted(into_remote_response(response).await?)
    }
}

#[async_trait]
impl FolderStore for GraphStore {
    async fn create_folder(&self, parent: &str, name: &str) -> Result<RemoteResponse, RemoteError> {
        let url = self.item_url(parent, "/children")?;
        let request = CreateFolderRequest {
            name: name.to_string(),
            folder: serde_json::Map::new(),
            conflict_behavior: ConflictBehavior::Rename,
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await?;

        into_remote_response(response).await
    }
}
