use serde::{Deserialize, Serialize};

use crate::remote::ConflictBehavior;

#[derive(Debug, Clone, Serialize)]
pub struct CreateUploadSessionRequest {
    pub item: UploadSessionItem,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadSessionItem {
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    pub conflict_behavior: ConflictBehavior,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSessionResponse {
    pub upload_url: Option<String>,
    pub expiration_date_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateFolderRequest {
    pub name: String,
    pub folder: serde_json::Map<String, serde_json::Value>,
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    pub conflict_behavior: ConflictBehavior,
}

/// The subset of a DriveItem the submitter reports back.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: Option<String>,
    pub name: Option<String>,
    pub web_url: Option<String>,
    pub size: Option<u64>,
}

impl DriveItem {
    /// Reads each field on its own, so a mistyped field only loses itself.
    pub fn from_metadata(metadata: &serde_json::Value) -> Self {
        let text = |key: &str| {
            metadata
                .get(key)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        };
        Self {
            id: text("id"),
            name: text("name"),
            web_url: text("webUrl"),
            size: metadata.get("size").and_then(serde_json::Value::as_u64),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub expires_in: Option<u64>,
}
