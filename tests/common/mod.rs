#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde_json::{Value, json};

use classdrop::error::RemoteError;
use classdrop::policy::{ByteRange, UploadPolicy};
use classdrop::remote::{ConflictBehavior, FolderStore, RemoteResponse, RemoteStore};

pub const SESSION_URL: &str = "https://upload.example.test/session/1";
pub const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateSession {
        path: String,
        conflict: ConflictBehavior,
    },
    PutChunk {
        url: String,
        range: ByteRange,
        len: usize,
    },
    PutWhole {
        path: String,
        len: usize,
    },
    GetMetadata {
        path: String,
    },
    Abort {
        url: String,
    },
    CreateFolder {
        parent: String,
        name: String,
    },
}

/// In-memory store. Scripted responses are consumed in order; once a queue is
/// empty the store behaves like a healthy drive.
#[derive(Default)]
pub struct ScriptedStore {
    calls: Mutex<Vec<Call>>,
    sessions: Mutex<VecDeque<RemoteResponse>>,
    chunks: Mutex<VecDeque<RemoteResponse>>,
    wholes: Mutex<VecDeque<RemoteResponse>>,
    stalled_chunks: Mutex<u32>,
    stalled_lookups: Mutex<u32>,
    items: Mutex<HashMap<String, RemoteResponse>>,
    failing_lookups: Mutex<HashMap<String, RemoteResponse>>,
}

pub fn item_json(path: &str) -> Value {
    let name = path.rsplit('/').next().unwrap_or(path);
    json!({
        "id": format!("id-{name}"),
        "name": name,
        "webUrl": format!("https://drive.example.test/{path}"),
    })
}

pub fn response(status: u16, body: impl Into<Bytes>) -> RemoteResponse {
    RemoteResponse::new(StatusCode::from_u16(status).unwrap(), body)
}

pub fn json_response(status: u16, body: &Value) -> RemoteResponse {
    response(status, serde_json::to_vec(body).unwrap())
}

pub fn payload(len: u64) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}

/// Default policy with a short backoff, so paused-clock tests stay readable.
pub fn fast_policy() -> UploadPolicy {
    UploadPolicy {
        backoff: classdrop::policy::BackoffPolicy::Exponential {
            base: Duration::from_millis(10),
            cap: Duration::from_millis(100),
        },
        ..UploadPolicy::default()
    }
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_session(&self, response: RemoteResponse) -> &Self {
        self.sessions.lock().unwrap().push_back(response);
        self
    }

    pub fn script_chunk(&self, response: RemoteResponse) -> &Self {
        self.chunks.lock().unwrap().push_back(response);
        self
    }

    pub fn script_chunks(&self, response: RemoteResponse, times: usize) -> &Self {
        for _ in 0..times {
            self.script_chunk(response.clone());
        }
        self
    }

    pub fn script_whole(&self, response: RemoteResponse) -> &Self {
        self.wholes.lock().unwrap().push_back(response);
        self
    }

    /// The next `count` chunk PUTs never answer.
    pub fn stall_chunks(&self, count: u32) -> &Self {
        *self.stalled_chunks.lock().unwrap() = count;
        self
    }

    /// The next `count` metadata lookups never answer.
    pub fn stall_lookups(&self, count: u32) -> &Self {
        *self.stalled_lookups.lock().unwrap() = count;
        self
    }

    pub fn insert_item(&self, path: &str, body: &Value) -> &Self {
        self.items
            .lock()
            .unwrap()
            .insert(path.to_string(), json_response(200, body));
        self
    }

    pub fn fail_lookup(&self, path: &str, response: RemoteResponse) -> &Self {
        self.failing_lookups
            .lock()
            .unwrap()
            .insert(path.to_string(), response);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn chunk_ranges(&self) -> Vec<ByteRange> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::PutChunk { range, .. } => Some(range),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn session_path(&self) -> Option<String> {
        self.calls().into_iter().rev().find_map(|call| match call {
            Call::CreateSession { path, .. } => Some(path),
            _ => None,
        })
    }
}

async fn stall_if_scripted(counter: &Mutex<u32>) {
    let stall = {
        let mut remaining = counter.lock().unwrap();
        let stall = *remaining > 0;
        *remaining = remaining.saturating_sub(1);
        stall
    };
    if stall {
        tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
    }
}

#[async_trait]
impl RemoteStore for ScriptedStore {
    async fn create_upload_session(
        &self,
        path: &str,
        conflict: ConflictBehavior,
    ) -> Result<RemoteResponse, RemoteError> {
        self.record(Call::CreateSession {
            path: path.to_string(),
            conflict,
        });
        let scripted = self.sessions.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| {
            json_response(
                200,
                &json!({
                    "uploadUrl": SESSION_URL,
                    "expirationDateTime": "2030-01-01T00:00:00Z",
                }),
            )
        }))
    }

    async fn put_chunk(
        &self,
        upload_url: &str,
        range: ByteRange,
        bytes: Bytes,
    ) -> Result<RemoteResponse, RemoteError> {
        assert_eq!(bytes.len() as u64, range.len(), "body must match the range");
        self.record(Call::PutChunk {
            url: upload_url.to_string(),
            range,
            len: bytes.len(),
        });

        stall_if_scripted(&self.stalled_chunks).await;

        let scripted = self.chunks.lock().unwrap().pop_front();
        if let Some(response) = scripted {
            return Ok(response);
        }

        if range.is_last() {
            let path = self.session_path().unwrap_or_default();
            let item = item_json(&path);
            self.items
                .lock()
                .unwrap()
                .insert(path, json_response(200, &item));
            Ok(json_response(201, &item))
        } else {
            Ok(response(202, r#"{"nextExpectedRanges":[]}"#))
        }
    }

    async fn put_whole(&self, path: &str, bytes: Bytes) -> Result<RemoteResponse, RemoteError> {
        self.record(Call::PutWhole {
            path: path.to_string(),
            len: bytes.len(),
        });
        let scripted = self.wholes.lock().unwrap().pop_front();
        if let Some(response) = scripted {
            return Ok(response);
        }

        let item = item_json(path);
        self.items
            .lock()
            .unwrap()
            .insert(path.to_string(), json_response(200, &item));
        Ok(json_response(201, &item))
    }

    async fn get_object_metadata(&self, path: &str) -> Result<RemoteResponse, RemoteError> {
        self.record(Call::GetMetadata {
            path: path.to_string(),
        });
        stall_if_scripted(&self.stalled_lookups).await;
        if let Some(response) = self.failing_lookups.lock().unwrap().get(path) {
            return Ok(response.clone());
        }
        Ok(self
            .items
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_else(|| response(404, r#"{"error":{"code":"itemNotFound"}}"#)))
    }

    async fn abort_session(&self, upload_url: &str) -> Result<(), RemoteError> {
        self.record(Call::Abort {
            url: upload_url.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl FolderStore for ScriptedStore {
    async fn create_folder(&self, parent: &str, name: &str) -> Result<RemoteResponse, RemoteError> {
        self.record(Call::CreateFolder {
            parent: parent.to_string(),
            name: name.to_string(),
        });
        let path = if parent.is_empty() {
            name.to_string()
        } else {
            format!("{parent}/{name}")
        };
        let folder = json!({ "id": format!("folder-{name}"), "name": name, "folder": {} });
        self.items
            .lock()
            .unwrap()
            .insert(path, json_response(200, &folder));
        Ok(json_response(201, &folder))
    }
}
