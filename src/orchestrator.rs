//! Single-PUT or resumable chunked upload of an in-memory payload.
//!
//! Payloads up to the policy threshold go out in one PUT. Larger payloads open a
//! session with conflict behavior `fail` and send byte ranges strictly in order.
//! A `202` advances the cursor, any other 2xx completes the upload, everything
//! else is retried on the same range with backoff until the retry ceiling.

use std::future::Future;

use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{RemoteError, UploadError};
use crate::policy::{ByteRange, UploadPolicy, UploadStrategy, next_range};
use crate::remote::{ConflictBehavior, RemoteResponse, RemoteStore};
use crate::rest_types::{DriveItem, UploadSessionResponse};

#[derive(Clone, Debug, Default)]
pub struct UploadProgress {
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
}

#[derive(Debug)]
pub enum UploadEvent {
    Started(UploadStrategy),
    Progress(UploadProgress),
    Complete(UploadOutcome),
}

/// An upload whose length was declared separately from the payload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub target_path: String,
    pub payload: Bytes,
    pub content_length: u64,
}

impl UploadRequest {
    pub fn new(target_path: impl Into<String>, payload: Bytes) -> Self {
        let content_length = payload.len() as u64;
        Self {
            target_path: target_path.into(),
            payload,
            content_length,
        }
    }

    pub fn check_length(&self) -> Result<(), UploadError> {
        let actual = self.payload.len() as u64;
        if self.content_length != actual {
            return Err(UploadError::LengthMismatch {
                declared: self.content_length,
                actual,
            });
        }
        Ok(())
    }
}

/// A finished upload. `metadata` is the store's object metadata as returned,
/// or `Null` when none could be obtained.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub path: String,
    pub strategy: UploadStrategy,
    pub size: u64,
    pub id: Option<String>,
    pub name: Option<String>,
    pub web_url: Option<String>,
    pub metadata: Value,
}

impl UploadOutcome {
    fn new(path: &str, strategy: UploadStrategy, size: u64, metadata: Value) -> Self {
        let item = DriveItem::from_metadata(&metadata);
        Self {
            path: path.to_string(),
            strategy,
            size,
            id: item.id,
            name: item.name,
            web_url: item.web_url,
            metadata,
        }
    }
}

/// State of one resumable session. Owned by a single upload call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub session_url: String,
    pub total_bytes: u64,
    pub cursor: u64,
    pub attempts_for_current_chunk: u32,
}

impl UploadSession {
    pub fn new(session_url: String, total_bytes: u64) -> Self {
        Self {
            session_url,
            total_bytes,
            cursor: 0,
            attempts_for_current_chunk: 0,
        }
    }

    pub fn next_range(&self, chunk_size: u64) -> Option<ByteRange> {
        next_range(self.cursor, chunk_size, self.total_bytes)
    }

    pub fn advance(&mut self, range: ByteRange) {
        self.cursor = range.end + 1;
        self.attempts_for_current_chunk = 0;
    }

    pub fn record_failure(&mut self) -> u32 {
        self.attempts_for_current_chunk += 1;
        self.attempts_for_current_chunk
    }
}

pub struct ChunkedUploadOrchestrator<S> {
    store: S,
    policy: UploadPolicy,
}

impl<S: RemoteStore> ChunkedUploadOrchestrator<S> {
    pub fn new(store: S, policy: UploadPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    pub async fn upload(
        &self,
        target_path: &str,
        payload: Bytes,
    ) -> Result<UploadOutcome, UploadError> {
        let total_bytes = payload.len() as u64;
        let mut events = self.upload_stream(target_path, payload);

        while let Some(event) = events.next().await {
            if let UploadEvent::Complete(outcome) = event? {
                return Ok(outcome);
            }
        }

        Err(UploadError::UnexpectedLoopTermination {
            path: target_path.to_string(),
            total_bytes,
        })
    }

    pub async fn upload_request(&self, request: UploadRequest) -> Result<UploadOutcome, UploadError> {
        request.check_length()?;
        self.upload(&request.target_path, request.payload).await
    }

    /// Same as [`upload`](Self::upload), reporting progress as chunks are accepted.
    /// The stream ends after `Complete` or the first error.
    pub fn upload_stream<'a>(
        &'a self,
        target_path: &'a str,
        payload: Bytes,
    ) -> BoxStream<'a, Result<UploadEvent, UploadError>> {
        let stream = async_stream::try_stream! {
            let total = payload.len() as u64;
            if target_path.trim().is_empty() {
                Err(UploadError::EmptyPath)?;
            }
            if total == 0 {
                Err(UploadError::EmptyPayload { path: target_path.to_string() })?;
            }

            let strategy = self.policy.strategy(total);
            yield UploadEvent::Started(strategy);

            match strategy {
                UploadStrategy::SinglePut => {
                    let outcome = self.put_whole(target_path, payload).await?;
                    yield UploadEvent::Progress(UploadProgress {
                        bytes_uploaded: total,
                        total_bytes: total,
                    });
                    yield UploadEvent::Complete(outcome);
                }
                UploadStrategy::Chunked { chunk_size } => {
                    let mut session = self.create_session(target_path, total).await?;
                    info!(
                        path = target_path,
                        total_bytes = total,
                        chunk_size,
                        chunks = total.div_ceil(chunk_size),
                        "starting chunked upload"
                    );

                    let completion = loop {
                        let Some(range) = session.next_range(chunk_size) else {
                            break None;
                        };
                        let chunk_index = range.start / chunk_size;
                        let body = payload.slice(range.start as usize..=range.end as usize);

                        let result = self
                            .timed(self.store.put_chunk(&session.session_url, range, body))
                            .await;

                        match result {
                            Ok(response) if response.status == StatusCode::ACCEPTED => {
                                debug!(path = target_path, chunk_index, range = %range.content_range(), "chunk accepted");
                                session.advance(range);
                                yield UploadEvent::Progress(UploadProgress {
                                    bytes_uploaded: session.cursor,
                                    total_bytes: total,
                                });
                            }
                            Ok(response) if response.is_success() => {
                                break Some(response);
                            }
                            failure => {
                                let attempt = session.record_failure();
                                if attempt > self.policy.max_retries {
                                    self.abandon(&session).await;
                                    Err(chunk_failure(target_path, chunk_index, attempt, failure))?;
                                } else {
                                    let wait = self.policy.backoff.delay(attempt);
                                    match &failure {
                                        Ok(response) => warn!(
                                            path = target_path,
                                            chunk_index,
                                            attempt,
                                            max_retries = self.policy.max_retries,
                                            status = %response.status,
                                            wait_ms = wait.as_millis() as u64,
                                            "chunk upload failed, retrying"
                                        ),
                                        Err(e) => warn!(
                                            path = target_path,
                                            chunk_index,
                                            attempt,
                                            max_retries = self.policy.max_retries,
                                            error = %e,
                                            wait_ms = wait.as_millis() as u64,
                                            "chunk upload failed, retrying"
                                        ),
                                    }
                                    tokio::time::sleep(wait).await;
                                }
                            }
                        }
                    };

                    match completion {
                        Some(response) => {
                            let metadata = self.resolve_completion(target_path, response).await;
                            info!(path = target_path, total_bytes = total, "chunked upload completed");
                            yield UploadEvent::Progress(UploadProgress {
                                bytes_uploaded: total,
                                total_bytes: total,
                            });
                            yield UploadEvent::Complete(UploadOutcome::new(
                                target_path,
                                strategy,
                                total,
                                metadata,
                            ));
                        }
                        None => {
                            error!(
                                path = target_path,
                                total_bytes = total,
                                "every range was accepted but the session never completed"
                            );
                            self.abandon(&session).await;
                            Err(UploadError::UnexpectedLoopTermination {
                                path: target_path.to_string(),
                                total_bytes: total,
                            })?;
                        }
                    }
                }
            }
        };

        Box::pin(stream)
    }

    /// Runs a store call under the policy's request timeout.
    pub(crate) async fn timed<T>(
        &self,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        match tokio::time::timeout(self.policy.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(self.policy.request_timeout)),
        }
    }

    async fn put_whole(&self, path: &str, payload: Bytes) -> Result<UploadOutcome, UploadError> {
        let size = payload.len() as u64;
        let response = self
            .timed(self.store.put_whole(path, payload))
            .await
            .map_err(UploadError::transport("direct upload"))?;

        if !response.is_success() {
            let body = response.text();
            error!(path, status = %response.status, body = %body, "direct upload failed");
            return Err(UploadError::DirectUploadFailed {
                status: response.status,
                body,
            });
        }

        let metadata = parse_metadata(&response.body).unwrap_or_else(|| {
            warn!(path, "direct upload response carried no object metadata");
            Value::Null
        });
        info!(path, size, "direct upload completed");
        Ok(UploadOutcome::new(
            path,
            UploadStrategy::SinglePut,
            size,
            metadata,
        ))
    }

    async fn create_session(&self, path: &str, total: u64) -> Result<UploadSession, UploadError> {
        // Duplicate names were resolved by the caller; a rename here would
        // silently diverge from the name it expects.
        let response = self
            .timed(self.store.create_upload_session(path, ConflictBehavior::Fail))
            .await
            .map_err(UploadError::transport("create upload session"))?;

        if !response.is_success() {
            let body = response.text();
            error!(path, status = %response.status, body = %body, "failed to create upload session");
            return Err(UploadError::SessionCreationFailed {
                status: response.status,
                body,
            });
        }

        let session: UploadSessionResponse =
            serde_json::from_slice(&response.body).map_err(|_| UploadError::MissingSessionUrl)?;
        let upload_url = session
            .upload_url
            .filter(|url| !url.is_empty())
            .ok_or(UploadError::MissingSessionUrl)?;

        Ok(UploadSession::new(upload_url, total))
    }

    async fn resolve_completion(&self, path: &str, response: RemoteResponse) -> Value {
        if let Some(metadata) = parse_metadata(&response.body) {
            return metadata;
        }

        debug!(path, status = %response.status, "completion response had no metadata, fetching it");
        match self.timed(self.store.get_object_metadata(path)).await {
            Ok(response) if response.is_success() => parse_metadata(&response.body)
                .unwrap_or_else(|| {
                    warn!(path, "metadata lookup returned an unreadable body");
                    Value::Null
                }),
            Ok(response) => {
                warn!(path, status = %response.status, body = %response.text(), "metadata lookup failed");
                Value::Null
            }
            Err(e) => {
                warn!(path, error = %e, "metadata lookup failed");
                Value::Null
            }
        }
    }

    async fn abandon(&self, session: &UploadSession) {
        if !self.policy.abort_failed_sessions {
            return;
        }
        if let Err(e) = self.store.abort_session(&session.session_url).await {
            warn!(error = %e, "failed to abort upload session");
        }
    }
}

fn chunk_failure(
    path: &str,
    chunk_index: u64,
    attempts: u32,
    failure: Result<RemoteResponse, RemoteError>,
) -> UploadError {
    match failure {
        Ok(response) => {
            let body = response.text();
            error!(path, chunk_index, attempts, status = %response.status, body = %body, "chunk upload failed");
            UploadError::ChunkUploadFailed {
                status: response.status,
                body,
                chunk_index,
                attempts,
            }
        }
        Err(source) => {
            error!(path, chunk_index, attempts, error = %source, "chunk upload failed");
            UploadError::ChunkTransportFailed {
                chunk_index,
                attempts,
                source,
            }
        }
    }
}

fn parse_metadata(body: &[u8]) -> Option<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    serde_json::from_slice::<Value>(body)
        .ok()
        .filter(Value::is_object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_advances_and_resets_attempts() {
        let mut session = UploadSession::new("https://upload/1".to_string(), 10);
        let first = session.next_range(4).unwrap();
        assert_eq!((first.start, first.end), (0, 3));

        assert_eq!(session.record_failure(), 1);
        assert_eq!(session.record_failure(), 2);
        assert_eq!(session.next_range(4), Some(first));

        session.advance(first);
        assert_eq!(session.cursor, 4);
        assert_eq!(session.attempts_for_current_chunk, 0);

        let second = session.next_range(4).unwrap();
        session.advance(second);
        let last = session.next_range(4).unwrap();
        assert_eq!((last.start, last.end), (8, 9));
        session.advance(last);
        assert!(session.next_range(4).is_none());
    }

    #[test]
    fn test_request_length_must_match_payload() {
        let request = UploadRequest::new("root/a.pdf", Bytes::from_static(b"%PDF-1.4"));
        assert_eq!(request.content_length, 8);
        assert!(request.check_length().is_ok());

        let declared = UploadRequest {
            content_length: 9,
            ..request
        };
        assert!(matches!(
            declared.check_length(),
            Err(UploadError::LengthMismatch {
                declared: 9,
                actual: 8
            })
        ));
    }

    #[test]
    fn test_parse_metadata() {
        assert_eq!(parse_metadata(b""), None);
        assert_eq!(parse_metadata(b"  \n"), None);
        assert_eq!(parse_metadata(b"not json"), None);
        assert_eq!(parse_metadata(b"[1,2]"), None);
        assert_eq!(
            parse_metadata(br#"{"id":"1","name":"a.zip"}"#),
            Some(json!({"id": "1", "name": "a.zip"}))
        );
    }

    #[test]
    fn test_outcome_extracts_drive_item_fields() {
        let outcome = UploadOutcome::new(
            "root/a.zip",
            UploadStrategy::SinglePut,
            3,
            json!({"id": "01X", "name": "a.zip", "webUrl": "https://x/a.zip"}),
        );
        assert_eq!(outcome.id.as_deref(), Some("01X"));
        assert_eq!(outcome.name.as_deref(), Some("a.zip"));
        assert_eq!(outcome.web_url.as_deref(), Some("https://x/a.zip"));

        let mistyped = UploadOutcome::new(
            "root/a.zip",
            UploadStrategy::SinglePut,
            3,
            json!({"id": "01X", "name": "a.zip", "webUrl": "https://x", "size": "12"}),
        );
        assert_eq!(mistyped.id.as_deref(), Some("01X"));
        assert_eq!(mistyped.web_url.as_deref(), Some("https://x"));

        let bare = UploadOutcome::new("root/a.zip", UploadStrategy::SinglePut, 3, Value::Null);
        assert!(bare.id.is_none());
    }
}
