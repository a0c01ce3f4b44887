//! A student's submission: folder layout, duplicate-name handling, and the
//! strictly sequential upload of each file through the orchestrator.

use bytes::Bytes;
use chrono::{DateTime, Local, Utc};
use futures::StreamExt;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::error::{RemoteError, UploadError};
use crate::orchestrator::{ChunkedUploadOrchestrator, UploadEvent, UploadProgress};
use crate::policy::UploadPolicy;
use crate::remote::FolderStore;
use crate::validation::{self, ValidationError};

pub const DEFAULT_ROOT_FOLDER: &str = "과제제출";

#[derive(Debug, Clone)]
pub struct SubmissionFile {
    pub file_name: String,
    pub content: Bytes,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub student_id: String,
    pub subject: String,
    pub activity: String,
    pub section: String,
    pub files: Vec<SubmissionFile>,
}

impl Submission {
    /// `root/subject/activity/section/student_id`
    pub fn parent_path(&self, root: &str) -> String {
        [
            normalize_root(root).as_str(),
            self.subject.as_str(),
            self.activity.as_str(),
            self.section.as_str(),
            self.student_id.as_str(),
        ]
        .join("/")
    }

    fn check_fields(&self) -> Result<(), SubmissionError> {
        let fields = [
            ("student id", &self.student_id),
            ("subject", &self.subject),
            ("activity", &self.activity),
            ("section", &self.section),
        ];
        match fields.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((name, _)) => Err(SubmissionError::MissingField(*name)),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedFile {
    pub name: String,
    pub size: u64,
    pub web_url: Option<String>,
    pub chunked: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub submission_id: Uuid,
    pub student_id: String,
    pub subject: String,
    pub activity: String,
    pub section: String,
    pub submitted_at: DateTime<Utc>,
    pub files: Vec<SubmittedFile>,
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("folder check failed: {path} ({status}) {body}")]
    FolderCheckFailed {
        path: String,
        status: StatusCode,
        body: String,
    },

    #[error("failed to create folder: {path} ({status}) {body}")]
    FolderCreationFailed {
        path: String,
        status: StatusCode,
        body: String,
    },

    #[error("exists check failed: {path} ({status}) {body}")]
    ExistsCheckFailed {
        path: String,
        status: StatusCode,
        body: String,
    },

    #[error("{operation} failed for {path}: {source}")]
    Transport {
        operation: &'static str,
        path: String,
        #[source]
        source: RemoteError,
    },

    #[error("upload of {file_name} failed: {source}")]
    Upload {
        file_name: String,
        #[source]
        source: UploadError,
    },
}

/// Strips surrounding slashes; an empty root falls back to [`DEFAULT_ROOT_FOLDER`].
pub fn normalize_root(root: &str) -> String {
    let trimmed = root.trim_matches('/');
    if trimmed.is_empty() {
        DEFAULT_ROOT_FOLDER.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Replaces path separators and control characters with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_ascii_control() => '_',
            c => c,
        })
        .collect()
}

/// `report.pdf` → `report_20250314_091500.pdf`. Names without an extension
/// (or dotfiles) get the suffix at the end.
pub fn append_timestamp(name: &str, now: DateTime<Local>) -> String {
    let stamp = now.format("%Y%m%d_%H%M%S");
    match name.rfind('.') {
        Some(idx) if idx > 0 => format!("{}_{}{}", &name[..idx], stamp, &name[idx..]),
        _ => format!("{}_{}", name, stamp),
    }
}

pub struct Submitter<S> {
    orchestrator: ChunkedUploadOrchestrator<S>,
    root_folder: String,
}

impl<S: FolderStore> Submitter<S> {
    pub fn new(store: S, policy: UploadPolicy, root_folder: &str) -> Self {
        Self {
            orchestrator: ChunkedUploadOrchestrator::new(store, policy),
            root_folder: normalize_root(root_folder),
        }
    }

    pub fn orchestrator(&self) -> &ChunkedUploadOrchestrator<S> {
        &self.orchestrator
    }

    /// Validates, then uploads every file in order. One file's upload finishes
    /// (all of its chunks) before the next one starts.
    pub async fn submit(
        &self,
        submission: Submission,
        progress: Option<&watch::Sender<UploadProgress>>,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        let submission_id = Uuid::new_v4();
        let span = info_span!(
            "submission",
            %submission_id,
            student_id = %submission.student_id,
            subject = %submission.subject
        );
        self.submit_inner(submission_id, submission, progress)
            .instrument(span)
            .await
    }

    async fn submit_inner(
        &self,
        submission_id: Uuid,
        submission: Submission,
        progress: Option<&watch::Sender<UploadProgress>>,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        submission.check_fields()?;
        let total_bytes = validation::validate_submission(
            submission
                .files
                .iter()
                .map(|f| (f.file_name.as_str(), f.content.as_ref())),
        )?;

        let parent_path = submission.parent_path(&self.root_folder);
        self.ensure_folder_tree(&parent_path).await?;

        let mut files = Vec::with_capacity(submission.files.len());
        let mut uploaded_before = 0u64;

        for file in &submission.files {
            let safe_name = sanitize_file_name(&file.file_name);
            let taken = self.item_exists(&format!("{parent_path}/{safe_name}")).await?;
            let final_name = if taken {
                let renamed = append_timestamp(&safe_name, Local::now());
                debug!(from = %safe_name, to = %renamed, "name already taken");
                renamed
            } else {
                safe_name
            };
            let full_path = format!("{parent_path}/{final_name}");

            let mut events = self
                .orchestrator
                .upload_stream(&full_path, file.content.clone());
            let mut outcome = None;
            while let Some(event) = events.next().await {
                let event = event.map_err(|source| SubmissionError::Upload {
                    file_name: file.file_name.clone(),
                    source,
                })?;
                match event {
                    UploadEvent::Started(_) => {}
                    UploadEvent::Progress(p) => {
                        if let Some(tx) = progress {
                            let _ = tx.send(UploadProgress {
                                bytes_uploaded: uploaded_before + p.bytes_uploaded,
                                total_bytes,
                            });
                        }
                    }
                    UploadEvent::Complete(o) => {
                        outcome = Some(o);
                        break;
                    }
                }
            }
            let outcome = outcome.ok_or_else(|| SubmissionError::Upload {
                file_name: file.file_name.clone(),
                source: UploadError::UnexpectedLoopTermination {
                    path: full_path.clone(),
                    total_bytes: file.content.len() as u64,
                },
            })?;

            uploaded_before += file.content.len() as u64;
            info!(path = %full_path, size = outcome.size, chunked = outcome.strategy.is_chunked(), "file submitted");
            files.push(SubmittedFile {
                name: outcome.name.unwrap_or(final_name),
                size: outcome.size,
                web_url: outcome.web_url,
                chunked: outcome.strategy.is_chunked(),
            });
        }

        Ok(SubmissionReceipt {
            submission_id,
            student_id: submission.student_id,
            subject: submission.subject,
            activity: submission.activity,
            section: submission.section,
            submitted_at: Utc::now(),
            files,
        })
    }

    /// Walks `path` from the drive root, creating each missing folder. Every
    /// lookup runs under the upload policy's request timeout.
    pub async fn ensure_folder_tree(&self, path: &str) -> Result<(), SubmissionError> {
        let store = self.orchestrator.store();
        let mut current = String::new();

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let next = if current.is_empty() {
                segment.to_string()
            } else {
                format!("{current}/{segment}")
            };

            let response = self
                .orchestrator
                .timed(store.get_object_metadata(&next))
                .await
                .map_err(|source| SubmissionError::Transport {
                    operation: "folder check",
                    path: next.clone(),
                    source,
                })?;

            if response.status == StatusCode::NOT_FOUND {
                debug!(path = %next, "creating folder");
                let created = self
                    .orchestrator
                    .timed(store.create_folder(&current, segment))
                    .await
                    .map_err(|source| SubmissionError::Transport {
                        operation: "folder creation",
                        path: next.clone(),
                        source,
                    })?;
                if !created.is_success() {
                    return Err(SubmissionError::FolderCreationFailed {
                        path: next,
                        status: created.status,
                        body: created.text(),
                    });
                }
            } else if !response.is_success() {
                return Err(SubmissionError::FolderCheckFailed {
                    path: next,
                    status: response.status,
                    body: response.text(),
                });
            }

            current = next;
        }

        Ok(())
    }

    pub async fn item_exists(&self, path: &str) -> Result<bool, SubmissionError> {
        let store = self.orchestrator.store();
        let response = self
            .orchestrator
            .timed(store.get_object_metadata(path))
            .await
            .map_err(|source| SubmissionError::Transport {
                operation: "exists check",
                path: path.to_string(),
                source,
            })?;

        match response.status {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(SubmissionError::ExistsCheckFailed {
                path: path.to_string(),
                status,
                body: response.text(),
            }),
        }
    }
}
