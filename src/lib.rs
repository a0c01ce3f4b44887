pub mod archive;
pub mod auth;
pub mod config;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod policy;
pub mod remote;
pub mod rest_types;
pub mod serde_utils;
pub mod submission;
pub mod ui;
pub mod validation;

pub use error::{RemoteError, UploadError};
pub use orchestrator::{
    ChunkedUploadOrchestrator, UploadEvent, UploadOutcome, UploadProgress, UploadRequest,
};
pub use policy::{UploadPolicy, UploadStrategy};
pub use remote::{FolderStore, RemoteResponse, RemoteStore};
