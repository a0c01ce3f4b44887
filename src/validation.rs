//! Submission policy: allowed extensions, per-type and aggregate size ceilings,
//! and a light magic-number check for formats that have one.

use thiserror::Error;

use crate::policy::MEGABYTE;

pub const MAX_FILES_PER_SUBMISSION: usize = 5;
pub const TOTAL_SIZE_LIMIT_MB: u64 = 300;

/// Per-extension ceilings in MiB.
const EXTENSION_LIMITS_MB: &[(&str, u64)] = &[
    ("pdf", 20),
    ("html", 5),
    ("htm", 5),
    ("jpg", 8),
    ("jpeg", 8),
    ("png", 8),
    ("csv", 2),
    ("txt", 2),
    ("zip", 50),
    ("hwp", 10),
    ("hwpx", 10),
    ("ppt", 40),
    ("pptx", 40),
    ("xlsx", 5),
    ("mp4", 300),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no files to submit")]
    NoFiles,

    #[error("too many files: {count} (max {} per submission)", MAX_FILES_PER_SUBMISSION)]
    TooManyFiles { count: usize },

    #[error("unsupported file type: {file_name}")]
    UnsupportedType { file_name: String },

    #[error("empty file: {file_name}")]
    EmptyFile { file_name: String },

    #[error("{file_name} is too large: {extension} max {limit_mb}MB")]
    TooLarge {
        file_name: String,
        extension: String,
        limit_mb: u64,
    },

    #[error("content of {file_name} does not look like {extension}")]
    ContentMismatch { file_name: String, extension: String },

    #[error("total size exceeded: max {}MB per submission", TOTAL_SIZE_LIMIT_MB)]
    TotalSizeExceeded { total_bytes: u64 },
}

pub fn extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

pub fn size_limit_mb(extension: &str) -> Option<u64> {
    EXTENSION_LIMITS_MB
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, limit)| *limit)
}

/// Checks the leading bytes against the format implied by the extension.
/// Formats without a reliable signature always pass.
pub fn sniff(extension: &str, content: &[u8]) -> bool {
    match extension {
        "pdf" => content.starts_with(b"%PDF-"),
        "jpg" | "jpeg" => content.starts_with(&[0xFF, 0xD8, 0xFF]),
        "png" => content.starts_with(b"\x89PNG"),
        "zip" | "pptx" | "xlsx" | "hwpx" => content.starts_with(b"PK"),
        "mp4" => {
            let head = &content[..content.len().min(1024)];
            head.windows(4).any(|w| w == b"ftyp")
        }
        _ => true,
    }
}

pub fn validate_file(file_name: &str, content: &[u8]) -> Result<(), ValidationError> {
    let ext = extension(file_name)
        .filter(|ext| size_limit_mb(ext).is_some())
        .ok_or_else(|| ValidationError::UnsupportedType {
            file_name: file_name.to_string(),
        })?;

    if content.is_empty() {
        return Err(ValidationError::EmptyFile {
            file_name: file_name.to_string(),
        });
    }

    let limit_mb = size_limit_mb(&ext).unwrap_or_default();
    if content.len() as u64 > limit_mb * MEGABYTE {
        return Err(ValidationError::TooLarge {
            file_name: file_name.to_string(),
            extension: ext,
            limit_mb,
        });
    }

    if !sniff(&ext, content) {
        return Err(ValidationError::ContentMismatch {
            file_name: file_name.to_string(),
            extension: ext,
        });
    }

    Ok(())
}

/// Validates a whole submission: file count, each file, then the aggregate size.
pub fn validate_submission<'a, I>(files: I) -> Result<u64, ValidationError>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let files: Vec<_> = files.into_iter().collect();
    if files.is_empty() {
        return Err(ValidationError::NoFiles);
    }
    if files.len() > MAX_FILES_PER_SUBMISSION {
        return Err(ValidationError::TooManyFiles { count: files.len() });
    }

    let mut total_bytes = 0u64;
    for (file_name, content) in files {
        validate_file(file_name, content)?;
        total_bytes += content.len() as u64;
    }

    if total_bytes > TOTAL_SIZE_LIMIT_MB * MEGABYTE {
        return Err(ValidationError::TotalSizeExceeded { total_bytes });
    }

    Ok(total_bytes)
}
