use std::time::Duration;

use serde::Deserialize;

use crate::serde_utils;

pub const MEGABYTE: u64 = 1024 * 1024; // 1MiB

pub const SINGLE_PUT_THRESHOLD: u64 = 10 * MEGABYTE;
pub const FIXED_CHUNK_SIZE: u64 = 8 * MEGABYTE;
pub const MAX_RETRIES: u32 = 3;

const SIZE_50MB: u64 = 50 * MEGABYTE;
const SIZE_200MB: u64 = 200 * MEGABYTE;

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(300);
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    SinglePut,
    Chunked { chunk_size: u64 },
}

impl UploadStrategy {
    pub fn is_chunked(&self) -> bool {
        matches!(self, UploadStrategy::Chunked { .. })
    }
}

/// How large each chunk of a resumable session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkSizePolicy {
    /// Scales with the payload: ~1/10 up to 50MiB, ~1/15 up to 200MiB, ~1/20 beyond,
    /// each tier clamped to its own floor and ceiling.
    #[default]
    Tiered,
    Fixed { bytes: u64 },
}

impl ChunkSizePolicy {
    pub fn chunk_size(&self, total: u64) -> u64 {
        match *self {
            ChunkSizePolicy::Tiered => {
                if total <= SIZE_50MB {
                    (total / 10).clamp(MEGABYTE, 4 * MEGABYTE)
                } else if total <= SIZE_200MB {
                    (total / 15).clamp(4 * MEGABYTE, 8 * MEGABYTE)
                } else {
                    (total / 20).clamp(8 * MEGABYTE, 16 * MEGABYTE)
                }
            }
            ChunkSizePolicy::Fixed { bytes } => bytes.max(1),
        }
    }
}

/// Wait between attempts of the same chunk. Attempts are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    Linear {
        #[serde(deserialize_with = "serde_utils::deserialize_duration")]
        step: Duration,
    },
    Exponential {
        #[serde(deserialize_with = "serde_utils::deserialize_duration")]
        base: Duration,
        #[serde(deserialize_with = "serde_utils::deserialize_duration")]
        cap: Duration,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match *self {
            BackoffPolicy::Linear { step } => step.saturating_mul(attempt),
            BackoffPolicy::Exponential { base, cap } => {
                let factor = 2u32.saturating_pow(attempt - 1);
                base.saturating_mul(factor).min(cap)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadPolicy {
    pub single_put_threshold: u64,
    pub chunk_size: ChunkSizePolicy,
    pub backoff: BackoffPolicy,
    pub max_retries: u32,
    #[serde(deserialize_with = "serde_utils::deserialize_duration")]
    pub request_timeout: Duration,
    pub abort_failed_sessions: bool,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            single_put_threshold: SINGLE_PUT_THRESHOLD,
            chunk_size: ChunkSizePolicy::default(),
            backoff: BackoffPolicy::default(),
            max_retries: MAX_RETRIES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            abort_failed_sessions: false,
        }
    }
}

impl UploadPolicy {
    pub fn strategy(&self, total: u64) -> UploadStrategy {
        if total <= self.single_put_threshold {
            UploadStrategy::SinglePut
        } else {
            UploadStrategy::Chunked {
                chunk_size: self.chunk_size.chunk_size(total),
            }
        }
    }
}

/// An inclusive byte range of a payload of `total` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_last(&self) -> bool {
        self.end + 1 == self.total
    }

    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

/// The range starting at `cursor`, at most `chunk_size` long. `None` once the payload is exhausted.
pub fn next_range(cursor: u64, chunk_size: u64, total: u64) -> Option<ByteRange> {
    if cursor >= total || chunk_size == 0 {
        return None;
    }
    let end = cursor.saturating_add(chunk_size).min(total);
    Some(ByteRange {
        start: cursor,
        end: end - 1,
        total,
    })
}

pub fn chunk_ranges(total: u64, chunk_size: u64) -> Vec<ByteRange> {
    let mut ranges = Vec::with_capacity(total.div_ceil(chunk_size.max(1)) as usize);
    let mut cursor = 0;
    while let Some(range) = next_range(cursor, chunk_size, total) {
        cursor = range.end + 1;
        ranges.push(range);
    }
    ranges
}
