//! Cached message records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Borrow;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Extension used when the source URL does not carry a usable one.
const FALLBACK_EXTENSION: &str = "audio";

/// Opaque identifier of a voice message, assigned by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable file stem for this message: hex SHA-256 of the identifier.
    ///
    /// Host identifiers may contain path separators, so they never reach the
    /// file system verbatim.
    pub fn file_stem(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for MessageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Durable record of one cached voice message.
///
/// Serialized as JSON under `<namespace>:<message id>` in the key-value store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub message_id: MessageId,

    #[serde(rename = "localFilePath")]
    pub local_path: PathBuf,

    pub size_bytes: u64,

    #[serde(rename = "cachedAtISO8601")]
    pub cached_at: DateTime<Utc>,

    #[serde(rename = "lastAccessAtISO8601")]
    pub last_access_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Record a file that was just promoted into the cache.
    pub fn new(
        message_id: MessageId,
        local_path: PathBuf,
        size_bytes: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id,
            local_path,
            size_bytes,
            cached_at: now,
            last_access_at: now,
        }
    }

    /// Returns `true` if the entry was cached longer ago than `retention`.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        now - self.cached_at > retention
    }

    /// Eviction order: least recently accessed first, ties by age then id.
    pub(crate) fn lru_key(&self) -> (DateTime<Utc>, DateTime<Utc>, &MessageId) {
        (self.last_access_at, self.cached_at, &self.message_id)
    }
}

/// Final file name for a message downloaded from `url`.
pub(crate) fn cache_file_name(message_id: &MessageId, url: &str) -> String {
    format!("{}.{}", message_id.file_stem(), extension_from_url(url))
}

/// Name of the in-progress file of one download task.
///
/// Unique per task so a cancelled download still unwinding never touches
/// the file of a newer download for the same message.
pub(crate) fn partial_file_name(message_id: &MessageId, task_id: &Uuid) -> String {
    format!("{}.{}.part", message_id.file_stem(), task_id.simple())
}

pub(crate) fn is_partial_file(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "part")
}

fn extension_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let last_segment = path.rsplit('/').next().unwrap_or_default();

    match last_segment.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext.to_ascii_lowercase()
        }
        _ => FALLBACK_EXTENSION.to_string(),
    }
}
