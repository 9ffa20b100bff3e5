//! Payload Router (§4.1): chooses inline-vs-offloaded disposition for a
//! serialized event and, for offloaded payloads, writes the bytes to the
//! blob store.

use chrono::Utc;
use fluxa_ledger::FluxaError;
use fluxa_storage::{BlobError, BlobStore, PayloadMode};

/// Messages larger than this travel via the blob store instead of inline
/// (§4.1): the industry-standard 256 KiB queue message ceiling.
pub const MAX_INLINE_BYTES: usize = 262_144;

/// The outcome of routing a payload: its disposition, and either the bytes
/// themselves (inline) or the blob key they were written under (offloaded).
#[derive(Debug, Clone)]
pub enum RoutedPayload {
    /// Payload travels inline inside the queue message.
    Inline(Vec<u8>),
    /// Payload was written to the blob store at `key`.
    Offloaded {
        /// The blob coordinate the payload was written under.
        key: String,
    },
}

impl RoutedPayload {
    /// The [`PayloadMode`] this disposition corresponds to.
    pub fn mode(&self) -> PayloadMode {
        match self {
            RoutedPayload::Inline(_) => PayloadMode::Inline,
            RoutedPayload::Offloaded { .. } => PayloadMode::S3,
        }
    }
}

/// Build the blob key for `event_id` at the current UTC date
/// (`raw/YYYY-MM-DD/<event_id>.json`, §4.1, §6).
pub fn blob_key(event_id: &str) -> String {
    let date = Utc::now().format("%Y-%m-%d");
    format!("raw/{date}/{event_id}.json")
}

/// Route `bytes` for `event_id`: inline if within [`MAX_INLINE_BYTES`],
/// otherwise written to `blob_store` and offloaded. The boundary value
/// (exactly [`MAX_INLINE_BYTES`]) is inline.
pub async fn route(
    blob_store: &dyn BlobStore,
    bytes: Vec<u8>,
    event_id: &str,
) -> Result<RoutedPayload, FluxaError> {
    route_with_threshold(blob_store, bytes, event_id, MAX_INLINE_BYTES).await
}

/// Like [`route`], but with the inline/offload threshold taken from the
/// caller instead of [`MAX_INLINE_BYTES`] (§9: `MAX_INLINE_BYTES` must be
/// configurable).
pub async fn route_with_threshold(
    blob_store: &dyn BlobStore,
    bytes: Vec<u8>,
    event_id: &str,
    max_inline_bytes: usize,
) -> Result<RoutedPayload, FluxaError> {
    if bytes.len() <= max_inline_bytes {
        return Ok(RoutedPayload::Inline(bytes));
    }

    let key = blob_key(event_id);
    blob_store.put(&key, bytes).await.map_err(|e| match e {
        BlobError::NotFound(msg) | BlobError::Transient(msg) => FluxaError::BlobWriteFailure(msg),
    })?;
    Ok(RoutedPayload::Offloaded { key })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxa_storage::MemoryBlobStore;

    #[tokio::test]
    async fn exactly_threshold_bytes_stays_inline() {
        let store = MemoryBlobStore::new();
        let bytes = vec![0u8; MAX_INLINE_BYTES];
        let routed = route(&store, bytes.clone(), "evt-1").await.unwrap();
        match routed {
            RoutedPayload::Inline(b) => assert_eq!(b, bytes),
            RoutedPayload::Offloaded { .. } => panic!("expected inline disposition"),
        }
    }

    #[tokio::test]
    async fn one_byte_over_threshold_offloads() {
        let store = MemoryBlobStore::new();
        let bytes = vec![0u8; MAX_INLINE_BYTES + 1];
        let routed = route(&store, bytes.clone(), "evt-2").await.unwrap();
        match routed {
            RoutedPayload::Offloaded { key } => {
                assert!(key.starts_with("raw/"));
                assert!(key.ends_with("evt-2.json"));
                assert_eq!(store.get(&key).await.unwrap(), bytes);
            }
            RoutedPayload::Inline(_) => panic!("expected offloaded disposition"),
        }
    }

    #[test]
    fn blob_key_matches_layout() {
        let key = blob_key("evt-123");
        let parts: Vec<&str> = key.split('/').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "raw");
        assert_eq!(parts[2], "evt-123.json");
        assert_eq!(parts[1].len(), 10); // YYYY-MM-DD
    }
}
