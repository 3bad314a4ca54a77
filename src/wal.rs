//! Write-ahead log entry shapes. One JSON object per line on disk, tagged by
//! `op`; unknown tags decode to [`WalEntry::Unknown`] rather than an error so
//! replay stays forward-compatible (see [`crate::durability`]).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Chunk, ChunkId, Document, DocumentId, IndexState, Library, LibraryId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum WalEntry {
    #[serde(rename = "library.create")]
    LibraryCreate { ts: DateTime<Utc>, data: Library },
    #[serde(rename = "library.update")]
    LibraryUpdate { ts: DateTime<Utc>, id: LibraryId, data: serde_json::Value },
    #[serde(rename = "library.delete")]
    LibraryDelete { ts: DateTime<Utc>, id: LibraryId },

    #[serde(rename = "document.create")]
    DocumentCreate { ts: DateTime<Utc>, data: Document },
    #[serde(rename = "document.update")]
    DocumentUpdate { ts: DateTime<Utc>, id: DocumentId, data: serde_json::Value },
    #[serde(rename = "document.delete")]
    DocumentDelete { ts: DateTime<Utc>, id: DocumentId },

    #[serde(rename = "chunk.create")]
    ChunkCreate { ts: DateTime<Utc>, data: Chunk },
    #[serde(rename = "chunk.update")]
    ChunkUpdate {
        ts: DateTime<Utc>,
        id: ChunkId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        embedding: Option<Vec<f32>>,
    },
    #[serde(rename = "chunk.delete")]
    ChunkDelete { ts: DateTime<Utc>, id: ChunkId },

    #[serde(rename = "library.index_state")]
    LibraryIndexState {
        ts: DateTime<Utc>,
        library_id: LibraryId,
        index_state: IndexState,
        index_states: HashMap<String, IndexState>,
    },

    /// Forward-compat fallback for op tags this build doesn't recognize, and
    /// for lines that parse as JSON but fail to match any known payload shape.
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn unknown_op_round_trips_to_unknown_variant() {
        let raw = serde_json::json!({"op": "future.thing", "ts": Utc::now(), "foo": 1});
        let entry: WalEntry = serde_json::from_value(raw).unwrap();
        assert!(matches!(entry, WalEntry::Unknown));
    }

    #[test]
    fn chunk_delete_round_trips() {
        let entry = WalEntry::ChunkDelete { ts: Utc::now(), id: Uuid::new_v4() };
        let raw = serde_json::to_string(&entry).unwrap();
        let back: WalEntry = serde_json::from_str(&raw).unwrap();
        assert!(matches!(back, WalEntry::ChunkDelete { .. }));
    }
}
