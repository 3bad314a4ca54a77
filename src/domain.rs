//! Core entities: Library, Document, Chunk, and the per-algorithm index state
//! they carry. UUIDs identify every entity; timestamps are UTC.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type LibraryId = Uuid;
pub type DocumentId = Uuid;
pub type ChunkId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexAlgo {
    Flat,
    Rp,
}

impl IndexAlgo {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "flat" => Some(IndexAlgo::Flat),
            "rp" => Some(IndexAlgo::Rp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexAlgo::Flat => "flat",
            IndexAlgo::Rp => "rp",
        }
    }
}

/// Build metadata for one algorithm's live index on a library.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexState {
    pub built: bool,
    pub algo: Option<IndexAlgo>,
    pub metric: Option<String>,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    pub size: usize,
    pub last_built_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibraryMeta {
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub id: LibraryId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub embedding_dim: Option<usize>,
    #[serde(default)]
    pub library_meta: LibraryMeta,
    /// Mirrors the most recently built index's state.
    #[serde(default)]
    pub index_state: IndexState,
    /// Per-algorithm build history, keyed by `IndexAlgo::as_str()`.
    #[serde(default)]
    pub index_states: HashMap<String, IndexState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub library_id: LibraryId,
    pub title: String,
    #[serde(default)]
    pub document_meta: DocumentMeta,
    #[serde(default)]
    pub chunk_ids: Vec<ChunkId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub library_id: LibraryId,
    pub document_id: DocumentId,
    pub text: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub chunk_meta: ChunkMeta,
}

impl Library {
    pub fn new(name: String, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            description,
            embedding_dim: None,
            library_meta: LibraryMeta {
                created_at: Utc::now(),
                owner: None,
                topic: None,
            },
            index_state: IndexState::default(),
            index_states: HashMap::new(),
        }
    }
}

impl Document {
    pub fn new(library_id: LibraryId, title: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            library_id,
            title,
            document_meta: DocumentMeta {
                created_at: Utc::now(),
                ..Default::default()
            },
            chunk_ids: Vec::new(),
        }
    }
}

impl Chunk {
    pub fn new(library_id: LibraryId, document_id: DocumentId, text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            library_id,
            document_id,
            text,
            embedding: None,
            chunk_meta: ChunkMeta {
                created_at: Utc::now(),
                ..Default::default()
            },
        }
    }
}
