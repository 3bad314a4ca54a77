//! Request/response contracts for the HTTP surface collaborator (§6.1).
//!
//! This crate implements only the DTOs and the services they route to;
//! mounting them behind an actual HTTP listener is left to a collaborator
//! binary, per §1's out-of-scope list.

use serde::{Deserialize, Serialize};

use crate::domain::{Chunk, ChunkId, Document, DocumentId, IndexState, Library, LibraryId};
use crate::filtering::Filters;
use crate::search::Hit;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLibraryRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDocumentRequest {
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateChunkRequest {
    pub text: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub compute_embedding: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateChunkRequest {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildIndexRequest {
    pub algo: String,
    pub metric: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildIndexResponse {
    pub status: &'static str,
    pub algo: String,
    pub metric: String,
    pub size: usize,
}

fn default_k() -> usize {
    5
}

fn default_algo() -> String {
    "auto".to_string()
}

fn default_metric() -> String {
    "cosine".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query_text: Option<String>,
    #[serde(default)]
    pub query_embedding: Option<Vec<f32>>,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_algo")]
    pub algo: String,
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default)]
    pub filters: Option<Filters>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RerankRequest {
    #[serde(default)]
    pub query_text: Option<String>,
    #[serde(default)]
    pub query_embedding: Option<Vec<f32>>,
    pub candidate_ids: Vec<ChunkId>,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_metric")]
    pub metric: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub library_id: LibraryId,
    pub score: f32,
    pub text: String,
}

impl From<Hit> for SearchHit {
    fn from(hit: Hit) -> Self {
        Self {
            chunk_id: hit.chunk_id,
            document_id: hit.document_id,
            library_id: hit.library_id,
            score: hit.score,
            text: hit.text,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotResponse {
    pub status: &'static str,
    pub snapshot_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageResponse {
    pub snapshot_bytes: u64,
    pub wal_bytes: u64,
}

// Library/Document/Chunk/IndexState are already `serde`-derived in
// `crate::domain` and serialize directly as the 200/201 response bodies for
// their respective routes; no separate view type is needed for them.
pub type LibraryResponse = Library;
pub type DocumentResponse = Document;
pub type ChunkResponse = Chunk;
pub type IndexStateResponse = IndexState;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_request_defaults() {
        let raw = serde_json::json!({"query_text": "hi"});
        let req: SearchRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(req.k, 5);
        assert_eq!(req.algo, "auto");
        assert_eq!(req.metric, "cosine");
    }
}
