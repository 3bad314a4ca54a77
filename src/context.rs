//! Explicit application context (§9): the process-wide repository, indexing
//! service, durability layer, and embedder, threaded into callers rather
//! than reached for as ambient globals.

use std::sync::Arc;

use crate::config::Config;
use crate::domain::{Chunk, Document, IndexAlgo, IndexState, Library, LibraryId};
use crate::durability::{Durability, StorageStats};
use crate::embedder::{Embedder, StubEmbedder};
use crate::error::{CoreError, CoreResult};
use crate::indexing::IndexingService;
use crate::metrics::Metric;
use crate::mutations::MutationService;
use crate::repository::Repository;
use crate::search::{Hit, RerankQuery, SearchQuery, SearchService};

pub struct AppContext {
    pub config: Config,
    pub repo: Arc<Repository>,
    pub indexing: Arc<IndexingService>,
    pub durability: Arc<Durability>,
    pub embedder: Arc<dyn Embedder>,
    mutations: MutationService,
    search_service: SearchService,
}

impl AppContext {
    /// Builds a fresh context using the stub embedder and opens (without
    /// replaying) the WAL under `config.data_dir`. Call [`Self::bootstrap`]
    /// to replay prior state before serving requests.
    pub fn new(config: Config) -> CoreResult<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(StubEmbedder::new(config.embedding_dim));
        Self::with_embedder(config, embedder)
    }

    pub fn with_embedder(config: Config, embedder: Arc<dyn Embedder>) -> CoreResult<Self> {
        let repo = Arc::new(Repository::new());
        let indexing = Arc::new(IndexingService::new());
        let durability = Arc::new(Durability::open(&config.data_dir)?);
        let mutations = MutationService::new(repo.clone(), durability.clone(), embedder.clone());
        let search = SearchService::new(repo.clone(), indexing.clone(), embedder.clone());
        Ok(Self { config, repo, indexing, durability, embedder, mutations, search_service: search })
    }

    /// Replays the snapshot and WAL into the repository, then restores any
    /// indices whose persisted state says `built=true` (§4.8 bootstrap).
    pub fn bootstrap(&self) -> CoreResult<()> {
        self.durability.bootstrap(&self.repo)?;
        self.indexing.restore_all_indices(&self.repo)?;
        Ok(())
    }

    // ---- library ----

    pub fn create_library(&self, name: String, description: Option<String>) -> CoreResult<Library> {
        self.mutations.create_library(name, description)
    }

    pub fn get_library(&self, id: LibraryId) -> CoreResult<Library> {
        self.repo.get_library(id).ok_or_else(|| CoreError::not_found(format!("library {id}")))
    }

    pub fn list_libraries(&self) -> Vec<Library> {
        self.repo.list_libraries()
    }

    pub fn update_library(&self, id: LibraryId, patch: serde_json::Value) -> CoreResult<Library> {
        self.mutations.update_library(id, patch)
    }

    pub fn delete_library(&self, id: LibraryId) -> CoreResult<()> {
        self.mutations.delete_library(id)
    }

    // ---- document ----

    pub fn create_document(&self, library_id: LibraryId, title: String) -> CoreResult<Document> {
        self.mutations.create_document(library_id, title)
    }

    pub fn get_document(&self, id: crate::domain::DocumentId) -> CoreResult<Document> {
        self.repo.get_document(id).ok_or_else(|| CoreError::not_found(format!("document {id}")))
    }

    pub fn update_document(&self, library_id: LibraryId, id: crate::domain::DocumentId, patch: serde_json::Value) -> CoreResult<Document> {
        self.mutations.update_document(library_id, id, patch)
    }

    pub fn delete_document(&self, library_id: LibraryId, id: crate::domain::DocumentId) -> CoreResult<()> {
        self.mutations.delete_document(library_id, id)
    }

    // ---- chunk ----

    pub fn create_chunk(
        &self,
        library_id: LibraryId,
        document_id: crate::domain::DocumentId,
        text: String,
        compute_embedding: bool,
    ) -> CoreResult<Chunk> {
        self.mutations.create_chunk(library_id, document_id, text, compute_embedding)
    }

    pub fn get_chunk(&self, id: crate::domain::ChunkId) -> CoreResult<Chunk> {
        self.repo.get_chunk(id).ok_or_else(|| CoreError::not_found(format!("chunk {id}")))
    }

    pub fn update_chunk_text(&self, library_id: LibraryId, id: crate::domain::ChunkId, text: String) -> CoreResult<Chunk> {
        self.mutations.update_chunk_text(library_id, id, text)
    }

    pub fn delete_chunk(&self, library_id: LibraryId, id: crate::domain::ChunkId) -> CoreResult<()> {
        self.mutations.delete_chunk(library_id, id)
    }

    // ---- indexing ----

    #[allow(clippy::too_many_arguments)]
    pub fn build_index(&self, library_id: LibraryId, algo: IndexAlgo, metric: Metric, params: serde_json::Value) -> CoreResult<IndexState> {
        self.indexing.build(&self.repo, Some(&self.durability), library_id, algo, metric, params, true, true)
    }

    pub fn get_index_state(&self, library_id: LibraryId) -> CoreResult<IndexState> {
        Ok(self.get_library(library_id)?.index_state)
    }

    // ---- search ----

    pub fn search(&self, library_id: LibraryId, query: SearchQuery) -> CoreResult<Vec<Hit>> {
        self.search_service.search(library_id, query)
    }

    pub fn rerank(&self, library_id: LibraryId, query: RerankQuery) -> CoreResult<Vec<Hit>> {
        self.search_service.rerank(library_id, query)
    }

    // ---- admin ----

    pub fn snapshot(&self) -> CoreResult<u64> {
        self.durability.snapshot(&self.repo)
    }

    pub fn storage_stats(&self) -> StorageStats {
        self.durability.storage_stats()
    }
}
