//! The query planner (§4.7): algorithm selection, metadata pre-filtering,
//! and final top-k ranking.

use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::{ChunkId, DocumentId, IndexAlgo, LibraryId};
use crate::embedder::Embedder;
use crate::error::{CoreError, CoreResult};
use crate::filtering::{self, Filters};
use crate::index::LiveIndex;
use crate::indexing::IndexingService;
use crate::metrics::{score, Metric};
use crate::repository::Repository;

/// A single scored result, ready to project onto the wire `SearchHit` DTO.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub library_id: LibraryId,
    pub score: f32,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgoChoice {
    Auto,
    Flat,
    Rp,
}

impl AlgoChoice {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(AlgoChoice::Auto),
            "flat" => Some(AlgoChoice::Flat),
            "rp" => Some(AlgoChoice::Rp),
            _ => None,
        }
    }
}

pub struct SearchQuery {
    pub query_text: Option<String>,
    pub query_embedding: Option<Vec<f32>>,
    pub k: usize,
    pub algo: AlgoChoice,
    pub metric: Metric,
    pub filters: Option<Filters>,
}

pub struct RerankQuery {
    pub query_text: Option<String>,
    pub query_embedding: Option<Vec<f32>>,
    pub candidate_ids: Vec<ChunkId>,
    pub k: usize,
    pub metric: Metric,
}

pub struct SearchService {
    repo: Arc<Repository>,
    indexing: Arc<IndexingService>,
    embedder: Arc<dyn Embedder>,
}

impl SearchService {
    pub fn new(repo: Arc<Repository>, indexing: Arc<IndexingService>, embedder: Arc<dyn Embedder>) -> Self {
        Self { repo, indexing, embedder }
    }

    /// Resolves the query vector (explicit embedding, else embed
    /// `query_text`) and enforces the library's dimension invariant.
    fn resolve_query_vector(&self, library_id: LibraryId, text: &Option<String>, embedding: &Option<Vec<f32>>) -> CoreResult<Vec<f32>> {
        let library = self
            .repo
            .get_library(library_id)
            .ok_or_else(|| CoreError::not_found(format!("library {library_id}")))?;

        let vector = match (embedding, text) {
            (Some(v), _) => v.clone(),
            (None, Some(t)) => self.embedder.embed(t),
            (None, None) => {
                return Err(CoreError::bad_request("exactly one of query_text or query_embedding must be supplied"))
            }
        };

        if let Some(dim) = library.embedding_dim {
            if vector.len() != dim {
                return Err(CoreError::dimension_mismatch(dim, vector.len()));
            }
        }
        Ok(vector)
    }

    /// Builds the allowed-id set from `filters`, or `None` to mean "all
    /// chunks pass" when no filters were supplied.
    fn allowed_ids(&self, library_id: LibraryId, filters: &Option<Filters>) -> CoreResult<Option<HashSet<ChunkId>>> {
        let Some(filters) = filters else { return Ok(None) };
        if filters.is_empty() {
            return Ok(None);
        }
        let library = self
            .repo
            .get_library(library_id)
            .ok_or_else(|| CoreError::not_found(format!("library {library_id}")))?;

        let mut allowed = HashSet::new();
        for document in self.repo.list_documents(library_id) {
            for chunk in self.repo.list_chunks(document.id) {
                if filtering::matches(filters, &chunk, &document, &library) {
                    allowed.insert(chunk.id);
                }
            }
        }
        Ok(Some(allowed))
    }

    fn select_index(&self, library_id: LibraryId, algo: AlgoChoice, metric: Metric) -> CoreResult<SelectedIndex> {
        match algo {
            AlgoChoice::Flat => match self.indexing.get_available_index(library_id, Some(IndexAlgo::Flat)) {
                Some(live) => Ok(SelectedIndex::Live(live)),
                None => Ok(SelectedIndex::EphemeralFlat(metric)),
            },
            AlgoChoice::Rp => match self.indexing.get_available_index(library_id, Some(IndexAlgo::Rp)) {
                Some(live) => Ok(SelectedIndex::Live(live)),
                None => Err(CoreError::bad_request("no RP index is built for this library")),
            },
            AlgoChoice::Auto => match self.indexing.get_available_index(library_id, None) {
                Some(live) => Ok(SelectedIndex::Live(live)),
                None => Ok(SelectedIndex::EphemeralFlat(metric)),
            },
        }
    }

    /// Executes the full planner under the library's read lock (§4.7).
    pub fn search(&self, library_id: LibraryId, query: SearchQuery) -> CoreResult<Vec<Hit>> {
        let lock = self.repo.get_lock(library_id);
        let _read_guard = lock.read();

        let q = self.resolve_query_vector(library_id, &query.query_text, &query.query_embedding)?;
        let allowed = self.allowed_ids(library_id, &query.filters)?;
        let selected = self.select_index(library_id, query.algo, query.metric)?;

        let scored: Vec<(ChunkId, f32)> = match selected {
            SelectedIndex::EphemeralFlat(metric) => {
                let index = IndexingService::build_ephemeral_flat(&self.repo, library_id, metric);
                match &allowed {
                    Some(ids) => index.query_filtered(&q, query.k, ids),
                    None => index.query(&q, query.k),
                }
            }
            SelectedIndex::Live(LiveIndex::Flat(flat)) => match &allowed {
                Some(ids) => flat.query_filtered(&q, query.k, ids),
                None => flat.query(&q, query.k),
            },
            SelectedIndex::Live(live @ LiveIndex::Rp(_)) => {
                // RP candidates need a larger pool than k when a filter will
                // drop some of them, so the post-filter top-k isn't starved.
                let fetch_k = match &allowed {
                    Some(_) => query.k.max(live.len()),
                    None => query.k,
                };
                let raw = live.query(&q, fetch_k);
                let filtered: Vec<(ChunkId, f32)> = match &allowed {
                    Some(ids) => raw.into_iter().filter(|(id, _)| ids.contains(id)).collect(),
                    None => raw,
                };
                filtered.into_iter().take(query.k).collect()
            }
        };

        self.project_hits(library_id, scored)
    }

    /// Scores exactly over a caller-supplied candidate set, ignoring
    /// filters and any index (§4.7 `rerank`).
    pub fn rerank(&self, library_id: LibraryId, query: RerankQuery) -> CoreResult<Vec<Hit>> {
        let lock = self.repo.get_lock(library_id);
        let _read_guard = lock.read();

        let q = self.resolve_query_vector(library_id, &query.query_text, &query.query_embedding)?;

        let mut scored: Vec<(usize, ChunkId, f32)> = query
            .candidate_ids
            .iter()
            .enumerate()
            .filter_map(|(i, id)| {
                self.repo.get_chunk(*id).and_then(|c| c.embedding.map(|e| (i, *id, score(query.metric, &q, &e))))
            })
            .collect();
        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        let top: Vec<(ChunkId, f32)> = scored.into_iter().take(query.k).map(|(_, id, s)| (id, s)).collect();

        self.project_hits(library_id, top)
    }

    fn project_hits(&self, library_id: LibraryId, scored: Vec<(ChunkId, f32)>) -> CoreResult<Vec<Hit>> {
        let mut hits = Vec::with_capacity(scored.len());
        for (chunk_id, s) in scored {
            if let Some(chunk) = self.repo.get_chunk(chunk_id) {
                hits.push(Hit {
                    chunk_id,
                    document_id: chunk.document_id,
                    library_id,
                    score: s,
                    text: chunk.text,
                });
            }
        }
        Ok(hits)
    }
}

enum SelectedIndex {
    Live(LiveIndex),
    EphemeralFlat(Metric),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Chunk, Document, Library};
    use crate::embedder::StubEmbedder;
    use std::collections::HashMap as StdHashMap;

    fn setup() -> (Arc<Repository>, Arc<IndexingService>, SearchService, LibraryId, DocumentId) {
        let repo = Arc::new(Repository::new());
        let indexing = Arc::new(IndexingService::new());
        let embedder: Arc<dyn Embedder> = Arc::new(StubEmbedder::new(4));
        let library = Library::new("l".into(), None);
        let lib_id = library.id;
        repo.insert_library(library);
        let document = Document::new(lib_id, "d".into());
        let doc_id = document.id;
        repo.insert_document(document);

        let service = SearchService::new(repo.clone(), indexing.clone(), embedder.clone());
        (repo, indexing, service, lib_id, doc_id)
    }

    fn insert_chunk(repo: &Repository, lib_id: LibraryId, doc_id: DocumentId, text: &str, embedder: &dyn Embedder, tags: Vec<String>) -> ChunkId {
        let mut chunk = Chunk::new(lib_id, doc_id, text.to_string());
        chunk.embedding = Some(embedder.embed(text));
        chunk.chunk_meta.tags = tags;
        let id = chunk.id;
        repo.insert_chunk(chunk);
        id
    }

    #[test]
    fn search_with_no_index_lazily_builds_flat() {
        let (repo, _indexing, service, lib_id, doc_id) = setup();
        let embedder = StubEmbedder::new(4);
        let hello = insert_chunk(&repo, lib_id, doc_id, "hello embeddings", &embedder, vec![]);
        insert_chunk(&repo, lib_id, doc_id, "goodbye", &embedder, vec![]);

        let hits = service
            .search(
                lib_id,
                SearchQuery {
                    query_text: Some("hello embeddings".into()),
                    query_embedding: None,
                    k: 1,
                    algo: AlgoChoice::Auto,
                    metric: Metric::Cosine,
                    filters: None,
                },
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, hello);
    }

    #[test]
    fn rp_algo_without_build_is_bad_request() {
        let (repo, _indexing, service, lib_id, doc_id) = setup();
        let embedder = StubEmbedder::new(4);
        insert_chunk(&repo, lib_id, doc_id, "x", &embedder, vec![]);
        let err = service
            .search(
                lib_id,
                SearchQuery {
                    query_text: Some("x".into()),
                    query_embedding: None,
                    k: 1,
                    algo: AlgoChoice::Rp,
                    metric: Metric::Cosine,
                    filters: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::BadRequest(_)));
    }

    #[test]
    fn dimension_mismatch_on_explicit_embedding() {
        let (repo, _indexing, service, lib_id, doc_id) = setup();
        let embedder = StubEmbedder::new(4);
        insert_chunk(&repo, lib_id, doc_id, "x", &embedder, vec![]);
        let err = service
            .search(
                lib_id,
                SearchQuery {
                    query_text: None,
                    query_embedding: Some(vec![0.0; 7]),
                    k: 1,
                    algo: AlgoChoice::Auto,
                    metric: Metric::Cosine,
                    filters: None,
                },
            )
            .unwrap_err();
        match err {
            CoreError::BadRequest(msg) => assert!(msg.contains("Embedding dimension mismatch")),
            other => panic!("expected BadRequest, got {other:?}"),
        }
    }

    #[test]
    fn filters_restrict_results_to_matching_tags() {
        let (repo, _indexing, service, lib_id, doc_id) = setup();
        let embedder = StubEmbedder::new(4);
        let ml = insert_chunk(&repo, lib_id, doc_id, "ml chunk", &embedder, vec!["ml".into(), "intro".into()]);
        insert_chunk(&repo, lib_id, doc_id, "finance chunk", &embedder, vec!["finance".into()]);

        let mut chunk_clause = StdHashMap::new();
        let mut ops = StdHashMap::new();
        ops.insert("any".to_string(), serde_json::json!(["ml"]));
        chunk_clause.insert("metadata.tags".to_string(), ops);
        let filters = Filters { chunk: Some(chunk_clause), document: None, library: None };

        let hits = service
            .search(
                lib_id,
                SearchQuery {
                    query_text: Some("ml".into()),
                    query_embedding: None,
                    k: 5,
                    algo: AlgoChoice::Auto,
                    metric: Metric::Cosine,
                    filters: Some(filters),
                },
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, ml);
    }

    #[test]
    fn rerank_ignores_index_and_filters() {
        let (repo, _indexing, service, lib_id, doc_id) = setup();
        let embedder = StubEmbedder::new(4);
        let a = insert_chunk(&repo, lib_id, doc_id, "alpha", &embedder, vec![]);
        let b = insert_chunk(&repo, lib_id, doc_id, "beta", &embedder, vec![]);

        let hits = service
            .rerank(
                lib_id,
                RerankQuery {
                    query_text: Some("alpha".into()),
                    query_embedding: None,
                    candidate_ids: vec![a, b],
                    k: 2,
                    metric: Metric::Cosine,
                },
            )
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, a);
    }
}
