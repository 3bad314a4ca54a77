//! Per-library index build, atomic swap, state tracking, and bootstrap
//! restore (§4.6).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::domain::{IndexAlgo, IndexState, LibraryId};
use crate::durability::Durability;
use crate::error::CoreResult;
use crate::index::{FlatIndex, LiveIndex, RpForest, RpParams};
use crate::metrics::Metric;
use crate::repository::Repository;
use crate::wal::WalEntry;

/// Caches the live flat and RP-forest index for every library that has
/// built one. Each cache entry is an `Arc` so a reader that obtained a
/// clone before a rebuild keeps scoring against the pre-rebuild instance
/// (§5 "index swap atomicity").
pub struct IndexingService {
    flat_indices: Mutex<HashMap<LibraryId, Arc<FlatIndex>>>,
    rp_indices: Mutex<HashMap<LibraryId, Arc<RpForest>>>,
}

impl Default for IndexingService {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexingService {
    pub fn new() -> Self {
        Self { flat_indices: Mutex::new(HashMap::new()), rp_indices: Mutex::new(HashMap::new()) }
    }

    /// Builds a fresh index of `algo` over every embedded chunk in
    /// `library_id`, atomically swapping it into the cache under the
    /// library's write lock. Optionally records `IndexState` and/or emits a
    /// `library.index_state` WAL entry.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        repo: &Repository,
        durability: Option<&Durability>,
        library_id: LibraryId,
        algo: IndexAlgo,
        metric: Metric,
        params: serde_json::Value,
        persist: bool,
        update_state: bool,
    ) -> CoreResult<IndexState> {
        let lock = repo.get_lock(library_id);
        let _write_guard = lock.write();

        let pairs = repo.embedded_pairs(library_id);
        let size = pairs.len();

        match algo {
            IndexAlgo::Flat => {
                let mut index = FlatIndex::new(metric);
                index.rebuild(pairs);
                self.flat_indices.lock().unwrap().insert(library_id, Arc::new(index));
            }
            IndexAlgo::Rp => {
                let rp_params: RpParams = serde_json::from_value(params.clone()).unwrap_or_default();
                log::info!(
                    "[index.build] library={} algo=rp trees={} leaf_size={} metric={:?} size={}",
                    library_id,
                    rp_params.trees,
                    rp_params.leaf_size,
                    metric,
                    size
                );
                let mut index = RpForest::new(metric, rp_params);
                index.rebuild(pairs);
                self.rp_indices.lock().unwrap().insert(library_id, Arc::new(index));
            }
        }

        let state = IndexState {
            built: true,
            algo: Some(algo),
            metric: Some(metric.as_str().to_string()),
            params: params.as_object().cloned().unwrap_or_default().into_iter().collect(),
            size,
            last_built_at: Some(Utc::now()),
        };

        if update_state {
            repo.set_index_state(library_id, algo, state.clone())?;
        }
        if persist {
            if let Some(durability) = durability {
                let (index_state, index_states) = repo.index_states_snapshot(library_id)?;
                durability.append(&WalEntry::LibraryIndexState {
                    ts: Utc::now(),
                    library_id,
                    index_state,
                    index_states,
                })?;
            }
        }

        log::info!("[index.build] library={} algo={} size={} complete", library_id, algo.as_str(), size);
        Ok(state)
    }

    /// Returns the live index for `library_id`. If `prefer` names an exact
    /// algorithm, only that kind is considered (`None` if it isn't built);
    /// otherwise RP is preferred over flat.
    pub fn get_available_index(&self, library_id: LibraryId, prefer: Option<IndexAlgo>) -> Option<LiveIndex> {
        match prefer {
            Some(IndexAlgo::Flat) => self.flat_indices.lock().unwrap().get(&library_id).cloned().map(LiveIndex::Flat),
            Some(IndexAlgo::Rp) => self.rp_indices.lock().unwrap().get(&library_id).cloned().map(LiveIndex::Rp),
            None => {
                if let Some(rp) = self.rp_indices.lock().unwrap().get(&library_id).cloned() {
                    return Some(LiveIndex::Rp(rp));
                }
                self.flat_indices.lock().unwrap().get(&library_id).cloned().map(LiveIndex::Flat)
            }
        }
    }

    /// Ephemeral flat-index build used by the search planner when no flat
    /// index has been persisted: scores candidates directly without
    /// touching the cache or emitting a WAL entry.
    pub fn build_ephemeral_flat(repo: &Repository, library_id: LibraryId, metric: Metric) -> FlatIndex {
        let pairs = repo.embedded_pairs(library_id);
        let mut index = FlatIndex::new(metric);
        index.rebuild(pairs);
        index
    }

    /// At bootstrap, rebuilds any index whose persisted `IndexState` says
    /// `built=true`, for every library in the repository. Does not log
    /// further WAL entries (the state being restored is already durable).
    pub fn restore_all_indices(&self, repo: &Repository) -> CoreResult<usize> {
        let mut restored = 0;
        for library in repo.list_libraries() {
            for (algo_tag, state) in &library.index_states {
                if !state.built {
                    continue;
                }
                let Some(algo) = IndexAlgo::parse(algo_tag) else { continue };
                let Some(metric) = state.metric.as_deref().and_then(Metric::parse) else { continue };
                let params = serde_json::to_value(&state.params).unwrap_or_default();
                self.build(repo, None, library.id, algo, metric, params, false, false)?;
                restored += 1;
            }
        }
        log::info!("[index.restore] {} indices restored at bootstrap", restored);
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Chunk, Document, Library};

    fn seeded_repo() -> (Repository, LibraryId) {
        let repo = Repository::new();
        let lib = Library::new("l".into(), None);
        let lib_id = lib.id;
        repo.insert_library(lib);
        let doc = Document::new(lib_id, "d".into());
        repo.insert_document(doc.clone());
        for i in 0..10 {
            let mut chunk = Chunk::new(lib_id, doc.id, format!("chunk {i}"));
            chunk.embedding = Some(vec![i as f32, 0.0]);
            repo.insert_chunk(chunk);
        }
        (repo, lib_id)
    }

    #[test]
    fn build_flat_then_query_through_cache() {
        let (repo, lib_id) = seeded_repo();
        let service = IndexingService::new();
        service
            .build(&repo, None, lib_id, IndexAlgo::Flat, Metric::L2, serde_json::json!({}), true, true)
            .unwrap();
        let live = service.get_available_index(lib_id, None).unwrap();
        assert_eq!(live.len(), 10);
        let hits = live.query(&[0.0, 0.0], 3);
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn rp_preferred_over_flat_when_both_built() {
        let (repo, lib_id) = seeded_repo();
        let service = IndexingService::new();
        service
            .build(&repo, None, lib_id, IndexAlgo::Flat, Metric::L2, serde_json::json!({}), true, true)
            .unwrap();
        service
            .build(
                &repo,
                None,
                lib_id,
                IndexAlgo::Rp,
                Metric::L2,
                serde_json::json!({"trees": 3, "leaf_size": 4, "seed": 1, "candidate_mult": 1.0}),
                true,
                true,
            )
            .unwrap();
        let live = service.get_available_index(lib_id, None).unwrap();
        assert!(matches!(live, LiveIndex::Rp(_)));
    }

    #[test]
    fn restore_all_indices_rebuilds_from_state() {
        let (repo, lib_id) = seeded_repo();
        let service = IndexingService::new();
        service
            .build(&repo, None, lib_id, IndexAlgo::Flat, Metric::Cosine, serde_json::json!({}), true, true)
            .unwrap();

        let fresh_service = IndexingService::new();
        assert!(fresh_service.get_available_index(lib_id, None).is_none());
        let restored = fresh_service.restore_all_indices(&repo).unwrap();
        assert_eq!(restored, 1);
        assert!(fresh_service.get_available_index(lib_id, Some(IndexAlgo::Flat)).is_some());
    }
}
