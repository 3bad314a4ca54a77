//! Typed entity store, secondary indices, and the per-library reader/writer
//! lock that gives the core its concurrency guarantees (§4.5, §5).
//!
//! Storage itself lives behind one internal [`Mutex`] (map mutation is O(1)
//! and always brief); the per-library [`LibraryLock`] is the semantic gate
//! services acquire to serialize writers and block writers against readers
//! *at the request level*, matching the "reads and writes in one library
//! never block another" contract without requiring a lock-per-shard
//! storage layout.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::ThreadId;

use serde_json::{json, Value};

use crate::domain::{Chunk, ChunkId, Document, DocumentId, IndexAlgo, IndexState, Library, LibraryId};
use crate::error::{CoreError, CoreResult};
use crate::wal::WalEntry;

const SCHEMA_VERSION: u64 = 1;

/// A hand-rolled reader/writer lock (std's `RwLock` isn't reentrant, and
/// nothing in the dependency stack provides one): readers block while a
/// writer from another thread holds it, and the holding thread may
/// re-acquire the write side any number of times (cascade deletes acquire
/// once and recurse internally rather than re-locking, but the reentrancy is
/// here as the contract in §4.5 requires it).
pub struct LibraryLock {
    state: Mutex<LockState>,
    cv: Condvar,
}

struct LockState {
    readers: usize,
    writer: Option<ThreadId>,
    writer_depth: usize,
}

impl LibraryLock {
    fn new() -> Self {
        Self {
            state: Mutex::new(LockState { readers: 0, writer: None, writer_depth: 0 }),
            cv: Condvar::new(),
        }
    }

    pub fn read(self: &Arc<Self>) -> ReadGuard {
        let me = std::thread::current().id();
        let mut st = self.state.lock().unwrap();
        loop {
            if st.writer.is_none() || st.writer == Some(me) {
                st.readers += 1;
                break;
            }
            st = self.cv.wait(st).unwrap();
        }
        ReadGuard { lock: self.clone() }
    }

    pub fn write(self: &Arc<Self>) -> WriteGuard {
        let me = std::thread::current().id();
        let mut st = self.state.lock().unwrap();
        loop {
            if st.writer == Some(me) {
                st.writer_depth += 1;
                break;
            }
            if st.writer.is_none() && st.readers == 0 {
                st.writer = Some(me);
                st.writer_depth = 1;
                break;
            }
            st = self.cv.wait(st).unwrap();
        }
        WriteGuard { lock: self.clone() }
    }
}

pub struct ReadGuard {
    lock: Arc<LibraryLock>,
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        let mut st = self.lock.state.lock().unwrap();
        st.readers -= 1;
        if st.readers == 0 {
            self.lock.cv.notify_all();
        }
    }
}

pub struct WriteGuard {
    lock: Arc<LibraryLock>,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        let mut st = self.lock.state.lock().unwrap();
        st.writer_depth -= 1;
        if st.writer_depth == 0 {
            st.writer = None;
            self.lock.cv.notify_all();
        }
    }
}

/// Lazily-created table of per-library locks, guarded by a small mutex.
/// Locks are never dropped: libraries are rare relative to query volume, and
/// holding on to an `Arc<LibraryLock>` forever is cheaper than lifetime
/// bookkeeping for a lock that might be deleted mid-use.
struct LibraryLocks {
    locks: Mutex<HashMap<LibraryId, Arc<LibraryLock>>>,
}

impl LibraryLocks {
    fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    fn get(&self, id: LibraryId) -> Arc<LibraryLock> {
        let mut map = self.locks.lock().unwrap();
        map.entry(id).or_insert_with(|| Arc::new(LibraryLock::new())).clone()
    }
}

#[derive(Default)]
struct RepoState {
    libraries: HashMap<LibraryId, Library>,
    documents: HashMap<DocumentId, Document>,
    chunks: HashMap<ChunkId, Chunk>,
    by_library_docs: HashMap<LibraryId, HashSet<DocumentId>>,
    by_document_chunks: HashMap<DocumentId, HashSet<ChunkId>>,
    /// Monotonic creation order, used to break tied scores deterministically
    /// and to order `embedded_pairs` reproducibly. Not part of the
    /// persisted image; rebuilt at hydrate time in ascending-id order.
    chunk_seq: HashMap<ChunkId, u64>,
    next_seq: u64,
}

/// What a cascade delete removed, bottom-up, so the caller can emit one WAL
/// entry per removed child in bottom-up order. Carries the full entities
/// (not just ids) so a caller whose WAL append fails partway through the
/// cascade can reinsert everything already removed and undo the cascade.
pub struct CascadeResult {
    pub chunks: Vec<Chunk>,
    pub documents: Vec<Document>,
}

pub struct Repository {
    state: Mutex<RepoState>,
    locks: LibraryLocks,
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository {
    pub fn new() -> Self {
        Self { state: Mutex::new(RepoState::default()), locks: LibraryLocks::new() }
    }

    pub fn get_lock(&self, library_id: LibraryId) -> Arc<LibraryLock> {
        self.locks.get(library_id)
    }

    fn lock(&self) -> MutexGuard<'_, RepoState> {
        self.state.lock().unwrap()
    }

    // ---- reads ----

    pub fn get_library(&self, id: LibraryId) -> Option<Library> {
        self.lock().libraries.get(&id).cloned()
    }

    pub fn list_libraries(&self) -> Vec<Library> {
        let st = self.lock();
        let mut libs: Vec<Library> = st.libraries.values().cloned().collect();
        libs.sort_by_key(|l| l.id);
        libs
    }

    pub fn get_document(&self, id: DocumentId) -> Option<Document> {
        self.lock().documents.get(&id).cloned()
    }

    pub fn list_documents(&self, library_id: LibraryId) -> Vec<Document> {
        let st = self.lock();
        let mut docs: Vec<Document> = st
            .by_library_docs
            .get(&library_id)
            .into_iter()
            .flatten()
            .filter_map(|id| st.documents.get(id).cloned())
            .collect();
        docs.sort_by_key(|d| d.id);
        docs
    }

    pub fn get_chunk(&self, id: ChunkId) -> Option<Chunk> {
        self.lock().chunks.get(&id).cloned()
    }

    pub fn list_chunks(&self, document_id: DocumentId) -> Vec<Chunk> {
        let st = self.lock();
        let mut chunks: Vec<Chunk> = st
            .by_document_chunks
            .get(&document_id)
            .into_iter()
            .flatten()
            .filter_map(|id| st.chunks.get(id).cloned())
            .collect();
        chunks.sort_by_key(|c| st.chunk_seq.get(&c.id).copied().unwrap_or(u64::MAX));
        chunks
    }

    pub fn list_chunks_in_library(&self, library_id: LibraryId) -> Vec<Chunk> {
        let st = self.lock();
        let mut chunks: Vec<Chunk> = st.chunks.values().filter(|c| c.library_id == library_id).cloned().collect();
        chunks.sort_by_key(|c| st.chunk_seq.get(&c.id).copied().unwrap_or(u64::MAX));
        chunks
    }

    /// `(chunk_id, embedding)` pairs for every embedded chunk in a library,
    /// ordered by creation sequence (insertion order for index tie-breaks).
    pub fn embedded_pairs(&self, library_id: LibraryId) -> Vec<(ChunkId, Vec<f32>)> {
        let st = self.lock();
        let mut pairs: Vec<(ChunkId, Vec<f32>, u64)> = st
            .chunks
            .values()
            .filter(|c| c.library_id == library_id)
            .filter_map(|c| c.embedding.clone().map(|e| (c.id, e, st.chunk_seq.get(&c.id).copied().unwrap_or(u64::MAX))))
            .collect();
        pairs.sort_by_key(|(_, _, seq)| *seq);
        pairs.into_iter().map(|(id, v, _)| (id, v)).collect()
    }

    // ---- writes: library ----

    pub fn insert_library(&self, library: Library) {
        let mut st = self.lock();
        st.by_library_docs.entry(library.id).or_default();
        st.libraries.insert(library.id, library);
    }

    pub fn update_library(&self, id: LibraryId, f: impl FnOnce(&mut Library)) -> CoreResult<Library> {
        let mut st = self.lock();
        let lib = st.libraries.get_mut(&id).ok_or_else(|| CoreError::not_found(format!("library {id}")))?;
        f(lib);
        Ok(lib.clone())
    }

    pub fn set_index_state(&self, library_id: LibraryId, algo: IndexAlgo, state: IndexState) -> CoreResult<()> {
        let mut st = self.lock();
        let lib = st
            .libraries
            .get_mut(&library_id)
            .ok_or_else(|| CoreError::not_found(format!("library {library_id}")))?;
        lib.index_state = state.clone();
        lib.index_states.insert(algo.as_str().to_string(), state);
        Ok(())
    }

    pub fn index_states_snapshot(&self, library_id: LibraryId) -> CoreResult<(IndexState, HashMap<String, IndexState>)> {
        let st = self.lock();
        let lib = st
            .libraries
            .get(&library_id)
            .ok_or_else(|| CoreError::not_found(format!("library {library_id}")))?;
        Ok((lib.index_state.clone(), lib.index_states.clone()))
    }

    /// Removes a library and everything under it, bottom-up. Returns the
    /// removed library (if it existed) plus the ids removed along the way,
    /// already in (chunks, documents) order for WAL emission.
    pub fn delete_library_cascade(&self, id: LibraryId) -> (Option<Library>, CascadeResult) {
        let mut st = self.lock();
        let document_ids: Vec<DocumentId> = st.by_library_docs.get(&id).map(|s| {
            let mut v: Vec<_> = s.iter().copied().collect();
            v.sort();
            v
        }).unwrap_or_default();

        let mut chunks = Vec::new();
        let mut documents = Vec::new();
        for doc_id in &document_ids {
            if let Some(set) = st.by_document_chunks.remove(doc_id) {
                let mut ids: Vec<_> = set.into_iter().collect();
                ids.sort_by_key(|id| st.chunk_seq.get(id).copied().unwrap_or(u64::MAX));
                for cid in &ids {
                    if let Some(chunk) = st.chunks.remove(cid) {
                        chunks.push(chunk);
                    }
                    st.chunk_seq.remove(cid);
                }
            }
            if let Some(doc) = st.documents.remove(doc_id) {
                documents.push(doc);
            }
        }
        st.by_library_docs.remove(&id);
        let removed = st.libraries.remove(&id);
        (removed, CascadeResult { chunks, documents })
    }

    // ---- writes: document ----

    pub fn insert_document(&self, document: Document) {
        let mut st = self.lock();
        st.by_library_docs.entry(document.library_id).or_default().insert(document.id);
        st.by_document_chunks.entry(document.id).or_default();
        st.documents.insert(document.id, document);
    }

    pub fn update_document(&self, id: DocumentId, f: impl FnOnce(&mut Document)) -> CoreResult<Document> {
        let mut st = self.lock();
        let doc = st.documents.get_mut(&id).ok_or_else(|| CoreError::not_found(format!("document {id}")))?;
        f(doc);
        Ok(doc.clone())
    }

    /// Removes a document and its chunks, bottom-up.
    pub fn delete_document_cascade(&self, id: DocumentId) -> (Option<Document>, CascadeResult) {
        let mut st = self.lock();
        let mut chunks = Vec::new();
        if let Some(set) = st.by_document_chunks.remove(&id) {
            let mut ids: Vec<_> = set.into_iter().collect();
            ids.sort_by_key(|cid| st.chunk_seq.get(cid).copied().unwrap_or(u64::MAX));
            for cid in &ids {
                if let Some(chunk) = st.chunks.remove(cid) {
                    chunks.push(chunk);
                }
                st.chunk_seq.remove(cid);
            }
        }
        let removed = st.documents.remove(&id);
        if let Some(doc) = &removed {
            if let Some(set) = st.by_library_docs.get_mut(&doc.library_id) {
                set.remove(&id);
            }
        }
        (removed, CascadeResult { chunks, documents: Vec::new() })
    }

    // ---- writes: chunk ----

    /// Inserts a chunk, fixing up secondary maps, `Document::chunk_ids`, the
    /// creation-order counter, and the owning library's `embedding_dim` if
    /// this chunk's embedding is the first one seen. Shared by the direct
    /// mutation path and WAL replay so both assign dimension/sequence
    /// identically.
    pub fn insert_chunk(&self, chunk: Chunk) {
        let mut st = self.lock();
        self.record_chunk(&mut st, chunk);
    }

    fn record_chunk(&self, st: &mut RepoState, chunk: Chunk) {
        let seq = st.next_seq;
        st.next_seq += 1;
        st.chunk_seq.insert(chunk.id, seq);
        st.by_document_chunks.entry(chunk.document_id).or_default().insert(chunk.id);
        if let Some(doc) = st.documents.get_mut(&chunk.document_id) {
            if !doc.chunk_ids.contains(&chunk.id) {
                doc.chunk_ids.push(chunk.id);
            }
        }
        if let (Some(embedding), Some(lib)) = (&chunk.embedding, st.libraries.get_mut(&chunk.library_id)) {
            if lib.embedding_dim.is_none() {
                lib.embedding_dim = Some(embedding.len());
            }
        }
        st.chunks.insert(chunk.id, chunk);
    }

    pub fn update_chunk(&self, id: ChunkId, f: impl FnOnce(&mut Chunk)) -> CoreResult<Chunk> {
        let mut st = self.lock();
        let chunk = st.chunks.get_mut(&id).ok_or_else(|| CoreError::not_found(format!("chunk {id}")))?;
        f(chunk);
        let updated = chunk.clone();
        if let (Some(embedding), Some(lib)) = (&updated.embedding, st.libraries.get_mut(&updated.library_id)) {
            if lib.embedding_dim.is_none() {
                lib.embedding_dim = Some(embedding.len());
            }
        }
        Ok(updated)
    }

    /// Idempotent: removing a missing chunk is a no-op and returns `None`.
    pub fn delete_chunk(&self, id: ChunkId) -> Option<Chunk> {
        let mut st = self.lock();
        let removed = st.chunks.remove(&id);
        if let Some(chunk) = &removed {
            st.chunk_seq.remove(&id);
            if let Some(set) = st.by_document_chunks.get_mut(&chunk.document_id) {
                set.remove(&id);
            }
            if let Some(doc) = st.documents.get_mut(&chunk.document_id) {
                doc.chunk_ids.retain(|cid| cid != &id);
            }
        }
        removed
    }

    // ---- serialization ----

    pub fn dump_json(&self) -> Value {
        let st = self.lock();
        let libraries: BTreeMap<LibraryId, &Library> = st.libraries.iter().map(|(k, v)| (*k, v)).collect();
        let documents: BTreeMap<DocumentId, &Document> = st.documents.iter().map(|(k, v)| (*k, v)).collect();
        let chunks: BTreeMap<ChunkId, &Chunk> = st.chunks.iter().map(|(k, v)| (*k, v)).collect();
        json!({
            "schema_version": SCHEMA_VERSION,
            "libraries": libraries,
            "documents": documents,
            "chunks": chunks,
        })
    }

    /// Clears all state and rebuilds entity + secondary maps from a
    /// snapshot image. Chunks are replayed in the order each owning
    /// document's `chunk_ids` lists them (documents visited in ascending-id
    /// order), not in the incidental order a `chunks` map happens to
    /// iterate in — `chunk_ids` is the only place the snapshot preserves
    /// creation order, and the creation-sequence counter built from it
    /// drives flat-index tie-breaks and RP-forest build order, so it must
    /// stay stable across a snapshot round-trip. Any chunk absent from its
    /// document's `chunk_ids` (not expected under the entity invariants) is
    /// appended last, sorted by id, so replay is still fully deterministic.
    pub fn hydrate(&self, image: &Value) -> CoreResult<()> {
        let libraries: BTreeMap<LibraryId, Library> = serde_json::from_value(
            image.get("libraries").cloned().unwrap_or(Value::Null),
        )?;
        let documents: BTreeMap<DocumentId, Document> = serde_json::from_value(
            image.get("documents").cloned().unwrap_or(Value::Null),
        )?;
        let mut chunks: BTreeMap<ChunkId, Chunk> = serde_json::from_value(
            image.get("chunks").cloned().unwrap_or(Value::Null),
        )?;

        let mut st = self.lock();
        *st = RepoState::default();
        for (id, lib) in libraries {
            st.by_library_docs.entry(id).or_default();
            st.libraries.insert(id, lib);
        }

        let mut ordered_ids: Vec<ChunkId> = Vec::with_capacity(chunks.len());
        let mut seen: HashSet<ChunkId> = HashSet::new();
        for (id, doc) in &documents {
            for chunk_id in &doc.chunk_ids {
                if chunks.contains_key(chunk_id) && seen.insert(*chunk_id) {
                    ordered_ids.push(*chunk_id);
                }
            }
            st.by_library_docs.entry(doc.library_id).or_default().insert(*id);
            st.by_document_chunks.entry(*id).or_default();
        }
        let mut leftover: Vec<ChunkId> = chunks.keys().filter(|id| !seen.contains(id)).copied().collect();
        leftover.sort();
        ordered_ids.extend(leftover);

        for (id, doc) in documents {
            st.documents.insert(id, doc);
        }
        for id in ordered_ids {
            if let Some(chunk) = chunks.remove(&id) {
                self.record_chunk(&mut st, chunk);
            }
        }
        Ok(())
    }

    /// Applies one WAL operation. Does not log; used by bootstrap replay and
    /// (for index-state entries) has no effect on entity state at all.
    pub fn apply_wal_entry(&self, entry: &WalEntry) -> CoreResult<()> {
        match entry {
            WalEntry::LibraryCreate { data, .. } => self.insert_library(data.clone()),
            WalEntry::LibraryUpdate { id, data, .. } => {
                self.update_library(*id, |lib| apply_patch_inplace(lib, data))?;
            }
            WalEntry::LibraryDelete { id, .. } => {
                self.delete_library_cascade(*id);
            }
            WalEntry::DocumentCreate { data, .. } => self.insert_document(data.clone()),
            WalEntry::DocumentUpdate { id, data, .. } => {
                self.update_document(*id, |doc| apply_patch_inplace(doc, data))?;
            }
            WalEntry::DocumentDelete { id, .. } => {
                self.delete_document_cascade(*id);
            }
            WalEntry::ChunkCreate { data, .. } => self.insert_chunk(data.clone()),
            WalEntry::ChunkUpdate { id, text, embedding, .. } => {
                self.update_chunk(*id, |chunk| {
                    if let Some(text) = text {
                        chunk.text = text.clone();
                    }
                    if let Some(embedding) = embedding {
                        chunk.embedding = Some(embedding.clone());
                    }
                })?;
            }
            WalEntry::ChunkDelete { id, .. } => {
                self.delete_chunk(*id);
            }
            WalEntry::LibraryIndexState { library_id, index_state, index_states, .. } => {
                let mut st = self.lock();
                if let Some(lib) = st.libraries.get_mut(library_id) {
                    lib.index_state = index_state.clone();
                    lib.index_states = index_states.clone();
                }
            }
            WalEntry::Unknown => {}
        }
        Ok(())
    }
}

/// Merge a JSON patch object into a serde-modeled entity in place: shallow
/// field overlay, then re-deserialize. Used for the `*.update` WAL payloads
/// and the mutation services' PATCH handlers alike.
fn apply_patch_inplace<T: serde::Serialize + serde::de::DeserializeOwned>(entity: &mut T, patch: &Value) {
    let mut base = serde_json::to_value(&entity).unwrap_or(Value::Null);
    if let (Some(base_obj), Some(patch_obj)) = (base.as_object_mut(), patch.as_object()) {
        for (k, v) in patch_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    if let Ok(updated) = serde_json::from_value(base) {
        *entity = updated;
    }
}
