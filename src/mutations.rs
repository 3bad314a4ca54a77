//! Mutation services (§4.9): CRUD operations that validate referential
//! integrity, mutate the repository under the owning library's write lock,
//! invoke the embedder where applicable, and append exactly one WAL entry
//! per mutation inside that same critical section (§7, cascade deletes emit
//! one entry per child in bottom-up order).

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::domain::{Chunk, ChunkId, Document, DocumentId, Library, LibraryId};
use crate::durability::Durability;
use crate::embedder::Embedder;
use crate::error::{CoreError, CoreResult};
use crate::repository::{CascadeResult, Repository};
use crate::wal::WalEntry;

pub struct MutationService {
    repo: Arc<Repository>,
    durability: Arc<Durability>,
    embedder: Arc<dyn Embedder>,
}

impl MutationService {
    pub fn new(repo: Arc<Repository>, durability: Arc<Durability>, embedder: Arc<dyn Embedder>) -> Self {
        Self { repo, durability, embedder }
    }

    // ---- library ----

    pub fn create_library(&self, name: String, description: Option<String>) -> CoreResult<Library> {
        let library = Library::new(name, description);
        let lock = self.repo.get_lock(library.id);
        let _guard = lock.write();
        self.repo.insert_library(library.clone());
        self.append_or_rollback(library.id, WalEntry::LibraryCreate { ts: Utc::now(), data: library.clone() }, |repo| {
            repo.delete_library_cascade(library.id);
        })?;
        Ok(library)
    }

    pub fn update_library(&self, id: LibraryId, patch: Value) -> CoreResult<Library> {
        let lock = self.repo.get_lock(id);
        let _guard = lock.write();
        let before = self.repo.get_library(id).ok_or_else(|| CoreError::not_found(format!("library {id}")))?;
        let updated = self.repo.update_library(id, |lib| apply_patch(lib, &patch))?;
        self.append_or_rollback(id, WalEntry::LibraryUpdate { ts: Utc::now(), id, data: patch }, |repo| {
            let _ = repo.update_library(id, |lib| *lib = before.clone());
        })?;
        Ok(updated)
    }

    /// Idempotent: deleting a missing library is a no-op (no WAL entry). The
    /// whole cascade is rolled back in memory if any child's WAL append
    /// fails partway through, so the in-memory state never runs ahead of
    /// what the WAL holds (§7 behavior (a)).
    pub fn delete_library(&self, id: LibraryId) -> CoreResult<()> {
        let lock = self.repo.get_lock(id);
        let _guard = lock.write();
        let (removed, cascade) = self.repo.delete_library_cascade(id);
        let Some(library) = removed else {
            return Ok(());
        };
        let ts = Utc::now();
        for chunk in &cascade.chunks {
            if let Err(err) = self.durability.append(&WalEntry::ChunkDelete { ts, id: chunk.id }) {
                Self::rollback_library_cascade(&self.repo, &library, &cascade);
                return Err(err);
            }
        }
        for document in &cascade.documents {
            if let Err(err) = self.durability.append(&WalEntry::DocumentDelete { ts, id: document.id }) {
                Self::rollback_library_cascade(&self.repo, &library, &cascade);
                return Err(err);
            }
        }
        if let Err(err) = self.durability.append(&WalEntry::LibraryDelete { ts, id }) {
            Self::rollback_library_cascade(&self.repo, &library, &cascade);
            return Err(err);
        }
        Ok(())
    }

    /// Reinserts everything a library cascade removed, in dependency order
    /// (library, then documents, then chunks), undoing `delete_library_cascade`.
    fn rollback_library_cascade(repo: &Repository, library: &Library, cascade: &CascadeResult) {
        repo.insert_library(library.clone());
        for document in &cascade.documents {
            repo.insert_document(document.clone());
        }
        for chunk in &cascade.chunks {
            repo.insert_chunk(chunk.clone());
        }
    }

    // ---- document ----

    pub fn create_document(&self, library_id: LibraryId, title: String) -> CoreResult<Document> {
        self.repo.get_library(library_id).ok_or_else(|| CoreError::not_found(format!("library {library_id}")))?;
        let lock = self.repo.get_lock(library_id);
        let _guard = lock.write();
        let document = Document::new(library_id, title);
        self.repo.insert_document(document.clone());
        self.append_or_rollback(library_id, WalEntry::DocumentCreate { ts: Utc::now(), data: document.clone() }, |repo| {
            repo.delete_document_cascade(document.id);
        })?;
        Ok(document)
    }

    pub fn update_document(&self, library_id: LibraryId, id: DocumentId, patch: Value) -> CoreResult<Document> {
        let lock = self.repo.get_lock(library_id);
        let _guard = lock.write();
        let before = self.repo.get_document(id).ok_or_else(|| CoreError::not_found(format!("document {id}")))?;
        if before.library_id != library_id {
            return Err(CoreError::not_found(format!("document {id} in library {library_id}")));
        }
        let updated = self.repo.update_document(id, |doc| apply_patch(doc, &patch))?;
        self.append_or_rollback(library_id, WalEntry::DocumentUpdate { ts: Utc::now(), id, data: patch }, |repo| {
            let _ = repo.update_document(id, |doc| *doc = before.clone());
        })?;
        Ok(updated)
    }

    /// Idempotent: deleting a missing document is a no-op. Rolls the cascade
    /// back in memory if a child's WAL append fails partway through, same as
    /// `delete_library`.
    pub fn delete_document(&self, library_id: LibraryId, id: DocumentId) -> CoreResult<()> {
        let lock = self.repo.get_lock(library_id);
        let _guard = lock.write();
        let (removed, cascade) = self.repo.delete_document_cascade(id);
        let Some(document) = removed else {
            return Ok(());
        };
        let ts = Utc::now();
        for chunk in &cascade.chunks {
            if let Err(err) = self.durability.append(&WalEntry::ChunkDelete { ts, id: chunk.id }) {
                Self::rollback_document_cascade(&self.repo, &document, &cascade);
                return Err(err);
            }
        }
        if let Err(err) = self.durability.append(&WalEntry::DocumentDelete { ts, id }) {
            Self::rollback_document_cascade(&self.repo, &document, &cascade);
            return Err(err);
        }
        Ok(())
    }

    /// Reinserts everything a document cascade removed, in dependency order
    /// (document, then chunks), undoing `delete_document_cascade`.
    fn rollback_document_cascade(repo: &Repository, document: &Document, cascade: &CascadeResult) {
        repo.insert_document(document.clone());
        for chunk in &cascade.chunks {
            repo.insert_chunk(chunk.clone());
        }
    }

    // ---- chunk ----

    /// Creates a chunk, optionally computing its embedding via the
    /// embedder. Checks/sets the library's `embedding_dim` invariant.
    pub fn create_chunk(
        &self,
        library_id: LibraryId,
        document_id: DocumentId,
        text: String,
        compute_embedding: bool,
    ) -> CoreResult<Chunk> {
        let library = self.repo.get_library(library_id).ok_or_else(|| CoreError::not_found(format!("library {library_id}")))?;
        let document = self.repo.get_document(document_id).ok_or_else(|| CoreError::not_found(format!("document {document_id}")))?;
        if document.library_id != library_id {
            return Err(CoreError::not_found(format!("document {document_id} in library {library_id}")));
        }

        let lock = self.repo.get_lock(library_id);
        let _guard = lock.write();

        let mut chunk = Chunk::new(library_id, document_id, text);
        if compute_embedding {
            let embedding = self.embedder.embed(&chunk.text);
            if let Some(dim) = library.embedding_dim {
                if embedding.len() != dim {
                    return Err(CoreError::dimension_mismatch(dim, embedding.len()));
                }
            }
            chunk.embedding = Some(embedding);
        }

        self.repo.insert_chunk(chunk.clone());
        self.append_or_rollback(library_id, WalEntry::ChunkCreate { ts: Utc::now(), data: chunk.clone() }, |repo| {
            repo.delete_chunk(chunk.id);
        })?;
        Ok(chunk)
    }

    /// Updates a chunk's text (and/or metadata via the patch path). A text
    /// change recomputes the embedding so the index stays truthful on next
    /// rebuild (§4.9).
    pub fn update_chunk_text(&self, library_id: LibraryId, id: ChunkId, text: String) -> CoreResult<Chunk> {
        let library = self.repo.get_library(library_id).ok_or_else(|| CoreError::not_found(format!("library {library_id}")))?;
        let before = self.repo.get_chunk(id).ok_or_else(|| CoreError::not_found(format!("chunk {id}")))?;
        if before.library_id != library_id {
            return Err(CoreError::not_found(format!("chunk {id} in library {library_id}")));
        }

        let lock = self.repo.get_lock(library_id);
        let _guard = lock.write();

        let embedding = if before.embedding.is_some() { Some(self.embedder.embed(&text)) } else { None };
        if let (Some(dim), Some(e)) = (library.embedding_dim, &embedding) {
            if e.len() != dim {
                return Err(CoreError::dimension_mismatch(dim, e.len()));
            }
        }

        let updated = self.repo.update_chunk(id, |chunk| {
            chunk.text = text.clone();
            if let Some(e) = &embedding {
                chunk.embedding = Some(e.clone());
            }
        })?;

        self.append_or_rollback(
            library_id,
            WalEntry::ChunkUpdate { ts: Utc::now(), id, text: Some(updated.text.clone()), embedding: embedding.clone() },
            |repo| {
                let _ = repo.update_chunk(id, |chunk| *chunk = before.clone());
            },
        )?;
        Ok(updated)
    }

    /// Idempotent: deleting a missing chunk is a no-op.
    pub fn delete_chunk(&self, library_id: LibraryId, id: ChunkId) -> CoreResult<()> {
        let lock = self.repo.get_lock(library_id);
        let _guard = lock.write();
        let removed = self.repo.delete_chunk(id);
        if removed.is_none() {
            return Ok(());
        }
        self.durability.append(&WalEntry::ChunkDelete { ts: Utc::now(), id })?;
        Ok(())
    }

    /// Appends `entry` to the WAL inside the write-lock critical section
    /// the caller is already holding. If the append fails, `rollback` undoes
    /// the in-memory mutation before the error is propagated: the mutation
    /// is not considered committed unless its WAL line is fsynced (§7).
    fn append_or_rollback(&self, _library_id: LibraryId, entry: WalEntry, rollback: impl FnOnce(&Repository)) -> CoreResult<()> {
        if let Err(err) = self.durability.append(&entry) {
            rollback(&self.repo);
            return Err(err);
        }
        Ok(())
    }
}

fn apply_patch<T: serde::Serialize + serde::de::DeserializeOwned>(entity: &mut T, patch: &Value) {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::StubEmbedder;

    fn service() -> (MutationService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(Repository::new());
        let durability = Arc::new(Durability::open(dir.path()).unwrap());
        let embedder: Arc<dyn Embedder> = Arc::new(StubEmbedder::new(8));
        (MutationService::new(repo, durability, embedder), dir)
    }

    #[test]
    fn create_library_document_chunk_with_embedding() {
        let (svc, _dir) = service();
        let lib = svc.create_library("l".into(), None).unwrap();
        let doc = svc.create_document(lib.id, "d".into()).unwrap();
        let chunk = svc.create_chunk(lib.id, doc.id, "hello".into(), true).unwrap();
        assert!(chunk.embedding.is_some());
        assert_eq!(svc.repo.get_library(lib.id).unwrap().embedding_dim, Some(8));
    }

    #[test]
    fn chunk_under_foreign_document_is_not_found() {
        let (svc, _dir) = service();
        let lib_a = svc.create_library("a".into(), None).unwrap();
        let lib_b = svc.create_library("b".into(), None).unwrap();
        let doc_b = svc.create_document(lib_b.id, "d".into()).unwrap();
        let err = svc.create_chunk(lib_a.id, doc_b.id, "hello".into(), false).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn update_library_patch_applies_partial_fields() {
        let (svc, _dir) = service();
        let lib = svc.create_library("l".into(), Some("first".into())).unwrap();
        let updated = svc.update_library(lib.id, serde_json::json!({"description": "second"})).unwrap();
        assert_eq!(updated.description.as_deref(), Some("second"));
        assert_eq!(updated.name, "l");
    }

    #[test]
    fn update_chunk_text_recomputes_embedding() {
        let (svc, _dir) = service();
        let lib = svc.create_library("l".into(), None).unwrap();
        let doc = svc.create_document(lib.id, "d".into()).unwrap();
        let chunk = svc.create_chunk(lib.id, doc.id, "hello".into(), true).unwrap();
        let original_embedding = chunk.embedding.clone().unwrap();
        let updated = svc.update_chunk_text(lib.id, chunk.id, "goodbye".into()).unwrap();
        assert_ne!(updated.embedding.unwrap(), original_embedding);
    }

    #[test]
    fn cascade_delete_emits_bottom_up_and_is_idempotent() {
        let (svc, _dir) = service();
        let lib = svc.create_library("l".into(), None).unwrap();
        let doc = svc.create_document(lib.id, "d".into()).unwrap();
        let chunk = svc.create_chunk(lib.id, doc.id, "hello".into(), true).unwrap();

        svc.delete_library(lib.id).unwrap();
        assert!(svc.repo.get_document(doc.id).is_none());
        assert!(svc.repo.get_chunk(chunk.id).is_none());

        // Idempotent: deleting again is a no-op, not an error.
        svc.delete_library(lib.id).unwrap();
    }

    #[test]
    fn delete_missing_chunk_is_noop() {
        let (svc, _dir) = service();
        let lib = svc.create_library("l".into(), None).unwrap();
        svc.delete_chunk(lib.id, uuid::Uuid::new_v4()).unwrap();
    }

    /// Mirrors what `delete_library` does on a WAL append failure partway
    /// through the cascade: every entity the cascade already removed in
    /// memory must come back exactly as it was.
    #[test]
    fn library_cascade_rollback_restores_every_removed_entity() {
        let (svc, _dir) = service();
        let lib = svc.create_library("l".into(), None).unwrap();
        let doc = svc.create_document(lib.id, "d".into()).unwrap();
        let chunk = svc.create_chunk(lib.id, doc.id, "hello".into(), true).unwrap();

        let (removed, cascade) = svc.repo.delete_library_cascade(lib.id);
        let library = removed.unwrap();
        assert!(svc.repo.get_library(lib.id).is_none());

        MutationService::rollback_library_cascade(&svc.repo, &library, &cascade);

        assert_eq!(svc.repo.get_library(lib.id), Some(library));
        assert_eq!(svc.repo.get_document(doc.id), Some(doc.clone()));
        assert_eq!(svc.repo.get_chunk(chunk.id), Some(chunk.clone()));
        assert_eq!(svc.repo.list_documents(lib.id), vec![doc]);
        assert_eq!(svc.repo.list_chunks(doc.id), vec![chunk]);
    }

    /// Same as above, one level down: a document cascade rollback restores
    /// the document and its chunks without touching the owning library.
    #[test]
    fn document_cascade_rollback_restores_document_and_chunks() {
        let (svc, _dir) = service();
        let lib = svc.create_library("l".into(), None).unwrap();
        let doc = svc.create_document(lib.id, "d".into()).unwrap();
        let chunk = svc.create_chunk(lib.id, doc.id, "hello".into(), true).unwrap();

        let (removed, cascade) = svc.repo.delete_document_cascade(doc.id);
        let document = removed.unwrap();
        assert!(svc.repo.get_document(doc.id).is_none());

        MutationService::rollback_document_cascade(&svc.repo, &document, &cascade);

        assert_eq!(svc.repo.get_document(doc.id), Some(document));
        assert_eq!(svc.repo.get_chunk(chunk.id), Some(chunk.clone()));
        assert_eq!(svc.repo.list_chunks(doc.id), vec![chunk]);
    }
}
