//! An in-process vector database core: chunks of text with dense embedding
//! vectors organized into a two-level namespace (library → document →
//! chunk), answering k-nearest-neighbor queries with optional metadata
//! pre-filtering. Intended as the retrieval substrate behind a
//! semantic-search or RAG service.
//!
//! # Architecture
//!
//! - [`domain`] — the four entities (`Library`, `Document`, `Chunk`,
//!   `IndexState`) and their metadata shapes.
//! - [`repository`] — the typed entity store, secondary indices, and the
//!   per-library reader/writer lock that gives the core its concurrency
//!   guarantees.
//! - [`metrics`] — dot/cosine/L2 kernels and the unified "larger is better"
//!   score convention shared by every index and ranker.
//! - [`index`] — the flat (exact) and RP-forest (approximate) index
//!   implementations selectable per query.
//! - [`filtering`] — the structured metadata predicate evaluator.
//! - [`indexing`] — per-library index build, atomic swap, and bootstrap
//!   restore.
//! - [`search`] — the query planner: algorithm selection, pre-filtering,
//!   candidate retrieval, and rerank.
//! - [`mutations`] — CRUD services that mutate the repository and append
//!   exactly one WAL entry per mutation.
//! - [`wal`] and [`durability`] — the write-ahead log entry shapes and the
//!   append/snapshot/bootstrap-replay machinery built on top of them.
//! - [`embedder`] — the text→vector seam, plus a deterministic stub
//!   implementation for tests and demos.
//! - [`config`] — environment-driven settings (`DATA_DIR`,
//!   `VECTORDB_EMBEDDING_DIM`).
//! - [`context`] — [`context::AppContext`], the explicit, non-global handle
//!   tying the above together for a host application.
//! - [`dto`] — request/response contracts mirroring the HTTP surface
//!   collaborator's routes.
//!
//! # Out of scope
//!
//! The HTTP listener itself, the real embedding providers, the durable
//! workflow orchestrator, and operational wrappers (CLI, logging backend
//! selection) are external collaborators; this crate only implements the
//! interfaces they consume.
//!
//! # Example
//!
//! ```
//! use vectordb_core::config::Config;
//! use vectordb_core::context::AppContext;
//! use vectordb_core::domain::IndexAlgo;
//! use vectordb_core::metrics::Metric;
//! use vectordb_core::search::{AlgoChoice, SearchQuery};
//!
//! # fn main() -> Result<(), vectordb_core::error::CoreError> {
//! let dir = tempfile::tempdir().unwrap();
//! let ctx = AppContext::new(Config::with_data_dir(dir.path()))?;
//!
//! let library = ctx.create_library("docs".into(), None)?;
//! let document = ctx.create_document(library.id, "intro".into())?;
//! ctx.create_chunk(library.id, document.id, "hello embeddings".into(), true)?;
//! ctx.create_chunk(library.id, document.id, "goodbye".into(), true)?;
//! ctx.build_index(library.id, IndexAlgo::Flat, Metric::Cosine, serde_json::json!({}))?;
//!
//! let hits = ctx.search(
//!     library.id,
//!     SearchQuery {
//!         query_text: Some("hello embeddings".into()),
//!         query_embedding: None,
//!         k: 1,
//!         algo: AlgoChoice::Auto,
//!         metric: Metric::Cosine,
//!         filters: None,
//!     },
//! )?;
//! assert_eq!(hits.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod domain;
pub mod dto;
pub mod durability;
pub mod embedder;
pub mod error;
pub mod filtering;
pub mod index;
pub mod indexing;
pub mod metrics;
pub mod mutations;
pub mod repository;
pub mod search;
pub mod wal;

pub use context::AppContext;
pub use error::{CoreError, CoreResult};
