//! # quiverdb-core
//!
//! Embeddable vector database engine: named collections of records
//! (id, embedding, optional document, optional metadata) with approximate
//! nearest neighbor search over an HNSW graph, filtered by Chroma-style
//! `where` / `where_document` predicates.
//!
//! The record store is the source of truth. Each collection's index is a
//! derived artifact that is persisted next to it and rebuilt from the store
//! whenever the two disagree.

/// Collection settings, catalog entries and name validation.
pub mod collection;
/// Global configuration constants: limits, defaults, and file names.
pub mod config;
/// The collection coordinator: every public collection operation.
pub mod coordinator;
/// Embedding adapters that turn query texts into vectors.
pub mod embedding;
pub mod error;
/// HNSW approximate nearest neighbor graph: structure, search, insertion, and distance metrics.
pub mod hnsw;
/// Per-collection vector index lifecycle and on-disk artifacts.
pub mod index;
/// `where` / `where_document` compilation and evaluation.
pub mod predicate;
pub mod record;
/// Open indexes keyed by collection id.
pub mod registry;
/// Record store trait and its durable local implementation.
pub mod store;

pub use collection::{CollectionConfig, CollectionInfo};
pub use coordinator::{
    CollectionStats, Coordinator, CoordinatorConfig, DeleteRequest, GetRequest, QueryHit,
    QueryRequest, RecordBatch,
};
pub use embedding::{EmbeddingAdapter, EmbeddingFunction, EmbeddingInput};
pub use error::{Error, Result};
pub use hnsw::Space;
pub use index::{IndexState, IndexStats, VectorIndex};
pub use predicate::Predicate;
pub use record::{Metadata, MetadataValue, Record};
pub use registry::IndexRegistry;
pub use store::{LocalRecordStore, RecordStore, Sort};
