//! Error types for quiverdb.
//!
//! Every fallible operation in the core returns [`Result`], whose error side is the
//! [`Error`] enum below. Validation errors name the offending field, operator or
//! count so callers can report them verbatim.

use std::io;
use thiserror::Error;
use uuid::Uuid;

/// All errors produced by the core library.
#[derive(Debug, Error)]
pub enum Error {
    /// Embedding length does not match the collection's established dimension.
    #[error("embedding dimension {got} does not match collection dimensionality {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A predicate used an operator the compiler does not know.
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    /// A predicate was structurally invalid or had an operand of the wrong type.
    #[error("malformed predicate: {0}")]
    MalformedPredicate(String),

    /// `update` referenced ids that are not in the record store.
    #[error("update references {missing} id(s) that do not exist")]
    NotFoundForUpdate { missing: usize },

    /// `add` referenced ids that already exist (or repeat within the batch).
    #[error("id '{0}' already exists")]
    DuplicateId(String),

    /// An in-place index update referenced an id that is not indexed.
    #[error("id '{0}' is not present in the vector index")]
    NotIndexed(String),

    /// The persisted index is missing or failed integrity checks.
    #[error("index artifacts absent or corrupt: {0}")]
    IndexAbsentOrCorrupt(String),

    /// Index and record store disagree about the live id set.
    #[error(
        "index holds {indexed} vectors at revision {index_revision} but store holds {stored} rows at revision {store_revision}"
    )]
    StoreIndexDivergence {
        indexed: usize,
        stored: usize,
        index_revision: u64,
        store_revision: u64,
    },

    /// Bad caller input that is not a predicate problem.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Collection configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("collection '{0}' already exists")]
    CollectionExists(String),

    /// Collection id was not registered in the record store.
    #[error("collection {0} is not registered")]
    UnknownCollectionId(Uuid),

    /// `reset` was called without `allow_reset`.
    #[error("reset is disabled; enable allow_reset to use it")]
    ResetDisabled,

    /// The embedding adapter failed or does not accept the input.
    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Error::MalformedPredicate(msg.into())
    }

    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Error::InvalidConfig(msg.into())
    }

    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        Error::IndexAbsentOrCorrupt(msg.into())
    }
}
