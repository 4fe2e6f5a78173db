//! Global configuration constants for quiverdb.
//!
//! Tuning defaults, input validation limits and on-disk file names are defined
//! here. Runtime configuration lives in [`CollectionConfig`](crate::collection::CollectionConfig)
//! and [`CoordinatorConfig`](crate::coordinator::CoordinatorConfig).

/// Default number of bidirectional links per HNSW node.
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 8–64. Default: 16.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default ef parameter during HNSW index construction.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 100;

/// Default ef parameter during HNSW search.
///
/// Controls the size of the dynamic candidate list during query.
/// Higher values improve recall at the cost of latency.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 10;

/// Maximum number of layers in the HNSW graph.
pub const HNSW_DEFAULT_MAX_LAYERS: usize = 16;

/// Initial node capacity allocated by `init_index`.
pub const HNSW_INITIAL_CAPACITY: usize = 1_000;

/// Eligible-set size at or below which a filtered query scans the allowed ordinals
/// exhaustively instead of traversing the graph.
pub const BRUTE_FORCE_THRESHOLD: usize = 256;

/// Maximum allowed embedding dimension.
pub const MAX_DIMENSION: usize = 65_536;

/// Maximum length of a collection name in characters.
pub const MAX_COLLECTION_NAME_LEN: usize = 128;

/// Minimum length of a collection name in characters.
pub const MIN_COLLECTION_NAME_LEN: usize = 3;

/// Maximum number of records per add/update/upsert call.
pub const MAX_BATCH_SIZE: usize = 41_666;

/// Default directory for record store and index files.
pub const DEFAULT_DATA_DIR: &str = "./quiver_data";

/// Subdirectory of the data directory holding per-collection index artifacts.
pub const INDEX_DIR_NAME: &str = "index";

/// Subdirectory of the data directory holding the record store WAL and snapshot.
pub const STORE_DIR_NAME: &str = "store";

/// Persisted index artifacts, one set per collection directory.
pub const GRAPH_FILE: &str = "graph.bin";
pub const ORDINAL_TO_ID_FILE: &str = "ordinal_to_id.bin";
pub const ID_TO_ORDINAL_FILE: &str = "id_to_ordinal.bin";
pub const INDEX_META_FILE: &str = "index_meta.json";

/// Record store snapshot and write-ahead log file names.
pub const STORE_SNAPSHOT_FILE: &str = "records.snap";
pub const STORE_WAL_FILE: &str = "wal.bin";

/// Number of WAL entries after which the local record store checkpoints itself.
pub const STORE_CHECKPOINT_THRESHOLD: usize = 1_000;

/// Version written into the index metadata blob.
pub const INDEX_FORMAT_VERSION: u32 = 2;

/// Environment variables read by `CoordinatorConfig::from_env`.
pub const ENV_DATA_DIR: &str = "QUIVERDB_DATA_DIR";
pub const ENV_SEARCH_THREADS: &str = "QUIVERDB_SEARCH_THREADS";
pub const ENV_ALLOW_RESET: &str = "QUIVERDB_ALLOW_RESET";
