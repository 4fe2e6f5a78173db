//! On-disk artifacts of a [`VectorIndex`](super::VectorIndex).
//!
//! Each collection directory holds the bincode graph, the two bincode id maps and a
//! JSON metadata blob carrying the CRC32 of the other three. Payloads are written to
//! a temp file, fsynced and renamed into place; the metadata blob is removed first
//! and written last, after the directory itself is synced, so an interrupted
//! persist leaves the directory without a commit point and the next load treats it
//! as absent.

use crate::config;
use crate::error::{Error, Result};
use crate::hnsw::{HnswIndex, Space};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Persistable state of a vector index.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub graph: HnswIndex,
    pub ordinal_to_id: Vec<Option<String>>,
    pub id_to_ordinal: HashMap<String, u32>,
    pub created_at: DateTime<Utc>,
    pub store_revision: u64,
}

/// Contents of `index_meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub format_version: u32,
    pub dimension: usize,
    /// Live vectors at persist time.
    pub element_count: usize,
    pub created_at: DateTime<Utc>,
    pub persisted_at: DateTime<Utc>,
    pub space: Space,
    pub capacity: usize,
    /// Record store revision the persisted vectors reflect.
    pub store_revision: u64,
    pub graph_crc32: u32,
    pub ordinal_to_id_crc32: u32,
    pub id_to_ordinal_crc32: u32,
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let path = dir.join(name);
    let tmp_path = dir.join(format!("{name}.tmp"));
    let mut file = File::create(&tmp_path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Makes renames and removals inside `dir` durable.
fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Writes the snapshot into `dir`, creating it if needed.
pub fn persist(snapshot: &IndexSnapshot, dir: &Path) -> Result<IndexMeta> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot restrict index directory permissions");
        }
    }

    let meta_path = dir.join(config::INDEX_META_FILE);
    if meta_path.exists() {
        fs::remove_file(&meta_path)?;
    }

    let graph = bincode::serialize(&snapshot.graph)?;
    let ordinal_to_id = bincode::serialize(&snapshot.ordinal_to_id)?;
    let id_to_ordinal = bincode::serialize(&snapshot.id_to_ordinal)?;

    write_atomic(dir, config::GRAPH_FILE, &graph)?;
    write_atomic(dir, config::ORDINAL_TO_ID_FILE, &ordinal_to_id)?;
    write_atomic(dir, config::ID_TO_ORDINAL_FILE, &id_to_ordinal)?;
    sync_dir(dir)?;

    let meta = IndexMeta {
        format_version: config::INDEX_FORMAT_VERSION,
        dimension: snapshot.graph.dimension,
        element_count: snapshot.id_to_ordinal.len(),
        created_at: snapshot.created_at,
        persisted_at: Utc::now(),
        space: snapshot.graph.config.space,
        capacity: snapshot.graph.capacity,
        store_revision: snapshot.store_revision,
        graph_crc32: crc32fast::hash(&graph),
        ordinal_to_id_crc32: crc32fast::hash(&ordinal_to_id),
        id_to_ordinal_crc32: crc32fast::hash(&id_to_ordinal),
    };
    write_atomic(dir, config::INDEX_META_FILE, &serde_json::to_vec_pretty(&meta)?)?;
    sync_dir(dir)?;

    tracing::info!(
        dir = %dir.display(),
        elements = meta.element_count,
        graph_bytes = graph.len(),
        graph_crc32 = format_args!("{:#010x}", meta.graph_crc32),
        "persisted vector index"
    );
    Ok(meta)
}

fn read_checked(dir: &Path, name: &str, expected_crc: u32) -> Result<Vec<u8>> {
    let path = dir.join(name);
    let bytes = fs::read(&path).map_err(|e| Error::corrupt(format!("{}: {e}", path.display())))?;
    let computed = crc32fast::hash(&bytes);
    if computed != expected_crc {
        return Err(Error::corrupt(format!(
            "{} CRC32 mismatch: expected {expected_crc:#010x}, got {computed:#010x}",
            path.display()
        )));
    }
    Ok(bytes)
}

/// Reads and verifies the artifacts in `dir`.
///
/// Returns `Ok(None)` when no metadata blob exists. Any other missing file, CRC
/// mismatch, decode failure or inconsistency with the metadata is an
/// [`Error::IndexAbsentOrCorrupt`].
pub fn load(dir: &Path) -> Result<Option<(IndexMeta, IndexSnapshot)>> {
    let meta_path = dir.join(config::INDEX_META_FILE);
    let raw_meta = match fs::read(&meta_path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::corrupt(format!("{}: {e}", meta_path.display()))),
    };
    let meta: IndexMeta = serde_json::from_slice(&raw_meta)
        .map_err(|e| Error::corrupt(format!("{}: {e}", meta_path.display())))?;
    if meta.format_version != config::INDEX_FORMAT_VERSION {
        return Err(Error::corrupt(format!(
            "unsupported index format version {}",
            meta.format_version
        )));
    }

    let graph = read_checked(dir, config::GRAPH_FILE, meta.graph_crc32)?;
    let ordinal_to_id = read_checked(dir, config::ORDINAL_TO_ID_FILE, meta.ordinal_to_id_crc32)?;
    let id_to_ordinal = read_checked(dir, config::ID_TO_ORDINAL_FILE, meta.id_to_ordinal_crc32)?;

    let decode_err = |name: &str, e: bincode::Error| Error::corrupt(format!("{name}: {e}"));
    let snapshot = IndexSnapshot {
        graph: bincode::deserialize(&graph).map_err(|e| decode_err(config::GRAPH_FILE, e))?,
        ordinal_to_id: bincode::deserialize(&ordinal_to_id)
            .map_err(|e| decode_err(config::ORDINAL_TO_ID_FILE, e))?,
        id_to_ordinal: bincode::deserialize(&id_to_ordinal)
            .map_err(|e| decode_err(config::ID_TO_ORDINAL_FILE, e))?,
        created_at: meta.created_at,
        store_revision: meta.store_revision,
    };

    if snapshot.graph.dimension != meta.dimension
        || snapshot.id_to_ordinal.len() != meta.element_count
        || snapshot.graph.config.space != meta.space
    {
        return Err(Error::corrupt(
            "artifacts disagree with index metadata".to_string(),
        ));
    }

    tracing::info!(
        dir = %dir.display(),
        elements = meta.element_count,
        dimension = meta.dimension,
        "loaded vector index"
    );
    Ok(Some((meta, snapshot)))
}

/// Deletes a collection's artifact directory. Missing directories are fine.
pub fn remove(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
