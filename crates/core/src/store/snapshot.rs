//! Checksummed bincode snapshot files.
//!
//! Layout: `[bincode payload][magic "QRS1"][u32 CRC32 BE]`. Writes go to a temp
//! file that is renamed over the target.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;

const SNAPSHOT_CRC_MAGIC: &[u8; 4] = b"QRS1";

/// Serializes `value` to `path` atomically. Returns the payload size in bytes.
pub fn save<T: Serialize>(value: &T, path: &Path) -> io::Result<usize> {
    let bytes = bincode::serialize(value).map_err(|e| io::Error::other(e.to_string()))?;
    let crc = crc32fast::hash(&bytes);

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut output = Vec::with_capacity(bytes.len() + 8);
    output.extend_from_slice(&bytes);
    output.extend_from_slice(SNAPSHOT_CRC_MAGIC);
    output.extend_from_slice(&crc.to_be_bytes());

    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, &output)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(&tmp_path, path)?;

    tracing::debug!(
        path = %path.display(),
        bytes = bytes.len(),
        "snapshot written (CRC32={:#010x})",
        crc
    );
    Ok(bytes.len())
}

/// Reads a snapshot written by [`save`]. `Ok(None)` if the file does not exist.
pub fn load<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let invalid = |msg: String| io::Error::new(io::ErrorKind::InvalidData, msg);

    if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != SNAPSHOT_CRC_MAGIC {
        return Err(invalid(format!("{} is not a snapshot file", path.display())));
    }
    let payload = &raw[..raw.len() - 8];
    let stored_crc = u32::from_be_bytes([
        raw[raw.len() - 4],
        raw[raw.len() - 3],
        raw[raw.len() - 2],
        raw[raw.len() - 1],
    ]);
    let computed_crc = crc32fast::hash(payload);
    if computed_crc != stored_crc {
        return Err(invalid(format!(
            "snapshot CRC32 mismatch: expected {stored_crc:#010x}, got {computed_crc:#010x} in {}",
            path.display()
        )));
    }

    bincode::deserialize(payload)
        .map(Some)
        .map_err(|e| invalid(e.to_string()))
}
