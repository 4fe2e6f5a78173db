//! Synchronous write-ahead log for the local record store.
//!
//! Every store mutation is appended here before it is applied in memory. Each
//! entry is framed as `[u32 length BE][u32 CRC32 BE][bincode payload]` and flushed
//! with `fsync`. Replay stops at the first truncated or CRC-mismatched frame, so a
//! failed append cuts the file back to its last complete frame before returning.

use crate::collection::CollectionInfo;
use crate::record::{Record, RecordPatch};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// One logged store mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntry {
    CreateCollection {
        info: CollectionInfo,
    },
    DeleteCollection {
        id: Uuid,
    },
    SetDimension {
        id: Uuid,
        dimension: usize,
    },
    Insert {
        collection_id: Uuid,
        records: Vec<Record>,
    },
    Update {
        collection_id: Uuid,
        ids: Vec<String>,
        patches: Vec<RecordPatch>,
    },
    Delete {
        collection_id: Uuid,
        ids: Vec<String>,
    },
    Reset,
}

/// A logged entry with its log sequence number. Sequence numbers increase by one
/// per entry; snapshots remember the last one they contain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub lsn: u64,
    pub entry: WalEntry,
}

/// Diagnostic statistics from a WAL replay.
#[derive(Debug, Default)]
pub struct ReplayStats {
    pub success: usize,
    /// Entries whose CRC was valid but whose payload failed to decode.
    pub skipped: usize,
    pub crc_errors: usize,
    /// Whether replay ended on a partially written frame.
    pub truncated: bool,
}

/// Append-only log file.
pub struct WriteAheadLog {
    writer: Mutex<File>,
    /// freeze() takes it exclusively, append() shared.
    write_gate: parking_lot::RwLock<()>,
    /// Set when a partial frame could not be cut off. Cleared by truncate().
    poisoned: AtomicBool,
    path: PathBuf,
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("path", &self.path)
            .finish()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

impl WriteAheadLog {
    /// Opens or creates `file_name` inside `dir`.
    pub fn open(dir: &Path, file_name: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        let file = open_append(&path)?;
        Ok(Self {
            writer: Mutex::new(file),
            write_gate: parking_lot::RwLock::new(()),
            poisoned: AtomicBool::new(false),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry and fsyncs before returning.
    ///
    /// On failure the file is cut back to its length before the call, so entries
    /// appended later are still reachable by replay.
    pub fn append(&self, record: &LogRecord) -> io::Result<()> {
        let framed = serialize_and_frame(record)?;
        let _gate = self.write_gate.read();
        let mut file = self.writer.lock();
        if self.poisoned.load(Ordering::Acquire) {
            return Err(io::Error::other(format!(
                "{} holds a partial entry; checkpoint before appending",
                self.path.display()
            )));
        }
        let committed = file.metadata()?.len();
        let Err(e) = file.write_all(&framed).and_then(|()| file.sync_all()) else {
            return Ok(());
        };
        if let Err(cut) = discard_tail(&file, committed) {
            tracing::error!(
                path = %self.path.display(),
                committed,
                error = %cut,
                "cannot remove partial WAL entry, refusing further appends"
            );
            self.poisoned.store(true, Ordering::Release);
        }
        Err(e)
    }

    /// Reads every intact entry from the start of the log.
    pub fn replay(&self) -> io::Result<(Vec<LogRecord>, ReplayStats)> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut stats = ReplayStats::default();
        let mut header = [0u8; 8];

        loop {
            match reader.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let stored_crc = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
            let mut data = vec![0u8; len];
            match reader.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    tracing::warn!(path = %self.path.display(), "WAL truncated mid-entry, stopping replay");
                    stats.truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            }
            if crc32fast::hash(&data) != stored_crc {
                tracing::warn!(path = %self.path.display(), "WAL entry CRC mismatch, stopping replay");
                stats.crc_errors += 1;
                break;
            }
            match bincode::deserialize::<LogRecord>(&data) {
                Ok(entry) => {
                    entries.push(entry);
                    stats.success += 1;
                }
                Err(e) => {
                    tracing::warn!("WAL entry deserialization failed, skipping: {}", e);
                    stats.skipped += 1;
                }
            }
        }

        Ok((entries, stats))
    }

    /// Blocks appends while the guard is held. Hold it across snapshot + truncate.
    pub fn freeze(&self) -> parking_lot::RwLockWriteGuard<'_, ()> {
        self.write_gate.write()
    }

    /// Empties the log and reopens it for appending.
    pub fn truncate(&self) -> io::Result<()> {
        let mut writer = self.writer.lock();
        let truncated = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        truncated.sync_all()?;
        *writer = open_append(&self.path)?;
        self.poisoned.store(false, Ordering::Release);
        Ok(())
    }
}

/// Cuts `file` back to `len` bytes.
fn discard_tail(file: &File, len: u64) -> io::Result<()> {
    file.set_len(len)?;
    file.sync_all()
}

fn serialize_and_frame(record: &LogRecord) -> io::Result<Vec<u8>> {
    let bytes = bincode::serialize(record).map_err(|e| io::Error::other(e.to_string()))?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "WAL entry exceeds 4 GiB"))?;
    let crc = crc32fast::hash(&bytes);

    let mut framed = Vec::with_capacity(8 + bytes.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&crc.to_be_bytes());
    framed.extend_from_slice(&bytes);
    Ok(framed)
}
