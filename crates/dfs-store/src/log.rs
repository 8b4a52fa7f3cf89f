use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use tracing::{debug, info, warn};

use crate::error::{poisoned, StoreError, StoreResult};
use crate::memory::apply_to;
use crate::traits::{MetaStore, StoreOp};

/// Flush/sync strategy for the log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// `fsync` after every batch.
    EveryWrite,
    /// Flush to the OS, let it decide when to hit the disk.
    #[default]
    OsDefault,
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub sync_mode: SyncMode,
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

struct LogWriter {
    writer: BufWriter<File>,
    offset: u64,
}

/// File-backed store: an append-only log of batches replayed into an
/// ordered in-memory index on open.
///
/// On-disk record format:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized Vec<StoreOp>)]
/// ```
/// A batch is one record, so it is recovered entirely or not at all. A torn
/// tail left by a crash is cut off when the log is reopened.
pub struct LogMetaStore {
    path: PathBuf,
    config: LogConfig,
    writer: Mutex<LogWriter>,
    index: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl LogMetaStore {
    /// Open (or create) the log at `path` and replay it.
    pub fn open(path: &Path, config: LogConfig) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (index, valid_end, records) = replay(path)?;
        let file_len = file.metadata()?.len();
        if valid_end < file_len {
            warn!(
                path = %path.display(),
                valid_end,
                file_len,
                "discarding torn log tail"
            );
            file.set_len(valid_end)?;
        }

        info!(path = %path.display(), records, keys = index.len(), "metadata log opened");
        Ok(Self {
            path: path.to_path_buf(),
            config,
            writer: Mutex::new(LogWriter { writer: BufWriter::new(file), offset: valid_end }),
            index: RwLock::new(index),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the log in bytes.
    pub fn offset(&self) -> StoreResult<u64> {
        Ok(self.writer.lock().map_err(poisoned)?.offset)
    }

    /// Rewrite the log so it holds exactly one record with the live entries.
    pub fn compact(&self) -> StoreResult<()> {
        let mut w = self.writer.lock().map_err(poisoned)?;
        let snapshot: Vec<StoreOp> = self
            .index
            .read()
            .map_err(poisoned)?
            .iter()
            .map(|(k, v)| StoreOp::put(k.clone(), v.clone()))
            .collect();

        let tmp = self.path.with_extension("compact");
        let written = {
            let mut out = BufWriter::new(File::create(&tmp)?);
            let n = if snapshot.is_empty() { 0 } else { write_record(&mut out, &snapshot)? };
            out.flush()?;
            out.get_ref().sync_all()?;
            n
        };
        fs::rename(&tmp, &self.path)?;

        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        w.writer = BufWriter::new(file);
        w.offset = written;
        debug!(keys = snapshot.len(), bytes = written, "metadata log compacted");
        Ok(())
    }
}

fn write_record<W: Write>(w: &mut W, ops: &[StoreOp]) -> StoreResult<u64> {
    let payload = bincode::serialize(ops).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len())
        .map_err(|_| StoreError::Serialization(format!("batch too large: {} bytes", payload.len())))?;
    let crc = crc32fast::hash(&payload);
    w.write_all(&length.to_le_bytes())?;
    w.write_all(&crc.to_le_bytes())?;
    w.write_all(&payload)?;
    Ok(HEADER_SIZE as u64 + payload.len() as u64)
}

/// Replay every valid record. Returns the rebuilt index, the offset just
/// past the last readable record, and how many records were applied.
fn replay(path: &Path) -> StoreResult<(BTreeMap<String, Vec<u8>>, u64, usize)> {
    let mut file = BufReader::new(File::open(path)?);
    let file_len = file.get_ref().metadata()?.len();
    let mut index = BTreeMap::new();
    let mut offset: u64 = 0;
    let mut records = 0;

    while offset + HEADER_SIZE as u64 <= file_len {
        let mut header = [0u8; HEADER_SIZE];
        match file.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
            warn!(offset, length, file_len, "invalid log record length; stopping replay");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        match file.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(offset, "truncated log record; stopping replay");
                break;
            }
            Err(e) => return Err(e.into()),
        }
        let next = offset + HEADER_SIZE as u64 + length as u64;

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            warn!(offset, expected = expected_crc, actual = actual_crc, "CRC mismatch; skipping record");
            offset = next;
            continue;
        }

        match bincode::deserialize::<Vec<StoreOp>>(&payload) {
            Ok(ops) => {
                apply_to(&mut index, &ops);
                records += 1;
            }
            Err(e) => warn!(offset, error = %e, "failed to decode log record; skipping"),
        }
        offset = next;
    }

    Ok((index, offset, records))
}

impl MetaStore for LogMetaStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.index.read().map_err(poisoned)?.get(key).cloned())
    }

    fn apply(&self, ops: &[StoreOp]) -> StoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut w = self.writer.lock().map_err(poisoned)?;
        let written = write_record(&mut w.writer, ops)?;
        w.writer.flush()?;
        if self.config.sync_mode == SyncMode::EveryWrite {
            w.writer.get_ref().sync_all()?;
        }
        w.offset += written;

        // Index updated under the writer lock so log order and index order agree.
        apply_to(&mut *self.index.write().map_err(poisoned)?, ops);
        debug!(ops = ops.len(), bytes = written, "metadata log append");
        Ok(())
    }

    fn scan(&self) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let map = self.index.read().map_err(poisoned)?;
        Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.index.read().map_err(poisoned)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};

    fn open(path: &Path) -> LogMetaStore {
        LogMetaStore::open(path, LogConfig::default()).unwrap()
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.log");
        {
            let store = open(&path);
            store.put("/", b"root").unwrap();
            store.put("/a", b"1").unwrap();
            store.put("/b", b"2").unwrap();
            assert!(store.delete("/b").unwrap());
        }
        let store = open(&path);
        assert_eq!(store.get("/a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("/b").unwrap(), None);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn torn_tail_is_discarded_and_appends_continue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.log");
        {
            let store = open(&path);
            store.put("/a", b"1").unwrap();
        }
        // Simulate a crash halfway through a header.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9, 0, 0]).unwrap();
        }
        {
            let store = open(&path);
            assert_eq!(store.len().unwrap(), 1);
            store.put("/b", b"2").unwrap();
        }
        let store = open(&path);
        assert_eq!(store.get("/b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn corrupt_record_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.log");
        {
            let store = open(&path);
            store.put("/a", b"1").unwrap();
            store.put("/b", b"2").unwrap();
        }
        {
            let mut f = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            f.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            let mut buf = [0u8; 1];
            f.read_exact(&mut buf).unwrap();
            buf[0] ^= 0xFF;
            f.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            f.write_all(&buf).unwrap();
        }
        let store = open(&path);
        assert_eq!(store.get("/a").unwrap(), None);
        assert_eq!(store.get("/b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn batch_is_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.log");
        let store = open(&path);
        store
            .apply(&[StoreOp::put("/x", vec![1]), StoreOp::put("/y", vec![2])])
            .unwrap();
        let (_, end, records) = replay(&path).unwrap();
        assert_eq!(records, 1);
        assert_eq!(end, store.offset().unwrap());
    }

    #[test]
    fn compact_shrinks_and_preserves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.log");
        let store = open(&path);
        for i in 0..20 {
            store.put("/churn", format!("{i}").as_bytes()).unwrap();
        }
        store.put("/keep", b"k").unwrap();
        let before = store.offset().unwrap();
        store.compact().unwrap();
        assert!(store.offset().unwrap() < before);

        store.put("/after", b"a").unwrap();
        drop(store);
        let store = open(&path);
        assert_eq!(store.get("/churn").unwrap(), Some(b"19".to_vec()));
        assert_eq!(store.get("/keep").unwrap(), Some(b"k".to_vec()));
        assert_eq!(store.get("/after").unwrap(), Some(b"a".to_vec()));
    }
}
