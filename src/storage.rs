//! Ledger persistence: an append-only, index-addressed store of blocks.
//!
//! [`FileStore`] keeps one `block_<index>.json` per block in a data directory;
//! [`MemoryStore`] keeps them in a vector and is used by tests and tooling.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

use crate::model::{Action, Block};

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode block {index}: {source}")]
    Encode {
        index: u64,
        #[source]
        source: serde_json::Error,
    },
    /// The block's index is not the next free slot.
    #[error("append conflict: expected index {expected}, got {attempted}")]
    Conflict { expected: u64, attempted: u64 },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One slot of the log as read back for integrity checking. `block` is
/// `None` when the slot exists but its content does not decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub index: u64,
    pub block: Option<Block>,
}

/// Ordered, durable, append-only block storage.
///
/// `append` is a compare-and-append: it must refuse with
/// [`StoreError::Conflict`] unless `block.index` equals the next free slot.
/// Implementations never expose a partially written block to `scan`.
pub trait LedgerStore: Send + Sync {
    fn append(&self, block: &Block) -> StoreResult<()>;

    /// Every block, ordered by index.
    fn scan(&self) -> StoreResult<Vec<Block>>;

    /// Every slot as currently persisted, ordered by slot index. Unlike
    /// `scan`, this goes back to the underlying medium and reports slots
    /// that no longer decode instead of failing.
    fn audit(&self) -> StoreResult<Vec<Slot>> {
        Ok(self
            .scan()?
            .into_iter()
            .enumerate()
            .map(|(i, b)| Slot {
                index: i as u64,
                block: Some(b),
            })
            .collect())
    }

    fn last(&self) -> StoreResult<Option<Block>> {
        Ok(self.scan()?.pop())
    }

    fn find_by_file_hash(&self, file_hash: &str) -> StoreResult<Vec<Block>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|b| b.action != Action::Genesis && b.file_hash == file_hash)
            .collect())
    }

    fn find_by_uploader(&self, uploader_id: &str) -> StoreResult<Vec<Block>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|b| b.uploader_id.as_deref() == Some(uploader_id))
            .collect())
    }

    fn find_by_filename(&self, filename: &str) -> StoreResult<Vec<Block>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|b| b.action != Action::Genesis && b.filename == filename)
            .collect())
    }
}

/// Blocks held in memory only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blocks: RwLock<Vec<Block>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored block in place, bypassing the append-only contract.
    /// Exists so integrity checks can be exercised against a tampered ledger.
    pub fn tamper<F: FnOnce(&mut Block)>(&self, index: u64, f: F) -> bool {
        let mut guard = self.blocks.write();
        match guard.get_mut(index as usize) {
            Some(b) => {
                f(b);
                true
            }
            None => false,
        }
    }
}

impl LedgerStore for MemoryStore {
    fn append(&self, block: &Block) -> StoreResult<()> {
        let mut guard = self.blocks.write();
        let expected = guard.len() as u64;
        if block.index != expected {
            return Err(StoreError::Conflict {
                expected,
                attempted: block.index,
            });
        }
        guard.push(block.clone());
        Ok(())
    }

    fn scan(&self) -> StoreResult<Vec<Block>> {
        Ok(self.blocks.read().clone())
    }

    fn last(&self) -> StoreResult<Option<Block>> {
        Ok(self.blocks.read().last().cloned())
    }
}

/// Blocks loaded from disk, plus the next free slot.
#[derive(Debug, Default)]
struct Loaded {
    blocks: Vec<Block>,
    next: u64,
}

/// One pretty-printed JSON file per block under `dir`.
///
/// The directory is read once in [`FileStore::open`]; reads are then served
/// from memory. [`LedgerStore::audit`] always goes back to disk.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    loaded: RwLock<Loaded>,
}

/// Ensure that the given directory exists (create recursively if needed).
pub fn ensure_dir(dir: &Path) -> StoreResult<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    }
    Ok(())
}

impl FileStore {
    /// Create `dir` if needed and load every block file in it.
    ///
    /// A block file that does not decode is skipped with a warning but still
    /// occupies its slot, so new blocks never reuse its index.
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        let store = Self {
            dir,
            loaded: RwLock::new(Loaded::default()),
        };
        let slots = store.read_slots()?;
        let next = slots.last().map_or(0, |s| s.index + 1);
        let blocks: Vec<Block> = slots.into_iter().filter_map(|s| s.block).collect();
        if (blocks.len() as u64) < next {
            tracing::warn!(
                slots = next,
                readable = blocks.len(),
                "block directory has missing or unreadable slots"
            );
        }
        *store.loaded.write() = Loaded { blocks, next };
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// JSON filename for a block index.
    pub fn block_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("block_{index}.json"))
    }

    /// Unique per attempt; leftovers from a crash are never mistaken for blocks.
    fn staging_path(&self, index: u64) -> PathBuf {
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!(".block_{index}.{}-{seq}.tmp", std::process::id()))
    }

    fn parse_index(path: &Path) -> Option<u64> {
        path.file_name()?
            .to_str()?
            .strip_prefix("block_")?
            .strip_suffix(".json")?
            .parse()
            .ok()
    }

    fn decode(path: &Path, buf: &[u8]) -> Option<Block> {
        match serde_json::from_slice::<Block>(buf) {
            Ok(b) => Some(b),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "undecodable block file");
                None
            }
        }
    }

    /// Read every `block_<n>.json`, keyed by the `n` in its name.
    fn read_slots(&self) -> StoreResult<Vec<Slot>> {
        let mut found = BTreeMap::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))? {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let p = entry.path();
            let Some(index) = Self::parse_index(&p) else {
                continue;
            };
            let buf = fs::read(&p).map_err(|e| StoreError::io(&p, e))?;
            found.insert(index, Self::decode(&p, &buf));
        }
        Ok(found
            .into_iter()
            .map(|(index, block)| Slot { index, block })
            .collect())
    }

    /// Pick up blocks another writer published past our cached end.
    fn catch_up(&self, loaded: &mut Loaded) -> StoreResult<()> {
        loop {
            let p = self.block_path(loaded.next);
            match fs::read(&p) {
                Ok(buf) => {
                    if let Some(b) = Self::decode(&p, &buf) {
                        loaded.blocks.push(b);
                    }
                    loaded.next += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(StoreError::io(&p, e)),
            }
        }
    }

    fn write_staged(&self, staging: &Path, json: &[u8]) -> io::Result<()> {
        let mut f: File = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(staging)?;
        f.write_all(json)?;
        f.sync_all()
    }
}

impl LedgerStore for FileStore {
    /// Stage the block in a hidden file, fsync it, then publish it with a
    /// hard link, which fails if the slot is already taken.
    fn append(&self, block: &Block) -> StoreResult<()> {
        let mut loaded = self.loaded.write();
        if block.index != loaded.next {
            return Err(StoreError::Conflict {
                expected: loaded.next,
                attempted: block.index,
            });
        }
        let json = serde_json::to_vec_pretty(block).map_err(|source| StoreError::Encode {
            index: block.index,
            source,
        })?;

        let staging = self.staging_path(block.index);
        if let Err(e) = self.write_staged(&staging, &json) {
            let _ = fs::remove_file(&staging);
            return Err(StoreError::io(&staging, e));
        }

        let target = self.block_path(block.index);
        let published = fs::hard_link(&staging, &target);
        let _ = fs::remove_file(&staging);
        match published {
            Ok(()) => {
                loaded.blocks.push(block.clone());
                loaded.next += 1;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                self.catch_up(&mut loaded)?;
                Err(StoreError::Conflict {
                    expected: loaded.next,
                    attempted: block.index,
                })
            }
            Err(e) => Err(StoreError::io(&target, e)),
        }
    }

    fn scan(&self) -> StoreResult<Vec<Block>> {
        Ok(self.loaded.read().blocks.clone())
    }

    fn audit(&self) -> StoreResult<Vec<Slot>> {
        self.read_slots()
    }

    fn last(&self) -> StoreResult<Option<Block>> {
        Ok(self.loaded.read().blocks.last().cloned())
    }
}
