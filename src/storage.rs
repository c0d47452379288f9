//! Storage backend abstraction.
//!
//! The engine consumes an ordered byte-keyed store through a small
//! capability surface: read-only snapshots with prefix iteration
//! (`view`), serializable read-modify-write transactions (`update`), and
//! per-entry TTL. Two implementations are bundled: a purely in-memory
//! backend and a durable one that appends every committed transaction to
//! a log.
//!
//! Both backends serialize writers by holding the tree's write lock for
//! the whole transaction, so concurrent `update`s over overlapping key
//! ranges cannot both commit a conflicting decision: whichever enters
//! first is observed by the other.

use crate::config::SyncMode;
use crate::error::Result;
use crate::persistence::{AofFile, LogCommand};
use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::{Duration, SystemTime};

/// A stored item: value bytes plus optional absolute expiry.
#[derive(Debug, Clone)]
pub struct DbItem {
    pub value: Bytes,
    pub expires_at: Option<SystemTime>,
}

impl DbItem {
    /// Check if this item has expired at a specific time.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }
}

/// Operation buffered inside a write transaction.
#[derive(Debug, Clone)]
pub enum StorageOp {
    /// Put a key-value pair.
    Put { key: Bytes, item: DbItem },
    /// Delete a key.
    Delete { key: Bytes },
}

/// Ordered key-value store consumed by the filter engine.
pub trait Backend: Send + Sync {
    /// Open a read-only snapshot.
    fn view(&self) -> Result<Box<dyn ReadTxn + '_>>;

    /// Open a serializable read-write transaction.
    ///
    /// Dropping the returned transaction without calling `commit` aborts
    /// it and discards all buffered writes.
    fn update(&self) -> Result<Box<dyn WriteTxn + '_>>;

    /// Drop every entry whose TTL has lapsed at `now`. Returns the number
    /// of entries removed.
    fn cleanup_expired(&self, now: SystemTime) -> Result<usize>;
}

/// Read surface shared by snapshots and write transactions.
pub trait ReadTxn {
    /// Iterate keys starting with `prefix`, in ascending byte order,
    /// beginning at `seek` (inclusive). Entries whose TTL has lapsed are
    /// skipped. Yielded keys are owned copies; they stay valid after the
    /// iterator advances.
    fn scan(&self, prefix: &[u8], seek: &[u8]) -> Box<dyn Iterator<Item = Bytes> + '_>;
}

/// A read-write transaction. Writes are buffered and applied atomically
/// at `commit`; `scan` observes the transaction's own buffered writes.
pub trait WriteTxn: ReadTxn {
    /// Buffer a write with an optional TTL relative to the transaction's
    /// open time.
    fn put(&mut self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Buffer a tombstone.
    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// Atomically apply all buffered operations.
    fn commit(self: Box<Self>) -> Result<()>;
}

type Tree = BTreeMap<Bytes, DbItem>;

/// In-memory storage backend using an ordered map.
#[derive(Default)]
pub struct MemoryBackend {
    tree: RwLock<Tree>,
}

impl MemoryBackend {
    /// Create a new in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn view(&self) -> Result<Box<dyn ReadTxn + '_>> {
        Ok(Box::new(TreeView {
            tree: self.tree.read(),
            now: SystemTime::now(),
        }))
    }

    fn update(&self) -> Result<Box<dyn WriteTxn + '_>> {
        Ok(Box::new(TreeTxn {
            tree: self.tree.write(),
            pending: Vec::new(),
            now: SystemTime::now(),
            log: None,
        }))
    }

    fn cleanup_expired(&self, now: SystemTime) -> Result<usize> {
        let mut tree = self.tree.write();
        let before = tree.len();
        tree.retain(|_, item| !item.is_expired_at(now));
        Ok(before - tree.len())
    }
}

/// Durable storage backend: the in-memory tree plus an append-only log
/// replayed on open.
pub struct AofBackend {
    tree: RwLock<Tree>,
    aof: Mutex<AofFile>,
    sync_mode: SyncMode,
}

impl AofBackend {
    /// Open (or create) a durable backend whose log lives at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_sync(path, SyncMode::default())
    }

    /// Open with an explicit sync strategy.
    pub fn open_with_sync<P: AsRef<Path>>(path: P, sync_mode: SyncMode) -> Result<Self> {
        let mut aof = AofFile::open(path)?;
        let now = SystemTime::now();

        let mut tree = Tree::new();
        for command in aof.replay()? {
            match command {
                LogCommand::Set {
                    key,
                    value,
                    expires_at,
                } => {
                    let item = DbItem { value, expires_at };
                    if item.is_expired_at(now) {
                        tree.remove(&key);
                    } else {
                        tree.insert(key, item);
                    }
                }
                LogCommand::Delete { key } => {
                    tree.remove(&key);
                }
            }
        }

        Ok(Self {
            tree: RwLock::new(tree),
            aof: Mutex::new(aof),
            sync_mode,
        })
    }
}

impl Backend for AofBackend {
    fn view(&self) -> Result<Box<dyn ReadTxn + '_>> {
        Ok(Box::new(TreeView {
            tree: self.tree.read(),
            now: SystemTime::now(),
        }))
    }

    fn update(&self) -> Result<Box<dyn WriteTxn + '_>> {
        // Tree lock first, then the log; commit relies on this order.
        let tree = self.tree.write();
        let aof = self.aof.lock();
        Ok(Box::new(TreeTxn {
            tree,
            pending: Vec::new(),
            now: SystemTime::now(),
            log: Some((aof, self.sync_mode)),
        }))
    }

    fn cleanup_expired(&self, now: SystemTime) -> Result<usize> {
        let mut tree = self.tree.write();
        let mut aof = self.aof.lock();

        let expired: Vec<Bytes> = tree
            .iter()
            .filter(|(_, item)| item.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            aof.write_delete(key)?;
        }
        if !expired.is_empty() {
            aof.sync_with_mode(self.sync_mode)?;
        }
        for key in &expired {
            tree.remove(key);
        }
        Ok(expired.len())
    }
}

/// Read-only snapshot over the tree's read lock.
struct TreeView<'a> {
    tree: RwLockReadGuard<'a, Tree>,
    now: SystemTime,
}

impl ReadTxn for TreeView<'_> {
    fn scan(&self, prefix: &[u8], seek: &[u8]) -> Box<dyn Iterator<Item = Bytes> + '_> {
        scan_live(&self.tree, prefix, seek, self.now)
    }
}

/// Write transaction: exclusive tree access, buffered operations, and an
/// optional log appended at commit.
struct TreeTxn<'a> {
    tree: RwLockWriteGuard<'a, Tree>,
    pending: Vec<StorageOp>,
    now: SystemTime,
    log: Option<(MutexGuard<'a, AofFile>, SyncMode)>,
}

impl ReadTxn for TreeTxn<'_> {
    fn scan(&self, prefix: &[u8], seek: &[u8]) -> Box<dyn Iterator<Item = Bytes> + '_> {
        // Overlay buffered operations so the transaction reads its own
        // writes.
        let mut keys: BTreeSet<Bytes> = scan_live(&self.tree, prefix, seek, self.now).collect();

        let start: &[u8] = if seek < prefix { prefix } else { seek };
        for op in &self.pending {
            match op {
                StorageOp::Put { key, item } => {
                    if key.starts_with(prefix)
                        && key.as_ref() >= start
                        && !item.is_expired_at(self.now)
                    {
                        keys.insert(key.clone());
                    }
                }
                StorageOp::Delete { key } => {
                    keys.remove(key);
                }
            }
        }

        Box::new(keys.into_iter())
    }
}

impl WriteTxn for TreeTxn<'_> {
    fn put(&mut self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let item = DbItem {
            value: Bytes::copy_from_slice(value),
            expires_at: ttl.map(|ttl| self.now + ttl),
        };
        self.pending.push(StorageOp::Put {
            key: Bytes::copy_from_slice(key),
            item,
        });
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.pending.push(StorageOp::Delete {
            key: Bytes::copy_from_slice(key),
        });
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        // Log first for durability, then apply in memory. Failing the log
        // write leaves the tree untouched.
        if let Some((ref mut aof, sync_mode)) = self.log {
            if !self.pending.is_empty() {
                for op in &self.pending {
                    match op {
                        StorageOp::Put { key, item } => {
                            aof.write_set(key, &item.value, item.expires_at)?
                        }
                        StorageOp::Delete { key } => aof.write_delete(key)?,
                    }
                }
                aof.sync_with_mode(sync_mode)?;
            }
        }

        let TreeTxn {
            mut tree, pending, ..
        } = *self;
        for op in pending {
            match op {
                StorageOp::Put { key, item } => {
                    tree.insert(key, item);
                }
                StorageOp::Delete { key } => {
                    tree.remove(&key);
                }
            }
        }
        Ok(())
    }
}

fn scan_live<'t>(
    tree: &'t Tree,
    prefix: &[u8],
    seek: &[u8],
    now: SystemTime,
) -> Box<dyn Iterator<Item = Bytes> + 't> {
    let start: &[u8] = if seek < prefix { prefix } else { seek };
    let start = Bytes::copy_from_slice(start);
    let prefix = Bytes::copy_from_slice(prefix);

    Box::new(
        tree.range(start..)
            .take_while(move |(key, _)| key.starts_with(&prefix))
            .filter(move |(_, item)| !item.is_expired_at(now))
            .map(|(key, _)| key.clone()),
    )
}
