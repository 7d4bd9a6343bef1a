use crate::clock::Timestamp;
use crate::fs::dir_handle::{DirEntrySnapshot, DirHandle};
use crate::fs::errors::{FsError, FsResult};
use crate::fs::tree_entry::{TreeEntry, TreeEntryType};
use crate::path::PathComponent;
use crate::store::fetch::ObjectFetchContext;
use crate::store::{ObjectId, ObjectStore};
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tokio::sync::{Mutex, MutexGuard, OnceCell};
use tracing::debug;

/// Opaque handle to an inode within one mount. `1` is the root, `0` is
/// reserved. Numbers are allocated monotonically and never reused for
/// the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InodeNumber(u64);

impl InodeNumber {
    pub const INVALID: InodeNumber = InodeNumber(0);
    pub const ROOT: InodeNumber = InodeNumber(1);

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const DIR_SIZE: u64 = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeAttr {
    pub ino: InodeNumber,
    pub entry_type: TreeEntryType,
    pub mode: u32,
    pub size: u64,
    pub mtime: Timestamp,
    pub hash: ObjectId,
}

#[derive(Debug, Clone)]
pub struct ChildLink {
    pub ino: InodeNumber,
    pub entry: TreeEntry,
}

#[derive(Debug)]
pub struct TreeState {
    pub materialized: bool,
    pub children: BTreeMap<PathComponent, ChildLink>,
    pub mode: u32,
    pub mtime: Timestamp,
}

/// Directory inode. The child map and materialization flag live behind
/// one mutex; holding it across the tree fetch is what guarantees
/// at-most-one concurrent materialization.
#[derive(Debug)]
pub struct TreeInode {
    pub ino: InodeNumber,
    pub parent: InodeNumber,
    pub hash: ObjectId,
    state: Mutex<TreeState>,
}

impl TreeInode {
    fn new(ino: InodeNumber, parent: InodeNumber, hash: ObjectId) -> Self {
        Self {
            ino,
            parent,
            hash,
            state: Mutex::new(TreeState {
                materialized: false,
                children: BTreeMap::new(),
                mode: TreeEntryType::Tree.mode(),
                mtime: Timestamp {
                    seconds: 0,
                    nanoseconds: 0,
                },
            }),
        }
    }

    pub async fn state(&self) -> MutexGuard<'_, TreeState> {
        self.state.lock().await
    }
}

/// Regular file, executable, or symlink. Content stays in the object
/// store; the size is resolved lazily on first attribute read.
#[derive(Debug)]
pub struct FileInode {
    pub ino: InodeNumber,
    pub parent: InodeNumber,
    pub hash: ObjectId,
    pub entry_type: TreeEntryType,
    pub mode: u32,
    size: OnceCell<u64>,
}

impl FileInode {
    fn new(
        ino: InodeNumber,
        parent: InodeNumber,
        hash: ObjectId,
        entry_type: TreeEntryType,
    ) -> Self {
        Self {
            ino,
            parent,
            hash,
            entry_type,
            mode: entry_type.mode(),
            size: OnceCell::new(),
        }
    }

    async fn size(&self, store: &dyn ObjectStore, ctx: &dyn ObjectFetchContext) -> FsResult<u64> {
        let size = self
            .size
            .get_or_try_init(|| async { store.blob_size(&self.hash, ctx).await })
            .await?;
        Ok(*size)
    }
}

#[derive(Debug)]
pub enum Inode {
    Tree(TreeInode),
    File(FileInode),
}

impl Inode {
    pub fn ino(&self) -> InodeNumber {
        match self {
            Inode::Tree(t) => t.ino,
            Inode::File(f) => f.ino,
        }
    }

    pub fn parent(&self) -> InodeNumber {
        match self {
            Inode::Tree(t) => t.parent,
            Inode::File(f) => f.parent,
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, Inode::Tree(_))
    }
}

/// In-memory inode table for one mount. Owns every inode record;
/// handles and callers refer to records by number only.
pub struct InodeTable {
    store: Arc<dyn ObjectStore>,
    inodes: DashMap<InodeNumber, Arc<Inode>>,
    next_ino: AtomicU64,
    read_only: bool,
}

impl InodeTable {
    pub fn new(store: Arc<dyn ObjectStore>, root_hash: ObjectId, read_only: bool) -> Self {
        let inodes = DashMap::new();
        inodes.insert(
            InodeNumber::ROOT,
            Arc::new(Inode::Tree(TreeInode::new(
                InodeNumber::ROOT,
                InodeNumber::ROOT,
                root_hash,
            ))),
        );
        Self {
            store,
            inodes,
            next_ino: AtomicU64::new(InodeNumber::ROOT.raw() + 1),
            read_only,
        }
    }

    pub fn root_ino(&self) -> InodeNumber {
        InodeNumber::ROOT
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn num_inodes(&self) -> usize {
        self.inodes.len()
    }

    fn allocate_ino(&self) -> InodeNumber {
        InodeNumber::from_raw(self.next_ino.fetch_add(1, AtomicOrdering::SeqCst))
    }

    pub fn get(&self, ino: InodeNumber) -> FsResult<Arc<Inode>> {
        self.inodes
            .get(&ino)
            .map(|r| Arc::clone(r.value()))
            .ok_or(FsError::Stale)
    }

    /// Locks the tree's state, fetching and inserting its children
    /// first if this is the first enumeration. Children get inode
    /// numbers in sorted-by-name order.
    async fn materialized_state<'a>(
        &self,
        tree: &'a TreeInode,
        ctx: &dyn ObjectFetchContext,
    ) -> FsResult<MutexGuard<'a, TreeState>> {
        let mut state = tree.state.lock().await;
        if state.materialized {
            return Ok(state);
        }

        debug!("materializing tree inode {} ({})", tree.ino, tree.hash);
        let mut entries = self.store.fetch_tree(&tree.hash, ctx).await?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        for entry in entries {
            let ino = self.allocate_ino();
            let record = if entry.entry_type.is_tree() {
                Inode::Tree(TreeInode::new(ino, tree.ino, entry.hash))
            } else {
                Inode::File(FileInode::new(ino, tree.ino, entry.hash, entry.entry_type))
            };
            self.inodes.insert(ino, Arc::new(record));
            state
                .children
                .insert(entry.name.clone(), ChildLink { ino, entry });
        }
        state.materialized = true;
        Ok(state)
    }

    async fn attr_of(&self, record: &Inode, ctx: &dyn ObjectFetchContext) -> FsResult<InodeAttr> {
        match record {
            Inode::Tree(t) => {
                let state = t.state.lock().await;
                Ok(InodeAttr {
                    ino: t.ino,
                    entry_type: TreeEntryType::Tree,
                    mode: state.mode,
                    size: DIR_SIZE,
                    mtime: state.mtime,
                    hash: t.hash,
                })
            }
            Inode::File(f) => {
                let size = f.size(self.store.as_ref(), ctx).await?;
                Ok(InodeAttr {
                    ino: f.ino,
                    entry_type: f.entry_type,
                    mode: f.mode,
                    size,
                    mtime: Timestamp {
                        seconds: 0,
                        nanoseconds: 0,
                    },
                    hash: f.hash,
                })
            }
        }
    }

    /// Resolves `name` under `parent_ino`, materializing the parent if
    /// needed. `ENOENT` if the name is absent.
    pub async fn lookup(
        &self,
        parent_ino: InodeNumber,
        name: &PathComponent,
        ctx: &dyn ObjectFetchContext,
    ) -> FsResult<(InodeNumber, InodeAttr)> {
        let parent = self.get(parent_ino)?;
        let tree = match &*parent {
            Inode::Tree(t) => t,
            Inode::File(_) => return Err(FsError::NotADirectory),
        };

        let child_ino = {
            let state = self.materialized_state(tree, ctx).await?;
            match state.children.get(name) {
                Some(link) => link.ino,
                None => return Err(FsError::NotFound),
            }
        };

        let child = self.get(child_ino)?;
        let attr = self.attr_of(&child, ctx).await?;
        Ok((child_ino, attr))
    }

    /// `ESTALE` if the inode is unknown (evicted or never allocated).
    pub async fn getattr(
        &self,
        ino: InodeNumber,
        ctx: &dyn ObjectFetchContext,
    ) -> FsResult<InodeAttr> {
        let record = self.get(ino)?;
        self.attr_of(&record, ctx).await
    }

    /// Opens an enumeration handle snapshotting the directory's
    /// current children.
    pub async fn open_dir(
        &self,
        ino: InodeNumber,
        ctx: &dyn ObjectFetchContext,
    ) -> FsResult<DirHandle> {
        let record = self.get(ino)?;
        let snapshot = {
            let tree = match &*record {
                Inode::Tree(t) => t,
                Inode::File(_) => return Err(FsError::NotADirectory),
            };
            let state = self.materialized_state(tree, ctx).await?;
            state
                .children
                .values()
                .map(|link| DirEntrySnapshot {
                    name: link.entry.name.clone(),
                    ino: link.ino,
                    entry_type: link.entry.entry_type,
                })
                .collect()
        };
        Ok(DirHandle::new(record, snapshot, self.read_only))
    }

    /// Target bytes of a symlink. `EINVAL` for anything else.
    pub async fn readlink(
        &self,
        ino: InodeNumber,
        ctx: &dyn ObjectFetchContext,
    ) -> FsResult<Bytes> {
        let record = self.get(ino)?;
        let file = match &*record {
            Inode::File(f) if f.entry_type == TreeEntryType::Symlink => f,
            _ => return Err(FsError::InvalidArgument),
        };
        let size = file.size(self.store.as_ref(), ctx).await?;
        Ok(self.store.fetch_blob(&file.hash, 0, size, ctx).await?)
    }

    /// Streams a byte range of a file's content from the object store.
    pub async fn read_file(
        &self,
        ino: InodeNumber,
        offset: u64,
        length: u64,
        ctx: &dyn ObjectFetchContext,
    ) -> FsResult<Bytes> {
        let record = self.get(ino)?;
        let file = match &*record {
            Inode::File(f) => f,
            Inode::Tree(_) => return Err(FsError::InvalidArgument),
        };
        Ok(self
            .store
            .fetch_blob(&file.hash, offset, length, ctx)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FakeObjectStore;
    use crate::store::fetch::NullFetchContext;
    use std::time::Duration;

    fn component(name: &str) -> PathComponent {
        PathComponent::new(name.as_bytes().to_vec()).unwrap()
    }

    fn tree_entry(hash: u64, name: &str, entry_type: TreeEntryType) -> TreeEntry {
        TreeEntry::new(ObjectId::from_u64(hash), component(name), entry_type)
    }

    /// Root tree with a file, an executable, a symlink, and a subdir.
    fn populated_store() -> (Arc<FakeObjectStore>, ObjectId) {
        let store = Arc::new(FakeObjectStore::new());
        let root_hash = ObjectId::from_u64(0x1000);
        store.put_tree(
            root_hash,
            vec![
                tree_entry(0x2, "b.txt", TreeEntryType::RegularFile),
                tree_entry(0x1, "a.txt", TreeEntryType::RegularFile),
                tree_entry(0x3, "run.sh", TreeEntryType::ExecutableFile),
                tree_entry(0x4, "link", TreeEntryType::Symlink),
                tree_entry(0x2000, "sub", TreeEntryType::Tree),
            ],
        );
        store.put_tree(
            ObjectId::from_u64(0x2000),
            vec![tree_entry(0x5, "nested.txt", TreeEntryType::RegularFile)],
        );
        store.put_blob(ObjectId::from_u64(0x1), &b"alpha"[..]);
        store.put_blob(ObjectId::from_u64(0x2), &b"bravo!"[..]);
        store.put_blob(ObjectId::from_u64(0x3), &b"#!/bin/sh\n"[..]);
        store.put_blob(ObjectId::from_u64(0x4), &b"a.txt"[..]);
        store.put_blob(ObjectId::from_u64(0x5), &b"nested"[..]);
        (store, root_hash)
    }

    #[tokio::test]
    async fn test_lookup_materializes_and_resolves() {
        let (store, root_hash) = populated_store();
        let table = InodeTable::new(store.clone(), root_hash, true);
        let ctx = NullFetchContext::get();

        let (ino, attr) = table
            .lookup(InodeNumber::ROOT, &component("a.txt"), ctx)
            .await
            .unwrap();
        assert_ne!(ino, InodeNumber::INVALID);
        assert_eq!(attr.size, 5);
        assert_eq!(attr.entry_type, TreeEntryType::RegularFile);
        assert_eq!(store.tree_fetch_count(), 1);

        // Second lookup hits the materialized map, no further fetch.
        table
            .lookup(InodeNumber::ROOT, &component("b.txt"), ctx)
            .await
            .unwrap();
        assert_eq!(store.tree_fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_lookup_missing_name_is_enoent() {
        let (store, root_hash) = populated_store();
        let table = InodeTable::new(store, root_hash, true);
        let err = table
            .lookup(
                InodeNumber::ROOT,
                &component("missing"),
                NullFetchContext::get(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::NotFound));
    }

    #[tokio::test]
    async fn test_lookup_through_file_is_enotdir() {
        let (store, root_hash) = populated_store();
        let table = InodeTable::new(store, root_hash, true);
        let ctx = NullFetchContext::get();
        let (file_ino, _) = table
            .lookup(InodeNumber::ROOT, &component("a.txt"), ctx)
            .await
            .unwrap();
        let err = table
            .lookup(file_ino, &component("x"), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::NotADirectory));
    }

    #[tokio::test]
    async fn test_getattr_unknown_ino_is_estale() {
        let (store, root_hash) = populated_store();
        let table = InodeTable::new(store, root_hash, true);
        let err = table
            .getattr(InodeNumber::from_raw(999), NullFetchContext::get())
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::Stale));
    }

    #[tokio::test]
    async fn test_children_allocated_in_name_order() {
        let (store, root_hash) = populated_store();
        let table = InodeTable::new(store, root_hash, true);
        let ctx = NullFetchContext::get();

        let handle = table.open_dir(InodeNumber::ROOT, ctx).await.unwrap();
        let names: Vec<&[u8]> = handle
            .snapshot()
            .iter()
            .map(|e| e.name.as_bytes())
            .collect();
        assert_eq!(
            names,
            vec![
                &b"a.txt"[..],
                &b"b.txt"[..],
                &b"link"[..],
                &b"run.sh"[..],
                &b"sub"[..]
            ]
        );

        // Inode numbers follow sorted name order.
        let inos: Vec<u64> = handle.snapshot().iter().map(|e| e.ino.raw()).collect();
        let mut sorted = inos.clone();
        sorted.sort_unstable();
        assert_eq!(inos, sorted);
    }

    #[tokio::test]
    async fn test_parent_back_references_resolve() {
        let (store, root_hash) = populated_store();
        let table = InodeTable::new(store, root_hash, true);
        let ctx = NullFetchContext::get();

        let handle = table.open_dir(InodeNumber::ROOT, ctx).await.unwrap();
        for entry in handle.snapshot() {
            let record = table.get(entry.ino).unwrap();
            assert_eq!(record.parent(), InodeNumber::ROOT);
        }

        let (sub_ino, _) = table
            .lookup(InodeNumber::ROOT, &component("sub"), ctx)
            .await
            .unwrap();
        let (nested_ino, _) = table
            .lookup(sub_ino, &component("nested.txt"), ctx)
            .await
            .unwrap();
        assert_eq!(table.get(nested_ino).unwrap().parent(), sub_ino);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_fetch_tree_once() {
        let store = Arc::new(FakeObjectStore::with_fetch_delay(Duration::from_millis(25)));
        let root_hash = ObjectId::from_u64(0x1000);
        store.put_tree(
            root_hash,
            vec![tree_entry(0x1, "a", TreeEntryType::RegularFile)],
        );
        store.put_blob(ObjectId::from_u64(0x1), &b"x"[..]);

        let table = Arc::new(InodeTable::new(store.clone(), root_hash, true));
        let ctx = NullFetchContext::get();

        let t1 = {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                table
                    .lookup(InodeNumber::ROOT, &component("a"), NullFetchContext::get())
                    .await
            })
        };
        let r2 = table.lookup(InodeNumber::ROOT, &component("a"), ctx).await;
        let r1 = t1.await.unwrap();

        let (ino1, _) = r1.unwrap();
        let (ino2, _) = r2.unwrap();
        assert_eq!(ino1, ino2);
        assert_eq!(store.tree_fetch_count_for(&root_hash), 1);
    }

    #[tokio::test]
    async fn test_readlink() {
        let (store, root_hash) = populated_store();
        let table = InodeTable::new(store, root_hash, true);
        let ctx = NullFetchContext::get();

        let (link_ino, _) = table
            .lookup(InodeNumber::ROOT, &component("link"), ctx)
            .await
            .unwrap();
        let target = table.readlink(link_ino, ctx).await.unwrap();
        assert_eq!(&target[..], b"a.txt");

        let (file_ino, _) = table
            .lookup(InodeNumber::ROOT, &component("a.txt"), ctx)
            .await
            .unwrap();
        let err = table.readlink(file_ino, ctx).await.unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument));

        let err = table.readlink(InodeNumber::ROOT, ctx).await.unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument));
    }

    #[tokio::test]
    async fn test_read_file_range() {
        let (store, root_hash) = populated_store();
        let table = InodeTable::new(store, root_hash, true);
        let ctx = NullFetchContext::get();

        let (ino, _) = table
            .lookup(InodeNumber::ROOT, &component("b.txt"), ctx)
            .await
            .unwrap();
        let data = table.read_file(ino, 2, 3, ctx).await.unwrap();
        assert_eq!(&data[..], b"avo");

        let err = table
            .read_file(InodeNumber::ROOT, 0, 1, ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument));
    }

    #[tokio::test]
    async fn test_missing_tree_maps_to_estale() {
        let store = Arc::new(FakeObjectStore::new());
        let table = InodeTable::new(store, ObjectId::from_u64(0xdead), true);
        let err = table
            .open_dir(InodeNumber::ROOT, NullFetchContext::get())
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::Stale));
    }
}
