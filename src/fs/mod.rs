pub mod dir_handle;
pub mod errors;
pub mod inode;
pub mod tree_entry;

use crate::fs::dir_handle::DirHandle;
use crate::fs::errors::FsResult;
use crate::fs::inode::{InodeAttr, InodeNumber, InodeTable};
use crate::path::PathComponent;
use crate::store::fetch::ObjectFetchContext;
use crate::store::{ObjectId, ObjectStore};
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Operation counters for one projected filesystem. All loads and
/// stores are relaxed; these feed logs and tests, not control flow.
#[derive(Default)]
pub struct FsStats {
    lookups: AtomicU64,
    getattrs: AtomicU64,
    dir_opens: AtomicU64,
    file_reads: AtomicU64,
    readlinks: AtomicU64,
}

impl FsStats {
    pub fn lookups(&self) -> u64 {
        self.lookups.load(AtomicOrdering::Relaxed)
    }

    pub fn getattrs(&self) -> u64 {
        self.getattrs.load(AtomicOrdering::Relaxed)
    }

    pub fn dir_opens(&self) -> u64 {
        self.dir_opens.load(AtomicOrdering::Relaxed)
    }

    pub fn file_reads(&self) -> u64 {
        self.file_reads.load(AtomicOrdering::Relaxed)
    }

    pub fn readlinks(&self) -> u64 {
        self.readlinks.load(AtomicOrdering::Relaxed)
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

/// Read-through projection of one content-addressed tree. Thin facade
/// over the inode table that keeps per-mount operation counters.
pub struct ProjectedFs {
    table: InodeTable,
    stats: FsStats,
}

impl ProjectedFs {
    pub fn new(store: Arc<dyn ObjectStore>, root_hash: ObjectId, read_only: bool) -> Self {
        Self {
            table: InodeTable::new(store, root_hash, read_only),
            stats: FsStats::default(),
        }
    }

    pub fn table(&self) -> &InodeTable {
        &self.table
    }

    pub fn stats(&self) -> &FsStats {
        &self.stats
    }

    pub fn root_ino(&self) -> InodeNumber {
        self.table.root_ino()
    }

    pub fn read_only(&self) -> bool {
        self.table.read_only()
    }

    pub async fn lookup(
        &self,
        parent_ino: InodeNumber,
        name: &PathComponent,
        ctx: &dyn ObjectFetchContext,
    ) -> FsResult<(InodeNumber, InodeAttr)> {
        FsStats::bump(&self.stats.lookups);
        self.table.lookup(parent_ino, name, ctx).await
    }

    pub async fn getattr(
        &self,
        ino: InodeNumber,
        ctx: &dyn ObjectFetchContext,
    ) -> FsResult<InodeAttr> {
        FsStats::bump(&self.stats.getattrs);
        self.table.getattr(ino, ctx).await
    }

    pub async fn open_dir(
        &self,
        ino: InodeNumber,
        ctx: &dyn ObjectFetchContext,
    ) -> FsResult<DirHandle> {
        FsStats::bump(&self.stats.dir_opens);
        self.table.open_dir(ino, ctx).await
    }

    pub async fn readlink(
        &self,
        ino: InodeNumber,
        ctx: &dyn ObjectFetchContext,
    ) -> FsResult<Bytes> {
        FsStats::bump(&self.stats.readlinks);
        self.table.readlink(ino, ctx).await
    }

    pub async fn read_file(
        &self,
        ino: InodeNumber,
        offset: u64,
        length: u64,
        ctx: &dyn ObjectFetchContext,
    ) -> FsResult<Bytes> {
        FsStats::bump(&self.stats.file_reads);
        self.table.read_file(ino, offset, length, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::tree_entry::{TreeEntry, TreeEntryType};
    use crate::store::FakeObjectStore;
    use crate::store::fetch::NullFetchContext;

    #[tokio::test]
    async fn test_stats_track_operations() {
        let store = Arc::new(FakeObjectStore::new());
        let root_hash = ObjectId::from_u64(0x1000);
        store.put_tree(
            root_hash,
            vec![TreeEntry::new(
                ObjectId::from_u64(0x1),
                PathComponent::new(b"a.txt".to_vec()).unwrap(),
                TreeEntryType::RegularFile,
            )],
        );
        store.put_blob(ObjectId::from_u64(0x1), &b"alpha"[..]);

        let fs = ProjectedFs::new(store, root_hash, true);
        let ctx = NullFetchContext::get();
        let name = PathComponent::new(b"a.txt".to_vec()).unwrap();

        let (ino, _) = fs.lookup(fs.root_ino(), &name, ctx).await.unwrap();
        fs.getattr(ino, ctx).await.unwrap();
        fs.read_file(ino, 0, 5, ctx).await.unwrap();
        fs.open_dir(fs.root_ino(), ctx).await.unwrap();

        assert_eq!(fs.stats().lookups(), 1);
        assert_eq!(fs.stats().getattrs(), 1);
        assert_eq!(fs.stats().file_reads(), 1);
        assert_eq!(fs.stats().dir_opens(), 1);
        assert_eq!(fs.stats().readlinks(), 0);
    }
}
