use crate::clock::Timestamp;
use crate::fs::errors::{FsError, FsResult};
use crate::fs::inode::{DIR_SIZE, Inode, InodeAttr, InodeNumber};
use crate::fs::tree_entry::TreeEntryType;
use crate::path::PathComponent;
use std::sync::Arc;

/// Fixed per-entry cost charged against the caller's buffer, covering
/// the inode number, type, and length fields of a dirent.
pub const DIRENT_OVERHEAD: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntrySnapshot {
    pub name: PathComponent,
    pub ino: InodeNumber,
    pub entry_type: TreeEntryType,
}

#[derive(Debug, Clone)]
pub struct ReadDirResult {
    pub entries: Vec<DirEntrySnapshot>,
    pub next_offset: u64,
    pub eof: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SetAttr {
    pub mode: Option<u32>,
    pub mtime: Option<Timestamp>,
}

/// Stateful enumeration cursor over a tree inode. Holds a strong
/// reference to the parent inode for the handle's lifetime; the
/// snapshot taken at open never changes, so offsets stay stable.
#[derive(Debug)]
pub struct DirHandle {
    parent: Arc<Inode>,
    snapshot: Vec<DirEntrySnapshot>,
    read_only: bool,
}

impl DirHandle {
    pub(crate) fn new(parent: Arc<Inode>, snapshot: Vec<DirEntrySnapshot>, read_only: bool) -> Self {
        Self {
            parent,
            snapshot,
            read_only,
        }
    }

    pub fn parent_ino(&self) -> InodeNumber {
        self.parent.ino()
    }

    pub fn snapshot(&self) -> &[DirEntrySnapshot] {
        &self.snapshot
    }

    /// Returns entries starting at `offset` (the snapshot index) that
    /// fit in `max_bytes`. Successive calls with the returned
    /// `next_offset` yield the remainder without duplication or
    /// omission. A buffer too small for even one entry returns zero
    /// entries with `eof == false`.
    pub fn readdir(&self, offset: u64, max_bytes: usize) -> ReadDirResult {
        let start = (offset as usize).min(self.snapshot.len());
        let mut entries = Vec::new();
        let mut used = 0usize;
        let mut index = start;

        while index < self.snapshot.len() {
            let entry = &self.snapshot[index];
            let cost = DIRENT_OVERHEAD + entry.name.as_bytes().len();
            if used + cost > max_bytes {
                break;
            }
            used += cost;
            entries.push(entry.clone());
            index += 1;
        }

        ReadDirResult {
            entries,
            next_offset: index as u64,
            eof: index == self.snapshot.len(),
        }
    }

    /// No durability to enforce for a projection; always succeeds.
    pub fn fsyncdir(&self, _datasync: bool) -> FsResult<()> {
        Ok(())
    }

    pub async fn getattr(&self) -> InodeAttr {
        match &*self.parent {
            Inode::Tree(t) => {
                let state = t.state().await;
                InodeAttr {
                    ino: t.ino,
                    entry_type: TreeEntryType::Tree,
                    mode: state.mode,
                    size: DIR_SIZE,
                    mtime: state.mtime,
                    hash: t.hash,
                }
            }
            // The table only hands out handles for tree inodes.
            Inode::File(_) => unreachable!("directory handle over a file inode"),
        }
    }

    pub async fn setattr(&self, attr: &SetAttr) -> FsResult<InodeAttr> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        match &*self.parent {
            Inode::Tree(t) => {
                let mut state = t.state().await;
                if let Some(mode) = attr.mode {
                    state.mode = mode;
                }
                if let Some(mtime) = attr.mtime {
                    state.mtime = mtime;
                }
                Ok(InodeAttr {
                    ino: t.ino,
                    entry_type: TreeEntryType::Tree,
                    mode: state.mode,
                    size: DIR_SIZE,
                    mtime: state.mtime,
                    hash: t.hash,
                })
            }
            Inode::File(_) => unreachable!("directory handle over a file inode"),
        }
    }
}
