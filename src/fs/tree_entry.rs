use crate::path::PathComponent;
use crate::store::ObjectId;
use serde::{Deserialize, Serialize};

pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IXUSR: u32 = 0o100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeEntryType {
    RegularFile,
    ExecutableFile,
    Symlink,
    Tree,
}

impl TreeEntryType {
    /// Derived POSIX mode for this entry type.
    pub fn mode(&self) -> u32 {
        match self {
            TreeEntryType::RegularFile => S_IFREG | 0o644,
            TreeEntryType::ExecutableFile => S_IFREG | 0o755,
            TreeEntryType::Symlink => S_IFLNK | 0o755,
            TreeEntryType::Tree => S_IFDIR | 0o755,
        }
    }

    /// Inverse of `mode`. Absent for any `S_IFMT` outside the
    /// enumerated set.
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            S_IFREG => {
                if mode & S_IXUSR != 0 {
                    Some(TreeEntryType::ExecutableFile)
                } else {
                    Some(TreeEntryType::RegularFile)
                }
            }
            S_IFLNK => Some(TreeEntryType::Symlink),
            S_IFDIR => Some(TreeEntryType::Tree),
            _ => None,
        }
    }

    /// Single-character tag used in log lines.
    pub fn log_char(&self) -> char {
        match self {
            TreeEntryType::RegularFile => 'f',
            TreeEntryType::ExecutableFile => 'x',
            TreeEntryType::Symlink => 'l',
            TreeEntryType::Tree => 'd',
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, TreeEntryType::Tree)
    }
}

/// One entry of a content-addressed directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub hash: ObjectId,
    pub name: PathComponent,
    pub entry_type: TreeEntryType,
}

impl TreeEntry {
    pub fn new(hash: ObjectId, name: PathComponent, entry_type: TreeEntryType) -> Self {
        Self {
            hash,
            name,
            entry_type,
        }
    }

    pub fn mode(&self) -> u32 {
        self.entry_type.mode()
    }

    pub fn log_string(&self) -> String {
        format!(
            "({}, {}, {})",
            self.name,
            self.hash,
            self.entry_type.log_char()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hash: u64, name: &str, entry_type: TreeEntryType) -> TreeEntry {
        TreeEntry::new(
            ObjectId::from_u64(hash),
            PathComponent::new(name.as_bytes().to_vec()).unwrap(),
            entry_type,
        )
    }

    #[test]
    fn test_regular_file_log_string_and_mode() {
        let e = entry(0xfaceb00c, "file.txt", TreeEntryType::RegularFile);
        assert_eq!(
            e.log_string(),
            "(file.txt, 00000000000000000000000000000000faceb00c, f)"
        );
        assert_eq!(e.mode(), S_IFREG | 0o644);
    }

    #[test]
    fn test_executable_file_log_string_and_mode() {
        let e = entry(0x789, "file.exe", TreeEntryType::ExecutableFile);
        assert_eq!(e.mode(), S_IFREG | 0o755);
        assert!(e.log_string().ends_with(", x)"));
    }

    #[test]
    fn test_symlink_log_string_and_mode() {
        let e = entry(0xb, "to-file.exe", TreeEntryType::Symlink);
        assert_eq!(e.mode(), S_IFLNK | 0o755);
        assert!(e.log_string().ends_with(", l)"));
    }

    #[test]
    fn test_mode_round_trip_for_every_type() {
        for t in [
            TreeEntryType::RegularFile,
            TreeEntryType::ExecutableFile,
            TreeEntryType::Symlink,
            TreeEntryType::Tree,
        ] {
            assert_eq!(TreeEntryType::from_mode(t.mode()), Some(t));
        }
    }

    #[test]
    fn test_from_mode_rejects_foreign_formats() {
        const S_IFSOCK: u32 = 0o140000;
        const S_IFCHR: u32 = 0o020000;
        const S_IFIFO: u32 = 0o010000;
        assert_eq!(TreeEntryType::from_mode(S_IFSOCK | 0o700), None);
        assert_eq!(TreeEntryType::from_mode(S_IFCHR | 0o644), None);
        assert_eq!(TreeEntryType::from_mode(S_IFIFO | 0o644), None);
        assert_eq!(TreeEntryType::from_mode(0), None);
    }

    #[test]
    fn test_tree_entry_serialization() {
        let e = entry(0x42, "dir", TreeEntryType::Tree);
        let serialized = bincode::serialize(&e).unwrap();
        let deserialized: TreeEntry = bincode::deserialize(&serialized).unwrap();
        assert_eq!(deserialized, e);
    }
}
