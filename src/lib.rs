//! User-space virtual filesystem mount server. A content-addressed
//! tree from an object store is projected into the host namespace:
//! directories materialize lazily on first enumeration, file content
//! streams on demand, and a built-in MOUNT v3 daemon hands out root
//! file handles over ONC-RPC so standard clients can attach.

pub mod access_log;
pub mod channel;
pub mod clock;
pub mod context;
pub mod fs;
pub mod gate;
pub mod mountd;
pub mod path;
pub mod store;

pub use channel::{ChannelResult, FsChannel, NotificationKind};
pub use clock::{Clock, FakeClock, SystemClock, Timestamp};
pub use context::RequestContext;
pub use fs::ProjectedFs;
pub use fs::errors::{FsError, FsResult};
pub use fs::inode::{InodeAttr, InodeNumber, InodeTable};
pub use fs::tree_entry::{TreeEntry, TreeEntryType};
pub use gate::StartingGate;
pub use mountd::{MountServer, MountdHandler};
pub use path::{MountPath, PathComponent};
pub use store::fetch::{FetchCause, FetchPriority, NullFetchContext, ObjectFetchContext};
pub use store::{FakeObjectStore, ObjectId, ObjectStore, StoreError};
