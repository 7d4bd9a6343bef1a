//! Platform callback adapter. The virtualization layer invokes these
//! entry points for every kernel request against the mount; each one
//! translates into inode-layer calls and reports back a plain errno
//! (`0` is success on the platform side, so errors here are the
//! non-zero codes).

use crate::access_log::{AccessLogSink, AccessType};
use crate::context::RequestContext;
use crate::fs::ProjectedFs;
use crate::fs::dir_handle::{DirEntrySnapshot, DirHandle};
use crate::fs::inode::{InodeAttr, InodeNumber};
use crate::path::{MountPath, PathComponent};
use crate::store::fetch::{CancellableFetchContext, FetchCause, FetchPriority};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type ChannelResult<T> = Result<T, i32>;

/// Kernel-side modification and access events delivered through the
/// notification callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    FileOpened,
    FileRead,
    PreModify,
    PreDelete,
    PreRename,
}

impl NotificationKind {
    fn is_modification(&self) -> bool {
        matches!(
            self,
            NotificationKind::PreModify | NotificationKind::PreDelete | NotificationKind::PreRename
        )
    }

    fn access_type(&self) -> AccessType {
        match self {
            NotificationKind::FileOpened => AccessType::Stat,
            NotificationKind::FileRead => AccessType::Read,
            NotificationKind::PreModify
            | NotificationKind::PreDelete
            | NotificationKind::PreRename => AccessType::Write,
        }
    }
}

struct EnumerationSession {
    handle: DirHandle,
    index: usize,
    /// Captured from the first advance callback; later calls reuse it.
    search_expression: Option<Vec<u8>>,
}

/// Wildcard match with platform filename semantics: `*` matches any
/// run of bytes, `?` matches exactly one.
fn name_matches(pattern: &[u8], name: &[u8]) -> bool {
    match (pattern.first(), name.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            name_matches(&pattern[1..], name)
                || (!name.is_empty() && name_matches(pattern, &name[1..]))
        }
        (Some(b'?'), Some(_)) => name_matches(&pattern[1..], &name[1..]),
        (Some(p), Some(n)) if p == n => name_matches(&pattern[1..], &name[1..]),
        _ => false,
    }
}

/// One mounted projection's callback endpoint. All state a callback
/// touches hangs off this struct; nothing global beyond the null fetch
/// context.
pub struct FsChannel {
    mount_id: Uuid,
    mount_path: MountPath,
    running: AtomicBool,
    fs: Arc<ProjectedFs>,
    access_log: Arc<dyn AccessLogSink>,
    enumerations: DashMap<u64, EnumerationSession>,
    commands: DashMap<u64, CancellationToken>,
}

impl FsChannel {
    pub fn new(
        mount_path: MountPath,
        fs: Arc<ProjectedFs>,
        access_log: Arc<dyn AccessLogSink>,
    ) -> Self {
        let mount_id = Uuid::new_v4();
        info!("fs channel {} serving {}", mount_id, mount_path);
        Self {
            mount_id,
            mount_path,
            running: AtomicBool::new(true),
            fs,
            access_log,
            enumerations: DashMap::new(),
            commands: DashMap::new(),
        }
    }

    pub fn mount_id(&self) -> Uuid {
        self.mount_id
    }

    pub fn mount_path(&self) -> &MountPath {
        &self.mount_path
    }

    pub fn is_running(&self) -> bool {
        self.running.load(AtomicOrdering::SeqCst)
    }

    fn check_running(&self) -> ChannelResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(libc::ESHUTDOWN)
        }
    }

    /// Registers a cancellation token for `command_id` and builds the
    /// fetch context the store call should run under.
    fn fetch_context(&self, command_id: u64, cause: FetchCause) -> CancellableFetchContext {
        let token = CancellationToken::new();
        self.commands.insert(command_id, token.clone());
        CancellableFetchContext::new(cause, FetchPriority::Normal, token)
            .with_detail(format!("command {}", command_id))
    }

    fn request_context(&self, pid: u32) -> RequestContext {
        RequestContext::new(pid, FetchCause::Fs, Arc::clone(&self.access_log))
    }

    fn finish_command(&self, command_id: u64) {
        self.commands.remove(&command_id);
    }

    /// Opens an enumeration cursor for `ino` under `enumeration_id`.
    /// A reused id replaces the old cursor, matching a kernel that
    /// restarts a scan.
    pub async fn start_enumeration(
        &self,
        enumeration_id: u64,
        ino: InodeNumber,
    ) -> ChannelResult<()> {
        self.check_running()?;
        let ctx = self.fetch_context(enumeration_id, FetchCause::Fs);
        let result = self.fs.open_dir(ino, &ctx).await;
        self.finish_command(enumeration_id);

        let handle = result.map_err(|e| e.to_errno())?;
        debug!("enumeration {} opened for inode {}", enumeration_id, ino);
        self.enumerations.insert(
            enumeration_id,
            EnumerationSession {
                handle,
                index: 0,
                search_expression: None,
            },
        );
        Ok(())
    }

    /// Returns up to `max_entries` children matching the search
    /// expression, advancing the cursor past everything scanned. An
    /// empty result means the scan is complete.
    pub fn continue_enumeration(
        &self,
        enumeration_id: u64,
        search_expression: Option<&[u8]>,
        max_entries: usize,
    ) -> ChannelResult<Vec<DirEntrySnapshot>> {
        self.check_running()?;
        let mut session = self
            .enumerations
            .get_mut(&enumeration_id)
            .ok_or(libc::ENOENT)?;

        if session.search_expression.is_none() {
            if let Some(expression) = search_expression {
                session.search_expression = Some(expression.to_vec());
            }
        }
        let pattern = session.search_expression.clone().unwrap_or_else(|| vec![b'*']);

        let mut out = Vec::new();
        while out.len() < max_entries {
            let Some(entry) = session.handle.snapshot().get(session.index) else {
                break;
            };
            let entry = entry.clone();
            session.index += 1;
            if name_matches(&pattern, entry.name.as_bytes()) {
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Idempotent; the kernel may end an enumeration it never started.
    pub fn end_enumeration(&self, enumeration_id: u64) -> ChannelResult<()> {
        self.check_running()?;
        if self.enumerations.remove(&enumeration_id).is_some() {
            debug!("enumeration {} closed", enumeration_id);
        }
        Ok(())
    }

    /// Metadata for one name under `parent_ino`, without content.
    pub async fn get_placeholder_info(
        &self,
        command_id: u64,
        parent_ino: InodeNumber,
        name: &PathComponent,
        pid: u32,
    ) -> ChannelResult<InodeAttr> {
        self.check_running()?;
        let ctx = self.fetch_context(command_id, FetchCause::Fs);
        let result = self.fs.lookup(parent_ino, name, &ctx).await;
        self.finish_command(command_id);

        let (_, attr) = result.map_err(|e| e.to_errno())?;
        self.request_context(pid)
            .record_access(name.as_bytes(), AccessType::Lookup);
        Ok(attr)
    }

    /// Streams a byte range of a file through the object store.
    pub async fn get_file_data(
        &self,
        command_id: u64,
        ino: InodeNumber,
        offset: u64,
        length: u64,
        pid: u32,
    ) -> ChannelResult<Bytes> {
        self.check_running()?;
        let ctx = self.fetch_context(command_id, FetchCause::Fs);
        let result = self.fs.read_file(ino, offset, length, &ctx).await;
        let cancelled = ctx.token().is_cancelled();
        self.finish_command(command_id);

        if cancelled {
            debug!("file data command {} cancelled", command_id);
            return Err(libc::EINTR);
        }
        let data = result.map_err(|e| e.to_errno())?;
        self.request_context(pid).record_access(b"", AccessType::Read);
        Ok(data)
    }

    /// Pre/post event for `path`. Pre-modification events are denied
    /// outright on a read-only projection.
    pub fn notification(
        &self,
        pid: u32,
        path: &[u8],
        kind: NotificationKind,
    ) -> ChannelResult<()> {
        self.check_running()?;
        if kind.is_modification() && self.fs.read_only() {
            debug!(
                "denying {:?} on read-only mount {}",
                kind,
                String::from_utf8_lossy(path)
            );
            return Err(libc::EROFS);
        }
        self.request_context(pid)
            .record_access(path, kind.access_type());
        Ok(())
    }

    /// Best-effort abort of an in-flight command. Unknown ids are
    /// fine, the command may already have completed.
    pub fn cancel_operation(&self, command_id: u64) {
        if let Some(token) = self.commands.get(&command_id) {
            debug!("cancelling command {}", command_id);
            token.cancel();
        }
    }

    /// Stops accepting callbacks and tears down per-mount state. Safe
    /// to call more than once.
    pub fn stop(&self) {
        if self.running.swap(false, AtomicOrdering::SeqCst) {
            info!("fs channel {} stopping", self.mount_id);
            for entry in self.commands.iter() {
                entry.value().cancel();
            }
            self.commands.clear();
            self.enumerations.clear();
        } else {
            warn!("fs channel {} stopped twice", self.mount_id);
        }
    }
}
