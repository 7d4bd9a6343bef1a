use crate::fs::inode::InodeNumber;
use crate::mountd::protocol::{
    AUTH_NONE, AUTH_SYS, ExportList, ExportNode, GroupNode, MNTPATHLEN, MOUNT_PROGRAM, MOUNT_V3,
    MOUNTPROC3_DUMP, MOUNTPROC3_EXPORT, MOUNTPROC3_MNT, MOUNTPROC3_NULL, MOUNTPROC3_UMNT,
    MOUNTPROC3_UMNTALL, MountCall, MountList, MountRes3, MountResOk,
};
use crate::mountd::server::{DispatchResult, RpcProgram};
use crate::mountd::xdr::{XdrList, XdrString};
use crate::path::MountPath;
use async_trait::async_trait;
use bytes::Bytes;
use deku::prelude::*;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// MOUNT v3 program. Holds the registry of mountable paths; each maps
/// to the root inode the corresponding projection hands out.
pub struct MountdHandler {
    exports: RwLock<HashMap<MountPath, InodeNumber>>,
}

impl Default for MountdHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MountdHandler {
    pub fn new() -> Self {
        Self {
            exports: RwLock::new(HashMap::new()),
        }
    }

    /// Idempotent; registering an already-exported path replaces its
    /// root inode.
    pub async fn register(&self, path: MountPath, root_ino: InodeNumber) {
        info!("exporting {} as inode {}", path, root_ino);
        self.exports.write().await.insert(path, root_ino);
    }

    /// Idempotent; unregistering an unknown path is a no-op.
    pub async fn unregister(&self, path: &MountPath) {
        if self.exports.write().await.remove(path).is_some() {
            info!("export {} withdrawn", path);
        }
    }

    pub async fn num_exports(&self) -> usize {
        self.exports.read().await.len()
    }

    async fn mnt(&self, call: MountCall) -> MountRes3 {
        let dirpath = call.dirpath.as_str();
        if dirpath.len() > MNTPATHLEN {
            return MountRes3::NameTooLong;
        }
        let path = match MountPath::new(dirpath) {
            Ok(path) => path,
            Err(e) => {
                debug!("MNT for unusable path {:?}: {}", dirpath, e);
                return MountRes3::Inval;
            }
        };

        match self.exports.read().await.get(&path) {
            Some(root_ino) => {
                info!("MNT {} -> inode {}", path, root_ino);
                MountRes3::Ok(MountResOk::new(
                    file_handle(*root_ino).to_vec(),
                    vec![AUTH_NONE, AUTH_SYS],
                ))
            }
            None => {
                debug!("MNT for unexported path {}", path);
                MountRes3::NoEnt
            }
        }
    }

    async fn export(&self) -> ExportList {
        let exports = self.exports.read().await;
        let mut paths: Vec<&MountPath> = exports.keys().collect();
        paths.sort();
        ExportList {
            entries: XdrList::new(
                paths
                    .into_iter()
                    .map(|path| ExportNode {
                        dirpath: XdrString::new(path.as_str()),
                        groups: XdrList::new(vec![GroupNode {
                            name: XdrString::new("*"),
                        }]),
                    })
                    .collect(),
            ),
        }
    }
}

/// Fixed-width file handle: the root inode number, little-endian.
pub fn file_handle(ino: InodeNumber) -> [u8; 8] {
    ino.raw().to_le_bytes()
}

fn reply<T: DekuContainerWrite>(value: &T) -> DispatchResult {
    match value.to_bytes() {
        Ok(bytes) => DispatchResult::Reply(Bytes::from(bytes)),
        Err(e) => {
            warn!("failed to encode mount reply: {:?}", e);
            DispatchResult::GarbageArgs
        }
    }
}

#[async_trait]
impl RpcProgram for MountdHandler {
    fn program(&self) -> u32 {
        MOUNT_PROGRAM
    }

    fn version_range(&self) -> (u32, u32) {
        (MOUNT_V3, MOUNT_V3)
    }

    async fn dispatch(&self, proc: u32, args: Bytes) -> DispatchResult {
        match proc {
            MOUNTPROC3_NULL => DispatchResult::Reply(Bytes::new()),
            MOUNTPROC3_MNT => match MountCall::from_bytes((args.as_ref(), 0)) {
                Ok((_, call)) => reply(&self.mnt(call).await),
                Err(e) => {
                    debug!("undecodable MNT arguments: {:?}", e);
                    DispatchResult::GarbageArgs
                }
            },
            // Mount tracking is not kept, so the mount list is empty.
            MOUNTPROC3_DUMP => reply(&MountList::default()),
            MOUNTPROC3_UMNT => match MountCall::from_bytes((args.as_ref(), 0)) {
                Ok((_, call)) => {
                    debug!("UMNT {}", call.dirpath.as_str());
                    DispatchResult::Reply(Bytes::new())
                }
                Err(e) => {
                    debug!("undecodable UMNT arguments: {:?}", e);
                    DispatchResult::GarbageArgs
                }
            },
            MOUNTPROC3_UMNTALL => DispatchResult::Reply(Bytes::new()),
            MOUNTPROC3_EXPORT => reply(&self.export().await),
            _ => DispatchResult::ProcUnavail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mnt_args(path: &str) -> Bytes {
        Bytes::from(
            MountCall {
                dirpath: XdrString::new(path),
            }
            .to_bytes()
            .unwrap(),
        )
    }

    fn decode_mnt(result: DispatchResult) -> MountRes3 {
        match result {
            DispatchResult::Reply(bytes) => {
                let ((rest, _), res) = MountRes3::from_bytes((bytes.as_ref(), 0)).unwrap();
                assert!(rest.is_empty());
                res
            }
            _ => panic!("expected a reply"),
        }
    }

    #[tokio::test]
    async fn test_mnt_unexported_then_registered() {
        let handler = MountdHandler::new();

        let res = decode_mnt(handler.dispatch(MOUNTPROC3_MNT, mnt_args("/x")).await);
        assert_eq!(res, MountRes3::NoEnt);

        handler
            .register(MountPath::new("/x").unwrap(), InodeNumber::from_raw(7))
            .await;

        let res = decode_mnt(handler.dispatch(MOUNTPROC3_MNT, mnt_args("/x")).await);
        match res {
            MountRes3::Ok(ok) => {
                assert_eq!(ok.fhandle.as_bytes(), &7u64.to_le_bytes());
                assert_eq!(ok.auth_flavors, vec![AUTH_NONE, AUTH_SYS]);
            }
            other => panic!("expected MNT3_OK, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mnt_canonicalizes_before_lookup() {
        let handler = MountdHandler::new();
        handler
            .register(MountPath::new("/data/repo").unwrap(), InodeNumber::ROOT)
            .await;

        let res = decode_mnt(
            handler
                .dispatch(MOUNTPROC3_MNT, mnt_args("/data//./repo/"))
                .await,
        );
        assert!(matches!(res, MountRes3::Ok(_)));
    }

    #[tokio::test]
    async fn test_mnt_relative_path_is_inval() {
        let handler = MountdHandler::new();
        let res = decode_mnt(handler.dispatch(MOUNTPROC3_MNT, mnt_args("repo")).await);
        assert_eq!(res, MountRes3::Inval);
    }

    #[tokio::test]
    async fn test_mnt_overlong_path_is_nametoolong() {
        let handler = MountdHandler::new();
        let long = format!("/{}", "a".repeat(MNTPATHLEN + 10));
        let res = decode_mnt(handler.dispatch(MOUNTPROC3_MNT, mnt_args(&long)).await);
        assert_eq!(res, MountRes3::NameTooLong);
    }

    #[tokio::test]
    async fn test_mnt_garbage_args() {
        let handler = MountdHandler::new();
        let result = handler
            .dispatch(MOUNTPROC3_MNT, Bytes::from_static(&[0, 0]))
            .await;
        assert!(matches!(result, DispatchResult::GarbageArgs));
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let handler = MountdHandler::new();
        let path = MountPath::new("/x").unwrap();
        handler.register(path.clone(), InodeNumber::from_raw(7)).await;
        handler.register(path.clone(), InodeNumber::from_raw(9)).await;
        assert_eq!(handler.num_exports().await, 1);

        let res = decode_mnt(handler.dispatch(MOUNTPROC3_MNT, mnt_args("/x")).await);
        match res {
            MountRes3::Ok(ok) => assert_eq!(ok.fhandle.as_bytes(), &9u64.to_le_bytes()),
            other => panic!("expected MNT3_OK, got {:?}", other),
        }

        handler.unregister(&path).await;
        handler.unregister(&path).await;
        assert_eq!(handler.num_exports().await, 0);
    }

    #[tokio::test]
    async fn test_dump_is_always_empty() {
        let handler = MountdHandler::new();
        handler
            .register(MountPath::new("/x").unwrap(), InodeNumber::ROOT)
            .await;
        match handler.dispatch(MOUNTPROC3_DUMP, Bytes::new()).await {
            DispatchResult::Reply(bytes) => {
                let ((rest, _), list) = MountList::from_bytes((bytes.as_ref(), 0)).unwrap();
                assert!(rest.is_empty());
                assert!(list.entries.0.is_empty());
            }
            _ => panic!("expected a reply"),
        }
    }

    #[tokio::test]
    async fn test_umnt_and_umntall_return_void() {
        let handler = MountdHandler::new();
        match handler.dispatch(MOUNTPROC3_UMNT, mnt_args("/gone")).await {
            DispatchResult::Reply(bytes) => assert!(bytes.is_empty()),
            _ => panic!("expected a reply"),
        }
        match handler.dispatch(MOUNTPROC3_UMNTALL, Bytes::new()).await {
            DispatchResult::Reply(bytes) => assert!(bytes.is_empty()),
            _ => panic!("expected a reply"),
        }
    }

    #[tokio::test]
    async fn test_export_lists_registered_paths_sorted() {
        let handler = MountdHandler::new();
        handler
            .register(MountPath::new("/b").unwrap(), InodeNumber::ROOT)
            .await;
        handler
            .register(MountPath::new("/a").unwrap(), InodeNumber::ROOT)
            .await;

        match handler.dispatch(MOUNTPROC3_EXPORT, Bytes::new()).await {
            DispatchResult::Reply(bytes) => {
                let ((rest, _), list) = ExportList::from_bytes((bytes.as_ref(), 0)).unwrap();
                assert!(rest.is_empty());
                let paths: Vec<&str> = list
                    .entries
                    .0
                    .iter()
                    .map(|node| node.dirpath.as_str())
                    .collect();
                assert_eq!(paths, vec!["/a", "/b"]);
                assert_eq!(list.entries.0[0].groups.0[0].name.as_str(), "*");
            }
            _ => panic!("expected a reply"),
        }
    }

    #[tokio::test]
    async fn test_unknown_procedure() {
        let handler = MountdHandler::new();
        let result = handler.dispatch(42, Bytes::new()).await;
        assert!(matches!(result, DispatchResult::ProcUnavail));
    }
}
