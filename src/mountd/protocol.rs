//! ONC-RPC (RFC 1831) and MOUNT v3 (RFC 1813) wire structures. All
//! integers are big-endian per XDR; variable-length items go through
//! the padded types in `xdr`.

use crate::mountd::xdr::{XdrList, XdrOpaque, XdrString};
use deku::prelude::*;

pub const RPC_VERSION: u32 = 2;

pub const MSG_CALL: u32 = 0;
pub const MSG_REPLY: u32 = 1;

pub const REPLY_ACCEPTED: u32 = 0;
pub const REPLY_DENIED: u32 = 1;

// accept_stat
pub const ACCEPT_SUCCESS: u32 = 0;
pub const ACCEPT_PROG_UNAVAIL: u32 = 1;
pub const ACCEPT_PROG_MISMATCH: u32 = 2;
pub const ACCEPT_PROC_UNAVAIL: u32 = 3;
pub const ACCEPT_GARBAGE_ARGS: u32 = 4;
pub const ACCEPT_SYSTEM_ERR: u32 = 5;

// reject_stat
pub const REJECT_RPC_MISMATCH: u32 = 0;
pub const REJECT_AUTH_ERROR: u32 = 1;

// auth_stat
pub const AUTH_REJECTEDCRED: u32 = 2;

// auth flavors
pub const AUTH_NONE: u32 = 0;
pub const AUTH_SYS: u32 = 1;

pub const MOUNT_PROGRAM: u32 = 100005;
pub const MOUNT_V3: u32 = 3;

pub const MOUNTPROC3_NULL: u32 = 0;
pub const MOUNTPROC3_MNT: u32 = 1;
pub const MOUNTPROC3_DUMP: u32 = 2;
pub const MOUNTPROC3_UMNT: u32 = 3;
pub const MOUNTPROC3_UMNTALL: u32 = 4;
pub const MOUNTPROC3_EXPORT: u32 = 5;

pub const MNTPATHLEN: usize = 1024;
pub const FHSIZE3: usize = 64;

pub const MNT3_OK: u32 = 0;
pub const MNT3ERR_PERM: u32 = 1;
pub const MNT3ERR_NOENT: u32 = 2;
pub const MNT3ERR_IO: u32 = 5;
pub const MNT3ERR_ACCES: u32 = 13;
pub const MNT3ERR_NOTDIR: u32 = 20;
pub const MNT3ERR_INVAL: u32 = 22;
pub const MNT3ERR_NAMETOOLONG: u32 = 63;
pub const MNT3ERR_NOTSUPP: u32 = 10004;
pub const MNT3ERR_SERVERFAULT: u32 = 10006;

#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
pub struct OpaqueAuth {
    #[deku(endian = "big")]
    pub flavor: u32,
    pub body: XdrOpaque,
}

impl OpaqueAuth {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Everything of an RPC call up to the procedure arguments. The args
/// are the unparsed remainder of the record; the addressed program
/// decodes them.
#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
pub struct RpcCallHeader {
    #[deku(endian = "big")]
    pub xid: u32,
    #[deku(endian = "big")]
    pub msg_type: u32,
    #[deku(endian = "big")]
    pub rpcvers: u32,
    #[deku(endian = "big")]
    pub prog: u32,
    #[deku(endian = "big")]
    pub vers: u32,
    #[deku(endian = "big")]
    pub proc: u32,
    pub cred: OpaqueAuth,
    pub verf: OpaqueAuth,
}

/// Prefix of every accepted reply; procedure results or mismatch info
/// follow depending on `accept_stat`.
#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
pub struct AcceptedReplyHeader {
    #[deku(endian = "big")]
    pub xid: u32,
    #[deku(endian = "big")]
    pub msg_type: u32,
    #[deku(endian = "big")]
    pub reply_stat: u32,
    pub verf: OpaqueAuth,
    #[deku(endian = "big")]
    pub accept_stat: u32,
}

impl AcceptedReplyHeader {
    pub fn new(xid: u32, accept_stat: u32) -> Self {
        Self {
            xid,
            msg_type: MSG_REPLY,
            reply_stat: REPLY_ACCEPTED,
            verf: OpaqueAuth::none(),
            accept_stat,
        }
    }
}

/// Prefix of a denied reply; `MismatchInfo` or an auth_stat word
/// follows depending on `reject_stat`.
#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
pub struct DeniedReplyHeader {
    #[deku(endian = "big")]
    pub xid: u32,
    #[deku(endian = "big")]
    pub msg_type: u32,
    #[deku(endian = "big")]
    pub reply_stat: u32,
    #[deku(endian = "big")]
    pub reject_stat: u32,
}

impl DeniedReplyHeader {
    pub fn new(xid: u32, reject_stat: u32) -> Self {
        Self {
            xid,
            msg_type: MSG_REPLY,
            reply_stat: REPLY_DENIED,
            reject_stat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, DekuRead, DekuWrite)]
pub struct MismatchInfo {
    #[deku(endian = "big")]
    pub low: u32,
    #[deku(endian = "big")]
    pub high: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
pub struct MountCall {
    pub dirpath: XdrString,
}

#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
pub struct MountResOk {
    pub fhandle: XdrOpaque,
    #[deku(endian = "big", update = "self.auth_flavors.len()")]
    flavor_count: u32,
    #[deku(endian = "big", count = "flavor_count")]
    pub auth_flavors: Vec<u32>,
}

impl MountResOk {
    pub fn new(fhandle: impl Into<XdrOpaque>, auth_flavors: Vec<u32>) -> Self {
        Self {
            fhandle: fhandle.into(),
            flavor_count: auth_flavors.len() as u32,
            auth_flavors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(id_type = "u32", id_endian = "big")]
pub enum MountRes3 {
    #[deku(id = "0")]
    Ok(MountResOk),
    #[deku(id = "1")]
    Perm,
    #[deku(id = "2")]
    NoEnt,
    #[deku(id = "5")]
    Io,
    #[deku(id = "13")]
    Acces,
    #[deku(id = "20")]
    NotDir,
    #[deku(id = "22")]
    Inval,
    #[deku(id = "63")]
    NameTooLong,
    #[deku(id = "10004")]
    NotSupp,
    #[deku(id = "10006")]
    ServerFault,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
pub struct MountListEntry {
    pub hostname: XdrString,
    pub dirpath: XdrString,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
pub struct GroupNode {
    pub name: XdrString,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
pub struct ExportNode {
    pub dirpath: XdrString,
    pub groups: XdrList<GroupNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
pub struct MountList {
    pub entries: XdrList<MountListEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, DekuRead, DekuWrite)]
pub struct ExportList {
    pub entries: XdrList<ExportNode>,
}
