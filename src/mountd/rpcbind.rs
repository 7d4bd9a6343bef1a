//! Minimal rpcbind v4 client (RFC 1833). Only SET and UNSET are
//! spoken, enough to advertise the MOUNT program to `showmount` and
//! mount(8) without a fixed port.

use crate::mountd::protocol::{
    ACCEPT_SUCCESS, AcceptedReplyHeader, MSG_CALL, OpaqueAuth, REPLY_ACCEPTED, RPC_VERSION,
    RpcCallHeader,
};
use crate::mountd::server::{read_record, write_record};
use crate::mountd::xdr::XdrString;
use deku::prelude::*;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

pub const RPCBIND_PROGRAM: u32 = 100000;
pub const RPCBIND_V4: u32 = 4;
pub const RPCBPROC_SET: u32 = 1;
pub const RPCBPROC_UNSET: u32 = 2;

const RPCBIND_ADDR: &str = "127.0.0.1:111";
const RPCBIND_TIMEOUT: Duration = Duration::from_secs(2);

static NEXT_XID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
struct Rpcb {
    #[deku(endian = "big")]
    prog: u32,
    #[deku(endian = "big")]
    vers: u32,
    netid: XdrString,
    addr: XdrString,
    owner: XdrString,
}

/// rpcbind universal address for a TCP endpoint: dotted quad followed
/// by the port's high and low bytes.
pub fn universal_addr(addr: SocketAddr) -> String {
    let port = addr.port();
    format!("{}.{}.{}", addr.ip(), port >> 8, port & 0xff)
}

/// Advertises `(prog, vers, tcp)` at `addr` with the local rpcbind.
pub async fn set(prog: u32, vers: u32, addr: SocketAddr) -> anyhow::Result<()> {
    let rpcb = Rpcb {
        prog,
        vers,
        netid: XdrString::new("tcp"),
        addr: XdrString::new(universal_addr(addr)),
        owner: XdrString::new(""),
    };
    let accepted = call(RPCBPROC_SET, &rpcb).await?;
    if !accepted {
        anyhow::bail!("rpcbind refused SET for program {} version {}", prog, vers);
    }
    Ok(())
}

/// Withdraws a previous [`set`] registration.
pub async fn unset(prog: u32, vers: u32) -> anyhow::Result<()> {
    let rpcb = Rpcb {
        prog,
        vers,
        netid: XdrString::new("tcp"),
        addr: XdrString::new(""),
        owner: XdrString::new(""),
    };
    let accepted = call(RPCBPROC_UNSET, &rpcb).await?;
    if !accepted {
        anyhow::bail!(
            "rpcbind refused UNSET for program {} version {}",
            prog,
            vers
        );
    }
    Ok(())
}

async fn call(proc: u32, rpcb: &Rpcb) -> anyhow::Result<bool> {
    let xid = NEXT_XID.fetch_add(1, AtomicOrdering::Relaxed);
    let mut record = RpcCallHeader {
        xid,
        msg_type: MSG_CALL,
        rpcvers: RPC_VERSION,
        prog: RPCBIND_PROGRAM,
        vers: RPCBIND_V4,
        proc,
        cred: OpaqueAuth::none(),
        verf: OpaqueAuth::none(),
    }
    .to_bytes()?;
    record.extend_from_slice(&rpcb.to_bytes()?);

    let io = async {
        let mut stream = TcpStream::connect(RPCBIND_ADDR).await?;
        write_record(&mut stream, &record).await?;
        read_record(&mut stream).await
    };
    let reply = tokio::time::timeout(RPCBIND_TIMEOUT, io)
        .await
        .map_err(|_| anyhow::anyhow!("rpcbind call timed out"))??
        .ok_or_else(|| anyhow::anyhow!("rpcbind closed the connection without replying"))?;

    let ((rest, _), header) = AcceptedReplyHeader::from_bytes((&reply[..], 0))?;
    debug!("rpcbind proc {} xid {} replied {:?}", proc, xid, header);
    if header.xid != xid
        || header.reply_stat != REPLY_ACCEPTED
        || header.accept_stat != ACCEPT_SUCCESS
    {
        anyhow::bail!("rpcbind rejected the call: {:?}", header);
    }
    if rest.len() < 4 {
        anyhow::bail!("rpcbind reply missing the result boolean");
    }
    Ok(u32::from_be_bytes(rest[..4].try_into()?) == 1)
}
