use crate::fs::inode::InodeNumber;
use crate::mountd::handler::MountdHandler;
use crate::mountd::protocol::{
    ACCEPT_GARBAGE_ARGS, ACCEPT_PROC_UNAVAIL, ACCEPT_PROG_MISMATCH, ACCEPT_PROG_UNAVAIL,
    ACCEPT_SUCCESS, AUTH_NONE, AUTH_REJECTEDCRED, AUTH_SYS, AcceptedReplyHeader, DeniedReplyHeader,
    MOUNT_PROGRAM, MOUNT_V3, MSG_CALL, MismatchInfo, REJECT_AUTH_ERROR, REJECT_RPC_MISMATCH,
    RPC_VERSION, RpcCallHeader,
};
use crate::mountd::rpcbind;
use crate::path::MountPath;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use deku::prelude::*;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Record-marking last-fragment flag (RFC 1831 §10).
const LAST_FRAGMENT: u32 = 0x8000_0000;
/// Cap on one assembled record, applied across fragments.
const MAX_RECORD_BYTES: usize = 64 * 1024;

pub enum DispatchResult {
    /// Successfully decoded and executed; the bytes are the XDR-encoded
    /// procedure results.
    Reply(Bytes),
    /// The procedure number is not part of this program version.
    ProcUnavail,
    /// The arguments did not decode.
    GarbageArgs,
}

/// One RPC program servable by [`MountServer`]. Implementations decode
/// their own arguments from the raw record remainder.
#[async_trait]
pub trait RpcProgram: Send + Sync {
    fn program(&self) -> u32;
    /// Inclusive `(low, high)` version range.
    fn version_range(&self) -> (u32, u32);
    async fn dispatch(&self, proc: u32, args: Bytes) -> DispatchResult;
}

/// TCP ONC-RPC server hosting the MOUNT v3 program (and any extra
/// programs handed to [`bind_with_programs`](Self::bind_with_programs)).
/// Requests on one connection are processed strictly in order, so
/// replies can never overtake each other.
pub struct MountServer {
    local_addr: SocketAddr,
    mountd: Option<Arc<MountdHandler>>,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
    registered: bool,
}

impl MountServer {
    pub async fn bind(addr: SocketAddr, register_with_rpcbind: bool) -> anyhow::Result<Self> {
        let mountd = Arc::new(MountdHandler::new());
        let programs: Vec<Arc<dyn RpcProgram>> = vec![mountd.clone()];
        let mut server = Self::bind_with_programs(addr, programs, register_with_rpcbind).await?;
        server.mountd = Some(mountd);
        Ok(server)
    }

    pub async fn bind_with_programs(
        addr: SocketAddr,
        programs: Vec<Arc<dyn RpcProgram>>,
        register_with_rpcbind: bool,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("mount server listening on {}", local_addr);

        let mut registered = false;
        if register_with_rpcbind {
            match rpcbind::set(MOUNT_PROGRAM, MOUNT_V3, local_addr).await {
                Ok(()) => {
                    info!("registered MOUNT v3 with rpcbind at {}", local_addr);
                    registered = true;
                }
                // The mount still works for clients that connect to the
                // port directly.
                Err(e) => warn!("rpcbind registration failed: {}", e),
            }
        }

        let shutdown = CancellationToken::new();
        let programs = Arc::new(programs);
        let accept_shutdown = shutdown.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_shutdown.cancelled() => {
                        info!("mount server shutting down on {}", local_addr);
                        break;
                    }
                    result = listener.accept() => {
                        let (stream, peer_addr) = match result {
                            Ok(pair) => pair,
                            Err(e) => {
                                error!("accept failed: {}", e);
                                continue;
                            }
                        };
                        info!("rpc client connected from {}", peer_addr);

                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("set_nodelay failed for {}: {}", peer_addr, e);
                        }

                        let programs = Arc::clone(&programs);
                        let conn_shutdown = accept_shutdown.child_token();
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_connection(stream, programs, conn_shutdown).await
                            {
                                error!("error handling rpc client {}: {}", peer_addr, e);
                            }
                        });
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            mountd: None,
            shutdown,
            accept_task,
            registered,
        })
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Makes `path` mountable, answering MNT with a handle for
    /// `root_ino`. Re-registering the same path replaces the inode.
    pub async fn register_mount(&self, path: MountPath, root_ino: InodeNumber) {
        if let Some(mountd) = &self.mountd {
            mountd.register(path, root_ino).await;
        }
    }

    pub async fn unregister_mount(&self, path: &MountPath) {
        if let Some(mountd) = &self.mountd {
            mountd.unregister(path).await;
        }
    }

    pub async fn shutdown(self) {
        if self.registered {
            if let Err(e) = rpcbind::unset(MOUNT_PROGRAM, MOUNT_V3).await {
                warn!("rpcbind unregistration failed: {}", e);
            }
        }
        self.shutdown.cancel();
        let _ = self.accept_task.await;
    }
}

async fn handle_connection<S>(
    stream: S,
    programs: Arc<Vec<Arc<dyn RpcProgram>>>,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut read_stream, mut write_stream) = tokio::io::split(stream);

    loop {
        let record = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("rpc connection handler shutting down");
                return Ok(());
            }
            result = read_record(&mut read_stream) => result?,
        };

        let record = match record {
            Some(record) => record,
            None => {
                debug!("rpc client disconnected");
                return Ok(());
            }
        };

        let reply = match process_record(&record, &programs).await? {
            Some(reply) => reply,
            // Unparseable or non-call record: drop the connection
            // without a reply, the xid cannot be trusted.
            None => return Ok(()),
        };

        write_record(&mut write_stream, &reply).await?;
    }
}

/// Reads one record-marked message. `Ok(None)` on orderly close, which
/// includes a client that gives up mid-record.
pub(crate) async fn read_record<R>(reader: &mut R) -> anyhow::Result<Option<BytesMut>>
where
    R: AsyncRead + Unpin,
{
    let mut record = BytesMut::new();
    loop {
        let mut mark = [0u8; 4];
        match reader.read_exact(&mut mark).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                if !record.is_empty() {
                    debug!("client closed mid-record, dropping partial message");
                }
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let mark = u32::from_be_bytes(mark);
        let last = mark & LAST_FRAGMENT != 0;
        let len = (mark & !LAST_FRAGMENT) as usize;

        if record.len() + len > MAX_RECORD_BYTES {
            anyhow::bail!(
                "rpc record exceeds {} byte cap ({} + {} fragment)",
                MAX_RECORD_BYTES,
                record.len(),
                len
            );
        }

        let start = record.len();
        record.resize(start + len, 0);
        match reader.read_exact(&mut record[start..]).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("client closed mid-fragment, dropping partial message");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        if last {
            return Ok(Some(record));
        }
    }
}

pub(crate) async fn write_record<W>(writer: &mut W, payload: &[u8]) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mark = LAST_FRAGMENT | payload.len() as u32;
    writer.write_all(&mark.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Parses and dispatches one call. `Ok(None)` means the record was not
/// a usable call and the connection should close.
async fn process_record(
    record: &[u8],
    programs: &[Arc<dyn RpcProgram>],
) -> anyhow::Result<Option<Vec<u8>>> {
    let (header, args) = match RpcCallHeader::from_bytes((record, 0)) {
        Ok(((rest, _), header)) => (header, Bytes::copy_from_slice(rest)),
        Err(e) => {
            warn!("unparseable rpc record: {:?}", e);
            return Ok(None);
        }
    };

    if header.msg_type != MSG_CALL {
        warn!("received non-call message type {}", header.msg_type);
        return Ok(None);
    }

    if header.rpcvers != RPC_VERSION {
        debug!("rejecting rpc version {}", header.rpcvers);
        let mut reply = DeniedReplyHeader::new(header.xid, REJECT_RPC_MISMATCH).to_bytes()?;
        reply.extend_from_slice(
            &MismatchInfo {
                low: RPC_VERSION,
                high: RPC_VERSION,
            }
            .to_bytes()?,
        );
        return Ok(Some(reply));
    }

    if header.cred.flavor != AUTH_NONE && header.cred.flavor != AUTH_SYS {
        debug!("rejecting credential flavor {}", header.cred.flavor);
        let mut reply = DeniedReplyHeader::new(header.xid, REJECT_AUTH_ERROR).to_bytes()?;
        reply.extend_from_slice(&AUTH_REJECTEDCRED.to_be_bytes());
        return Ok(Some(reply));
    }

    let program = match programs.iter().find(|p| p.program() == header.prog) {
        Some(program) => program,
        None => {
            debug!("program {} unavailable", header.prog);
            return Ok(Some(
                AcceptedReplyHeader::new(header.xid, ACCEPT_PROG_UNAVAIL).to_bytes()?,
            ));
        }
    };

    let (low, high) = program.version_range();
    if header.vers < low || header.vers > high {
        debug!(
            "program {} version {} outside [{}, {}]",
            header.prog, header.vers, low, high
        );
        let mut reply = AcceptedReplyHeader::new(header.xid, ACCEPT_PROG_MISMATCH).to_bytes()?;
        reply.extend_from_slice(&MismatchInfo { low, high }.to_bytes()?);
        return Ok(Some(reply));
    }

    let reply = match program.dispatch(header.proc, args).await {
        DispatchResult::Reply(body) => {
            let mut reply = AcceptedReplyHeader::new(header.xid, ACCEPT_SUCCESS).to_bytes()?;
            reply.extend_from_slice(&body);
            reply
        }
        DispatchResult::ProcUnavail => {
            AcceptedReplyHeader::new(header.xid, ACCEPT_PROC_UNAVAIL).to_bytes()?
        }
        DispatchResult::GarbageArgs => {
            AcceptedReplyHeader::new(header.xid, ACCEPT_GARBAGE_ARGS).to_bytes()?
        }
    };
    Ok(Some(reply))
}
