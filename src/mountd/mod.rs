//! MOUNT v3 daemon: XDR codec, ONC-RPC wire types, the TCP server
//! runtime, the mount procedure handler, and the rpcbind client.

pub mod handler;
pub mod protocol;
pub mod rpcbind;
pub mod server;
pub mod xdr;

pub use handler::MountdHandler;
pub use server::{DispatchResult, MountServer, RpcProgram};
