//! Internal unary RPC: length-prefixed JSON frames POSTed over HTTP/2 to
//! `/<package.Service>/<Method>`, status in `rpc-status` / `rpc-message`.

pub mod client;
pub mod codec;
pub mod messages;
pub mod server;
pub mod status;

pub use client::RpcClient;
pub use server::{RpcReply, RpcRequest, RpcResult};
pub use status::{Code, RpcError};
