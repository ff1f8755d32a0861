//! MCP JSON-RPC dispatch.

mod dispatch;
pub mod wire;

pub use dispatch::{RpcReply, handle_rpc};
