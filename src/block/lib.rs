//! Storage node side of Hangar: the on-disk block store, the data-channel
//! RPC surface, and the node runtime (servers + heartbeats).
#[macro_use]
extern crate tracing;

pub mod node;
pub mod rpc_client;
pub mod rpc_server;
pub mod store;

pub use node::StorageNode;
pub use rpc_client::DataRpcClient;
pub use rpc_server::{BlockOpResponse, DataRpcServer};
pub use store::BlockStore;
