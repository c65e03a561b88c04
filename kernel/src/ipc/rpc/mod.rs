//! Remote procedure calls between clusters
//!
//! The only way a cluster touches state owned by another cluster (apart
//! from the remote word helpers). Requests are queued in the target's
//! remote FIFOs and served by whichever thread of the target currently
//! holds the listener token.

pub mod endpoint;
pub mod error;
pub mod listener;
pub mod manager;
pub mod message;
pub mod transport;

pub use endpoint::{HandlerTable, RpcContext, RpcEndpoint};
pub use error::{RpcError, RpcResult};
pub use listener::RpcListener;
pub use manager::{ManagerAction, RpcManager};
pub use message::{ResponseSlot, RpcDescriptor, RpcId, RpcMessage, RpcPriority, RpcTarget};
pub use transport::{RpcStatsSnapshot, RpcTransport};
