//! Typed RPC endpoints
//!
//! Every remote service is a type implementing `RpcEndpoint`. The sender
//! and the handler agree on the request/response types at compile time;
//! on the wire they are postcard-encoded byte strings. The handler table
//! erases the types behind `ErasedHandler` so one table serves them all.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::hash::BuildHasherDefault;
use hashbrown::HashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use siphasher::sip::SipHasher13;

use super::error::{RpcError, RpcResult};
use super::message::{RpcId, RpcPriority};
use crate::cluster::{ClusterId, GlobalCpuId};
use crate::scheduler::ThreadId;

/// What a handler knows about the call it serves
#[derive(Debug, Clone, Copy)]
pub struct RpcContext {
    /// CPU executing the handler
    pub cpu: GlobalCpuId,
    /// Thread executing the handler (holder of the listener token)
    pub drainer: ThreadId,
    /// CPU that sent the request
    pub origin: GlobalCpuId,
    /// Thread that sent the request
    pub sender: ThreadId,
    pub priority: RpcPriority,
}

impl RpcContext {
    pub fn cluster(&self) -> ClusterId {
        self.cpu.cluster()
    }
}

/// A remote service
pub trait RpcEndpoint: Send + Sync + 'static {
    const ID: RpcId;
    const NAME: &'static str;
    const PRIORITY: RpcPriority;

    type Request: Serialize + DeserializeOwned;
    type Response: Serialize + DeserializeOwned;

    fn handle(&self, ctx: &RpcContext, request: Self::Request) -> Self::Response;
}

/// Type-erased handler stored in the table
pub trait ErasedHandler: Send + Sync {
    fn id(&self) -> RpcId;
    fn name(&self) -> &'static str;
    fn priority(&self) -> RpcPriority;
    /// Decode `payload`, run the endpoint, encode its response
    fn invoke(&self, ctx: &RpcContext, payload: &[u8]) -> RpcResult<Vec<u8>>;
}

struct Typed<E>(E);

impl<E: RpcEndpoint> ErasedHandler for Typed<E> {
    fn id(&self) -> RpcId {
        E::ID
    }

    fn name(&self) -> &'static str {
        E::NAME
    }

    fn priority(&self) -> RpcPriority {
        E::PRIORITY
    }

    fn invoke(&self, ctx: &RpcContext, payload: &[u8]) -> RpcResult<Vec<u8>> {
        let request: E::Request = postcard::from_bytes(payload).map_err(|_| RpcError::Decode)?;
        let response = self.0.handle(ctx, request);
        postcard::to_allocvec(&response).map_err(|_| RpcError::Encode)
    }
}

type HandlerMap = HashMap<RpcId, Arc<dyn ErasedHandler>, BuildHasherDefault<SipHasher13>>;

/// Endpoint id -> handler
///
/// Identical on every cluster: endpoints are registered at boot, before
/// the first call is issued.
pub struct HandlerTable {
    map: spin::RwLock<HandlerMap>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self {
            map: spin::RwLock::new(HashMap::with_hasher(Default::default())),
        }
    }

    pub fn register<E: RpcEndpoint>(&self, endpoint: E) -> RpcResult<()> {
        let mut map = self.map.write();
        if map.contains_key(&E::ID) {
            return Err(RpcError::EndpointAlreadyRegistered { id: E::ID.0 });
        }
        map.insert(E::ID, Arc::new(Typed(endpoint)));
        log::debug!("rpc: registered {} as {} ({:?})", E::NAME, E::ID, E::PRIORITY);
        Ok(())
    }

    pub fn get(&self, id: RpcId) -> Option<Arc<dyn ErasedHandler>> {
        self.map.read().get(&id).cloned()
    }

    pub fn contains(&self, id: RpcId) -> bool {
        self.map.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Double;

    impl RpcEndpoint for Double {
        const ID: RpcId = RpcId(100);
        const NAME: &'static str = "double";
        const PRIORITY: RpcPriority = RpcPriority::Normal;
        type Request = u32;
        type Response = u64;

        fn handle(&self, _ctx: &RpcContext, request: u32) -> u64 {
            request as u64 * 2
        }
    }

    fn ctx() -> RpcContext {
        RpcContext {
            cpu: GlobalCpuId(0),
            drainer: ThreadId(1),
            origin: GlobalCpuId(4),
            sender: ThreadId(2),
            priority: RpcPriority::Normal,
        }
    }

    #[test]
    fn test_register_and_invoke() {
        let table = HandlerTable::new();
        table.register(Double).unwrap();
        assert_eq!(table.register(Double), Err(RpcError::EndpointAlreadyRegistered { id: 100 }));

        let handler = table.get(RpcId(100)).unwrap();
        assert_eq!(handler.name(), "double");
        let payload = postcard::to_allocvec(&21u32).unwrap();
        let out = handler.invoke(&ctx(), &payload).unwrap();
        assert_eq!(postcard::from_bytes::<u64>(&out).unwrap(), 42);
        assert!(table.get(RpcId(7)).is_none());
    }

    #[test]
    fn test_garbage_payload_is_a_decode_error() {
        let table = HandlerTable::new();
        table.register(Double).unwrap();
        let handler = table.get(RpcId(100)).unwrap();
        assert_eq!(handler.invoke(&ctx(), &[]).err(), Some(RpcError::Decode));
    }
}
