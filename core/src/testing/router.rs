//! Router double and the stack factory for tests.

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::runtime::{
    DeliveryCallback, InboundDestination, LocalIdentity, LxMessage, MeshStack, MessageRouter,
    RouterError, Transport, TransportError, DELIVERY_APP, DELIVERY_ASPECT,
};

use super::mesh::{MeshState, TestTransport};

/// In-memory router: queues outbound messages for inspection and loops
/// local deliveries straight back through the delivery callback.
pub struct TestRouter {
    transport: Arc<TestTransport>,
    delivery_callback: Mutex<Option<DeliveryCallback>>,
    outbox: Mutex<Vec<LxMessage>>,
}

impl TestRouter {
    /// Outbound messages handed to this router, in order.
    pub fn outbox(&self) -> Vec<LxMessage> {
        self.outbox.lock().unwrap().clone()
    }
}

impl MessageRouter for TestRouter {
    fn register_delivery_identity(
        &self,
        identity: &LocalIdentity,
        _display_name: &str,
        _stamp_cost: Option<u8>,
    ) -> Result<Arc<dyn InboundDestination>, RouterError> {
        self.transport
            .register_inbound(identity, DELIVERY_APP, DELIVERY_ASPECT)
            .map_err(|e| RouterError::RegisterFailed(e.to_string()))
    }

    fn register_delivery_callback(&self, callback: DeliveryCallback) {
        *self.delivery_callback.lock().unwrap() = Some(callback);
    }

    fn handle_outbound(&self, message: LxMessage) {
        self.outbox.lock().unwrap().push(message);
    }

    fn local_delivery(&self, packed: Vec<u8>) -> bool {
        let Ok(message) = LxMessage::unpack(&packed) else {
            return false;
        };
        let guard = self.delivery_callback.lock().unwrap();
        match guard.as_ref() {
            Some(callback) => {
                callback(message);
                true
            }
            None => false,
        }
    }

    fn exit(&self) {}
}

/// Per-node factory handing out one transport and its routers.
pub struct TestStack {
    mesh: Arc<MeshState>,
    transport: Mutex<Option<Arc<TestTransport>>>,
    router: Mutex<Option<Arc<TestRouter>>>,
}

impl TestStack {
    pub(crate) fn new(mesh: Arc<MeshState>) -> Self {
        Self {
            mesh,
            transport: Mutex::new(None),
            router: Mutex::new(None),
        }
    }

    /// The transport once opened.
    pub fn transport(&self) -> Option<Arc<TestTransport>> {
        self.transport.lock().unwrap().clone()
    }

    /// Length of the current router's outbox.
    pub fn outbox_len(&self) -> usize {
        self.router
            .lock()
            .unwrap()
            .as_ref()
            .map(|router| router.outbox().len())
            .unwrap_or(0)
    }
}

impl MeshStack for TestStack {
    fn open_transport(
        &self,
        config_dir: &Path,
        _log_level: u8,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let mut guard = self.transport.lock().unwrap();
        if let Some(transport) = guard.as_ref() {
            return Ok(transport.clone());
        }

        let transport = {
            let mut transports = self.mesh.transports.lock().unwrap();
            let transport = Arc::new(TestTransport::new(
                self.mesh.clone(),
                transports.len(),
                config_dir.to_path_buf(),
            ));
            transports.push(transport.clone());
            transport
        };
        *guard = Some(transport.clone());
        Ok(transport)
    }

    fn open_router(
        &self,
        _identity: &LocalIdentity,
        _storage_dir: &Path,
    ) -> Result<Arc<dyn MessageRouter>, RouterError> {
        let transport = self
            .transport
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| RouterError::RegisterFailed("transport not open".into()))?;

        let router = Arc::new(TestRouter {
            transport,
            delivery_callback: Mutex::new(None),
            outbox: Mutex::new(Vec::new()),
        });
        *self.router.lock().unwrap() = Some(router.clone());
        Ok(router)
    }
}
