//! In-memory mesh simulating the transport contract.
//!
//! All transports created from one [`TestMesh`] share a registry of
//! destinations, recalled identities, paths, and active links, so several
//! nodes can announce to, link to, and fetch from each other entirely
//! in-process. Interface status is scriptable per transport, and
//! halt/resume/reload calls are recorded for assertions.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rmpv::Value;

use crate::node::core::Node;
use crate::runtime::{
    destination_hash, AnnounceObserver, ConcludedResource, DestinationHash, InboundDestination,
    InboundRequest, InterfaceStatus, Link, LinkId, LocalIdentity, RecalledIdentity,
    RequestHandler, ResourceConcluded, Transport, TransportError,
};

static RESOURCE_FILE_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Shared state of one simulated mesh.
pub(crate) struct MeshState {
    pub(crate) destinations: Mutex<HashMap<DestinationHash, Arc<TestDestination>>>,
    recall: Mutex<HashMap<DestinationHash, RecalledIdentity>>,
    paths: Mutex<HashSet<DestinationHash>>,
    links: Mutex<HashMap<LinkId, Arc<TestLink>>>,
    pub(crate) transports: Mutex<Vec<Arc<TestTransport>>>,
    announce_counts: Mutex<HashMap<DestinationHash, usize>>,
    last_app_data: Mutex<HashMap<DestinationHash, Vec<u8>>>,
    resources_sent: AtomicUsize,
    links_opened: AtomicUsize,
}

/// Handle to a simulated mesh.
pub struct TestMesh {
    pub(crate) state: Arc<MeshState>,
}

impl TestMesh {
    /// Create an empty mesh.
    pub fn new() -> Self {
        Self {
            state: Arc::new(MeshState {
                destinations: Mutex::new(HashMap::new()),
                recall: Mutex::new(HashMap::new()),
                paths: Mutex::new(HashSet::new()),
                links: Mutex::new(HashMap::new()),
                transports: Mutex::new(Vec::new()),
                announce_counts: Mutex::new(HashMap::new()),
                last_app_data: Mutex::new(HashMap::new()),
                resources_sent: AtomicUsize::new(0),
                links_opened: AtomicUsize::new(0),
            }),
        }
    }

    /// A fresh stack for one node on this mesh.
    pub fn stack(&self) -> Arc<super::TestStack> {
        Arc::new(super::TestStack::new(self.state.clone()))
    }

    /// How many announces the destination has emitted.
    pub fn announce_count(&self, destination: &DestinationHash) -> usize {
        self.state
            .announce_counts
            .lock()
            .unwrap()
            .get(destination)
            .copied()
            .unwrap_or(0)
    }

    /// Total resource transfers started on this mesh.
    pub fn resource_count(&self) -> usize {
        self.state.resources_sent.load(Ordering::Acquire)
    }

    /// Total links ever opened on this mesh.
    pub fn links_opened(&self) -> usize {
        self.state.links_opened.load(Ordering::Acquire)
    }

    /// Emit an announce for the node's delivery destination directly,
    /// bypassing the engine's readiness gating.
    pub fn announce_now(node: &Node) {
        let app_data = node.inner.compose_announce_app_data();
        let delivery = node.inner.delivery_in.read().unwrap().clone();
        let _ = delivery.announce(app_data);
    }
}

impl Default for TestMesh {
    fn default() -> Self {
        Self::new()
    }
}

/// An inbound destination registered on the mesh.
pub struct TestDestination {
    mesh: Arc<MeshState>,
    owner: usize,
    hash: DestinationHash,
    identity_public: [u8; 32],
    handlers: Mutex<HashMap<String, RequestHandler>>,
}

impl InboundDestination for TestDestination {
    fn hash(&self) -> DestinationHash {
        self.hash
    }

    fn register_request_handler(&self, path: &str, handler: RequestHandler) {
        self.handlers
            .lock()
            .unwrap()
            .insert(path.to_string(), handler);
    }

    fn announce(&self, app_data: Vec<u8>) -> Result<(), TransportError> {
        self.mesh.recall.lock().unwrap().insert(
            self.hash,
            RecalledIdentity {
                public_key: self.identity_public,
                app_data: app_data.clone(),
            },
        );
        self.mesh.paths.lock().unwrap().insert(self.hash);
        *self
            .mesh
            .announce_counts
            .lock()
            .unwrap()
            .entry(self.hash)
            .or_insert(0) += 1;
        self.mesh
            .last_app_data
            .lock()
            .unwrap()
            .insert(self.hash, app_data.clone());

        // Everyone except the announcer hears it.
        let observers: Vec<Arc<dyn AnnounceObserver>> = {
            let transports = self.mesh.transports.lock().unwrap();
            transports
                .iter()
                .filter(|t| t.index != self.owner)
                .filter_map(|t| t.observer.lock().unwrap().clone())
                .collect()
        };
        for observer in observers {
            observer.received_announce(self.hash, &app_data);
        }
        Ok(())
    }
}

/// One node's view of the mesh.
pub struct TestTransport {
    mesh: Arc<MeshState>,
    pub(crate) index: usize,
    config_dir: PathBuf,
    interfaces: Mutex<Vec<InterfaceStatus>>,
    actions: Mutex<Vec<String>>,
    pub(crate) observer: Mutex<Option<Arc<dyn AnnounceObserver>>>,
}

impl TestTransport {
    pub(crate) fn new(mesh: Arc<MeshState>, index: usize, config_dir: PathBuf) -> Self {
        Self {
            mesh,
            index,
            config_dir,
            interfaces: Mutex::new(Vec::new()),
            actions: Mutex::new(Vec::new()),
            observer: Mutex::new(None),
        }
    }

    /// Add a runtime interface with the given online state.
    pub fn add_interface(&self, name: &str, kind: &str, online: bool) {
        self.interfaces.lock().unwrap().push(InterfaceStatus {
            name: name.to_string(),
            short_name: name.to_string(),
            kind: kind.to_string(),
            online,
        });
    }

    /// Flip the online state of a runtime interface.
    pub fn set_online(&self, name: &str, online: bool) {
        for status in self.interfaces.lock().unwrap().iter_mut() {
            if status.name == name || status.short_name == name {
                status.online = online;
            }
        }
    }

    /// Recorded halt/resume/reload calls, in order.
    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }

    fn record(&self, action: &str, name: &str, online_after: Option<bool>) {
        self.actions.lock().unwrap().push(format!("{action}:{name}"));
        if let Some(online) = online_after {
            self.set_online(name, online);
        }
    }
}

impl Transport for TestTransport {
    fn config_path(&self) -> PathBuf {
        self.config_dir.join("config")
    }

    fn interface_stats(&self) -> Vec<InterfaceStatus> {
        self.interfaces.lock().unwrap().clone()
    }

    fn halt_interface(&self, name: &str) -> Result<(), TransportError> {
        self.record("halt", name, Some(false));
        Ok(())
    }

    fn resume_interface(&self, name: &str) -> Result<(), TransportError> {
        self.record("resume", name, Some(true));
        Ok(())
    }

    fn reload_interface(&self, name: &str) -> Result<(), TransportError> {
        self.record("reload", name, Some(true));
        Ok(())
    }

    fn has_path(&self, destination: &DestinationHash) -> bool {
        self.mesh.paths.lock().unwrap().contains(destination)
    }

    fn request_path(&self, destination: &DestinationHash) {
        // The mesh "answers" path requests for any registered destination.
        let registered = self
            .mesh
            .destinations
            .lock()
            .unwrap()
            .get(destination)
            .cloned();
        let Some(dest) = registered else {
            return;
        };
        self.mesh.paths.lock().unwrap().insert(*destination);

        let app_data = self
            .mesh
            .last_app_data
            .lock()
            .unwrap()
            .get(destination)
            .cloned()
            .unwrap_or_default();
        self.mesh.recall.lock().unwrap().insert(
            *destination,
            RecalledIdentity {
                public_key: dest.identity_public,
                app_data,
            },
        );
    }

    fn recall_identity(&self, destination: &DestinationHash) -> Option<RecalledIdentity> {
        self.mesh.recall.lock().unwrap().get(destination).cloned()
    }

    fn register_inbound(
        &self,
        identity: &LocalIdentity,
        app: &str,
        aspect: &str,
    ) -> Result<Arc<dyn InboundDestination>, TransportError> {
        let hash = destination_hash(&identity.public_key(), app, aspect);
        let destination = Arc::new(TestDestination {
            mesh: self.mesh.clone(),
            owner: self.index,
            hash,
            identity_public: identity.public_key(),
            handlers: Mutex::new(HashMap::new()),
        });
        self.mesh
            .destinations
            .lock()
            .unwrap()
            .insert(hash, destination.clone());
        Ok(destination)
    }

    fn register_announce_observer(&self, observer: Arc<dyn AnnounceObserver>) {
        *self.observer.lock().unwrap() = Some(observer);
    }

    fn deregister_announce_observer(&self) {
        *self.observer.lock().unwrap() = None;
    }

    fn find_active_link(&self, link_id: &LinkId) -> Option<Arc<dyn Link>> {
        self.mesh
            .links
            .lock()
            .unwrap()
            .get(link_id)
            .cloned()
            .map(|link| link as Arc<dyn Link>)
    }

    fn open_link(
        &self,
        destination: &DestinationHash,
        on_established: Box<dyn Fn() + Send + Sync>,
        on_closed: Box<dyn Fn() + Send + Sync>,
    ) -> Result<Arc<dyn Link>, TransportError> {
        self.mesh.links_opened.fetch_add(1, Ordering::AcqRel);

        let link = Arc::new(TestLink {
            id: rand::random(),
            mesh: self.mesh.clone(),
            remote: *destination,
            resource_concluded: Mutex::new(None),
            identified: Mutex::new(None),
        });
        self.mesh
            .links
            .lock()
            .unwrap()
            .insert(link.id, link.clone());

        let known = self
            .mesh
            .destinations
            .lock()
            .unwrap()
            .contains_key(destination);
        if known {
            tokio::spawn(async move { on_established() });
        } else {
            tokio::spawn(async move { on_closed() });
        }

        Ok(link)
    }
}

/// A link between a fetcher and a registered destination.
pub struct TestLink {
    id: LinkId,
    mesh: Arc<MeshState>,
    remote: DestinationHash,
    resource_concluded: Mutex<Option<ResourceConcluded>>,
    identified: Mutex<Option<[u8; 32]>>,
}

impl Link for TestLink {
    fn id(&self) -> LinkId {
        self.id
    }

    fn identify(&self, identity: &LocalIdentity) {
        *self.identified.lock().unwrap() = Some(identity.public_key());
    }

    fn accept_all_resources(&self) {}

    fn set_resource_concluded(&self, callback: ResourceConcluded) {
        *self.resource_concluded.lock().unwrap() = Some(callback);
    }

    fn request(
        &self,
        path: &str,
        payload: Value,
        on_response: Box<dyn Fn(Value) + Send + Sync>,
        on_failure: Box<dyn Fn() + Send + Sync>,
        _timeout: std::time::Duration,
    ) -> Result<(), TransportError> {
        let destination = self
            .mesh
            .destinations
            .lock()
            .unwrap()
            .get(&self.remote)
            .cloned();
        let Some(destination) = destination else {
            tokio::spawn(async move { on_failure() });
            return Ok(());
        };

        let handler = destination.handlers.lock().unwrap().get(path).cloned();
        match handler {
            None => {
                tokio::spawn(async move { on_failure() });
            }
            Some(handler) => {
                let request = InboundRequest {
                    path: path.to_string(),
                    payload,
                    link_id: self.id,
                    remote_identity: *self.identified.lock().unwrap(),
                };
                tokio::spawn(async move {
                    let response = handler(request);
                    on_response(response);
                });
            }
        }
        Ok(())
    }

    fn send_resource(&self, data: &[u8], metadata: Value) -> Result<(), TransportError> {
        self.mesh.resources_sent.fetch_add(1, Ordering::AcqRel);

        let seq = RESOURCE_FILE_SEQ.fetch_add(1, Ordering::AcqRel);
        let data_file = std::env::temp_dir().join(format!(
            "lantern-test-resource-{}-{}.bin",
            std::process::id(),
            seq
        ));
        fs::write(&data_file, data).map_err(|e| TransportError::Io(e.to_string()))?;

        let guard = self.resource_concluded.lock().unwrap();
        if let Some(callback) = guard.as_ref() {
            callback(ConcludedResource {
                complete: true,
                metadata,
                data_file,
            });
        }
        Ok(())
    }

    fn teardown(&self) {
        self.mesh.links.lock().unwrap().remove(&self.id);
    }
}
