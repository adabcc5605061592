//! Node lifecycle.
//!
//! One `Node` per process: it owns the identity, the delivery and profile
//! destinations, the avatar and attachment stores, and the background
//! tasks (periodic announce, interface watchdog). The transport itself is
//! process-wide and outlives the node; `close` intentionally leaves it up.

use std::fs;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock, Weak};

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

use crate::announce::{AnnounceEntry, AnnounceRegistry, RegistryObserver};
use crate::attachments::{AttachmentInfo, AttachmentStore};
use crate::config::{self, DiskLayout};
use crate::interfaces::WatchState;
use crate::profile::avatar::{
    detect_mime, load_avatar, remove_avatar, save_avatar, Avatar,
};
use crate::profile::install_profile_handlers;
use crate::runtime::{
    DestinationHash, InboundDestination, InterfaceStatus, LocalIdentity, LxMessage, MeshStack,
    MessageRouter, Transport,
};

use super::error::NodeError;
use super::options::NodeOptions;

/// App name of the profile destination.
pub const PROFILE_APP: &str = "lantern";

/// Aspect of the profile destination.
pub const PROFILE_ASPECT: &str = "profile";

/// Handler invoked for every delivered inbound message.
pub type InboundHandler = Arc<dyn Fn(LxMessage) + Send + Sync>;

/// The in-process control core of the messaging daemon.
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
}

/// Shared node state. Component implementations (announce engine,
/// interface controller, profile service) live in their own modules as
/// `impl NodeInner` blocks.
pub(crate) struct NodeInner {
    pub(crate) options: NodeOptions,
    pub(crate) layout: DiskLayout,
    pub(crate) stack: Arc<dyn MeshStack>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) identity: LocalIdentity,

    /// Rebuilt on restart.
    pub(crate) router: StdRwLock<Arc<dyn MessageRouter>>,
    /// Rebuilt on restart together with the router.
    pub(crate) delivery_in: StdRwLock<Arc<dyn InboundDestination>>,
    /// Created once; survives restart.
    pub(crate) profile_in: Arc<dyn InboundDestination>,

    pub(crate) display_name: StdRwLock<String>,
    pub(crate) avatar: StdRwLock<Option<Avatar>>,
    pub(crate) attachments: AttachmentStore,
    pub(crate) announces: Arc<AnnounceRegistry>,

    pub(crate) watch_state: StdMutex<WatchState>,
    /// Serialises the whole halt+settle+resume reset sequence.
    pub(crate) reset_lock: Mutex<()>,

    /// Single-flight gate for announce attempts.
    pub(crate) announce_in_flight: AtomicBool,
    /// Deferred-retry flag consumed after a completed attempt.
    pub(crate) announce_queued: AtomicBool,

    pub(crate) inbound: StdRwLock<Option<InboundHandler>>,
    pub(crate) running: Arc<RwLock<bool>>,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Start a node.
    ///
    /// Prepares the state directory, opens the transport and router,
    /// registers destinations and callbacks, and spawns the periodic
    /// announce ticker and the interface watchdog.
    ///
    /// # Errors
    ///
    /// Fatal configuration, identity, transport, or router failures are
    /// returned to the caller; nothing is retried.
    pub async fn start(options: NodeOptions, stack: Arc<dyn MeshStack>) -> Result<Self, NodeError> {
        let dir = options.dir.clone();
        fs::create_dir_all(&dir)
            .map_err(|e| NodeError::StartFailed(format!("create state dir: {}", e)))?;

        let layout = config::ensure_daemon_config(&dir, &options.display_name)
            .map_err(|e| NodeError::Config(format!("ensure daemon config: {}", e)))?;
        fs::create_dir_all(&layout.storage_dir)
            .map_err(|e| NodeError::StartFailed(format!("create storage dir: {}", e)))?;

        if options.reset_router_state {
            let _ = fs::remove_dir_all(layout.storage_dir.join("ratchets"));
        }

        let transport_config_dir = config::prepare_transport_config(
            &layout,
            options.transport_config_dir.as_deref(),
            options.log_level,
            options.reset_transport_config,
        )
        .map_err(|e| NodeError::Config(format!("prepare transport config: {}", e)))?;

        let transport = stack.open_transport(&transport_config_dir, options.log_level)?;

        let identity = if layout.identity_path.exists() {
            LocalIdentity::from_file(&layout.identity_path)
                .map_err(|e| NodeError::Identity(format!("load identity: {}", e)))?
        } else {
            let identity = LocalIdentity::generate();
            identity
                .save(&layout.identity_path)
                .map_err(|e| NodeError::Identity(format!("save identity: {}", e)))?;
            identity
        };

        let router = stack.open_router(&identity, &layout.storage_dir)?;
        let delivery_in = router.register_delivery_identity(
            &identity,
            &options.display_name,
            options.delivery_stamp_cost,
        )?;

        let avatar = load_avatar(&dir);
        let profile_in = transport.register_inbound(&identity, PROFILE_APP, PROFILE_ASPECT)?;

        let announces = Arc::new(AnnounceRegistry::new());

        let inner = Arc::new(NodeInner {
            display_name: StdRwLock::new(options.display_name.clone()),
            options,
            attachments: AttachmentStore::new(&dir),
            layout,
            stack,
            transport: transport.clone(),
            identity,
            router: StdRwLock::new(router.clone()),
            delivery_in: StdRwLock::new(delivery_in.clone()),
            profile_in: profile_in.clone(),
            avatar: StdRwLock::new(avatar),
            announces: announces.clone(),
            watch_state: StdMutex::new(WatchState::default()),
            reset_lock: Mutex::new(()),
            announce_in_flight: AtomicBool::new(false),
            announce_queued: AtomicBool::new(false),
            inbound: StdRwLock::new(None),
            running: Arc::new(RwLock::new(true)),
            tasks: Mutex::new(Vec::new()),
        });

        install_profile_handlers(&inner, &profile_in);
        install_profile_handlers(&inner, &delivery_in);

        transport.register_announce_observer(Arc::new(RegistryObserver::new(announces)));
        install_delivery_callback(&inner, router.as_ref());

        // Background tasks.
        {
            let mut tasks = inner.tasks.lock().await;
            let ticker = Arc::clone(&inner);
            tasks.push(tokio::spawn(async move {
                ticker.run_announce_ticker().await;
            }));
            let watchdog = Arc::clone(&inner);
            tasks.push(tokio::spawn(async move {
                watchdog.run_interface_watchdog().await;
            }));
        }

        info!(
            dest = %hex::encode(inner.delivery_destination_hash()),
            dir = %inner.options.dir.display(),
            "node started"
        );

        Ok(Self { inner })
    }

    /// Stop background tasks and the router. Idempotent. The transport is
    /// process-wide and is left running.
    pub async fn close(&self) {
        {
            let mut running = self.inner.running.write().await;
            if !*running {
                return;
            }
            *running = false;
        }

        let mut tasks = self.inner.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }

        self.inner.router.read().unwrap().exit();
        self.inner.transport.deregister_announce_observer();
        info!("node closed");
    }

    /// Rebuild the router and delivery destination, keeping the identity
    /// and transport. Schedules a re-announce.
    pub async fn restart(&self) -> Result<(), NodeError> {
        let inner = &self.inner;

        inner.router.read().unwrap().exit();

        let router = inner
            .stack
            .open_router(&inner.identity, &inner.layout.storage_dir)?;
        let display_name = inner.display_name.read().unwrap().clone();
        let delivery_in = router.register_delivery_identity(
            &inner.identity,
            &display_name,
            inner.options.delivery_stamp_cost,
        )?;

        install_profile_handlers(inner, &delivery_in);
        install_delivery_callback(inner, router.as_ref());

        *inner.router.write().unwrap() = router;
        *inner.delivery_in.write().unwrap() = delivery_in;

        inner.announce_delivery("restart");
        Ok(())
    }

    /// Hex-encoded delivery destination hash of this node.
    pub fn destination_hash_hex(&self) -> String {
        hex::encode(self.inner.delivery_destination_hash())
    }

    /// Delivery destination hash of this node.
    pub fn destination_hash(&self) -> DestinationHash {
        self.inner.delivery_destination_hash()
    }

    /// Install the inbound message handler. Replaces any previous one.
    pub fn set_inbound_handler(&self, handler: impl Fn(LxMessage) + Send + Sync + 'static) {
        *self.inner.inbound.write().unwrap() = Some(Arc::new(handler));
    }

    /// Schedule a delivery announce with reason `"manual"`.
    pub fn announce_delivery(&self) {
        self.inner.announce_delivery("manual");
    }

    /// Schedule a delivery announce with an explicit reason.
    pub fn announce_delivery_with_reason(&self, reason: &str) {
        self.inner.announce_delivery(reason);
    }

    /// Update the display name. Persists into the daemon config; call
    /// [`Node::announce_delivery`] afterwards to broadcast the change.
    pub fn set_display_name(&self, name: &str) -> Result<(), NodeError> {
        *self.inner.display_name.write().unwrap() = name.to_string();
        config::update_display_name(&self.inner.options.dir, name)
            .map_err(|e| NodeError::Config(format!("update display name: {}", e)))
    }

    /// Current display name.
    pub fn display_name(&self) -> String {
        self.inner.display_name.read().unwrap().clone()
    }

    /// Set the avatar. An empty mime is detected from magic bytes. The
    /// announce engine is the sole emitter; call
    /// [`Node::announce_delivery`] to propagate the change.
    pub fn set_avatar(&self, bytes: Vec<u8>, mime: &str) -> Result<(), NodeError> {
        if bytes.is_empty() {
            return Err(NodeError::InvalidInput("empty avatar".into()));
        }
        let mime = mime.trim();
        let mime = if mime.is_empty() {
            detect_mime(&bytes)
        } else {
            mime
        };
        if mime.is_empty() {
            return Err(NodeError::InvalidInput("unknown avatar mime".into()));
        }

        let avatar = Avatar::from_bytes(bytes, mime.to_string());
        save_avatar(&self.inner.options.dir, &avatar)?;
        *self.inner.avatar.write().unwrap() = Some(avatar);
        Ok(())
    }

    /// Remove the avatar from memory and disk.
    pub fn clear_avatar(&self) {
        *self.inner.avatar.write().unwrap() = None;
        remove_avatar(&self.inner.options.dir);
    }

    /// Current avatar, if set.
    pub fn avatar(&self) -> Option<Avatar> {
        self.inner.avatar.read().unwrap().clone()
    }

    /// Store an outgoing attachment into the content-addressed store.
    pub fn store_outgoing_attachment(
        &self,
        data: &[u8],
        mime: &str,
        name: &str,
    ) -> Result<AttachmentInfo, NodeError> {
        Ok(self.inner.attachments.store_outgoing(data, mime, name)?)
    }

    /// Runtime interface status snapshot.
    pub fn interface_stats_snapshot(&self) -> Vec<InterfaceStatus> {
        self.inner.transport.interface_stats()
    }

    /// Observed peer announces, newest first.
    pub fn announces_snapshot(&self) -> Vec<AnnounceEntry> {
        self.inner.announces.snapshot()
    }
}

impl NodeInner {
    /// Hash of the current delivery destination.
    pub(crate) fn delivery_destination_hash(&self) -> DestinationHash {
        self.delivery_in.read().unwrap().hash()
    }

    /// Whether the node is still running.
    pub(crate) async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

fn install_delivery_callback(inner: &Arc<NodeInner>, router: &dyn MessageRouter) {
    let weak: Weak<NodeInner> = Arc::downgrade(inner);
    router.register_delivery_callback(Box::new(move |message| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let handler = inner.inbound.read().unwrap().clone();
        if let Some(handler) = handler {
            handler(message);
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::SendOptions;
    use crate::testing::TestMesh;
    use std::sync::Mutex as StdMutex;

    async fn start_node(mesh: &TestMesh, dir: &std::path::Path, name: &str) -> Node {
        let options = NodeOptions::for_testing(dir).with_display_name(name);
        Node::start(options, mesh.stack()).await.unwrap()
    }

    #[tokio::test]
    async fn test_start_creates_state_layout() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let node = start_node(&mesh, dir.path(), "Alice").await;

        assert!(dir.path().join("config").exists());
        assert!(dir.path().join("identity").exists());
        assert!(dir.path().join("storage").exists());
        assert!(dir.path().join("rns").join("config").exists());
        assert_eq!(node.destination_hash_hex().len(), 32);

        node.close().await;
    }

    #[tokio::test]
    async fn test_identity_survives_restarts_of_the_process() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();

        let node = start_node(&mesh, dir.path(), "Alice").await;
        let first = node.destination_hash_hex();
        node.close().await;

        let mesh2 = TestMesh::new();
        let node = start_node(&mesh2, dir.path(), "Alice").await;
        assert_eq!(node.destination_hash_hex(), first);
        node.close().await;
    }

    #[tokio::test]
    async fn test_self_loopback_send() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let node = start_node(&mesh, dir.path(), "Alice").await;

        let received: Arc<StdMutex<Vec<LxMessage>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = received.clone();
        node.set_inbound_handler(move |message| {
            sink.lock().unwrap().push(message);
        });

        let sent = node
            .send(
                &node.destination_hash_hex(),
                SendOptions {
                    title: "t".into(),
                    content: "hi".into(),
                    ..SendOptions::default()
                },
            )
            .unwrap();
        assert!(sent.message_id().is_ok());

        let inbox = received.lock().unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].title, "t");
        assert_eq!(inbox[0].content, "hi");
        assert_eq!(inbox[0].source, node.destination_hash());

        drop(inbox);
        node.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let node = start_node(&mesh, dir.path(), "Alice").await;

        node.close().await;
        node.close().await;
    }

    #[tokio::test]
    async fn test_restart_keeps_destination_hash() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let node = start_node(&mesh, dir.path(), "Alice").await;

        let before = node.destination_hash_hex();
        node.restart().await.unwrap();
        assert_eq!(node.destination_hash_hex(), before);

        node.close().await;
    }

    #[tokio::test]
    async fn test_restart_reinstalls_delivery_callback() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let node = start_node(&mesh, dir.path(), "Alice").await;
        node.restart().await.unwrap();

        let received: Arc<StdMutex<usize>> = Arc::new(StdMutex::new(0));
        let sink = received.clone();
        node.set_inbound_handler(move |_| {
            *sink.lock().unwrap() += 1;
        });

        node.send(
            &node.destination_hash_hex(),
            SendOptions {
                content: "after restart".into(),
                ..SendOptions::default()
            },
        )
        .unwrap();

        assert_eq!(*received.lock().unwrap(), 1);
        node.close().await;
    }

    #[tokio::test]
    async fn test_set_avatar_rejects_unknown_mime() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let node = start_node(&mesh, dir.path(), "Alice").await;

        assert!(node.set_avatar(b"not an image".to_vec(), "").is_err());
        assert!(node.set_avatar(Vec::new(), "image/png").is_err());

        node.close().await;
    }

    #[tokio::test]
    async fn test_set_and_clear_avatar() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let node = start_node(&mesh, dir.path(), "Alice").await;

        let mut png = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        png.extend_from_slice(b"img");
        node.set_avatar(png.clone(), "").unwrap();

        let avatar = node.avatar().unwrap();
        assert_eq!(avatar.mime, "image/png");
        assert_eq!(
            avatar.fingerprint,
            crate::profile::avatar::fingerprint(&png)
        );
        assert!(dir.path().join("avatar.bin").exists());

        node.clear_avatar();
        assert!(node.avatar().is_none());
        assert!(!dir.path().join("avatar.bin").exists());

        node.close().await;
    }
}
