//! The hub: one process's gossip surface over many state URIs.
//!
//! Owns one controller actor per state URI (spawned on first touch),
//! routes local and inbound transactions to them, fans admitted
//! transactions out to subscribers and to the attached transport, and
//! remembers known state URIs and peers across restarts.

use crate::actor::ControllerHandle;
use crate::controller::{AdmitOutcome, Controller};
use crate::error::{ControllerError, TxStoreError};
use crate::registries::Registries;
use crate::subscription::{Subscription, SubscriptionKind};
use crate::transport::{PeerDialInfo, Transport};
use madrona_model::{Keypath, Transaction, TxId, Value, Version};
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum HubError {
    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error(transparent)]
    Meta(#[from] TxStoreError),

    #[error("a transport is already attached")]
    TransportAttached,
}

/// Hub configuration.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Base directory for all per-URI stores and hub metadata.
    pub data_dir: PathBuf,
    /// Live-delivery buffer per subscriber; a subscriber that falls this
    /// far behind is closed.
    pub subscriber_buffer: usize,
    /// Buffer between controllers and the transport pump.
    pub outbound_buffer: usize,
}

impl HubConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> HubConfig {
        HubConfig {
            data_dir: data_dir.into(),
            subscriber_buffer: 256,
            outbound_buffer: 256,
        }
    }
}

const URIS_TABLE: TableDefinition<&str, ()> = TableDefinition::new("uris");
const PEERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("peers");

// Hub-wide metadata: known state URIs and recorded peers.
struct HubMeta {
    db: Database,
}

impl HubMeta {
    fn open(path: impl AsRef<Path>) -> Result<HubMeta, TxStoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(URIS_TABLE)?;
            let _ = write_txn.open_table(PEERS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(HubMeta { db })
    }

    fn add_uri(&self, uri: &str) -> Result<(), TxStoreError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(URIS_TABLE)?;
            table.insert(uri, ())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn uris(&self) -> Result<Vec<String>, TxStoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(URIS_TABLE)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (uri, _) = entry?;
            out.push(uri.value().to_string());
        }
        Ok(out)
    }

    fn add_peer(&self, info: &PeerDialInfo) -> Result<(), TxStoreError> {
        let key = format!("{}|{}", info.transport, info.addr);
        let encoded = serde_json::to_vec(info)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PEERS_TABLE)?;
            table.insert(key.as_str(), encoded.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn peers(&self) -> Result<Vec<PeerDialInfo>, TxStoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PEERS_TABLE)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (_, raw) = entry?;
            out.push(serde_json::from_slice(raw.value())?);
        }
        Ok(out)
    }
}

struct HubInner {
    config: HubConfig,
    registries: Registries,
    meta: HubMeta,
    controllers: Mutex<HashMap<String, ControllerHandle>>,
    outbound_tx: mpsc::Sender<Transaction>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Transaction>>>,
}

/// Cheaply cloneable handle to one process's replication surface.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

/// Background tasks pumping a transport; abort them to detach.
pub struct GossipTasks {
    pub inbound: tokio::task::JoinHandle<()>,
    pub outbound: tokio::task::JoinHandle<()>,
}

impl Hub {
    pub fn open(config: HubConfig, registries: Registries) -> Result<Hub, HubError> {
        let meta = HubMeta::open(config.data_dir.join("meta.db"))?;
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_buffer);
        Ok(Hub {
            inner: Arc::new(HubInner {
                config,
                registries,
                meta,
                controllers: Mutex::new(HashMap::new()),
                outbound_tx,
                outbound_rx: Mutex::new(Some(outbound_rx)),
            }),
        })
    }

    // One controller per URI, spawned on first touch.
    fn controller(&self, state_uri: &str) -> Result<ControllerHandle, HubError> {
        let mut controllers = match self.inner.controllers.lock() {
            Ok(guard) => guard,
            Err(_) => return Err(HubError::Controller(ControllerError::Closed)),
        };
        if let Some(handle) = controllers.get(state_uri) {
            return Ok(handle.clone());
        }

        let dir_name = hex::encode(&blake3::hash(state_uri.as_bytes()).as_bytes()[..8]);
        let dir = self.inner.config.data_dir.join("stores").join(dir_name);
        let controller =
            Controller::open(state_uri, dir, self.inner.registries.clone())?;
        let handle = ControllerHandle::spawn(
            controller,
            self.inner.outbound_tx.clone(),
            self.inner.config.subscriber_buffer,
        );
        self.inner.meta.add_uri(state_uri)?;
        controllers.insert(state_uri.to_string(), handle.clone());
        debug!(state_uri, "spawned controller");
        Ok(handle)
    }

    /// Submit a transaction, locally or on behalf of a peer.
    pub async fn send_tx(&self, tx: Transaction) -> Result<AdmitOutcome, HubError> {
        let handle = self.controller(&tx.state_uri)?;
        Ok(handle.send_tx(tx).await?)
    }

    /// Subscribe to a state URI. `from` of `None` streams from genesis;
    /// otherwise catch-up starts at the named transaction (a checkpoint
    /// lets peers skip earlier history).
    pub async fn subscribe(
        &self,
        state_uri: &str,
        kind: SubscriptionKind,
        from: Option<TxId>,
        keypath: Keypath,
    ) -> Result<Subscription, HubError> {
        let handle = self.controller(state_uri)?;
        Ok(handle.subscribe(kind, from, keypath).await?)
    }

    pub async fn head_value(
        &self,
        state_uri: &str,
        keypath: Keypath,
    ) -> Result<Option<Value>, HubError> {
        let handle = self.controller(state_uri)?;
        Ok(handle.head_value(keypath).await?)
    }

    pub async fn head(&self, state_uri: &str) -> Result<Option<Version>, HubError> {
        let handle = self.controller(state_uri)?;
        Ok(handle.head().await?)
    }

    pub async fn leaves(&self, state_uri: &str) -> Result<Vec<TxId>, HubError> {
        let handle = self.controller(state_uri)?;
        Ok(handle.leaves().await?)
    }

    pub async fn checkpoint_version(
        &self,
        state_uri: &str,
        id: TxId,
    ) -> Result<Option<Version>, HubError> {
        let handle = self.controller(state_uri)?;
        Ok(handle.checkpoint_version(id).await?)
    }

    /// Every state URI this hub has ever hosted.
    pub fn known_state_uris(&self) -> Result<Vec<String>, HubError> {
        Ok(self.inner.meta.uris()?)
    }

    /// Record a peer for dialing when a transport attaches.
    pub fn add_peer(&self, info: PeerDialInfo) -> Result<(), HubError> {
        Ok(self.inner.meta.add_peer(&info)?)
    }

    pub fn peers(&self) -> Result<Vec<PeerDialInfo>, HubError> {
        Ok(self.inner.meta.peers()?)
    }

    /// Wire a transport to this hub: dial recorded peers, pump inbound
    /// transactions into admission, and rebroadcast admitted ones. Can be
    /// called once per hub.
    pub async fn attach_transport<T: Transport>(&self, transport: T) -> Result<GossipTasks, HubError> {
        let outbound_rx = match self.inner.outbound_rx.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let outbound_rx = outbound_rx.ok_or(HubError::TransportAttached)?;

        for peer in self.peers()? {
            if let Err(e) = transport.dial(&peer).await {
                warn!(peer = ?peer, error = %e, "failed to dial recorded peer");
            }
        }

        let transport = Arc::new(transport);

        let hub = self.clone();
        let inbound_transport = transport.clone();
        let inbound = tokio::spawn(async move {
            while let Some(tx) = inbound_transport.next_inbound().await {
                let id = tx.id;
                match hub.send_tx(tx).await {
                    Ok(_) => {}
                    Err(HubError::Controller(ControllerError::BadSignature)) => {
                        // already logged at the controller; do not amplify
                    }
                    Err(e) => {
                        debug!(id = %id, error = %e, "inbound transaction not admitted");
                    }
                }
            }
        });

        let outbound = tokio::spawn(async move {
            let mut outbound_rx = outbound_rx;
            while let Some(tx) = outbound_rx.recv().await {
                if let Err(e) = transport.broadcast(tx).await {
                    warn!(error = %e, "gossip broadcast failed");
                }
            }
        });

        Ok(GossipTasks { inbound, outbound })
    }
}
