//! Transport contract and the in-memory channel transport.
//!
//! Real network transports live outside the core; it only relies on this
//! seam: broadcast admitted transactions, surface inbound ones, dial
//! recorded peers. Links are unordered and at-most-once; the core
//! tolerates redelivery because admission is idempotent by tx id.
//!
//! The channel transport wires several in-process hubs together through a
//! shared broker and is what the integration tests run on.

use madrona_model::{Address, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("transport closed")]
    Closed,
}

/// How to reach a peer, e.g. `{"transport": "channel", "addr": "<hex>"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDialInfo {
    pub transport: String,
    pub addr: String,
}

/// The network seam the core consumes.
pub trait Transport: Send + Sync + 'static {
    fn local_address(&self) -> Address;

    /// Best-effort delivery of one transaction to every known peer.
    fn broadcast(
        &self,
        tx: Transaction,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// The next transaction delivered by a peer; `None` when the
    /// transport shuts down.
    fn next_inbound(&self) -> impl Future<Output = Option<Transaction>> + Send;

    fn dial(&self, info: &PeerDialInfo) -> impl Future<Output = Result<(), TransportError>> + Send;
}

const INBOUND_BUFFER: usize = 256;

/// Shared broker routing transactions between channel transports.
#[derive(Clone, Debug, Default)]
pub struct ChannelNetwork {
    peers: Arc<Mutex<HashMap<Address, mpsc::Sender<Transaction>>>>,
}

impl ChannelNetwork {
    pub fn new() -> ChannelNetwork {
        ChannelNetwork::default()
    }

    async fn register(&self, address: Address, inbound: mpsc::Sender<Transaction>) {
        self.peers.lock().await.insert(address, inbound);
    }
}

/// In-memory transport: every registered peer receives every broadcast.
#[derive(Clone, Debug)]
pub struct ChannelTransport {
    address: Address,
    network: ChannelNetwork,
    inbound: Arc<Mutex<mpsc::Receiver<Transaction>>>,
}

impl ChannelTransport {
    pub async fn new(address: Address, network: &ChannelNetwork) -> ChannelTransport {
        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        network.register(address, tx).await;
        ChannelTransport {
            address,
            network: network.clone(),
            inbound: Arc::new(Mutex::new(rx)),
        }
    }
}

impl Transport for ChannelTransport {
    fn local_address(&self) -> Address {
        self.address
    }

    fn broadcast(
        &self,
        tx: Transaction,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        let network = self.network.clone();
        let local = self.address;
        async move {
            let peers = network.peers.lock().await;
            for (address, inbound) in peers.iter() {
                if *address == local {
                    continue;
                }
                // a full or closed peer just misses this delivery
                let _ = inbound.try_send(tx.clone());
            }
            Ok(())
        }
    }

    fn next_inbound(&self) -> impl Future<Output = Option<Transaction>> + Send {
        let inbound = self.inbound.clone();
        async move { inbound.lock().await.recv().await }
    }

    fn dial(&self, info: &PeerDialInfo) -> impl Future<Output = Result<(), TransportError>> + Send {
        let network = self.network.clone();
        let info = info.clone();
        async move {
            let address = Address::from_hex(&info.addr)
                .map_err(TransportError::Connect)?;
            if network.peers.lock().await.contains_key(&address) {
                Ok(())
            } else {
                Err(TransportError::Connect(format!(
                    "peer {} not found in network",
                    info.addr
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use madrona_model::{NodeIdentity, Patch, TxBuilder};

    #[tokio::test]
    async fn test_broadcast_reaches_other_peers_only() {
        let network = ChannelNetwork::new();
        let id1 = NodeIdentity::generate();
        let id2 = NodeIdentity::generate();
        let t1 = ChannelTransport::new(id1.address(), &network).await;
        let t2 = ChannelTransport::new(id2.address(), &network).await;

        let tx = TxBuilder::new("example.org/demo")
            .genesis()
            .patch(Patch::parse(" = {}").unwrap())
            .sign(&id1)
            .unwrap();

        t1.broadcast(tx.clone()).await.unwrap();

        let received = t2.next_inbound().await.unwrap();
        assert_eq!(received, tx);

        // the sender does not hear its own broadcast
        let inbound = t1.inbound.clone();
        assert!(inbound.lock().await.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dial_known_and_unknown_peers() {
        let network = ChannelNetwork::new();
        let id1 = NodeIdentity::generate();
        let id2 = NodeIdentity::generate();
        let t1 = ChannelTransport::new(id1.address(), &network).await;
        let _t2 = ChannelTransport::new(id2.address(), &network).await;

        let known = PeerDialInfo {
            transport: "channel".into(),
            addr: id2.address().to_string(),
        };
        t1.dial(&known).await.unwrap();

        let unknown = PeerDialInfo {
            transport: "channel".into(),
            addr: NodeIdentity::generate().address().to_string(),
        };
        assert!(t1.dial(&unknown).await.is_err());
    }
}
