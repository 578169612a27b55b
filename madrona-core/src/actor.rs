//! Controller actor: a dedicated thread owning one state URI's
//! controller, processing commands from a channel.
//!
//! All admissions and subscriber notifications for a URI are serialized
//! through its actor; cross-URI work runs in parallel. The thread is
//! plain `std::thread` since the underlying store is synchronous.

use crate::controller::{AdmitOutcome, AdmittedTx, Controller};
use crate::error::ControllerError;
use crate::subscription::{Subscription, SubscriptionEvent, SubscriptionKind};
use madrona_model::{Keypath, Transaction, TxId, Value, Version};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub(crate) enum ControllerCmd {
    SendTx {
        tx: Transaction,
        resp: oneshot::Sender<Result<AdmitOutcome, ControllerError>>,
    },
    Subscribe {
        kind: SubscriptionKind,
        from: Option<TxId>,
        keypath: Keypath,
        resp: oneshot::Sender<Result<Subscription, ControllerError>>,
    },
    HeadValue {
        keypath: Keypath,
        resp: oneshot::Sender<Result<Option<Value>, ControllerError>>,
    },
    Head {
        resp: oneshot::Sender<Option<Version>>,
    },
    Leaves {
        resp: oneshot::Sender<Vec<TxId>>,
    },
    CheckpointVersion {
        id: TxId,
        resp: oneshot::Sender<Result<Option<Version>, ControllerError>>,
    },
    Shutdown,
}

struct Subscriber {
    kind: SubscriptionKind,
    keypath: Keypath,
    tx: mpsc::Sender<SubscriptionEvent>,
}

pub(crate) struct ControllerActor {
    controller: Controller,
    rx: mpsc::Receiver<ControllerCmd>,
    subscribers: Vec<Subscriber>,
    // admitted txs flow out to the gossip surface
    outbound: mpsc::Sender<Transaction>,
    subscriber_buffer: usize,
}

impl ControllerActor {
    pub(crate) fn new(
        controller: Controller,
        rx: mpsc::Receiver<ControllerCmd>,
        outbound: mpsc::Sender<Transaction>,
        subscriber_buffer: usize,
    ) -> ControllerActor {
        ControllerActor {
            controller,
            rx,
            subscribers: Vec::new(),
            outbound,
            subscriber_buffer,
        }
    }

    /// Process commands until shutdown. Runs on a dedicated thread.
    pub(crate) fn run(mut self) {
        while let Some(cmd) = self.rx.blocking_recv() {
            match cmd {
                ControllerCmd::SendTx { tx, resp } => {
                    let result = self.controller.admit(tx);
                    match result {
                        Ok((outcome, admitted)) => {
                            for adm in &admitted {
                                self.publish(adm);
                            }
                            let _ = resp.send(Ok(outcome));
                        }
                        Err(e) => {
                            let _ = resp.send(Err(e));
                        }
                    }
                }
                ControllerCmd::Subscribe {
                    kind,
                    from,
                    keypath,
                    resp,
                } => {
                    let _ = resp.send(self.subscribe(kind, from, keypath));
                }
                ControllerCmd::HeadValue { keypath, resp } => {
                    let _ = resp.send(self.controller.head_value(&keypath));
                }
                ControllerCmd::Head { resp } => {
                    let _ = resp.send(self.controller.head());
                }
                ControllerCmd::Leaves { resp } => {
                    let _ = resp.send(self.controller.leaves().iter().copied().collect());
                }
                ControllerCmd::CheckpointVersion { id, resp } => {
                    let _ = resp.send(self.controller.checkpoint_version(&id));
                }
                ControllerCmd::Shutdown => break,
            }
        }
        let dropped = self.controller.clear_parked();
        if dropped > 0 {
            debug!(
                state_uri = %self.controller.state_uri(),
                dropped,
                "discarding parked transactions on shutdown"
            );
        }
    }

    fn subscribe(
        &mut self,
        kind: SubscriptionKind,
        from: Option<TxId>,
        keypath: Keypath,
    ) -> Result<Subscription, ControllerError> {
        // catch-up stream: everything admitted at or after the bound
        let start_seq = match from {
            None => 0,
            Some(id) => self
                .controller
                .txstore()
                .seq_of(&id)?
                .ok_or(ControllerError::UnknownTx(id))?,
        };
        let backlog = self.controller.txstore().txs_from(start_seq)?;

        let capacity = backlog.len() + self.subscriber_buffer;
        let (tx, rx) = mpsc::channel(capacity.max(1));

        match kind {
            SubscriptionKind::Txs => {
                for old in backlog {
                    let _ = tx.try_send(SubscriptionEvent::Tx(old));
                }
            }
            SubscriptionKind::StateDiffs => {
                for old in backlog {
                    let _ = tx.try_send(SubscriptionEvent::Diffs {
                        txid: old.id,
                        patches: old.patches,
                    });
                }
            }
            SubscriptionKind::States => {
                // state subscribers get one snapshot of the current head
                if let Some(version) = self.controller.head() {
                    let value = self.controller.value_at(version, &keypath)?;
                    let _ = tx.try_send(SubscriptionEvent::State { version, value });
                }
            }
        }

        self.subscribers.push(Subscriber { kind, keypath, tx });
        Ok(Subscription { rx })
    }

    // Deliver one admission to every live subscriber. Bounded buffers: a
    // subscriber that has stopped draining is dropped, not waited on.
    fn publish(&mut self, adm: &AdmittedTx) {
        if let Err(e) = self.outbound.try_send(adm.tx.clone()) {
            debug!(id = %adm.tx.id, error = %e, "gossip outbound full; skipping rebroadcast");
        }

        let mut dropped = Vec::new();
        for (i, sub) in self.subscribers.iter().enumerate() {
            let event = match sub.kind {
                SubscriptionKind::Txs => SubscriptionEvent::Tx(adm.tx.clone()),
                SubscriptionKind::StateDiffs => SubscriptionEvent::Diffs {
                    txid: adm.tx.id,
                    patches: adm.tx.patches.clone(),
                },
                SubscriptionKind::States => {
                    match self.controller.value_at(adm.version, &sub.keypath) {
                        Ok(value) => SubscriptionEvent::State {
                            version: adm.version,
                            value,
                        },
                        Err(e) => {
                            warn!(version = %adm.version, error = %e, "failed to snapshot state for subscriber");
                            continue;
                        }
                    }
                }
            };
            match sub.tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        state_uri = %self.controller.state_uri(),
                        "subscriber too slow; closing its stream"
                    );
                    dropped.push(i);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dropped.push(i);
                }
            }
        }
        for i in dropped.into_iter().rev() {
            self.subscribers.remove(i);
        }
    }
}

/// Handle to one state URI's controller actor. Cheap to clone; the actor
/// thread shuts down when the owning handle is dropped.
#[derive(Debug)]
pub struct ControllerHandle {
    state_uri: String,
    tx: mpsc::Sender<ControllerCmd>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Clone for ControllerHandle {
    fn clone(&self) -> Self {
        ControllerHandle {
            state_uri: self.state_uri.clone(),
            tx: self.tx.clone(),
            thread: None, // clones don't own the actor thread
        }
    }
}

impl ControllerHandle {
    pub(crate) fn spawn(
        controller: Controller,
        outbound: mpsc::Sender<Transaction>,
        subscriber_buffer: usize,
    ) -> ControllerHandle {
        let state_uri = controller.state_uri().to_string();
        let (tx, rx) = mpsc::channel(64);
        let actor = ControllerActor::new(controller, rx, outbound, subscriber_buffer);
        let thread = std::thread::spawn(move || actor.run());
        ControllerHandle {
            state_uri,
            tx,
            thread: Some(thread),
        }
    }

    pub fn state_uri(&self) -> &str {
        &self.state_uri
    }

    pub async fn send_tx(&self, tx: Transaction) -> Result<AdmitOutcome, ControllerError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(ControllerCmd::SendTx { tx, resp: resp_tx })
            .await
            .map_err(|_| ControllerError::Closed)?;
        resp_rx.await.map_err(|_| ControllerError::Closed)?
    }

    pub async fn subscribe(
        &self,
        kind: SubscriptionKind,
        from: Option<TxId>,
        keypath: Keypath,
    ) -> Result<Subscription, ControllerError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(ControllerCmd::Subscribe {
                kind,
                from,
                keypath,
                resp: resp_tx,
            })
            .await
            .map_err(|_| ControllerError::Closed)?;
        resp_rx.await.map_err(|_| ControllerError::Closed)?
    }

    pub async fn head_value(&self, keypath: Keypath) -> Result<Option<Value>, ControllerError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(ControllerCmd::HeadValue {
                keypath,
                resp: resp_tx,
            })
            .await
            .map_err(|_| ControllerError::Closed)?;
        resp_rx.await.map_err(|_| ControllerError::Closed)?
    }

    pub async fn head(&self) -> Result<Option<Version>, ControllerError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(ControllerCmd::Head { resp: resp_tx })
            .await
            .map_err(|_| ControllerError::Closed)?;
        resp_rx.await.map_err(|_| ControllerError::Closed)
    }

    pub async fn leaves(&self) -> Result<Vec<TxId>, ControllerError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(ControllerCmd::Leaves { resp: resp_tx })
            .await
            .map_err(|_| ControllerError::Closed)?;
        resp_rx.await.map_err(|_| ControllerError::Closed)
    }

    pub async fn checkpoint_version(&self, id: TxId) -> Result<Option<Version>, ControllerError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(ControllerCmd::CheckpointVersion { id, resp: resp_tx })
            .await
            .map_err(|_| ControllerError::Closed)?;
        resp_rx.await.map_err(|_| ControllerError::Closed)?
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        // only the spawning handle shuts the actor down
        if let Some(thread) = self.thread.take() {
            let _ = self.tx.try_send(ControllerCmd::Shutdown);
            let _ = thread.join();
        }
    }
}
