//! Subscriptions to one state URI's admissions.
//!
//! A subscriber names what it wants to observe (`Txs`, `States`, or
//! `StateDiffs`), an optional transaction to start from (`None` means
//! from genesis), and a keypath filter for state snapshots. Catch-up
//! events arrive first, in admission order, then live admissions.
//! Delivery buffers are bounded: a subscriber that stops draining is
//! closed rather than allowed to block the URI's serializer.

use madrona_model::{Patch, Transaction, TxId, Value, Version};
use tokio::sync::mpsc;

/// What a subscription streams after each admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// The admitted transactions themselves.
    Txs,
    /// The full head subtree under the filter keypath.
    States,
    /// The admitted transactions' patch lists.
    StateDiffs,
}

#[derive(Clone, Debug)]
pub enum SubscriptionEvent {
    Tx(Transaction),
    State {
        version: Version,
        value: Option<Value>,
    },
    Diffs {
        txid: TxId,
        patches: Vec<Patch>,
    },
}

/// Receiving half of a subscription. Dropping it unsubscribes; the
/// controller prunes the sender on its next delivery.
pub struct Subscription {
    pub(crate) rx: mpsc::Receiver<SubscriptionEvent>,
}

impl Subscription {
    /// The next event, or `None` once the subscription is closed (either
    /// by shutdown or because this subscriber fell too far behind).
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<SubscriptionEvent> {
        self.rx.try_recv().ok()
    }
}
