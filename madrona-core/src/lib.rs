//! Transaction dissemination and merge.
//!
//! Signed, causally-ordered transactions carrying structured patches are
//! folded deterministically into per-URI state trees: a controller per
//! state URI orders incoming transactions, drives resolvers and
//! validators, and persists each new head version; the hub fans admitted
//! transactions out to subscribers and to the attached transport.

pub mod actor;
pub mod controller;
pub mod error;
pub mod hub;
pub mod refstore;
pub mod registries;
pub mod resolver;
pub mod subscription;
pub mod transport;
pub mod txstore;
pub mod validator;

pub use actor::ControllerHandle;
pub use controller::{AdmitOutcome, AdmittedTx, Controller};
pub use error::{ControllerError, ResolverError, TxStoreError, ValidatorError};
pub use hub::{GossipTasks, Hub, HubConfig, HubError};
pub use refstore::{MemoryRefStore, RefStore, RefStoreError};
pub use registries::{Registries, RESOLVER_DUMB, VALIDATOR_PERMISSIONS};
pub use resolver::{DumbResolver, Resolver, ResolverFactory};
pub use subscription::{Subscription, SubscriptionEvent, SubscriptionKind};
pub use transport::{ChannelNetwork, ChannelTransport, PeerDialInfo, Transport, TransportError};
pub use txstore::TxStore;
pub use validator::{PermissionsValidator, PermissionsValidatorFactory, Validator, ValidatorFactory};
