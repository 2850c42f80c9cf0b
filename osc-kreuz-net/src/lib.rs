//! Network layer of the osc-kreuz router.
//!
//! This crate owns everything that touches a socket: the receiver fan-out
//! engine with its dialect catalogue, the inbound OSC dispatcher, the
//! dynamic subscription watchdog, and the persisted endpoint state file.

pub mod context;
pub mod dispatcher;
pub mod receiver;
pub mod state_file;
pub mod subscriptions;
pub mod updates;

pub use context::{DebugTap, RouterContext, RouterSettings};
pub use dispatcher::Dispatcher;
pub use receiver::{
    create_receiver, Receiver, ReceiverConfig, ReceiverError, ReceiverRegistry,
};
pub use state_file::StateFile;
pub use subscriptions::SubscriptionManager;
pub use updates::{OscMessage, Update};
