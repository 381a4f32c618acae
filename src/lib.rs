//! # clustermq
//!
//! A clustered, replicated message-queue service: queues and queue
//! groups are replicated across every member of a process group via a
//! totally-ordered broadcast transport, so every node computes the same
//! state from the same record stream without a leader election protocol.
//!
//! The crate is organized around a single-writer "executive dispatcher"
//! (`executive::Executive`) that turns one replicated record into a pure
//! state transition plus a list of side-effecting `executive::Effect`s;
//! `node::Node` is the event loop that actually carries those effects
//! out. See `DESIGN.md` for how each module maps onto that split.

pub mod cli;
pub mod client;
pub mod error;
pub mod executive;
pub mod ipc;
pub mod limits;
pub mod logging;
pub mod model;
pub mod node;
pub mod state;
pub mod sync_engine;
pub mod timer;
pub mod translator;
pub mod transport;
pub mod wire;

pub use client::Client;
pub use error::{QueueError, QueueResult};
pub use executive::{Effect, Executive};
pub use node::{InboundEvent, InboundRequest, Node};
pub use state::ServiceState;
pub use timer::{TimerContext, TimerEvent, TimerFacility, TimerHandle, TokioTimerFacility};
pub use transport::{GroupTransport, MembershipChange, MembershipKind, TransportEvent};

/// The current version of the clustermq crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
