//! Session/connection coordination for a bounded single-room chat hub.
//!
//! [`SessionRegistry`] owns every [`Session`]; the [`Coordinator`] is the only
//! task that mutates membership, queues and history once a member is
//! admitted; the pumps in [`pump`] move frames between a connection and the
//! coordinator.

pub mod config;
pub mod coordinator;
pub mod pump;
pub mod queue;
pub mod registry;
pub mod session;

pub use config::{LobbyConfig, MemberRetention};
pub use coordinator::{Coordinator, CoordinatorHandle, Request};
pub use pump::{ConnectionContext, Frame, PumpHandles};
pub use queue::{outbound_queue, Outbound, OutboundQueue, OutboundReceiver};
pub use registry::{Admission, SessionRegistry};
pub use session::{MemberState, Session};
