//! Room Registry and Connection State: the addressable registry of
//! connections and rooms, shared between the dispatcher, the signaling
//! relay, and the document coordinator.

mod connection;
mod registry;
mod room;

pub use connection::{ConnectionRecord, OutboundSink, PeerInfo};
pub use registry::{DocUpdateOutcome, JoinOutcome, Registry};
