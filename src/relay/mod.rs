//! Sandbox relay: one duplex NDJSON connection multiplexing many exchanges.
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing
//!   with an inbound line limit.
//! - `envelope`: outbound/inbound message shapes.
//! - `channel`: [`RelayChannel`] handle and [`RelayDriver`] connection task.

pub mod channel;
pub mod codec;
pub mod envelope;

pub use channel::{ConnectionEnd, ConnectionState, RelayChannel, RelayDriver, UnsolicitedRx};
pub use envelope::{AdminKind, InboundEnvelope, RelayEnvelope};

use crate::Result;

/// Fire-and-forget path to the sandbox.
///
/// Action handlers depend on this rather than on [`RelayChannel`] so the
/// outbound side can be observed in isolation.
pub trait OutboundRelay: Send + Sync {
    /// Queue `envelope` for delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be queued.
    fn send(&self, envelope: &RelayEnvelope) -> Result<()>;
}
