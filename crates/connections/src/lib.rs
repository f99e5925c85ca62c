//! Duplex session registry and fan-out.
//!
//! Each accepted session owns an unbounded outbound channel whose single
//! consumer (the socket writer task in the API layer) is the write-
//! serialization token: within one session, frames are delivered in exactly
//! the order they were enqueued. Across sessions no ordering is guaranteed.

mod manager;
mod stream;

pub use manager::{
    ConnectionManager, EventEmitter, ManagerConfig, Outbound, SessionHandle, SessionMeta,
};
pub use stream::{ForexStreamer, StreamSource};
