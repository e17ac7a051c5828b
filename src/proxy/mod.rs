//! Transport-level plumbing shared by every service.
//!
//! Two pieces:
//! - the listener supervision loop: accept resiliently, dispatch each
//!   connection to its own task, back off on accept errors
//! - the bidirectional stream relay: pipe bytes between two established
//!   connections with close-both-on-either-exit semantics
//!
//! Everything here is protocol-agnostic; the DNS and RTMP collaborators ride
//! on top of it.

mod listener;
mod relay;

pub use listener::{supervise, Acceptor, ACCEPT_RETRY_DELAY};
pub use relay::{connect_and_relay, relay, RelayStats};
