//! Local multi-service proxy supervisor.
//!
//! Binds one validated local IPv4 address and runs up to three independent
//! services sharing one process lifetime: a DNS-hijacking resolver (TCP+UDP
//! on :53), an RTMP stream relay (:1935), and a generic TCP forward proxy
//! (:8080).
//!
//! The reusable core is transport-level plumbing: the listener supervision
//! loop and the bidirectional stream relay in [`proxy`]. Service-specific
//! protocol logic lives behind the collaborator seams in [`services`].

pub mod config;
pub mod proxy;
pub mod services;
pub mod supervisor;

pub use config::{Args, Config, ConfigError, RtmpTarget};
pub use proxy::{connect_and_relay, relay, supervise, Acceptor, RelayStats, ACCEPT_RETRY_DELAY};
pub use supervisor::Supervisor;
