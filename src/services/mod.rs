//! Service launchers.
//!
//! One launcher per service kind. Each resolves its bind address, constructs
//! its connection handler (or collaborator), registers its listener tasks
//! with the supervisor, and returns the bound address. Launcher errors are
//! fatal startup errors.

pub mod dns;
pub mod forward;
pub mod rtmp;
