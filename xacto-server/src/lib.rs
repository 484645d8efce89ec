//! The Xacto server: client registry, per-connection sessions, accept
//! loop, and the configuration and logging plumbing around them. The
//! transactional core lives in the `xacto` crate.

pub mod config;
pub mod registry;
pub mod server;
pub mod session;
pub mod trace;
