//! authsock-scope - scoped SSH agent proxy
//!
//! Exposes an allow-listed subset of an upstream SSH agent's keys on a
//! private Unix socket. The socket removes itself after a period without
//! new connections.

pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod protocol;
pub mod supervisor;

pub use error::{Error, Result};

/// Package version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name
pub const NAME: &str = env!("CARGO_PKG_NAME");
