//! Shunt - Path-Routing Reverse Proxy
//!
//! A TLS-terminating reverse proxy that routes each request path to a pool
//! of backends.
//!
//! ## Features
//!
//! - Round-robin, weighted, and random backend selection per path
//! - Response-driven quarantine: backends answering with configured
//!   distress tokens are excluded from selection for a bounded time
//! - Optional SOCKS5 egress per backend, with credentials
//! - Streamed relay with a bounded inspection buffer
//! - Self-signed certificate generation when no TLS material is configured

pub mod ban;
pub mod cert;
pub mod config;
pub mod error;
pub mod proxy;

#[cfg(test)]
pub mod test_utils;

pub use ban::BanTable;
pub use config::MainConfig;
pub use error::{Result, ShuntError};
