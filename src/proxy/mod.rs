//! Proxy core
//!
//! This module provides the reverse-proxy functionality:
//! - Per-path backend selection strategies
//! - Request forwarding with optional SOCKS5 egress
//! - Streamed response relay with quarantine-rule inspection
//! - TLS listener with per-request panic isolation

pub mod forward;
pub mod inspect;
pub mod router;
pub mod server;
pub mod strategy;

pub use forward::Forwarder;
pub use router::Router;
pub use server::ProxyServer;
pub use strategy::{create_selector, BackendSelector, Strategy};
