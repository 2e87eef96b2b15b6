//! `PeerSeal` Core Library
//!
//! Shared functionality for `PeerSeal` components:
//! - Configuration resolution and hierarchy
//! - Tracing subscriber setup
//! - Common error types

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::{AccessPolicy, Config, KeyStoreBackend};
pub use error::{Error, Result};
pub use tracing_init::{init_tracing, init_tracing_from_config};
