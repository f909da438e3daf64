//! Aegis Common - Shared Types and Utilities
//!
//! Foundational types, error handling, and utilities used by the Aegis
//! storage engine and the historian stores built on top of it.
//!
//! Key Features:
//! - Unified error types classified into validation, conflict and unsupported
//! - Scoped identifiers, time sentinels and validity extents
//! - TOML-backed configuration for storage and datastores
//! - Utility functions for hashing and checksums
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use config::{DatastoreConfig, FullTextConfig, HistorianConfig, IdProviderType, StorageConfig};
pub use error::{AegisError, Result};
pub use types::*;
