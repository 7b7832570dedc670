//! Persistent store namespace for captured responses.
//!
//! This module provides the shared storage both the interceptor and the
//! offline facade work against:
//! - Named containers holding responses keyed by method + URL
//! - Per-key atomic writes and all-or-nothing batch writes
//! - Integrity check of stored bodies on every read
//!
//! The namespace is the only state the two sides share.

mod memory;
mod storage;
mod traits;

pub use memory::MemoryNamespace;
pub use storage::SqliteNamespace;
pub use traits::{RequestKey, StoreError, StoreName, StoreNamespace, StoredEntry};
