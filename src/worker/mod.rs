//! Request interception for the application shell and session audio.
//!
//! A [`Registration`] owns the active `Interceptor` and moves shell
//! versions through install and activation. The interceptor classifies each
//! request and applies the matching retrieval strategy against the store
//! namespace.

mod classify;
mod intercept;
mod lifecycle;
mod version;

pub use lifecycle::{Registration, ShellBuild};
pub use version::{ShellVersion, StoreLayout};
