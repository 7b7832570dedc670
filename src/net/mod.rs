//! Request/response values and the network transport.

mod client;
mod types;

pub use client::{FetchError, HttpTransport, Transport};
pub use types::{Method, Request, Response};
