//! Request and response values shared by the interceptor, the store and the network.

use bytes::Bytes;
use std::fmt;
use url::Url;

/// HTTP method, part of a request's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Delete,
  Patch,
  Options,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Head => "HEAD",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Delete => "DELETE",
      Self::Patch => "PATCH",
      Self::Options => "OPTIONS",
    }
  }

  /// Parse a method name, case-insensitively.
  pub fn parse(s: &str) -> Option<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Some(Self::Get),
      "HEAD" => Some(Self::Head),
      "POST" => Some(Self::Post),
      "PUT" => Some(Self::Put),
      "DELETE" => Some(Self::Delete),
      "PATCH" => Some(Self::Patch),
      "OPTIONS" => Some(Self::Options),
      _ => None,
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// An outgoing request descriptor.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::Get, url)
  }
}

/// A fully captured response.
///
/// The body is read off the wire once into a shared buffer, so cloning a
/// response hands out another view of the same bytes. That is how one copy
/// goes back to the caller while the other is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  #[cfg(test)]
  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// The response-shaped failure handed to callers when neither the network
  /// nor the store could answer.
  pub fn network_error() -> Self {
    Self::new(0, Bytes::new())
  }

  pub fn is_network_error(&self) -> bool {
    self.status == 0
  }

  /// 2xx status.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}
