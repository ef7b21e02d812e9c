//! HTTP request descriptors and raw responses as plain data.
//!
//! # Design
//! The core never opens a socket itself. Callers (or a [`Transport`]) take an
//! `HttpRequest`, perform the round-trip and hand back an `HttpResponse`.
//! Both types are owned and `Clone` so they can move freely between the
//! pending set, the batch planner and blocking transport threads.
//!
//! [`Transport`]: crate::transport::Transport

use std::fmt;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outbound call described as plain data.
///
/// Built by [`ApiClient`](crate::client::ApiClient). Never mutated after it
/// is handed to a [`Query`](crate::query::Query).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// A completed HTTP exchange described as plain data.
///
/// 4xx/5xx statuses are still `HttpResponse` values; only failures to complete
/// the exchange at all are transport errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Statuses the router hands to the server-error handler.
    pub fn is_server_error(&self) -> bool {
        self.status >= 400
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// Body as text, replacing invalid UTF-8. Used for error reporting.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
