//! Request descriptor builder bound to one API base URL.
//!
//! # Design
//! `ApiClient` holds only a `base_url` and carries no mutable state. It
//! produces `HttpRequest` values; sending them is the job of a
//! [`Transport`](crate::transport::Transport), usually via a
//! [`Query`](crate::query::Query).

use serde::Serialize;

use crate::error::CodecError;
use crate::http::{HttpMethod, HttpRequest};

/// Stateless builder of request descriptors for one API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiClient {
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn get(&self, path: &str) -> HttpRequest {
        self.without_body(HttpMethod::Get, path)
    }

    pub fn delete(&self, path: &str) -> HttpRequest {
        self.without_body(HttpMethod::Delete, path)
    }

    pub fn post_json<T: Serialize>(&self, path: &str, input: &T) -> Result<HttpRequest, CodecError> {
        self.with_json(HttpMethod::Post, path, input)
    }

    pub fn put_json<T: Serialize>(&self, path: &str, input: &T) -> Result<HttpRequest, CodecError> {
        self.with_json(HttpMethod::Put, path, input)
    }

    pub fn patch_json<T: Serialize>(&self, path: &str, input: &T) -> Result<HttpRequest, CodecError> {
        self.with_json(HttpMethod::Patch, path, input)
    }

    /// The request's URL relative to this client's base URL.
    ///
    /// Requests built for a different host keep their absolute URL.
    pub fn relative_url<'r>(&self, request: &'r HttpRequest) -> &'r str {
        match request.path.strip_prefix(&self.base_url) {
            Some("") => "/",
            Some(rest) if rest.starts_with('/') => rest,
            _ => &request.path,
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    fn without_body(&self, method: HttpMethod, path: &str) -> HttpRequest {
        HttpRequest {
            method,
            path: self.url(path),
            headers: Vec::new(),
            body: None,
        }
    }

    fn with_json<T: Serialize>(
        &self,
        method: HttpMethod,
        path: &str,
        input: &T,
    ) -> Result<HttpRequest, CodecError> {
        let body = serde_json::to_string(input).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(HttpRequest {
            method,
            path: self.url(path),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Some(body),
        })
    }
}
