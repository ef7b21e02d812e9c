//! Authenticated transport: executes one request descriptor.
//!
//! # Design
//! The aggregator only sees the [`Transport`] trait. `UreqTransport` is the
//! bundled implementation: it drives a blocking ureq agent from
//! `spawn_blocking` so concurrent operations really run in parallel, and
//! treats 4xx/5xx as data so status interpretation stays in the router.
//!
//! Bearer tokens come from a [`CredentialProvider`]. The token is negotiated
//! at most once per transport and then shared read-only by every concurrent
//! call, whether it was primed up front or fetched by the first send.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use ureq::typestate::WithBody;

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Executes request descriptors against the remote API.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one round-trip. Error statuses are `Ok` responses.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Acquire and cache the credential before concurrent dispatch.
    async fn prime_credential(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Source of bearer tokens. May block (interactive or network sign-in).
pub trait CredentialProvider: Send + Sync {
    fn acquire(&self) -> Result<String, TransportError>;
}

impl<F> CredentialProvider for F
where
    F: Fn() -> Result<String, TransportError> + Send + Sync,
{
    fn acquire(&self) -> Result<String, TransportError> {
        self()
    }
}

/// A fixed, already-issued token.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl CredentialProvider for StaticToken {
    fn acquire(&self) -> Result<String, TransportError> {
        Ok(self.0.clone())
    }
}

/// [`Transport`] backed by a blocking ureq agent.
pub struct UreqTransport {
    agent: ureq::Agent,
    credential: Option<std::sync::Arc<dyn CredentialProvider>>,
    token: OnceCell<String>,
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self::with_agent(agent)
    }

    /// Use a preconfigured agent. It must have `http_status_as_error(false)`.
    pub fn with_agent(agent: ureq::Agent) -> Self {
        Self {
            agent,
            credential: None,
            token: OnceCell::new(),
        }
    }

    pub fn with_credential(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.credential = Some(std::sync::Arc::new(provider));
        self
    }

    async fn token(&self) -> Result<Option<String>, TransportError> {
        let Some(provider) = &self.credential else {
            return Ok(None);
        };
        let token = self
            .token
            .get_or_try_init(|| {
                let provider = std::sync::Arc::clone(provider);
                async move {
                    tracing::debug!("acquiring credential");
                    match tokio::task::spawn_blocking(move || provider.acquire()).await {
                        Ok(acquired) => acquired,
                        Err(e) => Err(TransportError::Join(e.to_string())),
                    }
                }
            })
            .await?;
        Ok(Some(token.clone()))
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for UreqTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let token = self.token().await?;
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || execute(&agent, request, token.as_deref()))
            .await
            .map_err(|e| TransportError::Join(e.to_string()))?
    }

    async fn prime_credential(&self) -> Result<(), TransportError> {
        self.token().await.map(|_| ())
    }
}

/// Run one request on the calling thread.
fn execute(
    agent: &ureq::Agent,
    request: HttpRequest,
    token: Option<&str>,
) -> Result<HttpResponse, TransportError> {
    let HttpRequest {
        method,
        path,
        mut headers,
        body,
    } = request;
    if let Some(token) = token {
        headers.push(("authorization".to_string(), format!("Bearer {token}")));
    }
    tracing::debug!(%method, %path, "sending request");

    let result = match method {
        HttpMethod::Get => with_headers(agent.get(&path), &headers).call(),
        HttpMethod::Delete => with_headers(agent.delete(&path), &headers).call(),
        HttpMethod::Post => send_body(with_headers(agent.post(&path), &headers), body),
        HttpMethod::Put => send_body(with_headers(agent.put(&path), &headers), body),
        HttpMethod::Patch => send_body(with_headers(agent.patch(&path), &headers), body),
    };
    let mut response = result.map_err(|e| TransportError::Network(e.to_string()))?;

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let body = response
        .body_mut()
        .read_to_vec()
        .map_err(|e| TransportError::Network(e.to_string()))?;

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    headers: &[(String, String)],
) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn send_body(
    builder: ureq::RequestBuilder<WithBody>,
    body: Option<String>,
) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
    match body {
        Some(body) => builder.send(body.as_bytes()),
        None => builder.send_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn credential_is_acquired_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let transport = UreqTransport::new().with_credential(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("secret".to_string())
        });

        transport.prime_credential().await.unwrap();
        transport.prime_credential().await.unwrap();
        assert_eq!(transport.token().await.unwrap().as_deref(), Some("secret"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_credential_is_retried_on_next_use() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let transport = UreqTransport::new().with_credential(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TransportError::Credential("sign-in cancelled".into()))
            } else {
                Ok("second".to_string())
            }
        });

        let err = transport.prime_credential().await.unwrap_err();
        assert!(matches!(err, TransportError::Credential(_)));
        assert_eq!(transport.token().await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn no_provider_means_no_token() {
        let transport = UreqTransport::new();
        transport.prime_credential().await.unwrap();
        assert!(transport.token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let transport = UreqTransport::new();
        let request = crate::client::ApiClient::new("http://127.0.0.1:1").get("/me");
        let err = transport.send(request).await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
    }
}
