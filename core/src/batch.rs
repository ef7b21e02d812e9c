//! Batch planner: groups operations into provider batch envelopes.
//!
//! # Design
//! A group of at most `max_group_size` descriptors is encoded into one
//! `POST <base>/$batch` request whose sub-requests carry the group-local
//! sequence ids `0..n`. The single response envelope is then split back into
//! one `HttpResponse` per sequence id, in dispatch order, so each can be
//! routed with its originating operation's result type.
//!
//! The envelope must line up exactly with the group. A count mismatch, or a
//! missing, duplicate or unknown id is a protocol error for the whole group;
//! nothing is silently dropped. An envelope that itself failed (status >= 400)
//! is handed to every operation in the group as their response.

use crate::client::ApiClient;
use crate::config::BatchConfig;
use crate::error::QueryError;
use crate::http::{HttpRequest, HttpResponse};
use crate::types::{BatchRequestEnvelope, BatchRequestItem, BatchResponseEnvelope, BatchResponseItem};

/// Encodes groups of descriptors into batch envelopes and decodes the replies.
#[derive(Debug, Clone)]
pub struct BatchPlanner {
    client: ApiClient,
    endpoint: String,
    max_group_size: usize,
}

impl BatchPlanner {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            client: ApiClient::new(&config.base_url),
            endpoint: config.endpoint.clone(),
            max_group_size: config.max_group_size.max(1),
        }
    }

    pub fn max_group_size(&self) -> usize {
        self.max_group_size
    }

    /// Split `items` into consecutive groups of at most `max_group_size`,
    /// keeping their relative order.
    pub fn partition<T>(&self, items: Vec<T>) -> Vec<Vec<T>> {
        let mut groups = Vec::with_capacity(items.len().div_ceil(self.max_group_size));
        let mut items = items.into_iter().peekable();
        while items.peek().is_some() {
            groups.push(items.by_ref().take(self.max_group_size).collect());
        }
        groups
    }

    /// Build the single outbound request carrying every descriptor in `group`.
    pub fn encode<'r, I>(&self, group: I) -> Result<HttpRequest, QueryError>
    where
        I: IntoIterator<Item = &'r HttpRequest>,
    {
        let requests = group
            .into_iter()
            .enumerate()
            .map(|(seq, request)| BatchRequestItem {
                id: seq.to_string(),
                method: request.method.as_str().to_string(),
                url: self.client.relative_url(request).to_string(),
                headers: request.headers.iter().cloned().collect(),
                body: request.body.as_deref().map(embed_body),
            })
            .collect();
        let envelope = BatchRequestEnvelope { requests };
        Ok(self.client.post_json(&self.endpoint, &envelope)?)
    }

    /// Split `envelope` into one response per sequence id `0..expected`.
    pub fn demultiplex(
        &self,
        envelope: HttpResponse,
        expected: usize,
    ) -> Result<Vec<HttpResponse>, QueryError> {
        if envelope.is_server_error() {
            tracing::warn!(status = envelope.status, expected, "batch envelope rejected");
            return Ok(vec![envelope; expected]);
        }

        let parsed: BatchResponseEnvelope = serde_json::from_slice(&envelope.body)
            .map_err(|e| QueryError::Protocol(format!("undecodable batch envelope: {e}")))?;

        if parsed.responses.len() != expected {
            return Err(QueryError::Protocol(format!(
                "expected {expected} sub-responses, got {}",
                parsed.responses.len()
            )));
        }

        let mut slots: Vec<Option<HttpResponse>> = vec![None; expected];
        for item in parsed.responses {
            let seq = item
                .id
                .parse::<usize>()
                .ok()
                .filter(|seq| *seq < expected)
                .ok_or_else(|| QueryError::Protocol(format!("unknown sub-response id {:?}", item.id)))?;
            if slots[seq].is_some() {
                return Err(QueryError::Protocol(format!("duplicate sub-response id {seq}")));
            }
            slots[seq] = Some(into_response(item)?);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(seq, slot)| {
                slot.ok_or_else(|| QueryError::Protocol(format!("missing sub-response id {seq}")))
            })
            .collect()
    }
}

/// JSON bodies are embedded as JSON; anything else travels as a string.
fn embed_body(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap_or_else(|_| serde_json::Value::String(body.to_string()))
}

fn into_response(item: BatchResponseItem) -> Result<HttpResponse, QueryError> {
    let body = match item.body {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(value) => serde_json::to_vec(&value)
            .map_err(|e| QueryError::Protocol(format!("sub-response {}: {e}", item.id)))?,
    };
    Ok(HttpResponse {
        status: item.status,
        headers: item.headers.into_iter().collect(),
        body,
    })
}
