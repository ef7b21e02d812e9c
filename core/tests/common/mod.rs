//! Scripted in-memory transport shared by the scenario tests.
//!
//! # Design
//! Responses are looked up by path relative to `BASE`. `POST /$batch` is
//! emulated by answering every sub-request from the same script, so batched
//! and fan-out runs see identical data, unless the script gives `/$batch` a
//! response of its own. Counters record round trips, priming
//! calls and peak concurrency.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use query_core::types::{BatchRequestEnvelope, BatchResponseEnvelope, BatchResponseItem};
use query_core::{ApiClient, HttpRequest, HttpResponse, Transport, TransportError};
use serde::Deserialize;

pub const BASE: &str = "http://graph.test/v1.0";

pub fn client() -> ApiClient {
    ApiClient::new(BASE)
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct Profile {
    pub name: String,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct Owner {
    pub address: String,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct Calendar {
    pub owner: Owner,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct Drive {
    #[serde(rename = "driveType")]
    pub drive_type: String,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct Item {
    pub id: u64,
}

type EnvelopeEdit = Box<dyn Fn(&mut BatchResponseEnvelope) + Send + Sync>;

#[derive(Default)]
pub struct Scripted {
    responses: HashMap<String, (u16, String)>,
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
    prime_error: Option<TransportError>,
    envelope_edit: Option<EnvelopeEdit>,
    pub sends: AtomicUsize,
    pub primes: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl Scripted {
    pub fn new() -> Self {
        Self::default()
    }

    /// Profile, calendar and drive resources.
    pub fn graph() -> Self {
        Self::new()
            .respond("/me", 200, r#"{"name":"Ada"}"#)
            .respond("/me/calendar", 200, r#"{"owner":{"address":"a@b.com"}}"#)
            .respond("/me/drive", 200, r#"{"driveType":"personal"}"#)
    }

    /// `/items/0` .. `/items/{n-1}`, each answering `{"id": i}`.
    pub fn items(n: u64) -> Self {
        (0..n).fold(Self::new(), |script, i| {
            script.respond(&format!("/items/{i}"), 200, &format!(r#"{{"id":{i}}}"#))
        })
    }

    pub fn respond(mut self, path: &str, status: u16, body: &str) -> Self {
        self.responses
            .insert(path.to_string(), (status, body.to_string()));
        self
    }

    pub fn delay(mut self, path: &str, delay: Duration) -> Self {
        self.delays.insert(path.to_string(), delay);
        self
    }

    /// Requests to `path` fail at the transport level.
    pub fn fail(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }

    pub fn fail_priming(mut self) -> Self {
        self.prime_error = Some(TransportError::Credential("sign-in cancelled".into()));
        self
    }

    /// Tamper with every batch envelope before it is returned.
    pub fn edit_envelopes(
        mut self,
        edit: impl Fn(&mut BatchResponseEnvelope) + Send + Sync + 'static,
    ) -> Self {
        self.envelope_edit = Some(Box::new(edit));
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn primes(&self) -> usize {
        self.primes.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn lookup(&self, path: &str) -> (u16, String) {
        self.responses
            .get(path)
            .cloned()
            .unwrap_or((404, r#"{"error":"itemNotFound"}"#.to_string()))
    }

    fn batch(&self, request: &HttpRequest) -> HttpResponse {
        let envelope: BatchRequestEnvelope =
            serde_json::from_str(request.body.as_deref().unwrap_or_default()).unwrap();
        let mut reply = BatchResponseEnvelope {
            responses: envelope
                .requests
                .iter()
                .rev()
                .map(|sub| {
                    let (status, body) = self.lookup(&sub.url);
                    BatchResponseItem {
                        id: sub.id.clone(),
                        status,
                        headers: Default::default(),
                        body: serde_json::from_str(&body).ok(),
                    }
                })
                .collect(),
        };
        if let Some(edit) = &self.envelope_edit {
            edit(&mut reply);
        }
        HttpResponse::new(200, serde_json::to_vec(&reply).unwrap())
    }
}

#[async_trait]
impl Transport for Scripted {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let path = client().relative_url(&request).to_string();
        if let Some(delay) = self.delays.get(&path) {
            tokio::time::sleep(*delay).await;
        }
        let result = if self.failing.contains(&path) {
            Err(TransportError::Network(format!("connection reset on {path}")))
        } else if path == "/$batch" && !self.responses.contains_key(&path) {
            Ok(self.batch(&request))
        } else {
            let (status, body) = self.lookup(&path);
            Ok(HttpResponse::new(status, body))
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn prime_credential(&self) -> Result<(), TransportError> {
        self.primes.fetch_add(1, Ordering::SeqCst);
        match &self.prime_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
