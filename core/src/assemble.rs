//! Result assembly on top of [`Query`].
//!
//! Two ways to collect a set of responses in one round:
//!
//! - **Structured**: bind each request to an `Option<T>` field of a
//!   caller-owned struct. The fields are written in place; read them once the
//!   query has been dropped.
//! - **By name**: give `(name, request)` pairs and get back a map from name
//!   to the decoded JSON value. The map has no order.
//!
//! Both run every other pending operation too, since they end in
//! `execute_all`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::codec::Codec;
use crate::error::{ExecuteError, ExecuteSummary};
use crate::http::HttpRequest;
use crate::query::Query;

/// Binds requests to output fields. Handed out by
/// [`Query::populate_structured`].
pub struct Fields<'q, 'a, C> {
    query: &'q mut Query<'a, C>,
}

impl<'a, C: Codec + 'a> Fields<'_, 'a, C> {
    /// Decode the response to `request` as `T` into `target`.
    ///
    /// `target` stays `None` if the response fails or has no body.
    pub fn bind<T>(&mut self, name: &str, request: HttpRequest, target: &'a mut Option<T>) -> &mut Self
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.query
            .add_request_as(name, request, move |value: T| *target = Some(value));
        self
    }
}

impl<'a, C: Codec + 'a> Query<'a, C> {
    /// Bind fields with `bind`, then execute everything pending.
    pub async fn populate_structured<F>(&mut self, bind: F) -> Result<ExecuteSummary, ExecuteError>
    where
        F: FnOnce(&mut Fields<'_, 'a, C>),
    {
        bind(&mut Fields { query: self });
        self.execute_all().await
    }

    /// Execute `requests` and collect each decoded body under its name.
    ///
    /// Names whose response failed or had no body are absent from the map.
    /// A repeated name keeps the value of its later entry in `requests`,
    /// whatever order the responses arrive in.
    pub async fn populate_by_name<I, S>(
        &mut self,
        requests: I,
    ) -> Result<HashMap<String, serde_json::Value>, ExecuteError>
    where
        I: IntoIterator<Item = (S, HttpRequest)>,
        S: Into<String>,
    {
        let values: Arc<Mutex<HashMap<String, (usize, serde_json::Value)>>> = Arc::default();
        for (position, (name, request)) in requests.into_iter().enumerate() {
            let name = name.into();
            let slot = Arc::clone(&values);
            let key = name.clone();
            self.add_request_as(name, request, move |value: serde_json::Value| {
                let mut values = slot.lock();
                if !matches!(values.get(&key), Some((kept, _)) if *kept > position) {
                    values.insert(key, (position, value));
                }
            });
        }

        self.execute_all().await?;
        let values = std::mem::take(&mut *values.lock());
        Ok(values
            .into_iter()
            .map(|(name, (_, value))| (name, value))
            .collect())
    }
}
