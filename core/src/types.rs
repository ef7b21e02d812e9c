//! Wire DTOs for the JSON batch envelope.
//!
//! # Design
//! These mirror the mock-server's batch schema but are defined independently;
//! the integration tests catch drift between the two crates. Sub-request ids
//! are strings on the wire even though the planner only ever issues the
//! group-local sequence numbers `0..n`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Outbound batch: one entry per operation in the group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchRequestEnvelope {
    pub requests: Vec<BatchRequestItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchRequestItem {
    pub id: String,
    pub method: String,
    /// URL relative to the API base, e.g. `/me/calendar`.
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Inbound batch: one entry per sub-request, in any order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchResponseEnvelope {
    pub responses: Vec<BatchResponseItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchResponseItem {
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Absent and `null` both mean "no body".
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_item_omits_empty_fields() {
        let item = BatchRequestItem {
            id: "0".into(),
            method: "GET".into(),
            url: "/me".into(),
            headers: BTreeMap::new(),
            body: None,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json, serde_json::json!({"id":"0","method":"GET","url":"/me"}));
    }

    #[test]
    fn response_item_defaults_missing_fields() {
        let item: BatchResponseItem = serde_json::from_str(r#"{"id":"3","status":204}"#).unwrap();
        assert_eq!(item.id, "3");
        assert_eq!(item.status, 204);
        assert!(item.headers.is_empty());
        assert!(item.body.is_none());

        let item: BatchResponseItem =
            serde_json::from_str(r#"{"id":"1","status":200,"body":null}"#).unwrap();
        assert!(item.body.is_none());
    }
}
