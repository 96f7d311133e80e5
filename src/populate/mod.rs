//! # Populate
//!
//! Relation descriptors, call keys and the action-caller seam through which
//! the populate engine reaches other services.
//!
//! A relation is declared as `field -> "service.action"` or
//! `field -> {action, params}`. Each populate pass builds one call per
//! (record, field) keyed by `recordId_field_action`, dispatches the batch
//! concurrently and stitches the results back by the same key.

pub mod engine;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::DbResult;

pub use engine::PopulateEngine;

/// Declared relations: field name to descriptor
pub type Relations = BTreeMap<String, RelationSpec>;

/// Relation descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RelationConfig")]
pub struct RelationSpec {
    /// Remote action resolving the ids, e.g. `users.get`
    pub action: String,

    /// Extra parameters merged into every call
    pub params: Map<String, Value>,
}

/// Accepted configuration forms
#[derive(Deserialize)]
#[serde(untagged)]
enum RelationConfig {
    Action(String),
    Detailed {
        action: String,
        #[serde(default)]
        params: Map<String, Value>,
    },
}

impl From<RelationConfig> for RelationSpec {
    fn from(config: RelationConfig) -> Self {
        match config {
            RelationConfig::Action(action) => Self::new(action),
            RelationConfig::Detailed { action, params } => Self { action, params },
        }
    }
}

impl RelationSpec {
    /// Relation resolved by a bare action
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: Map::new(),
        }
    }

    /// Add an extra call parameter
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Key binding a dispatched call to the record field awaiting its result
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallKey(String);

impl CallKey {
    pub fn new(record_id: &str, field: &str, action: &str) -> Self {
        Self(format!("{}_{}_{}", record_id, field, action))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One outbound call of a populate batch
#[derive(Debug, Clone, PartialEq)]
pub struct PopulateCall {
    pub action: String,
    pub params: Value,
}

/// Dispatches named actions on other services.
///
/// Implementations own transport, routing and per-call deadlines.
#[async_trait]
pub trait ActionCaller: Send + Sync {
    /// Call one action
    async fn call(&self, action: &str, params: Value) -> DbResult<Value>;

    /// Call a batch concurrently and wait for every response.
    ///
    /// Fails with the first error observed once all calls have settled.
    async fn mcall(
        &self,
        calls: BTreeMap<CallKey, PopulateCall>,
    ) -> DbResult<HashMap<CallKey, Value>> {
        let pending = calls.into_iter().map(|(key, call)| async move {
            let result = self.call(&call.action, call.params).await;
            (key, result)
        });

        let mut responses = HashMap::new();
        for (key, result) in join_all(pending).await {
            responses.insert(key, result?);
        }
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_key_format() {
        let key = CallKey::new("A", "friends", "peer.get");
        assert_eq!(key.as_str(), "A_friends_peer.get");
    }

    #[test]
    fn test_relation_from_string() {
        let relations: Relations = serde_json::from_value(json!({
            "author": "users.get",
            "tags": {"action": "tags.get", "params": {"fields": ["name"]}}
        }))
        .unwrap();

        assert_eq!(relations["author"], RelationSpec::new("users.get"));
        assert_eq!(relations["tags"].action, "tags.get");
        assert_eq!(relations["tags"].params["fields"], json!(["name"]));
    }

    #[test]
    fn test_relation_round_trips_through_serde() {
        let spec = RelationSpec::new("users.get").with_param("strict", json!(true));
        let value = serde_json::to_value(&spec).unwrap();
        let back: RelationSpec = serde_json::from_value(value).unwrap();
        assert_eq!(back, spec);
    }

    struct Echo;

    #[async_trait]
    impl ActionCaller for Echo {
        async fn call(&self, action: &str, params: Value) -> DbResult<Value> {
            Ok(json!({"action": action, "params": params}))
        }
    }

    #[tokio::test]
    async fn test_default_mcall_answers_every_key() {
        let mut calls = BTreeMap::new();
        for id in ["A", "B"] {
            calls.insert(
                CallKey::new(id, "owner", "users.get"),
                PopulateCall {
                    action: "users.get".into(),
                    params: json!({ "id": id }),
                },
            );
        }

        let responses = Echo.mcall(calls).await.unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(
            responses[&CallKey::new("B", "owner", "users.get")]["params"]["id"],
            json!("B")
        );
    }
}
