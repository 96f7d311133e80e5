//! Populate engine
//!
//! Plans one call per (record, relation field), dispatches the whole batch
//! through a single `mcall`, then rewrites each relation field with the
//! response found under its call key. Record count, order and the
//! single/list shape of the result never change.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use super::{ActionCaller, CallKey, PopulateCall, Relations};
use crate::errors::{DbError, DbResult};
use crate::record::{id_to_string, is_present, Record, Records};

/// Resolves relation fields through batched remote lookups
pub struct PopulateEngine<'a> {
    relations: &'a Relations,
    id_field: &'a str,
    call_timeout: Option<Duration>,
}

impl<'a> PopulateEngine<'a> {
    pub fn new(relations: &'a Relations, id_field: &'a str) -> Self {
        Self {
            relations,
            id_field,
            call_timeout: None,
        }
    }

    /// Deadline for the whole batch
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Populate the requested relation fields
    pub async fn populate(
        &self,
        caller: &dyn ActionCaller,
        mut records: Records,
        fields: &[String],
    ) -> DbResult<Records> {
        let fields = self.declared_fields(fields);
        if fields.is_empty() {
            return Ok(records);
        }

        let calls = self.plan(&records, &fields);
        if calls.is_empty() {
            return Ok(records);
        }

        debug!(calls = calls.len(), fields = ?fields, "dispatching populate batch");
        let responses = match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, caller.mcall(calls))
                .await
                .map_err(|_| DbError::timed_out("populate", limit))??,
            None => caller.mcall(calls).await?,
        };

        records.for_each_mut(|record| self.merge(record, &fields, &responses));
        Ok(records)
    }

    /// Build the call batch. Duplicate keys collapse into one call.
    pub fn plan(&self, records: &Records, fields: &[String]) -> BTreeMap<CallKey, PopulateCall> {
        let mut calls = BTreeMap::new();

        for record in records.iter() {
            let Some(id) = self.record_id(record) else {
                continue;
            };
            for field in fields {
                let Some(spec) = self.relations.get(field) else {
                    continue;
                };
                let Some(raw) = record.get(field).filter(|v| is_present(v)) else {
                    continue;
                };

                let mut params = spec.params.clone();
                match raw {
                    Value::Array(ids) => params.insert("ids".to_string(), Value::Array(ids.clone())),
                    scalar => params.insert("id".to_string(), scalar.clone()),
                };

                calls
                    .entry(CallKey::new(&id, field, &spec.action))
                    .or_insert_with(|| PopulateCall {
                        action: spec.action.clone(),
                        params: Value::Object(params),
                    });
            }
        }

        calls
    }

    fn merge(&self, record: &mut Record, fields: &[String], responses: &HashMap<CallKey, Value>) {
        let Some(id) = self.record_id(record) else {
            return;
        };

        for field in fields {
            let Some(spec) = self.relations.get(field) else {
                continue;
            };
            let Some(raw) = record.get(field).filter(|v| is_present(v)) else {
                continue;
            };

            let key = CallKey::new(&id, field, &spec.action);
            match responses.get(&key) {
                Some(payload) => {
                    let shaped = shape_like(raw, payload.clone());
                    record.insert(field.clone(), shaped);
                }
                None => {
                    let gap = DbError::PopulateResolutionGap(key.to_string());
                    warn!(error = %gap, "field left unresolved");
                }
            }
        }
    }

    /// Requested fields that have a declared relation, deduplicated
    fn declared_fields(&self, fields: &[String]) -> Vec<String> {
        let mut declared: Vec<String> = Vec::new();
        for field in fields {
            if !self.relations.contains_key(field) {
                warn!(field = %field, "populate requested for undeclared relation; ignored");
                continue;
            }
            if !declared.contains(field) {
                declared.push(field.clone());
            }
        }
        declared
    }

    fn record_id(&self, record: &Record) -> Option<String> {
        record.get(self.id_field).and_then(id_to_string)
    }
}

/// Match the response to the cardinality of the raw field value
fn shape_like(raw: &Value, payload: Value) -> Value {
    match (raw, payload) {
        (Value::Array(_), Value::Array(items)) => Value::Array(items),
        (Value::Array(_), Value::Null) => Value::Array(Vec::new()),
        (Value::Array(_), single) => Value::Array(vec![single]),
        (_, Value::Array(items)) => items.into_iter().next().unwrap_or(Value::Null),
        (_, single) => single,
    }
}
