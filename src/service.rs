//! # Service
//!
//! CRUD-style operations over one adapter: `find`, `count`, `list`, `get`,
//! `create`, `update`, `remove`, `findAndUpdate`. Every read result goes
//! through projection and then the populate engine.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::adapter::{Adapter, DeleteSummary};
use crate::config::ServiceSettings;
use crate::errors::{DbError, DbResult};
use crate::populate::{ActionCaller, PopulateEngine};
use crate::projection::Projection;
use crate::query::{ListPage, PageRequest, Query};
use crate::record::{Record, Records};

/// Operations of one named service
pub struct Service {
    name: String,
    adapter: Arc<dyn Adapter>,
    settings: ServiceSettings,
    caller: Option<Arc<dyn ActionCaller>>,
}

impl Service {
    /// Validates the settings once; the adapter must use the same id field
    pub fn new(
        name: impl Into<String>,
        adapter: Arc<dyn Adapter>,
        settings: ServiceSettings,
    ) -> DbResult<Self> {
        settings.validate()?;
        if adapter.id_field() != settings.id_field {
            return Err(DbError::validation(format!(
                "idField '{}' does not match the {} adapter's '{}'",
                settings.id_field,
                adapter.name(),
                adapter.id_field()
            )));
        }
        Ok(Self {
            name: name.into(),
            adapter,
            settings,
            caller: None,
        })
    }

    /// Route populate calls through `caller`
    pub fn with_caller(mut self, caller: Arc<dyn ActionCaller>) -> Self {
        self.caller = Some(caller);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub async fn connect(&self) -> DbResult<()> {
        self.adapter.connect().await
    }

    pub async fn disconnect(&self) -> DbResult<()> {
        self.adapter.disconnect().await
    }

    /// Run an action by name with JSON params
    pub async fn dispatch(&self, action: &str, params: Value) -> DbResult<Value> {
        debug!(service = %self.name, action = %action, "dispatch");
        match action {
            "find" => to_json(self.find(&params).await?),
            "count" => to_json(self.count(&params).await?),
            "list" => to_json(self.list(&params).await?),
            "get" => Ok(self.get(&params).await?.into_value()),
            "create" | "insert" => to_json(self.create(&params).await?),
            "update" => to_json(self.update(&params).await?),
            "remove" => to_json(self.remove(&params).await?),
            "findAndUpdate" => to_json(self.find_and_update(&params).await?),
            other => Err(DbError::validation(format!(
                "Unknown action {}.{}",
                self.name, other
            ))),
        }
    }

    pub async fn find(&self, params: &Value) -> DbResult<Vec<Record>> {
        let mut query = Query::from_params(params)?;
        if query.page.is_some() || query.page_size.is_some() {
            let request = self.page_request(&query)?;
            query = query.with_page(request);
        }
        if let Some(cap) = self.settings.limit_cap() {
            query.limit = Some(query.limit.map_or(cap, |limit| limit.min(cap)));
        }

        let rows = self.adapter.find(&query).await?;
        Ok(self.transform(Records::Many(rows), &query).await?.into_vec())
    }

    pub async fn count(&self, params: &Value) -> DbResult<u64> {
        let query = Query::from_params(params)?;
        self.adapter.count(&query.without_window()).await
    }

    /// One page plus the total; rows and count are fetched concurrently
    pub async fn list(&self, params: &Value) -> DbResult<ListPage> {
        let query = Query::from_params(params)?;
        if query.limit.is_some() || query.offset.is_some() {
            return Err(DbError::validation(
                "Invalid parameter. Action list takes page and pageSize, not limit or offset!",
            ));
        }
        let request = self.page_request(&query)?;
        let query = query.with_page(request);
        let count_query = query.without_window();

        let (rows, total) = tokio::join!(self.adapter.find(&query), self.adapter.count(&count_query));
        let rows = rows?;
        let total = total?;

        let rows = self.transform(Records::Many(rows), &query).await?.into_vec();
        Ok(request.into_page(rows, total))
    }

    /// By `id` (one record), by `ids` (a list in id order) or by a bare id
    pub async fn get(&self, params: &Value) -> DbResult<Records> {
        let (target, query) = match params {
            Value::Object(map) => {
                let target = map
                    .get("ids")
                    .or_else(|| map.get("id"))
                    .filter(|v| !v.is_null())
                    .cloned()
                    .ok_or_else(|| {
                        DbError::validation("Invalid parameter. Action get requires the parameter id or ids!")
                    })?;
                (target, Query::from_params(params)?)
            }
            Value::String(_) | Value::Number(_) | Value::Array(_) => (params.clone(), Query::new()),
            _ => {
                return Err(DbError::validation(
                    "Invalid parameter. Action get requires the parameter id or ids!",
                ))
            }
        };

        let records = match target {
            Value::Array(ids) => Records::Many(self.adapter.find_by_ids(&ids).await?),
            id => {
                let record = self
                    .adapter
                    .find_by_id(&id)
                    .await?
                    .ok_or_else(|| DbError::not_found(crate::adapter::id_label(&id)))?;
                Records::One(record)
            }
        };
        self.transform(records, &query).await
    }

    /// Insert one record; the store assigns the id
    pub async fn create(&self, params: &Value) -> DbResult<Record> {
        let record = params
            .as_object()
            .filter(|map| !map.is_empty())
            .cloned()
            .ok_or_else(|| DbError::validation("Invalid parameter. Action create requires a non-empty object!"))?;

        let created = self.adapter.insert(record).await?;
        Ok(self.transform_one(created))
    }

    /// Merge the params (minus `id`) into the record named by `id`
    pub async fn update(&self, params: &Value) -> DbResult<Record> {
        let mut patch = params.as_object().cloned().unwrap_or_default();
        let id = patch
            .remove(&self.settings.id_field)
            .filter(|id| !id.is_null())
            .ok_or_else(|| self.missing_id("update"))?;

        let updated = self.adapter.update_by_id(&id, patch).await?;
        Ok(self.transform_one(updated))
    }

    pub async fn remove(&self, params: &Value) -> DbResult<DeleteSummary> {
        let id = match params {
            Value::Object(map) => map.get(&self.settings.id_field).filter(|id| !id.is_null()),
            Value::String(_) | Value::Number(_) => Some(params),
            _ => None,
        }
        .ok_or_else(|| self.missing_id("remove"))?;

        self.adapter.remove_by_id(id).await
    }

    /// Apply `update` to every record matching the query
    pub async fn find_and_update(&self, params: &Value) -> DbResult<Vec<Record>> {
        let query = Query::from_params(params)?;
        let patch = params
            .get("update")
            .and_then(Value::as_object)
            .filter(|map| !map.is_empty())
            .ok_or_else(|| {
                DbError::validation("Invalid parameter. Action findAndUpdate requires an update object!")
            })?;

        let updated = self.adapter.find_and_update(&query, patch).await?;
        let projection = Projection::resolve(&self.settings.fields, query.fields.as_ref());
        Ok(updated.into_iter().map(|r| projection.apply(r)).collect())
    }

    pub async fn remove_all(&self) -> DbResult<DeleteSummary> {
        self.adapter.remove_all().await
    }

    fn page_request(&self, query: &Query) -> DbResult<PageRequest> {
        let page_size = query
            .page_size
            .unwrap_or(self.settings.page_size)
            .min(self.settings.max_page_size);
        PageRequest::new(query.page.unwrap_or(1), page_size)
    }

    fn missing_id(&self, action: &str) -> DbError {
        DbError::validation(format!(
            "Invalid parameter. Action {} requires the parameter {}!",
            action, self.settings.id_field
        ))
    }

    fn transform_one(&self, record: Record) -> Record {
        Projection::resolve(&self.settings.fields, None).apply(record)
    }

    /// Projection, then populate
    async fn transform(&self, records: Records, query: &Query) -> DbResult<Records> {
        let projection = Projection::resolve(&self.settings.fields, query.fields.as_ref());
        let records = projection.project(records);

        if query.populate.is_empty() {
            return Ok(records);
        }
        let Some(caller) = &self.caller else {
            warn!(service = %self.name, "populate requested without an action caller; skipped");
            return Ok(records);
        };

        PopulateEngine::new(&self.settings.populates, &self.settings.id_field)
            .with_timeout(self.settings.call_timeout())
            .populate(caller.as_ref(), records, &query.populate)
            .await
    }
}

fn to_json<T: serde::Serialize>(value: T) -> DbResult<Value> {
    serde_json::to_value(value).map_err(|e| DbError::backend("serialize", e))
}
