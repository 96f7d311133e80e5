//! polystore - uniform CRUD services over interchangeable storage backends
//!
//! A backend-agnostic [`Query`] (filter tree, search shorthand, sort,
//! paging window) is compiled or translated for four adapters: an
//! in-process indexed store, an embedded relational engine, a document
//! store and a search index. Services layer projection and batched
//! relation population on top.

pub mod adapter;
pub mod config;
pub mod errors;
pub mod populate;
pub mod projection;
pub mod query;
pub mod record;
pub mod service;

pub use adapter::{Adapter, DeleteSummary};
pub use config::ServiceSettings;
pub use errors::{DbError, DbResult};
pub use populate::{ActionCaller, PopulateEngine, RelationSpec, Relations};
pub use projection::Projection;
pub use query::{ListPage, PageRequest, Query};
pub use record::{Record, Records};
pub use service::Service;
