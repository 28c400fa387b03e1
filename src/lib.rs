//! Plinth: declarative-table REST backend over embedded SQLite.

pub mod access;
pub mod auth;
pub mod binder;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;

pub use access::{AccessDecision, AccessPolicy, AccessRule, Action, OwnershipCheck};
pub use auth::{Caller, IdentityDecoder, MaybeCaller, Role, StaticTokens};
pub use cache::{MetadataCache, TtlCache};
pub use config::{AppConfig, ConfigListener, ConfigStore};
pub use error::AppError;
pub use registry::{ensure_system_tables, Column, MetaField, TableInfo, TableRegistry};
pub use routes::{api_routes, common_routes};
pub use service::backup::BackupService;
pub use service::functions::FunctionService;
pub use service::rows::RowService;
pub use service::schema::SchemaService;
pub use state::AppState;
