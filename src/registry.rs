//! Authoritative table metadata: the `_tables` system table, PRAGMA column
//! introspection, and the invalidate-on-write TTL cache in front of both.
//! Stale metadata here is a correctness bug (access policy and auth
//! redaction read through this), so every schema mutation must invalidate.

use crate::access::AccessPolicy;
use crate::cache::MetadataCache;
use crate::error::AppError;
use crate::sql::{is_valid_ident, quoted};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::sync::Arc;

/// System table holding one row per registered table.
pub const TABLES_TABLE: &str = "_tables";
/// System table holding stored functions.
pub const FUNCTIONS_TABLE: &str = "_functions";
/// System table holding the raw-query history.
pub const QUERY_HISTORY_TABLE: &str = "_query_history";

/// Metadata fields that can be requested (and cached) individually.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetaField {
    Name,
    Auth,
    System,
    Indexes,
    Access,
}

impl MetaField {
    pub const ALL: [MetaField; 5] = [
        MetaField::Name,
        MetaField::Auth,
        MetaField::System,
        MetaField::Indexes,
        MetaField::Access,
    ];

    /// Cache-key suffix; doubles as the `_tables` column name.
    fn key(self) -> &'static str {
        match self {
            MetaField::Name => "name",
            MetaField::Auth => "auth",
            MetaField::System => "system",
            MetaField::Indexes => "indexes",
            MetaField::Access => "access",
        }
    }
}

/// A named index over an ordered column list.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
}

/// Registry row for one table.
#[derive(Clone, Debug, Default)]
pub struct TableInfo {
    pub name: String,
    pub is_auth: bool,
    pub is_system: bool,
    pub indexes: Vec<IndexDef>,
    pub access: AccessPolicy,
}

/// Introspected column. Not persisted; derived from PRAGMA data.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub cid: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub declared_type: String,
    pub not_null: bool,
    pub pk: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Referenced table when the column is a foreign key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub auth: bool,
}

fn info_key(table: &str, field: MetaField) -> String {
    format!("table_info:{}:{}", table, field.key())
}

fn columns_key(table: &str) -> String {
    format!("columns:{}", table)
}

pub struct TableRegistry {
    pool: SqlitePool,
    cache: Arc<dyn MetadataCache>,
}

impl TableRegistry {
    pub fn new(pool: SqlitePool, cache: Arc<dyn MetadataCache>) -> Self {
        Self { pool, cache }
    }

    /// Fetch table metadata, reading only the requested fields. An empty
    /// slice means all fields. Each field is cached independently; one
    /// combined read backfills whatever was missing.
    pub async fn info(&self, table: &str, fields: &[MetaField]) -> Result<TableInfo, AppError> {
        let fields: &[MetaField] = if fields.is_empty() {
            &MetaField::ALL
        } else {
            fields
        };

        let mut info = TableInfo {
            name: table.to_string(),
            ..TableInfo::default()
        };
        let mut missing = Vec::new();
        for field in fields {
            match self.cache.get(&info_key(table, *field)) {
                Some(value) => apply_cached(&mut info, *field, value),
                None => missing.push(*field),
            }
        }
        if missing.is_empty() {
            return Ok(info);
        }

        let cols: Vec<String> = missing.iter().map(|f| quoted(f.key())).collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE name = ?",
            cols.join(", "),
            quoted(TABLES_TABLE)
        );
        let row = sqlx::query(&sql)
            .bind(table)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("table {}", table)))?;

        for field in &missing {
            match field {
                MetaField::Name => {
                    info.name = row.try_get("name")?;
                    self.cache
                        .set(&info_key(table, *field), Value::String(info.name.clone()));
                }
                MetaField::Auth => {
                    info.is_auth = row.try_get("auth")?;
                    self.cache
                        .set(&info_key(table, *field), Value::Bool(info.is_auth));
                }
                MetaField::System => {
                    info.is_system = row.try_get("system")?;
                    self.cache
                        .set(&info_key(table, *field), Value::Bool(info.is_system));
                }
                MetaField::Indexes => {
                    let raw: String = row.try_get("indexes")?;
                    info.indexes = serde_json::from_str(&raw).unwrap_or_default();
                    let cached = serde_json::to_value(&info.indexes).unwrap_or(Value::Null);
                    self.cache.set(&info_key(table, *field), cached);
                }
                MetaField::Access => {
                    let raw: String = row.try_get("access")?;
                    info.access = AccessPolicy::parse(&raw);
                    self.cache.set(&info_key(table, *field), Value::String(raw));
                }
            }
        }
        Ok(info)
    }

    /// Introspect a table's columns. The unredacted set is cached; auth
    /// redaction is applied on the way out: `password` and `salt` are
    /// dropped unless `include_auth`, which exposes `salt` but never
    /// `password`.
    pub async fn columns(&self, table: &str, include_auth: bool) -> Result<Vec<Column>, AppError> {
        let all: Vec<Column> = match self
            .cache
            .get(&columns_key(table))
            .and_then(|v| serde_json::from_value(v).ok())
        {
            Some(cols) => cols,
            None => {
                let cols = self.introspect(table).await?;
                let cached = serde_json::to_value(&cols).unwrap_or(Value::Null);
                self.cache.set(&columns_key(table), cached);
                cols
            }
        };

        let info = self.info(table, &[MetaField::Auth]).await?;
        if !info.is_auth {
            return Ok(all);
        }
        Ok(all
            .into_iter()
            .filter(|c| match c.name.as_str() {
                "password" => false,
                "salt" => include_auth,
                _ => true,
            })
            .collect())
    }

    async fn introspect(&self, table: &str) -> Result<Vec<Column>, AppError> {
        if !is_valid_ident(table) {
            return Err(AppError::BadRequest(format!(
                "invalid table name: {:?}",
                table
            )));
        }
        let rows = sqlx::query(
            r#"
            SELECT
                info.cid AS cid,
                info.name AS name,
                info."type" AS declared_type,
                info."notnull" AS not_null,
                info.pk AS pk,
                info.dflt_value AS dflt_value,
                fk."table" AS reference
            FROM pragma_table_info(?) AS info
            LEFT JOIN pragma_foreign_key_list(?) AS fk ON info.name = fk."from"
            ORDER BY info.cid
            "#,
        )
        .bind(table)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(AppError::NotFound(format!("table {}", table)));
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let reference: Option<String> = row.try_get("reference")?;
            let declared_type: String = row.try_get("declared_type")?;
            columns.push(Column {
                cid: row.try_get("cid")?,
                name: row.try_get("name")?,
                declared_type: if reference.is_some() {
                    "RELATION".to_string()
                } else {
                    declared_type
                },
                not_null: row.try_get::<i64, _>("not_null")? != 0,
                pk: row.try_get::<i64, _>("pk")? != 0,
                default: row.try_get("dflt_value")?,
                reference,
            });
        }
        Ok(columns)
    }

    /// Non-system tables, optionally filtered by a name substring.
    pub async fn list(&self, search: Option<&str>) -> Result<Vec<TableSummary>, AppError> {
        let mut sql = format!(
            "SELECT name, auth FROM {} WHERE system = 0",
            quoted(TABLES_TABLE)
        );
        if search.is_some() {
            sql.push_str(" AND name LIKE ?");
        }
        sql.push_str(" ORDER BY name ASC");

        let mut query = sqlx::query(&sql);
        if let Some(search) = search {
            query = query.bind(format!("%{}%", search));
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                Ok(TableSummary {
                    name: row.try_get("name")?,
                    auth: row.try_get("auth")?,
                })
            })
            .collect()
    }

    pub async fn update_access(&self, table: &str, policy: &AccessPolicy) -> Result<(), AppError> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET access = ? WHERE name = ?",
            quoted(TABLES_TABLE)
        ))
        .bind(policy.encode())
        .bind(table)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("table {}", table)));
        }
        self.invalidate(table);
        Ok(())
    }

    /// Insert the registry row for a newly created table. Runs on the
    /// caller's transaction so registration commits with the DDL.
    pub async fn register(
        &self,
        conn: &mut SqliteConnection,
        info: &TableInfo,
    ) -> Result<(), AppError> {
        let indexes = serde_json::to_string(&info.indexes)
            .map_err(|e| AppError::Internal(format!("encode indexes: {}", e)))?;
        sqlx::query(&format!(
            "INSERT INTO {} (name, auth, system, indexes, access) VALUES (?, ?, ?, ?, ?)",
            quoted(TABLES_TABLE)
        ))
        .bind(&info.name)
        .bind(info.is_auth)
        .bind(info.is_system)
        .bind(indexes)
        .bind(info.access.encode())
        .execute(conn)
        .await
        .map_err(|e| AppError::db("register", &info.name, e))?;
        Ok(())
    }

    pub async fn rename_entry(
        &self,
        conn: &mut SqliteConnection,
        old: &str,
        new: &str,
    ) -> Result<(), AppError> {
        sqlx::query(&format!(
            "UPDATE {} SET name = ? WHERE name = ?",
            quoted(TABLES_TABLE)
        ))
        .bind(new)
        .bind(old)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn deregister(&self, conn: &mut SqliteConnection, name: &str) -> Result<(), AppError> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE name = ?",
            quoted(TABLES_TABLE)
        ))
        .bind(name)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Drop every cache entry for one table: all metadata fields, the
    /// column set, and any counts.
    pub fn invalidate(&self, table: &str) {
        for field in MetaField::ALL {
            self.cache.delete(&info_key(table, field));
        }
        self.cache.delete(&columns_key(table));
        self.cache.delete_prefix(&format!("count:{}:", table));
    }

    pub(crate) fn cache(&self) -> &Arc<dyn MetadataCache> {
        &self.cache
    }
}

fn apply_cached(info: &mut TableInfo, field: MetaField, value: Value) {
    match field {
        MetaField::Name => {
            if let Value::String(name) = value {
                info.name = name;
            }
        }
        MetaField::Auth => {
            if let Value::Bool(auth) = value {
                info.is_auth = auth;
            }
        }
        MetaField::System => {
            if let Value::Bool(system) = value {
                info.is_system = system;
            }
        }
        MetaField::Indexes => {
            info.indexes = serde_json::from_value(value).unwrap_or_default();
        }
        MetaField::Access => {
            if let Value::String(raw) = value {
                info.access = AccessPolicy::parse(&raw);
            }
        }
    }
}

/// Create the system tables and seed their registry rows. Idempotent;
/// runs at every boot before the server accepts traffic.
pub async fn ensure_system_tables(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            name TEXT PRIMARY KEY,
            auth BOOLEAN NOT NULL DEFAULT 0,
            system BOOLEAN NOT NULL DEFAULT 0,
            indexes TEXT NOT NULL DEFAULT '[]',
            access TEXT NOT NULL DEFAULT '0;0;0;0;0'
        )
        "#,
        quoted(TABLES_TABLE)
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            name TEXT PRIMARY KEY,
            steps TEXT NOT NULL
        )
        "#,
        quoted(FUNCTIONS_TABLE)
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id INTEGER PRIMARY KEY,
            query TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )
        "#,
        quoted(QUERY_HISTORY_TABLE)
    ))
    .execute(pool)
    .await?;

    for name in [TABLES_TABLE, FUNCTIONS_TABLE, QUERY_HISTORY_TABLE] {
        sqlx::query(&format!(
            "INSERT OR IGNORE INTO {} (name, auth, system) VALUES (?, 0, 1)",
            quoted(TABLES_TABLE)
        ))
        .bind(name)
        .execute(pool)
        .await?;
    }
    Ok(())
}
