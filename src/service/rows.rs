//! Generic row CRUD over any registered table: filter classification,
//! access-policy enforcement with deferred ownership checks, auth-table
//! redaction, and caller-identity substitution.

use crate::access::{evaluate, AccessDecision, Action, OwnershipCheck};
use crate::auth::Caller;
use crate::binder::{substitute_caller_filter, substitute_caller_values};
use crate::error::AppError;
use crate::registry::{MetaField, TableInfo, TableRegistry};
use crate::sql::{
    self, is_conditional, is_valid_ident, quoted, row_to_json, Filter, QueryBuf, SqliteBindValue,
};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
    pub filter: Option<String>,
    pub order: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub struct RowService {
    pool: SqlitePool,
    registry: Arc<TableRegistry>,
}

impl RowService {
    pub fn new(pool: SqlitePool, registry: Arc<TableRegistry>) -> Self {
        Self { pool, registry }
    }

    /// Fetch one row by id, enforcing the table's view policy.
    pub async fn view(
        &self,
        caller: Option<&Caller>,
        table: &str,
        id: i64,
    ) -> Result<Value, AppError> {
        let info = self.table_info(table).await?;
        let ownership = self.authorize(&info, Action::View, caller)?;

        if let Some(OwnershipCheck::SelfId) = ownership {
            if caller_id(caller)? != id {
                return Err(AppError::Forbidden("you don't own this row".into()));
            }
        }

        let projection = self.projection(table, &info).await?;
        let q = sql::select_rows(
            table,
            projection.as_deref(),
            &Filter::Raw(format!("id = {}", id)),
            None,
            None,
            Some(1),
            None,
        );
        let rows = self.fetch_query(&q, false).await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("row {} in {}", id, table)))?;

        if let Some(OwnershipCheck::Column(column)) = ownership {
            let owner = row.get(&column).cloned().unwrap_or(Value::Null);
            if !owns(&owner, caller_id(caller)?) {
                return Err(AppError::Forbidden("you don't own this row".into()));
            }
        }
        Ok(row)
    }

    /// List rows. Ownership rules constrain the result to rows the caller
    /// owns instead of checking them one by one.
    pub async fn list(
        &self,
        caller: Option<&Caller>,
        table: &str,
        opts: &FetchOptions,
    ) -> Result<Vec<Value>, AppError> {
        let info = self.table_info(table).await?;
        let ownership = self.authorize(&info, Action::List, caller)?;
        let guard = self.ownership_guard(ownership.as_ref(), caller)?;

        let filter = self.classify(table, caller, opts.filter.as_deref()).await?;
        let projection = self.projection(table, &info).await?;
        let q = sql::select_rows(
            table,
            projection.as_deref(),
            &filter,
            guard.as_deref(),
            opts.order.as_deref(),
            opts.limit,
            opts.offset,
        );
        self.fetch_query(&q, matches!(filter, Filter::Raw(_))).await
    }

    /// Count rows under the same filter handling and visibility as `list`.
    /// Counts are cached per (table, filter, guard); a count that is stale
    /// within the TTL window is accepted.
    pub async fn count(
        &self,
        caller: Option<&Caller>,
        table: &str,
        filter: Option<&str>,
    ) -> Result<i64, AppError> {
        let info = self.table_info(table).await?;
        let ownership = self.authorize(&info, Action::List, caller)?;
        let guard = self.ownership_guard(ownership.as_ref(), caller)?;

        let cache_key = format!(
            "count:{}:{}|{}",
            table,
            filter.unwrap_or_default(),
            guard.as_deref().unwrap_or_default()
        );
        if let Some(cached) = self.registry.cache().get(&cache_key).and_then(|v| v.as_i64()) {
            return Ok(cached);
        }

        let filter = self.classify(table, caller, filter).await?;
        let q = sql::count_rows(table, &filter, guard.as_deref());
        tracing::debug!(sql = %q.sql, "count");
        let mut query = sqlx::query_scalar::<_, i64>(&q.sql);
        for p in &q.params {
            query = query.bind(SqliteBindValue::from_json(p));
        }
        let count = query.fetch_one(&self.pool).await.map_err(|e| {
            filter_error(matches!(filter, Filter::Raw(_)), e)
        })?;

        self.registry.cache().set(&cache_key, Value::from(count));
        Ok(count)
    }

    /// Insert one row. Auth tables are rejected: their rows are only
    /// created through the registration collaborator.
    pub async fn insert(
        &self,
        caller: Option<&Caller>,
        table: &str,
        mut data: Map<String, Value>,
    ) -> Result<i64, AppError> {
        let info = self.table_info(table).await?;
        // Ownership has nothing to compare before the row exists; evaluate
        // still requires a caller for ownership-gated creates.
        self.authorize(&info, Action::Create, caller)?;
        if info.is_auth {
            return Err(AppError::BadRequest(
                "rows of an auth table are created through registration".into(),
            ));
        }

        substitute_caller_values(&mut data, caller)?;
        for key in ["id", "created_at", "updated_at"] {
            data.remove(key);
        }
        if data.is_empty() {
            return Err(AppError::BadRequest("no columns to insert".into()));
        }

        let q = sql::insert(table, &data);
        tracing::debug!(sql = %q.sql, "insert");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(SqliteBindValue::from_json(p));
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::db("insert", table, e))?;
        Ok(result.last_insert_rowid())
    }

    /// Update one row by its mandatory id.
    pub async fn update(
        &self,
        caller: Option<&Caller>,
        table: &str,
        mut data: Map<String, Value>,
    ) -> Result<(), AppError> {
        let info = self.table_info(table).await?;
        let ownership = self.authorize(&info, Action::Update, caller)?;

        let id = data
            .get("id")
            .cloned()
            .ok_or_else(|| AppError::BadRequest("row id is required to update".into()))?;
        self.check_ownership(table, ownership.as_ref(), caller, &id)
            .await?;

        substitute_caller_values(&mut data, caller)?;
        for key in ["created_at", "updated_at"] {
            data.remove(key);
        }
        if data.len() <= 1 {
            return Err(AppError::BadRequest("no columns to update".into()));
        }

        let q = sql::update_by_id(table, &id, &data);
        tracing::debug!(sql = %q.sql, "update");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(SqliteBindValue::from_json(p));
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::db("update", table, e))?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("row in {}", table)));
        }
        Ok(())
    }

    /// Delete rows by id list. On auth tables only the caller's own single
    /// row may be deleted.
    pub async fn batch_delete(
        &self,
        caller: Option<&Caller>,
        table: &str,
        ids: &[Value],
    ) -> Result<u64, AppError> {
        if ids.is_empty() {
            return Err(AppError::BadRequest("id list is empty".into()));
        }
        let info = self.table_info(table).await?;
        let ownership = self.authorize(&info, Action::Delete, caller)?;

        match &ownership {
            Some(OwnershipCheck::SelfId) => {
                if ids.len() > 1 {
                    return Err(AppError::BadRequest(
                        "only one auth row can be deleted at a time".into(),
                    ));
                }
                self.check_ownership(table, ownership.as_ref(), caller, &ids[0])
                    .await?;
            }
            Some(OwnershipCheck::Column(_)) => {
                for id in ids {
                    self.check_ownership(table, ownership.as_ref(), caller, id)
                        .await?;
                }
            }
            None => {}
        }

        let q = sql::delete_by_ids(table, ids);
        tracing::debug!(sql = %q.sql, "delete");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(SqliteBindValue::from_json(p));
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::db("delete", table, e))?;
        Ok(result.rows_affected())
    }

    async fn table_info(&self, table: &str) -> Result<TableInfo, AppError> {
        if !is_valid_ident(table) {
            return Err(AppError::BadRequest(format!(
                "invalid table name: {:?}",
                table
            )));
        }
        self.registry
            .info(table, &[MetaField::Auth, MetaField::Access])
            .await
    }

    /// Evaluate the policy slot; Deny becomes Forbidden, ownership checks
    /// are returned to the caller to enforce against row data.
    fn authorize(
        &self,
        info: &TableInfo,
        action: Action,
        caller: Option<&Caller>,
    ) -> Result<Option<OwnershipCheck>, AppError> {
        match evaluate(info.access.rule(action), caller, info.is_auth) {
            AccessDecision::Deny => {
                Err(AppError::Forbidden("you don't have access to this data".into()))
            }
            AccessDecision::Allow => Ok(None),
            AccessDecision::RequireOwnership(check) => Ok(Some(check)),
        }
    }

    fn ownership_guard(
        &self,
        ownership: Option<&OwnershipCheck>,
        caller: Option<&Caller>,
    ) -> Result<Option<String>, AppError> {
        Ok(match ownership {
            Some(OwnershipCheck::SelfId) => Some(format!("id = {}", caller_id(caller)?)),
            Some(OwnershipCheck::Column(column)) => {
                Some(format!("{} = {}", quoted(column), caller_id(caller)?))
            }
            None => None,
        })
    }

    /// Row-targeted ownership: fetch the policy column of the target row
    /// and compare it to the caller's identity.
    async fn check_ownership(
        &self,
        table: &str,
        ownership: Option<&OwnershipCheck>,
        caller: Option<&Caller>,
        id: &Value,
    ) -> Result<(), AppError> {
        match ownership {
            None => Ok(()),
            Some(OwnershipCheck::SelfId) => {
                let id = id
                    .as_i64()
                    .or_else(|| id.as_str().and_then(|s| s.parse().ok()))
                    .ok_or_else(|| AppError::BadRequest("row id must be an integer".into()))?;
                if id != caller_id(caller)? {
                    return Err(AppError::Forbidden("you don't own this row".into()));
                }
                Ok(())
            }
            Some(OwnershipCheck::Column(column)) => {
                let q = sql::select_column_by_id(table, column, id);
                let mut query = sqlx::query(&q.sql);
                for p in &q.params {
                    query = query.bind(SqliteBindValue::from_json(p));
                }
                let row = query
                    .fetch_optional(&self.pool)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("row in {}", table)))?;
                let owner = row_to_json(&row)
                    .get(column.as_str())
                    .cloned()
                    .unwrap_or(Value::Null);
                if !owns(&owner, caller_id(caller)?) {
                    return Err(AppError::Forbidden("you don't own this row".into()));
                }
                Ok(())
            }
        }
    }

    /// Classify a caller filter after `@caller.id` substitution: raw
    /// conditional expressions pass through, anything else becomes a
    /// free-text LIKE search across every visible column.
    async fn classify(
        &self,
        table: &str,
        caller: Option<&Caller>,
        filter: Option<&str>,
    ) -> Result<Filter, AppError> {
        let Some(filter) = filter.filter(|f| !f.is_empty()) else {
            return Ok(Filter::None);
        };
        let filter = substitute_caller_filter(filter, caller)?;
        if is_conditional(&filter) {
            return Ok(Filter::Raw(filter));
        }
        let columns = self.registry.columns(table, false).await?;
        Ok(Filter::FreeText {
            columns: columns.into_iter().map(|c| c.name).collect(),
            needle: filter,
        })
    }

    /// Auth tables project only their non-secret columns.
    async fn projection(
        &self,
        table: &str,
        info: &TableInfo,
    ) -> Result<Option<Vec<String>>, AppError> {
        if !info.is_auth {
            return Ok(None);
        }
        let columns = self.registry.columns(table, false).await?;
        Ok(Some(columns.into_iter().map(|c| c.name).collect()))
    }

    async fn fetch_query(&self, q: &QueryBuf, raw_filter: bool) -> Result<Vec<Value>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(SqliteBindValue::from_json(p));
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| filter_error(raw_filter, e))?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}

fn caller_id(caller: Option<&Caller>) -> Result<i64, AppError> {
    caller
        .map(|c| c.id)
        .ok_or_else(|| AppError::Forbidden("you don't have access to this data".into()))
}

/// A structured filter SQLite rejects is the caller's mistake, not ours.
fn filter_error(raw_filter: bool, err: sqlx::Error) -> AppError {
    if raw_filter && matches!(err, sqlx::Error::Database(_)) {
        return AppError::BadRequest("invalid filter expression".into());
    }
    AppError::Db(err)
}

/// Ownership values may come back as integers or text depending on the
/// column's affinity.
fn owns(value: &Value, caller_id: i64) -> bool {
    match value {
        Value::Number(n) => n.as_i64() == Some(caller_id) || n.as_f64() == Some(caller_id as f64),
        Value::String(s) => s.parse::<i64>().ok() == Some(caller_id),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ownership_value_comparison() {
        assert!(owns(&json!(7), 7));
        assert!(owns(&json!("7"), 7));
        assert!(owns(&json!(7.0), 7));
        assert!(!owns(&json!(8), 7));
        assert!(!owns(&Value::Null, 7));
        assert!(!owns(&json!("abc"), 7));
    }
}
