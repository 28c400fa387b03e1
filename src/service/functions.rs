//! Stored functions: named, ordered sequences of declarative steps
//! (insert/update/delete/fetch) executed inside one transaction, with
//! variable binding between the caller payload and earlier steps' results.

use crate::auth::Caller;
use crate::binder::{bind_template, substitute_caller_filter, BindContext, BoundValue};
use crate::error::AppError;
use crate::registry::{TableRegistry, FUNCTIONS_TABLE};
use crate::sql::{is_valid_ident, quoted, row_to_json, SqliteBindValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    Insert,
    Update,
    Delete,
    Fetch,
}

/// One declarative step. `name` is also the key the caller payload uses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionStep {
    pub name: String,
    pub action: StepAction,
    pub table: String,
    /// Payload for this step is an array instead of a single object.
    #[serde(default)]
    pub multiple: bool,
    /// Destination column -> template value.
    #[serde(default)]
    pub values: Map<String, Value>,
    /// Fetch projection.
    #[serde(default)]
    pub columns: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredFunction {
    pub name: String,
    #[serde(rename = "functions")]
    pub steps: Vec<FunctionStep>,
}

pub struct FunctionService {
    pool: SqlitePool,
    registry: Arc<TableRegistry>,
}

impl FunctionService {
    pub fn new(pool: SqlitePool, registry: Arc<TableRegistry>) -> Self {
        Self { pool, registry }
    }

    /// Persist a function. Step tables must exist; a duplicate name is a
    /// conflict.
    pub async fn save(&self, function: &StoredFunction) -> Result<(), AppError> {
        if !is_valid_ident(&function.name) {
            return Err(AppError::BadRequest(format!(
                "invalid function name: {:?}",
                function.name
            )));
        }
        if function.steps.is_empty() {
            return Err(AppError::BadRequest("function has no steps".into()));
        }
        for step in &function.steps {
            if !is_valid_ident(&step.table) {
                return Err(AppError::BadRequest(format!(
                    "invalid table in step {}: {:?}",
                    step.name, step.table
                )));
            }
            self.registry.info(&step.table, &[]).await?;
        }

        let steps = serde_json::to_string(&function.steps)
            .map_err(|e| AppError::Internal(format!("encode steps: {}", e)))?;
        sqlx::query(&format!(
            "INSERT INTO {} (name, steps) VALUES (?, ?)",
            quoted(FUNCTIONS_TABLE)
        ))
        .bind(&function.name)
        .bind(steps)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::db("create function", &function.name, e))?;
        Ok(())
    }

    pub async fn list(&self, search: Option<&str>) -> Result<Vec<String>, AppError> {
        let mut sql = format!("SELECT name FROM {}", quoted(FUNCTIONS_TABLE));
        if search.is_some() {
            sql.push_str(" WHERE name LIKE ?");
        }
        sql.push_str(" ORDER BY name ASC");
        let mut query = sqlx::query(&sql);
        if let Some(search) = search {
            query = query.bind(format!("%{}%", search));
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| Ok(row.try_get("name")?))
            .collect()
    }

    pub async fn get(&self, name: &str) -> Result<StoredFunction, AppError> {
        let row = sqlx::query(&format!(
            "SELECT steps FROM {} WHERE name = ?",
            quoted(FUNCTIONS_TABLE)
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("function {}", name)))?;
        let raw: String = row.try_get("steps")?;
        let steps = serde_json::from_str(&raw)
            .map_err(|e| AppError::Internal(format!("decode function {}: {}", name, e)))?;
        Ok(StoredFunction {
            name: name.to_string(),
            steps,
        })
    }

    pub async fn delete(&self, name: &str) -> Result<(), AppError> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE name = ?",
            quoted(FUNCTIONS_TABLE)
        ))
        .bind(name)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("function {}", name)));
        }
        Ok(())
    }

    /// Execute a function. All steps share one transaction: the first
    /// failing step rolls back everything done before it. Returns the
    /// values produced by the steps (inserted ids, fetched rows).
    pub async fn run(
        &self,
        name: &str,
        caller: Option<&Caller>,
        payload: &Map<String, Value>,
    ) -> Result<Map<String, Value>, AppError> {
        let function = self.get(name).await?;
        let mut saved: Map<String, Value> = Map::new();

        let mut tx = self.pool.begin().await?;
        for step in &function.steps {
            let step_payload = payload.get(&step.name);
            match step.action {
                StepAction::Insert => {
                    let payload = required_payload(step, step_payload)?;
                    if step.multiple {
                        let items = payload.as_array().ok_or_else(|| {
                            AppError::BadRequest(format!(
                                "step {} expects an array payload",
                                step.name
                            ))
                        })?;
                        for item in items {
                            let input = as_object(step, item)?;
                            let bound = bind_template(
                                &step.values,
                                input,
                                &BindContext { caller, saved: &saved },
                            )?;
                            exec_insert(&mut tx, &step.table, &bound).await?;
                        }
                    } else {
                        let input = as_object(step, payload)?;
                        let bound = bind_template(
                            &step.values,
                            input,
                            &BindContext { caller, saved: &saved },
                        )?;
                        let id = exec_insert(&mut tx, &step.table, &bound).await?;
                        saved.insert(step.name.clone(), Value::from(id));
                    }
                }
                StepAction::Update => {
                    let payload = required_payload(step, step_payload)?;
                    let items: Vec<&Map<String, Value>> = match payload {
                        Value::Array(items) => items
                            .iter()
                            .map(|item| as_object(step, item))
                            .collect::<Result<_, _>>()?,
                        Value::Object(item) => vec![item],
                        _ => {
                            return Err(AppError::BadRequest(format!(
                                "step {} expects an object or array payload",
                                step.name
                            )))
                        }
                    };
                    for input in items {
                        let bound = bind_template(
                            &step.values,
                            input,
                            &BindContext { caller, saved: &saved },
                        )?;
                        exec_update(&mut tx, step, input, &bound, caller).await?;
                    }
                }
                StepAction::Delete => {
                    let payload = required_payload(step, step_payload)?;
                    let input = as_object(step, payload)?;
                    exec_delete(&mut tx, step, input, caller).await?;
                }
                StepAction::Fetch => {
                    let filter = match step_payload {
                        Some(payload) => as_object(step, payload)?
                            .get("filter")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        None => None,
                    };
                    let rows = exec_fetch(&mut tx, step, filter.as_deref(), caller).await?;
                    saved.insert(step.name.clone(), Value::Array(rows));
                }
            }
        }
        tx.commit().await?;
        Ok(saved)
    }
}

fn required_payload<'a>(
    step: &FunctionStep,
    payload: Option<&'a Value>,
) -> Result<&'a Value, AppError> {
    payload.ok_or_else(|| AppError::BadRequest(format!("missing payload for step {}", step.name)))
}

fn as_object<'a>(step: &FunctionStep, value: &'a Value) -> Result<&'a Map<String, Value>, AppError> {
    value.as_object().ok_or_else(|| {
        AppError::BadRequest(format!("step {} expects an object payload", step.name))
    })
}

async fn exec_insert(
    tx: &mut SqliteConnection,
    table: &str,
    bound: &[(String, BoundValue)],
) -> Result<i64, AppError> {
    let mut cols = Vec::with_capacity(bound.len());
    let mut placeholders = Vec::with_capacity(bound.len());
    let mut params = Vec::with_capacity(bound.len());
    for (column, value) in bound {
        match value {
            BoundValue::Literal(v) => {
                cols.push(quoted(column));
                placeholders.push("?");
                params.push(v.clone());
            }
            BoundValue::Calculation { .. } => {
                return Err(AppError::BadRequest(
                    "calculation binding requires an update step".into(),
                ))
            }
        }
    }
    if cols.is_empty() {
        return Err(AppError::BadRequest("step produced no columns".into()));
    }
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quoted(table),
        cols.join(", "),
        placeholders.join(", ")
    );
    tracing::debug!(sql = %sql, "function insert");
    let mut query = sqlx::query(&sql);
    for p in &params {
        query = query.bind(SqliteBindValue::from_json(p));
    }
    let result = query
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::db("insert", table, e))?;
    Ok(result.last_insert_rowid())
}

async fn exec_update(
    tx: &mut SqliteConnection,
    step: &FunctionStep,
    input: &Map<String, Value>,
    bound: &[(String, BoundValue)],
    caller: Option<&Caller>,
) -> Result<(), AppError> {
    // Targets are the row's id, or an explicit filter when the payload
    // carries one.
    let filter = input
        .get("filter")
        .and_then(Value::as_str)
        .filter(|f| !f.is_empty())
        .map(|f| substitute_caller_filter(f, caller))
        .transpose()?;

    let mut sets = Vec::new();
    let mut params = Vec::new();
    for (column, value) in bound {
        if column == "id" {
            continue;
        }
        match value {
            BoundValue::Literal(v) => {
                sets.push(format!("{} = ?", quoted(column)));
                params.push(v.clone());
            }
            BoundValue::Calculation {
                column: operand_column,
                op,
                operand,
            } => {
                if !is_valid_ident(operand_column) {
                    return Err(AppError::BadRequest(format!(
                        "invalid calculation column: {:?}",
                        operand_column
                    )));
                }
                sets.push(format!(
                    "{} = {} {} ?",
                    quoted(column),
                    quoted(operand_column),
                    op
                ));
                params.push(Value::from(*operand));
            }
        }
    }
    if sets.is_empty() {
        return Err(AppError::BadRequest(format!(
            "step {} produced no columns to update",
            step.name
        )));
    }

    let where_clause = match filter {
        Some(filter) => filter,
        None => {
            let id = input.get("id").cloned().ok_or_else(|| {
                AppError::BadRequest(format!("step {} requires an id or filter", step.name))
            })?;
            params.push(id);
            "id = ?".to_string()
        }
    };

    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        quoted(&step.table),
        sets.join(", "),
        where_clause
    );
    tracing::debug!(sql = %sql, "function update");
    let mut query = sqlx::query(&sql);
    for p in &params {
        query = query.bind(SqliteBindValue::from_json(p));
    }
    query
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::db("update", &step.table, e))?;
    Ok(())
}

/// Delete steps never run without a filter: an implicit "all rows" is an
/// error, not a default.
async fn exec_delete(
    tx: &mut SqliteConnection,
    step: &FunctionStep,
    input: &Map<String, Value>,
    caller: Option<&Caller>,
) -> Result<(), AppError> {
    let filter = input
        .get("filter")
        .and_then(Value::as_str)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| {
            AppError::BadRequest(format!("step {} can't delete without a filter", step.name))
        })?;
    let filter = substitute_caller_filter(filter, caller)?;

    let sql = format!("DELETE FROM {} WHERE {}", quoted(&step.table), filter);
    tracing::debug!(sql = %sql, "function delete");
    sqlx::query(&sql).execute(&mut *tx).await.map_err(|e| {
        if matches!(e, sqlx::Error::Database(_)) {
            AppError::BadRequest("invalid filter expression".into())
        } else {
            AppError::Db(e)
        }
    })?;
    Ok(())
}

async fn exec_fetch(
    tx: &mut SqliteConnection,
    step: &FunctionStep,
    filter: Option<&str>,
    caller: Option<&Caller>,
) -> Result<Vec<Value>, AppError> {
    let projection = if step.columns.is_empty() {
        "*".to_string()
    } else {
        if !step.columns.iter().all(|c| is_valid_ident(c)) {
            return Err(AppError::BadRequest(format!(
                "invalid columns in step {}",
                step.name
            )));
        }
        step.columns
            .iter()
            .map(|c| quoted(c))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut sql = format!("SELECT {} FROM {}", projection, quoted(&step.table));
    if let Some(filter) = filter.filter(|f| !f.is_empty()) {
        let filter = substitute_caller_filter(filter, caller)?;
        sql.push_str(&format!(" WHERE {}", filter));
    }
    tracing::debug!(sql = %sql, "function fetch");
    let rows = sqlx::query(&sql).fetch_all(&mut *tx).await.map_err(|e| {
        if matches!(e, sqlx::Error::Database(_)) {
            AppError::BadRequest("invalid filter expression".into())
        } else {
            AppError::Db(e)
        }
    })?;
    Ok(rows.iter().map(row_to_json).collect())
}
