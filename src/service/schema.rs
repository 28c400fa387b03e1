//! Schema management: DDL for table create/rename/drop/alter, the
//! updated_at trigger, named indexes, and the transactional rebuild
//! protocol for full field/index replacement.

use crate::error::AppError;
use crate::registry::{IndexDef, TableInfo, TableRegistry};
use crate::sql::{is_valid_ident, quoted};
use serde::Deserialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::sync::Arc;

/// One user-defined field of a table definition.
#[derive(Clone, Debug, Deserialize)]
pub struct FieldDef {
    #[serde(rename = "type")]
    pub field_type: String,
    pub name: String,
    #[serde(default)]
    pub nullable: bool,
    /// Referenced table for `relation` fields.
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub unique: bool,
}

impl FieldDef {
    /// Map the declarative field type onto a native column type.
    /// `relation` is special-cased into an INTEGER foreign key; unknown
    /// types yield None and the field is skipped.
    fn native_type(&self) -> Option<&'static str> {
        match self.field_type.to_lowercase().as_str() {
            "text" | "string" => Some("TEXT"),
            "number" | "real" => Some("REAL"),
            "boolean" => Some("BOOLEAN"),
            "datetime" | "timestamp" => Some("DATETIME"),
            "file" | "blob" => Some("BLOB"),
            "relation" => Some("RELATION"),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateTableRequest {
    #[serde(rename = "table_name")]
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    /// `"users"` makes the table an auth table with injected credentials
    /// columns.
    #[serde(default, rename = "table_type")]
    pub table_type: String,
}

pub struct SchemaService {
    pool: SqlitePool,
    registry: Arc<TableRegistry>,
}

impl SchemaService {
    pub fn new(pool: SqlitePool, registry: Arc<TableRegistry>) -> Self {
        Self { pool, registry }
    }

    /// Create a table from its declarative definition and register it with
    /// the default admin-only access policy.
    pub async fn create(&self, def: &CreateTableRequest) -> Result<(), AppError> {
        let inject_auth = def.table_type == "users";
        let mut tx = self.pool.begin().await?;
        self.create_on(&mut tx, def, inject_auth, inject_auth).await?;
        tx.commit().await?;
        self.registry.invalidate(&def.name);
        Ok(())
    }

    /// Build and execute the CREATE TABLE (plus indexes, trigger, registry
    /// row) on an existing transaction. `inject_auth` adds the credentials
    /// columns; `register_auth` is the auth flag written to the registry —
    /// they differ during a rebuild, where the field list already carries
    /// the credentials columns.
    async fn create_on(
        &self,
        tx: &mut SqliteConnection,
        def: &CreateTableRequest,
        inject_auth: bool,
        register_auth: bool,
    ) -> Result<(), AppError> {
        if !is_valid_ident(&def.name) {
            return Err(AppError::BadRequest(format!(
                "invalid table name: {:?}",
                def.name
            )));
        }

        let mut columns = vec!["id INTEGER PRIMARY KEY".to_string()];
        if inject_auth {
            columns.push("email TEXT NOT NULL".into());
            columns.push("password TEXT NOT NULL".into());
            columns.push("salt TEXT NOT NULL".into());
        }

        let mut foreign_keys = Vec::new();
        let mut uniques = Vec::new();
        for field in &def.fields {
            if !is_valid_ident(&field.name) {
                return Err(AppError::BadRequest(format!(
                    "invalid field name: {:?}",
                    field.name
                )));
            }
            let Some(native) = field.native_type() else {
                continue;
            };

            if native == "RELATION" {
                let reference = field.reference.as_deref().ok_or_else(|| {
                    AppError::BadRequest(format!("relation field {} needs a reference", field.name))
                })?;
                if !is_valid_ident(reference) {
                    return Err(AppError::BadRequest(format!(
                        "invalid reference table: {:?}",
                        reference
                    )));
                }
                let mut column = format!("{} INTEGER", quoted(&field.name));
                if !field.nullable {
                    column.push_str(" NOT NULL");
                }
                columns.push(column);
                foreign_keys.push(format!(
                    "FOREIGN KEY({}) REFERENCES {}(id) ON UPDATE CASCADE",
                    quoted(&field.name),
                    quoted(reference)
                ));
            } else {
                let mut column = format!("{} {}", quoted(&field.name), native);
                if !field.nullable {
                    column.push_str(" NOT NULL");
                }
                columns.push(column);
            }

            if field.unique {
                uniques.push(format!("UNIQUE ({})", quoted(&field.name)));
            }
        }

        columns.push("created_at DATETIME DEFAULT CURRENT_TIMESTAMP".into());
        columns.push("updated_at DATETIME DEFAULT CURRENT_TIMESTAMP".into());
        columns.extend(uniques);
        columns.extend(foreign_keys);

        let ddl = format!(
            "CREATE TABLE {} (\n  {}\n)",
            quoted(&def.name),
            columns.join(",\n  ")
        );
        tracing::debug!(sql = %ddl, "create table");
        sqlx::query(&ddl)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::db("create", &def.name, e))?;

        for index in &def.indexes {
            if !is_valid_ident(&index.name) || !index.columns.iter().all(|c| is_valid_ident(c)) {
                return Err(AppError::BadRequest(format!(
                    "invalid index definition: {:?}",
                    index.name
                )));
            }
            let cols: Vec<String> = index.columns.iter().map(|c| quoted(c)).collect();
            sqlx::query(&format!(
                "CREATE INDEX {} ON {} ({})",
                quoted(&index.name),
                quoted(&def.name),
                cols.join(", ")
            ))
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::db("create index", &def.name, e))?;
        }

        self.ensure_touch_trigger(tx, &def.name).await?;

        self.registry
            .register(
                tx,
                &TableInfo {
                    name: def.name.clone(),
                    is_auth: register_auth,
                    is_system: false,
                    indexes: def.indexes.clone(),
                    access: crate::access::AccessPolicy::admin_only(),
                },
            )
            .await?;
        Ok(())
    }

    /// Create the trigger refreshing `updated_at` on every row update.
    /// Checked by name first so re-creation is a no-op.
    async fn ensure_touch_trigger(
        &self,
        tx: &mut SqliteConnection,
        table: &str,
    ) -> Result<(), AppError> {
        let trigger = format!("trg_touch_{}", table);
        let existing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'trigger' AND name = ?",
        )
        .bind(&trigger)
        .fetch_one(&mut *tx)
        .await?;
        if existing > 0 {
            return Ok(());
        }
        sqlx::query(&format!(
            r#"
            CREATE TRIGGER {} AFTER UPDATE ON {}
            FOR EACH ROW
            BEGIN
                UPDATE {} SET updated_at = CURRENT_TIMESTAMP WHERE id = OLD.id;
            END
            "#,
            quoted(&trigger),
            quoted(table),
            quoted(table)
        ))
        .execute(&mut *tx)
        .await?;
        Ok(())
    }

    pub async fn rename(&self, old: &str, new: &str) -> Result<(), AppError> {
        if !is_valid_ident(old) || !is_valid_ident(new) {
            return Err(AppError::BadRequest("invalid table name".into()));
        }
        let mut tx = self.pool.begin().await?;
        self.rename_on(&mut tx, old, new).await?;
        tx.commit().await?;
        self.registry.invalidate(old);
        self.registry.invalidate(new);
        Ok(())
    }

    async fn rename_on(
        &self,
        tx: &mut SqliteConnection,
        old: &str,
        new: &str,
    ) -> Result<(), AppError> {
        self.registry.rename_entry(tx, old, new).await?;
        sqlx::query(&format!(
            "ALTER TABLE {} RENAME TO {}",
            quoted(old),
            quoted(new)
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::db("rename", old, e))?;
        Ok(())
    }

    pub async fn drop(&self, name: &str) -> Result<(), AppError> {
        let info = self.registry.info(name, &[crate::registry::MetaField::System]).await?;
        if info.is_system {
            return Err(AppError::BadRequest(format!(
                "cannot drop system table {}",
                name
            )));
        }
        let mut tx = self.pool.begin().await?;
        self.drop_on(&mut tx, name).await?;
        tx.commit().await?;
        self.registry.invalidate(name);
        Ok(())
    }

    async fn drop_on(&self, tx: &mut SqliteConnection, name: &str) -> Result<(), AppError> {
        self.registry.deregister(tx, name).await?;
        sqlx::query(&format!("DROP TABLE {}", quoted(name)))
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::db("drop", name, e))?;
        Ok(())
    }

    pub async fn add_column(&self, table: &str, field: &FieldDef) -> Result<(), AppError> {
        if !is_valid_ident(table) || !is_valid_ident(&field.name) {
            return Err(AppError::BadRequest("invalid identifier".into()));
        }
        let native = field.native_type().ok_or_else(|| {
            AppError::BadRequest(format!("unsupported field type: {:?}", field.field_type))
        })?;
        let column = if native == "RELATION" {
            let reference = field.reference.as_deref().filter(|r| is_valid_ident(r)).ok_or_else(
                || AppError::BadRequest(format!("relation field {} needs a reference", field.name)),
            )?;
            format!(
                "{} INTEGER REFERENCES {}(id) ON UPDATE CASCADE",
                quoted(&field.name),
                quoted(reference)
            )
        } else {
            // ADD COLUMN with NOT NULL would need a default; keep it nullable.
            format!("{} {}", quoted(&field.name), native)
        };
        sqlx::query(&format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quoted(table),
            column
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::db("add column", table, e))?;
        self.registry.invalidate(table);
        Ok(())
    }

    pub async fn rename_column(&self, table: &str, old: &str, new: &str) -> Result<(), AppError> {
        if !is_valid_ident(table) || !is_valid_ident(old) || !is_valid_ident(new) {
            return Err(AppError::BadRequest("invalid identifier".into()));
        }
        sqlx::query(&format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            quoted(table),
            quoted(old),
            quoted(new)
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::db("rename column", table, e))?;
        self.registry.invalidate(table);
        Ok(())
    }

    pub async fn drop_column(&self, table: &str, column: &str) -> Result<(), AppError> {
        if !is_valid_ident(table) || !is_valid_ident(column) {
            return Err(AppError::BadRequest("invalid identifier".into()));
        }
        sqlx::query(&format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quoted(table),
            quoted(column)
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::db("drop column", table, e))?;
        self.registry.invalidate(table);
        Ok(())
    }

    /// Replace a table's fields and indexes wholesale. Runs entirely inside
    /// one transaction: rename the live table aside, drop its indexes,
    /// create the replacement, copy every row across, drop the old table.
    /// The new field list must describe the same column count and order as
    /// the old table or the row copy fails (and everything rolls back).
    pub async fn rebuild(
        &self,
        old_name: &str,
        new_name: &str,
        fields: Vec<FieldDef>,
        indexes: Vec<IndexDef>,
    ) -> Result<(), AppError> {
        if !is_valid_ident(old_name) || !is_valid_ident(new_name) {
            return Err(AppError::BadRequest("invalid table name".into()));
        }
        let info = self
            .registry
            .info(old_name, &[crate::registry::MetaField::Auth])
            .await?;

        let def = |name: &str| CreateTableRequest {
            name: name.to_string(),
            fields: fields.clone(),
            indexes: indexes.clone(),
            table_type: String::new(),
        };

        let mut tx = self.pool.begin().await?;
        if old_name == new_name {
            let temp = format!("_temp_{}", old_name);
            self.rename_on(&mut tx, old_name, &temp).await?;

            let stale = index_names(&mut tx, &temp).await?;
            drop_indexes(&mut tx, &stale).await?;
            // The rename dragged the touch trigger along under its old
            // name; drop it so the replacement table gets a fresh one.
            sqlx::query(&format!(
                "DROP TRIGGER IF EXISTS {}",
                quoted(&format!("trg_touch_{}", old_name))
            ))
            .execute(&mut *tx)
            .await?;

            self.create_on(&mut tx, &def(old_name), false, info.is_auth)
                .await?;
            copy_rows(&mut tx, &temp, old_name).await?;
            self.drop_on(&mut tx, &temp).await?;
        } else {
            self.create_on(&mut tx, &def(new_name), false, info.is_auth)
                .await?;
            copy_rows(&mut tx, old_name, new_name).await?;
            self.drop_on(&mut tx, old_name).await?;
        }
        tx.commit().await?;

        self.registry.invalidate(old_name);
        self.registry.invalidate(new_name);
        Ok(())
    }
}

async fn copy_rows(tx: &mut SqliteConnection, from: &str, to: &str) -> Result<(), AppError> {
    sqlx::query(&format!(
        "INSERT INTO {} SELECT * FROM {}",
        quoted(to),
        quoted(from)
    ))
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::db("copy rows", to, e))?;
    Ok(())
}

/// Droppable index names on one table (SQLite's own auto-indexes excluded).
async fn index_names(tx: &mut SqliteConnection, table: &str) -> Result<Vec<String>, AppError> {
    let rows = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ? AND name NOT LIKE 'sqlite_%'",
    )
    .bind(table)
    .fetch_all(&mut *tx)
    .await?;
    rows.into_iter()
        .map(|row| Ok(row.try_get("name")?))
        .collect()
}

async fn drop_indexes(tx: &mut SqliteConnection, names: &[String]) -> Result<(), AppError> {
    for name in names {
        sqlx::query(&format!("DROP INDEX IF EXISTS {}", quoted(name)))
            .execute(&mut *tx)
            .await?;
    }
    Ok(())
}
