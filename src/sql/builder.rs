//! Builds parameterized SELECT, INSERT, UPDATE, DELETE for dynamic tables,
//! plus the filter mini-language classification.

use serde_json::Value;

/// Quote identifier for SQLite (safe: names are validated on the way in).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Table/column names accepted from callers: identifier characters only.
pub fn is_valid_ident(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A caller filter is treated as a raw conditional when it looks like one:
/// parentheses, comparison characters, or a boolean/LIKE keyword. Anything
/// else is free text, searched across all columns.
pub fn is_conditional(filter: &str) -> bool {
    if filter.contains(['(', ')', '=', '<', '>', '!']) {
        return true;
    }
    filter.split_whitespace().any(|word| {
        word.eq_ignore_ascii_case("like")
            || word.eq_ignore_ascii_case("and")
            || word.eq_ignore_ascii_case("or")
            || word.eq_ignore_ascii_case("not")
    })
}

/// Classified row filter.
#[derive(Clone, Debug)]
pub enum Filter {
    None,
    /// Passed through as a WHERE clause verbatim.
    Raw(String),
    /// Free text, expanded to OR-joined `LIKE '%text%'` over these columns.
    FreeText {
        columns: Vec<String>,
        needle: String,
    },
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> &'static str {
        self.params.push(v);
        "?"
    }
}

/// WHERE clause from the classified filter plus an optional guard conjunct
/// (ownership constraints appended by the row engine, already safe SQL).
fn where_clause(q: &mut QueryBuf, filter: &Filter, guard: Option<&str>) -> String {
    let filter_part = match filter {
        Filter::None => String::new(),
        Filter::Raw(cond) => format!("({})", cond),
        Filter::FreeText { columns, needle } => {
            let parts: Vec<String> = columns
                .iter()
                .map(|c| {
                    let ph = q.push_param(Value::String(format!("%{}%", needle)));
                    format!("{} LIKE {}", quoted(c), ph)
                })
                .collect();
            if parts.is_empty() {
                String::new()
            } else {
                format!("({})", parts.join(" OR "))
            }
        }
    };
    let mut parts = Vec::new();
    if !filter_part.is_empty() {
        parts.push(filter_part);
    }
    if let Some(guard) = guard.filter(|g| !g.is_empty()) {
        parts.push(guard.to_string());
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

/// SELECT with optional projection, filter, guard, ORDER BY, LIMIT, OFFSET.
pub fn select_rows(
    table: &str,
    projection: Option<&[String]>,
    filter: &Filter,
    guard: Option<&str>,
    order: Option<&str>,
    limit: Option<u32>,
    offset: Option<u32>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cols = match projection {
        Some(cols) if !cols.is_empty() => cols
            .iter()
            .map(|c| quoted(c))
            .collect::<Vec<_>>()
            .join(", "),
        _ => "*".to_string(),
    };
    let where_part = where_clause(&mut q, filter, guard);
    let order_part = order
        .filter(|o| !o.is_empty())
        .map(|o| format!(" ORDER BY {}", o))
        .unwrap_or_default();
    let limit_part = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_part = offset
        .filter(|n| *n > 0)
        .map(|n| format!(" OFFSET {}", n))
        .unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}{}",
        cols,
        quoted(table),
        where_part,
        order_part,
        limit_part,
        offset_part
    );
    q
}

/// SELECT COUNT(*) with the same filter handling as `select_rows`.
pub fn count_rows(table: &str, filter: &Filter, guard: Option<&str>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_part = where_clause(&mut q, filter, guard);
    q.sql = format!("SELECT COUNT(*) FROM {}{}", quoted(table), where_part);
    q
}

/// SELECT a single column of one row, for ownership checks.
pub fn select_column_by_id(table: &str, column: &str, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.push_param(id.clone());
    q.sql = format!(
        "SELECT {} FROM {} WHERE id = {} LIMIT 1",
        quoted(column),
        quoted(table),
        ph
    );
    q
}

/// INSERT from a JSON object; caller has already dropped server-managed keys.
pub fn insert(table: &str, data: &serde_json::Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::with_capacity(data.len());
    let mut placeholders = Vec::with_capacity(data.len());
    for (k, v) in data {
        let ph = q.push_param(v.clone());
        cols.push(quoted(k));
        placeholders.push(ph);
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quoted(table),
        cols.join(", "),
        placeholders.join(", ")
    );
    q
}

/// UPDATE by id: SET every column present in data (id itself excluded).
pub fn update_by_id(table: &str, id: &Value, data: &serde_json::Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for (k, v) in data {
        if k == "id" {
            continue;
        }
        let ph = q.push_param(v.clone());
        sets.push(format!("{} = {}", quoted(k), ph));
    }
    let id_ph = q.push_param(id.clone());
    q.sql = format!(
        "UPDATE {} SET {} WHERE id = {}",
        quoted(table),
        sets.join(", "),
        id_ph
    );
    q
}

/// DELETE WHERE id IN (...).
pub fn delete_by_ids(table: &str, ids: &[Value]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let placeholders: Vec<&str> = ids.iter().map(|id| q.push_param(id.clone())).collect();
    q.sql = format!(
        "DELETE FROM {} WHERE id IN ({})",
        quoted(table),
        placeholders.join(", ")
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ident_validation() {
        assert!(is_valid_ident("products"));
        assert!(is_valid_ident("_tables"));
        assert!(is_valid_ident("owner_id2"));
        assert!(!is_valid_ident(""));
        assert!(!is_valid_ident("2cols"));
        assert!(!is_valid_ident("drop table"));
        assert!(!is_valid_ident("a;b"));
    }

    #[test]
    fn conditional_classification() {
        assert!(is_conditional("qty > 3"));
        assert!(is_conditional("name = 'x'"));
        assert!(is_conditional("(a AND b)"));
        assert!(is_conditional("name LIKE '%x%'"));
        assert!(is_conditional("a or b"));
        assert!(!is_conditional("rust handbook"));
        assert!(!is_conditional("nota bene"));
    }

    #[test]
    fn free_text_expands_to_like() {
        let filter = Filter::FreeText {
            columns: vec!["name".into(), "body".into()],
            needle: "rust".into(),
        };
        let q = select_rows("posts", None, &filter, None, None, Some(10), None);
        assert_eq!(
            q.sql,
            "SELECT * FROM \"posts\" WHERE (\"name\" LIKE ? OR \"body\" LIKE ?) LIMIT 10"
        );
        assert_eq!(q.params, vec![json!("%rust%"), json!("%rust%")]);
    }

    #[test]
    fn raw_filter_passes_through() {
        let filter = Filter::Raw("qty > 3".into());
        let q = select_rows(
            "products",
            Some(&["id".into(), "qty".into()]),
            &filter,
            None,
            Some("qty DESC"),
            Some(5),
            Some(10),
        );
        assert_eq!(
            q.sql,
            "SELECT \"id\", \"qty\" FROM \"products\" WHERE (qty > 3) ORDER BY qty DESC LIMIT 5 OFFSET 10"
        );
        assert!(q.params.is_empty());
    }

    #[test]
    fn guard_is_anded_onto_the_filter() {
        let filter = Filter::Raw("qty > 3".into());
        let q = count_rows("products", &filter, Some("\"owner_id\" = 7"));
        assert_eq!(
            q.sql,
            "SELECT COUNT(*) FROM \"products\" WHERE (qty > 3) AND \"owner_id\" = 7"
        );

        let q = count_rows("products", &Filter::None, Some("\"owner_id\" = 7"));
        assert_eq!(
            q.sql,
            "SELECT COUNT(*) FROM \"products\" WHERE \"owner_id\" = 7"
        );
    }

    #[test]
    fn insert_and_update_shapes() {
        let mut data = serde_json::Map::new();
        data.insert("name".into(), json!("pen"));
        data.insert("qty".into(), json!(4));
        let q = insert("products", &data);
        assert_eq!(
            q.sql,
            "INSERT INTO \"products\" (\"name\", \"qty\") VALUES (?, ?)"
        );
        assert_eq!(q.params.len(), 2);

        let mut patch = serde_json::Map::new();
        patch.insert("id".into(), json!(9));
        patch.insert("qty".into(), json!(5));
        let q = update_by_id("products", &json!(9), &patch);
        assert_eq!(q.sql, "UPDATE \"products\" SET \"qty\" = ? WHERE id = ?");
        assert_eq!(q.params, vec![json!(5), json!(9)]);
    }

    #[test]
    fn batch_delete_shape() {
        let q = delete_by_ids("products", &[json!(1), json!(2)]);
        assert_eq!(q.sql, "DELETE FROM \"products\" WHERE id IN (?, ?)");
    }
}
