//! Variable binding shared by row filters and function steps: caller
//! identity placeholders, `$`-prefixed back-references into values produced
//! by earlier steps, and in-database calculation expressions.

use crate::auth::Caller;
use crate::error::AppError;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Placeholder for the caller's identity inside filters and posted values.
pub const CALLER_ID_FILTER: &str = "@caller.id";
/// Template marker binding a column to the caller's identity.
pub const CALLER_ID_TEMPLATE: &str = "$caller.id";

/// The value a template column resolves to.
#[derive(Clone, Debug, PartialEq)]
pub enum BoundValue {
    Literal(Value),
    /// `column <op> operand`, executed inside the database so concurrent
    /// updates stay atomic (e.g. decrement a stock counter).
    Calculation {
        column: String,
        op: char,
        operand: i64,
    },
}

/// Caller identity plus the values produced by earlier steps of the same run.
pub struct BindContext<'a> {
    pub caller: Option<&'a Caller>,
    pub saved: &'a Map<String, Value>,
}

impl BindContext<'_> {
    fn caller_id(&self) -> Result<i64, AppError> {
        self.caller
            .map(|c| c.id)
            .ok_or_else(|| AppError::BadRequest("caller identity required".into()))
    }
}

fn calc_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\w+)\s*([-+*/])\s*(\d+)$").unwrap_or_else(|_| unreachable!("static regex"))
    })
}

/// Parse `<column> <op> <number>`, e.g. `stock - 3`.
pub fn parse_calculation(input: &str) -> Option<(String, char, i64)> {
    let caps = calc_regex().captures(input.trim())?;
    let column = caps.get(1)?.as_str().to_string();
    let op = caps.get(2)?.as_str().chars().next()?;
    let operand = caps.get(3)?.as_str().parse().ok()?;
    Some((column, op, operand))
}

/// Resolve a step's `values` template against one caller-supplied object.
///
/// Per destination column `k` with template value `v`:
/// - input value at `k` starting with `$` (and `v` not the caller-id
///   marker): the suffix is a calculation expression.
/// - `v == "$caller.id"`: the caller's identity.
/// - `v` starting with `$` otherwise: back-reference into saved step data.
/// - any other string `v`: the caller's value at `k`, skipped when absent.
/// - non-string `v`: bound as that literal.
pub fn bind_template(
    template: &Map<String, Value>,
    input: &Map<String, Value>,
    ctx: &BindContext<'_>,
) -> Result<Vec<(String, BoundValue)>, AppError> {
    let mut bound = Vec::with_capacity(template.len());
    for (k, v) in template {
        let template_is_caller_id = v.as_str() == Some(CALLER_ID_TEMPLATE);

        if let Some(raw) = input.get(k).and_then(Value::as_str) {
            if let Some(expr) = raw.strip_prefix('$') {
                if !template_is_caller_id {
                    let (column, op, operand) = parse_calculation(expr).ok_or_else(|| {
                        AppError::BadRequest(format!("invalid calculation for {}: {:?}", k, raw))
                    })?;
                    bound.push((k.clone(), BoundValue::Calculation { column, op, operand }));
                    continue;
                }
            }
        }

        match v {
            Value::String(tv) if tv.starts_with('$') => {
                if template_is_caller_id {
                    bound.push((k.clone(), BoundValue::Literal(Value::from(ctx.caller_id()?))));
                } else {
                    let key = &tv[1..];
                    let value = ctx.saved.get(key).cloned().unwrap_or(Value::Null);
                    bound.push((k.clone(), BoundValue::Literal(value)));
                }
            }
            Value::String(_) => {
                if let Some(value) = input.get(k) {
                    bound.push((k.clone(), BoundValue::Literal(value.clone())));
                }
            }
            other => bound.push((k.clone(), BoundValue::Literal(other.clone()))),
        }
    }
    Ok(bound)
}

/// Replace `@caller.id` in a filter expression. A filter that references
/// the caller with nobody authenticated is rejected.
pub fn substitute_caller_filter(
    filter: &str,
    caller: Option<&Caller>,
) -> Result<String, AppError> {
    if !filter.contains(CALLER_ID_FILTER) {
        return Ok(filter.to_string());
    }
    let caller = caller
        .ok_or_else(|| AppError::BadRequest("caller identity required for @caller.id".into()))?;
    Ok(filter.replace(CALLER_ID_FILTER, &caller.id.to_string()))
}

/// Replace `@caller.id` markers inside posted field values.
pub fn substitute_caller_values(
    data: &mut Map<String, Value>,
    caller: Option<&Caller>,
) -> Result<(), AppError> {
    for (_, v) in data.iter_mut() {
        if v.as_str() == Some(CALLER_ID_FILTER) {
            let caller = caller.ok_or_else(|| {
                AppError::BadRequest("caller identity required for @caller.id".into())
            })?;
            *v = Value::from(caller.id);
        }
    }
    Ok(())
}
