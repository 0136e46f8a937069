//! Dot-path resolution against the context variables map.

use serde_json::Value;

use super::Context;

/// Resolve a dot-separated path (`task.slug`, `step_name.field`) against
/// `ctx`. Missing intermediate steps yield `None` ("undefined"), which
/// callers treat as "preserve the template literal".
pub fn resolve_path(path: &str, ctx: &Context) -> Option<Value> {
    let mut parts = path.split('.');
    let root = parts.next()?;
    let mut current = ctx.get(root)?.clone();
    for part in parts {
        current = index_into(&current, part)?;
    }
    Some(current)
}

fn index_into(value: &Value, key: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(key).cloned(),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
        _ => None,
    }
}
