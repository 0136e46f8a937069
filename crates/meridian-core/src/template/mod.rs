//! Variable resolution (`${path}`) and the closed condition grammar
//! (`A == B`, `A != B`, `A || B`, bare-path truthy) used by workflow
//! templates and step `if` conditions.
//!
//! Deliberately hand-rolled rather than pulled in from an expression-
//! language crate: the grammar is small and explicitly closed (Design
//! Note, SPEC_FULL.md §9) — anything outside it is a config error, not a
//! feature to grow.

mod condition;
mod path;

pub use condition::{Condition, eval_condition};
pub use path::resolve_path;

use serde_json::Value;
use std::collections::HashMap;

pub type Context = HashMap<String, Value>;

/// Render `value`, recursively substituting `${...}` templates against
/// `ctx`. Non-string scalars and array/object structure are passed through
/// unchanged except for their string leaves.
pub fn render(value: &Value, ctx: &Context) -> Value {
    match value {
        Value::String(s) => render_string(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| render(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Render a single string leaf per the two-rule contract: a whole-string
/// `${path}`/`${path.transform()}` returns the resolved value verbatim
/// (any type); otherwise every `${...}` fragment found is substituted as
/// a string and unresolved fragments are left as literal text.
fn render_string(s: &str, ctx: &Context) -> Value {
    if let Some(expr) = whole_template(s) {
        return match resolve_template_expr(&expr, ctx) {
            Some(v) => v,
            None => Value::String(s.to_string()),
        };
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(end_rel) = rest[start..].find('}') else {
            out.push_str(rest);
            rest = "";
            break;
        };
        let end = start + end_rel;
        out.push_str(&rest[..start]);
        let expr = &rest[start + 2..end];
        match resolve_template_expr(expr, ctx) {
            Some(v) => out.push_str(&value_to_display(&v)),
            None => out.push_str(&format!("${{{expr}}}")),
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Value::String(out)
}

/// If `s` is entirely one `${...}` template with nothing else around it,
/// return the inner expression.
fn whole_template(s: &str) -> Option<String> {
    let trimmed = s;
    if trimmed.starts_with("${") && trimmed.ends_with('}') && trimmed.matches("${").count() == 1 {
        Some(trimmed[2..trimmed.len() - 1].to_string())
    } else {
        None
    }
}

/// Resolve a template expression body (path, optionally with a trailing
/// `.toUpperCase()`/`.toLowerCase()` transform) against `ctx`.
fn resolve_template_expr(expr: &str, ctx: &Context) -> Option<Value> {
    let expr = expr.trim();
    for (suffix, transform) in [
        (".toUpperCase()", Transform::Upper),
        (".toLowerCase()", Transform::Lower),
    ] {
        if let Some(path) = expr.strip_suffix(suffix) {
            let resolved = resolve_path(path, ctx)?;
            return Some(apply_transform(&resolved, transform));
        }
    }
    resolve_path(expr, ctx)
}

enum Transform {
    Upper,
    Lower,
}

fn apply_transform(value: &Value, transform: Transform) -> Value {
    match value.as_str() {
        Some(s) => match transform {
            Transform::Upper => Value::String(s.to_uppercase()),
            Transform::Lower => Value::String(s.to_lowercase()),
        },
        None => value.clone(),
    }
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Context {
        let mut c = HashMap::new();
        c.insert(
            "task".to_string(),
            json!({"slug": "fix-login", "priority": "high"}),
        );
        c.insert("count".to_string(), json!(3));
        c
    }

    #[test]
    fn whole_string_path_preserves_type() {
        let v = render(&json!("${count}"), &ctx());
        assert_eq!(v, json!(3));
    }

    #[test]
    fn whole_string_object_path_preserves_object() {
        let v = render(&json!("${task}"), &ctx());
        assert_eq!(v, json!({"slug": "fix-login", "priority": "high"}));
    }

    #[test]
    fn partial_substitution_stringifies() {
        let v = render(&json!("branch: feat/${task.slug}"), &ctx());
        assert_eq!(v, json!("branch: feat/fix-login"));
    }

    #[test]
    fn unresolved_fragment_preserved_literally() {
        let v = render(&json!("${nope.missing}"), &ctx());
        assert_eq!(v, json!("${nope.missing}"));
    }

    #[test]
    fn transform_upper_case() {
        let v = render(&json!("${task.priority.toUpperCase()}"), &ctx());
        assert_eq!(v, json!("HIGH"));
    }

    #[test]
    fn recurses_into_nested_structures() {
        let input = json!({"branch": "${task.slug}", "tags": ["${task.priority}", "static"]});
        let v = render(&input, &ctx());
        assert_eq!(
            v,
            json!({"branch": "fix-login", "tags": ["high", "static"]})
        );
    }
}
