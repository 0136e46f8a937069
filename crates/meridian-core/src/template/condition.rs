//! The closed condition grammar: `A == B`, `A != B`, `A || B`, or a bare
//! path (truthy). Anything else is rejected — this is not a general
//! expression language.

use serde_json::Value;

use super::{Context, path::resolve_path};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Eq(Operand, Operand),
    NotEq(Operand, Operand),
    Or(Box<Condition>, Box<Condition>),
    Truthy(Operand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Path(String),
    Literal(String),
    Bool(bool),
    Number(String),
}

/// Parse a condition string per the closed grammar. `||` has the lowest
/// precedence and is the only boolean combinator supported — no `&&`, no
/// parentheses, no negation.
pub fn parse_condition(src: &str) -> Result<Condition, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty condition".to_string());
    }

    if let Some((left, right)) = split_once_top_level(src, "||") {
        let left = parse_condition(left.trim())?;
        let right = parse_condition(right.trim())?;
        return Ok(Condition::Or(Box::new(left), Box::new(right)));
    }

    if let Some((left, right)) = split_once_top_level(src, "==") {
        return Ok(Condition::Eq(parse_operand(left.trim()), parse_operand(right.trim())));
    }

    if let Some((left, right)) = split_once_top_level(src, "!=") {
        return Ok(Condition::NotEq(parse_operand(left.trim()), parse_operand(right.trim())));
    }

    Ok(Condition::Truthy(parse_operand(src)))
}

fn split_once_top_level<'a>(src: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    src.find(op).map(|idx| (&src[..idx], &src[idx + op.len()..]))
}

fn parse_operand(src: &str) -> Operand {
    let src = src.trim();
    if let Some(inner) = src.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        return Operand::Path(inner.to_string());
    }
    if src == "true" {
        return Operand::Bool(true);
    }
    if src == "false" {
        return Operand::Bool(false);
    }
    if src.parse::<f64>().is_ok() {
        return Operand::Number(src.to_string());
    }
    if (src.starts_with('\'') && src.ends_with('\'') && src.len() >= 2)
        || (src.starts_with('"') && src.ends_with('"') && src.len() >= 2)
    {
        return Operand::Literal(src[1..src.len() - 1].to_string());
    }
    // A bare identifier with no quotes/braces is still a path reference
    // (dependency/step names used directly in conditions).
    Operand::Path(src.to_string())
}

fn operand_value(op: &Operand, ctx: &Context) -> Value {
    match op {
        Operand::Path(p) => resolve_path(p, ctx).unwrap_or(Value::Null),
        Operand::Literal(s) => Value::String(s.clone()),
        Operand::Bool(b) => Value::Bool(*b),
        Operand::Number(n) => n
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Evaluate a raw condition string against `ctx`.
pub fn eval_condition(src: &str, ctx: &Context) -> Result<bool, String> {
    let cond = parse_condition(src)?;
    Ok(eval(&cond, ctx))
}

fn eval(cond: &Condition, ctx: &Context) -> bool {
    match cond {
        Condition::Eq(a, b) => operand_value(a, ctx) == operand_value(b, ctx),
        Condition::NotEq(a, b) => operand_value(a, ctx) != operand_value(b, ctx),
        Condition::Or(a, b) => eval(a, ctx) || eval(b, ctx),
        Condition::Truthy(a) => is_truthy(&operand_value(a, ctx)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn ctx() -> Context {
        let mut c = HashMap::new();
        c.insert("qa".to_string(), json!({"status": "pass"}));
        c.insert("empty_str".to_string(), json!(""));
        c.insert("zero".to_string(), json!(0));
        c
    }

    #[test]
    fn equality_against_literal() {
        assert!(eval_condition("${qa.status} == 'pass'", &ctx()).unwrap());
    }

    #[test]
    fn inequality_against_literal() {
        assert!(eval_condition("${qa.status} != 'fail'", &ctx()).unwrap());
    }

    #[test]
    fn or_combinator() {
        assert!(eval_condition("${qa.status} == 'fail' || ${qa.status} == 'pass'", &ctx()).unwrap());
    }

    #[test]
    fn bare_path_truthy() {
        assert!(eval_condition("${qa.status}", &ctx()).unwrap());
    }

    #[test]
    fn empty_string_is_falsy() {
        assert!(!eval_condition("${empty_str}", &ctx()).unwrap());
    }

    #[test]
    fn zero_is_falsy() {
        assert!(!eval_condition("${zero}", &ctx()).unwrap());
    }

    #[test]
    fn missing_path_is_falsy() {
        assert!(!eval_condition("${missing.path}", &ctx()).unwrap());
    }
}
