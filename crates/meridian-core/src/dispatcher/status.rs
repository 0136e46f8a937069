//! Interprets a persona's natural-language (or structured) response into a
//! `{pass|fail|unknown}` triple, with a QA-specific downgrade rule.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusVerdict {
    Pass,
    Fail,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct InterpretedStatus {
    pub verdict: StatusVerdict,
    pub details: String,
    pub payload: Value,
}

const NO_TESTS_PATTERNS: &[&str] = &[
    "no tests found",
    "no tests were found",
    "0 tests executed",
    "no test framework",
    "test command not found",
];

/// Parse an event stream `status` field plus its `result` payload into a
/// verdict. `result` may be a JSON object (preferred) or raw text.
pub fn interpret_status(status: &str, result: &Value) -> InterpretedStatus {
    let details = extract_details(result);
    let verdict = match status {
        "done" => verdict_from_details(&details),
        "error" => StatusVerdict::Fail,
        _ => StatusVerdict::Unknown,
    };
    InterpretedStatus {
        verdict,
        details,
        payload: result.clone(),
    }
}

fn extract_details(result: &Value) -> String {
    match result {
        Value::Object(map) => map
            .get("summary")
            .or_else(|| map.get("details"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn verdict_from_details(details: &str) -> StatusVerdict {
    let lower = details.to_lowercase();
    if lower.contains("fail") {
        StatusVerdict::Fail
    } else if lower.contains("pass") || lower.contains("success") {
        StatusVerdict::Pass
    } else {
        StatusVerdict::Unknown
    }
}

/// Apply the QA-specific downgrade: a nominal `pass` is downgraded to
/// `fail` if the output shows no tests actually ran, unless the payload
/// explicitly flags `tdd_red_phase_detected`.
pub fn apply_qa_pass_downgrade(interpreted: InterpretedStatus, review_type: &str) -> InterpretedStatus {
    if review_type != "qa" || interpreted.verdict != StatusVerdict::Pass {
        return interpreted;
    }

    let tdd_red_phase = interpreted
        .payload
        .get("tdd_red_phase_detected")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if tdd_red_phase {
        return interpreted;
    }

    let executed_count_is_zero = interpreted
        .payload
        .get("executed_count")
        .and_then(Value::as_i64)
        .map(|n| n == 0)
        .unwrap_or(false);

    let lower = interpreted.details.to_lowercase();
    let no_tests_pattern = NO_TESTS_PATTERNS.iter().any(|p| lower.contains(p));

    if executed_count_is_zero || no_tests_pattern {
        InterpretedStatus {
            verdict: StatusVerdict::Fail,
            ..interpreted
        }
    } else {
        interpreted
    }
}
