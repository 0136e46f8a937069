//! Information-request sub-loop: when a persona's response carries
//! `status == "info_request"`, resolve each requested source and re-send
//! under a new correlation id, bounded by iteration and source caps.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{MeridianError, Result};

pub const MAX_INFORMATION_ITERATIONS: u32 = 5;
pub const MAX_UNIQUE_SOURCES: usize = 12;

const DENY_HOST_LIST: &[&str] = &["169.254.169.254", "metadata.google.internal", "localhost", "127.0.0.1"];
const HTTP_BYTE_CAP: usize = 1_000_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InfoRequest {
    HttpGet { http_get: String },
    RepoFile { repo_file: String },
}

impl InfoRequest {
    fn source_key(&self) -> String {
        match self {
            InfoRequest::HttpGet { http_get } => format!("http_get:{http_get}"),
            InfoRequest::RepoFile { repo_file } => format!("repo_file:{repo_file}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InformationBlock {
    pub source: String,
    pub content: Result<String, String>,
}

/// Tracks how many iterations and unique sources have been consumed across
/// one persona request's information-request sub-loop.
#[derive(Debug, Default)]
pub struct InfoLoopState {
    pub iterations: u32,
    pub seen_sources: HashSet<String>,
    grace_used: bool,
}

pub enum LoopDecision {
    Continue,
    GraceIteration,
    Abort(String),
}

impl InfoLoopState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether another information-request iteration may proceed for
    /// the given incoming `requests`.
    pub fn admit(&mut self, requests: &[InfoRequest]) -> LoopDecision {
        if self.iterations >= MAX_INFORMATION_ITERATIONS {
            return LoopDecision::Abort("max_information_iterations exceeded".to_string());
        }

        let new_sources: Vec<&InfoRequest> = requests
            .iter()
            .filter(|r| !self.seen_sources.contains(&r.source_key()))
            .collect();

        let would_exceed = self.seen_sources.len() + new_sources.len() > MAX_UNIQUE_SOURCES;
        if would_exceed {
            if self.grace_used {
                return LoopDecision::Abort("max_unique_sources exceeded beyond grace period".to_string());
            }
            self.grace_used = true;
            self.iterations += 1;
            return LoopDecision::GraceIteration;
        }

        for r in &new_sources {
            self.seen_sources.insert(r.source_key());
        }
        self.iterations += 1;
        LoopDecision::Continue
    }
}

/// Parse the raw `requests` JSON array from an `info_request` payload.
pub fn parse_requests(payload: &Value) -> Vec<InfoRequest> {
    payload
        .get("requests")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Resolve one information request. `read_file` abstracts reading from the
/// working copy so this module stays independent of git-worktree mechanics.
pub async fn resolve(
    request: &InfoRequest,
    repo_root: &Path,
    http_client: &reqwest::Client,
) -> InformationBlock {
    match request {
        InfoRequest::RepoFile { repo_file } => {
            let source = repo_file.clone();
            let content = resolve_repo_file(repo_file, repo_root).map_err(|e| e.to_string());
            InformationBlock { source, content }
        }
        InfoRequest::HttpGet { http_get } => {
            let source = http_get.clone();
            let content = resolve_http_get(http_get, http_client).await.map_err(|e| e.to_string());
            InformationBlock { source, content }
        }
    }
}

fn resolve_repo_file(spec: &str, repo_root: &Path) -> Result<String> {
    let (path_part, anchor) = match spec.split_once('#') {
        Some((p, a)) => (p, Some(a)),
        None => (spec, None),
    };

    let full_path = repo_root.join(path_part);
    let canonical = full_path
        .canonicalize()
        .map_err(|e| MeridianError::Config(format!("repo_file {path_part} not found: {e}")))?;
    if !canonical.starts_with(repo_root) {
        return Err(MeridianError::PolicyViolation {
            guard: "repo_file_path".to_string(),
            detail: format!("repo_file {path_part} escapes the working copy"),
        });
    }

    let text = std::fs::read_to_string(&canonical)
        .map_err(|e| MeridianError::Config(format!("repo_file {path_part} unreadable: {e}")))?;

    match anchor {
        Some(a) => Ok(extract_line_range(&text, a)),
        None => Ok(text),
    }
}

fn extract_line_range(text: &str, anchor: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let stripped = anchor.trim_start_matches('L');
    let (start, end) = match stripped.split_once("-L") {
        Some((s, e)) => (s.parse::<usize>().ok(), e.parse::<usize>().ok()),
        None => (stripped.parse::<usize>().ok(), stripped.parse::<usize>().ok()),
    };
    match (start, end) {
        (Some(s), Some(e)) if s >= 1 && e >= s => {
            let slice = &lines[(s - 1).min(lines.len())..e.min(lines.len())];
            slice.join("\n")
        }
        _ => text.to_string(),
    }
}

async fn resolve_http_get(url: &str, client: &reqwest::Client) -> Result<String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| MeridianError::Config(format!("invalid url {url}: {e}")))?;
    let host = parsed.host_str().unwrap_or_default();
    if DENY_HOST_LIST.iter().any(|h| host.eq_ignore_ascii_case(h)) {
        return Err(MeridianError::PolicyViolation {
            guard: "deny_host_list".to_string(),
            detail: format!("host {host} is deny-listed"),
        });
    }

    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| MeridianError::External(format!("http_get {url} failed: {e}")))?;
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| MeridianError::External(format!("http_get {url} body read failed: {e}")))?;
    let capped = &bytes[..bytes.len().min(HTTP_BYTE_CAP)];
    Ok(String::from_utf8_lossy(capped).to_string())
}

/// Render accumulated information blocks into the text appended to the next
/// iteration's request payload.
pub fn render_information_blocks(blocks: &[InformationBlock]) -> String {
    blocks
        .iter()
        .map(|b| match &b.content {
            Ok(content) => format!("--- {} ---\n{}", b.source, content),
            Err(e) => format!("--- {} (error) ---\n{}", b.source, e),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
