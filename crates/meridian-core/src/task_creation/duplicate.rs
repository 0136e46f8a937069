//! Duplicate-detection strategies for candidate follow-up tasks against
//! already-open dashboard tasks.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use crate::dashboard::DashboardTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateStrategy {
    ExternalId,
    Title,
    TitleAndMilestone,
    ContentHash,
}

const COMMON_VERB_PREFIXES: &[&str] = &["fix:", "add:", "update:", "remove:", "implement:"];

fn normalize_title(title: &str) -> String {
    let mut t = title.to_lowercase();
    for verb in COMMON_VERB_PREFIXES {
        t = t.replace(verb, "");
    }
    t.chars()
        .filter(|c| !is_emoji(*c) && *c != '[' && *c != ']')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_emoji(c: char) -> bool {
    let n = c as u32;
    (0x1F300..=0x1FAFF).contains(&n) || (0x2600..=0x27BF).contains(&n)
}

fn significant_words(text: &str, min_len: usize) -> BTreeSet<String> {
    normalize_title(text)
        .split_whitespace()
        .filter(|w| w.len() >= min_len)
        .map(|w| w.to_string())
        .collect()
}

fn word_overlap_ratio(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn content_fingerprint(title: &str, description: &str, milestone_slug: Option<&str>) -> String {
    let mut words: Vec<String> = significant_words(title, 4).into_iter().collect();
    words.extend(significant_words(description, 4));
    if let Some(slug) = milestone_slug {
        words.push(slug.to_string());
    }
    words.sort();
    words.join("|")
}

fn sha256_hex(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

/// Find an existing task matching `candidate_title`/`candidate_description`
/// under `strategy`. Returns the matching task, if any.
pub fn find_duplicate<'a>(
    strategy: DuplicateStrategy,
    candidate_title: &str,
    candidate_description: &str,
    candidate_milestone_slug: Option<&str>,
    candidate_external_id: &str,
    open_tasks: &'a [DashboardTask],
    task_milestone_slug: impl Fn(&DashboardTask) -> Option<String>,
) -> Option<&'a DashboardTask> {
    match strategy {
        DuplicateStrategy::ExternalId => open_tasks
            .iter()
            .find(|t| t.external_id.as_deref() == Some(candidate_external_id)),

        DuplicateStrategy::Title => {
            let candidate_norm = normalize_title(candidate_title);
            let candidate_words = significant_words(candidate_title, 3);
            open_tasks.iter().find(|t| {
                if normalize_title(&t.title) == candidate_norm {
                    return true;
                }
                let existing_words = significant_words(&t.title, 3);
                word_overlap_ratio(&candidate_words, &existing_words) >= 0.8
            })
        }

        DuplicateStrategy::TitleAndMilestone => open_tasks.iter().find(|t| {
            let same_milestone = task_milestone_slug(t).as_deref() == candidate_milestone_slug;
            if !same_milestone {
                return false;
            }
            let title_score = word_overlap_ratio(
                &significant_words(candidate_title, 3),
                &significant_words(&t.title, 3),
            );
            let desc_score = word_overlap_ratio(
                &significant_words(candidate_description, 3),
                &significant_words(t.description.as_deref().unwrap_or(""), 3),
            );
            0.7 * title_score + 0.3 * desc_score >= 0.6
        }),

        DuplicateStrategy::ContentHash => {
            let candidate_fp = content_fingerprint(candidate_title, candidate_description, candidate_milestone_slug);
            let candidate_hash = sha256_hex(&candidate_fp);
            let candidate_tokens: BTreeSet<String> = candidate_fp.split('|').map(String::from).collect();

            open_tasks.iter().find(|t| {
                let existing_slug = task_milestone_slug(t);
                let milestone_ok = candidate_milestone_slug.is_none()
                    || existing_slug.is_none()
                    || existing_slug.as_deref() == candidate_milestone_slug;
                if !milestone_ok {
                    return false;
                }
                let existing_fp =
                    content_fingerprint(&t.title, t.description.as_deref().unwrap_or(""), existing_slug.as_deref());
                if sha256_hex(&existing_fp) == candidate_hash {
                    return true;
                }
                let existing_tokens: BTreeSet<String> = existing_fp.split('|').map(String::from).collect();
                word_overlap_ratio(&candidate_tokens, &existing_tokens) >= 0.7
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(title: &str, external_id: Option<&str>) -> DashboardTask {
        DashboardTask {
            id: "t1".to_string(),
            title: title.to_string(),
            slug: None,
            status: None,
            priority_score: None,
            milestone_id: None,
            description: None,
            labels: vec![],
            assignee: None,
            external_id: external_id.map(String::from),
            blocked_dependencies: vec![],
            lock_version: None,
        }
    }

    #[test]
    fn external_id_is_exact_match() {
        let tasks = vec![task("anything", Some("run1:step1:0"))];
        let found = find_duplicate(
            DuplicateStrategy::ExternalId,
            "new title",
            "",
            None,
            "run1:step1:0",
            &tasks,
            |_| None,
        );
        assert!(found.is_some());
    }

    #[test]
    fn title_strategy_catches_high_word_overlap() {
        let tasks = vec![task("fix: login redirect loop issue", None)];
        let found = find_duplicate(
            DuplicateStrategy::Title,
            "login redirect loop issue",
            "",
            None,
            "x",
            &tasks,
            |_| None,
        );
        assert!(found.is_some());
    }

    #[test]
    fn content_hash_requires_milestone_match_when_both_known() {
        let mut t = task("shared fingerprint words content", None);
        t.description = Some("description words here content".to_string());
        let tasks = vec![t];
        let found = find_duplicate(
            DuplicateStrategy::ContentHash,
            "shared fingerprint words content",
            "description words here content",
            Some("backlog"),
            "x",
            &tasks,
            |_| Some("different-milestone".to_string()),
        );
        assert!(found.is_none());
    }
}
