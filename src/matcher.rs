//! Rule-matcher seam between the embed pipeline and whatever rule engine a
//! deployment runs.
//!
//! The engine itself is pluggable behind [`RuleMatcher`]; the pipeline only
//! cares that candidates go in and matches with actionable outcomes come
//! out. The built-in [`SubstringMatcher`] covers plain keyword rules loaded
//! from settings; richer regex/keyword engines implement the same trait.

use serde::{Deserialize, Serialize};

/// One value offered for matching, with the subject it was found under and
/// the field name it arrived as (e.g. `redirected_url`).
#[derive(Debug, Clone)]
pub struct Candidate {
    pub subject: String,
    pub field: String,
    pub value: String,
}

/// What to do when a rule matches. Each action maps onto exactly one
/// moderation API call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleAction {
    Report { reason: String },
    Label { labels: Vec<String> },
    Acknowledge { context: String },
    Tag { add: Vec<String>, remove: Vec<String> },
    Comment { context: String, reason: String },
}

/// A rule hit against one candidate.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    /// Name of the rule that fired
    pub rule: String,
    /// Candidate field the rule fired on
    pub field: String,
    /// The candidate value that matched
    pub matched: String,
    pub action: RuleAction,
}

/// Contract the pipeline evaluates candidates against.
pub trait RuleMatcher: Send + Sync {
    fn all_matches_for_candidates(&self, candidates: &[Candidate]) -> Vec<MatchResult>;
}

/// A case-insensitive substring rule for the built-in matcher.
#[derive(Debug, Clone, Deserialize)]
pub struct SubstringRule {
    pub name: String,
    pub needle: String,
    pub action: RuleAction,
}

/// Baseline matcher: case-insensitive substring rules.
pub struct SubstringMatcher {
    rules: Vec<(SubstringRule, String)>,
}

impl SubstringMatcher {
    pub fn new(rules: Vec<SubstringRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let needle = rule.needle.to_lowercase();
                (rule, needle)
            })
            .collect();
        Self { rules }
    }
}

impl RuleMatcher for SubstringMatcher {
    fn all_matches_for_candidates(&self, candidates: &[Candidate]) -> Vec<MatchResult> {
        let mut results = Vec::new();
        for candidate in candidates {
            let haystack = candidate.value.to_lowercase();
            for (rule, needle) in &self.rules {
                if !needle.is_empty() && haystack.contains(needle) {
                    results.push(MatchResult {
                        rule: rule.name.clone(),
                        field: candidate.field.clone(),
                        matched: candidate.value.clone(),
                        action: rule.action.clone(),
                    });
                }
            }
        }
        results
    }
}
