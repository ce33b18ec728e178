//! Task classification and model selection
//!
//! A deterministic, pure function from query text to a handling category,
//! evaluated in fixed priority order with first match winning. The ordering
//! and pattern sets are the disambiguation rule for queries matching several
//! categories — changing either changes routing behavior.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Handling category for one query. Derived per call, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    EmbeddingSearch,
    FinancialReasoning,
    DealSpecific,
    CodeSqlGeneration,
    PlanningMultimodal,
    General,
}

/// Static model selection for one task type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelConfig {
    pub model: &'static str,
    pub temperature: f32,
    pub max_tokens: u32,
    pub provider: &'static str,
}

/// Priority 1: search / embedding vocabulary
const SEARCH_TERMS: &[&str] = &[
    "similar",
    "semantic",
    "search",
    "embedding",
    "embeddings",
    "look up",
    "lookup",
    "related to",
    "nearest",
    "closest match",
];

/// Priority 2: pipeline / finance vocabulary. Keyed on pipeline terms and
/// compound revenue phrases rather than the bare word "revenue", so that
/// "write a SQL query to sum revenue" falls through to the programming
/// bucket.
const FINANCE_TERMS: &[&str] = &[
    "deal",
    "deals",
    "pipeline",
    "forecast",
    "forecasting",
    "quota",
    "win rate",
    "commission",
    "churn",
    "bookings",
    "risk",
    "close date",
    "sales cycle",
    "revenue forecast",
    "revenue target",
];

/// Priority 3: programming / database vocabulary
const CODE_TERMS: &[&str] = &[
    "sql",
    "query",
    "queries",
    "code",
    "script",
    "database",
    "schema",
    "function",
    "python",
    "javascript",
    "typescript",
    "json",
    "regex",
];

/// Priority 4: planning / visual vocabulary
const PLANNING_TERMS: &[&str] = &[
    "plan",
    "roadmap",
    "schedule",
    "timeline",
    "chart",
    "diagram",
    "image",
    "screenshot",
    "visualize",
    "visualization",
    "mockup",
    "strategy",
];

fn deal_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Named-entity reference: "the Acme deal"
            Regex::new(r"\bthe\s+[a-z0-9][a-z0-9&'.-]*\s+deal\b").unwrap(),
            Regex::new(r"follow[\s-]?up\s+email\s+for").unwrap(),
            Regex::new(r"win\s+probability\s+of").unwrap(),
        ]
    })
}

/// Whole-word containment so "deal" does not fire on "dealer" or "arr" on
/// "array". Multi-word terms match as phrases.
fn has_term(text: &str, term: &str) -> bool {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(pos) = text[start..].find(term) {
        let begin = start + pos;
        let end = begin + term.len();
        let boundary_before = begin == 0 || !bytes[begin - 1].is_ascii_alphanumeric();
        let boundary_after = end == text.len() || !bytes[end].is_ascii_alphanumeric();
        if boundary_before && boundary_after {
            return true;
        }
        start = begin + 1;
    }
    false
}

fn matches_any(text: &str, terms: &[&str]) -> bool {
    terms.iter().any(|term| has_term(text, term))
}

/// Classify a raw query into a [`TaskType`].
///
/// Pure and deterministic: lowercases the input and evaluates the category
/// vocabularies in fixed priority order, first match wins.
pub fn classify(query: &str) -> TaskType {
    let text = query.to_lowercase();

    if matches_any(&text, SEARCH_TERMS) {
        return TaskType::EmbeddingSearch;
    }

    if matches_any(&text, FINANCE_TERMS) {
        if deal_patterns().iter().any(|p| p.is_match(&text)) {
            return TaskType::DealSpecific;
        }
        return TaskType::FinancialReasoning;
    }

    if matches_any(&text, CODE_TERMS) {
        return TaskType::CodeSqlGeneration;
    }

    if matches_any(&text, PLANNING_TERMS) {
        return TaskType::PlanningMultimodal;
    }

    TaskType::General
}

/// Static model table. DealSpecific reuses FinancialReasoning's model
/// config and differs only in its system prompt.
pub fn model_config(task: TaskType) -> ModelConfig {
    match task {
        TaskType::EmbeddingSearch => ModelConfig {
            model: "gpt-4o-mini",
            temperature: 0.2,
            max_tokens: 1024,
            provider: "openai",
        },
        TaskType::FinancialReasoning | TaskType::DealSpecific => ModelConfig {
            model: "gpt-4o",
            temperature: 0.3,
            max_tokens: 2048,
            provider: "openai",
        },
        TaskType::CodeSqlGeneration => ModelConfig {
            model: "gpt-4o",
            temperature: 0.1,
            max_tokens: 2048,
            provider: "openai",
        },
        TaskType::PlanningMultimodal => ModelConfig {
            model: "gpt-4o",
            temperature: 0.5,
            max_tokens: 4096,
            provider: "openai",
        },
        TaskType::General => ModelConfig {
            model: "gpt-4o-mini",
            temperature: 0.7,
            max_tokens: 1024,
            provider: "openai",
        },
    }
}

/// Optional system-prompt template per task type.
pub fn system_prompt(task: TaskType) -> Option<&'static str> {
    match task {
        TaskType::EmbeddingSearch => Some(
            "You help sales teams find deals, accounts and conversations by \
             meaning rather than exact wording. Summarize what matched and why.",
        ),
        TaskType::FinancialReasoning => Some(
            "You are a revenue analyst for a sales pipeline. Reason carefully \
             about forecasts, quotas and pipeline health; show the numbers \
             behind every conclusion.",
        ),
        TaskType::DealSpecific => Some(
            "You are a deal coach. Ground every answer in the specific deal \
             under discussion: its stage, stakeholders, risks and next steps. \
             Do not generalize across the pipeline.",
        ),
        TaskType::CodeSqlGeneration => Some(
            "You write correct, runnable SQL and code for sales-data \
             questions. Prefer explicit column lists and state any schema \
             assumptions.",
        ),
        TaskType::PlanningMultimodal => Some(
            "You build concrete plans for sales teams: ordered steps, owners \
             and timelines. Describe any visual artifacts in text.",
        ),
        TaskType::General => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_classifications() {
        assert_eq!(classify("find similar deals"), TaskType::EmbeddingSearch);
        assert_eq!(
            classify("What's the risk on the Acme deal?"),
            TaskType::DealSpecific
        );
        assert_eq!(
            classify("write a SQL query to sum revenue"),
            TaskType::CodeSqlGeneration
        );
        assert_eq!(classify("hello"), TaskType::General);
    }

    #[test]
    fn test_priority_order() {
        // Search vocabulary wins over finance even when both match.
        assert_eq!(
            classify("search the pipeline for stalled deals"),
            TaskType::EmbeddingSearch
        );
        // Finance wins over code.
        assert_eq!(
            classify("forecast next quarter from the database"),
            TaskType::FinancialReasoning
        );
        // Code wins over planning.
        assert_eq!(
            classify("write a script to build the roadmap"),
            TaskType::CodeSqlGeneration
        );
    }

    #[test]
    fn test_deal_specific_patterns() {
        assert_eq!(
            classify("write a follow-up email for the Initech deal"),
            TaskType::DealSpecific
        );
        assert_eq!(
            classify("what is the win probability of deal 1234"),
            TaskType::DealSpecific
        );
        // Finance vocabulary without a deal-specific pattern.
        assert_eq!(
            classify("how healthy is my pipeline this quarter"),
            TaskType::FinancialReasoning
        );
    }

    #[test]
    fn test_planning_and_general() {
        assert_eq!(
            classify("draw a timeline for onboarding"),
            TaskType::PlanningMultimodal
        );
        assert_eq!(classify("thanks!"), TaskType::General);
        assert_eq!(classify(""), TaskType::General);
    }

    #[test]
    fn test_whole_word_matching() {
        // "dealer" must not trigger the finance bucket.
        assert_eq!(classify("my car dealer called"), TaskType::General);
        assert!(has_term("the acme deal", "deal"));
        assert!(!has_term("dealer", "deal"));
        assert!(has_term("win rate by region", "win rate"));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let query = "What's the risk on the Acme deal?";
        let first = classify(query);
        for _ in 0..10 {
            assert_eq!(classify(query), first);
        }
    }

    #[test]
    fn test_deal_specific_shares_finance_model() {
        let deal = model_config(TaskType::DealSpecific);
        let finance = model_config(TaskType::FinancialReasoning);
        assert_eq!(deal, finance);
        assert_ne!(
            system_prompt(TaskType::DealSpecific),
            system_prompt(TaskType::FinancialReasoning)
        );
    }

    #[test]
    fn test_general_has_no_system_prompt() {
        assert!(system_prompt(TaskType::General).is_none());
        assert!(system_prompt(TaskType::CodeSqlGeneration).is_some());
    }
}
