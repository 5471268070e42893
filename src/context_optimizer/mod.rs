//! Three-tier context retrieval and role-specific prompt assembly (C3 *Context Optimizer*).
//!
//! For every `(query, role)` pair the optimizer tries, in order: predicted keywords backed by
//! [`crate::pattern_journal`] and [`crate::keyword_store`], a zero-context tier that instructs the
//! agent to call the keyword-search tool on demand, and finally a static full-context fallback.
//! Nothing in this module ever raises to its caller — failures are logged and the next tier is
//! tried, per the "never raise, degrade instead" policy in §4.2.

pub mod similarity;

use std::collections::HashSet;
use std::sync::Mutex;

use lru::LruCache;
use std::num::NonZeroUsize;

use crate::config::Config;
use crate::keyword_store::{KeywordEntry, KeywordStore};
use crate::library_rules::{self, LibraryRules};
use crate::pattern_journal::PatternJournal;

/// Which of the four pipeline agents a context string is being built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Planner,
    Identifier,
    Assembler,
    Validator,
}

impl AgentRole {
    /// Stable lowercase name used as a metrics/journal key (§4.3 *Token accounting*).
    pub fn key(&self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Identifier => "identifier",
            AgentRole::Assembler => "assembler",
            AgentRole::Validator => "validator",
        }
    }
}

/// One of the six fixed action categories used to prune predicted keywords by relevance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Navigation,
    Input,
    Interaction,
    Extraction,
    Assertion,
    Wait,
}

const ALL_CATEGORIES: [Category; 6] = [
    Category::Navigation,
    Category::Input,
    Category::Interaction,
    Category::Extraction,
    Category::Assertion,
    Category::Wait,
];

fn category_description(category: Category) -> &'static str {
    match category {
        Category::Navigation => "open a browser and go to a url or page",
        Category::Input => "type or fill text into a field or form",
        Category::Interaction => "click, hover, select, or drag an element",
        Category::Extraction => "read or capture text, attribute, or screenshot from the page",
        Category::Assertion => "verify, check, or assert that a condition holds",
        Category::Wait => "wait for an element, condition, or timeout",
    }
}

fn category_keyword_names(category: Category) -> &'static [&'static str] {
    match category {
        Category::Navigation => &["Open Browser", "New Browser", "New Page", "Go To"],
        Category::Input => &["Input Text", "Fill Text", "Type Text", "Input Password"],
        Category::Interaction => &["Click Element", "Click", "Hover", "Select From List By Label"],
        Category::Extraction => &["Get Text", "Get Attribute", "Capture Page Screenshot"],
        Category::Assertion => &["Element Should Be Visible", "Page Should Contain", "Get Text"],
        Category::Wait => &["Wait Until Element Is Visible", "Wait For Elements State"],
    }
}

/// Structured pruning-stats record emitted (via `log::debug!`) whenever category pruning runs.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PruningStats {
    pub original_count: usize,
    pub pruned_count: usize,
    pub reduction_percentage: f64,
    pub retention_percentage: f64,
}

impl PruningStats {
    fn compute(original_count: usize, pruned_count: usize) -> Self {
        let (reduction, retention) = if original_count == 0 {
            (0.0, 0.0)
        } else {
            let retention = pruned_count as f64 / original_count as f64 * 100.0;
            (100.0 - retention, retention)
        };
        PruningStats {
            original_count,
            pruned_count,
            reduction_percentage: reduction,
            retention_percentage: retention,
        }
    }
}

/// Which tier ultimately produced a context string — exposed only for tests that assert
/// invariant 6 (predicted tier used iff a qualifying pattern exists).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Predicted,
    ZeroContext,
    FullFallback,
}

/// The cache key for [`ContextOptimizer::search_tool`]: a query string paired with `k`.
type SearchCacheKey = (String, usize);

/// Ties together the keyword store, pattern journal, library rules, and query classifier behind
/// the three-tier `build_context` contract.
pub struct ContextOptimizer {
    keyword_store: std::sync::Arc<KeywordStore>,
    pattern_journal: std::sync::Arc<PatternJournal>,
    library: LibraryRules,
    optimization_enabled: bool,
    pruning_enabled: bool,
    t_pred: f64,
    t_cat: f64,
    category_refs: Vec<(Category, [f32; 256])>,
    search_cache: Mutex<LruCache<SearchCacheKey, Vec<KeywordEntry>>>,
}

impl ContextOptimizer {
    pub fn new(
        config: &Config,
        keyword_store: std::sync::Arc<KeywordStore>,
        pattern_journal: std::sync::Arc<PatternJournal>,
    ) -> Self {
        let category_refs = ALL_CATEGORIES
            .iter()
            .map(|&c| (c, similarity::embed(category_description(c))))
            .collect();
        ContextOptimizer {
            keyword_store,
            pattern_journal,
            library: library_rules::rules_for(config.robot_library),
            optimization_enabled: config.optimization_enabled,
            pruning_enabled: config.enable_context_pruning,
            t_pred: config.t_pred,
            t_cat: config.t_cat,
            category_refs,
            search_cache: Mutex::new(LruCache::new(NonZeroUsize::new(100).unwrap())),
        }
    }

    /// Classify `query` into the categories it touches. Returns every category when none clears
    /// `T_cat` (graceful degrade — pruning that would discard everything instead discards
    /// nothing).
    pub fn classify(&self, query: &str) -> Vec<Category> {
        let query_vec = similarity::embed(query);
        let mut matched: Vec<Category> = self
            .category_refs
            .iter()
            .filter(|(_, reference)| similarity::cosine_similarity(&query_vec, reference) >= self.t_cat)
            .map(|(c, _)| *c)
            .collect();
        if matched.is_empty() {
            matched = ALL_CATEGORIES.to_vec();
        }
        matched
    }

    /// Build the role-specific context string for `query`. Never fails.
    pub fn build_context(&self, query: &str, role: AgentRole) -> String {
        self.build_context_with_tier(query, role).0
    }

    /// As [`Self::build_context`], additionally reporting which tier produced the text — used by
    /// tests to assert invariant 6 without string-matching the output.
    pub fn build_context_with_tier(&self, query: &str, role: AgentRole) -> (String, Tier) {
        if !self.optimization_enabled {
            return (self.zero_context_text(role), Tier::ZeroContext);
        }

        match self.predicted_keywords_text(query) {
            Ok(Some(predicted)) => {
                let text = format!("{}\n\n{}", self.library.core_rules, predicted);
                (text, Tier::Predicted)
            }
            Ok(None) => {
                let text = format!("{}\n\n{}", self.library.core_rules, self.search_tool_instructions());
                (text, Tier::ZeroContext)
            }
            Err(()) => (self.full_fallback(role), Tier::FullFallback),
        }
    }

    fn zero_context_text(&self, role: AgentRole) -> String {
        let _ = role;
        self.search_tool_instructions()
    }

    fn search_tool_instructions(&self) -> String {
        "No predicted keywords were available for this query. Call the keyword-search tool with \
         a short natural-language description of the action you need, and use only the keywords \
         it returns."
            .to_string()
    }

    /// Full-context fallback text for `role`, used only when both the predicted and zero-context
    /// tiers fail outright (a store read error, not merely an empty prediction).
    pub fn full_fallback(&self, role: AgentRole) -> String {
        match role {
            AgentRole::Planner => self.library.planning_context.to_string(),
            AgentRole::Identifier => {
                "Use the element-probing tool to locate every element you need; do not guess \
                 selectors."
                    .to_string()
            }
            AgentRole::Assembler => self.library.code_assembly_context.to_string(),
            AgentRole::Validator => self.library.validation_rules.to_string(),
        }
    }

    /// Tier 2: predicted keywords from the best-matching pattern, if any clears `T_pred`.
    ///
    /// `Ok(None)` means the journal was readable but no pattern qualified (stay at zero-context).
    /// `Err(())` means the journal itself could not be read, a genuine backend failure that routes
    /// the caller to [`Self::full_fallback`] instead.
    fn predicted_keywords_text(&self, query: &str) -> Result<Option<String>, ()> {
        let patterns = match self.pattern_journal.patterns() {
            Ok(p) => p,
            Err(e) => {
                log::warn!(
                    "context_optimizer::predicted_keywords_text: pattern journal read failed, \
                     degrading to full-fallback tier: {e}"
                );
                return Err(());
            }
        };

        let best = patterns
            .iter()
            .map(|p| (p, similarity::text_similarity(query, &p.query_text)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let Some((pattern, score)) = best else {
            return Ok(None);
        };
        if score < self.t_pred {
            return Ok(None);
        }

        let mut keyword_names: Vec<String> = pattern.keywords_used.clone();
        keyword_names.sort();
        keyword_names.dedup();
        let original_count = keyword_names.len();

        if self.pruning_enabled {
            let categories = self.classify(query);
            let allowed: HashSet<&str> = categories
                .iter()
                .flat_map(|c| category_keyword_names(*c).iter().copied())
                .collect();
            keyword_names.retain(|name| allowed.contains(name.as_str()));
            let stats = PruningStats::compute(original_count, keyword_names.len());
            log::debug!("context_optimizer: pruning-stats {:?}", stats);
        }

        if keyword_names.is_empty() {
            return Ok(None);
        }

        let lines: Vec<String> = keyword_names
            .iter()
            .filter_map(|name| self.keyword_store.get(name))
            .map(|entry| entry.compact_doc_line())
            .collect();

        if lines.is_empty() {
            return Ok(None);
        }

        Ok(Some(lines.join("\n")))
    }

    /// Thin wrapper over the keyword store, cached up to 100 distinct `(query, k)` entries.
    /// Never raises — returns an empty list on any backend failure.
    pub fn search_tool(&self, query: &str, k: usize) -> Vec<KeywordEntry> {
        let key = (query.to_string(), k);
        if let Some(hit) = self.search_cache.lock().unwrap().get(&key) {
            return hit.clone();
        }

        let query_vec = similarity::embed(query);
        let mut scored: Vec<(f64, KeywordEntry)> = self
            .keyword_store
            .all()
            .into_iter()
            .map(|entry| {
                let score = similarity::text_similarity(query, &entry.name)
                    .max(similarity::cosine_similarity(&query_vec, &similarity::embed(&entry.documentation)));
                (score, entry)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        let result: Vec<KeywordEntry> = scored.into_iter().take(k).map(|(_, e)| e).collect();

        self.search_cache.lock().unwrap().put(key, result.clone());
        result
    }

    /// Extract keywords actually used by `script` and update C1/C2 accordingly.
    pub fn learn(&self, query: &str, script: &str) {
        let keywords = extract_keywords_from_script(script);
        if keywords.is_empty() {
            log::debug!("context_optimizer::learn: no keywords extracted, skipping");
            return;
        }
        if let Err(e) = self.pattern_journal.record(query, &keywords) {
            log::warn!("context_optimizer::learn: failed to record pattern: {e}");
        }
    }
}

/// Locate the `*** Test Cases ***` section and pull out the keyword name on each indented,
/// non-bracketed line, per §4.2's extraction algorithm. Returns a deduplicated, order-preserving
/// list.
pub fn extract_keywords_from_script(script: &str) -> Vec<String> {
    let Some(section_start) = find_section_case_insensitive(script, "*** Test Cases ***") else {
        return Vec::new();
    };
    let section = &script[section_start..];
    let section_end = find_next_section_header(section).unwrap_or(section.len());
    let body = &section[..section_end];

    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for line in body.lines().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        if !line.starts_with(' ') && !line.starts_with('\t') {
            // A non-indented line starts a new test case name, not a keyword call.
            continue;
        }
        let trimmed = line.trim_start();
        if trimmed.starts_with('[') {
            continue;
        }
        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }

        let keyword = if is_variable_assignment(tokens[0]) {
            tokens.get(1).copied()
        } else {
            Some(tokens[0])
        };

        if let Some(keyword) = keyword {
            if is_variable_reference(keyword) {
                continue;
            }
            if seen.insert(keyword.to_string()) {
                out.push(keyword.to_string());
            }
        }
    }

    out
}

fn is_variable_assignment(token: &str) -> bool {
    let starts_with_sigil = token.starts_with('$') || token.starts_with('@') || token.starts_with('&');
    starts_with_sigil && token.contains('=')
}

fn is_variable_reference(token: &str) -> bool {
    (token.starts_with("${") || token.starts_with("@{") || token.starts_with("&{"))
        && token.ends_with('}')
}

fn find_section_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let haystack_lower = haystack.to_lowercase();
    let needle_lower = needle.to_lowercase();
    haystack_lower.find(&needle_lower)
}

fn find_next_section_header(section_after_header: &str) -> Option<usize> {
    let lower = section_after_header.to_lowercase();
    ["\n*** settings ***", "\n*** variables ***", "\n*** keywords ***"]
        .iter()
        .filter_map(|marker| lower[1..].find(marker).map(|p| p + 1))
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::keyword_store::KeywordStore;
    use crate::pattern_journal::PatternJournal;
    use tempfile::tempdir;

    fn optimizer(config: &Config) -> (ContextOptimizer, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let kw = std::sync::Arc::new(KeywordStore::new(dir.path().join("kw.json")));
        let pj = std::sync::Arc::new(PatternJournal::new(dir.path().join("patterns.jsonl")));
        (ContextOptimizer::new(config, kw, pj), dir)
    }

    #[test]
    fn falls_back_to_zero_context_with_no_patterns() {
        let config = Config::default();
        let (opt, _dir) = optimizer(&config);
        let (text, tier) = opt.build_context_with_tier("search for cats", AgentRole::Planner);
        assert_eq!(tier, Tier::ZeroContext);
        assert!(text.contains("keyword-search tool"));
    }

    #[test]
    fn uses_predicted_tier_when_pattern_matches_closely() {
        let config = Config::default();
        let (opt, _dir) = optimizer(&config);
        opt.keyword_store
            .upsert(crate::keyword_store::KeywordEntry {
                name: "Input Text".to_string(),
                args: vec!["locator".to_string(), "text".to_string()],
                documentation: "Types text into a field.".to_string(),
                library: "Browser".to_string(),
            })
            .unwrap();
        opt.pattern_journal
            .record(
                "search for robot framework on google",
                &["Input Text".to_string()],
            )
            .unwrap();

        let (_, tier) =
            opt.build_context_with_tier("search for robot framework on google", AgentRole::Assembler);
        assert_eq!(tier, Tier::Predicted);
    }

    #[test]
    fn uses_full_fallback_tier_when_pattern_journal_is_unreadable() {
        let config = Config::default();
        let (opt, dir) = optimizer(&config);
        // Corrupt the on-disk journal so `PatternJournal::patterns` returns an Err rather than
        // an empty Vec, exercising the genuine-backend-failure path distinct from "no patterns".
        std::fs::write(dir.path().join("patterns.jsonl"), "not valid json\n").unwrap();

        let (text, tier) = opt.build_context_with_tier("search for cats", AgentRole::Planner);
        assert_eq!(tier, Tier::FullFallback);
        assert_eq!(text, opt.full_fallback(AgentRole::Planner));
    }

    #[test]
    fn optimization_disabled_always_uses_zero_context() {
        let mut config = Config::default();
        config.optimization_enabled = false;
        let (opt, _dir) = optimizer(&config);
        let (_, tier) = opt.build_context_with_tier("anything", AgentRole::Validator);
        assert_eq!(tier, Tier::ZeroContext);
    }

    #[test]
    fn classify_falls_back_to_all_categories_when_nothing_clears_threshold() {
        let config = Config::default();
        let (opt, _dir) = optimizer(&config);
        let cats = opt.classify("xyzzyzzyx plugh wibble");
        assert_eq!(cats.len(), 6);
    }

    #[test]
    fn extract_keywords_handles_assignment_and_variable_reference() {
        let script = "*** Test Cases ***\nSearch Test\n    Open Browser    ${URL}    chrome\n    \
                       ${text}=    Get Text    css:.result\n    [Teardown]    Close Browser\n";
        let keywords = extract_keywords_from_script(script);
        assert_eq!(keywords, vec!["Open Browser", "Get Text"]);
    }

    #[test]
    fn extract_keywords_returns_empty_without_test_cases_section() {
        assert!(extract_keywords_from_script("*** Settings ***\nLibrary    Browser\n").is_empty());
    }

    #[test]
    fn search_tool_never_panics_on_empty_store() {
        let config = Config::default();
        let (opt, _dir) = optimizer(&config);
        assert!(opt.search_tool("anything", 3).is_empty());
    }

    #[test]
    fn search_tool_caches_repeated_lookups() {
        let config = Config::default();
        let (opt, _dir) = optimizer(&config);
        opt.keyword_store
            .upsert(crate::keyword_store::KeywordEntry {
                name: "Click".to_string(),
                args: vec![],
                documentation: "Clicks an element.".to_string(),
                library: "Browser".to_string(),
            })
            .unwrap();
        let first = opt.search_tool("click the button", 1);
        let second = opt.search_tool("click the button", 1);
        assert_eq!(first, second);
    }

    #[test]
    fn pruning_stats_handles_zero_original_count() {
        let stats = PruningStats::compute(0, 0);
        assert_eq!(stats.reduction_percentage, 0.0);
        assert_eq!(stats.retention_percentage, 0.0);
    }
}
