//! SEARCH_KNOWLEDGE: code search through an injected backend.
//!
//! The loop only depends on the observation shape (`result.hits[]` with a
//! file path and line range), so any index can sit behind
//! [`KnowledgeSearch`]. [`KeywordSearch`] is the built-in backend: a plain
//! term scan over the sandbox overlay, used when no real index exists.

use async_trait::async_trait;
use codeagent_core::error::ToolError;
use codeagent_core::text::truncate_with;
use codeagent_core::tool::{Tool, ToolContext, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info};

use crate::args::{int_arg, required_str, run_blocking};
use crate::sandbox::{Sandbox, SandboxFactory};

const DEFAULT_TOP_K: usize = 5;
const MAX_TOP_K: usize = 50;
const SNIPPET_CHARS: usize = 800;
const SNIPPET_RADIUS: usize = 3;
const MAX_SCANNED_FILES: i64 = 5000;

/// One search hit. Line numbers are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeHit {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_kind: Option<String>,
    pub score: f64,
    pub snippet: String,
}

/// A code search backend.
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    /// Short engine name reported in the observation (e.g. "keyword").
    fn engine(&self) -> &str;

    /// Up to `top_k` hits for `query`, best first. `Err` carries a code.
    async fn search(&self, ctx: &ToolContext, query: &str, top_k: usize) -> Result<Vec<KnowledgeHit>, String>;
}

/// Lower-cased query terms of two or more characters.
fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

/// Best hit within one file, if any term occurs in it.
fn score_file(rel: &str, content: &str, terms: &[String]) -> Option<KnowledgeHit> {
    let lines: Vec<&str> = content.lines().collect();
    let lowered: Vec<String> = lines.iter().map(|l| l.to_lowercase()).collect();
    let path_lower = rel.to_lowercase();

    let mut matched_terms = 0usize;
    let mut occurrences = 0usize;
    for term in terms {
        let count: usize = lowered.iter().map(|l| l.matches(term.as_str()).count()).sum();
        if count > 0 || path_lower.contains(term.as_str()) {
            matched_terms += 1;
        }
        occurrences += count;
    }
    if matched_terms == 0 {
        return None;
    }

    let (best_idx, _) = lowered
        .iter()
        .enumerate()
        .map(|(i, l)| (i, terms.iter().filter(|t| l.contains(t.as_str())).count()))
        .fold((0, 0), |best, cur| if cur.1 > best.1 { cur } else { best });
    let start = best_idx.saturating_sub(SNIPPET_RADIUS);
    let end = (best_idx + SNIPPET_RADIUS + 1).min(lines.len());
    let snippet = lines.get(start..end).map(|s| s.join("\n")).unwrap_or_default();

    let coverage = matched_terms as f64 / terms.len() as f64;
    let density = (occurrences as f64).ln_1p() / 10.0;
    Some(KnowledgeHit {
        file_path: rel.to_string(),
        start_line: start + 1,
        end_line: end.max(start + 1),
        symbol_name: None,
        symbol_kind: None,
        score: coverage + density,
        snippet: truncate_with(&snippet, SNIPPET_CHARS, "..."),
    })
}

fn keyword_scan(sandbox: &Sandbox, query: &str, top_k: usize) -> Vec<KnowledgeHit> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return Vec::new();
    }
    let listing = sandbox.list_files("", None, Some(MAX_SCANNED_FILES), None);
    let mut hits: Vec<KnowledgeHit> = listing
        .files
        .iter()
        .filter_map(|rel| {
            let loaded = sandbox.load_text(rel).ok()?;
            score_file(&loaded.rel, &loaded.content, &terms)
        })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.file_path.cmp(&b.file_path))
    });
    hits.truncate(top_k);
    debug!(query, hits = hits.len(), "Keyword scan finished");
    hits
}

/// Term-frequency search over the workspace as the sandbox sees it.
#[derive(Debug, Clone)]
pub struct KeywordSearch {
    factory: SandboxFactory,
}

impl KeywordSearch {
    pub fn new(factory: SandboxFactory) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl KnowledgeSearch for KeywordSearch {
    fn engine(&self) -> &str {
        "keyword"
    }

    async fn search(&self, ctx: &ToolContext, query: &str, top_k: usize) -> Result<Vec<KnowledgeHit>, String> {
        let sandbox = self.factory.sandbox(ctx);
        let query = query.to_string();
        run_blocking("SEARCH_KNOWLEDGE", move || keyword_scan(&sandbox, &query, top_k))
            .await
            .map_err(|e| e.code())
    }
}

pub struct SearchKnowledgeTool {
    backend: Arc<dyn KnowledgeSearch>,
}

impl SearchKnowledgeTool {
    pub fn new(backend: Arc<dyn KnowledgeSearch>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for SearchKnowledgeTool {
    fn name(&self) -> &str {
        "SEARCH_KNOWLEDGE"
    }

    fn description(&self) -> &str {
        "Search the codebase by query. Returns file ranges with snippets."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "topK": { "type": "integer" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let query = required_str(&arguments, &["query", "q"], "query_required")?.to_string();
        let top_k = match int_arg(&arguments, &["topK", "top_k"]) {
            Some(k) if k > 0 => (k as usize).min(MAX_TOP_K),
            _ => DEFAULT_TOP_K,
        };
        let engine = self.backend.engine().to_string();
        info!(query = %query, top_k, engine = %engine, "Knowledge search");

        let (hits, error) = match self.backend.search(ctx, &query, top_k).await {
            Ok(hits) => (hits, None),
            Err(code) => (Vec::new(), Some(code)),
        };
        let hint = if hits.is_empty() {
            "No search results found. Try LIST_FILES/GREP/READ_FILE or different keywords."
        } else {
            "Search results are summaries. Call READ_FILE on the key files before drawing conclusions."
        };
        let count = hits.len();
        let mut out = ToolResult::from_value(json!({ "hits": hits, "error": error.clone() }))
            .with_extra("query", json!(query))
            .with_extra("engine", json!(engine))
            .with_extra("hits", json!(count))
            .with_extra("hint", json!(hint));
        if let Some(code) = error {
            out = out.with_error(code);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::factory_in;

    struct FailingBackend;

    #[async_trait]
    impl KnowledgeSearch for FailingBackend {
        fn engine(&self) -> &str {
            "broken"
        }
        async fn search(&self, _: &ToolContext, _: &str, _: usize) -> Result<Vec<KnowledgeHit>, String> {
            Err("index_unavailable".into())
        }
    }

    #[test]
    fn terms_are_deduplicated_and_lowercased() {
        assert_eq!(query_terms("Foo foo, a bar_baz"), vec!["bar_baz", "foo"]);
    }

    #[tokio::test]
    async fn keyword_backend_ranks_by_coverage() {
        let (dir, factory) = factory_in();
        std::fs::write(dir.path().join("auth.py"), "def login(user):\n    check_password(user)\n").unwrap();
        std::fs::write(dir.path().join("util.py"), "def login():\n    pass\n").unwrap();
        std::fs::write(dir.path().join("other.py"), "x = 1\n").unwrap();
        let ctx = ToolContext::new(dir.path());
        let tool = SearchKnowledgeTool::new(Arc::new(KeywordSearch::new(factory)));
        let out = tool
            .execute(json!({"query": "login password", "topK": 5}), &ctx)
            .await
            .unwrap();
        assert!(out.error_code().is_none());
        let hits = out.result["hits"].as_array().unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0]["filePath"], "auth.py");
        assert_eq!(hits[0]["startLine"], 1);
        assert_eq!(out.extras["engine"], "keyword");
    }

    #[tokio::test]
    async fn backend_errors_surface_as_codes() {
        let tool = SearchKnowledgeTool::new(Arc::new(FailingBackend));
        let out = tool
            .execute(json!({"query": "x y"}), &ToolContext::new("/tmp"))
            .await
            .unwrap();
        assert_eq!(out.error_code().as_deref(), Some("index_unavailable"));
        assert_eq!(out.extras["hits"], 0);
    }
}
