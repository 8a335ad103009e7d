//! Repository maps: an indented tree of the workspace, optionally ordered
//! by an import-graph PageRank so the files everything depends on come
//! first.

use super::imports::{ImportResolver, default_extractors, dependencies};
use super::results::RepoMapResult;
use super::{Sandbox, clamp_limit, is_indexable, walk};
use codeagent_security::relative_unix;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

const DEFAULT_DEPTH: usize = 6;
const MAX_DEPTH: usize = 20;
const DEFAULT_ENTRIES: usize = 2000;
const MAX_ENTRIES: usize = 20_000;
const DEFAULT_CHARS: usize = 20_000;
const MAX_CHARS: usize = 200_000;

const DAMPING: f64 = 0.85;
const ITERATIONS: usize = 20;
const MANIFEST_BOOST: f64 = 0.05;
const FOCUS_BOOST: f64 = 0.2;

/// Project entry points and manifests get a small rank bump.
const MANIFEST_NAMES: &[&str] = &[
    "README.md",
    "readme.md",
    "package.json",
    "build.gradle",
    "build.gradle.kts",
    "settings.gradle",
    "settings.gradle.kts",
    "pom.xml",
    "pyproject.toml",
    "requirements.txt",
    "Cargo.toml",
    "go.mod",
    "gradlew",
    "gradlew.bat",
];

/// Limits and ranking hints for a map.
#[derive(Debug, Clone, Default)]
pub struct MapOptions {
    pub max_depth: Option<i64>,
    pub max_files: Option<i64>,
    pub max_chars: Option<i64>,
    /// Workspace-relative paths to rank higher.
    pub focus: Vec<String>,
}

#[derive(Debug, Default)]
struct TreeNode {
    children: BTreeMap<String, TreeNode>,
    is_file: bool,
    score: f64,
}

impl TreeNode {
    /// Insert `path`; a trailing `/` marks a directory.
    fn add_path(&mut self, path: &str) {
        let is_dir = path.ends_with('/');
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let mut cur = self;
        for (i, name) in parts.iter().enumerate() {
            cur = cur.children.entry(name.to_string()).or_default();
            if i + 1 == parts.len() && !is_dir {
                cur.is_file = true;
            }
        }
    }

    /// Files score their rank; directories the best score below them.
    fn apply_scores(&mut self, prefix: &str, ranks: &HashMap<String, f64>) -> f64 {
        let mut best: f64 = 0.0;
        for (name, child) in self.children.iter_mut() {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            best = best.max(child.apply_scores(&path, ranks));
        }
        if self.is_file
            && let Some(rank) = ranks.get(prefix)
        {
            best = best.max(*rank);
        }
        self.score = best;
        best
    }
}

struct TreeRenderer {
    out: String,
    used: usize,
    max_depth: usize,
    max_chars: usize,
    truncated: bool,
}

impl TreeRenderer {
    fn render(&mut self, name: &str, node: &TreeNode, depth: usize) {
        if depth > 0 {
            if depth > self.max_depth {
                return;
            }
            let indent = "  ".repeat(depth - 1);
            let suffix = if node.is_file { "" } else { "/" };
            let row = format!("{indent}{name}{suffix}\n");
            self.used += row.chars().count();
            self.out.push_str(&row);
            if self.used >= self.max_chars {
                self.truncated = true;
                return;
            }
        }
        let mut children: Vec<(&String, &TreeNode)> = node.children.iter().collect();
        children.sort_by(|(an, a), (bn, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| an.cmp(bn))
        });
        for (child_name, child) in children {
            self.render(child_name, child, depth + 1);
            if self.truncated {
                return;
            }
        }
    }
}

/// Weighted PageRank over `nodes`. Nodes without outgoing edges spread
/// their rank evenly.
pub(crate) fn page_rank(nodes: &[String], edges: &HashMap<String, HashMap<String, usize>>) -> HashMap<String, f64> {
    let n = nodes.len();
    if n == 0 {
        return HashMap::new();
    }
    let nf = n as f64;
    let mut ranks: HashMap<String, f64> = nodes.iter().map(|node| (node.clone(), 1.0 / nf)).collect();
    for _ in 0..ITERATIONS {
        let mut next: HashMap<String, f64> = nodes.iter().map(|node| (node.clone(), (1.0 - DAMPING) / nf)).collect();
        for src in nodes {
            let rank = ranks.get(src).copied().unwrap_or(1.0 / nf);
            let out = edges.get(src).filter(|o| !o.is_empty());
            match out {
                None => {
                    let share = DAMPING * rank / nf;
                    for value in next.values_mut() {
                        *value += share;
                    }
                }
                Some(out) => {
                    let total: usize = out.values().sum();
                    if total == 0 {
                        continue;
                    }
                    for (dst, weight) in out {
                        if let Some(value) = next.get_mut(dst) {
                            *value += DAMPING * rank * (*weight as f64) / total as f64;
                        }
                    }
                }
            }
        }
        ranks = next;
    }
    ranks
}

impl Sandbox {
    /// Tree of `path` with the most depended-on files first.
    pub fn repo_map(&self, path: &str, options: &MapOptions) -> RepoMapResult {
        self.generate_map(path, options, true)
    }

    /// Plain alphabetical tree of `path`.
    pub fn structure_map(&self, path: &str, options: &MapOptions) -> RepoMapResult {
        self.generate_map(path, options, false)
    }

    fn generate_map(&self, path: &str, options: &MapOptions, ranked: bool) -> RepoMapResult {
        let depth = clamp_limit(options.max_depth, DEFAULT_DEPTH, MAX_DEPTH);
        let limit = clamp_limit(options.max_files, DEFAULT_ENTRIES, MAX_ENTRIES);
        let max_chars = clamp_limit(options.max_chars, DEFAULT_CHARS, MAX_CHARS);

        let Some(dir) = self.resolve(path) else {
            return RepoMapResult {
                truncated: true,
                ..RepoMapResult::fail("path_outside_workspace")
            };
        };
        if !dir.is_dir() {
            return RepoMapResult::fail("path_not_a_directory");
        }

        let mut files: Vec<String> = Vec::new();
        let mut dirs: Vec<String> = Vec::new();
        let mut total = 0;
        let mut processed = HashSet::new();

        for entry in walk(&dir, Some(depth)) {
            if entry.depth() == 0 {
                continue;
            }
            if total >= limit {
                break;
            }
            let Some(local) = relative_unix(&dir, entry.path()) else {
                continue;
            };
            let Some(kind) = entry.file_type() else {
                continue;
            };
            if kind.is_dir() {
                dirs.push(format!("{local}/"));
                total += 1;
            } else if kind.is_file() && is_indexable(&local) && self.overlay_exists(entry.path()) {
                processed.insert(self.rel(entry.path()));
                files.push(local);
                total += 1;
            }
        }

        if total < limit {
            for change in self.pending_changes() {
                if change.is_delete() || processed.contains(&change.path) {
                    continue;
                }
                let Some(local) = self.local_under(&dir, &change.path) else {
                    continue;
                };
                if local.split('/').count() > depth || !is_indexable(&local) {
                    continue;
                }
                files.push(local);
                total += 1;
                if total >= limit {
                    break;
                }
            }
        }
        let mut truncated = total >= limit;

        let ranks = if ranked {
            self.rank_files(&dir, &files, &options.focus)
        } else {
            HashMap::new()
        };

        let mut root = TreeNode::default();
        dirs.sort();
        for p in dirs.iter().chain(files.iter()) {
            root.add_path(p);
        }
        root.apply_scores("", &ranks);

        let mut renderer = TreeRenderer {
            out: String::new(),
            used: 0,
            max_depth: depth,
            max_chars,
            truncated: false,
        };
        renderer.render("", &root, 0);
        truncated |= renderer.truncated;
        debug!(files = files.len(), ranked, truncated, "Repo map generated");

        RepoMapResult {
            content: renderer.out,
            truncated,
            total_files: files.len(),
            error: None,
        }
    }

    /// PageRank over the import graph of `files` (paths relative to `dir`),
    /// plus the manifest and focus boosts.
    fn rank_files(&self, dir: &std::path::Path, files: &[String], focus: &[String]) -> HashMap<String, f64> {
        if files.is_empty() {
            return HashMap::new();
        }
        let resolver = ImportResolver::new(files);
        let extractors = default_extractors();
        let mut edges: HashMap<String, HashMap<String, usize>> = HashMap::new();
        for rel in files {
            let Ok(content) = self.overlay_content(&dir.join(rel)) else {
                continue;
            };
            if content.len() as u64 > self.max_file_bytes() {
                continue;
            }
            let deps = dependencies(&content, rel, &resolver, &extractors);
            if deps.is_empty() {
                continue;
            }
            let out = edges.entry(rel.clone()).or_default();
            for dep in deps {
                *out.entry(dep).or_default() += 1;
            }
        }

        let mut ranks = page_rank(files, &edges);
        for rel in files {
            let name = rel.rsplit('/').next().unwrap_or(rel);
            if MANIFEST_NAMES.contains(&name) {
                *ranks.entry(rel.clone()).or_default() += MANIFEST_BOOST;
            }
        }
        for raw in focus.iter().filter(|p| !p.trim().is_empty()) {
            if let Some(abs) = self.resolve(raw)
                && let Some(local) = relative_unix(dir, &abs)
                && !local.is_empty()
            {
                *ranks.entry(local).or_default() += FOCUS_BOOST;
            }
        }
        ranks
    }
}
