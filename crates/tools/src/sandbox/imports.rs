//! Import extraction for the repo map's dependency graph.
//!
//! Each language gets an [`ImportExtractor`] that pulls raw module
//! references out of a single source line. [`ImportResolver`] then maps
//! those references onto files that actually exist in the map.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// Pulls raw import targets (module names, relative paths) out of a line.
pub trait ImportExtractor: Send + Sync {
    fn language(&self) -> &'static str;

    fn extract(&self, line: &str, out: &mut Vec<String>);
}

static PY_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bfrom\s+([\w\./]+)\s+import\b").expect("static regex"));
static PLAIN_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bimport\s+([\w\./]+)").expect("static regex"));
static JS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bimport\s+(?:[\s\S]*?\s+from\s+)?["']([^"']+)["']"#).expect("static regex")
});
static JS_REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\brequire\s*\(\s*["']([^"']+)["']\s*\)"#).expect("static regex")
});
static C_INCLUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"#include\s+[<"]([^">]+)[">]"#).expect("static regex"));
static CS_USING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\busing\s+([\w\.]+)\s*;").expect("static regex"));
static RUST_USE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\buse\s+([\w\.:]+)\s*;").expect("static regex"));
static GO_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bimport\s*(?:\(|)("[^"]+"|'[^']+')"#).expect("static regex")
});

/// Regex-driven extractor: every capture of group 1 is a reference.
struct PatternExtractor {
    language: &'static str,
    pattern: &'static LazyLock<Regex>,
    /// Lines containing this marker belong to another extractor.
    skip_marker: Option<&'static str>,
}

impl ImportExtractor for PatternExtractor {
    fn language(&self) -> &'static str {
        self.language
    }

    fn extract(&self, line: &str, out: &mut Vec<String>) {
        if self.skip_marker.is_some_and(|m| line.contains(m)) {
            return;
        }
        for caps in self.pattern.captures_iter(line) {
            let Some(m) = caps.get(1) else {
                continue;
            };
            let dep = m.as_str().replace(['"', '\''], "");
            let dep = dep.trim();
            if !dep.is_empty() {
                out.push(dep.to_string());
            }
        }
    }
}

/// Extractors for Python, Java/Kotlin-style imports, JS/TS, C/C++, C#,
/// Rust and Go.
pub fn default_extractors() -> Vec<Box<dyn ImportExtractor>> {
    let table: [(&'static str, &'static LazyLock<Regex>, Option<&'static str>); 8] = [
        ("python", &PY_FROM, None),
        ("import", &PLAIN_IMPORT, Some(" from ")),
        ("javascript", &JS_IMPORT, None),
        ("commonjs", &JS_REQUIRE, None),
        ("c", &C_INCLUDE, None),
        ("csharp", &CS_USING, None),
        ("rust", &RUST_USE, None),
        ("go", &GO_IMPORT, None),
    ];
    table
        .into_iter()
        .map(|(language, pattern, skip_marker)| {
            Box::new(PatternExtractor {
                language,
                pattern,
                skip_marker,
            }) as Box<dyn ImportExtractor>
        })
        .collect()
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn stem(path: &str) -> &str {
    let name = base_name(path);
    match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    }
}

fn without_extension(path: &str) -> &str {
    let slash = path.rfind('/');
    match path.rfind('.') {
        Some(dot) if dot > 0 && slash.is_none_or(|s| dot > s) => &path[..dot],
        _ => path,
    }
}

/// Join `rel` onto `parent` folding `.` and `..` segments.
fn join_relative(parent: &str, rel: &str) -> String {
    let mut parts: Vec<&str> = parent.split('/').filter(|s| !s.is_empty()).collect();
    for seg in rel.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Maps import references onto the files of one repo map.
#[derive(Debug, Default)]
pub struct ImportResolver {
    files: HashSet<String>,
    by_stem: HashMap<String, Vec<String>>,
    by_path_stem: HashMap<String, Vec<String>>,
}

impl ImportResolver {
    pub fn new(files: &[String]) -> Self {
        let mut resolver = Self::default();
        for rel in files {
            resolver.files.insert(rel.clone());
            let s = stem(rel);
            if !s.is_empty() {
                resolver.by_stem.entry(s.to_string()).or_default().push(rel.clone());
            }
            resolver
                .by_path_stem
                .entry(without_extension(rel).to_string())
                .or_default()
                .push(rel.clone());
        }
        resolver
    }

    fn lookup<'a>(map: &'a HashMap<String, Vec<String>>, key: &str) -> Option<&'a Vec<String>> {
        map.get(key).filter(|v| !v.is_empty())
    }

    /// Files a reference found in a file under `parent` may point at.
    pub fn resolve(&self, dep: &str, parent: &str) -> Vec<String> {
        let clean = dep.trim().trim_end_matches([';', ',', ')']).replace("::", ".");
        if clean.is_empty() {
            return Vec::new();
        }

        if clean.starts_with('.') || clean.contains('/') {
            let candidate = if clean.starts_with("./") || clean.starts_with("../") {
                join_relative(parent, &clean)
            } else {
                clean.trim_start_matches('/').to_string()
            };
            if self.files.contains(&candidate) {
                return vec![candidate];
            }
            if let Some(found) = Self::lookup(&self.by_path_stem, without_extension(&candidate)) {
                return found.clone();
            }
        }

        if clean.contains('.') {
            let path_like = clean.trim_matches('.').replace('.', "/");
            if let Some(found) = Self::lookup(&self.by_path_stem, &path_like) {
                return found.clone();
            }
            if let Some(last) = clean.rsplit('.').next()
                && let Some(found) = Self::lookup(&self.by_stem, last)
            {
                return found.clone();
            }
        }

        Self::lookup(&self.by_stem, base_name(&clean))
            .cloned()
            .unwrap_or_default()
    }
}

/// Files `content` (the text of `rel`) depends on, excluding itself.
pub fn dependencies(
    content: &str,
    rel: &str,
    resolver: &ImportResolver,
    extractors: &[Box<dyn ImportExtractor>],
) -> HashSet<String> {
    let parent = rel.rsplit_once('/').map_or("", |(p, _)| p);
    let mut raw = Vec::new();
    for line in content.lines().filter(|l| !l.is_empty()) {
        for extractor in extractors {
            extractor.extract(line, &mut raw);
        }
    }
    let mut deps = HashSet::new();
    for dep in raw {
        deps.extend(resolver.resolve(&dep, parent));
    }
    deps.remove(rel);
    deps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract_all(line: &str) -> Vec<String> {
        let mut out = Vec::new();
        for e in default_extractors() {
            e.extract(line, &mut out);
        }
        out
    }

    #[test]
    fn extracts_per_language() {
        assert_eq!(extract_all("from pkg.models import User"), vec!["pkg.models"]);
        assert_eq!(extract_all("import os"), vec!["os"]);
        assert_eq!(extract_all("import { a } from './util'"), vec!["./util"]);
        assert_eq!(extract_all("const x = require('../lib/x')"), vec!["../lib/x"]);
        assert_eq!(extract_all("#include \"net/socket.h\""), vec!["net/socket.h"]);
        assert_eq!(extract_all("using System.Text;"), vec!["System.Text"]);
        assert_eq!(extract_all("use crate::sandbox::patch;"), vec!["crate::sandbox::patch"]);
        assert!(extract_all("import \"fmt\"").contains(&"fmt".to_string()));
    }

    #[test]
    fn resolves_relative_dotted_and_bare_references() {
        let files: Vec<String> = ["src/app.js", "src/util.js", "pkg/models.py", "lib/x.ts", "README.md"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let r = ImportResolver::new(&files);
        assert_eq!(r.resolve("./util", "src"), vec!["src/util.js"]);
        assert_eq!(r.resolve("../lib/x", "src"), vec!["lib/x.ts"]);
        assert_eq!(r.resolve("pkg.models", ""), vec!["pkg/models.py"]);
        assert_eq!(r.resolve(".models", "pkg"), vec!["pkg/models.py"]);
        assert_eq!(r.resolve("models", ""), vec!["pkg/models.py"]);
        assert!(r.resolve("os", "").is_empty());
    }

    #[test]
    fn dependencies_skip_self() {
        let files = vec!["a.py".to_string(), "b.py".to_string()];
        let r = ImportResolver::new(&files);
        let deps = dependencies("import a\nimport b\n", "a.py", &r, &default_extractors());
        assert_eq!(deps.into_iter().collect::<Vec<_>>(), vec!["b.py"]);
    }

    #[test]
    fn join_relative_folds_parents() {
        assert_eq!(join_relative("a/b", "../c/./d"), "a/c/d");
        assert_eq!(join_relative("", "./x"), "x");
    }
}
