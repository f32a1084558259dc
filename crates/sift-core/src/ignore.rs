//! Ignore-rule evaluation for enqueue filtering.
//!
//! Rules are plain strings: a bare name matches an entry name exactly
//! (case-insensitive), a pattern containing `*` is treated as a glob over the
//! name, and a rule containing `/` is matched as a glob over the full path.
//! Hidden (dot-prefixed) entries are skipped by default.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// One configured ignore rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoreRule {
    pub pattern: String,
}

impl IgnoreRule {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

/// Compiled rule ready for matching.
#[derive(Debug)]
enum CompiledRule {
    /// Case-insensitive exact name match.
    Name(String),
    /// Glob over the entry name.
    NameGlob(Regex),
    /// Glob over the full path.
    PathGlob(Regex),
}

/// A configurable set of ignore rules.
#[derive(Debug)]
pub struct IgnoreRules {
    rules: Vec<CompiledRule>,
    /// Skip dot-prefixed entries.
    pub ignore_hidden: bool,
}

impl Default for IgnoreRules {
    /// The stock rule set: OS metadata droppings, partial downloads, and
    /// dependency/VCS directories nobody wants analyzed.
    fn default() -> Self {
        Self::compile(
            &[
                IgnoreRule::new(".DS_Store"),
                IgnoreRule::new("Thumbs.db"),
                IgnoreRule::new("desktop.ini"),
                IgnoreRule::new("*.tmp"),
                IgnoreRule::new("*.part"),
                IgnoreRule::new("*.crdownload"),
                IgnoreRule::new("node_modules"),
                IgnoreRule::new("__pycache__"),
                IgnoreRule::new("*/.git/*"),
            ],
            true,
        )
    }
}

impl IgnoreRules {
    /// Compile a rule set. Invalid glob patterns are dropped with a warning
    /// rather than failing the whole set.
    pub fn compile(rules: &[IgnoreRule], ignore_hidden: bool) -> Self {
        let compiled = rules
            .iter()
            .filter_map(|rule| {
                let p = rule.pattern.trim();
                if p.is_empty() {
                    return None;
                }
                if p.contains('/') {
                    match glob_to_regex(p) {
                        Ok(re) => Some(CompiledRule::PathGlob(re)),
                        Err(e) => {
                            tracing::warn!(pattern = %p, error = %e, "Dropping invalid ignore rule");
                            None
                        }
                    }
                } else if p.contains('*') {
                    match glob_to_regex(p) {
                        Ok(re) => Some(CompiledRule::NameGlob(re)),
                        Err(e) => {
                            tracing::warn!(pattern = %p, error = %e, "Dropping invalid ignore rule");
                            None
                        }
                    }
                } else {
                    Some(CompiledRule::Name(p.to_ascii_lowercase()))
                }
            })
            .collect();

        Self {
            rules: compiled,
            ignore_hidden,
        }
    }

    /// An empty rule set that ignores nothing.
    pub fn permissive() -> Self {
        Self {
            rules: Vec::new(),
            ignore_hidden: false,
        }
    }

    /// Whether the entry at `path` named `name` should be excluded from
    /// analysis.
    pub fn should_ignore(&self, path: &str, name: &str) -> bool {
        if self.ignore_hidden && name.starts_with('.') {
            return true;
        }

        for rule in &self.rules {
            let hit = match rule {
                CompiledRule::Name(n) => name.eq_ignore_ascii_case(n),
                CompiledRule::NameGlob(re) => re.is_match(name),
                CompiledRule::PathGlob(re) => re.is_match(path),
            };
            if hit {
                return true;
            }
        }

        false
    }
}

/// Convert a glob pattern to an anchored case-insensitive regex.
/// Only `*` is special; everything else is literal.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_hit_os_droppings() {
        let rules = IgnoreRules::default();
        assert!(rules.should_ignore("/photos/.DS_Store", ".DS_Store"));
        assert!(rules.should_ignore("/photos/Thumbs.db", "Thumbs.db"));
        assert!(rules.should_ignore("/photos/thumbs.db", "thumbs.db"));
    }

    #[test]
    fn test_default_rules_ignore_hidden() {
        let rules = IgnoreRules::default();
        assert!(rules.should_ignore("/home/u/.bashrc", ".bashrc"));
        assert!(!rules.should_ignore("/home/u/notes.txt", "notes.txt"));
    }

    #[test]
    fn test_name_glob() {
        let rules = IgnoreRules::compile(&[IgnoreRule::new("*.tmp")], false);
        assert!(rules.should_ignore("/downloads/video.tmp", "video.tmp"));
        assert!(rules.should_ignore("/downloads/VIDEO.TMP", "VIDEO.TMP"));
        assert!(!rules.should_ignore("/downloads/video.mp4", "video.mp4"));
    }

    #[test]
    fn test_path_glob() {
        let rules = IgnoreRules::compile(&[IgnoreRule::new("*/.git/*")], false);
        assert!(rules.should_ignore("/src/repo/.git/config", "config"));
        assert!(!rules.should_ignore("/src/repo/README.md", "README.md"));
    }

    #[test]
    fn test_permissive_ignores_nothing() {
        let rules = IgnoreRules::permissive();
        assert!(!rules.should_ignore("/a/.hidden", ".hidden"));
        assert!(!rules.should_ignore("/a/b.tmp", "b.tmp"));
    }

    #[test]
    fn test_empty_pattern_dropped() {
        let rules = IgnoreRules::compile(&[IgnoreRule::new("   ")], false);
        assert!(!rules.should_ignore("/a/b", "b"));
    }

    #[test]
    fn test_glob_special_chars_are_literal() {
        let rules = IgnoreRules::compile(&[IgnoreRule::new("report (final).*")], false);
        assert!(rules.should_ignore("/d/report (final).doc", "report (final).doc"));
        assert!(!rules.should_ignore("/d/report final.doc", "report final.doc"));
    }
}
