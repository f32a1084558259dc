//! Directory unit recognition.
//!
//! A directory is either an atomic "unit" (an album, a photo shoot, a
//! series — persisted as one record) or something to expand into child work
//! items. The thresholds are configuration, not logic: a directory
//! qualifies as a unit when it is flat, within the member bounds, and
//! dominated by a single file extension.

use sift_core::defaults;

/// One immediate child of a directory under evaluation.
#[derive(Debug, Clone)]
pub struct ChildEntry {
    pub name: String,
    pub is_dir: bool,
    /// Lowercase extension, when present.
    pub extension: Option<String>,
    pub size: i64,
}

/// Unit-vs-expand thresholds.
#[derive(Debug, Clone)]
pub struct UnitPolicy {
    /// Directories with more immediate children than this always expand.
    pub max_children: usize,
    /// Minimum members to qualify as a unit at all.
    pub min_members: usize,
    /// Fraction of children that must share the dominant extension.
    pub type_purity: f64,
}

impl Default for UnitPolicy {
    fn default() -> Self {
        Self {
            max_children: defaults::UNIT_MAX_CHILDREN,
            min_members: defaults::UNIT_MIN_MEMBERS,
            type_purity: defaults::UNIT_TYPE_PURITY,
        }
    }
}

impl UnitPolicy {
    /// Load thresholds from environment variables with fallback to defaults.
    pub fn from_env() -> Self {
        let mut policy = Self::default();
        if let Some(n) = std::env::var("SIFT_UNIT_MAX_CHILDREN")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            policy.max_children = n;
        }
        if let Some(n) = std::env::var("SIFT_UNIT_MIN_MEMBERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            policy.min_members = n.max(1);
        }
        if let Some(f) = std::env::var("SIFT_UNIT_TYPE_PURITY")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
        {
            policy.type_purity = f.clamp(0.0, 1.0);
        }
        policy
    }

    /// Decide whether a directory with these children is one atomic unit or
    /// should be expanded.
    pub fn evaluate(&self, children: &[ChildEntry]) -> UnitDecision {
        if children.len() < self.min_members || children.len() > self.max_children {
            return UnitDecision::Expand;
        }
        // Nested structure means the directory organizes, it doesn't group.
        if children.iter().any(|c| c.is_dir) {
            return UnitDecision::Expand;
        }

        let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for child in children {
            if let Some(ext) = child.extension.as_deref() {
                *counts.entry(ext).or_default() += 1;
            }
        }

        let Some((dominant, count)) = counts.into_iter().max_by_key(|(_, c)| *c) else {
            return UnitDecision::Expand;
        };

        if count as f64 / children.len() as f64 >= self.type_purity {
            UnitDecision::Unit {
                kind_label: kind_label_for(dominant).to_string(),
                member_count: children.len(),
            }
        } else {
            UnitDecision::Expand
        }
    }
}

/// Outcome of evaluating a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitDecision {
    /// Persist the directory as one atomic grouping.
    Unit {
        kind_label: String,
        member_count: usize,
    },
    /// Enqueue the immediate children as their own work items.
    Expand,
}

/// Grouping label for the dominant extension.
fn kind_label_for(extension: &str) -> &'static str {
    match extension {
        "mp3" | "flac" | "wav" | "ogg" | "m4a" | "aac" => "album",
        "jpg" | "jpeg" | "png" | "heic" | "raw" | "cr2" | "nef" | "tiff" => "photo set",
        "mp4" | "mkv" | "avi" | "mov" | "webm" => "series",
        "pdf" | "epub" | "mobi" => "library",
        _ => "collection",
    }
}
