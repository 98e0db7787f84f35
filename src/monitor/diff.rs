//! Baselines and change classification
//!
//! [`BaselineEngine`] keeps one artifact per distinct content for each
//! `(customer, kind, subject)` and reports how a fresh observation relates to
//! the stored baseline. The `classify_*` functions are pure: they turn a
//! before/after pair into at most one [`Classification`].

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::ThresholdsConfig;
use crate::store::{Store, StoreResult};
use crate::types::{Artifact, ArtifactKind, ContentHash, FindingCategory, NewArtifact, Severity};

// ============================================================================
// Baselines
// ============================================================================

/// How a fresh observation relates to the stored baseline
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// No baseline existed; this observation became the baseline
    Seeded(Artifact),
    /// Same content hash as the baseline; nothing stored
    Unchanged(Artifact),
    /// Content differs; `current` was appended as the new baseline
    Changed { previous: Artifact, current: Artifact },
}

impl Observation {
    /// Baseline after this observation
    pub fn current(&self) -> &Artifact {
        match self {
            Self::Seeded(a) | Self::Unchanged(a) => a,
            Self::Changed { current, .. } => current,
        }
    }
}

/// Artifact baselines on top of the store
#[derive(Clone)]
pub struct BaselineEngine {
    store: Arc<dyn Store>,
}

impl BaselineEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Latest stored artifact; `None` on first observation
    pub fn get_latest_artifact(
        &self,
        customer_id: &str,
        kind: ArtifactKind,
        subject: &str,
    ) -> StoreResult<Option<Artifact>> {
        self.store.latest_artifact(customer_id, kind, subject)
    }

    /// Append an artifact unconditionally
    pub fn store_artifact(&self, artifact: &NewArtifact) -> StoreResult<Artifact> {
        self.store.insert_artifact(artifact)
    }

    /// Compare `raw_content` with the baseline, storing it only when it differs
    pub fn observe(
        &self,
        customer_id: &str,
        kind: ArtifactKind,
        subject: &str,
        raw_content: &str,
        fetched_at: DateTime<Utc>,
    ) -> StoreResult<Observation> {
        let previous = self.get_latest_artifact(customer_id, kind, subject)?;
        if let Some(previous) = &previous {
            if previous.content_hash == ContentHash::compute(raw_content) {
                return Ok(Observation::Unchanged(previous.clone()));
            }
        }

        let current = self.store_artifact(&NewArtifact {
            customer_id: customer_id.to_string(),
            kind,
            subject: subject.to_string(),
            raw_content: raw_content.to_string(),
            fetched_at,
        })?;

        Ok(match previous {
            None => Observation::Seeded(current),
            Some(previous) => Observation::Changed { previous, current },
        })
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Outcome of classifying a change
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub severity: Severity,
    /// Stable per condition; part of the dedupe key, so no volatile values
    pub title: String,
    pub diff_text: String,
}

impl Classification {
    pub fn new(severity: Severity, title: &str, diff_text: String) -> Self {
        Self {
            severity,
            title: title.to_string(),
            diff_text,
        }
    }
}

/// Severity thresholds (business policy, from configuration)
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    /// Percentage drop in sitemap URLs that is a warning
    pub sitemap_warning_drop_pct: f64,
    /// Percentage drop in sitemap URLs that is critical
    pub sitemap_critical_drop_pct: f64,
    /// Performance score points lost that is a warning
    pub performance_warning_drop: f64,
    /// Performance score points lost that is critical
    pub performance_critical_drop: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from_config(&ThresholdsConfig::default())
    }
}

impl Thresholds {
    pub fn from_config(config: &ThresholdsConfig) -> Self {
        Self {
            sitemap_warning_drop_pct: config.sitemap_warning_drop_pct,
            sitemap_critical_drop_pct: config.sitemap_critical_drop_pct,
            performance_warning_drop: config.performance_warning_drop,
            performance_critical_drop: config.performance_critical_drop,
        }
    }
}

/// Render `after − before` and `before − after` (as line sets) as labeled
/// blocks; empty when the sets are equal
pub fn line_set_diff(before: &str, after: &str) -> String {
    let before_lines = significant_lines(before);
    let after_lines = significant_lines(after);
    let before_set: HashSet<&str> = before_lines.iter().copied().collect();
    let after_set: HashSet<&str> = after_lines.iter().copied().collect();

    let added = unique_in_order(after_lines.iter().copied().filter(|l| !before_set.contains(l)));
    let removed = unique_in_order(before_lines.iter().copied().filter(|l| !after_set.contains(l)));

    let mut blocks = Vec::new();
    for (label, lines) in [("Added:", added), ("Removed:", removed)] {
        if lines.is_empty() {
            continue;
        }
        let mut block = label.to_string();
        for line in lines {
            block.push_str("\n  ");
            block.push_str(line);
        }
        blocks.push(block);
    }
    blocks.join("\n")
}

fn significant_lines(text: &str) -> Vec<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

fn unique_in_order<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    lines.filter(|l| seen.insert(*l)).collect()
}

/// Strip comments and blank lines, canonicalize `Directive: value` spacing,
/// keep directive order
pub fn normalize_robots(text: &str) -> String {
    text.lines()
        .filter_map(|raw| {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                return None;
            }
            Some(match line.split_once(':') {
                Some((directive, value)) => format!("{}: {}", directive.trim(), value.trim())
                    .trim_end()
                    .to_string(),
                None => line.to_string(),
            })
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn disallow_rules(normalized: &str) -> HashSet<&str> {
    normalized
        .lines()
        .filter(|l| {
            l.split_once(':')
                .map_or(false, |(d, _)| d.trim().eq_ignore_ascii_case("disallow"))
        })
        .collect()
}

fn blocks_whole_site(normalized: &str) -> bool {
    normalized.lines().any(|l| match l.split_once(':') {
        Some((directive, value)) => directive.trim().eq_ignore_ascii_case("disallow") && value.trim() == "/",
        None => false,
    })
}

/// Classify a robots.txt change
pub fn classify_robots(before: &str, after: &str) -> Option<Classification> {
    let before = normalize_robots(before);
    let after = normalize_robots(after);
    if before == after {
        return None;
    }

    let diff = line_set_diff(&before, &after);
    if blocks_whole_site(&after) && !blocks_whole_site(&before) {
        return Some(Classification::new(Severity::Critical, "robots.txt blocks the entire site", diff));
    }
    if disallow_rules(&before) != disallow_rules(&after) {
        return Some(Classification::new(Severity::Warning, "robots.txt Disallow rules changed", diff));
    }
    Some(Classification::new(Severity::Info, "robots.txt changed", diff))
}

/// Classify a change in sitemap URL count
pub fn classify_sitemap_count(previous: usize, current: usize, thresholds: &Thresholds) -> Option<Classification> {
    if previous == current {
        return None;
    }

    if previous == 0 {
        return Some(Classification::new(
            Severity::Info,
            "Sitemap URL count increased",
            format!("Sitemap URLs: 0 -> {}", current),
        ));
    }

    let pct_change = (current as f64 - previous as f64) / previous as f64 * 100.0;
    let diff = format!("Sitemap URLs: {} -> {} ({:+.1}%)", previous, current, pct_change);

    let (severity, title) = if current == 0 {
        (Severity::Critical, "Sitemap URL count dropped to zero")
    } else if pct_change <= -thresholds.sitemap_critical_drop_pct {
        (Severity::Critical, "Sitemap URL count dropped significantly")
    } else if pct_change <= -thresholds.sitemap_warning_drop_pct {
        (Severity::Warning, "Sitemap URL count dropped")
    } else if pct_change < 0.0 {
        (Severity::Info, "Sitemap URL count decreased slightly")
    } else {
        (Severity::Info, "Sitemap URL count increased")
    };
    Some(Classification::new(severity, title, diff))
}

/// Single-valued page signals tracked per key page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedField {
    Title,
    Canonical,
    MetaRobots,
}

impl TrackedField {
    pub fn artifact_kind(&self) -> ArtifactKind {
        match self {
            Self::Title => ArtifactKind::Title,
            Self::Canonical => ArtifactKind::Canonical,
            Self::MetaRobots => ArtifactKind::MetaRobots,
        }
    }

    pub fn category(&self) -> FindingCategory {
        match self {
            Self::Title => FindingCategory::Content,
            Self::Canonical | Self::MetaRobots => FindingCategory::Indexability,
        }
    }
}

fn has_noindex(directives: &str) -> bool {
    directives
        .split(',')
        .any(|d| matches!(d.trim().to_ascii_lowercase().as_str(), "noindex" | "none"))
}

/// Classify a change in a title, canonical or meta-robots value
pub fn classify_field(field: TrackedField, before: &str, after: &str) -> Option<Classification> {
    let before = before.trim();
    let after = after.trim();
    let same = match field {
        TrackedField::MetaRobots => normalize_directives(before) == normalize_directives(after),
        _ => before == after,
    };
    if same {
        return None;
    }

    let diff = line_set_diff(before, after);
    let removed = !before.is_empty() && after.is_empty();
    let added = before.is_empty() && !after.is_empty();

    let (severity, title) = match field {
        TrackedField::Canonical if removed => (Severity::Critical, "Canonical tag removed"),
        TrackedField::Canonical if added => (Severity::Info, "Canonical tag added"),
        TrackedField::Canonical => (Severity::Warning, "Canonical URL changed"),
        TrackedField::Title if removed => (Severity::Warning, "Page title removed"),
        TrackedField::Title if added => (Severity::Info, "Page title added"),
        TrackedField::Title => (Severity::Info, "Page title changed"),
        TrackedField::MetaRobots if has_noindex(after) && !has_noindex(before) => {
            (Severity::Critical, "Page set to noindex")
        }
        TrackedField::MetaRobots if removed => (Severity::Critical, "Meta robots tag removed"),
        TrackedField::MetaRobots if added => (Severity::Info, "Meta robots tag added"),
        TrackedField::MetaRobots => (Severity::Warning, "Meta robots directives changed"),
    };
    Some(Classification::new(severity, title, diff))
}

fn normalize_directives(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

/// Classify a key page's HTTP status against its previous status
pub fn classify_status(previous: Option<u16>, current: Option<u16>) -> Option<Classification> {
    let previous = previous?;
    let current = current?;
    if previous == current {
        return None;
    }
    let was_ok = (200..300).contains(&previous);
    let diff = format!("HTTP status: {} -> {}", previous, current);

    match current {
        404 | 410 if was_ok => Some(Classification::new(Severity::Critical, "Page no longer found", diff)),
        500..=599 if was_ok => Some(Classification::new(Severity::Warning, "Page returning server errors", diff)),
        200..=299 if !was_ok => Some(Classification::new(Severity::Info, "Page available again", diff)),
        _ => None,
    }
}

/// Classify a PageSpeed performance score (0-100) change; only drops matter
pub fn classify_performance(previous: f64, current: f64, thresholds: &Thresholds) -> Option<Classification> {
    let drop = previous - current;
    let diff = format!("Performance score: {:.0} -> {:.0}", previous, current);
    if drop >= thresholds.performance_critical_drop {
        Some(Classification::new(Severity::Critical, "Performance score dropped significantly", diff))
    } else if drop >= thresholds.performance_warning_drop {
        Some(Classification::new(Severity::Warning, "Performance score dropped", diff))
    } else {
        None
    }
}
