//! Data models for articles and their processed representations.
//!
//! The pipeline moves an article through four shapes:
//! [`ArticleLink`] (discovered on a listing page) → [`RawArticle`]
//! (selector-extracted) → [`ProcessedArticle`] (AI-rewritten, optionally
//! translated) → [`ContentDocument`] (front matter + body, ready to write).
//! [`RunSummary`] aggregates per-article outcomes across the whole run.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// A discovered article link, canonicalized, with its originating category.
#[derive(Debug, Clone)]
pub struct ArticleLink {
    /// Canonical article URL (fragment and tracking params stripped).
    pub url: String,
    /// Name of the category whose listing page produced this link.
    pub category: String,
}

/// A raw article as extracted from an article page via the selector map.
///
/// `title` and `content` are guaranteed non-empty; extraction fails
/// otherwise. `author` and `date` come from optional selectors.
#[derive(Debug, Clone)]
pub struct RawArticle {
    pub title: String,
    pub content: String,
    pub author: Option<String>,
    pub date: Option<String>,
    /// Canonical source URL of the page this was extracted from.
    pub url: String,
    pub category: String,
}

/// An article after the AI pipeline has run.
///
/// `translated_title`/`translated_body` are present only when the
/// translation stage actually ran; otherwise the rewritten text is used
/// downstream unchanged.
#[derive(Debug, Clone)]
pub struct ProcessedArticle {
    pub raw: RawArticle,
    pub key_points: Vec<String>,
    pub rewritten: String,
    pub translated_title: Option<String>,
    pub translated_body: Option<String>,
    pub target_language: String,
}

impl ProcessedArticle {
    /// The body that flows into the generated document.
    pub fn final_body(&self) -> &str {
        self.translated_body.as_deref().unwrap_or(&self.rewritten)
    }

    /// The title that flows into the generated document.
    pub fn final_title(&self) -> &str {
        self.translated_title.as_deref().unwrap_or(&self.raw.title)
    }
}

/// Front matter metadata block of a generated document.
///
/// Field declaration order is the serialization order, which keeps diffs
/// stable across runs: id, title, entrepreneur, company, industry,
/// founded_year, location, tags, excerpt, date, published, source_url.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrontMatter {
    pub id: u64,
    pub title: String,
    pub entrepreneur: String,
    pub company: String,
    pub industry: String,
    pub founded_year: i32,
    pub location: String,
    pub tags: Vec<String>,
    pub excerpt: String,
    pub date: String,
    pub published: bool,
    pub source_url: String,
}

/// A fully generated content document, ready to be written to disk.
#[derive(Debug, Clone)]
pub struct ContentDocument {
    pub front_matter: FrontMatter,
    /// Final article body (translated or rewritten), without the front
    /// matter block or attribution footer.
    pub body: String,
    /// Original (untranslated) title, cited in the attribution footer.
    pub original_title: String,
}

impl ContentDocument {
    pub fn id(&self) -> u64 {
        self.front_matter.id
    }
}

/// Why an article was skipped rather than written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The canonical URL was already seen earlier in this run.
    DuplicateInRun,
    /// A document with the same source URL already exists in the output dir.
    AlreadyWritten,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::DuplicateInRun => f.write_str("duplicate link in this run"),
            SkipReason::AlreadyWritten => f.write_str("already present in output directory"),
        }
    }
}

/// Aggregated counts and failure reasons for one run.
///
/// Built incrementally by the orchestrator and rendered once at the end.
/// Not persisted beyond the current invocation.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub fetched: usize,
    pub extracted: usize,
    pub ai_processed: usize,
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
    /// `(url, reason)` for every article that ended in `Failed`.
    pub failures: Vec<(String, String)>,
    /// Written-document counts per category name.
    pub per_category: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn record_fetched(&mut self) {
        self.fetched += 1;
    }

    pub fn record_extracted(&mut self) {
        self.extracted += 1;
    }

    pub fn record_ai_processed(&mut self) {
        self.ai_processed += 1;
    }

    pub fn record_written(&mut self, category: &str) {
        self.written += 1;
        *self.per_category.entry(category.to_string()).or_insert(0) += 1;
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn record_failed(&mut self, url: &str, reason: impl std::fmt::Display) {
        self.failed += 1;
        self.failures.push((url.to_string(), reason.to_string()));
    }

    /// Render the summary as a human-readable block for stdout.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let rule = "=".repeat(60);
        writeln!(out, "{rule}").unwrap();
        writeln!(out, "Run complete").unwrap();
        writeln!(out, "{rule}").unwrap();
        writeln!(out, "fetched:      {}", self.fetched).unwrap();
        writeln!(out, "extracted:    {}", self.extracted).unwrap();
        writeln!(out, "ai processed: {}", self.ai_processed).unwrap();
        writeln!(out, "written:      {}", self.written).unwrap();
        writeln!(out, "skipped:      {}", self.skipped).unwrap();
        writeln!(out, "failed:       {}", self.failed).unwrap();
        if !self.per_category.is_empty() {
            writeln!(out, "\nwritten per category:").unwrap();
            for (category, count) in &self.per_category {
                writeln!(out, "  - {category}: {count}").unwrap();
            }
        }
        if !self.failures.is_empty() {
            writeln!(out, "\nfailures:").unwrap();
            for (url, reason) in &self.failures {
                writeln!(out, "  - {url}: {reason}").unwrap();
            }
        }
        writeln!(out, "{rule}").unwrap();
        out
    }
}
