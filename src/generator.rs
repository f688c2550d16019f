//! Content document generation.
//!
//! Turns a [`ProcessedArticle`] into a Markdown document with a YAML front
//! matter block, a deterministic tag set, an excerpt, and an attribution
//! footer, then writes it atomically under the output directory.
//!
//! Everything here is reproducible for identical input text: the tag
//! heuristic is a stop-word-filtered frequency count, not an AI call, and
//! ids are assigned by the caller from a one-time scan of the output
//! directory.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{Datelike, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, instrument};

use crate::error::{HarvestError, Result};
use crate::models::{ContentDocument, FrontMatter, ProcessedArticle};
use crate::utils::slugify_title;

const MAX_TAGS: usize = 5;
const MIN_TAG_LEN: usize = 3;
const EXCERPT_MAX_CHARS: usize = 150;
const DEFAULT_LOCATION: &str = "Paris";

static ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^id:\s*(\d+)\s*$").unwrap());
static SOURCE_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^source_url:\s*(\S+)\s*$").unwrap());

/// Tokens ignored by the tag heuristic. English and French function words
/// cover the source sites this pipeline targets; CJK text tokenizes into
/// longer runs that rarely collide with these.
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // English
        "the", "and", "for", "are", "was", "were", "been", "being", "but", "not", "you",
        "your", "our", "their", "they", "them", "his", "her", "she", "him", "has", "have",
        "had", "will", "would", "could", "should", "can", "may", "might", "this", "that",
        "these", "those", "with", "from", "into", "over", "after", "before", "about",
        "than", "then", "there", "here", "when", "where", "which", "who", "whom", "what",
        "why", "how", "all", "each", "more", "most", "other", "some", "such", "only",
        "also", "its", "it's", "out", "off", "per", "via", "one", "two", "new",
        // French
        "les", "des", "une", "dans", "sur", "pour", "avec", "par", "est", "sont", "qui",
        "que", "pas", "plus", "cette", "ces", "son", "ses", "leur", "aux", "elle", "ils",
        "elles", "nous", "vous", "mais", "comme", "tout", "tous", "être", "fait", "ont",
    ]
    .into_iter()
    .collect()
});

/// What already exists in the output directory: the highest assigned id
/// and every source URL, scanned once per run.
#[derive(Debug, Default)]
pub struct OutputIndex {
    pub max_id: u64,
    pub source_urls: HashSet<String>,
}

impl OutputIndex {
    pub fn contains_source(&self, url: &str) -> bool {
        self.source_urls.contains(url)
    }
}

/// Generates and writes content documents.
pub struct ContentGenerator {
    output_dir: PathBuf,
}

impl ContentGenerator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Scan the output directory for existing documents.
    ///
    /// Reads every `.md` file's front matter for `id` and `source_url`.
    /// Files that don't carry them are ignored. A missing directory is an
    /// empty index, not an error.
    #[instrument(level = "info", skip(self), fields(dir = %self.output_dir.display()))]
    pub async fn scan_output(&self) -> Result<OutputIndex> {
        let mut index = OutputIndex::default();

        let mut entries = match tokio::fs::read_dir(&self.output_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(index),
            Err(e) => return Err(HarvestError::Io(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Ok(contents) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            if let Some(id) = ID_RE
                .captures(&contents)
                .and_then(|c| c[1].parse::<u64>().ok())
            {
                index.max_id = index.max_id.max(id);
            }
            if let Some(url) = SOURCE_URL_RE.captures(&contents).map(|c| c[1].to_string()) {
                index.source_urls.insert(url);
            }
        }

        info!(
            max_id = index.max_id,
            existing = index.source_urls.len(),
            "Scanned output directory"
        );
        Ok(index)
    }

    /// Build a document from a processed article and a caller-assigned id.
    pub fn generate(&self, article: &ProcessedArticle, id: u64) -> ContentDocument {
        let body = article.final_body().to_string();
        let tags = extract_tags(&body, &article.raw.category);
        let excerpt = make_excerpt(&body);
        let now = Local::now();

        let front_matter = FrontMatter {
            id,
            title: article.final_title().to_string(),
            entrepreneur: article
                .raw
                .author
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            company: String::new(),
            industry: article.raw.category.clone(),
            founded_year: now.year(),
            location: DEFAULT_LOCATION.to_string(),
            tags,
            excerpt,
            date: now.date_naive().to_string(),
            published: true,
            source_url: article.raw.url.clone(),
        };

        ContentDocument {
            front_matter,
            body,
            original_title: article.raw.title.clone(),
        }
    }

    /// Serialize a document: front matter block, body, attribution footer.
    pub fn render(&self, document: &ContentDocument) -> Result<String> {
        let yaml = serde_yaml::to_string(&document.front_matter)?;
        Ok(format!(
            "---\n{yaml}---\n\n{body}\n\n---\n\n**Original source**: [{title}]({url})\n\n\
             *This story was automatically collected, rewritten, and translated by an AI pipeline.*\n",
            body = document.body.trim_end(),
            title = document.original_title,
            url = document.front_matter.source_url,
        ))
    }

    /// Path a document is written to, derived from its assigned id.
    pub fn document_path(&self, document: &ContentDocument) -> PathBuf {
        let slug = slugify_title(&document.original_title);
        let name = if slug.is_empty() {
            format!("{}.md", document.id())
        } else {
            format!("{}-{}.md", document.id(), slug)
        };
        self.output_dir.join(name)
    }

    /// Write a rendered document atomically: the content lands in a
    /// temporary file first and is renamed into place, so readers never
    /// observe a half-written document.
    #[instrument(level = "info", skip_all, fields(id = document.id()))]
    pub async fn write(&self, document: &ContentDocument) -> Result<PathBuf> {
        let rendered = self.render(document)?;
        let path = self.document_path(document);
        let tmp = path.with_extension("md.tmp");

        write_file(&tmp, rendered.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            HarvestError::Write {
                path: path.clone(),
                source: e,
            }
        })?;

        info!(path = %path.display(), "Wrote content document");
        Ok(path)
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| HarvestError::Write {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Deterministic tag extraction: the category name first, then the most
/// frequent content words (lower-cased, stop-word filtered, length ≥ 3,
/// non-numeric), ties broken by first appearance.
pub fn extract_tags(body: &str, category: &str) -> Vec<String> {
    let lowered = body.to_lowercase();
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();

    for (position, token) in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TAG_LEN)
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !STOP_WORDS.contains(t))
        .enumerate()
    {
        let entry = counts.entry(token).or_insert((0, position));
        entry.0 += 1;
    }

    let mut ranked: Vec<(&str, usize, usize)> = counts
        .into_iter()
        .map(|(token, (count, first))| (token, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    let category_lower = category.to_lowercase();
    let mut tags = vec![category.to_string()];
    for (token, _, _) in ranked {
        if tags.len() >= MAX_TAGS {
            break;
        }
        if token != category_lower {
            tags.push(token.to_string());
        }
    }
    tags
}

/// Excerpt: the opening of the body as plain text, cut at the nearest
/// sentence boundary within the length budget; falls back to a word
/// boundary with an ellipsis, never mid-word.
pub fn make_excerpt(body: &str) -> String {
    let plain: String = body
        .chars()
        .filter(|c| !matches!(c, '#' | '*' | '`' | '[' | ']' | '(' | ')'))
        .collect();
    let first_line = plain
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");

    let chars: Vec<char> = first_line.chars().collect();
    if chars.len() <= EXCERPT_MAX_CHARS {
        return first_line.to_string();
    }

    let window = &chars[..EXCERPT_MAX_CHARS];
    // Prefer the last sentence end inside the window.
    if let Some(end) = window
        .iter()
        .rposition(|c| matches!(c, '.' | '!' | '?' | '。' | '！' | '？'))
    {
        return window[..=end].iter().collect();
    }
    // Otherwise cut at the last word boundary.
    let cut = window
        .iter()
        .rposition(|c| c.is_whitespace())
        .unwrap_or(EXCERPT_MAX_CHARS);
    let mut excerpt: String = window[..cut].iter().collect();
    excerpt.push('…');
    excerpt
}
