//! Configuration document loading and startup validation.
//!
//! The configuration is a JSON file describing the target website (base
//! URL, categories, selector map, optional headers), the AI provider, and
//! the output directory. Everything is checked eagerly: a malformed
//! selector or a missing mandatory field fails here with a
//! [`HarvestError::Config`] before any network activity starts.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{HarvestError, Result};

const DEFAULT_MAX_PAGES: u32 = 1;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REQUEST_DELAY_MS: u64 = 1000;
const DEFAULT_TARGET_LANGUAGE: &str = "Chinese";

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub website: WebsiteConfig,
    pub ai: AiConfig,
    pub output_dir: String,
}

/// Target website description.
#[derive(Debug, Clone, Deserialize)]
pub struct WebsiteConfig {
    /// Base URL that relative article links are resolved against.
    pub base_url: String,
    /// Listing pages to walk per category, unless overridden per category.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
    pub selectors: SelectorMap,
    /// Extra request headers sent with every fetch.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Politeness delay between consecutive outbound requests.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
}

/// One configured category listing page. Static for the whole run.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    pub url: String,
    /// Overrides `website.max_pages` for this category when set.
    #[serde(default)]
    pub max_pages: Option<u32>,
}

/// CSS selectors locating article fields within the target site's HTML.
///
/// `article_link`, `article_title` and `article_content` are mandatory;
/// `article_author` and `article_date` are optional and their absence at
/// extraction time is not a failure.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectorMap {
    pub article_link: String,
    pub article_title: String,
    pub article_content: String,
    #[serde(default)]
    pub article_author: Option<String>,
    #[serde(default)]
    pub article_date: Option<String>,
}

/// Which completion provider to use, chosen once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    /// Environment variable holding this provider's credential.
    pub fn env_var(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    /// Model used when the configuration does not name one.
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o",
            ProviderKind::Anthropic => "claude-3-5-sonnet-20241022",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAi => f.write_str("openai"),
            ProviderKind::Anthropic => f.write_str("anthropic"),
        }
    }
}

/// AI pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    pub provider: ProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub skip_translation: bool,
    #[serde(default = "default_target_language")]
    pub target_language: String,
}

impl AiConfig {
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }
}

fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_request_delay_ms() -> u64 {
    DEFAULT_REQUEST_DELAY_MS
}

fn default_target_language() -> String {
    DEFAULT_TARGET_LANGUAGE.to_string()
}

impl AppConfig {
    /// Load and validate a configuration document from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: AppConfig = serde_json::from_str(&raw).map_err(|e| {
            HarvestError::config(format!("cannot parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that would otherwise surface confusingly deep in
    /// the pipeline: selector strings must be non-empty and parse as CSS
    /// selectors, URLs must parse, the output dir must be named.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.website.base_url)
            .map_err(|e| HarvestError::config(format!("invalid base_url: {e}")))?;

        let selectors = &self.website.selectors;
        validate_selector("article_link", &selectors.article_link)?;
        validate_selector("article_title", &selectors.article_title)?;
        validate_selector("article_content", &selectors.article_content)?;
        if let Some(s) = &selectors.article_author {
            validate_selector("article_author", s)?;
        }
        if let Some(s) = &selectors.article_date {
            validate_selector("article_date", s)?;
        }

        for category in &self.website.categories {
            if category.name.trim().is_empty() {
                return Err(HarvestError::config("category with empty name"));
            }
            url::Url::parse(&category.url).map_err(|e| {
                HarvestError::config(format!("invalid url for category '{}': {e}", category.name))
            })?;
        }

        if self.output_dir.trim().is_empty() {
            return Err(HarvestError::config("output_dir must not be empty"));
        }
        Ok(())
    }
}

fn validate_selector(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(HarvestError::config(format!(
            "selector '{field}' must not be empty"
        )));
    }
    scraper::Selector::parse(value).map_err(|e| {
        HarvestError::config(format!("selector '{field}' ('{value}') does not parse: {e}"))
    })?;
    Ok(())
}
