//! The run loop: categories × pages × articles.
//!
//! The orchestrator owns the only cross-article state in the pipeline:
//! the id counter, the canonical-URL dedup set, and the run summary.
//! Every per-article error is converted into a summary entry here; only
//! configuration and authentication failures escape and abort the run.
//!
//! Per-link lifecycle: Discovered → Fetched → Extracted → AiProcessed →
//! Generated → Written, with Failed/Skipped edges out of every step.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, instrument, warn};
use url::Url;

use crate::ai::provider::Complete;
use crate::ai::AiProcessor;
use crate::config::{AppConfig, CategoryConfig};
use crate::error::{HarvestError, Result};
use crate::extractor::{self, CompiledSelectors};
use crate::fetcher::FetchPage;
use crate::generator::{ContentGenerator, OutputIndex};
use crate::models::{ArticleLink, RunSummary, SkipReason};
use crate::retry::RetryPolicy;

/// Drives the whole harvest run.
pub struct Orchestrator<F: FetchPage, P: Complete> {
    fetcher: F,
    processor: AiProcessor<P>,
    generator: ContentGenerator,
    config: AppConfig,
    selectors: CompiledSelectors,
    base_url: Url,
    retry: RetryPolicy,
    force: bool,
    cancel: Arc<AtomicBool>,
}

/// Mutable state for one run, owned exclusively by the orchestrator.
struct RunState {
    summary: RunSummary,
    /// Canonical URLs already taken this run, across categories.
    seen: HashSet<String>,
    /// What the output directory already contained at run start.
    index: OutputIndex,
    next_id: u64,
}

impl<F: FetchPage, P: Complete> Orchestrator<F, P> {
    pub fn new(
        fetcher: F,
        processor: AiProcessor<P>,
        generator: ContentGenerator,
        config: AppConfig,
        retry: RetryPolicy,
        force: bool,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self> {
        let selectors = CompiledSelectors::compile(&config.website.selectors)?;
        let base_url = Url::parse(&config.website.base_url)
            .map_err(|e| HarvestError::config(format!("invalid base_url: {e}")))?;
        Ok(Self {
            fetcher,
            processor,
            generator,
            config,
            selectors,
            base_url,
            retry,
            force,
            cancel,
        })
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    async fn politeness_pause(&self) {
        let delay = Duration::from_millis(self.config.website.request_delay_ms);
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    /// Walk every configured category.
    #[instrument(level = "info", skip(self))]
    pub async fn run(&self, max_articles_per_category: usize) -> Result<RunSummary> {
        if self.config.website.categories.is_empty() {
            return Err(HarvestError::config("no categories configured"));
        }

        let mut state = self.start_state().await?;
        for category in self.config.website.categories.clone() {
            if self.cancelled() {
                warn!("Cancellation requested; stopping before next category");
                break;
            }
            self.harvest_category(&category, max_articles_per_category, &mut state)
                .await?;
        }
        Ok(state.summary)
    }

    /// Process exactly one article URL, bypassing listing discovery.
    #[instrument(level = "info", skip(self))]
    pub async fn run_single(&self, url: &str, category: &str) -> Result<RunSummary> {
        let parsed = Url::parse(url)
            .map_err(|e| HarvestError::config(format!("invalid article url '{url}': {e}")))?;
        let link = ArticleLink {
            url: extractor::canonicalize(&parsed),
            category: category.to_string(),
        };

        let mut state = self.start_state().await?;
        state.seen.insert(link.url.clone());
        self.process_link(&link, &mut state).await?;
        Ok(state.summary)
    }

    async fn start_state(&self) -> Result<RunState> {
        let index = self.generator.scan_output().await?;
        let next_id = index.max_id + 1;
        Ok(RunState {
            summary: RunSummary::default(),
            seen: HashSet::new(),
            index,
            next_id,
        })
    }

    #[instrument(level = "info", skip(self, state), fields(category = %category.name))]
    async fn harvest_category(
        &self,
        category: &CategoryConfig,
        max_articles: usize,
        state: &mut RunState,
    ) -> Result<()> {
        let links = self.discover_links(category, max_articles, state).await;
        info!(count = links.len(), "Links selected for processing");

        for link in links {
            if self.cancelled() {
                warn!("Cancellation requested; stopping before next article");
                break;
            }
            self.politeness_pause().await;
            self.process_link(&link, state).await?;
        }
        Ok(())
    }

    /// Walk the category's listing pages and collect up to `max_articles`
    /// canonical links not already taken this run.
    async fn discover_links(
        &self,
        category: &CategoryConfig,
        max_articles: usize,
        state: &mut RunState,
    ) -> Vec<ArticleLink> {
        let max_pages = category.max_pages.unwrap_or(self.config.website.max_pages);
        let mut links: Vec<ArticleLink> = Vec::new();

        for page in 1..=max_pages {
            if self.cancelled() || links.len() >= max_articles {
                break;
            }
            if page > 1 {
                self.politeness_pause().await;
            }
            let page_url = if page == 1 {
                category.url.clone()
            } else {
                format!("{}?page={}", category.url, page)
            };

            let html = match self.fetch_with_retry(&page_url).await {
                Ok(html) => html,
                Err(e) => {
                    warn!(url = %page_url, error = %e, "Listing fetch failed; stopping pagination");
                    break;
                }
            };

            let found = extractor::extract_links(&html, &self.selectors.link, &self.base_url);
            info!(page, count = found.len(), "Listing page indexed");

            for url in found {
                if links.len() >= max_articles {
                    break;
                }
                if state.seen.insert(url.clone()) {
                    links.push(ArticleLink {
                        url,
                        category: category.name.clone(),
                    });
                }
            }
        }
        links
    }

    /// Run one link through the per-article state machine. The returned
    /// error is always fatal (auth/config); everything else lands in the
    /// summary.
    #[instrument(level = "info", skip(self, state), fields(url = %link.url))]
    async fn process_link(&self, link: &ArticleLink, state: &mut RunState) -> Result<()> {
        if state.index.contains_source(&link.url) && !self.force {
            info!(reason = %SkipReason::AlreadyWritten, "Skipping article");
            state.summary.record_skipped();
            return Ok(());
        }

        // Discovered → Fetched
        let html = match self.fetch_with_retry(&link.url).await {
            Ok(html) => {
                state.summary.record_fetched();
                html
            }
            Err(e) => {
                warn!(error = %e, "Article fetch failed");
                state.summary.record_failed(&link.url, &e);
                return Ok(());
            }
        };

        // Fetched → Extracted
        let raw = match extractor::extract_article(&html, &self.selectors, &link.url, &link.category)
        {
            Ok(raw) => {
                state.summary.record_extracted();
                raw
            }
            Err(e) => {
                warn!(error = %e, "Extraction failed");
                state.summary.record_failed(&link.url, &e);
                return Ok(());
            }
        };

        // Extracted → AiProcessed
        let processed = match self.processor.process(&raw).await {
            Ok(processed) => {
                state.summary.record_ai_processed();
                processed
            }
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Fatal provider failure; aborting run");
                return Err(e);
            }
            Err(e) => {
                warn!(error = %e, "AI processing failed");
                state.summary.record_failed(&link.url, &e);
                return Ok(());
            }
        };

        // AiProcessed → Generated. The id is consumed by generation and
        // never reused, even if the write below fails.
        let document = self.generator.generate(&processed, state.next_id);
        state.next_id += 1;

        // Generated → Written
        match self.write_with_retry(&document).await {
            Ok(path) => {
                state.index.source_urls.insert(link.url.clone());
                state.summary.record_written(&link.category);
                info!(id = document.id(), path = %path.display(), "Article written");
            }
            Err(e) => {
                warn!(error = %e, "Write failed");
                state.summary.record_failed(&link.url, &e);
            }
        }
        Ok(())
    }

    /// Fetch with the shared retry policy. Network errors are transient
    /// enough to retry; anything else surfaces immediately.
    async fn fetch_with_retry(&self, url: &str) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.fetcher.fetch(url).await {
                Ok(html) => return Ok(html),
                Err(e @ HarvestError::Network { .. }) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(%url, attempt, ?delay, error = %e, "Fetch failed; backing off");
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Write errors get exactly one extra attempt.
    async fn write_with_retry(
        &self,
        document: &crate::models::ContentDocument,
    ) -> Result<std::path::PathBuf> {
        match self.generator.write(document).await {
            Ok(path) => Ok(path),
            Err(first) => {
                warn!(error = %first, "Write failed; retrying once");
                self.generator.write(document).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::CompletionRequest;
    use crate::config::{AiConfig, ProviderKind, SelectorMap, WebsiteConfig};
    use crate::error::AiError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const STUB_REWRITE: &str = "## Stub Rewrite\n\nStub body text.";

    /// Serves canned HTML; unknown URLs fail like dead links.
    struct StubFetcher {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl FetchPage for StubFetcher {
        async fn fetch(&self, url: &str) -> Result<String> {
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| HarvestError::network(url, "HTTP status 404 Not Found"))
        }
    }

    /// Fixed-output provider: canned key points and rewrite text.
    struct StubProvider {
        auth_fails: bool,
    }

    #[async_trait]
    impl Complete for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> std::result::Result<String, AiError> {
            if self.auth_fails {
                return Err(AiError::Auth("invalid credential".into()));
            }
            if request.system.contains("content analyst") {
                Ok("- stub point one\n- stub point two".into())
            } else {
                Ok(STUB_REWRITE.into())
            }
        }
    }

    fn listing_html(posts: &[&str]) -> String {
        posts
            .iter()
            .map(|p| format!(r#"<div class="post"><a class="title" href="{p}">t</a></div>"#))
            .collect()
    }

    fn article_html(title: &str) -> String {
        format!(
            r#"<h1>{title}</h1><div class="byline">Jane Doe</div>
               <div class="content"><p>Paragraph one.</p><p>Paragraph two.</p></div>"#
        )
    }

    fn article_without_content(title: &str) -> String {
        format!("<h1>{title}</h1><div>no content node</div>")
    }

    fn test_config(output_dir: &std::path::Path) -> AppConfig {
        AppConfig {
            website: WebsiteConfig {
                base_url: "https://site.test".to_string(),
                max_pages: 1,
                categories: vec![CategoryConfig {
                    name: "tech".to_string(),
                    url: "https://site.test/tech".to_string(),
                    max_pages: None,
                }],
                selectors: SelectorMap {
                    article_link: ".post a.title".to_string(),
                    article_title: "h1".to_string(),
                    article_content: "div.content".to_string(),
                    article_author: Some(".byline".to_string()),
                    article_date: None,
                },
                headers: HashMap::new(),
                timeout_secs: 30,
                request_delay_ms: 0,
            },
            ai: AiConfig {
                provider: ProviderKind::OpenAi,
                model: None,
                skip_translation: true,
                target_language: "Chinese".to_string(),
            },
            output_dir: output_dir.to_string_lossy().into_owned(),
        }
    }

    fn build_orchestrator(
        pages: HashMap<String, String>,
        output_dir: &std::path::Path,
        auth_fails: bool,
        force: bool,
    ) -> Orchestrator<StubFetcher, StubProvider> {
        let config = test_config(output_dir);
        let retry = RetryPolicy::new(3, Duration::from_millis(1));
        let processor = AiProcessor::new(StubProvider { auth_fails }, &config.ai, retry);
        let generator = ContentGenerator::new(output_dir);
        Orchestrator::new(
            StubFetcher { pages },
            processor,
            generator,
            config,
            retry,
            force,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap()
    }

    fn three_post_site() -> HashMap<String, String> {
        let mut pages = HashMap::new();
        pages.insert(
            "https://site.test/tech".to_string(),
            listing_html(&["/post/1", "/post/2", "/post/3"]),
        );
        pages.insert("https://site.test/post/1".to_string(), article_html("Post One"));
        pages.insert("https://site.test/post/2".to_string(), article_html("Post Two"));
        pages.insert("https://site.test/post/3".to_string(), article_html("Post Three"));
        pages
    }

    fn md_files(dir: &std::path::Path) -> Vec<String> {
        let mut files: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".md"))
            .collect();
        files.sort();
        files
    }

    #[tokio::test]
    async fn test_end_to_end_capped_run() {
        let tmp = TempDir::new().unwrap();
        let orchestrator = build_orchestrator(three_post_site(), tmp.path(), false, false);

        let summary = orchestrator.run(2).await.unwrap();
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.extracted, 2);
        assert_eq!(summary.ai_processed, 2);
        assert_eq!(summary.written, 2);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.per_category.get("tech"), Some(&2));

        let files = md_files(tmp.path());
        assert_eq!(files.len(), 2);
        assert!(files[0].starts_with("1-"));
        assert!(files[1].starts_with("2-"));

        let first = std::fs::read_to_string(tmp.path().join(&files[0])).unwrap();
        assert!(first.contains("id: 1"));
        assert!(first.contains("published: true"));
        assert!(first.contains("source_url: https://site.test/post/1"));
        // Body is exactly the stub rewrite, followed by the attribution footer
        assert!(first.contains(STUB_REWRITE));
        assert!(first.contains("**Original source**: [Post One](https://site.test/post/1)"));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let tmp = TempDir::new().unwrap();

        let orchestrator = build_orchestrator(three_post_site(), tmp.path(), false, false);
        let first = orchestrator.run(2).await.unwrap();
        assert_eq!(first.written, 2);

        // Fresh orchestrator, unchanged source: dedup by source URL
        let orchestrator = build_orchestrator(three_post_site(), tmp.path(), false, false);
        let second = orchestrator.run(2).await.unwrap();
        assert_eq!(second.written, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(second.fetched, 0);
        assert_eq!(md_files(tmp.path()).len(), 2);
    }

    #[tokio::test]
    async fn test_force_overwrites_existing_documents() {
        let tmp = TempDir::new().unwrap();

        let orchestrator = build_orchestrator(three_post_site(), tmp.path(), false, false);
        orchestrator.run(2).await.unwrap();

        let orchestrator = build_orchestrator(three_post_site(), tmp.path(), false, true);
        let second = orchestrator.run(2).await.unwrap();
        assert_eq!(second.written, 2);
        assert_eq!(second.skipped, 0);
        // Regenerated documents get fresh ids above the existing maximum
        let files = md_files(tmp.path());
        assert!(files.iter().any(|f| f.starts_with("3-")));
        assert!(files.iter().any(|f| f.starts_with("4-")));
    }

    #[tokio::test]
    async fn test_ids_continue_above_existing_output() {
        let tmp = TempDir::new().unwrap();

        // First run writes ids 1 and 2
        let orchestrator = build_orchestrator(three_post_site(), tmp.path(), false, false);
        orchestrator.run(2).await.unwrap();

        // A later run over new content must assign ids above 2
        let mut pages = three_post_site();
        pages.insert(
            "https://site.test/tech".to_string(),
            listing_html(&["/post/4"]),
        );
        pages.insert("https://site.test/post/4".to_string(), article_html("Post Four"));
        let orchestrator = build_orchestrator(pages, tmp.path(), false, false);
        let summary = orchestrator.run(2).await.unwrap();
        assert_eq!(summary.written, 1);
        assert!(md_files(tmp.path()).iter().any(|f| f.starts_with("3-")));
    }

    #[tokio::test]
    async fn test_extraction_failure_is_isolated() {
        let tmp = TempDir::new().unwrap();
        let mut pages = three_post_site();
        pages.insert(
            "https://site.test/post/2".to_string(),
            article_without_content("Post Two"),
        );
        let orchestrator = build_orchestrator(pages, tmp.path(), false, false);

        let summary = orchestrator.run(3).await.unwrap();
        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.written, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures.len(), 1);
        assert!(summary.failures[0].0.contains("/post/2"));
        assert!(summary.failures[0].1.contains("article_content"));

        // Sibling articles got the ids; the failed one consumed none
        let files = md_files(tmp.path());
        assert!(files[0].starts_with("1-"));
        assert!(files[1].starts_with("2-"));
    }

    #[tokio::test]
    async fn test_dead_article_link_is_recorded_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let mut pages = three_post_site();
        pages.remove("https://site.test/post/3");
        let orchestrator = build_orchestrator(pages, tmp.path(), false, false);

        let summary = orchestrator.run(3).await.unwrap();
        assert_eq!(summary.written, 2);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_run() {
        let tmp = TempDir::new().unwrap();
        let orchestrator = build_orchestrator(three_post_site(), tmp.path(), true, false);

        let err = orchestrator.run(2).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(md_files(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_single_url_mode() {
        let tmp = TempDir::new().unwrap();
        let mut pages = HashMap::new();
        pages.insert(
            "https://site.test/post/9".to_string(),
            article_html("Direct Post"),
        );
        let orchestrator = build_orchestrator(pages, tmp.path(), false, false);

        let summary = orchestrator
            .run_single("https://site.test/post/9?utm_source=mail#top", "finance")
            .await
            .unwrap();
        assert_eq!(summary.written, 1);
        assert_eq!(summary.per_category.get("finance"), Some(&1));

        let files = md_files(tmp.path());
        assert_eq!(files.len(), 1);
        let contents = std::fs::read_to_string(tmp.path().join(&files[0])).unwrap();
        // Canonicalized before processing and in the stored metadata
        assert!(contents.contains("source_url: https://site.test/post/9"));
        assert!(contents.contains("industry: finance"));
    }

    #[tokio::test]
    async fn test_empty_categories_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let mut orchestrator = build_orchestrator(HashMap::new(), tmp.path(), false, false);
        orchestrator.config.website.categories.clear();

        let err = orchestrator.run(2).await.unwrap_err();
        assert!(matches!(err, HarvestError::Config(_)));
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_article() {
        let tmp = TempDir::new().unwrap();
        let cancel = Arc::new(AtomicBool::new(true));
        let config = test_config(tmp.path());
        let retry = RetryPolicy::new(3, Duration::from_millis(1));
        let processor = AiProcessor::new(StubProvider { auth_fails: false }, &config.ai, retry);
        let orchestrator = Orchestrator::new(
            StubFetcher {
                pages: three_post_site(),
            },
            processor,
            ContentGenerator::new(tmp.path()),
            config,
            retry,
            false,
            cancel,
        )
        .unwrap();

        let summary = orchestrator.run(3).await.unwrap();
        assert_eq!(summary.written, 0);
        assert!(md_files(tmp.path()).is_empty());
    }
}
