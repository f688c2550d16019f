//! Selector-driven extraction of links and articles from fetched HTML.
//!
//! Two modes, matching the two page shapes the pipeline sees:
//! listing pages yield ordered, canonicalized article URLs; article pages
//! yield a [`RawArticle`] through the configured selector map. All parsing
//! is synchronous over an owned HTML string, so no parsed document is ever
//! held across an await point.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::config::SelectorMap;
use crate::error::{HarvestError, Result};
use crate::models::RawArticle;
use crate::utils::collapse_whitespace;

/// Query parameters stripped during URL canonicalization.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "ref"];

static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").unwrap());

/// Selector map compiled once at startup.
///
/// Compilation failures are configuration errors; [`crate::config`]
/// validation runs the same parses first, so failures here mean the
/// selector map bypassed validation.
pub struct CompiledSelectors {
    pub link: Selector,
    pub title: Selector,
    pub content: Selector,
    pub author: Option<Selector>,
    pub date: Option<Selector>,
}

impl CompiledSelectors {
    pub fn compile(map: &SelectorMap) -> Result<Self> {
        Ok(Self {
            link: compile_one("article_link", &map.article_link)?,
            title: compile_one("article_title", &map.article_title)?,
            content: compile_one("article_content", &map.article_content)?,
            author: map
                .article_author
                .as_deref()
                .map(|s| compile_one("article_author", s))
                .transpose()?,
            date: map
                .article_date
                .as_deref()
                .map(|s| compile_one("article_date", s))
                .transpose()?,
        })
    }
}

fn compile_one(field: &str, value: &str) -> Result<Selector> {
    Selector::parse(value)
        .map_err(|e| HarvestError::config(format!("selector '{field}' does not parse: {e}")))
}

/// Produce a canonical form of a URL for deduplication: fragment dropped,
/// tracking query parameters (`utm_*`, `fbclid`, `gclid`, `ref`) stripped.
pub fn canonicalize(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        canonical.set_query(None);
    } else {
        canonical
            .query_pairs_mut()
            .clear()
            .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    canonical.to_string()
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// Extract article URLs from a listing page.
///
/// The link selector may match `<a>` elements directly or containers whose
/// first `a[href]` descendant carries the link. Relative hrefs are resolved
/// against `base_url`; unparseable hrefs are skipped. Within one page,
/// duplicates are removed preserving first-occurrence order.
pub fn extract_links(html: &str, link_selector: &Selector, base_url: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(link_selector) {
        let href = element
            .value()
            .attr("href")
            .or_else(|| {
                element
                    .select(&ANCHOR_SELECTOR)
                    .next()
                    .and_then(|a| a.value().attr("href"))
            });
        let Some(href) = href else { continue };

        match base_url.join(href) {
            Ok(resolved) => {
                let canonical = canonicalize(&resolved);
                if seen.insert(canonical.clone()) {
                    links.push(canonical);
                }
            }
            Err(e) => {
                warn!(%href, error = %e, "Skipping unresolvable link");
            }
        }
    }

    debug!(count = links.len(), "Extracted listing links");
    links
}

/// Extract a structured raw article from an article page.
///
/// `title` and `content` are mandatory: a selector that matches nothing,
/// or matches only empty text, fails the extraction. `author` and `date`
/// are best-effort.
pub fn extract_article(
    html: &str,
    selectors: &CompiledSelectors,
    url: &str,
    category: &str,
) -> Result<RawArticle> {
    let document = Html::parse_document(html);

    let title = first_text(&document, &selectors.title)
        .ok_or_else(|| HarvestError::extraction("article_title", url))?;

    let content = content_text(&document, &selectors.content)
        .ok_or_else(|| HarvestError::extraction("article_content", url))?;

    let author = selectors
        .author
        .as_ref()
        .and_then(|s| first_text(&document, s));
    let date = selectors
        .date
        .as_ref()
        .and_then(|s| first_text(&document, s));

    debug!(%url, title = %title, bytes = content.len(), "Extracted article");
    Ok(RawArticle {
        title,
        content,
        author,
        date,
        url: url.to_string(),
        category: category.to_string(),
    })
}

/// Collapsed text of the first non-empty match, if any.
fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .map(element_text)
        .find(|text| !text.is_empty())
}

/// Concatenated text of every match of the content selector.
///
/// Within each matched element, individual text nodes become paragraphs
/// separated by blank lines, so downstream AI stages see the article's
/// structure; whitespace runs inside a node collapse to single spaces.
fn content_text(document: &Html, selector: &Selector) -> Option<String> {
    let mut paragraphs: Vec<String> = Vec::new();
    for element in document.select(selector) {
        for node in element.text() {
            let collapsed = collapse_whitespace(node);
            if !collapsed.is_empty() {
                paragraphs.push(collapsed);
            }
        }
    }
    if paragraphs.is_empty() {
        None
    } else {
        Some(paragraphs.join("\n\n"))
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectorMap;

    fn selectors() -> CompiledSelectors {
        CompiledSelectors::compile(&SelectorMap {
            article_link: ".post a.title".to_string(),
            article_title: "h1".to_string(),
            article_content: "div.content".to_string(),
            article_author: Some(".byline".to_string()),
            article_date: Some("time".to_string()),
        })
        .unwrap()
    }

    #[test]
    fn test_canonicalize_strips_fragment_and_tracking() {
        let url = Url::parse(
            "https://example.com/post/1?utm_source=x&utm_campaign=y&page=2&fbclid=abc#section",
        )
        .unwrap();
        assert_eq!(canonicalize(&url), "https://example.com/post/1?page=2");
    }

    #[test]
    fn test_canonicalize_drops_empty_query() {
        let url = Url::parse("https://example.com/post/1?utm_source=x#top").unwrap();
        assert_eq!(canonicalize(&url), "https://example.com/post/1");
    }

    #[test]
    fn test_canonicalize_keeps_plain_urls() {
        let url = Url::parse("https://example.com/post/1").unwrap();
        assert_eq!(canonicalize(&url), "https://example.com/post/1");
    }

    #[test]
    fn test_extract_links_resolves_and_dedupes() {
        let html = r#"
            <div class="post"><a class="title" href="/post/1">One</a></div>
            <div class="post"><a class="title" href="/post/2?utm_source=feed">Two</a></div>
            <div class="post"><a class="title" href="/post/1#comments">One again</a></div>
            <div class="post"><a class="title" href="https://other.org/post/3">Three</a></div>
        "#;
        let base = Url::parse("https://example.com").unwrap();
        let links = extract_links(html, &selectors().link, &base);
        assert_eq!(
            links,
            vec![
                "https://example.com/post/1",
                "https://example.com/post/2",
                "https://other.org/post/3",
            ]
        );
    }

    #[test]
    fn test_extract_links_from_container_elements() {
        let html = r#"
            <div class="post"><h3>Teaser</h3><a href="/x">x</a></div>
        "#;
        // Container selector: match the .post div itself and walk to its anchor
        let selector = Selector::parse(".post").unwrap();
        let base = Url::parse("https://example.com").unwrap();
        let links = extract_links(html, &selector, &base);
        assert_eq!(links, vec!["https://example.com/x"]);
    }

    #[test]
    fn test_extract_article_full() {
        let html = r#"
            <h1>  The   Headline </h1>
            <div class="byline">Jane Doe</div>
            <time>2026-08-01</time>
            <div class="content">
                <p>First paragraph with
                broken lines.</p>
                <p>Second paragraph.</p>
            </div>
        "#;
        let article =
            extract_article(html, &selectors(), "https://example.com/post/1", "tech").unwrap();
        assert_eq!(article.title, "The Headline");
        assert_eq!(
            article.content,
            "First paragraph with broken lines.\n\nSecond paragraph."
        );
        assert_eq!(article.author.as_deref(), Some("Jane Doe"));
        assert_eq!(article.date.as_deref(), Some("2026-08-01"));
        assert_eq!(article.category, "tech");
    }

    #[test]
    fn test_extract_article_missing_content_fails() {
        let html = "<h1>Title only</h1>";
        let err = extract_article(html, &selectors(), "https://example.com/post/1", "tech")
            .unwrap_err();
        match err {
            HarvestError::Extraction { field, url } => {
                assert_eq!(field, "article_content");
                assert_eq!(url, "https://example.com/post/1");
            }
            other => panic!("expected extraction error, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_article_empty_title_fails() {
        let html = r#"<h1>   </h1><div class="content"><p>Body.</p></div>"#;
        let err = extract_article(html, &selectors(), "https://example.com/post/1", "tech")
            .unwrap_err();
        assert!(matches!(err, HarvestError::Extraction { field, .. } if field == "article_title"));
    }

    #[test]
    fn test_extract_article_optional_fields_absent() {
        let html = r#"<h1>Title</h1><div class="content"><p>Body.</p></div>"#;
        let article =
            extract_article(html, &selectors(), "https://example.com/post/1", "tech").unwrap();
        assert!(article.author.is_none());
        assert!(article.date.is_none());
    }
}
