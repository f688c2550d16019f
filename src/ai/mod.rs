//! The three-stage AI pipeline: key-point extraction, rewriting, and
//! translation.
//!
//! Each stage is one completion call wrapped in the shared backoff loop.
//! Stages run strictly in order and each consumes the previous stage's
//! output; a stage that exhausts its retries fails that article only, and
//! the orchestrator moves on. There is no fallback to raw content — a
//! document is either fully processed or not written at all.

pub mod provider;

use itertools::Itertools;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::AiConfig;
use crate::error::{HarvestError, PipelineStage, Result};
use crate::models::{ProcessedArticle, RawArticle};
use crate::retry::RetryPolicy;
use provider::{Complete, CompletionRequest};

/// Upper bound on key points extracted per article.
const MAX_KEY_POINTS: usize = 10;
/// Upper bound on prompt payload, in characters, to stay inside context
/// limits on long articles.
const MAX_PROMPT_CHARS: usize = 4000;
const MAX_COMPLETION_TOKENS: u32 = 4096;

const EXTRACT_SYSTEM_PROMPT: &str = "You are a professional content analyst. \
Extract the core facts from the article you are given: the main claims, the \
named people and companies, and every concrete number. Reply with a plain \
bullet list of at most 10 short factual points, one per line, starting each \
line with '- '. Do not add commentary.";

const REWRITE_SYSTEM_PROMPT: &str = "You are a professional content editor \
writing for a startup-community publication. Rewrite the key points you are \
given into a clear, well-structured article of 800-1500 words in the same \
language as the key points. Use Markdown with '##' section headings. Keep \
every fact accurate and do not introduce any fact that is not present in \
the key points.";

const TRANSLATE_SYSTEM_PROMPT: &str = "You are a professional translator. \
Translate the text you are given into natural, fluent {language}. Preserve \
the Markdown structure, keep technical terms in their customary form, and \
reply with the translation only.";

/// Chains the pipeline stages over one configured provider.
pub struct AiProcessor<P: Complete> {
    provider: P,
    model: String,
    retry: RetryPolicy,
    skip_translation: bool,
    target_language: String,
}

impl<P: Complete> AiProcessor<P> {
    pub fn new(provider: P, config: &AiConfig, retry: RetryPolicy) -> Self {
        Self {
            model: config.model().to_string(),
            skip_translation: config.skip_translation,
            target_language: config.target_language.clone(),
            provider,
            retry,
        }
    }

    /// Run the full pipeline for one raw article.
    #[instrument(level = "info", skip_all, fields(url = %raw.url))]
    pub async fn process(&self, raw: &RawArticle) -> Result<ProcessedArticle> {
        let key_points = self.extract_key_points(raw).await?;
        info!(count = key_points.len(), "Extracted key points");

        let rewritten = self.rewrite(raw, &key_points).await?;
        info!(bytes = rewritten.len(), "Rewrote article");

        let (translated_title, translated_body) = if self.should_translate(&rewritten) {
            let (title, body) = self.translate(raw, &rewritten).await?;
            info!(language = %self.target_language, "Translated article");
            (Some(title), Some(body))
        } else {
            debug!("Translation skipped");
            (None, None)
        };

        Ok(ProcessedArticle {
            raw: raw.clone(),
            key_points,
            rewritten,
            translated_title,
            translated_body,
            target_language: self.target_language.clone(),
        })
    }

    fn should_translate(&self, rewritten: &str) -> bool {
        if self.skip_translation {
            return false;
        }
        // When the target is Chinese and the rewrite already reads as
        // Chinese, a translation call would be a no-op round trip.
        if self.target_language.eq_ignore_ascii_case("chinese") && looks_chinese(rewritten) {
            return false;
        }
        true
    }

    async fn extract_key_points(&self, raw: &RawArticle) -> Result<Vec<String>> {
        let user = format!(
            "Title: {}\n\nArticle:\n{}",
            raw.title,
            truncate_chars(&raw.content, MAX_PROMPT_CHARS)
        );
        let text = self
            .complete_stage(PipelineStage::ExtractKeyPoints, &raw.url, EXTRACT_SYSTEM_PROMPT, &user, 0.7)
            .await?;
        Ok(parse_key_points(&text))
    }

    async fn rewrite(&self, raw: &RawArticle, key_points: &[String]) -> Result<String> {
        let points = key_points
            .iter()
            .map(|p| format!("- {p}"))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "Rewrite an article titled \"{}\" from these key points:\n\n{}\n\n\
             Background: author {}, source {}.",
            raw.title,
            points,
            raw.author.as_deref().unwrap_or("unknown"),
            raw.url,
        );
        self.complete_stage(PipelineStage::Rewrite, &raw.url, REWRITE_SYSTEM_PROMPT, &user, 0.8)
            .await
    }

    async fn translate(&self, raw: &RawArticle, rewritten: &str) -> Result<(String, String)> {
        let system = TRANSLATE_SYSTEM_PROMPT.replace("{language}", &self.target_language);

        let title_user = format!("Translate this title:\n{}", raw.title);
        let title = self
            .complete_stage(PipelineStage::Translate, &raw.url, &system, &title_user, 0.3)
            .await?;

        let body_user = format!(
            "Translate this article:\n\n{}",
            truncate_chars(rewritten, MAX_PROMPT_CHARS)
        );
        let body = self
            .complete_stage(PipelineStage::Translate, &raw.url, &system, &body_user, 0.3)
            .await?;

        Ok((title, body))
    }

    /// One completion with the shared backoff policy. Retries only
    /// retryable classifications; everything else surfaces immediately.
    async fn complete_stage(
        &self,
        stage: PipelineStage,
        url: &str,
        system: &str,
        user: &str,
        temperature: f32,
    ) -> Result<String> {
        let request = CompletionRequest {
            system: system.to_string(),
            user: user.to_string(),
            model: self.model.clone(),
            temperature,
            max_tokens: MAX_COMPLETION_TOKENS,
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.provider.complete(&request).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        %stage,
                        attempt,
                        max = self.retry.max_attempts,
                        ?delay,
                        error = %e,
                        "Completion attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(HarvestError::ai(stage, url, e)),
            }
        }
    }
}

/// Parse bullet points out of a completion, tolerating `-`, `*`, `•` and
/// numbered prefixes. Repeated points are dropped. Bounded at
/// [`MAX_KEY_POINTS`].
fn parse_key_points(text: &str) -> Vec<String> {
    text.lines()
        .map(strip_bullet)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .unique()
        .take(MAX_KEY_POINTS)
        .collect()
}

fn strip_bullet(line: &str) -> &str {
    let line = line.trim();
    let stripped = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("• "));
    if let Some(rest) = stripped {
        return rest.trim();
    }
    // Numbered prefixes: "1. point" / "2) point"
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim();
        }
    }
    line
}

/// Whether text reads as predominantly Chinese: more than 30% CJK
/// characters over the first 1000 non-whitespace characters.
fn looks_chinese(text: &str) -> bool {
    let mut total = 0usize;
    let mut cjk = 0usize;
    for c in text.chars().filter(|c| !c.is_whitespace()).take(1000) {
        total += 1;
        if ('\u{4e00}'..='\u{9fff}').contains(&c) {
            cjk += 1;
        }
    }
    total > 0 && cjk * 10 > total * 3
}

/// Truncate to at most `max` characters on a character boundary.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
