//! # Story Harvest
//!
//! A content ingestion pipeline that scrapes articles from configured
//! category listing pages, processes them through an LLM pipeline
//! (key-point extraction, rewriting, translation), and writes structured
//! Markdown documents with YAML front matter, ready for publication.
//!
//! ## Usage
//!
//! ```sh
//! story_harvest -c config.json -n 5
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture, driven sequentially
//! by the orchestrator:
//! 1. **Discovery**: Collect article URLs from each category listing page
//! 2. **Fetching**: Download article pages, one request at a time
//! 3. **Extraction**: Apply the configured selector map to each page
//! 4. **Processing**: Extract key points, rewrite, and translate via the
//!    configured AI provider
//! 5. **Output**: Write one front-matter Markdown document per article

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod ai;
mod cli;
mod config;
mod error;
mod extractor;
mod fetcher;
mod generator;
mod models;
mod orchestrator;
mod retry;
mod utils;

use ai::provider::Provider;
use ai::AiProcessor;
use cli::Cli;
use config::AppConfig;
use fetcher::Fetcher;
use generator::ContentGenerator;
use orchestrator::Orchestrator;
use retry::RetryPolicy;
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();

    // --- Tracing init ---
    let default_filter = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("story_harvest starting up");
    debug!(?args.config, ?args.url, num_articles = args.num_articles, "Parsed CLI arguments");

    // --- Configuration and credentials, checked before any request ---
    let config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config, error = %e, "Configuration rejected");
            return Err(e.into());
        }
    };
    info!(
        provider = %config.ai.provider,
        model = config.ai.model(),
        categories = config.website.categories.len(),
        "Loaded configuration"
    );

    let provider = match Provider::from_config(&config.ai) {
        Ok(provider) => provider,
        Err(e) => {
            error!(error = %e, "Credential check failed");
            return Err(e.into());
        }
    };

    if let Err(e) = ensure_writable_dir(&config.output_dir).await {
        error!(
            path = %config.output_dir,
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    // --- Wire up the pipeline ---
    let retry = RetryPolicy::default();
    let fetcher = Fetcher::new(&config.website)?;
    let processor = AiProcessor::new(provider, &config.ai, retry);
    let generator = ContentGenerator::new(&config.output_dir);

    // Ctrl-c stops the loop before the next article; finished documents
    // stay on disk, the in-flight one is discarded.
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping after the current article");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let orchestrator = Orchestrator::new(
        fetcher,
        processor,
        generator,
        config,
        retry,
        args.force,
        cancel,
    )?;

    // --- Run ---
    let result = match &args.url {
        Some(url) => {
            info!(%url, category = %args.category, "Single-URL mode");
            orchestrator.run_single(url, &args.category).await
        }
        None => orchestrator.run(args.num_articles).await,
    };

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Run aborted");
            return Err(e.into());
        }
    };

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        written = summary.written,
        failed = summary.failed,
        "Execution complete"
    );
    println!("{}", summary.render());

    Ok(())
}
