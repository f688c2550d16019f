//! Command-line interface definitions for Story Harvest.
//!
//! This module defines the CLI arguments and options using the `clap` crate.

use clap::Parser;

/// Command-line arguments for the Story Harvest application.
///
/// # Examples
///
/// ```sh
/// # Harvest every configured category, at most 5 articles each
/// story_harvest -c config.json -n 5
///
/// # Process a single article page, bypassing listing discovery
/// story_harvest -c config.json -u https://example.com/post/42 --category tech
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    pub config: String,

    /// Maximum number of articles to harvest per category
    #[arg(short = 'n', long = "num-articles", default_value_t = 10)]
    pub num_articles: usize,

    /// Process a single article URL instead of walking category listings
    #[arg(short, long)]
    pub url: Option<String>,

    /// Category label used in single-URL mode
    #[arg(long, default_value = "misc")]
    pub category: String,

    /// Regenerate documents whose source URL already exists in the output directory
    #[arg(long)]
    pub force: bool,

    /// Show debug-level logs
    #[arg(short, long)]
    pub verbose: bool,
}
