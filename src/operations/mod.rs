//! Operations built on top of the spider
//!
//! This module provides the consumers behind the command line tool:
//! - Seed intake from standard input and arguments
//! - Item timestamp summaries
//! - A streamed GeoJSON export of every item
//! - Random sampling across the public catalogs of a STAC index
//! - Crawl statistics reporting

pub mod dates;
pub mod features;
pub mod sample;
pub mod seeds;

pub use dates::DateIndex;
pub use features::FeatureWriter;
pub use sample::{load_index, seed_from_index, IndexEntry, Sampler, DEFAULT_INDEX};
pub use seeds::{collection_addresses, submit_args, submit_lines, SeedArg};

use crate::crawler::CrawlStats;

/// Logs the final crawl counters
pub fn log_stats(stats: &CrawlStats) {
    tracing::info!(
        "Crawl done: {} catalogs, {} collections, {} items, {} addresses seen",
        stats.catalogs,
        stats.collections,
        stats.items,
        stats.seen
    );
}

/// Prints the final crawl counters for humans
pub fn print_stats(stats: &CrawlStats) {
    println!("=== Crawl Statistics ===\n");
    println!("Catalogs:    {}", stats.catalogs);
    println!("Collections: {}", stats.collections);
    println!("Items:       {}", stats.items);
    println!("Seen:        {}", stats.seen);
}
