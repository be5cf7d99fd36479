//! Crawler module for walking STAC trees
//!
//! This module contains the core crawling logic, including:
//! - A bounded task queue with backpressure and an empty signal
//! - A single-flight memo shared by concurrent collection lookups
//! - Crawl events and the handlers subscribed to them
//! - The spider that ties them together

mod events;
mod queue;
mod single_flight;
mod spider;

pub use events::{CrawlEvent, EventKind, Flow};
pub use queue::{TaskHandle, TaskQueue};
pub use single_flight::{SharedFuture, SingleFlight};
pub use spider::{CrawlStats, StacSpider};
