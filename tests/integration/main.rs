//! Integration tests for stac-spider
//!
//! These tests drive complete crawls against wiremock HTTP servers, local
//! directory trees and in-memory storage.

mod common;
mod crawl_tests;
mod operations_tests;
