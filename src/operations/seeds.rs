//! Seed intake from standard input and command line arguments

use crate::crawler::StacSpider;
use crate::stac::COLLECTION_FILE;
use crate::{Result, SpiderError};
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// How a positional argument is interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedArg {
    /// A STAC document to crawl from
    Document(String),

    /// A text file listing collection prefixes, one per line
    CollectionList(PathBuf),
}

impl SeedArg {
    /// Classifies an argument by its extension
    ///
    /// # Returns
    ///
    /// * `Ok(SeedArg)` - A `.json` document or a `.txt` collection list
    /// * `Err(SpiderError::Usage)` - Anything else
    pub fn parse(arg: &str) -> Result<Self> {
        if arg.ends_with(".txt") {
            Ok(Self::CollectionList(PathBuf::from(arg)))
        } else if arg.ends_with(".json") {
            Ok(Self::Document(arg.to_string()))
        } else {
            Err(SpiderError::Usage(format!(
                "expected a path or URL to a STAC .json document or a .txt list of collections, got {}",
                arg
            )))
        }
    }
}

/// Turns the lines of a collection list into collection document addresses
///
/// Blank lines are skipped; `/collection.json` is appended to every line that
/// does not already end with it.
pub fn collection_addresses(text: &str) -> Vec<String> {
    let suffix = format!("/{}", COLLECTION_FILE);
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            if line.ends_with(&suffix) {
                line.to_string()
            } else {
                format!("{}{}", line.trim_end_matches('/'), suffix)
            }
        })
        .collect()
}

/// Submits one seed per non-blank line of `reader`
///
/// Returns the number of lines submitted.
pub async fn submit_lines<R>(spider: &StacSpider, reader: R) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        tracing::debug!("Seed from stdin: {}", line);
        spider.process_seed(line).await?;
        count += 1;
    }
    Ok(count)
}

/// Submits the seeds named by positional arguments
///
/// Every argument is validated before anything is submitted, so a usage
/// error does not leave a partial crawl behind.
pub async fn submit_args(spider: &StacSpider, args: &[String]) -> Result<usize> {
    let seeds = args
        .iter()
        .map(|arg| SeedArg::parse(arg))
        .collect::<Result<Vec<_>>>()?;

    let mut count = 0;
    for seed in seeds {
        match seed {
            SeedArg::Document(href) => {
                tracing::debug!("Seed from arguments: {}", href);
                spider.process_seed(&href).await?;
                count += 1;
            }
            SeedArg::CollectionList(path) => {
                let text = tokio::fs::read_to_string(&path).await?;
                let addresses = collection_addresses(&text);
                tracing::info!(
                    "Seeding {} collections from {}",
                    addresses.len(),
                    path.display()
                );
                for address in addresses {
                    spider.process_seed(&address).await?;
                    count += 1;
                }
            }
        }
    }
    Ok(count)
}
