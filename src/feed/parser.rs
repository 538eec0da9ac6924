use feed_rs::parser;
use std::collections::HashSet;
use thiserror::Error;

use crate::util::permalink_key;

/// The feed bytes could not be decoded as RSS or Atom.
#[derive(Debug, Error)]
#[error("Feed parse error: {0}")]
pub struct FeedParseError(#[from] parser::ParseFeedError);

/// A feed entry that can be resolved: identified by its discussion permalink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// Link of the entry in [`permalink_key`] form, the key the rewriter matches on.
    pub permalink: String,
    /// Zero-based index of the entry among all entries in the document.
    pub position: usize,
}

/// Entries extracted from a feed, plus how many were dropped on the way.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub entries: Vec<FeedEntry>,
    /// Entries with no link, or whose link repeats an earlier entry.
    pub skipped: usize,
}

/// Decodes a feed into its entries, in document order.
///
/// Entries without a link cannot be resolved and are skipped rather than
/// failing the whole feed. A permalink that already appeared earlier in the
/// document is also skipped, so every permalink is resolved at most once.
pub fn parse_entries(bytes: &[u8]) -> Result<ParseResult, FeedParseError> {
    let feed = parser::parse(bytes)?;

    let mut seen = HashSet::new();
    let mut result = ParseResult::default();

    for (position, entry) in feed.entries.into_iter().enumerate() {
        let permalink = entry
            .links
            .first()
            .map(|l| permalink_key(&l.href))
            .filter(|href| !href.is_empty());

        let Some(permalink) = permalink else {
            tracing::warn!(position, id = %entry.id, "Entry has no link, skipping");
            result.skipped += 1;
            continue;
        };

        if !seen.insert(permalink.clone()) {
            tracing::warn!(position, permalink = %permalink, "Duplicate entry link, skipping");
            result.skipped += 1;
            continue;
        }

        result.entries.push(FeedEntry {
            permalink,
            position,
        });
    }

    Ok(result)
}
