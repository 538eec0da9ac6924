//! Feed handling: download, entry extraction and rewriting.
//!
//! - [`fetcher`] - single-shot HTTP retrieval of the raw feed bytes
//! - [`parser`] - entry extraction with `feed-rs` (Atom and RSS)
//! - [`rewriter`] - event-level rewrite of the raw document with `quick-xml`
//!
//! The parser and the rewriter read the same bytes independently and meet
//! only at the permalink string, which is why the raw document is carried
//! through the pipeline untouched.
//!
//! # Example
//!
//! ```ignore
//! use flairfeed::feed::{fetch_feed, parse_entries, rewrite};
//!
//! let raw = fetch_feed(&client, feed_url, timeout).await?;
//! let parsed = parse_entries(&raw)?;
//! // ... resolve parsed.entries into a mapping ...
//! let outcome = rewrite(&raw, &mapping)?;
//! ```

mod fetcher;
mod parser;
mod rewriter;

pub use fetcher::{fetch_feed, FetchError};
pub use parser::{parse_entries, FeedEntry, FeedParseError, ParseResult};
pub use rewriter::{rewrite, RewriteError, RewriteOutcome};
