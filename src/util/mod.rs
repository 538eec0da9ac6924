//! Utility functions for URL handling.
//!
//! - **Article URLs**: resolve scraped or API-provided links into absolute web URLs
//! - **Permalink keys**: one canonical spelling of an entry link, shared by parser and rewriter
//! - **Submission ids**: pull the Reddit submission id out of a permalink
//!
//! # Examples
//!
//! ```
//! use flairfeed::util::{article_url, submission_id};
//!
//! let permalink = "https://www.reddit.com/r/formula1/comments/1abcde/title/";
//! assert_eq!(submission_id(permalink).as_deref(), Some("1abcde"));
//!
//! let url = article_url("https://example.com/story", permalink).unwrap();
//! assert_eq!(url, "https://example.com/story");
//! ```

mod links;

pub use links::{article_url, permalink_key, submission_id, UrlError};
