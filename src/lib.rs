//! Rewrites a subreddit feed so it carries only news-flaired submissions,
//! each linking straight to the article it discusses.

pub mod config;
pub mod feed;
pub mod pipeline;
pub mod resolve;
pub mod sink;
pub mod util;
