pub mod types;
pub mod store;
pub mod settings;
pub mod ledger;
pub mod registry;
pub mod fetcher;
pub mod parser;
pub mod sources;
pub mod aggregator;

pub use types::*;
pub use aggregator::{AggregatorConfig, FeedAggregator, ReportReceiver};
pub use fetcher::{Fetcher, HttpFeedSource};
pub use parser::FeedParser;
pub use sources::FeedSource;
pub use store::{JsonFileStore, Stores};
