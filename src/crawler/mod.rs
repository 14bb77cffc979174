pub mod base;
pub mod manager;
pub mod options;

pub use base::{Crawler, CrawlerProfile, StaticProfile};
pub use manager::{CrawlerManager, CrawlerManagerError, ProcessedRange, RoundOutcome};
pub use options::CrawlerHooks;
