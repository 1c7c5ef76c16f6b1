pub mod ai;
pub mod browser;
pub mod dedup;
pub mod extraction;
pub mod normalize;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod scraper;
pub mod submission;
pub mod token;
pub mod validation;
