pub mod fetch;
pub mod merge;

pub use fetch::{FetchResult, Fetcher, HttpSource};
pub use merge::{MergeResult, merge_documents};
