//! Discovery backends for Forage and the aggregator that merges them.

pub mod aggregator;
pub mod backend;
pub mod npm;
pub mod official;
pub mod smithery;

pub use aggregator::{merge, SearchAggregator, DEFAULT_SEARCH_TIMEOUT};
pub use backend::SearchBackend;
pub use npm::{NpmRegistry, PackageDetails};
pub use official::{OfficialRegistry, ServerDetails};
pub use smithery::Smithery;
