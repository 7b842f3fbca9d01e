//! The Forage meta-tools and the context they share.
//!
//! `forage_search`, `forage_evaluate`, `forage_install`, `forage_uninstall`
//! and `forage_status` are registered on the upstream host next to the
//! proxied tools of whatever servers are running.

pub mod context;
pub mod tools;

pub use context::{register_meta_tools, Forage};
pub use tools::meta_tools;
