//! rusty-qsl/crates/rq-core/src/lib.rs
//!
//! The central domain logic and interface definitions for rusty-qsl.

pub mod cache;
pub mod catalog;
pub mod codec;
pub mod error;
pub mod models;
pub mod text;
pub mod traits;

// Re-exporting for easier access in other crates
pub use cache::ListCache;
pub use catalog::Catalog;
pub use codec::ContextPayload;
pub use error::*;
pub use models::*;
pub use traits::*;
