//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.

use async_trait::async_trait;

use crate::models::{ComposedCard, QslRecord, StoredAsset};

/// Card persistence contract: image bytes plus one free-text context slot.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CardStore: Send + Sync {
    /// Stores a new image with its encoded context and returns the asset the
    /// store created, including its freshly issued `public_id`.
    async fn upload(&self, image: Vec<u8>, context: &str) -> anyhow::Result<StoredAsset>;

    /// Lists every asset of the configured folder.
    async fn list(&self) -> anyhow::Result<Vec<StoredAsset>>;

    /// Resolves one asset; `Ok(None)` when the id is unknown or not one of
    /// the configured folder's cards.
    async fn get(&self, public_id: &str) -> anyhow::Result<Option<StoredAsset>>;

    /// Fetches the image bytes behind an asset.
    async fn fetch_bytes(&self, asset: &StoredAsset) -> anyhow::Result<Vec<u8>>;

    /// Replaces the encoded context of an existing asset.
    async fn update_context(&self, public_id: &str, context: &str) -> anyhow::Result<()>;

    /// Returns the URL of the fixed-width variant of an image.
    fn thumbnail_url(&self, url: &str) -> String;
}

/// Renders the final card image. CPU bound; callers run it off the async
/// executor.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait CardComposer: Send + Sync {
    fn compose(&self, photo: &[u8], record: &QslRecord) -> anyhow::Result<ComposedCard>;
}
