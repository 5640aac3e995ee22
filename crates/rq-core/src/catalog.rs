//! # Catalog
//!
//! Coordinates the flow between the HTTP layer and the `CardStore` /
//! `CardComposer` ports: card creation, listing, callsign search and
//! downloads.

use std::sync::Arc;

use crate::cache::ListCache;
use crate::codec;
use crate::error::{AppError, Result};
use crate::models::{Card, CounterUpdate, Download, QslForm, QslRecord, StoredAsset};
use crate::traits::{CardComposer, CardStore};

pub struct Catalog {
    store: Arc<dyn CardStore>,
    composer: Arc<dyn CardComposer>,
    cache: Option<Arc<ListCache>>,
    /// Upper bound on the encoded context, in bytes.
    max_context_len: Option<usize>,
}

impl Catalog {
    pub fn new(store: Arc<dyn CardStore>, composer: Arc<dyn CardComposer>) -> Self {
        Self {
            store,
            composer,
            cache: None,
            max_context_len: None,
        }
    }

    /// Serves listings from `cache` until a write invalidates it.
    pub fn with_cache(mut self, cache: Arc<ListCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Rejects cards whose encoded details exceed `limit` bytes, before any
    /// image work is done.
    pub fn with_context_limit(mut self, limit: usize) -> Self {
        self.max_context_len = Some(limit);
        self
    }

    /// Renders and stores a new card.
    ///
    /// Nothing reaches the store unless composition succeeded.
    pub async fn create_card(&self, photo: Option<Vec<u8>>, form: QslForm) -> Result<Card> {
        // 1. Validation: an image is mandatory
        let photo = photo
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| AppError::ValidationError("missing qsl image".to_string()))?;

        let record = form.into_record();
        let context = codec::encode(&record.to_fields());
        if let Some(limit) = self.max_context_len {
            if context.len() > limit {
                return Err(AppError::ValidationError(format!(
                    "card details too long: {} encoded bytes, limit is {limit}",
                    context.len()
                )));
            }
        }

        // 2. Media: composition is CPU bound, keep it off the executor
        let composer = Arc::clone(&self.composer);
        let to_render = record.clone();
        let composed = tokio::task::spawn_blocking(move || composer.compose(&photo, &to_render))
            .await
            .map_err(|e| AppError::Internal(format!("compose worker failed: {e}")))?
            .map_err(AppError::processing)?;

        // 3. Persistence: image and encoded record in a single store call
        let asset = self
            .store
            .upload(composed.bytes, &context)
            .await
            .map_err(AppError::storage)?;

        self.invalidate_cache().await;

        tracing::info!(
            public_id = %asset.public_id,
            callsign = %record.callsign,
            width = composed.width,
            height = composed.height,
            "qsl card created"
        );

        Ok(Card {
            thumb: self.store.thumbnail_url(&asset.url),
            public_id: asset.public_id,
            url: asset.url,
            created_at: asset.created_at,
            record,
        })
    }

    /// Every card, newest first.
    pub async fn list(&self) -> Result<Vec<Card>> {
        if let Some(cards) = self.cached().await {
            tracing::debug!(count = cards.len(), "qsl listing served from cache");
            return Ok(cards);
        }

        let generation = self.cache.as_ref().map(|cache| cache.generation());
        let mut cards: Vec<Card> = self
            .assets()
            .await?
            .into_iter()
            .map(|asset| self.card_from_asset(asset))
            .collect();
        cards.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if let (Some(cache), Some(generation)) = (&self.cache, generation) {
            if !cache.put(generation, cards.clone()).await {
                tracing::debug!("qsl listing changed while fetching, not cached");
            }
        }
        Ok(cards)
    }

    /// Cards whose callsign matches `callsign`, ignoring case and whitespace.
    pub async fn search(&self, callsign: &str) -> Result<Vec<Card>> {
        let wanted = normalize_callsign(callsign);
        if wanted.is_empty() {
            return Err(AppError::ValidationError("missing callsign".to_string()));
        }

        let cards = self.list().await?;
        Ok(cards
            .into_iter()
            .filter(|card| normalize_callsign(&card.record.callsign) == wanted)
            .collect())
    }

    /// Raw store listing, unsorted and uncached.
    pub async fn assets(&self) -> Result<Vec<StoredAsset>> {
        self.store.list().await.map_err(AppError::storage)
    }

    /// Fetches a card's bytes and bumps its download counter.
    ///
    /// The counter write is best effort: its outcome is reported in
    /// `Download::counter` and never turns a download into an error.
    pub async fn download(&self, public_id: &str) -> Result<Download> {
        let asset = self
            .store
            .get(public_id)
            .await
            .map_err(AppError::storage)?
            .ok_or_else(|| AppError::NotFound("qsl".to_string(), public_id.to_string()))?;

        let bytes = self
            .store
            .fetch_bytes(&asset)
            .await
            .map_err(AppError::storage)?;

        let mut record = QslRecord::from_fields(asset.context.decode());
        let filename = download_filename(&record.callsign, &record.date);
        let counter = self.bump_downloads(&asset.public_id, &mut record).await;

        Ok(Download {
            public_id: asset.public_id,
            url: asset.url,
            bytes,
            filename,
            counter,
        })
    }

    async fn bump_downloads(&self, public_id: &str, record: &mut QslRecord) -> CounterUpdate {
        record.downloads = record.downloads.saturating_add(1);
        let context = codec::encode(&record.to_fields());

        match self.store.update_context(public_id, &context).await {
            Ok(()) => {
                self.invalidate_cache().await;
                CounterUpdate::Recorded(record.downloads)
            }
            Err(err) => {
                let reason = format!("{err:#}");
                tracing::warn!(public_id, error = %reason, "download counter update failed");
                CounterUpdate::Failed(reason)
            }
        }
    }

    fn card_from_asset(&self, asset: StoredAsset) -> Card {
        let record = QslRecord::from_fields(asset.context.decode());
        Card {
            thumb: self.store.thumbnail_url(&asset.url),
            public_id: asset.public_id,
            url: asset.url,
            created_at: asset.created_at,
            record,
        }
    }

    async fn cached(&self) -> Option<Vec<Card>> {
        match &self.cache {
            Some(cache) => cache.get().await,
            None => None,
        }
    }

    async fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate().await;
        }
    }
}

/// Uppercases and strips every whitespace character.
pub fn normalize_callsign(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// `<callsign>_<date>.jpg` with anything outside `[A-Za-z0-9._-]` replaced.
pub fn download_filename(callsign: &str, date: &str) -> String {
    let callsign = if callsign.trim().is_empty() { "qsl" } else { callsign.trim() };
    let stem = format!("{callsign}_{}", date.trim());
    let safe: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{safe}.jpg")
}
