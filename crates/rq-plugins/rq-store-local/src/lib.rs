//! # rq-store-local
//! rusty-qsl/crates/rq-plugins/rq-store-local/src/lib.rs
//! Local filesystem implementation of `CardStore`.
//! Features: content-addressable image files, directory sharding, WebP
//! thumbnails, and a JSON index mirroring what a remote store would report.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::ImageReader;
use rq_core::codec::ContextPayload;
use rq_core::models::StoredAsset;
use rq_core::traits::CardStore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

const INDEX_FILE: &str = "index.json";
const THUMB_SIZE: u32 = 250;

/// One card as recorded in `index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    public_id: String,
    /// Image path relative to the store root.
    file: String,
    created_at: DateTime<Utc>,
    /// Encoded context string, stored verbatim.
    context: String,
}

pub struct LocalCardStore {
    /// Root directory for all cards (e.g., "./data/qsl")
    root_path: PathBuf,
    /// Public URL prefix (e.g., "/media")
    url_prefix: String,
    /// Folder prefix of issued public ids (e.g., "TW-eQSL")
    folder: String,
    index: Mutex<Vec<IndexEntry>>,
}

impl LocalCardStore {
    /// Opens (or creates) a store rooted at `root`, loading its index.
    pub async fn open(root: PathBuf, url_prefix: String, folder: String) -> anyhow::Result<Self> {
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("create store root {}", root.display()))?;

        let index_path = root.join(INDEX_FILE);
        let entries = match fs::read(&index_path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .with_context(|| format!("parse {}", index_path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e).with_context(|| format!("read {}", index_path.display())),
        };

        tracing::info!(root = %root.display(), cards = entries.len(), "local card store opened");

        Ok(Self {
            root_path: root,
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
            folder,
            index: Mutex::new(entries),
        })
    }

    /// Generates a sharded relative path: "ab/cd/ab...hash.jpg"
    fn sharded_path(hash: &str) -> String {
        format!("{}/{}/{}.jpg", &hash[0..2], &hash[2..4], hash)
    }

    fn url_for(&self, file: &str) -> String {
        format!("{}/{}", self.url_prefix, file)
    }

    fn to_asset(&self, entry: &IndexEntry) -> StoredAsset {
        StoredAsset {
            public_id: entry.public_id.clone(),
            url: self.url_for(&entry.file),
            created_at: entry.created_at,
            context: ContextPayload::RawString(entry.context.clone()),
        }
    }

    /// Rewrites `index.json` through a temporary file so readers never see a
    /// half-written index.
    async fn persist(&self, entries: &[IndexEntry]) -> anyhow::Result<()> {
        let raw = serde_json::to_vec_pretty(entries)?;
        let tmp = self.root_path.join(format!("{INDEX_FILE}.tmp"));
        fs::write(&tmp, raw).await.context("write index")?;
        fs::rename(&tmp, self.root_path.join(INDEX_FILE))
            .await
            .context("replace index")?;
        Ok(())
    }
}

#[async_trait]
impl CardStore for LocalCardStore {
    /// Saves the image under its SHA-256 hash; identical composites share a
    /// file but still get distinct public ids.
    async fn upload(&self, image: Vec<u8>, context: &str) -> anyhow::Result<StoredAsset> {
        // 1. Calculate Hash
        let hash = hex::encode(Sha256::digest(&image));
        let file = Self::sharded_path(&hash);
        let target_path = self.root_path.join(&file);
        let parent = target_path
            .parent()
            .ok_or_else(|| anyhow!("sharded path has no parent"))?;

        // 2. Ensure directory exists
        fs::create_dir_all(parent).await?;

        // 3. Save original and thumbnail (if not exists)
        if fs::try_exists(&target_path).await? {
            tracing::debug!(%hash, "image already stored, reusing file");
        } else {
            generate_thumbnail(image.clone(), thumbnail_path(&target_path, &hash)).await?;
            fs::write(&target_path, &image).await?;
        }

        // 4. Record the entry
        let entry = IndexEntry {
            public_id: format!("{}/{}", self.folder, Uuid::now_v7().simple()),
            file,
            created_at: Utc::now(),
            context: context.to_string(),
        };
        let mut index = self.index.lock().await;
        index.push(entry.clone());
        if let Err(err) = self.persist(&index).await {
            index.pop();
            return Err(err);
        }

        Ok(self.to_asset(&entry))
    }

    async fn list(&self) -> anyhow::Result<Vec<StoredAsset>> {
        let index = self.index.lock().await;
        Ok(index.iter().map(|entry| self.to_asset(entry)).collect())
    }

    async fn get(&self, public_id: &str) -> anyhow::Result<Option<StoredAsset>> {
        let index = self.index.lock().await;
        Ok(index
            .iter()
            .find(|entry| entry.public_id == public_id)
            .map(|entry| self.to_asset(entry)))
    }

    async fn fetch_bytes(&self, asset: &StoredAsset) -> anyhow::Result<Vec<u8>> {
        let file = {
            let index = self.index.lock().await;
            index
                .iter()
                .find(|entry| entry.public_id == asset.public_id)
                .map(|entry| entry.file.clone())
                .ok_or_else(|| anyhow!("unknown public id {}", asset.public_id))?
        };
        let path = self.root_path.join(file);
        fs::read(&path)
            .await
            .with_context(|| format!("read {}", path.display()))
    }

    async fn update_context(&self, public_id: &str, context: &str) -> anyhow::Result<()> {
        let mut index = self.index.lock().await;
        let entry = index
            .iter_mut()
            .find(|entry| entry.public_id == public_id)
            .ok_or_else(|| anyhow!("unknown public id {public_id}"))?;
        let previous = std::mem::replace(&mut entry.context, context.to_string());

        if let Err(err) = self.persist(&index).await {
            if let Some(entry) = index.iter_mut().find(|entry| entry.public_id == public_id) {
                entry.context = previous;
            }
            return Err(err);
        }
        Ok(())
    }

    fn thumbnail_url(&self, url: &str) -> String {
        match url.rsplit_once('/') {
            Some((dir, file)) => {
                let stem = file.rsplit_once('.').map_or(file, |(stem, _)| stem);
                format!("{dir}/thumb_{stem}.webp")
            }
            None => url.to_string(),
        }
    }
}

fn thumbnail_path(image_path: &Path, hash: &str) -> PathBuf {
    image_path.with_file_name(format!("thumb_{hash}.webp"))
}

/// Internal helper to generate a 250px WebP thumbnail.
async fn generate_thumbnail(data: Vec<u8>, thumb_path: PathBuf) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let img = ImageReader::new(std::io::Cursor::new(data))
            .with_guessed_format()?
            .decode()
            .context("decode image for thumbnail")?;

        let thumb = img.thumbnail(THUMB_SIZE, THUMB_SIZE);
        thumb
            .save_with_format(&thumb_path, image::ImageFormat::WebP)
            .with_context(|| format!("write {}", thumb_path.display()))?;
        Ok(())
    })
    .await?
}
