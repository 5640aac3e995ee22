//! # rq-store-cloudinary
//!
//! `CardStore` backed by the Cloudinary media API. Images live in one folder;
//! the encoded record rides in each asset's context under the `entry` key.

pub mod sign;

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode, Url};
use rq_core::codec::ContextPayload;
use rq_core::models::StoredAsset;
use rq_core::traits::CardStore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub use sign::SignatureAlgorithm;

pub const DEFAULT_API_BASE: &str = "https://api.cloudinary.com/v1_1";
/// Largest page the search API hands out.
const SEARCH_PAGE_SIZE: u32 = 500;

#[derive(Debug)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: SecretString,
    pub folder: String,
    /// Transformation inserted after `/upload/` to derive thumbnails.
    pub thumb_transform: String,
    pub signature_algorithm: SignatureAlgorithm,
    pub api_base: String,
}

impl CloudinaryConfig {
    pub fn new(cloud_name: String, api_key: String, api_secret: SecretString, folder: String) -> Self {
        Self {
            cloud_name,
            api_key,
            api_secret,
            folder,
            thumb_transform: "w_400".to_string(),
            signature_algorithm: SignatureAlgorithm::default(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

pub struct CloudinaryStore {
    http: reqwest::Client,
    config: CloudinaryConfig,
}

/// An asset as returned by the upload, admin and search APIs.
#[derive(Debug, Deserialize)]
struct Resource {
    public_id: String,
    secure_url: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    context: ContextPayload,
}

impl From<Resource> for StoredAsset {
    fn from(r: Resource) -> Self {
        StoredAsset {
            public_id: r.public_id,
            url: r.secure_url,
            created_at: r.created_at,
            context: r.context,
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    expression: String,
    sort_by: Vec<serde_json::Value>,
    max_results: u32,
    with_field: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    resources: Vec<Resource>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl CloudinaryStore {
    pub fn new(config: CloudinaryConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("rusty-qsl/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self { http, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.cloud_name,
            path
        )
    }

    fn search_request(&self, next_cursor: Option<String>) -> SearchRequest<'static> {
        SearchRequest {
            expression: format!("folder:{}", self.config.folder),
            sort_by: vec![json!({ "created_at": "desc" })],
            max_results: SEARCH_PAGE_SIZE,
            with_field: ["context"],
            next_cursor,
        }
    }

    /// Whether `public_id` names a card of the configured folder. Anything
    /// else never reaches the admin API.
    fn owns(&self, public_id: &str) -> bool {
        let Some(name) = public_id
            .strip_prefix(self.config.folder.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return false;
        };
        !name.is_empty()
            && !public_id.contains(['?', '#', '\\'])
            && public_id
                .split('/')
                .all(|segment| !matches!(segment, "" | "." | ".."))
    }

    /// Admin URL of one image, each id segment percent-encoded.
    fn resource_url(&self, public_id: &str) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.endpoint("resources/image/upload"))
            .context("parse cloudinary api base")?;
        url.path_segments_mut()
            .map_err(|()| anyhow!("cloudinary api base cannot carry a path"))?
            .pop_if_empty()
            .extend(public_id.split('/'));
        Ok(url)
    }

    fn admin(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.basic_auth(
            &self.config.api_key,
            Some(self.config.api_secret.expose_secret()),
        )
    }
}

/// Turns a non-2xx response into an error carrying Cloudinary's message.
async fn ensure_success(resp: Response, what: &str) -> anyhow::Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    bail!("cloudinary {what} failed ({status}): {}", error_message(&body))
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

#[async_trait]
impl CardStore for CloudinaryStore {
    async fn upload(&self, image: Vec<u8>, context: &str) -> anyhow::Result<StoredAsset> {
        let mut params: BTreeMap<&'static str, String> = BTreeMap::new();
        params.insert("context", sign::context_param(context));
        params.insert("folder", self.config.folder.clone());
        params.insert("timestamp", Utc::now().timestamp().to_string());

        let signature = sign::sign(
            &params,
            self.config.api_secret.expose_secret(),
            self.config.signature_algorithm,
        );

        let file = Part::bytes(image)
            .file_name("qsl.jpg")
            .mime_str("image/jpeg")?;
        let mut form = Form::new()
            .part("file", file)
            .text("api_key", self.config.api_key.clone())
            .text("signature", signature);
        if self.config.signature_algorithm == SignatureAlgorithm::Sha256 {
            form = form.text("signature_algorithm", "sha256");
        }
        for (key, value) in params {
            form = form.text(key, value);
        }

        let resp = self
            .http
            .post(self.endpoint("image/upload"))
            .multipart(form)
            .send()
            .await
            .context("cloudinary upload request")?;
        let resource: Resource = ensure_success(resp, "upload")
            .await?
            .json()
            .await
            .context("decode cloudinary upload response")?;

        tracing::debug!(public_id = %resource.public_id, "uploaded to cloudinary");
        Ok(resource.into())
    }

    async fn list(&self) -> anyhow::Result<Vec<StoredAsset>> {
        let mut assets = Vec::new();
        let mut cursor = None;

        loop {
            let resp = self
                .admin(self.http.post(self.endpoint("resources/search")))
                .json(&self.search_request(cursor.take()))
                .send()
                .await
                .context("cloudinary search request")?;
            let page: SearchPage = ensure_success(resp, "search")
                .await?
                .json()
                .await
                .context("decode cloudinary search response")?;

            assets.extend(page.resources.into_iter().map(StoredAsset::from));
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        tracing::debug!(count = assets.len(), folder = %self.config.folder, "cloudinary search done");
        Ok(assets)
    }

    async fn get(&self, public_id: &str) -> anyhow::Result<Option<StoredAsset>> {
        if !self.owns(public_id) {
            tracing::warn!(public_id, folder = %self.config.folder, "refusing lookup outside folder");
            return Ok(None);
        }
        let url = self.resource_url(public_id)?;
        let resp = self
            .admin(self.http.get(url))
            .send()
            .await
            .context("cloudinary resource request")?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resource: Resource = ensure_success(resp, "resource lookup")
            .await?
            .json()
            .await
            .context("decode cloudinary resource")?;
        Ok(Some(resource.into()))
    }

    async fn fetch_bytes(&self, asset: &StoredAsset) -> anyhow::Result<Vec<u8>> {
        let resp = self
            .http
            .get(&asset.url)
            .send()
            .await
            .with_context(|| format!("fetch {}", asset.url))?;
        let bytes = ensure_success(resp, "image fetch").await?.bytes().await?;
        if bytes.is_empty() {
            return Err(anyhow!("empty image body for {}", asset.public_id));
        }
        Ok(bytes.to_vec())
    }

    async fn update_context(&self, public_id: &str, context: &str) -> anyhow::Result<()> {
        if !self.owns(public_id) {
            bail!("{public_id} is not in folder {}", self.config.folder);
        }
        let url = self.resource_url(public_id)?;
        let resp = self
            .admin(self.http.post(url))
            .form(&[("context", sign::context_param(context))])
            .send()
            .await
            .context("cloudinary update request")?;
        ensure_success(resp, "context update").await?;
        Ok(())
    }

    fn thumbnail_url(&self, url: &str) -> String {
        url.replacen(
            "/upload/",
            &format!("/upload/{}/", self.config.thumb_transform),
            1,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CloudinaryStore {
        CloudinaryStore::new(CloudinaryConfig::new(
            "demo".into(),
            "123".into(),
            SecretString::from("abcd".to_string()),
            "TW-eQSL".into(),
        ))
        .unwrap()
    }

    #[test]
    fn test_thumbnail_inserts_transform_once() {
        let thumb = store().thumbnail_url(
            "https://res.cloudinary.com/demo/image/upload/v1/TW-eQSL/upload/abc.jpg",
        );
        assert_eq!(
            thumb,
            "https://res.cloudinary.com/demo/image/upload/w_400/v1/TW-eQSL/upload/abc.jpg"
        );
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(
            store().endpoint("image/upload"),
            "https://api.cloudinary.com/v1_1/demo/image/upload"
        );
    }

    #[test]
    fn test_owns_only_folder_cards() {
        let store = store();
        assert!(store.owns("TW-eQSL/abc"));
        assert!(store.owns("TW-eQSL/2025/abc"));
        for id in [
            "../../private/passport",
            "private/passport",
            "TW-eQSL",
            "TW-eQSL/",
            "TW-eQSLx/abc",
            "TW-eQSL/../private/x",
            "TW-eQSL/./abc",
            "TW-eQSL//abc",
            "TW-eQSL/abc?invalidate=true",
            "TW-eQSL/abc#frag",
            "TW-eQSL\\..\\x",
        ] {
            assert!(!store.owns(id), "{id}");
        }
    }

    #[test]
    fn test_resource_url_encodes_segments() {
        let url = store().resource_url("TW-eQSL/F4ABC 2025%").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.cloudinary.com/v1_1/demo/resources/image/upload/TW-eQSL/F4ABC%202025%25"
        );
    }

    #[tokio::test]
    async fn test_foreign_ids_are_refused_offline() {
        let store = store();
        assert!(store.get("../../private/passport").await.unwrap().is_none());
        assert!(store.update_context("private/passport", "x=1").await.is_err());
    }

    #[test]
    fn test_search_request_body() {
        let body = serde_json::to_value(store().search_request(None)).unwrap();
        assert_eq!(body["expression"], "folder:TW-eQSL");
        assert_eq!(body["sort_by"][0]["created_at"], "desc");
        assert_eq!(body["max_results"], 500);
        assert_eq!(body["with_field"][0], "context");
        assert!(body.get("next_cursor").is_none());

        let next = serde_json::to_value(store().search_request(Some("c2".into()))).unwrap();
        assert_eq!(next["next_cursor"], "c2");
    }

    #[test]
    fn test_resource_shapes_decode() {
        // upload / admin API: context.custom.entry
        let uploaded: Resource = serde_json::from_value(json!({
            "public_id": "TW-eQSL/abc",
            "secure_url": "https://res.cloudinary.com/demo/image/upload/v1/TW-eQSL/abc.jpg",
            "created_at": "2025-03-01T10:00:00Z",
            "context": { "custom": { "entry": "indicatif=F4ABC|band=20m" } }
        }))
        .unwrap();
        let asset = StoredAsset::from(uploaded);
        assert_eq!(asset.context.decode()["indicatif"], "F4ABC");

        // search API: context.entry
        let page: SearchPage = serde_json::from_value(json!({
            "resources": [{
                "public_id": "TW-eQSL/def",
                "secure_url": "https://x/upload/def.jpg",
                "created_at": "2025-03-02T10:00:00Z",
                "context": { "entry": "indicatif=F5XYZ" }
            }, {
                "public_id": "TW-eQSL/bare",
                "secure_url": "https://x/upload/bare.jpg",
                "created_at": "2025-03-03T10:00:00Z"
            }]
        }))
        .unwrap();
        assert!(page.next_cursor.is_none());
        assert_eq!(page.resources[0].context.decode()["indicatif"], "F5XYZ");
        assert_eq!(page.resources[1].context, ContextPayload::Missing);
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error":{"message":"Invalid Signature"}}"#),
            "Invalid Signature"
        );
        assert_eq!(error_message(" upstream down \n"), "upstream down");
    }
}
