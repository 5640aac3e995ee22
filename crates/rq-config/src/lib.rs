//! # rq-config
//!
//! Typed settings for rusty-qsl, read from a `.env` file and the process
//! environment. Environment variables take precedence over `.env` values.

use std::path::PathBuf;

use config::{Config as RawConfig, Environment};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Source(#[from] config::ConfigError),

    #[error("failed to read .env: {0}")]
    Dotenv(#[from] dotenvy::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which `CardStore` plugin backs the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Cloudinary,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug)]
pub struct Settings {
    pub server: ServerSettings,
    pub store: StoreKind,
    pub folder: String,
    pub cloudinary: Option<CloudinarySettings>,
    pub local: LocalSettings,
    pub render: RenderSettings,
    pub cache_ttl_secs: u64,
    /// Largest encoded card context accepted on upload; 0 disables the check.
    pub max_context_bytes: usize,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub static_dir: Option<PathBuf>,
    pub max_upload_bytes: usize,
}

#[derive(Debug)]
pub struct CloudinarySettings {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: SecretString,
    pub signature_algorithm: String,
}

#[derive(Debug, Clone)]
pub struct LocalSettings {
    pub root: PathBuf,
    pub url_prefix: String,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub font_dir: Option<PathBuf>,
    pub jpeg_quality: u8,
}

/// Mirror of the environment, one field per variable (lowercased).
#[derive(Debug, Deserialize)]
struct FlatConfig {
    port: u16,
    qsl_bind_host: String,
    qsl_store: StoreKind,
    qsl_folder: String,
    cloudinary_cloud_name: Option<String>,
    cloudinary_api_key: Option<String>,
    cloudinary_api_secret: Option<String>,
    cloudinary_signature_algorithm: String,
    qsl_local_root: PathBuf,
    qsl_local_url_prefix: String,
    qsl_static_dir: String,
    qsl_font_dir: Option<PathBuf>,
    qsl_jpeg_quality: u8,
    qsl_cache_ttl_secs: u64,
    qsl_max_upload_mb: usize,
    qsl_max_context_bytes: usize,
    qsl_log_format: LogFormat,
}

impl Settings {
    /// ## Summary
    /// Loads `.env` (if present) and the environment into `Settings`.
    ///
    /// ## Errors
    /// Returns an error if a `.env` file exists but cannot be read, a value
    /// cannot be parsed, or Cloudinary credentials are missing while the
    /// Cloudinary store is selected.
    pub fn load() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Err(err) if !err.not_found() => return Err(err.into()),
            _ => {}
        }
        Self::from_source(Environment::default())
    }

    /// Builds settings from an arbitrary environment source. Split out so
    /// tests can feed a fixed map instead of the process environment.
    pub fn from_source(env: Environment) -> Result<Self, ConfigError> {
        let flat: FlatConfig = RawConfig::builder()
            .set_default("port", 3000)?
            .set_default("qsl_bind_host", "0.0.0.0")?
            .set_default("qsl_store", "cloudinary")?
            .set_default("qsl_folder", "TW-eQSL")?
            .set_default("cloudinary_signature_algorithm", "sha1")?
            .set_default("qsl_local_root", "./data/qsl")?
            .set_default("qsl_local_url_prefix", "/media")?
            .set_default("qsl_static_dir", "public")?
            .set_default("qsl_jpeg_quality", 90)?
            .set_default("qsl_cache_ttl_secs", 0)?
            .set_default("qsl_max_upload_mb", 20)?
            .set_default("qsl_max_context_bytes", 1024)?
            .set_default("qsl_log_format", "pretty")?
            .add_source(env)
            .build()?
            .try_deserialize()?;

        flat.try_into()
    }
}

impl TryFrom<FlatConfig> for Settings {
    type Error = ConfigError;

    fn try_from(flat: FlatConfig) -> Result<Self, Self::Error> {
        let cloudinary = match (
            flat.cloudinary_cloud_name.filter(|v| !v.is_empty()),
            flat.cloudinary_api_key.filter(|v| !v.is_empty()),
            flat.cloudinary_api_secret.filter(|v| !v.is_empty()),
        ) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => Some(CloudinarySettings {
                cloud_name,
                api_key,
                api_secret: SecretString::from(api_secret),
                signature_algorithm: flat.cloudinary_signature_algorithm,
            }),
            _ => None,
        };

        if flat.qsl_store == StoreKind::Cloudinary && cloudinary.is_none() {
            return Err(ConfigError::Invalid(
                "CLOUDINARY_CLOUD_NAME, CLOUDINARY_API_KEY and CLOUDINARY_API_SECRET are required when QSL_STORE=cloudinary"
                    .to_string(),
            ));
        }
        if !(1..=100).contains(&flat.qsl_jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "QSL_JPEG_QUALITY must be within 1..=100, got {}",
                flat.qsl_jpeg_quality
            )));
        }

        if flat.qsl_store == StoreKind::Local
            && flat.qsl_local_url_prefix.trim_matches('/').is_empty()
        {
            return Err(ConfigError::Invalid(
                "QSL_LOCAL_URL_PREFIX must name a path below the site root, e.g. /media".to_string(),
            ));
        }

        let static_dir = Some(flat.qsl_static_dir)
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);

        Ok(Settings {
            server: ServerSettings {
                host: flat.qsl_bind_host,
                port: flat.port,
                static_dir,
                max_upload_bytes: flat.qsl_max_upload_mb.saturating_mul(1024 * 1024),
            },
            store: flat.qsl_store,
            folder: flat.qsl_folder,
            cloudinary,
            local: LocalSettings {
                root: flat.qsl_local_root,
                url_prefix: flat.qsl_local_url_prefix,
            },
            render: RenderSettings {
                font_dir: flat.qsl_font_dir,
                jpeg_quality: flat.qsl_jpeg_quality,
            },
            cache_ttl_secs: flat.qsl_cache_ttl_secs,
            max_context_bytes: flat.qsl_max_context_bytes,
            log_format: flat.qsl_log_format,
        })
    }
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
