//! # Rusty-QSL Binary
//!
//! The entry point that assembles the application from settings and the
//! store plugins compiled in.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use axum::Router;
use rq_api::{configure_routes, AppState};
use rq_compose::{ComposeOptions, SvgCardComposer};
use rq_config::{LogFormat, Settings, StoreKind};
use rq_core::{CardStore, Catalog, ListCache};
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "store-cloudinary")]
use rq_store_cloudinary::{CloudinaryConfig, CloudinaryStore, SignatureAlgorithm};

#[cfg(feature = "store-local")]
use rq_store_local::LocalCardStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("load settings")?;
    init_tracing(settings.log_format);

    // 1. Initialize Storage Implementation
    let store = build_store(&settings).await?;

    // 2. Initialize the Composer
    let options = ComposeOptions {
        jpeg_quality: settings.render.jpeg_quality,
        ..ComposeOptions::default()
    };
    let composer = SvgCardComposer::new(options, settings.render.font_dir.as_deref());

    // 3. Wrap in the Catalog (dynamic dispatch over the ports)
    let mut catalog = Catalog::new(store, Arc::new(composer));
    if settings.cache_ttl_secs > 0 {
        let ttl = Duration::from_secs(settings.cache_ttl_secs);
        catalog = catalog.with_cache(Arc::new(ListCache::new(ttl)));
    }
    if settings.max_context_bytes > 0 {
        catalog = catalog.with_context_limit(settings.max_context_bytes);
    }
    let state = AppState {
        catalog: Arc::new(catalog),
    };

    let app = mount_assets(
        configure_routes(state, settings.server.max_upload_bytes),
        &settings,
    );

    let addr = settings.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, store = ?settings.store, folder = %settings.folder, "rusty-qsl listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("rusty-qsl stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn build_store(settings: &Settings) -> anyhow::Result<Arc<dyn CardStore>> {
    match settings.store {
        #[cfg(feature = "store-cloudinary")]
        StoreKind::Cloudinary => {
            let creds = settings
                .cloudinary
                .as_ref()
                .context("cloudinary credentials missing")?;
            let algorithm = SignatureAlgorithm::parse(&creds.signature_algorithm)
                .with_context(|| {
                    format!("unknown signature algorithm {:?}", creds.signature_algorithm)
                })?;

            let mut config = CloudinaryConfig::new(
                creds.cloud_name.clone(),
                creds.api_key.clone(),
                creds.api_secret.clone(),
                settings.folder.clone(),
            );
            config.signature_algorithm = algorithm;
            tracing::info!(cloud = %creds.cloud_name, ?algorithm, "using cloudinary store");
            Ok(Arc::new(CloudinaryStore::new(config)?))
        }
        #[cfg(feature = "store-local")]
        StoreKind::Local => {
            let store = LocalCardStore::open(
                settings.local.root.clone(),
                settings.local.url_prefix.clone(),
                settings.folder.clone(),
            )
            .await?;
            Ok(Arc::new(store))
        }
        #[allow(unreachable_patterns)]
        other => bail!("store {other:?} is not compiled into this binary"),
    }
}

/// Local media under its URL prefix, then the front-end as the fallback.
fn mount_assets(mut app: Router, settings: &Settings) -> Router {
    if settings.store == StoreKind::Local {
        let prefix = format!("/{}", settings.local.url_prefix.trim_matches('/'));
        app = app.nest_service(&prefix, ServeDir::new(&settings.local.root));
    }

    match &settings.server.static_dir {
        Some(dir) if dir.is_dir() => {
            let index = ServeFile::new(dir.join("index.html"));
            app.fallback_service(ServeDir::new(dir).not_found_service(index))
        }
        Some(dir) => {
            tracing::warn!(dir = %dir.display(), "static dir not found, serving api only");
            app
        }
        None => app,
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
