//! Shared fixtures for the end-to-end suites: a router over a scratch local
//! store and the real composer.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use image::{DynamicImage, Rgb, RgbImage};
use rq_api::{configure_routes, AppState};
use rq_compose::{ComposeOptions, SvgCardComposer};
use rq_core::Catalog;
use rq_store_local::LocalCardStore;
use serde_json::Value;

const BOUNDARY: &str = "rq-flow-boundary";

pub struct TestApp {
    pub router: Router,
    pub root: PathBuf,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let root = std::env::temp_dir().join(format!("rq-flow-{}", uuid::Uuid::new_v4()));
        let store = LocalCardStore::open(root.clone(), "/media".into(), "TW-eQSL".into())
            .await
            .expect("open local store");
        let composer = SvgCardComposer::new(ComposeOptions::default(), None);
        let catalog = Catalog::new(Arc::new(store), Arc::new(composer));

        let router = configure_routes(
            AppState {
                catalog: Arc::new(catalog),
            },
            32 * 1024 * 1024,
        );
        Self { router, root }
    }

    pub async fn call(&self, req: Request<Body>) -> Response {
        use tower::ServiceExt;
        self.router.clone().oneshot(req).await.expect("router is infallible")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn photo(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
        .unwrap();
    buf
}

pub fn upload(fields: &[(&str, &str)], file: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"qsl\"; filename=\"photo.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(file);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_bytes(resp: Response) -> Vec<u8> {
    resp.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn json(resp: Response) -> Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}
