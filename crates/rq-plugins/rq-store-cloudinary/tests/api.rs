//! `CloudinaryStore` against an in-process fake of the Cloudinary REST API.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Form, Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rq_core::traits::CardStore;
use rq_store_cloudinary::sign::{self, SignatureAlgorithm};
use rq_store_cloudinary::{CloudinaryConfig, CloudinaryStore};
use secrecy::SecretString;
use serde_json::{json, Value};

const SECRET: &str = "s3cr3t";

/// One request as seen by the fake.
#[derive(Debug, Clone)]
struct Call {
    uri: String,
    authorized: bool,
    fields: BTreeMap<String, String>,
}

#[derive(Clone)]
struct Fake {
    origin: String,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Fake {
    fn record(&self, uri: &Uri, headers: &HeaderMap, fields: BTreeMap<String, String>) {
        self.calls.lock().unwrap().push(Call {
            uri: uri.to_string(),
            authorized: headers.contains_key("authorization"),
            fields,
        });
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn resource(&self, public_id: &str, entry: &str) -> Value {
        json!({
            "public_id": public_id,
            "secure_url": format!("{}/files/{public_id}.jpg", self.origin),
            "created_at": "2025-03-01T10:00:00Z",
            "context": { "custom": { "entry": entry } }
        })
    }
}

fn unescape_entry(context: &str) -> String {
    context
        .trim_start_matches("entry=")
        .replace("\\=", "=")
        .replace("\\|", "|")
}

async fn upload(
    State(fake): State<Fake>,
    uri: Uri,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Json<Value> {
    let mut fields = BTreeMap::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap().to_string();
        let value = if name == "file" {
            format!("{} bytes", field.bytes().await.unwrap().len())
        } else {
            field.text().await.unwrap()
        };
        fields.insert(name, value);
    }
    let entry = unescape_entry(&fields["context"]);
    fake.record(&uri, &headers, fields);
    Json(fake.resource("TW-eQSL/new", &entry))
}

async fn search(
    State(fake): State<Fake>,
    Path(cloud): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let fields = [("body".to_string(), body.to_string())].into();
    fake.record(&uri, &headers, fields);

    if cloud == "broken" {
        let error = json!({ "error": { "message": "Invalid api_key 123" } });
        return (StatusCode::UNAUTHORIZED, Json(error)).into_response();
    }
    let page = match body["next_cursor"].as_str() {
        None => json!({
            "resources": [fake.resource("TW-eQSL/b", "indicatif=F5XYZ")],
            "next_cursor": "page-2"
        }),
        Some(_) => json!({
            "resources": [fake.resource("TW-eQSL/a", "indicatif=F4ABC")]
        }),
    };
    Json(page).into_response()
}

async fn resource(
    State(fake): State<Fake>,
    Path((_cloud, public_id)): Path<(String, String)>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    fake.record(&uri, &headers, BTreeMap::new());
    if public_id == "TW-eQSL/known" {
        Json(fake.resource("TW-eQSL/known", "indicatif=F4ABC|downloads=2")).into_response()
    } else {
        let error = json!({ "error": { "message": format!("Resource not found - {public_id}") } });
        (StatusCode::NOT_FOUND, Json(error)).into_response()
    }
}

async fn update(
    State(fake): State<Fake>,
    uri: Uri,
    headers: HeaderMap,
    Form(form): Form<BTreeMap<String, String>>,
) -> Json<Value> {
    fake.record(&uri, &headers, form);
    Json(json!({}))
}

async fn file(Path(_name): Path<String>) -> Vec<u8> {
    vec![0xff, 0xd8, 0xff, 0xd9]
}

async fn spawn_fake() -> Fake {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let fake = Fake {
        origin: format!("http://{}", listener.local_addr().unwrap()),
        calls: Arc::default(),
    };
    let app = Router::new()
        .route("/v1_1/{cloud}/image/upload", post(upload))
        .route("/v1_1/{cloud}/resources/search", post(search))
        .route(
            "/v1_1/{cloud}/resources/image/upload/{*public_id}",
            get(resource).post(update),
        )
        .route("/files/{*name}", get(file))
        .with_state(fake.clone());
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    fake
}

fn store(fake: &Fake, cloud: &str) -> CloudinaryStore {
    let mut config = CloudinaryConfig::new(
        cloud.to_string(),
        "123".to_string(),
        SecretString::from(SECRET.to_string()),
        "TW-eQSL".to_string(),
    );
    config.api_base = format!("{}/v1_1", fake.origin);
    CloudinaryStore::new(config).unwrap()
}

#[tokio::test]
async fn test_upload_sends_signed_multipart() {
    let fake = spawn_fake().await;
    let asset = store(&fake, "demo")
        .upload(vec![7; 32], "indicatif=F4ABC|note=a%3Db")
        .await
        .unwrap();

    assert_eq!(asset.public_id, "TW-eQSL/new");
    let fields = asset.context.decode();
    assert_eq!(fields["indicatif"], "F4ABC");
    assert_eq!(fields["note"], "a=b");

    let calls = fake.calls();
    assert_eq!(calls.len(), 1);
    let sent = &calls[0].fields;
    assert_eq!(calls[0].uri, "/v1_1/demo/image/upload");
    assert!(!calls[0].authorized);
    assert_eq!(sent["file"], "32 bytes");
    assert_eq!(sent["api_key"], "123");
    assert_eq!(sent["folder"], "TW-eQSL");
    assert_eq!(sent["context"], r"entry=indicatif\=F4ABC\|note\=a%3Db");
    assert!(!sent.contains_key("signature_algorithm"));

    let signed: BTreeMap<&str, String> = ["context", "folder", "timestamp"]
        .into_iter()
        .map(|key| (key, sent[key].clone()))
        .collect();
    assert_eq!(sent["signature"], sign::sign(&signed, SECRET, SignatureAlgorithm::Sha1));
}

#[tokio::test]
async fn test_sha256_uploads_announce_algorithm() {
    let fake = spawn_fake().await;
    let mut config = CloudinaryConfig::new(
        "demo".to_string(),
        "123".to_string(),
        SecretString::from(SECRET.to_string()),
        "TW-eQSL".to_string(),
    );
    config.api_base = format!("{}/v1_1", fake.origin);
    config.signature_algorithm = SignatureAlgorithm::Sha256;
    CloudinaryStore::new(config)
        .unwrap()
        .upload(vec![1], "indicatif=F4ABC")
        .await
        .unwrap();

    let sent = &fake.calls()[0].fields;
    assert_eq!(sent["signature_algorithm"], "sha256");
    assert_eq!(sent["signature"].len(), 64);
}

#[tokio::test]
async fn test_list_follows_next_cursor() {
    let fake = spawn_fake().await;
    let assets = store(&fake, "demo").list().await.unwrap();

    let ids: Vec<_> = assets.iter().map(|a| a.public_id.as_str()).collect();
    assert_eq!(ids, ["TW-eQSL/b", "TW-eQSL/a"]);
    assert_eq!(assets[1].context.decode()["indicatif"], "F4ABC");

    let calls = fake.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.authorized));
    let first: Value = serde_json::from_str(&calls[0].fields["body"]).unwrap();
    let second: Value = serde_json::from_str(&calls[1].fields["body"]).unwrap();
    assert_eq!(first["expression"], "folder:TW-eQSL");
    assert!(first.get("next_cursor").is_none());
    assert_eq!(second["next_cursor"], "page-2");
}

#[tokio::test]
async fn test_error_body_message_is_reported() {
    let fake = spawn_fake().await;
    let err = store(&fake, "broken").list().await.unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("401"), "{msg}");
    assert!(msg.contains("Invalid api_key 123"), "{msg}");
}

#[tokio::test]
async fn test_get_known_and_missing() {
    let fake = spawn_fake().await;
    let store = store(&fake, "demo");

    let asset = store.get("TW-eQSL/known").await.unwrap().unwrap();
    assert_eq!(asset.context.decode()["downloads"], "2");
    assert!(store.get("TW-eQSL/gone").await.unwrap().is_none());

    let bytes = store.fetch_bytes(&asset).await.unwrap();
    assert_eq!(bytes, [0xff, 0xd8, 0xff, 0xd9]);
}

#[tokio::test]
async fn test_ids_are_encoded_and_scoped_to_folder() {
    let fake = spawn_fake().await;
    let store = store(&fake, "demo");

    assert!(store.get("TW-eQSL/F4ABC 2025").await.unwrap().is_none());
    assert_eq!(
        fake.calls()[0].uri,
        "/v1_1/demo/resources/image/upload/TW-eQSL/F4ABC%202025"
    );

    for id in ["../../private/passport", "private/passport", "TW-eQSL/../private/x"] {
        assert!(store.get(id).await.unwrap().is_none(), "{id}");
        assert!(store.update_context(id, "downloads=1").await.is_err(), "{id}");
    }
    assert_eq!(fake.calls().len(), 1);
}

#[tokio::test]
async fn test_update_context_posts_escaped_entry() {
    let fake = spawn_fake().await;
    store(&fake, "demo")
        .update_context("TW-eQSL/known", "downloads=3|note=a%3Db")
        .await
        .unwrap();

    let calls = fake.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].uri, "/v1_1/demo/resources/image/upload/TW-eQSL/known");
    assert!(calls[0].authorized);
    assert_eq!(calls[0].fields["context"], r"entry=downloads\=3\|note\=a%3Db");
}
