use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderValue, Request};
use axum::Router;
use hoard_axum::{hoard, HoardApp};
use hoard_blob::backend::MemoryBackend;
use hoard_blob::metadata::MemoryMetadataStore;
use hoard_blob::{BlobConfig, RetryPolicy, StorageAdapter};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

const BOUNDARY: &str = "hoardtestboundary";

fn app_with(backend: MemoryBackend) -> HoardApp {
    let config = BlobConfig::default()
        .with_max_chunks(10)
        .with_max_file_bytes(1024)
        .with_retry(RetryPolicy::new().with_backoff(Duration::from_millis(1), Duration::from_millis(2)));
    let adapter = StorageAdapter::new(Arc::new(MemoryMetadataStore::new()), Arc::new(backend), config);
    hoard(Arc::new(adapter))
}

fn app() -> HoardApp {
    app_with(MemoryBackend::new())
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a str, &'a [u8]),
}

fn multipart(parts: &[Part<'_>]) -> Request<Body> {
    multipart_to("/upload", parts)
}

fn multipart_to(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes());
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, file_name, content_type, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
}

async fn send(router: &Router, req: Request<Body>) -> axum::response::Response {
    router.clone().oneshot(req).await.unwrap()
}

async fn json_body(res: axum::response::Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn raw_body(res: axum::response::Response) -> Vec<u8> {
    res.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn upload_song(router: &Router) -> String {
    let res = send(router, multipart(&[Part::File("file", "song.mp3", "audio/mpeg", b"0123456789")])).await;
    assert_eq!(res.status().as_u16(), 200);
    let body = json_body(res).await;
    assert_eq!(body["success"], true);
    body["key"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_ok() {
    let router = app().router();
    let res = send(&router, request("GET", "/health")).await;
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(raw_body(res).await, b"ok");
}

#[tokio::test]
async fn whole_file_upload_and_ranged_read() {
    let router = app().router();
    let key = upload_song(&router).await;
    assert!(key.starts_with("audio:"));
    assert!(key.ends_with(".mp3"));

    let res = send(&router, request("GET", &format!("/file/{key}"))).await;
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(res.headers()["content-type"], "audio/mpeg");
    assert_eq!(res.headers()["accept-ranges"], "bytes");
    assert_eq!(res.headers()["content-length"], "10");
    assert_eq!(raw_body(res).await, b"0123456789");

    let res = send(
        &router,
        Request::builder()
            .uri(format!("/file/{key}"))
            .header("range", "bytes=2-5")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status().as_u16(), 206);
    assert_eq!(res.headers()["content-range"], "bytes 2-5/10");
    assert_eq!(res.headers()["content-length"], "4");
    assert_eq!(raw_body(res).await, b"2345");
}

#[tokio::test]
async fn unsatisfiable_range_is_416() {
    let router = app().router();
    let key = upload_song(&router).await;

    let res = send(
        &router,
        Request::builder()
            .uri(format!("/file/{key}"))
            .header("range", "bytes=50-60")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status().as_u16(), 416);
    let body = json_body(res).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["name"], "RangeNotSatisfiable");
    assert_eq!(body["className"], "range-not-satisfiable");
}

#[tokio::test]
async fn upload_without_file_is_400() {
    let router = app().router();
    let res = send(&router, multipart(&[Part::Text("tags", "x")])).await;
    assert_eq!(res.status().as_u16(), 400);
    assert!(res.headers().get("x-request-id").is_some());
    let body = json_body(res).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], 400);
    assert_eq!(body["message"], "No file uploaded");
}

#[tokio::test]
async fn request_id_is_preserved_when_provided() {
    let router = app().router();
    let provided = HeaderValue::from_static("req-test-123");
    let res = send(
        &router,
        Request::builder()
            .uri("/health")
            .header("x-request-id", provided.clone())
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.headers().get("x-request-id").unwrap(), &provided);
}

#[tokio::test]
async fn chunked_upload_end_to_end() {
    let app = app_with(MemoryBackend::new().without_range());
    let router = app.router();

    let res = send(
        &router,
        request("GET", "/upload/chunk/init?fileType=video&fileName=clip.mp4&fileSize=16&totalChunks=3"),
    )
    .await;
    assert_eq!(res.status().as_u16(), 200);
    let key = json_body(res).await["key"].as_str().unwrap().to_string();
    assert!(key.starts_with("video:chunk_"));

    let parts: [&[u8]; 3] = [b"ABCDE", b"FGHIJ", b"KLMNOP"];
    for index in [2usize, 0, 1] {
        let index_text = index.to_string();
        let res = send(
            &router,
            multipart_to(
                "/upload/chunk",
                &[
                    Part::Text("key", &key),
                    Part::Text("chunkIndex", &index_text),
                    Part::File("chunkFile", "blob", "application/octet-stream", parts[index]),
                ],
            ),
        )
        .await;
        assert_eq!(res.status().as_u16(), 200);
        let ack = json_body(res).await;
        assert_eq!(ack["success"], true);
        assert_eq!(ack["index"], index);
    }

    // Reads before persistence finishes may be 425; after draining they never are
    app.state.adapter.drain().await;

    let res = send(&router, request("GET", &format!("/upload/chunk/progress?key={key}"))).await;
    let progress = json_body(res).await;
    assert_eq!(progress["uploadedIndices"], json!([0, 1, 2]));
    assert_eq!(progress["complete"], true);

    let res = send(
        &router,
        Request::builder()
            .uri(format!("/file/{key}"))
            .header("range", "bytes=4-9")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status().as_u16(), 206);
    assert_eq!(res.headers()["content-range"], "bytes 4-9/16");
    assert_eq!(res.headers()["content-type"], "video/mp4");
    assert_eq!(raw_body(res).await, b"EFGHIJ");
}

#[tokio::test]
async fn incomplete_chunked_read_is_425() {
    let app = app();
    let router = app.router();
    let res = send(
        &router,
        request("GET", "/upload/chunk/init?fileType=audio&fileName=a.flac&fileSize=10&totalChunks=2"),
    )
    .await;
    let key = json_body(res).await["key"].as_str().unwrap().to_string();

    let res = send(
        &router,
        multipart_to(
            "/upload/chunk",
            &[
                Part::Text("key", &key),
                Part::Text("chunkIndex", "0"),
                Part::File("chunkFile", "blob", "application/octet-stream", b"01234"),
            ],
        ),
    )
    .await;
    assert_eq!(res.status().as_u16(), 200);
    app.state.adapter.drain().await;

    let res = send(&router, request("GET", &format!("/file/{key}"))).await;
    assert_eq!(res.status().as_u16(), 425);
    let body = json_body(res).await;
    assert_eq!(body["name"], "TooEarly");
    assert_eq!(body["message"], "Upload incomplete: 1/2 chunks present");
}

#[tokio::test]
async fn chunk_init_rejections() {
    let router = app().router();

    let res = send(
        &router,
        request("GET", "/upload/chunk/init?fileType=audio&fileName=a.flac&fileSize=10&totalChunks=11"),
    )
    .await;
    assert_eq!(res.status().as_u16(), 400);

    let res = send(
        &router,
        request("GET", "/upload/chunk/init?fileType=audio&fileName=a.flac&fileSize=5000&totalChunks=2"),
    )
    .await;
    assert_eq!(res.status().as_u16(), 400);
    assert_eq!(json_body(res).await["name"], "BadRequest");

    let res = send(&router, request("GET", "/upload/chunk/init?fileType=audio")).await;
    assert_eq!(res.status().as_u16(), 400);
    assert_eq!(json_body(res).await["success"], false);

    let res = send(
        &router,
        request("GET", "/upload/chunk/init?fileType=spreadsheet&fileName=a.xls&fileSize=10&totalChunks=1"),
    )
    .await;
    assert_eq!(res.status().as_u16(), 400);
}

#[tokio::test]
async fn chunk_upload_missing_fields_is_400() {
    let router = app().router();
    let res = send(&router, multipart_to("/upload/chunk", &[Part::Text("key", "audio:chunk_x.mp3")])).await;
    assert_eq!(res.status().as_u16(), 400);
    assert_eq!(json_body(res).await["message"], "Missing field: chunkIndex");
}

#[tokio::test]
async fn trash_round_trip_over_http() {
    let router = app().router();
    let key = upload_song(&router).await;

    let res = send(&router, request("POST", &format!("/trash/{key}/move"))).await;
    assert_eq!(res.status().as_u16(), 200);

    assert_eq!(send(&router, request("GET", &format!("/file/{key}"))).await.status().as_u16(), 404);
    let trashed = json_body(send(&router, request("GET", "/trash")).await).await;
    assert_eq!(trashed["keys"], json!([key]));
    let live = json_body(send(&router, request("GET", "/files")).await).await;
    assert_eq!(live["keys"], json!([]));

    let res = send(&router, request("GET", &format!("/trash/{key}"))).await;
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(raw_body(res).await, b"0123456789");

    let res = send(&router, request("POST", &format!("/trash/{key}/restore"))).await;
    assert_eq!(res.status().as_u16(), 200);
    let res = send(&router, request("GET", &format!("/file/{key}"))).await;
    assert_eq!(raw_body(res).await, b"0123456789");

    let res = send(&router, request("POST", &format!("/trash/{key}/restore"))).await;
    assert_eq!(res.status().as_u16(), 404);
}

#[tokio::test]
async fn permanent_delete_routes() {
    let router = app().router();
    let key = upload_song(&router).await;

    // Live files cannot be purged through the trash route
    let res = send(&router, request("DELETE", &format!("/trash/{key}"))).await;
    assert_eq!(res.status().as_u16(), 404);

    let res = send(&router, request("DELETE", &format!("/file/{key}"))).await;
    assert_eq!(res.status().as_u16(), 200);
    let res = send(&router, request("DELETE", &format!("/file/{key}"))).await;
    assert_eq!(res.status().as_u16(), 404);

    let other = upload_song(&router).await;
    send(&router, request("POST", &format!("/trash/{other}/move"))).await;
    let res = send(&router, request("DELETE", &format!("/trash/{other}"))).await;
    assert_eq!(res.status().as_u16(), 200);
    let trashed = json_body(send(&router, request("GET", "/trash")).await).await;
    assert_eq!(trashed["keys"], json!([]));
}

#[tokio::test]
async fn metadata_read_and_patch() {
    let router = app().router();
    let key = upload_song(&router).await;

    let res = send(
        &router,
        Request::builder()
            .method("PATCH")
            .uri(format!("/file/{key}"))
            .header("content-type", "application/json")
            .body(Body::from(r#"{"liked":true,"tags":["road trip"]}"#))
            .unwrap(),
    )
    .await;
    assert_eq!(res.status().as_u16(), 200);

    let res = send(&router, request("GET", &format!("/file/{key}/meta"))).await;
    let body = json_body(res).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["metadata"]["fileName"], "song.mp3");
    assert_eq!(body["metadata"]["fileSize"], 10);
    assert_eq!(body["metadata"]["liked"], true);
    assert_eq!(body["metadata"]["tags"], json!(["road trip"]));
    assert!(body["value"].is_string());

    let res = send(
        &router,
        Request::builder()
            .method("PATCH")
            .uri(format!("/file/{key}"))
            .header("content-type", "application/json")
            .body(Body::from("{\"liked\":"))
            .unwrap(),
    )
    .await;
    assert_eq!(res.status().as_u16(), 400);
}

#[tokio::test]
async fn malformed_key_is_400() {
    let router = app().router();
    let res = send(&router, request("GET", "/file/no-type-here")).await;
    assert_eq!(res.status().as_u16(), 400);
    assert_eq!(json_body(res).await["className"], "bad-request");
}

#[tokio::test]
async fn missing_blob_is_500_not_a_truncated_body() {
    let backend = MemoryBackend::new();
    let app = app_with(backend.clone());
    let router = app.router();
    let key = upload_song(&router).await;

    let storage_key = hoard_blob::StorageKey::parse(&key).unwrap();
    let view = app.state.adapter.get_metadata(&storage_key).await.unwrap();
    assert!(backend.remove_object(view.value.as_str().unwrap()));

    let res = send(&router, request("GET", &format!("/file/{key}"))).await;
    assert_eq!(res.status().as_u16(), 500);
    assert!(res.headers().get("content-range").is_none());
    let body = json_body(res).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["className"], "general-error");

    let res = send(
        &router,
        Request::builder()
            .uri(format!("/file/{key}"))
            .header("range", "bytes=0-3")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status().as_u16(), 500);
}

#[tokio::test]
async fn uploads_over_the_backend_cap_are_refused_while_reading() {
    let backend = MemoryBackend::relay_like(16);
    let router = app_with(backend.clone()).router();

    let oversized = vec![b'x'; 200];
    let res = send(&router, multipart(&[Part::File("file", "big.bin", "application/octet-stream", &oversized)])).await;
    assert_eq!(res.status().as_u16(), 413);
    assert_eq!(json_body(res).await["className"], "payload-too-large");

    let res = send(
        &router,
        multipart_to(
            "/upload/chunk",
            &[
                Part::Text("key", "video:chunk_abc.mp4"),
                Part::Text("chunkIndex", "0"),
                Part::File("chunkFile", "blob", "application/octet-stream", &oversized),
            ],
        ),
    )
    .await;
    assert_eq!(res.status().as_u16(), 413);
    assert_eq!(backend.call_count(), 0);
}
