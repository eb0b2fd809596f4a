//! End-to-end tests for the HTTP API.
//!
//! Runs the real router, engine thread, embedding store, and attendance log
//! against a temporary directory. The face embedder is replaced by one that
//! maps a uniform gray image to an embedding of its brightness, so no ONNX
//! models are needed.

use std::io::{Cursor, Read};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use presence_core::{
    Comparison, EmbedError, Embedding, EmbeddingStore, FaceEmbedder, Frame,
};
use presenced::attendance::AttendanceLog;
use presenced::engine::spawn_engine;
use presenced::http::{build_router, AppState};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "presence-test-boundary";
const RULE: Comparison = Comparison::Euclidean { max_distance: 0.05 };

/// Frames darker than 10 contain no face; otherwise one face whose embedding
/// is `[brightness / 255, 1.0]`.
struct BrightnessEmbedder;

impl FaceEmbedder for BrightnessEmbedder {
    fn embed(&mut self, frame: &Frame) -> Result<Vec<Embedding>, EmbedError> {
        if frame.data.is_empty() {
            return Ok(vec![]);
        }
        let brightness =
            frame.data.iter().map(|&p| p as f32).sum::<f32>() / frame.data.len() as f32;
        if brightness < 10.0 {
            return Ok(vec![]);
        }
        Ok(vec![Embedding::new(vec![brightness / 255.0, 1.0])])
    }

    fn same_person(&self, known: &Embedding, probe: &Embedding) -> bool {
        RULE.same_person(known, probe)
    }

    fn comparison(&self) -> Comparison {
        RULE
    }
}

struct TestApp {
    dir: TempDir,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        Self::with_upload_limit(1024 * 1024)
    }

    fn with_upload_limit(max_upload_bytes: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(EmbeddingStore::open(dir.path().join("db")).unwrap());
        let attendance = Arc::new(AttendanceLog::open(dir.path().join("logs")).unwrap());
        let engine = spawn_engine(Box::new(BrightnessEmbedder), store.clone(), 4).unwrap();
        let router = build_router(
            AppState {
                engine,
                store,
                attendance,
            },
            max_upload_bytes,
        );
        Self { dir, router }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post_form(&self, uri: &str, fields: &[Part<'_>]) -> (StatusCode, Value) {
        let (status, body) = self.send(multipart_request(uri, fields)).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn register(&self, name: &str, image: Vec<u8>) -> (StatusCode, Value) {
        self.post_form(
            "/register_new_user",
            &[Part::File(image), Part::Text(name)],
        )
        .await
    }

    async fn login(&self, image: Vec<u8>) -> (StatusCode, Value) {
        self.post_form("/login", &[Part::File(image)]).await
    }

    async fn logout(&self, image: Vec<u8>) -> (StatusCode, Value) {
        self.post_form("/logout", &[Part::File(image)]).await
    }

    /// Every attendance line written so far, across all day files.
    fn attendance_lines(&self) -> Vec<String> {
        let mut files: Vec<_> = std::fs::read_dir(self.dir.path().join("logs"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        files.sort();
        files
            .iter()
            .flat_map(|p| {
                std::fs::read_to_string(p)
                    .unwrap()
                    .lines()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

enum Part<'a> {
    File(Vec<u8>),
    Text(&'a str),
}

fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File(bytes) => {
                body.extend_from_slice(
                    b"Content-Disposition: form-data; name=\"file\"; filename=\"face.png\"\r\n\
                      Content-Type: image/png\r\n\r\n",
                );
                body.extend_from_slice(bytes);
            }
            Part::Text(text) => {
                body.extend_from_slice(b"Content-Disposition: form-data; name=\"text\"\r\n\r\n");
                body.extend_from_slice(text.as_bytes());
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn face(brightness: u8) -> Vec<u8> {
    let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([brightness])));
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn no_face() -> Vec<u8> {
    face(0)
}

#[tokio::test]
async fn test_root_message() {
    let app = TestApp::new();
    let (status, body) = app.get_json("/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Welcome to the Face Attendance App!");
}

#[tokio::test]
async fn test_register_login_logout_records_attendance() {
    let app = TestApp::new();

    let (status, body) = app.register("alice", face(120)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["registration_status"], 200);
    assert!(app.dir.path().join("db/alice.png").exists());
    assert!(app.dir.path().join("db/alice.json").exists());

    let (status, body) = app.login(face(120)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({ "user": "alice", "match_status": true }));

    let (status, body) = app.logout(face(121)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"], "alice");

    let lines = app.attendance_lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("alice,") && lines[0].ends_with(",IN"));
    assert!(lines[1].starts_with("alice,") && lines[1].ends_with(",OUT"));
}

#[tokio::test]
async fn test_login_with_empty_store_is_unknown() {
    let app = TestApp::new();
    let (status, body) = app.login(face(120)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        serde_json::json!({ "user": "unknown_person", "match_status": false })
    );
    assert!(app.attendance_lines().is_empty());
}

#[tokio::test]
async fn test_login_unknown_face_writes_nothing() {
    let app = TestApp::new();
    app.register("alice", face(50)).await;

    let (status, body) = app.login(face(200)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"], "unknown_person");
    assert_eq!(body["match_status"], false);
    assert!(app.attendance_lines().is_empty());
}

#[tokio::test]
async fn test_login_without_face() {
    let app = TestApp::new();
    app.register("alice", face(50)).await;

    let (status, body) = app.logout(no_face()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        serde_json::json!({ "user": "no_persons_found", "match_status": false })
    );
    assert!(app.attendance_lines().is_empty());
}

#[tokio::test]
async fn test_first_enrolled_name_wins_over_closer_match() {
    let app = TestApp::new();
    // Both are within the threshold of a 100 probe; bob is the exact match.
    app.register("bob", face(100)).await;
    app.register("alice", face(103)).await;

    let (_, body) = app.login(face(100)).await;
    assert_eq!(body["user"], "alice");
}

#[tokio::test]
async fn test_undecodable_image_is_bad_request() {
    let app = TestApp::new();
    let (status, body) = app.login(b"not an image".to_vec()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_missing_file_field_is_bad_request() {
    let app = TestApp::new();
    let (status, body) = app.post_form("/login", &[Part::Text("alice")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("file"));
}

#[tokio::test]
async fn test_register_rejects_invalid_identity() {
    let app = TestApp::new();
    for name in ["", "../etc/passwd", "unknown_person", "a,b"] {
        let (status, body) = app.register(name, face(120)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{name:?}");
        assert_eq!(body["registration_status"], 400, "{name:?}");
    }
    let (_, users) = app.get_json("/users").await;
    assert_eq!(users["users"], serde_json::json!([]));
}

#[tokio::test]
async fn test_register_without_face_is_unprocessable() {
    let app = TestApp::new();
    let (status, body) = app.register("alice", no_face()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["registration_status"], 422);
    assert!(!app.dir.path().join("db/alice.json").exists());
}

#[tokio::test]
async fn test_register_without_name_keeps_registration_shape() {
    let app = TestApp::new();
    let (status, body) = app.post_form("/register_new_user", &[Part::File(face(90))]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["registration_status"], 400);
}

#[tokio::test]
async fn test_reregister_replaces_embedding() {
    let app = TestApp::new();
    app.register("alice", face(50)).await;
    app.register("alice", face(200)).await;

    let (_, body) = app.login(face(50)).await;
    assert_eq!(body["user"], "unknown_person");
    let (_, body) = app.login(face(200)).await;
    assert_eq!(body["user"], "alice");
}

#[tokio::test]
async fn test_attendance_logs_zip() {
    let app = TestApp::new();
    app.register("alice", face(120)).await;
    app.login(face(120)).await;
    app.logout(face(120)).await;

    let request = Request::builder()
        .uri("/get_attendance_logs")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
        "application/zip"
    );
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("out.zip"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    assert_eq!(archive.len(), 1);

    let mut text = String::new();
    archive.by_index(0).unwrap().read_to_string(&mut text).unwrap();
    assert_eq!(text.lines().count(), 2);
    assert!(text.lines().all(|l| l.starts_with("alice,")));
}

#[tokio::test]
async fn test_attendance_logs_empty_archive() {
    let app = TestApp::new();
    let (status, bytes) = app
        .send(
            Request::builder()
                .uri("/get_attendance_logs")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 0);
}

#[tokio::test]
async fn test_status_and_users() {
    let app = TestApp::new();
    app.register("carol", face(30)).await;
    app.register("alice", face(200)).await;

    let (status, body) = app.get_json("/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enrolled"], 2);
    assert_eq!(body["comparison"]["metric"], "euclidean");

    let (_, body) = app.get_json("/users").await;
    assert_eq!(body["users"], serde_json::json!(["alice", "carol"]));
}

#[tokio::test]
async fn test_upload_over_limit_is_rejected() {
    let app = TestApp::with_upload_limit(1024);
    let (status, body) = app.login(vec![0u8; 4096]).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["status"], "error");
    assert!(body["error"].is_string());
    assert!(app.attendance_lines().is_empty());
}
