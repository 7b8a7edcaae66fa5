//! End-to-end tests of the analysis relay against a stub backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::Multipart;
use axum::response::Html;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use nutrilens::capture;
use nutrilens::relay::{router, RelayState};

/// Serve a router on an ephemeral loopback port.
async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Relay wired to the given stub backend; returns the relay's analyze URL.
async fn relay_for(backend: Router) -> String {
    let backend_url = serve(backend).await;
    let relay_url = serve(router(Arc::new(RelayState::new(backend_url)))).await;
    format!("{relay_url}/api/analyze")
}

/// Backend that echoes the multipart fields it received.
fn echo_backend() -> Router {
    Router::new().route(
        "/api/analyze",
        post(|mut multipart: Multipart| async move {
            let mut model = String::new();
            let mut text = String::new();
            let mut image_len = 0usize;
            while let Some(field) = multipart.next_field().await.unwrap() {
                match field.name().unwrap_or_default() {
                    "model" => model = field.text().await.unwrap(),
                    "text" => text = field.text().await.unwrap(),
                    "image" => image_len = field.bytes().await.unwrap().len(),
                    _ => {}
                }
            }
            Json(json!({
                "success": true,
                "data": { "content": format!("model={model} text={text} image={image_len}") }
            }))
        }),
    )
}

fn fixed_backend(reply: Value) -> Router {
    Router::new().route(
        "/api/analyze",
        post(move |_multipart: Multipart| async move { Json(reply) }),
    )
}

fn png_data_uri() -> (String, usize) {
    let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([10, 200, 10, 255]));
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    let staged = capture::stage(bytes).unwrap();
    (capture::to_data_uri(&staged), staged.bytes.len())
}

#[tokio::test]
async fn text_submission_is_forwarded_as_multipart() {
    let url = relay_for(echo_backend()).await;

    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({ "food_name": "apple", "model": "nutrix" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"], json!("model=nutrix text=apple image=0"));
}

#[tokio::test]
async fn plain_string_payload_passes_through_verbatim() {
    let url = relay_for(fixed_backend(json!({
        "success": true,
        "data": "Apple: 52 kcal per 100 g, rich in fiber."
    })))
    .await;

    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({ "food_name": "apple", "model": "nutrix" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"], json!("Apple: 52 kcal per 100 g, rich in fiber."));
}

#[tokio::test]
async fn image_data_uri_is_decoded_and_takes_precedence() {
    let url = relay_for(echo_backend()).await;
    let (data_uri, image_len) = png_data_uri();

    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({
            "food_name": "should lose to the image",
            "image_data": data_uri,
            "model": "gemini"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"], json!(format!("model=gemini text= image={image_len}")));
}

#[tokio::test]
async fn omitted_model_defaults_to_nutrix() {
    let url = relay_for(echo_backend()).await;

    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({ "food_name": "rice" }))
        .send()
        .await
        .unwrap();

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"], json!("model=nutrix text=rice image=0"));
}

#[tokio::test]
async fn multipart_intake_is_accepted_directly() {
    let url = relay_for(echo_backend()).await;

    let form = reqwest::multipart::Form::new()
        .text("model", "gemini")
        .text("text", "banana");
    let response = reqwest::Client::new()
        .post(&url)
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"], json!("model=gemini text=banana image=0"));
}

#[tokio::test]
async fn backend_failure_is_relayed_with_client_error_status() {
    let url = relay_for(fixed_backend(json!({
        "success": false,
        "error": "Unrecognized food"
    })))
    .await;

    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({ "food_name": "mystery stew" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"], json!("Unrecognized food"));
}

#[tokio::test]
async fn non_json_backend_maps_to_bad_gateway() {
    let backend = Router::new().route(
        "/api/analyze",
        post(|| async { Html("<html>service unavailable</html>") }),
    );
    let url = relay_for(backend).await;

    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({ "food_name": "apple" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], json!(false));
    assert!(body["error"].as_str().unwrap().contains("backend"));
}

#[tokio::test]
async fn unreachable_backend_maps_to_bad_gateway() {
    // Nothing listens on this port.
    let relay_url = serve(router(Arc::new(RelayState::new("http://127.0.0.1:9")))).await;

    let response = reqwest::Client::new()
        .post(format!("{relay_url}/api/analyze"))
        .json(&json!({ "food_name": "apple" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn malformed_json_is_rejected_before_any_backend_call() {
    let called = Arc::new(AtomicBool::new(false));
    let seen = called.clone();
    let backend = Router::new().route(
        "/api/analyze",
        post(move || {
            let seen = seen.clone();
            async move {
                seen.store(true, Ordering::SeqCst);
                Json(json!({ "success": true, "data": "unexpected" }))
            }
        }),
    );
    let url = relay_for(backend).await;

    let response = reqwest::Client::new()
        .post(&url)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], json!("Invalid request format"));
    assert!(!called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn empty_submission_is_rejected() {
    let url = relay_for(echo_backend()).await;

    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({ "model": "nutrix" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn structured_payload_without_content_is_pretty_printed() {
    let url = relay_for(fixed_backend(json!({
        "success": true,
        "data": { "calories": 52, "protein_g": 0.3 }
    })))
    .await;

    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({ "food_name": "apple" }))
        .send()
        .await
        .unwrap();

    let body: Value = response.json().await.unwrap();
    let data = body["data"].as_str().unwrap();
    assert!(data.contains("\"calories\": 52"));
    assert!(data.contains("\"protein_g\": 0.3"));
}
