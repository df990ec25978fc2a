use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::Router;
use http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ppe_gateway::detector::{
    ClassTable, DetectionEngine, HttpDetector, RawDetection, RawDetections, UnavailableDetector,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use ppe_gateway::test_util::{
    png_base64, png_bytes, test_limits, test_settings, test_state, MockDetector,
};
use ppe_gateway::{app, AppState, ResourceLimiter};

fn mock_app() -> Router {
    let state = test_state(test_limits(), test_settings(), Arc::new(MockDetector::echo()));
    app(state, &[])
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let response = mock_app().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_root_banner() {
    let response = mock_app().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["endpoints"]["stream"], "/api/ws/detect");
}

#[tokio::test]
async fn test_status_reports_limits_and_counters() {
    let response = mock_app().oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["detector"]["name"], "mock");
    assert_eq!(body["detector"]["ready"], true);
    assert_eq!(body["detector"]["classes"].as_array().unwrap().len(), 6);
    assert_eq!(body["connections"]["active"], 0);
    assert_eq!(body["pool"]["workers"], 2);
    assert_eq!(body["limits"]["max_connections"], 8);
    assert_eq!(body["limits"]["max_payload_bytes"], 64 * 1024);
}

#[tokio::test]
async fn test_status_unhealthy_without_detector() {
    let state = test_state(test_limits(), test_settings(), Arc::new(UnavailableDetector));
    let response = app(state, &[]).oneshot(get("/api/health")).await.unwrap();

    let body = body_json(response).await;
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["detector"]["ready"], false);
}

#[tokio::test]
async fn test_metrics_exposition() {
    let response = mock_app().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain; charset=utf-8"
    );

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("ppe_up 1"));
    assert!(text.contains("ppe_detector_ready 1"));
    assert!(text.contains("ppe_connections_active 0"));
    assert!(text.contains("ppe_pool_queued 0"));
}

#[tokio::test]
async fn test_detect_success() {
    let response = mock_app()
        .oneshot(post_json("/api/detect", json!({"image": png_base64(), "confidence": 0.6})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["ppe_status"]["casco"], true);
    assert_eq!(body["ppe_status"]["botas"], false);
    assert_eq!(body["is_compliant"], false);
    assert_eq!(body["has_person"], true);
    assert_eq!(body["detections"][0]["class"], "casco");
    assert!(body["processing_time"].as_f64().unwrap() >= 0.0);
}

#[tokio::test]
async fn test_detect_without_person_is_compliant() {
    let detector = MockDetector::fixed(RawDetections {
        detections: vec![RawDetection {
            label: "hardhat".to_string(),
            confidence: 0.95,
            bbox: [0.0, 0.0, 5.0, 5.0],
        }],
        person_present: Some(false),
    });
    let state = test_state(test_limits(), test_settings(), Arc::new(detector));
    let response = app(state, &[])
        .oneshot(post_json("/api/detect", json!({"image": png_base64()})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["has_person"], false);
    assert_eq!(body["is_compliant"], true);
    assert!(body["detections"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_detect_accepts_data_url() {
    let image = format!("data:image/png;base64,{}", png_base64());
    let response = mock_app()
        .oneshot(post_json("/api/detect", json!({"image": image})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_detect_rejects_invalid_base64() {
    let response = mock_app()
        .oneshot(post_json("/api/detect", json!({"image": "not-base64"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "decode_failure");
}

#[tokio::test]
async fn test_detect_rejects_oversized_payload() {
    let image = "A".repeat(64 * 1024 + 1);
    let response = mock_app()
        .oneshot(post_json("/api/detect", json!({"image": image})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "payload_too_large");
}

/// Base64 PNG whose encoded form is exactly `encoded_len` characters.
fn png_base64_of_len(encoded_len: usize) -> String {
    let mut bytes = png_bytes();
    bytes.resize(encoded_len / 4 * 3, 0);
    let encoded = STANDARD.encode(bytes);
    assert_eq!(encoded.len(), encoded_len);
    encoded
}

fn large_payload_app() -> Router {
    let mut limits = test_limits();
    limits.max_payload_bytes = 4 * 1024 * 1024;
    let state = test_state(limits, test_settings(), Arc::new(MockDetector::echo()));
    app(state, &[])
}

#[tokio::test]
async fn test_detect_accepts_image_at_configured_limit() {
    // well above the framework's default body limit
    let image = png_base64_of_len(4 * 1024 * 1024);
    let response = large_payload_app()
        .oneshot(post_json("/api/detect", json!({"image": image})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["has_person"], true);
}

#[tokio::test]
async fn test_detect_rejects_image_above_configured_limit() {
    let image = png_base64_of_len(4 * 1024 * 1024 + 4);
    let response = large_payload_app()
        .oneshot(post_json("/api/detect", json!({"image": image})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "payload_too_large");
}

#[tokio::test]
async fn test_detect_body_over_message_limit_is_payload_too_large() {
    let image = "A".repeat(1024 * 1024);
    let body = json!({"image": image}).to_string();
    let request = Request::builder()
        .method("POST")
        .uri("/api/detect")
        .header("content-type", "application/json")
        .header("content-length", body.len())
        .body(Body::from(body.clone()))
        .unwrap();

    let response = mock_app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let json = body_json(response).await;
    assert_eq!(json["error"]["type"], "payload_too_large");
    let message = json["error"]["message"].as_str().unwrap();
    assert!(message.contains(&body.len().to_string()), "{}", message);
    assert!(message.contains("65536"), "{}", message);
}

#[tokio::test]
async fn test_detect_rejects_malformed_body() {
    let response = mock_app()
        .oneshot(post_json("/api/detect", json!({"picture": "abc"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "malformed_message");
}

#[tokio::test]
async fn test_detect_rejects_out_of_range_confidence() {
    let response = mock_app()
        .oneshot(post_json("/api/detect", json!({"image": png_base64(), "confidence": 3.0})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "malformed_message");
}

#[tokio::test]
async fn test_detect_without_detector() {
    let state = test_state(test_limits(), test_settings(), Arc::new(UnavailableDetector));
    let response = app(state, &[])
        .oneshot(post_json("/api/detect", json!({"image": png_base64()})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "service_unavailable");
}

#[tokio::test]
async fn test_detect_reports_detector_failure() {
    let state = test_state(
        test_limits(),
        test_settings(),
        Arc::new(MockDetector::failing("weights not loaded")),
    );
    let response = app(state, &[])
        .oneshot(post_json("/api/detect", json!({"image": png_base64()})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "detection_failure");
    assert!(body["error"]["message"].as_str().unwrap().contains("weights not loaded"));
}

#[tokio::test]
async fn test_detect_times_out() {
    let mut settings = test_settings();
    settings.request_timeout = Duration::from_millis(50);
    let state = test_state(
        test_limits(),
        settings,
        Arc::new(MockDetector::echo().with_delay(Duration::from_millis(500))),
    );
    let response = app(state, &[])
        .oneshot(post_json("/api/detect", json!({"image": png_base64()})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "detection_timeout");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_detect_through_model_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/detect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "detections": [
                {"class": "Hardhat", "confidence": 0.9, "bbox": [0, 0, 10, 10]},
                {"class": "safety vest", "confidence": 0.2, "bbox": [0, 10, 10, 30]}
            ],
            "person_detected": true
        })))
        .mount(&server)
        .await;

    let detector =
        HttpDetector::new(format!("{}/detect", server.uri()), Duration::from_secs(5)).unwrap();
    let engine = DetectionEngine::new(Arc::new(detector), ClassTable::default());
    let limiter = ResourceLimiter::new(test_limits()).unwrap();
    let state = Arc::new(AppState::new(limiter, engine, test_settings()));

    let response = app(state, &[])
        .oneshot(post_json("/api/detect", json!({"image": png_base64(), "confidence": 0.5})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["ppe_status"]["casco"], true);
    // below the requested confidence
    assert_eq!(body["ppe_status"]["ropa"], false);
    assert_eq!(body["detections"].as_array().unwrap().len(), 1);
}
