use std::path::PathBuf;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use portsweep::scanner::Schedule;
use portsweep::server::{router, ServerConfig};
use serde_json::Value;
use tokio::net::TcpListener;
use tower::ServiceExt;

fn app() -> Router {
    router(ServerConfig {
        schedule: Schedule::default(),
        ui_dir: PathBuf::from("ui"),
        default_timeout_ms: 500,
    })
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn inverted_range_is_a_bad_request() {
    let resp = app()
        .oneshot(post_json(
            "/api/scan",
            serde_json::json!({ "targetIp": "127.0.0.1", "portRange": [200, 100], "protocol": "TCP" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(v["field"], "portRange");
}

#[tokio::test]
async fn bad_ip_is_rejected_on_stream_endpoint() {
    let req = Request::builder()
        .uri("/api/scan/stream?targetIp=999.1.1.1&startPort=1&endPort=10&protocol=TCP")
        .body(Body::empty())
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(v["field"], "targetIp");
}

#[tokio::test]
async fn sync_scan_returns_per_protocol_map() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let resp = app()
        .oneshot(post_json(
            "/api/scan",
            serde_json::json!({ "targetIp": "127.0.0.1", "portRange": [port, port], "protocol": "TCP" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(v["TCP"][port.to_string()], "Open");
    assert!(v.get("UDP").is_none());
}

#[tokio::test]
async fn sync_scan_with_export_format_returns_csv() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let resp = app()
        .oneshot(post_json(
            "/api/scan",
            serde_json::json!({
                "targetIp": "127.0.0.1",
                "portRange": [port, port],
                "protocol": "TCP",
                "exportFormat": "CSV"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/csv"));
    let body = body_string(resp).await;
    assert_eq!(body, format!("Protocol,Port,Status\nTCP,{port},Open\n"));
}

#[tokio::test]
async fn stream_emits_progress_until_completed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let uri = format!("/api/scan/stream?targetIp=127.0.0.1&portList={port}&protocol=TCP&timeout=300");
    let resp = app()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = body_string(resp).await;
    let events: Vec<Value> = body
        .lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .map(|d| serde_json::from_str(d).unwrap())
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["progress"]["status"], "scanning");
    let last = &events[1];
    assert_eq!(last["progress"]["status"], "completed");
    assert_eq!(last["progress"]["scanned"], last["progress"]["total"]);
    assert_eq!(last["results"]["TCP"][port.to_string()], "Open");
    assert_eq!(last["summary"]["counts"]["open"], 1);
}

#[tokio::test]
async fn export_endpoint_renders_csv_attachment() {
    let resp = app()
        .oneshot(post_json(
            "/api/export",
            serde_json::json!({
                "results": { "TCP": { "443": "Open", "22": "Closed" }, "UDP": { "53": "Open|Filtered" } },
                "format": "CSV"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let disposition = resp.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.contains("scan-results.csv"));
    let body = body_string(resp).await;
    assert_eq!(
        body,
        "Protocol,Port,Status\nTCP,22,Closed\nTCP,443,Open\nUDP,53,Open|Filtered\n"
    );
}

#[tokio::test]
async fn export_rejects_unknown_format() {
    let resp = app()
        .oneshot(post_json(
            "/api/export",
            serde_json::json!({ "results": {}, "format": "XML" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn metadata_endpoints() {
    let resp = app()
        .oneshot(Request::builder().uri("/api/port-groups").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let groups: Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert!(groups
        .as_array()
        .unwrap()
        .iter()
        .any(|g| g["name"] == "HTTP/HTTPS" && g["ports"] == serde_json::json!([80, 443])));

    let resp = app()
        .oneshot(Request::builder().uri("/api/services/udp/53").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let svc: Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(svc["name"], "domain");

    let resp = app()
        .oneshot(Request::builder().uri("/api/services/tcp/4").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn non_numeric_start_port_names_the_field() {
    let req = Request::builder()
        .uri("/api/scan/stream?targetIp=127.0.0.1&startPort=abc&endPort=10")
        .body(Body::empty())
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(v["field"], "startPort");
    assert!(v["error"].as_str().unwrap().contains("invalid digit"));
}

#[tokio::test]
async fn negative_timeout_is_a_bad_request() {
    let resp = app()
        .oneshot(post_json(
            "/api/scan",
            serde_json::json!({ "targetIp": "127.0.0.1", "portRange": [1, 10], "timeout": -5 }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(v["field"], "timeout");
}

#[tokio::test]
async fn missing_target_ip_in_body_names_the_field() {
    let resp = app()
        .oneshot(post_json("/api/scan", serde_json::json!({ "portRange": [1, 10] })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(v["field"], "targetIp");
}

#[tokio::test]
async fn end_port_without_start_port_is_rejected() {
    let req = Request::builder()
        .uri("/api/scan/stream?targetIp=127.0.0.1&endPort=10")
        .body(Body::empty())
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(v["field"], "startPort");
}
