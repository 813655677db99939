use anyhow::Result;
use serde_json::Value;
use std::io::{Cursor, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use detect_api::api::{ApiConfig, ApiHandle, ApiServer};
use detect_api::{adapter_with_backend, LabelMap, RawBoxes, StubBackend};

const BOUNDARY: &str = "detect-test-boundary";

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([40, 90, 160]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

fn multipart(field: &str, data: &[u8]) -> Vec<u8> {
    multipart_named(field, "frame.png", data)
}

fn multipart_named(field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// Two people and a car, in a 100x50 frame.
fn street_boxes() -> RawBoxes {
    let mut boxes = RawBoxes::default();
    boxes.push(0, 0.6, [10.0, 5.0, 30.0, 45.0]);
    boxes.push(2, 0.95, [50.0, 10.0, 90.0, 40.0]);
    boxes.push(0, 0.9, [60.0, 0.0, 80.0, 50.0]);
    boxes
}

fn read_response(stream: &mut TcpStream) -> Result<(String, Value)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = serde_json::from_str(parts.next().unwrap_or(""))?;
    Ok((headers, body))
}

fn send(addr: SocketAddr, head: &str, body: &[u8]) -> Result<(String, Value)> {
    let mut stream = TcpStream::connect(addr)?;
    stream.write_all(head.as_bytes())?;
    stream.write_all(body)?;
    read_response(&mut stream)
}

fn post_form(addr: SocketAddr, path: &str, body: &[u8]) -> Result<(String, Value)> {
    let head = format!(
        "POST {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: multipart/form-data; boundary={}\r\nContent-Length: {}\r\n\r\n",
        path,
        BOUNDARY,
        body.len()
    );
    send(addr, &head, body)
}

fn upload_png(addr: SocketAddr, path: &str) -> Result<(String, Value)> {
    post_form(addr, path, &multipart("image", &png(100, 50)))
}

struct TestApi {
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new(backend: StubBackend) -> Result<Self> {
        Self::with_config(backend, ApiConfig::default())
    }

    fn with_config(backend: StubBackend, cfg: ApiConfig) -> Result<Self> {
        let adapter = adapter_with_backend(backend, LabelMap::coco());
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            ..cfg
        };
        let api_handle = ApiServer::new(api_config, Arc::new(adapter)).spawn()?;
        Ok(Self {
            api_handle: Some(api_handle),
        })
    }

    fn addr(&self) -> SocketAddr {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
            .addr
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

#[test]
fn upload_lists_people_only() -> Result<()> {
    let api = TestApi::new(StubBackend::with_boxes(street_boxes()))?;

    let (headers, body) = upload_png(api.addr(), "/upload/")?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert!(headers.contains("Content-Type: application/json"));

    assert_eq!(body["count"], 2);
    let people = body["all_people"].as_array().unwrap();
    assert_eq!(people.len(), 2);
    assert!(people.iter().all(|p| p["class_name"] == "person"));
    // Original order is kept; the best box is the second person.
    assert_eq!(people[0]["confidence"], 0.6);
    assert_eq!(people[1]["confidence"], 0.9);
    assert_eq!(body["confidence"], 0.9);

    let position = &body["position"];
    assert_eq!(position["xyxy"]["x1"], 60.0);
    assert_eq!(position["xyxy"]["y2"], 50.0);
    assert_eq!(position["xywh"]["center_x"], 70.0);
    assert_eq!(position["xywh"]["width"], 20.0);
    assert_eq!(position["xyxyn"]["x2"], 0.8);
    assert_eq!(position["xywhn"]["height"], 1.0);
    Ok(())
}

#[test]
fn camera_route_matches_upload() -> Result<()> {
    let api = TestApi::new(StubBackend::with_boxes(street_boxes()))?;

    let (_, upload) = upload_png(api.addr(), "/upload/")?;
    let (headers, camera) = upload_png(api.addr(), "/camera")?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(upload, camera);
    Ok(())
}

#[test]
fn person_class_is_configurable() -> Result<()> {
    let cfg = ApiConfig {
        person_class_id: 2,
        ..ApiConfig::default()
    };
    let api = TestApi::with_config(StubBackend::with_boxes(street_boxes()), cfg)?;

    let (_, body) = upload_png(api.addr(), "/upload/")?;
    assert_eq!(body["count"], 1);
    assert_eq!(body["all_people"][0]["class_name"], "car");
    Ok(())
}

#[test]
fn no_detections_is_an_empty_success() -> Result<()> {
    let api = TestApi::new(StubBackend::new())?;

    let (headers, body) = upload_png(api.addr(), "/upload/")?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(body, serde_json::json!({ "count": 0, "all_people": [] }));

    // A runtime that reports no box data behaves the same.
    let api = TestApi::new(StubBackend::without_boxes())?;
    let (headers, body) = upload_png(api.addr(), "/")?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(body, serde_json::json!({ "count": 0, "all_people": [] }));
    Ok(())
}

#[test]
fn root_returns_classification_summary() -> Result<()> {
    let api = TestApi::new(StubBackend::with_boxes(street_boxes()))?;

    let (headers, body) = upload_png(api.addr(), "/")?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(body["classification"], "Class: car, Confidence: 0.95");
    assert_eq!(body["class_name"], "car");
    assert_eq!(body["confidence"], 0.95);
    assert_eq!(body["count"], 3);
    assert!(body.get("all_people").is_none());
    Ok(())
}

#[test]
fn detect_route_accepts_mode_and_class_names() -> Result<()> {
    let api = TestApi::new(StubBackend::with_boxes(street_boxes()))?;

    let (headers, body) = upload_png(api.addr(), "/detect?mode=summary&classes=car")?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(body["class_name"], "car");
    assert_eq!(body["count"], 1);

    let (_, body) = upload_png(api.addr(), "/detect?classes=person,2")?;
    assert_eq!(body["count"], 3);
    assert_eq!(body["all_people"].as_array().unwrap().len(), 3);

    let (headers, body) = upload_png(api.addr(), "/detect?mode=verbose")?;
    assert!(headers.starts_with("HTTP/1.1 400 Bad Request"));
    assert_eq!(body["kind"], "bad_request");

    let (headers, _) = upload_png(api.addr(), "/detect?classes=unicorn")?;
    assert!(headers.starts_with("HTTP/1.1 400 Bad Request"));
    Ok(())
}

#[test]
fn missing_image_is_rejected() -> Result<()> {
    let backend = StubBackend::with_boxes(street_boxes());
    let api = TestApi::new(backend)?;

    let (headers, body) = post_form(api.addr(), "/upload/", &multipart("video", &png(4, 4)))?;
    assert!(headers.starts_with("HTTP/1.1 400 Bad Request"));
    assert_eq!(body["kind"], "input_missing");
    assert_eq!(body["error"], "no image provided");

    let (headers, body) = post_form(api.addr(), "/upload/", &multipart("image", b""))?;
    assert!(headers.starts_with("HTTP/1.1 400 Bad Request"));
    assert_eq!(body["kind"], "input_missing");

    let head = "POST /upload/ HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n";
    let (headers, body) = send(api.addr(), head, b"{}")?;
    assert!(headers.starts_with("HTTP/1.1 400 Bad Request"));
    assert_eq!(body["kind"], "input_missing");
    Ok(())
}

#[test]
fn undecodable_image_is_a_server_error() -> Result<()> {
    let api = TestApi::new(StubBackend::with_boxes(street_boxes()))?;

    let (headers, body) = post_form(
        api.addr(),
        "/upload/",
        &multipart("image", b"definitely not a jpeg"),
    )?;
    assert!(headers.starts_with("HTTP/1.1 500 Internal Server Error"));
    assert_eq!(body["kind"], "decode_failure");
    Ok(())
}

#[test]
fn backend_failure_is_a_server_error() -> Result<()> {
    let api = TestApi::new(StubBackend::failing("model crashed"))?;

    let (headers, body) = upload_png(api.addr(), "/upload/")?;
    assert!(headers.starts_with("HTTP/1.1 500 Internal Server Error"));
    assert_eq!(body["kind"], "inference_failure");
    assert!(body["error"].as_str().unwrap().contains("model crashed"));
    Ok(())
}

#[test]
fn out_of_range_class_is_a_lookup_error() -> Result<()> {
    let mut boxes = RawBoxes::default();
    boxes.push(120, 0.7, [1.0, 1.0, 5.0, 5.0]);
    let api = TestApi::new(StubBackend::with_boxes(boxes))?;

    let (headers, body) = upload_png(api.addr(), "/")?;
    assert!(headers.starts_with("HTTP/1.1 500 Internal Server Error"));
    assert_eq!(body["kind"], "lookup_error");

    // Filtered out before lookup, so the person route still succeeds.
    let (headers, body) = upload_png(api.addr(), "/upload/")?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(body["count"], 0);
    Ok(())
}

#[test]
fn health_reports_backend() -> Result<()> {
    let api = TestApi::new(StubBackend::new())?;

    let (headers, body) = send(
        api.addr(),
        "GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n",
        b"",
    )?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "stub");
    Ok(())
}

#[test]
fn unknown_routes_and_methods_are_rejected() -> Result<()> {
    let api = TestApi::new(StubBackend::new())?;

    let (headers, body) = send(
        api.addr(),
        "GET /events HTTP/1.1\r\nHost: localhost\r\n\r\n",
        b"",
    )?;
    assert!(headers.starts_with("HTTP/1.1 404 Not Found"));
    assert_eq!(body["kind"], "not_found");

    let (headers, body) = send(
        api.addr(),
        "GET /upload/ HTTP/1.1\r\nHost: localhost\r\n\r\n",
        b"",
    )?;
    assert!(headers.starts_with("HTTP/1.1 405 Method Not Allowed"));
    assert_eq!(body["kind"], "method_not_allowed");

    let (headers, _) = send(
        api.addr(),
        "POST /upload/ HTTP/1.1\r\nHost: localhost\r\n\r\n",
        b"",
    )?;
    assert!(headers.starts_with("HTTP/1.1 411 Length Required"));
    Ok(())
}

#[test]
fn oversized_upload_is_rejected() -> Result<()> {
    let cfg = ApiConfig {
        max_upload_bytes: 256,
        ..ApiConfig::default()
    };
    let backend = StubBackend::with_boxes(street_boxes());
    let api = TestApi::with_config(backend, cfg)?;

    let body = multipart("image", &vec![0u8; 4096]);
    let (headers, body) = post_form(api.addr(), "/upload/", &body)?;
    assert!(headers.starts_with("HTTP/1.1 413 Payload Too Large"));
    assert_eq!(body["kind"], "payload_too_large");
    Ok(())
}

#[test]
fn filename_with_semicolon_still_uploads_the_image() -> Result<()> {
    let api = TestApi::new(StubBackend::with_boxes(street_boxes()))?;

    let body = multipart_named("image", "shot; name=x.png", &png(100, 50));
    let (headers, body) = post_form(api.addr(), "/upload/", &body)?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(body["count"], 2);
    Ok(())
}

#[test]
fn expect_continue_is_answered_before_the_body() -> Result<()> {
    let api = TestApi::new(StubBackend::with_boxes(street_boxes()))?;

    let body = multipart("image", &png(100, 50));
    let head = format!(
        "POST /upload/ HTTP/1.1\r\nHost: localhost\r\nContent-Type: multipart/form-data; boundary={}\r\nContent-Length: {}\r\nExpect: 100-continue\r\n\r\n",
        BOUNDARY,
        body.len()
    );
    let mut stream = TcpStream::connect(api.addr())?;
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    stream.write_all(head.as_bytes())?;

    let mut interim = [0u8; 25];
    stream.read_exact(&mut interim)?;
    assert_eq!(&interim, b"HTTP/1.1 100 Continue\r\n\r\n");

    stream.write_all(&body)?;
    let (headers, body) = read_response(&mut stream)?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(body["count"], 2);
    Ok(())
}
