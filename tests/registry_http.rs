use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use cctv_live_detect::registry::{
    discover_or_empty, CameraDiscovery, CameraRegistryClient, RegistryConfig,
};
use cctv_live_detect::{build_query, GeoPoint, LiveDetectError};

/// Serve one canned HTTP response and report the request line.
fn serve_once(status: &str, body: &str) -> (String, mpsc::Receiver<String>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake registry");
    let url = format!("http://{}/cctvInfo", listener.local_addr().unwrap());
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let (tx, rx) = mpsc::channel();
    let handle = std::thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
        let mut request_line = String::new();
        reader.read_line(&mut request_line).expect("read request line");
        loop {
            let mut header = String::new();
            if reader.read_line(&mut header).expect("read header") == 0 || header == "\r\n" {
                break;
            }
        }
        let _ = tx.send(request_line.trim().to_string());
        let mut stream = stream;
        stream.write_all(response.as_bytes()).expect("write response");
    });
    (url, rx, handle)
}

fn client(url: String) -> CameraRegistryClient {
    CameraRegistryClient::new(RegistryConfig {
        url,
        api_key: "test-key".to_string(),
        timeout: Duration::from_secs(5),
        ..RegistryConfig::default()
    })
}

#[test]
fn discovers_cameras_inside_the_query_box() {
    let body = r#"{"response": {"datacount": 1, "data": [
        {"cctvname": "[서해안선] 서산", "cctvurl": "http://cctv.example/1/live.m3u8",
         "coordx": 126.2871, "coordy": 36.4721}
    ]}}"#;
    let (url, requests, server) = serve_once("200 OK", body);
    let query = build_query(GeoPoint::new(36.5, 126.3).unwrap(), 0.05);

    let cameras = client(url).discover(&query).expect("discover");
    server.join().unwrap();

    assert_eq!(cameras.len(), 1);
    assert_eq!(cameras[0].stream_url, "http://cctv.example/1/live.m3u8");
    assert!(query.contains(&cameras[0].position));

    let request_line = requests.recv().unwrap();
    assert!(request_line.starts_with("GET /cctvInfo?"));
    for param in [
        "apiKey=test-key",
        "type=its",
        "cctvType=1",
        "minX=126.25",
        "maxX=126.35",
        "minY=36.45",
        "maxY=36.55",
        "getType=json",
    ] {
        assert!(request_line.contains(param), "{} missing from {}", param, request_line);
    }
}

#[test]
fn http_error_yields_empty_camera_list() {
    let (url, _requests, server) = serve_once("500 Internal Server Error", "{}");
    let query = build_query(GeoPoint::new(36.5, 126.3).unwrap(), 0.05);
    let registry = client(url);

    assert!(discover_or_empty(&registry, &query).is_empty());
    server.join().unwrap();
}

#[test]
fn http_error_maps_to_registry_unavailable() {
    let (url, _requests, server) = serve_once("503 Service Unavailable", "");
    let query = build_query(GeoPoint::new(34.8, 128.0).unwrap(), 0.05);

    let err = client(url).discover(&query).unwrap_err();
    server.join().unwrap();
    assert!(matches!(err, LiveDetectError::RegistryUnavailable(ref msg) if msg.contains("503")));
}

#[test]
fn wrong_shape_maps_to_malformed_response() {
    let (url, _requests, server) = serve_once("200 OK", r#"{"header": {"resultCode": "30"}}"#);
    let query = build_query(GeoPoint::new(34.8, 128.0).unwrap(), 0.05);

    let err = client(url).discover(&query).unwrap_err();
    server.join().unwrap();
    assert!(matches!(err, LiveDetectError::RegistryMalformedResponse(_)));
}

#[test]
fn unreachable_registry_degrades_to_empty() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/cctvInfo", listener.local_addr().unwrap());
    drop(listener);
    let query = build_query(GeoPoint::new(37.5, 127.0).unwrap(), 0.05);

    assert!(discover_or_empty(&client(url), &query).is_empty());
}

#[test]
fn cameras_outside_the_box_are_kept() {
    let body = r#"{"response": {"data": [
        {"cctvname": "inside", "cctvurl": "http://cctv.example/1/live.m3u8",
         "coordx": 126.30, "coordy": 36.50},
        {"cctvname": "edge of tile", "cctvurl": "http://cctv.example/2/live.m3u8",
         "coordx": 126.90, "coordy": 36.50}
    ]}}"#;
    let (url, _requests, server) = serve_once("200 OK", body);
    let query = build_query(GeoPoint::new(36.5, 126.3).unwrap(), 0.05);

    let cameras = client(url).discover(&query).expect("discover");
    server.join().unwrap();

    assert_eq!(cameras.len(), 2);
    assert!(query.contains(&cameras[0].position));
    assert!(!query.contains(&cameras[1].position));
    assert_eq!(cameras[1].id, 1);
}
