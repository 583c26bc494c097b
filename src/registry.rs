//! Camera registry discovery.
//!
//! One GET per map click against the national ITS CCTV registry. Failures are
//! expected (flaky upstream, offline laptop) and never crash the caller:
//! [`discover_or_empty`] turns every error into "no cameras found".

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::error::{LiveDetectError, Result};
use crate::geo::{BoundingBoxQuery, GeoPoint};

/// Default ITS CCTV registry endpoint.
pub const DEFAULT_REGISTRY_URL: &str = "https://openapi.its.go.kr:9443/cctvInfo";

/// A camera returned by discovery.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraDescriptor {
    /// Position in the discovery result; doubles as the marker id.
    pub id: usize,
    pub name: String,
    pub address: String,
    pub position: GeoPoint,
    pub stream_url: String,
}

/// Source of camera descriptors for a bounding box.
pub trait CameraDiscovery: Send + Sync {
    fn discover(&self, query: &BoundingBoxQuery) -> Result<Vec<CameraDescriptor>>;
}

/// Discover cameras, degrading every failure to an empty list.
pub fn discover_or_empty(
    discovery: &dyn CameraDiscovery,
    query: &BoundingBoxQuery,
) -> Vec<CameraDescriptor> {
    match discovery.discover(query) {
        Ok(cameras) => cameras,
        Err(err) => {
            log::warn!("camera discovery failed ({}): {}", err.kind(), err);
            Vec::new()
        }
    }
}

/// Registry connection settings.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    pub url: String,
    pub api_key: String,
    /// Road network selector (`its` highways, `ex` expressways).
    pub road_type: String,
    /// Stream kind selector; `1` is live HLS.
    pub cctv_type: u32,
    pub timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REGISTRY_URL.to_string(),
            api_key: String::new(),
            road_type: "its".to_string(),
            cctv_type: 1,
            timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP client for the CCTV registry.
pub struct CameraRegistryClient {
    config: RegistryConfig,
    agent: ureq::Agent,
}

impl CameraRegistryClient {
    pub fn new(config: RegistryConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self { config, agent }
    }

    /// Query parameters in the order the registry documents them.
    pub fn query_params(&self, query: &BoundingBoxQuery) -> Vec<(&'static str, String)> {
        vec![
            ("apiKey", self.config.api_key.clone()),
            ("type", self.config.road_type.clone()),
            ("cctvType", self.config.cctv_type.to_string()),
            ("minX", format_coord(query.min_lng)),
            ("maxX", format_coord(query.max_lng)),
            ("minY", format_coord(query.min_lat)),
            ("maxY", format_coord(query.max_lat)),
            ("getType", "json".to_string()),
        ]
    }
}

impl CameraDiscovery for CameraRegistryClient {
    fn discover(&self, query: &BoundingBoxQuery) -> Result<Vec<CameraDescriptor>> {
        let mut request = self.agent.get(&self.config.url);
        for (key, value) in self.query_params(query) {
            request = request.query(key, &value);
        }
        let response = request.call().map_err(|err| match err {
            ureq::Error::Status(code, _) => {
                LiveDetectError::RegistryUnavailable(format!("registry returned HTTP {}", code))
            }
            ureq::Error::Transport(transport) => {
                LiveDetectError::RegistryUnavailable(transport.to_string())
            }
        })?;
        let body = response.into_string().map_err(|e| {
            LiveDetectError::RegistryUnavailable(format!("read registry response: {}", e))
        })?;
        let cameras = parse_registry_response(body.as_bytes())?;
        for camera in cameras.iter().filter(|c| !query.contains(&c.position)) {
            log::debug!(
                "registry camera '{}' at {} lies outside the requested box",
                camera.name,
                camera.position
            );
        }
        log::info!(
            "registry returned {} camera(s) for lat [{}, {}] lng [{}, {}]",
            cameras.len(),
            query.min_lat,
            query.max_lat,
            query.min_lng,
            query.max_lng
        );
        Ok(cameras)
    }
}

fn format_coord(value: f64) -> String {
    let text = format!("{:.5}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

#[derive(Debug, Deserialize)]
struct RegistryEnvelope {
    response: Option<RegistryBody>,
}

#[derive(Debug, Deserialize)]
struct RegistryBody {
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawCamera {
    #[serde(default)]
    cctvname: Option<String>,
    #[serde(default)]
    cctvaddress: Option<String>,
    #[serde(default)]
    cctvurl: Option<String>,
    #[serde(default)]
    coordx: Option<Value>,
    #[serde(default)]
    coordy: Option<Value>,
}

/// Parse a registry payload into descriptors.
///
/// The envelope must carry `response.data` (an array, or a lone object for a
/// single hit). Records without a stream URL or usable coordinates are skipped.
pub fn parse_registry_response(payload: &[u8]) -> Result<Vec<CameraDescriptor>> {
    let envelope: RegistryEnvelope = serde_json::from_slice(payload)
        .map_err(|e| LiveDetectError::RegistryMalformedResponse(format!("parse error: {}", e)))?;
    let data = envelope
        .response
        .and_then(|body| body.data)
        .ok_or_else(|| {
            LiveDetectError::RegistryMalformedResponse("missing response.data".to_string())
        })?;

    let records = match data {
        Value::Array(items) => items,
        Value::Object(_) => vec![data],
        Value::Null => Vec::new(),
        other => {
            return Err(LiveDetectError::RegistryMalformedResponse(format!(
                "response.data is {}, expected a list",
                json_kind(&other)
            )))
        }
    };

    let mut cameras = Vec::with_capacity(records.len());
    for (idx, record) in records.into_iter().enumerate() {
        let raw: RawCamera = match serde_json::from_value(record) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("skipping camera record {}: {}", idx, e);
                continue;
            }
        };
        match camera_from_raw(cameras.len(), raw) {
            Ok(camera) => cameras.push(camera),
            Err(reason) => log::warn!("skipping camera record {}: {}", idx, reason),
        }
    }
    Ok(cameras)
}

fn camera_from_raw(id: usize, raw: RawCamera) -> std::result::Result<CameraDescriptor, String> {
    let stream_url = raw
        .cctvurl
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| "missing cctvurl".to_string())?;
    let lng = coord_value(raw.coordx.as_ref()).ok_or_else(|| "missing coordx".to_string())?;
    let lat = coord_value(raw.coordy.as_ref()).ok_or_else(|| "missing coordy".to_string())?;
    let position = GeoPoint::new(lat, lng).map_err(|e| e.to_string())?;
    Ok(CameraDescriptor {
        id,
        name: raw.cctvname.unwrap_or_default().trim().to_string(),
        address: raw.cctvaddress.unwrap_or_default().trim().to_string(),
        position,
        stream_url,
    })
}

fn coord_value(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
