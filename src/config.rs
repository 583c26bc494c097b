use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::capture::{DEFAULT_DETECT_URL, DEFAULT_JPEG_QUALITY};
use crate::geo::{default_initial_point, GeoPoint, DEFAULT_MARGIN_DEG};
use crate::overlay::FrameSize;
use crate::registry::{RegistryConfig, DEFAULT_REGISTRY_URL};
use crate::session::DEFAULT_STREAM_ENDPOINT;

const DEFAULT_ROAD_TYPE: &str = "its";
const DEFAULT_CCTV_TYPE: u32 = 1;
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Deserialize, Default)]
struct LiveDetectConfigFile {
    registry: Option<RegistryConfigFile>,
    detect_url: Option<String>,
    stream_endpoint: Option<String>,
    margin_deg: Option<f64>,
    jpeg_quality: Option<u8>,
    http_timeout_ms: Option<u64>,
    stream_frame_size: Option<FrameSize>,
    initial: Option<InitialPointFile>,
}

#[derive(Debug, Deserialize, Default)]
struct RegistryConfigFile {
    url: Option<String>,
    api_key: Option<String>,
    road_type: Option<String>,
    cctv_type: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct InitialPointFile {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Clone)]
pub struct LiveDetectConfig {
    pub registry: RegistrySettings,
    pub detect_url: String,
    pub stream_endpoint: String,
    pub margin_deg: f64,
    pub jpeg_quality: u8,
    pub http_timeout: Duration,
    pub stream_frame_size: Option<FrameSize>,
    pub initial: GeoPoint,
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub url: String,
    pub api_key: String,
    pub road_type: String,
    pub cctv_type: u32,
}

impl LiveDetectConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CCTV_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LiveDetectConfigFile) -> Result<Self> {
        let registry_file = file.registry.unwrap_or_default();
        let registry = RegistrySettings {
            url: registry_file
                .url
                .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string()),
            api_key: registry_file.api_key.unwrap_or_default(),
            road_type: registry_file
                .road_type
                .unwrap_or_else(|| DEFAULT_ROAD_TYPE.to_string()),
            cctv_type: registry_file.cctv_type.unwrap_or(DEFAULT_CCTV_TYPE),
        };
        let initial = match file.initial {
            Some(point) => GeoPoint::new(point.lat, point.lng)
                .map_err(|e| anyhow!("invalid initial point: {}", e))?,
            None => default_initial_point(),
        };
        Ok(Self {
            registry,
            detect_url: file
                .detect_url
                .unwrap_or_else(|| DEFAULT_DETECT_URL.to_string()),
            stream_endpoint: file
                .stream_endpoint
                .unwrap_or_else(|| DEFAULT_STREAM_ENDPOINT.to_string()),
            margin_deg: file.margin_deg.unwrap_or(DEFAULT_MARGIN_DEG),
            jpeg_quality: file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            http_timeout: Duration::from_millis(
                file.http_timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS),
            ),
            stream_frame_size: file.stream_frame_size,
            initial,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("CCTV_REGISTRY_URL") {
            if !url.trim().is_empty() {
                self.registry.url = url;
            }
        }
        if let Ok(key) = std::env::var("CCTV_API_KEY") {
            if !key.trim().is_empty() {
                self.registry.api_key = key;
            }
        }
        if let Ok(url) = std::env::var("CCTV_DETECT_URL") {
            if !url.trim().is_empty() {
                self.detect_url = url;
            }
        }
        if let Ok(endpoint) = std::env::var("CCTV_STREAM_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.stream_endpoint = endpoint;
            }
        }
        if let Ok(margin) = std::env::var("CCTV_MARGIN_DEG") {
            self.margin_deg = margin
                .trim()
                .parse()
                .map_err(|_| anyhow!("CCTV_MARGIN_DEG must be a number of degrees"))?;
        }
        if let Ok(timeout) = std::env::var("CCTV_HTTP_TIMEOUT_MS") {
            let millis: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("CCTV_HTTP_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.http_timeout = Duration::from_millis(millis);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.registry.api_key = self.registry.api_key.trim().to_string();
        if self.registry.api_key.is_empty() {
            return Err(anyhow!(
                "registry api key is required (set CCTV_API_KEY or registry.api_key)"
            ));
        }
        if !self.margin_deg.is_finite() || self.margin_deg <= 0.0 {
            return Err(anyhow!("margin_deg must be a positive number of degrees"));
        }
        require_scheme("registry url", &self.registry.url, &["http", "https"])?;
        require_scheme("detect url", &self.detect_url, &["http", "https"])?;
        require_scheme("stream endpoint", &self.stream_endpoint, &["ws"])?;
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be between 1 and 100"));
        }
        if self.http_timeout.is_zero() {
            return Err(anyhow!("http timeout must be greater than zero"));
        }
        if let Some(size) = self.stream_frame_size {
            if !size.is_known() {
                return Err(anyhow!("stream_frame_size must have non-zero dimensions"));
            }
        }
        Ok(())
    }

    /// Settings for [`crate::registry::CameraRegistryClient`].
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            url: self.registry.url.clone(),
            api_key: self.registry.api_key.clone(),
            road_type: self.registry.road_type.clone(),
            cctv_type: self.registry.cctv_type,
            timeout: self.http_timeout,
        }
    }
}

fn require_scheme(what: &str, value: &str, schemes: &[&str]) -> Result<()> {
    let url = Url::parse(value).map_err(|e| anyhow!("invalid {} '{}': {}", what, value, e))?;
    if !schemes.contains(&url.scheme()) {
        return Err(anyhow!(
            "{} '{}' must use {}",
            what,
            value,
            schemes.join(" or ")
        ));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<LiveDetectConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
