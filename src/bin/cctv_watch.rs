//! cctv_watch - headless traffic camera viewer with live detection overlays
//!
//! This binary:
//! 1. Clicks the map at the given point (or a region preset)
//! 2. Discovers registry cameras around it
//! 3. Selects one and attaches a local stand-in for its video
//! 4. Logs the single-shot and streaming overlays until Ctrl-C or the deadline

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::ops::ControlFlow;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cctv_live_detect::{
    CameraRegistryClient, ControllerOptions, FrameCaptureClient, FrameSize, GeoPoint,
    HttpDetectionService, LiveDetectConfig, LocalFrames, LocalPlayer, MapSelectionController,
    Region, RenderedBox, ViewEvent, WsTransport,
};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Find traffic cameras near a point and watch live detections"
)]
struct Args {
    /// Latitude of the map click (requires --lng).
    #[arg(long, requires = "lng", allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Longitude of the map click (requires --lat).
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lng: Option<f64>,

    /// Region preset: west, south or east.
    #[arg(long, env = "CCTV_REGION", conflicts_with_all = ["lat", "lng"])]
    region: Option<String>,

    /// Marker id to select once cameras are discovered.
    #[arg(long, default_value_t = 0)]
    camera: usize,

    /// Local video stand-in: stub://WIDTHxHEIGHT or a still image path.
    #[arg(long, env = "CCTV_VIDEO", default_value = "stub://1920x1080")]
    video: String,

    /// Width the video element is rendered at.
    #[arg(long, default_value_t = 800)]
    rendered_width: u32,

    /// Height the video element is rendered at.
    #[arg(long, default_value_t = 450)]
    rendered_height: u32,

    /// Stop after this many seconds (runs until Ctrl-C when omitted).
    #[arg(long)]
    duration_secs: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = LiveDetectConfig::load()?;
    let point = click_point(&args, &config)?;
    let frames = LocalFrames::parse(&args.video)?;
    let rendered = FrameSize::new(args.rendered_width, args.rendered_height);
    if !rendered.is_known() {
        return Err(anyhow!("rendered size must be non-zero"));
    }

    let (tx, rx) = mpsc::channel();
    let mut controller = MapSelectionController::new(
        tx.clone(),
        Arc::new(CameraRegistryClient::new(config.registry_config())),
        FrameCaptureClient::new(
            Arc::new(HttpDetectionService::new(
                &config.detect_url,
                config.http_timeout,
            )),
            config.jpeg_quality,
        ),
        Box::new(WsTransport::new()),
        Box::new(LocalPlayer::new(frames, rendered)),
        ControllerOptions {
            margin_deg: config.margin_deg,
            stream_endpoint: config.stream_endpoint.clone(),
            stream_frame_size: config.stream_frame_size,
        },
    );

    let teardown_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = teardown_tx.send(ViewEvent::Teardown);
    })
    .context("install Ctrl-C handler")?;

    log::info!(
        "cctv_watch: registry {}, detect {}, stream {}",
        config.registry.url,
        config.detect_url,
        config.stream_endpoint
    );
    let _ = controller.handle(ViewEvent::MapClicked(point));

    let deadline = args
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut requested_selection = false;
    let mut last_capture: Vec<RenderedBox> = Vec::new();
    let mut last_stream: Vec<RenderedBox> = Vec::new();

    loop {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            log::info!("duration elapsed, shutting down");
            let _ = controller.handle(ViewEvent::Teardown);
            break;
        }
        if let ControlFlow::Break(()) = controller.pump(&rx, POLL_INTERVAL) {
            log::info!("shutdown requested");
            break;
        }

        if !requested_selection && !controller.markers().is_empty() {
            requested_selection = true;
            if controller.markers().iter().any(|c| c.id == args.camera) {
                let _ = tx.send(ViewEvent::MarkerSelected(args.camera));
            } else {
                log::warn!(
                    "camera {} not found; {} camera(s) available",
                    args.camera,
                    controller.markers().len()
                );
                for camera in controller.markers() {
                    log::info!("  [{}] {} {}", camera.id, camera.name, camera.position);
                }
            }
        }

        if controller.capture_overlay() != last_capture.as_slice() {
            last_capture = controller.capture_overlay().to_vec();
            log_overlay("single-shot", &last_capture);
        }
        if controller.stream_overlay() != last_stream.as_slice() {
            last_stream = controller.stream_overlay().to_vec();
            log_overlay("stream", &last_stream);
        }
    }
    Ok(())
}

fn click_point(args: &Args, config: &LiveDetectConfig) -> Result<GeoPoint> {
    if let (Some(lat), Some(lng)) = (args.lat, args.lng) {
        return GeoPoint::new(lat, lng).map_err(|e| anyhow!("invalid click point: {}", e));
    }
    match args.region.as_deref() {
        Some(name) => Region::from_name(name)
            .map(Region::point)
            .ok_or_else(|| anyhow!("unknown region '{}'; use west, south or east", name)),
        None => Ok(config.initial),
    }
}

fn log_overlay(kind: &str, boxes: &[RenderedBox]) {
    log::info!("{} overlay: {} box(es)", kind, boxes.len());
    for b in boxes {
        log::info!(
            "  {} at ({:.0}, {:.0}) {:.0}x{:.0}",
            b.caption(),
            b.x1,
            b.y1,
            b.width(),
            b.height()
        );
    }
}
