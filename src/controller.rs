//! Map selection and live view orchestration.
//!
//! The controller owns all view state and is driven by one event loop. Work
//! that blocks (registry lookups, the single-shot detection call, streaming
//! connections) runs on worker threads that report back by posting a
//! [`ViewEvent`] into the same channel. Every completion carries the tag of the
//! request that started it: a click sequence for discovery, an attachment id
//! for capture and metadata, a generation for sessions. Completions whose tag
//! is no longer current are dropped, so rapid clicking never shows stale
//! results.

use std::ops::ControlFlow;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use crate::capture::FrameCaptureClient;
use crate::error::{LiveDetectError, Result};
use crate::geo::{build_query, BoundingBoxQuery, GeoPoint};
use crate::overlay::{map_boxes, DetectionBox, FrameSize, RenderedBox};
use crate::registry::{discover_or_empty, CameraDescriptor, CameraDiscovery};
use crate::session::{
    DetectionSessionManager, EventOutcome, SessionEvent, SessionState, SessionTransport,
};
use crate::video::{VideoPlayer, VideoSource};

/// Everything that can happen to the view.
#[derive(Debug)]
pub enum ViewEvent {
    /// User clicked the map.
    MapClicked(GeoPoint),
    /// User picked the marker with this id.
    MarkerSelected(usize),
    DiscoveryCompleted {
        seq: u64,
        cameras: Vec<CameraDescriptor>,
    },
    CaptureCompleted {
        attachment: u64,
        native: FrameSize,
        result: Result<Vec<DetectionBox>>,
    },
    /// The video with this attachment id reported its native resolution.
    MetadataLoaded { attachment: u64, native: FrameSize },
    /// The video element was laid out at a new size.
    Resized(FrameSize),
    Session(SessionEvent),
    Teardown,
}

/// Tunables for [`MapSelectionController`].
#[derive(Clone, Debug)]
pub struct ControllerOptions {
    pub margin_deg: f64,
    pub stream_endpoint: String,
    /// Pixel space of streamed boxes when the service reports in a fixed
    /// inference resolution instead of the video's native one.
    pub stream_frame_size: Option<FrameSize>,
}

pub struct MapSelectionController {
    tx: Sender<ViewEvent>,
    discovery: Arc<dyn CameraDiscovery>,
    capture: FrameCaptureClient,
    sessions: DetectionSessionManager,
    player: Box<dyn VideoPlayer>,
    margin_deg: f64,
    stream_frame_size: Option<FrameSize>,

    click_seq: u64,
    coordinates: Option<GeoPoint>,
    last_query: Option<BoundingBoxQuery>,
    markers: Vec<CameraDescriptor>,
    selected: Option<CameraDescriptor>,

    source: Option<Box<dyn VideoSource>>,
    attachment: u64,
    capture_pending: bool,
    native: Option<FrameSize>,
    rendered: FrameSize,

    capture_detections: Option<(FrameSize, Vec<DetectionBox>)>,
    capture_overlay: Vec<RenderedBox>,
    stream_overlay: Vec<RenderedBox>,
}

impl MapSelectionController {
    /// `tx` must feed the receiver the caller pumps with [`handle`](Self::handle).
    pub fn new(
        tx: Sender<ViewEvent>,
        discovery: Arc<dyn CameraDiscovery>,
        capture: FrameCaptureClient,
        transport: Box<dyn SessionTransport>,
        player: Box<dyn VideoPlayer>,
        options: ControllerOptions,
    ) -> Self {
        let session_tx = tx.clone();
        let sessions = DetectionSessionManager::new(
            options.stream_endpoint,
            transport,
            Arc::new(move |event| {
                let _ = session_tx.send(ViewEvent::Session(event));
            }),
        );
        Self {
            tx,
            discovery,
            capture,
            sessions,
            player,
            margin_deg: options.margin_deg,
            stream_frame_size: options.stream_frame_size,
            click_seq: 0,
            coordinates: None,
            last_query: None,
            markers: Vec::new(),
            selected: None,
            source: None,
            attachment: 0,
            capture_pending: false,
            native: None,
            rendered: FrameSize::new(0, 0),
            capture_detections: None,
            capture_overlay: Vec::new(),
            stream_overlay: Vec::new(),
        }
    }

    /// Sender for posting events into this controller's loop.
    pub fn sender(&self) -> Sender<ViewEvent> {
        self.tx.clone()
    }

    /// Wait up to `timeout` for one event and handle it.
    pub fn pump(&mut self, rx: &Receiver<ViewEvent>, timeout: Duration) -> ControlFlow<()> {
        match rx.recv_timeout(timeout) {
            Ok(event) => self.handle(event),
            Err(RecvTimeoutError::Timeout) => ControlFlow::Continue(()),
            Err(RecvTimeoutError::Disconnected) => {
                self.teardown();
                ControlFlow::Break(())
            }
        }
    }

    pub fn handle(&mut self, event: ViewEvent) -> ControlFlow<()> {
        match event {
            ViewEvent::MapClicked(point) => self.on_map_clicked(point),
            ViewEvent::MarkerSelected(id) => self.on_marker_selected(id),
            ViewEvent::DiscoveryCompleted { seq, cameras } => {
                self.on_discovery_completed(seq, cameras)
            }
            ViewEvent::CaptureCompleted {
                attachment,
                native,
                result,
            } => self.on_capture_completed(attachment, native, result),
            ViewEvent::MetadataLoaded { attachment, native } => {
                self.on_metadata_loaded(attachment, native)
            }
            ViewEvent::Resized(rendered) => {
                self.rendered = rendered;
                self.remap_overlays();
            }
            ViewEvent::Session(event) => {
                match self.sessions.handle_event(event) {
                    EventOutcome::DetectionsUpdated | EventOutcome::Ended => self.remap_stream(),
                    EventOutcome::Connected
                    | EventOutcome::MessageDropped
                    | EventOutcome::Stale => {}
                }
            }
            ViewEvent::Teardown => {
                self.teardown();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Clicked point, rounded for display.
    pub fn coordinates(&self) -> Option<GeoPoint> {
        self.coordinates
    }

    pub fn last_query(&self) -> Option<&BoundingBoxQuery> {
        self.last_query.as_ref()
    }

    pub fn markers(&self) -> &[CameraDescriptor] {
        &self.markers
    }

    pub fn selected(&self) -> Option<&CameraDescriptor> {
        self.selected.as_ref()
    }

    /// Id of the currently attached video source (0 before the first).
    pub fn attachment(&self) -> u64 {
        self.attachment
    }

    pub fn capture_overlay(&self) -> &[RenderedBox] {
        &self.capture_overlay
    }

    pub fn stream_overlay(&self) -> &[RenderedBox] {
        &self.stream_overlay
    }

    pub fn session_state(&self) -> SessionState {
        self.sessions.state()
    }

    fn on_map_clicked(&mut self, point: GeoPoint) {
        self.click_seq += 1;
        let seq = self.click_seq;
        self.coordinates = Some(point.rounded());
        let query = build_query(point, self.margin_deg);
        self.last_query = Some(query);
        log::info!("map clicked at {} (lookup #{})", point.rounded(), seq);

        let discovery = Arc::clone(&self.discovery);
        let tx = self.tx.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("discovery-{}", seq))
            .spawn(move || {
                let cameras = discover_or_empty(discovery.as_ref(), &query);
                let _ = tx.send(ViewEvent::DiscoveryCompleted { seq, cameras });
            });
        if let Err(err) = spawned {
            log::warn!("could not start camera discovery: {}", err);
        }
    }

    fn on_discovery_completed(&mut self, seq: u64, cameras: Vec<CameraDescriptor>) {
        if seq != self.click_seq {
            log::debug!(
                "dropping discovery #{} ({} camera(s)); latest is #{}",
                seq,
                cameras.len(),
                self.click_seq
            );
            return;
        }
        log::info!("{} camera(s) near the selected point", cameras.len());
        self.markers = cameras;
    }

    fn on_marker_selected(&mut self, id: usize) {
        let Some(camera) = self.markers.iter().find(|c| c.id == id).cloned() else {
            log::warn!("ignoring selection of unknown marker {}", id);
            return;
        };
        log::info!("selected camera {} '{}'", camera.id, camera.name);

        // Detach before attaching so the old element never overlaps the new one.
        self.source = None;
        self.attachment += 1;
        self.native = None;
        self.capture_pending = false;
        self.capture_detections = None;
        self.capture_overlay.clear();
        self.stream_overlay.clear();

        match self.player.attach(&camera.stream_url) {
            Ok(source) => {
                self.native = source.native_size().filter(FrameSize::is_known);
                self.rendered = source.rendered_size();
                self.source = Some(source);
                if self.native.is_some() {
                    self.start_capture();
                } else {
                    self.capture_pending = true;
                }
            }
            Err(err) => log::warn!("could not attach video for {}: {:#}", camera.stream_url, err),
        }

        if let Err(err) = self.sessions.open(&camera.stream_url) {
            log::warn!("live detection unavailable for {}: {}", camera.name, err);
        }
        self.selected = Some(camera);
    }

    fn on_metadata_loaded(&mut self, attachment: u64, native: FrameSize) {
        if attachment != self.attachment || self.source.is_none() {
            log::debug!(
                "dropping metadata for detached video #{} (current #{})",
                attachment,
                self.attachment
            );
            return;
        }
        self.native = Some(native).filter(FrameSize::is_known);
        if self.capture_pending && self.native.is_some() {
            self.capture_pending = false;
            self.start_capture();
        }
        self.remap_overlays();
    }

    fn start_capture(&mut self) {
        let Some(source) = self.source.as_deref() else {
            return;
        };
        let frame = match self.capture.snapshot(source) {
            Ok(frame) => frame,
            Err(LiveDetectError::SizeUnknown) => {
                log::debug!("video size not known yet; capture deferred");
                self.capture_pending = true;
                return;
            }
            Err(err) => {
                log::warn!("snapshot failed: {}", err);
                return;
            }
        };

        let attachment = self.attachment;
        let service = self.capture.service();
        let tx = self.tx.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("capture-{}", attachment))
            .spawn(move || {
                let result = service.detect(&frame);
                let _ = tx.send(ViewEvent::CaptureCompleted {
                    attachment,
                    native: frame.native,
                    result,
                });
            });
        if let Err(err) = spawned {
            log::warn!("could not start detection request: {}", err);
        }
    }

    fn on_capture_completed(
        &mut self,
        attachment: u64,
        native: FrameSize,
        result: Result<Vec<DetectionBox>>,
    ) {
        if attachment != self.attachment || self.source.is_none() {
            log::debug!(
                "dropping capture result for detached video #{} (current #{})",
                attachment,
                self.attachment
            );
            return;
        }
        match result {
            Ok(detections) => {
                log::info!("single-shot detection: {} box(es)", detections.len());
                self.capture_detections = Some((native, detections));
                self.remap_capture();
            }
            Err(err) => log::warn!("single-shot detection failed, keeping overlay: {}", err),
        }
    }

    fn remap_overlays(&mut self) {
        self.remap_capture();
        self.remap_stream();
    }

    fn remap_capture(&mut self) {
        let Some((native, detections)) = &self.capture_detections else {
            return;
        };
        match map_boxes(detections, *native, self.rendered) {
            Ok(boxes) => self.capture_overlay = boxes,
            Err(err) => {
                log::debug!("capture overlay suppressed: {}", err);
                self.capture_overlay.clear();
            }
        }
    }

    fn remap_stream(&mut self) {
        let detections = self.sessions.detections();
        if detections.is_empty() {
            self.stream_overlay.clear();
            return;
        }
        let native = self.stream_frame_size.or(self.native).unwrap_or(FrameSize::new(0, 0));
        match map_boxes(detections, native, self.rendered) {
            Ok(boxes) => self.stream_overlay = boxes,
            Err(err) => {
                log::debug!("stream overlay suppressed: {}", err);
                self.stream_overlay.clear();
            }
        }
    }

    fn teardown(&mut self) {
        self.sessions.shutdown();
        if self.source.take().is_some() {
            log::info!("video detached");
        }
        self.capture_pending = false;
        self.capture_overlay.clear();
        self.stream_overlay.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{DetectionService, EncodedFrame};
    use crate::session::{OpenRequest, SessionEventKind};
    use crate::video::{LocalFrames, LocalPlayer};
    use image::RgbImage;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Mutex;

    const WAIT: Duration = Duration::from_secs(5);

    struct FixedRegistry;

    impl CameraDiscovery for FixedRegistry {
        fn discover(&self, query: &BoundingBoxQuery) -> Result<Vec<CameraDescriptor>> {
            let center = GeoPoint::new(
                (query.min_lat + query.max_lat) / 2.0,
                (query.min_lng + query.max_lng) / 2.0,
            )?;
            Ok(["A", "B"]
                .iter()
                .enumerate()
                .map(|(id, name)| CameraDescriptor {
                    id,
                    name: format!("{} near {:.2}", name, center.lat()),
                    address: String::new(),
                    position: center,
                    stream_url: format!("http://cctv/{}/live.m3u8", name),
                })
                .collect())
        }
    }

    struct CountingDetector(AtomicUsize);

    impl DetectionService for CountingDetector {
        fn detect(&self, _frame: &EncodedFrame) -> Result<Vec<DetectionBox>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![DetectionBox {
                class_label: "car".to_string(),
                confidence: 0.9,
                x1: 960.0,
                y1: 540.0,
                x2: 1920.0,
                y2: 1080.0,
            }])
        }
    }

    #[derive(Clone, Default)]
    struct RecordingTransport(Arc<Mutex<Vec<OpenRequest>>>);

    impl SessionTransport for RecordingTransport {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn open(&mut self, request: OpenRequest) -> Result<()> {
            self.0.lock().unwrap().push(request);
            Ok(())
        }
    }

    struct Harness {
        controller: MapSelectionController,
        rx: Receiver<ViewEvent>,
        transport: RecordingTransport,
        detector: Arc<CountingDetector>,
    }

    impl Harness {
        fn new(player: Box<dyn VideoPlayer>) -> Self {
            let (tx, rx) = mpsc::channel();
            let transport = RecordingTransport::default();
            let detector = Arc::new(CountingDetector(AtomicUsize::new(0)));
            let controller = MapSelectionController::new(
                tx,
                Arc::new(FixedRegistry),
                FrameCaptureClient::new(detector.clone(), 80),
                Box::new(transport.clone()),
                player,
                ControllerOptions {
                    margin_deg: 0.05,
                    stream_endpoint: "ws://localhost:8000/ws".to_string(),
                    stream_frame_size: None,
                },
            );
            Self {
                controller,
                rx,
                transport,
                detector,
            }
        }

        fn local() -> Self {
            Self::new(Box::new(LocalPlayer::new(
                LocalFrames::Synthetic(FrameSize::new(1920, 1080)),
                FrameSize::new(800, 450),
            )))
        }

        fn pump_until(&mut self, done: impl Fn(&MapSelectionController) -> bool) {
            while !done(&self.controller) {
                let event = self.rx.recv_timeout(WAIT).expect("event before timeout");
                let _ = self.controller.handle(event);
            }
        }

        fn request(&self, idx: usize) -> OpenRequest {
            self.transport.0.lock().unwrap()[idx].clone()
        }
    }

    fn detections_message(label: &str, x1: f32) -> SessionEventKind {
        SessionEventKind::Message(format!(
            r#"{{"detections": [{{"x1": {}, "y1": 0, "x2": 1920, "y2": 1080, "class": "{}", "confidence": 0.75}}]}}"#,
            x1, label
        ))
    }

    #[test]
    fn click_discovers_cameras_for_rounded_point() {
        let mut h = Harness::local();
        let point = GeoPoint::new(36.500004, 126.3).unwrap();
        let _ = h.controller.handle(ViewEvent::MapClicked(point));
        h.pump_until(|c| !c.markers().is_empty());

        assert_eq!(h.controller.markers().len(), 2);
        assert_eq!(h.controller.coordinates().unwrap().lat(), 36.5);
        let query = h.controller.last_query().unwrap();
        assert!(query.contains(&point));
    }

    #[test]
    fn older_discovery_results_are_dropped() {
        let mut h = Harness::local();
        let _ = h
            .controller
            .handle(ViewEvent::MapClicked(GeoPoint::new(35.0, 129.0).unwrap()));
        let _ = h
            .controller
            .handle(ViewEvent::MapClicked(GeoPoint::new(37.5, 127.0).unwrap()));

        // Both lookups report; only the second click's cameras may land.
        for _ in 0..2 {
            let event = h.rx.recv_timeout(WAIT).unwrap();
            let _ = h.controller.handle(event);
        }
        assert_eq!(h.controller.markers().len(), 2);
        assert!(h.controller.markers()[0].name.ends_with("37.50"));
    }

    #[test]
    fn selection_runs_single_shot_capture_and_opens_session() {
        let mut h = Harness::local();
        let _ = h
            .controller
            .handle(ViewEvent::MapClicked(GeoPoint::new(36.5, 126.3).unwrap()));
        h.pump_until(|c| !c.markers().is_empty());

        let _ = h.controller.handle(ViewEvent::MarkerSelected(0));
        assert_eq!(h.controller.attachment(), 1);
        assert_eq!(
            h.controller.session_state(),
            SessionState::Connecting {
                stream_url: "http://cctv/A/live.m3u8".to_string(),
                generation: 1
            }
        );

        h.pump_until(|c| !c.capture_overlay().is_empty());
        let overlay = h.controller.capture_overlay();
        assert_eq!(
            (overlay[0].x1, overlay[0].y1, overlay[0].x2, overlay[0].y2),
            (400.0, 225.0, 800.0, 450.0)
        );
        assert_eq!(overlay[0].caption(), "car (90%)");
        assert_eq!(h.detector.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_message_from_replaced_session_never_reaches_overlay() {
        let mut h = Harness::local();
        let _ = h
            .controller
            .handle(ViewEvent::MapClicked(GeoPoint::new(36.5, 126.3).unwrap()));
        h.pump_until(|c| !c.markers().is_empty());

        let _ = h.controller.handle(ViewEvent::MarkerSelected(0));
        let _ = h.controller.handle(ViewEvent::MarkerSelected(1));
        let first = h.request(0);
        let second = h.request(1);
        assert!(first.cancel.is_cancelled());
        assert_eq!(second.generation, 2);

        first.emit(detections_message("from-a", 0.0));
        second.emit(SessionEventKind::Opened);
        second.emit(detections_message("from-b", 960.0));

        h.pump_until(|c| !c.stream_overlay().is_empty());
        let overlay = h.controller.stream_overlay();
        assert_eq!(overlay.len(), 1);
        assert_eq!(overlay[0].class_label, "from-b");
        assert_eq!((overlay[0].x1, overlay[0].x2), (400.0, 800.0));

        // Drain the rest; the stale message must not replace B's overlay.
        while let Ok(event) = h.rx.try_recv() {
            let _ = h.controller.handle(event);
        }
        assert_eq!(h.controller.stream_overlay()[0].class_label, "from-b");
    }

    #[test]
    fn resize_remaps_both_overlays() {
        let mut h = Harness::local();
        let _ = h
            .controller
            .handle(ViewEvent::MapClicked(GeoPoint::new(36.5, 126.3).unwrap()));
        h.pump_until(|c| !c.markers().is_empty());
        let _ = h.controller.handle(ViewEvent::MarkerSelected(0));
        h.request(0).emit(detections_message("bus", 0.0));
        h.pump_until(|c| !c.capture_overlay().is_empty() && !c.stream_overlay().is_empty());

        let _ = h.controller.handle(ViewEvent::Resized(FrameSize::new(1920, 1080)));
        assert_eq!(h.controller.capture_overlay()[0].x1, 960.0);
        assert_eq!(h.controller.stream_overlay()[0].x2, 1920.0);
    }

    #[test]
    fn metadata_from_detached_video_is_ignored() {
        let mut h = Harness::local();
        let _ = h
            .controller
            .handle(ViewEvent::MapClicked(GeoPoint::new(36.5, 126.3).unwrap()));
        h.pump_until(|c| !c.markers().is_empty());

        let _ = h.controller.handle(ViewEvent::MarkerSelected(0));
        let _ = h.controller.handle(ViewEvent::MarkerSelected(1));
        assert_eq!(h.controller.attachment(), 2);

        // Camera A's element reports late, after B replaced it.
        let _ = h.controller.handle(ViewEvent::MetadataLoaded {
            attachment: 1,
            native: FrameSize::new(640, 360),
        });
        h.request(1).emit(detections_message("from-b", 960.0));
        h.pump_until(|c| !c.stream_overlay().is_empty());

        let overlay = h.controller.stream_overlay();
        assert_eq!((overlay[0].x1, overlay[0].x2), (400.0, 800.0));
    }

    fn injected_capture(attachment: u64, x1: f32) -> ViewEvent {
        ViewEvent::CaptureCompleted {
            attachment,
            native: FrameSize::new(1920, 1080),
            result: Ok(vec![DetectionBox {
                class_label: "bus".to_string(),
                confidence: 0.5,
                x1,
                y1: 0.0,
                x2: 1920.0,
                y2: 1080.0,
            }]),
        }
    }

    #[test]
    fn capture_for_superseded_attachment_is_dropped() {
        let mut h = Harness::local();
        let _ = h
            .controller
            .handle(ViewEvent::MapClicked(GeoPoint::new(36.5, 126.3).unwrap()));
        h.pump_until(|c| !c.markers().is_empty());
        let _ = h.controller.handle(ViewEvent::MarkerSelected(0));
        let _ = h.controller.handle(ViewEvent::MarkerSelected(1));
        h.pump_until(|c| !c.capture_overlay().is_empty());
        let before = h.controller.capture_overlay().to_vec();
        assert_eq!(before[0].class_label, "car");

        let _ = h.controller.handle(injected_capture(1, 0.0));
        assert_eq!(h.controller.capture_overlay(), before.as_slice());

        let _ = h.controller.handle(injected_capture(2, 0.0));
        assert_eq!(h.controller.capture_overlay()[0].class_label, "bus");
    }

    #[test]
    fn failed_capture_keeps_previous_overlay() {
        let mut h = Harness::local();
        let _ = h
            .controller
            .handle(ViewEvent::MapClicked(GeoPoint::new(36.5, 126.3).unwrap()));
        h.pump_until(|c| !c.markers().is_empty());
        let _ = h.controller.handle(ViewEvent::MarkerSelected(0));
        h.pump_until(|c| !c.capture_overlay().is_empty());
        let before = h.controller.capture_overlay().to_vec();

        let _ = h.controller.handle(ViewEvent::CaptureCompleted {
            attachment: 1,
            native: FrameSize::new(1920, 1080),
            result: Err(LiveDetectError::DetectionUnavailable(
                "connection refused".to_string(),
            )),
        });
        assert_eq!(h.controller.capture_overlay(), before.as_slice());
    }

    #[test]
    fn unknown_marker_is_ignored() {
        let mut h = Harness::local();
        let _ = h.controller.handle(ViewEvent::MarkerSelected(7));
        assert!(h.controller.selected().is_none());
        assert_eq!(h.controller.attachment(), 0);
        assert!(h.transport.0.lock().unwrap().is_empty());
    }

    struct LateMetadataSource {
        loaded: Arc<AtomicBool>,
    }

    impl VideoSource for LateMetadataSource {
        fn stream_url(&self) -> &str {
            "http://cctv/late/live.m3u8"
        }

        fn native_size(&self) -> Option<FrameSize> {
            self.loaded
                .load(Ordering::SeqCst)
                .then_some(FrameSize::new(1920, 1080))
        }

        fn rendered_size(&self) -> FrameSize {
            FrameSize::new(800, 450)
        }

        fn snapshot(&self) -> anyhow::Result<RgbImage> {
            Ok(RgbImage::new(1920, 1080))
        }
    }

    struct LatePlayer(Arc<AtomicBool>);

    impl VideoPlayer for LatePlayer {
        fn attach(&mut self, _stream_url: &str) -> anyhow::Result<Box<dyn VideoSource>> {
            Ok(Box::new(LateMetadataSource {
                loaded: Arc::clone(&self.0),
            }))
        }
    }

    #[test]
    fn capture_waits_for_metadata() {
        let loaded = Arc::new(AtomicBool::new(false));
        let mut h = Harness::new(Box::new(LatePlayer(Arc::clone(&loaded))));
        let _ = h
            .controller
            .handle(ViewEvent::MapClicked(GeoPoint::new(36.5, 126.3).unwrap()));
        h.pump_until(|c| !c.markers().is_empty());

        let _ = h.controller.handle(ViewEvent::MarkerSelected(0));
        assert!(h.rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(h.detector.0.load(Ordering::SeqCst), 0);

        loaded.store(true, Ordering::SeqCst);
        let _ = h
            .controller
            .handle(ViewEvent::MetadataLoaded {
                attachment: 1,
                native: FrameSize::new(1920, 1080),
            });
        h.pump_until(|c| !c.capture_overlay().is_empty());
        assert_eq!(h.detector.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn teardown_closes_session_and_stops_loop() {
        let mut h = Harness::local();
        let _ = h
            .controller
            .handle(ViewEvent::MapClicked(GeoPoint::new(36.5, 126.3).unwrap()));
        h.pump_until(|c| !c.markers().is_empty());
        let _ = h.controller.handle(ViewEvent::MarkerSelected(0));

        assert_eq!(h.controller.handle(ViewEvent::Teardown), ControlFlow::Break(()));
        assert_eq!(h.controller.session_state(), SessionState::Idle);
        assert!(h.request(0).cancel.is_cancelled());
    }
}
