//! Traffic camera live detection
//!
//! This crate drives a map-centred traffic camera viewer: click a point, find
//! the registry's cameras around it, pick one, and watch object detections
//! drawn over its live video.
//!
//! # Architecture
//!
//! Two detection paths run against the selected camera:
//!
//! 1. **Single-shot**: when a video is attached, one frame is snapshotted,
//!    JPEG-encoded and POSTed to the detection endpoint.
//! 2. **Streaming**: a websocket session asks the streaming service to follow
//!    the camera URL and pushes detection batches as they are produced.
//!
//! Both produce boxes in the detector's pixel space, which are mapped onto the
//! rendered video element before display. Selecting another camera replaces
//! the session; a generation counter keeps late messages from the old camera
//! out of the new overlay.
//!
//! # Module Structure
//!
//! - `geo`: points, regions and registry bounding boxes
//! - `registry`: camera discovery against the CCTV registry
//! - `overlay`: detection boxes and native → rendered mapping
//! - `capture`: snapshot encoding and the single-shot detection call
//! - `session`: streaming sessions, transports and the generation guard
//! - `controller`: the event loop tying map, video and overlays together
//! - `video`: the video element boundary and local players
//! - `config`: file + environment configuration

pub mod capture;
pub mod config;
pub mod controller;
pub mod error;
pub mod geo;
pub mod overlay;
pub mod registry;
pub mod session;
pub mod video;

pub use capture::{
    encode_frame, DetectionService, EncodedFrame, FrameCaptureClient, HttpDetectionService,
};
pub use config::LiveDetectConfig;
pub use controller::{ControllerOptions, MapSelectionController, ViewEvent};
pub use error::{LiveDetectError, Result};
pub use geo::{build_query, BoundingBoxQuery, GeoPoint, Region};
pub use overlay::{map_box, map_boxes, DetectionBox, FrameSize, RenderedBox};
pub use registry::{
    discover_or_empty, CameraDescriptor, CameraDiscovery, CameraRegistryClient, RegistryConfig,
};
pub use session::{
    CancelToken, DetectionSessionManager, DetectionSnapshot, SessionHandle, SessionState,
    SessionTransport, WsTransport,
};
pub use video::{LocalFrames, LocalPlayer, VideoPlayer, VideoSource};
