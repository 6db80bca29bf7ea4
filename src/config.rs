use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WildcamConfig {
    pub camera: CameraConfig,
    pub motion: MotionConfig,
    pub recognition: RecognitionConfig,
    pub recording: RecordingConfig,
    pub catalog: CatalogConfig,
    pub http: HttpConfig,
}

/// Camera backend selected at construction time
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    /// V4L2 device through a GStreamer pipeline
    Gstreamer,
    /// Synthetic frames, no hardware required
    Mock,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Which frame source implementation to use
    #[serde(default = "default_camera_backend")]
    pub backend: CameraBackend,

    /// Camera device index (e.g., 0 for /dev/video0)
    #[serde(default = "default_camera_index")]
    pub index: u32,

    /// Main stream resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Low-resolution stream used for idle motion polling
    #[serde(default = "default_lores_resolution")]
    pub lores_resolution: (u32, u32),

    /// Frames per second requested from the sensor
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Upper bound on a single capture call
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,

    /// Mock backend only: draw a moving object into the synthetic scene
    #[serde(default = "default_mock_moving_object")]
    pub mock_moving_object: bool,
}

/// Motion detection algorithm selection
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MotionMode {
    Auto,
    Normal,
    LowLight,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MotionConfig {
    #[serde(default = "default_motion_mode")]
    pub mode: MotionMode,

    /// Fraction of full intensity a pixel must change by (normal mode)
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f32,

    /// Minimum connected changed area in pixels
    #[serde(default = "default_min_area")]
    pub min_area: u32,

    /// Box blur radius applied before differencing
    #[serde(default = "default_blur_radius")]
    pub blur_radius: u32,

    /// Dilation radius applied to the thresholded mask
    #[serde(default = "default_dilate_radius")]
    pub dilate_radius: u8,

    /// Weight of the current frame in the running background average
    #[serde(default = "default_background_alpha")]
    pub background_alpha: f32,

    /// Intensity standard deviation below which auto mode switches to low-light
    #[serde(default = "default_contrast_floor")]
    pub contrast_floor: f32,

    /// Fixed per-pixel difference threshold for low-light mode
    #[serde(default = "default_low_light_threshold")]
    pub low_light_threshold: u8,

    /// Changed-pixel fraction of the frame that counts as motion in low-light mode
    #[serde(default = "default_low_light_area_fraction")]
    pub low_light_area_fraction: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecognitionConfig {
    /// Run the recognizer during recordings
    #[serde(default = "default_recognition_enabled")]
    pub enabled: bool,

    /// Minimum confidence for a detection to be kept
    #[serde(default = "default_recognition_threshold")]
    pub threshold: f32,

    /// Labels containing any of these keywords are kept
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,

    /// Run recognition on every Nth frame
    #[serde(default = "default_recognition_stride")]
    pub stride: u32,
}

/// Video sink selected at construction time
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkBackend {
    /// H.264 in MP4 through GStreamer
    Gstreamer,
    /// Concatenated JPEG frames in a single .mjpeg file
    Mjpeg,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecordingConfig {
    /// Directory receiving recorded videos
    #[serde(default = "default_video_folder")]
    pub video_folder: String,

    #[serde(default = "default_sink_backend")]
    pub sink: SinkBackend,

    /// Hard cap on a single recording
    #[serde(default = "default_duration_limit_secs")]
    pub duration_limit_secs: f64,

    /// Stop after this long without motion or without detections
    #[serde(default = "default_motion_timeout_secs")]
    pub motion_timeout_secs: f64,

    /// Playback frame rate of recorded video and producer capture rate
    #[serde(default = "default_target_framerate")]
    pub target_framerate: f64,

    /// Run main-stream motion detection on every Nth frame
    #[serde(default = "default_motion_stride")]
    pub motion_stride: u32,

    /// Bounded frame queue between producer and session
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Consumer receive timeout when the queue is empty
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay between low-resolution polls while idle
    #[serde(default = "default_idle_poll_interval_ms")]
    pub idle_poll_interval_ms: u64,

    /// Producer wait on a full queue before dropping a frame
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// End the session when no frame arrives for this long
    #[serde(default = "default_starvation_timeout_secs")]
    pub starvation_timeout_secs: f64,

    /// Consecutive capture failures tolerated before aborting a phase
    #[serde(default = "default_capture_retry_limit")]
    pub capture_retry_limit: u32,

    /// Delay between capture retries
    #[serde(default = "default_capture_retry_backoff_ms")]
    pub capture_retry_backoff_ms: u64,

    /// Frame-time interval between catalog duration updates
    #[serde(default = "default_duration_update_interval_secs")]
    pub duration_update_interval_secs: f64,

    /// Draw detection boxes on recorded frames
    #[serde(default = "default_annotate")]
    pub annotate: bool,

    /// Draw capture timestamp on recorded frames
    #[serde(default = "default_timestamp_overlay")]
    pub timestamp_overlay: bool,

    /// TrueType font for labels and timestamps
    #[serde(default = "default_font_path")]
    pub font_path: String,

    #[serde(default = "default_font_size")]
    pub font_size: f32,

    /// Timezone for file names and timestamp overlay
    #[serde(default = "default_timestamp_timezone")]
    pub timestamp_timezone: String,
}

impl RecordingConfig {
    pub fn duration_limit(&self) -> Duration {
        Duration::from_secs_f64(self.duration_limit_secs)
    }

    pub fn motion_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.motion_timeout_secs)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_framerate)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CatalogConfig {
    /// SQLite database file
    #[serde(default = "default_catalog_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,

    /// IP address to bind to
    #[serde(default = "default_http_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl WildcamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("wildcam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.backend", "gstreamer")?
            .set_default("camera.index", default_camera_index())?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default(
                "camera.lores_resolution",
                vec![default_lores_resolution().0, default_lores_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.capture_timeout_ms", default_capture_timeout_ms())?
            .set_default("camera.mock_moving_object", default_mock_moving_object())?
            .set_default("motion.mode", "auto")?
            .set_default("motion.sensitivity", default_sensitivity() as f64)?
            .set_default("motion.min_area", default_min_area())?
            .set_default("motion.blur_radius", default_blur_radius())?
            .set_default("motion.dilate_radius", default_dilate_radius() as u32)?
            .set_default("motion.background_alpha", default_background_alpha() as f64)?
            .set_default("motion.contrast_floor", default_contrast_floor() as f64)?
            .set_default("motion.low_light_threshold", default_low_light_threshold() as u32)?
            .set_default(
                "motion.low_light_area_fraction",
                default_low_light_area_fraction() as f64,
            )?
            .set_default("recognition.enabled", default_recognition_enabled())?
            .set_default("recognition.threshold", default_recognition_threshold() as f64)?
            .set_default("recognition.keywords", default_keywords())?
            .set_default("recognition.stride", default_recognition_stride())?
            .set_default("recording.video_folder", default_video_folder())?
            .set_default("recording.sink", "gstreamer")?
            .set_default("recording.duration_limit_secs", default_duration_limit_secs())?
            .set_default("recording.motion_timeout_secs", default_motion_timeout_secs())?
            .set_default("recording.target_framerate", default_target_framerate())?
            .set_default("recording.motion_stride", default_motion_stride())?
            .set_default("recording.queue_capacity", default_queue_capacity() as i64)?
            .set_default("recording.poll_interval_ms", default_poll_interval_ms())?
            .set_default("recording.idle_poll_interval_ms", default_idle_poll_interval_ms())?
            .set_default("recording.send_timeout_ms", default_send_timeout_ms())?
            .set_default(
                "recording.starvation_timeout_secs",
                default_starvation_timeout_secs(),
            )?
            .set_default("recording.capture_retry_limit", default_capture_retry_limit())?
            .set_default(
                "recording.capture_retry_backoff_ms",
                default_capture_retry_backoff_ms(),
            )?
            .set_default(
                "recording.duration_update_interval_secs",
                default_duration_update_interval_secs(),
            )?
            .set_default("recording.annotate", default_annotate())?
            .set_default("recording.timestamp_overlay", default_timestamp_overlay())?
            .set_default("recording.font_path", default_font_path())?
            .set_default("recording.font_size", default_font_size() as f64)?
            .set_default("recording.timestamp_timezone", default_timestamp_timezone())?
            .set_default("catalog.path", default_catalog_path())?
            .set_default("http.enabled", default_http_enabled())?
            .set_default("http.ip", default_http_ip())?
            .set_default("http.port", default_http_port())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with WILDCAM_ prefix
            .add_source(Environment::with_prefix("WILDCAM").separator("_"))
            .build()?;

        let config: WildcamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::Message(msg.to_string()));

        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return fail("Camera resolution must be greater than 0");
        }

        if self.camera.lores_resolution.0 == 0 || self.camera.lores_resolution.1 == 0 {
            return fail("Camera lores_resolution must be greater than 0");
        }

        if self.camera.fps == 0 {
            return fail("Camera fps must be greater than 0");
        }

        if !(self.motion.sensitivity > 0.0 && self.motion.sensitivity <= 1.0) {
            return fail("Motion sensitivity must be in (0, 1]");
        }

        if !(self.motion.background_alpha > 0.0 && self.motion.background_alpha <= 1.0) {
            return fail("Motion background_alpha must be in (0, 1]");
        }

        if self.recognition.stride == 0 {
            return fail("Recognition stride must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.recognition.threshold) {
            return fail("Recognition threshold must be in [0, 1]");
        }

        if self.recording.motion_stride == 0 {
            return fail("Recording motion_stride must be greater than 0");
        }

        if self.recording.target_framerate <= 0.0 {
            return fail("Recording target_framerate must be greater than 0");
        }

        if self.recording.duration_limit_secs <= 0.0 {
            return fail("Recording duration_limit_secs must be greater than 0");
        }

        if self.recording.motion_timeout_secs <= 0.0 {
            return fail("Recording motion_timeout_secs must be greater than 0");
        }

        if self.recording.starvation_timeout_secs <= 0.0 {
            return fail("Recording starvation_timeout_secs must be greater than 0");
        }

        if self.recording.queue_capacity == 0 {
            return fail("Recording queue_capacity must be greater than 0");
        }

        if self.recording.capture_retry_limit == 0 {
            return fail("Recording capture_retry_limit must be greater than 0");
        }

        Ok(())
    }
}

impl Default for WildcamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                backend: default_camera_backend(),
                index: default_camera_index(),
                resolution: default_camera_resolution(),
                lores_resolution: default_lores_resolution(),
                fps: default_camera_fps(),
                capture_timeout_ms: default_capture_timeout_ms(),
                mock_moving_object: default_mock_moving_object(),
            },
            motion: MotionConfig::default(),
            recognition: RecognitionConfig {
                enabled: default_recognition_enabled(),
                threshold: default_recognition_threshold(),
                keywords: default_keywords(),
                stride: default_recognition_stride(),
            },
            recording: RecordingConfig::default(),
            catalog: CatalogConfig {
                path: default_catalog_path(),
            },
            http: HttpConfig {
                enabled: default_http_enabled(),
                ip: default_http_ip(),
                port: default_http_port(),
            },
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            mode: default_motion_mode(),
            sensitivity: default_sensitivity(),
            min_area: default_min_area(),
            blur_radius: default_blur_radius(),
            dilate_radius: default_dilate_radius(),
            background_alpha: default_background_alpha(),
            contrast_floor: default_contrast_floor(),
            low_light_threshold: default_low_light_threshold(),
            low_light_area_fraction: default_low_light_area_fraction(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            video_folder: default_video_folder(),
            sink: default_sink_backend(),
            duration_limit_secs: default_duration_limit_secs(),
            motion_timeout_secs: default_motion_timeout_secs(),
            target_framerate: default_target_framerate(),
            motion_stride: default_motion_stride(),
            queue_capacity: default_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            idle_poll_interval_ms: default_idle_poll_interval_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            starvation_timeout_secs: default_starvation_timeout_secs(),
            capture_retry_limit: default_capture_retry_limit(),
            capture_retry_backoff_ms: default_capture_retry_backoff_ms(),
            duration_update_interval_secs: default_duration_update_interval_secs(),
            annotate: default_annotate(),
            timestamp_overlay: default_timestamp_overlay(),
            font_path: default_font_path(),
            font_size: default_font_size(),
            timestamp_timezone: default_timestamp_timezone(),
        }
    }
}

// Default value functions
fn default_camera_backend() -> CameraBackend {
    CameraBackend::Gstreamer
}
fn default_camera_index() -> u32 {
    0
}
fn default_camera_resolution() -> (u32, u32) {
    (1920, 1080)
}
fn default_lores_resolution() -> (u32, u32) {
    (320, 240)
}
fn default_camera_fps() -> u32 {
    30
}
fn default_capture_timeout_ms() -> u64 {
    1000
}
fn default_mock_moving_object() -> bool {
    false
}

fn default_motion_mode() -> MotionMode {
    MotionMode::Auto
}
fn default_sensitivity() -> f32 {
    0.2
}
fn default_min_area() -> u32 {
    500
}
fn default_blur_radius() -> u32 {
    4
}
fn default_dilate_radius() -> u8 {
    2
}
fn default_background_alpha() -> f32 {
    0.5
}
fn default_contrast_floor() -> f32 {
    20.0
}
fn default_low_light_threshold() -> u8 {
    15
}
fn default_low_light_area_fraction() -> f32 {
    0.01
}

fn default_recognition_enabled() -> bool {
    false
}
fn default_recognition_threshold() -> f32 {
    0.5
}
fn default_keywords() -> Vec<String> {
    vec!["person".to_string(), "cat".to_string(), "bear".to_string()]
}
fn default_recognition_stride() -> u32 {
    4
}

fn default_video_folder() -> String {
    "videos".to_string()
}
fn default_sink_backend() -> SinkBackend {
    SinkBackend::Gstreamer
}
fn default_duration_limit_secs() -> f64 {
    300.0
}
fn default_motion_timeout_secs() -> f64 {
    15.0
}
fn default_target_framerate() -> f64 {
    30.0
}
fn default_motion_stride() -> u32 {
    1
}
fn default_queue_capacity() -> usize {
    100
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_idle_poll_interval_ms() -> u64 {
    100
}
fn default_send_timeout_ms() -> u64 {
    500
}
fn default_starvation_timeout_secs() -> f64 {
    2.0
}
fn default_capture_retry_limit() -> u32 {
    5
}
fn default_capture_retry_backoff_ms() -> u64 {
    200
}
fn default_duration_update_interval_secs() -> f64 {
    5.0
}
fn default_annotate() -> bool {
    true
}
fn default_timestamp_overlay() -> bool {
    false
}
fn default_font_path() -> String {
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf".to_string()
}
fn default_font_size() -> f32 {
    20.0
}
fn default_timestamp_timezone() -> String {
    "UTC".to_string()
}

fn default_catalog_path() -> String {
    "video_database.db".to_string()
}

fn default_http_enabled() -> bool {
    true
}
fn default_http_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    6143
}
