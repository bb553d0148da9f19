use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera::{GeoLocation, SimObject};
use crate::detect::{ModelSpec, TargetSpec};
use crate::geometry::ZoomOptics;

pub const CONFIG_ENV: &str = "PTZ_SEEK_CONFIG";

const DEFAULT_ITERATIONS: u32 = 10;
const DEFAULT_PAN_STEP: f64 = 15.0;
const DEFAULT_TILT: f64 = 0.0;
const DEFAULT_ZOOM: f64 = 1.0;
const DEFAULT_MODEL: &str = "Florence-base";
const DEFAULT_OBJECTS: &str = "a bird;a cat;a dog;a horse;a sheep;a cow;a bear";
const DEFAULT_CONFIDENCE: f32 = 0.1;
const DEFAULT_ITER_DELAY_SECS: f64 = 60.0;
const DEFAULT_BOREDOM_TILT_STEP: f64 = 5.0;
const DEFAULT_TILT_FLOOR: f64 = -20.0;
const DEFAULT_MAX_CAMERA_FAULTS: u32 = 3;
const DEFAULT_PROMPT_CONTEXT: &str = "In this outdoor nature scene";
const DEFAULT_CAMERA_URL: &str = "stub://sim";
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 360;
const DEFAULT_MOVE_SETTLE_MS: u64 = 2000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_KEEP_DIR: &str = "captures";
const DEFAULT_TOPIC_PREFIX: &str = "ptz_seek";
const DEFAULT_MQTT_CLIENT_ID: &str = "ptz-seek";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ScanConfigFile {
    iterations: Option<u32>,
    pan_step: Option<f64>,
    tilt: Option<f64>,
    zoom: Option<f64>,
    model: Option<String>,
    objects: Option<String>,
    confidence: Option<f32>,
    iter_delay_secs: Option<f64>,
    boredom_tilt_step: Option<f64>,
    tilt_floor: Option<f64>,
    max_camera_faults: Option<u32>,
    prompt_context: Option<String>,
    seek: Option<SeekSettings>,
    capture: Option<CaptureSettings>,
    camera: Option<CameraConfigFile>,
    publish: Option<PublishConfigFile>,
    backend: Option<BackendSettings>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    url: Option<String>,
    frame_width: Option<u32>,
    frame_height: Option<u32>,
    move_settle_ms: Option<u64>,
    request_timeout_secs: Option<u64>,
    optics: Option<ZoomOptics>,
    sim_objects: Option<Vec<SimObject>>,
    location: Option<GeoLocation>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PublishConfigFile {
    mqtt_broker: Option<String>,
    mqtt_client_id: Option<String>,
    topic_prefix: Option<String>,
    keep_alive_secs: Option<u64>,
}

/// Closed-loop seek tolerances and budgets.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeekSettings {
    /// Max |offset| of the bbox center from the frame center, as a fraction
    /// of the frame, for the target to count as centered.
    pub center_tolerance: f32,
    pub max_center_attempts: u32,
    pub max_consecutive_misses: u32,
    /// Bbox area (fraction of the frame) at which zooming stops.
    pub target_fill: f32,
    pub max_zoom_steps: u32,
    /// Upper bound on magnification per zoom step.
    pub max_zoom_step_ratio: f64,
    /// Minimum gap kept between the zoomed bbox and the frame edge.
    pub frame_margin: f32,
}

impl Default for SeekSettings {
    fn default() -> Self {
        Self {
            center_tolerance: 0.05,
            max_center_attempts: 4,
            max_consecutive_misses: 2,
            target_fill: 0.25,
            max_zoom_steps: 5,
            max_zoom_step_ratio: 2.0,
            frame_margin: 0.02,
        }
    }
}

/// Dedup and retention of finished captures.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureSettings {
    pub dedup_tolerance_deg: f64,
    pub keep_images: bool,
    pub keep_dir: PathBuf,
    /// Also publish the wide "before" frame of each candidate.
    pub publish_before: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            dedup_tolerance_deg: 5.0,
            keep_images: false,
            keep_dir: PathBuf::from(DEFAULT_KEEP_DIR),
            publish_before: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CameraSettings {
    /// `stub://...` or `http(s)://...`.
    pub url: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Wait after each move before capturing.
    pub move_settle: Duration,
    pub request_timeout: Duration,
    pub optics: ZoomOptics,
    /// Scene for `stub://` cameras and the `sim` model.
    pub sim_objects: Vec<SimObject>,
    pub location: Option<GeoLocation>,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_CAMERA_URL.to_string(),
            frame_width: DEFAULT_FRAME_WIDTH,
            frame_height: DEFAULT_FRAME_HEIGHT,
            move_settle: Duration::from_millis(DEFAULT_MOVE_SETTLE_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            optics: ZoomOptics::default(),
            sim_objects: Vec::new(),
            location: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PublishSettings {
    /// `host:port` of an MQTT broker. `None` logs captures instead.
    pub mqtt_broker: Option<String>,
    pub mqtt_client_id: String,
    pub topic_prefix: String,
    pub keep_alive: Duration,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            mqtt_broker: None,
            mqtt_client_id: DEFAULT_MQTT_CLIENT_ID.to_string(),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            keep_alive: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSettings {
    /// Directory holding `<model>.onnx` files.
    pub model_dir: PathBuf,
    /// Inference service for open-vocabulary models.
    pub endpoint: Option<String>,
    pub input_size: u32,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            endpoint: None,
            input_size: 640,
        }
    }
}

/// Complete run configuration.
///
/// `model_spec` and `target` are derived from `model` and `objects` by
/// [`ScanConfig::validate`]; edit the strings, then validate.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub iterations: u32,
    pub pan_step: f64,
    pub tilt: f64,
    pub zoom: f64,
    pub model: String,
    pub model_spec: ModelSpec,
    pub objects: String,
    pub target: TargetSpec,
    pub confidence: f32,
    /// Minimum spacing between round starts.
    pub iter_delay: Duration,
    pub boredom_tilt_step: f64,
    pub tilt_floor: f64,
    pub max_camera_faults: u32,
    pub prompt_context: String,
    pub seek: SeekSettings,
    pub capture: CaptureSettings,
    pub camera: CameraSettings,
    pub publish: PublishSettings,
    pub backend: BackendSettings,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            pan_step: DEFAULT_PAN_STEP,
            tilt: DEFAULT_TILT,
            zoom: DEFAULT_ZOOM,
            model: DEFAULT_MODEL.to_string(),
            model_spec: ModelSpec::Florence {
                size: "base".to_string(),
            },
            objects: DEFAULT_OBJECTS.to_string(),
            target: TargetSpec::Labels(
                DEFAULT_OBJECTS
                    .split(';')
                    .map(|label| label.to_string())
                    .collect(),
            ),
            confidence: DEFAULT_CONFIDENCE,
            iter_delay: Duration::from_secs_f64(DEFAULT_ITER_DELAY_SECS),
            boredom_tilt_step: DEFAULT_BOREDOM_TILT_STEP,
            tilt_floor: DEFAULT_TILT_FLOOR,
            max_camera_faults: DEFAULT_MAX_CAMERA_FAULTS,
            prompt_context: DEFAULT_PROMPT_CONTEXT.to_string(),
            seek: SeekSettings::default(),
            capture: CaptureSettings::default(),
            camera: CameraSettings::default(),
            publish: PublishSettings::default(),
            backend: BackendSettings::default(),
        }
    }
}

impl ScanConfig {
    /// Defaults, then the `PTZ_SEEK_CONFIG` file, then `PTZ_SEEK_*` env.
    pub fn load() -> Result<Self> {
        Self::load_with_overrides(|_| {})
    }

    /// Like [`ScanConfig::load`], with caller overrides (CLI flags) applied
    /// after the environment and before validation.
    pub fn load_with_overrides<F>(overrides: F) -> Result<Self>
    where
        F: FnOnce(&mut Self),
    {
        let config_path = std::env::var(CONFIG_ENV).ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        overrides(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ScanConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            url: camera_file.url.unwrap_or(defaults.camera.url),
            frame_width: camera_file
                .frame_width
                .unwrap_or(defaults.camera.frame_width),
            frame_height: camera_file
                .frame_height
                .unwrap_or(defaults.camera.frame_height),
            move_settle: camera_file
                .move_settle_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.camera.move_settle),
            request_timeout: camera_file
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.camera.request_timeout),
            optics: camera_file.optics.unwrap_or(defaults.camera.optics),
            sim_objects: camera_file.sim_objects.unwrap_or_default(),
            location: camera_file.location,
        };
        let publish_file = file.publish.unwrap_or_default();
        let publish = PublishSettings {
            mqtt_broker: publish_file.mqtt_broker,
            mqtt_client_id: publish_file
                .mqtt_client_id
                .unwrap_or(defaults.publish.mqtt_client_id),
            topic_prefix: publish_file
                .topic_prefix
                .unwrap_or(defaults.publish.topic_prefix),
            keep_alive: publish_file
                .keep_alive_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.publish.keep_alive),
        };
        Ok(Self {
            iterations: file.iterations.unwrap_or(defaults.iterations),
            pan_step: file.pan_step.unwrap_or(defaults.pan_step),
            tilt: file.tilt.unwrap_or(defaults.tilt),
            zoom: file.zoom.unwrap_or(defaults.zoom),
            model: file.model.unwrap_or(defaults.model),
            model_spec: defaults.model_spec,
            objects: file.objects.unwrap_or(defaults.objects),
            target: defaults.target,
            confidence: file.confidence.unwrap_or(defaults.confidence),
            iter_delay: match file.iter_delay_secs {
                Some(secs) => delay_from_secs(secs)?,
                None => defaults.iter_delay,
            },
            boredom_tilt_step: file
                .boredom_tilt_step
                .unwrap_or(defaults.boredom_tilt_step),
            tilt_floor: file.tilt_floor.unwrap_or(defaults.tilt_floor),
            max_camera_faults: file
                .max_camera_faults
                .unwrap_or(defaults.max_camera_faults),
            prompt_context: file.prompt_context.unwrap_or(defaults.prompt_context),
            seek: file.seek.unwrap_or_default(),
            capture: file.capture.unwrap_or_default(),
            camera,
            publish,
            backend: file.backend.unwrap_or_default(),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(iterations) = env_parse::<u32>("PTZ_SEEK_ITERATIONS")? {
            self.iterations = iterations;
        }
        if let Some(pan_step) = env_parse::<f64>("PTZ_SEEK_PAN_STEP")? {
            self.pan_step = pan_step;
        }
        if let Some(tilt) = env_parse::<f64>("PTZ_SEEK_TILT")? {
            self.tilt = tilt;
        }
        if let Some(zoom) = env_parse::<f64>("PTZ_SEEK_ZOOM")? {
            self.zoom = zoom;
        }
        if let Some(confidence) = env_parse::<f32>("PTZ_SEEK_CONFIDENCE")? {
            self.confidence = confidence;
        }
        if let Some(raw) = env_string("PTZ_SEEK_ITER_DELAY_SECS") {
            self.iter_delay = parse_delay_secs(&raw)
                .with_context(|| "PTZ_SEEK_ITER_DELAY_SECS has an invalid value")?;
        }
        if let Some(model) = env_string("PTZ_SEEK_MODEL") {
            self.model = model;
        }
        if let Some(objects) = env_string("PTZ_SEEK_OBJECTS") {
            self.objects = objects;
        }
        if let Some(url) = env_string("PTZ_SEEK_CAMERA_URL") {
            self.camera.url = url;
        }
        if let Some(endpoint) = env_string("PTZ_SEEK_INFERENCE_URL") {
            self.backend.endpoint = Some(endpoint);
        }
        if let Some(broker) = env_string("PTZ_SEEK_MQTT_BROKER") {
            self.publish.mqtt_broker = Some(broker);
        }
        if let Some(dir) = env_string("PTZ_SEEK_KEEP_DIR") {
            self.capture.keep_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Check ranges and derive `model_spec` and `target`.
    pub fn validate(&mut self) -> Result<()> {
        if self.iterations == 0 {
            return Err(anyhow!("iterations must be at least 1"));
        }
        if !(self.pan_step.is_finite() && self.pan_step > 0.0 && self.pan_step <= 360.0) {
            return Err(anyhow!(
                "pan step must be in (0, 360] degrees, got {}",
                self.pan_step
            ));
        }
        if !self.tilt.is_finite() || self.tilt.abs() > 90.0 {
            return Err(anyhow!("tilt must be within [-90, 90], got {}", self.tilt));
        }
        let optics = &self.camera.optics;
        if optics.min_zoom <= 0.0 || optics.max_zoom < optics.min_zoom {
            return Err(anyhow!(
                "zoom range must be positive and ordered, got {}..{}",
                optics.min_zoom,
                optics.max_zoom
            ));
        }
        if !self.zoom.is_finite() || self.zoom <= 0.0 {
            return Err(anyhow!("zoom must be positive, got {}", self.zoom));
        }
        if self.zoom < optics.min_zoom || self.zoom > optics.max_zoom {
            return Err(anyhow!(
                "zoom {} outside lens range {}..{}",
                self.zoom,
                optics.min_zoom,
                optics.max_zoom
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(anyhow!(
                "confidence threshold must be within [0, 1], got {}",
                self.confidence
            ));
        }
        if self.max_camera_faults == 0 {
            return Err(anyhow!("max_camera_faults must be at least 1"));
        }
        if self.boredom_tilt_step < 0.0 {
            return Err(anyhow!("boredom tilt step must not be negative"));
        }
        let seek = &self.seek;
        if !(seek.target_fill > 0.0 && seek.target_fill <= 1.0) {
            return Err(anyhow!(
                "target_fill must be in (0, 1], got {}",
                seek.target_fill
            ));
        }
        if !(seek.center_tolerance >= 0.0 && (0.0..0.5).contains(&seek.frame_margin)) {
            return Err(anyhow!(
                "center_tolerance must be >= 0 and frame_margin within [0, 0.5)"
            ));
        }
        if !(self.capture.dedup_tolerance_deg >= 0.0) {
            return Err(anyhow!("dedup_tolerance_deg must not be negative"));
        }
        if seek.max_center_attempts == 0
            || seek.max_consecutive_misses == 0
            || seek.max_zoom_steps == 0
        {
            return Err(anyhow!(
                "seek budgets (max_center_attempts, max_consecutive_misses, max_zoom_steps) \
                 must be at least 1"
            ));
        }
        if seek.max_zoom_step_ratio <= 1.0 {
            return Err(anyhow!(
                "max_zoom_step_ratio must be greater than 1, got {}",
                seek.max_zoom_step_ratio
            ));
        }
        if self.camera.frame_width == 0 || self.camera.frame_height == 0 {
            return Err(anyhow!("camera frame size must be non-zero"));
        }
        self.model_spec = ModelSpec::parse(&self.model)?;
        self.target = TargetSpec::parse(&self.objects)?;
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ScanConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
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

/// Parse a delay in (possibly fractional) seconds.
pub fn parse_delay_secs(raw: &str) -> Result<Duration> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| anyhow!("'{}' is not a number of seconds", raw.trim()))?;
    delay_from_secs(secs)
}

fn delay_from_secs(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow!("delay must be a finite, non-negative number of seconds, got {}", secs))
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", key, raw)),
        None => Ok(None),
    }
}
