use crate::model::{Action, DeviceSpec, Trigger};
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchpostConfig {
    pub camera: CameraConfig,
    pub motion: MotionConfig,
    pub events: EventsConfig,
    pub notification: NotificationConfig,
    pub devices: DevicesConfig,
    pub system: SystemConfig,

    /// Configured hardware devices
    #[serde(default)]
    pub device: Vec<DeviceSpec>,

    /// Configured triggers
    #[serde(default)]
    pub trigger: Vec<Trigger>,

    /// Configured reusable actions
    #[serde(default)]
    pub action: Vec<Action>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Device id under which the camera is registered
    #[serde(default = "default_camera_id")]
    pub id: String,

    /// Directory receiving photos (JPEG and raw)
    #[serde(default = "default_photo_dir")]
    pub photo_dir: String,

    /// Directory receiving video recordings
    #[serde(default = "default_video_dir")]
    pub video_dir: String,

    /// Frame resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second of the live preview
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Auto-exposure / white-balance settle time after a fresh preview start
    #[serde(default = "default_settle_time_ms")]
    pub settle_time_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MotionAlgorithm {
    MeanSquareDiff,
    FrameDifferencing,
    OpticalFlow,
    BackgroundSubtraction,
}

impl MotionAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionAlgorithm::MeanSquareDiff => "mean_square_diff",
            MotionAlgorithm::FrameDifferencing => "frame_differencing",
            MotionAlgorithm::OpticalFlow => "optical_flow",
            MotionAlgorithm::BackgroundSubtraction => "background_subtraction",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MotionConfig {
    /// Run the motion sampler at all
    #[serde(default = "default_motion_enabled")]
    pub enabled: bool,

    /// Detection algorithm
    #[serde(default = "default_motion_algorithm")]
    pub algorithm: MotionAlgorithm,

    /// Mean squared difference above which a frame pair counts as motion
    #[serde(default = "default_mse_threshold")]
    pub mse_threshold: f64,

    /// Per-pixel intensity delta for differencing and background subtraction
    #[serde(default = "default_delta_threshold")]
    pub delta_threshold: u8,

    /// Minimum changed area in pixels
    #[serde(default = "default_min_area")]
    pub min_area: f64,

    /// Mean flow magnitude (pixels per frame) above which optical flow reports motion
    #[serde(default = "default_flow_threshold")]
    pub flow_threshold: f64,

    /// Running-average learning rate of the background model
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,

    /// Sampling period
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    /// Write intermediate masks instead of firing triggers
    #[serde(default)]
    pub test_mode: bool,

    /// Directory receiving test-mode masks
    #[serde(default = "default_test_dir")]
    pub test_dir: String,

    /// Stop a motion-started video after this many seconds (0 = never)
    #[serde(default = "default_video_max_duration_secs")]
    pub video_max_duration_secs: u64,

    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Operating hours during which the sampler is armed
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScheduleConfig {
    /// When false the sampler is armed around the clock
    #[serde(default)]
    pub enabled: bool,

    /// Bit 0 = Monday .. bit 6 = Sunday
    #[serde(default = "default_weekdays")]
    pub weekdays: u8,

    /// Window start, minutes after local midnight
    #[serde(default)]
    pub start_minute: u16,

    /// Window end, minutes after local midnight (exclusive)
    #[serde(default = "default_end_minute")]
    pub end_minute: u16,

    /// IANA timezone for the window
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EventsConfig {
    /// Append-only text event log
    #[serde(default = "default_log_path")]
    pub log_path: String,

    /// Structured event store
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    None,
    StartTls,
    Tls,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotificationConfig {
    /// Device id under which the mail transport is registered
    #[serde(default = "default_mailer_id")]
    pub id: String,

    #[serde(default = "default_smtp_host")]
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default = "default_tls_mode")]
    pub tls: TlsMode,

    /// Anonymous delivery when unset
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_sender")]
    pub sender: String,

    #[serde(default)]
    pub recipients: Vec<String>,

    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,

    #[serde(default = "default_smtp_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PinBackendKind {
    Memory,
    Sysfs,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DevicesConfig {
    /// Persisted state of devices that need calibration continuity
    #[serde(default = "default_state_file")]
    pub state_file: String,

    #[serde(default = "default_pin_backend")]
    pub backend: PinBackendKind,

    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: String,

    /// Upper bound for waiting on a busy device
    #[serde(default = "default_busy_wait_timeout_ms")]
    pub busy_wait_timeout_ms: u64,

    /// Sampling period of input watchers
    #[serde(default = "default_input_poll_ms")]
    pub input_poll_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Capacity of the fired-trigger channel
    #[serde(default = "default_trigger_channel_capacity")]
    pub trigger_channel_capacity: usize,

    /// Attempts the lifecycle worker makes waiting for in-flight actions
    #[serde(default = "default_drain_retries")]
    pub drain_retries: u32,

    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,

    /// Bound on each component's graceful stop
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// Bound on the completion barrier of an event's last action
    #[serde(default = "default_barrier_timeout_secs")]
    pub barrier_timeout_secs: u64,
}

impl MotionConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn video_max_duration(&self) -> Option<Duration> {
        (self.video_max_duration_secs > 0).then(|| Duration::from_secs(self.video_max_duration_secs))
    }
}

impl DevicesConfig {
    pub fn busy_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_wait_timeout_ms)
    }

    pub fn input_poll_interval(&self) -> Duration {
        Duration::from_millis(self.input_poll_ms)
    }
}

impl SystemConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn barrier_timeout(&self) -> Duration {
        Duration::from_secs(self.barrier_timeout_secs)
    }
}

impl WatchpostConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("watchpost.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.id", default_camera_id())?
            .set_default("camera.photo_dir", default_photo_dir())?
            .set_default("camera.video_dir", default_video_dir())?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.settle_time_ms", default_settle_time_ms())?
            .set_default("motion.enabled", default_motion_enabled())?
            .set_default("motion.algorithm", default_motion_algorithm().as_str())?
            .set_default("motion.mse_threshold", default_mse_threshold())?
            .set_default("motion.delta_threshold", default_delta_threshold() as u32)?
            .set_default("motion.min_area", default_min_area())?
            .set_default("motion.flow_threshold", default_flow_threshold())?
            .set_default("motion.learning_rate", default_learning_rate() as f64)?
            .set_default("motion.frame_interval_ms", default_frame_interval_ms())?
            .set_default("motion.test_mode", false)?
            .set_default("motion.test_dir", default_test_dir())?
            .set_default(
                "motion.video_max_duration_secs",
                default_video_max_duration_secs(),
            )?
            .set_default("motion.schedule.enabled", false)?
            .set_default("motion.schedule.weekdays", default_weekdays() as u32)?
            .set_default("motion.schedule.start_minute", 0)?
            .set_default("motion.schedule.end_minute", default_end_minute() as u32)?
            .set_default("motion.schedule.timezone", default_timezone())?
            .set_default("events.log_path", default_log_path())?
            .set_default("events.database_path", default_database_path())?
            .set_default("notification.id", default_mailer_id())?
            .set_default("notification.host", default_smtp_host())?
            .set_default("notification.port", default_smtp_port() as u32)?
            .set_default("notification.tls", "none")?
            .set_default("notification.sender", default_sender())?
            .set_default("notification.recipients", Vec::<String>::new())?
            .set_default("notification.subject_prefix", default_subject_prefix())?
            .set_default("notification.timeout_secs", default_smtp_timeout_secs())?
            .set_default("devices.state_file", default_state_file())?
            .set_default("devices.backend", "sysfs")?
            .set_default("devices.sysfs_root", default_sysfs_root())?
            .set_default(
                "devices.busy_wait_timeout_ms",
                default_busy_wait_timeout_ms(),
            )?
            .set_default("devices.input_poll_ms", default_input_poll_ms())?
            .set_default(
                "system.trigger_channel_capacity",
                default_trigger_channel_capacity() as i64,
            )?
            .set_default("system.drain_retries", default_drain_retries())?
            .set_default("system.drain_interval_ms", default_drain_interval_ms())?
            .set_default("system.stop_timeout_secs", default_stop_timeout_secs())?
            .set_default(
                "system.barrier_timeout_secs",
                default_barrier_timeout_secs(),
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with WATCHPOST_ prefix, e.g. WATCHPOST_MOTION__ALGORITHM
            .add_source(
                Environment::with_prefix("WATCHPOST")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: WatchpostConfig = settings.try_deserialize()?;

        info!(
            "Configuration loaded: {} device(s), {} trigger(s), {} action(s)",
            config.device.len(),
            config.trigger.len(),
            config.action.len()
        );
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.motion.frame_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Motion frame_interval_ms must be greater than 0".to_string(),
            ));
        }

        if !(self.motion.learning_rate > 0.0 && self.motion.learning_rate <= 1.0) {
            return Err(ConfigError::Message(
                "Motion learning_rate must be within (0, 1]".to_string(),
            ));
        }

        let schedule = &self.motion.schedule;
        if schedule.weekdays > 0x7f {
            return Err(ConfigError::Message(
                "Schedule weekdays bitmap only has 7 bits".to_string(),
            ));
        }
        if schedule.start_minute > 1440 || schedule.end_minute > 1440 {
            return Err(ConfigError::Message(
                "Schedule minutes must be within 0..=1440".to_string(),
            ));
        }
        if schedule.timezone.parse::<Tz>().is_err() {
            return Err(ConfigError::Message(format!(
                "Unknown schedule timezone '{}'",
                schedule.timezone
            )));
        }

        if self.devices.input_poll_ms == 0 {
            return Err(ConfigError::Message(
                "Device input_poll_ms must be greater than 0".to_string(),
            ));
        }

        if self.system.trigger_channel_capacity == 0 {
            return Err(ConfigError::Message(
                "Trigger channel capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.drain_interval_ms == 0 || self.system.stop_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "System drain interval and stop timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Default configuration rendered as TOML
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        let body = toml::to_string_pretty(&Self::default())?;
        Ok(format!(
            "# watchpost configuration\n\
             # Every key may be overridden through WATCHPOST_<SECTION>__<KEY> variables.\n\
             # Devices, triggers and actions are declared as [[device]], [[trigger]] and [[action]] tables.\n\n{}",
            body
        ))
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            weekdays: default_weekdays(),
            start_minute: 0,
            end_minute: default_end_minute(),
            timezone: default_timezone(),
        }
    }
}

impl Default for WatchpostConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                id: default_camera_id(),
                photo_dir: default_photo_dir(),
                video_dir: default_video_dir(),
                resolution: default_camera_resolution(),
                fps: default_camera_fps(),
                settle_time_ms: default_settle_time_ms(),
            },
            motion: MotionConfig {
                enabled: default_motion_enabled(),
                algorithm: default_motion_algorithm(),
                mse_threshold: default_mse_threshold(),
                delta_threshold: default_delta_threshold(),
                min_area: default_min_area(),
                flow_threshold: default_flow_threshold(),
                learning_rate: default_learning_rate(),
                frame_interval_ms: default_frame_interval_ms(),
                test_mode: false,
                test_dir: default_test_dir(),
                video_max_duration_secs: default_video_max_duration_secs(),
                schedule: ScheduleConfig::default(),
            },
            events: EventsConfig {
                log_path: default_log_path(),
                database_path: default_database_path(),
            },
            notification: NotificationConfig {
                id: default_mailer_id(),
                host: default_smtp_host(),
                port: default_smtp_port(),
                tls: default_tls_mode(),
                username: None,
                password: None,
                sender: default_sender(),
                recipients: Vec::new(),
                subject_prefix: default_subject_prefix(),
                timeout_secs: default_smtp_timeout_secs(),
            },
            devices: DevicesConfig {
                state_file: default_state_file(),
                backend: default_pin_backend(),
                sysfs_root: default_sysfs_root(),
                busy_wait_timeout_ms: default_busy_wait_timeout_ms(),
                input_poll_ms: default_input_poll_ms(),
            },
            system: SystemConfig {
                trigger_channel_capacity: default_trigger_channel_capacity(),
                drain_retries: default_drain_retries(),
                drain_interval_ms: default_drain_interval_ms(),
                stop_timeout_secs: default_stop_timeout_secs(),
                barrier_timeout_secs: default_barrier_timeout_secs(),
            },
            device: Vec::new(),
            trigger: Vec::new(),
            action: Vec::new(),
        }
    }
}

// Default value functions
fn default_camera_id() -> String {
    "camera".to_string()
}
fn default_photo_dir() -> String {
    "./media/photos".to_string()
}
fn default_video_dir() -> String {
    "./media/videos".to_string()
}
fn default_camera_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_camera_fps() -> u32 {
    10
}
fn default_settle_time_ms() -> u64 {
    2000
}

fn default_motion_enabled() -> bool {
    true
}
fn default_motion_algorithm() -> MotionAlgorithm {
    MotionAlgorithm::FrameDifferencing
}
fn default_mse_threshold() -> f64 {
    20.0
}
fn default_delta_threshold() -> u8 {
    25
}
fn default_min_area() -> f64 {
    500.0
}
fn default_flow_threshold() -> f64 {
    1.0
}
fn default_learning_rate() -> f32 {
    0.05
}
fn default_frame_interval_ms() -> u64 {
    200
}
fn default_test_dir() -> String {
    "./media/motion-test".to_string()
}
fn default_video_max_duration_secs() -> u64 {
    60
}
fn default_weekdays() -> u8 {
    0x7f
}
fn default_end_minute() -> u16 {
    1440
}
fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_log_path() -> String {
    "./data/events.log".to_string()
}
fn default_database_path() -> String {
    "./data/events.db".to_string()
}

fn default_mailer_id() -> String {
    "mailer".to_string()
}
fn default_smtp_host() -> String {
    "localhost".to_string()
}
fn default_smtp_port() -> u16 {
    25
}
fn default_tls_mode() -> TlsMode {
    TlsMode::None
}
fn default_sender() -> String {
    "watchpost@localhost".to_string()
}
fn default_subject_prefix() -> String {
    "[watchpost]".to_string()
}
fn default_smtp_timeout_secs() -> u64 {
    30
}

fn default_state_file() -> String {
    "./data/device_state.json".to_string()
}
fn default_pin_backend() -> PinBackendKind {
    PinBackendKind::Sysfs
}
fn default_sysfs_root() -> String {
    "/sys/class/gpio".to_string()
}
fn default_busy_wait_timeout_ms() -> u64 {
    30_000
}
fn default_input_poll_ms() -> u64 {
    20
}

fn default_trigger_channel_capacity() -> usize {
    64
}
fn default_drain_retries() -> u32 {
    50
}
fn default_drain_interval_ms() -> u64 {
    100
}
fn default_stop_timeout_secs() -> u64 {
    5
}
fn default_barrier_timeout_secs() -> u64 {
    120
}
