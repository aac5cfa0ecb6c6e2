use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchpostError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {details}")]
    Configuration { details: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Motion analysis error: {0}")]
    Motion(#[from] MotionError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("unknown capability type '{capability}' for device {device}")]
    UnknownCapability { device: String, capability: String },

    #[error("device {device} is not configured")]
    NotConfigured { device: String },

    #[error("device {device} has no target '{target}'")]
    UnknownTarget { device: String, target: String },

    #[error("invalid parameter '{param}' for {device}: {details}")]
    InvalidParameter {
        device: String,
        param: String,
        details: String,
    },

    #[error("pin {pin} is already claimed")]
    PinClaimed { pin: u32 },

    #[error("pin {pin} access failed: {details}")]
    PinAccess { pin: u32, details: String },

    #[error("operation '{operation}' on {device} failed: {details}")]
    Operation {
        device: String,
        operation: String,
        details: String,
    },
}

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("live preview could not be started: {details}")]
    Preview { details: String },

    #[error("capture failed: {details}")]
    Capture { details: String },

    #[error("video already recording to {path}")]
    AlreadyRecording { path: String },

    #[error("image encoding failed: {details}")]
    Encoding { details: String },
}

#[derive(Error, Debug)]
pub enum MotionError {
    #[error("frame geometry mismatch: {current:?} vs {previous:?}")]
    GeometryMismatch {
        current: (u32, u32),
        previous: (u32, u32),
    },

    #[error("frame processing failed: {details}")]
    FrameProcessing { details: String },

    #[error("unknown motion algorithm '{name}'")]
    UnknownAlgorithm { name: String },
}

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("no recipients configured")]
    NoRecipients,

    #[error("invalid address '{address}': {details}")]
    Address { address: String, details: String },

    #[error("message could not be built: {details}")]
    Build { details: String },

    #[error("delivery failed: {details}")]
    Delivery { details: String },
}

impl WatchpostError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>, M: Into<String>>(component: S, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(details: S) -> Self {
        Self::Configuration {
            details: details.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WatchpostError>;
