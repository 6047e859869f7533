//! Audio output errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("no audio output devices available")]
    NoDevices,

    #[error("no default output device: {0}")]
    NoDefaultDevice(String),

    #[error("output device {0} not found")]
    DeviceNotFound(String),

    #[error("cannot query device configuration: {0}")]
    ConfigError(String),

    /// The device offers no f32 output configuration
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("cannot build output stream: {0}")]
    StreamBuildError(String),

    #[error("cannot start output stream: {0}")]
    StreamPlayError(String),
}

pub type AudioResult<T> = Result<T, AudioError>;
