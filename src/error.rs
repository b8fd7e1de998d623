//! Error type shared by every component of the core

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the perception, navigation and control stacks
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("timed out after {waited:?} waiting for a {sensor} capture")]
    CaptureTimeout { sensor: &'static str, waited: Duration },

    #[error("{0} channel closed")]
    ChannelClosed(&'static str),

    #[error("frame shape mismatch: {0}")]
    FrameShapeMismatch(String),

    #[error("pivot failed: {0}")]
    PivotFailed(String),

    #[error("actuation failed: {0}")]
    Actuation(String),

    #[error("lifecycle transition failed for {component}: {reason}")]
    Lifecycle { component: String, reason: String },

    #[error("failed to read config at {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl CoreError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        CoreError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
