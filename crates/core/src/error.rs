//! Error taxonomy for the gateway
//!
//! Every fallible operation in the workspace funnels into [`Error`]. The
//! server crate maps these variants onto HTTP status codes; nothing below
//! the HTTP layer knows about status codes.

use thiserror::Error;

use crate::model::ModelId;

/// Gateway-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The model has no artifacts in the local cache.
    #[error("model '{0}' is not installed locally. You can download it with `POST /v1/models/{0}`")]
    ModelNotFound(ModelId),

    /// The model exists locally but no executor handles its family.
    #[error("model '{0}' is not supported")]
    ModelNotSupported(ModelId),

    /// Unload was requested for a model that is not resident.
    #[error("model '{0}' is not loaded")]
    NotLoaded(ModelId),

    /// Unload was requested while leases are outstanding.
    #[error("model '{0}' is still in use")]
    Busy(ModelId),

    /// The loader ran and failed (corrupt artifact, missing file, ...).
    #[error("failed to load model '{model}': {reason}")]
    LoadFailed { model: ModelId, reason: String },

    /// A request parameter failed validation.
    #[error("invalid value for `{field}`: {message}")]
    InvalidParameter { field: &'static str, message: String },

    /// The uploaded audio could not be decoded.
    #[error("could not read audio: {0}")]
    BadAudio(String),

    /// Audio encoding or resampling failed.
    #[error("audio processing failed: {0}")]
    Audio(String),

    /// The upstream chat-completion call failed.
    #[error("upstream chat completion returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// A download was requested while `HF_HUB_OFFLINE` is set.
    #[error("model downloads are disabled while offline")]
    Offline,

    /// Inference failed after the session was loaded.
    #[error("inference failed: {0}")]
    Inference(String),

    /// Anything else. Mapped to a 500 with a correlation id.
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a 422-style parameter error.
    pub fn invalid_param(field: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidParameter {
            field,
            message: message.into(),
        }
    }

    pub fn load_failed(model: &ModelId, reason: impl Into<String>) -> Self {
        Error::LoadFailed {
            model: model.clone(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}
