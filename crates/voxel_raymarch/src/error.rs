use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of a [`RenderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The GPU adapter or device could not be acquired.
    Environment,
    /// Shader source missing, failing to compile, or failing to link.
    Compile,
    /// Declared extents disagree with the supplied arrays, or exceed device limits.
    Request,
    /// The device failed while reading results back.
    Gpu,
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("no GPU adapter available")]
    NoAdapter,

    #[error("failed to request device: {0}")]
    NoDevice(#[from] wgpu::RequestDeviceError),

    #[error("adapter {adapter} cannot run the ray-march program: {detail}")]
    UnsupportedAdapter { adapter: String, detail: String },

    #[error("GPU context has not been created; call ensure_context first")]
    ContextMissing,

    #[error("shader not found: {}", path.display())]
    ShaderNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("compute shader compile error:\n{log}")]
    Compile { log: String },

    #[error("compute program link error:\n{log}")]
    Link { log: String },

    #[error("invalid render request: {0}")]
    InvalidRequest(String),

    #[error("{label}: {detail}")]
    LimitExceeded { label: &'static str, detail: String },

    #[error("failed to map pixel buffer: {0}")]
    Map(#[from] wgpu::BufferAsyncError),

    #[error("pixel readback was cancelled before the map completed")]
    ReadbackCancelled,
}

impl RenderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RenderError::NoAdapter
            | RenderError::NoDevice(_)
            | RenderError::UnsupportedAdapter { .. }
            | RenderError::ContextMissing => ErrorKind::Environment,
            RenderError::ShaderNotFound { .. }
            | RenderError::Compile { .. }
            | RenderError::Link { .. } => ErrorKind::Compile,
            RenderError::InvalidRequest(_) | RenderError::LimitExceeded { .. } => {
                ErrorKind::Request
            }
            RenderError::Map(_) | RenderError::ReadbackCancelled => ErrorKind::Gpu,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        RenderError::InvalidRequest(message.into())
    }
}

pub type RenderResult<T> = Result<T, RenderError>;
