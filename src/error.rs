use thiserror::Error;

pub type Result<T> = std::result::Result<T, LayerError>;

/// Errors raised while configuring, building or calling layers.
///
/// Everything surfaces at build/call time; nothing is retried.
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("layer `{0}` was called before it was built")]
    NotBuilt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl LayerError {
    pub(crate) fn config<S: Into<String>>(msg: S) -> Self {
        LayerError::Configuration(msg.into())
    }

    pub(crate) fn shape<S: Into<String>>(msg: S) -> Self {
        LayerError::ShapeMismatch(msg.into())
    }
}

impl From<serde_json::Error> for LayerError {
    fn from(error: serde_json::Error) -> Self {
        LayerError::Serialization(error.to_string())
    }
}

impl From<bincode::Error> for LayerError {
    fn from(error: bincode::Error) -> Self {
        LayerError::Serialization(error.to_string())
    }
}

impl From<ndarray::ShapeError> for LayerError {
    fn from(error: ndarray::ShapeError) -> Self {
        LayerError::ShapeMismatch(error.to_string())
    }
}
