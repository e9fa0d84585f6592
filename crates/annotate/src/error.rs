use crate::backend::BackendKind;
use std::path::PathBuf;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification callers use to decide how to report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing parameter or missing model file; fix the request, do not retry.
    Configuration,
    /// Weights exist but belong to another detector family.
    ModelFormat,
    /// Anything that failed while loading or running a model.
    InferenceRuntime,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::ModelFormat => "model_format",
            ErrorKind::InferenceRuntime => "inference_runtime",
        }
    }
}

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Model file not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("Failed to deserialize model {}: {reason}", .path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error(
        "Model format error: {} is not a {expected} model{}",
        .path.display(),
        detected_hint(.detected)
    )]
    ModelFormat {
        path: PathBuf,
        expected: BackendKind,
        detected: Option<BackendKind>,
    },

    #[error("Inference failed ({context}): {source}")]
    InferenceRuntime {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

fn detected_hint(detected: &Option<BackendKind>) -> String {
    match detected {
        Some(kind) => format!("; it looks like a {kind} model, select the {kind} backend instead"),
        None => String::new(),
    }
}

impl AnnotateError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        AnnotateError::Configuration(msg.into())
    }

    pub fn runtime(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        AnnotateError::InferenceRuntime {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AnnotateError::Configuration(_) | AnnotateError::ModelNotFound(_) => {
                ErrorKind::Configuration
            }
            AnnotateError::ModelFormat { .. } => ErrorKind::ModelFormat,
            AnnotateError::ModelLoad { .. }
            | AnnotateError::InferenceRuntime { .. }
            | AnnotateError::Image(_) => ErrorKind::InferenceRuntime,
        }
    }
}

#[cfg(feature = "ort-backend")]
impl From<ort::Error> for AnnotateError {
    fn from(err: ort::Error) -> Self {
        AnnotateError::runtime("ONNX Runtime", err)
    }
}
