//! Multi-backend object detection for dataset annotation.
//!
//! Three detector families sit behind one [`Annotator`]: a text-prompted
//! counting model, a single-stage grid detector and a query-based
//! transformer. Whatever the backend, results come back as
//! [`AnnotationRecord`]s in source-image pixels.

pub mod backend;
pub mod cache;
pub mod config;
pub mod detection;
pub mod error;
pub mod export;
pub mod files;
pub mod normalize;
pub mod progress;
pub mod record;
pub mod service;
#[cfg(feature = "tiling")]
pub mod slicer;

pub use backend::{BackendKind, ClassMap, ModelHandle, ModelLoader};
pub use config::{AnnotatorConfig, ExecutionProvider, SlicerConfig, TilingConfig};
pub use detection::{RawBox, RawDetection};
pub use error::{AnnotateError, ErrorKind};
pub use progress::{ProgressReporter, SilentReporter, TracingReporter};
pub use record::AnnotationRecord;
pub use service::{
    Annotator, BatchItem, InferenceOutcome, InferenceRequest, InferenceWarning, ModelClass,
};
