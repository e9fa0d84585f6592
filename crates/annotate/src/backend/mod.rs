//! Detector families and the black-box model contracts behind them.

pub mod adapter;
#[cfg(feature = "ort-backend")]
pub mod ort;

pub use adapter::{
    Adapter, BackendAdapter, InferenceParams, PromptedCountingAdapter, SingleStageAdapter,
    TransformerAdapter,
};

use crate::detection::RawDetection;
use crate::error::AnnotateError;
use image::RgbImage;
use ndarray::{Array2, Array4};
use preprocess::CpuPreProcessor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Class id to display name.
pub type ClassMap = BTreeMap<u32, String>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Open-vocabulary counting model conditioned on a text prompt.
    #[default]
    #[serde(alias = "countgd")]
    Prompted,
    /// Fixed-vocabulary single-stage grid detector.
    #[serde(alias = "yolo")]
    SingleStage,
    /// Fixed-vocabulary query-based transformer detector.
    #[serde(alias = "rfdetr")]
    Transformer,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::Prompted,
        BackendKind::SingleStage,
        BackendKind::Transformer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Prompted => "prompted",
            BackendKind::SingleStage => "single_stage",
            BackendKind::Transformer => "transformer",
        }
    }

    /// Prompted models are a process-wide singleton; the others load from a
    /// weights file named in the request.
    pub fn requires_model_file(&self) -> bool {
        !matches!(self, BackendKind::Prompted)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = AnnotateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prompted" | "countgd" => Ok(BackendKind::Prompted),
            "single_stage" | "single-stage" | "yolo" => Ok(BackendKind::SingleStage),
            "transformer" | "rfdetr" | "rf-detr" => Ok(BackendKind::Transformer),
            other => Err(AnnotateError::configuration(format!(
                "unknown backend '{other}', expected one of prompted, single_stage, transformer"
            ))),
        }
    }
}

/// Output of one prompted forward pass: per-query token logits `[Q, T]` and
/// per-query normalized `cxcywh` boxes `[Q, 4]`.
#[derive(Debug, Clone)]
pub struct PromptedOutput {
    pub logits: Array2<f32>,
    pub boxes: Array2<f32>,
}

pub trait PromptedCountingModel: Send + Sync {
    /// `pixels` is the transformed NCHW image tensor.
    fn forward(&self, pixels: &Array4<f32>, prompt: &str) -> Result<PromptedOutput, AnnotateError>;
}

pub trait SingleStageModel: Send + Sync {
    /// Detections in source-image pixels, already suppressed internally.
    fn predict(&self, image: &RgbImage) -> Result<Vec<RawDetection>, AnnotateError>;
    fn class_names(&self) -> &ClassMap;
}

pub trait TransformerModel: Send + Sync {
    fn predict(&self, image: &RgbImage, threshold: f32)
    -> Result<Vec<RawDetection>, AnnotateError>;
    /// May be zero- or one-based depending on how the weights were exported.
    fn class_names(&self) -> &ClassMap;
}

/// A loaded model of one family, cheap to clone.
#[derive(Clone)]
pub enum ModelHandle {
    Prompted {
        model: Arc<dyn PromptedCountingModel>,
        transform: CpuPreProcessor,
    },
    SingleStage(Arc<dyn SingleStageModel>),
    Transformer(Arc<dyn TransformerModel>),
}

impl ModelHandle {
    /// Prompted handle with the standard shorter-side-800 ImageNet transform.
    pub fn prompted(model: Arc<dyn PromptedCountingModel>) -> Self {
        ModelHandle::Prompted {
            model,
            transform: CpuPreProcessor::bounded_imagenet(800, 1333),
        }
    }

    pub fn family(&self) -> BackendKind {
        match self {
            ModelHandle::Prompted { .. } => BackendKind::Prompted,
            ModelHandle::SingleStage(_) => BackendKind::SingleStage,
            ModelHandle::Transformer(_) => BackendKind::Transformer,
        }
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModelHandle").field(&self.family()).finish()
    }
}

/// Builds model handles on a cache miss.
pub trait ModelLoader: Send + Sync {
    fn load_prompted(&self) -> Result<ModelHandle, AnnotateError>;
    fn load_weights(&self, kind: BackendKind, path: &Path) -> Result<ModelHandle, AnnotateError>;
}

impl<L: ModelLoader + ?Sized> ModelLoader for Box<L> {
    fn load_prompted(&self) -> Result<ModelHandle, AnnotateError> {
        (**self).load_prompted()
    }

    fn load_weights(&self, kind: BackendKind, path: &Path) -> Result<ModelHandle, AnnotateError> {
        (**self).load_weights(kind, path)
    }
}
