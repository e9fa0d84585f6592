//! Uniform inference interface over the three detector families.

use super::{
    BackendKind, ModelHandle, PromptedCountingModel, SingleStageModel, TransformerModel,
};
use crate::detection::{RawBox, RawDetection};
use crate::error::AnnotateError;
use crate::normalize::ClassNameResolver;
use image::RgbImage;
use preprocess::{CpuPreProcessor, Preprocess};
use std::path::Path;
use std::sync::Arc;

/// Per-request knobs shared by all adapters.
#[derive(Debug, Clone, Copy)]
pub struct InferenceParams<'a> {
    pub confidence_threshold: f32,
    pub text_prompt: Option<&'a str>,
    pub class_allow_list: Option<&'a [u32]>,
}

impl InferenceParams<'_> {
    /// An absent or empty allow-list admits every class.
    pub fn allows(&self, class_id: Option<u32>) -> bool {
        match self.class_allow_list {
            None | Some([]) => true,
            Some(list) => list.contains(&class_id.unwrap_or(0)),
        }
    }

    fn prompt(&self) -> Result<&str, AnnotateError> {
        self.text_prompt
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AnnotateError::configuration("prompted backend requires a text prompt"))
    }
}

pub trait BackendAdapter {
    fn kind(&self) -> BackendKind;

    /// Raw detections for one image (or one tile) at or above the threshold.
    fn infer(
        &self,
        image: &RgbImage,
        params: &InferenceParams<'_>,
    ) -> Result<Vec<RawDetection>, AnnotateError>;

    fn class_resolver(&self, params: &InferenceParams<'_>)
    -> Result<ClassNameResolver, AnnotateError>;
}

pub struct PromptedCountingAdapter {
    model: Arc<dyn PromptedCountingModel>,
    transform: CpuPreProcessor,
}

impl PromptedCountingAdapter {
    pub fn new(model: Arc<dyn PromptedCountingModel>, transform: CpuPreProcessor) -> Self {
        Self { model, transform }
    }
}

pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl BackendAdapter for PromptedCountingAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Prompted
    }

    fn infer(
        &self,
        image: &RgbImage,
        params: &InferenceParams<'_>,
    ) -> Result<Vec<RawDetection>, AnnotateError> {
        let prompt = params.prompt()?;
        let (width, height) = image.dimensions();

        let input = self
            .transform
            .preprocess(image.as_raw(), width, height)
            .map_err(|e| AnnotateError::runtime("prompted preprocessing", e))?;
        let output = self.model.forward(&input.data, prompt)?;

        let (queries, _) = output.logits.dim();
        if output.boxes.dim() != (queries, 4) {
            return Err(AnnotateError::runtime(
                "prompted output",
                format!(
                    "expected {queries}x4 boxes for {queries} queries, got {:?}",
                    output.boxes.dim()
                ),
            ));
        }

        // The transform preserves aspect ratio, so boxes normalized to the
        // network input are also normalized to the source image.
        let detections: Vec<RawDetection> = output
            .logits
            .rows()
            .into_iter()
            .zip(output.boxes.rows())
            .filter_map(|(logits, bbox)| {
                let score = logits
                    .iter()
                    .copied()
                    .map(sigmoid)
                    .fold(f32::NEG_INFINITY, f32::max);
                (score > params.confidence_threshold).then(|| {
                    RawDetection::new(
                        RawBox::NormalizedCxcywh {
                            cx: bbox[0],
                            cy: bbox[1],
                            w: bbox[2],
                            h: bbox[3],
                        },
                        score,
                        Some(0),
                    )
                })
            })
            .collect();

        tracing::debug!(queries, kept = detections.len(), prompt, "Prompted inference done");
        Ok(detections)
    }

    fn class_resolver(
        &self,
        params: &InferenceParams<'_>,
    ) -> Result<ClassNameResolver, AnnotateError> {
        Ok(ClassNameResolver::Prompt(params.prompt()?.to_string()))
    }
}

pub struct SingleStageAdapter {
    model: Arc<dyn SingleStageModel>,
}

impl SingleStageAdapter {
    pub fn new(model: Arc<dyn SingleStageModel>) -> Self {
        Self { model }
    }
}

impl BackendAdapter for SingleStageAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::SingleStage
    }

    fn infer(
        &self,
        image: &RgbImage,
        params: &InferenceParams<'_>,
    ) -> Result<Vec<RawDetection>, AnnotateError> {
        let detections: Vec<RawDetection> = self
            .model
            .predict(image)?
            .into_iter()
            .filter(|d| d.confidence >= params.confidence_threshold && params.allows(d.class_id))
            .collect();

        tracing::debug!(kept = detections.len(), "Single-stage inference done");
        Ok(detections)
    }

    fn class_resolver(&self, _: &InferenceParams<'_>) -> Result<ClassNameResolver, AnnotateError> {
        Ok(ClassNameResolver::Direct(self.model.class_names().clone()))
    }
}

pub struct TransformerAdapter {
    model: Arc<dyn TransformerModel>,
}

impl TransformerAdapter {
    pub fn new(model: Arc<dyn TransformerModel>) -> Self {
        Self { model }
    }
}

impl BackendAdapter for TransformerAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Transformer
    }

    fn infer(
        &self,
        image: &RgbImage,
        params: &InferenceParams<'_>,
    ) -> Result<Vec<RawDetection>, AnnotateError> {
        let detections: Vec<RawDetection> = self
            .model
            .predict(image, params.confidence_threshold)?
            .into_iter()
            .filter(|d| d.confidence >= params.confidence_threshold && params.allows(d.class_id))
            .collect();

        tracing::debug!(kept = detections.len(), "Transformer inference done");
        Ok(detections)
    }

    fn class_resolver(&self, _: &InferenceParams<'_>) -> Result<ClassNameResolver, AnnotateError> {
        Ok(ClassNameResolver::BaseDetecting(
            self.model.class_names().clone(),
        ))
    }
}

/// Adapter selected by backend kind.
pub enum Adapter {
    Prompted(PromptedCountingAdapter),
    SingleStage(SingleStageAdapter),
    Transformer(TransformerAdapter),
}

impl Adapter {
    /// Wraps `handle` for `kind`, refusing handles of another family.
    /// `source` names the weights in the error.
    pub fn new(kind: BackendKind, handle: ModelHandle, source: &Path) -> Result<Self, AnnotateError> {
        match (kind, handle) {
            (BackendKind::Prompted, ModelHandle::Prompted { model, transform }) => Ok(
                Adapter::Prompted(PromptedCountingAdapter::new(model, transform)),
            ),
            (BackendKind::SingleStage, ModelHandle::SingleStage(model)) => {
                Ok(Adapter::SingleStage(SingleStageAdapter::new(model)))
            }
            (BackendKind::Transformer, ModelHandle::Transformer(model)) => {
                Ok(Adapter::Transformer(TransformerAdapter::new(model)))
            }
            (expected, other) => Err(AnnotateError::ModelFormat {
                path: source.to_path_buf(),
                expected,
                detected: Some(other.family()),
            }),
        }
    }

    fn inner(&self) -> &dyn BackendAdapter {
        match self {
            Adapter::Prompted(a) => a,
            Adapter::SingleStage(a) => a,
            Adapter::Transformer(a) => a,
        }
    }
}

impl BackendAdapter for Adapter {
    fn kind(&self) -> BackendKind {
        self.inner().kind()
    }

    fn infer(
        &self,
        image: &RgbImage,
        params: &InferenceParams<'_>,
    ) -> Result<Vec<RawDetection>, AnnotateError> {
        self.inner().infer(image, params)
    }

    fn class_resolver(
        &self,
        params: &InferenceParams<'_>,
    ) -> Result<ClassNameResolver, AnnotateError> {
        self.inner().class_resolver(params)
    }
}
