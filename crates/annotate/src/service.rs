//! Inference orchestration: request validation, model lookup, tiling and
//! normalization behind one entry point.

use crate::backend::{
    Adapter, BackendAdapter, BackendKind, InferenceParams, ModelHandle, ModelLoader,
};
use crate::cache::{ModelCache, ModelKey};
use crate::config::AnnotatorConfig;
use crate::detection::RawDetection;
use crate::error::AnnotateError;
use crate::normalize::normalize;
use crate::progress::ProgressReporter;
use crate::record::AnnotationRecord;
use image::RgbImage;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// One auto-annotation request. Field aliases accept the names used by the
/// web client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    #[serde(default, alias = "model_type")]
    pub backend: BackendKind,
    #[serde(default, alias = "model_filename")]
    pub model_identifier: Option<String>,
    #[serde(default)]
    pub text_prompt: Option<String>,
    /// Falls back to the configured default when absent.
    #[serde(default, alias = "confidence_thresh")]
    pub confidence_threshold: Option<f32>,
    #[serde(default, alias = "selected_classes")]
    pub class_allow_list: Option<Vec<u32>>,
    #[serde(default, alias = "label")]
    pub custom_label: Option<String>,
    #[serde(default, alias = "tiled")]
    pub use_tiling: bool,
}

impl InferenceRequest {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            model_identifier: None,
            text_prompt: None,
            confidence_threshold: None,
            class_allow_list: None,
            custom_label: None,
            use_tiling: false,
        }
    }

    pub fn prompted(prompt: impl Into<String>) -> Self {
        Self {
            text_prompt: Some(prompt.into()),
            ..Self::new(BackendKind::Prompted)
        }
    }

    pub fn with_model(mut self, identifier: impl Into<String>) -> Self {
        self.model_identifier = Some(identifier.into());
        self
    }

    pub fn with_confidence(mut self, threshold: f32) -> Self {
        self.confidence_threshold = Some(threshold);
        self
    }

    pub fn with_classes(mut self, classes: Vec<u32>) -> Self {
        self.class_allow_list = Some(classes);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.custom_label = Some(label.into());
        self
    }

    pub fn tiled(mut self, use_tiling: bool) -> Self {
        self.use_tiling = use_tiling;
        self
    }

    fn params(&self, confidence_threshold: f32) -> InferenceParams<'_> {
        InferenceParams {
            confidence_threshold,
            text_prompt: self.text_prompt.as_deref(),
            class_allow_list: self.class_allow_list.as_deref(),
        }
    }

    fn validate(&self, confidence_threshold: f32) -> Result<(), AnnotateError> {
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(AnnotateError::configuration(format!(
                "confidence threshold must be in [0, 1], got {confidence_threshold}"
            )));
        }
        let has_prompt = self
            .text_prompt
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty());
        if self.backend == BackendKind::Prompted && !has_prompt {
            return Err(AnnotateError::configuration(
                "prompted backend requires a text prompt",
            ));
        }
        Ok(())
    }
}

/// Non-fatal condition attached to an otherwise successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InferenceWarning {
    /// Tiled inference was requested but ran on the whole image instead.
    TilingUnavailable { reason: String },
}

impl fmt::Display for InferenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceWarning::TilingUnavailable { reason } => {
                write!(f, "tiled inference unavailable ({reason}), ran on the whole image")
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InferenceOutcome {
    pub records: Vec<AnnotationRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<InferenceWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelClass {
    pub id: u32,
    pub name: String,
}

/// Result for one image of a batch.
#[derive(Debug)]
pub struct BatchItem {
    pub image: PathBuf,
    pub result: Result<InferenceOutcome, AnnotateError>,
}

struct AnnotatorMetrics {
    duration: Histogram<f64>,
    requests: Counter<u64>,
    failures: Counter<u64>,
    detections: Counter<u64>,
}

impl AnnotatorMetrics {
    fn new(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        let latency_buckets = [
            0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ];

        Self {
            duration: meter
                .f64_histogram("annotate_inference_duration_seconds")
                .with_description("Time to annotate one image, model loading included")
                .with_unit("s")
                .with_boundaries(latency_buckets.to_vec())
                .build(),
            requests: meter
                .u64_counter("annotate_requests_total")
                .with_description("Total inference requests")
                .build(),
            failures: meter
                .u64_counter("annotate_failures_total")
                .with_description("Total failed inference requests")
                .build(),
            detections: meter
                .u64_counter("annotate_detections_total")
                .with_description("Total annotation records produced")
                .build(),
        }
    }
}

/// Runs inference requests against cached models of any backend.
pub struct Annotator<L: ModelLoader> {
    loader: L,
    cache: ModelCache<ModelHandle>,
    config: AnnotatorConfig,
    metrics: AnnotatorMetrics,
}

impl<L: ModelLoader> Annotator<L> {
    pub fn new(loader: L, config: AnnotatorConfig) -> Self {
        Self {
            loader,
            cache: ModelCache::new(),
            config,
            metrics: AnnotatorMetrics::new("annotate"),
        }
    }

    pub fn config(&self) -> &AnnotatorConfig {
        &self.config
    }

    pub fn cached_models(&self) -> usize {
        self.cache.len()
    }

    /// Annotates one image. Records are in source-image pixels regardless of
    /// backend or tiling.
    #[tracing::instrument(
        skip(self, image, request),
        fields(backend = %request.backend, tiled = request.use_tiling)
    )]
    pub fn run_inference(
        &self,
        image: &RgbImage,
        request: &InferenceRequest,
    ) -> Result<InferenceOutcome, AnnotateError> {
        let start = Instant::now();
        let attributes = [KeyValue::new("backend", request.backend.as_str())];
        self.metrics.requests.add(1, &attributes);

        let result = self.annotate(image, request);

        self.metrics
            .duration
            .record(start.elapsed().as_secs_f64(), &attributes);
        match &result {
            Ok(outcome) => {
                self.metrics
                    .detections
                    .add(outcome.records.len() as u64, &attributes);
                tracing::info!(
                    records = outcome.records.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Image annotated"
                );
            }
            Err(e) => {
                self.metrics.failures.add(1, &attributes);
                tracing::error!(error = %e, kind = e.kind().as_str(), "Inference failed");
            }
        }
        result
    }

    /// Loads the image at `path` and annotates it.
    pub fn run_inference_on_file(
        &self,
        path: &Path,
        request: &InferenceRequest,
    ) -> Result<InferenceOutcome, AnnotateError> {
        if !path.is_file() {
            return Err(AnnotateError::configuration(format!(
                "image not found: {}",
                path.display()
            )));
        }
        let image = image::open(path)?.to_rgb8();
        self.run_inference(&image, request)
    }

    /// Annotates each image independently; a failing image does not stop
    /// the rest.
    pub fn run_batch(
        &self,
        images: &[PathBuf],
        request: &InferenceRequest,
        reporter: &dyn ProgressReporter,
    ) -> Vec<BatchItem> {
        let total = images.len();
        images
            .iter()
            .enumerate()
            .map(|(index, path)| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                reporter.report_progress(index + 1, total, &format!("Annotating {name}"));

                let result = self.run_inference_on_file(path, request);
                if let Err(e) = &result {
                    reporter.report_failure(e);
                }
                BatchItem {
                    image: path.clone(),
                    result,
                }
            })
            .collect()
    }

    /// Class dictionary of a fixed-vocabulary model, sorted by id. Empty for
    /// the prompted backend.
    pub fn model_classes(
        &self,
        backend: BackendKind,
        model_identifier: Option<&str>,
    ) -> Result<Vec<ModelClass>, AnnotateError> {
        if backend == BackendKind::Prompted {
            return Ok(Vec::new());
        }

        let adapter = self.adapter_for(backend, model_identifier)?;
        let params = InferenceParams {
            confidence_threshold: self.config.default_confidence,
            text_prompt: None,
            class_allow_list: None,
        };
        let resolver = adapter.class_resolver(&params)?;

        Ok(resolver
            .class_names()
            .into_iter()
            .flatten()
            .map(|(&id, name)| ModelClass {
                id,
                name: name.clone(),
            })
            .collect())
    }

    fn annotate(
        &self,
        image: &RgbImage,
        request: &InferenceRequest,
    ) -> Result<InferenceOutcome, AnnotateError> {
        let threshold = request
            .confidence_threshold
            .unwrap_or(self.config.default_confidence);
        request.validate(threshold)?;

        let adapter = self.adapter_for(request.backend, request.model_identifier.as_deref())?;
        let params = request.params(threshold);
        let resolver = adapter.class_resolver(&params)?;

        let mut warnings = Vec::new();
        let raw = self.detect(&adapter, image, &params, request.use_tiling, &mut warnings)?;

        let records = normalize(
            raw,
            request.backend,
            request.custom_label.as_deref(),
            &resolver,
            image.dimensions(),
        );
        Ok(InferenceOutcome { records, warnings })
    }

    fn detect(
        &self,
        adapter: &Adapter,
        image: &RgbImage,
        params: &InferenceParams<'_>,
        use_tiling: bool,
        warnings: &mut Vec<InferenceWarning>,
    ) -> Result<Vec<RawDetection>, AnnotateError> {
        if use_tiling {
            #[cfg(feature = "tiling")]
            {
                if self.config.tiling.enabled {
                    return crate::slicer::slice_and_infer(image, &self.config.tiling.slicer, |tile| {
                        adapter.infer(tile, params)
                    });
                }
            }

            let warning = InferenceWarning::TilingUnavailable {
                reason: self.tiling_unavailable_reason().to_string(),
            };
            tracing::warn!(%warning, "Degraded mode");
            warnings.push(warning);
        }

        adapter.infer(image, params)
    }

    fn tiling_unavailable_reason(&self) -> &'static str {
        if cfg!(feature = "tiling") {
            "tiling disabled by configuration"
        } else {
            "built without tiling support"
        }
    }

    fn adapter_for(
        &self,
        backend: BackendKind,
        model_identifier: Option<&str>,
    ) -> Result<Adapter, AnnotateError> {
        let key = match backend {
            BackendKind::Prompted => ModelKey::Singleton(BackendKind::Prompted),
            BackendKind::SingleStage | BackendKind::Transformer => {
                ModelKey::Weights(self.resolve_model_path(backend, model_identifier)?)
            }
        };

        let handle = self.cache.get_or_load(&key, || match &key {
            ModelKey::Singleton(_) => self.loader.load_prompted(),
            ModelKey::Weights(path) => self.loader.load_weights(backend, path),
        })?;

        Adapter::new(backend, handle, key.source())
    }

    fn resolve_model_path(
        &self,
        backend: BackendKind,
        model_identifier: Option<&str>,
    ) -> Result<PathBuf, AnnotateError> {
        let identifier = model_identifier
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                AnnotateError::configuration(format!("{backend} backend requires a model file"))
            })?;

        let path = Path::new(identifier);
        Ok(if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.models_dir.join(path)
        })
    }
}
