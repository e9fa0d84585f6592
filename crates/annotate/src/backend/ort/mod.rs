//! ONNX Runtime implementations of the three detector families.

mod prompted;
mod single_stage;
mod transformer;

pub use prompted::OrtPromptedModel;
pub use single_stage::OrtSingleStageModel;
pub use transformer::OrtTransformerModel;

use super::{BackendKind, ClassMap, ModelHandle, ModelLoader};
use crate::config::{AnnotatorConfig, ExecutionProvider};
use crate::error::AnnotateError;
use ort::session::{Session, builder::GraphOptimizationLevel};
use preprocess::PreprocessResult;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

fn load_error(path: &Path, err: impl Display) -> AnnotateError {
    AnnotateError::ModelLoad {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Build a session for `path` on the given execution provider.
pub(crate) fn build_session(
    path: &Path,
    provider: ExecutionProvider,
) -> Result<Session, AnnotateError> {
    if !path.is_file() {
        return Err(AnnotateError::ModelNotFound(path.to_path_buf()));
    }

    // Initialize ORT environment (idempotent)
    let _ = ort::init().commit();

    let mut builder = Session::builder()
        .map_err(|e| load_error(path, e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| load_error(path, e))?
        .with_intra_threads(4)
        .map_err(|e| load_error(path, e))?;

    match provider {
        ExecutionProvider::Cuda => {
            tracing::info!("Initializing ONNX Runtime with CUDA execution provider");
            builder = builder
                .with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default()
                        .with_device_id(0)
                        .build()
                        .error_on_failure(),
                ])
                .map_err(|e| load_error(path, e))?;
        }
        ExecutionProvider::Cpu => {
            tracing::info!("Initializing ONNX Runtime with CPU execution provider");
        }
    }

    let session = builder
        .commit_from_file(path)
        .map_err(|e| load_error(path, e))?;

    tracing::info!(path = %path.display(), "Model loaded");
    Ok(session)
}

/// Guess the detector family from a graph's output names.
pub fn detect_family<S: AsRef<str>>(output_names: &[S]) -> Option<BackendKind> {
    let has = |name: &str| output_names.iter().any(|n| n.as_ref() == name);

    if has("pred_logits") && has("pred_boxes") {
        Some(BackendKind::Prompted)
    } else if has("dets") && has("labels") {
        Some(BackendKind::Transformer)
    } else if output_names.len() == 1 {
        Some(BackendKind::SingleStage)
    } else {
        None
    }
}

/// Fails with [`AnnotateError::ModelFormat`] unless `session` looks like an
/// `expected` export.
pub(crate) fn ensure_family(
    session: &Session,
    path: &Path,
    expected: BackendKind,
) -> Result<(), AnnotateError> {
    let names: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
    match detect_family(&names) {
        Some(found) if found == expected => Ok(()),
        detected => {
            tracing::warn!(?names, ?detected, %expected, "Model outputs do not match backend");
            Err(AnnotateError::ModelFormat {
                path: path.to_path_buf(),
                expected,
                detected,
            })
        }
    }
}

/// Custom metadata entry of the model, if present.
pub(crate) fn metadata_entry(session: &Session, key: &str) -> Option<String> {
    session
        .metadata()
        .ok()
        .and_then(|meta| meta.custom(key).ok().flatten())
}

pub(crate) fn lock_session(session: &Mutex<Session>) -> Result<MutexGuard<'_, Session>, AnnotateError> {
    session
        .lock()
        .map_err(|_| AnnotateError::runtime("session", "session lock poisoned"))
}

/// Maps network-input pixels back onto the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TransformParams {
    pub orig_width: u32,
    pub orig_height: u32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl TransformParams {
    pub fn new(result: &PreprocessResult, orig_width: u32, orig_height: u32) -> Self {
        Self {
            orig_width,
            orig_height,
            scale_x: result.scale_x,
            scale_y: result.scale_y,
            offset_x: result.offset_x,
            offset_y: result.offset_y,
        }
    }

    /// Inverse transform, clamped to the source image.
    pub fn to_source_clamped(&self, x: f32, y: f32) -> (f32, f32) {
        (
            ((x - self.offset_x) / self.scale_x).clamp(0.0, self.orig_width as f32),
            ((y - self.offset_y) / self.scale_y).clamp(0.0, self.orig_height as f32),
        )
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassList {
    Keyed(BTreeMap<String, String>),
    Ordered(Vec<String>),
}

/// Class dictionary from a JSON object (`{"1": "cat"}`) or array (`["cat"]`).
pub(crate) fn parse_class_json(raw: &str) -> Option<ClassMap> {
    match serde_json::from_str::<ClassList>(raw).ok()? {
        ClassList::Keyed(entries) => entries
            .into_iter()
            .map(|(k, v)| k.trim().parse::<u32>().ok().map(|id| (id, v)))
            .collect(),
        ClassList::Ordered(names) => Some((0u32..).zip(names).collect()),
    }
}

/// Class dictionary from a Python-style literal (`{0: 'person', 1: 'car'}`),
/// falling back to JSON.
pub(crate) fn parse_class_literal(raw: &str) -> Option<ClassMap> {
    if let Some(names) = parse_class_json(raw) {
        return Some(names);
    }

    let mut rest = raw.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut names = ClassMap::new();
    loop {
        rest = rest.trim_start_matches([',', ' ', '\n']);
        if rest.is_empty() {
            return Some(names);
        }

        let (key, value) = rest.split_once(':')?;
        let id: u32 = key.trim().parse().ok()?;
        let value = value.trim_start();
        let quote = value.chars().next().filter(|c| matches!(c, '\'' | '"'))?;
        let value = &value[1..];
        let end = value.find(quote)?;

        names.insert(id, value[..end].to_string());
        rest = &value[end + 1..];
    }
}

/// Loads ONNX exports for each backend.
#[derive(Debug, Clone)]
pub struct OrtModelLoader {
    provider: ExecutionProvider,
    prompted_model: PathBuf,
    prompted_tokenizer: PathBuf,
}

impl OrtModelLoader {
    pub fn new(config: &AnnotatorConfig) -> Self {
        Self {
            provider: config.execution_provider,
            prompted_model: config.prompted_model_path.clone(),
            prompted_tokenizer: config.prompted_tokenizer_path.clone(),
        }
    }
}

impl ModelLoader for OrtModelLoader {
    fn load_prompted(&self) -> Result<ModelHandle, AnnotateError> {
        self.load_weights(BackendKind::Prompted, &self.prompted_model)
    }

    fn load_weights(&self, kind: BackendKind, path: &Path) -> Result<ModelHandle, AnnotateError> {
        Ok(match kind {
            BackendKind::Prompted => ModelHandle::prompted(Arc::new(OrtPromptedModel::load(
                path,
                &self.prompted_tokenizer,
                self.provider,
            )?)),
            BackendKind::SingleStage => ModelHandle::SingleStage(Arc::new(
                OrtSingleStageModel::load(path, self.provider)?,
            )),
            BackendKind::Transformer => ModelHandle::Transformer(Arc::new(
                OrtTransformerModel::load(path, self.provider)?,
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_family() {
        assert_eq!(
            detect_family(&["pred_logits", "pred_boxes"]),
            Some(BackendKind::Prompted)
        );
        assert_eq!(
            detect_family(&["dets", "labels"]),
            Some(BackendKind::Transformer)
        );
        assert_eq!(detect_family(&["output0"]), Some(BackendKind::SingleStage));
        assert_eq!(detect_family(&["boxes", "scores", "classes"]), None);
    }

    #[test]
    fn test_missing_weights_is_not_found() {
        let err = build_session(Path::new("/nonexistent/model.onnx"), ExecutionProvider::Cpu)
            .err()
            .unwrap();
        assert!(matches!(err, AnnotateError::ModelNotFound(_)));
    }

    #[test]
    fn test_parse_class_literal() {
        let names = parse_class_literal("{0: 'person', 1: \"traffic light\", 2: 'car'}").unwrap();
        assert_eq!(names.get(&1).map(String::as_str), Some("traffic light"));
        assert_eq!(names.len(), 3);

        assert!(parse_class_literal("{0: person}").is_none());
        assert_eq!(parse_class_literal("{}"), Some(ClassMap::new()));
    }

    #[test]
    fn test_parse_class_json() {
        let keyed = parse_class_json(r#"{"1": "cat", "2": "dog"}"#).unwrap();
        assert_eq!(keyed.get(&1).map(String::as_str), Some("cat"));

        let ordered = parse_class_json(r#"["cat", "dog"]"#).unwrap();
        assert_eq!(ordered.get(&0).map(String::as_str), Some("cat"));

        assert!(parse_class_json(r#"{"one": "cat"}"#).is_none());
    }

    #[test]
    fn test_transform_params_inverse() {
        let params = TransformParams {
            orig_width: 800,
            orig_height: 600,
            scale_x: 0.5,
            scale_y: 0.5,
            offset_x: 0.0,
            offset_y: 50.0,
        };
        assert_eq!(params.to_source_clamped(320.0, 320.0), (640.0, 540.0));
        assert_eq!(params.to_source_clamped(-10.0, 10.0), (0.0, 0.0));
    }
}
