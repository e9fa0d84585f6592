use super::{build_session, ensure_family, lock_session, metadata_entry, parse_class_json};
use crate::backend::adapter::sigmoid;
use crate::backend::{BackendKind, ClassMap, TransformerModel};
use crate::config::ExecutionProvider;
use crate::detection::{RawBox, RawDetection};
use crate::error::AnnotateError;
use image::RgbImage;
use ndarray::{ArrayView3, Ix3};
use ort::{session::Session, value::TensorRef};
use preprocess::{CpuPreProcessor, DEFAULT_INPUT_SIZE, Preprocess};
use std::path::Path;
use std::sync::Mutex;

const CLASSES_SIDECAR: &str = "classes.json";

/// RF-DETR-style export: `dets [1, Q, 4]` normalized center boxes and
/// `labels [1, Q, C]` class logits for a stretched square input.
pub struct OrtTransformerModel {
    session: Mutex<Session>,
    preprocessor: CpuPreProcessor,
    class_names: ClassMap,
}

fn sidecar_class_names(weights: &Path) -> Option<ClassMap> {
    let sidecar = weights.with_file_name(CLASSES_SIDECAR);
    let raw = std::fs::read_to_string(&sidecar).ok()?;
    let names = parse_class_json(&raw);
    if names.is_none() {
        tracing::warn!(path = %sidecar.display(), "Unreadable class dictionary, ignoring");
    }
    names
}

fn load_class_names(session: &Session, path: &Path) -> ClassMap {
    metadata_entry(session, "class_names")
        .and_then(|raw| parse_class_json(&raw))
        .or_else(|| sidecar_class_names(path))
        .unwrap_or_default()
}

impl OrtTransformerModel {
    pub fn load(path: &Path, provider: ExecutionProvider) -> Result<Self, AnnotateError> {
        let session = build_session(path, provider)?;
        ensure_family(&session, path, BackendKind::Transformer)?;
        let class_names = load_class_names(&session, path);

        tracing::info!(classes = class_names.len(), "Transformer model ready");
        Ok(Self {
            session: Mutex::new(session),
            preprocessor: CpuPreProcessor::stretch_imagenet(DEFAULT_INPUT_SIZE),
            class_names,
        })
    }
}

impl TransformerModel for OrtTransformerModel {
    fn predict(
        &self,
        image: &RgbImage,
        threshold: f32,
    ) -> Result<Vec<RawDetection>, AnnotateError> {
        let (width, height) = image.dimensions();
        let input = self
            .preprocessor
            .preprocess(image.as_raw(), width, height)
            .map_err(|e| AnnotateError::runtime("transformer preprocessing", e))?;

        let mut session = lock_session(&self.session)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.data.view())?])?;

        let shape_err = |e: ndarray::ShapeError| AnnotateError::runtime("transformer output", e);
        let dets = outputs["dets"]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix3>()
            .map_err(shape_err)?;
        let logits = outputs["labels"]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix3>()
            .map_err(shape_err)?;

        decode_queries(dets, logits, threshold, width, height)
    }

    fn class_names(&self) -> &ClassMap {
        &self.class_names
    }
}

/// One detection per query whose best class clears `threshold`; class id is
/// the argmax logit index as exported.
pub(crate) fn decode_queries(
    dets: ArrayView3<f32>,
    logits: ArrayView3<f32>,
    threshold: f32,
    width: u32,
    height: u32,
) -> Result<Vec<RawDetection>, AnnotateError> {
    let queries = dets.shape()[1];
    if logits.shape()[1] != queries || dets.shape()[2] != 4 {
        return Err(AnnotateError::runtime(
            "transformer output",
            format!(
                "mismatched shapes: dets {:?}, labels {:?}",
                dets.shape(),
                logits.shape()
            ),
        ));
    }

    let mut detections = Vec::new();
    for q in 0..queries {
        let (class_id, max_logit) = logits
            .slice(ndarray::s![0, q, ..])
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (c, &l)| {
                if l > best.1 { (c, l) } else { best }
            });

        let confidence = sigmoid(max_logit);
        if confidence < threshold {
            continue;
        }

        let bbox = RawBox::NormalizedCxcywh {
            cx: dets[[0, q, 0]],
            cy: dets[[0, q, 1]],
            w: dets[[0, q, 2]],
            h: dets[[0, q, 3]],
        };
        let [x1, y1, x2, y2] = bbox.to_pixel_xyxy(width, height);
        detections.push(RawDetection::new(
            RawBox::PixelXyxy { x1, y1, x2, y2 },
            confidence,
            Some(class_id as u32),
        ));
    }

    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    Ok(detections)
}
