use super::{TransformParams, build_session, ensure_family, lock_session, metadata_entry, parse_class_literal};
use crate::backend::{BackendKind, ClassMap, SingleStageModel};
use crate::config::ExecutionProvider;
use crate::detection::{RawBox, RawDetection, non_max_suppression};
use crate::error::AnnotateError;
use image::RgbImage;
use ndarray::{ArrayView3, Ix3};
use ort::{session::Session, value::TensorRef};
use preprocess::{CpuPreProcessor, DEFAULT_INPUT_SIZE, Preprocess};
use std::path::Path;
use std::sync::Mutex;

/// Candidates below this never reach suppression; request thresholds apply later.
const SCORE_FLOOR: f32 = 0.01;
const NMS_IOU: f32 = 0.45;
const MAX_DETECTIONS: usize = 300;

pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

fn coco_names() -> ClassMap {
    (0u32..).zip(COCO_CLASSES.iter().map(|s| s.to_string())).collect()
}

/// YOLO-style export: one `[1, 4 + C, N]` output of center boxes in
/// letterboxed input pixels followed by per-class scores.
pub struct OrtSingleStageModel {
    session: Mutex<Session>,
    preprocessor: CpuPreProcessor,
    class_names: ClassMap,
}

impl OrtSingleStageModel {
    pub fn load(path: &Path, provider: ExecutionProvider) -> Result<Self, AnnotateError> {
        let session = build_session(path, provider)?;
        ensure_family(&session, path, BackendKind::SingleStage)?;

        let class_names = match metadata_entry(&session, "names").and_then(|raw| parse_class_literal(&raw)) {
            Some(names) if !names.is_empty() => names,
            _ => {
                tracing::debug!("No class names in model metadata, using COCO");
                coco_names()
            }
        };

        Ok(Self {
            session: Mutex::new(session),
            preprocessor: CpuPreProcessor::letterbox(DEFAULT_INPUT_SIZE),
            class_names,
        })
    }
}

impl SingleStageModel for OrtSingleStageModel {
    fn predict(&self, image: &RgbImage) -> Result<Vec<RawDetection>, AnnotateError> {
        let (width, height) = image.dimensions();
        let input = self
            .preprocessor
            .preprocess(image.as_raw(), width, height)
            .map_err(|e| AnnotateError::runtime("single-stage preprocessing", e))?;
        let transform = TransformParams::new(&input, width, height);

        let mut session = lock_session(&self.session)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.data.view())?])?;

        let output = outputs[0]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix3>()
            .map_err(|e| AnnotateError::runtime("single-stage output", e))?;

        Ok(decode_grid(output, &transform, SCORE_FLOOR))
    }

    fn class_names(&self) -> &ClassMap {
        &self.class_names
    }
}

/// Best class per anchor, boxes mapped to source pixels, then class-aware
/// suppression.
pub(crate) fn decode_grid(
    output: ArrayView3<f32>,
    transform: &TransformParams,
    score_floor: f32,
) -> Vec<RawDetection> {
    let (_, features, anchors) = output.dim();
    if features <= 4 {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    for a in 0..anchors {
        let (class_id, score) = (4..features)
            .map(|f| (f - 4, output[[0, f, a]]))
            .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });

        if score < score_floor {
            continue;
        }

        let (cx, cy) = (output[[0, 0, a]], output[[0, 1, a]]);
        let (w, h) = (output[[0, 2, a]], output[[0, 3, a]]);
        let (x1, y1) = transform.to_source_clamped(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = transform.to_source_clamped(cx + w / 2.0, cy + h / 2.0);

        candidates.push(RawDetection::new(
            RawBox::PixelXyxy { x1, y1, x2, y2 },
            score,
            Some(class_id as u32),
        ));
    }

    let mut kept = non_max_suppression(
        candidates,
        NMS_IOU,
        false,
        transform.orig_width,
        transform.orig_height,
    );
    kept.truncate(MAX_DETECTIONS);
    kept
}
