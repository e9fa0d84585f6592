use annotate::backend::{PromptedCountingModel, PromptedOutput, SingleStageModel, TransformerModel};
use annotate::{
    AnnotateError, AnnotationRecord, Annotator, AnnotatorConfig, BackendKind, ClassMap, ErrorKind,
    InferenceRequest, InferenceWarning, ModelHandle, ModelLoader, ProgressReporter, RawBox,
    RawDetection, SlicerConfig, TilingConfig,
};
use image::{Rgb, RgbImage};
use ndarray::{Array4, array};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Reports every solid white rectangle as a class-0 detection.
struct WhiteBoxDetector {
    names: ClassMap,
}

fn white_boxes(image: &RgbImage) -> Vec<RawDetection> {
    let is_white = |x: u32, y: u32| *image.get_pixel(x, y) == WHITE;
    let mut found = Vec::new();

    for (x, y, _) in image.enumerate_pixels() {
        let top_left = is_white(x, y)
            && (x == 0 || !is_white(x - 1, y))
            && (y == 0 || !is_white(x, y - 1));
        if !top_left {
            continue;
        }

        let mut x_end = x;
        while x_end < image.width() && is_white(x_end, y) {
            x_end += 1;
        }
        let mut y_end = y;
        while y_end < image.height() && is_white(x, y_end) {
            y_end += 1;
        }

        found.push(RawDetection::new(
            RawBox::PixelXyxy {
                x1: x as f32,
                y1: y as f32,
                x2: x_end as f32,
                y2: y_end as f32,
            },
            0.9,
            Some(0),
        ));
    }
    found
}

impl SingleStageModel for WhiteBoxDetector {
    fn predict(&self, image: &RgbImage) -> Result<Vec<RawDetection>, AnnotateError> {
        Ok(white_boxes(image))
    }

    fn class_names(&self) -> &ClassMap {
        &self.names
    }
}

/// Emits fixed detections with a one-based class dictionary.
struct FixedTransformer {
    detections: Vec<RawDetection>,
    names: ClassMap,
}

impl TransformerModel for FixedTransformer {
    fn predict(&self, _: &RgbImage, threshold: f32) -> Result<Vec<RawDetection>, AnnotateError> {
        Ok(self
            .detections
            .iter()
            .filter(|d| d.confidence >= threshold)
            .cloned()
            .collect())
    }

    fn class_names(&self) -> &ClassMap {
        &self.names
    }
}

struct FixedPrompted {
    calls: Arc<AtomicUsize>,
}

impl PromptedCountingModel for FixedPrompted {
    fn forward(&self, _: &Array4<f32>, _: &str) -> Result<PromptedOutput, AnnotateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(PromptedOutput {
            // sigmoid(2) ~ 0.88 and sigmoid(-3) ~ 0.05
            logits: array![[2.0, -1.0], [-3.0, -4.0], [0.0, 1.5]],
            boxes: array![
                [0.5, 0.5, 0.25, 0.5],
                [0.2, 0.2, 0.1, 0.1],
                [0.25, 0.25, 0.1, 0.1]
            ],
        })
    }
}

struct FakeLoader {
    prompted: Option<ModelHandle>,
    weights: HashMap<String, ModelHandle>,
    loads: Arc<AtomicUsize>,
}

impl FakeLoader {
    fn new() -> Self {
        let mut weights = HashMap::new();
        weights.insert(
            "boxes.onnx".to_string(),
            ModelHandle::SingleStage(Arc::new(WhiteBoxDetector {
                names: names(&[(0, "box"), (1, "other")]),
            })),
        );
        weights.insert(
            "rfdetr.onnx".to_string(),
            ModelHandle::Transformer(Arc::new(FixedTransformer {
                detections: vec![
                    pixel(10.0, 10.0, 50.0, 60.0, 0.9, 0),
                    pixel(100.0, 10.0, 150.0, 60.0, 0.6, 1),
                    pixel(0.0, 0.0, 5.0, 5.0, 0.2, 0),
                ],
                names: names(&[(1, "cat"), (2, "dog")]),
            })),
        );

        Self {
            prompted: None,
            weights,
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_prompted(mut self, calls: Arc<AtomicUsize>) -> Self {
        self.prompted = Some(ModelHandle::prompted(Arc::new(FixedPrompted { calls })));
        self
    }
}

impl ModelLoader for FakeLoader {
    fn load_prompted(&self) -> Result<ModelHandle, AnnotateError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.prompted
            .clone()
            .ok_or_else(|| AnnotateError::ModelNotFound(PathBuf::from("countgd.onnx")))
    }

    fn load_weights(&self, _: BackendKind, path: &Path) -> Result<ModelHandle, AnnotateError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        self.weights
            .get(name)
            .cloned()
            .ok_or_else(|| AnnotateError::ModelNotFound(path.to_path_buf()))
    }
}

#[derive(Default)]
struct RecordingReporter {
    progress: Mutex<Vec<(usize, usize)>>,
    failures: Mutex<Vec<ErrorKind>>,
}

impl ProgressReporter for RecordingReporter {
    fn report_progress(&self, current: usize, total: usize, _: &str) {
        self.progress.lock().unwrap().push((current, total));
    }

    fn report_failure(&self, error: &AnnotateError) {
        self.failures.lock().unwrap().push(error.kind());
    }
}

fn names(entries: &[(u32, &str)]) -> ClassMap {
    entries.iter().map(|(k, v)| (*k, v.to_string())).collect()
}

fn pixel(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_id: u32) -> RawDetection {
    RawDetection::new(RawBox::PixelXyxy { x1, y1, x2, y2 }, confidence, Some(class_id))
}

fn config(tiling_enabled: bool) -> AnnotatorConfig {
    AnnotatorConfig {
        models_dir: PathBuf::from("models"),
        tiling: TilingConfig {
            enabled: tiling_enabled,
            slicer: SlicerConfig {
                tile_width: 100,
                tile_height: 100,
                ..SlicerConfig::default()
            },
        },
        ..AnnotatorConfig::default()
    }
}

fn paint(image: &mut RgbImage, x: u32, y: u32, size: u32) {
    for px in x..x + size {
        for py in y..y + size {
            image.put_pixel(px, py, WHITE);
        }
    }
}

/// 300x200 scene; every square lies fully inside each 100px tile it touches.
fn scene() -> RgbImage {
    let mut image = RgbImage::new(300, 200);
    paint(&mut image, 20, 40, 10);
    paint(&mut image, 120, 140, 10);
    paint(&mut image, 270, 20, 12);
    paint(&mut image, 85, 120, 10);
    image
}

fn sorted_boxes(records: &[AnnotationRecord]) -> Vec<[i32; 4]> {
    let mut boxes: Vec<[i32; 4]> = records
        .iter()
        .map(|r| r.bbox().map(|v| v.round() as i32))
        .collect();
    boxes.sort();
    boxes
}

fn single_stage() -> InferenceRequest {
    InferenceRequest::new(BackendKind::SingleStage).with_model("boxes.onnx")
}

#[test]
fn test_prompted_records_in_source_pixels() {
    let calls = Arc::new(AtomicUsize::new(0));
    let annotator = Annotator::new(FakeLoader::new().with_prompted(calls.clone()), config(true));
    let image = RgbImage::new(400, 200);

    let outcome = annotator
        .run_inference(&image, &InferenceRequest::prompted("apple"))
        .unwrap();

    assert_eq!(outcome.records.len(), 2);
    assert!(outcome.warnings.is_empty());
    assert!(outcome.records.iter().all(|r| r.label == "apple"));

    let first = &outcome.records[0];
    assert_eq!(first.bbox(), [150.0, 50.0, 100.0, 100.0]);
    assert!(first.confidence.unwrap() > 0.35);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_models_load_once_and_are_shared() {
    let loader = FakeLoader::new().with_prompted(Arc::new(AtomicUsize::new(0)));
    let loads = loader.loads.clone();
    let annotator = Annotator::new(loader, config(true));
    let image = scene();

    for _ in 0..3 {
        annotator.run_inference(&image, &single_stage()).unwrap();
        annotator
            .run_inference(&image, &InferenceRequest::prompted("apple"))
            .unwrap();
    }

    assert_eq!(loads.load(Ordering::SeqCst), 2);
    assert_eq!(annotator.cached_models(), 2);
}

#[test]
fn test_configuration_errors_before_loading() {
    let loader = FakeLoader::new();
    let loads = loader.loads.clone();
    let annotator = Annotator::new(loader, config(true));
    let image = scene();

    let err = annotator
        .run_inference(&image, &InferenceRequest::new(BackendKind::Prompted))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = annotator
        .run_inference(&image, &InferenceRequest::new(BackendKind::SingleStage))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    assert_eq!(loads.load(Ordering::SeqCst), 0);
}

#[test]
fn test_missing_weights_is_configuration_error() {
    let annotator = Annotator::new(FakeLoader::new(), config(true));
    let request = InferenceRequest::new(BackendKind::SingleStage).with_model("missing.onnx");

    let err = annotator.run_inference(&scene(), &request).unwrap_err();
    assert!(matches!(&err, AnnotateError::ModelNotFound(p) if p == Path::new("models/missing.onnx")));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(annotator.cached_models(), 0);
}

#[test]
fn test_weights_of_another_family_rejected() {
    let annotator = Annotator::new(FakeLoader::new(), config(true));

    annotator.run_inference(&scene(), &single_stage()).unwrap();

    let request = InferenceRequest::new(BackendKind::Transformer).with_model("boxes.onnx");
    let err = annotator.run_inference(&scene(), &request).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ModelFormat);
    assert!(err.to_string().contains("single_stage"));
}

#[test]
fn test_transformer_one_based_names_and_threshold() {
    let annotator = Annotator::new(FakeLoader::new(), config(true));
    let request = InferenceRequest::new(BackendKind::Transformer)
        .with_model("rfdetr.onnx")
        .with_confidence(0.5);

    let outcome = annotator.run_inference(&scene(), &request).unwrap();
    let labels: Vec<&str> = outcome.records.iter().map(|r| r.label.as_str()).collect();

    assert_eq!(labels, vec!["cat", "dog"]);
    assert!(outcome.records.iter().all(|r| r.confidence.unwrap() >= 0.5));
    assert_eq!(outcome.records[0].bbox(), [10.0, 10.0, 40.0, 50.0]);
}

#[test]
fn test_missing_threshold_uses_configured_default() {
    let strict = AnnotatorConfig {
        default_confidence: 0.7,
        ..config(true)
    };
    let annotator = Annotator::new(FakeLoader::new(), strict);
    let request = InferenceRequest::new(BackendKind::Transformer).with_model("rfdetr.onnx");

    let outcome = annotator.run_inference(&scene(), &request).unwrap();
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].label, "cat");

    let outcome = annotator
        .run_inference(&scene(), &request.with_confidence(0.5))
        .unwrap();
    assert_eq!(outcome.records.len(), 2);
}

#[test]
fn test_allow_list_and_custom_label() {
    let annotator = Annotator::new(FakeLoader::new(), config(true));

    let only_dogs = InferenceRequest::new(BackendKind::Transformer)
        .with_model("rfdetr.onnx")
        .with_classes(vec![1]);
    let outcome = annotator.run_inference(&scene(), &only_dogs).unwrap();
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].label, "dog");

    let relabeled = single_stage().with_label("widget");
    let outcome = annotator.run_inference(&scene(), &relabeled).unwrap();
    assert_eq!(outcome.records.len(), 4);
    assert!(outcome.records.iter().all(|r| r.label == "widget"));
}

#[cfg(feature = "tiling")]
#[test]
fn test_tiled_matches_whole_image() {
    let annotator = Annotator::new(FakeLoader::new(), config(true));
    let image = scene();

    let whole = annotator.run_inference(&image, &single_stage()).unwrap();
    let tiled = annotator
        .run_inference(&image, &single_stage().tiled(true))
        .unwrap();

    assert!(tiled.warnings.is_empty());
    assert_eq!(sorted_boxes(&whole.records), sorted_boxes(&tiled.records));
    assert_eq!(
        sorted_boxes(&tiled.records),
        vec![
            [20, 40, 10, 10],
            [85, 120, 10, 10],
            [120, 140, 10, 10],
            [270, 20, 12, 12]
        ]
    );
}

#[test]
fn test_degraded_mode_when_tiling_disabled() {
    let annotator = Annotator::new(FakeLoader::new(), config(false));
    let image = scene();

    let whole = annotator.run_inference(&image, &single_stage()).unwrap();
    let degraded = annotator
        .run_inference(&image, &single_stage().tiled(true))
        .unwrap();

    assert_eq!(degraded.warnings.len(), 1);
    assert!(matches!(
        degraded.warnings[0],
        InferenceWarning::TilingUnavailable { .. }
    ));
    assert_eq!(sorted_boxes(&whole.records), sorted_boxes(&degraded.records));
}

#[test]
fn test_batch_failures_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let good_a = dir.path().join("a.png");
    let good_b = dir.path().join("b.png");
    scene().save(&good_a).unwrap();
    scene().save(&good_b).unwrap();
    let missing = dir.path().join("missing.png");

    let annotator = Annotator::new(FakeLoader::new(), config(true));
    let reporter = RecordingReporter::default();
    let items = annotator.run_batch(
        &[good_a, missing.clone(), good_b],
        &single_stage(),
        &reporter,
    );

    assert_eq!(items.len(), 3);
    assert!(items[0].result.is_ok());
    assert!(items[1].result.is_err());
    assert_eq!(items[1].image, missing);
    assert_eq!(items[2].result.as_ref().unwrap().records.len(), 4);

    assert_eq!(
        *reporter.progress.lock().unwrap(),
        vec![(1, 3), (2, 3), (3, 3)]
    );
    assert_eq!(
        *reporter.failures.lock().unwrap(),
        vec![ErrorKind::Configuration]
    );
}

#[test]
fn test_model_classes() {
    let annotator = Annotator::new(FakeLoader::new(), config(true));

    let classes = annotator
        .model_classes(BackendKind::Transformer, Some("rfdetr.onnx"))
        .unwrap();
    let listed: Vec<(u32, &str)> = classes.iter().map(|c| (c.id, c.name.as_str())).collect();
    assert_eq!(listed, vec![(1, "cat"), (2, "dog")]);

    assert!(
        annotator
            .model_classes(BackendKind::Prompted, None)
            .unwrap()
            .is_empty()
    );
    assert!(
        annotator
            .model_classes(BackendKind::SingleStage, Some("nope.onnx"))
            .is_err()
    );
}
