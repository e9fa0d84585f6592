//! Conversion of raw detections into canonical annotation records.

use crate::backend::{BackendKind, ClassMap};
use crate::detection::RawDetection;
use crate::record::AnnotationRecord;

/// How a backend's class ids turn into display labels.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassNameResolver {
    /// Every detection is the prompted object.
    Prompt(String),
    /// Ids index the dictionary directly.
    Direct(ClassMap),
    /// Dictionary may be keyed from 1 while the model emits 0-based ids.
    BaseDetecting(ClassMap),
}

impl ClassNameResolver {
    pub fn resolve(&self, class_id: Option<u32>) -> String {
        let id = class_id.unwrap_or(0);
        match self {
            ClassNameResolver::Prompt(prompt) => prompt.clone(),
            ClassNameResolver::Direct(names) => {
                names.get(&id).cloned().unwrap_or_else(|| fallback_name(id))
            }
            ClassNameResolver::BaseDetecting(names) => {
                let one_based = !names.contains_key(&0) && names.contains_key(&1);
                let shifted = if one_based { id.checked_add(1) } else { Some(id) };

                shifted
                    .and_then(|key| names.get(&key))
                    .or_else(|| names.get(&id))
                    .cloned()
                    .unwrap_or_else(|| fallback_name(id))
            }
        }
    }

    pub fn class_names(&self) -> Option<&ClassMap> {
        match self {
            ClassNameResolver::Prompt(_) => None,
            ClassNameResolver::Direct(names) | ClassNameResolver::BaseDetecting(names) => {
                Some(names)
            }
        }
    }
}

fn fallback_name(id: u32) -> String {
    format!("object_{id}")
}

/// Builds one record per raw detection with a positive extent. Boxes are
/// resolved against `image_size` and not clipped to it.
#[tracing::instrument(skip_all, fields(backend = %backend, raw = raw.len()))]
pub fn normalize(
    raw: Vec<RawDetection>,
    backend: BackendKind,
    custom_label: Option<&str>,
    resolver: &ClassNameResolver,
    image_size: (u32, u32),
) -> Vec<AnnotationRecord> {
    let custom_label = custom_label.filter(|label| !label.is_empty());
    let (width, height) = image_size;

    let records: Vec<AnnotationRecord> = raw
        .into_iter()
        .filter_map(|det| {
            let [x, y, w, h] = det.bbox.to_pixel_xywh(width, height);
            if !(w > 0.0 && h > 0.0) {
                tracing::trace!(?det, "Dropping degenerate box");
                return None;
            }

            let label = match custom_label {
                Some(label) => label.to_string(),
                None => resolver.resolve(det.class_id),
            };
            Some(AnnotationRecord::new(x, y, w, h, label).with_confidence(det.confidence))
        })
        .collect();

    tracing::debug!(records = records.len(), "Normalized detections");
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::RawBox;

    fn names(entries: &[(u32, &str)]) -> ClassMap {
        entries.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    fn pixel_det(x1: f32, y1: f32, x2: f32, y2: f32, class_id: Option<u32>) -> RawDetection {
        RawDetection::new(RawBox::PixelXyxy { x1, y1, x2, y2 }, 0.8, class_id)
    }

    #[test]
    fn test_one_based_dictionary_is_shifted() {
        let resolver = ClassNameResolver::BaseDetecting(names(&[(1, "cat"), (2, "dog")]));
        assert_eq!(resolver.resolve(Some(0)), "cat");
        assert_eq!(resolver.resolve(Some(1)), "dog");
        // Shifted key missing, direct key present
        assert_eq!(resolver.resolve(Some(2)), "dog");
        assert_eq!(resolver.resolve(Some(7)), "object_7");
    }

    #[test]
    fn test_zero_based_dictionary_is_direct() {
        let resolver = ClassNameResolver::BaseDetecting(names(&[(0, "cat"), (1, "dog")]));
        assert_eq!(resolver.resolve(Some(0)), "cat");
        assert_eq!(resolver.resolve(Some(1)), "dog");
        assert_eq!(resolver.resolve(None), "cat");
    }

    #[test]
    fn test_direct_and_prompt_resolution() {
        let direct = ClassNameResolver::Direct(names(&[(0, "person"), (2, "car")]));
        assert_eq!(direct.resolve(Some(2)), "car");
        assert_eq!(direct.resolve(Some(1)), "object_1");

        let prompt = ClassNameResolver::Prompt("apple".into());
        assert_eq!(prompt.resolve(Some(0)), "apple");
        assert!(prompt.class_names().is_none());
    }

    #[test]
    fn test_normalized_boxes_resolve_against_source_size() {
        let raw = vec![RawDetection::new(
            RawBox::NormalizedCxcywh {
                cx: 0.5,
                cy: 0.5,
                w: 0.25,
                h: 0.5,
            },
            0.9,
            Some(0),
        )];
        let resolver = ClassNameResolver::Prompt("apple".into());
        let records = normalize(raw, BackendKind::Prompted, None, &resolver, (800, 400));

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!((r.x, r.y, r.width, r.height), (300.0, 100.0, 200.0, 200.0));
        assert_eq!(r.label, "apple");
        assert_eq!(r.confidence, Some(0.9));
    }

    #[test]
    fn test_degenerate_boxes_dropped() {
        let raw = vec![
            pixel_det(10.0, 10.0, 10.0, 50.0, Some(0)),
            pixel_det(10.0, 10.0, 50.0, 5.0, Some(0)),
            pixel_det(f32::NAN, 0.0, 5.0, 5.0, Some(0)),
            pixel_det(10.0, 10.0, 50.0, 50.0, Some(0)),
        ];
        let resolver = ClassNameResolver::Direct(names(&[(0, "person")]));
        let records = normalize(raw, BackendKind::SingleStage, None, &resolver, (64, 64));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label, "person");
    }

    #[test]
    fn test_custom_label_overrides_names() {
        let raw = vec![
            pixel_det(0.0, 0.0, 5.0, 5.0, Some(0)),
            pixel_det(0.0, 0.0, 5.0, 5.0, Some(1)),
        ];
        let resolver = ClassNameResolver::Direct(names(&[(0, "a"), (1, "b")]));

        let records = normalize(raw.clone(), BackendKind::SingleStage, Some("thing"), &resolver, (8, 8));
        assert!(records.iter().all(|r| r.label == "thing"));

        let records = normalize(raw.clone(), BackendKind::SingleStage, Some(""), &resolver, (8, 8));
        assert_eq!(records[0].label, "a");
        assert_eq!(records[1].label, "b");

        let records = normalize(raw, BackendKind::SingleStage, Some("  "), &resolver, (8, 8));
        assert!(records.iter().all(|r| r.label == "  "));
    }

    #[test]
    fn test_boxes_are_not_clipped() {
        let raw = vec![pixel_det(-5.0, -5.0, 70.0, 70.0, Some(0))];
        let resolver = ClassNameResolver::Direct(ClassMap::new());
        let records = normalize(raw, BackendKind::SingleStage, None, &resolver, (64, 64));
        assert_eq!(records[0].x, -5.0);
        assert_eq!(records[0].width, 75.0);
        assert_eq!(records[0].label, "object_0");
    }
}
