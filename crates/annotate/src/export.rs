//! COCO detection document built from stored annotation records.

use crate::error::AnnotateError;
use crate::files;
use crate::progress::ProgressReporter;
use crate::record::AnnotationRecord;
use chrono::{DateTime, Datelike, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const PROGRESS_EVERY: usize = 10;
const LICENSE_ID: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoDocument {
    pub info: CocoInfo,
    pub licenses: Vec<CocoLicense>,
    pub categories: Vec<CocoCategory>,
    pub images: Vec<CocoImage>,
    pub annotations: Vec<CocoAnnotation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoInfo {
    pub year: String,
    pub version: String,
    pub description: String,
    pub contributor: String,
    pub url: String,
    pub date_created: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoLicense {
    pub id: u32,
    pub url: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoCategory {
    pub id: u32,
    pub name: String,
    pub supercategory: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoImage {
    pub id: u32,
    pub license: u32,
    pub file_name: String,
    pub height: u32,
    pub width: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_captured: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoAnnotation {
    pub id: u32,
    pub image_id: u32,
    pub category_id: u32,
    /// `[x, y, width, height]`
    pub bbox: [f32; 4],
    pub area: f32,
    pub iscrowd: u8,
    pub segmentation: Vec<Vec<f32>>,
}

/// An image as it appears in the exported dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportImage {
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    pub date_captured: Option<String>,
}

impl ExportImage {
    /// Reads dimensions from the file header and the capture date from its
    /// modification time.
    pub fn from_path(path: &Path) -> Result<Self, AnnotateError> {
        let (width, height) = image::image_dimensions(path)?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let date_captured = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string());

        Ok(Self {
            file_name,
            width,
            height,
            date_captured,
        })
    }
}

/// Every readable image under `dir`, in listing order. Unreadable files are
/// reported and skipped.
pub fn scan_images(
    dir: &Path,
    reporter: &dyn ProgressReporter,
) -> std::io::Result<Vec<ExportImage>> {
    Ok(files::image_paths(dir)?
        .iter()
        .filter_map(|path| match ExportImage::from_path(path) {
            Ok(image) => Some(image),
            Err(e) => {
                reporter.report_failure(&e);
                None
            }
        })
        .collect())
}

/// Assigns category ids in first-seen label order.
#[derive(Debug, Clone, Default)]
pub struct CocoBuilder {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

impl CocoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves ids `0..n` for `names` before any label is seen.
    pub fn with_categories<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut builder = Self::new();
        for name in names {
            let name: String = name.into();
            builder.category_id(&name);
        }
        builder
    }

    fn category_id(&mut self, label: &str) -> u32 {
        if let Some(&id) = self.ids.get(label) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(label.to_string());
        self.ids.insert(label.to_string(), id);
        id
    }

    #[tracing::instrument(skip_all, fields(images = images.len()))]
    pub fn build(
        mut self,
        images: &[ExportImage],
        annotations: &HashMap<String, Vec<AnnotationRecord>>,
        reporter: &dyn ProgressReporter,
    ) -> CocoDocument {
        let total = images.len();
        let mut coco_images = Vec::with_capacity(total);
        let mut coco_annotations = Vec::new();

        for (index, image) in images.iter().enumerate() {
            let processed = index + 1;
            if processed % PROGRESS_EVERY == 0 {
                reporter.report_progress(
                    processed,
                    total,
                    &format!("Processing image {processed}/{total}"),
                );
            }

            let image_id = index as u32;
            coco_images.push(CocoImage {
                id: image_id,
                license: LICENSE_ID,
                file_name: image.file_name.clone(),
                height: image.height,
                width: image.width,
                date_captured: image.date_captured.clone(),
            });

            for record in annotations.get(&image.file_name).into_iter().flatten() {
                coco_annotations.push(CocoAnnotation {
                    id: coco_annotations.len() as u32,
                    image_id,
                    category_id: self.category_id(&record.label),
                    bbox: record.bbox(),
                    area: record.area(),
                    iscrowd: 0,
                    segmentation: Vec::new(),
                });
            }
        }

        let categories = self
            .names
            .into_iter()
            .enumerate()
            .map(|(id, name)| CocoCategory {
                id: id as u32,
                name,
                supercategory: "Object".to_string(),
            })
            .collect();

        reporter.report_progress(total, total, "Done");
        tracing::info!(
            annotations = coco_annotations.len(),
            "Built COCO document"
        );

        let now = Local::now();
        CocoDocument {
            info: CocoInfo {
                year: now.year().to_string(),
                version: "1.0".to_string(),
                description: "Exported Dataset".to_string(),
                contributor: String::new(),
                url: String::new(),
                date_created: now.to_rfc3339(),
            },
            licenses: vec![CocoLicense {
                id: LICENSE_ID,
                url: "https://creativecommons.org/licenses/by/4.0/".to_string(),
                name: "CC BY 4.0".to_string(),
            }],
            categories,
            images: coco_images,
            annotations: coco_annotations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(usize, usize)>>);

    impl ProgressReporter for Recorder {
        fn report_progress(&self, current: usize, total: usize, _: &str) {
            self.0.lock().unwrap().push((current, total));
        }
        fn report_failure(&self, _: &AnnotateError) {}
    }

    fn image(name: &str) -> ExportImage {
        ExportImage {
            file_name: name.to_string(),
            width: 640,
            height: 480,
            date_captured: None,
        }
    }

    #[test]
    fn test_bbox_and_area_come_from_records() {
        let mut annotations = HashMap::new();
        annotations.insert(
            "a.jpg".to_string(),
            vec![AnnotationRecord::new(10.0, 20.0, 30.0, 40.0, "cat")],
        );

        let doc = CocoBuilder::new().build(&[image("a.jpg")], &annotations, &Recorder::default());

        assert_eq!(doc.annotations.len(), 1);
        let ann = &doc.annotations[0];
        assert_eq!(ann.bbox, [10.0, 20.0, 30.0, 40.0]);
        assert_eq!(ann.area, 1200.0);
        assert_eq!(ann.iscrowd, 0);
        assert_eq!(doc.images[0].width, 640);
        assert_eq!(doc.categories[0].supercategory, "Object");
    }

    #[test]
    fn test_categories_in_first_seen_order_after_seeds() {
        let mut annotations = HashMap::new();
        annotations.insert(
            "a.jpg".to_string(),
            vec![
                AnnotationRecord::new(0.0, 0.0, 1.0, 1.0, "car"),
                AnnotationRecord::new(0.0, 0.0, 1.0, 1.0, "person"),
            ],
        );
        annotations.insert(
            "b.jpg".to_string(),
            vec![AnnotationRecord::new(0.0, 0.0, 1.0, 1.0, "bus")],
        );

        let doc = CocoBuilder::with_categories(["person", "animal"]).build(
            &[image("a.jpg"), image("b.jpg")],
            &annotations,
            &Recorder::default(),
        );

        let names: Vec<(u32, &str)> = doc
            .categories
            .iter()
            .map(|c| (c.id, c.name.as_str()))
            .collect();
        assert_eq!(names, vec![(0, "person"), (1, "animal"), (2, "car"), (3, "bus")]);

        let cats: Vec<u32> = doc.annotations.iter().map(|a| a.category_id).collect();
        assert_eq!(cats, vec![2, 0, 3]);
        assert_eq!(doc.annotations[2].image_id, 1);
    }

    #[test]
    fn test_progress_every_ten_images() {
        let images: Vec<ExportImage> = (0..25).map(|i| image(&format!("{i}.jpg"))).collect();
        let recorder = Recorder::default();

        let doc = CocoBuilder::new().build(&images, &HashMap::new(), &recorder);

        assert_eq!(doc.images.len(), 25);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![(10, 25), (20, 25), (25, 25)]
        );
    }

    #[test]
    fn test_scan_images_skips_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbImage::new(12, 8)
            .save(dir.path().join("ok.png"))
            .unwrap();
        std::fs::write(dir.path().join("broken.jpg"), b"not an image").unwrap();

        let images = scan_images(dir.path(), &crate::progress::SilentReporter).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!((images[0].width, images[0].height), (12, 8));
        assert!(images[0].date_captured.is_some());
    }
}
