use annotate::{AnnotationRecord, Annotator, ModelLoader};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SharedAnnotator = Arc<Annotator<Box<dyn ModelLoader>>>;

/// Saved annotations keyed by image file name.
pub type AnnotationStore = Arc<RwLock<HashMap<String, Vec<AnnotationRecord>>>>;

#[derive(Clone)]
pub struct AppState {
    pub annotator: SharedAnnotator,
    pub images_dir: PathBuf,
    pub annotations: AnnotationStore,
}

impl AppState {
    pub fn new(annotator: Annotator<Box<dyn ModelLoader>>, images_dir: PathBuf) -> Self {
        Self {
            annotator: Arc::new(annotator),
            images_dir,
            annotations: Arc::default(),
        }
    }

    pub fn models_dir(&self) -> PathBuf {
        self.annotator.config().models_dir.clone()
    }
}
