use crate::error::ApiError;
use crate::state::AppState;
use annotate::export::{CocoBuilder, CocoDocument, scan_images};
use annotate::files::{list_images, list_model_files};
use annotate::{
    AnnotationRecord, BackendKind, InferenceRequest, InferenceWarning, ModelClass, TracingReporter,
};
use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct AutoAnnotateRequest {
    pub image_name: String,
    #[serde(flatten)]
    pub request: InferenceRequest,
}

#[derive(Debug, Serialize)]
pub struct AutoAnnotateResponse {
    pub boxes: Vec<AnnotationRecord>,
    pub count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<InferenceWarning>,
}

#[derive(Debug, Deserialize)]
pub struct ModelClassesRequest {
    #[serde(alias = "model_type")]
    pub backend: BackendKind,
    #[serde(alias = "model_filename")]
    pub model_identifier: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ModelClassesResponse {
    pub classes: Vec<ModelClass>,
}

/// Accepts only a plain file name.
fn bare_file_name<'a>(what: &str, name: &'a str) -> Result<&'a str, ApiError> {
    let invalid = name.is_empty()
        || name.contains(['/', '\\'])
        || name == "."
        || name == "..";
    if invalid {
        return Err(ApiError::bad_request(format!("invalid {what} name '{name}'")));
    }
    Ok(name)
}

fn image_path(dir: &std::path::Path, name: &str) -> Result<PathBuf, ApiError> {
    Ok(dir.join(bare_file_name("image", name)?))
}

fn check_model_identifier(identifier: Option<&str>) -> Result<(), ApiError> {
    if let Some(identifier) = identifier {
        bare_file_name("model", identifier)?;
    }
    Ok(())
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_models(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let models = list_model_files(&state.models_dir())?;
    Ok(Json(json!({ "models": models })))
}

pub async fn list_dataset_images(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let images = list_images(&state.images_dir)?;
    Ok(Json(json!({ "images": images })))
}

#[tracing::instrument(skip_all, fields(image = %body.image_name, backend = %body.request.backend))]
pub async fn auto_annotate(
    State(state): State<AppState>,
    Json(body): Json<AutoAnnotateRequest>,
) -> Result<Json<AutoAnnotateResponse>, ApiError> {
    let path = image_path(&state.images_dir, &body.image_name)?;
    check_model_identifier(body.request.model_identifier.as_deref())?;
    if !path.is_file() {
        return Err(ApiError::not_found(format!(
            "image not found: {}",
            body.image_name
        )));
    }

    let annotator = state.annotator.clone();
    let request = body.request;
    let outcome =
        tokio::task::spawn_blocking(move || annotator.run_inference_on_file(&path, &request))
            .await??;

    Ok(Json(AutoAnnotateResponse {
        count: outcome.records.len(),
        boxes: outcome.records,
        warnings: outcome.warnings,
    }))
}

pub async fn load_model_classes(
    State(state): State<AppState>,
    Json(body): Json<ModelClassesRequest>,
) -> Result<Json<ModelClassesResponse>, ApiError> {
    check_model_identifier(body.model_identifier.as_deref())?;

    let annotator = state.annotator.clone();
    let classes = tokio::task::spawn_blocking(move || {
        annotator.model_classes(body.backend, body.model_identifier.as_deref())
    })
    .await??;

    Ok(Json(ModelClassesResponse { classes }))
}

pub async fn get_annotations(
    State(state): State<AppState>,
    Path(image_name): Path<String>,
) -> Json<Vec<AnnotationRecord>> {
    let store = state.annotations.read().await;
    Json(store.get(&image_name).cloned().unwrap_or_default())
}

pub async fn save_annotations(
    State(state): State<AppState>,
    Path(image_name): Path<String>,
    Json(records): Json<Vec<AnnotationRecord>>,
) -> Result<Json<Value>, ApiError> {
    image_path(&state.images_dir, &image_name)?;

    let count = records.len();
    state.annotations.write().await.insert(image_name.clone(), records);
    tracing::debug!(image = %image_name, count, "Annotations saved");

    Ok(Json(json!({ "status": "success", "count": count })))
}

pub async fn export_coco(State(state): State<AppState>) -> Result<Json<CocoDocument>, ApiError> {
    let annotations = state.annotations.read().await.clone();
    let images_dir = state.images_dir.clone();

    let document = tokio::task::spawn_blocking(move || {
        let images = scan_images(&images_dir, &TracingReporter)?;
        Ok::<_, std::io::Error>(CocoBuilder::new().build(&images, &annotations, &TracingReporter))
    })
    .await??;

    Ok(Json(document))
}
