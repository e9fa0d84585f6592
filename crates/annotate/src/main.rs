use annotate::backend::ort::OrtModelLoader;
use annotate::{Annotator, AnnotatorConfig, BackendKind, InferenceRequest, TracingReporter};
use anyhow::Context;
use clap::Parser;
use common::{TelemetryGuard, setup_logging};
use std::path::PathBuf;

/// Propose bounding boxes for one or more images and print them as JSON.
#[derive(Parser, Debug)]
#[command(name = "annotate", version)]
struct Args {
    /// Image to annotate; repeat for a batch
    #[arg(long, required = true)]
    image: Vec<PathBuf>,

    /// prompted | single_stage | transformer (aliases: countgd, yolo, rfdetr)
    #[arg(long, default_value = "prompted")]
    backend: BackendKind,

    /// Weights file, relative to ANNOTATE_MODELS_DIR unless absolute
    #[arg(long)]
    model: Option<String>,

    /// Object description for the prompted backend
    #[arg(long)]
    prompt: Option<String>,

    /// Minimum confidence; defaults to ANNOTATE_CONFIDENCE_THRESHOLD
    #[arg(long)]
    confidence: Option<f32>,

    /// Comma-separated class ids to keep
    #[arg(long, value_delimiter = ',')]
    classes: Vec<u32>,

    /// Label every box with this name instead of the class name
    #[arg(long)]
    label: Option<String>,

    /// Slice large images into overlapping tiles
    #[arg(long)]
    tiled: bool,
}

impl Args {
    fn request(&self) -> InferenceRequest {
        InferenceRequest {
            backend: self.backend,
            model_identifier: self.model.clone(),
            text_prompt: self.prompt.clone(),
            confidence_threshold: self.confidence,
            class_allow_list: (!self.classes.is_empty()).then(|| self.classes.clone()),
            custom_label: self.label.clone(),
            use_tiling: self.tiled,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AnnotatorConfig::from_env()?;

    let _telemetry = match &config.otel_endpoint {
        Some(endpoint) => Some(TelemetryGuard::init("annotate", endpoint, config.environment)?),
        None => {
            setup_logging(config.environment);
            None
        }
    };

    let request = args.request();
    let annotator = Annotator::new(OrtModelLoader::new(&config), config);

    if let [image] = args.image.as_slice() {
        let outcome = annotator
            .run_inference_on_file(image, &request)
            .with_context(|| format!("Failed to annotate {}", image.display()))?;
        for warning in &outcome.warnings {
            eprintln!("warning: {warning}");
        }
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let results: serde_json::Map<String, serde_json::Value> = annotator
        .run_batch(&args.image, &request, &TracingReporter)
        .into_iter()
        .map(|item| -> anyhow::Result<(String, serde_json::Value)> {
            let value = match item.result {
                Ok(outcome) => serde_json::to_value(outcome)?,
                Err(e) => serde_json::json!({ "error": e.to_string(), "kind": e.kind().as_str() }),
            };
            Ok((item.image.display().to_string(), value))
        })
        .collect::<anyhow::Result<_>>()?;

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
