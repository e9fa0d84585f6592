use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub use common::Environment;

/// Default minimum confidence for a request that does not set one.
pub const DEFAULT_CONFIDENCE: f32 = 0.35;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionProvider {
    #[default]
    Cpu,
    Cuda,
}

impl FromStr for ExecutionProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(ExecutionProvider::Cpu),
            "cuda" | "gpu" => Ok(ExecutionProvider::Cuda),
            other => Err(format!("{other} is not a supported execution provider")),
        }
    }
}

/// Tiling geometry and how overlapping tile detections are merged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlicerConfig {
    pub tile_width: u32,
    pub tile_height: u32,
    /// Fraction of a tile shared with its neighbour, in `[0, 1)`.
    pub overlap_ratio: f32,
    pub iou_threshold: f32,
    pub class_agnostic: bool,
}

impl Default for SlicerConfig {
    fn default() -> Self {
        Self {
            tile_width: 640,
            tile_height: 640,
            overlap_ratio: 0.2,
            iou_threshold: 0.5,
            class_agnostic: false,
        }
    }
}

impl SlicerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(format!(
                "tile size must be positive, got {}x{}",
                self.tile_width, self.tile_height
            ));
        }
        if !(0.0..1.0).contains(&self.overlap_ratio) {
            return Err(format!(
                "tile overlap must be in [0, 1), got {}",
                self.overlap_ratio
            ));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(format!(
                "tile IoU threshold must be in [0, 1], got {}",
                self.iou_threshold
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilingConfig {
    pub enabled: bool,
    pub slicer: SlicerConfig,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            slicer: SlicerConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnnotatorConfig {
    pub environment: Environment,
    /// Relative model identifiers resolve against this directory.
    pub models_dir: PathBuf,
    pub prompted_model_path: PathBuf,
    pub prompted_tokenizer_path: PathBuf,
    pub execution_provider: ExecutionProvider,
    pub default_confidence: f32,
    pub tiling: TilingConfig,
    pub otel_endpoint: Option<String>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl AnnotatorConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();

        let models_dir = env_or("ANNOTATE_MODELS_DIR", PathBuf::from("data/models"));
        let prompted_model_path =
            env_or("ANNOTATE_PROMPTED_MODEL", PathBuf::from("models/countgd.onnx"));
        let prompted_tokenizer_path = env_or(
            "ANNOTATE_PROMPTED_TOKENIZER",
            PathBuf::from("models/tokenizer.json"),
        );

        let execution_provider = match env::var("ANNOTATE_EXECUTION_PROVIDER") {
            Ok(value) => value.parse().map_err(anyhow::Error::msg)?,
            Err(_) => ExecutionProvider::default(),
        };

        let default_confidence = env_or("ANNOTATE_CONFIDENCE_THRESHOLD", DEFAULT_CONFIDENCE);
        if !(0.0..=1.0).contains(&default_confidence) {
            anyhow::bail!(
                "ANNOTATE_CONFIDENCE_THRESHOLD must be in [0, 1], got {}",
                default_confidence
            );
        }

        let defaults = SlicerConfig::default();
        let slicer = SlicerConfig {
            tile_width: env_or("ANNOTATE_TILE_WIDTH", defaults.tile_width),
            tile_height: env_or("ANNOTATE_TILE_HEIGHT", defaults.tile_height),
            overlap_ratio: env_or("ANNOTATE_TILE_OVERLAP", defaults.overlap_ratio),
            iou_threshold: env_or("ANNOTATE_TILE_IOU", defaults.iou_threshold),
            class_agnostic: env_or("ANNOTATE_TILE_CLASS_AGNOSTIC", defaults.class_agnostic),
        };
        slicer.validate().map_err(anyhow::Error::msg)?;

        let tiling = TilingConfig {
            enabled: env_or("ANNOTATE_TILING_ENABLED", true),
            slicer,
        };

        let otel_endpoint = env::var("OTEL_ENDPOINT").ok().filter(|s| !s.is_empty());

        Ok(Self {
            environment,
            models_dir,
            prompted_model_path,
            prompted_tokenizer_path,
            execution_provider,
            default_confidence,
            tiling,
            otel_endpoint,
        })
    }
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            models_dir: PathBuf::from("data/models"),
            prompted_model_path: PathBuf::from("models/countgd.onnx"),
            prompted_tokenizer_path: PathBuf::from("models/tokenizer.json"),
            execution_provider: ExecutionProvider::Cpu,
            default_confidence: DEFAULT_CONFIDENCE,
            tiling: TilingConfig::default(),
            otel_endpoint: None,
        }
    }
}
