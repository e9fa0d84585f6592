use super::{build_session, ensure_family, lock_session};
use crate::backend::{BackendKind, PromptedCountingModel, PromptedOutput};
use crate::config::ExecutionProvider;
use crate::error::AnnotateError;
use ndarray::{Array2, Array4, Axis, Ix3};
use ort::{session::Session, value::TensorRef};
use std::path::Path;
use std::sync::Mutex;
use tokenizers::Tokenizer;

/// Text-conditioned counting detector with a grounding-style ONNX graph.
pub struct OrtPromptedModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

/// Captions end with a period the way the model was trained.
pub(crate) fn caption(prompt: &str) -> String {
    format!("{} .", prompt.trim())
}

impl OrtPromptedModel {
    pub fn load(
        model_path: &Path,
        tokenizer_path: &Path,
        provider: ExecutionProvider,
    ) -> Result<Self, AnnotateError> {
        if !tokenizer_path.is_file() {
            return Err(AnnotateError::ModelNotFound(tokenizer_path.to_path_buf()));
        }

        let session = build_session(model_path, provider)?;
        ensure_family(&session, model_path, BackendKind::Prompted)?;

        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| AnnotateError::ModelLoad {
            path: tokenizer_path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }

    fn tokenize(&self, prompt: &str) -> Result<(Array2<i64>, Array2<i64>), AnnotateError> {
        let encoding = self
            .tokenizer
            .encode(caption(prompt), true)
            .map_err(|e| AnnotateError::runtime("prompt tokenization", e))?;

        let to_row = |values: &[u32]| {
            Array2::from_shape_vec((1, values.len()), values.iter().map(|&v| v as i64).collect())
                .map_err(|e| AnnotateError::runtime("prompt tokenization", e))
        };
        Ok((to_row(encoding.get_ids())?, to_row(encoding.get_attention_mask())?))
    }
}

impl PromptedCountingModel for OrtPromptedModel {
    fn forward(&self, pixels: &Array4<f32>, prompt: &str) -> Result<PromptedOutput, AnnotateError> {
        let (input_ids, attention_mask) = self.tokenize(prompt)?;

        let mut session = lock_session(&self.session)?;
        let outputs = session.run(ort::inputs![
            "pixel_values" => TensorRef::from_array_view(pixels.view())?,
            "input_ids" => TensorRef::from_array_view(input_ids.view())?,
            "attention_mask" => TensorRef::from_array_view(attention_mask.view())?
        ])?;

        let first_batch = |name: &str| -> Result<Array2<f32>, AnnotateError> {
            outputs[name]
                .try_extract_array::<f32>()?
                .into_dimensionality::<Ix3>()
                .map_err(|e| AnnotateError::runtime("prompted output", e))
                .map(|batch| batch.index_axis(Axis(0), 0).to_owned())
        };

        Ok(PromptedOutput {
            logits: first_batch("pred_logits")?,
            boxes: first_batch("pred_boxes")?,
        })
    }
}
