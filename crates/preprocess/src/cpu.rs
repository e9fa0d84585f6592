use crate::{Normalization, Preprocess, PreprocessResult, ResizeMode};
use common::span;
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use ndarray::Array4;

const LETTERBOX_COLOR: u8 = 114;

/// CPU preprocessing: resize with `fast_image_resize`, then normalize into NCHW.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuPreProcessor {
    pub mode: ResizeMode,
    pub normalization: Normalization,
}

impl CpuPreProcessor {
    pub fn new(mode: ResizeMode, normalization: Normalization) -> Self {
        Self {
            mode,
            normalization,
        }
    }

    /// Letterboxed square input with `/255` scaling, the YOLO convention.
    pub fn letterbox(input_size: (u32, u32)) -> Self {
        Self::new(
            ResizeMode::Letterbox {
                width: input_size.0,
                height: input_size.1,
            },
            Normalization::UnitRange,
        )
    }

    /// Stretched square input with ImageNet statistics, the DETR convention.
    pub fn stretch_imagenet(input_size: (u32, u32)) -> Self {
        Self::new(
            ResizeMode::Stretch {
                width: input_size.0,
                height: input_size.1,
            },
            Normalization::IMAGENET,
        )
    }

    /// Aspect-preserving bounded resize with ImageNet statistics.
    pub fn bounded_imagenet(shorter: u32, max_size: u32) -> Self {
        Self::new(ResizeMode::Bounded { shorter, max_size }, Normalization::IMAGENET)
    }

    fn resize(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        new_width: u32,
        new_height: u32,
    ) -> anyhow::Result<Vec<u8>> {
        let _s = span!("resize");

        if new_width == width && new_height == height {
            return Ok(pixels.to_vec());
        }

        let src = ImageRef::new(width, height, pixels, PixelType::U8x3)?;
        let mut resized = Image::new(new_width, new_height, PixelType::U8x3);

        Resizer::new().resize(
            &src,
            &mut resized,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )?;

        Ok(resized.buffer().to_vec())
    }

    fn letterbox_into(
        resized: &[u8],
        new_width: u32,
        new_height: u32,
        width: u32,
        height: u32,
    ) -> (Vec<u8>, u32, u32) {
        let offset_x = (width - new_width) / 2;
        let offset_y = (height - new_height) / 2;
        let mut canvas = vec![LETTERBOX_COLOR; (width * height * 3) as usize];
        let stride = width * 3;
        let row_bytes = (new_width * 3) as usize;

        for y in 0..new_height {
            let src_row = (y * new_width * 3) as usize;
            let dst_row = ((y + offset_y) * stride + offset_x * 3) as usize;
            canvas[dst_row..dst_row + row_bytes]
                .copy_from_slice(&resized[src_row..src_row + row_bytes]);
        }

        (canvas, offset_x, offset_y)
    }

    fn normalize(&self, buf: &[u8], width: u32, height: u32) -> anyhow::Result<Array4<f32>> {
        let _s = span!("normalize");

        let width = width as usize;
        let height = height as usize;
        let spatial = width * height;

        let (mean, std) = match self.normalization {
            Normalization::UnitRange => ([0.0; 3], [1.0; 3]),
            Normalization::MeanStd { mean, std } => (mean, std),
        };

        let mut output = vec![0.0f32; 3 * spatial];
        for (i, px) in buf.chunks_exact(3).enumerate() {
            for c in 0..3 {
                output[i + c * spatial] = (px[c] as f32 / 255.0 - mean[c]) / std[c];
            }
        }

        Ok(Array4::from_shape_vec((1, 3, height, width), output)?)
    }
}

/// Output size of the bounded resize: shorter side to `shorter`, unless that
/// would push the longer side past `max_size`.
pub fn bounded_size(width: u32, height: u32, shorter: u32, max_size: u32) -> (u32, u32) {
    let min_side = width.min(height) as f32;
    let max_side = width.max(height) as f32;

    let mut size = shorter as f32;
    if max_side / min_side * size > max_size as f32 {
        size = (max_size as f32 * min_side / max_side).round();
    }

    if width < height {
        (size as u32, (size * height as f32 / width as f32) as u32)
    } else {
        ((size * width as f32 / height as f32) as u32, size as u32)
    }
}

impl Preprocess for CpuPreProcessor {
    fn preprocess(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> anyhow::Result<PreprocessResult> {
        let _s = span!("preprocess");

        if width == 0 || height == 0 {
            anyhow::bail!("Cannot preprocess an empty {}x{} image", width, height);
        }

        let expected_size = (width * height * 3) as usize;
        if pixels.len() != expected_size {
            anyhow::bail!(
                "Buffer size mismatch: expected {}, got {} bytes",
                expected_size,
                pixels.len()
            );
        }

        tracing::trace!(width, height, mode = ?self.mode, "Preprocessing image");

        match self.mode {
            ResizeMode::Letterbox {
                width: in_w,
                height: in_h,
            } => {
                let scale = (in_w as f32 / width as f32).min(in_h as f32 / height as f32);
                let new_width = ((width as f32 * scale) as u32).clamp(1, in_w);
                let new_height = ((height as f32 * scale) as u32).clamp(1, in_h);

                let resized = self.resize(pixels, width, height, new_width, new_height)?;
                let (canvas, offset_x, offset_y) =
                    Self::letterbox_into(&resized, new_width, new_height, in_w, in_h);

                Ok(PreprocessResult {
                    data: self.normalize(&canvas, in_w, in_h)?,
                    scale_x: scale,
                    scale_y: scale,
                    offset_x: offset_x as f32,
                    offset_y: offset_y as f32,
                })
            }
            ResizeMode::Stretch { .. } | ResizeMode::Bounded { .. } => {
                let (new_width, new_height) = self.target_size(width, height);
                let resized = self.resize(pixels, width, height, new_width, new_height)?;

                Ok(PreprocessResult {
                    data: self.normalize(&resized, new_width, new_height)?,
                    scale_x: new_width as f32 / width as f32,
                    scale_y: new_height as f32 / height as f32,
                    offset_x: 0.0,
                    offset_y: 0.0,
                })
            }
        }
    }

    fn target_size(&self, width: u32, height: u32) -> (u32, u32) {
        match self.mode {
            ResizeMode::Letterbox { width, height } | ResizeMode::Stretch { width, height } => {
                (width, height)
            }
            ResizeMode::Bounded { shorter, max_size } => {
                bounded_size(width, height, shorter, max_size)
            }
        }
    }
}
