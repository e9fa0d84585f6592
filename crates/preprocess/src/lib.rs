pub mod cpu;

use ndarray::Array4;

pub use cpu::CpuPreProcessor;

/// Square input used by the single-stage and transformer exports.
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (640, 640);

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// How the source image is fitted into the network input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResizeMode {
    /// Scale to fit while keeping aspect ratio, pad the remainder with gray.
    Letterbox { width: u32, height: u32 },
    /// Scale each axis independently to exactly `width` x `height`.
    Stretch { width: u32, height: u32 },
    /// Scale the shorter side to `shorter`, reduced so the longer side never
    /// exceeds `max_size`. Aspect ratio is preserved and nothing is padded.
    Bounded { shorter: u32, max_size: u32 },
}

/// Per-channel pixel normalization applied after resizing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalization {
    /// `pixel / 255`
    UnitRange,
    /// `(pixel / 255 - mean) / std`
    MeanStd { mean: [f32; 3], std: [f32; 3] },
}

impl Normalization {
    pub const IMAGENET: Normalization = Normalization::MeanStd {
        mean: IMAGENET_MEAN,
        std: IMAGENET_STD,
    };
}

/// Result of preprocessing including transformation parameters
#[derive(Debug)]
pub struct PreprocessResult {
    /// NCHW tensor, batch of one
    pub data: Array4<f32>,
    /// Horizontal scale from source pixels to input pixels
    pub scale_x: f32,
    /// Vertical scale from source pixels to input pixels
    pub scale_y: f32,
    /// X offset from letterboxing (in input pixels)
    pub offset_x: f32,
    /// Y offset from letterboxing (in input pixels)
    pub offset_y: f32,
}

impl PreprocessResult {
    pub fn input_width(&self) -> u32 {
        self.data.shape()[3] as u32
    }

    pub fn input_height(&self) -> u32 {
        self.data.shape()[2] as u32
    }

    /// Maps a point in network-input pixels back onto the source image.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x) / self.scale_x,
            (y - self.offset_y) / self.scale_y,
        )
    }
}

/// Trait for image preprocessing implementations
pub trait Preprocess {
    /// Preprocess an image for inference
    ///
    /// # Arguments
    /// * `pixels` - RGB pixel data in HWC format
    /// * `width` - Image width
    /// * `height` - Image height
    fn preprocess(&self, pixels: &[u8], width: u32, height: u32)
    -> anyhow::Result<PreprocessResult>;

    /// Size of the network input produced for a `width` x `height` source.
    fn target_size(&self, width: u32, height: u32) -> (u32, u32);
}
