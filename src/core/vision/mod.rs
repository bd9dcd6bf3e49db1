pub mod merge;
pub mod preprocess;
pub mod resize;

pub use merge::{adaptive_avg_pool2d, merge_patch_embeddings};
pub use preprocess::{image_to_tensor, preprocess, select_template, PreprocessedImage};
pub use resize::resize;

use serde::{Deserialize, Serialize};

/// Decoded image handed over by a codec: interleaved 8-bit channels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelGrid {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Vec<u8>,
}

/// How an image was partitioned into local crops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatchTemplate {
    pub rows: usize,
    pub cols: usize,
}

impl PatchTemplate {
    pub const IDENTITY: PatchTemplate = PatchTemplate { rows: 1, cols: 1 };

    /// Tiling candidates, in tie-breaking order.
    pub const CANDIDATES: [PatchTemplate; 3] = [
        PatchTemplate { rows: 1, cols: 2 },
        PatchTemplate { rows: 2, cols: 1 },
        PatchTemplate { rows: 2, cols: 2 },
    ];

    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Number of local crops; the identity template has none.
    pub fn crop_count(&self) -> usize {
        if self.is_identity() {
            0
        } else {
            self.rows * self.cols
        }
    }

    pub fn patch_count(&self) -> usize {
        1 + self.crop_count()
    }
}

impl std::fmt::Display for PatchTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[default]
    Bicubic,
    Bilinear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub patch_size: u32,
    /// Longest side an input may have before it is downscaled. `None` keeps
    /// the input as decoded.
    pub max_image_size: Option<u32>,
    pub interpolation: Interpolation,
    pub rescale_factor: f32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub tiling_threshold: f32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            patch_size: 378,
            max_image_size: None,
            interpolation: Interpolation::Bicubic,
            rescale_factor: 1.0 / 255.0,
            mean: [0.5; 3],
            std: [0.5; 3],
            tiling_threshold: 1.4,
        }
    }
}
