use super::{resize, PatchTemplate, PixelGrid, PreprocessConfig};
use crate::core::tensor::{stack, AxisRange};
use crate::core::{Error, Result, Tensor};

#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    /// `(num_patches, patch_size, patch_size, 3)`: global patch first, then
    /// the crops row-major.
    pub patches: Tensor,
    pub template: PatchTemplate,
}

/// Lays decoded pixels out as an `(h, w, 3)` tensor of raw 0-255 values.
/// Channels past the third (alpha) are dropped.
pub fn image_to_tensor(grid: &PixelGrid) -> Result<Tensor> {
    let channels = grid.channels as usize;
    if channels < 3 {
        return Err(Error::shape_mismatch(format!(
            "image has {} channels, at least 3 are required",
            channels
        )));
    }
    let (w, h) = (grid.width as usize, grid.height as usize);
    if grid.data.len() != w * h * channels {
        return Err(Error::shape_mismatch(format!(
            "{} pixel bytes for a {}x{}x{} image",
            grid.data.len(),
            w,
            h,
            channels
        )));
    }
    let data = grid
        .data
        .chunks_exact(channels)
        .flat_map(|px| px[..3].iter().map(|&b| f32::from(b)))
        .collect();
    Tensor::new(data, [h, w, 3])
}

/// Picks how to tile an `height x width` image.
pub fn select_template(height: usize, width: usize, config: &PreprocessConfig) -> PatchTemplate {
    let longest = height.max(width) as f32;
    if longest < config.patch_size as f32 * config.tiling_threshold {
        return PatchTemplate::IDENTITY;
    }
    let aspect = height as f32 / width as f32;
    let mut best = PatchTemplate::CANDIDATES[0];
    let mut best_diff = f32::INFINITY;
    for candidate in PatchTemplate::CANDIDATES {
        let diff = (candidate.rows as f32 / candidate.cols as f32 - aspect).abs();
        if diff < best_diff {
            best = candidate;
            best_diff = diff;
        }
    }
    best
}

fn normalize(pixels: &Tensor, config: &PreprocessConfig) -> Result<Tensor> {
    let mut data = pixels.to_vec();
    for (i, v) in data.iter_mut().enumerate() {
        let c = i % 3;
        *v = (*v * config.rescale_factor - config.mean[c]) / config.std[c];
    }
    Tensor::new(data, pixels.dims().to_vec())
}

fn to_patch(pixels: &Tensor, config: &PreprocessConfig) -> Result<Tensor> {
    let side = config.patch_size;
    let resized = resize(pixels, side, side, config.interpolation)?;
    normalize(&resized, config)
}

fn limit_size(pixels: Tensor, config: &PreprocessConfig) -> Result<Tensor> {
    let Some(max) = config.max_image_size else {
        return Ok(pixels);
    };
    let (h, w) = (pixels.dims()[0], pixels.dims()[1]);
    let longest = h.max(w);
    if longest <= max as usize {
        return Ok(pixels);
    }
    let scale = max as f32 / longest as f32;
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);
    tracing::debug!("downscaling {}x{} image to {}x{}", w, h, new_w, new_h);
    resize(&pixels, new_w, new_h, config.interpolation)
}

/// Turns decoded pixels into the global patch plus local crops.
pub fn preprocess(grid: &PixelGrid, config: &PreprocessConfig) -> Result<PreprocessedImage> {
    let pixels = limit_size(image_to_tensor(grid)?, config)?;
    let (h, w) = (pixels.dims()[0], pixels.dims()[1]);
    let template = select_template(h, w, config);

    let mut patches = vec![to_patch(&pixels, config)?];
    if !template.is_identity() {
        let crop_h = h / template.rows;
        let crop_w = w / template.cols;
        for r in 0..template.rows {
            for c in 0..template.cols {
                let crop = pixels.slice(&[
                    AxisRange::from(r * crop_h..(r + 1) * crop_h),
                    AxisRange::from(c * crop_w..(c + 1) * crop_w),
                ])?;
                patches.push(to_patch(&crop, config)?);
            }
        }
    }
    tracing::debug!(
        "preprocessed {}x{} image into {} patches ({})",
        w,
        h,
        patches.len(),
        template
    );

    Ok(PreprocessedImage {
        patches: stack(&patches)?,
        template,
    })
}
