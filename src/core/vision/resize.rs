use super::Interpolation;
use crate::core::{Error, Result, Tensor};
use image::imageops::{self, FilterType};
use image::RgbImage;

impl Interpolation {
    fn filter(self) -> FilterType {
        match self {
            Interpolation::Bicubic => FilterType::CatmullRom,
            Interpolation::Bilinear => FilterType::Triangle,
        }
    }
}

/// Resizes a raw `(h, w, 3)` tensor of 0-255 values to `(height, width, 3)`.
///
/// Resampling runs on an 8-bit buffer, so values are rounded and clamped to
/// 0..=255 first. Normalisation has to happen afterwards.
pub fn resize(pixels: &Tensor, width: u32, height: u32, interpolation: Interpolation) -> Result<Tensor> {
    let dims = pixels.dims();
    if dims.len() != 3 || dims[2] != 3 {
        return Err(Error::shape_mismatch(format!(
            "resize expects (h, w, 3) pixels, got {:?}",
            dims
        )));
    }
    if width == 0 || height == 0 {
        return Err(Error::InvalidShape {
            shape: vec![height as usize, width as usize, 3],
        });
    }
    let (src_h, src_w) = (dims[0] as u32, dims[1] as u32);

    // Resampled as 8-bit RGB, not raw floats.
    let bytes: Vec<u8> = pixels
        .to_vec()
        .into_iter()
        .map(|v| v.round().clamp(0.0, 255.0) as u8)
        .collect();
    if src_w == width && src_h == height {
        return Tensor::new(bytes.into_iter().map(f32::from).collect(), dims.to_vec());
    }

    let source = RgbImage::from_raw(src_w, src_h, bytes)
        .ok_or_else(|| Error::shape_mismatch("pixel buffer does not match its dimensions"))?;
    let resized = imageops::resize(&source, width, height, interpolation.filter());
    Tensor::new(
        resized.into_raw().into_iter().map(f32::from).collect(),
        [height as usize, width as usize, 3],
    )
}
