use crate::core::vision::PixelGrid;
use crate::core::Result;
use image::DynamicImage;
use std::path::Path;

/// Decodes compressed image bytes. Alpha survives as a fourth channel and
/// anything narrower than RGB is expanded to it.
pub fn decode(bytes: &[u8]) -> Result<PixelGrid> {
    Ok(to_grid(image::load_from_memory(bytes)?))
}

pub fn decode_file(path: impl AsRef<Path>) -> Result<PixelGrid> {
    let bytes = std::fs::read(path)?;
    decode(&bytes)
}

fn to_grid(img: DynamicImage) -> PixelGrid {
    let (width, height) = (img.width(), img.height());
    if img.color().has_alpha() {
        PixelGrid {
            width,
            height,
            channels: 4,
            data: img.into_rgba8().into_raw(),
        }
    } else {
        PixelGrid {
            width,
            height,
            channels: 3,
            data: img.into_rgb8().into_raw(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Error;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png(img: DynamicImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_keeps_alpha() {
        let img = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 40]));
        let grid = decode(&png(DynamicImage::ImageRgba8(img))).unwrap();
        assert_eq!((grid.width, grid.height, grid.channels), (3, 2, 4));
        assert_eq!(&grid.data[..4], &[10, 20, 30, 40]);
    }

    #[test]
    fn test_decode_expands_grayscale() {
        let img = image::GrayImage::from_pixel(2, 2, image::Luma([7]));
        let grid = decode(&png(DynamicImage::ImageLuma8(img))).unwrap();
        assert_eq!(grid.channels, 3);
        assert_eq!(grid.data, vec![7; 12]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode(b"not an image"), Err(Error::Image(_))));
    }
}
