use super::PatchTemplate;
use crate::core::tensor::{concatenate, AxisRange};
use crate::core::{Error, Result, Tensor};

fn pool_windows(input: usize, output: usize) -> (usize, usize) {
    let stride = input / output;
    let kernel = input - (output - 1) * stride;
    (stride, kernel)
}

/// Averages an `(H, W, C)` grid down to `(out_h, out_w, C)`.
///
/// Windows start every `floor(in / out)` cells and the kernel is sized so the
/// last window ends exactly on the input edge.
pub fn adaptive_avg_pool2d(input: &Tensor, out_h: usize, out_w: usize) -> Result<Tensor> {
    let dims = input.dims();
    if dims.len() != 3 {
        return Err(Error::shape_mismatch(format!(
            "adaptive pooling expects (H, W, C), got {:?}",
            dims
        )));
    }
    let (in_h, in_w, channels) = (dims[0], dims[1], dims[2]);
    if out_h == 0 || out_w == 0 || out_h > in_h || out_w > in_w {
        return Err(Error::shape_mismatch(format!(
            "cannot pool {}x{} down to {}x{}",
            in_h, in_w, out_h, out_w
        )));
    }
    let (stride_h, kernel_h) = pool_windows(in_h, out_h);
    let (stride_w, kernel_w) = pool_windows(in_w, out_w);
    let area = (kernel_h * kernel_w) as f32;

    let src = input.canonical();
    let src = src.data();
    let mut out = vec![0.0; out_h * out_w * channels];
    for oy in 0..out_h {
        for ox in 0..out_w {
            let cell = &mut out[(oy * out_w + ox) * channels..][..channels];
            for y in oy * stride_h..oy * stride_h + kernel_h {
                for x in ox * stride_w..ox * stride_w + kernel_w {
                    let px = &src[(y * in_w + x) * channels..][..channels];
                    for (acc, &v) in cell.iter_mut().zip(px) {
                        *acc += v;
                    }
                }
            }
            for acc in cell.iter_mut() {
                *acc /= area;
            }
        }
    }
    Tensor::new(out, [out_h, out_w, channels])
}

fn grid_width(seq_len: usize) -> Result<usize> {
    let w = (seq_len as f64).sqrt().round() as usize;
    if w * w != seq_len {
        return Err(Error::shape_mismatch(format!(
            "patch sequence length {} is not a square",
            seq_len
        )));
    }
    Ok(w)
}

fn patch_grid(embeddings: &Tensor, index: usize, w: usize) -> Result<Tensor> {
    let channels = embeddings.dims()[2];
    embeddings
        .slice(&[AxisRange::from(index..index + 1)])?
        .reshape([w, w, channels])
}

/// Reassembles per-patch embeddings `(N, S, C)` into one `(S, 2C)` sequence:
/// the global patch's features next to the pooled local crops.
pub fn merge_patch_embeddings(embeddings: &Tensor, template: PatchTemplate) -> Result<Tensor> {
    let dims = embeddings.dims();
    if dims.len() != 3 {
        return Err(Error::shape_mismatch(format!(
            "patch embeddings must be (N, S, C), got {:?}",
            dims
        )));
    }
    let (count, seq_len, channels) = (dims[0], dims[1], dims[2]);
    if count != template.patch_count() {
        return Err(Error::shape_mismatch(format!(
            "template {} needs {} patch embeddings, got {}",
            template,
            template.patch_count(),
            count
        )));
    }
    let w = grid_width(seq_len)?;
    let global = patch_grid(embeddings, 0, w)?;

    let local = if template.is_identity() {
        global.clone()
    } else {
        let mut rows = Vec::with_capacity(template.rows);
        for r in 0..template.rows {
            let row = (0..template.cols)
                .map(|c| patch_grid(embeddings, 1 + r * template.cols + c, w))
                .collect::<Result<Vec<_>>>()?;
            rows.push(concatenate(&row, 1)?);
        }
        let grid = concatenate(&rows, 0)?;
        adaptive_avg_pool2d(&grid, w, w)?
    };

    concatenate(&[global, local], 2)?.reshape([seq_len, 2 * channels])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tensor::TensorOps;

    fn arange(dims: &[usize]) -> Tensor {
        let n: usize = dims.iter().product();
        Tensor::new((0..n).map(|i| i as f32).collect(), dims).unwrap()
    }

    #[test]
    fn test_identity_merge_halves_are_equal() {
        let emb = arange(&[1, 4, 3]);
        let merged = merge_patch_embeddings(&emb, PatchTemplate::IDENTITY).unwrap();
        assert_eq!(merged.dims(), &[4, 6]);
        let left = merged.slice(&[AxisRange::Full, AxisRange::from(0..3)]).unwrap();
        let right = merged.slice(&[AxisRange::Full, AxisRange::from(3..6)]).unwrap();
        assert_eq!(left.to_vec(), right.to_vec());
        assert_eq!(left.to_vec(), emb.to_vec());
    }

    #[test]
    fn test_tiled_merge_pools_local_grid() {
        // 1 global + 2x2 crops, each crop constant so pooling reduces to that
        // constant per quadrant.
        let (w, c) = (2, 1);
        let mut data = vec![0.0; 5 * w * w * c];
        for (patch, value) in [(1, 10.0), (2, 20.0), (3, 30.0), (4, 40.0)] {
            data[patch * w * w..(patch + 1) * w * w].fill(value);
        }
        let emb = Tensor::new(data, [5, w * w, c]).unwrap();
        let merged = merge_patch_embeddings(&emb, PatchTemplate::new(2, 2)).unwrap();
        assert_eq!(merged.dims(), &[4, 2]);
        let local = merged.slice(&[AxisRange::Full, AxisRange::from(1..2)]).unwrap();
        assert_eq!(local.to_vec(), vec![10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_merge_rejects_wrong_patch_count() {
        let emb = arange(&[3, 4, 2]);
        assert!(matches!(
            merge_patch_embeddings(&emb, PatchTemplate::new(2, 2)),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_merge_rejects_non_square_sequence() {
        let emb = arange(&[1, 5, 2]);
        assert!(merge_patch_embeddings(&emb, PatchTemplate::IDENTITY).is_err());
    }

    #[test]
    fn test_pool_kernel_absorbs_remainder() {
        assert_eq!(pool_windows(5, 2), (2, 3));
        assert_eq!(pool_windows(54, 27), (2, 2));

        let input = arange(&[5, 1, 1]);
        let pooled = adaptive_avg_pool2d(&input, 2, 1).unwrap();
        // windows [0, 1, 2] and [2, 3, 4]
        assert_eq!(pooled.to_vec(), vec![1.0, 3.0]);
    }

    #[test]
    fn test_pool_to_one_cell_is_mean() {
        let input = arange(&[3, 3, 2]);
        let pooled = adaptive_avg_pool2d(&input, 1, 1).unwrap();
        let expected = input.mean();
        assert_eq!(pooled.dims(), &[1, 1, 2]);
        assert!((pooled.to_vec().iter().sum::<f32>() / 2.0 - expected).abs() < 1e-5);
    }
}
