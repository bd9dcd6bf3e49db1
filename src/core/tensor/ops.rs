use super::Tensor;
use crate::core::{Error, Result};

pub trait TensorOps {
    /// Index of the largest value in the final row (last axis). Ties resolve
    /// to the lowest index.
    fn argmax_last(&self) -> Result<usize>;
    fn map(&self, f: impl Fn(f32) -> f32) -> Tensor;
    fn sum(&self) -> f32;
    fn mean(&self) -> f32;
    fn max(&self) -> f32;
    fn min(&self) -> f32;
}

impl TensorOps for Tensor {
    fn argmax_last(&self) -> Result<usize> {
        let width = self
            .shape()
            .last()
            .copied()
            .ok_or_else(|| Error::shape_mismatch("argmax needs at least one axis"))?;
        let values = self.to_vec();
        let row = &values[values.len() - width..];
        let mut best = 0;
        for (i, &v) in row.iter().enumerate() {
            if v > row[best] {
                best = i;
            }
        }
        Ok(best)
    }

    fn map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        let mut out = self.contiguous();
        for v in out.data.iter_mut() {
            *v = f(*v);
        }
        out
    }

    fn sum(&self) -> f32 {
        self.to_vec().iter().sum()
    }

    fn mean(&self) -> f32 {
        self.sum() / self.numel() as f32
    }

    fn max(&self) -> f32 {
        self.to_vec().into_iter().fold(f32::NEG_INFINITY, f32::max)
    }

    fn min(&self) -> f32 {
        self.to_vec().into_iter().fold(f32::INFINITY, f32::min)
    }
}

/// Joins tensors along their trailing axis. Only ranks 1 through 3 are
/// supported; [`concatenate`] reduces everything else to that case.
fn concat_trailing(tensors: &[Tensor]) -> Result<Tensor> {
    let first = tensors
        .first()
        .ok_or_else(|| Error::shape_mismatch("cannot concatenate an empty list"))?;
    let rank = first.rank();
    if !(1..=3).contains(&rank) {
        return Err(Error::shape_mismatch(format!(
            "trailing concatenation supports rank 1 to 3, got {}",
            rank
        )));
    }
    let lead = &first.dims()[..rank - 1];
    if let Some(bad) = tensors
        .iter()
        .find(|t| t.rank() != rank || &t.dims()[..rank - 1] != lead)
    {
        return Err(Error::shape_mismatch(format!(
            "cannot join {:?} with {:?} along the last axis",
            bad.dims(),
            first.dims()
        )));
    }

    let rows: usize = lead.iter().product();
    let sources: Vec<_> = tensors.iter().map(|t| t.canonical()).collect();
    let widths: Vec<usize> = tensors.iter().map(|t| t.dims()[rank - 1]).collect();
    let total: usize = widths.iter().sum();

    let mut data = Vec::with_capacity(rows * total);
    for r in 0..rows {
        for (src, &w) in sources.iter().zip(&widths) {
            data.extend_from_slice(&src.data()[r * w..(r + 1) * w]);
        }
    }

    let mut dims = lead.to_vec();
    dims.push(total);
    Ok(Tensor::new(data, dims)?.with_dtype(first.dtype()))
}

/// Joins tensors along `axis`. Every other axis must agree.
///
/// The concat axis is moved to the end, leading axes are folded into one
/// when the rank exceeds 3, the trailing join runs, and the input layout
/// is restored.
pub fn concatenate(tensors: &[Tensor], axis: usize) -> Result<Tensor> {
    let first = tensors
        .first()
        .ok_or_else(|| Error::shape_mismatch("cannot concatenate an empty list"))?;
    let rank = first.rank();
    if axis >= rank {
        return Err(Error::Index {
            index: vec![axis],
            shape: first.dims().to_vec(),
        });
    }
    for t in tensors {
        let compatible = t.rank() == rank
            && t
                .dims()
                .iter()
                .zip(first.dims())
                .enumerate()
                .all(|(i, (a, b))| i == axis || a == b);
        if !compatible {
            return Err(Error::shape_mismatch(format!(
                "cannot concatenate {:?} with {:?} along axis {}",
                t.dims(),
                first.dims(),
                axis
            )));
        }
    }

    let last = rank - 1;
    let moved: Vec<Tensor> = if axis == last {
        tensors.to_vec()
    } else {
        tensors
            .iter()
            .map(|t| t.swap_axes(axis, last))
            .collect::<Result<_>>()?
    };

    let joined = if rank > 3 {
        let lead = moved[0].dims()[..last].to_vec();
        let rows: usize = lead.iter().product();
        let flat = moved
            .iter()
            .map(|t| t.reshape([rows, t.dims()[last]]))
            .collect::<Result<Vec<_>>>()?;
        let joined = concat_trailing(&flat)?;
        let mut dims = lead;
        dims.push(joined.dims()[1]);
        joined.reshape(dims)?
    } else {
        concat_trailing(&moved)?
    };

    if axis == last {
        Ok(joined)
    } else {
        joined.swap_axes(axis, last)
    }
}

/// Stacks equally shaped tensors along a new leading axis.
pub fn stack(tensors: &[Tensor]) -> Result<Tensor> {
    let first = tensors
        .first()
        .ok_or_else(|| Error::shape_mismatch("cannot stack an empty list"))?;
    let mut data = Vec::with_capacity(first.numel() * tensors.len());
    for t in tensors {
        if t.dims() != first.dims() {
            return Err(Error::shape_mismatch(format!(
                "cannot stack {:?} with {:?}",
                t.dims(),
                first.dims()
            )));
        }
        data.extend_from_slice(t.canonical().data());
    }
    let mut dims = vec![tensors.len()];
    dims.extend_from_slice(first.dims());
    Ok(Tensor::new(data, dims)?.with_dtype(first.dtype()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tensor::AxisRange;

    fn arange(dims: &[usize], start: f32) -> Tensor {
        let n: usize = dims.iter().product();
        Tensor::new((0..n).map(|i| start + i as f32).collect(), dims).unwrap()
    }

    #[test]
    fn test_concatenate_last_axis() {
        let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap();
        let b = Tensor::new(vec![5.0, 6.0], [2, 1]).unwrap();
        let c = concatenate(&[a, b], 1).unwrap();
        assert_eq!(c.dims(), &[2, 3]);
        assert_eq!(c.data(), &[1.0, 2.0, 5.0, 3.0, 4.0, 6.0]);
    }

    #[test]
    fn test_concatenate_first_axis() {
        let a = Tensor::new(vec![1.0, 2.0], [1, 2]).unwrap();
        let b = Tensor::new(vec![3.0, 4.0, 5.0, 6.0], [2, 2]).unwrap();
        let c = concatenate(&[a, b], 0).unwrap();
        assert_eq!(c.dims(), &[3, 2]);
        assert_eq!(c.data(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_concatenate_then_slice_recovers_inputs_rank6() {
        // Shaped like a KV cache: (layers, 2, batch, heads, seq, head_dim).
        let a = arange(&[2, 2, 1, 3, 2, 4], 0.0);
        let b = arange(&[2, 2, 1, 3, 5, 4], 1000.0);
        let c = concatenate(&[a.clone(), b.clone()], 4).unwrap();
        assert_eq!(c.dims(), &[2, 2, 1, 3, 7, 4]);

        let full = AxisRange::Full;
        let left = c.slice(&[full, full, full, full, (0..2).into()]).unwrap();
        let right = c.slice(&[full, full, full, full, (2..7).into()]).unwrap();
        assert_eq!(left.data(), a.data());
        assert_eq!(right.data(), b.data());
    }

    #[test]
    fn test_concatenate_rejects_mismatch() {
        let a = Tensor::zeros([2, 3]).unwrap();
        let b = Tensor::zeros([3, 3]).unwrap();
        assert!(matches!(
            concatenate(&[a.clone(), b.clone()], 1),
            Err(Error::ShapeMismatch(_))
        ));
        assert!(concatenate(&[a, b], 0).is_ok());
        assert!(matches!(concatenate(&[], 0), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_stack() {
        let a = Tensor::new(vec![1.0, 2.0], [2]).unwrap();
        let b = Tensor::new(vec![3.0, 4.0], [2]).unwrap();
        let s = stack(&[a, b]).unwrap();
        assert_eq!(s.dims(), &[2, 2]);
        assert_eq!(s.data(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_argmax_last_row() {
        let t = Tensor::new(vec![9.0, 0.0, 0.0, 1.0, 3.0, 3.0], [2, 3]).unwrap();
        assert_eq!(t.argmax_last().unwrap(), 1);
    }

    #[test]
    fn test_map_and_mean() {
        let t = Tensor::new(vec![1.0, 2.0, 3.0], [3]).unwrap();
        let doubled = t.map(|x| x * 2.0);
        assert_eq!(doubled.data(), &[2.0, 4.0, 6.0]);
        assert!((t.mean() - 2.0).abs() < 1e-6);
        assert_eq!(t.max(), 3.0);
        assert_eq!(t.min(), 1.0);
    }
}
