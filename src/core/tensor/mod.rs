pub mod ops;

pub use ops::{concatenate, stack, TensorOps};

use crate::core::{Error, Result};
use std::borrow::Cow;
use std::ops::{Range, RangeFull};

/// Element type tag. Storage is always `f32`; the tag tells engine adapters
/// what the graph expects (token ids travel as `I64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DType {
    #[default]
    F32,
    I64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    pub fn from_slice(dims: &[usize]) -> Self {
        Self { dims: dims.to_vec() }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn last(&self) -> Option<&usize> {
        self.dims.last()
    }

    pub fn dim(&self, idx: usize) -> Option<usize> {
        self.dims.get(idx).copied()
    }

    /// Row-major strides: `stride[i]` is the product of every dim after `i`.
    pub fn canonical_strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.dims.len()];
        for i in (0..self.dims.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    fn validate(&self) -> Result<()> {
        if self.dims.iter().any(|&d| d == 0) {
            return Err(Error::InvalidShape {
                shape: self.dims.clone(),
            });
        }
        Ok(())
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::from_slice(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self::new(dims.to_vec())
    }
}

/// Selection along one axis: the whole axis or a half-open `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisRange {
    Full,
    Range(usize, usize),
}

impl AxisRange {
    fn resolve(self, dim: usize, axis: usize, dims: &[usize]) -> Result<(usize, usize)> {
        match self {
            AxisRange::Full => Ok((0, dim)),
            AxisRange::Range(start, end) => {
                if end > dim {
                    let mut index = vec![0; dims.len()];
                    index[axis] = end;
                    return Err(Error::Index {
                        index,
                        shape: dims.to_vec(),
                    });
                }
                if start >= end {
                    let mut shape = dims.to_vec();
                    shape[axis] = end.saturating_sub(start);
                    return Err(Error::InvalidShape { shape });
                }
                Ok((start, end))
            }
        }
    }
}

impl From<Range<usize>> for AxisRange {
    fn from(r: Range<usize>) -> Self {
        AxisRange::Range(r.start, r.end)
    }
}

impl From<RangeFull> for AxisRange {
    fn from(_: RangeFull) -> Self {
        AxisRange::Full
    }
}

/// Strided N-dimensional `f32` buffer.
///
/// A tensor owns its buffer outright. Every operation except
/// [`Tensor::assign_slice`] allocates a fresh canonical (row-major, offset 0)
/// tensor, so results never alias their inputs.
#[derive(Debug, Clone)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Shape,
    strides: Vec<usize>,
    offset: usize,
    dtype: DType,
}

impl Tensor {
    pub fn new(data: Vec<f32>, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        shape.validate()?;
        if data.len() != shape.numel() {
            return Err(Error::shape_mismatch(format!(
                "buffer of {} elements cannot back shape {:?}",
                data.len(),
                shape.dims()
            )));
        }
        let strides = shape.canonical_strides();
        Ok(Self {
            data,
            shape,
            strides,
            offset: 0,
            dtype: DType::F32,
        })
    }

    pub fn zeros(shape: impl Into<Shape>) -> Result<Self> {
        Self::filled(shape, 0.0)
    }

    pub fn filled(shape: impl Into<Shape>, value: f32) -> Result<Self> {
        let shape = shape.into();
        shape.validate()?;
        let numel = shape.numel();
        Self::new(vec![value; numel], shape)
    }

    /// Wraps an existing buffer with explicit strides and offset.
    pub fn from_parts(
        data: Vec<f32>,
        shape: impl Into<Shape>,
        strides: Vec<usize>,
        offset: usize,
    ) -> Result<Self> {
        let shape = shape.into();
        shape.validate()?;
        if strides.len() != shape.rank() {
            return Err(Error::shape_mismatch(format!(
                "{} strides given for rank {}",
                strides.len(),
                shape.rank()
            )));
        }
        let furthest = offset
            + shape
                .dims()
                .iter()
                .zip(&strides)
                .map(|(&d, &s)| (d - 1) * s)
                .sum::<usize>();
        if furthest >= data.len() {
            return Err(Error::shape_mismatch(format!(
                "strides {:?} with offset {} reach element {} of a {}-element buffer",
                strides,
                offset,
                furthest,
                data.len()
            )));
        }
        Ok(Self {
            data,
            shape,
            strides,
            offset,
            dtype: DType::F32,
        })
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Backing buffer in storage order. Equals the logical row-major order
    /// for every tensor produced by this layer; see [`Tensor::is_contiguous`].
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    pub fn is_contiguous(&self) -> bool {
        self.offset == 0
            && self.data.len() == self.numel()
            && self.strides == self.shape.canonical_strides()
    }

    /// Elements in logical row-major order.
    pub fn to_vec(&self) -> Vec<f32> {
        if self.is_contiguous() {
            return self.data.clone();
        }
        let bounds: Vec<(usize, usize)> = self.dims().iter().map(|&d| (0, d)).collect();
        let mut out = Vec::with_capacity(self.numel());
        visit_runs(&self.strides, self.offset, &bounds, |start, len, step| {
            if step == 1 {
                out.extend_from_slice(&self.data[start..start + len]);
            } else {
                out.extend((0..len).map(|k| self.data[start + k * step]));
            }
        });
        out
    }

    pub fn into_vec(self) -> Vec<f32> {
        if self.is_contiguous() {
            self.data
        } else {
            self.to_vec()
        }
    }

    /// Canonical copy; a no-op clone when already canonical.
    pub fn contiguous(&self) -> Tensor {
        let strides = self.shape.canonical_strides();
        Tensor {
            data: self.to_vec(),
            shape: self.shape.clone(),
            strides,
            offset: 0,
            dtype: self.dtype,
        }
    }

    pub(crate) fn canonical(&self) -> Cow<'_, Tensor> {
        if self.is_contiguous() {
            Cow::Borrowed(self)
        } else {
            Cow::Owned(self.contiguous())
        }
    }

    fn storage_index(&self, indices: &[usize]) -> Result<usize> {
        if indices.len() != self.rank()
            || indices.iter().zip(self.dims()).any(|(&i, &d)| i >= d)
        {
            return Err(Error::Index {
                index: indices.to_vec(),
                shape: self.dims().to_vec(),
            });
        }
        Ok(self.offset
            + indices
                .iter()
                .zip(&self.strides)
                .map(|(&i, &s)| i * s)
                .sum::<usize>())
    }

    pub fn get(&self, indices: &[usize]) -> Result<f32> {
        let idx = self.storage_index(indices)?;
        Ok(self.data[idx])
    }

    pub fn set(&mut self, indices: &[usize], value: f32) -> Result<()> {
        let idx = self.storage_index(indices)?;
        self.data[idx] = value;
        Ok(())
    }

    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<Tensor> {
        let shape = shape.into();
        shape.validate()?;
        if shape.numel() != self.numel() {
            return Err(Error::shape_mismatch(format!(
                "cannot reshape {:?} ({} elements) into {:?}",
                self.dims(),
                self.numel(),
                shape.dims()
            )));
        }
        Ok(Tensor::new(self.to_vec(), shape)?.with_dtype(self.dtype))
    }

    fn resolve_ranges(&self, ranges: &[AxisRange]) -> Result<Vec<(usize, usize)>> {
        if ranges.len() > self.rank() {
            return Err(Error::shape_mismatch(format!(
                "{} axis ranges given for rank {}",
                ranges.len(),
                self.rank()
            )));
        }
        let dims = self.dims();
        dims.iter()
            .enumerate()
            .map(|(axis, &dim)| {
                ranges
                    .get(axis)
                    .copied()
                    .unwrap_or(AxisRange::Full)
                    .resolve(dim, axis, dims)
            })
            .collect()
    }

    /// Copies the selected sub-region into a new tensor. Axes without a range
    /// are taken in full.
    pub fn slice(&self, ranges: &[AxisRange]) -> Result<Tensor> {
        let bounds = self.resolve_ranges(ranges)?;
        let dims: Vec<usize> = bounds.iter().map(|(s, e)| e - s).collect();
        let mut out = Vec::with_capacity(dims.iter().product());
        visit_runs(&self.strides, self.offset, &bounds, |start, len, step| {
            if step == 1 {
                out.extend_from_slice(&self.data[start..start + len]);
            } else {
                out.extend((0..len).map(|k| self.data[start + k * step]));
            }
        });
        Ok(Tensor::new(out, dims)?.with_dtype(self.dtype))
    }

    /// Exchanges two axes, recomputing every element's position.
    pub fn swap_axes(&self, a: usize, b: usize) -> Result<Tensor> {
        let rank = self.rank();
        if a >= rank || b >= rank {
            return Err(Error::Index {
                index: vec![a, b],
                shape: self.dims().to_vec(),
            });
        }
        let mut new_dims = self.dims().to_vec();
        new_dims.swap(a, b);
        let numel = self.numel();
        let mut out = vec![0.0; numel];
        let mut new_idx = vec![0usize; rank];
        for slot in out.iter_mut() {
            let mut old_idx = new_idx.clone();
            old_idx.swap(a, b);
            let src = self.offset
                + old_idx
                    .iter()
                    .zip(&self.strides)
                    .map(|(&i, &s)| i * s)
                    .sum::<usize>();
            *slot = self.data[src];
            for axis in (0..rank).rev() {
                new_idx[axis] += 1;
                if new_idx[axis] < new_dims[axis] {
                    break;
                }
                new_idx[axis] = 0;
            }
        }
        Ok(Tensor::new(out, new_dims)?.with_dtype(self.dtype))
    }

    /// Writes `source` into the region selected by `ranges`, in place.
    ///
    /// This is the only mutating operation of the tensor layer: `self` is
    /// changed and callers must not assume it keeps its previous contents.
    /// Source elements are taken in row-major order and laid into the region
    /// in row-major order; only the element counts have to agree. Everything
    /// outside the region is left untouched.
    pub fn assign_slice(&mut self, ranges: &[AxisRange], source: &Tensor) -> Result<()> {
        let bounds = self.resolve_ranges(ranges)?;
        let selected: usize = bounds.iter().map(|(s, e)| e - s).product();
        if selected != source.numel() {
            return Err(Error::shape_mismatch(format!(
                "region of {} elements cannot take a source of {} elements {:?}",
                selected,
                source.numel(),
                source.dims()
            )));
        }
        let source = source.canonical();
        let src = source.data();
        let data = &mut self.data;
        let mut cursor = 0;
        visit_runs(&self.strides, self.offset, &bounds, |start, len, step| {
            if step == 1 {
                data[start..start + len].copy_from_slice(&src[cursor..cursor + len]);
            } else {
                for k in 0..len {
                    data[start + k * step] = src[cursor + k];
                }
            }
            cursor += len;
        });
        Ok(())
    }
}

/// Calls `f(start, len, step)` for every run along the last axis of the
/// region `bounds`, in row-major order.
fn visit_runs(
    strides: &[usize],
    offset: usize,
    bounds: &[(usize, usize)],
    mut f: impl FnMut(usize, usize, usize),
) {
    let rank = bounds.len();
    if rank == 0 {
        f(offset, 1, 1);
        return;
    }
    let last = rank - 1;
    let (last_start, last_end) = bounds[last];
    let step = strides[last];
    let mut idx: Vec<usize> = bounds[..last].iter().map(|&(s, _)| s).collect();
    loop {
        let base = offset
            + idx.iter().zip(strides).map(|(&i, &s)| i * s).sum::<usize>()
            + last_start * step;
        f(base, last_end - last_start, step);

        let mut axis = last;
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            idx[axis] += 1;
            if idx[axis] < bounds[axis].1 {
                break;
            }
            idx[axis] = bounds[axis].0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arange(dims: &[usize]) -> Tensor {
        let n: usize = dims.iter().product();
        Tensor::new((0..n).map(|i| i as f32).collect(), dims).unwrap()
    }

    #[test]
    fn test_tensor_creation() {
        let t = Tensor::zeros([10, 20]).unwrap();
        assert_eq!(t.dims(), &[10, 20]);
        assert_eq!(t.strides(), &[20, 1]);
        assert_eq!(t.numel(), 200);
        assert!(t.is_contiguous());
    }

    #[test]
    fn test_zeros_rejects_empty_dimension() {
        let err = Tensor::zeros([3, 0, 2]).unwrap_err();
        assert!(matches!(err, Error::InvalidShape { .. }));
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        let err = Tensor::new(vec![1.0, 2.0], [3]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
    }

    #[test]
    fn test_get_set() {
        let mut t = arange(&[2, 3, 4]);
        assert_eq!(t.get(&[1, 2, 3]).unwrap(), 23.0);
        t.set(&[0, 1, 2], -1.0).unwrap();
        assert_eq!(t.get(&[0, 1, 2]).unwrap(), -1.0);
        assert!(matches!(t.get(&[2, 0, 0]), Err(Error::Index { .. })));
        assert!(matches!(t.get(&[0, 0]), Err(Error::Index { .. })));
    }

    #[test]
    fn test_reshape_round_trip() {
        let t = arange(&[2, 3, 4]);
        let r = t.reshape([4, 6]).unwrap();
        assert_eq!(r.numel(), t.numel());
        let back = r.reshape([2, 3, 4]).unwrap();
        assert_eq!(back.dims(), t.dims());
        assert_eq!(back.data(), t.data());
        assert!(matches!(t.reshape([5, 5]), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_slice_copies_region() {
        let t = arange(&[3, 4]);
        let s = t.slice(&[(1..3).into(), (1..3).into()]).unwrap();
        assert_eq!(s.dims(), &[2, 2]);
        assert_eq!(s.data(), &[5.0, 6.0, 9.0, 10.0]);

        let rows = t.slice(&[(2..3).into()]).unwrap();
        assert_eq!(rows.data(), &[8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_slice_bounds() {
        let t = arange(&[3, 4]);
        assert!(matches!(t.slice(&[(0..4).into()]), Err(Error::Index { .. })));
        assert!(matches!(
            t.slice(&[(2..2).into()]),
            Err(Error::InvalidShape { .. })
        ));
    }

    #[test]
    fn test_swap_axes_involution() {
        let t = arange(&[2, 3, 4]);
        let s = t.swap_axes(0, 2).unwrap();
        assert_eq!(s.dims(), &[4, 3, 2]);
        assert_eq!(s.get(&[3, 1, 0]).unwrap(), t.get(&[0, 1, 3]).unwrap());
        let back = s.swap_axes(0, 2).unwrap();
        assert_eq!(back.dims(), t.dims());
        assert_eq!(back.data(), t.data());
    }

    #[test]
    fn test_assign_slice_only_touches_region() {
        let mut t = Tensor::zeros([3, 4]).unwrap();
        let src = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap();
        t.assign_slice(&[(1..3).into(), (2..4).into()], &src).unwrap();

        let region = t.slice(&[(1..3).into(), (2..4).into()]).unwrap();
        assert_eq!(region.data(), src.data());
        let outside: f32 = t.data().iter().sum::<f32>() - src.data().iter().sum::<f32>();
        assert_eq!(outside, 0.0);
        assert_eq!(t.get(&[0, 3]).unwrap(), 0.0);
        assert_eq!(t.get(&[1, 1]).unwrap(), 0.0);
    }

    #[test]
    fn test_assign_slice_size_mismatch() {
        let mut t = Tensor::zeros([3, 4]).unwrap();
        let src = Tensor::zeros([3]).unwrap();
        let err = t.assign_slice(&[(0..2).into(), (0..2).into()], &src).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
    }

    #[test]
    fn test_strided_view_reads_logically() {
        // 2x3 buffer viewed as its 3x2 transpose.
        let data = vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let view = Tensor::from_parts(data, [3, 2], vec![1, 3], 0).unwrap();
        assert!(!view.is_contiguous());
        assert_eq!(view.get(&[2, 1]).unwrap(), 5.0);
        assert_eq!(view.to_vec(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        let sliced = view.slice(&[(1..3).into()]).unwrap();
        assert_eq!(sliced.data(), &[1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn test_from_parts_rejects_out_of_buffer() {
        let err = Tensor::from_parts(vec![0.0; 4], [2, 2], vec![2, 1], 1).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
    }
}
