pub mod traits;

pub use traits::KVCache;

use crate::core::tensor::AxisRange;
use crate::core::{Error, Result, Tensor};

/// Fixed-capacity window over a `(layers, 2, batch, heads, seq, head_dim)`
/// cache. Positions past `len` are zero and never read.
#[derive(Debug)]
pub struct KvCacheWindow {
    buffer: Tensor,
    seq_axis: usize,
    len: usize,
}

impl KvCacheWindow {
    /// Allocates `capacity` positions and copies `prefix` into the front.
    pub fn from_prefix(prefix: &Tensor, capacity: usize) -> Result<Self> {
        if prefix.rank() < 2 {
            return Err(Error::shape_mismatch(format!(
                "kv cache needs a sequence axis, got {:?}",
                prefix.dims()
            )));
        }
        let seq_axis = prefix.rank() - 2;
        let prefix_len = prefix.dims()[seq_axis];
        if prefix_len > capacity {
            return Err(Error::ContextOverflow {
                needed: prefix_len,
                capacity,
            });
        }
        let mut dims = prefix.dims().to_vec();
        dims[seq_axis] = capacity;
        let mut window = Self {
            buffer: Tensor::zeros(dims)?,
            seq_axis,
            len: 0,
        };
        window.write(prefix, prefix_len)?;
        Ok(window)
    }

    fn seq_ranges(&self, start: usize, end: usize) -> Vec<AxisRange> {
        let mut ranges = vec![AxisRange::Full; self.seq_axis];
        ranges.push(AxisRange::Range(start, end));
        ranges
    }

    fn write(&mut self, update: &Tensor, n: usize) -> Result<usize> {
        let needed = self.len + n;
        if needed > self.capacity() {
            return Err(Error::ContextOverflow {
                needed,
                capacity: self.capacity(),
            });
        }
        let ranges = self.seq_ranges(self.len, needed);
        self.buffer.assign_slice(&ranges, update)?;
        self.len = needed;
        Ok(needed)
    }

    pub fn seq_axis(&self) -> usize {
        self.seq_axis
    }

    pub fn into_live(self) -> Result<Tensor> {
        self.live()
    }
}

impl KVCache for KvCacheWindow {
    fn live(&self) -> Result<Tensor> {
        self.buffer.slice(&self.seq_ranges(0, self.len))
    }

    /// The update must match the cache on every axis except the sequence
    /// axis, whose extent is the number of positions appended.
    fn extend(&mut self, update: &Tensor) -> Result<usize> {
        let dims = self.buffer.dims();
        let compatible = update.rank() == dims.len()
            && update
                .dims()
                .iter()
                .zip(dims)
                .enumerate()
                .all(|(axis, (a, b))| axis == self.seq_axis || a == b);
        if !compatible {
            return Err(Error::shape_mismatch(format!(
                "kv update {:?} does not fit cache {:?}",
                update.dims(),
                dims
            )));
        }
        let n = update.dims()[self.seq_axis];
        self.write(update, n)
    }

    fn len(&self) -> usize {
        self.len
    }

    fn capacity(&self) -> usize {
        self.buffer.dims()[self.seq_axis]
    }
}
