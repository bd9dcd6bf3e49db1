use crate::core::{Result, Tensor};

/// Sequence-axis cache of attention keys and values.
pub trait KVCache: Send + Sync {
    /// Copy of the live prefix, the part the decoder attends to.
    fn live(&self) -> Result<Tensor>;

    /// Appends `update` after the live prefix and returns the new length.
    fn extend(&mut self, update: &Tensor) -> Result<usize>;

    fn len(&self) -> usize;
    fn capacity(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remaining(&self) -> usize {
        self.capacity().saturating_sub(self.len())
    }
}
