pub mod edges;
pub mod fill;
pub mod paint;

use crate::canvas::{LayerStack, PixelBuffer};
use crate::error::{LayerError, Result};

impl LayerStack {
    /// Run `op` on a copy of the active layer's buffer and push the result
    /// back. When `op` fails the layer keeps its previous pixels.
    pub fn paint_active<T>(&mut self, op: impl FnOnce(&mut PixelBuffer) -> Result<T>) -> Result<T> {
        match self.active_index() {
            Some(index) => self.paint_at(index, op),
            None => Err(LayerError::NoLayer { index: 0, len: 0 }),
        }
    }

    /// [`LayerStack::paint_active`] for an explicit layer index. A buffer
    /// resized by `op` is rejected and the layer keeps its pixels.
    pub fn paint_at<T>(&mut self, index: usize, op: impl FnOnce(&mut PixelBuffer) -> Result<T>) -> Result<T> {
        let len = self.len();
        let mut scratch = match self.at(index) {
            Some(layer) => layer.buffer().clone(),
            None => return Err(LayerError::NoLayer { index, len }),
        };
        let out = op(&mut scratch)?;
        self.replace_buffer_at(index, scratch)?;
        Ok(out)
    }
}
