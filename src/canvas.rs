use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::error::{LayerError, Result};

/// Added to the output alpha before dividing so a fully transparent result
/// does not produce 0/0.
const COMPOSITE_EPSILON: f32 = 1e-6;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

// ============================================================================
// PIXEL BUFFER – fixed-size RGBA grid
// ============================================================================

/// Rectangular RGBA8 pixel grid. Dimensions are fixed at creation; every
/// mutation goes through pixel writes or a whole-buffer replacement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    image: RgbaImage,
}

impl PixelBuffer {
    /// Fully transparent buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self::new_filled(width, height, TRANSPARENT)
    }

    pub fn new_filled(width: u32, height: u32, color: Rgba<u8>) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, color),
        }
    }

    pub fn from_rgba_image(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Wrap raw RGBA bytes; the length must be exactly `width * height * 4`.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        let actual = data.len();
        RgbaImage::from_raw(width, height, data)
            .map(Self::from_rgba_image)
            .ok_or_else(|| {
                LayerError::invalid_input(format!(
                    "pixel data has {} bytes, expected {} ({}x{}x4)",
                    actual, expected, width, height
                ))
            })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width() as i64 && y < self.height() as i64
    }

    pub fn get(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        self.image.get_pixel_checked(x, y).copied()
    }

    /// Returns `false` (and writes nothing) when the coordinate is off-canvas.
    pub fn put(&mut self, x: u32, y: u32, pixel: Rgba<u8>) -> bool {
        match self.image.get_pixel_mut_checked(x, y) {
            Some(p) => {
                *p = pixel;
                true
            }
            None => false,
        }
    }

    pub fn as_rgba_image(&self) -> &RgbaImage {
        &self.image
    }

    pub(crate) fn as_rgba_image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    pub fn into_rgba_image(self) -> RgbaImage {
        self.image
    }

    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }
}

// ============================================================================
// LAYER
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layer {
    name: String,
    buffer: PixelBuffer,
    visible: bool,
}

impl Layer {
    /// Transparent, visible layer.
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self::from_buffer(name, PixelBuffer::new(width, height))
    }

    /// The opaque white base layer every editable stack starts with.
    pub fn background(width: u32, height: u32) -> Self {
        Self::from_buffer("Background", PixelBuffer::new_filled(width, height, WHITE))
    }

    pub fn from_buffer(name: impl Into<String>, buffer: PixelBuffer) -> Self {
        Self {
            name: name.into(),
            buffer,
            visible: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_hidden(&self) -> bool {
        !self.visible
    }

    pub fn hide(&mut self) {
        self.visible = false;
    }

    pub fn show(&mut self) {
        self.visible = true;
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn toggle_visible(&mut self) {
        self.visible = !self.visible;
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    /// Whole-buffer swaps go through [`Layer::update`], which keeps the
    /// dimensions fixed.
    #[cfg(test)]
    pub(crate) fn buffer_mut(&mut self) -> &mut PixelBuffer {
        &mut self.buffer
    }

    /// Replace the whole pixel buffer, e.g. after a paint operation ran on a
    /// working copy. The replacement must keep the layer's dimensions.
    pub fn update(&mut self, buffer: PixelBuffer) -> Result<()> {
        if buffer.dimensions() != self.buffer.dimensions() {
            return Err(LayerError::invalid_input(format!(
                "buffer is {}x{}, layer '{}' is {}x{}",
                buffer.width(),
                buffer.height(),
                self.name,
                self.buffer.width(),
                self.buffer.height()
            )));
        }
        self.buffer = buffer;
        Ok(())
    }
}

// ============================================================================
// LAYER STACK
// ============================================================================

/// Ordered layers, bottom (index 0) to top. Every layer shares the stack's
/// dimensions, and `active` is a valid index whenever the stack is non-empty.
///
/// Index-based mutators return `false` and leave the stack untouched when
/// given an out-of-range index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerStack {
    layers: Vec<Layer>,
    width: u32,
    height: u32,
    active: usize,
}

impl LayerStack {
    /// Empty stack. Call [`LayerStack::add_base_layers`] before editing.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            layers: Vec::new(),
            width,
            height,
            active: 0,
        }
    }

    /// Stack with a white background plus one empty working layer, the
    /// working layer selected.
    pub fn with_base_layers(width: u32, height: u32) -> Self {
        let mut stack = Self::new(width, height);
        stack.add_base_layers();
        stack
    }

    /// Rebuild from already-validated parts; `active` is clamped.
    pub(crate) fn from_parts(width: u32, height: u32, layers: Vec<Layer>, active: usize) -> Self {
        let active = active.min(layers.len().saturating_sub(1));
        Self {
            layers,
            width,
            height,
            active,
        }
    }

    pub fn add_base_layers(&mut self) {
        self.layers.push(Layer::background(self.width, self.height));
        self.create_layer();
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> impl Iterator<Item = &Layer> + '_ {
        self.layers.iter()
    }

    pub fn at(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    #[cfg(test)]
    pub(crate) fn at_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.layers.get_mut(index)
    }

    /// `None` only when the stack has no layers.
    pub fn active_index(&self) -> Option<usize> {
        if self.layers.is_empty() {
            None
        } else {
            Some(self.active)
        }
    }

    pub fn active(&self) -> Option<&Layer> {
        self.layers.get(self.active)
    }

    #[cfg(test)]
    pub(crate) fn active_mut(&mut self) -> Option<&mut Layer> {
        self.layers.get_mut(self.active)
    }

    /// Append a transparent layer named after the number of layers already
    /// present and select it. Names are not unique after deletions.
    pub fn create_layer(&mut self) -> usize {
        let name = format!("Layer {}", self.layers.len());
        self.layers.push(Layer::new(name, self.width, self.height));
        self.active = self.layers.len() - 1;
        log::debug!("created layer {} at index {}", self.layers[self.active].name, self.active);
        self.active
    }

    /// Copy the active layer, insert the copy directly above it and select it.
    pub fn duplicate_active(&mut self) -> Option<usize> {
        let source = self.layers.get(self.active)?;
        let mut copy = source.clone();
        copy.rename(format!("{} - copy", source.name()));
        let new_index = self.active + 1;
        self.layers.insert(new_index, copy);
        self.active = new_index;
        Some(new_index)
    }

    /// Remove the layer at `index`. When the removed index is at or below the
    /// active one the selection moves down with it; removing the bottom layer
    /// while it is active selects the new topmost layer.
    pub fn delete_at(&mut self, index: usize) -> bool {
        if index >= self.layers.len() {
            return false;
        }
        let removed = self.layers.remove(index);
        if index <= self.active {
            if self.active == 0 {
                self.active = self.layers.len().saturating_sub(1);
            } else {
                self.active -= 1;
            }
        }
        log::debug!("deleted layer '{}' at index {}", removed.name(), index);
        true
    }

    pub fn delete_active(&mut self) -> bool {
        if self.layers.is_empty() {
            return false;
        }
        self.delete_at(self.active)
    }

    /// Exchange two layers' positions. The active index is positional and
    /// does not follow either layer.
    pub fn swap(&mut self, i: usize, j: usize) -> bool {
        if i >= self.layers.len() || j >= self.layers.len() {
            return false;
        }
        self.layers.swap(i, j);
        true
    }

    pub fn select(&mut self, index: usize) -> bool {
        if index >= self.layers.len() {
            return false;
        }
        self.active = index;
        true
    }

    pub fn toggle_visible_at(&mut self, index: usize) -> bool {
        match self.layers.get_mut(index) {
            Some(layer) => {
                layer.toggle_visible();
                true
            }
            None => false,
        }
    }

    pub fn rename_at(&mut self, index: usize, name: impl Into<String>) -> bool {
        match self.layers.get_mut(index) {
            Some(layer) => {
                layer.rename(name);
                true
            }
            None => false,
        }
    }

    /// Push a buffer produced by a paint operation back into the active layer.
    pub fn replace_active_buffer(&mut self, buffer: PixelBuffer) -> Result<()> {
        self.replace_buffer_at(self.active, buffer)
    }

    /// Replace the pixels of layer `index`. The buffer must match the stack's
    /// dimensions; on error the layer is unchanged.
    pub fn replace_buffer_at(&mut self, index: usize, buffer: PixelBuffer) -> Result<()> {
        let len = self.layers.len();
        let layer = self
            .layers
            .get_mut(index)
            .ok_or(LayerError::NoLayer { index, len })?;
        layer.update(buffer)
    }

    /// Flatten the stack with the non-premultiplied "over" operator, bottom to
    /// top. The bottom layer is always the base even when it is hidden;
    /// hidden layers above it contribute nothing.
    pub fn composite(&self) -> PixelBuffer {
        let Some(bottom) = self.layers.first() else {
            return PixelBuffer::new(self.width, self.height);
        };
        let mut dst = bottom.buffer().clone();
        for layer in self.layers.iter().skip(1) {
            if layer.is_hidden() {
                continue;
            }
            composite_over(&mut dst, layer.buffer());
        }
        dst
    }
}

/// Draw `top` over `dst` in place. Both buffers share dimensions (a stack
/// invariant), so rows are processed in parallel.
fn composite_over(dst: &mut PixelBuffer, top: &PixelBuffer) {
    let stride = dst.width() as usize * 4;
    if stride == 0 {
        return;
    }
    let top_raw = top.as_raw();
    let dst_raw: &mut [u8] = dst.as_rgba_image_mut();
    dst_raw
        .par_chunks_mut(stride)
        .zip(top_raw.par_chunks(stride))
        .for_each(|(dst_row, top_row)| {
            for (d, t) in dst_row.chunks_exact_mut(4).zip(top_row.chunks_exact(4)) {
                over_pixel(d, t);
            }
        });
}

#[inline]
fn over_pixel(dst: &mut [u8], top: &[u8]) {
    let at = top[3] as f32 / 255.0;
    let ab = dst[3] as f32 / 255.0;
    let ao = at + ab * (1.0 - at);
    let inv = 1.0 / (ao + COMPOSITE_EPSILON);
    for c in 0..3 {
        let co = (top[c] as f32 * at + dst[c] as f32 * ab * (1.0 - at)) * inv;
        dst[c] = co.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (ao * 255.0).round().clamp(0.0, 255.0) as u8;
}
