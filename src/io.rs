// ============================================================================
// PERSISTENCE — layer-stack snapshots and per-layer PNG export
// ============================================================================

use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::png::PngEncoder;
use image::{ColorType, GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::canvas::{Layer, LayerStack, PixelBuffer};
use crate::error::{LayerError, Result};

// ============================================================================
// SNAPSHOT FORMAT
// ============================================================================

/// Magic string identifying a snapshot blob.
const SNAPSHOT_MAGIC: &str = "LLS1";

/// Maximum supported canvas dimension in pixels (per axis).
const MAX_CANVAS_DIM: u32 = 32_768;
/// Maximum number of layers in a snapshot.
const MAX_LAYERS: usize = 256;

#[derive(Serialize, Deserialize)]
pub(crate) struct StackFile {
    magic: String,
    width: u32,
    height: u32,
    active_index: usize,
    layers: Vec<LayerData>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct LayerData {
    name: String,
    visible: bool,
    width: u32,
    height: u32,
    /// Raw RGBA, row-major.
    pixels: Vec<u8>,
}

impl StackFile {
    fn from_stack(stack: &LayerStack) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC.to_string(),
            width: stack.width(),
            height: stack.height(),
            active_index: stack.active_index().unwrap_or(0),
            layers: stack
                .layers()
                .map(|layer| LayerData {
                    name: layer.name().to_string(),
                    visible: layer.is_visible(),
                    width: layer.buffer().width(),
                    height: layer.buffer().height(),
                    pixels: layer.buffer().as_raw().to_vec(),
                })
                .collect(),
        }
    }

    fn into_stack(self) -> Result<LayerStack> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(LayerError::InvalidFormat(format!("Unknown magic '{}'", self.magic)));
        }
        if self.width == 0 || self.height == 0 {
            return Err(LayerError::InvalidFormat("Canvas dimensions cannot be zero".into()));
        }
        if self.width > MAX_CANVAS_DIM || self.height > MAX_CANVAS_DIM {
            return Err(LayerError::InvalidFormat(format!(
                "Canvas size {}x{} exceeds maximum allowed {}x{}",
                self.width, self.height, MAX_CANVAS_DIM, MAX_CANVAS_DIM
            )));
        }
        if self.layers.len() > MAX_LAYERS {
            return Err(LayerError::InvalidFormat(format!(
                "Snapshot contains {} layers, which exceeds the maximum of {}",
                self.layers.len(),
                MAX_LAYERS
            )));
        }

        let expected = self.width as usize * self.height as usize * 4;
        let mut layers = Vec::with_capacity(self.layers.len());
        for ld in self.layers {
            if ld.width != self.width || ld.height != self.height {
                return Err(LayerError::InvalidFormat(format!(
                    "Layer '{}' is {}x{}, stack is {}x{}",
                    ld.name, ld.width, ld.height, self.width, self.height
                )));
            }
            if ld.pixels.len() != expected {
                return Err(LayerError::InvalidFormat(format!(
                    "Layer '{}' has {} bytes, expected {}",
                    ld.name,
                    ld.pixels.len(),
                    expected
                )));
            }
            let buffer = PixelBuffer::from_raw(ld.width, ld.height, ld.pixels)?;
            let mut layer = Layer::from_buffer(ld.name, buffer);
            layer.set_visible(ld.visible);
            layers.push(layer);
        }

        if !layers.is_empty() && self.active_index >= layers.len() {
            log::warn!(
                "snapshot active index {} out of range for {} layers, clamping",
                self.active_index,
                layers.len()
            );
        }
        Ok(LayerStack::from_parts(self.width, self.height, layers, self.active_index))
    }
}

/// Serialize the whole stack (dimensions, active index, every layer).
pub fn save_snapshot(stack: &LayerStack) -> Result<Vec<u8>> {
    Ok(bincode::serialize(&StackFile::from_stack(stack))?)
}

pub fn write_snapshot(stack: &LayerStack, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, &StackFile::from_stack(stack))?;
    writer.flush()?;
    Ok(())
}

/// Decode and validate a snapshot blob.
pub fn load_snapshot(bytes: &[u8]) -> Result<LayerStack> {
    // bincode writes a String as an 8-byte length then UTF-8, so bytes 8..12
    // hold the magic.
    if bytes.len() < 12 {
        return Err(LayerError::InvalidFormat("Snapshot too small".into()));
    }
    let magic = std::str::from_utf8(&bytes[8..12]).unwrap_or("");
    if magic != SNAPSHOT_MAGIC {
        return Err(LayerError::InvalidFormat(format!("Unknown magic '{}'", magic)));
    }
    let file: StackFile = bincode::deserialize(bytes)?;
    file.into_stack()
}

pub fn read_snapshot(path: &Path) -> Result<LayerStack> {
    let raw = std::fs::read(path)?;
    load_snapshot(&raw)
}

impl LayerStack {
    /// Replace this stack with the one stored in `bytes`. On any failure the
    /// stack is left exactly as it was.
    pub fn load_snapshot_into(&mut self, bytes: &[u8]) -> Result<()> {
        let loaded = load_snapshot(bytes)?;
        *self = loaded;
        Ok(())
    }
}

// ============================================================================
// PNG ENCODE / DECODE
// ============================================================================

pub fn encode_png_rgba(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = PngEncoder::new(&mut buf);
    #[allow(deprecated)]
    encoder.encode(image.as_raw(), image.width(), image.height(), ColorType::Rgba8)?;
    Ok(buf)
}

pub fn encode_png_gray(image: &GrayImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = PngEncoder::new(&mut buf);
    #[allow(deprecated)]
    encoder.encode(image.as_raw(), image.width(), image.height(), ColorType::L8)?;
    Ok(buf)
}

impl PixelBuffer {
    pub fn encode_png(&self) -> Result<Vec<u8>> {
        encode_png_rgba(self.as_rgba_image())
    }

    /// Decode any format the `image` crate reads; grey, RGB and 16-bit inputs
    /// are promoted to 8-bit RGBA.
    pub fn decode_png(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes)?;
        Ok(PixelBuffer::from_rgba_image(img.to_rgba8()))
    }
}

/// Load an image file from disk into a buffer.
pub fn read_image(path: &Path) -> Result<PixelBuffer> {
    let file = std::fs::File::open(path)?;
    let reader = image::io::Reader::new(BufReader::new(file)).with_guessed_format()?;
    Ok(PixelBuffer::from_rgba_image(reader.decode()?.to_rgba8()))
}

pub fn write_png(buffer: &PixelBuffer, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&buffer.encode_png()?)?;
    writer.flush()?;
    Ok(())
}

// ============================================================================
// PER-LAYER EXPORT
// ============================================================================

/// File name of the exported image for the layer at `index`.
pub fn layer_filename(index: usize) -> String {
    format!("Layer{}.png", index)
}

/// Write every layer as `Layer<i>.png` under `dir`, creating it if needed.
pub fn export_layer_images(stack: &LayerStack, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(stack.len());
    for (i, layer) in stack.layers().enumerate() {
        let path = dir.join(layer_filename(i));
        write_png(layer.buffer(), &path)?;
        written.push(path);
    }
    log::debug!("exported {} layer images to {}", written.len(), dir.display());
    Ok(written)
}

/// Regenerate only the layer images missing from `dir`. Returns how many
/// were written.
pub fn ensure_layer_images(stack: &LayerStack, dir: &Path) -> Result<usize> {
    std::fs::create_dir_all(dir)?;
    let mut regenerated = 0;
    for (i, layer) in stack.layers().enumerate() {
        let path = dir.join(layer_filename(i));
        if path.is_file() {
            continue;
        }
        write_png(layer.buffer(), &path)?;
        regenerated += 1;
    }
    if regenerated > 0 {
        log::info!("regenerated {} missing layer images in {}", regenerated, dir.display());
    }
    Ok(regenerated)
}
