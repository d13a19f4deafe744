// ============================================================================
// STROKES — anti-aliased brush and eraser polylines
// ============================================================================

use image::{Rgb, Rgba};

use crate::canvas::PixelBuffer;
use crate::color::opaque;
use crate::error::{LayerError, Result};
use crate::selection::{Point, SelectionMask};

const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Draw connected segments through `points` in opaque `color`.
///
/// Each pixel takes the strongest coverage any segment gives it; full
/// coverage overwrites the destination outright, the anti-aliased rim is
/// interpolated toward the ink on every channel. Fewer than two points is a
/// no-op.
pub fn brush_stroke(
    buffer: &mut PixelBuffer,
    color: Rgb<u8>,
    size: u32,
    points: &[Point],
    mask: Option<&SelectionMask>,
) -> Result<()> {
    stroke(buffer, opaque(color), size, points, mask)
}

/// Same traversal as [`brush_stroke`], writing fully transparent pixels.
pub fn eraser_stroke(
    buffer: &mut PixelBuffer,
    size: u32,
    points: &[Point],
    mask: Option<&SelectionMask>,
) -> Result<()> {
    stroke(buffer, CLEAR, size, points, mask)
}

fn stroke(
    buffer: &mut PixelBuffer,
    ink: Rgba<u8>,
    size: u32,
    points: &[Point],
    mask: Option<&SelectionMask>,
) -> Result<()> {
    if size == 0 {
        return Err(LayerError::invalid_input("stroke size must be at least 1"));
    }
    let (w, h) = buffer.dimensions();
    if let Some(mask) = mask {
        mask.check_dimensions(w, h)?;
    }
    if points.len() < 2 || w == 0 || h == 0 {
        return Ok(());
    }

    let radius = size as f32 / 2.0;
    let reach = radius + 1.0;

    // Bounding box of the whole stroke, clipped to the canvas
    let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
    let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
    for &(x, y) in points {
        min_x = min_x.min(x as f32);
        min_y = min_y.min(y as f32);
        max_x = max_x.max(x as f32);
        max_y = max_y.max(y as f32);
    }
    let x0 = (min_x - reach).floor().max(0.0) as i64;
    let y0 = (min_y - reach).floor().max(0.0) as i64;
    let x1 = (max_x + reach).ceil().min(w as f32 - 1.0) as i64;
    let y1 = (max_y + reach).ceil().min(h as f32 - 1.0) as i64;
    if x0 > x1 || y0 > y1 {
        return Ok(());
    }
    let bw = (x1 - x0 + 1) as usize;
    let bh = (y1 - y0 + 1) as usize;

    let mut coverage = vec![0.0f32; bw * bh];
    for seg in points.windows(2) {
        let a = (seg[0].0 as f32, seg[0].1 as f32);
        let b = (seg[1].0 as f32, seg[1].1 as f32);
        let sx0 = ((a.0.min(b.0) - reach).floor() as i64).max(x0);
        let sy0 = ((a.1.min(b.1) - reach).floor() as i64).max(y0);
        let sx1 = ((a.0.max(b.0) + reach).ceil() as i64).min(x1);
        let sy1 = ((a.1.max(b.1) + reach).ceil() as i64).min(y1);
        for py in sy0..=sy1 {
            for px in sx0..=sx1 {
                let d = distance_to_segment((px as f32, py as f32), a, b);
                let c = (radius + 0.5 - d).clamp(0.0, 1.0);
                let slot = &mut coverage[(py - y0) as usize * bw + (px - x0) as usize];
                if c > *slot {
                    *slot = c;
                }
            }
        }
    }

    let img = buffer.as_rgba_image_mut();
    for by in 0..bh {
        for bx in 0..bw {
            let c = coverage[by * bw + bx];
            if c <= 0.0 {
                continue;
            }
            let x = (x0 as usize + bx) as u32;
            let y = (y0 as usize + by) as u32;
            if let Some(m) = mask {
                if !m.is_selected(x, y) {
                    continue;
                }
            }
            if c >= 1.0 {
                img.put_pixel(x, y, ink);
            } else {
                let dst = img.get_pixel(x, y).0;
                let mut out = [0u8; 4];
                for i in 0..4 {
                    let d = dst[i] as f32;
                    out[i] = (d + (ink.0[i] as f32 - d) * c).round().clamp(0.0, 255.0) as u8;
                }
                img.put_pixel(x, y, Rgba(out));
            }
        }
    }
    Ok(())
}

fn distance_to_segment(p: (f32, f32), a: (f32, f32), b: (f32, f32)) -> f32 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq <= f32::EPSILON {
        0.0
    } else {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.0 + t * dx, a.1 + t * dy);
    ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt()
}
