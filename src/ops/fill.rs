use image::Rgb;

use crate::canvas::PixelBuffer;
use crate::color::{opaque, to_hex};
use crate::error::{LayerError, Result};
use crate::selection::{Point, SelectionMask};

/// Per-channel tolerance used when the caller does not pick one.
pub const DEFAULT_TOLERANCE: u8 = 10;

/// 4-connected flood fill from `start`.
///
/// A pixel joins the region when each of its R, G and B channels is within
/// `tolerance` of the seed's original color (fixed range, not relative to the
/// neighbour it was reached from). Filled pixels take `color` with alpha 255;
/// everything else, alpha included, is left as it was. When `mask` is given
/// the region never grows into unselected pixels.
///
/// Returns the number of pixels written, 0 when the seed already carries
/// `color` or lies outside the selection.
pub fn bucket_fill(
    buffer: &mut PixelBuffer,
    color: Rgb<u8>,
    start: Point,
    tolerance: u8,
    mask: Option<&SelectionMask>,
) -> Result<usize> {
    let (w, h) = buffer.dimensions();
    if !buffer.contains(start.0 as i64, start.1 as i64) {
        return Err(LayerError::OutOfBounds {
            what: "start point",
            x: start.0 as i64,
            y: start.1 as i64,
            width: w,
            height: h,
        });
    }
    if let Some(mask) = mask {
        mask.check_dimensions(w, h)?;
    }

    let (sx, sy) = (start.0 as u32, start.1 as u32);
    let allowed = |x: u32, y: u32| mask.is_none_or(|m| m.is_selected(x, y));
    if !allowed(sx, sy) {
        return Ok(0);
    }

    let wu = w as usize;
    let img = buffer.as_rgba_image_mut();
    let seed = img.get_pixel(sx, sy).0;
    if seed[..3] == color.0 {
        return Ok(0);
    }

    #[inline(always)]
    fn matches(p: [u8; 4], seed: [u8; 4], tol: u8) -> bool {
        p[0].abs_diff(seed[0]) <= tol && p[1].abs_diff(seed[1]) <= tol && p[2].abs_diff(seed[2]) <= tol
    }

    // Visit first, then paint, so freshly filled pixels are never re-tested.
    let mut visited = vec![false; wu * h as usize];
    let mut region: Vec<u32> = Vec::new();
    let mut stack: Vec<u32> = Vec::with_capacity(4096);
    let seed_idx = sy as usize * wu + sx as usize;
    visited[seed_idx] = true;
    stack.push(seed_idx as u32);

    while let Some(idx) = stack.pop() {
        region.push(idx);
        let x = (idx as usize % wu) as u32;
        let y = (idx as usize / wu) as u32;

        let mut try_push = |nx: u32, ny: u32| {
            let ni = ny as usize * wu + nx as usize;
            if !visited[ni] && allowed(nx, ny) && matches(img.get_pixel(nx, ny).0, seed, tolerance) {
                visited[ni] = true;
                stack.push(ni as u32);
            }
        };
        if x > 0 {
            try_push(x - 1, y);
        }
        if x + 1 < w {
            try_push(x + 1, y);
        }
        if y > 0 {
            try_push(x, y - 1);
        }
        if y + 1 < h {
            try_push(x, y + 1);
        }
    }

    let fill = opaque(color);
    for &idx in &region {
        let x = (idx as usize % wu) as u32;
        let y = (idx as usize / wu) as u32;
        img.put_pixel(x, y, fill);
    }
    log::debug!("bucket fill {} from ({},{}) wrote {} pixels", to_hex(color), sx, sy, region.len());
    Ok(region.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use pretty_assertions::assert_eq;

    const RED: Rgb<u8> = Rgb([255, 0, 0]);

    /// 10x10 white, half transparent, split by a black wall at x == 5.
    fn walled() -> PixelBuffer {
        let mut buf = PixelBuffer::new_filled(10, 10, Rgba([255, 255, 255, 128]));
        for y in 0..10 {
            buf.put(5, y, Rgba([0, 0, 0, 255]));
        }
        buf
    }

    #[test]
    fn exact_fill_stops_at_the_wall() {
        let mut buf = walled();
        let n = bucket_fill(&mut buf, RED, (1, 1), 0, None).unwrap();
        assert_eq!(n, 50);
        for y in 0..10 {
            for x in 0..10 {
                let px = buf.get(x, y).unwrap();
                match x {
                    0..=4 => assert_eq!(px, Rgba([255, 0, 0, 255])),
                    5 => assert_eq!(px, Rgba([0, 0, 0, 255])),
                    _ => assert_eq!(px, Rgba([255, 255, 255, 128]), "alpha of untouched pixel changed"),
                }
            }
        }
    }

    #[test]
    fn seed_already_target_color_is_noop() {
        let mut buf = walled();
        let before = buf.clone();
        let n = bucket_fill(&mut buf, Rgb([255, 255, 255]), (0, 0), DEFAULT_TOLERANCE, None).unwrap();
        assert_eq!(n, 0);
        assert_eq!(buf, before);
    }

    #[test]
    fn start_outside_canvas_is_a_bounds_error() {
        let mut buf = walled();
        let err = bucket_fill(&mut buf, RED, (10, 0), 0, None).unwrap_err();
        assert!(matches!(err, LayerError::OutOfBounds { what: "start point", x: 10, y: 0, .. }));
        let err = bucket_fill(&mut buf, RED, (0, -1), 0, None).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Bounds);
    }

    #[test]
    fn tolerance_is_measured_against_the_seed() {
        // horizontal gradient stepping by 4 per column
        let mut buf = PixelBuffer::new(20, 1);
        for x in 0..20 {
            let v = (x * 4) as u8;
            buf.put(x, 0, Rgba([v, v, v, 255]));
        }
        let n = bucket_fill(&mut buf, RED, (0, 0), DEFAULT_TOLERANCE, None).unwrap();
        // 0, 4, 8 are within 10 of the seed; 12 is not, even though it is within 10 of 8
        assert_eq!(n, 3);
        assert_eq!(buf.get(2, 0).unwrap(), Rgba([255, 0, 0, 255]));
        assert_eq!(buf.get(3, 0).unwrap(), Rgba([12, 12, 12, 255]));
    }

    #[test]
    fn alpha_does_not_take_part_in_matching() {
        let mut buf = PixelBuffer::new_filled(4, 1, Rgba([50, 50, 50, 255]));
        buf.put(2, 0, Rgba([50, 50, 50, 0]));
        let n = bucket_fill(&mut buf, RED, (0, 0), 0, None).unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf.get(2, 0).unwrap(), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn fill_respects_selection() {
        let mut buf = PixelBuffer::new_filled(10, 10, Rgba([255, 255, 255, 255]));
        let mask = SelectionMask::rectangle(&buf, (0, 0), (3, 10));
        let n = bucket_fill(&mut buf, RED, (0, 0), 0, Some(&mask)).unwrap();
        assert_eq!(n, 30);
        assert_eq!(buf.get(3, 0).unwrap(), Rgba([255, 255, 255, 255]));

        // seed outside the selection writes nothing
        let before = buf.clone();
        let n = bucket_fill(&mut buf, Rgb([0, 0, 255]), (8, 8), 0, Some(&mask)).unwrap();
        assert_eq!(n, 0);
        assert_eq!(buf, before);
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let mut buf = walled();
        let mask = SelectionMask::empty(3, 3);
        let err = bucket_fill(&mut buf, RED, (0, 0), 0, Some(&mask)).unwrap_err();
        assert!(matches!(err, LayerError::InvalidInput(_)));
    }
}
