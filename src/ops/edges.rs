// ============================================================================
// EDGE DETECTION — Canny-style edge map for the magic lasso
// ============================================================================

use std::collections::VecDeque;

use image::GrayImage;
use rayon::prelude::*;

/// Smoothing applied before the gradient pass.
const SMOOTHING_SIGMA: f32 = 1.4;

const TAN_22_5: f32 = 0.414_213_57;
const TAN_67_5: f32 = 2.414_213_6;

/// Gradient strength of every pixel that survived thinning and hysteresis;
/// 0.0 everywhere else.
#[derive(Clone, Debug)]
pub struct EdgeMap {
    width: u32,
    height: u32,
    strength: Vec<f32>,
}

impl EdgeMap {
    /// Hand-built map for exercising consumers without running detection.
    #[cfg(test)]
    pub(crate) fn from_strengths(width: u32, height: u32, strength: Vec<f32>) -> Self {
        assert_eq!(strength.len(), (width * height) as usize);
        Self { width, height, strength }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Edge response at `(x, y)`; off-image coordinates read as no edge.
    pub fn strength(&self, x: i32, y: i32) -> f32 {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return 0.0;
        }
        self.strength[y as usize * self.width as usize + x as usize]
    }

    pub fn is_edge(&self, x: i32, y: i32) -> bool {
        self.strength(x, y) > 0.0
    }

    pub fn edge_count(&self) -> usize {
        self.strength.iter().filter(|&&s| s > 0.0).count()
    }
}

/// Gaussian smoothing, 3x3 Sobel with L1 magnitude (`|gx| + |gy|`),
/// non-maximum suppression over four directions, then hysteresis: pixels
/// above `high` seed edges that grow through 8-connected pixels above `low`.
pub fn detect_edges(gray: &GrayImage, low: f32, high: f32) -> EdgeMap {
    let (width, height) = gray.dimensions();
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 {
        return EdgeMap { width, height, strength: Vec::new() };
    }

    let smoothed = gaussian_smooth(gray, SMOOTHING_SIGMA);

    // Sobel: magnitude plus quantised direction per pixel
    let at = |x: isize, y: isize| -> f32 {
        let cx = x.clamp(0, w as isize - 1) as usize;
        let cy = y.clamp(0, h as isize - 1) as usize;
        smoothed[cy * w + cx]
    };
    let mut gradient = vec![(0.0f32, 0u8); w * h];
    gradient.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        let iy = y as isize;
        for (x, out) in row.iter_mut().enumerate() {
            let ix = x as isize;
            let gx = -at(ix - 1, iy - 1) - 2.0 * at(ix - 1, iy) - at(ix - 1, iy + 1)
                + at(ix + 1, iy - 1)
                + 2.0 * at(ix + 1, iy)
                + at(ix + 1, iy + 1);
            let gy = -at(ix - 1, iy - 1) - 2.0 * at(ix, iy - 1) - at(ix + 1, iy - 1)
                + at(ix - 1, iy + 1)
                + 2.0 * at(ix, iy + 1)
                + at(ix + 1, iy + 1);
            *out = (gx.abs() + gy.abs(), quantise_direction(gx, gy));
        }
    });

    // Non-maximum suppression
    let mag = |x: isize, y: isize| -> f32 {
        if x < 0 || y < 0 || x >= w as isize || y >= h as isize {
            0.0
        } else {
            gradient[y as usize * w + x as usize].0
        }
    };
    let mut thin = vec![0.0f32; w * h];
    thin.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        let iy = y as isize;
        for (x, out) in row.iter_mut().enumerate() {
            let ix = x as isize;
            let (m, dir) = gradient[y * w + x];
            if m <= low {
                continue;
            }
            let ((ax, ay), (bx, by)) = match dir {
                0 => ((ix - 1, iy), (ix + 1, iy)),
                1 => ((ix - 1, iy - 1), (ix + 1, iy + 1)),
                2 => ((ix, iy - 1), (ix, iy + 1)),
                _ => ((ix + 1, iy - 1), (ix - 1, iy + 1)),
            };
            // >= on one side, > on the other, so a flat two-pixel ridge keeps exactly one pixel
            if m >= mag(ax, ay) && m > mag(bx, by) {
                *out = m;
            }
        }
    });

    // Hysteresis
    let mut strength = vec![0.0f32; w * h];
    let mut queue: VecDeque<usize> = VecDeque::new();
    for (i, &m) in thin.iter().enumerate() {
        if m > high {
            strength[i] = m;
            queue.push_back(i);
        }
    }
    while let Some(i) = queue.pop_front() {
        let x = (i % w) as isize;
        let y = (i / w) as isize;
        for dy in -1..=1 {
            for dx in -1..=1 {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    continue;
                }
                let ni = ny as usize * w + nx as usize;
                if strength[ni] == 0.0 && thin[ni] > low {
                    strength[ni] = thin[ni];
                    queue.push_back(ni);
                }
            }
        }
    }

    EdgeMap { width, height, strength }
}

/// 0 = horizontal gradient, 1 = down-right diagonal, 2 = vertical,
/// 3 = down-left diagonal (image y grows downward).
fn quantise_direction(gx: f32, gy: f32) -> u8 {
    let (ax, ay) = (gx.abs(), gy.abs());
    if ay <= ax * TAN_22_5 {
        0
    } else if ay >= ax * TAN_67_5 {
        2
    } else if gx * gy > 0.0 {
        1
    } else {
        3
    }
}

/// Separable Gaussian with edge-clamped sampling, kept in f32.
fn gaussian_smooth(gray: &GrayImage, sigma: f32) -> Vec<f32> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let radius = (sigma * 3.0).ceil() as isize;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }

    let src = gray.as_raw();
    let mut horizontal = vec![0.0f32; w * h];
    horizontal.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        for (x, out) in row.iter_mut().enumerate() {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = (x as isize + k as isize - radius).clamp(0, w as isize - 1) as usize;
                acc += weight * src[y * w + sx] as f32;
            }
            *out = acc;
        }
    });

    let mut out = vec![0.0f32; w * h];
    out.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        for (x, px) in row.iter_mut().enumerate() {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = (y as isize + k as isize - radius).clamp(0, h as isize - 1) as usize;
                acc += weight * horizontal[sy * w + x];
            }
            *px = acc;
        }
    });
    out
}
