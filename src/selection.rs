// ============================================================================
// SELECTION MASKS — rectangle, freeform, polygon and magic-lasso constructors
// ============================================================================

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, GrayImage, Luma};

use crate::canvas::PixelBuffer;
use crate::error::{LayerError, Result};
use crate::io::encode_png_gray;
use crate::ops::edges::{EdgeMap, detect_edges};

const SELECTED: u8 = 255;

/// Integer canvas coordinate `(x, y)`. May lie outside the canvas; shapes
/// are clipped when rasterised.
pub type Point = (i32, i32);

/// Tuning for the magic lasso edge snap.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LassoParams {
    /// Distance in pixels between interpolated points on each seed segment.
    pub step: f32,
    /// Largest ring radius searched for an edge around each point.
    pub max_radius: u32,
    pub low_threshold: f32,
    pub high_threshold: f32,
}

impl Default for LassoParams {
    fn default() -> Self {
        Self {
            step: 5.0,
            max_radius: 30,
            low_threshold: 50.0,
            high_threshold: 150.0,
        }
    }
}

/// Binary single-channel mask: every pixel is exactly 0 or 255.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionMask {
    mask: GrayImage,
}

impl SelectionMask {
    /// Nothing selected.
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            mask: GrayImage::new(width, height),
        }
    }

    /// Wrap an existing grey image, rejecting any value other than 0 / 255.
    pub fn from_gray(mask: GrayImage) -> Result<Self> {
        let candidate = Self { mask };
        if !candidate.validate() {
            return Err(LayerError::invalid_input("selection mask must contain only 0 and 255"));
        }
        Ok(candidate)
    }

    /// Axis-aligned rectangle spanned by two corners, in any order. Covers
    /// `[min_x, max_x) x [min_y, max_y)` clipped to the target.
    pub fn rectangle(target: &PixelBuffer, a: Point, b: Point) -> Self {
        let (w, h) = target.dimensions();
        let mut sel = Self::empty(w, h);
        let clamp_x = |v: i32| v.clamp(0, w as i32) as u32;
        let clamp_y = |v: i32| v.clamp(0, h as i32) as u32;
        let (x0, x1) = (clamp_x(a.0.min(b.0)), clamp_x(a.0.max(b.0)));
        let (y0, y1) = (clamp_y(a.1.min(b.1)), clamp_y(a.1.max(b.1)));
        for y in y0..y1 {
            for x in x0..x1 {
                sel.mask.put_pixel(x, y, Luma([SELECTED]));
            }
        }
        sel
    }

    /// Closed freehand path; identical rasterisation to [`SelectionMask::polygon`].
    pub fn freeform(target: &PixelBuffer, path: &[Point]) -> Self {
        Self::polygon(target, path)
    }

    /// Closed polygon (last vertex joins the first). Fewer than three
    /// vertices selects nothing.
    pub fn polygon(target: &PixelBuffer, vertices: &[Point]) -> Self {
        let (w, h) = target.dimensions();
        let mut sel = Self::empty(w, h);
        if vertices.len() >= 3 {
            let pts: Vec<(f64, f64)> = vertices.iter().map(|&(x, y)| (x as f64, y as f64)).collect();
            fill_polygon(&mut sel.mask, &pts);
        }
        sel
    }

    /// Edge-snapping lasso: the seed loop is densified every `params.step`
    /// pixels, each point is pulled onto the strongest edge pixel of the
    /// nearest ring that contains one, and the result is filled as a polygon.
    /// A best-effort snap, not a contour follower.
    pub fn magic_lasso(target: &PixelBuffer, seeds: &[Point], params: &LassoParams) -> Self {
        let (w, h) = target.dimensions();
        if seeds.is_empty() || w == 0 || h == 0 {
            return Self::empty(w, h);
        }
        let gray = image::imageops::grayscale(target.as_rgba_image());
        let edges = detect_edges(&gray, params.low_threshold, params.high_threshold);
        let rings = ring_offsets(params.max_radius);

        let mut path: Vec<Point> = Vec::new();
        for (i, &start) in seeds.iter().enumerate() {
            let end = seeds[(i + 1) % seeds.len()];
            for pt in interpolate(start, end, params.step) {
                path.push(snap_to_edge(&edges, pt, &rings).unwrap_or(pt));
            }
        }
        log::debug!("magic lasso: {} seeds -> {} path points", seeds.len(), path.len());
        Self::polygon(target, &path)
    }

    pub fn width(&self) -> u32 {
        self.mask.width()
    }

    pub fn height(&self) -> u32 {
        self.mask.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.mask.dimensions()
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.mask
    }

    /// Every pixel is 0 or 255. Single channel and two dimensions are
    /// guaranteed by the `GrayImage` representation.
    pub fn validate(&self) -> bool {
        self.mask.as_raw().iter().all(|&v| v == 0 || v == SELECTED)
    }

    pub fn is_selected(&self, x: u32, y: u32) -> bool {
        self.mask.get_pixel_checked(x, y).is_some_and(|p| p.0[0] == SELECTED)
    }

    pub fn selected_count(&self) -> usize {
        self.mask.as_raw().iter().filter(|&&v| v == SELECTED).count()
    }

    /// Inclusive bounding box `(min_x, min_y, max_x, max_y)` of the selection.
    pub fn bounds(&self) -> Option<(u32, u32, u32, u32)> {
        let mut bbox: Option<(u32, u32, u32, u32)> = None;
        for (x, y, p) in self.mask.enumerate_pixels() {
            if p.0[0] != SELECTED {
                continue;
            }
            bbox = Some(match bbox {
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                None => (x, y, x, y),
            });
        }
        bbox
    }

    /// Copy of `image` with every unselected pixel zeroed.
    pub fn apply(&self, image: &PixelBuffer) -> Result<PixelBuffer> {
        self.check_dimensions(image.width(), image.height())?;
        let mut out = image.as_rgba_image().clone();
        for (px, m) in out.pixels_mut().zip(self.mask.pixels()) {
            if m.0[0] == 0 {
                px.0 = [0, 0, 0, 0];
            }
        }
        Ok(PixelBuffer::from_rgba_image(out))
    }

    pub(crate) fn check_dimensions(&self, width: u32, height: u32) -> Result<()> {
        if self.dimensions() != (width, height) {
            return Err(LayerError::invalid_input(format!(
                "selection mask is {}x{}, target is {}x{}",
                self.width(),
                self.height(),
                width,
                height
            )));
        }
        Ok(())
    }

    /// Base64 PNG, the form masks travel in between caller and engine.
    pub fn encode(&self) -> Result<String> {
        let png = encode_png_gray(&self.mask)?;
        Ok(STANDARD.encode(png))
    }

    pub fn decode(data: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|e| LayerError::InvalidFormat(format!("selection is not base64: {}", e)))?;
        match image::load_from_memory(&bytes)? {
            DynamicImage::ImageLuma8(gray) => Self::from_gray(gray),
            other => Err(LayerError::invalid_input(format!(
                "selection must be an 8-bit single-channel image, got {:?}",
                other.color()
            ))),
        }
    }
}

/// Even-odd scanline fill sampled at pixel centres.
fn fill_polygon(mask: &mut GrayImage, points: &[(f64, f64)]) {
    let (w, h) = mask.dimensions();
    let n = points.len();
    let mut nodes: Vec<f64> = Vec::new();
    for y in 0..h {
        let yf = y as f64 + 0.5;
        nodes.clear();
        for i in 0..n {
            let (xi, yi) = points[i];
            let (xj, yj) = points[(i + 1) % n];
            if (yi < yf && yj >= yf) || (yj < yf && yi >= yf) {
                let t = (yf - yi) / (yj - yi);
                nodes.push(xi + t * (xj - xi));
            }
        }
        nodes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        for pair in nodes.chunks_exact(2) {
            let x_start = (pair[0] - 0.5).ceil().clamp(0.0, w as f64) as u32;
            let x_end = (pair[1] - 0.5).ceil().clamp(0.0, w as f64) as u32;
            for x in x_start..x_end {
                mask.put_pixel(x, y, Luma([SELECTED]));
            }
        }
    }
}

/// Evenly spaced points from `start` to `end` inclusive, one every `step`
/// pixels (rounded down), truncated to integer coordinates.
fn interpolate(start: Point, end: Point, step: f32) -> Vec<Point> {
    let dx = (end.0 - start.0) as f64;
    let dy = (end.1 - start.1) as f64;
    let distance = (dx * dx + dy * dy).sqrt();
    let count = if distance > 0.0 && step > 0.0 {
        (distance / step as f64) as usize + 1
    } else {
        1
    };
    if count == 1 {
        return vec![start];
    }
    let last = (count - 1) as f64;
    (0..count)
        .map(|i| {
            let i = i as f64;
            let x = start.0 as f64 + dx * i / last;
            let y = start.1 as f64 + dy * i / last;
            (x as i32, y as i32)
        })
        .collect()
}

/// Offsets of every discrete ring `1..=max_radius`, each in row-major order.
fn ring_offsets(max_radius: u32) -> Vec<Vec<(i32, i32)>> {
    let r_max = max_radius as i32;
    let mut rings = vec![Vec::new(); max_radius as usize];
    for dy in -r_max..=r_max {
        for dx in -r_max..=r_max {
            let r = ((dx * dx + dy * dy) as f64).sqrt().round() as i32;
            if r >= 1 && r <= r_max {
                rings[(r - 1) as usize].push((dx, dy));
            }
        }
    }
    rings
}

/// Strongest edge pixel on the first ring around `pt` that has one. Ties go
/// to the first pixel in row-major order.
fn snap_to_edge(edges: &EdgeMap, pt: Point, rings: &[Vec<(i32, i32)>]) -> Option<Point> {
    for ring in rings {
        let mut best: Option<(Point, f32)> = None;
        for &(dx, dy) in ring {
            let candidate = (pt.0 + dx, pt.1 + dy);
            let s = edges.strength(candidate.0, candidate.1);
            if s > 0.0 && best.is_none_or(|(_, b)| s > b) {
                best = Some((candidate, s));
            }
        }
        if let Some((p, _)) = best {
            return Some(p);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use pretty_assertions::assert_eq;

    fn canvas(w: u32, h: u32) -> PixelBuffer {
        PixelBuffer::new_filled(w, h, Rgba([255, 255, 255, 255]))
    }

    #[test]
    fn rectangle_is_half_open() {
        let sel = SelectionMask::rectangle(&canvas(50, 50), (10, 10), (20, 20));
        assert_eq!(sel.selected_count(), 100);
        assert_eq!(sel.bounds(), Some((10, 10, 19, 19)));
        assert!(sel.validate());
    }

    #[test]
    fn rectangle_normalises_corners_and_clips() {
        let target = canvas(30, 30);
        let a = SelectionMask::rectangle(&target, (20, 5), (10, 15));
        let b = SelectionMask::rectangle(&target, (10, 5), (20, 15));
        assert_eq!(a, b);

        let clipped = SelectionMask::rectangle(&target, (-10, -10), (5, 40));
        assert_eq!(clipped.selected_count(), 5 * 30);
    }

    #[test]
    fn polygon_needs_three_vertices() {
        let target = canvas(20, 20);
        assert_eq!(SelectionMask::polygon(&target, &[]).selected_count(), 0);
        assert_eq!(SelectionMask::polygon(&target, &[(1, 1), (15, 15)]).selected_count(), 0);
        assert_eq!(SelectionMask::freeform(&target, &[(1, 1), (15, 1)]).selected_count(), 0);
    }

    #[test]
    fn square_polygon_matches_rectangle() {
        let target = canvas(50, 50);
        let poly = SelectionMask::polygon(&target, &[(10, 10), (20, 10), (20, 20), (10, 20)]);
        let rect = SelectionMask::rectangle(&target, (10, 10), (20, 20));
        assert_eq!(poly, rect);
    }

    #[test]
    fn triangle_fill_is_inside_the_hull() {
        let target = canvas(40, 40);
        let sel = SelectionMask::polygon(&target, &[(0, 0), (30, 0), (0, 30)]);
        assert!(sel.is_selected(2, 2));
        assert!(!sel.is_selected(25, 25));
        let (_, _, max_x, max_y) = sel.bounds().unwrap();
        assert!(max_x < 30 && max_y < 30);
        // roughly half of the 30x30 square
        let count = sel.selected_count();
        assert!((400..=500).contains(&count), "count = {count}");
    }

    #[test]
    fn self_intersecting_polygon_uses_even_odd() {
        // bow tie with left and right lobes meeting at (20, 20)
        let target = canvas(40, 40);
        let sel = SelectionMask::polygon(&target, &[(0, 0), (40, 40), (40, 0), (0, 40)]);
        assert!(sel.is_selected(5, 20));
        assert!(sel.is_selected(35, 20));
        assert!(!sel.is_selected(20, 5));
        assert!(!sel.is_selected(20, 35));
    }

    #[test]
    fn from_gray_rejects_non_binary() {
        let mut gray = GrayImage::new(3, 3);
        gray.put_pixel(1, 1, Luma([128]));
        assert!(matches!(SelectionMask::from_gray(gray), Err(LayerError::InvalidInput(_))));
    }

    #[test]
    fn apply_zeroes_unselected_pixels() {
        let mut img = PixelBuffer::new_filled(4, 4, Rgba([10, 20, 30, 255]));
        img.put(1, 1, Rgba([1, 2, 3, 4]));
        let sel = SelectionMask::rectangle(&img, (1, 1), (3, 3));
        let out = sel.apply(&img).unwrap();
        assert_eq!(out.get(1, 1), Some(Rgba([1, 2, 3, 4])));
        assert_eq!(out.get(2, 2), Some(Rgba([10, 20, 30, 255])));
        assert_eq!(out.get(0, 0), Some(Rgba([0, 0, 0, 0])));
        assert_eq!(out.get(3, 3), Some(Rgba([0, 0, 0, 0])));

        assert!(sel.apply(&PixelBuffer::new(5, 4)).is_err());
    }

    #[test]
    fn wire_format_round_trip() {
        let sel = SelectionMask::polygon(&canvas(32, 24), &[(3, 3), (28, 4), (16, 20)]);
        let encoded = sel.encode().unwrap();
        assert_eq!(SelectionMask::decode(&encoded).unwrap(), sel);
    }

    #[test]
    fn decode_rejects_bad_payloads() {
        assert!(matches!(SelectionMask::decode("***"), Err(LayerError::InvalidFormat(_))));

        // valid PNG but RGBA, not single channel
        let rgba = crate::io::encode_png_rgba(canvas(2, 2).as_rgba_image()).unwrap();
        let err = SelectionMask::decode(&STANDARD.encode(rgba)).unwrap_err();
        assert!(matches!(err, LayerError::InvalidInput(_)));

        // single channel but 16-bit
        let mut wide = Vec::new();
        image::DynamicImage::ImageLuma16(image::ImageBuffer::from_pixel(2, 2, Luma([65535u16])))
            .write_to(&mut std::io::Cursor::new(&mut wide), image::ImageOutputFormat::Png)
            .unwrap();
        match SelectionMask::decode(&STANDARD.encode(wide)).unwrap_err() {
            LayerError::InvalidInput(msg) => assert!(msg.contains("8-bit single-channel"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }

        // single channel but not binary
        let grey = crate::io::encode_png_gray(&GrayImage::from_pixel(2, 2, Luma([7]))).unwrap();
        let err = SelectionMask::decode(&STANDARD.encode(grey)).unwrap_err();
        assert!(matches!(err, LayerError::InvalidInput(_)));
    }

    #[test]
    fn interpolation_includes_both_ends() {
        assert_eq!(interpolate((0, 0), (10, 0), 5.0), vec![(0, 0), (5, 0), (10, 0)]);
        assert_eq!(interpolate((3, 3), (3, 3), 5.0), vec![(3, 3)]);
        // 12 px at step 5 -> 3 points, truncated
        assert_eq!(interpolate((0, 0), (0, 12), 5.0), vec![(0, 0), (0, 6), (0, 12)]);
    }

    #[test]
    fn rings_partition_the_disc() {
        let rings = ring_offsets(4);
        assert_eq!(rings.len(), 4);
        assert_eq!(rings[0], vec![(-1, -1), (0, -1), (1, -1), (-1, 0), (1, 0), (-1, 1), (0, 1), (1, 1)]);
        let total: usize = rings.iter().map(Vec::len).sum();
        // every offset within radius 4.5 except the centre
        let expected = (-4i32..=4)
            .flat_map(|dy| (-4i32..=4).map(move |dx| (dx, dy)))
            .filter(|&(dx, dy)| {
                let r = ((dx * dx + dy * dy) as f64).sqrt().round() as i32;
                (1..=4).contains(&r)
            })
            .count();
        assert_eq!(total, expected);
    }

    #[test]
    fn lasso_without_edges_is_the_seed_polygon() {
        let target = canvas(60, 60);
        let seeds = [(10, 10), (40, 10), (40, 40), (10, 40)];
        let lasso = SelectionMask::magic_lasso(&target, &seeds, &LassoParams::default());
        assert_eq!(lasso, SelectionMask::polygon(&target, &seeds));
    }

    #[test]
    fn lasso_snaps_onto_a_dark_square() {
        let mut target = canvas(60, 60);
        for y in 20..40 {
            for x in 20..40 {
                target.put(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        let seeds = [(14, 14), (46, 14), (46, 46), (14, 46)];
        let lasso = SelectionMask::magic_lasso(&target, &seeds, &LassoParams::default());
        let loose = SelectionMask::polygon(&target, &seeds);
        assert!(lasso.is_selected(30, 30));
        assert!(!lasso.is_selected(2, 2));
        assert!(!lasso.is_selected(16, 16));
        assert!(lasso.selected_count() < loose.selected_count());
    }

    /// 21x21 map, all zero except the given `(x, y, strength)` pixels.
    fn edge_map(pixels: &[(u32, u32, f32)]) -> EdgeMap {
        let mut strength = vec![0.0; 21 * 21];
        for &(x, y, s) in pixels {
            strength[(y * 21 + x) as usize] = s;
        }
        EdgeMap::from_strengths(21, 21, strength)
    }

    #[test]
    fn snap_takes_the_strongest_pixel_of_the_nearest_ring() {
        let rings = ring_offsets(5);
        // ring 2 holds a weak and a strong edge, ring 3 a stronger one
        let edges = edge_map(&[(10, 8, 60.0), (12, 10, 90.0), (10, 13, 500.0)]);
        assert_eq!(snap_to_edge(&edges, (10, 10), &rings), Some((12, 10)));
    }

    #[test]
    fn snap_ties_go_to_the_first_pixel_in_row_major_order() {
        let rings = ring_offsets(5);
        let edges = edge_map(&[(12, 10, 90.0), (8, 10, 90.0), (10, 8, 90.0)]);
        assert_eq!(snap_to_edge(&edges, (10, 10), &rings), Some((10, 8)));
        let edges = edge_map(&[(12, 10, 90.0), (8, 10, 90.0)]);
        assert_eq!(snap_to_edge(&edges, (10, 10), &rings), Some((8, 10)));
    }

    #[test]
    fn snap_gives_up_beyond_the_search_radius() {
        let edges = edge_map(&[(15, 10, 200.0)]);
        assert_eq!(snap_to_edge(&edges, (10, 10), &ring_offsets(4)), None);
        assert_eq!(snap_to_edge(&edges, (10, 10), &ring_offsets(5)), Some((15, 10)));
    }

    #[test]
    fn lasso_radius_limits_the_snap() {
        let mut target = canvas(60, 60);
        for y in 20..40 {
            for x in 20..40 {
                target.put(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        // every path point is at least 14 px from the square's outline
        let seeds = [(5, 5), (55, 5), (55, 55), (5, 55)];
        let loose = SelectionMask::polygon(&target, &seeds);
        let near = LassoParams { max_radius: 8, ..LassoParams::default() };
        assert_eq!(SelectionMask::magic_lasso(&target, &seeds, &near), loose);
        assert_ne!(SelectionMask::magic_lasso(&target, &seeds, &LassoParams::default()), loose);
    }

    #[test]
    fn lasso_step_decides_which_points_snap() {
        // dark bar just above the middle of the seed loop's top side
        let mut target = canvas(60, 60);
        for y in 4..12 {
            for x in 26..34 {
                target.put(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        let seeds = [(10, 20), (50, 20), (50, 50), (10, 50)];
        let loose = SelectionMask::polygon(&target, &seeds);

        // seeds alone are too far from the bar to snap
        let coarse = LassoParams { step: 1000.0, max_radius: 10, ..LassoParams::default() };
        assert_eq!(SelectionMask::magic_lasso(&target, &seeds, &coarse), loose);

        // points interpolated along the top side reach it and pull the outline up
        let fine = LassoParams { step: 5.0, max_radius: 10, ..LassoParams::default() };
        let lasso = SelectionMask::magic_lasso(&target, &seeds, &fine);
        assert!(lasso.selected_count() > loose.selected_count());
        assert!(lasso.is_selected(30, 17));
        assert!(!loose.is_selected(30, 17));
    }

    #[test]
    fn lasso_with_too_few_points_selects_nothing() {
        let target = canvas(20, 20);
        let params = LassoParams::default();
        assert_eq!(SelectionMask::magic_lasso(&target, &[], &params).selected_count(), 0);
        // a single seed closes onto itself: one point
        assert_eq!(SelectionMask::magic_lasso(&target, &[(5, 5)], &params).selected_count(), 0);
    }
}
