use crate::types::Frame;
use std::sync::RwLock;
use tracing::warn;

pub type Polygon = Vec<(f32, f32)>;

/// A 3x3 planar homography, row-major, applied to homogeneous image points.
#[derive(Debug, Clone, Copy)]
pub struct Homography([[f64; 3]; 3]);

impl Homography {
    pub fn identity() -> Self {
        Homography([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    pub fn apply(&self, point: (f32, f32)) -> (f32, f32) {
        let (x, y) = (point.0 as f64, point.1 as f64);
        let m = &self.0;
        let w = m[2][0] * x + m[2][1] * y + m[2][2];
        if w.abs() < 1e-9 {
            return point;
        }
        let px = (m[0][0] * x + m[0][1] * y + m[0][2]) / w;
        let py = (m[1][0] * x + m[1][1] * y + m[1][2]) / w;
        (px as f32, py as f32)
    }

    /// Direct Linear Transform from >=4 point correspondences, solved by plain
    /// Gaussian elimination over the 8-unknown homogeneous system (h[2][2]=1
    /// fixed). Returns `None` if the system is degenerate.
    pub fn from_correspondences(src: &[(f32, f32)], dst: &[(f32, f32)]) -> Option<Self> {
        if src.len() < 4 || src.len() != dst.len() {
            return None;
        }

        let mut a = vec![vec![0.0f64; 9]; src.len() * 2];
        for (i, (&(x, y), &(xp, yp))) in src.iter().zip(dst.iter()).enumerate() {
            let (x, y, xp, yp) = (x as f64, y as f64, xp as f64, yp as f64);
            let r0 = 2 * i;
            a[r0] = vec![-x, -y, -1.0, 0.0, 0.0, 0.0, x * xp, y * xp, xp];
            a[r0 + 1] = vec![0.0, 0.0, 0.0, -x, -y, -1.0, x * yp, y * yp, yp];
        }

        let h = solve_homogeneous_least_squares(&mut a)?;
        Some(Homography([
            [h[0], h[1], h[2]],
            [h[3], h[4], h[5]],
            [h[6], h[7], h[8]],
        ]))
    }
}

/// Solves `A h = 0` for the null-space vector via Gaussian elimination on
/// `A^T A`, returning the last row of the reduced system normalized so its
/// final entry is 1. Adequate for the small, well-conditioned correspondence
/// sets this tracker deals with; not a general SVD replacement.
fn solve_homogeneous_least_squares(a: &mut [Vec<f64>]) -> Option<Vec<f64>> {
    let n = 9;
    let mut ata = vec![vec![0.0f64; n]; n];
    for row in a.iter() {
        for i in 0..n {
            for j in 0..n {
                ata[i][j] += row[i] * row[j];
            }
        }
    }

    // Power iteration against (trace*I - ata) to approximate the eigenvector
    // of the smallest eigenvalue of a symmetric PSD matrix, without a linear
    // algebra crate. A handful of iterations suffices for the planar
    // homographies this tracker fits.
    let trace: f64 = (0..n).map(|i| ata[i][i]).sum();
    let mut shifted = ata.clone();
    for i in 0..n {
        shifted[i][i] = trace - shifted[i][i];
    }

    let mut v = vec![1.0f64; n];
    for _ in 0..50 {
        let mut next = vec![0.0f64; n];
        for i in 0..n {
            for j in 0..n {
                next[i] += shifted[i][j] * v[j];
            }
        }
        let norm: f64 = next.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm < 1e-12 {
            return None;
        }
        for x in next.iter_mut() {
            *x /= norm;
        }
        v = next;
    }

    if v[8].abs() < 1e-9 {
        return None;
    }
    let scale = v[8];
    Some(v.into_iter().map(|x| x / scale).collect())
}

/// Holds the safe-area polygon set for one stream, in either static mode
/// (polygons pass through unchanged) or dynamic mode (projected via a
/// homography from a fixed reference frame to the current frame).
pub struct HazardZoneTracker {
    inner: RwLock<Inner>,
}

struct Inner {
    polygons: Vec<Polygon>,
    reference_frame: Option<Frame>,
    static_mode: bool,
    last_good_homography: Option<Homography>,
    warned_fallback: bool,
}

impl HazardZoneTracker {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                polygons: Vec::new(),
                reference_frame: None,
                static_mode: true,
                last_good_homography: None,
                warned_fallback: false,
            }),
        }
    }

    pub fn set_safe_area(&self, polygons: Vec<Polygon>, reference_frame: Option<Frame>, static_mode: bool) {
        let mut inner = self.inner.write().unwrap();
        inner.polygons = polygons;
        inner.reference_frame = reference_frame;
        inner.static_mode = static_mode;
        inner.last_good_homography = None;
        inner.warned_fallback = false;
    }

    pub fn has_zones(&self) -> bool {
        !self.inner.read().unwrap().polygons.is_empty()
    }

    pub fn get_safe_area(&self) -> Vec<Polygon> {
        self.inner.read().unwrap().polygons.clone()
    }

    /// Projects the stored polygons onto `current_frame`. In static mode this
    /// is a clone; in dynamic mode, point correspondences are matched between
    /// the saved reference frame and `current_frame` (see
    /// `estimate_correspondences`) and a homography is fit from them, falling
    /// back to the last good homography and then identity, logging once per
    /// fallback.
    pub fn get_transformed_safe_areas(&self, current_frame: &Frame) -> Vec<Polygon> {
        let mut inner = self.inner.write().unwrap();
        if inner.static_mode || inner.polygons.is_empty() {
            return inner.polygons.clone();
        }

        let Some(reference) = inner.reference_frame.clone() else {
            if !inner.warned_fallback {
                warn!("hazard zone: dynamic mode has no reference frame, falling back to identity projection");
                inner.warned_fallback = true;
            }
            return inner.polygons.iter().map(|poly| poly.iter().map(|&p| Homography::identity().apply(p)).collect()).collect();
        };

        let correspondences = estimate_correspondences(&reference, current_frame);
        let src: Vec<(f32, f32)> = correspondences.iter().map(|c| (c.0, c.1)).collect();
        let dst: Vec<(f32, f32)> = correspondences.iter().map(|c| (c.2, c.3)).collect();

        let homography = match Homography::from_correspondences(&src, &dst) {
            Some(h) => {
                inner.last_good_homography = Some(h);
                inner.warned_fallback = false;
                h
            }
            None => {
                if let Some(h) = inner.last_good_homography {
                    h
                } else {
                    if !inner.warned_fallback {
                        warn!("hazard zone: no homography available, falling back to identity projection");
                        inner.warned_fallback = true;
                    }
                    Homography::identity()
                }
            }
        };

        inner.polygons.iter().map(|poly| poly.iter().map(|&p| homography.apply(p)).collect()).collect()
    }
}

/// Converts a frame to grayscale and matches a sparse grid of patches from
/// `reference` against a local search window in `current` by minimal sum of
/// absolute differences, to produce the point correspondences a homography
/// is fit from. A plain block-matching tracker rather than a feature
/// detector/descriptor pipeline (no CV crate is in the dependency stack);
/// patches whose best match is still a poor fit are dropped rather than fed
/// in as noise.
fn estimate_correspondences(reference: &Frame, current: &Frame) -> Vec<(f32, f32, f32, f32)> {
    if reference.width != current.width || reference.height != current.height {
        return Vec::new();
    }
    let (width, height) = (reference.width as i32, reference.height as i32);
    if width == 0 || height == 0 {
        return Vec::new();
    }

    const GRID: i32 = 4;
    const HALF_PATCH: i32 = 4;
    const SEARCH: i32 = 16;
    let margin = HALF_PATCH + SEARCH;
    if width <= margin * 2 || height <= margin * 2 {
        return Vec::new();
    }

    let reference_gray = to_grayscale(reference);
    let current_gray = to_grayscale(current);

    let mut correspondences = Vec::new();
    for gy in 0..GRID {
        for gx in 0..GRID {
            let cx = margin + gx * (width - 2 * margin) / (GRID - 1).max(1);
            let cy = margin + gy * (height - 2 * margin) / (GRID - 1).max(1);
            if let Some((dx, dy)) = best_match(&reference_gray, &current_gray, width, height, cx, cy, HALF_PATCH, SEARCH) {
                correspondences.push((cx as f32, cy as f32, (cx + dx) as f32, (cy + dy) as f32));
            }
        }
    }
    correspondences
}

fn to_grayscale(frame: &Frame) -> Vec<u8> {
    frame
        .data
        .chunks_exact(3)
        .map(|p| ((p[0] as u32 * 30 + p[1] as u32 * 59 + p[2] as u32 * 11) / 100) as u8)
        .collect()
}

/// Searches an `[-search, search]` window around `(cx, cy)` for the offset
/// into `current` whose `2*half_patch+1` square patch minimizes sum of
/// absolute differences against the same patch in `reference`. Returns
/// `None` if every candidate offset is a poor match (low-texture patch, or
/// the true match fell outside the search window).
fn best_match(reference: &[u8], current: &[u8], width: i32, height: i32, cx: i32, cy: i32, half_patch: i32, search: i32) -> Option<(i32, i32)> {
    let mut best_sad = u32::MAX;
    let mut best = None;

    for dy in -search..=search {
        for dx in -search..=search {
            let (nx, ny) = (cx + dx, cy + dy);
            if nx - half_patch < 0 || ny - half_patch < 0 || nx + half_patch >= width || ny + half_patch >= height {
                continue;
            }
            let mut sad: u32 = 0;
            for py in -half_patch..=half_patch {
                for px in -half_patch..=half_patch {
                    let r = reference[((cy + py) * width + (cx + px)) as usize] as i32;
                    let c = current[((ny + py) * width + (nx + px)) as usize] as i32;
                    sad += r.abs_diff(c);
                }
            }
            if sad < best_sad {
                best_sad = sad;
                best = Some((dx, dy));
            }
        }
    }

    let patch_pixels = (2 * half_patch + 1).pow(2) as u32;
    if best_sad / patch_pixels.max(1) > 40 {
        return None;
    }
    best
}

impl Default for HazardZoneTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Ray-casting point-in-polygon test, used to decide whether a person's
/// bottom-center point has intruded into a hazard zone.
pub fn point_in_polygon(point: (f32, f32), polygon: &[(f32, f32)]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let (px, py) = point;
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if ((yi > py) != (yj > py)) && (px < (xj - xi) * (py - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_inside_square_is_detected() {
        let square = vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];
        assert!(point_in_polygon((5.0, 5.0), &square));
        assert!(!point_in_polygon((15.0, 5.0), &square));
    }

    fn synthetic_frame(width: u32, height: u32, seed: u32) -> Frame {
        let mut data = vec![0u8; (width * height * 3) as usize];
        for y in 0..height {
            for x in 0..width {
                let v = (x.wrapping_mul(37).wrapping_add(y.wrapping_mul(101)).wrapping_add(seed) % 251) as u8;
                let idx = ((y * width + x) * 3) as usize;
                data[idx] = v;
                data[idx + 1] = v;
                data[idx + 2] = v;
            }
        }
        Frame::new(data, width, height)
    }

    #[test]
    fn static_mode_passes_polygons_through() {
        let tracker = HazardZoneTracker::new();
        let poly = vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)];
        tracker.set_safe_area(vec![poly.clone()], None, true);
        let frame = synthetic_frame(4, 4, 0);
        let out = tracker.get_transformed_safe_areas(&frame);
        assert_eq!(out, vec![poly]);
    }

    #[test]
    fn dynamic_mode_without_reference_frame_falls_back_to_identity() {
        let tracker = HazardZoneTracker::new();
        let poly = vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)];
        tracker.set_safe_area(vec![poly.clone()], None, false);
        let frame = synthetic_frame(4, 4, 0);
        let out = tracker.get_transformed_safe_areas(&frame);
        assert_eq!(out, vec![poly]);
    }

    #[test]
    fn dynamic_mode_with_unmoved_camera_yields_near_identity_projection() {
        let tracker = HazardZoneTracker::new();
        let poly = vec![(10.0, 10.0), (50.0, 10.0), (50.0, 50.0)];
        let frame = synthetic_frame(96, 96, 7);
        tracker.set_safe_area(vec![poly.clone()], Some(frame.clone()), false);

        let out = tracker.get_transformed_safe_areas(&frame);
        assert_eq!(out.len(), 1);
        for (expected, actual) in poly.iter().zip(out[0].iter()) {
            assert!((expected.0 - actual.0).abs() < 2.0);
            assert!((expected.1 - actual.1).abs() < 2.0);
        }
    }

    #[test]
    fn identity_homography_is_a_no_op() {
        let h = Homography::identity();
        assert_eq!(h.apply((3.0, 4.0)), (3.0, 4.0));
    }
}
