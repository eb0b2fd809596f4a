//! Face alignment to the canonical ArcFace 112x112 crop.
//!
//! A 4-DOF similarity transform (scale, rotation, translation) is fitted in
//! closed form from the five detected landmarks to the InsightFace reference
//! landmarks, then the crop is sampled bilinearly through its inverse.

use crate::frame::Frame;

pub const ALIGNED_SIZE: usize = 112;

/// InsightFace reference landmarks for a 112x112 crop:
/// left eye, right eye, nose, left mouth corner, right mouth corner.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// `dst = [a -b; b a] * src + [tx; ty]`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit from `src` to `dst` points.
    ///
    /// Degenerate input (all source points coincide) yields `None`.
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(x, y), p| (x + p.0, y + p.1));
            (sx / n, sy / n)
        };
        let (sxm, sym) = mean(src);
        let (dxm, dym) = mean(dst);

        let (mut dot, mut cross, mut var) = (0.0f32, 0.0f32, 0.0f32);
        for (s, d) in src.iter().zip(dst) {
            let (sx, sy) = (s.0 - sxm, s.1 - sym);
            let (dx, dy) = (d.0 - dxm, d.1 - dym);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            var += sx * sx + sy * sy;
        }
        if var <= f32::EPSILON {
            return None;
        }

        let a = dot / var;
        let b = cross / var;
        Some(Self {
            a,
            b,
            tx: dxm - (a * sxm - b * sym),
            ty: dym - (b * sxm + a * sym),
        })
    }

    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det <= f32::EPSILON {
            return None;
        }
        let (a, b) = (self.a / det, -self.b / det);
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Warp the face described by `landmarks` into a 112x112 grayscale crop.
///
/// Pixels sampled outside the frame are black. Degenerate landmarks produce
/// `None`.
pub fn align_face(frame: &Frame, landmarks: &[(f32, f32); 5]) -> Option<Vec<u8>> {
    let to_crop = Similarity::fit(landmarks, &REFERENCE_LANDMARKS)?;
    let to_frame = to_crop.inverse()?;

    let mut crop = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];
    for (i, out) in crop.iter_mut().enumerate() {
        let (cx, cy) = ((i % ALIGNED_SIZE) as f32, (i / ALIGNED_SIZE) as f32);
        let (fx, fy) = to_frame.apply((cx, cy));
        *out = sample_bilinear(frame, fx, fy);
    }
    Some(crop)
}

fn sample_bilinear(frame: &Frame, x: f32, y: f32) -> u8 {
    let (x0, y0) = (x.floor(), y.floor());
    let (wx, wy) = (x - x0, y - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);

    let p = |dx: i64, dy: i64| frame.pixel(x0 + dx, y0 + dy) as f32;
    let top = p(0, 0) * (1.0 - wx) + p(1, 0) * wx;
    let bottom = p(0, 1) * (1.0 - wx) + p(1, 1) * wx;
    (top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-3 && (a.1 - b.1).abs() < 1e-3
    }

    #[test]
    fn test_fit_identity() {
        let t = Similarity::fit(&REFERENCE_LANDMARKS, &REFERENCE_LANDMARKS).unwrap();
        assert!((t.a - 1.0).abs() < 1e-4);
        assert!(t.b.abs() < 1e-4);
        assert!(t.tx.abs() < 1e-3 && t.ty.abs() < 1e-3);
    }

    #[test]
    fn test_fit_recovers_scale_and_shift() {
        // src = reference scaled by 2 and shifted by (10, 20).
        let src = REFERENCE_LANDMARKS.map(|(x, y)| (x * 2.0 + 10.0, y * 2.0 + 20.0));
        let t = Similarity::fit(&src, &REFERENCE_LANDMARKS).unwrap();
        assert!((t.a - 0.5).abs() < 1e-4);
        assert!(t.b.abs() < 1e-4);
        for (s, d) in src.iter().zip(&REFERENCE_LANDMARKS) {
            assert!(close(t.apply(*s), *d));
        }
    }

    #[test]
    fn test_fit_recovers_rotation() {
        // 90 degrees counter-clockwise: (x, y) -> (-y, x)
        let src = REFERENCE_LANDMARKS.map(|(x, y)| (y, -x));
        let t = Similarity::fit(&src, &REFERENCE_LANDMARKS).unwrap();
        assert!(t.a.abs() < 1e-4);
        assert!((t.b - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_inverse_round_trips_a_point() {
        let t = Similarity {
            a: 0.8,
            b: 0.3,
            tx: 5.0,
            ty: -2.0,
        };
        let p = (12.5, 40.0);
        assert!(close(t.inverse().unwrap().apply(t.apply(p)), p));
    }

    #[test]
    fn test_fit_degenerate() {
        assert!(Similarity::fit(&[(3.0, 3.0); 5], &REFERENCE_LANDMARKS).is_none());
    }

    #[test]
    fn test_align_uniform_frame() {
        let frame = Frame {
            data: vec![90; 200 * 200],
            width: 200,
            height: 200,
        };
        let landmarks = REFERENCE_LANDMARKS.map(|(x, y)| (x + 40.0, y + 40.0));
        let crop = align_face(&frame, &landmarks).unwrap();
        assert_eq!(crop.len(), ALIGNED_SIZE * ALIGNED_SIZE);
        assert!(crop.iter().all(|&p| p == 90));
    }

    #[test]
    fn test_align_outside_frame_is_black() {
        let frame = Frame {
            data: vec![255; 4],
            width: 2,
            height: 2,
        };
        let landmarks = REFERENCE_LANDMARKS.map(|(x, y)| (x + 1000.0, y + 1000.0));
        let crop = align_face(&frame, &landmarks).unwrap();
        assert!(crop.iter().all(|&p| p == 0));
    }
}
