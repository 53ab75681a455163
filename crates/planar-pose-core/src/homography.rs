//! Plane-to-plane homographies and their direct linear estimation.

use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

/// Planar projective transform, defined up to scale.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_fn(|r, c| rows[r][c]))
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        std::array::from_fn(|r| std::array::from_fn(|c| self.h[(r, c)]))
    }

    /// Map a point; points sent to infinity come back non-finite.
    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v.x / v.z, v.y / v.z)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }

    /// Scale so that `h[2,2] == 1`; unchanged when `h[2,2]` is (near) zero.
    pub fn normalized(&self) -> Self {
        unit_h33(self.h).map_or(*self, Self::new)
    }
}

fn unit_h33(h: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let w = h[(2, 2)];
    (w.abs() >= 1e-12).then(|| h / w)
}

/// Similarity moving the centroid to the origin with mean radius `sqrt(2)`.
struct Conditioner {
    t: Matrix3<f64>,
}

impl Conditioner {
    fn for_points(pts: &[Point2<f64>]) -> Self {
        let n = pts.len() as f64;
        let centroid = pts.iter().fold(Vector3::zeros(), |acc, p| acc + Vector3::new(p.x, p.y, 0.0)) / n;
        let radius = pts
            .iter()
            .map(|p| (p.coords - centroid.xy()).norm())
            .sum::<f64>()
            / n;
        let s = if radius > 1e-12 {
            std::f64::consts::SQRT_2 / radius
        } else {
            1.0
        };
        Self {
            t: Matrix3::new(s, 0.0, -s * centroid.x, 0.0, s, -s * centroid.y, 0.0, 0.0, 1.0),
        }
    }

    fn apply(&self, p: &Point2<f64>) -> Point2<f64> {
        let s = self.t[(0, 0)];
        Point2::new(s * p.x + self.t[(0, 2)], s * p.y + self.t[(1, 2)])
    }

    fn apply_all(&self, pts: &[Point2<f64>]) -> Vec<Point2<f64>> {
        pts.iter().map(|p| self.apply(p)).collect()
    }
}

/// `T_dst⁻¹ · Hn · T_src`, scaled to `h[2,2] == 1`.
fn uncondition(hn: Matrix3<f64>, src: &Conditioner, dst: &Conditioner) -> Option<Matrix3<f64>> {
    let h = dst.t.try_inverse()? * hn * src.t;
    let h = unit_h33(h)?;
    h.iter().all(|v| v.is_finite()).then_some(h)
}

/// Least-squares DLT estimate of H such that `dst ~ H * src`.
///
/// Exactly four correspondences are routed to [`homography_from_4pt`].
/// Returns `None` for mismatched lengths, fewer than four points, or a
/// degenerate configuration.
pub fn estimate_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }
    if let (Ok(s), Ok(d)) = (
        <&[Point2<f64>; 4]>::try_from(src),
        <&[Point2<f64>; 4]>::try_from(dst),
    ) {
        return homography_from_4pt(s, d);
    }

    let cs = Conditioner::for_points(src);
    let cd = Conditioner::for_points(dst);

    // Two rows per pair: h1·x - u h3·x = 0 and h2·x - v h3·x = 0.
    let mut a = DMatrix::<f64>::zeros(2 * src.len(), 9);
    for (k, (s, d)) in src.iter().zip(dst).enumerate() {
        let x = cs.apply(s);
        let u = cd.apply(d);
        let xh = [x.x, x.y, 1.0];
        for c in 0..3 {
            a[(2 * k, c)] = xh[c];
            a[(2 * k, 6 + c)] = -u.x * xh[c];
            a[(2 * k + 1, 3 + c)] = xh[c];
            a[(2 * k + 1, 6 + c)] = -u.y * xh[c];
        }
    }

    let svd = a.svd(false, true);
    let smallest = svd.singular_values.imin();
    let v_t = svd.v_t?;
    let hn = Matrix3::from_fn(|r, c| v_t[(smallest, 3 * r + c)]);

    uncondition(hn, &cs, &cd).map(Homography::new)
}

/// Compute H such that `dst ~ H * src` from exactly four correspondences.
///
/// Corner order must be consistent between `src` and `dst`. Returns `None`
/// when any three points on either side are (nearly) collinear.
pub fn homography_from_4pt(src: &[Point2<f64>; 4], dst: &[Point2<f64>; 4]) -> Option<Homography> {
    let cs = Conditioner::for_points(src);
    let cd = Conditioner::for_points(dst);
    let sn = cs.apply_all(src);
    let dn = cd.apply_all(dst);
    if has_collinear_triple(&sn) || has_collinear_triple(&dn) {
        return None;
    }

    // Eight unknowns with h33 fixed to one.
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (k, (x, u)) in sn.iter().zip(&dn).enumerate() {
        let (r0, r1) = (2 * k, 2 * k + 1);
        a[(r0, 0)] = x.x;
        a[(r0, 1)] = x.y;
        a[(r0, 2)] = 1.0;
        a[(r1, 3)] = x.x;
        a[(r1, 4)] = x.y;
        a[(r1, 5)] = 1.0;
        a[(r0, 6)] = -u.x * x.x;
        a[(r0, 7)] = -u.x * x.y;
        a[(r1, 6)] = -u.y * x.x;
        a[(r1, 7)] = -u.y * x.y;
        b[r0] = u.x;
        b[r1] = u.y;
    }

    let sol = a.lu().solve(&b)?;
    let hn = Matrix3::from_fn(|r, c| if r == 2 && c == 2 { 1.0 } else { sol[3 * r + c] });
    uncondition(hn, &cs, &cd).map(Homography::new)
}

/// True if any three of the (conditioned) points are nearly collinear.
fn has_collinear_triple(pts: &[Point2<f64>]) -> bool {
    const MIN_AREA: f64 = 1e-9;
    let n = pts.len();
    (0..n).any(|a| {
        ((a + 1)..n).any(|b| {
            ((b + 1)..n).any(|c| {
                let ab = pts[b] - pts[a];
                let ac = pts[c] - pts[a];
                (ab.x * ac.y - ab.y * ac.x).abs() < MIN_AREA
            })
        })
    })
}

/// Forward transfer error `|H src - dst|` in destination units.
#[inline]
pub fn transfer_error(h: &Homography, src: Point2<f64>, dst: Point2<f64>) -> f64 {
    (h.apply(src) - dst).norm()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn perspective() -> Homography {
        Homography::from_array([
            [0.92, -0.07, 140.0],
            [0.04, 1.05, 95.0],
            [0.0007, 0.0003, 1.0],
        ])
    }

    #[test]
    fn array_conversion_is_row_major() {
        let h = perspective();
        assert_eq!(h.to_array()[0][2], 140.0);
        assert_eq!(h.h[(2, 0)], 0.0007);
        assert_eq!(Homography::from_array(h.to_array()), h);
    }

    #[test]
    fn inverse_undoes_apply() {
        let h = perspective();
        let inv = h.inverse().unwrap();
        for p in [Point2::new(-30.0, 12.0), Point2::new(400.0, 250.0)] {
            assert_relative_eq!(inv.apply(h.apply(p)), p, epsilon = 1e-9);
        }
    }

    #[test]
    fn minimal_solution_is_exact() {
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(200.0, 10.0),
            Point2::new(190.0, 150.0),
            Point2::new(-5.0, 140.0),
        ];
        let dst = src.map(|p| perspective().apply(p));
        let h = homography_from_4pt(&src, &dst).unwrap();
        assert_relative_eq!(h.h, perspective().h, epsilon = 1e-7);
        assert_eq!(h.h[(2, 2)], 1.0);
    }

    #[test]
    fn least_squares_on_a_grid() {
        let src: Vec<Point2<f64>> = (0..5)
            .flat_map(|r| (0..7).map(move |c| Point2::new(c as f64 * 30.0, r as f64 * 30.0)))
            .collect();
        let dst: Vec<Point2<f64>> = src.iter().map(|&p| perspective().apply(p)).collect();
        let h = estimate_homography(&src, &dst).unwrap();
        assert!(src.iter().zip(&dst).all(|(s, d)| transfer_error(&h, *s, *d) < 1e-6));
        assert_relative_eq!(h.normalized().h, perspective().h, epsilon = 1e-8);
    }

    #[test]
    fn degenerate_inputs_fail() {
        let line: Vec<Point2<f64>> = (0..4).map(|i| Point2::new(2.0 * i as f64, i as f64)).collect();
        assert!(estimate_homography(&line, &line).is_none());
        let five = [Point2::new(0.0, 0.0); 5];
        assert!(estimate_homography(&five, &five[..4]).is_none());
        assert!(estimate_homography(&five[..3], &five[..3]).is_none());
    }

    #[test]
    fn normalized_leaves_affine_scale_alone() {
        let h = Homography::new(Matrix3::new(2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 0.0));
        assert_eq!(h.normalized(), h);
    }
}
