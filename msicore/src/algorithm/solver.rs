use nalgebra::{Matrix2, Vector2};

use crate::data::spot::Point;
use crate::error::{CoreError, Result};

/// Relative threshold below which the source scatter matrix counts as singular.
const DEGENERACY_EPSILON: f64 = 1e-12;

/// A fitted planar affine map `target = matrix * source + translation`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineTransform {
    pub matrix: Matrix2<f64>,
    pub translation: Vector2<f64>,
}

impl AffineTransform {
    pub fn identity() -> Self {
        AffineTransform {
            matrix: Matrix2::identity(),
            translation: Vector2::zeros(),
        }
    }

    pub fn apply(&self, point: Point) -> Point {
        let mapped = self.matrix * Vector2::new(point[0], point[1]) + self.translation;
        [mapped.x, mapped.y]
    }
}

/// Least-squares affine correspondence solver between two coordinate spaces.
///
/// # Description
///
/// A solver starts out unfitted. `fit` estimates the six affine parameters from
/// at least three non-collinear point pairs; more pairs give an overdetermined
/// least-squares fit. After fitting the solver only changes by fitting again.
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AffineSolver {
    transform: Option<AffineTransform>,
}

impl AffineSolver {
    pub fn new() -> Self {
        AffineSolver { transform: None }
    }

    /// A solver that maps every point onto itself.
    pub fn identity() -> Self {
        AffineSolver { transform: Some(AffineTransform::identity()) }
    }

    /// Build and fit a solver in one step.
    pub fn fitted(source: &[Point], target: &[Point]) -> Result<Self> {
        let mut solver = AffineSolver::new();
        solver.fit(source, target)?;
        Ok(solver)
    }

    /// Fit `target ≈ A·source + b` over all given pairs.
    ///
    /// # Arguments
    ///
    /// * `source` - points in the space the solver maps from
    /// * `target` - corresponding points, pair `i` matches `source[i]`
    ///
    /// # Errors
    ///
    /// * `InsufficientPoints` for fewer than 3 pairs
    /// * `MismatchedLengths` if the slices differ in length
    /// * `DegenerateGeometry` if the source points are collinear
    ///
    pub fn fit(&mut self, source: &[Point], target: &[Point]) -> Result<()> {
        if source.len() != target.len() {
            return Err(CoreError::MismatchedLengths {
                sources: source.len(),
                targets: target.len(),
            });
        }
        if source.len() < 3 {
            return Err(CoreError::InsufficientPoints { required: 3, found: source.len() });
        }

        let source_mean = centroid(source);
        let target_mean = centroid(target);

        // scatter of the centered source points and cross-covariance with the target
        let mut source_scatter = Matrix2::<f64>::zeros();
        let mut cross = Matrix2::<f64>::zeros();
        for (s, t) in source.iter().zip(target.iter()) {
            let ds = Vector2::new(s[0], s[1]) - source_mean;
            let dt = Vector2::new(t[0], t[1]) - target_mean;
            source_scatter += ds * ds.transpose();
            cross += dt * ds.transpose();
        }

        let trace = source_scatter.trace();
        if trace <= 0.0 || source_scatter.determinant() <= DEGENERACY_EPSILON * trace * trace {
            return Err(CoreError::DegenerateGeometry);
        }
        let inverse = source_scatter.try_inverse().ok_or(CoreError::DegenerateGeometry)?;

        let matrix = cross * inverse;
        let translation = target_mean - matrix * source_mean;
        self.transform = Some(AffineTransform { matrix, translation });
        Ok(())
    }

    /// Map points with the fitted transform.
    pub fn transform(&self, points: &[Point]) -> Result<Vec<Point>> {
        let transform = self.transform.as_ref().ok_or(CoreError::NotFitted)?;
        Ok(points.iter().map(|&p| transform.apply(p)).collect())
    }

    /// Map integer machine coordinates, as read from the spot array.
    pub fn transform_spots(&self, spots: &[[i64; 2]]) -> Result<Vec<Point>> {
        let transform = self.transform.as_ref().ok_or(CoreError::NotFitted)?;
        Ok(spots
            .iter()
            .map(|s| transform.apply([s[0] as f64, s[1] as f64]))
            .collect())
    }

    pub fn affine(&self) -> Option<&AffineTransform> {
        self.transform.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.transform.is_some()
    }
}

fn centroid(points: &[Point]) -> Vector2<f64> {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
    Vector2::new(sx / n, sy / n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[Point], b: &[Point]) {
        assert_eq!(a.len(), b.len());
        for (p, q) in a.iter().zip(b.iter()) {
            assert!((p[0] - q[0]).abs() < 1e-9, "{:?} vs {:?}", p, q);
            assert!((p[1] - q[1]).abs() < 1e-9, "{:?} vs {:?}", p, q);
        }
    }

    #[test]
    fn test_fit_exact_triangle() {
        let source = vec![[0.0, 0.0], [10.0, 0.0], [0.0, 5.0]];
        // rotate by 90 degrees, scale by 2, shift by (3, -1)
        let target: Vec<Point> = source
            .iter()
            .map(|p| [-2.0 * p[1] + 3.0, 2.0 * p[0] - 1.0])
            .collect();

        let solver = AffineSolver::fitted(&source, &target).unwrap();
        assert_close(&solver.transform(&source).unwrap(), &target);
        assert_close(&solver.transform(&[[1.0, 1.0]]).unwrap(), &[[1.0, 1.0]]);
    }

    #[test]
    fn test_fit_overdetermined_recovers_map() {
        let source = vec![[0.0, 0.0], [100.0, 0.0], [100.0, 40.0], [0.0, 40.0], [50.0, 20.0], [13.0, 7.0]];
        let target: Vec<Point> = source
            .iter()
            .map(|p| [0.5 * p[0] + 0.1 * p[1] + 7.0, -0.2 * p[0] + 1.5 * p[1] + 2.0])
            .collect();

        let solver = AffineSolver::fitted(&source, &target).unwrap();
        assert_close(&solver.transform(&source).unwrap(), &target);
        let affine = solver.affine().unwrap();
        assert!((affine.matrix[(0, 1)] - 0.1).abs() < 1e-9);
        assert!((affine.translation.y - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_requires_three_points() {
        let err = AffineSolver::fitted(&[[0.0, 0.0], [1.0, 1.0]], &[[0.0, 0.0], [1.0, 1.0]]).unwrap_err();
        assert_eq!(err, CoreError::InsufficientPoints { required: 3, found: 2 });
    }

    #[test]
    fn test_fit_rejects_mismatched_lengths() {
        let err = AffineSolver::fitted(
            &[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            &[[0.0, 0.0], [1.0, 0.0]],
        )
        .unwrap_err();
        assert_eq!(err, CoreError::MismatchedLengths { sources: 3, targets: 2 });
    }

    #[test]
    fn test_fit_rejects_collinear_points() {
        let source = vec![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        let err = AffineSolver::fitted(&source, &source).unwrap_err();
        assert_eq!(err, CoreError::DegenerateGeometry);

        let coincident = vec![[4.0, 4.0]; 3];
        assert_eq!(
            AffineSolver::fitted(&coincident, &coincident).unwrap_err(),
            CoreError::DegenerateGeometry
        );
    }

    #[test]
    fn test_collinearity_is_scale_invariant() {
        // large machine coordinates, well-conditioned triangle
        let source = vec![[100000.0, 200000.0], [100400.0, 200000.0], [100000.0, 200300.0]];
        assert!(AffineSolver::fitted(&source, &source).is_ok());
    }

    #[test]
    fn test_transform_before_fit() {
        let solver = AffineSolver::new();
        assert_eq!(solver.transform(&[[1.0, 2.0]]).unwrap_err(), CoreError::NotFitted);
        assert!(!solver.is_fitted());
    }

    #[test]
    fn test_identity_spots() {
        let solver = AffineSolver::identity();
        let mapped = solver.transform_spots(&[[10, 20], [15, 20], [10, 25]]).unwrap();
        assert_eq!(mapped, vec![[10.0, 20.0], [15.0, 20.0], [10.0, 25.0]]);
    }
}
