//! RSSI multilateration.
//!
//! Averaged signal strengths are turned into range estimates with a log-distance
//! path-loss model, then a Levenberg-Marquardt solve finds the point whose
//! distances to the anchors best match those ranges.

use crate::anchors::AnchorRegistry;
use crate::core::types::{AggregatedSample, Position, PositionEstimate, DEFAULT_TAG_ID};
use nalgebra::{DMatrix, DVector, Vector2};

/// Calibrated signal strength at one unit of distance (dBm).
pub const TX_POWER_DBM: f64 = -61.0;

/// Path-loss exponent of the environment.
pub const PATH_LOSS_EXPONENT: f64 = 2.5;

/// Minimum number of known anchors needed for a fix.
pub const MIN_ANCHORS: usize = 3;

/// Log-distance path-loss model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathLossModel {
    pub tx_power: f64,
    pub exponent: f64,
}

impl Default for PathLossModel {
    fn default() -> Self {
        Self {
            tx_power: TX_POWER_DBM,
            exponent: PATH_LOSS_EXPONENT,
        }
    }
}

impl PathLossModel {
    /// Distance implied by a signal strength. Strictly decreasing in `rssi`.
    pub fn distance(&self, rssi: f64) -> f64 {
        10f64.powf((self.tx_power - rssi) / (10.0 * self.exponent))
    }

    /// Signal strength expected at `distance`.
    pub fn rssi_at(&self, distance: f64) -> f64 {
        self.tx_power - 10.0 * self.exponent * distance.log10()
    }
}

/// Distance for `rssi` under the default calibration.
pub fn rssi_to_distance(rssi: f64) -> f64 {
    PathLossModel::default().distance(rssi)
}

/// Solver limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverConfig {
    pub max_iterations: usize,
    /// Stop once the residual norm changes by less than this
    pub tolerance: f64,
    pub initial_damping: f64,
    pub max_damping: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-9,
            initial_damping: 1e-3,
            max_damping: 1e10,
        }
    }
}

/// Result of a least-squares solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Solution {
    pub position: Position,
    /// Norm of the residual vector at `position`
    pub residual_norm: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Position estimator with a fixed calibration.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionEstimator {
    pub model: PathLossModel,
    pub solver: SolverConfig,
}

impl PositionEstimator {
    pub fn new(model: PathLossModel, solver: SolverConfig) -> Self {
        Self { model, solver }
    }

    /// Estimate the default tag's position.
    pub fn estimate(
        &self,
        anchors: &AnchorRegistry,
        samples: &[AggregatedSample],
    ) -> Option<PositionEstimate> {
        self.estimate_for(DEFAULT_TAG_ID, anchors, samples)
    }

    /// Estimate `subject`'s position from averaged samples.
    ///
    /// Samples from anchors missing in the registry are ignored. Returns `None`
    /// when fewer than [`MIN_ANCHORS`] known samples remain.
    pub fn estimate_for(
        &self,
        subject: &str,
        anchors: &AnchorRegistry,
        samples: &[AggregatedSample],
    ) -> Option<PositionEstimate> {
        let (points, ranges): (Vec<Position>, Vec<f64>) = samples
            .iter()
            .filter(|s| s.rssi.is_finite())
            .filter_map(|s| {
                anchors
                    .get(&s.anchor_id)
                    .map(|p| (p, self.model.distance(s.rssi)))
            })
            .unzip();

        if points.len() < MIN_ANCHORS {
            tracing::debug!(
                known = points.len(),
                total = samples.len(),
                "Not enough known anchors for a fix"
            );
            return None;
        }

        let solution = solve(&points, &ranges, &self.solver);
        tracing::debug!(
            x = solution.position.x,
            y = solution.position.y,
            residual = solution.residual_norm,
            iterations = solution.iterations,
            converged = solution.converged,
            "Multilateration solved"
        );

        Some(PositionEstimate::new(subject, solution.position))
    }
}

/// Unweighted centroid of `points`.
pub fn centroid(points: &[Position]) -> Position {
    if points.is_empty() {
        return Position::default();
    }
    let n = points.len() as f64;
    Position::new(
        points.iter().map(|p| p.x).sum::<f64>() / n,
        points.iter().map(|p| p.y).sum::<f64>() / n,
    )
}

/// Minimise `Σ (‖anchor_i − p‖ − range_i)²` starting from the centroid.
///
/// Always returns the best iterate found; degenerate geometry or numerical
/// trouble ends the search early instead of failing.
pub fn solve(anchors: &[Position], ranges: &[f64], config: &SolverConfig) -> Solution {
    let start = centroid(anchors);
    let mut estimate = Vector2::new(start.x, start.y);

    let (mut residuals, mut jacobian) = residuals_and_jacobian(anchors, ranges, &estimate);
    let mut residual_norm = residuals.norm();
    let mut lambda = config.initial_damping;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < config.max_iterations {
        iterations += 1;

        let jt_j = jacobian.transpose() * &jacobian;
        let gradient = jacobian.transpose() * &residuals;

        // Marquardt scaling plus identity keeps the system solvable when
        // anchors are collinear or the estimate sits on an anchor.
        let mut augmented = jt_j.clone();
        for i in 0..2 {
            augmented[(i, i)] += lambda * (1.0 + jt_j[(i, i)]);
        }

        let step = match augmented.lu().solve(&(-gradient)) {
            Some(step) if step.iter().all(|v| v.is_finite()) => step,
            _ => break,
        };

        let candidate = estimate + Vector2::new(step[0], step[1]);
        let (new_residuals, new_jacobian) = residuals_and_jacobian(anchors, ranges, &candidate);
        let new_norm = new_residuals.norm();

        if new_norm.is_finite() && new_norm <= residual_norm {
            let improvement = residual_norm - new_norm;
            estimate = candidate;
            residuals = new_residuals;
            jacobian = new_jacobian;
            residual_norm = new_norm;
            lambda = (lambda / 10.0).max(1e-12);

            if improvement < config.tolerance {
                converged = true;
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > config.max_damping {
                break;
            }
        }
    }

    Solution {
        position: Position::new(estimate.x, estimate.y),
        residual_norm,
        iterations,
        converged,
    }
}

fn residuals_and_jacobian(
    anchors: &[Position],
    ranges: &[f64],
    estimate: &Vector2<f64>,
) -> (DVector<f64>, DMatrix<f64>) {
    let n = anchors.len();
    let mut residuals = DVector::zeros(n);
    let mut jacobian = DMatrix::zeros(n, 2);

    for (i, (anchor, range)) in anchors.iter().zip(ranges).enumerate() {
        let diff = estimate - Vector2::new(anchor.x, anchor.y);
        let predicted = diff.norm();
        residuals[i] = predicted - range;

        // Gradient is undefined at the anchor itself; leave the row at zero.
        if predicted > 1e-10 {
            jacobian[(i, 0)] = diff.x / predicted;
            jacobian[(i, 1)] = diff.y / predicted;
        }
    }

    (residuals, jacobian)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> AnchorRegistry {
        AnchorRegistry::from_points([("A1", 0.0, 0.0), ("A2", 10.0, 0.0), ("A3", 5.0, 10.0)])
    }

    /// Samples whose implied ranges are exact for `truth`.
    fn samples_for(registry: &AnchorRegistry, truth: Position) -> Vec<AggregatedSample> {
        let model = PathLossModel::default();
        registry
            .iter()
            .map(|a| AggregatedSample::new(a.id, model.rssi_at(a.position.distance_to(&truth))))
            .collect()
    }

    #[test]
    fn test_distance_model_constants() {
        assert!((rssi_to_distance(-61.0) - 1.0).abs() < 1e-12);
        assert!((rssi_to_distance(-86.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_distance_strictly_decreasing() {
        let mut previous = f64::INFINITY;
        for rssi in -120..=0 {
            let d = rssi_to_distance(rssi as f64);
            assert!(d < previous, "distance not decreasing at {rssi}");
            previous = d;
        }
    }

    #[test]
    fn test_rssi_at_inverts_distance() {
        let model = PathLossModel::default();
        for d in [0.5, 1.0, 3.7, 12.0] {
            assert!((model.distance(model.rssi_at(d)) - d).abs() < 1e-9);
        }
    }

    #[test]
    fn test_converges_to_true_position() {
        let registry = triangle();
        let truth = Position::new(5.0, 5.0);
        let estimate = PositionEstimator::default()
            .estimate(&registry, &samples_for(&registry, truth))
            .unwrap();

        assert_eq!(estimate.id, "TAG01");
        assert_eq!(estimate.kind, "tag");
        assert!(estimate.pos.distance_to(&truth) <= 0.1, "got {:?}", estimate.pos);
    }

    #[test]
    fn test_off_center_position() {
        let registry = AnchorRegistry::from_points([
            ("A1", 0.0, 0.0),
            ("A2", 20.0, 0.0),
            ("A3", 20.0, 15.0),
            ("A4", 0.0, 15.0),
        ]);
        let truth = Position::new(3.0, 11.0);
        let estimate = PositionEstimator::default()
            .estimate(&registry, &samples_for(&registry, truth))
            .unwrap();
        assert!(estimate.pos.distance_to(&truth) <= 0.1, "got {:?}", estimate.pos);
    }

    #[test]
    fn test_fewer_than_three_known_samples() {
        let registry = triangle();
        let estimator = PositionEstimator::default();

        assert!(estimator.estimate(&registry, &[]).is_none());

        let two = vec![
            AggregatedSample::new("A1", -65.0),
            AggregatedSample::new("A2", -65.0),
        ];
        assert!(estimator.estimate(&registry, &two).is_none());

        // Unknown anchors do not count towards the quorum.
        let padded = vec![
            AggregatedSample::new("A1", -65.0),
            AggregatedSample::new("A2", -65.0),
            AggregatedSample::new("ZZ", -65.0),
            AggregatedSample::new("YY", -65.0),
        ];
        assert!(estimator.estimate(&registry, &padded).is_none());
    }

    #[test]
    fn test_empty_registry_never_estimates() {
        let samples = vec![
            AggregatedSample::new("A1", -65.0),
            AggregatedSample::new("A2", -65.0),
            AggregatedSample::new("A3", -65.0),
        ];
        assert!(PositionEstimator::default()
            .estimate(&AnchorRegistry::default(), &samples)
            .is_none());
    }

    #[test]
    fn test_collinear_anchors_terminate() {
        let anchors = [
            Position::new(0.0, 0.0),
            Position::new(5.0, 0.0),
            Position::new(10.0, 0.0),
        ];
        let solution = solve(&anchors, &[4.0, 3.0, 6.0], &SolverConfig::default());

        assert!(solution.position.x.is_finite());
        assert!(solution.position.y.is_finite());
        assert!(solution.iterations <= SolverConfig::default().max_iterations);
    }

    #[test]
    fn test_coincident_anchors_terminate() {
        let anchors = [Position::new(2.0, 2.0); 3];
        let solution = solve(&anchors, &[1.0, 1.0, 1.0], &SolverConfig::default());

        assert!(solution.position.x.is_finite());
        assert!(solution.position.y.is_finite());
    }

    #[test]
    fn test_iteration_cap_is_respected() {
        let config = SolverConfig {
            max_iterations: 2,
            ..SolverConfig::default()
        };
        let anchors = [
            Position::new(0.0, 0.0),
            Position::new(10.0, 0.0),
            Position::new(5.0, 10.0),
        ];
        let solution = solve(&anchors, &[1.0, 20.0, 3.0], &config);
        assert!(solution.iterations <= 2);
        assert!(solution.position.x.is_finite());
    }

    #[test]
    fn test_centroid() {
        let c = centroid(&[
            Position::new(0.0, 0.0),
            Position::new(10.0, 0.0),
            Position::new(5.0, 10.0),
        ]);
        assert!((c.x - 5.0).abs() < 1e-12);
        assert!((c.y - 10.0 / 3.0).abs() < 1e-12);
    }
}
