//! Linearized 6-DOF point-to-plane solve.

use nalgebra::{Matrix6, Vector3, Vector6};

/// One inlier correspondence for the solve: a world-space frame point, the
/// matched surfel's normal, and the signed point-to-plane residual.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Correspondence {
    pub point_world: Vector3<f32>,
    pub normal: Vector3<f32>,
    pub residual: f32,
}

/// Solve the linearized rigid-transform least-squares update.
///
/// Minimizes the sum of squared point-to-plane residuals
/// `n · (exp(ξ) p − q)` around the current pose. The Jacobian row for a
/// correspondence is `[p × n, n]` with the twist ordered rotation-first.
/// A small diagonal damping term keeps degenerate geometry (a single
/// frontal plane leaves in-plane motion unconstrained) solvable: the
/// unconstrained directions come back as zero instead of failing the
/// factorization. Returns `(rotation axis-angle, translation)`, or `None`
/// when the damped system is still singular.
pub(crate) fn solve_point_to_plane(
    correspondences: &[Correspondence],
) -> Option<(Vector3<f32>, Vector3<f32>)> {
    if correspondences.len() < 6 {
        return None;
    }

    let mut h = Matrix6::<f32>::zeros();
    let mut g = Vector6::<f32>::zeros();

    for corr in correspondences {
        let rot = corr.point_world.cross(&corr.normal);
        let j = [
            rot.x,
            rot.y,
            rot.z,
            corr.normal.x,
            corr.normal.y,
            corr.normal.z,
        ];

        for row in 0..6 {
            for col in 0..6 {
                h[(row, col)] += j[row] * j[col];
            }
            g[row] -= j[row] * corr.residual;
        }
    }

    let damping = 1e-6 * h.trace().max(1.0);
    for i in 0..6 {
        h[(i, i)] += damping;
    }

    let delta = h.cholesky()?.solve(&g);
    if delta.iter().any(|x| !x.is_finite()) {
        return None;
    }

    Some((
        Vector3::new(delta[0], delta[1], delta[2]),
        Vector3::new(delta[3], delta[4], delta[5]),
    ))
}
