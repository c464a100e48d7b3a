//! Virtual-boundary penalty coupling between the Eulerian grid and
//! Lagrangian markers: a regularized delta-function kernel moves values
//! between the two representations, and a PID-style penalty law turns a
//! velocity deviation into a restoring force.

use fsi_grid::LocalField;
use ndarray::Array2;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForcingError {
    #[error("marker positions have {got} columns, expected {expected} (field's spatial rank)")]
    DimensionMismatch { got: usize, expected: usize },
    #[error("grid_spacing/local_origin length {got} does not match the field's spatial rank {expected}")]
    AxisLengthMismatch { got: usize, expected: usize },
    #[error("marker array row counts disagree: positions has {positions}, values has {values}")]
    RowCountMismatch { positions: usize, values: usize },
}

/// Roma/Peskin three-point regularized delta function, support radius 1.5
/// cells either side of the argument.
fn roma_peskin_phi(r: f64) -> f64 {
    let ar = r.abs();
    if ar <= 0.5 {
        (1.0 + (1.0 - 3.0 * r * r).max(0.0).sqrt()) / 3.0
    } else if ar <= 1.5 {
        (5.0 - 3.0 * ar - (1.0 - 3.0 * (1.0 - ar).powi(2)).max(0.0).sqrt()) / 6.0
    } else {
        0.0
    }
}

/// Cartesian-product stencil of grid indices (in ghost-padded coordinates)
/// and weights around a physical position, one 3-point `roma_peskin_phi`
/// factor per axis. Indices that would fall outside `padded_shape` are
/// dropped; a marker whose support is clipped this way needs a wider halo
/// than it currently has, which spread/interpolate surface as an
/// under-unity weight sum rather than a panic.
fn stencil_points(
    pos: &[f64],
    grid_spacing: &[f64],
    local_origin: &[f64],
    ghost_width: usize,
    padded_shape: &[usize],
) -> Vec<(Vec<usize>, f64)> {
    let dim = pos.len();
    let mut per_axis: Vec<Vec<(i64, f64)>> = Vec::with_capacity(dim);
    for axis in 0..dim {
        let h = grid_spacing[axis];
        let rel = (pos[axis] - local_origin[axis]) / h;
        let i0 = rel.round() as i64;
        let mut entries = Vec::with_capacity(3);
        for di in -1..=1i64 {
            let i = i0 + di;
            let r = rel - i as f64;
            let w = roma_peskin_phi(r);
            if w != 0.0 {
                let padded_index = i + ghost_width as i64;
                if padded_index >= 0 && (padded_index as usize) < padded_shape[axis] {
                    entries.push((padded_index, w));
                }
            }
        }
        per_axis.push(entries);
    }

    let mut result: Vec<(Vec<usize>, f64)> = vec![(Vec::new(), 1.0)];
    for axis_entries in per_axis {
        let mut next = Vec::with_capacity(result.len() * axis_entries.len().max(1));
        for (idx_so_far, w_so_far) in &result {
            for &(idx, w) in &axis_entries {
                let mut idx2 = idx_so_far.clone();
                idx2.push(idx as usize);
                next.push((idx2, w_so_far * w));
            }
        }
        result = next;
    }
    result
}

fn check_axes(
    marker_positions: &Array2<f64>,
    grid_spacing: &[f64],
    local_origin: &[f64],
    expected_dim: usize,
) -> Result<(), ForcingError> {
    if marker_positions.ncols() != expected_dim {
        return Err(ForcingError::DimensionMismatch {
            got: marker_positions.ncols(),
            expected: expected_dim,
        });
    }
    if grid_spacing.len() != expected_dim || local_origin.len() != expected_dim {
        return Err(ForcingError::AxisLengthMismatch {
            got: grid_spacing.len().min(local_origin.len()),
            expected: expected_dim,
        });
    }
    Ok(())
}

/// Interpolates a vector field's value onto every marker position, using
/// the owning rank's local (ghost-padded) data only.
pub fn interpolate_vector_field_to_markers(
    field: &LocalField<f64>,
    marker_positions: &Array2<f64>,
    grid_spacing: &[f64],
    local_origin: &[f64],
) -> Result<Array2<f64>, ForcingError> {
    let dim = field.spatial_dim();
    check_axes(marker_positions, grid_spacing, local_origin, dim)?;
    let padded_shape = field.padded_shape();
    let components: Vec<_> = (0..field.n_components()).map(|c| field.component(c)).collect();

    let mut out = Array2::zeros((marker_positions.nrows(), field.n_components()));
    for row in 0..marker_positions.nrows() {
        let pos: Vec<f64> = (0..dim).map(|a| marker_positions[[row, a]]).collect();
        let stencil = stencil_points(&pos, grid_spacing, local_origin, field.ghost_width(), &padded_shape);
        for (c, view) in components.iter().enumerate() {
            let mut acc = 0.0;
            for (idx, weight) in &stencil {
                acc += view[ndarray::IxDyn(idx)] * weight;
            }
            out[[row, c]] = acc;
        }
    }
    Ok(out)
}

/// Spreads per-marker forces back onto the grid (the transpose operation of
/// [`interpolate_vector_field_to_markers`]). `marker_measure` is the
/// Lagrangian arc-length (2D) or surface-area (3D) element each marker
/// represents, and is what keeps total spread force proportional to total
/// marker force independent of grid resolution.
pub fn spread_marker_forces_to_field(
    field: &mut LocalField<f64>,
    marker_positions: &Array2<f64>,
    marker_forces: &Array2<f64>,
    marker_measure: &[f64],
    grid_spacing: &[f64],
    local_origin: &[f64],
) -> Result<(), ForcingError> {
    let dim = field.spatial_dim();
    check_axes(marker_positions, grid_spacing, local_origin, dim)?;
    if marker_forces.nrows() != marker_positions.nrows() {
        return Err(ForcingError::RowCountMismatch {
            positions: marker_positions.nrows(),
            values: marker_forces.nrows(),
        });
    }
    let cell_volume: f64 = grid_spacing.iter().product();
    let padded_shape = field.padded_shape();
    let ghost_width = field.ghost_width();
    let n_components = field.n_components();

    for row in 0..marker_positions.nrows() {
        let pos: Vec<f64> = (0..dim).map(|a| marker_positions[[row, a]]).collect();
        let stencil = stencil_points(&pos, grid_spacing, local_origin, ghost_width, &padded_shape);
        let scale = marker_measure[row] / cell_volume;
        for c in 0..n_components {
            let force_c = marker_forces[[row, c]];
            let mut view = field.component_mut(c);
            for (idx, weight) in &stencil {
                view[ndarray::IxDyn(idx)] += force_c * weight * scale;
            }
        }
    }
    Ok(())
}

/// Proportional-integral-derivative penalty law tying marker velocity to a
/// target (body) velocity. `k` is the proportional gain, `k_i` the integral
/// gain against the running `∑Z·dt` term, and `c` a derivative gain damping
/// the rate of change of the deviation `Z = u_fluid − u_body`.
pub struct VirtualBoundaryForcing {
    k: f64,
    c: f64,
    k_i: f64,
    dt: f64,
    z_prev: Array2<f64>,
    z_integral: Array2<f64>,
}

impl VirtualBoundaryForcing {
    pub fn new(k: f64, c: f64, k_i: f64, dt: f64, n_owned_markers: usize, dim: usize) -> Self {
        Self {
            k,
            c,
            k_i,
            dt,
            z_prev: Array2::zeros((n_owned_markers, dim)),
            z_integral: Array2::zeros((n_owned_markers, dim)),
        }
    }

    pub fn resize(&mut self, n_owned_markers: usize, dim: usize) {
        self.z_prev = Array2::zeros((n_owned_markers, dim));
        self.z_integral = Array2::zeros((n_owned_markers, dim));
    }

    /// Number of owned markers the running integral/derivative state is
    /// currently sized for — ownership changes every step as markers move,
    /// so callers resize before reusing the state.
    pub fn z_integral_len(&self) -> usize {
        self.z_integral.nrows()
    }

    /// Computes the restoring force for each owned marker and advances the
    /// integral/derivative state by one step of size `dt`.
    pub fn compute_marker_force(
        &mut self,
        u_fluid_at_owned_markers: &Array2<f64>,
        u_body_at_owned_markers: &Array2<f64>,
    ) -> Array2<f64> {
        let z = u_fluid_at_owned_markers - u_body_at_owned_markers;
        self.z_integral = &self.z_integral + &z * self.dt;
        let z_dot = (&z - &self.z_prev) / self.dt;
        let force = -(&z * self.k + &self.z_integral * self.k_i + &z_dot * self.c);
        self.z_prev = z;
        force
    }

    /// L2 norm of the velocity deviation over markers owned by *this*
    /// rank only. Combining this into a domain-wide norm requires summing
    /// squared contributions across ranks before taking the square root,
    /// which needs topology access this crate deliberately doesn't have —
    /// `fsi-sim` performs that reduction.
    pub fn get_grid_deviation_error_l2_norm(
        &self,
        u_fluid_at_owned_markers: &Array2<f64>,
        u_body_at_owned_markers: &Array2<f64>,
    ) -> f64 {
        let z = u_fluid_at_owned_markers - u_body_at_owned_markers;
        z.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    pub fn local_squared_deviation(
        &self,
        u_fluid_at_owned_markers: &Array2<f64>,
        u_body_at_owned_markers: &Array2<f64>,
    ) -> f64 {
        let z = u_fluid_at_owned_markers - u_body_at_owned_markers;
        z.iter().map(|v| v * v).sum()
    }
}
