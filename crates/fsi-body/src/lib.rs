//! Immersed-body geometry (the "forcing grid" of Lagrangian markers a body
//! exposes to the flow) and the per-step orchestration that couples it to
//! the Eulerian grid through `fsi-forcing` and `fsi-lagrangian`.

use ndarray::Array2;
use thiserror::Error;

use fsi_forcing::{
    interpolate_vector_field_to_markers, spread_marker_forces_to_field, ForcingError,
    VirtualBoundaryForcing,
};
use fsi_grid::LocalField;
use fsi_halo::{GhostCommunicator, HaloError};
use fsi_lagrangian::{LagrangianError, LagrangianFieldCommunicator};
use fsi_topology::CartesianTopology;

#[derive(Debug, Error)]
pub enum BodyError {
    #[error(transparent)]
    Forcing(#[from] ForcingError),
    #[error(transparent)]
    Lagrangian(#[from] LagrangianError),
    #[error(transparent)]
    Halo(#[from] HaloError),
}

/// Minimal rigid-body kinematic state a `ForcingGrid` needs to place and
/// move its markers: center-of-mass position/velocity and an orientation
/// frame given as an orthonormal 3x3 matrix (row-major), plus angular
/// velocity about the center of mass. 2D bodies use only the first two
/// rows/columns and a scalar angular velocity about the third axis.
pub trait RigidBodyState {
    fn center_of_mass(&self) -> Vec<f64>;
    fn com_velocity(&self) -> Vec<f64>;
    fn orientation(&self) -> [[f64; 3]; 3];
    fn angular_velocity(&self) -> [f64; 3];
}

/// A rigid body whose orientation never changes and whose center of mass is
/// fixed or moves with prescribed, externally-driven kinematics — enough to
/// drive the forcing grids below without a full rigid-body time integrator,
/// which is out of scope for this crate.
#[derive(Debug, Clone)]
pub struct PrescribedRigidBody {
    pub center_of_mass: Vec<f64>,
    pub com_velocity: Vec<f64>,
    pub orientation: [[f64; 3]; 3],
    pub angular_velocity: [f64; 3],
}

impl RigidBodyState for PrescribedRigidBody {
    fn center_of_mass(&self) -> Vec<f64> {
        self.center_of_mass.clone()
    }
    fn com_velocity(&self) -> Vec<f64> {
        self.com_velocity.clone()
    }
    fn orientation(&self) -> [[f64; 3]; 3] {
        self.orientation
    }
    fn angular_velocity(&self) -> [f64; 3] {
        self.angular_velocity
    }
}

/// A body's Lagrangian surface representation: marker positions, the
/// velocities those markers carry (from rigid or prescribed kinematics),
/// and the arc-length/area element (`marker_measure`) each one represents
/// for force-spreading conservation.
pub trait ForcingGrid {
    fn n_markers(&self) -> usize;
    fn dim(&self) -> usize;
    fn positions(&self) -> Array2<f64>;
    fn velocities(&self) -> Array2<f64>;
    fn marker_measure(&self) -> Vec<f64>;

    /// Recomputes marker positions/velocities from the current body state.
    fn update_from_body(&mut self, body: &dyn RigidBodyState);

    /// Reduces a full, per-marker force array (already summed across ranks
    /// by `ImmersedBodyFlowInteraction`) to a net force and torque about the
    /// body's center of mass, for a caller-owned rigid-body integrator to
    /// consume. `marker_forces` is the force the body exerts *on the fluid*
    /// (what was spread onto the grid); by Newton's third law the body sees
    /// the negative of that, so implementations negate before returning.
    fn net_force_and_torque(&self, marker_forces: &Array2<f64>, body: &dyn RigidBodyState) -> (Vec<f64>, Vec<f64>);
}

/// Reduces per-marker forces on the fluid to the rigid body's net reaction
/// force and torque about its center of mass, negating both (Newton's third
/// law) and projecting the torque through the body's orientation frame so
/// the result is expressed consistently with `RigidBodyState::orientation`.
fn net_force_and_torque_generic(
    positions: &Array2<f64>,
    marker_forces: &Array2<f64>,
    body: &dyn RigidBodyState,
    dim: usize,
) -> (Vec<f64>, Vec<f64>) {
    let center_of_mass = body.center_of_mass();
    let orientation = body.orientation();
    let mut net_force = vec![0.0; dim];
    // Torque is a scalar in 2D (about the out-of-plane axis) and a 3-vector
    // in 3D; we always return a 3-vector and leave the unused components at
    // zero in 2D so callers have one signature to deal with.
    let mut net_torque_raw = [0.0; 3];
    for row in 0..positions.nrows() {
        let mut r = [0.0; 3];
        let mut f = [0.0; 3];
        for a in 0..dim {
            r[a] = positions[[row, a]] - center_of_mass[a];
            f[a] = marker_forces[[row, a]];
            net_force[a] += f[a];
        }
        net_torque_raw[0] += r[1] * f[2] - r[2] * f[1];
        net_torque_raw[1] += r[2] * f[0] - r[0] * f[2];
        net_torque_raw[2] += r[0] * f[1] - r[1] * f[0];
    }
    for component in net_force.iter_mut() {
        *component = -*component;
    }
    let net_torque = (0..3)
        .map(|i| {
            -(orientation[i][0] * net_torque_raw[0]
                + orientation[i][1] * net_torque_raw[1]
                + orientation[i][2] * net_torque_raw[2])
        })
        .collect();
    (net_force, net_torque)
}

/// A rigid circular cylinder in 2D: `n_markers` equally spaced around the
/// circumference of radius `radius`.
pub struct CircularCylinderForcingGrid {
    pub n_markers: usize,
    pub radius: f64,
    positions: Array2<f64>,
    velocities: Array2<f64>,
}

impl CircularCylinderForcingGrid {
    pub fn new(n_markers: usize, radius: f64) -> Self {
        Self {
            n_markers,
            radius,
            positions: Array2::zeros((n_markers, 2)),
            velocities: Array2::zeros((n_markers, 2)),
        }
    }
}

impl ForcingGrid for CircularCylinderForcingGrid {
    fn n_markers(&self) -> usize {
        self.n_markers
    }
    fn dim(&self) -> usize {
        2
    }
    fn positions(&self) -> Array2<f64> {
        self.positions.clone()
    }
    fn velocities(&self) -> Array2<f64> {
        self.velocities.clone()
    }
    fn marker_measure(&self) -> Vec<f64> {
        let ds = 2.0 * std::f64::consts::PI * self.radius / self.n_markers as f64;
        vec![ds; self.n_markers]
    }

    fn update_from_body(&mut self, body: &dyn RigidBodyState) {
        let com = body.center_of_mass();
        let com_vel = body.com_velocity();
        let omega = body.angular_velocity()[2];
        for i in 0..self.n_markers {
            let theta = 2.0 * std::f64::consts::PI * i as f64 / self.n_markers as f64;
            let rx = self.radius * theta.cos();
            let ry = self.radius * theta.sin();
            self.positions[[i, 0]] = com[0] + rx;
            self.positions[[i, 1]] = com[1] + ry;
            // rigid-body velocity: v_com + omega x r
            self.velocities[[i, 0]] = com_vel[0] - omega * ry;
            self.velocities[[i, 1]] = com_vel[1] + omega * rx;
        }
    }

    fn net_force_and_torque(&self, marker_forces: &Array2<f64>, body: &dyn RigidBodyState) -> (Vec<f64>, Vec<f64>) {
        net_force_and_torque_generic(&self.positions, marker_forces, body, 2)
    }
}

/// A rigid sphere in 3D, markers distributed with a Fibonacci (golden-angle)
/// spiral so they are close to equal-area without an iterative relaxation.
pub struct SphereForcingGrid {
    pub n_markers: usize,
    pub radius: f64,
    local_offsets: Array2<f64>,
    positions: Array2<f64>,
    velocities: Array2<f64>,
}

impl SphereForcingGrid {
    pub fn new(n_markers: usize, radius: f64) -> Self {
        let golden_angle = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
        let mut local_offsets = Array2::zeros((n_markers, 3));
        for i in 0..n_markers {
            let y = 1.0 - 2.0 * (i as f64 + 0.5) / n_markers as f64;
            let r_xy = (1.0 - y * y).max(0.0).sqrt();
            let theta = golden_angle * i as f64;
            local_offsets[[i, 0]] = r_xy * theta.cos() * radius;
            local_offsets[[i, 1]] = y * radius;
            local_offsets[[i, 2]] = r_xy * theta.sin() * radius;
        }
        Self {
            n_markers,
            radius,
            local_offsets,
            positions: Array2::zeros((n_markers, 3)),
            velocities: Array2::zeros((n_markers, 3)),
        }
    }
}

impl ForcingGrid for SphereForcingGrid {
    fn n_markers(&self) -> usize {
        self.n_markers
    }
    fn dim(&self) -> usize {
        3
    }
    fn positions(&self) -> Array2<f64> {
        self.positions.clone()
    }
    fn velocities(&self) -> Array2<f64> {
        self.velocities.clone()
    }
    fn marker_measure(&self) -> Vec<f64> {
        let area = 4.0 * std::f64::consts::PI * self.radius * self.radius / self.n_markers as f64;
        vec![area; self.n_markers]
    }

    fn update_from_body(&mut self, body: &dyn RigidBodyState) {
        let com = body.center_of_mass();
        let com_vel = body.com_velocity();
        let omega = body.angular_velocity();
        let orient = body.orientation();
        for i in 0..self.n_markers {
            let local = [
                self.local_offsets[[i, 0]],
                self.local_offsets[[i, 1]],
                self.local_offsets[[i, 2]],
            ];
            let mut r = [0.0; 3];
            for a in 0..3 {
                r[a] = orient[a][0] * local[0] + orient[a][1] * local[1] + orient[a][2] * local[2];
            }
            for a in 0..3 {
                self.positions[[i, a]] = com[a] + r[a];
            }
            // v = v_com + omega x r
            let omega_cross_r = [
                omega[1] * r[2] - omega[2] * r[1],
                omega[2] * r[0] - omega[0] * r[2],
                omega[0] * r[1] - omega[1] * r[0],
            ];
            for a in 0..3 {
                self.velocities[[i, a]] = com_vel[a] + omega_cross_r[a];
            }
        }
    }

    fn net_force_and_torque(&self, marker_forces: &Array2<f64>, body: &dyn RigidBodyState) -> (Vec<f64>, Vec<f64>) {
        net_force_and_torque_generic(&self.positions, marker_forces, body, 3)
    }
}

/// Surface lattice around a rod-like body's centerline: `n_surface_points`
/// markers per element, arranged on a ring of the element's local radius
/// around each centerline segment's midpoint. The centerline kinematics
/// (element positions, velocities, radii) are supplied directly rather than
/// computed here — integrating a Cosserat rod's own equations of motion is
/// outside this crate's scope, which only couples a *given* rod
/// configuration to the flow.
pub struct RodSurfaceLatticeForcingGrid {
    pub n_elements: usize,
    pub n_surface_points: usize,
    positions: Array2<f64>,
    velocities: Array2<f64>,
    measures: Vec<f64>,
    /// Per-marker offset from its element's midpoint, in the global frame.
    /// Needed to fold marker forces back into per-element torques.
    moment_arm: Array2<f64>,
    /// Per-element local frame `[d1, d2, d3]` (row-major, d3 along the
    /// tangent) used to project a marker torque contribution from the
    /// global frame into the element's own frame, the way a Cosserat rod's
    /// `director_collection` does.
    element_frame: Vec<[[f64; 3]; 3]>,
}

impl RodSurfaceLatticeForcingGrid {
    pub fn new(n_elements: usize, n_surface_points: usize) -> Self {
        let n_markers = n_elements * n_surface_points;
        Self {
            n_elements,
            n_surface_points,
            positions: Array2::zeros((n_markers, 3)),
            velocities: Array2::zeros((n_markers, 3)),
            measures: vec![0.0; n_markers],
            moment_arm: Array2::zeros((n_markers, 3)),
            element_frame: vec![[[0.0; 3]; 3]; n_elements],
        }
    }

    /// Recomputes the lattice from externally supplied rod element state:
    /// `element_midpoints`/`element_velocities` are `(n_elements, 3)`,
    /// `element_tangents` are unit vectors `(n_elements, 3)`, and
    /// `element_radius`/`element_length` are per-element scalars.
    pub fn update_from_rod_elements(
        &mut self,
        element_midpoints: &Array2<f64>,
        element_velocities: &Array2<f64>,
        element_tangents: &Array2<f64>,
        element_radius: &[f64],
        element_length: &[f64],
    ) {
        for e in 0..self.n_elements {
            let tangent = [
                element_tangents[[e, 0]],
                element_tangents[[e, 1]],
                element_tangents[[e, 2]],
            ];
            let (u, v) = orthonormal_basis(tangent);
            self.element_frame[e] = [u, v, tangent];
            let radius = element_radius[e];
            let ring_measure = 2.0 * std::f64::consts::PI * radius * element_length[e]
                / self.n_surface_points as f64;
            for p in 0..self.n_surface_points {
                let theta = 2.0 * std::f64::consts::PI * p as f64 / self.n_surface_points as f64;
                let idx = e * self.n_surface_points + p;
                for a in 0..3 {
                    let offset = radius * (theta.cos() * u[a] + theta.sin() * v[a]);
                    self.moment_arm[[idx, a]] = offset;
                    self.positions[[idx, a]] = element_midpoints[[e, a]] + offset;
                    // Surface points co-rotate with the element's translational
                    // velocity only; the rod's own angular velocity field
                    // would add a spin term this crate doesn't track.
                    self.velocities[[idx, a]] = element_velocities[[e, a]];
                }
                self.measures[idx] = ring_measure;
            }
        }
    }
}

/// Builds an orthonormal basis `(u, v)` perpendicular to a unit `tangent`,
/// using whichever of the world X/Y axes is least parallel to it to avoid
/// degeneracy.
fn orthonormal_basis(tangent: [f64; 3]) -> ([f64; 3], [f64; 3]) {
    let reference = if tangent[0].abs() < 0.9 {
        [1.0, 0.0, 0.0]
    } else {
        [0.0, 1.0, 0.0]
    };
    let u = normalize(cross(reference, tangent));
    let v = cross(tangent, u);
    (u, v)
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(a: [f64; 3]) -> [f64; 3] {
    let norm = (a[0] * a[0] + a[1] * a[1] + a[2] * a[2]).sqrt();
    [a[0] / norm, a[1] / norm, a[2] / norm]
}

impl ForcingGrid for RodSurfaceLatticeForcingGrid {
    fn n_markers(&self) -> usize {
        self.n_elements * self.n_surface_points
    }
    fn dim(&self) -> usize {
        3
    }
    fn positions(&self) -> Array2<f64> {
        self.positions.clone()
    }
    fn velocities(&self) -> Array2<f64> {
        self.velocities.clone()
    }
    fn marker_measure(&self) -> Vec<f64> {
        self.measures.clone()
    }

    fn update_from_body(&mut self, _body: &dyn RigidBodyState) {
        // A rod isn't a single rigid body; callers drive it through
        // `update_from_rod_elements` instead. This no-op keeps the
        // `ForcingGrid` trait uniform across rigid and flexible bodies.
    }

    /// A rod isn't a single rigid body, so it has no single net force/torque
    /// pair; instead this returns the per-node force array (flattened,
    /// `(n_elements + 1) x 3`, row-major) and the per-element torque array
    /// (flattened, `n_elements x 3`, row-major), mirroring a Cosserat rod's
    /// `body_flow_forces`/`body_flow_torques`. Each element's marker forces
    /// split evenly onto its two endpoint nodes, and each element's torque
    /// is its markers' moment-arm cross products projected into that
    /// element's own local frame — both negated per Newton's third law.
    /// `body` is unused: a rod has no single center of mass or orientation.
    fn net_force_and_torque(&self, marker_forces: &Array2<f64>, _body: &dyn RigidBodyState) -> (Vec<f64>, Vec<f64>) {
        let mut node_forces = vec![0.0; (self.n_elements + 1) * 3];
        let mut element_torques = vec![0.0; self.n_elements * 3];

        for e in 0..self.n_elements {
            let start = e * self.n_surface_points;
            let end = start + self.n_surface_points;

            let mut element_force = [0.0; 3];
            let mut element_torque_global = [0.0; 3];
            for idx in start..end {
                let f = [
                    marker_forces[[idx, 0]],
                    marker_forces[[idx, 1]],
                    marker_forces[[idx, 2]],
                ];
                let r = [
                    self.moment_arm[[idx, 0]],
                    self.moment_arm[[idx, 1]],
                    self.moment_arm[[idx, 2]],
                ];
                for a in 0..3 {
                    element_force[a] += f[a];
                }
                // negative sign due to Newton's third law
                let contribution = cross(r, [-f[0], -f[1], -f[2]]);
                for a in 0..3 {
                    element_torque_global[a] += contribution[a];
                }
            }

            for a in 0..3 {
                node_forces[e * 3 + a] -= 0.5 * element_force[a];
                node_forces[(e + 1) * 3 + a] -= 0.5 * element_force[a];
            }

            let frame = self.element_frame[e];
            for a in 0..3 {
                element_torques[e * 3 + a] = frame[a][0] * element_torque_global[0]
                    + frame[a][1] * element_torque_global[1]
                    + frame[a][2] * element_torque_global[2];
            }
        }

        (node_forces, element_torques)
    }
}

/// Per-step orchestration of one immersed body: refresh its forcing grid,
/// recompute marker ownership, interpolate fluid velocity, compute the
/// penalty force, spread it back to the grid, and fold the force
/// contributions from every rank back into a single consistent array.
pub struct ImmersedBodyFlowInteraction<'t, G: ForcingGrid> {
    pub forcing_grid: G,
    pub forcing: VirtualBoundaryForcing,
    lagrangian: LagrangianFieldCommunicator<'t>,
    halo: GhostCommunicator<'t>,
}

impl<'t, G: ForcingGrid> ImmersedBodyFlowInteraction<'t, G> {
    /// `ghost_width`/`full_exchange` must match the `velocity_field` the
    /// body is coupled against, so the sum-back halo exchange `step` runs
    /// after spreading sees the same ghost layout as the field itself.
    pub fn new(
        topology: &'t CartesianTopology,
        forcing_grid: G,
        ghost_width: usize,
        full_exchange: bool,
        k: f64,
        c: f64,
        k_i: f64,
        dt: f64,
    ) -> Self {
        let dim = forcing_grid.dim();
        Self {
            lagrangian: LagrangianFieldCommunicator::new(topology),
            forcing: VirtualBoundaryForcing::new(k, c, k_i, dt, 0, dim),
            halo: GhostCommunicator::new(topology, ghost_width, full_exchange),
            forcing_grid,
        }
    }

    pub fn owned_marker_count(&self) -> usize {
        self.lagrangian.owned_count()
    }

    /// Runs one coupling step against `velocity_field` (a vector
    /// `LocalField` with `dim` components) and returns the net force and
    /// torque on the body, already summed across every rank.
    pub fn step(
        &mut self,
        velocity_field: &mut LocalField<f64>,
        subdomain_lower: &[f64],
        subdomain_upper: &[f64],
        grid_spacing: &[f64],
        local_origin: &[f64],
        body: &dyn RigidBodyState,
    ) -> Result<(Vec<f64>, Vec<f64>), BodyError> {
        self.forcing_grid.update_from_body(body);
        let mut positions = self.forcing_grid.positions();
        self.lagrangian
            .broadcast_positions(&mut positions, 0)?;
        self.lagrangian
            .rank_and_map(&positions, subdomain_lower, subdomain_upper)?;

        let owned = self.lagrangian.local_indices();
        if owned.len() != self.forcing.z_integral_len() {
            self.forcing.resize(owned.len(), self.forcing_grid.dim());
        }
        tracing::debug!(n_owned = owned.len(), n_markers = self.forcing_grid.n_markers(), "coupling step owns markers");

        let all_velocities = self.forcing_grid.velocities();
        let all_measure = self.forcing_grid.marker_measure();
        let owned_positions = select_rows(&positions, owned);
        let owned_body_velocities = select_rows(&all_velocities, owned);
        let owned_measure: Vec<f64> = owned.iter().map(|&i| all_measure[i]).collect();

        let owned_fluid_velocities = interpolate_vector_field_to_markers(
            velocity_field,
            &owned_positions,
            grid_spacing,
            local_origin,
        )?;

        let owned_forces = self
            .forcing
            .compute_marker_force(&owned_fluid_velocities, &owned_body_velocities);

        spread_marker_forces_to_field(
            velocity_field,
            &owned_positions,
            &owned_forces,
            &owned_measure,
            grid_spacing,
            local_origin,
        )?;

        // A marker near a subdomain boundary spreads part of its force into
        // a neighbor's halo; fold that back into the neighbor's owned cells
        // before this rank's contribution is considered final.
        self.halo.exchange_vector_field_sum_init(velocity_field)?;
        self.halo.exchange_finalise()?;

        let n_markers = self.forcing_grid.n_markers();
        let global_forces = self
            .lagrangian
            .assemble_marker_vector(&owned_forces, n_markers, self.forcing_grid.dim())?;

        Ok(self.forcing_grid.net_force_and_torque(&global_forces, body))
    }
}

/// Object-safe facade over [`ImmersedBodyFlowInteraction`], dropping its
/// `ForcingGrid` type parameter so a driver can hold a heterogeneous list of
/// coupled bodies (a cylinder next to a sphere next to a rod) behind one
/// `Vec<Box<dyn CoupledBody>>` instead of one monomorphic field per body
/// shape.
pub trait CoupledBody {
    fn owned_marker_count(&self) -> usize;

    fn step(
        &mut self,
        velocity_field: &mut LocalField<f64>,
        subdomain_lower: &[f64],
        subdomain_upper: &[f64],
        grid_spacing: &[f64],
        local_origin: &[f64],
        body: &dyn RigidBodyState,
    ) -> Result<(Vec<f64>, Vec<f64>), BodyError>;
}

impl<'t, G: ForcingGrid> CoupledBody for ImmersedBodyFlowInteraction<'t, G> {
    fn owned_marker_count(&self) -> usize {
        ImmersedBodyFlowInteraction::owned_marker_count(self)
    }

    fn step(
        &mut self,
        velocity_field: &mut LocalField<f64>,
        subdomain_lower: &[f64],
        subdomain_upper: &[f64],
        grid_spacing: &[f64],
        local_origin: &[f64],
        body: &dyn RigidBodyState,
    ) -> Result<(Vec<f64>, Vec<f64>), BodyError> {
        ImmersedBodyFlowInteraction::step(
            self,
            velocity_field,
            subdomain_lower,
            subdomain_upper,
            grid_spacing,
            local_origin,
            body,
        )
    }
}

fn select_rows(array: &Array2<f64>, rows: &[usize]) -> Array2<f64> {
    let mut out = Array2::zeros((rows.len(), array.ncols()));
    for (dst, &src) in rows.iter().enumerate() {
        for c in 0..array.ncols() {
            out[[dst, c]] = array[[src, c]];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cylinder_markers_lie_on_the_circle() {
        let mut grid = CircularCylinderForcingGrid::new(8, 2.0);
        let body = PrescribedRigidBody {
            center_of_mass: vec![1.0, 1.0],
            com_velocity: vec![0.0, 0.0],
            orientation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            angular_velocity: [0.0, 0.0, 0.0],
        };
        grid.update_from_body(&body);
        for i in 0..8 {
            let dx = grid.positions[[i, 0]] - 1.0;
            let dy = grid.positions[[i, 1]] - 1.0;
            let r = (dx * dx + dy * dy).sqrt();
            assert!((r - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn cylinder_marker_measure_sums_to_circumference() {
        let grid = CircularCylinderForcingGrid::new(16, 3.0);
        let total: f64 = grid.marker_measure().iter().sum();
        assert!((total - 2.0 * std::f64::consts::PI * 3.0).abs() < 1e-9);
    }

    #[test]
    fn sphere_markers_lie_on_the_sphere() {
        let mut grid = SphereForcingGrid::new(100, 1.5);
        let body = PrescribedRigidBody {
            center_of_mass: vec![0.0, 0.0, 0.0],
            com_velocity: vec![0.0, 0.0, 0.0],
            orientation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            angular_velocity: [0.0, 0.0, 0.0],
        };
        grid.update_from_body(&body);
        for i in 0..100 {
            let r2: f64 = (0..3).map(|a| grid.positions[[i, a]].powi(2)).sum();
            assert!((r2.sqrt() - 1.5).abs() < 1e-6);
        }
    }

    #[test]
    fn rod_lattice_radius_matches_element_radius() {
        let mut grid = RodSurfaceLatticeForcingGrid::new(2, 6);
        let midpoints = Array2::from_shape_vec((2, 3), vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0]).unwrap();
        let velocities = Array2::zeros((2, 3));
        let tangents = Array2::from_shape_vec((2, 3), vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]).unwrap();
        let radius = vec![0.2, 0.2];
        let length = vec![1.0, 1.0];
        grid.update_from_rod_elements(&midpoints, &velocities, &tangents, &radius, &length);
        for idx in 0..12 {
            let e = idx / 6;
            let dx = grid.positions[[idx, 0]] - midpoints[[e, 0]];
            let dy = grid.positions[[idx, 1]] - midpoints[[e, 1]];
            let dz = grid.positions[[idx, 2]] - midpoints[[e, 2]];
            let r = (dx * dx + dy * dy + dz * dz).sqrt();
            assert!((r - 0.2).abs() < 1e-9);
        }
    }

    #[test]
    fn cylinder_net_force_and_torque_negate_the_marker_forces_on_the_fluid() {
        let mut grid = CircularCylinderForcingGrid::new(4, 1.0);
        let body = PrescribedRigidBody {
            center_of_mass: vec![0.0, 0.0],
            com_velocity: vec![0.0, 0.0],
            orientation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            angular_velocity: [0.0, 0.0, 0.0],
        };
        grid.update_from_body(&body);

        // Marker 0 sits at (1, 0); push the fluid there with force (0, 1).
        let mut marker_forces = Array2::zeros((4, 2));
        marker_forces[[0, 1]] = 1.0;

        let (net_force, net_torque) = grid.net_force_and_torque(&marker_forces, &body);
        assert!((net_force[0] - 0.0).abs() < 1e-9);
        assert!((net_force[1] - -1.0).abs() < 1e-9);
        assert!((net_torque[2] - -1.0).abs() < 1e-9);
    }

    #[test]
    fn rod_element_splits_force_to_its_two_endpoint_nodes_and_negates_torque() {
        let mut grid = RodSurfaceLatticeForcingGrid::new(1, 4);
        let midpoints = Array2::zeros((1, 3));
        let velocities = Array2::zeros((1, 3));
        let tangents = Array2::from_shape_vec((1, 3), vec![0.0, 0.0, 1.0]).unwrap();
        grid.update_from_rod_elements(&midpoints, &velocities, &tangents, &[1.0], &[1.0]);

        // Marker 1 carries the element's moment arm (1, 0, 0); push the
        // fluid there with force (0, 1, 0).
        let mut marker_forces = Array2::zeros((4, 3));
        marker_forces[[1, 1]] = 1.0;

        let body = PrescribedRigidBody {
            center_of_mass: vec![0.0, 0.0, 0.0],
            com_velocity: vec![0.0, 0.0, 0.0],
            orientation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            angular_velocity: [0.0, 0.0, 0.0],
        };
        let (node_forces, element_torques) = grid.net_force_and_torque(&marker_forces, &body);

        assert_eq!(node_forces.len(), 6);
        for node in [0usize, 1] {
            assert!((node_forces[node * 3] - 0.0).abs() < 1e-9);
            assert!((node_forces[node * 3 + 1] - -0.5).abs() < 1e-9);
            assert!((node_forces[node * 3 + 2] - 0.0).abs() < 1e-9);
        }

        assert_eq!(element_torques.len(), 3);
        assert!((element_torques[0] - 0.0).abs() < 1e-9);
        assert!((element_torques[1] - 0.0).abs() < 1e-9);
        assert!((element_torques[2] - -1.0).abs() < 1e-9);
    }
}
