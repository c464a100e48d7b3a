//! Process-level coupling test: a stationary cylinder in a zero-velocity
//! field should deposit no net force once its body velocity matches the
//! fluid at the markers (S6's force-conservation shape, single body case).

use fsi_body::{CircularCylinderForcingGrid, ImmersedBodyFlowInteraction, PrescribedRigidBody};
use fsi_grid::LocalField;
use fsi_topology::{CartesianTopology, Precision};

fn safe_grid_size(size: usize, dim: usize) -> Vec<usize> {
    vec![8 * size.max(1); dim]
}

#[test]
fn a_stationary_cylinder_matching_fluid_velocity_has_zero_penalty_force() {
    let universe = mpi::initialize().expect("MPI must be able to initialize");
    let size = universe.world().size() as usize;

    let topo = CartesianTopology::new(
        &universe,
        &safe_grid_size(size, 2),
        None,
        &[false, false],
        Precision::Double,
    )
    .unwrap();

    let dx = 1.0;
    let local_grid = topo.local_grid_size();
    let coords = topo.coords();
    let subdomain_lower: Vec<f64> = (0..2)
        .map(|axis| (coords[axis] as usize * local_grid[axis]) as f64 * dx)
        .collect();
    let subdomain_upper: Vec<f64> = (0..2)
        .map(|axis| subdomain_lower[axis] + local_grid[axis] as f64 * dx)
        .collect();
    let local_origin = subdomain_lower.clone();

    let global_grid = topo.global_grid_size();
    let center = vec![
        global_grid[0] as f64 * dx / 2.0,
        global_grid[1] as f64 * dx / 2.0,
    ];
    let radius = (global_grid[0].min(global_grid[1]) as f64 * dx) / 8.0;

    let forcing_grid = CircularCylinderForcingGrid::new(16, radius);
    let ghost_width = 1;
    let mut coupling = ImmersedBodyFlowInteraction::new(
        &topo,
        forcing_grid,
        ghost_width,
        false,
        1.0,
        1.0,
        0.0,
        0.01,
    );

    let mut velocity = LocalField::<f64>::zeros_vector(local_grid, ghost_width, 2).unwrap();
    // Fluid is at rest everywhere and the body is at rest too, so the
    // penalty should never see any relative velocity.
    velocity.raw_mut().fill(0.0);

    let body = PrescribedRigidBody {
        center_of_mass: center,
        com_velocity: vec![0.0, 0.0],
        orientation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        angular_velocity: [0.0, 0.0, 0.0],
    };

    let (force, _torque) = coupling
        .step(
            &mut velocity,
            &subdomain_lower,
            &subdomain_upper,
            &[dx, dx],
            &local_origin,
            &body,
        )
        .unwrap();

    for component in force {
        assert!(component.abs() < 1e-9, "expected zero force, got {component}");
    }
}
