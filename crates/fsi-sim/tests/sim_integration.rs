//! Process-level test of the full per-step loop with no immersed bodies:
//! a diffusion-flux kernel fed back into a scalar field via explicit Euler
//! (S2's data-flow shape, driven end to end through `FlowSimulator`).

use mpi::topology::Communicator;

use fsi_kernels::DiffusionFlux3D;
use fsi_sim::FlowSimulator;
use fsi_topology::{CartesianTopology, Precision};

fn safe_grid_size(size: usize, dim: usize) -> Vec<usize> {
    vec![4 * size.max(1); dim]
}

#[test]
fn a_uniform_field_stays_uniform_under_pure_diffusion() {
    let universe = mpi::initialize().expect("MPI must be able to initialize");
    let size = universe.world().size() as usize;

    let topo = CartesianTopology::new(
        &universe,
        &safe_grid_size(size, 3),
        None,
        &[true, true, true],
        Precision::Double,
    )
    .unwrap();

    let (events, _rx) = fsi_events::channel();
    let kernel = DiffusionFlux3D::new(0.1, 1.0);

    let mut sim = FlowSimulator::new(
        &topo,
        0,
        kernel,
        1,
        false,
        0.01,
        true,
        1,
        1,
        vec![1.0, 1.0, 1.0],
        vec![0.0, 0.0, 0.0],
        events,
    )
    .unwrap();

    // A perfectly uniform field has zero Laplacian everywhere, so the
    // stencil's output — and hence the feedback update — should be zero.
    sim.field_mut().raw_mut().fill(3.0);

    let report = sim.step().unwrap();
    assert!(report.max_abs_output < 1e-10);

    let view = sim.field().component(0);
    assert!(view.iter().all(|&v| (v - 3.0).abs() < 1e-10));
}

#[test]
fn step_count_advances_by_one_per_call() {
    let universe = mpi::initialize().expect("MPI must be able to initialize");
    let size = universe.world().size() as usize;

    let topo = CartesianTopology::new(
        &universe,
        &safe_grid_size(size, 3),
        None,
        &[true, true, true],
        Precision::Double,
    )
    .unwrap();

    let (events, _rx) = fsi_events::channel();
    let kernel = DiffusionFlux3D::new(0.1, 1.0);
    let mut sim = FlowSimulator::new(
        &topo,
        0,
        kernel,
        1,
        false,
        0.01,
        true,
        1,
        1,
        vec![1.0, 1.0, 1.0],
        vec![0.0, 0.0, 0.0],
        events,
    )
    .unwrap();

    assert_eq!(sim.step_count(), 0);
    sim.step().unwrap();
    assert_eq!(sim.step_count(), 1);
    sim.step().unwrap();
    assert_eq!(sim.step_count(), 2);
}
