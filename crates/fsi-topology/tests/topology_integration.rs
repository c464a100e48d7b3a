//! Process-level integration tests that build a real MPI Cartesian
//! communicator. Run under `cargo test` (a singleton, one-rank MPI session)
//! or under `mpiexec -n <N> cargo test --test topology_integration` for the
//! multi-rank behavior these invariants are really about.

use mpi::topology::Communicator;

use fsi_topology::{CartesianTopology, Precision};

/// A 2D grid size divisible by every possible factorization of `size`
/// ranks: each axis of the resolved process topology always divides
/// `size` exactly (their product equals `size`), so scaling the grid by
/// `size` itself guarantees `global % topology == 0` regardless of how
/// `size` gets split across axes.
fn safe_grid_size(size: usize, dim: usize) -> Vec<usize> {
    let g = 4 * size.max(1);
    vec![g; dim]
}

#[test]
fn topology_construction_respects_the_requested_world() {
    let universe = mpi::initialize().expect("MPI must be able to initialize");
    let world = universe.world();
    let size = world.size() as usize;

    let topo = CartesianTopology::new(
        &universe,
        &safe_grid_size(size, 2),
        None,
        &[false, false],
        Precision::Double,
    )
    .expect("a grid scaled by the world size must always be divisible");

    assert_eq!(topo.size() as usize, size);
    assert!(topo.rank() < topo.size());
    assert_eq!(topo.process_topology().iter().product::<i32>(), size as i32);
    for axis in 0..2 {
        assert_eq!(
            topo.local_grid_size()[axis] * topo.process_topology()[axis] as usize,
            topo.global_grid_size()[axis]
        );
    }
}

#[test]
fn three_d_topology_always_has_a_unit_axis() {
    let universe = mpi::initialize().expect("MPI must be able to initialize");
    let world = universe.world();
    let size = world.size() as usize;

    let topo = CartesianTopology::new(
        &universe,
        &safe_grid_size(size, 3),
        None,
        &[false, false, false],
        Precision::Double,
    )
    .expect("auto-distribution in 3D must pin a unit axis");

    assert!(topo.process_topology().iter().any(|&v| v == 1));
}

#[test]
fn non_periodic_boundary_ranks_have_no_outward_neighbor() {
    let universe = mpi::initialize().expect("MPI must be able to initialize");
    let world = universe.world();
    let size = world.size() as usize;

    let topo = CartesianTopology::new(
        &universe,
        &safe_grid_size(size, 2),
        None,
        &[false, false],
        Precision::Double,
    )
    .unwrap();

    for axis in 0..2 {
        let dims = topo.process_topology();
        let coords = topo.coords();
        let neighbor = topo.neighbor(axis);
        if coords[axis] == 0 {
            assert_eq!(neighbor.prev, None);
        }
        if coords[axis] == dims[axis] - 1 {
            assert_eq!(neighbor.next, None);
        }
    }
}

#[test]
fn periodic_boundary_ranks_always_have_a_neighbor() {
    let universe = mpi::initialize().expect("MPI must be able to initialize");
    let world = universe.world();
    let size = world.size() as usize;

    let topo = CartesianTopology::new(
        &universe,
        &safe_grid_size(size, 2),
        None,
        &[true, true],
        Precision::Double,
    )
    .unwrap();

    for axis in 0..2 {
        let neighbor = topo.neighbor(axis);
        assert!(neighbor.prev.is_some());
        assert!(neighbor.next.is_some());
    }
}
