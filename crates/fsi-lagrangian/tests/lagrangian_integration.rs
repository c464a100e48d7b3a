//! Process-level marker ownership and sum-reduce assembly tests (S5's
//! rigid-body scatter/gather shape, at the marker-field layer).

use mpi::topology::Communicator;
use ndarray::Array2;

use fsi_lagrangian::LagrangianFieldCommunicator;
use fsi_topology::{CartesianTopology, Precision};

fn safe_grid_size(size: usize, dim: usize) -> Vec<usize> {
    vec![4 * size.max(1); dim]
}

#[test]
fn every_marker_is_owned_by_exactly_one_rank() {
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

    let global_grid = topo.global_grid_size();
    let local_grid = topo.local_grid_size();
    let coords = topo.coords();
    let subdomain_lower: Vec<f64> = (0..2)
        .map(|axis| (coords[axis] as usize * local_grid[axis]) as f64)
        .collect();
    let subdomain_upper: Vec<f64> = (0..2)
        .map(|axis| subdomain_lower[axis] + local_grid[axis] as f64)
        .collect();

    // One marker per grid point of the global domain: every position falls
    // in exactly one rank's half-open subdomain interval.
    let n_markers = global_grid[0] * global_grid[1];
    let mut positions = Array2::<f64>::zeros((n_markers, 2));
    let mut k = 0;
    for iy in 0..global_grid[0] {
        for ix in 0..global_grid[1] {
            positions[[k, 0]] = iy as f64 + 0.5;
            positions[[k, 1]] = ix as f64 + 0.5;
            k += 1;
        }
    }

    let mut lagrangian = LagrangianFieldCommunicator::new(&topo);
    lagrangian
        .rank_and_map(&positions, &subdomain_lower, &subdomain_upper)
        .unwrap();

    let owned_locally = lagrangian.owned_count() as i64;
    let mut total_owned = vec![0i64];
    topo.comm()
        .all_reduce_into(&[owned_locally], &mut total_owned, mpi::collective::SystemOperation::sum());
    assert_eq!(total_owned[0], n_markers as i64);
}

#[test]
fn assemble_marker_scalar_sums_contributions_from_every_owning_rank() {
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

    let n_markers = 4usize;
    // Force every marker into rank 0's subdomain so only one rank
    // contributes a nonzero value; every other rank owns nothing.
    let positions = Array2::<f64>::zeros((n_markers, 2));
    let subdomain_lower = vec![0.0, 0.0];
    let subdomain_upper: Vec<f64> = topo
        .local_grid_size()
        .iter()
        .map(|&n| n as f64)
        .collect();

    let mut lagrangian = LagrangianFieldCommunicator::new(&topo);
    lagrangian
        .rank_and_map(&positions, &subdomain_lower, &subdomain_upper)
        .unwrap();

    let owned_values: Vec<f64> = vec![1.0; lagrangian.owned_count()];
    let assembled = lagrangian
        .assemble_marker_scalar(&owned_values, n_markers)
        .unwrap();

    if topo.coords().iter().all(|&c| c == 0) {
        assert!(assembled.iter().all(|&v| v == 1.0));
    }
}
