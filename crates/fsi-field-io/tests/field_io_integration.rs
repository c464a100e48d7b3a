//! Process-level master/worker scatter-gather round-trip (S5's data-flow
//! shape, without a live rigid body attached).

use mpi::topology::Communicator;
use ndarray::{ArrayD, IxDyn};

use fsi_field_io::FieldCommunicator;
use fsi_grid::LocalField;
use fsi_topology::{CartesianTopology, Precision};

fn safe_grid_size(size: usize, dim: usize) -> Vec<usize> {
    vec![3 * size.max(1); dim]
}

#[test]
fn scatter_then_gather_a_scalar_field_round_trips_through_the_master() {
    let universe = mpi::initialize().expect("MPI must be able to initialize");
    let size = universe.world().size() as usize;
    let master_rank = 0;

    let topo = CartesianTopology::new(
        &universe,
        &safe_grid_size(size, 2),
        None,
        &[false, false],
        Precision::Double,
    )
    .unwrap();

    let field_io = FieldCommunicator::new(&topo, master_rank);
    let global_shape = topo.global_grid_size().to_vec();

    let global = if field_io.is_master() {
        let mut g = ArrayD::<f64>::zeros(IxDyn(&global_shape));
        for (idx, v) in g.iter_mut().enumerate() {
            *v = idx as f64;
        }
        Some(g)
    } else {
        None
    };

    let mut local = LocalField::<f64>::zeros_scalar(topo.local_grid_size(), 0).unwrap();
    field_io
        .scatter_scalar_field(&mut local, global.as_ref())
        .unwrap();

    let mut gathered = if field_io.is_master() {
        Some(ArrayD::<f64>::zeros(IxDyn(&global_shape)))
    } else {
        None
    };
    field_io
        .gather_scalar_field(&local, gathered.as_mut())
        .unwrap();

    if let (Some(original), Some(round_tripped)) = (&global, &gathered) {
        assert_eq!(original, round_tripped);
    }
}
