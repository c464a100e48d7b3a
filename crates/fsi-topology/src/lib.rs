//! Cartesian process-grid construction for the distributed Eulerian grid.
//!
//! [`CartesianTopology`] is the bottom of the stack: every other `fsi-*`
//! crate is handed one by construction and never builds its own
//! communicator. It owns the one MPI Cartesian communicator for the whole
//! simulation and answers three questions for its caller: how big is my
//! local block, who are my neighbors along each axis, and what element type
//! (single/double precision) is this run using.

use mpi::environment::Universe;
use mpi::topology::{CartesianCommunicator, CartesianLayout, Communicator};
use thiserror::Error;

/// Construction-time failures. These correspond to the `ConfigError` kind:
/// every variant here is detected before a single cell of data moves and is
/// fatal to the whole process group.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("grid dimension must be 2 or 3, got {0}")]
    UnsupportedDimension(usize),
    #[error("rank distribution has {given} entries but the grid is {expected}-dimensional")]
    RankDistributionLengthMismatch { given: usize, expected: usize },
    #[error("periodic flag has {given} entries but the grid is {expected}-dimensional")]
    PeriodicLengthMismatch { given: usize, expected: usize },
    #[error(
        "process count {size} does not factor into the fully-specified rank distribution {dims:?}"
    )]
    DistributionMismatch { size: i32, dims: Vec<i32> },
    #[error(
        "{available} ranks must be auto-sized across the remaining axes but a fixed axis product of {requested} does not evenly divide it"
    )]
    ZeroAxisCount { requested: i32, available: i32 },
    #[error("global grid size {global:?} is not evenly divisible by process topology {topology:?} along axis {axis}")]
    IndivisibleGrid {
        global: Vec<usize>,
        topology: Vec<i32>,
        axis: usize,
    },
    #[error("3-D process topology {0:?} has no axis of size 1; the slab-decomposed Poisson solve requires one")]
    NoUnitAxis(Vec<i32>),
    #[error("the MPI runtime refused to create a Cartesian communicator for topology {0:?}")]
    CartesianCommunicatorUnavailable(Vec<i32>),
}

/// Floating-point element type used throughout a simulator instance.
///
/// Carried alongside the topology rather than baked into `CartesianTopology`
/// as a generic parameter: the grid dimension (2 vs. 3) already forces most
/// call sites to branch, and threading a second generic through every
/// `fsi-*` crate for a property that is only ever read, never dispatched on,
/// would not pay for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Single,
    Double,
}

impl Precision {
    pub fn element_bytes(self) -> usize {
        match self {
            Precision::Single => 4,
            Precision::Double => 8,
        }
    }
}

/// Rank of the neighbor along the previous/next direction of one axis, or
/// `None` at a non-periodic domain boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Neighbor {
    pub prev: Option<i32>,
    pub next: Option<i32>,
}

/// The Cartesian process grid and this rank's place in it.
pub struct CartesianTopology {
    comm: CartesianCommunicator,
    rank: i32,
    size: i32,
    dim: usize,
    global_grid_size: Vec<usize>,
    process_topology: Vec<i32>,
    periodic: Vec<bool>,
    coords: Vec<i32>,
    local_grid_size: Vec<usize>,
    neighbors: Vec<Neighbor>,
    precision: Precision,
}

impl CartesianTopology {
    /// Build the Cartesian communicator and resolve every rank's local
    /// block and neighbor set.
    ///
    /// `rank_distribution` entries of `0` are auto-sized; in 3-D an
    /// all-zero distribution pins the last axis to `1` before balancing the
    /// rest (see `SPEC_FULL.md` §9), since the slab-decomposed Poisson
    /// solver this core is built for needs exactly one uncut axis.
    pub fn new(
        universe: &Universe,
        global_grid_size: &[usize],
        rank_distribution: Option<&[i32]>,
        periodic: &[bool],
        precision: Precision,
    ) -> Result<Self, TopologyError> {
        let dim = global_grid_size.len();
        if dim != 2 && dim != 3 {
            return Err(TopologyError::UnsupportedDimension(dim));
        }
        if periodic.len() != dim {
            return Err(TopologyError::PeriodicLengthMismatch {
                given: periodic.len(),
                expected: dim,
            });
        }
        let world = universe.world();
        let size = world.size();

        let given: Vec<i32> = match rank_distribution {
            Some(rd) if rd.len() == dim => rd.to_vec(),
            Some(rd) => {
                return Err(TopologyError::RankDistributionLengthMismatch {
                    given: rd.len(),
                    expected: dim,
                })
            }
            None => vec![0; dim],
        };

        let dims = resolve_process_dims(dim, &given, size)?;
        if dim == 3 && !dims.iter().any(|&v| v == 1) {
            return Err(TopologyError::NoUnitAxis(dims));
        }

        for axis in 0..dim {
            if global_grid_size[axis] % (dims[axis] as usize) != 0 {
                return Err(TopologyError::IndivisibleGrid {
                    global: global_grid_size.to_vec(),
                    topology: dims.clone(),
                    axis,
                });
            }
        }
        let local_grid_size: Vec<usize> = (0..dim)
            .map(|axis| global_grid_size[axis] / dims[axis] as usize)
            .collect();

        let comm = world
            .create_cartesian_communicator(&dims, periodic, false)
            .ok_or_else(|| TopologyError::CartesianCommunicatorUnavailable(dims.clone()))?;
        let CartesianLayout { coords, .. } = comm.get_layout();
        let rank = world.rank();

        let neighbors = (0..dim)
            .map(|axis| neighbor_along_axis(&coords, &dims, periodic, axis))
            .collect();

        tracing::debug!(
            rank,
            ?dims,
            ?coords,
            ?local_grid_size,
            "cartesian topology constructed"
        );

        Ok(Self {
            comm,
            rank,
            size,
            dim,
            global_grid_size: global_grid_size.to_vec(),
            process_topology: dims,
            periodic: periodic.to_vec(),
            coords,
            local_grid_size,
            neighbors,
            precision,
        })
    }

    pub fn rank(&self) -> i32 {
        self.rank
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    pub fn grid_dim(&self) -> usize {
        self.dim
    }

    pub fn global_grid_size(&self) -> &[usize] {
        &self.global_grid_size
    }

    pub fn local_grid_size(&self) -> &[usize] {
        &self.local_grid_size
    }

    pub fn process_topology(&self) -> &[i32] {
        &self.process_topology
    }

    pub fn coords(&self) -> &[i32] {
        &self.coords
    }

    pub fn periodic(&self) -> &[bool] {
        &self.periodic
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn is_master(&self, master_rank: i32) -> bool {
        self.rank == master_rank
    }

    /// Neighbor ranks along `axis` (0-indexed, `axis < grid_dim()`).
    pub fn neighbor(&self, axis: usize) -> Neighbor {
        self.neighbors[axis]
    }

    pub fn comm(&self) -> &CartesianCommunicator {
        &self.comm
    }

    /// Rank owning Cartesian coordinates `coords`, computed in the same
    /// row-major convention `MPI_Cart_create` uses (last axis fastest).
    /// Used internally for neighbor lookups rather than round-tripping
    /// through the communicator, so every axis query is a pure function of
    /// `(coords, dims)`.
    pub fn rank_from_coords(&self, coords: &[i32]) -> i32 {
        rank_from_coords(coords, &self.process_topology)
    }
}

fn resolve_process_dims(dim: usize, given: &[i32], size: i32) -> Result<Vec<i32>, TopologyError> {
    let mut dims = given.to_vec();
    if dim == 3 && dims.iter().all(|&v| v == 0) {
        dims[dim - 1] = 1;
    }

    let zero_slots: Vec<usize> = dims
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v == 0)
        .map(|(i, _)| i)
        .collect();
    let fixed_product: i32 = dims.iter().filter(|&&v| v != 0).product();

    if zero_slots.is_empty() {
        if fixed_product != size {
            return Err(TopologyError::DistributionMismatch {
                size,
                dims: dims.clone(),
            });
        }
        return Ok(dims);
    }

    if fixed_product == 0 || size % fixed_product != 0 {
        return Err(TopologyError::ZeroAxisCount {
            requested: fixed_product,
            available: size,
        });
    }
    let remaining = size / fixed_product;
    let balanced = factorize_balanced(remaining, zero_slots.len());
    for (slot, &axis) in zero_slots.iter().enumerate() {
        dims[axis] = balanced[slot];
    }
    Ok(dims)
}

fn prime_factors(mut n: i32) -> Vec<i32> {
    let mut factors = Vec::new();
    let mut d = 2;
    while d * d <= n {
        while n % d == 0 {
            factors.push(d);
            n /= d;
        }
        d += 1;
    }
    if n > 1 {
        factors.push(n);
    }
    factors
}

/// Distribute the prime factors of `total` across `slots` bins as evenly as
/// possible by always growing the currently-smallest bin. Produces the same
/// "most square" factorization `MPI_Dims_create` targets.
fn factorize_balanced(total: i32, slots: usize) -> Vec<i32> {
    let mut dims = vec![1i32; slots];
    if slots == 0 {
        return dims;
    }
    let mut factors = prime_factors(total);
    factors.sort_unstable_by(|a, b| b.cmp(a));
    for f in factors {
        let (idx, _) = dims
            .iter()
            .enumerate()
            .min_by_key(|&(_, v)| *v)
            .expect("slots is non-empty");
        dims[idx] *= f;
    }
    dims
}

fn rank_from_coords(coords: &[i32], dims: &[i32]) -> i32 {
    let mut rank = 0;
    for axis in 0..dims.len() {
        rank = rank * dims[axis] + coords[axis];
    }
    rank
}

fn neighbor_along_axis(coords: &[i32], dims: &[i32], periodic: &[bool], axis: usize) -> Neighbor {
    let wrap = periodic[axis];
    let extent = dims[axis];

    let prev = {
        let c = coords[axis] - 1;
        if c >= 0 {
            Some(c)
        } else if wrap {
            Some(extent - 1)
        } else {
            None
        }
    };
    let next = {
        let c = coords[axis] + 1;
        if c < extent {
            Some(c)
        } else if wrap {
            Some(0)
        } else {
            None
        }
    };

    let rank_with = |c: i32| {
        let mut shifted = coords.to_vec();
        shifted[axis] = c;
        rank_from_coords(&shifted, dims)
    };

    Neighbor {
        prev: prev.map(rank_with),
        next: next.map(rank_with),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factorize_balanced_is_square_for_perfect_square() {
        assert_eq!(factorize_balanced(16, 2), vec![4, 4]);
    }

    #[test]
    fn factorize_balanced_handles_primes() {
        let dims = factorize_balanced(6, 2);
        assert_eq!(dims.iter().product::<i32>(), 6);
        assert!(dims.iter().max().unwrap() - dims.iter().min().unwrap() <= 2);
    }

    #[test]
    fn factorize_balanced_single_slot_is_identity() {
        assert_eq!(factorize_balanced(12, 1), vec![12]);
    }

    #[test]
    fn resolve_process_dims_all_auto_3d_pins_last_axis() {
        let dims = resolve_process_dims(3, &[0, 0, 0], 8).unwrap();
        assert_eq!(dims[2], 1);
        assert_eq!(dims.iter().product::<i32>(), 8);
    }

    #[test]
    fn resolve_process_dims_fully_specified_mismatch_is_an_error() {
        let err = resolve_process_dims(2, &[2, 2], 5).unwrap_err();
        assert!(matches!(err, TopologyError::DistributionMismatch { .. }));
    }

    #[test]
    fn resolve_process_dims_partial_auto_fills_remaining() {
        let dims = resolve_process_dims(2, &[2, 0], 8).unwrap();
        assert_eq!(dims, vec![2, 4]);
    }

    #[test]
    fn rank_from_coords_matches_row_major_convention() {
        let dims = [2, 3];
        // rank = coord0 * dims[1] + coord1
        assert_eq!(rank_from_coords(&[0, 0], &dims), 0);
        assert_eq!(rank_from_coords(&[0, 2], &dims), 2);
        assert_eq!(rank_from_coords(&[1, 0], &dims), 3);
        assert_eq!(rank_from_coords(&[1, 2], &dims), 5);
    }

    #[test]
    fn neighbor_along_axis_non_periodic_boundary_has_no_neighbor() {
        let dims = [2, 2];
        let periodic = [false, false];
        let n = neighbor_along_axis(&[0, 0], &dims, &periodic, 0);
        assert_eq!(n.prev, None);
        assert_eq!(n.next, Some(rank_from_coords(&[1, 0], &dims)));
    }

    #[test]
    fn neighbor_along_axis_periodic_wraps() {
        let dims = [2, 2];
        let periodic = [true, true];
        let n = neighbor_along_axis(&[0, 0], &dims, &periodic, 0);
        assert_eq!(n.prev, Some(rank_from_coords(&[1, 0], &dims)));
        assert_eq!(n.next, Some(rank_from_coords(&[1, 0], &dims)));
    }

    #[test]
    fn neighbor_along_axis_single_rank_periodic_self_wraps() {
        let dims = [1, 1];
        let periodic = [true, true];
        let n = neighbor_along_axis(&[0, 0], &dims, &periodic, 0);
        assert_eq!(n.prev, Some(0));
        assert_eq!(n.next, Some(0));
    }
}
