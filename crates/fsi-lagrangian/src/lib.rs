//! Ownership tracking and value consolidation for Lagrangian markers spread
//! across the Eulerian domain decomposition.
//!
//! Marker positions are small relative to the grid, so the whole set is kept
//! replicated on every rank (see [`LagrangianFieldCommunicator::broadcast_positions`])
//! rather than partitioned. What differs per rank is *ownership*: each rank
//! recomputes, every step, which markers currently sit inside its own
//! subdomain (markers move; ownership is never assumed stable across
//! steps). Per-marker quantities a rank computes for the markers it owns are
//! then folded back into a full, replicated array with
//! [`LagrangianFieldCommunicator::assemble_marker_scalar`] /
//! [`assemble_marker_vector`](LagrangianFieldCommunicator::assemble_marker_vector),
//! using a sum-reduction across ranks — since ownership is a strict
//! partition, a rank that doesn't own a marker contributes zero for it, so
//! the sum and an "assign from the owner" reduction agree.

use ndarray::Array2;
use thiserror::Error;

use fsi_topology::CartesianTopology;
use mpi::collective::SystemOperation;
use mpi::datatype::Equivalence;
use mpi::topology::Communicator;

#[derive(Debug, Error)]
pub enum LagrangianError {
    #[error("marker position array has {got} columns, expected {expected} (the topology's spatial rank)")]
    DimensionMismatch { got: usize, expected: usize },
    #[error("bounds array has length {got}, expected {expected}")]
    BoundsLengthMismatch { got: usize, expected: usize },
    #[error("owned-values length {got} does not match the number of markers this rank owns ({expected})")]
    OwnedValuesLengthMismatch { got: usize, expected: usize },
    #[error("broadcast buffer could not be reshaped back into a ({n_markers}, {dim}) array")]
    ReshapeFailed { n_markers: usize, dim: usize },
}

/// Tracks, for the current step, which rows of a marker array belong to
/// this rank's subdomain.
pub struct LagrangianFieldCommunicator<'t> {
    topology: &'t CartesianTopology,
    local_indices: Vec<usize>,
}

impl<'t> LagrangianFieldCommunicator<'t> {
    pub fn new(topology: &'t CartesianTopology) -> Self {
        Self {
            topology,
            local_indices: Vec::new(),
        }
    }

    pub fn local_indices(&self) -> &[usize] {
        &self.local_indices
    }

    pub fn owned_count(&self) -> usize {
        self.local_indices.len()
    }

    /// Replaces `positions` (identical on every rank on entry, by
    /// convention) with the copy broadcast from `root_rank`.
    pub fn broadcast_positions(
        &self,
        positions: &mut Array2<f64>,
        root_rank: i32,
    ) -> Result<(), LagrangianError> {
        let (n_markers, dim) = positions.dim();
        let mut flat: Vec<f64> = positions.iter().copied().collect();
        self.topology
            .comm()
            .process_at_rank(root_rank)
            .broadcast_into(&mut flat);
        *positions = Array2::from_shape_vec((n_markers, dim), flat)
            .map_err(|_| LagrangianError::ReshapeFailed { n_markers, dim })?;
        Ok(())
    }

    /// Recomputes ownership: a marker belongs to this rank iff its position
    /// falls in `[subdomain_lower, subdomain_upper)` on every axis.
    pub fn rank_and_map(
        &mut self,
        positions: &Array2<f64>,
        subdomain_lower: &[f64],
        subdomain_upper: &[f64],
    ) -> Result<(), LagrangianError> {
        let dim = self.topology.grid_dim();
        if positions.ncols() != dim {
            return Err(LagrangianError::DimensionMismatch {
                got: positions.ncols(),
                expected: dim,
            });
        }
        if subdomain_lower.len() != dim {
            return Err(LagrangianError::BoundsLengthMismatch {
                got: subdomain_lower.len(),
                expected: dim,
            });
        }
        if subdomain_upper.len() != dim {
            return Err(LagrangianError::BoundsLengthMismatch {
                got: subdomain_upper.len(),
                expected: dim,
            });
        }

        self.local_indices.clear();
        for (row_index, row) in positions.outer_iter().enumerate() {
            let owned = row
                .iter()
                .enumerate()
                .all(|(axis, &x)| x >= subdomain_lower[axis] && x < subdomain_upper[axis]);
            if owned {
                self.local_indices.push(row_index);
            }
        }
        tracing::debug!(
            rank = self.topology.rank(),
            owned = self.local_indices.len(),
            total = positions.nrows(),
            "lagrangian marker ownership recomputed"
        );
        Ok(())
    }

    /// Folds `owned_values` (one entry per index in [`Self::local_indices`],
    /// same order) back into a full, replicated array of length `n_markers`.
    pub fn assemble_marker_scalar<T>(
        &self,
        owned_values: &[T],
        n_markers: usize,
    ) -> Result<Vec<T>, LagrangianError>
    where
        T: Equivalence + Copy + Default + std::ops::AddAssign,
    {
        if owned_values.len() != self.local_indices.len() {
            return Err(LagrangianError::OwnedValuesLengthMismatch {
                got: owned_values.len(),
                expected: self.local_indices.len(),
            });
        }
        let mut local_full = vec![T::default(); n_markers];
        for (&idx, &value) in self.local_indices.iter().zip(owned_values.iter()) {
            local_full[idx] += value;
        }
        let mut global = vec![T::default(); n_markers];
        self.topology
            .comm()
            .all_reduce_into(&local_full, &mut global, SystemOperation::sum());
        Ok(global)
    }

    /// Vector-valued counterpart of [`Self::assemble_marker_scalar`];
    /// `owned_values` has one row per owned marker, `dim` columns.
    pub fn assemble_marker_vector(
        &self,
        owned_values: &Array2<f64>,
        n_markers: usize,
        dim: usize,
    ) -> Result<Array2<f64>, LagrangianError> {
        if owned_values.nrows() != self.local_indices.len() {
            return Err(LagrangianError::OwnedValuesLengthMismatch {
                got: owned_values.nrows(),
                expected: self.local_indices.len(),
            });
        }
        let mut local_full = vec![0.0f64; n_markers * dim];
        for (row, &idx) in self.local_indices.iter().enumerate() {
            for c in 0..dim {
                local_full[idx * dim + c] += owned_values[[row, c]];
            }
        }
        let mut global = vec![0.0f64; n_markers * dim];
        self.topology
            .comm()
            .all_reduce_into(&local_full, &mut global, SystemOperation::sum());
        Array2::from_shape_vec((n_markers, dim), global)
            .map_err(|_| LagrangianError::ReshapeFailed { n_markers, dim })
    }
}
