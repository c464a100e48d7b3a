//! Master/worker scatter-gather of whole fields between one rank's global
//! `ndarray` buffer and every rank's ghost-padded [`LocalField`].
//!
//! Only the master rank is expected to hold the global array; every other
//! rank passes `None` and only ever touches its own local slab.

use ndarray::{ArrayD, Axis};
use thiserror::Error;

use fsi_grid::{pack, unpack, GridError, LocalField, SubarrayDescriptor};
use fsi_topology::CartesianTopology;
use mpi::datatype::Equivalence;
use mpi::topology::Communicator;
use mpi::Tag;

#[derive(Debug, Error)]
pub enum FieldIoError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("the master rank ({master_rank}) must be given the global field; got None")]
    MissingGlobalField { master_rank: i32 },
    #[error("global field shape {got:?} does not match the expected global shape {expected:?}")]
    GlobalShapeMismatch {
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    #[error("field spatial rank {got} does not match topology rank {expected}")]
    RankMismatch { got: usize, expected: usize },
}

const SCATTER_TAG: Tag = 9001;
const GATHER_TAG: Tag = 9002;

/// Row-major decode of a rank into Cartesian coordinates, the inverse of
/// `fsi-topology`'s `rank_from_coords`. Needed here because the master
/// rank must address every other rank's slice of the global array without
/// each of them reporting its own coordinates over the wire.
fn coords_from_rank(mut rank: usize, dims: &[usize]) -> Vec<usize> {
    let mut coords = vec![0usize; dims.len()];
    for axis in (0..dims.len()).rev() {
        coords[axis] = rank % dims[axis];
        rank /= dims[axis];
    }
    coords
}

fn global_descriptor(
    global_shape: &[usize],
    local_grid_size: &[usize],
    rank: usize,
    dims: &[usize],
) -> SubarrayDescriptor {
    let coords = coords_from_rank(rank, dims);
    let starts: Vec<usize> = coords
        .iter()
        .zip(local_grid_size.iter())
        .map(|(&c, &l)| c * l)
        .collect();
    SubarrayDescriptor {
        sizes: global_shape.to_vec(),
        subsizes: local_grid_size.to_vec(),
        starts,
    }
}

/// Moves whole fields between the master rank's global array and every
/// rank's local, ghost-padded slab.
pub struct FieldCommunicator<'t> {
    topology: &'t CartesianTopology,
    master_rank: i32,
}

impl<'t> FieldCommunicator<'t> {
    pub fn new(topology: &'t CartesianTopology, master_rank: i32) -> Self {
        Self {
            topology,
            master_rank,
        }
    }

    pub fn is_master(&self) -> bool {
        self.topology.is_master(self.master_rank)
    }

    fn check_global_shape(&self, global: &ArrayD<impl Copy>) -> Result<(), FieldIoError> {
        if global.shape() != self.topology.global_grid_size() {
            return Err(FieldIoError::GlobalShapeMismatch {
                got: global.shape().to_vec(),
                expected: self.topology.global_grid_size().to_vec(),
            });
        }
        Ok(())
    }

    pub fn scatter_scalar_field<T>(
        &self,
        local: &mut LocalField<T>,
        global: Option<&ArrayD<T>>,
    ) -> Result<(), FieldIoError>
    where
        T: Equivalence + Copy + Default,
    {
        if local.is_vector() {
            return Err(FieldIoError::RankMismatch {
                got: local.n_components(),
                expected: 1,
            });
        }
        self.scatter_component(local, global, 0)
    }

    pub fn scatter_vector_field<T>(
        &self,
        local: &mut LocalField<T>,
        global: Option<&ArrayD<T>>,
    ) -> Result<(), FieldIoError>
    where
        T: Equivalence + Copy + Default,
    {
        for component in 0..local.n_components() {
            let slice = match global {
                Some(g) => Some(g.index_axis(Axis(0), component).to_owned()),
                None => None,
            };
            self.scatter_component(local, slice.as_ref(), component)?;
        }
        Ok(())
    }

    fn scatter_component<T>(
        &self,
        local: &mut LocalField<T>,
        global: Option<&ArrayD<T>>,
        component: usize,
    ) -> Result<(), FieldIoError>
    where
        T: Equivalence + Copy + Default,
    {
        if local.spatial_dim() != self.topology.grid_dim() {
            return Err(FieldIoError::RankMismatch {
                got: local.spatial_dim(),
                expected: self.topology.grid_dim(),
            });
        }

        let comm = self.topology.comm();
        let dims = self.topology.process_topology();
        let local_grid_size = self.topology.local_grid_size();

        if self.is_master() {
            let global =
                global.ok_or(FieldIoError::MissingGlobalField {
                    master_rank: self.master_rank,
                })?;
            self.check_global_shape(global)?;
            let global_view = global.view();

            tracing::debug!(
                component,
                n_ranks = self.topology.size(),
                "scattering field component from master"
            );

            for rank in 0..self.topology.size() as usize {
                let desc = global_descriptor(global.shape(), local_grid_size, rank, dims);
                let buf = pack(&global_view, &desc)?;
                if rank as i32 == self.topology.rank() {
                    let mut local_view = local.component_mut(component);
                    unpack(&mut local_view, &local.inner_descriptor(), &buf)?;
                } else {
                    comm.process_at_rank(rank as i32)
                        .send_with_tag(&buf, SCATTER_TAG);
                }
            }
        } else {
            let expected_len: usize = local_grid_size.iter().product();
            let mut buf = vec![T::default(); expected_len];
            comm.process_at_rank(self.master_rank)
                .receive_into_with_tag(&mut buf, SCATTER_TAG);
            let mut local_view = local.component_mut(component);
            unpack(&mut local_view, &local.inner_descriptor(), &buf)?;
        }

        Ok(())
    }

    pub fn gather_scalar_field<T>(
        &self,
        local: &LocalField<T>,
        global: Option<&mut ArrayD<T>>,
    ) -> Result<(), FieldIoError>
    where
        T: Equivalence + Copy + Default,
    {
        if local.is_vector() {
            return Err(FieldIoError::RankMismatch {
                got: local.n_components(),
                expected: 1,
            });
        }
        self.gather_component(local, global, 0)
    }

    pub fn gather_vector_field<T>(
        &self,
        local: &LocalField<T>,
        global: Option<&mut ArrayD<T>>,
    ) -> Result<(), FieldIoError>
    where
        T: Equivalence + Copy + Default,
    {
        match global {
            Some(g) => {
                for component in 0..local.n_components() {
                    let mut slice = g.index_axis(Axis(0), component).to_owned();
                    self.gather_component(local, Some(&mut slice), component)?;
                    g.index_axis_mut(Axis(0), component).assign(&slice);
                }
                Ok(())
            }
            None => {
                for component in 0..local.n_components() {
                    self.gather_component(local, None, component)?;
                }
                Ok(())
            }
        }
    }

    fn gather_component<T>(
        &self,
        local: &LocalField<T>,
        global: Option<&mut ArrayD<T>>,
        component: usize,
    ) -> Result<(), FieldIoError>
    where
        T: Equivalence + Copy + Default,
    {
        if local.spatial_dim() != self.topology.grid_dim() {
            return Err(FieldIoError::RankMismatch {
                got: local.spatial_dim(),
                expected: self.topology.grid_dim(),
            });
        }

        let comm = self.topology.comm();
        let dims = self.topology.process_topology();
        let local_grid_size = self.topology.local_grid_size();

        let local_view = local.component(component);
        let local_buf = pack(&local_view, &local.inner_descriptor())?;

        if self.is_master() {
            let global = global.ok_or(FieldIoError::MissingGlobalField {
                master_rank: self.master_rank,
            })?;
            self.check_global_shape(global)?;
            let global_shape = global.shape().to_vec();
            let mut global_view = global.view_mut();

            tracing::debug!(
                component,
                n_ranks = self.topology.size(),
                "gathering field component onto master"
            );

            for rank in 0..self.topology.size() as usize {
                let desc = global_descriptor(&global_shape, local_grid_size, rank, dims);
                if rank as i32 == self.topology.rank() {
                    unpack(&mut global_view, &desc, &local_buf)?;
                } else {
                    let expected_len: usize = local_grid_size.iter().product();
                    let mut buf = vec![T::default(); expected_len];
                    comm.process_at_rank(rank as i32)
                        .receive_into_with_tag(&mut buf, GATHER_TAG);
                    unpack(&mut global_view, &desc, &buf)?;
                }
            }
        } else {
            comm.process_at_rank(self.master_rank)
                .send_with_tag(&local_buf, GATHER_TAG);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coords_from_rank_matches_row_major_convention() {
        let dims = [2usize, 3, 4];
        // rank = c0*3*4 + c1*4 + c2
        assert_eq!(coords_from_rank(0, &dims), vec![0, 0, 0]);
        assert_eq!(coords_from_rank(1, &dims), vec![0, 0, 1]);
        assert_eq!(coords_from_rank(4, &dims), vec![0, 1, 0]);
        assert_eq!(coords_from_rank(12, &dims), vec![1, 0, 0]);
        assert_eq!(coords_from_rank(23, &dims), vec![1, 2, 3]);
    }

    #[test]
    fn global_descriptor_offsets_tile_the_global_array() {
        let dims = [2usize, 2];
        let local = [4usize, 4];
        let d00 = global_descriptor(&[8, 8], &local, 0, &dims);
        assert_eq!(d00.starts, vec![0, 0]);
        let d01 = global_descriptor(&[8, 8], &local, 1, &dims);
        assert_eq!(d01.starts, vec![0, 4]);
        let d10 = global_descriptor(&[8, 8], &local, 2, &dims);
        assert_eq!(d10.starts, vec![4, 0]);
        let d11 = global_descriptor(&[8, 8], &local, 3, &dims);
        assert_eq!(d11.starts, vec![4, 4]);
    }
}
