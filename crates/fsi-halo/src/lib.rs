//! Ghost-cell exchange between neighboring ranks of a [`CartesianTopology`].
//!
//! [`GhostCommunicator`] enumerates the face pairs of the decomposition (and,
//! for 3D topologies under `full_exchange`, the edge and corner pairs too)
//! and moves the matching slabs of a [`LocalField`] across rank boundaries.

use std::ops::AddAssign;

use fsi_grid::{add_unpack, pack, unpack, GridError, LocalField, Side, SubarrayDescriptor};
use fsi_topology::CartesianTopology;
use mpi::datatype::Equivalence;
use mpi::request::scope;
use mpi::topology::Communicator;
use mpi::Tag;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HaloError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(
        "halo exchange already has an outstanding cycle; call exchange_finalise() before \
         starting a new one"
    )]
    AlreadyInFlight,
    #[error("exchange_finalise() called without a matching exchange_*_init() call")]
    NoCycleInFlight,
    #[error("field spatial rank {got} does not match the topology's rank {expected}")]
    RankMismatch { got: usize, expected: usize },
    #[error("exchange_scalar_field_init called on a field with {components} components")]
    ExpectedScalarField { components: usize },
    #[error("exchange_vector_field_init called on a single-component field")]
    ExpectedVectorField,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeStrategy {
    Overwrite,
    Sum,
}

/// One flow of the exchange: the combination of (axis, side) pairs this
/// rank's outgoing slab sits on. A face flow names one axis; a 3D edge flow
/// names two; a 3D corner flow names three.
#[derive(Debug, Clone)]
struct Direction {
    sides: Vec<(usize, Side)>,
}

fn shifted_rank(topology: &CartesianTopology, sides: &[(usize, Side)]) -> Option<i32> {
    let dims = topology.process_topology();
    let periodic = topology.periodic();
    let mut coords = topology.coords().to_vec();
    for &(axis, side) in sides {
        let delta: i64 = match side {
            Side::Low => -1,
            Side::High => 1,
        };
        let dim = dims[axis] as i64;
        let mut c = coords[axis] as i64 + delta;
        if c < 0 || c >= dim {
            if periodic[axis] {
                c = c.rem_euclid(dim);
            } else {
                return None;
            }
        }
        coords[axis] = c as usize;
    }
    Some(topology.rank_from_coords(&coords))
}

fn all_sign_combinations(axes: &[usize]) -> Vec<Vec<(usize, Side)>> {
    let mut combos: Vec<Vec<(usize, Side)>> = vec![Vec::new()];
    for &axis in axes {
        let mut next = Vec::with_capacity(combos.len() * 2);
        for combo in &combos {
            let mut lo = combo.clone();
            lo.push((axis, Side::Low));
            next.push(lo);
            let mut hi = combo.clone();
            hi.push((axis, Side::High));
            next.push(hi);
        }
        combos = next;
    }
    combos
}

/// Exchanges ghost data for one [`LocalField`] shape across the neighbors of
/// a [`CartesianTopology`].
///
/// `init()` performs the full pack → post → wait → unpack cycle inside a
/// single `mpi::request::scope`, since `mpi-fork-fnsp`'s non-blocking
/// `Request` cannot outlive the closure that created it. `finalise()` is
/// therefore a balance check (you called an `init` you haven't matched with
/// a `finalise` yet) rather than a literal blocking wait — see
/// `SPEC_FULL.md` §9 for the full rationale.
pub struct GhostCommunicator<'t> {
    topology: &'t CartesianTopology,
    directions: Vec<Direction>,
    thickness: usize,
    in_flight: bool,
    exchanges_completed: u64,
}

impl<'t> GhostCommunicator<'t> {
    pub fn new(topology: &'t CartesianTopology, ghost_width: usize, full_exchange: bool) -> Self {
        let dim = topology.grid_dim();
        let mut directions: Vec<Direction> = (0..dim)
            .flat_map(|axis| all_sign_combinations(&[axis]))
            .map(|sides| Direction { sides })
            .collect();

        if full_exchange && dim == 3 {
            for &(a, b) in &[(0usize, 1usize), (0, 2), (1, 2)] {
                directions.extend(
                    all_sign_combinations(&[a, b])
                        .into_iter()
                        .map(|sides| Direction { sides }),
                );
            }
            directions.extend(
                all_sign_combinations(&[0, 1, 2])
                    .into_iter()
                    .map(|sides| Direction { sides }),
            );
        }

        Self {
            topology,
            directions,
            thickness: ghost_width,
            in_flight: false,
            exchanges_completed: 0,
        }
    }

    pub fn face_pair_count(&self) -> usize {
        2 * self.topology.grid_dim()
    }

    pub fn ghost_width(&self) -> usize {
        self.thickness
    }

    pub fn direction_count(&self) -> usize {
        self.directions.len()
    }

    pub fn exchanges_completed(&self) -> u64 {
        self.exchanges_completed
    }

    pub fn exchange_scalar_field_init<T>(
        &mut self,
        field: &mut LocalField<T>,
    ) -> Result<(), HaloError>
    where
        T: Equivalence + Copy + Default,
    {
        if field.is_vector() {
            return Err(HaloError::ExpectedScalarField {
                components: field.n_components(),
            });
        }
        self.start_cycle(field, MergeStrategy::Overwrite)
    }

    pub fn exchange_vector_field_init<T>(
        &mut self,
        field: &mut LocalField<T>,
    ) -> Result<(), HaloError>
    where
        T: Equivalence + Copy + Default,
    {
        if !field.is_vector() {
            return Err(HaloError::ExpectedVectorField);
        }
        self.start_cycle(field, MergeStrategy::Overwrite)
    }

    /// Same as [`GhostCommunicator::exchange_scalar_field_init`] but
    /// accumulates the incoming halo into owned cells instead of
    /// overwriting them. Used by `VirtualBoundaryForcing` when spreading
    /// marker forces back onto the grid splits a deposit across rank
    /// boundaries.
    pub fn exchange_scalar_field_sum_init<T>(
        &mut self,
        field: &mut LocalField<T>,
    ) -> Result<(), HaloError>
    where
        T: Equivalence + Copy + Default + AddAssign,
    {
        if field.is_vector() {
            return Err(HaloError::ExpectedScalarField {
                components: field.n_components(),
            });
        }
        self.start_cycle(field, MergeStrategy::Sum)
    }

    pub fn exchange_vector_field_sum_init<T>(
        &mut self,
        field: &mut LocalField<T>,
    ) -> Result<(), HaloError>
    where
        T: Equivalence + Copy + Default + AddAssign,
    {
        if !field.is_vector() {
            return Err(HaloError::ExpectedVectorField);
        }
        self.start_cycle(field, MergeStrategy::Sum)
    }

    pub fn exchange_finalise(&mut self) -> Result<(), HaloError> {
        if !self.in_flight {
            return Err(HaloError::NoCycleInFlight);
        }
        self.in_flight = false;
        self.exchanges_completed += 1;
        Ok(())
    }

    fn start_cycle<T>(
        &mut self,
        field: &mut LocalField<T>,
        merge: MergeStrategy,
    ) -> Result<(), HaloError>
    where
        T: Equivalence + Copy + Default,
    {
        if self.in_flight {
            return Err(HaloError::AlreadyInFlight);
        }
        if field.spatial_dim() != self.topology.grid_dim() {
            return Err(HaloError::RankMismatch {
                got: field.spatial_dim(),
                expected: self.topology.grid_dim(),
            });
        }
        for component in 0..field.n_components() {
            self.run_cycle(field, component, merge)?;
        }
        self.in_flight = true;
        tracing::debug!(
            rank = self.topology.rank(),
            directions = self.directions.len(),
            "halo exchange cycle completed"
        );
        Ok(())
    }

    fn run_cycle<T>(
        &self,
        field: &mut LocalField<T>,
        component: usize,
        merge: MergeStrategy,
    ) -> Result<(), HaloError>
    where
        T: Equivalence + Copy + Default,
    {
        struct Plan {
            send_desc: Option<SubarrayDescriptor>,
            recv_desc: Option<SubarrayDescriptor>,
            dest: Option<i32>,
            src: Option<i32>,
            tag: Tag,
        }

        let mut plans = Vec::with_capacity(self.directions.len());
        for (i, dir) in self.directions.iter().enumerate() {
            let recv_sides: Vec<(usize, Side)> = dir
                .sides
                .iter()
                .map(|&(axis, side)| (axis, side.opposite()))
                .collect();
            let dest = shifted_rank(self.topology, &dir.sides);
            let src = shifted_rank(self.topology, &recv_sides);
            let send_desc = dest.map(|_| field.multi_edge_slab(&dir.sides, self.thickness, true));
            let recv_desc =
                src.map(|_| field.multi_edge_slab(&recv_sides, self.thickness, false));
            plans.push(Plan {
                send_desc,
                recv_desc,
                dest,
                src,
                tag: i as Tag,
            });
        }

        let mut send_bufs: Vec<Option<Vec<T>>> = Vec::with_capacity(plans.len());
        {
            let view = field.component(component);
            for plan in &plans {
                let buf = match &plan.send_desc {
                    Some(desc) => Some(pack(&view, desc)?),
                    None => None,
                };
                send_bufs.push(buf);
            }
        }
        let mut recv_bufs: Vec<Option<Vec<T>>> = plans
            .iter()
            .map(|plan| plan.recv_desc.as_ref().map(|d| vec![T::default(); d.len()]))
            .collect();

        let comm = self.topology.comm();
        scope(|s| {
            let mut send_reqs = Vec::new();
            let mut recv_reqs = Vec::new();
            for (i, plan) in plans.iter().enumerate() {
                if let (Some(src), Some(buf)) = (plan.src, recv_bufs[i].as_mut()) {
                    let req = comm
                        .process_at_rank(src)
                        .immediate_receive_into_with_tag(s, buf.as_mut_slice(), plan.tag);
                    recv_reqs.push(req);
                }
            }
            for (i, plan) in plans.iter().enumerate() {
                if let (Some(dest), Some(buf)) = (plan.dest, send_bufs[i].as_ref()) {
                    let req = comm
                        .process_at_rank(dest)
                        .immediate_send_with_tag(s, buf.as_slice(), plan.tag);
                    send_reqs.push(req);
                }
            }
            for req in recv_reqs {
                req.wait();
            }
            for req in send_reqs {
                req.wait();
            }
        });

        let mut view = field.component_mut(component);
        for (i, plan) in plans.iter().enumerate() {
            if let (Some(desc), Some(buf)) = (&plan.recv_desc, recv_bufs[i].as_ref()) {
                match merge {
                    MergeStrategy::Overwrite => unpack(&mut view, desc, buf)?,
                    MergeStrategy::Sum => add_unpack(&mut view, desc, buf)?,
                }
            }
        }

        Ok(())
    }
}
