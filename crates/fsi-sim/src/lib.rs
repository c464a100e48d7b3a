//! Thin per-step orchestrator composing the topology, halo exchange,
//! field scatter/gather, a single injected [`StencilKernel`], and zero or
//! more immersed bodies into the data flow described in `SPEC_FULL.md` §2:
//!
//! ```text
//! body state -> forcing-grid positions/velocities on master
//!            -> LagrangianFieldCommunicator scatters marker state
//!            -> Eulerian velocity interpolated to markers (with halo)
//!            -> virtual-boundary penalty produces marker forces
//!            -> markers spread forces onto the Eulerian field
//!            -> stencil kernel advances the field (using GhostCommunicator)
//!            -> marker forces gathered back to master
//!            -> converted into body forces/torques
//! ```
//!
//! `FlowSimulator` does not itself implement a production Poisson solver or
//! advection scheme; those remain external `StencilKernel` collaborators
//! (§6). It only has to drive *some* configured stencil each step, which is
//! enough to exercise the full loop end to end in tests against the
//! reference kernels of `fsi-kernels`.

use mpi::collective::SystemOperation;
use mpi::topology::Communicator;
use thiserror::Error;

use fsi_body::{BodyError, CoupledBody, RigidBodyState};
use fsi_events::{report_domain_warning, Event, EventSender, STEPS_COMPLETED};
use fsi_field_io::{FieldCommunicator, FieldIoError};
use fsi_grid::{GridError, LocalField};
use fsi_halo::{GhostCommunicator, HaloError};
use fsi_stencil::{MpiStencilWrapper, StencilError, StencilKernel};
use fsi_topology::CartesianTopology;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Halo(#[from] HaloError),
    #[error(transparent)]
    Stencil(#[from] StencilError),
    #[error(transparent)]
    FieldIo(#[from] FieldIoError),
    #[error(transparent)]
    Body(#[from] BodyError),
    #[error("grid_spacing/x_range_lower length {got} does not match topology rank {expected}")]
    AxisLengthMismatch { got: usize, expected: usize },
}

/// One immersed body coupled into the simulation: the object-safe stepping
/// facade plus the read-only kinematic state driving it this step. The
/// `RigidBodyState` is boxed separately from the `CoupledBody` so a caller
/// (e.g. a rigid-body integrator living outside this crate) can update it
/// in place between steps without touching the coupling machinery.
pub struct BodyEntry<'t> {
    pub coupling: Box<dyn CoupledBody + 't>,
    pub state: Box<dyn RigidBodyState>,
}

/// Per-step diagnostics reduced across every rank, mirroring
/// `fsi-events::Event::StepDiagnostics`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub step: u64,
    pub max_abs_output: f64,
    pub l2_grid_deviation: f64,
}

/// Composes a [`CartesianTopology`], [`GhostCommunicator`], one injected
/// [`StencilKernel`], and zero or more coupled immersed bodies into a
/// runnable per-step loop.
///
/// `feedback`: when `true`, the kernel's output is fed back into its input
/// field each step via explicit Euler (`field += dt * kernel(field)`) — the
/// right choice for a diffusion-like operator sharing input/output shape.
/// When `false` the kernel output is treated as a pure diagnostic (e.g. the
/// 2D curl fixture, whose vector input and scalar output can't share a
/// buffer) and the input field is left untouched.
pub struct FlowSimulator<'t, K> {
    topology: &'t CartesianTopology,
    halo: GhostCommunicator<'t>,
    field_io: FieldCommunicator<'t>,
    kernel: K,
    ghost_width: usize,
    dt: f64,
    feedback: bool,
    grid_spacing: Vec<f64>,
    local_origin: Vec<f64>,
    subdomain_lower: Vec<f64>,
    subdomain_upper: Vec<f64>,
    global_lower: Vec<f64>,
    global_upper: Vec<f64>,
    field: LocalField<f64>,
    field_rhs: LocalField<f64>,
    bodies: Vec<BodyEntry<'t>>,
    events: EventSender,
    master_rank: i32,
    step_count: u64,
}

impl<'t, K> FlowSimulator<'t, K>
where
    K: StencilKernel<f64> + Clone,
{
    /// `x_range_lower` is the global domain's lower corner (one entry per
    /// spatial axis), used together with `grid_spacing` and this rank's
    /// Cartesian coordinates to compute its subdomain bounds and local
    /// field origin (§4.5).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        topology: &'t CartesianTopology,
        master_rank: i32,
        kernel: K,
        ghost_width: usize,
        full_exchange: bool,
        dt: f64,
        feedback: bool,
        field_in_components: usize,
        field_out_components: usize,
        grid_spacing: Vec<f64>,
        x_range_lower: Vec<f64>,
        events: EventSender,
    ) -> Result<Self, SimError> {
        let dim = topology.grid_dim();
        if grid_spacing.len() != dim {
            return Err(SimError::AxisLengthMismatch {
                got: grid_spacing.len(),
                expected: dim,
            });
        }
        if x_range_lower.len() != dim {
            return Err(SimError::AxisLengthMismatch {
                got: x_range_lower.len(),
                expected: dim,
            });
        }

        let local_grid_size = topology.local_grid_size();
        let coords = topology.coords();
        let local_origin: Vec<f64> = (0..dim)
            .map(|axis| {
                x_range_lower[axis]
                    + coords[axis] as f64 * local_grid_size[axis] as f64 * grid_spacing[axis]
            })
            .collect();
        let subdomain_lower = local_origin.clone();
        // Half-open on every face except the trailing, non-periodic global
        // boundary: a marker sitting exactly on that face has no
        // higher-indexed neighbor to hand it to, so the rank owning the last
        // coordinate along such an axis claims it inclusively (SPEC_FULL.md
        // §3, §4.5).
        let dims = topology.process_topology();
        let periodic = topology.periodic();
        let subdomain_upper: Vec<f64> = (0..dim)
            .map(|axis| {
                let is_last = coords[axis] == dims[axis] - 1;
                if is_last && !periodic[axis] {
                    f64::INFINITY
                } else {
                    local_origin[axis] + local_grid_size[axis] as f64 * grid_spacing[axis]
                }
            })
            .collect();
        let global_grid_size = topology.global_grid_size();
        let global_lower = x_range_lower.clone();
        let global_upper: Vec<f64> = (0..dim)
            .map(|axis| x_range_lower[axis] + global_grid_size[axis] as f64 * grid_spacing[axis])
            .collect();

        let field = if field_in_components == 1 {
            LocalField::zeros_scalar(local_grid_size, ghost_width)?
        } else {
            LocalField::zeros_vector(local_grid_size, ghost_width, field_in_components)?
        };
        let field_rhs = if field_out_components == 1 {
            LocalField::zeros_scalar(local_grid_size, ghost_width)?
        } else {
            LocalField::zeros_vector(local_grid_size, ghost_width, field_out_components)?
        };

        let halo = GhostCommunicator::new(topology, ghost_width, full_exchange);
        let field_io = FieldCommunicator::new(topology, master_rank);

        Ok(Self {
            topology,
            halo,
            field_io,
            kernel,
            ghost_width,
            dt,
            feedback,
            grid_spacing,
            local_origin,
            subdomain_lower,
            subdomain_upper,
            global_lower,
            global_upper,
            field,
            field_rhs,
            bodies: Vec::new(),
            events,
            master_rank,
            step_count: 0,
        })
    }

    pub fn add_body(&mut self, entry: BodyEntry<'t>) {
        self.bodies.push(entry);
    }

    pub fn field(&self) -> &LocalField<f64> {
        &self.field
    }

    pub fn field_mut(&mut self) -> &mut LocalField<f64> {
        &mut self.field
    }

    pub fn field_io(&self) -> &FieldCommunicator<'t> {
        &self.field_io
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Runs one coupling + stencil step and returns the reduced diagnostics
    /// for this step.
    pub fn step(&mut self) -> Result<StepReport, SimError> {
        let is_master = self.topology.is_master(self.master_rank);
        let mut l2_sq_local = 0.0f64;

        for (body_index, entry) in self.bodies.iter_mut().enumerate() {
            let (force, _torque) = entry.coupling.step(
                &mut self.field,
                &self.subdomain_lower,
                &self.subdomain_upper,
                &self.grid_spacing,
                &self.local_origin,
                entry.state.as_ref(),
            )?;
            l2_sq_local += force.iter().map(|v| v * v).sum::<f64>();

            let com = entry.state.center_of_mass();
            let out_of_domain = com.iter().enumerate().any(|(axis, &x)| {
                x < self.global_lower[axis] || x > self.global_upper[axis]
            });
            if out_of_domain {
                report_domain_warning(&self.events, is_master, self.step_count, body_index, &com);
            }
        }

        {
            let mut wrapper =
                MpiStencilWrapper::new(&mut self.halo, self.kernel.clone(), self.ghost_width)?;
            wrapper.apply(&mut self.field, &mut self.field_rhs)?;
        }

        if self.feedback && self.field.n_components() == self.field_rhs.n_components() {
            let dt = self.dt;
            for c in 0..self.field.n_components() {
                let rhs = self.field_rhs.component(c).to_owned();
                let mut dst = self.field.component_mut(c);
                dst.zip_mut_with(&rhs, |d, &r| *d += dt * r);
            }
        }

        let local_max = self
            .field_rhs
            .raw()
            .iter()
            .fold(0.0f64, |acc, &v| acc.max(v.abs()));
        let mut global_max = vec![0.0f64];
        self.topology.comm().all_reduce_into(
            &[local_max],
            &mut global_max,
            SystemOperation::max(),
        );

        let mut global_l2_sq = vec![0.0f64];
        self.topology.comm().all_reduce_into(
            &[l2_sq_local],
            &mut global_l2_sq,
            SystemOperation::sum(),
        );
        let n_markers_total: usize = self.bodies.iter().map(|b| b.coupling.owned_marker_count()).sum();
        let mut global_n_markers = vec![0i64];
        self.topology.comm().all_reduce_into(
            &[n_markers_total as i64],
            &mut global_n_markers,
            SystemOperation::sum(),
        );
        let l2_grid_deviation = if global_n_markers[0] > 0 {
            (global_l2_sq[0] / global_n_markers[0] as f64).sqrt()
        } else {
            0.0
        };

        let report = StepReport {
            step: self.step_count,
            max_abs_output: global_max[0],
            l2_grid_deviation,
        };
        self.events.send(Event::StepDiagnostics {
            step: report.step,
            max_vorticity: report.max_abs_output,
            l2_grid_deviation: report.l2_grid_deviation,
        });
        STEPS_COMPLETED.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.step_count += 1;

        tracing::debug!(
            rank = self.topology.rank(),
            step = report.step,
            max_abs_output = report.max_abs_output,
            l2_grid_deviation = report.l2_grid_deviation,
            "flow simulator step completed"
        );

        Ok(report)
    }
}
