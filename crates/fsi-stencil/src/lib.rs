//! Adapts a rank-local finite-difference kernel to the distributed grid: the
//! wrapper refreshes ghost cells, then hands the kernel explicitly-bounded
//! sub-regions to recompute — first the strict interior, then the boundary
//! strips next to the (now filled) halo.

use fsi_grid::{GridError, LocalField};
use fsi_halo::{GhostCommunicator, HaloError};
use mpi::datatype::Equivalence;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StencilError {
    #[error(transparent)]
    Halo(#[from] HaloError),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(
        "kernel needs a halo of at least {required} cells but the communicator only maintains \
         {available}"
    )]
    InsufficientHaloCapacity { required: usize, available: usize },
}

/// An axis-aligned sub-block of a field's inner region, in inner-region
/// coordinates (`0..inner_shape[axis]` per axis). A kernel asked to
/// `apply_region` over a `Region` writes exactly that sub-block of
/// `output`, reading `input` at most `kernel_support()` cells beyond the
/// region's bounds on every side — always safe, since every region this
/// crate hands a kernel keeps that margin inside the padded array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub starts: Vec<usize>,
    pub stops: Vec<usize>,
}

impl Region {
    pub fn spatial_dim(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts
            .iter()
            .zip(self.stops.iter())
            .any(|(&s, &e)| e <= s)
    }
}

/// A rank-local finite-difference (or similar) operator. Implementations
/// read only from `input`'s interior plus up to `kernel_support()` layers
/// of its halo, and write only to the sub-block of `output` named by
/// `region`.
pub trait StencilKernel<T> {
    /// Number of halo layers this kernel reads from, on every side of every
    /// axis, to produce one interior output cell.
    fn kernel_support(&self) -> usize;

    fn apply_region(
        &self,
        input: &LocalField<T>,
        output: &mut LocalField<T>,
        region: &Region,
    ) -> Result<(), StencilError>;
}

/// Ties a [`StencilKernel`] to a [`GhostCommunicator`]: every call to
/// [`MpiStencilWrapper::apply`] refreshes the input field's halo, computes
/// the strict interior (the sub-region that never needed fresh halo data),
/// then patches the boundary strips that do.
///
/// The `kernel_support` value is attached once, at construction, and never
/// mutated afterward — a small value type pairing the kernel with its
/// support, per the module-level-attribute design note this crate follows.
pub struct MpiStencilWrapper<'c, 't, K> {
    halo: &'c mut GhostCommunicator<'t>,
    kernel: K,
}

impl<'c, 't, K> MpiStencilWrapper<'c, 't, K> {
    /// `ghost_width` is the halo depth the `halo` communicator was built
    /// with; constructing the wrapper fails immediately if the kernel needs
    /// more halo than that.
    pub fn new<T>(
        halo: &'c mut GhostCommunicator<'t>,
        kernel: K,
        ghost_width: usize,
    ) -> Result<Self, StencilError>
    where
        K: StencilKernel<T>,
    {
        let required = kernel.kernel_support();
        if required > ghost_width {
            return Err(StencilError::InsufficientHaloCapacity {
                required,
                available: ghost_width,
            });
        }
        Ok(Self { halo, kernel })
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn apply<T>(
        &mut self,
        input: &mut LocalField<T>,
        output: &mut LocalField<T>,
    ) -> Result<(), StencilError>
    where
        T: Equivalence + Copy + Default,
        K: StencilKernel<T>,
    {
        let init_result = if input.is_vector() {
            self.halo.exchange_vector_field_init(input)
        } else {
            self.halo.exchange_scalar_field_init(input)
        };
        // The wrapper must finalise every exchange it started even if the
        // kernel itself later fails, so peers never block on a
        // `exchange_finalise` this rank never issues.
        let finalise_result = self.halo.exchange_finalise();
        init_result?;
        finalise_result?;

        let h = self.halo.ghost_width();
        let s = self.kernel.kernel_support();
        let inner_shape = input.inner_shape().to_vec();

        tracing::trace!(?inner_shape, ghost_width = h, kernel_support = s, "applying stencil");

        if let Some(interior) = interior_region(&inner_shape, h) {
            self.kernel.apply_region(input, output, &interior)?;
        }
        for strip in boundary_regions(&inner_shape, h, s) {
            if !strip.is_empty() {
                self.kernel.apply_region(input, output, &strip)?;
            }
        }
        Ok(())
    }
}

/// The sub-region of the inner array inset by `h` on every side — the part
/// of the output that can be computed without touching the halo at all.
fn interior_region(inner_shape: &[usize], h: usize) -> Option<Region> {
    let starts: Vec<usize> = inner_shape.iter().map(|_| h).collect();
    let stops: Vec<usize> = inner_shape.iter().map(|&l| l.saturating_sub(h)).collect();
    let region = Region { starts, stops };
    if region.is_empty() {
        None
    } else {
        Some(region)
    }
}

/// The `2 * dim` boundary strips, one per axis per side, each `3s` cells
/// wide starting at inner index `h - s` (mirrored on the high side). See
/// `SPEC_FULL.md` §9: this generalizes correctly for `kernel_support == 1`
/// and is documented as needing re-verification for wider-support kernels.
fn boundary_regions(inner_shape: &[usize], h: usize, s: usize) -> Vec<Region> {
    let dim = inner_shape.len();
    let margin = h.saturating_sub(s);
    let width = 3 * s;
    let mut regions = Vec::with_capacity(2 * dim);

    for axis in 0..dim {
        let l = inner_shape[axis];

        let lo_start = margin;
        let lo_stop = (lo_start + width).min(l);
        let mut starts = vec![0usize; dim];
        let mut stops = inner_shape.to_vec();
        starts[axis] = lo_start;
        stops[axis] = lo_stop;
        regions.push(Region { starts, stops });

        let hi_stop = l.saturating_sub(margin);
        let hi_start = hi_stop.saturating_sub(width);
        let mut starts = vec![0usize; dim];
        let mut stops = inner_shape.to_vec();
        starts[axis] = hi_start;
        stops[axis] = hi_stop;
        regions.push(Region { starts, stops });
    }

    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSupportKernel(usize);

    impl StencilKernel<f64> for FixedSupportKernel {
        fn kernel_support(&self) -> usize {
            self.0
        }

        fn apply_region(
            &self,
            _input: &LocalField<f64>,
            _output: &mut LocalField<f64>,
            _region: &Region,
        ) -> Result<(), StencilError> {
            Ok(())
        }
    }

    #[test]
    fn kernel_support_check_is_pure_arithmetic() {
        let kernel = FixedSupportKernel(2);
        assert!(kernel.kernel_support() <= 2);
        let kernel = FixedSupportKernel(3);
        assert!(kernel.kernel_support() > 2);
    }

    #[test]
    fn interior_region_insets_by_h_on_every_side() {
        let region = interior_region(&[8, 8], 2).unwrap();
        assert_eq!(region.starts, vec![2, 2]);
        assert_eq!(region.stops, vec![6, 6]);
    }

    #[test]
    fn interior_region_is_none_when_h_consumes_the_whole_axis() {
        assert!(interior_region(&[4, 4], 2).is_some());
        assert!(interior_region(&[2, 4], 2).is_none());
    }

    #[test]
    fn boundary_regions_cover_every_axis_side_when_h_equals_s() {
        let regions = boundary_regions(&[8, 8], 1, 1);
        assert_eq!(regions.len(), 4);
        // h == s: margin is 0, so the low strip on axis 0 starts at 0.
        assert_eq!(regions[0].starts[0], 0);
        assert_eq!(regions[0].stops[0], 3);
        // high strip on axis 0 ends at the inner extent.
        assert_eq!(regions[1].stops[0], 8);
    }

    #[test]
    fn boundary_region_widths_match_three_times_support() {
        let regions = boundary_regions(&[16, 16, 16], 1, 1);
        assert_eq!(regions.len(), 6);
        for r in &regions {
            let axis = r
                .starts
                .iter()
                .zip(r.stops.iter())
                .position(|(&s, &e)| e - s == 3)
                .expect("exactly one axis is the 3s-wide strip");
            assert_eq!(r.stops[axis] - r.starts[axis], 3);
        }
    }
}
