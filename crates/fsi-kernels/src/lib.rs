//! Minimal reference [`StencilKernel`] fixtures used to exercise
//! `MpiStencilWrapper` and the seed tests (S1, S2). Neither kernel is meant
//! to be a general numerics library — the real diffusion flux, curl,
//! advection, and Poisson solve implementations a production flow solver
//! needs are external collaborators injected by the embedding application.

use fsi_grid::LocalField;
use fsi_stencil::{Region, StencilError, StencilKernel};
use ndarray::IxDyn;

/// Scalar out-of-plane curl of a 2D in-plane vector field (component 0 = x,
/// component 1 = y), via standard second-order central differences:
/// `curl = dv_x/dy - dv_y/dx`, both divided by `2 * dx`.
///
/// `kernel_support() == 1`: each output cell reads one neighbor on either
/// side along each axis.
#[derive(Clone, Copy)]
pub struct OutplaneFieldCurl2D {
    inv_two_dx: f64,
}

impl OutplaneFieldCurl2D {
    pub fn new(dx: f64) -> Self {
        Self {
            inv_two_dx: 1.0 / (2.0 * dx),
        }
    }
}

impl StencilKernel<f64> for OutplaneFieldCurl2D {
    fn kernel_support(&self) -> usize {
        1
    }

    fn apply_region(
        &self,
        input: &LocalField<f64>,
        output: &mut LocalField<f64>,
        region: &Region,
    ) -> Result<(), StencilError> {
        debug_assert_eq!(input.spatial_dim(), 2, "curl kernel is 2D-only");
        debug_assert_eq!(input.n_components(), 2, "curl kernel needs a 2-component input");
        debug_assert!(!output.is_vector(), "curl kernel writes a scalar field");
        if region.is_empty() {
            return Ok(());
        }

        let h = input.ghost_width();
        let vx = input.component(0);
        let vy = input.component(1);
        let mut out = output.component_mut(0);

        for iy in region.starts[0]..region.stops[0] {
            let py = iy + h;
            for ix in region.starts[1]..region.stops[1] {
                let px = ix + h;
                let dvx_dy =
                    (vx[IxDyn(&[py + 1, px])] - vx[IxDyn(&[py - 1, px])]) * self.inv_two_dx;
                let dvy_dx =
                    (vy[IxDyn(&[py, px + 1])] - vy[IxDyn(&[py, px - 1])]) * self.inv_two_dx;
                out[IxDyn(&[py, px])] = dvx_dy - dvy_dx;
            }
        }
        Ok(())
    }
}

/// Seven-point diffusion flux of a 3D scalar field: `nu * laplacian(phi)`,
/// using the standard second-order central-difference Laplacian stencil on
/// an (assumed) uniform grid spacing `dx`.
///
/// `kernel_support() == 1`.
#[derive(Clone, Copy)]
pub struct DiffusionFlux3D {
    nu: f64,
    inv_dx2: f64,
}

impl DiffusionFlux3D {
    pub fn new(nu: f64, dx: f64) -> Self {
        Self {
            nu,
            inv_dx2: 1.0 / (dx * dx),
        }
    }
}

impl StencilKernel<f64> for DiffusionFlux3D {
    fn kernel_support(&self) -> usize {
        1
    }

    fn apply_region(
        &self,
        input: &LocalField<f64>,
        output: &mut LocalField<f64>,
        region: &Region,
    ) -> Result<(), StencilError> {
        debug_assert_eq!(input.spatial_dim(), 3, "diffusion flux kernel is 3D-only");
        debug_assert!(!input.is_vector(), "diffusion flux kernel reads a scalar field");
        debug_assert!(!output.is_vector(), "diffusion flux kernel writes a scalar field");
        if region.is_empty() {
            return Ok(());
        }

        let h = input.ghost_width();
        let phi = input.component(0);
        let mut out = output.component_mut(0);

        for iz in region.starts[0]..region.stops[0] {
            let pz = iz + h;
            for iy in region.starts[1]..region.stops[1] {
                let py = iy + h;
                for ix in region.starts[2]..region.stops[2] {
                    let px = ix + h;
                    let center = phi[IxDyn(&[pz, py, px])];
                    let lap = (phi[IxDyn(&[pz + 1, py, px])] - 2.0 * center
                        + phi[IxDyn(&[pz - 1, py, px])])
                        + (phi[IxDyn(&[pz, py + 1, px])] - 2.0 * center
                            + phi[IxDyn(&[pz, py - 1, px])])
                        + (phi[IxDyn(&[pz, py, px + 1])] - 2.0 * center
                            + phi[IxDyn(&[pz, py, px - 1])]);
                    out[IxDyn(&[pz, py, px])] = self.nu * lap * self.inv_dx2;
                }
            }
        }
        Ok(())
    }
}
