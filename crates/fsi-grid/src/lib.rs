//! Ghost-padded local field storage shared by every rank-local numeric crate.
//!
//! A [`LocalField`] wraps the per-rank slab of a decomposed grid: an
//! `ndarray::ArrayD` padded on every spatial axis by a fixed ghost width. It
//! knows nothing about MPI, neighbor ranks, or communication — `fsi-halo` and
//! `fsi-field-io` build on top of the views and subarray descriptors exposed
//! here to move data in and out of the padded buffer.

use std::fmt;

use ndarray::{Array, ArrayD, ArrayViewD, ArrayViewMutD, IxDyn, Slice};
use num_traits::Zero;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    #[error("inner shape must have at least one axis")]
    EmptyShape,
    #[error("inner shape axis {axis} has length 0, which cannot be padded meaningfully")]
    ZeroLengthAxis { axis: usize },
    #[error("vector field component count must be at least 1")]
    ZeroComponents,
    #[error(
        "subarray descriptor axis count {got} does not match the field's spatial rank {expected}"
    )]
    DescriptorRankMismatch { got: usize, expected: usize },
    #[error(
        "subarray descriptor axis {axis} requests [{start}, {start_plus_len}) which exceeds size \
         {size}"
    )]
    DescriptorOutOfBounds {
        axis: usize,
        start: usize,
        start_plus_len: usize,
        size: usize,
    },
    #[error("unpack buffer has {got} elements, but the descriptor spans {expected}")]
    UnpackLengthMismatch { got: usize, expected: usize },
}

/// Which side of an axis a sub-block sits on, relative to the inner region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Low,
    High,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Low => Side::High,
            Side::High => Side::Low,
        }
    }
}

/// A `(sizes, subsizes, starts)` triple describing a rectangular sub-block of
/// a padded field, in the spirit of an `MPI_Type_create_subarray` argument
/// list. Only the spatial axes are described; a vector field's leading
/// component axis is handled by iterating [`LocalField::component`] /
/// [`LocalField::component_mut`] views rather than folding it into the
/// descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubarrayDescriptor {
    pub sizes: Vec<usize>,
    pub subsizes: Vec<usize>,
    pub starts: Vec<usize>,
}

impl SubarrayDescriptor {
    pub fn rank(&self) -> usize {
        self.subsizes.len()
    }

    /// Number of scalar elements the descriptor spans.
    pub fn len(&self) -> usize {
        self.subsizes.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate_against(&self, shape: &[usize]) -> Result<(), GridError> {
        if self.subsizes.len() != shape.len() {
            return Err(GridError::DescriptorRankMismatch {
                got: self.subsizes.len(),
                expected: shape.len(),
            });
        }
        for (axis, ((&start, &subsize), &size)) in self
            .starts
            .iter()
            .zip(self.subsizes.iter())
            .zip(shape.iter())
            .enumerate()
        {
            if start + subsize > size {
                return Err(GridError::DescriptorOutOfBounds {
                    axis,
                    start,
                    start_plus_len: start + subsize,
                    size,
                });
            }
        }
        Ok(())
    }
}

fn sliced_view<T>(view: &ArrayViewD<T>, desc: &SubarrayDescriptor) -> ArrayViewD<'_, T> {
    view.slice_each_axis(|ax| {
        let axis = ax.axis.index();
        let start = desc.starts[axis] as isize;
        let end = start + desc.subsizes[axis] as isize;
        Slice::from(start..end)
    })
}

fn sliced_view_mut<'a, T>(
    view: &'a mut ArrayViewMutD<T>,
    desc: &SubarrayDescriptor,
) -> ArrayViewMutD<'a, T> {
    view.slice_each_axis_mut(|ax| {
        let axis = ax.axis.index();
        let start = desc.starts[axis] as isize;
        let end = start + desc.subsizes[axis] as isize;
        Slice::from(start..end)
    })
}

/// Copy the sub-block addressed by `desc` out of `view` into a fresh,
/// contiguous, row-major buffer — the shape MPI sends expect.
pub fn pack<T: Copy>(
    view: &ArrayViewD<T>,
    desc: &SubarrayDescriptor,
) -> Result<Vec<T>, GridError> {
    desc.validate_against(view.shape())?;
    let sub = sliced_view(view, desc);
    Ok(sub.iter().copied().collect())
}

/// Overwrite the sub-block addressed by `desc` in `view` with `data`,
/// row-major.
pub fn unpack<T: Copy>(
    view: &mut ArrayViewMutD<T>,
    desc: &SubarrayDescriptor,
    data: &[T],
) -> Result<(), GridError> {
    desc.validate_against(view.shape())?;
    if data.len() != desc.len() {
        return Err(GridError::UnpackLengthMismatch {
            got: data.len(),
            expected: desc.len(),
        });
    }
    let mut sub = sliced_view_mut(view, desc);
    for (dst, &src) in sub.iter_mut().zip(data.iter()) {
        *dst = src;
    }
    Ok(())
}

/// Accumulate `data` into the sub-block addressed by `desc`, used when a
/// halo exchange sums contributions back into owned cells instead of
/// overwriting them (see `VirtualBoundaryForcing` spreading).
pub fn add_unpack<T>(
    view: &mut ArrayViewMutD<T>,
    desc: &SubarrayDescriptor,
    data: &[T],
) -> Result<(), GridError>
where
    T: Copy + std::ops::AddAssign,
{
    desc.validate_against(view.shape())?;
    if data.len() != desc.len() {
        return Err(GridError::UnpackLengthMismatch {
            got: data.len(),
            expected: desc.len(),
        });
    }
    let mut sub = sliced_view_mut(view, desc);
    for (dst, &src) in sub.iter_mut().zip(data.iter()) {
        *dst += src;
    }
    Ok(())
}

/// A ghost-padded field local to one rank. Scalar fields store just the
/// spatial axes; vector fields prepend a leading component axis of length
/// `n_components` so a `d`-dimensional vector field over a `d`-dimensional
/// grid is a single `(d, ..spatial..)` array rather than `d` separate
/// buffers.
#[derive(Debug, Clone)]
pub struct LocalField<T> {
    data: ArrayD<T>,
    ghost_width: usize,
    inner_shape: Vec<usize>,
    n_components: usize,
}

impl<T> LocalField<T>
where
    T: Clone + Zero,
{
    pub fn zeros_scalar(inner_shape: &[usize], ghost_width: usize) -> Result<Self, GridError> {
        Self::zeros(inner_shape, ghost_width, 1)
    }

    pub fn zeros_vector(
        inner_shape: &[usize],
        ghost_width: usize,
        n_components: usize,
    ) -> Result<Self, GridError> {
        Self::zeros(inner_shape, ghost_width, n_components)
    }

    fn zeros(
        inner_shape: &[usize],
        ghost_width: usize,
        n_components: usize,
    ) -> Result<Self, GridError> {
        if inner_shape.is_empty() {
            return Err(GridError::EmptyShape);
        }
        if n_components == 0 {
            return Err(GridError::ZeroComponents);
        }
        for (axis, &l) in inner_shape.iter().enumerate() {
            if l == 0 {
                return Err(GridError::ZeroLengthAxis { axis });
            }
        }

        let mut full_shape: Vec<usize> = Vec::with_capacity(inner_shape.len() + 1);
        if n_components > 1 {
            full_shape.push(n_components);
        }
        full_shape.extend(inner_shape.iter().map(|&l| l + 2 * ghost_width));

        let data = Array::zeros(IxDyn(&full_shape));
        Ok(Self {
            data,
            ghost_width,
            inner_shape: inner_shape.to_vec(),
            n_components,
        })
    }
}

impl<T> LocalField<T> {
    pub fn ghost_width(&self) -> usize {
        self.ghost_width
    }

    pub fn inner_shape(&self) -> &[usize] {
        &self.inner_shape
    }

    pub fn spatial_dim(&self) -> usize {
        self.inner_shape.len()
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    pub fn is_vector(&self) -> bool {
        self.n_components > 1
    }

    /// Padded extent per spatial axis, i.e. `inner_shape[axis] + 2 * ghost_width`.
    pub fn padded_shape(&self) -> Vec<usize> {
        self.inner_shape
            .iter()
            .map(|&l| l + 2 * self.ghost_width)
            .collect()
    }

    pub fn raw(&self) -> &ArrayD<T> {
        &self.data
    }

    pub fn raw_mut(&mut self) -> &mut ArrayD<T> {
        &mut self.data
    }

    /// View of a single component's spatial slab. For a scalar field only
    /// `component == 0` is valid and returns the whole buffer.
    pub fn component(&self, component: usize) -> ArrayViewD<'_, T> {
        if self.n_components == 1 {
            assert_eq!(component, 0, "scalar field has only component 0");
            self.data.view()
        } else {
            self.data.index_axis(ndarray::Axis(0), component)
        }
    }

    pub fn component_mut(&mut self, component: usize) -> ArrayViewMutD<'_, T> {
        if self.n_components == 1 {
            assert_eq!(component, 0, "scalar field has only component 0");
            self.data.view_mut()
        } else {
            self.data.index_axis_mut(ndarray::Axis(0), component)
        }
    }

    /// Descriptor covering the whole interior region (ghosts excluded), in
    /// spatial-axis coordinates.
    pub fn inner_descriptor(&self) -> SubarrayDescriptor {
        SubarrayDescriptor {
            sizes: self.padded_shape(),
            subsizes: self.inner_shape.clone(),
            starts: vec![self.ghost_width; self.spatial_dim()],
        }
    }

    /// Descriptor for a thickness-`t` slab touching `side` of `axis`,
    /// spanning the full padded extent on every other axis.
    ///
    /// When `from_inner` is `true` the slab sits inside the interior region
    /// (used to build an outgoing send buffer); when `false` it addresses
    /// the ghost region itself (used to build an incoming receive buffer).
    pub fn edge_slab(
        &self,
        axis: usize,
        side: Side,
        thickness: usize,
        from_inner: bool,
    ) -> SubarrayDescriptor {
        let padded = self.padded_shape();
        let mut starts = vec![0usize; padded.len()];
        let mut subsizes = padded.clone();

        let l = self.inner_shape[axis];
        let h = self.ghost_width;
        let start = match (side, from_inner) {
            (Side::Low, true) => h,
            (Side::Low, false) => 0,
            (Side::High, true) => h + l - thickness,
            (Side::High, false) => h + l,
        };
        starts[axis] = start;
        subsizes[axis] = thickness;

        SubarrayDescriptor {
            sizes: padded,
            subsizes,
            starts,
        }
    }

    /// Same as [`LocalField::edge_slab`] but for a sub-block that is
    /// restricted along several axes at once (used for 3D edge/corner halo
    /// regions, where more than one axis is simultaneously on the boundary).
    pub fn multi_edge_slab(
        &self,
        axes_sides: &[(usize, Side)],
        thickness: usize,
        from_inner: bool,
    ) -> SubarrayDescriptor {
        let padded = self.padded_shape();
        let mut starts = vec![0usize; padded.len()];
        let mut subsizes = padded.clone();
        let h = self.ghost_width;

        for &(axis, side) in axes_sides {
            let l = self.inner_shape[axis];
            let start = match (side, from_inner) {
                (Side::Low, true) => h,
                (Side::Low, false) => 0,
                (Side::High, true) => h + l - thickness,
                (Side::High, false) => h + l,
            };
            starts[axis] = start;
            subsizes[axis] = thickness;
        }

        SubarrayDescriptor {
            sizes: padded,
            subsizes,
            starts,
        }
    }
}

impl<T> fmt::Display for LocalField<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LocalField(inner={:?}, ghost_width={}, n_components={})",
            self.inner_shape, self.ghost_width, self.n_components
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeros_scalar_has_expected_padded_shape() {
        let field = LocalField::<f64>::zeros_scalar(&[4, 6], 2).unwrap();
        assert_eq!(field.padded_shape(), vec![8, 10]);
        assert_eq!(field.raw().shape(), &[8, 10]);
        assert!(!field.is_vector());
    }

    #[test]
    fn zeros_vector_prepends_component_axis() {
        let field = LocalField::<f64>::zeros_vector(&[4, 6, 5], 1, 3).unwrap();
        assert_eq!(field.raw().shape(), &[3, 6, 8, 7]);
        assert!(field.is_vector());
        assert_eq!(field.n_components(), 3);
    }

    #[test]
    fn zero_length_axis_is_rejected() {
        let err = LocalField::<f64>::zeros_scalar(&[4, 0], 1).unwrap_err();
        assert_eq!(err, GridError::ZeroLengthAxis { axis: 1 });
    }

    #[test]
    fn inner_descriptor_round_trips_through_pack_unpack() {
        let mut field = LocalField::<f64>::zeros_scalar(&[3, 3], 1).unwrap();
        {
            let mut inner = field.component_mut(0);
            let desc = SubarrayDescriptor {
                sizes: vec![5, 5],
                subsizes: vec![3, 3],
                starts: vec![1, 1],
            };
            let data: Vec<f64> = (0..9).map(|i| i as f64).collect();
            unpack(&mut inner, &desc, &data).unwrap();
        }
        let view = field.component(0);
        let desc = field.inner_descriptor();
        let packed = pack(&view, &desc).unwrap();
        assert_eq!(packed, (0..9).map(|i| i as f64).collect::<Vec<_>>());
    }

    #[test]
    fn edge_slab_low_inner_addresses_first_h_inner_cells() {
        let field = LocalField::<f64>::zeros_scalar(&[4, 4], 2).unwrap();
        let desc = field.edge_slab(0, Side::Low, 2, true);
        assert_eq!(desc.starts, vec![2, 0]);
        assert_eq!(desc.subsizes, vec![2, 8]);
    }

    #[test]
    fn edge_slab_high_halo_addresses_trailing_ghost_region() {
        let field = LocalField::<f64>::zeros_scalar(&[4, 4], 2).unwrap();
        let desc = field.edge_slab(0, Side::High, 2, false);
        assert_eq!(desc.starts, vec![6, 0]);
        assert_eq!(desc.subsizes, vec![2, 8]);
    }

    #[test]
    fn multi_edge_slab_combines_two_axes() {
        let field = LocalField::<f64>::zeros_scalar(&[4, 4, 4], 1).unwrap();
        let desc =
            field.multi_edge_slab(&[(0, Side::Low), (1, Side::High)], 1, false);
        assert_eq!(desc.starts, vec![0, 5, 0]);
        assert_eq!(desc.subsizes, vec![1, 1, 6]);
    }

    #[test]
    fn add_unpack_accumulates_instead_of_overwriting() {
        let mut field = LocalField::<f64>::zeros_scalar(&[2, 2], 1).unwrap();
        let desc = field.inner_descriptor();
        {
            let mut view = field.component_mut(0);
            unpack(&mut view, &desc, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        }
        {
            let mut view = field.component_mut(0);
            add_unpack(&mut view, &desc, &[10.0, 10.0, 10.0, 10.0]).unwrap();
        }
        let view = field.component(0);
        let packed = pack(&view, &desc).unwrap();
        assert_eq!(packed, vec![11.0, 12.0, 13.0, 14.0]);
    }

    #[test]
    fn descriptor_out_of_bounds_is_rejected() {
        let field = LocalField::<f64>::zeros_scalar(&[2, 2], 1).unwrap();
        let bad = SubarrayDescriptor {
            sizes: vec![4, 4],
            subsizes: vec![4, 4],
            starts: vec![2, 2],
        };
        let view = field.component(0);
        let err = pack(&view, &bad).unwrap_err();
        assert!(matches!(err, GridError::DescriptorOutOfBounds { .. }));
    }
}
