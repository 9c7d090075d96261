//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use smallvec::SmallVec;

use crate::error::{InvalidShapeError, ShapeMismatchError};

//--------------------------------------------------------------------------------------------------

pub const INLINE_DIMS: usize = 6;

pub type Dims = SmallVec<[usize; INLINE_DIMS]>;

/// Sizes of the dimensions of a contiguous row-major tensor.
///
/// Every dimension is positive and the total number of elements fits in `usize`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Shape {
	dims: Dims,
	elems: usize,
}

impl Shape {
	pub fn new(dims: &[usize]) -> Result<Self, InvalidShapeError> {
		let elems = checked_elems(dims)?;
		Ok(Self { dims: Dims::from_slice(dims), elems })
	}

	pub fn dims(&self) -> &[usize] {
		&self.dims
	}

	pub fn rank(&self) -> usize {
		self.dims.len()
	}

	pub fn elems(&self) -> usize {
		self.elems
	}

	pub fn strides(&self) -> Dims {
		contiguous_strides(&self.dims)
	}
}

impl std::fmt::Display for Shape {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "(")?;
		for (i, dim) in self.dims.iter().enumerate() {
			if i > 0 {
				write!(f, ", ")?;
			}
			write!(f, "{dim}")?;
		}
		if self.dims.len() == 1 {
			write!(f, ",")?;
		}
		write!(f, ")")
	}
}

//--------------------------------------------------------------------------------------------------

pub fn checked_elems(dims: &[usize]) -> Result<usize, InvalidShapeError> {
	dims.iter().try_fold(1_usize, |elems, &dim| {
		if dim == 0 {
			return Err(InvalidShapeError);
		}
		elems.checked_mul(dim).ok_or(InvalidShapeError)
	})
}

pub fn contiguous_strides(dims: &[usize]) -> Dims {
	let mut strides = Dims::from_elem(1, dims.len());
	let mut stride = 1;
	for (s, &dim) in strides.iter_mut().zip(dims.iter()).rev() {
		*s = stride;
		stride *= dim;
	}
	strides
}

/// Converts a possibly negative axis to an index in `0..rank`.
pub fn normalize_axis(axis: isize, rank: usize) -> Option<usize> {
	let rank = isize::try_from(rank).ok()?;
	let axis = if axis < 0 { axis + rank } else { axis };
	if axis < 0 || axis >= rank { None } else { Some(axis as usize) }
}

/// NumPy broadcasting of any number of shapes.
///
/// Shapes are aligned to the right. In every position, all sizes must either match or be 1.
pub fn broadcast_shapes(shapes: &[&[usize]]) -> Result<Dims, ShapeMismatchError> {
	let rank = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
	let mut result = Dims::from_elem(1, rank);
	for shape in shapes {
		let skip = rank - shape.len();
		for (r, &size) in result[skip..].iter_mut().zip(shape.iter()) {
			if size == 1 {
				continue;
			}
			if *r != 1 && *r != size {
				return Err(ShapeMismatchError);
			}
			*r = size;
		}
	}
	Ok(result)
}

/// Strides of a contiguous tensor of shape `src` when it is read as if it had shape `target`.
///
/// `src` must broadcast to `target`. Broadcasted and missing dimensions get stride 0.
pub fn broadcast_strides(src: &[usize], target: &[usize]) -> Result<Dims, ShapeMismatchError> {
	if src.len() > target.len() {
		return Err(ShapeMismatchError);
	}
	let src_strides = contiguous_strides(src);
	let skip = target.len() - src.len();
	let mut result = Dims::from_elem(0, target.len());
	for (i, (&size, &stride)) in src.iter().zip(src_strides.iter()).enumerate() {
		let t = target[skip + i];
		if size == t {
			result[skip + i] = if size == 1 { 0 } else { stride };
		} else if size != 1 {
			return Err(ShapeMismatchError);
		}
	}
	Ok(result)
}

/// Collapses a shape around `axis` into `(outer, len, inner)`.
///
/// All dimensions before the axis merge into `outer`, all after it into `inner`.
/// For a contiguous tensor, element `(o, k, i)` is at offset `(o * len + k) * inner + i`.
pub fn split_at_axis(dims: &[usize], axis: usize) -> (usize, usize, usize) {
	let outer = dims[..axis].iter().product();
	let len = dims[axis];
	let inner = dims[axis + 1..].iter().product();
	(outer, len, inner)
}

/// Converts a flat row-major offset to per-dimension coordinates.
pub fn unravel_index(mut flat: usize, dims: &[usize]) -> Dims {
	let mut coords = Dims::from_elem(0, dims.len());
	for (c, &dim) in coords.iter_mut().zip(dims.iter()).rev() {
		*c = flat % dim;
		flat /= dim;
	}
	coords
}

//--------------------------------------------------------------------------------------------------


//--------------------------------------------------------------------------------------------------
