//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

//! Straightforward NumPy-equivalent semantics of the fused operators.
//!
//! Values are computed in `f64` and rounded to the element type after every operation,
//! the same way NumPy computes with small float types.

use ndarray::{ArrayD, Axis, IxDyn};

use crate::ErrPack;
use crate::dtype::{DType, Scalar};
use crate::error::TensorError;
use crate::shape::normalize_axis;
use crate::tensor::Tensor;

//--------------------------------------------------------------------------------------------------

pub fn to_array(t: &Tensor) -> Result<ArrayD<f64>, ErrPack<TensorError>> {
	ArrayD::from_shape_vec(IxDyn(t.dims()), t.to_f64_vec())
		.map_err(|_| ErrPack::new(TensorError::InvalidBufferSize))
}

pub fn from_array(a: &ArrayD<f64>, dtype: DType) -> Result<Tensor, ErrPack<TensorError>> {
	let mut t = Tensor::zeros(a.shape(), dtype)?;
	for (i, &v) in a.iter().enumerate() {
		t.set(i, Scalar::Float(v))?;
	}
	Ok(t)
}

fn invalid_axis(axis: isize, rank: usize) -> ErrPack<TensorError> {
	ErrPack::with_message(TensorError::InvalidShape, format!("axis {axis} out of range for rank {rank}"))
}

fn index_error(what: &str, index: i64, extent: usize) -> ErrPack<TensorError> {
	ErrPack::with_message(
		TensorError::IndexOutOfBounds,
		format!("{what} = {index} is out of range [0, {extent})"),
	)
}

//--------------------------------------------------------------------------------------------------

/// `np.take(params, indices, axis)`
pub fn take(params: &ArrayD<f64>, indices: &Tensor, axis: usize) -> Result<ArrayD<f64>, ErrPack<TensorError>> {
	let extent = params.shape()[axis];
	let mut flat = Vec::with_capacity(indices.elems());
	for index in indices.to_i64_vec() {
		match usize::try_from(index) {
			Ok(i) if i < extent => flat.push(i),
			_ => return Err(index_error("gather index", index, extent)),
		}
	}
	let selected = params.select(Axis(axis), &flat);

	let mut dims = params.shape()[..axis].to_vec();
	dims.extend_from_slice(indices.dims());
	dims.extend_from_slice(&params.shape()[axis + 1..]);
	ArrayD::from_shape_vec(IxDyn(&dims), selected.iter().copied().collect())
		.map_err(|_| ErrPack::new(TensorError::InvalidShape))
}

/// `out = zeros_like(params); np.add.at(out, tuple(np.moveaxis(scatter_indices, -1, 0)), take(params, gather_indices, axis) * multiplier)`
///
/// Batch axes of `scatter_indices` pair with the leading update axes in order, so
/// `update[a, b, ...]` goes to the tuple `scatter_indices[a, b, :]`. This is not `tuple(I.T)`,
/// which also reverses the batch axes when `scatter_indices` has rank 3 or more.
pub fn gather_mul_scatter_add(
	params: &Tensor,
	gather_indices: &Tensor,
	multiplier: &Tensor,
	scatter_indices: &Tensor,
	axis: isize,
) -> Result<Tensor, ErrPack<TensorError>> {
	let dtype = params.dtype();
	let s1 = params.dims();
	let axis = normalize_axis(axis, s1.len()).ok_or_else(|| invalid_axis(axis, s1.len()))?;

	let gathered = take(&to_array(params)?, gather_indices, axis)?;
	let product = (&gathered * &to_array(multiplier)?).mapv(|v| dtype.round(v));

	let s4 = scatter_indices.dims();
	let Some((&depth, batch)) = s4.split_last() else {
		return Err(ErrPack::new(TensorError::InvalidShape));
	};
	if depth > s1.len() {
		return Err(ErrPack::new(TensorError::InvalidShape));
	}
	let mut update_dims = batch.to_vec();
	update_dims.extend_from_slice(&s1[depth..]);
	let Some(update) = product.broadcast(IxDyn(&update_dims)) else {
		return Err(ErrPack::with_message(TensorError::InvalidShape, "product does not broadcast to the update shape"));
	};
	let update: Vec<f64> = update.iter().copied().collect();

	let strides = params.shape().strides();
	let tail: usize = s1[depth..].iter().product();
	let mut out = vec![0.0; params.elems()];
	for (b, tuple) in scatter_indices.to_i64_vec().chunks_exact(depth).enumerate() {
		let mut base = 0;
		for (k, &index) in tuple.iter().enumerate() {
			match usize::try_from(index) {
				Ok(i) if i < s1[k] => base += i * strides[k],
				_ => return Err(index_error("scatter index", index, s1[k])),
			}
		}
		for t in 0..tail {
			let o = &mut out[base + t];
			*o = dtype.round(*o + update[b * tail + t]);
		}
	}

	let out = ArrayD::from_shape_vec(IxDyn(s1), out).map_err(|_| ErrPack::new(TensorError::InvalidShape))?;
	from_array(&out, dtype)
}

/// `np.cumsum` along `axis`, optionally exclusive and/or reversed.
pub fn cumsum(x: &Tensor, axis: isize, exclusive: bool, reverse: bool) -> Result<Tensor, ErrPack<TensorError>> {
	let dtype = x.dtype();
	let rank = x.dims().len();
	let axis = normalize_axis(axis, rank).ok_or_else(|| invalid_axis(axis, rank))?;
	let mut out = to_array(x)?;
	for mut lane in out.lanes_mut(Axis(axis)) {
		let n = lane.len();
		let mut acc = 0.0;
		for k in 0..n {
			let pos = if reverse { n - 1 - k } else { k };
			let v = lane[pos];
			if exclusive {
				lane[pos] = acc;
				acc = dtype.round(acc + v);
			} else {
				acc = dtype.round(acc + v);
				lane[pos] = acc;
			}
		}
	}
	from_array(&out, dtype)
}

//--------------------------------------------------------------------------------------------------

/// `(rtol, atol)` used to compare device results with the reference.
pub fn tolerance_for(dtype: DType) -> (f64, f64) {
	match dtype {
		DType::F16 => (5e-3, 1e-8),
		DType::F32 => (1e-4, 1e-5),
		DType::F64 => (1e-10, 1e-12),
		DType::I32 | DType::I64 => (0.0, 0.0),
	}
}

/// `np.allclose(actual, expected, rtol, atol)`
pub fn allclose(actual: &[f64], expected: &[f64], rtol: f64, atol: f64) -> bool {
	actual.len() == expected.len()
		&& actual.iter().zip(expected).all(|(&a, &e)| {
			if a.is_nan() || e.is_nan() {
				return a.is_nan() && e.is_nan();
			}
			(a - e).abs() <= atol + rtol * e.abs()
		})
}

/// Compares two tensors with the tolerance of their element type.
pub fn tensors_close(actual: &Tensor, expected: &Tensor) -> bool {
	let (rtol, atol) = tolerance_for(expected.dtype());
	actual.dtype() == expected.dtype()
		&& actual.dims() == expected.dims()
		&& allclose(&actual.to_f64_vec(), &expected.to_f64_vec(), rtol, atol)
}

//--------------------------------------------------------------------------------------------------


//--------------------------------------------------------------------------------------------------
