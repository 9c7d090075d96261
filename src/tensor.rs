//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::ErrPack;
use crate::dtype::{DType, HasDType, Scalar};
use crate::error::TensorError;
use crate::op::TensorSpec;
use crate::shape::Shape;

//--------------------------------------------------------------------------------------------------

/// Contiguous row-major host tensor.
///
/// Elements are stored little-endian in a byte buffer, so one type covers every dtype.
/// `data.len() == shape.elems() * dtype.bytes()` always holds.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
	shape: Shape,
	dtype: DType,
	data: Vec<u8>,
}

impl Tensor {
	pub fn zeros(dims: &[usize], dtype: DType) -> Result<Self, ErrPack<TensorError>> {
		let shape = Shape::new(dims)?;
		let bytes = dtype.array_bytes(shape.elems()).ok_or_else(|| ErrPack::new(TensorError::InvalidShape))?;
		Ok(Self { shape, dtype, data: vec![0; bytes] })
	}

	pub fn from_slice<T: HasDType>(dims: &[usize], values: &[T]) -> Result<Self, ErrPack<TensorError>> {
		let shape = Shape::new(dims)?;
		if values.len() != shape.elems() {
			return Err(ErrPack::with_message(
				TensorError::InvalidBufferSize,
				format!("{} values for shape {shape}", values.len()),
			));
		}
		let elem_bytes = T::dtype.bytes();
		let mut data = vec![0; values.len() * elem_bytes];
		for (chunk, &v) in data.chunks_exact_mut(elem_bytes).zip(values) {
			v.write_le(chunk);
		}
		Ok(Self { shape, dtype: T::dtype, data })
	}

	/// Wraps raw little-endian bytes.
	pub fn from_bytes(dims: &[usize], dtype: DType, data: Vec<u8>) -> Result<Self, ErrPack<TensorError>> {
		let shape = Shape::new(dims)?;
		if dtype.array_bytes(shape.elems()) != Some(data.len()) {
			return Err(ErrPack::new(TensorError::InvalidBufferSize));
		}
		Ok(Self { shape, dtype, data })
	}

	pub fn shape(&self) -> &Shape {
		&self.shape
	}

	pub fn dims(&self) -> &[usize] {
		self.shape.dims()
	}

	pub fn dtype(&self) -> DType {
		self.dtype
	}

	pub fn elems(&self) -> usize {
		self.shape.elems()
	}

	pub fn bytes(&self) -> &[u8] {
		&self.data
	}

	pub fn spec(&self) -> TensorSpec {
		TensorSpec { shape: self.shape.clone(), dtype: self.dtype }
	}

	pub fn to_vec<T: HasDType>(&self) -> Result<Vec<T>, ErrPack<TensorError>> {
		if T::dtype != self.dtype {
			return Err(dtype_mismatch(T::dtype, self.dtype));
		}
		Ok(self.data.chunks_exact(self.dtype.bytes()).map(T::read_le).collect())
	}

	/// All elements converted to `f64`. Integer elements above 2^53 lose precision.
	pub fn to_f64_vec(&self) -> Vec<f64> {
		(0..self.elems()).map(|i| decode(self.dtype, self.elem_bytes(i)).to_f64()).collect()
	}

	/// All elements converted to `i64`. Floating point elements are truncated.
	pub fn to_i64_vec(&self) -> Vec<i64> {
		(0..self.elems()).map(|i| decode(self.dtype, self.elem_bytes(i)).to_i64()).collect()
	}

	pub fn get(&self, index: usize) -> Result<Scalar, ErrPack<TensorError>> {
		if index >= self.elems() {
			return Err(index_out_of_bounds(index, self.elems()));
		}
		Ok(decode(self.dtype, self.elem_bytes(index)))
	}

	/// Stores `val` at `index`, rounding it to the element type.
	pub fn set(&mut self, index: usize, val: Scalar) -> Result<(), ErrPack<TensorError>> {
		let elems = self.elems();
		if index >= elems {
			return Err(index_out_of_bounds(index, elems));
		}
		let bytes = self.dtype.bytes();
		let dtype = self.dtype;
		encode(dtype, val, &mut self.data[index * bytes..(index + 1) * bytes]);
		Ok(())
	}

	/// Replaces the contents with `data`. Shape and dtype stay the same.
	pub(crate) fn overwrite(&mut self, data: Vec<u8>) -> Result<(), ErrPack<TensorError>> {
		if data.len() != self.data.len() {
			return Err(ErrPack::new(TensorError::InvalidBufferSize));
		}
		self.data = data;
		Ok(())
	}

	fn elem_bytes(&self, index: usize) -> &[u8] {
		let bytes = self.dtype.bytes();
		&self.data[index * bytes..(index + 1) * bytes]
	}
}

//--------------------------------------------------------------------------------------------------

/// Reads one little-endian element of type `dtype`.
pub fn decode(dtype: DType, bytes: &[u8]) -> Scalar {
	match dtype {
		DType::F16 => half::f16::read_le(bytes).to_scalar(),
		DType::F32 => f32::read_le(bytes).to_scalar(),
		DType::F64 => f64::read_le(bytes).to_scalar(),
		DType::I32 => i32::read_le(bytes).to_scalar(),
		DType::I64 => i64::read_le(bytes).to_scalar(),
	}
}

/// Writes `val` as one little-endian element of type `dtype`.
pub fn encode(dtype: DType, val: Scalar, out: &mut [u8]) {
	match dtype {
		DType::F16 => half::f16::from_scalar(val).write_le(out),
		DType::F32 => f32::from_scalar(val).write_le(out),
		DType::F64 => f64::from_scalar(val).write_le(out),
		DType::I32 => i32::from_scalar(val).write_le(out),
		DType::I64 => i64::from_scalar(val).write_le(out),
	}
}

#[cold]
#[inline(never)]
fn dtype_mismatch(expected: DType, found: DType) -> ErrPack<TensorError> {
	ErrPack::with_message(TensorError::DTypeMismatch, format!("expected {expected}, found {found}"))
}

#[cold]
#[inline(never)]
fn index_out_of_bounds(index: usize, elems: usize) -> ErrPack<TensorError> {
	ErrPack::with_message(
		TensorError::IndexOutOfBounds,
		format!("index {index} is out of range for {elems} elements"),
	)
}

//--------------------------------------------------------------------------------------------------


//--------------------------------------------------------------------------------------------------
