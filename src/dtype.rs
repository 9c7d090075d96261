//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use half::f16;

use crate::error::UnknownDTypeError;

//--------------------------------------------------------------------------------------------------

/// Element type of a tensor. Resolved once at build time.
///
/// Discriminants start at 1 so that 0 is never a valid value in a kernel key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DType {
	F16 = 1,
	F32,
	F64,
	I32,
	I64,
}

impl DType {
	pub const fn id(self) -> u8 {
		self as u8
	}

	pub const fn bytes(self) -> usize {
		match self {
			Self::F16 => 2,
			Self::F32 | Self::I32 => 4,
			Self::F64 | Self::I64 => 8,
		}
	}

	pub const fn is_float(self) -> bool {
		matches!(self, Self::F16 | Self::F32 | Self::F64)
	}

	pub const fn is_int(self) -> bool {
		matches!(self, Self::I32 | Self::I64)
	}

	pub fn array_bytes(self, elems: usize) -> Option<usize> {
		elems.checked_mul(self.bytes())
	}

	/// Rounds `val` to the nearest value representable in this type.
	///
	/// Integer types truncate towards zero and wrap to their width.
	pub fn round(self, val: f64) -> f64 {
		match self {
			Self::F16 => f16::from_f64(val).to_f64(),
			Self::F32 => f64::from(val as f32),
			Self::F64 => val,
			Self::I32 => f64::from(val as i64 as i32),
			Self::I64 => val.trunc(),
		}
	}

	/// Name of the element type in generated CUDA source.
	pub const fn cuda_type(self) -> &'static str {
		match self {
			Self::F16 => "__half",
			Self::F32 => "float",
			Self::F64 => "double",
			Self::I32 => "int",
			Self::I64 => "long long",
		}
	}

}

impl std::str::FromStr for DType {
	type Err = UnknownDTypeError;

	fn from_str(s: &str) -> Result<Self, UnknownDTypeError> {
		match s {
			"f16" | "float16" => Ok(Self::F16),
			"f32" | "float32" => Ok(Self::F32),
			"f64" | "float64" => Ok(Self::F64),
			"i32" | "int32" => Ok(Self::I32),
			"i64" | "int64" => Ok(Self::I64),
			_ => Err(UnknownDTypeError),
		}
	}
}

impl std::fmt::Display for DType {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Self::F16 => write!(f, "f16"),
			Self::F32 => write!(f, "f32"),
			Self::F64 => write!(f, "f64"),
			Self::I32 => write!(f, "i32"),
			Self::I64 => write!(f, "i64"),
		}
	}
}

//--------------------------------------------------------------------------------------------------

/// A single element value, wide enough to hold any supported dtype without loss.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Scalar {
	Int(i64),
	Float(f64),
}

impl Scalar {
	pub fn to_f64(self) -> f64 {
		match self {
			Self::Int(v) => v as f64,
			Self::Float(v) => v,
		}
	}

	pub fn to_i64(self) -> i64 {
		match self {
			Self::Int(v) => v,
			Self::Float(v) => v as i64,
		}
	}

	/// Converts the value to `dtype` with the same rounding the device applies on store.
	pub fn cast(self, dtype: DType) -> Self {
		match dtype {
			DType::F16 | DType::F32 | DType::F64 => Self::Float(dtype.round(self.to_f64())),
			DType::I32 => Self::Int(i64::from(self.to_i64() as i32)),
			DType::I64 => Self::Int(self.to_i64()),
		}
	}
}

//--------------------------------------------------------------------------------------------------

pub trait FromToF64 {
	fn from_f64(val: f64) -> Self;
	fn to_f64(&self) -> f64;
}

/// Native Rust types that can be stored in a tensor.
pub trait HasDType: Copy + Send + Sync + 'static + FromToF64 {
	const dtype: DType;

	fn to_scalar(self) -> Scalar;
	fn from_scalar(val: Scalar) -> Self;

	fn write_le(self, out: &mut [u8]);
	fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_has_dtype {
	($t:ty, $dtype:expr, $variant:ident, $to:expr, $from:expr) => {
		impl HasDType for $t {
			const dtype: DType = $dtype;

			fn to_scalar(self) -> Scalar {
				Scalar::$variant($to(self))
			}

			fn from_scalar(val: Scalar) -> Self {
				$from(val)
			}

			fn write_le(self, out: &mut [u8]) {
				out.copy_from_slice(&self.to_le_bytes());
			}

			fn read_le(bytes: &[u8]) -> Self {
				let mut buf = [0_u8; std::mem::size_of::<$t>()];
				buf.copy_from_slice(bytes);
				<$t>::from_le_bytes(buf)
			}
		}
	};
}

impl_has_dtype!(f16, DType::F16, Float, |v: f16| v.to_f64(), |v: Scalar| {
	f16::from_f64(v.to_f64())
});
impl_has_dtype!(f32, DType::F32, Float, f64::from, |v: Scalar| v.to_f64() as f32);
impl_has_dtype!(f64, DType::F64, Float, |v: f64| v, |v: Scalar| v.to_f64());
impl_has_dtype!(i32, DType::I32, Int, i64::from, |v: Scalar| v.to_i64() as i32);
impl_has_dtype!(i64, DType::I64, Int, |v: i64| v, |v: Scalar| v.to_i64());

impl FromToF64 for f16 {
	fn from_f64(val: f64) -> Self {
		f16::from_f64(val)
	}

	fn to_f64(&self) -> f64 {
		f16::to_f64(*self)
	}
}

#[allow(clippy::use_self)]
impl FromToF64 for f32 {
	fn from_f64(val: f64) -> Self {
		val as f32
	}

	fn to_f64(&self) -> f64 {
		f64::from(*self)
	}
}

#[allow(clippy::use_self)]
impl FromToF64 for f64 {
	fn from_f64(val: f64) -> Self {
		val
	}

	fn to_f64(&self) -> f64 {
		*self
	}
}

impl FromToF64 for i32 {
	fn from_f64(val: f64) -> Self {
		val as i32
	}

	fn to_f64(&self) -> f64 {
		f64::from(*self)
	}
}

impl FromToF64 for i64 {
	fn from_f64(val: f64) -> Self {
		val as i64
	}

	fn to_f64(&self) -> f64 {
		*self as f64
	}
}

//--------------------------------------------------------------------------------------------------


//--------------------------------------------------------------------------------------------------
