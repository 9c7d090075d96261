//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::borrow::Cow;

use crate::ErrPack;

//--------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ShapeMismatchError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct DevBufAllocFailedError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct UnknownDTypeError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct InvalidShapeError;

//--------------------------------------------------------------------------------------------------

/// Errors reported by `build()`. A failed build never produces a module.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BuildError {
	UnsupportedDType,
	InvalidShape,
	InvalidAxis,
	ShapeMismatch,
	IndexRankMismatch,
	UnsupportedOnTarget,
	FusionConflict,
	WorkspaceTooLarge,
	ScheduleFailed,
	CodegenFailed,
}

impl BuildError {
	#[cold]
	#[inline(never)]
	pub fn unsupported_dtype(msg: impl Into<Cow<'static, str>>) -> ErrPack<Self> {
		ErrPack::with_message(Self::UnsupportedDType, msg)
	}

	#[cold]
	#[inline(never)]
	pub fn invalid_axis(axis: isize, rank: usize) -> ErrPack<Self> {
		ErrPack::with_message(Self::InvalidAxis, format!("axis {axis} is out of range for rank {rank}"))
	}

	#[cold]
	#[inline(never)]
	pub fn shape_mismatch(msg: impl Into<Cow<'static, str>>) -> ErrPack<Self> {
		ErrPack::with_message(Self::ShapeMismatch, msg)
	}

	#[cold]
	#[inline(never)]
	pub fn schedule_failed(msg: impl Into<Cow<'static, str>>) -> ErrPack<Self> {
		ErrPack::with_message(Self::ScheduleFailed, msg)
	}
}

impl From<ShapeMismatchError> for ErrPack<BuildError> {
	fn from(_: ShapeMismatchError) -> Self {
		Self::new(BuildError::ShapeMismatch)
	}
}

impl From<InvalidShapeError> for ErrPack<BuildError> {
	fn from(_: InvalidShapeError) -> Self {
		Self::with_message(
			BuildError::InvalidShape,
			"dimensions must be positive and the element count must fit in usize",
		)
	}
}

impl From<UnknownDTypeError> for ErrPack<BuildError> {
	fn from(_: UnknownDTypeError) -> Self {
		Self::new(BuildError::UnsupportedDType)
	}
}

impl From<askama::Error> for ErrPack<BuildError> {
	fn from(err: askama::Error) -> Self {
		Self {
			code: BuildError::CodegenFailed,
			extra: Some(Box::new(crate::ErrExtra {
				message: Cow::from("failed to render kernel template"),
				nested: Some(Box::new(err)),
			})),
		}
	}
}

//--------------------------------------------------------------------------------------------------

/// Errors reported by `launch()`.
///
/// `ArgCount`, `ShapeMismatch` and `DTypeMismatch` are detected before any device work starts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LaunchError {
	ArgCount,
	ShapeMismatch,
	DTypeMismatch,
	OutOfBounds,
	DeviceExecution,
	DevBufAllocFailed,
}

impl LaunchError {
	#[cold]
	#[inline(never)]
	pub fn out_of_bounds(what: &str, value: i64, extent: usize) -> ErrPack<Self> {
		ErrPack::with_message(
			Self::OutOfBounds,
			format!("{what} = {value} is out of range [0, {extent})"),
		)
	}

	#[cold]
	#[inline(never)]
	pub fn device_error(msg: impl Into<Cow<'static, str>>) -> ErrPack<Self> {
		ErrPack::with_message(Self::DeviceExecution, msg)
	}

	#[cold]
	#[inline(never)]
	pub fn shape_mismatch(msg: impl Into<Cow<'static, str>>) -> ErrPack<Self> {
		ErrPack::with_message(Self::ShapeMismatch, msg)
	}
}

impl From<DevBufAllocFailedError> for ErrPack<LaunchError> {
	fn from(_: DevBufAllocFailedError) -> Self {
		Self::with_message(LaunchError::DevBufAllocFailed, "device buffer allocation failed")
	}
}

impl From<ShapeMismatchError> for ErrPack<LaunchError> {
	fn from(_: ShapeMismatchError) -> Self {
		Self::new(LaunchError::ShapeMismatch)
	}
}

//--------------------------------------------------------------------------------------------------

/// Errors of host tensor construction and access.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TensorError {
	InvalidShape,
	InvalidBufferSize,
	DTypeMismatch,
	UnknownDType,
	IndexOutOfBounds,
}

impl From<UnknownDTypeError> for ErrPack<TensorError> {
	fn from(_: UnknownDTypeError) -> Self {
		Self::new(TensorError::UnknownDType)
	}
}

impl From<InvalidShapeError> for ErrPack<TensorError> {
	fn from(_: InvalidShapeError) -> Self {
		Self::new(TensorError::InvalidShape)
	}
}

impl From<ErrPack<TensorError>> for ErrPack<LaunchError> {
	fn from(err: ErrPack<TensorError>) -> Self {
		let code = match err.code {
			TensorError::DTypeMismatch => LaunchError::DTypeMismatch,
			TensorError::IndexOutOfBounds => LaunchError::OutOfBounds,
			_ => LaunchError::ShapeMismatch,
		};
		Self { code, extra: err.extra }
	}
}

//--------------------------------------------------------------------------------------------------
