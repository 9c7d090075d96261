//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

#![allow(non_snake_case)]
#![allow(non_upper_case_globals)]
// clippy
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::cast_lossless)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic_in_result_fn)]
#![warn(clippy::panic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::comparison_chain)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::many_single_char_names)]
#![allow(clippy::inline_always)]
#![allow(clippy::tabs_in_doc_comments)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::similar_names)]

use std::borrow::Cow;

pub mod cache;
pub mod codegen;
pub mod compiler;
pub mod dtype;
pub mod error;
pub mod lower;
pub mod module;
pub mod op;
pub mod reference;
pub mod rng;
pub mod runtime;
pub mod shape;
pub mod tensor;
pub mod util;

#[cfg(test)]
mod tests;

pub use dtype::{DType, HasDType};
pub use error::{BuildError, LaunchError, TensorError};
pub use lower::schedule::{BuildConfig, FusionMode, Target};
pub use module::KernelModule;
pub use op::{OpDescriptor, OpKind, TensorSpec};
pub use runtime::Runtime;
pub use runtime::host::HostDevice;
pub use tensor::Tensor;

//--------------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct ErrExtra {
	pub message: Cow<'static, str>,
	pub nested: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct ErrPack<Code: Copy + std::fmt::Debug> {
	pub code: Code,
	pub extra: Option<Box<ErrExtra>>,
}

impl<Code: Copy + std::fmt::Debug> ErrPack<Code> {
	pub fn new(code: Code) -> Self {
		Self { code, extra: None }
	}

	#[cold]
	#[inline(never)]
	pub fn with_message(code: Code, message: impl Into<Cow<'static, str>>) -> Self {
		Self {
			code,
			extra: Some(Box::new(ErrExtra { message: message.into(), nested: None })),
		}
	}
}

impl<Code: Copy + std::fmt::Debug> std::error::Error for ErrPack<Code> {
}

impl<Code: Copy + std::fmt::Debug> std::fmt::Display for ErrPack<Code> {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		let code = self.code;
		write!(f, "(ErrPack: code={code:?}")?;
		if let Some(ref extra) = self.extra {
			let msg = extra.message.as_ref();
			if !msg.is_empty() {
				write!(f, ", message={msg}")?;
			}
			if let Some(nested) = &extra.nested {
				write!(f, ", nested={nested:?}")?;
			}
		}
		write!(f, ")")
	}
}

//--------------------------------------------------------------------------------------------------

/// Builds a kernel module for one operator instance with the default build configuration.
///
/// The result is not cached. Use `Runtime::build()` to reuse modules across launches.
pub fn build(
	kind: OpKind,
	inputs: &[TensorSpec],
	target: &Target,
) -> Result<KernelModule, ErrPack<BuildError>> {
	let desc = OpDescriptor::new(kind, inputs)?;
	compiler::build_with_config(&desc, target, &BuildConfig::default())
}

/// Launches `module` on a fresh host device and blocks until the output is written.
///
/// `output` is overwritten in place. On error it is left untouched.
pub fn launch(
	module: &KernelModule,
	inputs: &[&Tensor],
	output: &mut Tensor,
) -> Result<(), ErrPack<LaunchError>> {
	let device = HostDevice::new();
	runtime::execute(device.as_ref(), module, inputs, output)
}

//--------------------------------------------------------------------------------------------------
