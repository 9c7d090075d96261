//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::sync::Arc;

use crate::ErrPack;
use crate::cache::KernelCache;
use crate::error::{BuildError, LaunchError};
use crate::lower::ir::BufferKind;
use crate::lower::schedule::{BuildConfig, Target};
use crate::module::{KernelModule, Signature};
use crate::op::{OpDescriptor, OpKind, TensorSpec};
use crate::tensor::Tensor;

pub mod device;
pub mod host;
pub mod interp;

use device::{Device, DeviceBuffer};
use host::HostDevice;

//--------------------------------------------------------------------------------------------------

/// A device with a kernel cache and the build settings used for it.
pub struct Runtime {
	device: Arc<dyn Device>,
	cache: KernelCache,
	target: Target,
	config: BuildConfig,
}

impl Runtime {
	pub fn new(device: Arc<dyn Device>, target: Target, config: BuildConfig) -> Self {
		Self { device, cache: KernelCache::new(), target, config }
	}

	/// Host device, default target, configuration from the environment.
	pub fn host() -> Self {
		Self::new(HostDevice::new(), Target::default(), BuildConfig::from_env())
	}

	pub fn device(&self) -> &dyn Device {
		self.device.as_ref()
	}

	pub fn cache(&self) -> &KernelCache {
		&self.cache
	}

	pub fn target(&self) -> &Target {
		&self.target
	}

	pub fn config(&self) -> &BuildConfig {
		&self.config
	}

	/// Builds `desc`, or returns the module built for an equal descriptor before.
	pub fn build(&self, desc: &OpDescriptor) -> Result<Arc<KernelModule>, ErrPack<BuildError>> {
		self.cache.get_or_build(desc, &self.target, &self.config)
	}

	pub fn build_op(&self, kind: OpKind, inputs: &[TensorSpec]) -> Result<Arc<KernelModule>, ErrPack<BuildError>> {
		let desc = OpDescriptor::new(kind, inputs)?;
		self.build(&desc)
	}

	pub fn launch(
		&self,
		module: &KernelModule,
		inputs: &[&Tensor],
		output: &mut Tensor,
	) -> Result<(), ErrPack<LaunchError>> {
		execute(self.device.as_ref(), module, inputs, output)
	}
}

//--------------------------------------------------------------------------------------------------

/// Checks the arguments against the module signature. Does not touch the device.
pub fn check_signature(
	signature: &Signature,
	inputs: &[&Tensor],
	output: &Tensor,
) -> Result<(), ErrPack<LaunchError>> {
	if inputs.len() != signature.inputs.len() {
		return Err(ErrPack::with_message(
			LaunchError::ArgCount,
			format!("expected {} inputs, got {}", signature.inputs.len(), inputs.len()),
		));
	}
	let args = inputs.iter().copied().enumerate().map(|(i, t)| (format!("input {i}"), t, &signature.inputs[i]));
	for (what, tensor, spec) in args.chain(std::iter::once(("output".to_string(), output, &signature.output))) {
		if tensor.dtype() != spec.dtype {
			return Err(ErrPack::with_message(
				LaunchError::DTypeMismatch,
				format!("{what}: expected {}, got {}", spec.dtype, tensor.dtype()),
			));
		}
		if tensor.dims() != spec.dims() {
			return Err(LaunchError::shape_mismatch(format!(
				"{what}: expected shape {}, got {}",
				spec.shape,
				tensor.shape()
			)));
		}
	}
	Ok(())
}

/// Runs every stage of `module` on `device` and writes the result into `output`.
///
/// The arguments are validated before anything is allocated. Device buffers are released on every
/// path. On error, `output` keeps its previous contents.
pub fn execute(
	device: &dyn Device,
	module: &KernelModule,
	inputs: &[&Tensor],
	output: &mut Tensor,
) -> Result<(), ErrPack<LaunchError>> {
	check_signature(module.signature(), inputs, output)?;
	let lowered = module.lowered();

	let mut buffers: Vec<DeviceBuffer> = Vec::with_capacity(lowered.buffers.len());
	for decl in &lowered.buffers {
		buffers.push(device.new_buffer(decl.dtype, decl.elems)?);
	}
	for (decl, buffer) in lowered.buffers.iter().zip(&buffers) {
		if let BufferKind::Input(i) = decl.kind {
			let Some(tensor) = inputs.get(i) else {
				return Err(LaunchError::device_error(format!("module has no argument for input {i}")));
			};
			device.upload(buffer, tensor.bytes())?;
		}
	}

	let refs: Vec<&DeviceBuffer> = buffers.iter().collect();
	for stage in &lowered.stages {
		device.run_stage(stage, &refs)?;
	}
	device.synchronize()?;

	let out = lowered
		.output_buffer()
		.and_then(|i| refs.get(i))
		.ok_or_else(|| LaunchError::device_error("module has no output buffer"))?;
	let data = device.download(out)?;
	output.overwrite(data)?;

	log::debug!("launched {} on {}: {} stage(s)", module.name(), device.name(), lowered.stages.len());
	Ok(())
}
