//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::ErrPack;
use crate::codegen;
use crate::error::BuildError;
use crate::lower::lower;
use crate::lower::schedule::{BuildConfig, Target};
use crate::module::{KernelModule, Signature};
use crate::op::OpDescriptor;
use crate::util::hasher::RandomState;

//--------------------------------------------------------------------------------------------------

/// Cache key of a build: descriptor signature, target and build configuration.
pub fn module_key(desc: &OpDescriptor, target: &Target, config: &BuildConfig) -> Vec<u64> {
	let mut key = desc.key();
	key.extend_from_slice(&target.key());
	key.extend_from_slice(&config.key());
	key
}

/// Lowers `desc`, generates its sources and packs them into a module.
/// Never returns a partially built module.
///
/// Modules built outside of a `KernelCache` have id 0.
pub fn build_with_config(
	desc: &OpDescriptor,
	target: &Target,
	config: &BuildConfig,
) -> Result<KernelModule, ErrPack<BuildError>> {
	let key = module_key(desc, target, config);
	let key_hash = RandomState::new().hash_key(&key);
	build_keyed(0, desc, target, config, key, key_hash)
}

pub(crate) fn build_keyed(
	id: usize,
	desc: &OpDescriptor,
	target: &Target,
	config: &BuildConfig,
	key: Vec<u64>,
	key_hash: u64,
) -> Result<KernelModule, ErrPack<BuildError>> {
	let lowered = lower(desc, target, config)?;
	let name = format!("kfuse_{}_{key_hash:016x}", desc.kind().name());
	let source = codegen::generate(&name, &lowered, target)?;

	log::debug!(
		"built module #{id} {name} for {target}: {}, {} stage(s)",
		desc.describe(),
		lowered.stages.len()
	);
	Ok(KernelModule {
		id,
		name,
		kind: desc.kind(),
		signature: Signature { inputs: desc.inputs().to_vec(), output: desc.output().clone() },
		target: target.clone(),
		lowered,
		kernel_source: source.kernel,
		host_stub: source.host_stub,
		key: key.into(),
		key_hash,
	})
}
