//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::lower::ir::LoweredModule;
use crate::lower::schedule::Target;
use crate::op::{OpKind, TensorSpec};

//--------------------------------------------------------------------------------------------------

/// Launch signature of a kernel module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
	pub inputs: Vec<TensorSpec>,
	pub output: TensorSpec,
}

/// A built operator instance. Immutable; can be launched any number of times.
#[derive(Debug)]
pub struct KernelModule {
	pub(crate) id: usize,
	pub(crate) name: String,
	pub(crate) kind: OpKind,
	pub(crate) signature: Signature,
	pub(crate) target: Target,
	pub(crate) lowered: LoweredModule,
	pub(crate) kernel_source: String,
	pub(crate) host_stub: String,
	pub(crate) key: Box<[u64]>,
	pub(crate) key_hash: u64,
}

impl KernelModule {
	/// Sequence number assigned by the `KernelCache` that built the module, starting at 1.
	/// 0 for modules built without a cache.
	pub fn id(&self) -> usize {
		self.id
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn kind(&self) -> OpKind {
		self.kind
	}

	pub fn signature(&self) -> &Signature {
		&self.signature
	}

	pub fn target(&self) -> &Target {
		&self.target
	}

	pub fn lowered(&self) -> &LoweredModule {
		&self.lowered
	}

	/// Generated CUDA source of all stages.
	pub fn source(&self) -> &str {
		&self.kernel_source
	}

	/// Generated C++ host launch stub.
	pub fn host_stub(&self) -> &str {
		&self.host_stub
	}

	pub fn is_fused(&self) -> bool {
		self.lowered.fused
	}

	pub fn stage_count(&self) -> usize {
		self.lowered.stages.len()
	}

	pub fn key(&self) -> &[u64] {
		&self.key
	}

	pub fn key_hash(&self) -> u64 {
		self.key_hash
	}
}
