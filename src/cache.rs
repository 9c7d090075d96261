//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::sync::{Arc, PoisonError, RwLock};

use hashbrown::HashTable;

use crate::ErrPack;
use crate::compiler::{build_keyed, module_key};
use crate::error::BuildError;
use crate::lower::schedule::{BuildConfig, Target};
use crate::module::KernelModule;
use crate::op::OpDescriptor;
use crate::util::hasher::RandomState;

//--------------------------------------------------------------------------------------------------

pub struct KernelMapEntry {
	pub key_hash: u64,
	pub value: Arc<KernelModule>,
}

pub struct KernelMap {
	map: HashTable<KernelMapEntry>,
}

impl Default for KernelMap {
	fn default() -> Self {
		Self::new()
	}
}

impl KernelMap {
	pub fn new() -> Self {
		Self { map: HashTable::new() }
	}

	#[inline(never)]
	pub fn find(&self, key: &[u64], key_hash: u64) -> Option<&KernelMapEntry> {
		self.map.find(key_hash, |item| item.key_hash == key_hash && item.value.key() == key)
	}

	#[inline(never)]
	pub fn insert_unique(&mut self, key_hash: u64, value: Arc<KernelModule>) -> &KernelMapEntry {
		self.map
			.insert_unique(key_hash, KernelMapEntry { key_hash, value }, |entry| entry.key_hash)
			.into_mut()
	}

	pub fn len(&self) -> usize {
		self.map.len()
	}

	pub fn is_empty(&self) -> bool {
		self.map.is_empty()
	}
}

//--------------------------------------------------------------------------------------------------

/// Modules keyed by descriptor signature, target and build configuration.
///
/// Building the same operator instance twice returns the same `Arc<KernelModule>`.
pub struct KernelCache {
	state: RandomState,
	map: RwLock<KernelMap>,
}

impl Default for KernelCache {
	fn default() -> Self {
		Self::new()
	}
}

impl KernelCache {
	pub fn new() -> Self {
		Self { state: RandomState::new(), map: RwLock::new(KernelMap::new()) }
	}

	pub fn get_or_build(
		&self,
		desc: &OpDescriptor,
		target: &Target,
		config: &BuildConfig,
	) -> Result<Arc<KernelModule>, ErrPack<BuildError>> {
		let key = module_key(desc, target, config);
		let key_hash = self.state.hash_key(&key);

		{
			let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
			if let Some(entry) = map.find(&key, key_hash) {
				log::trace!("kernel cache hit: {}", entry.value.name());
				return Ok(entry.value.clone());
			}
		}

		let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
		// another thread may have built it while we were waiting for the lock
		if let Some(entry) = map.find(&key, key_hash) {
			return Ok(entry.value.clone());
		}
		let id = map.len() + 1;
		let module = Arc::new(build_keyed(id, desc, target, config, key, key_hash)?);
		let entry = map.insert_unique(key_hash, module);
		Ok(entry.value.clone())
	}

	pub fn len(&self) -> usize {
		self.map.read().unwrap_or_else(PoisonError::into_inner).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

//--------------------------------------------------------------------------------------------------
