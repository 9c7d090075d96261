//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::sync::Arc;

use rayon::prelude::*;

use crate::ErrPack;
use crate::dtype::DType;
use crate::error::{DevBufAllocFailedError, LaunchError};
use crate::lower::ir::Stage;
use crate::runtime::device::{Device, DeviceBuffer, MemoryPool};
use crate::runtime::interp::BlockInterpreter;

//--------------------------------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostDeviceConfig {
	/// Worker threads. 0 runs blocks on the global rayon pool.
	pub threads: usize,

	/// Memory limit in bytes. `None` is unlimited.
	pub capacity: Option<usize>,

	pub max_threads_per_block: usize,
	pub max_grid: usize,
}

impl Default for HostDeviceConfig {
	fn default() -> Self {
		Self {
			threads: 0,
			capacity: None,
			max_threads_per_block: 1024,
			max_grid: i32::MAX as usize,
		}
	}
}

/// Executes stages on the CPU with the grid and block decomposition of the CUDA launch.
///
/// Blocks run in parallel on a rayon pool. Threads of a block run in sequence.
pub struct HostDevice {
	name: String,
	pool: Option<rayon::ThreadPool>,
	memory: Arc<MemoryPool>,
	config: HostDeviceConfig,
}

impl HostDevice {
	/// Unlimited memory, blocks on the global rayon pool.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::from_parts(None, HostDeviceConfig::default()))
	}

	pub fn with_config(config: HostDeviceConfig) -> Result<Arc<Self>, ErrPack<LaunchError>> {
		let pool = if config.threads == 0 {
			None
		} else {
			let pool = rayon::ThreadPoolBuilder::new()
				.num_threads(config.threads)
				.thread_name(|i| format!("kfuse-host-{i}"))
				.build()
				.map_err(|e| {
					let mut err = LaunchError::device_error("failed to start host device workers");
					if let Some(extra) = err.extra.as_mut() {
						extra.nested = Some(Box::new(e));
					}
					err
				})?;
			Some(pool)
		};
		Ok(Arc::new(Self::from_parts(pool, config)))
	}

	fn from_parts(pool: Option<rayon::ThreadPool>, config: HostDeviceConfig) -> Self {
		let threads = pool.as_ref().map_or_else(rayon::current_num_threads, rayon::ThreadPool::current_num_threads);
		Self {
			name: format!("host({threads} workers)"),
			pool,
			memory: Arc::new(MemoryPool::new(config.capacity)),
			config,
		}
	}

	pub fn config(&self) -> &HostDeviceConfig {
		&self.config
	}

	/// Number of buffers allocated since the device was created.
	pub fn allocations(&self) -> usize {
		self.memory.allocations()
	}

	fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
		match &self.pool {
			Some(pool) => pool.install(f),
			None => f(),
		}
	}
}

impl Device for HostDevice {
	fn name(&self) -> &str {
		&self.name
	}

	fn new_buffer(&self, dtype: DType, elems: usize) -> Result<DeviceBuffer, DevBufAllocFailedError> {
		let bytes = dtype.array_bytes(elems).ok_or(DevBufAllocFailedError)?;
		self.memory.reserve(bytes).inspect_err(|_| {
			log::warn!(
				"host device: allocation of {bytes} bytes failed, {} of {:?} in use",
				self.memory.allocated(),
				self.config.capacity
			);
		})?;
		Ok(DeviceBuffer::new_zeroed(dtype, elems, self.memory.clone()))
	}

	fn upload(&self, dst: &DeviceBuffer, src: &[u8]) -> Result<(), ErrPack<LaunchError>> {
		dst.write_le(src).ok_or_else(|| {
			LaunchError::device_error(format!(
				"upload of {} bytes into a buffer of {} bytes",
				src.len(),
				dst.bytes()
			))
		})
	}

	fn download(&self, src: &DeviceBuffer) -> Result<Vec<u8>, ErrPack<LaunchError>> {
		Ok(src.read_le())
	}

	fn run_stage(&self, stage: &Stage, buffers: &[&DeviceBuffer]) -> Result<(), ErrPack<LaunchError>> {
		let launch = stage.launch;
		if launch.block == 0
			|| launch.grid == 0
			|| launch.block > self.config.max_threads_per_block
			|| launch.grid > self.config.max_grid
		{
			return Err(LaunchError::device_error(format!(
				"invalid launch configuration for stage {}: grid {}, block {}",
				stage.name, launch.grid, launch.block
			)));
		}
		log::trace!("running stage {}: grid {}, block {}", stage.name, launch.grid, launch.block);
		self.install(|| {
			(0..launch.grid)
				.into_par_iter()
				.try_for_each(|block_idx| BlockInterpreter::new(stage, buffers, block_idx).run())
		})
	}

	fn synchronize(&self) -> Result<(), ErrPack<LaunchError>> {
		// run_stage() returns after all blocks finished
		Ok(())
	}

	fn allocated_bytes(&self) -> usize {
		self.memory.allocated()
	}
}
