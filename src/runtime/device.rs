//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use half::f16;

use crate::ErrPack;
use crate::dtype::{DType, Scalar};
use crate::error::{DevBufAllocFailedError, LaunchError};
use crate::lower::ir::Stage;

//--------------------------------------------------------------------------------------------------

pub trait Device: Send + Sync {
	fn name(&self) -> &str;

	/// Allocates a zero-initialized buffer of `elems` elements.
	fn new_buffer(&self, dtype: DType, elems: usize) -> Result<DeviceBuffer, DevBufAllocFailedError>;

	/// Copies little-endian host data into `dst`. `src` must have exactly `dst.bytes()` bytes.
	fn upload(&self, dst: &DeviceBuffer, src: &[u8]) -> Result<(), ErrPack<LaunchError>>;

	fn download(&self, src: &DeviceBuffer) -> Result<Vec<u8>, ErrPack<LaunchError>>;

	/// Runs one stage. `buffers` is indexed by the buffer ids the stage uses.
	fn run_stage(&self, stage: &Stage, buffers: &[&DeviceBuffer]) -> Result<(), ErrPack<LaunchError>>;

	fn synchronize(&self) -> Result<(), ErrPack<LaunchError>>;

	/// Bytes held by live buffers.
	fn allocated_bytes(&self) -> usize;
}

//--------------------------------------------------------------------------------------------------

/// Memory accounting shared by a device and its buffers.
#[derive(Debug, Default)]
pub struct MemoryPool {
	allocated: AtomicUsize,
	allocations: AtomicUsize,
	capacity: Option<usize>,
}

impl MemoryPool {
	pub fn new(capacity: Option<usize>) -> Self {
		Self { allocated: AtomicUsize::new(0), allocations: AtomicUsize::new(0), capacity }
	}

	pub fn reserve(&self, bytes: usize) -> Result<(), DevBufAllocFailedError> {
		let capacity = self.capacity.unwrap_or(usize::MAX);
		self.allocated
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
				current.checked_add(bytes).filter(|&total| total <= capacity)
			})
			.map_err(|_| DevBufAllocFailedError)?;
		self.allocations.fetch_add(1, Ordering::Relaxed);
		Ok(())
	}

	pub fn release(&self, bytes: usize) {
		self.allocated.fetch_sub(bytes, Ordering::AcqRel);
	}

	pub fn allocated(&self) -> usize {
		self.allocated.load(Ordering::Acquire)
	}

	/// Number of successful allocations so far.
	pub fn allocations(&self) -> usize {
		self.allocations.load(Ordering::Relaxed)
	}
}

//--------------------------------------------------------------------------------------------------

enum Cells {
	B16(Box<[AtomicU16]>),
	B32(Box<[AtomicU32]>),
	B64(Box<[AtomicU64]>),
}

/// Device memory made of atomic cells holding the raw bits of the elements.
///
/// Every access is bounds checked. Out-of-range accesses return `None`.
pub struct DeviceBuffer {
	dtype: DType,
	elems: usize,
	cells: Cells,
	memory: Arc<MemoryPool>,
}

impl DeviceBuffer {
	/// `memory` must already account for `dtype.bytes() * elems` bytes.
	/// They are released when the buffer is dropped.
	pub fn new_zeroed(dtype: DType, elems: usize, memory: Arc<MemoryPool>) -> Self {
		let cells = match dtype.bytes() {
			2 => Cells::B16((0..elems).map(|_| AtomicU16::new(0)).collect()),
			4 => Cells::B32((0..elems).map(|_| AtomicU32::new(0)).collect()),
			_ => Cells::B64((0..elems).map(|_| AtomicU64::new(0)).collect()),
		};
		Self { dtype, elems, cells, memory }
	}

	pub fn dtype(&self) -> DType {
		self.dtype
	}

	pub fn elems(&self) -> usize {
		self.elems
	}

	pub fn bytes(&self) -> usize {
		self.elems * self.dtype.bytes()
	}

	fn load_bits(&self, i: usize) -> Option<u64> {
		match &self.cells {
			Cells::B16(c) => c.get(i).map(|a| u64::from(a.load(Ordering::Relaxed))),
			Cells::B32(c) => c.get(i).map(|a| u64::from(a.load(Ordering::Relaxed))),
			Cells::B64(c) => c.get(i).map(|a| a.load(Ordering::Relaxed)),
		}
	}

	fn store_bits(&self, i: usize, bits: u64) -> Option<()> {
		match &self.cells {
			Cells::B16(c) => c.get(i).map(|a| a.store(bits as u16, Ordering::Relaxed)),
			Cells::B32(c) => c.get(i).map(|a| a.store(bits as u32, Ordering::Relaxed)),
			Cells::B64(c) => c.get(i).map(|a| a.store(bits, Ordering::Relaxed)),
		}
	}

	pub fn load(&self, i: usize) -> Option<Scalar> {
		self.load_bits(i).map(|bits| from_bits(self.dtype, bits))
	}

	/// Stores `val` rounded to the element type.
	pub fn store(&self, i: usize, val: Scalar) -> Option<()> {
		self.store_bits(i, to_bits(self.dtype, val))
	}

	/// Atomically adds `val` to element `i`. The sum is rounded to the element type.
	pub fn atomic_add(&self, i: usize, val: Scalar) -> Option<()> {
		let dtype = self.dtype;
		let add = |bits: u64| to_bits(dtype, add_scalars(from_bits(dtype, bits), val));
		match &self.cells {
			Cells::B16(c) => {
				let cell = c.get(i)?;
				let mut old = cell.load(Ordering::Relaxed);
				loop {
					let new = add(u64::from(old)) as u16;
					match cell.compare_exchange_weak(old, new, Ordering::Relaxed, Ordering::Relaxed) {
						Ok(_) => break,
						Err(current) => old = current,
					}
				}
			},
			Cells::B32(c) => {
				let cell = c.get(i)?;
				let mut old = cell.load(Ordering::Relaxed);
				loop {
					let new = add(u64::from(old)) as u32;
					match cell.compare_exchange_weak(old, new, Ordering::Relaxed, Ordering::Relaxed) {
						Ok(_) => break,
						Err(current) => old = current,
					}
				}
			},
			Cells::B64(c) => {
				let cell = c.get(i)?;
				let mut old = cell.load(Ordering::Relaxed);
				loop {
					match cell.compare_exchange_weak(old, add(old), Ordering::Relaxed, Ordering::Relaxed) {
						Ok(_) => break,
						Err(current) => old = current,
					}
				}
			},
		}
		Some(())
	}

	/// Fills the buffer from little-endian bytes. Returns `None` if the size doesn't match.
	pub fn write_le(&self, src: &[u8]) -> Option<()> {
		let elem_bytes = self.dtype.bytes();
		if src.len() != self.bytes() {
			return None;
		}
		for (i, chunk) in src.chunks_exact(elem_bytes).enumerate() {
			let mut buf = [0_u8; 8];
			buf[..elem_bytes].copy_from_slice(chunk);
			self.store_bits(i, u64::from_le_bytes(buf))?;
		}
		Some(())
	}

	pub fn read_le(&self) -> Vec<u8> {
		let elem_bytes = self.dtype.bytes();
		let mut result = Vec::with_capacity(self.bytes());
		for i in 0..self.elems {
			let bits = self.load_bits(i).unwrap_or(0);
			result.extend_from_slice(&bits.to_le_bytes()[..elem_bytes]);
		}
		result
	}
}

impl Drop for DeviceBuffer {
	fn drop(&mut self) {
		self.memory.release(self.bytes());
	}
}

impl std::fmt::Debug for DeviceBuffer {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "DeviceBuffer({}[{}])", self.dtype, self.elems)
	}
}

//--------------------------------------------------------------------------------------------------

fn to_bits(dtype: DType, val: Scalar) -> u64 {
	match dtype {
		DType::F16 => u64::from(f16::from_f64(val.to_f64()).to_bits()),
		DType::F32 => u64::from((val.to_f64() as f32).to_bits()),
		DType::F64 => val.to_f64().to_bits(),
		DType::I32 => u64::from(val.to_i64() as i32 as u32),
		DType::I64 => val.to_i64() as u64,
	}
}

fn from_bits(dtype: DType, bits: u64) -> Scalar {
	match dtype {
		DType::F16 => Scalar::Float(f16::from_bits(bits as u16).to_f64()),
		DType::F32 => Scalar::Float(f64::from(f32::from_bits(bits as u32))),
		DType::F64 => Scalar::Float(f64::from_bits(bits)),
		DType::I32 => Scalar::Int(i64::from(bits as u32 as i32)),
		DType::I64 => Scalar::Int(bits as i64),
	}
}

fn add_scalars(a: Scalar, b: Scalar) -> Scalar {
	match (a, b) {
		(Scalar::Int(a), Scalar::Int(b)) => Scalar::Int(a.wrapping_add(b)),
		_ => Scalar::Float(a.to_f64() + b.to_f64()),
	}
}

//--------------------------------------------------------------------------------------------------


//--------------------------------------------------------------------------------------------------
