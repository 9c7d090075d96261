//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::ErrPack;
use crate::dtype::Scalar;
use crate::error::LaunchError;
use crate::lower::ir::{BinOp, BufId, Expr, Special, Stage, Stmt};
use crate::runtime::device::DeviceBuffer;

//--------------------------------------------------------------------------------------------------

/// Executes the threads of one block of a stage, one after another.
pub struct BlockInterpreter<'a> {
	stage: &'a Stage,
	buffers: &'a [&'a DeviceBuffer],
	vars: Vec<Scalar>,
	block_idx: i64,
	block_dim: i64,
	grid_dim: i64,
	thread_idx: i64,
}

impl<'a> BlockInterpreter<'a> {
	pub fn new(stage: &'a Stage, buffers: &'a [&'a DeviceBuffer], block_idx: usize) -> Self {
		Self {
			stage,
			buffers,
			vars: vec![Scalar::Int(0); stage.vars.len()],
			block_idx: block_idx as i64,
			block_dim: stage.launch.block as i64,
			grid_dim: stage.launch.grid as i64,
			thread_idx: 0,
		}
	}

	pub fn run(&mut self) -> Result<(), ErrPack<LaunchError>> {
		let stage = self.stage;
		for thread_idx in 0..self.block_dim {
			self.thread_idx = thread_idx;
			self.exec(&stage.body)?;
		}
		Ok(())
	}

	fn buffer(&self, buf: BufId) -> Result<&'a DeviceBuffer, ErrPack<LaunchError>> {
		self.buffers.get(buf).copied().ok_or_else(|| {
			LaunchError::device_error(format!("stage {} uses unbound buffer {buf}", self.stage.name))
		})
	}

	fn index(&self, buf: BufId, index: &Expr) -> Result<(&'a DeviceBuffer, usize), ErrPack<LaunchError>> {
		let buffer = self.buffer(buf)?;
		let i = self.eval(index)?.to_i64();
		match usize::try_from(i) {
			Ok(i) if i < buffer.elems() => Ok((buffer, i)),
			_ => Err(memory_fault(&self.stage.name, buf, i)),
		}
	}

	fn eval(&self, expr: &Expr) -> Result<Scalar, ErrPack<LaunchError>> {
		match expr {
			Expr::Int(v) => Ok(Scalar::Int(*v)),
			Expr::Float(v) => Ok(Scalar::Float(*v)),
			Expr::Var(var) => self.vars.get(*var).copied().ok_or_else(|| {
				LaunchError::device_error(format!("stage {} reads undeclared variable {var}", self.stage.name))
			}),
			Expr::Special(s) => Ok(Scalar::Int(match s {
				Special::ThreadIdx => self.thread_idx,
				Special::BlockIdx => self.block_idx,
				Special::BlockDim => self.block_dim,
				Special::GridDim => self.grid_dim,
			})),
			Expr::Load { buf, index } => {
				let (buffer, i) = self.index(*buf, index)?;
				buffer.load(i).ok_or_else(|| memory_fault(&self.stage.name, *buf, i as i64))
			},
			Expr::Bin(op, a, b) => {
				let a = self.eval(a)?;
				let b = self.eval(b)?;
				self.eval_bin(*op, a, b)
			},
			Expr::Cast(dtype, a) => Ok(self.eval(a)?.cast(*dtype)),
		}
	}

	fn eval_bin(&self, op: BinOp, a: Scalar, b: Scalar) -> Result<Scalar, ErrPack<LaunchError>> {
		if let (Scalar::Int(x), Scalar::Int(y)) = (a, b) {
			let v = match op {
				BinOp::Add => x.wrapping_add(y),
				BinOp::Sub => x.wrapping_sub(y),
				BinOp::Mul => x.wrapping_mul(y),
				BinOp::Div | BinOp::Rem if y == 0 => {
					return Err(LaunchError::device_error(format!(
						"integer division by zero in stage {}",
						self.stage.name
					)));
				},
				BinOp::Div => x.wrapping_div(y),
				BinOp::Rem => x.wrapping_rem(y),
			};
			return Ok(Scalar::Int(v));
		}
		let (x, y) = (a.to_f64(), b.to_f64());
		Ok(Scalar::Float(match op {
			BinOp::Add => x + y,
			BinOp::Sub => x - y,
			BinOp::Mul => x * y,
			BinOp::Div => x / y,
			BinOp::Rem => x % y,
		}))
	}

	fn set_var(&mut self, var: usize, value: Scalar) -> Result<(), ErrPack<LaunchError>> {
		let Some(slot) = self.vars.get_mut(var) else {
			return Err(LaunchError::device_error(format!(
				"stage {} writes undeclared variable {var}",
				self.stage.name
			)));
		};
		*slot = value;
		Ok(())
	}

	fn exec(&mut self, stmts: &[Stmt]) -> Result<(), ErrPack<LaunchError>> {
		for stmt in stmts {
			match stmt {
				Stmt::Let { var, value } | Stmt::Assign { var, value } => {
					let value = self.eval(value)?;
					self.set_var(*var, value)?;
				},
				Stmt::Store { buf, index, value } => {
					let value = self.eval(value)?;
					let (buffer, i) = self.index(*buf, index)?;
					buffer.store(i, value).ok_or_else(|| memory_fault(&self.stage.name, *buf, i as i64))?;
				},
				Stmt::AtomicAdd { buf, index, value } => {
					let value = self.eval(value)?;
					let (buffer, i) = self.index(*buf, index)?;
					buffer
						.atomic_add(i, value)
						.ok_or_else(|| memory_fault(&self.stage.name, *buf, i as i64))?;
				},
				Stmt::For { var, extent, body, .. } => {
					for k in 0..*extent {
						self.set_var(*var, Scalar::Int(k))?;
						self.exec(body)?;
					}
				},
				Stmt::GridStride { var, extent, body } => {
					let mut k = self.block_idx * self.block_dim + self.thread_idx;
					let step = self.grid_dim * self.block_dim;
					while k < *extent {
						self.set_var(*var, Scalar::Int(k))?;
						self.exec(body)?;
						k += step;
					}
				},
				Stmt::CheckIndex { value, extent, what } => {
					let v = self.eval(value)?.to_i64();
					if v < 0 || v >= *extent {
						return Err(LaunchError::out_of_bounds(what, v, *extent as usize));
					}
				},
			}
		}
		Ok(())
	}
}

#[cold]
#[inline(never)]
fn memory_fault(stage: &str, buf: BufId, index: i64) -> ErrPack<LaunchError> {
	LaunchError::device_error(format!("memory fault in stage {stage}: buffer {buf}, element {index}"))
}

//--------------------------------------------------------------------------------------------------
