//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::fmt::Write;

use crate::dtype::DType;
use crate::lower::ir::{BinOp, BufId, BufferKind, Expr, LoopKind, LoweredModule, Special, Stage, Stmt};

//--------------------------------------------------------------------------------------------------

/// Prints the body of one stage as CUDA C.
///
/// Half precision values are held in `float`: loads go through `__half2float()`
/// and stores through `__float2half()`.
pub struct BodyPrinter<'a> {
	module: &'a LoweredModule,
	stage: &'a Stage,
}

impl<'a> BodyPrinter<'a> {
	pub fn new(module: &'a LoweredModule, stage: &'a Stage) -> Self {
		Self { module, stage }
	}

	fn buf_name(&self, buf: BufId) -> &str {
		self.module.buffers.get(buf).map_or("?", |b| b.name.as_str())
	}

	fn buf_dtype(&self, buf: BufId) -> Option<DType> {
		self.module.buffers.get(buf).map(|b| b.dtype)
	}

	fn var_name(&self, var: usize) -> &str {
		self.stage.vars.get(var).map_or("?", |v| v.name.as_str())
	}

	pub fn expr(&self, expr: &Expr) -> String {
		match expr {
			Expr::Int(v) => {
				if i32::try_from(*v).is_ok() {
					format!("{v}")
				} else {
					format!("{v}LL")
				}
			},
			Expr::Float(v) => format!("{v:?}"),
			Expr::Var(var) => self.var_name(*var).to_string(),
			Expr::Special(s) => match s {
				Special::ThreadIdx => "(long long)threadIdx.x".to_string(),
				Special::BlockIdx => "(long long)blockIdx.x".to_string(),
				Special::BlockDim => "(long long)blockDim.x".to_string(),
				Special::GridDim => "(long long)gridDim.x".to_string(),
			},
			Expr::Load { buf, index } => {
				let load = format!("{}[{}]", self.buf_name(*buf), self.expr(index));
				if self.buf_dtype(*buf) == Some(DType::F16) {
					format!("__half2float({load})")
				} else {
					load
				}
			},
			Expr::Bin(op, a, b) => {
				let op = match op {
					BinOp::Add => "+",
					BinOp::Sub => "-",
					BinOp::Mul => "*",
					BinOp::Div => "/",
					BinOp::Rem => "%",
				};
				format!("({} {op} {})", self.expr(a), self.expr(b))
			},
			Expr::Cast(DType::F16, a) => format!("__half2float(__float2half({}))", self.expr(a)),
			Expr::Cast(dtype, a) => format!("(({})({}))", dtype.cuda_type(), self.expr(a)),
		}
	}

	/// Value to be written into a buffer of type `dtype`.
	fn stored_value(&self, dtype: Option<DType>, value: &Expr) -> String {
		if dtype != Some(DType::F16) {
			return self.expr(value);
		}
		match value {
			Expr::Cast(DType::F16, inner) => format!("__float2half({})", self.expr(inner)),
			_ => format!("__float2half({})", self.expr(value)),
		}
	}

	pub fn print<W: Write>(&self, w: &mut W) -> std::fmt::Result {
		self.print_stmts(w, &self.stage.body, 1)
	}

	fn print_stmts<W: Write>(&self, w: &mut W, stmts: &[Stmt], depth: usize) -> std::fmt::Result {
		for stmt in stmts {
			self.print_stmt(w, stmt, depth)?;
		}
		Ok(())
	}

	fn print_stmt<W: Write>(&self, w: &mut W, stmt: &Stmt, depth: usize) -> std::fmt::Result {
		let tab = "\t".repeat(depth);
		match stmt {
			Stmt::Let { var, value } => {
				let ctype = self.stage.vars.get(*var).map_or("long long", |v| v.dtype.cuda_type());
				writeln!(w, "{tab}{ctype} {} = {};", self.var_name(*var), self.expr(value))
			},
			Stmt::Assign { var, value } => {
				writeln!(w, "{tab}{} = {};", self.var_name(*var), self.expr(value))
			},
			Stmt::Store { buf, index, value } => {
				let value = self.stored_value(self.buf_dtype(*buf), value);
				writeln!(w, "{tab}{}[{}] = {value};", self.buf_name(*buf), self.expr(index))
			},
			Stmt::AtomicAdd { buf, index, value } => {
				let value = self.stored_value(self.buf_dtype(*buf), value);
				writeln!(w, "{tab}atomicAdd(&{}[{}], {value});", self.buf_name(*buf), self.expr(index))
			},
			Stmt::For { var, extent, kind, body } => {
				if *kind == LoopKind::Unrolled {
					writeln!(w, "{tab}#pragma unroll")?;
				}
				let v = self.var_name(*var);
				writeln!(w, "{tab}for (long long {v} = 0; {v} < {extent}; ++{v}) {{")?;
				self.print_stmts(w, body, depth + 1)?;
				writeln!(w, "{tab}}}")
			},
			Stmt::GridStride { var, extent, body } => {
				let v = self.var_name(*var);
				writeln!(
					w,
					"{tab}for (long long {v} = (long long)blockIdx.x * blockDim.x + threadIdx.x; {v} < {extent}; {v} += (long long)gridDim.x * blockDim.x) {{"
				)?;
				self.print_stmts(w, body, depth + 1)?;
				writeln!(w, "{tab}}}")
			},
			Stmt::CheckIndex { value, extent, what } => {
				writeln!(w, "{tab}KFUSE_CHECK_INDEX({}, {extent}); // {what}", self.expr(value))
			},
		}
	}

	/// Kernel parameter declarations, in the order of `stage.params`.
	pub fn param_decls(&self) -> Vec<String> {
		self.stage
			.params
			.iter()
			.map(|&buf| {
				let Some(decl) = self.module.buffers.get(buf) else {
					return format!("void* __restrict__ buf{buf}");
				};
				let qualifier = if decl.is_input() { "const " } else { "" };
				format!("{qualifier}{}* __restrict__ {}", decl.dtype.cuda_type(), decl.name)
			})
			.collect()
	}

	/// Host expressions passing `stage.params` to the kernel from the launch stub.
	pub fn host_args(&self) -> Vec<String> {
		let input_count = self.module.buffers.iter().filter(|b| b.is_input()).count();
		self.stage
			.params
			.iter()
			.map(|&buf| match self.module.buffers.get(buf) {
				Some(decl) => match decl.kind {
					BufferKind::Input(i) => format!("(const {}*)args[{i}]", decl.dtype.cuda_type()),
					BufferKind::Output => format!("({}*)args[{input_count}]", decl.dtype.cuda_type()),
					BufferKind::Workspace => decl.name.clone(),
				},
				None => "nullptr".to_string(),
			})
			.collect()
	}
}

//--------------------------------------------------------------------------------------------------


//--------------------------------------------------------------------------------------------------
