//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use arrayvec::ArrayVec;
use bit_set::BitSet;

use crate::ErrPack;
use crate::dtype::DType;
use crate::error::BuildError;
use crate::lower::schedule::{BandTemplate, LaunchConfig, StagePlan};

//--------------------------------------------------------------------------------------------------

pub type BufId = usize;
pub type VarId = usize;

/// Every stage is a CUDA kernel with at most this many pointer parameters.
pub const MAX_STAGE_PARAMS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Special {
	ThreadIdx,
	BlockIdx,
	BlockDim,
	GridDim,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
	Add,
	Sub,
	Mul,
	Div,
	Rem,
}

/// Integer expressions are evaluated in 64 bits.
/// Floating point expressions are evaluated in at least the precision of their operands.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
	Int(i64),
	Float(f64),
	Var(VarId),
	Special(Special),
	Load { buf: BufId, index: Box<Expr> },
	Bin(BinOp, Box<Expr>, Box<Expr>),

	/// Rounds the value to `DType`.
	Cast(DType, Box<Expr>),
}

impl Expr {
	pub fn load(buf: BufId, index: Self) -> Self {
		Self::Load { buf, index: Box::new(index) }
	}

	pub fn cast(dtype: DType, a: Self) -> Self {
		Self::Cast(dtype, Box::new(a))
	}

	pub fn bin(op: BinOp, a: Self, b: Self) -> Self {
		Self::Bin(op, Box::new(a), Box::new(b))
	}

	#[allow(clippy::should_implement_trait)]
	pub fn add(a: Self, b: Self) -> Self {
		Self::bin(BinOp::Add, a, b)
	}

	#[allow(clippy::should_implement_trait)]
	pub fn sub(a: Self, b: Self) -> Self {
		Self::bin(BinOp::Sub, a, b)
	}

	#[allow(clippy::should_implement_trait)]
	pub fn mul(a: Self, b: Self) -> Self {
		Self::bin(BinOp::Mul, a, b)
	}

	#[allow(clippy::should_implement_trait)]
	pub fn div(a: Self, b: Self) -> Self {
		Self::bin(BinOp::Div, a, b)
	}

	#[allow(clippy::should_implement_trait)]
	pub fn rem(a: Self, b: Self) -> Self {
		Self::bin(BinOp::Rem, a, b)
	}

	pub fn idx(v: usize) -> Self {
		Self::Int(v as i64)
	}

	/// `sum(terms[i].0 * terms[i].1)`, skipping zero strides.
	pub fn dot(terms: impl IntoIterator<Item = (Self, usize)>) -> Self {
		let mut result = Self::Int(0);
		for (coord, stride) in terms {
			if stride != 0 {
				result = Self::add(result, Self::mul(coord, Self::idx(stride)));
			}
		}
		result
	}

	pub fn is_const(&self) -> bool {
		matches!(self, Self::Int(_) | Self::Float(_))
	}

	fn visit_bufs(&self, f: &mut impl FnMut(BufId)) {
		match self {
			Self::Int(_) | Self::Float(_) | Self::Var(_) | Self::Special(_) => {},
			Self::Load { buf, index } => {
				f(*buf);
				index.visit_bufs(f);
			},
			Self::Bin(_, a, b) => {
				a.visit_bufs(f);
				b.visit_bufs(f);
			},
			Self::Cast(_, a) => a.visit_bufs(f),
		}
	}
}

//--------------------------------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopKind {
	Serial,

	/// Fixed short trip count. Emitted with `#pragma unroll`.
	Unrolled,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
	/// Declares `var` and initializes it.
	Let { var: VarId, value: Expr },
	Assign { var: VarId, value: Expr },
	Store { buf: BufId, index: Expr, value: Expr },
	AtomicAdd { buf: BufId, index: Expr, value: Expr },

	/// `for var in 0..extent`
	For { var: VarId, extent: i64, kind: LoopKind, body: Vec<Stmt> },

	/// Each thread visits `gid, gid + nthreads, ...` below `extent`,
	/// where `gid = blockIdx * blockDim + threadIdx` and `nthreads = gridDim * blockDim`.
	GridStride { var: VarId, extent: i64, body: Vec<Stmt> },

	/// Fails the launch unless `0 <= value < extent`.
	CheckIndex { value: Expr, extent: i64, what: String },
}

impl Stmt {
	fn visit_bufs(&self, f: &mut impl FnMut(BufId)) {
		match self {
			Self::Let { value, .. } | Self::Assign { value, .. } => value.visit_bufs(f),
			Self::Store { buf, index, value } | Self::AtomicAdd { buf, index, value } => {
				f(*buf);
				index.visit_bufs(f);
				value.visit_bufs(f);
			},
			Self::For { body, .. } | Self::GridStride { body, .. } => {
				for stmt in body {
					stmt.visit_bufs(f);
				}
			},
			Self::CheckIndex { value, .. } => value.visit_bufs(f),
		}
	}
}

//--------------------------------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
	Input(usize),
	Output,
	Workspace,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferDecl {
	pub name: String,
	pub dtype: DType,
	pub elems: usize,
	pub kind: BufferKind,
}

impl BufferDecl {
	pub fn bytes(&self) -> usize {
		self.elems * self.dtype.bytes()
	}

	pub fn is_input(&self) -> bool {
		matches!(self.kind, BufferKind::Input(_))
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VarDecl {
	pub name: String,
	pub dtype: DType,
}

/// One kernel launch.
#[derive(Clone, Debug, PartialEq)]
pub struct Stage {
	pub name: String,
	pub template: BandTemplate,

	/// Buffers the body references, in increasing order.
	pub params: ArrayVec<BufId, MAX_STAGE_PARAMS>,
	pub vars: Vec<VarDecl>,
	pub body: Vec<Stmt>,

	/// Iterations of the grid-stride loop.
	pub extent: usize,
	pub vector_width: usize,
	pub launch: LaunchConfig,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoweredModule {
	pub buffers: Vec<BufferDecl>,
	pub stages: Vec<Stage>,
	pub fused: bool,
}

impl LoweredModule {
	pub fn workspace_bytes(&self) -> usize {
		self.buffers.iter().filter(|b| b.kind == BufferKind::Workspace).map(BufferDecl::bytes).sum()
	}

	pub fn output_buffer(&self) -> Option<BufId> {
		self.buffers.iter().position(|b| b.kind == BufferKind::Output)
	}
}

//--------------------------------------------------------------------------------------------------

/// Collects the variables of one stage. The body runs inside a grid-stride loop over the
/// iteration variable, which is declared first.
pub struct StageBuilder {
	name: String,
	template: BandTemplate,
	vars: Vec<VarDecl>,
	iteration: VarId,
}

impl StageBuilder {
	pub fn new(name: impl Into<String>, template: BandTemplate) -> Self {
		let mut sb = Self { name: name.into(), template, vars: Vec::new(), iteration: 0 };
		sb.iteration = sb.var(template.iteration_name(), DType::I64);
		sb
	}

	pub fn iteration(&self) -> VarId {
		self.iteration
	}

	pub fn var(&mut self, name: &str, dtype: DType) -> VarId {
		let id = self.vars.len();
		self.vars.push(VarDecl { name: format!("{name}{id}"), dtype });
		id
	}

	/// Binds `value` to a new index variable and returns a reference to it.
	/// Constants are returned as they are.
	pub fn bind(&mut self, body: &mut Vec<Stmt>, name: &str, value: Expr) -> Expr {
		let value = simplify(value);
		if value.is_const() {
			return value;
		}
		let var = self.var(name, DType::I64);
		body.push(Stmt::Let { var, value });
		Expr::Var(var)
	}

	/// Wraps `body` in the grid-stride loop of `plan`.
	pub fn finish(self, body: Vec<Stmt>, plan: StagePlan) -> Result<Stage, ErrPack<BuildError>> {
		if plan.vector_width > 1 && !self.template.vectorizable() {
			return Err(BuildError::schedule_failed(format!(
				"stage {} is {} and cannot be vectorized",
				self.name,
				self.template.name()
			)));
		}
		let mut body = vec![Stmt::GridStride { var: self.iteration, extent: plan.iterations as i64, body }];
		simplify_stmts(&mut body);

		let mut used = BitSet::new();
		for stmt in &body {
			stmt.visit_bufs(&mut |buf| {
				used.insert(buf);
			});
		}
		let mut params = ArrayVec::new();
		for buf in &used {
			if params.try_push(buf).is_err() {
				return Err(BuildError::schedule_failed(format!(
					"stage {} needs more than {MAX_STAGE_PARAMS} buffers",
					self.name
				)));
			}
		}

		Ok(Stage {
			name: self.name,
			template: self.template,
			params,
			vars: self.vars,
			body,
			extent: plan.iterations,
			vector_width: plan.vector_width,
			launch: plan.launch,
		})
	}
}

//--------------------------------------------------------------------------------------------------

/// Constant folding of integer index arithmetic.
pub fn simplify(expr: Expr) -> Expr {
	match expr {
		Expr::Bin(op, a, b) => {
			let a = simplify(*a);
			let b = simplify(*b);
			fold_bin(op, a, b)
		},
		Expr::Load { buf, index } => Expr::Load { buf, index: Box::new(simplify(*index)) },
		Expr::Cast(dtype, a) => match simplify(*a) {
			Expr::Int(v) if dtype == DType::I64 => Expr::Int(v),
			a => Expr::Cast(dtype, Box::new(a)),
		},
		e => e,
	}
}

fn fold_bin(op: BinOp, a: Expr, b: Expr) -> Expr {
	match (op, &a, &b) {
		(BinOp::Add, Expr::Int(x), Expr::Int(y)) => Expr::Int(x.wrapping_add(*y)),
		(BinOp::Sub, Expr::Int(x), Expr::Int(y)) => Expr::Int(x.wrapping_sub(*y)),
		(BinOp::Mul, Expr::Int(x), Expr::Int(y)) => Expr::Int(x.wrapping_mul(*y)),
		(BinOp::Div, Expr::Int(x), Expr::Int(y)) if *y != 0 => Expr::Int(x / y),
		(BinOp::Rem, Expr::Int(x), Expr::Int(y)) if *y != 0 => Expr::Int(x % y),

		(BinOp::Add | BinOp::Sub, _, Expr::Int(0))
		| (BinOp::Mul | BinOp::Div, _, Expr::Int(1)) => a,
		(BinOp::Add, Expr::Int(0), _) | (BinOp::Mul, Expr::Int(1), _) => b,
		(BinOp::Mul, Expr::Int(0), _) | (BinOp::Mul, _, Expr::Int(0)) | (BinOp::Rem, _, Expr::Int(1)) => {
			Expr::Int(0)
		},

		_ => Expr::bin(op, a, b),
	}
}

pub fn simplify_stmts(stmts: &mut [Stmt]) {
	for stmt in stmts {
		match stmt {
			Stmt::Let { value, .. } | Stmt::Assign { value, .. } => {
				*value = simplify(std::mem::replace(value, Expr::Int(0)));
			},
			Stmt::Store { index, value, .. } | Stmt::AtomicAdd { index, value, .. } => {
				*index = simplify(std::mem::replace(index, Expr::Int(0)));
				*value = simplify(std::mem::replace(value, Expr::Int(0)));
			},
			Stmt::For { body, .. } | Stmt::GridStride { body, .. } => simplify_stmts(body),
			Stmt::CheckIndex { value, .. } => {
				*value = simplify(std::mem::replace(value, Expr::Int(0)));
			},
		}
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use crate::lower::schedule::LaunchConfig;

	#[test]
	fn test_simplify_index_arithmetic() {
		let x = Expr::Var(0);
		let e = Expr::add(Expr::mul(x.clone(), Expr::Int(1)), Expr::mul(Expr::Int(3), Expr::Int(0)));
		assert_eq!(simplify(e), x);

		let e = Expr::rem(Expr::div(x.clone(), Expr::Int(1)), Expr::Int(1));
		assert_eq!(simplify(e), Expr::Int(0));

		let e = Expr::add(Expr::mul(Expr::Int(4), Expr::Int(8)), Expr::sub(Expr::Int(3), Expr::Int(1)));
		assert_eq!(simplify(e), Expr::Int(34));

		// float zeros are not folded, 0.0 * x is not always 0.0
		let e = Expr::mul(Expr::Float(0.0), x.clone());
		assert_eq!(simplify(e.clone()), e);
	}

	#[test]
	fn test_dot_skips_zero_strides() {
		let e = simplify(Expr::dot([(Expr::Var(0), 8), (Expr::Var(1), 0), (Expr::Var(2), 1)]));
		let expected = Expr::add(Expr::mul(Expr::Var(0), Expr::Int(8)), Expr::Var(2));
		assert_eq!(e, expected);
	}

	fn plan(vector_width: usize, iterations: usize) -> StagePlan {
		StagePlan { vector_width, iterations, launch: LaunchConfig { grid: 1, block: 32 } }
	}

	#[test]
	fn test_params_collected_in_order() {
		let sb = StageBuilder::new("t", BandTemplate::Elementwise);
		let i = sb.iteration();
		let body = vec![Stmt::Store { buf: 3, index: Expr::Var(i), value: Expr::load(1, Expr::Var(i)) }];
		let stage = sb.finish(body, plan(1, 4)).unwrap();
		assert_eq!(stage.params.as_slice(), &[1, 3]);
		assert_eq!(stage.vars[i].name, "i0");
		assert!(matches!(stage.body.as_slice(), [Stmt::GridStride { extent: 4, .. }]));
	}

	#[test]
	fn test_only_elementwise_stages_vectorize() {
		for template in [BandTemplate::ScatterAccumulate, BandTemplate::SequentialScan] {
			let sb = StageBuilder::new("t", template);
			let i = sb.iteration();
			let body = vec![Stmt::AtomicAdd { buf: 1, index: Expr::Var(i), value: Expr::load(0, Expr::Var(i)) }];
			let err = sb.finish(body, plan(4, 8)).unwrap_err();
			assert_eq!(err.code, BuildError::ScheduleFailed);
		}
		let sb = StageBuilder::new("t", BandTemplate::Elementwise);
		let i = sb.iteration();
		let body = vec![Stmt::Store { buf: 1, index: Expr::Var(i), value: Expr::load(0, Expr::Var(i)) }];
		assert_eq!(sb.finish(body, plan(4, 8)).unwrap().vector_width, 4);
	}
}

//--------------------------------------------------------------------------------------------------
