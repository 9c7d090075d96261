//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::ErrPack;
use crate::dtype::DType;
use crate::error::BuildError;
use crate::op::{Geometry, OpDescriptor};
use crate::shape::contiguous_strides;

pub mod cumsum;
pub mod gather_scatter;
pub mod ir;
pub mod schedule;

use ir::{BufId, Expr, LoopKind, LoweredModule, Stage, StageBuilder, Stmt};
use schedule::{BandTemplate, BuildConfig, Target};

//--------------------------------------------------------------------------------------------------

/// Turns a validated descriptor into scheduled stages for `target`.
pub fn lower(
	desc: &OpDescriptor,
	target: &Target,
	config: &BuildConfig,
) -> Result<LoweredModule, ErrPack<BuildError>> {
	let module = match desc.geometry() {
		Geometry::GatherScatter(geometry) => gather_scatter::lower(desc, geometry, target, config)?,
		Geometry::Scan(scan) => cumsum::lower(desc, scan, target, config)?,
	};
	log::debug!(
		"lowered {}: {} stage(s), fused = {}, workspace = {} bytes",
		desc.describe(),
		module.stages.len(),
		module.fused,
		module.workspace_bytes()
	);
	Ok(module)
}

/// Type of local variables holding values of `dtype`.
///
/// Half precision is computed in `float` and rounded back after every operation.
pub fn compute_dtype(dtype: DType) -> DType {
	if dtype == DType::F16 { DType::F32 } else { dtype }
}

//--------------------------------------------------------------------------------------------------

/// Binds the coordinates of `flat` in a row-major space of shape `dims`.
///
/// Dimensions of size 1 get the constant 0. `flat` must be below the number of elements.
pub(crate) fn unravel(
	sb: &mut StageBuilder,
	body: &mut Vec<Stmt>,
	flat: &Expr,
	dims: &[usize],
	name: &str,
) -> Vec<Expr> {
	let strides = contiguous_strides(dims);
	let mut coords = Vec::with_capacity(dims.len());
	for (d, (&size, &stride)) in dims.iter().zip(strides.iter()).enumerate() {
		if size == 1 {
			coords.push(Expr::Int(0));
			continue;
		}
		let q = Expr::div(flat.clone(), Expr::idx(stride));
		let c = if d == 0 { q } else { Expr::rem(q, Expr::idx(size)) };
		coords.push(sb.bind(body, name, c));
	}
	coords
}

/// Coordinates in `src` of an element at `coords` after `src` is broadcast to `coords.len()` dims.
pub(crate) fn broadcast_coords(src: &[usize], coords: &[Expr]) -> Vec<Expr> {
	let skip = coords.len() - src.len();
	src.iter()
		.zip(&coords[skip..])
		.map(|(&size, c)| if size == 1 { Expr::Int(0) } else { c.clone() })
		.collect()
}

/// Row-major offset of `coords` in a contiguous tensor of shape `dims`.
pub(crate) fn offset(coords: &[Expr], dims: &[usize]) -> Expr {
	let strides = contiguous_strides(dims);
	Expr::dot(coords.iter().cloned().zip(strides.iter().copied()))
}

/// Elementwise stage over `elems` elements whose innermost dimension is `innermost`.
///
/// `f` appends the statements computing element `e` to `body`.
pub(crate) fn elementwise_stage(
	name: &str,
	elems: usize,
	innermost: usize,
	dtype: DType,
	target: &Target,
	config: &BuildConfig,
	f: impl FnOnce(&mut StageBuilder, &mut Vec<Stmt>, Expr) -> Result<(), ErrPack<BuildError>>,
) -> Result<Stage, ErrPack<BuildError>> {
	let template = BandTemplate::Elementwise;
	let plan = template.plan(elems, innermost, dtype, target, config)?;
	let w = plan.vector_width;

	let mut sb = StageBuilder::new(name, template);
	let i = sb.iteration();
	let body = if w == 1 {
		let mut body = Vec::new();
		f(&mut sb, &mut body, Expr::Var(i))?;
		body
	} else {
		let lane = sb.var("v", DType::I64);
		let mut inner = Vec::new();
		let e = Expr::add(Expr::mul(Expr::Var(i), Expr::idx(w)), Expr::Var(lane));
		f(&mut sb, &mut inner, e)?;
		vec![Stmt::For { var: lane, extent: w as i64, kind: LoopKind::Unrolled, body: inner }]
	};
	sb.finish(body, plan)
}

pub(crate) fn zero_fill_stage(
	buf: BufId,
	dims: &[usize],
	dtype: DType,
	target: &Target,
	config: &BuildConfig,
) -> Result<Stage, ErrPack<BuildError>> {
	let elems = dims.iter().product();
	let innermost = dims.last().copied().unwrap_or(1);
	elementwise_stage("zero_fill", elems, innermost, dtype, target, config, |_, body, e| {
		let zero = if dtype.is_float() { Expr::Float(0.0) } else { Expr::Int(0) };
		body.push(Stmt::Store { buf, index: e, value: zero });
		Ok(())
	})
}

//--------------------------------------------------------------------------------------------------
