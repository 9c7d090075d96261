//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::ErrPack;
use crate::dtype::DType;
use crate::error::BuildError;
use crate::lower::compute_dtype;
use crate::lower::ir::{BufId, BufferDecl, BufferKind, Expr, LoopKind, LoweredModule, StageBuilder, Stmt};
use crate::lower::schedule::{BandTemplate, BuildConfig, Target};
use crate::op::{OpDescriptor, ScanGeometry};
use crate::shape::split_at_axis;

//--------------------------------------------------------------------------------------------------

const INPUT: BufId = 0;
const OUTPUT: BufId = 1;

/// One thread per line along the scanned axis.
///
/// The line `(o, i)` of a tensor viewed as `[outer, len, inner]` starts at `o * len * inner + i`
/// and its elements are `inner` apart.
pub fn lower(
	desc: &OpDescriptor,
	scan: &ScanGeometry,
	target: &Target,
	config: &BuildConfig,
) -> Result<LoweredModule, ErrPack<BuildError>> {
	let x = &desc.inputs()[0];
	let dtype = x.dtype;
	let (outer, len, inner) = split_at_axis(x.dims(), scan.axis);
	let template = BandTemplate::SequentialScan;
	let plan = template.plan(outer * inner, len, dtype, target, config)?;

	let mut sb = StageBuilder::new("cumsum", template);
	let line = sb.iteration();
	let mut body = Vec::new();
	let o = sb.bind(&mut body, "o", Expr::div(Expr::Var(line), Expr::idx(inner)));
	let i = sb.bind(&mut body, "i", Expr::rem(Expr::Var(line), Expr::idx(inner)));
	let base = sb.bind(&mut body, "base", Expr::add(Expr::mul(o, Expr::idx(len * inner)), i));

	let acc = sb.var("acc", compute_dtype(dtype));
	let zero = if dtype.is_float() { Expr::Float(0.0) } else { Expr::Int(0) };
	body.push(Stmt::Let { var: acc, value: zero });

	let k = sb.var("k", DType::I64);
	let pos = if scan.reverse {
		Expr::sub(Expr::idx(len - 1), Expr::Var(k))
	} else {
		Expr::Var(k)
	};
	let mut step = Vec::new();
	let p = sb.bind(&mut step, "p", Expr::add(base, Expr::mul(pos, Expr::idx(inner))));
	let next = Expr::cast(dtype, Expr::add(Expr::Var(acc), Expr::load(INPUT, p.clone())));
	if scan.exclusive {
		step.push(Stmt::Store { buf: OUTPUT, index: p, value: Expr::Var(acc) });
		step.push(Stmt::Assign { var: acc, value: next });
	} else {
		step.push(Stmt::Assign { var: acc, value: next });
		step.push(Stmt::Store { buf: OUTPUT, index: p, value: Expr::Var(acc) });
	}
	body.push(Stmt::For { var: k, extent: len as i64, kind: LoopKind::Serial, body: step });

	let stage = sb.finish(body, plan)?;

	let buffers = vec![
		BufferDecl { name: "x".to_string(), dtype, elems: x.elems(), kind: BufferKind::Input(0) },
		BufferDecl {
			name: "output".to_string(),
			dtype,
			elems: desc.output().elems(),
			kind: BufferKind::Output,
		},
	];
	Ok(LoweredModule { buffers, stages: vec![stage], fused: true })
}

//--------------------------------------------------------------------------------------------------


//--------------------------------------------------------------------------------------------------
