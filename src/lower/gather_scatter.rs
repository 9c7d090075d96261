//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::ErrPack;
use crate::dtype::DType;
use crate::error::BuildError;
use crate::lower::ir::{BufId, BufferDecl, BufferKind, Expr, LoweredModule, Stage, StageBuilder, Stmt};
use crate::lower::schedule::{BandTemplate, BuildConfig, FusionMode, Target};
use crate::lower::{broadcast_coords, elementwise_stage, offset, unravel, zero_fill_stage};
use crate::op::{GatherScatterGeometry, OpDescriptor};

//--------------------------------------------------------------------------------------------------

const PARAMS: BufId = 0;
const GATHER_INDICES: BufId = 1;
const MULTIPLIER: BufId = 2;
const SCATTER_INDICES: BufId = 3;
const OUTPUT: BufId = 4;
const WS_GATHERED: BufId = 5;
const WS_PRODUCT: BufId = 6;

struct Ctx<'a> {
	geo: &'a GatherScatterGeometry,
	s1: &'a [usize],
	s2: &'a [usize],
	s3: &'a [usize],
	dtype: DType,
	bounds_check: bool,
}

impl Ctx<'_> {
	/// Offset in `params` of the gathered element at `gc`. Loads and checks the gather index.
	fn gather_offset(&self, sb: &mut StageBuilder, body: &mut Vec<Stmt>, gc: &[Expr]) -> Expr {
		let axis = self.geo.axis;
		let r2 = self.s2.len();
		let g_off = offset(&gc[axis..axis + r2], self.s2);
		let gi = sb.bind(body, "g", Expr::cast(DType::I64, Expr::load(GATHER_INDICES, g_off)));
		if self.bounds_check {
			body.push(Stmt::CheckIndex {
				value: gi.clone(),
				extent: self.s1[axis] as i64,
				what: "gather_indices".to_string(),
			});
		}
		let mut pc = Vec::with_capacity(self.s1.len());
		pc.extend_from_slice(&gc[..axis]);
		pc.push(gi);
		pc.extend_from_slice(&gc[axis + r2..]);
		offset(&pc, self.s1)
	}

	/// Offset in the output of the update element at `uc`. Loads and checks the scatter indices.
	fn scatter_offset(&self, sb: &mut StageBuilder, body: &mut Vec<Stmt>, uc: &[Expr]) -> Expr {
		let nb = self.geo.batch.len();
		let depth = self.geo.index_depth;
		let tuple = sb.bind(
			body,
			"b",
			Expr::mul(offset(&uc[..nb], &self.geo.batch), Expr::idx(depth)),
		);
		let mut oc = Vec::with_capacity(self.s1.len());
		for k in 0..depth {
			let index = Expr::add(tuple.clone(), Expr::idx(k));
			let s = sb.bind(body, "s", Expr::cast(DType::I64, Expr::load(SCATTER_INDICES, index)));
			if self.bounds_check {
				body.push(Stmt::CheckIndex {
					value: s.clone(),
					extent: self.s1[k] as i64,
					what: format!("scatter_indices[..., {k}]"),
				});
			}
			oc.push(s);
		}
		oc.extend_from_slice(&uc[nb..]);
		offset(&oc, self.s1)
	}

	fn fused_stage(&self, target: &Target, config: &BuildConfig) -> Result<Stage, ErrPack<BuildError>> {
		let template = BandTemplate::ScatterAccumulate;
		let plan = template.plan(self.geo.update_elems(), 1, self.dtype, target, config)?;
		let mut sb = StageBuilder::new("gather_mul_scatter_add", template);
		let u = sb.iteration();
		let mut body = Vec::new();

		let uc = unravel(&mut sb, &mut body, &Expr::Var(u), &self.geo.update, "c");
		let out_off = self.scatter_offset(&mut sb, &mut body, &uc);
		let gc = broadcast_coords(&self.geo.gathered, &uc);
		let p_off = self.gather_offset(&mut sb, &mut body, &gc);
		let m_off = offset(&broadcast_coords(self.s3, &uc), self.s3);
		let value = Expr::cast(
			self.dtype,
			Expr::mul(Expr::load(PARAMS, p_off), Expr::load(MULTIPLIER, m_off)),
		);
		body.push(Stmt::AtomicAdd { buf: OUTPUT, index: out_off, value });

		sb.finish(body, plan)
	}

	fn gather_stage(&self, target: &Target, config: &BuildConfig) -> Result<Stage, ErrPack<BuildError>> {
		let dims = &self.geo.gathered;
		let innermost = dims.last().copied().unwrap_or(1);
		elementwise_stage("gather", self.geo.gathered_elems(), innermost, self.dtype, target, config, |sb, body, e| {
			let e = sb.bind(body, "e", e);
			let gc = unravel(sb, body, &e, dims, "c");
			let p_off = self.gather_offset(sb, body, &gc);
			body.push(Stmt::Store { buf: WS_GATHERED, index: e, value: Expr::load(PARAMS, p_off) });
			Ok(())
		})
	}

	fn multiply_stage(&self, target: &Target, config: &BuildConfig) -> Result<Stage, ErrPack<BuildError>> {
		let dims = &self.geo.product;
		let innermost = dims.last().copied().unwrap_or(1);
		elementwise_stage("multiply", self.geo.product_elems(), innermost, self.dtype, target, config, |sb, body, e| {
			let e = sb.bind(body, "e", e);
			let pc = unravel(sb, body, &e, dims, "c");
			let g_off = offset(&broadcast_coords(&self.geo.gathered, &pc), &self.geo.gathered);
			let m_off = offset(&broadcast_coords(self.s3, &pc), self.s3);
			let value = Expr::cast(
				self.dtype,
				Expr::mul(Expr::load(WS_GATHERED, g_off), Expr::load(MULTIPLIER, m_off)),
			);
			body.push(Stmt::Store { buf: WS_PRODUCT, index: e, value });
			Ok(())
		})
	}

	fn scatter_stage(&self, target: &Target, config: &BuildConfig) -> Result<Stage, ErrPack<BuildError>> {
		let template = BandTemplate::ScatterAccumulate;
		let plan = template.plan(self.geo.update_elems(), 1, self.dtype, target, config)?;
		let mut sb = StageBuilder::new("scatter_add", template);
		let u = sb.iteration();
		let mut body = Vec::new();

		let uc = unravel(&mut sb, &mut body, &Expr::Var(u), &self.geo.update, "c");
		let out_off = self.scatter_offset(&mut sb, &mut body, &uc);
		let w_off = offset(&broadcast_coords(&self.geo.product, &uc), &self.geo.product);
		body.push(Stmt::AtomicAdd { buf: OUTPUT, index: out_off, value: Expr::load(WS_PRODUCT, w_off) });

		sb.finish(body, plan)
	}

	fn workspace_bytes(&self) -> usize {
		let elems = self.geo.gathered_elems().saturating_add(self.geo.product_elems());
		elems.saturating_mul(self.dtype.bytes())
	}
}

//--------------------------------------------------------------------------------------------------

/// Decides between the fused and the unfused schedule.
fn choose_fusion(
	geo: &GatherScatterGeometry,
	workspace_bytes: usize,
	config: &BuildConfig,
) -> Result<bool, ErrPack<BuildError>> {
	let recompute = geo.recompute_factor();
	let too_much_recompute = recompute > config.max_recompute_factor;
	let workspace_fits = workspace_bytes <= config.max_workspace_bytes;
	match config.fusion {
		FusionMode::Always => {
			if too_much_recompute {
				return Err(ErrPack::with_message(
					BuildError::FusionConflict,
					format!(
						"fusion recomputes each gathered element {recompute} times, limit is {}",
						config.max_recompute_factor
					),
				));
			}
			Ok(true)
		},
		FusionMode::Never => {
			if !workspace_fits {
				return Err(ErrPack::with_message(
					BuildError::WorkspaceTooLarge,
					format!(
						"unfused schedule needs {workspace_bytes} bytes of workspace, limit is {}",
						config.max_workspace_bytes
					),
				));
			}
			Ok(false)
		},
		FusionMode::Auto => {
			let fuse = !(too_much_recompute && workspace_fits);
			if !fuse {
				log::debug!("not fusing: recompute factor {recompute}, workspace {workspace_bytes} bytes");
			}
			Ok(fuse)
		},
	}
}

pub fn lower(
	desc: &OpDescriptor,
	geo: &GatherScatterGeometry,
	target: &Target,
	config: &BuildConfig,
) -> Result<LoweredModule, ErrPack<BuildError>> {
	let inputs = desc.inputs();
	let dtype = desc.data_dtype();
	if !target.has_atomic_add(dtype) {
		return Err(ErrPack::with_message(
			BuildError::UnsupportedOnTarget,
			format!("atomicAdd for {dtype} is not available on {}", target.arch()),
		));
	}

	let ctx = Ctx {
		geo,
		s1: inputs[0].dims(),
		s2: inputs[1].dims(),
		s3: inputs[2].dims(),
		dtype,
		bounds_check: config.bounds_check,
	};
	let fused = choose_fusion(geo, ctx.workspace_bytes(), config)?;

	let mut buffers: Vec<BufferDecl> = ["params", "gather_indices", "multiplier", "scatter_indices"]
		.iter()
		.zip(inputs)
		.enumerate()
		.map(|(i, (name, spec))| BufferDecl {
			name: (*name).to_string(),
			dtype: spec.dtype,
			elems: spec.elems(),
			kind: BufferKind::Input(i),
		})
		.collect();
	buffers.push(BufferDecl {
		name: "output".to_string(),
		dtype,
		elems: desc.output().elems(),
		kind: BufferKind::Output,
	});

	let zero_fill = zero_fill_stage(OUTPUT, ctx.s1, dtype, target, config)?;
	let stages = if fused {
		vec![zero_fill, ctx.fused_stage(target, config)?]
	} else {
		buffers.push(BufferDecl {
			name: "gathered".to_string(),
			dtype,
			elems: geo.gathered_elems(),
			kind: BufferKind::Workspace,
		});
		buffers.push(BufferDecl {
			name: "product".to_string(),
			dtype,
			elems: geo.product_elems(),
			kind: BufferKind::Workspace,
		});
		vec![
			ctx.gather_stage(target, config)?,
			ctx.multiply_stage(target, config)?,
			zero_fill,
			ctx.scatter_stage(target, config)?,
		]
	};

	Ok(LoweredModule { buffers, stages, fused })
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use crate::op::{OpKind, TensorSpec};

	fn desc(s1: &[usize], s2: &[usize], s3: &[usize], s4: &[usize], dtype: DType) -> OpDescriptor {
		OpDescriptor::new(
			OpKind::GatherMulScatterAdd { axis: 0 },
			&[
				TensorSpec::new(s1, dtype).unwrap(),
				TensorSpec::new(s2, DType::I32).unwrap(),
				TensorSpec::new(s3, dtype).unwrap(),
				TensorSpec::new(s4, DType::I64).unwrap(),
			],
		)
		.unwrap()
	}

	#[test]
	fn test_fusion_modes() {
		let d = desc(&[6, 4], &[3], &[3, 4], &[3, 1], DType::F32);
		let target = Target::default();

		let m = crate::lower::lower(&d, &target, &BuildConfig::default()).unwrap();
		assert!(m.fused);
		assert_eq!(m.stages.len(), 2);
		assert_eq!(m.workspace_bytes(), 0);

		let config = BuildConfig::default().with_fusion(FusionMode::Never);
		let m = crate::lower::lower(&d, &target, &config).unwrap();
		assert!(!m.fused);
		let names: Vec<&str> = m.stages.iter().map(|s| s.name.as_str()).collect();
		assert_eq!(names, ["gather", "multiply", "zero_fill", "scatter_add"]);
		assert_eq!(m.workspace_bytes(), 2 * 12 * 4);

		let config = BuildConfig { max_workspace_bytes: 16, ..config };
		let err = crate::lower::lower(&d, &target, &config).unwrap_err();
		assert_eq!(err.code, BuildError::WorkspaceTooLarge);
	}

	#[test]
	fn test_templates_drive_vectorization() {
		let d = desc(&[6, 4], &[3], &[3, 4], &[3, 1], DType::F32);
		let config = BuildConfig::default().with_fusion(FusionMode::Never);
		let m = crate::lower::lower(&d, &Target::default(), &config).unwrap();
		for stage in &m.stages {
			let expected = if stage.template == BandTemplate::Elementwise { 4 } else { 1 };
			assert_eq!(stage.vector_width, expected, "{}", stage.name);
		}
		assert_eq!(m.stages[3].template, BandTemplate::ScatterAccumulate);
		assert_eq!(m.stages[3].extent, 12);
	}

	#[test]
	fn test_recompute_limit() {
		// each of the 3 gathered elements is used by 64 updates
		let d = desc(&[6], &[3], &[64, 3], &[64, 3, 1], DType::F32);
		let target = Target::default();

		let m = crate::lower::lower(&d, &target, &BuildConfig::default()).unwrap();
		assert!(!m.fused);

		let config = BuildConfig::default().with_fusion(FusionMode::Always);
		let err = crate::lower::lower(&d, &target, &config).unwrap_err();
		assert_eq!(err.code, BuildError::FusionConflict);
	}

	#[test]
	fn test_half_needs_sm70() {
		let d = desc(&[6, 4], &[3], &[3, 4], &[3, 1], DType::F16);
		let err = crate::lower::lower(&d, &Target::cuda(61), &BuildConfig::default()).unwrap_err();
		assert_eq!(err.code, BuildError::UnsupportedOnTarget);
		assert!(crate::lower::lower(&d, &Target::cuda(70), &BuildConfig::default()).is_ok());
	}
}

//--------------------------------------------------------------------------------------------------
