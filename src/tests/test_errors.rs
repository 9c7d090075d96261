//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::dtype::Scalar;
use crate::error::{BuildError, LaunchError};
use crate::lower::schedule::{BuildConfig, FusionMode, Target};
use crate::runtime::Runtime;
use crate::runtime::device::Device;
use crate::runtime::host::{HostDevice, HostDeviceConfig};
use crate::tensor::Tensor;
use crate::tests::iota;
use crate::{DType, OpKind, TensorSpec};

//--------------------------------------------------------------------------------------------------

/// params (4, 8), gather [3, 0, 2, 1] on axis 1, multiplier (4, 4), scatter tuples (r, j)
fn gmsa_inputs(gather: [i32; 4], first_row: i32) -> [Tensor; 4] {
	let params = iota(&[4, 8], DType::F32);
	let gather = Tensor::from_slice(&[4], &gather).unwrap();
	let multiplier = Tensor::from_slice(&[4, 4], &[1.0_f32; 16]).unwrap();
	let mut pairs = Vec::new();
	for r in 0..4 {
		for j in 0..4 {
			pairs.push(if r == 0 { first_row } else { r });
			pairs.push(j);
		}
	}
	let scatter = Tensor::from_slice(&[4, 4, 2], &pairs).unwrap();
	[params, gather, multiplier, scatter]
}

fn filled(dims: &[usize], value: f64) -> Tensor {
	let mut t = Tensor::zeros(dims, DType::F32).unwrap();
	for i in 0..t.elems() {
		t.set(i, Scalar::Float(value)).unwrap();
	}
	t
}

fn launch_gmsa(
	rt: &Runtime,
	inputs: &[Tensor; 4],
	output: &mut Tensor,
) -> Result<(), crate::ErrPack<LaunchError>> {
	let specs: Vec<_> = inputs.iter().map(Tensor::spec).collect();
	let module = rt.build_op(OpKind::GatherMulScatterAdd { axis: 1 }, &specs).unwrap();
	let [p, g, m, i] = inputs;
	rt.launch(&module, &[p, g, m, i], output)
}

//--------------------------------------------------------------------------------------------------

#[test]
fn test_out_of_range_indices() {
	for fusion in [FusionMode::Always, FusionMode::Never] {
		let dev = HostDevice::new();
		let rt = Runtime::new(dev.clone(), Target::default(), BuildConfig::default().with_fusion(fusion));

		// gather index 8 on an axis of length 8
		let mut out = filled(&[4, 8], 7.0);
		let err = launch_gmsa(&rt, &gmsa_inputs([3, 0, 8, 1], 0), &mut out).unwrap_err();
		assert_eq!(err.code, LaunchError::OutOfBounds);
		assert_eq!(out, filled(&[4, 8], 7.0));
		assert_eq!(dev.allocated_bytes(), 0);

		// negative scatter index
		let err = launch_gmsa(&rt, &gmsa_inputs([3, 0, 2, 1], -1), &mut out).unwrap_err();
		assert_eq!(err.code, LaunchError::OutOfBounds);
		assert_eq!(out, filled(&[4, 8], 7.0));
		assert_eq!(dev.allocated_bytes(), 0);

		// the same module still works with valid indices
		launch_gmsa(&rt, &gmsa_inputs([3, 0, 2, 1], 0), &mut out).unwrap();
		assert_eq!(dev.allocated_bytes(), 0);
		assert!(dev.allocations() > 0);
	}
}

#[test]
fn test_signature_mismatch_before_allocation() {
	let dev = HostDevice::new();
	let rt = Runtime::new(dev.clone(), Target::default(), BuildConfig::default());
	let [p, g, m, i] = gmsa_inputs([3, 0, 2, 1], 0);
	let specs = [p.spec(), g.spec(), m.spec(), i.spec()];
	let module = rt.build_op(OpKind::GatherMulScatterAdd { axis: 1 }, &specs).unwrap();
	let mut out = Tensor::zeros(&[4, 8], DType::F32).unwrap();

	let err = rt.launch(&module, &[&p, &g, &m], &mut out).unwrap_err();
	assert_eq!(err.code, LaunchError::ArgCount);

	let g64 = Tensor::from_slice(&[4], &[3_i64, 0, 2, 1]).unwrap();
	let err = rt.launch(&module, &[&p, &g64, &m, &i], &mut out).unwrap_err();
	assert_eq!(err.code, LaunchError::DTypeMismatch);

	let p2 = iota(&[4, 9], DType::F32);
	let err = rt.launch(&module, &[&p2, &g, &m, &i], &mut out).unwrap_err();
	assert_eq!(err.code, LaunchError::ShapeMismatch);

	let mut out64 = Tensor::zeros(&[4, 8], DType::F64).unwrap();
	let err = rt.launch(&module, &[&p, &g, &m, &i], &mut out64).unwrap_err();
	assert_eq!(err.code, LaunchError::DTypeMismatch);

	let mut wrong = Tensor::zeros(&[8, 4], DType::F32).unwrap();
	let err = rt.launch(&module, &[&p, &g, &m, &i], &mut wrong).unwrap_err();
	assert_eq!(err.code, LaunchError::ShapeMismatch);

	assert_eq!(dev.allocations(), 0);
}

#[test]
fn test_device_limits() {
	let inputs = gmsa_inputs([3, 0, 2, 1], 0);

	let config = HostDeviceConfig { capacity: Some(64), ..HostDeviceConfig::default() };
	let dev = HostDevice::with_config(config).unwrap();
	let rt = Runtime::new(dev.clone(), Target::default(), BuildConfig::default());
	let mut out = Tensor::zeros(&[4, 8], DType::F32).unwrap();
	let err = launch_gmsa(&rt, &inputs, &mut out).unwrap_err();
	assert_eq!(err.code, LaunchError::DevBufAllocFailed);
	assert_eq!(dev.allocated_bytes(), 0);

	let config = HostDeviceConfig { threads: 2, max_threads_per_block: 16, ..HostDeviceConfig::default() };
	let dev = HostDevice::with_config(config).unwrap();
	let rt = Runtime::new(dev.clone(), Target::default(), BuildConfig::default());
	let err = launch_gmsa(&rt, &inputs, &mut out).unwrap_err();
	assert_eq!(err.code, LaunchError::DeviceExecution);
	assert_eq!(dev.allocated_bytes(), 0);
}

//--------------------------------------------------------------------------------------------------

fn build_err(kind: OpKind, specs: &[(&[usize], DType)], target: &Target, config: &BuildConfig) -> BuildError {
	let specs: Vec<_> = specs.iter().map(|(d, t)| TensorSpec::new(d, *t).unwrap()).collect();
	let desc = match crate::op::OpDescriptor::new(kind, &specs) {
		Ok(desc) => desc,
		Err(e) => return e.code,
	};
	crate::compiler::build_with_config(&desc, target, config).unwrap_err().code
}

#[test]
fn test_build_errors() {
	let gmsa = OpKind::GatherMulScatterAdd { axis: 1 };
	let t = Target::default();
	let c = BuildConfig::default();
	let valid: [(&[usize], DType); 4] =
		[(&[4, 8], DType::F32), (&[4], DType::I32), (&[4, 4], DType::F32), (&[4, 4, 2], DType::I32)];

	let mut specs = valid;
	specs[0].1 = DType::I32;
	assert_eq!(build_err(gmsa, &specs, &t, &c), BuildError::UnsupportedDType);

	let mut specs = valid;
	specs[1].1 = DType::F32;
	assert_eq!(build_err(gmsa, &specs, &t, &c), BuildError::UnsupportedDType);

	let mut specs = valid;
	specs[2].1 = DType::F64;
	assert_eq!(build_err(gmsa, &specs, &t, &c), BuildError::UnsupportedDType);

	let axis2 = OpKind::GatherMulScatterAdd { axis: 2 };
	assert_eq!(build_err(axis2, &valid, &t, &c), BuildError::InvalidAxis);

	let mut specs = valid;
	specs[3].0 = &[4, 4, 3];
	assert_eq!(build_err(gmsa, &specs, &t, &c), BuildError::IndexRankMismatch);

	let mut specs = valid;
	specs[3].0 = &[4, 2];
	assert_eq!(build_err(gmsa, &specs, &t, &c), BuildError::ShapeMismatch);

	let mut specs = valid;
	specs[0].1 = DType::F16;
	specs[2].1 = DType::F16;
	assert_eq!(build_err(gmsa, &specs, &Target::cuda(61), &c), BuildError::UnsupportedOnTarget);

	let scan = OpKind::CumSum { axis: -3, exclusive: false, reverse: false };
	let x: [(&[usize], DType); 1] = [(&[4, 8], DType::F32)];
	assert_eq!(build_err(scan, &x, &t, &c), BuildError::InvalidAxis);
	assert_eq!(build_err(scan, &valid, &t, &c), BuildError::ShapeMismatch);

	assert!(TensorSpec::new(&[4, 0], DType::F32).is_err());
}

#[test]
fn test_fusion_limits() {
	// 4 gathered elements, each used by 32 updates
	let specs: [(&[usize], DType); 4] =
		[(&[8], DType::F32), (&[4], DType::I32), (&[32, 4], DType::F32), (&[32, 4, 1], DType::I32)];
	let gmsa = OpKind::GatherMulScatterAdd { axis: 0 };
	let t = Target::default();

	let always = BuildConfig::default().with_fusion(FusionMode::Always);
	assert_eq!(build_err(gmsa, &specs, &t, &always), BuildError::FusionConflict);

	let never = BuildConfig { max_workspace_bytes: 16, ..BuildConfig::default().with_fusion(FusionMode::Never) };
	assert_eq!(build_err(gmsa, &specs, &t, &never), BuildError::WorkspaceTooLarge);
}

//--------------------------------------------------------------------------------------------------
