//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use assert_approx_eq::assert_approx_eq;

use crate::error::BuildError;
use crate::lower::schedule::{BuildConfig, FusionMode, Target};
use crate::reference;
use crate::rng::Rng;
use crate::tensor::Tensor;
use crate::tests::{host_runtime, iota, run};
use crate::{DType, OpKind, TensorSpec};

//--------------------------------------------------------------------------------------------------

/// params = iota(4, 8), gather_indices = [3, 0, 2, 1], multiplier[r][j] = j + 1,
/// scatter_indices[r][j] = (r % 2, j)
fn k2_inputs(dtype: DType, index_dtype: DType) -> [Tensor; 4] {
	let params = iota(&[4, 8], dtype);
	let gather = indices(&[4], index_dtype, &[3, 0, 2, 1]);
	let mut multiplier = Tensor::zeros(&[4, 4], dtype).unwrap();
	for i in 0..16 {
		multiplier.set(i, crate::dtype::Scalar::Int((i % 4 + 1) as i64)).unwrap();
	}
	let mut pairs = Vec::new();
	for r in 0..4 {
		for j in 0..4 {
			pairs.push(r % 2);
			pairs.push(j);
		}
	}
	let scatter = indices(&[4, 4, 2], index_dtype, &pairs);
	[params, gather, multiplier, scatter]
}

const K2_EXPECTED: [f64; 32] = [
	22.0, 32.0, 60.0, 72.0, 0.0, 0.0, 0.0, 0.0, //
	38.0, 64.0, 108.0, 136.0, 0.0, 0.0, 0.0, 0.0, //
	0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, //
	0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
];

fn indices(dims: &[usize], dtype: DType, values: &[i64]) -> Tensor {
	let mut t = Tensor::zeros(dims, dtype).unwrap();
	for (i, &v) in values.iter().enumerate() {
		t.set(i, crate::dtype::Scalar::Int(v)).unwrap();
	}
	t
}

fn run_gmsa(config: BuildConfig, axis: isize, inputs: &[Tensor; 4]) -> Tensor {
	let rt = host_runtime(config);
	let [p, g, m, i] = inputs;
	run(&rt, OpKind::GatherMulScatterAdd { axis }, &[p, g, m, i])
}

//--------------------------------------------------------------------------------------------------

#[test]
fn test_k2_scenario() {
	let inputs = k2_inputs(DType::F32, DType::I32);
	let out = run_gmsa(BuildConfig::default(), 1, &inputs);
	assert_eq!(out.dims(), &[4, 8]);
	for (&a, e) in out.to_f64_vec().iter().zip(K2_EXPECTED) {
		assert_approx_eq!(a, e, 1e-5);
	}
}

#[test]
fn test_k1_scenario() {
	// gather rows [3, 0, 2, 1], scale row i by i + 1, scatter into rows [1, 1, 0, 3]
	let params = iota(&[4, 8], DType::F32);
	let gather = indices(&[4], DType::I64, &[3, 0, 2, 1]);
	let mut multiplier = Tensor::zeros(&[4, 8], DType::F32).unwrap();
	for i in 0..32 {
		multiplier.set(i, crate::dtype::Scalar::Int((i / 8 + 1) as i64)).unwrap();
	}
	let scatter = indices(&[4, 1], DType::I64, &[1, 1, 0, 3]);
	let out = run_gmsa(BuildConfig::default(), 0, &[params, gather, multiplier, scatter]);

	#[rustfmt::skip]
	let expected: [f32; 32] = [
		48.0, 51.0, 54.0, 57.0, 60.0, 63.0, 66.0, 69.0,
		24.0, 27.0, 30.0, 33.0, 36.0, 39.0, 42.0, 45.0,
		0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
		32.0, 36.0, 40.0, 44.0, 48.0, 52.0, 56.0, 60.0,
	];
	let out = out.to_vec::<f32>().unwrap();
	for (a, e) in out.iter().zip(expected) {
		assert_approx_eq!(*a, e, 1e-5);
	}
}

#[test]
fn test_inconsistent_scenario_is_rejected() {
	// take() on axis 1 gives (4, 4), which doesn't broadcast with (4, 8)
	let specs = [
		TensorSpec::new(&[4, 8], DType::F32).unwrap(),
		TensorSpec::new(&[4], DType::I32).unwrap(),
		TensorSpec::new(&[4, 8], DType::F32).unwrap(),
		TensorSpec::new(&[4, 2], DType::I32).unwrap(),
	];
	let err = crate::build(OpKind::GatherMulScatterAdd { axis: 1 }, &specs, &Target::default()).unwrap_err();
	assert_eq!(err.code, BuildError::ShapeMismatch);
}

#[test]
fn test_collisions_accumulate() {
	// every update lands on element (0, 0)
	let [params, gather, multiplier, _] = k2_inputs(DType::F32, DType::I32);
	let scatter = indices(&[4, 4, 2], DType::I32, &[0; 32]);
	let out = run_gmsa(BuildConfig::default(), 1, &[params, gather, multiplier, scatter]);
	let out = out.to_f64_vec();
	let total: f64 = K2_EXPECTED.iter().sum();
	assert_approx_eq!(out[0], total, 1e-4);
	assert!(out[1..].iter().all(|&v| v == 0.0));
}

#[test]
fn test_fused_equals_unfused() {
	let inputs = k2_inputs(DType::F32, DType::I64);
	let specs: Vec<_> = inputs.iter().map(Tensor::spec).collect();
	let kind = OpKind::GatherMulScatterAdd { axis: 1 };

	let rt = host_runtime(BuildConfig::default().with_fusion(FusionMode::Always));
	let fused = rt.build_op(kind, &specs).unwrap();
	assert!(fused.is_fused());
	assert_eq!(fused.stage_count(), 2);

	let rt = host_runtime(BuildConfig::default().with_fusion(FusionMode::Never));
	let unfused = rt.build_op(kind, &specs).unwrap();
	assert!(!unfused.is_fused());
	assert_eq!(unfused.stage_count(), 4);

	let a = run_gmsa(BuildConfig::default().with_fusion(FusionMode::Always), 1, &inputs);
	let b = run_gmsa(BuildConfig::default().with_fusion(FusionMode::Never), 1, &inputs);
	assert!(reference::tensors_close(&a, &b));
	assert!(reference::allclose(&b.to_f64_vec(), &K2_EXPECTED, 1e-4, 1e-5));
}

#[test]
fn test_half_precision() {
	let inputs = k2_inputs(DType::F16, DType::I32);
	let out = run_gmsa(BuildConfig::default(), 1, &inputs);
	assert_eq!(out.dtype(), DType::F16);
	let (rtol, atol) = reference::tolerance_for(DType::F16);
	assert!(reference::allclose(&out.to_f64_vec(), &K2_EXPECTED, rtol, atol));
}

#[test]
fn test_matches_reference_with_broadcast() {
	let mut rng = Rng::from_seed(1234);

	let mut values = vec![0.0_f64; 3 * 5 * 6];
	rng.randn_into(&mut values, 0.0, 1.0);
	let params = Tensor::from_slice(&[3, 5, 6], &values).unwrap();

	let mut g = vec![0_i32; 6];
	rng.randint_into(&mut g, 0, 5);
	let gather = Tensor::from_slice(&[2, 3], &g).unwrap();

	let mut values = vec![0.0_f64; 2 * 6];
	rng.randn_into(&mut values, 1.0, 0.5);
	let multiplier = Tensor::from_slice(&[2, 1, 6], &values).unwrap();

	// 18 tuples into the leading (3, 5) block
	let mut tuples = vec![0_i64; 18 * 2];
	for pair in tuples.chunks_exact_mut(2) {
		pair[0] = rng.randint(0, 3);
		pair[1] = rng.randint(0, 5);
	}
	let scatter = Tensor::from_slice(&[3, 2, 3, 2], &tuples).unwrap();

	let expected = reference::gather_mul_scatter_add(&params, &gather, &multiplier, &scatter, -2).unwrap();
	for fusion in [FusionMode::Auto, FusionMode::Always, FusionMode::Never] {
		let inputs = [params.clone(), gather.clone(), multiplier.clone(), scatter.clone()];
		let out = run_gmsa(BuildConfig::default().with_fusion(fusion), -2, &inputs);
		assert!(reference::tensors_close(&out, &expected), "fusion = {fusion:?}");
	}
}

#[test]
fn test_scalar_vectorization_off() {
	let inputs = k2_inputs(DType::F64, DType::I32);
	let config = BuildConfig { vectorize: false, max_threads_per_block: 32, ..BuildConfig::default() };
	let out = run_gmsa(config, 1, &inputs);
	assert_eq!(out.to_vec::<f64>().unwrap(), K2_EXPECTED);
}

//--------------------------------------------------------------------------------------------------
