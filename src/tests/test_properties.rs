//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use proptest::prelude::*;

use crate::lower::schedule::{BuildConfig, FusionMode};
use crate::reference;
use crate::tensor::Tensor;
use crate::tests::{host_runtime, run};
use crate::OpKind;

//--------------------------------------------------------------------------------------------------

proptest! {
	#![proptest_config(ProptestConfig::with_cases(48))]

	#[test]
	fn prop_cumsum_matches_reference(
		dims in prop::collection::vec(1_usize..7, 1..=3),
		axis_seed in any::<usize>(),
		negative in any::<bool>(),
		exclusive in any::<bool>(),
		reverse in any::<bool>(),
		seed in any::<u64>(),
	) {
		let rank = dims.len();
		let axis = axis_seed % rank;
		let axis = if negative { axis as isize - rank as isize } else { axis as isize };

		let elems: usize = dims.iter().product();
		let mut rng = crate::rng::Rng::from_seed(seed);
		let mut values = vec![0_i32; elems];
		rng.randint_into(&mut values, -100, 100);
		let x = Tensor::from_slice(&dims, &values).unwrap();

		let rt = host_runtime(BuildConfig::default());
		let out = run(&rt, OpKind::CumSum { axis, exclusive, reverse }, &[&x]);
		let expected = reference::cumsum(&x, axis, exclusive, reverse).unwrap();
		prop_assert_eq!(out.to_vec::<i32>().unwrap(), expected.to_vec::<i32>().unwrap());
	}

	#[test]
	fn prop_scatter_collisions_sum(
		rows in 1_usize..6,
		gather in prop::collection::vec(0_i32..6, 1..12),
		scatter_seed in prop::collection::vec(any::<u16>(), 12),
		fused in any::<bool>(),
	) {
		// params (6, 3), gather on axis 0, every gathered row lands on one of `rows` rows
		let n = gather.len();
		let params: Vec<f32> = (0..18).map(|i| (i % 7) as f32 - 3.0).collect();
		let params = Tensor::from_slice(&[6, 3], &params).unwrap();
		let gather_t = Tensor::from_slice(&[n], &gather).unwrap();
		let multiplier: Vec<f32> = (0..n).map(|i| (i % 3 + 1) as f32).collect();
		let multiplier = Tensor::from_slice(&[n, 1], &multiplier).unwrap();
		let scatter: Vec<i32> = (0..n).map(|i| i32::from(scatter_seed[i]) % rows as i32).collect();
		let scatter = Tensor::from_slice(&[n, 1], &scatter).unwrap();

		let fusion = if fused { FusionMode::Always } else { FusionMode::Never };
		let rt = host_runtime(BuildConfig::default().with_fusion(fusion));
		let out = run(&rt, OpKind::GatherMulScatterAdd { axis: 0 }, &[&params, &gather_t, &multiplier, &scatter]);
		let expected = reference::gather_mul_scatter_add(&params, &gather_t, &multiplier, &scatter, 0).unwrap();
		prop_assert!(reference::tensors_close(&out, &expected));

		// nothing is lost when updates collide
		let mut total = 0.0;
		for (i, &g) in gather.iter().enumerate() {
			for c in 0..3 {
				let value = ((g as usize * 3 + c) % 7) as f64 - 3.0;
				total += value * (i % 3 + 1) as f64;
			}
		}
		let sum: f64 = out.to_f64_vec().iter().sum();
		prop_assert!((sum - total).abs() < 1e-3);
	}
}

//--------------------------------------------------------------------------------------------------
