//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::lower::schedule::{BuildConfig, Target};
use crate::runtime::Runtime;
use crate::runtime::host::HostDevice;
use crate::tensor::Tensor;
use crate::{DType, OpKind};

pub mod test_errors;
pub mod test_gather_mul_scatter_add;
pub mod test_properties;

//--------------------------------------------------------------------------------------------------

pub fn host_runtime(config: BuildConfig) -> Runtime {
	Runtime::new(HostDevice::new(), Target::default(), config)
}

/// Builds `kind` for the given inputs, launches it into a zeroed output and returns the output.
///
/// Prints the kernel source when the launch fails.
pub fn run(rt: &Runtime, kind: OpKind, inputs: &[&Tensor]) -> Tensor {
	let specs: Vec<_> = inputs.iter().map(|t| t.spec()).collect();
	let module = rt.build_op(kind, &specs).unwrap();
	let out_spec = &module.signature().output;
	let mut out = Tensor::zeros(out_spec.dims(), out_spec.dtype).unwrap();
	if let Err(e) = rt.launch(&module, inputs, &mut out) {
		println!("{}", module.source());
		panic!("launch of {} failed: {e}", module.name());
	}
	out
}

/// `[[r * cols + c for c in cols] for r in rows]` converted to `dtype`
pub fn iota(dims: &[usize], dtype: DType) -> Tensor {
	let mut t = Tensor::zeros(dims, dtype).unwrap();
	for i in 0..t.elems() {
		t.set(i, crate::dtype::Scalar::Int(i as i64)).unwrap();
	}
	t
}

//--------------------------------------------------------------------------------------------------
