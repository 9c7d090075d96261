//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use kfuse::rng::Rng;
use kfuse::{DType, OpKind, Runtime, Tensor, TensorSpec};

// usage: kfuse [-v...] [--source]
fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args: Vec<String> = std::env::args().skip(1).collect();
	let verbosity = args
		.iter()
		.filter(|a| a.len() > 1 && a.starts_with('-') && a[1..].chars().all(|c| c == 'v'))
		.map(|a| a.len() - 1)
		.sum::<usize>();
	let show_source = args.iter().any(|a| a == "--source");

	stderrlog::new()
		.module(module_path!())
		.module("kfuse")
		.verbosity(verbosity + 1)
		.init()?;

	let rt = Runtime::host();
	log::info!("device: {}, target: {}", rt.device().name(), rt.target());

	//-- gather, multiply, scatter-add

	let mut rng = Rng::from_seed(17);
	let mut params = [0.0_f32; 32];
	rng.randn_into(&mut params, 0.0, 1.0);
	let params = Tensor::from_slice(&[4, 8], &params)?;
	let gather_indices = Tensor::from_slice(&[4], &[3_i32, 0, 2, 1])?;
	let multiplier = Tensor::from_slice(&[4, 4], &[0.5_f32; 16])?;
	let mut scatter = [0_i32; 32];
	for pair in scatter.chunks_exact_mut(2) {
		pair[0] = rng.randint(0, 4) as i32;
		pair[1] = rng.randint(0, 8) as i32;
	}
	let scatter_indices = Tensor::from_slice(&[4, 4, 2], &scatter)?;

	let inputs = [params.spec(), gather_indices.spec(), multiplier.spec(), scatter_indices.spec()];
	let module = rt.build_op(OpKind::GatherMulScatterAdd { axis: 1 }, &inputs)?;
	println!("{}: {} stage(s), fused = {}", module.name(), module.stage_count(), module.is_fused());
	if show_source {
		println!("{}", module.source());
		println!("{}", module.host_stub());
	}

	let mut out = Tensor::zeros(params.dims(), DType::F32)?;
	rt.launch(&module, &[&params, &gather_indices, &multiplier, &scatter_indices], &mut out)?;
	let expected =
		kfuse::reference::gather_mul_scatter_add(&params, &gather_indices, &multiplier, &scatter_indices, 1)?;
	println!("out = {:?}", out.to_vec::<f32>()?);
	println!("matches reference: {}", kfuse::reference::tensors_close(&out, &expected));

	//-- cumsum

	let x = Tensor::from_slice(&[2, 5], &[1_i32, 2, 3, 4, 5, 6, 7, 8, 9, 10])?;
	let spec = TensorSpec::new(x.dims(), DType::I32)?;
	for (exclusive, reverse) in [(false, false), (true, false), (false, true), (true, true)] {
		let kind = OpKind::CumSum { axis: -1, exclusive, reverse };
		let module = rt.build_op(kind, std::slice::from_ref(&spec))?;
		if show_source {
			println!("{}", module.source());
		}
		let mut out = Tensor::zeros(x.dims(), DType::I32)?;
		rt.launch(&module, &[&x], &mut out)?;
		println!("cumsum(exclusive={exclusive}, reverse={reverse}) = {:?}", out.to_vec::<i32>()?);
	}

	log::info!("cached modules: {}", rt.cache().len());
	Ok(())
}
