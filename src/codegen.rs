//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use askama::Template;

use crate::ErrPack;
use crate::error::BuildError;
use crate::lower::ir::{BufferKind, LoweredModule};
use crate::lower::schedule::Target;

pub mod cuda;
pub mod templates;

use cuda::BodyPrinter;
use templates::{HostStubTemplate, KernelTemplate, StageTemplate, WorkspaceTemplate};

//--------------------------------------------------------------------------------------------------

pub struct GeneratedSource {
	pub kernel: String,
	pub host_stub: String,
}

pub fn kernel_name(module_name: &str, stage_index: usize, stage_name: &str) -> String {
	format!("{module_name}_{stage_index}_{stage_name}")
}

/// Emits the CUDA translation unit with all stages and the C++ launch stub.
pub fn generate(
	name: &str,
	module: &LoweredModule,
	target: &Target,
) -> Result<GeneratedSource, ErrPack<BuildError>> {
	let mut stages = Vec::with_capacity(module.stages.len());
	for (i, stage) in module.stages.iter().enumerate() {
		let printer = BodyPrinter::new(module, stage);
		let mut body = String::new();
		printer.print(&mut body).map_err(|_| {
			ErrPack::with_message(BuildError::CodegenFailed, format!("failed to print stage {}", stage.name))
		})?;
		stages.push(StageTemplate {
			kernel_name: kernel_name(name, i, &stage.name),
			template_name: stage.template.name(),
			grid: stage.launch.grid,
			block: stage.launch.block,
			vector_width: stage.vector_width,
			params: printer.param_decls(),
			host_args: printer.host_args(),
			body,
		});
	}

	let kernel = KernelTemplate { name, arch: target.arch(), stages: &stages }.render()?;

	let args = module
		.buffers
		.iter()
		.filter(|b| b.kind != BufferKind::Workspace)
		.map(|b| format!("{} {}[{}]", b.dtype.cuda_type(), b.name, b.elems))
		.collect();
	let workspaces = module
		.buffers
		.iter()
		.filter(|b| b.kind == BufferKind::Workspace)
		.map(|b| WorkspaceTemplate { name: b.name.clone(), ctype: b.dtype.cuda_type(), bytes: b.bytes() })
		.collect();
	let host_stub = HostStubTemplate { name, args, stages: &stages, workspaces }.render()?;

	log::trace!("generated kernel source for {name}:\n{kernel}");
	log::trace!("generated host stub for {name}:\n{host_stub}");
	Ok(GeneratedSource { kernel, host_stub })
}

//--------------------------------------------------------------------------------------------------


//--------------------------------------------------------------------------------------------------
