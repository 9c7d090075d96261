//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use askama::Template;

pub struct StageTemplate {
	pub kernel_name: String,
	pub template_name: &'static str,
	pub grid: usize,
	pub block: usize,
	pub vector_width: usize,
	pub params: Vec<String>,
	pub host_args: Vec<String>,
	pub body: String,
}

pub struct WorkspaceTemplate {
	pub name: String,
	pub ctype: &'static str,
	pub bytes: usize,
}

#[derive(Template)]
#[template(escape = "none", path = "kernel.cu")]
pub struct KernelTemplate<'a> {
	pub name: &'a str,
	pub arch: String,
	pub stages: &'a [StageTemplate],
}

#[derive(Template)]
#[template(escape = "none", path = "host_stub.cu")]
pub struct HostStubTemplate<'a> {
	pub name: &'a str,
	pub args: Vec<String>,
	pub stages: &'a [StageTemplate],
	pub workspaces: Vec<WorkspaceTemplate>,
}
