//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::ErrPack;
use crate::dtype::DType;
use crate::error::BuildError;

//--------------------------------------------------------------------------------------------------

/// Description of the CUDA device the kernels are generated for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Target {
	/// Compute capability, e.g. 80 for `sm_80`.
	pub sm: u32,
	pub warp_size: usize,
	pub max_threads_per_block: usize,
	pub sm_count: usize,
	pub max_blocks_per_sm: usize,
}

impl Default for Target {
	fn default() -> Self {
		Self::cuda(70)
	}
}

impl Target {
	pub fn cuda(sm: u32) -> Self {
		let sm_count = match sm {
			..=61 => 56,
			62..=79 => 80,
			80..=89 => 108,
			_ => 132,
		};
		Self {
			sm,
			warp_size: 32,
			max_threads_per_block: 1024,
			sm_count,
			max_blocks_per_sm: 32,
		}
	}

	pub fn arch(&self) -> String {
		format!("sm_{}", self.sm)
	}

	/// `atomicAdd()` is available for this element type.
	pub fn has_atomic_add(&self, dtype: DType) -> bool {
		match dtype {
			DType::F16 => self.sm >= 70,
			DType::F64 => self.sm >= 60,
			DType::F32 | DType::I32 => true,
			// 64-bit integer atomicAdd only exists for unsigned long long
			DType::I64 => false,
		}
	}

	pub fn max_grid(&self) -> usize {
		self.sm_count * self.max_blocks_per_sm
	}

	pub fn key(&self) -> [u64; 3] {
		[
			u64::from(self.sm) | ((self.warp_size as u64) << 32),
			self.max_threads_per_block as u64 | ((self.max_blocks_per_sm as u64) << 32),
			self.sm_count as u64,
		]
	}
}

impl std::str::FromStr for Target {
	type Err = ErrPack<BuildError>;

	/// Accepts `cuda` and `cuda:sm_XY`.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let unsupported = || ErrPack::with_message(BuildError::UnsupportedOnTarget, format!("unknown target '{s}'"));
		let Some(rest) = s.strip_prefix("cuda") else {
			return Err(unsupported());
		};
		if rest.is_empty() {
			return Ok(Self::default());
		}
		let sm = rest
			.strip_prefix(":sm_")
			.and_then(|v| v.parse::<u32>().ok())
			.filter(|&sm| sm >= 30)
			.ok_or_else(unsupported)?;
		Ok(Self::cuda(sm))
	}
}

impl std::fmt::Display for Target {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "cuda:{}", self.arch())
	}
}

//--------------------------------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FusionMode {
	/// Fuse unless it would recompute too much and the unfused workspace fits.
	#[default]
	Auto,
	Always,
	Never,
}

impl std::str::FromStr for FusionMode {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, ()> {
		match s.to_ascii_lowercase().as_str() {
			"auto" => Ok(Self::Auto),
			"always" | "on" | "1" => Ok(Self::Always),
			"never" | "off" | "0" => Ok(Self::Never),
			_ => Err(()),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BuildConfig {
	pub fusion: FusionMode,
	pub max_threads_per_block: usize,
	pub vectorize: bool,
	pub bounds_check: bool,
	pub max_workspace_bytes: usize,
	pub max_recompute_factor: usize,
}

impl Default for BuildConfig {
	fn default() -> Self {
		Self {
			fusion: FusionMode::Auto,
			max_threads_per_block: 256,
			vectorize: true,
			bounds_check: true,
			max_workspace_bytes: 256 << 20,
			max_recompute_factor: 4,
		}
	}
}

impl BuildConfig {
	/// Defaults overridden by `KFUSE_FUSION`, `KFUSE_BLOCK_SIZE`, `KFUSE_VECTORIZE`
	/// and `KFUSE_BOUNDS_CHECK`. Unparsable values are ignored with a warning.
	pub fn from_env() -> Self {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
		let mut config = Self::default();
		if let Some(v) = lookup("KFUSE_FUSION") {
			match v.parse::<FusionMode>() {
				Ok(fusion) => config.fusion = fusion,
				Err(()) => log::warn!("KFUSE_FUSION: ignoring unknown value '{v}'"),
			}
		}
		if let Some(v) = lookup("KFUSE_BLOCK_SIZE") {
			match v.parse::<usize>() {
				Ok(n) if n > 0 => config.max_threads_per_block = n,
				_ => log::warn!("KFUSE_BLOCK_SIZE: ignoring invalid value '{v}'"),
			}
		}
		if let Some(v) = lookup("KFUSE_VECTORIZE") {
			match parse_bool(&v) {
				Some(b) => config.vectorize = b,
				None => log::warn!("KFUSE_VECTORIZE: ignoring invalid value '{v}'"),
			}
		}
		if let Some(v) = lookup("KFUSE_BOUNDS_CHECK") {
			match parse_bool(&v) {
				Some(b) => config.bounds_check = b,
				None => log::warn!("KFUSE_BOUNDS_CHECK: ignoring invalid value '{v}'"),
			}
		}
		config
	}

	pub fn with_fusion(mut self, fusion: FusionMode) -> Self {
		self.fusion = fusion;
		self
	}

	pub fn key(&self) -> [u64; 4] {
		let fusion = match self.fusion {
			FusionMode::Auto => 0,
			FusionMode::Always => 1,
			FusionMode::Never => 2,
		};
		[
			fusion | (u64::from(self.vectorize) << 8) | (u64::from(self.bounds_check) << 9),
			self.max_threads_per_block as u64,
			self.max_workspace_bytes as u64,
			self.max_recompute_factor as u64,
		]
	}
}

fn parse_bool(s: &str) -> Option<bool> {
	match s.to_ascii_lowercase().as_str() {
		"1" | "true" | "on" | "yes" => Some(true),
		"0" | "false" | "off" | "no" => Some(false),
		_ => None,
	}
}

//--------------------------------------------------------------------------------------------------

/// How the iterations of a stage map to threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BandTemplate {
	/// Independent outputs. Vectorizable.
	Elementwise,

	/// Independent iterations accumulating into shared outputs with atomics.
	ScatterAccumulate,

	/// One thread per line, sequential loop along the line.
	SequentialScan,
}

impl BandTemplate {
	pub fn name(self) -> &'static str {
		match self {
			Self::Elementwise => "elementwise",
			Self::ScatterAccumulate => "scatter_accumulate",
			Self::SequentialScan => "sequential_scan",
		}
	}

	pub fn vectorizable(self) -> bool {
		self == Self::Elementwise
	}

	/// Prefix of the variable that counts grid-stride iterations.
	pub fn iteration_name(self) -> &'static str {
		match self {
			Self::Elementwise => "i",
			Self::ScatterAccumulate => "u",
			Self::SequentialScan => "l",
		}
	}

	/// Maps `work` items to threads. For scans, `work` is the number of lines.
	///
	/// Only elementwise stages process more than one element per iteration.
	pub fn plan(
		self,
		work: usize,
		innermost: usize,
		dtype: DType,
		target: &Target,
		config: &BuildConfig,
	) -> Result<StagePlan, ErrPack<BuildError>> {
		let vector_width = if self.vectorizable() { vector_width(dtype, innermost, config) } else { 1 };
		let iterations = work / vector_width;
		let launch = launch_config(iterations, target, config)?;
		Ok(StagePlan { vector_width, iterations, launch })
	}
}

/// Thread mapping chosen for one stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagePlan {
	pub vector_width: usize,

	/// Iterations of the grid-stride loop.
	pub iterations: usize,
	pub launch: LaunchConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchConfig {
	pub grid: usize,
	pub block: usize,
}

/// Largest power of two `w` with `w * dtype.bytes() <= 16` that divides `innermost`.
pub fn vector_width(dtype: DType, innermost: usize, config: &BuildConfig) -> usize {
	if !config.vectorize {
		return 1;
	}
	let mut w = 16 / dtype.bytes();
	while w > 1 && innermost % w != 0 {
		w /= 2;
	}
	w
}

/// Picks block and grid for a grid-stride loop of `iterations` iterations.
pub fn launch_config(
	iterations: usize,
	target: &Target,
	config: &BuildConfig,
) -> Result<LaunchConfig, ErrPack<BuildError>> {
	if iterations > i64::MAX as usize {
		return Err(BuildError::schedule_failed(format!("extent {iterations} overflows 64-bit indexing")));
	}
	let warp = target.warp_size;
	let cap = config.max_threads_per_block.min(target.max_threads_per_block);
	if cap < warp {
		return Err(BuildError::schedule_failed(format!(
			"block size limit {cap} is smaller than the warp size {warp}"
		)));
	}
	let cap = cap / warp * warp;
	let needed = iterations.max(1).div_ceil(warp) * warp;
	let block = cap.min(needed);
	let grid = iterations.max(1).div_ceil(block).min(target.max_grid()).max(1);
	Ok(LaunchConfig { grid, block })
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_target() {
		assert_eq!("cuda".parse::<Target>().unwrap(), Target::default());
		let t: Target = "cuda:sm_80".parse().unwrap();
		assert_eq!(t.sm, 80);
		assert_eq!(t.to_string(), "cuda:sm_80");
		assert_eq!("rocm".parse::<Target>().unwrap_err().code, BuildError::UnsupportedOnTarget);
		assert!("cuda:sm_x".parse::<Target>().is_err());
		assert!(!Target::cuda(60).has_atomic_add(DType::F16));
		assert!(Target::cuda(60).has_atomic_add(DType::F64));
	}

	#[test]
	fn test_config_from_lookup() {
		let config = BuildConfig::from_lookup(|name| match name {
			"KFUSE_FUSION" => Some("never".to_string()),
			"KFUSE_BLOCK_SIZE" => Some("128".to_string()),
			"KFUSE_VECTORIZE" => Some("off".to_string()),
			"KFUSE_BOUNDS_CHECK" => Some("maybe".to_string()),
			_ => None,
		});
		assert_eq!(config.fusion, FusionMode::Never);
		assert_eq!(config.max_threads_per_block, 128);
		assert!(!config.vectorize);
		assert!(config.bounds_check);
	}

	#[test]
	fn test_vector_width() {
		let config = BuildConfig::default();
		assert_eq!(vector_width(DType::F32, 8, &config), 4);
		assert_eq!(vector_width(DType::F32, 6, &config), 2);
		assert_eq!(vector_width(DType::F16, 24, &config), 8);
		assert_eq!(vector_width(DType::F64, 7, &config), 1);
		let config = BuildConfig { vectorize: false, ..BuildConfig::default() };
		assert_eq!(vector_width(DType::F32, 8, &config), 1);
	}

	#[test]
	fn test_plan_vectorizes_only_elementwise() {
		let target = Target::default();
		let config = BuildConfig::default();

		let plan = BandTemplate::Elementwise.plan(1024, 16, DType::F32, &target, &config).unwrap();
		assert_eq!(plan.vector_width, 4);
		assert_eq!(plan.iterations, 256);

		for template in [BandTemplate::ScatterAccumulate, BandTemplate::SequentialScan] {
			let plan = template.plan(1024, 16, DType::F32, &target, &config).unwrap();
			assert_eq!(plan.vector_width, 1, "{}", template.name());
			assert_eq!(plan.iterations, 1024);
			assert_eq!(plan.launch, launch_config(1024, &target, &config).unwrap());
		}
	}

	#[test]
	fn test_launch_config() {
		let target = Target::default();
		let config = BuildConfig::default();
		let lc = launch_config(10, &target, &config).unwrap();
		assert_eq!(lc, LaunchConfig { grid: 1, block: 32 });
		let lc = launch_config(1000, &target, &config).unwrap();
		assert_eq!(lc, LaunchConfig { grid: 4, block: 256 });
		let lc = launch_config(1 << 30, &target, &config).unwrap();
		assert_eq!(lc.grid, target.max_grid());
		let config = BuildConfig { max_threads_per_block: 8, ..BuildConfig::default() };
		assert_eq!(launch_config(10, &target, &config).unwrap_err().code, BuildError::ScheduleFailed);
	}
}

//--------------------------------------------------------------------------------------------------
