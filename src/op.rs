//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::ErrPack;
use crate::dtype::DType;
use crate::error::BuildError;
use crate::shape::{Dims, Shape, broadcast_shapes, normalize_axis};

//--------------------------------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorSpec {
	pub shape: Shape,
	pub dtype: DType,
}

impl TensorSpec {
	pub fn new(dims: &[usize], dtype: DType) -> Result<Self, ErrPack<BuildError>> {
		Ok(Self { shape: Shape::new(dims)?, dtype })
	}

	pub fn dims(&self) -> &[usize] {
		self.shape.dims()
	}

	pub fn elems(&self) -> usize {
		self.shape.elems()
	}
}

impl std::fmt::Display for TensorSpec {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{}{}", self.dtype, self.shape)
	}
}

//--------------------------------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
	/// Inputs: `params`, `gather_indices`, `multiplier`, `scatter_indices`.
	GatherMulScatterAdd { axis: isize },

	/// Input: `x`.
	CumSum { axis: isize, exclusive: bool, reverse: bool },
}

impl OpKind {
	pub fn name(&self) -> &'static str {
		match self {
			Self::GatherMulScatterAdd { .. } => "gather_mul_scatter_add",
			Self::CumSum { .. } => "cumsum",
		}
	}

	pub fn input_count(&self) -> usize {
		match self {
			Self::GatherMulScatterAdd { .. } => 4,
			Self::CumSum { .. } => 1,
		}
	}
}

//--------------------------------------------------------------------------------------------------

/// Shapes derived while validating a gather-mul-scatter-add instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatherScatterGeometry {
	/// Normalized gather axis.
	pub axis: usize,

	/// `S1[..axis] ++ S2 ++ S1[axis+1..]`
	pub gathered: Dims,

	/// Broadcast of `gathered` against the multiplier shape.
	pub product: Dims,

	/// Length of one scatter index tuple. `1 <= index_depth <= rank(S1)`.
	pub index_depth: usize,

	/// `S4[..-1]`
	pub batch: Dims,

	/// `batch ++ S1[index_depth..]`
	pub update: Dims,
}

impl GatherScatterGeometry {
	pub fn update_elems(&self) -> usize {
		self.update.iter().product()
	}

	pub fn product_elems(&self) -> usize {
		self.product.iter().product()
	}

	pub fn gathered_elems(&self) -> usize {
		self.gathered.iter().product()
	}

	/// How many times the fused kernel loads each gathered element.
	pub fn recompute_factor(&self) -> usize {
		self.update_elems() / self.gathered_elems()
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanGeometry {
	pub axis: usize,
	pub exclusive: bool,
	pub reverse: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Geometry {
	GatherScatter(GatherScatterGeometry),
	Scan(ScanGeometry),
}

//--------------------------------------------------------------------------------------------------

/// A validated operator instance. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpDescriptor {
	kind: OpKind,
	inputs: Vec<TensorSpec>,
	output: TensorSpec,
	geometry: Geometry,
}

impl OpDescriptor {
	pub fn new(kind: OpKind, inputs: &[TensorSpec]) -> Result<Self, ErrPack<BuildError>> {
		if inputs.len() != kind.input_count() {
			return Err(BuildError::shape_mismatch(format!(
				"{} takes {} inputs, got {}",
				kind.name(),
				kind.input_count(),
				inputs.len()
			)));
		}
		let (output, geometry) = match kind {
			OpKind::GatherMulScatterAdd { axis } => Self::check_gather_scatter(axis, inputs)?,
			OpKind::CumSum { axis, exclusive, reverse } => {
				Self::check_cumsum(axis, exclusive, reverse, &inputs[0])?
			},
		};
		Ok(Self { kind, inputs: inputs.to_vec(), output, geometry })
	}

	fn check_gather_scatter(
		axis: isize,
		inputs: &[TensorSpec],
	) -> Result<(TensorSpec, Geometry), ErrPack<BuildError>> {
		let [params, gather_indices, multiplier, scatter_indices] = inputs else {
			return Err(BuildError::shape_mismatch("gather_mul_scatter_add takes 4 inputs"));
		};

		if !params.dtype.is_float() {
			return Err(BuildError::unsupported_dtype(format!(
				"params must be a floating point tensor, got {}",
				params.dtype
			)));
		}
		if multiplier.dtype != params.dtype {
			return Err(BuildError::unsupported_dtype(format!(
				"multiplier dtype {} differs from params dtype {}",
				multiplier.dtype, params.dtype
			)));
		}
		for (name, spec) in [("gather_indices", gather_indices), ("scatter_indices", scatter_indices)] {
			if !spec.dtype.is_int() {
				return Err(BuildError::unsupported_dtype(format!(
					"{name} must be int32 or int64, got {}",
					spec.dtype
				)));
			}
		}

		let s1 = params.dims();
		let rank = s1.len();
		let axis_n = normalize_axis(axis, rank).ok_or_else(|| BuildError::invalid_axis(axis, rank))?;

		let mut gathered = Dims::new();
		gathered.extend_from_slice(&s1[..axis_n]);
		gathered.extend_from_slice(gather_indices.dims());
		gathered.extend_from_slice(&s1[axis_n + 1..]);

		let s4 = scatter_indices.dims();
		let Some((&index_depth, batch)) = s4.split_last() else {
			return Err(ErrPack::with_message(
				BuildError::IndexRankMismatch,
				"scatter_indices must have at least one dimension",
			));
		};
		if index_depth > rank {
			return Err(ErrPack::with_message(
				BuildError::IndexRankMismatch,
				format!("scatter index tuples have {index_depth} coordinates, params rank is {rank}"),
			));
		}
		let mut update = Dims::from_slice(batch);
		update.extend_from_slice(&s1[index_depth..]);

		let product = broadcast_shapes(&[gathered.as_slice(), multiplier.dims()]).map_err(|_| {
			BuildError::shape_mismatch(format!(
				"gathered shape {gathered:?} does not broadcast with multiplier shape {}",
				multiplier.shape
			))
		})?;
		let fits = broadcast_shapes(&[product.as_slice(), update.as_slice()]).is_ok_and(|b| b == update);
		if !fits {
			return Err(BuildError::shape_mismatch(format!(
				"product shape {product:?} does not broadcast to update shape {update:?}"
			)));
		}

		let output = TensorSpec { shape: params.shape.clone(), dtype: params.dtype };
		let geometry = GatherScatterGeometry {
			axis: axis_n,
			gathered,
			product,
			index_depth,
			batch: Dims::from_slice(batch),
			update,
		};
		Ok((output, Geometry::GatherScatter(geometry)))
	}

	fn check_cumsum(
		axis: isize,
		exclusive: bool,
		reverse: bool,
		x: &TensorSpec,
	) -> Result<(TensorSpec, Geometry), ErrPack<BuildError>> {
		let rank = x.shape.rank();
		let axis = normalize_axis(axis, rank).ok_or_else(|| BuildError::invalid_axis(axis, rank))?;
		Ok((x.clone(), Geometry::Scan(ScanGeometry { axis, exclusive, reverse })))
	}

	pub fn kind(&self) -> OpKind {
		self.kind
	}

	pub fn inputs(&self) -> &[TensorSpec] {
		&self.inputs
	}

	pub fn output(&self) -> &TensorSpec {
		&self.output
	}

	pub fn geometry(&self) -> &Geometry {
		&self.geometry
	}

	/// Element type of the computation. Index inputs don't count.
	pub fn data_dtype(&self) -> DType {
		self.output.dtype
	}

	/// Signature words: kind, normalized attributes, every input shape and dtype.
	///
	/// Two descriptors with equal keys lower to the same kernels.
	pub fn key(&self) -> Vec<u64> {
		let mut key = Vec::with_capacity(4 + self.inputs.len() * 8);
		match &self.geometry {
			Geometry::GatherScatter(g) => {
				key.push(1);
				key.push(g.axis as u64);
			},
			Geometry::Scan(s) => {
				key.push(2);
				key.push(s.axis as u64 | (u64::from(s.exclusive) << 32) | (u64::from(s.reverse) << 33));
			},
		}
		key.push(self.inputs.len() as u64);
		for input in &self.inputs {
			key.push(u64::from(input.dtype.id()) | ((input.dims().len() as u64) << 8));
			key.extend(input.dims().iter().map(|&d| d as u64));
		}
		key
	}

	pub fn describe(&self) -> String {
		let inputs: Vec<String> = self.inputs.iter().map(ToString::to_string).collect();
		format!("{}({}) -> {}", self.kind.name(), inputs.join(", "), self.output)
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;

	fn spec(dims: &[usize], dtype: DType) -> TensorSpec {
		TensorSpec::new(dims, dtype).unwrap()
	}

	fn gmsa(axis: isize, s1: &[usize], s2: &[usize], s3: &[usize], s4: &[usize]) -> Result<OpDescriptor, ErrPack<BuildError>> {
		OpDescriptor::new(
			OpKind::GatherMulScatterAdd { axis },
			&[spec(s1, DType::F32), spec(s2, DType::I32), spec(s3, DType::F32), spec(s4, DType::I32)],
		)
	}

	#[test]
	fn test_gather_scatter_shapes() {
		let desc = gmsa(1, &[4, 8], &[4], &[4, 4], &[4, 4, 2]).unwrap();
		let Geometry::GatherScatter(g) = desc.geometry() else { panic!() };
		assert_eq!(g.gathered.as_slice(), &[4, 4]);
		assert_eq!(g.update.as_slice(), &[4, 4]);
		assert_eq!(g.index_depth, 2);
		assert_eq!(desc.output().dims(), &[4, 8]);

		// partial index tuples address whole rows
		let desc = gmsa(0, &[4, 8], &[4], &[4, 8], &[4, 1]).unwrap();
		let Geometry::GatherScatter(g) = desc.geometry() else { panic!() };
		assert_eq!(g.update.as_slice(), &[4, 8]);
		assert_eq!(g.recompute_factor(), 1);
	}

	#[test]
	fn test_inconsistent_shapes_rejected() {
		let err = gmsa(1, &[4, 8], &[4], &[4, 8], &[4, 2]).unwrap_err();
		assert_eq!(err.code, BuildError::ShapeMismatch);

		let err = gmsa(1, &[4, 8], &[4], &[4, 4], &[4, 3]).unwrap_err();
		assert_eq!(err.code, BuildError::IndexRankMismatch);

		let err = gmsa(2, &[4, 8], &[4], &[4, 4], &[4, 4, 2]).unwrap_err();
		assert_eq!(err.code, BuildError::InvalidAxis);
	}

	#[test]
	fn test_dtype_rules() {
		let err = OpDescriptor::new(
			OpKind::GatherMulScatterAdd { axis: 0 },
			&[spec(&[4], DType::I32), spec(&[4], DType::I32), spec(&[4], DType::I32), spec(&[4, 1], DType::I32)],
		)
		.unwrap_err();
		assert_eq!(err.code, BuildError::UnsupportedDType);

		let err = OpDescriptor::new(
			OpKind::GatherMulScatterAdd { axis: 0 },
			&[spec(&[4], DType::F32), spec(&[4], DType::F32), spec(&[4], DType::F32), spec(&[4, 1], DType::I32)],
		)
		.unwrap_err();
		assert_eq!(err.code, BuildError::UnsupportedDType);
	}

	#[test]
	fn test_cumsum_axis_and_key() {
		let x = spec(&[3, 5], DType::F16);
		let a = OpDescriptor::new(OpKind::CumSum { axis: -1, exclusive: false, reverse: true }, &[x.clone()]).unwrap();
		let b = OpDescriptor::new(OpKind::CumSum { axis: 1, exclusive: false, reverse: true }, &[x.clone()]).unwrap();
		assert_eq!(a.key(), b.key());
		let c = OpDescriptor::new(OpKind::CumSum { axis: 1, exclusive: true, reverse: true }, &[x.clone()]).unwrap();
		assert_ne!(a.key(), c.key());

		let err = OpDescriptor::new(OpKind::CumSum { axis: 2, exclusive: false, reverse: false }, &[x]).unwrap_err();
		assert_eq!(err.code, BuildError::InvalidAxis);
	}
}

//--------------------------------------------------------------------------------------------------
