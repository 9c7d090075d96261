//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::dtype::HasDType;

// State initialization constant ("expand 32-byte k")
const CONST: [u32; 4] = [0x_6170_7865, 0x_3320_646e, 0x_7962_2d32, 0x_6b20_6574];

const STATE_WORDS: usize = 16;

/// Deterministic ChaCha-based generator for test data.
///
/// Every generator is created from an explicit seed. There is no global state.
pub struct Rng {
	state: [u32; STATE_WORDS],
	block: [u32; STATE_WORDS],
	pos: usize,
	spare_normal: Option<f64>,
}

#[allow(clippy::indexing_slicing)]
impl Rng {
	pub fn new(key: [u32; 8], nonce: [u32; 2]) -> Self {
		let [k0, k1, k2, k3, k4, k5, k6, k7] = key;
		let [v2, v3] = nonce;
		#[rustfmt::skip]
		let state = [
			CONST[0], CONST[1], CONST[2], CONST[3],
			k0, k1, k2, k3,
			k4, k5, k6, k7,
			0, 0, v2, v3,
		];
		Self {
			state,
			block: [0; STATE_WORDS],
			pos: STATE_WORDS,
			spare_normal: None,
		}
	}

	/// Expands a single number into a full key with splitmix64.
	pub fn from_seed(seed: u64) -> Self {
		let mut x = seed;
		let mut next = || {
			x = x.wrapping_add(0x_9e37_79b9_7f4a_7c15);
			let mut z = x;
			z = (z ^ (z >> 30)).wrapping_mul(0x_bf58_476d_1ce4_e5b9);
			z = (z ^ (z >> 27)).wrapping_mul(0x_94d0_49bb_1331_11eb);
			z ^ (z >> 31)
		};
		let mut key = [0_u32; 8];
		for pair in key.chunks_exact_mut(2) {
			let w = next();
			pair[0] = w as u32;
			pair[1] = (w >> 32) as u32;
		}
		Self::new(key, [0, 0])
	}

	// generates a block of random numbers
	#[inline(never)]
	fn next_block(&mut self) {
		let mut result = self.state;

		// do 7 double rounds, i.e. 14 rounds
		for _ in 0..7 {
			Self::quarter_round(0, 4, 8, 12, &mut result);
			Self::quarter_round(1, 5, 9, 13, &mut result);
			Self::quarter_round(2, 6, 10, 14, &mut result);
			Self::quarter_round(3, 7, 11, 15, &mut result);

			Self::quarter_round(0, 5, 10, 15, &mut result);
			Self::quarter_round(1, 6, 11, 12, &mut result);
			Self::quarter_round(2, 7, 8, 13, &mut result);
			Self::quarter_round(3, 4, 9, 14, &mut result);
		}

		for (r, s) in result.iter_mut().zip(self.state.iter()) {
			*r = r.wrapping_add(*s);
		}

		// 64-bit block counter
		let (t, c) = self.state[12].overflowing_add(1);
		self.state[12] = t;
		self.state[13] = self.state[13].wrapping_add(u32::from(c));

		self.block = result;
		self.pos = 0;
	}

	#[inline(always)]
	fn quarter_round(a: usize, b: usize, c: usize, d: usize, state: &mut [u32; STATE_WORDS]) {
		state[a] = state[a].wrapping_add(state[b]);
		state[d] ^= state[a];
		state[d] = state[d].rotate_left(16);

		state[c] = state[c].wrapping_add(state[d]);
		state[b] ^= state[c];
		state[b] = state[b].rotate_left(12);

		state[a] = state[a].wrapping_add(state[b]);
		state[d] ^= state[a];
		state[d] = state[d].rotate_left(8);

		state[c] = state[c].wrapping_add(state[d]);
		state[b] ^= state[c];
		state[b] = state[b].rotate_left(7);
	}

	pub fn next_u32(&mut self) -> u32 {
		if self.pos >= STATE_WORDS {
			self.next_block();
		}
		let v = self.block[self.pos];
		self.pos += 1;
		v
	}

	pub fn next_u64(&mut self) -> u64 {
		let lo = u64::from(self.next_u32());
		let hi = u64::from(self.next_u32());
		(hi << 32) | lo
	}

	/// Uniform value in `[0.0, 1.0)` with 53 bits of precision.
	pub fn get_uniform(&mut self) -> f64 {
		(self.next_u64() >> 11) as f64 * (1.0 / 9_007_199_254_740_992.0)
	}

	/// Normal distribution with mean 0 and variance 1.
	/// The generated values are guaranteed to be in the range (-10.0, 10.0)
	pub fn get_normal(&mut self) -> f64 {
		if let Some(z) = self.spare_normal.take() {
			return z;
		}

		let x = 1.0 - self.get_uniform(); // (0.0, 1.0]
		let y = self.get_uniform(); // [0.0, 1.0)

		// box muller transform
		let r = (-2.0 * x.ln()).sqrt();
		let theta = std::f64::consts::TAU * y;
		let z0 = Self::clamp_normal(r * theta.cos());
		let z1 = Self::clamp_normal(r * theta.sin());

		self.spare_normal = Some(z1);
		z0
	}

	fn clamp_normal(z: f64) -> f64 {
		if z.abs() >= 10.0 {
			log::warn!("Rng::get_normal(): clamping {z} to (-10.0, 10.0)");
			return 0.0;
		}
		z
	}

	/// Fills `out` with samples of `N(miu, sigma^2)`, rounded to the element type.
	pub fn randn_into<T: HasDType>(&mut self, out: &mut [T], miu: f64, sigma: f64) {
		for v in out.iter_mut() {
			*v = T::from_f64(miu + sigma * self.get_normal());
		}
	}

	/// Uniform integer in `[low, high)`. Returns `low` when the range is empty.
	pub fn randint(&mut self, low: i64, high: i64) -> i64 {
		if high <= low {
			return low;
		}
		let span = high.wrapping_sub(low) as u64;
		// rejection sampling to avoid modulo bias
		let zone = u64::MAX - (u64::MAX % span);
		loop {
			let v = self.next_u64();
			if v < zone {
				return low.wrapping_add((v % span) as i64);
			}
		}
	}

	pub fn randint_into<T: HasDType>(&mut self, out: &mut [T], low: i64, high: i64) {
		for v in out.iter_mut() {
			*v = T::from_f64(self.randint(low, high) as f64);
		}
	}
}

//--------------------------------------------------------------------------------------------------


//--------------------------------------------------------------------------------------------------
