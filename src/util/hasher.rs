//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::hash::Hasher as _;

use siphasher::sip::SipHasher13;

//--------------------------------------------------------------------------------------------------

/// Hashes kernel keys, which are arrays of `u64` words.
#[derive(Debug, Clone)]
pub struct KeyHasher(SipHasher13);

impl KeyHasher {
	pub fn new(key0: u64, key1: u64) -> Self {
		Self(SipHasher13::new_with_keys(key0, key1))
	}

	pub fn write(&mut self, words: &[u64]) {
		for &word in words {
			self.0.write_u64(word);
		}
	}

	pub fn finish(&self) -> u64 {
		self.0.finish()
	}
}

//--------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomState {
	pub key0: u64,
	pub key1: u64,
}

impl Default for RandomState {
	fn default() -> Self {
		Self::new()
	}
}

impl RandomState {
	pub const fn new() -> Self {
		Self {
			key0: 3141_5926_5358_9793_u64,
			key1: 2384_6264_3383_2795_u64,
		}
	}

	pub fn build_hasher(&self) -> KeyHasher {
		KeyHasher::new(self.key0, self.key1)
	}

	pub fn hash_key(&self, key: &[u64]) -> u64 {
		let mut hasher = self.build_hasher();
		hasher.write(key);
		hasher.finish()
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_hash_depends_on_every_word() {
		let state = RandomState::new();
		let a = state.hash_key(&[1, 2, 3]);
		assert_eq!(a, state.hash_key(&[1, 2, 3]));
		assert_ne!(a, state.hash_key(&[1, 2, 4]));
		assert_ne!(a, state.hash_key(&[1, 2]));
	}
}

//--------------------------------------------------------------------------------------------------
