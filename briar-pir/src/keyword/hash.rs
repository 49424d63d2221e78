//! Keyword hashing.

use sha2::{Digest, Sha256};

/// Derives bucket indices and tags from keywords.
pub struct HashKeyword;

impl HashKeyword {
	/// `count` independent bucket indices in `[0, bucket_count)` for
	/// `keyword`, one per hash function.
	pub fn hash_indices(keyword: &[u8], bucket_count: usize, count: usize) -> Vec<usize> {
		debug_assert!(bucket_count > 0);
		(0..count as u64)
			.map(|function| {
				let mut hasher = Sha256::new();
				hasher.update(function.to_le_bytes());
				hasher.update(keyword);
				let digest = hasher.finalize();
				let word = u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"));
				(word % bucket_count as u64) as usize
			})
			.collect()
	}

	/// The short tag stored alongside a keyword's value.
	pub fn hash(keyword: &[u8]) -> u64 {
		let digest = Sha256::digest(keyword);
		u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn indices_are_deterministic_and_in_range() {
		let first = HashKeyword::hash_indices(b"alice", 7, 3);
		let second = HashKeyword::hash_indices(b"alice", 7, 3);
		assert_eq!(first, second);
		assert_eq!(first.len(), 3);
		assert!(first.iter().all(|&index| index < 7));
	}

	#[test]
	fn different_functions_usually_differ() {
		let indices = HashKeyword::hash_indices(b"some keyword", 1 << 20, 3);
		assert!(indices[0] != indices[1] || indices[1] != indices[2]);
	}

	#[test]
	fn tags_distinguish_keywords() {
		assert_ne!(HashKeyword::hash(b"alice"), HashKeyword::hash(b"bob"));
		assert_eq!(HashKeyword::hash(b"alice"), HashKeyword::hash(b"alice"));
	}
}
