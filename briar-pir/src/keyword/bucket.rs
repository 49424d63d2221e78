//! The self-delimiting hash-bucket wire format.
//!
//! A serialized bucket is `[slot count u8]` followed by one
//! `[tag u64 LE][value length u16 LE][value]` record per slot. An empty
//! bucket is the single zero byte, which is also what zero padding decodes
//! as.

use crate::error::{PirError, Result};
use crate::keyword::hash::HashKeyword;

/// Per-slot overhead: the tag and the length field.
const SLOT_OVERHEAD: usize = 10;

/// One bucket of `(tag, value)` slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashBucket {
	/// The slots, in insertion order.
	pub slots: Vec<HashBucketSlot>,
}

/// One stored entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashBucketSlot {
	/// `HashKeyword::hash` of the keyword.
	pub tag: u64,
	/// The stored value.
	pub value: Vec<u8>,
}

impl HashBucket {
	/// Serialized size of a bucket holding `value_sizes`.
	pub fn serialized_size(value_sizes: impl IntoIterator<Item = usize>) -> usize {
		1 + value_sizes
			.into_iter()
			.map(|size| SLOT_OVERHEAD + size)
			.sum::<usize>()
	}

	/// Builds a bucket from `(keyword, value)` pairs, tagging each keyword.
	pub fn new(pairs: impl IntoIterator<Item = (Vec<u8>, Vec<u8>)>) -> Self {
		Self {
			slots: pairs
				.into_iter()
				.map(|(keyword, value)| HashBucketSlot {
					tag: HashKeyword::hash(&keyword),
					value,
				})
				.collect(),
		}
	}

	/// Serializes the bucket.
	pub fn to_bytes(&self) -> Result<Vec<u8>> {
		if self.slots.len() > u8::MAX as usize {
			return Err(PirError::InvalidHashBucketSlotCount {
				actual: self.slots.len(),
				expected: u8::MAX as usize,
			});
		}
		let mut bytes =
			Vec::with_capacity(Self::serialized_size(self.slots.iter().map(|slot| slot.value.len())));
		bytes.push(self.slots.len() as u8);
		for slot in &self.slots {
			if slot.value.len() > u16::MAX as usize {
				return Err(PirError::InvalidHashBucketEntryValueSize {
					actual: slot.value.len(),
					expected: u16::MAX as usize,
				});
			}
			bytes.extend(slot.tag.to_le_bytes());
			bytes.extend((slot.value.len() as u16).to_le_bytes());
			bytes.extend(&slot.value);
		}
		Ok(bytes)
	}

	/// Deserializes a bucket from the front of `bytes`; trailing padding is
	/// ignored.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
		let truncated = || PirError::CorruptedData {
			reason: "hash bucket ends mid-record".to_string(),
		};
		let count = *bytes.first().ok_or_else(truncated)? as usize;
		let mut offset = 1usize;
		let mut slots = Vec::with_capacity(count);
		for _ in 0..count {
			let header = bytes.get(offset..offset + SLOT_OVERHEAD).ok_or_else(truncated)?;
			let tag = u64::from_le_bytes(header[..8].try_into().expect("eight header bytes"));
			let length = u16::from_le_bytes(header[8..].try_into().expect("two header bytes")) as usize;
			offset += SLOT_OVERHEAD;
			let value = bytes.get(offset..offset + length).ok_or_else(truncated)?.to_vec();
			offset += length;
			slots.push(HashBucketSlot {
				tag,
				value,
			});
		}
		Ok(Self {
			slots,
		})
	}

	/// The value stored under `keyword`, if any.
	pub fn find(&self, keyword: &[u8]) -> Option<&[u8]> {
		let tag = HashKeyword::hash(keyword);
		self.slots
			.iter()
			.find(|slot| slot.tag == tag)
			.map(|slot| slot.value.as_slice())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_with_padding() {
		let bucket = HashBucket::new([
			(b"alice".to_vec(), vec![1, 2, 3]),
			(b"bob".to_vec(), vec![4, 5, 6]),
		]);
		let mut bytes = bucket.to_bytes().unwrap();
		bytes.extend([0u8; 7]);
		let decoded = HashBucket::from_bytes(&bytes).unwrap();
		assert_eq!(decoded, bucket);
		assert_eq!(decoded.find(b"alice"), Some(&[1u8, 2, 3][..]));
		assert_eq!(decoded.find(b"carol"), None);
	}

	#[test]
	fn empty_bucket_is_one_zero_byte() {
		let bucket = HashBucket::default();
		assert_eq!(bucket.to_bytes().unwrap(), vec![0]);
		assert_eq!(HashBucket::from_bytes(&[0, 0, 0]).unwrap().slots.len(), 0);
	}

	#[test]
	fn truncated_buckets_are_rejected() {
		let bucket = HashBucket::new([(b"alice".to_vec(), vec![1, 2, 3])]);
		let bytes = bucket.to_bytes().unwrap();
		assert!(matches!(
			HashBucket::from_bytes(&bytes[..bytes.len() - 1]),
			Err(PirError::CorruptedData { .. })
		));
		assert!(matches!(
			HashBucket::from_bytes(&[]),
			Err(PirError::CorruptedData { .. })
		));
	}

	#[test]
	fn serialized_size_matches() {
		let bucket = HashBucket::new([(b"k".to_vec(), vec![9; 5])]);
		assert_eq!(
			bucket.to_bytes().unwrap().len(),
			HashBucket::serialized_size([5])
		);
	}
}
