//! Cuckoo hashing of keyword-value pairs into hash buckets.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PirError, Result};
use crate::keyword::bucket::HashBucket;
use crate::keyword::hash::HashKeyword;

/// How the table sizes its bucket range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BucketCountConfig {
	/// Start near the load target and grow by `expansion_factor` whenever
	/// insertion fails.
	AllowExpansion {
		/// Multiplicative growth per failed attempt, above 1.
		expansion_factor: f64,
	},
	/// A fixed number of buckets per table; insertion failure is fatal.
	FixedSize {
		/// Buckets per table.
		bucket_count: usize,
	},
}

/// Cuckoo table configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuckooTableConfig {
	/// Number of hash functions, each owning its own table.
	pub hash_function_count: usize,
	/// Evictions tolerated per insertion before giving up.
	pub max_eviction_count: usize,
	/// Hard cap on a serialized bucket's length.
	pub max_serialized_bucket_size: usize,
	/// Bucket-range sizing.
	pub bucket_count: BucketCountConfig,
	/// One table per hash function; the only supported mode.
	pub multiple_tables: bool,
}

impl CuckooTableConfig {
	fn validate(&self) -> Result<()> {
		if self.hash_function_count == 0 {
			return Err(PirError::InvalidCuckooConfig {
				reason: "hash function count must be positive".to_string(),
			});
		}
		if !self.multiple_tables {
			return Err(PirError::InvalidCuckooConfig {
				reason: "only the multiple-tables layout is supported".to_string(),
			});
		}
		// The smallest useful bucket holds one empty-value slot.
		if self.max_serialized_bucket_size < HashBucket::serialized_size([0]) {
			return Err(PirError::InvalidCuckooConfig {
				reason: format!(
					"max serialized bucket size {} cannot hold a single slot",
					self.max_serialized_bucket_size
				),
			});
		}
		if let BucketCountConfig::AllowExpansion {
			expansion_factor,
		} = self.bucket_count
		{
			if expansion_factor <= 1.0 {
				return Err(PirError::InvalidCuckooConfig {
					reason: format!("expansion factor {expansion_factor} must exceed 1"),
				});
			}
		}
		Ok(())
	}
}

/// One keyword-value row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordValuePair {
	/// The lookup keyword.
	pub keyword: Vec<u8>,
	/// The stored value.
	pub value: Vec<u8>,
}

/// A built cuckoo table: `hash_function_count` tables of
/// `buckets_per_table` buckets each; every inserted pair sits in the
/// bucket one of its hash indices names.
pub struct CuckooTable {
	config: CuckooTableConfig,
	buckets_per_table: usize,
	tables: Vec<Vec<Vec<KeywordValuePair>>>,
}

impl CuckooTable {
	/// Builds a table over `rows`, expanding if the configuration allows.
	pub fn new(config: CuckooTableConfig, rows: &[KeywordValuePair]) -> Result<Self> {
		config.validate()?;
		for row in rows {
			let alone = HashBucket::serialized_size([row.value.len()]);
			if alone > config.max_serialized_bucket_size {
				return Err(PirError::InvalidDatabaseEntrySize {
					actual: alone,
					expected: config.max_serialized_bucket_size,
				});
			}
		}

		let hash_count = config.hash_function_count;
		let mut buckets_per_table = match config.bucket_count {
			BucketCountConfig::FixedSize {
				bucket_count,
			} => bucket_count.max(1),
			BucketCountConfig::AllowExpansion {
				..
			} => rows.len().div_ceil(hash_count).max(1),
		};

		const MAX_EXPANSIONS: usize = 32;
		for _ in 0..MAX_EXPANSIONS {
			match Self::try_build(&config, buckets_per_table, rows) {
				Ok(table) => return Ok(table),
				Err(PirError::FailedToConstructCuckooTable) => {
					match config.bucket_count {
						BucketCountConfig::AllowExpansion {
							expansion_factor,
						} => {
							let grown =
								(buckets_per_table as f64 * expansion_factor).ceil() as usize;
							buckets_per_table = grown.max(buckets_per_table + 1);
							debug!(buckets_per_table, "expanding cuckoo table");
						},
						BucketCountConfig::FixedSize {
							..
						} => return Err(PirError::FailedToConstructCuckooTable),
					}
				},
				Err(error) => return Err(error),
			}
		}
		Err(PirError::FailedToConstructCuckooTable)
	}

	fn try_build(
		config: &CuckooTableConfig,
		buckets_per_table: usize,
		rows: &[KeywordValuePair],
	) -> Result<Self> {
		let mut table = Self {
			config: config.clone(),
			buckets_per_table,
			tables: vec![vec![Vec::new(); buckets_per_table]; config.hash_function_count],
		};
		for row in rows {
			if table.get(&row.keyword).is_some() {
				return Err(PirError::InvalidDatabaseDuplicateKeyword);
			}
			table.insert(row.clone())?;
		}
		Ok(table)
	}

	fn bucket_fits(&self, bucket: &[KeywordValuePair], extra: &KeywordValuePair) -> bool {
		if bucket.len() + 1 > u8::MAX as usize {
			return false;
		}
		let size = HashBucket::serialized_size(
			bucket
				.iter()
				.map(|pair| pair.value.len())
				.chain([extra.value.len()]),
		);
		size <= self.config.max_serialized_bucket_size
	}

	fn insert(&mut self, pair: KeywordValuePair) -> Result<()> {
		let hash_count = self.config.hash_function_count;
		let mut pending = vec![pair];
		let mut evictions = 0usize;
		while let Some(current) = pending.pop() {
			let indices =
				HashKeyword::hash_indices(&current.keyword, self.buckets_per_table, hash_count);
			let fit = indices
				.iter()
				.enumerate()
				.find(|&(table, &bucket_index)| {
					self.bucket_fits(&self.tables[table][bucket_index], &current)
				})
				.map(|(table, &bucket_index)| (table, bucket_index));
			if let Some((table, bucket_index)) = fit {
				self.tables[table][bucket_index].push(current);
				continue;
			}
			if evictions >= self.config.max_eviction_count {
				return Err(PirError::FailedToConstructCuckooTable);
			}
			// Evict the oldest residents of one crowded bucket until the
			// pair fits; the walk rotates over the tables so it cannot
			// ping-pong between two of them.
			let victim_table = evictions % hash_count;
			let victim_bucket = indices[victim_table];
			let bucket = &mut self.tables[victim_table][victim_bucket];
			while !bucket.is_empty() {
				pending.push(bucket.remove(0));
				if HashBucket::serialized_size(
					bucket
						.iter()
						.map(|resident| resident.value.len())
						.chain([current.value.len()]),
				) <= self.config.max_serialized_bucket_size
				{
					break;
				}
			}
			self.tables[victim_table][victim_bucket].push(current);
			evictions += 1;
		}
		Ok(())
	}

	/// The value stored under `keyword`, if present.
	pub fn get(&self, keyword: &[u8]) -> Option<&[u8]> {
		let indices =
			HashKeyword::hash_indices(keyword, self.buckets_per_table, self.config.hash_function_count);
		for (table, &bucket_index) in indices.iter().enumerate() {
			for pair in &self.tables[table][bucket_index] {
				if pair.keyword == keyword {
					return Some(&pair.value);
				}
			}
		}
		None
	}

	/// Buckets per table.
	pub fn buckets_per_table(&self) -> usize {
		self.buckets_per_table
	}

	/// Number of tables (= hash functions).
	pub fn table_count(&self) -> usize {
		self.config.hash_function_count
	}

	/// Serializes every bucket of every table.
	pub fn serialize_buckets(&self) -> Result<Vec<Vec<Vec<u8>>>> {
		self.tables
			.iter()
			.map(|table| {
				table
					.iter()
					.map(|bucket| {
						HashBucket::new(
							bucket
								.iter()
								.map(|pair| (pair.keyword.clone(), pair.value.clone())),
						)
						.to_bytes()
					})
					.collect()
			})
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn rows(count: usize) -> Vec<KeywordValuePair> {
		(0..count)
			.map(|i| KeywordValuePair {
				keyword: format!("keyword-{i}").into_bytes(),
				value: vec![i as u8; 3],
			})
			.collect()
	}

	fn config() -> CuckooTableConfig {
		CuckooTableConfig {
			hash_function_count: 3,
			max_eviction_count: 100,
			max_serialized_bucket_size: 64,
			bucket_count: BucketCountConfig::AllowExpansion {
				expansion_factor: 2.0,
			},
			multiple_tables: true,
		}
	}

	#[test]
	fn every_row_is_reachable() {
		let rows = rows(50);
		let table = CuckooTable::new(config(), &rows).unwrap();
		for row in &rows {
			assert_eq!(table.get(&row.keyword), Some(row.value.as_slice()));
		}
		assert_eq!(table.get(b"absent"), None);
	}

	#[test]
	fn duplicate_keywords_are_rejected() {
		let mut rows = rows(3);
		rows.push(KeywordValuePair {
			keyword: rows[0].keyword.clone(),
			value: vec![9, 9, 9],
		});
		assert!(matches!(
			CuckooTable::new(config(), &rows),
			Err(PirError::InvalidDatabaseDuplicateKeyword)
		));
	}

	#[test]
	fn fixed_size_tables_do_not_grow() {
		let mut fixed = config();
		fixed.bucket_count = BucketCountConfig::FixedSize {
			bucket_count: 4,
		};
		let table = CuckooTable::new(fixed, &rows(20)).unwrap();
		assert_eq!(table.buckets_per_table(), 4);
	}

	#[test]
	fn rejects_bad_configs() {
		let mut no_tables = config();
		no_tables.multiple_tables = false;
		assert!(matches!(
			CuckooTable::new(no_tables, &rows(1)),
			Err(PirError::InvalidCuckooConfig { .. })
		));
		let mut shrink = config();
		shrink.bucket_count = BucketCountConfig::AllowExpansion {
			expansion_factor: 0.5,
		};
		assert!(matches!(
			CuckooTable::new(shrink, &rows(1)),
			Err(PirError::InvalidCuckooConfig { .. })
		));
		let mut tiny = config();
		tiny.max_serialized_bucket_size = 4;
		assert!(matches!(
			CuckooTable::new(tiny, &rows(1)),
			Err(PirError::InvalidCuckooConfig { .. })
		));
	}

	#[test]
	fn oversized_values_are_rejected() {
		let oversized = vec![KeywordValuePair {
			keyword: b"big".to_vec(),
			value: vec![0; 60],
		}];
		assert!(matches!(
			CuckooTable::new(config(), &oversized),
			Err(PirError::InvalidDatabaseEntrySize { .. })
		));
	}
}
