//! MulPir parameter synthesis.

use std::sync::Arc;

use briar_he::bfv::{BfvContext, EvaluationKeyConfig};
use briar_math::{ceil_log2, log2, next_power_of_two, varint_size};
use serde::{Deserialize, Serialize};

use crate::error::{PirError, Result};

/// How aggressively the Galois key set is compressed.
///
/// Fewer keys mean a smaller upload; the server substitutes missing
/// elements by applying a kept key repeatedly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyCompression {
	/// One key per expansion level.
	NoCompression,
	/// Keys up to the midpoint power, plus one extra element that halves
	/// the substitution chains.
	Hybrid,
	/// Keys up to the midpoint power only.
	Max,
}

/// Caller-chosen PIR configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPirConfig {
	/// Number of database entries.
	pub entry_count: usize,
	/// Size of each entry in bytes.
	pub entry_size_in_bytes: usize,
	/// Hypercube dimensionality, 1 or 2.
	pub dimension_count: usize,
	/// Largest number of indices served by one query.
	pub batch_size: usize,
	/// Whether to shrink the second dimension when it does not change the
	/// Galois key budget.
	pub uneven_dimensions: bool,
	/// Galois key compression mode.
	pub key_compression: KeyCompression,
	/// Whether entries carry a varint length prefix (variable-length
	/// entries).
	pub encoding_entry_size: bool,
}

/// Derived, publicly shared parameters of a PIR instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPirParameter {
	/// Number of database entries.
	pub entry_count: usize,
	/// Size of each entry in bytes (excluding any length prefix).
	pub entry_size_in_bytes: usize,
	/// Hypercube dimensions; their product covers the per-chunk plaintext
	/// count.
	pub dimensions: Vec<usize>,
	/// Largest number of indices served by one query.
	pub batch_size: usize,
	/// Keys the client must publish.
	pub evaluation_key_config: EvaluationKeyConfig,
	/// Whether entries carry a varint length prefix.
	pub encoding_entry_size: bool,
	/// Fixed width of that prefix in bytes.
	pub entry_size_encoding_width: usize,
}

impl IndexPirParameter {
	/// Entry slot size: the entry plus its optional length prefix.
	pub fn encoded_entry_size(&self) -> usize {
		if self.encoding_entry_size {
			self.entry_size_in_bytes + self.entry_size_encoding_width
		} else {
			self.entry_size_in_bytes
		}
	}

	/// Entries per plaintext (0 when an entry spans several plaintexts).
	pub fn entries_per_plaintext(&self, bytes_per_plaintext: usize) -> usize {
		bytes_per_plaintext / self.encoded_entry_size()
	}

	/// Number of chunks each entry is split into.
	pub fn chunk_count(&self, bytes_per_plaintext: usize) -> usize {
		self.encoded_entry_size().div_ceil(bytes_per_plaintext).max(1)
	}

	/// Plaintexts per chunk.
	pub fn per_chunk_plaintext_count(&self, bytes_per_plaintext: usize) -> usize {
		let entries_per_plaintext = self.entries_per_plaintext(bytes_per_plaintext);
		self.entry_count.div_ceil(entries_per_plaintext.max(1))
	}

	/// Ciphertexts expanded per query: one indicator per coordinate of
	/// every dimension, times the batch size.
	pub fn expanded_query_count(&self) -> usize {
		self.dimensions.iter().sum::<usize>() * self.batch_size
	}
}

/// Synthesizes the public parameters for `config` under `context`.
pub fn generate_parameter(
	config: &IndexPirConfig,
	context: &Arc<BfvContext>,
) -> Result<IndexPirParameter> {
	if config.dimension_count == 0 || config.dimension_count > 2 {
		return Err(PirError::InvalidDimensionCount {
			dimension_count: config.dimension_count,
		});
	}
	if config.entry_count == 0 {
		return Err(PirError::EmptyDatabase);
	}
	if config.entry_size_in_bytes == 0 {
		return Err(PirError::InvalidDatabaseEntrySize {
			actual: 0,
			expected: 1,
		});
	}
	if config.batch_size == 0 {
		return Err(PirError::InvalidBatchSize {
			actual: 0,
			expected: 1,
		});
	}

	let entry_size_encoding_width = varint_size(config.entry_size_in_bytes as u64);
	let encoded_entry_size = if config.encoding_entry_size {
		config.entry_size_in_bytes + entry_size_encoding_width
	} else {
		config.entry_size_in_bytes
	};

	let bytes_per_plaintext = context.bytes_per_plaintext();
	let entries_per_plaintext = bytes_per_plaintext / encoded_entry_size.max(1);
	let plaintext_count = config
		.entry_count
		.div_ceil(entries_per_plaintext.max(1));

	let mut dimensions = initial_dimensions(plaintext_count, config.dimension_count);
	if config.uneven_dimensions && config.dimension_count == 2 {
		flatten_second_dimension(&mut dimensions, plaintext_count, config.batch_size);
	}

	let evaluation_key_config = evaluation_key_config(
		&dimensions,
		config.batch_size,
		context.degree(),
		config.key_compression,
	);

	Ok(IndexPirParameter {
		entry_count: config.entry_count,
		entry_size_in_bytes: config.entry_size_in_bytes,
		dimensions,
		batch_size: config.batch_size,
		evaluation_key_config,
		encoding_entry_size: config.encoding_entry_size,
		entry_size_encoding_width,
	})
}

/// Near-cubic factorization: start at `floor(count^(1/d))` everywhere, then
/// grow one dimension at a time until the product covers `count`.
fn initial_dimensions(plaintext_count: usize, dimension_count: usize) -> Vec<usize> {
	let base = (plaintext_count as f64)
		.powf(1.0 / dimension_count as f64)
		.floor() as usize;
	let mut dimensions = vec![base.max(1); dimension_count];
	let mut position = 0;
	while dimensions.iter().product::<usize>() < plaintext_count {
		dimensions[position] += 1;
		position = (position + 1) % dimension_count;
	}
	dimensions
}

/// Shrinks the second dimension as far as the Galois key budget allows:
/// `next_power_of_two(sum * batch)` must not change, since the expansion
/// depth (and so the key set) is derived from it.
fn flatten_second_dimension(dimensions: &mut Vec<usize>, plaintext_count: usize, batch_size: usize) {
	let budget =
		next_power_of_two((dimensions.iter().sum::<usize>() * batch_size) as u64);
	for second in 1..dimensions[1] {
		let first = plaintext_count.div_ceil(second);
		if next_power_of_two(((first + second) * batch_size) as u64) == budget {
			*dimensions = vec![first, second];
			return;
		}
	}
}

/// The Galois elements `(1 << k) + 1` the expansion needs, pruned by the
/// compression mode, plus the relinearization key.
fn evaluation_key_config(
	dimensions: &[usize],
	batch_size: usize,
	degree: usize,
	compression: KeyCompression,
) -> EvaluationKeyConfig {
	let log_degree = log2(degree as u64);
	let expanded = dimensions.iter().sum::<usize>() * batch_size;
	let max_expansion_depth = ceil_log2(expanded.min(degree) as u64).max(1);
	let smallest_power = log_degree - max_expansion_depth + 1;
	let largest_power = match compression {
		KeyCompression::NoCompression => log_degree,
		KeyCompression::Hybrid | KeyCompression::Max => {
			smallest_power.max((log_degree + 1).div_ceil(2))
		},
	};
	let mut elements: Vec<u64> = (smallest_power..=largest_power)
		.map(|power| (1u64 << power) + 1)
		.collect();
	if compression == KeyCompression::Hybrid && largest_power < log_degree {
		let extra_power = (largest_power + log_degree + 1) / 2;
		if extra_power > largest_power {
			elements.push((1u64 << extra_power) + 1);
		}
	}
	EvaluationKeyConfig::new(elements, true)
}

#[cfg(test)]
mod tests {
	use briar_he::bfv::BfvParameters;

	use super::*;

	fn context() -> Arc<BfvContext> {
		BfvContext::new(BfvParameters::insecure_testing(32, 17, 3).unwrap()).unwrap()
	}

	fn config(entry_count: usize, entry_size: usize, dimensions: usize) -> IndexPirConfig {
		IndexPirConfig {
			entry_count,
			entry_size_in_bytes: entry_size,
			dimension_count: dimensions,
			batch_size: 2,
			uneven_dimensions: false,
			key_compression: KeyCompression::NoCompression,
			encoding_entry_size: false,
		}
	}

	#[test]
	fn dimensions_cover_the_plaintext_count() {
		// 32 coefficients at 4 bits = 16 bytes per plaintext; 100 one-byte
		// entries need 7 plaintexts.
		let context = context();
		assert_eq!(context.bytes_per_plaintext(), 16);
		let parameter = generate_parameter(&config(100, 1, 2), &context).unwrap();
		assert_eq!(parameter.per_chunk_plaintext_count(16), 7);
		assert_eq!(parameter.dimensions.len(), 2);
		assert!(parameter.dimensions.iter().product::<usize>() >= 7);
		let parameter_1d = generate_parameter(&config(100, 1, 1), &context).unwrap();
		assert_eq!(parameter_1d.dimensions, vec![7]);
	}

	#[test]
	fn uneven_dimensions_shrink_the_second() {
		let context = context();
		let mut uneven = config(100, 1, 2);
		uneven.uneven_dimensions = true;
		let parameter = generate_parameter(&uneven, &context).unwrap();
		let even = generate_parameter(&config(100, 1, 2), &context).unwrap();
		assert!(parameter.dimensions[1] <= even.dimensions[1]);
		assert!(parameter.dimensions.iter().product::<usize>() >= 7);
		// The Galois budget must be unchanged.
		let budget = |dimensions: &[usize]| {
			next_power_of_two((dimensions.iter().sum::<usize>() * 2) as u64)
		};
		assert_eq!(budget(&parameter.dimensions), budget(&even.dimensions));
	}

	#[test]
	fn expansion_elements_track_the_depth() {
		let context = context();
		let parameter = generate_parameter(&config(100, 1, 2), &context).unwrap();
		// dims sum * batch = (3 + 3) * 2 = 12 -> depth 4; N = 32 -> powers
		// {2, 3, 4, 5}.
		assert_eq!(parameter.dimensions, vec![3, 3]);
		assert_eq!(parameter.expanded_query_count(), 12);
		assert_eq!(
			parameter.evaluation_key_config.galois_elements,
			vec![5, 9, 17, 33]
		);
		assert!(parameter.evaluation_key_config.has_relinearization_key);
	}

	#[test]
	fn compressed_keys_drop_high_powers() {
		let context = context();
		let mut hybrid = config(100, 1, 2);
		hybrid.key_compression = KeyCompression::Hybrid;
		let parameter = generate_parameter(&hybrid, &context).unwrap();
		// Midpoint power is 3; hybrid adds the extra power (3+5+1)/2 = 4.
		assert_eq!(
			parameter.evaluation_key_config.galois_elements,
			vec![5, 9, 17]
		);

		let mut max = config(100, 1, 2);
		max.key_compression = KeyCompression::Max;
		let parameter = generate_parameter(&max, &context).unwrap();
		assert_eq!(parameter.evaluation_key_config.galois_elements, vec![5, 9]);
	}

	#[test]
	fn varint_prefix_width_is_recorded() {
		let context = context();
		let mut with_prefix = config(10, 3, 1);
		with_prefix.encoding_entry_size = true;
		let parameter = generate_parameter(&with_prefix, &context).unwrap();
		assert_eq!(parameter.entry_size_encoding_width, 1);
		assert_eq!(parameter.encoded_entry_size(), 4);
	}

	#[test]
	fn rejects_degenerate_configs() {
		let context = context();
		assert!(matches!(
			generate_parameter(&config(0, 1, 1), &context),
			Err(PirError::EmptyDatabase)
		));
		assert!(matches!(
			generate_parameter(&config(10, 1, 3), &context),
			Err(PirError::InvalidDimensionCount { dimension_count: 3 })
		));
	}
}
