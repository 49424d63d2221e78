//! Database packing for the MulPir response pipeline.

use std::sync::Arc;

use briar_he::bfv::{BfvContext, EvalPlaintext, Plaintext};
use briar_math::write_varint;
use tracing::debug;

use crate::error::{PirError, Result};
use crate::parameter::IndexPirParameter;

/// A database packed into evaluation-basis plaintexts, reordered for
/// sequential access at query time.
///
/// All-zero blocks are stored as `None`: multiplying by them would yield
/// zero, so the response pipeline skips them outright.
pub struct ProcessedDatabase {
	context: Arc<BfvContext>,
	parameter: IndexPirParameter,
	/// `chunk_count * per_chunk_plaintext_count` slots, chunk-major, each
	/// chunk interleaved by the remaining dimensions.
	plaintexts: Vec<Option<EvalPlaintext>>,
}

impl ProcessedDatabase {
	/// Packs `entries` according to `parameter`.
	pub fn new(
		context: &Arc<BfvContext>,
		parameter: &IndexPirParameter,
		entries: &[Vec<u8>],
	) -> Result<Self> {
		if entries.is_empty() {
			return Err(PirError::EmptyDatabase);
		}
		if entries.len() != parameter.entry_count {
			return Err(PirError::InvalidDatabaseEntryCount {
				actual: entries.len(),
				expected: parameter.entry_count,
			});
		}
		for entry in entries {
			if entry.len() > parameter.entry_size_in_bytes {
				return Err(PirError::InvalidDatabaseEntrySize {
					actual: entry.len(),
					expected: parameter.entry_size_in_bytes,
				});
			}
			if !parameter.encoding_entry_size && entry.len() != parameter.entry_size_in_bytes {
				return Err(PirError::InvalidDatabaseEntrySize {
					actual: entry.len(),
					expected: parameter.entry_size_in_bytes,
				});
			}
		}

		let bytes_per_plaintext = context.bytes_per_plaintext();
		let encoded_entry_size = parameter.encoded_entry_size();
		let per_chunk = parameter.per_chunk_plaintext_count(bytes_per_plaintext);
		let chunk_count = parameter.chunk_count(bytes_per_plaintext);

		// One encoded slot per entry: optional varint length prefix, then
		// the entry zero-padded to the fixed entry size.
		let mut stream = Vec::with_capacity(entries.len() * encoded_entry_size);
		for entry in entries {
			if parameter.encoding_entry_size {
				let mut prefix = Vec::with_capacity(parameter.entry_size_encoding_width);
				write_varint(&mut prefix, entry.len() as u64);
				prefix.resize(parameter.entry_size_encoding_width, 0);
				stream.extend_from_slice(&prefix);
			}
			stream.extend_from_slice(entry);
			stream.resize(stream.len() + parameter.entry_size_in_bytes - entry.len(), 0);
		}

		let mut plaintexts = Vec::with_capacity(chunk_count * per_chunk);
		if encoded_entry_size <= bytes_per_plaintext {
			// Pack small entries: slice the stream into plaintext blocks.
			for block in 0..per_chunk {
				let start = block * bytes_per_plaintext;
				let end = (start + bytes_per_plaintext).min(stream.len());
				plaintexts.push(encode_block(context, stream.get(start..end).unwrap_or(&[]))?);
			}
		} else {
			// Split large entries: chunk-major, one plaintext per entry
			// chunk.
			for chunk in 0..chunk_count {
				for entry_index in 0..entries.len() {
					let slot = &stream
						[entry_index * encoded_entry_size..(entry_index + 1) * encoded_entry_size];
					let start = chunk * bytes_per_plaintext;
					let end = (start + bytes_per_plaintext).min(slot.len());
					plaintexts.push(encode_block(context, &slot[start..end])?);
				}
			}
		}

		// Reorder each chunk so the first-dimension inner products read
		// their plaintexts sequentially.
		let remaining: usize = parameter.dimensions.iter().skip(1).product::<usize>().max(1);
		let dimension_product: usize = parameter.dimensions.iter().product();
		let mut reordered = Vec::with_capacity(chunk_count * dimension_product);
		for chunk in 0..chunk_count {
			let base = chunk * per_chunk;
			for column in 0..remaining {
				for row in 0..parameter.dimensions[0] {
					let index = row * remaining + column;
					if index < per_chunk {
						reordered.push(plaintexts[base + index].take());
					} else {
						reordered.push(None);
					}
				}
			}
		}
		debug!(
			plaintexts = reordered.len(),
			chunks = chunk_count,
			"processed PIR database"
		);

		Ok(Self {
			context: Arc::clone(context),
			parameter: parameter.clone(),
			plaintexts: reordered,
		})
	}

	/// The packing parameter.
	pub fn parameter(&self) -> &IndexPirParameter {
		&self.parameter
	}

	/// The owning context.
	pub fn context(&self) -> &Arc<BfvContext> {
		&self.context
	}

	/// Number of plaintext slots (including skipped zero blocks).
	pub fn plaintext_count(&self) -> usize {
		self.plaintexts.len()
	}

	/// Number of chunks per entry.
	pub fn chunk_count(&self) -> usize {
		self.parameter.chunk_count(self.context.bytes_per_plaintext())
	}

	/// The plaintext slots of one chunk.
	pub(crate) fn chunk(&self, chunk: usize) -> &[Option<EvalPlaintext>] {
		let per_chunk: usize = self.parameter.dimensions.iter().product();
		&self.plaintexts[chunk * per_chunk..(chunk + 1) * per_chunk]
	}
}

fn encode_block(context: &Arc<BfvContext>, block: &[u8]) -> Result<Option<EvalPlaintext>> {
	if block.iter().all(|&byte| byte == 0) {
		return Ok(None);
	}
	let plaintext = Plaintext::encode_coefficients(context, block)?;
	Ok(Some(plaintext.to_eval(context.poly_context())?))
}

#[cfg(test)]
mod tests {
	use briar_he::bfv::BfvParameters;

	use crate::parameter::{generate_parameter, IndexPirConfig, KeyCompression};

	use super::*;

	fn context() -> Arc<BfvContext> {
		BfvContext::new(BfvParameters::insecure_testing(32, 17, 3).unwrap()).unwrap()
	}

	fn config(entry_count: usize, entry_size: usize, dimensions: usize) -> IndexPirConfig {
		IndexPirConfig {
			entry_count,
			entry_size_in_bytes: entry_size,
			dimension_count: dimensions,
			batch_size: 1,
			uneven_dimensions: false,
			key_compression: KeyCompression::NoCompression,
			encoding_entry_size: false,
		}
	}

	#[test]
	fn packs_small_entries_and_skips_zero_blocks() {
		let context = context();
		// 16 bytes per plaintext, 32 one-byte entries -> 2 plaintexts per
		// dimension product of [2, 1].
		let parameter = generate_parameter(&config(32, 1, 2), &context).unwrap();
		let mut entries: Vec<Vec<u8>> = (0..32u8).map(|i| vec![i]).collect();
		// Zero out the second block entirely.
		for entry in entries.iter_mut().skip(16) {
			entry[0] = 0;
		}
		let database = ProcessedDatabase::new(&context, &parameter, &entries).unwrap();
		let chunk = database.chunk(0);
		assert!(chunk[0].is_some());
		assert!(chunk.iter().skip(1).all(Option::is_none));
	}

	#[test]
	fn splits_large_entries_into_chunks() {
		let context = context();
		let parameter = generate_parameter(&config(3, 24, 1), &context).unwrap();
		// 24 > 16 bytes per plaintext: two chunks, one plaintext per entry.
		assert_eq!(parameter.chunk_count(16), 2);
		let entries: Vec<Vec<u8>> = (1..=3u8).map(|i| vec![i; 24]).collect();
		let database = ProcessedDatabase::new(&context, &parameter, &entries).unwrap();
		assert_eq!(database.chunk_count(), 2);
		assert_eq!(database.plaintext_count(), 2 * 3);
		assert!(database.chunk(0).iter().all(Option::is_some));
	}

	#[test]
	fn validates_entry_shape() {
		let context = context();
		let parameter = generate_parameter(&config(4, 2, 1), &context).unwrap();
		assert!(matches!(
			ProcessedDatabase::new(&context, &parameter, &[vec![1, 2], vec![1, 2], vec![1, 2]]),
			Err(PirError::InvalidDatabaseEntryCount { actual: 3, expected: 4 })
		));
		assert!(matches!(
			ProcessedDatabase::new(&context, &parameter, &[]),
			Err(PirError::EmptyDatabase)
		));
		let oversized = vec![vec![1, 2, 3], vec![1, 2], vec![1, 2], vec![1, 2]];
		assert!(matches!(
			ProcessedDatabase::new(&context, &parameter, &oversized),
			Err(PirError::InvalidDatabaseEntrySize { actual: 3, expected: 2 })
		));
		// Short entries need the length prefix to be decodable.
		let short = vec![vec![1], vec![1, 2], vec![1, 2], vec![1, 2]];
		assert!(matches!(
			ProcessedDatabase::new(&context, &parameter, &short),
			Err(PirError::InvalidDatabaseEntrySize { actual: 1, expected: 2 })
		));
	}
}
