//! The MulPir client: query compression and response decoding.

use std::sync::Arc;

use briar_he::bfv::{BfvContext, EvaluationKey, Plaintext, SecretKey};
use briar_math::{ceil_log2, read_varint};
use rand::{CryptoRng, RngCore};

use crate::error::{PirError, Result};
use crate::messages::{Query, Response};
use crate::parameter::IndexPirParameter;

/// The client side of a MulPir instance.
pub struct MulPirClient {
	context: Arc<BfvContext>,
	parameter: IndexPirParameter,
	secret_key: SecretKey,
}

impl MulPirClient {
	/// Binds a client to agreed parameters and its secret key.
	pub fn new(
		context: &Arc<BfvContext>,
		parameter: IndexPirParameter,
		secret_key: SecretKey,
	) -> Self {
		Self {
			context: Arc::clone(context),
			parameter,
			secret_key,
		}
	}

	/// The agreed parameters.
	pub fn parameter(&self) -> &IndexPirParameter {
		&self.parameter
	}

	/// Generates the evaluation key the server needs.
	pub fn generate_evaluation_key<R: RngCore + CryptoRng>(
		&self,
		rng: &mut R,
	) -> Result<EvaluationKey> {
		Ok(EvaluationKey::generate(
			&self.secret_key,
			&self.parameter.evaluation_key_config,
			rng,
		)?)
	}

	/// Plaintext index holding entry `index`.
	fn plaintext_index(&self, index: usize) -> usize {
		let entries_per_plaintext = self
			.parameter
			.entries_per_plaintext(self.context.bytes_per_plaintext());
		if entries_per_plaintext > 1 {
			index / entries_per_plaintext
		} else {
			index
		}
	}

	/// Encodes a batch of indices into compressed one-hot ciphertexts.
	///
	/// Every coordinate of every index becomes a one-hot position; up to
	/// `N` positions share one ciphertext, each holding the inverse of the
	/// expansion scaling `2^depth` so the expanded indicators decrypt to
	/// exactly one.
	pub fn generate_query<R: RngCore + CryptoRng>(
		&self,
		indices: &[usize],
		rng: &mut R,
	) -> Result<Query> {
		if indices.is_empty() || indices.len() > self.parameter.batch_size {
			return Err(PirError::InvalidBatchSize {
				actual: indices.len(),
				expected: self.parameter.batch_size,
			});
		}
		for &index in indices {
			if index >= self.parameter.entry_count {
				return Err(PirError::InvalidIndex {
					index,
					entry_count: self.parameter.entry_count,
				});
			}
		}

		let dimensions = &self.parameter.dimensions;
		let dimension_sum: usize = dimensions.iter().sum();
		let mut positions = Vec::with_capacity(dimension_sum * indices.len());
		for (query_index, &index) in indices.iter().enumerate() {
			let plaintext_index = self.plaintext_index(index);
			let base = query_index * dimension_sum;
			match dimensions.len() {
				1 => positions.push(base + plaintext_index),
				_ => {
					let first = plaintext_index / dimensions[1];
					let second = plaintext_index % dimensions[1];
					positions.push(base + first);
					positions.push(base + dimensions[0] + second);
				},
			}
		}

		let degree = self.context.degree();
		let total_slots = dimension_sum * indices.len();
		let ciphertext_count = total_slots.div_ceil(degree);
		let t = self.context.plain_modulus();
		let mut ciphertexts = Vec::with_capacity(ciphertext_count);
		for block in 0..ciphertext_count {
			let slots = degree.min(total_slots - block * degree);
			let depth = ceil_log2(slots as u64);
			// The expansion multiplies each coefficient by 2^depth.
			let factor = t.inverse_mod(t.pow_mod(2, depth as u64))?;
			let mut coefficients = vec![0u64; degree];
			for &position in &positions {
				if position / degree == block {
					coefficients[position % degree] = factor;
				}
			}
			let plaintext = Plaintext::new(&self.context, coefficients)?;
			ciphertexts.push(self.secret_key.encrypt(&plaintext, rng)?);
		}

		Ok(Query {
			ciphertexts,
			indices_count: indices.len(),
		})
	}

	/// Decrypts a response, returning one entry per queried index.
	pub fn decrypt_response(
		&self,
		response: &Response,
		indices: &[usize],
	) -> Result<Vec<Vec<u8>>> {
		if response.replies.len() != indices.len() {
			return Err(PirError::InvalidResponse {
				actual: response.replies.len(),
				expected: indices.len(),
			});
		}
		let bytes_per_plaintext = self.context.bytes_per_plaintext();
		let chunk_count = self.parameter.chunk_count(bytes_per_plaintext);
		let encoded_entry_size = self.parameter.encoded_entry_size();
		let entries_per_plaintext = self.parameter.entries_per_plaintext(bytes_per_plaintext);

		let mut entries = Vec::with_capacity(indices.len());
		for (reply, &index) in response.replies.iter().zip(indices) {
			if reply.ciphertexts.len() != chunk_count {
				return Err(PirError::InvalidReply {
					actual: reply.ciphertexts.len(),
					expected: chunk_count,
				});
			}
			let mut window = Vec::with_capacity(encoded_entry_size);
			if entries_per_plaintext >= 1 {
				let bytes = self
					.secret_key
					.decrypt(&reply.ciphertexts[0])?
					.decode_coefficients();
				let offset = (index % entries_per_plaintext) * encoded_entry_size;
				window.extend_from_slice(&bytes[offset..offset + encoded_entry_size]);
			} else {
				for (chunk, ciphertext) in reply.ciphertexts.iter().enumerate() {
					let bytes = self.secret_key.decrypt(ciphertext)?.decode_coefficients();
					let take = bytes_per_plaintext.min(encoded_entry_size - chunk * bytes_per_plaintext);
					window.extend_from_slice(&bytes[..take]);
				}
			}
			entries.push(self.decode_entry(&window)?);
		}
		Ok(entries)
	}

	/// Strips the varint length prefix when entries are variable-length.
	fn decode_entry(&self, window: &[u8]) -> Result<Vec<u8>> {
		if !self.parameter.encoding_entry_size {
			return Ok(window[..self.parameter.entry_size_in_bytes].to_vec());
		}
		let width = self.parameter.entry_size_encoding_width;
		let (length, consumed) = read_varint(&window[..width.min(window.len())])?;
		debug_assert!(consumed <= width);
		let length = length as usize;
		if width + length > window.len() {
			return Err(PirError::CorruptedData {
				reason: format!("entry length {length} exceeds its {}-byte window", window.len()),
			});
		}
		Ok(window[width..width + length].to_vec())
	}
}
