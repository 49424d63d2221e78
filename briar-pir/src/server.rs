//! The MulPir server: query expansion and response computation.

use std::sync::Arc;

use briar_he::bfv::{BfvContext, Ciphertext, EvaluationKey, TensorProduct};
use briar_he::{Coeff, Eval, HeError};
use briar_math::{ceil_log2, is_power_of_two, log2};
use tracing::{debug, info_span};

use crate::database::ProcessedDatabase;
use crate::error::{PirError, Result};
use crate::messages::{Query, Reply, Response};
use crate::parameter::IndexPirParameter;

/// The server side of a MulPir instance.
pub struct MulPirServer {
	context: Arc<BfvContext>,
	parameter: IndexPirParameter,
	database: ProcessedDatabase,
}

impl MulPirServer {
	/// Binds a server to agreed parameters and a processed database.
	pub fn new(
		context: &Arc<BfvContext>,
		parameter: IndexPirParameter,
		database: ProcessedDatabase,
	) -> Result<Self> {
		if database.parameter() != &parameter {
			return Err(PirError::ValidationError {
				reason: "database was processed under different parameters".to_string(),
			});
		}
		Ok(Self {
			context: Arc::clone(context),
			parameter,
			database,
		})
	}

	/// The agreed parameters.
	pub fn parameter(&self) -> &IndexPirParameter {
		&self.parameter
	}

	/// Applies the expansion automorphism `x -> x^((1 << power) + 1)`,
	/// substituting a kept key applied `2^(power - j)` times when key
	/// compression dropped the element itself.
	fn apply_expansion_galois(
		&self,
		ciphertext: &Ciphertext<Coeff>,
		power: u32,
		evaluation_key: &EvaluationKey,
	) -> Result<Ciphertext<Coeff>> {
		let element = (1u64 << power) + 1;
		if evaluation_key.has_galois_key(element) {
			return Ok(ciphertext.apply_galois(element, evaluation_key)?);
		}
		// Kept elements are all of the form (1 << j) + 1; the largest j
		// below `power` minimizes the number of substitutions, and every
		// kept power is at least ceil((log2(N) + 1) / 2), which is what
		// makes the squaring chain land on (1 << power) + 1.
		let substitute = evaluation_key
			.galois_elements()
			.filter_map(|kept| {
				let low = kept.checked_sub(1)?;
				(is_power_of_two(low) && log2(low) < power).then(|| log2(low))
			})
			.max()
			.ok_or(HeError::MissingGaloisKey { element })?;
		let repetitions = 1usize << (power - substitute);
		let substitute_element = (1u64 << substitute) + 1;
		let mut result = ciphertext.clone();
		for _ in 0..repetitions {
			result = result.apply_galois(substitute_element, evaluation_key)?;
		}
		Ok(result)
	}

	/// Expands one compressed ciphertext into `count` indicator
	/// ciphertexts via halving with Galois automorphisms.
	fn expand_ciphertext(
		&self,
		ciphertext: &Ciphertext<Coeff>,
		count: usize,
		evaluation_key: &EvaluationKey,
	) -> Result<Vec<Ciphertext<Coeff>>> {
		let log_degree = log2(self.context.degree() as u64);
		let depth = ceil_log2(count as u64);
		let mut expanded = vec![ciphertext.clone()];
		for level in 0..depth {
			let power = log_degree - level;
			let half = expanded.len();
			let mut even = Vec::with_capacity(half);
			let mut odd = Vec::with_capacity(half);
			for current in &expanded {
				let substituted = self.apply_expansion_galois(current, power, evaluation_key)?;
				even.push(current.add(&substituted));

				let mut shifted = current.clone();
				shifted.multiply_power_of_x(-(1i64 << level));
				let shifted_substituted =
					self.apply_expansion_galois(&shifted, power, evaluation_key)?;
				odd.push(shifted.add(&shifted_substituted));
			}
			even.extend(odd);
			expanded = even;
		}
		expanded.truncate(count);
		Ok(expanded)
	}

	/// Expands a query into its `dimension_sum * indices_count` indicator
	/// ciphertexts.
	pub fn expand_query(
		&self,
		query: &Query,
		evaluation_key: &EvaluationKey,
	) -> Result<Vec<Ciphertext<Coeff>>> {
		let degree = self.context.degree();
		let dimension_sum: usize = self.parameter.dimensions.iter().sum();
		let total_slots = dimension_sum * query.indices_count;
		let expected = total_slots.div_ceil(degree);
		if query.indices_count == 0 || query.indices_count > self.parameter.batch_size {
			return Err(PirError::InvalidBatchSize {
				actual: query.indices_count,
				expected: self.parameter.batch_size,
			});
		}
		if query.ciphertexts.len() != expected {
			return Err(PirError::ValidationError {
				reason: format!(
					"query holds {} ciphertexts, expected {expected}",
					query.ciphertexts.len()
				),
			});
		}
		let mut expanded = Vec::with_capacity(total_slots);
		for (block, ciphertext) in query.ciphertexts.iter().enumerate() {
			let slots = degree.min(total_slots - block * degree);
			expanded.extend(self.expand_ciphertext(ciphertext, slots, evaluation_key)?);
		}
		Ok(expanded)
	}

	/// Computes the response: per batched index, a per-chunk pipeline of
	/// first-dimension plaintext inner products, a ciphertext-ciphertext
	/// fold over the second dimension with one relinearization, and a
	/// final switch to a single modulus.
	///
	/// Chunks (and batched queries) are independent; a parallel driver may
	/// compute them in any order as long as results land in their assigned
	/// positions.
	pub fn compute_response(
		&self,
		query: &Query,
		evaluation_key: &EvaluationKey,
	) -> Result<Response> {
		let span = info_span!("pir_compute_response", queries = query.indices_count);
		let _entered = span.enter();

		let expanded = self.expand_query(query, evaluation_key)?;
		let dimension_sum: usize = self.parameter.dimensions.iter().sum();

		let mut replies = Vec::with_capacity(query.indices_count);
		for query_index in 0..query.indices_count {
			let offset = query_index * dimension_sum;
			replies.push(
				self.compute_reply(&expanded[offset..offset + dimension_sum], evaluation_key)?,
			);
		}
		debug!(replies = replies.len(), "computed PIR response");
		Ok(Response {
			replies,
		})
	}

	/// Computes one reply from a single query's expanded indicator
	/// ciphertexts.
	pub(crate) fn compute_reply(
		&self,
		indicators: &[Ciphertext<Coeff>],
		evaluation_key: &EvaluationKey,
	) -> Result<Reply> {
		let dimensions = &self.parameter.dimensions;
		let first_dimension = dimensions[0];
		let remaining: usize = dimensions.iter().skip(1).product::<usize>().max(1);
		let chunk_count = self.database.chunk_count();

		let first_queries: Vec<Ciphertext<Eval>> = indicators[..first_dimension]
			.iter()
			.map(|ciphertext| ciphertext.clone().to_eval())
			.collect::<std::result::Result<_, _>>()?;
		let rest_queries = &indicators[first_dimension..];

		let mut ciphertexts = Vec::with_capacity(chunk_count);
		for chunk in 0..chunk_count {
			let slots = self.database.chunk(chunk);
			let mut columns = Vec::with_capacity(remaining);
			for column in 0..remaining {
				let window = &slots[column * first_dimension..(column + 1) * first_dimension];
				let product = Ciphertext::inner_product_plain(
					&first_queries,
					window.iter().map(Option::as_ref),
				)?;
				columns.push(product.to_coeff()?);
			}
			let mut folded = if dimensions.len() == 1 {
				columns.pop().expect("one column in one dimension")
			} else {
				let mut accumulator = TensorProduct::new(&self.context)?;
				for (column, rest_query) in columns.iter().zip(rest_queries) {
					accumulator.accumulate(column, rest_query)?;
				}
				let mut product = accumulator.finalize()?;
				product.relinearize(evaluation_key)?;
				product
			};
			folded.mod_switch_to_single()?;
			ciphertexts.push(folded);
		}
		Ok(Reply {
			ciphertexts,
		})
	}
}
