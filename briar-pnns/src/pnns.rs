//! PNNS client and server drivers: cosine-similarity scoring of encrypted
//! query vectors against a plaintext vector database.

use std::sync::Arc;

use briar_he::bfv::{BfvContext, EvaluationKey, EvaluationKeyConfig, SecretKey};
use briar_he::Coeff;
use briar_math::{read_varint, write_varint, Array2d};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::info_span;

use crate::error::{PnnsError, Result};
use crate::matrix::{
	BabyStepGiantStep, CiphertextMatrix, MatrixDimensions, MatrixPacking, PlaintextMatrix,
};
use crate::mul::{evaluation_key_config, mul_transpose, DiagonalMatrix};
use crate::scoring::{decode_scores, normalize_rows, reduce_signed, scale_and_round};

/// Supported distance metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
	/// Scaled inner products of unit-normalized vectors.
	CosineSimilarity,
}

/// Caller-chosen PNNS configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnnsConfig {
	/// The scoring metric.
	pub distance_metric: DistanceMetric,
	/// Fixed-point scaling factor applied to normalized vectors.
	pub scaling_factor: u64,
	/// Explicit BSGS split; derived from the vector dimension when absent.
	pub baby_step_giant_step: Option<BabyStepGiantStep>,
}

/// Derived, publicly shared PNNS parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnnsParameter {
	/// Database dimensions: entries x vector dimension.
	pub dimensions: MatrixDimensions,
	/// The BSGS split both sides use.
	pub baby_step_giant_step: BabyStepGiantStep,
	/// Fixed-point scaling factor.
	pub scaling_factor: u64,
	/// The scoring metric.
	pub distance_metric: DistanceMetric,
	/// The plaintext moduli, in CRT order.
	pub plaintext_moduli: Vec<u64>,
}

/// The float vector database with per-entry identifiers and metadata.
#[derive(Debug, Clone)]
pub struct VectorDatabase {
	/// One row per entry.
	pub vectors: Array2d<f32>,
	/// Per-entry identifiers, parallel to the rows.
	pub entry_ids: Vec<u64>,
	/// Per-entry metadata, parallel to the rows.
	pub entry_metadatas: Vec<Vec<u8>>,
}

/// A PNNS query: one encrypted dense-row matrix per plaintext modulus.
#[derive(Debug, Clone)]
pub struct PnnsQuery {
	/// Ciphertext matrices, in the parameter's CRT modulus order.
	pub ciphertext_matrices: Vec<CiphertextMatrix<Coeff>>,
}

/// A PNNS response: one encrypted dense-column score matrix per plaintext
/// modulus, plus the database's identifiers and metadata.
#[derive(Debug, Clone)]
pub struct PnnsResponse {
	/// Score matrices, in the parameter's CRT modulus order.
	pub ciphertext_matrices: Vec<CiphertextMatrix<Coeff>>,
	/// Entry identifiers, parallel to the score rows.
	pub entry_ids: Vec<u64>,
	/// Entry metadata, parallel to the score rows.
	pub entry_metadatas: Vec<Vec<u8>>,
}

fn write_matrices(buffer: &mut Vec<u8>, matrices: &[CiphertextMatrix<Coeff>]) {
	write_varint(buffer, matrices.len() as u64);
	for matrix in matrices {
		let bytes = matrix.to_bytes();
		write_varint(buffer, bytes.len() as u64);
		buffer.extend(bytes);
	}
}

fn read_matrices(
	contexts: &[Arc<BfvContext>],
	bytes: &[u8],
	offset: &mut usize,
) -> Result<Vec<CiphertextMatrix<Coeff>>> {
	let (count, consumed) = read_varint(&bytes[*offset..])?;
	*offset += consumed;
	if count as usize != contexts.len() {
		return Err(PnnsError::WrongContextsCount {
			actual: count as usize,
			expected: contexts.len(),
		});
	}
	let mut matrices = Vec::with_capacity(contexts.len());
	for context in contexts {
		let (length, consumed) = read_varint(&bytes[*offset..])?;
		*offset += consumed;
		let end = offset
			.checked_add(length as usize)
			.filter(|&end| end <= bytes.len())
			.ok_or(PnnsError::ValidationError {
				reason: "matrix extends past the end of the buffer".to_string(),
			})?;
		matrices.push(CiphertextMatrix::from_bytes(context, &bytes[*offset..end])?);
		*offset = end;
	}
	Ok(matrices)
}

impl PnnsQuery {
	/// Serializes the query.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut bytes = Vec::new();
		write_matrices(&mut bytes, &self.ciphertext_matrices);
		bytes
	}

	/// Deserializes a query; one matrix per context is required.
	pub fn from_bytes(contexts: &[Arc<BfvContext>], bytes: &[u8]) -> Result<Self> {
		let mut offset = 0usize;
		Ok(Self {
			ciphertext_matrices: read_matrices(contexts, bytes, &mut offset)?,
		})
	}
}

impl PnnsResponse {
	/// Serializes the response, including entry identifiers and metadata.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut bytes = Vec::new();
		write_matrices(&mut bytes, &self.ciphertext_matrices);
		write_varint(&mut bytes, self.entry_ids.len() as u64);
		for &id in &self.entry_ids {
			write_varint(&mut bytes, id);
		}
		for metadata in &self.entry_metadatas {
			write_varint(&mut bytes, metadata.len() as u64);
			bytes.extend(metadata);
		}
		bytes
	}

	/// Deserializes a response.
	pub fn from_bytes(contexts: &[Arc<BfvContext>], bytes: &[u8]) -> Result<Self> {
		let mut offset = 0usize;
		let ciphertext_matrices = read_matrices(contexts, bytes, &mut offset)?;
		let mut next = |offset: &mut usize| -> Result<u64> {
			let (value, consumed) = read_varint(&bytes[*offset..])?;
			*offset += consumed;
			Ok(value)
		};
		let entry_count = next(&mut offset)? as usize;
		let mut entry_ids = Vec::with_capacity(entry_count);
		for _ in 0..entry_count {
			entry_ids.push(next(&mut offset)?);
		}
		let mut entry_metadatas = Vec::with_capacity(entry_count);
		for _ in 0..entry_count {
			let length = next(&mut offset)? as usize;
			let end = offset
				.checked_add(length)
				.filter(|&end| end <= bytes.len())
				.ok_or(PnnsError::ValidationError {
					reason: "metadata extends past the end of the buffer".to_string(),
				})?;
			entry_metadatas.push(bytes[offset..end].to_vec());
			offset = end;
		}
		Ok(Self {
			ciphertext_matrices,
			entry_ids,
			entry_metadatas,
		})
	}
}

/// Decrypted scores with their entry annotations.
#[derive(Debug, Clone)]
pub struct SearchResult {
	/// `entries x queries` cosine scores.
	pub scores: Array2d<f32>,
	/// Entry identifiers, parallel to the score rows.
	pub entry_ids: Vec<u64>,
	/// Entry metadata, parallel to the score rows.
	pub entry_metadatas: Vec<Vec<u8>>,
}

fn validate_contexts(contexts: &[Arc<BfvContext>]) -> Result<()> {
	let first = contexts.first().ok_or(PnnsError::WrongContextsCount {
		actual: 0,
		expected: 1,
	})?;
	for context in contexts {
		if context.degree() != first.degree()
			|| context.parameters().coefficient_moduli
				!= first.parameters().coefficient_moduli
		{
			return Err(PnnsError::WrongEncryptionParameters);
		}
		if !context.supports_simd() {
			return Err(PnnsError::SimdEncodingNotSupported {
				reason: format!(
					"plaintext modulus {} has no batching",
					context.plain_modulus().value()
				),
			});
		}
	}
	Ok(())
}

/// The server side: the database packed along diagonals, once per
/// plaintext modulus.
pub struct PnnsServer {
	contexts: Vec<Arc<BfvContext>>,
	parameter: PnnsParameter,
	databases: Vec<DiagonalMatrix>,
	entry_ids: Vec<u64>,
	entry_metadatas: Vec<Vec<u8>>,
}

impl PnnsServer {
	/// Normalizes, scales, and packs `database` under every context.
	pub fn process(
		contexts: &[Arc<BfvContext>],
		config: &PnnsConfig,
		database: &VectorDatabase,
	) -> Result<Self> {
		validate_contexts(contexts)?;
		let row_count = database.vectors.row_count();
		if row_count == 0 {
			return Err(PnnsError::EmptyDatabase);
		}
		if database.entry_ids.len() != row_count
			|| database.entry_metadatas.len() != row_count
		{
			return Err(PnnsError::ValidationError {
				reason: format!(
					"{} ids and {} metadata entries for {row_count} vectors",
					database.entry_ids.len(),
					database.entry_metadatas.len()
				),
			});
		}
		let dimensions =
			MatrixDimensions::new(row_count, database.vectors.column_count())?;
		let bsgs = match config.baby_step_giant_step {
			Some(bsgs) => BabyStepGiantStep::with_steps(
				dimensions.column_count,
				bsgs.baby_step,
				bsgs.giant_step,
			)?,
			None => BabyStepGiantStep::new(dimensions.column_count)?,
		};

		let normalized = normalize_rows(&database.vectors);
		let scaled = scale_and_round(&normalized, config.scaling_factor)?;
		let mut databases = Vec::with_capacity(contexts.len());
		for context in contexts {
			let reduced = reduce_signed(&scaled, context.plain_modulus().value())?;
			let matrix = PlaintextMatrix::new(
				context,
				dimensions,
				MatrixPacking::Diagonal(bsgs),
				&reduced,
			)?;
			databases.push(DiagonalMatrix::new(&matrix)?);
		}

		Ok(Self {
			contexts: contexts.to_vec(),
			parameter: PnnsParameter {
				dimensions,
				baby_step_giant_step: bsgs,
				scaling_factor: config.scaling_factor,
				distance_metric: config.distance_metric,
				plaintext_moduli: contexts
					.iter()
					.map(|context| context.plain_modulus().value())
					.collect(),
			},
			databases,
			entry_ids: database.entry_ids.clone(),
			entry_metadatas: database.entry_metadatas.clone(),
		})
	}

	/// The parameters the client must agree on.
	pub fn parameter(&self) -> &PnnsParameter {
		&self.parameter
	}

	/// The Galois keys the client must publish, per context.
	pub fn evaluation_key_config(&self) -> Result<EvaluationKeyConfig> {
		evaluation_key_config(
			&self.contexts[0],
			self.parameter.dimensions,
			&self.parameter.baby_step_giant_step,
		)
	}

	/// Scores a query against the database: one mulTranspose per plaintext
	/// modulus, modulus-switched down for transport.
	pub fn compute_response(
		&self,
		query: &PnnsQuery,
		evaluation_keys: &[EvaluationKey],
	) -> Result<PnnsResponse> {
		let span = info_span!("pnns_compute_response");
		let _entered = span.enter();
		if query.ciphertext_matrices.len() != self.contexts.len() {
			return Err(PnnsError::InvalidQueryCiphertextMatrixCount {
				actual: query.ciphertext_matrices.len(),
				expected: self.contexts.len(),
			});
		}
		if evaluation_keys.len() != self.contexts.len() {
			return Err(PnnsError::WrongContextsCount {
				actual: evaluation_keys.len(),
				expected: self.contexts.len(),
			});
		}
		let mut matrices = Vec::with_capacity(self.databases.len());
		for ((database, matrix), evaluation_key) in self
			.databases
			.iter()
			.zip(&query.ciphertext_matrices)
			.zip(evaluation_keys)
		{
			let mut scores = mul_transpose(database, matrix, evaluation_key)?;
			scores.mod_switch_to_single()?;
			matrices.push(scores);
		}
		Ok(PnnsResponse {
			ciphertext_matrices: matrices,
			entry_ids: self.entry_ids.clone(),
			entry_metadatas: self.entry_metadatas.clone(),
		})
	}
}

/// The client side: one secret key per plaintext modulus.
pub struct PnnsClient {
	contexts: Vec<Arc<BfvContext>>,
	parameter: PnnsParameter,
	secret_keys: Vec<SecretKey>,
}

impl PnnsClient {
	/// Binds a client to agreed parameters, generating one secret key per
	/// context.
	pub fn new<R: RngCore + CryptoRng>(
		contexts: &[Arc<BfvContext>],
		parameter: PnnsParameter,
		rng: &mut R,
	) -> Result<Self> {
		validate_contexts(contexts)?;
		if contexts.len() != parameter.plaintext_moduli.len() {
			return Err(PnnsError::WrongContextsCount {
				actual: contexts.len(),
				expected: parameter.plaintext_moduli.len(),
			});
		}
		let secret_keys = contexts
			.iter()
			.map(|context| SecretKey::generate(context, rng))
			.collect();
		Ok(Self {
			contexts: contexts.to_vec(),
			parameter,
			secret_keys,
		})
	}

	/// Generates the evaluation keys the server needs, per context.
	pub fn generate_evaluation_keys<R: RngCore + CryptoRng>(
		&self,
		rng: &mut R,
	) -> Result<Vec<EvaluationKey>> {
		let config = evaluation_key_config(
			&self.contexts[0],
			self.parameter.dimensions,
			&self.parameter.baby_step_giant_step,
		)?;
		self.secret_keys
			.iter()
			.map(|secret_key| Ok(EvaluationKey::generate(secret_key, &config, rng)?))
			.collect()
	}

	/// Normalizes, scales, and encrypts query vectors (one per row).
	pub fn generate_query<R: RngCore + CryptoRng>(
		&self,
		vectors: &Array2d<f32>,
		rng: &mut R,
	) -> Result<PnnsQuery> {
		if vectors.column_count() != self.parameter.dimensions.column_count {
			return Err(PnnsError::ValidationError {
				reason: format!(
					"query vectors of dimension {} against a database of dimension {}",
					vectors.column_count(),
					self.parameter.dimensions.column_count
				),
			});
		}
		let dimensions =
			MatrixDimensions::new(vectors.row_count(), vectors.column_count())?;
		let normalized = normalize_rows(vectors);
		let scaled = scale_and_round(&normalized, self.parameter.scaling_factor)?;
		let mut matrices = Vec::with_capacity(self.contexts.len());
		for (context, secret_key) in self.contexts.iter().zip(&self.secret_keys) {
			let reduced = reduce_signed(&scaled, context.plain_modulus().value())?;
			let matrix =
				PlaintextMatrix::new(context, dimensions, MatrixPacking::DenseRow, &reduced)?;
			matrices.push(matrix.encrypt(secret_key, rng)?);
		}
		Ok(PnnsQuery {
			ciphertext_matrices: matrices,
		})
	}

	/// Decrypts a response into float scores with entry annotations.
	pub fn decrypt_response(&self, response: &PnnsResponse) -> Result<SearchResult> {
		if response.ciphertext_matrices.len() != self.contexts.len() {
			return Err(PnnsError::WrongContextsCount {
				actual: response.ciphertext_matrices.len(),
				expected: self.contexts.len(),
			});
		}
		let mut per_modulus = Vec::with_capacity(self.contexts.len());
		for (matrix, secret_key) in
			response.ciphertext_matrices.iter().zip(&self.secret_keys)
		{
			per_modulus.push(matrix.decrypt(secret_key)?.decode()?);
		}
		let scores = decode_scores(
			&per_modulus,
			&self.parameter.plaintext_moduli,
			self.parameter.scaling_factor,
		)?;
		Ok(SearchResult {
			scores,
			entry_ids: response.entry_ids.clone(),
			entry_metadatas: response.entry_metadatas.clone(),
		})
	}
}
