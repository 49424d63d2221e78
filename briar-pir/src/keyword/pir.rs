//! Keyword PIR over the MulPir index engine.

use std::sync::Arc;

use briar_he::bfv::{BfvContext, EvaluationKey, SecretKey};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::MulPirClient;
use crate::database::ProcessedDatabase;
use crate::error::{PirError, Result};
use crate::keyword::bucket::HashBucket;
use crate::keyword::cuckoo::{CuckooTable, CuckooTableConfig, KeywordValuePair};
use crate::keyword::hash::HashKeyword;
use crate::messages::{Query, Response};
use crate::parameter::{generate_parameter, IndexPirConfig, IndexPirParameter, KeyCompression};
use crate::server::MulPirServer;

/// Caller-chosen keyword-PIR configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordPirConfig {
	/// Cuckoo hashing configuration.
	pub cuckoo: CuckooTableConfig,
	/// Hypercube dimensionality of the index layer, 1 or 2.
	pub dimension_count: usize,
	/// Galois key compression of the index layer.
	pub key_compression: KeyCompression,
	/// Uneven-dimension heuristic of the index layer.
	pub uneven_dimensions: bool,
}

/// Derived, publicly shared keyword-PIR parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordPirParameter {
	/// Hash functions (and sub-tables, and batched index queries).
	pub hash_function_count: usize,
	/// Buckets per sub-table: the index layer's entry count.
	pub buckets_per_table: usize,
	/// The index layer's parameters.
	pub index_parameter: IndexPirParameter,
}

/// The server side: one processed sub-database per hash function.
pub struct KeywordPirServer {
	parameter: KeywordPirParameter,
	tables: Vec<MulPirServer>,
}

impl KeywordPirServer {
	/// Builds the cuckoo table over `rows`, packs each sub-table, and
	/// derives the shared parameters.
	pub fn process(
		context: &Arc<BfvContext>,
		config: &KeywordPirConfig,
		rows: &[KeywordValuePair],
	) -> Result<Self> {
		Self::process_inner(context, config, rows, true)
	}

	fn process_inner(
		context: &Arc<BfvContext>,
		config: &KeywordPirConfig,
		rows: &[KeywordValuePair],
		allow_rebuild: bool,
	) -> Result<Self> {
		if rows.is_empty() {
			return Err(PirError::EmptyDatabase);
		}
		let table = CuckooTable::new(config.cuckoo.clone(), rows)?;
		let serialized = table.serialize_buckets()?;
		let max_entry_size = match config.cuckoo.bucket_count {
			crate::keyword::cuckoo::BucketCountConfig::FixedSize {
				..
			} => config.cuckoo.max_serialized_bucket_size,
			crate::keyword::cuckoo::BucketCountConfig::AllowExpansion {
				..
			} => serialized
				.iter()
				.flatten()
				.map(Vec::len)
				.max()
				.unwrap_or(1),
		};

		// Legacy client-decode workaround: when the entry size and the
		// plaintext capacity divide one another, old clients mis-slice the
		// reply. Rebuild once with a reduced bucket cap to dodge the
		// boundary. TODO: drop once pre-briar clients are retired.
		let bytes_per_plaintext = context.bytes_per_plaintext();
		let divides = max_entry_size % bytes_per_plaintext == 0
			|| bytes_per_plaintext % max_entry_size == 0;
		if divides && allow_rebuild {
			warn!(
				max_entry_size,
				bytes_per_plaintext,
				"rebuilding keyword database with a reduced bucket size"
			);
			let mut reduced = config.clone();
			reduced.cuckoo.max_serialized_bucket_size = max_entry_size - 1;
			return Self::process_inner(context, &reduced, rows, false);
		}

		let index_config = IndexPirConfig {
			entry_count: table.buckets_per_table(),
			entry_size_in_bytes: max_entry_size,
			dimension_count: config.dimension_count,
			batch_size: table.table_count(),
			uneven_dimensions: config.uneven_dimensions,
			key_compression: config.key_compression,
			encoding_entry_size: false,
		};
		let index_parameter = generate_parameter(&index_config, context)?;

		let mut tables = Vec::with_capacity(serialized.len());
		for buckets in &serialized {
			let entries: Vec<Vec<u8>> = buckets
				.iter()
				.map(|bucket| {
					let mut padded = bucket.clone();
					padded.resize(max_entry_size, 0);
					padded
				})
				.collect();
			let database = ProcessedDatabase::new(context, &index_parameter, &entries)?;
			tables.push(MulPirServer::new(context, index_parameter.clone(), database)?);
		}

		Ok(Self {
			parameter: KeywordPirParameter {
				hash_function_count: table.table_count(),
				buckets_per_table: table.buckets_per_table(),
				index_parameter,
			},
			tables,
		})
	}

	/// The parameters the client must agree on.
	pub fn parameter(&self) -> &KeywordPirParameter {
		&self.parameter
	}

	/// Computes a response: one reply per hash function, each served from
	/// its own sub-table.
	pub fn compute_response(
		&self,
		query: &Query,
		evaluation_key: &EvaluationKey,
	) -> Result<Response> {
		let hash_count = self.parameter.hash_function_count;
		if query.indices_count != hash_count {
			return Err(PirError::InvalidBatchSize {
				actual: query.indices_count,
				expected: hash_count,
			});
		}
		let expanded = self.tables[0].expand_query(query, evaluation_key)?;
		let dimension_sum: usize = self.parameter.index_parameter.dimensions.iter().sum();
		let mut replies = Vec::with_capacity(hash_count);
		for (table_index, table) in self.tables.iter().enumerate() {
			let offset = table_index * dimension_sum;
			replies.push(
				table.compute_reply(&expanded[offset..offset + dimension_sum], evaluation_key)?,
			);
		}
		Ok(Response {
			replies,
		})
	}
}

/// The client side: maps keywords to bucket indices and scans decrypted
/// buckets for its tag.
pub struct KeywordPirClient {
	parameter: KeywordPirParameter,
	index_client: MulPirClient,
}

impl KeywordPirClient {
	/// Binds a client to agreed parameters and its secret key.
	pub fn new(
		context: &Arc<BfvContext>,
		parameter: KeywordPirParameter,
		secret_key: SecretKey,
	) -> Self {
		let index_client =
			MulPirClient::new(context, parameter.index_parameter.clone(), secret_key);
		Self {
			parameter,
			index_client,
		}
	}

	/// Generates the evaluation key the server needs.
	pub fn generate_evaluation_key<R: RngCore + CryptoRng>(
		&self,
		rng: &mut R,
	) -> Result<EvaluationKey> {
		self.index_client.generate_evaluation_key(rng)
	}

	fn indices(&self, keyword: &[u8]) -> Vec<usize> {
		HashKeyword::hash_indices(
			keyword,
			self.parameter.buckets_per_table,
			self.parameter.hash_function_count,
		)
	}

	/// Builds the batched index query for `keyword`.
	pub fn generate_query<R: RngCore + CryptoRng>(
		&self,
		keyword: &[u8],
		rng: &mut R,
	) -> Result<Query> {
		self.index_client.generate_query(&self.indices(keyword), rng)
	}

	/// Decrypts a response, returning the value stored under `keyword` or
	/// `None` when the keyword is absent.
	pub fn decrypt_response(
		&self,
		response: &Response,
		keyword: &[u8],
	) -> Result<Option<Vec<u8>>> {
		let buckets = self
			.index_client
			.decrypt_response(response, &self.indices(keyword))?;
		for bytes in &buckets {
			let bucket = HashBucket::from_bytes(bytes)?;
			if let Some(value) = bucket.find(keyword) {
				return Ok(Some(value.to_vec()));
			}
		}
		Ok(None)
	}

	/// Total entries across the response's buckets, walking every
	/// self-delimiting bucket including empty sentinels.
	pub fn count_entries_in_response(
		&self,
		response: &Response,
		keyword: &[u8],
	) -> Result<usize> {
		let buckets = self
			.index_client
			.decrypt_response(response, &self.indices(keyword))?;
		let mut count = 0usize;
		for bytes in &buckets {
			count += HashBucket::from_bytes(bytes)?.slots.len();
		}
		Ok(count)
	}
}
