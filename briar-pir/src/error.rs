use briar_he::HeError;
use briar_math::MathError;
use thiserror::Error;

/// Failures surfaced by the index- and keyword-PIR engines.
#[derive(Debug, Error)]
pub enum PirError {
	/// A query carries more indices than the parameter's batch size.
	#[error("batch of {actual} queries exceeds the configured batch size {expected}")]
	InvalidBatchSize {
		/// Queries supplied.
		actual: usize,
		/// Batch size agreed in the parameters.
		expected: usize,
	},

	/// The cuckoo configuration is unusable.
	#[error("invalid cuckoo configuration: {reason}")]
	InvalidCuckooConfig {
		/// Which constraint failed.
		reason: String,
	},

	/// The same keyword was inserted twice.
	#[error("duplicate keyword in database")]
	InvalidDatabaseDuplicateKeyword,

	/// The database entry count does not match the parameters.
	#[error("database holds {actual} entries, expected {expected}")]
	InvalidDatabaseEntryCount {
		/// Entries present.
		actual: usize,
		/// Entries expected.
		expected: usize,
	},

	/// An entry exceeds the configured entry size.
	#[error("entry of {actual} bytes exceeds the configured size {expected}")]
	InvalidDatabaseEntrySize {
		/// Offending entry size.
		actual: usize,
		/// Configured size.
		expected: usize,
	},

	/// The processed database has the wrong plaintext count.
	#[error("processed database holds {actual} plaintexts, expected {expected}")]
	InvalidDatabasePlaintextCount {
		/// Plaintexts present.
		actual: usize,
		/// Plaintexts expected.
		expected: usize,
	},

	/// The dimension count is outside `{1, 2}`.
	#[error("dimension count {dimension_count} is not supported")]
	InvalidDimensionCount {
		/// The rejected dimension count.
		dimension_count: usize,
	},

	/// A hash-bucket value exceeds the 16-bit length field.
	#[error("hash bucket value of {actual} bytes exceeds {expected}")]
	InvalidHashBucketEntryValueSize {
		/// Offending value size.
		actual: usize,
		/// Largest encodable size.
		expected: usize,
	},

	/// A hash bucket holds more slots than the 8-bit count field.
	#[error("hash bucket with {actual} slots exceeds {expected}")]
	InvalidHashBucketSlotCount {
		/// Offending slot count.
		actual: usize,
		/// Largest encodable count.
		expected: usize,
	},

	/// A queried index is out of range.
	#[error("index {index} is out of range for {entry_count} entries")]
	InvalidIndex {
		/// The rejected index.
		index: usize,
		/// Number of entries.
		entry_count: usize,
	},

	/// The named PIR algorithm is unknown.
	#[error("invalid PIR algorithm {algorithm}")]
	InvalidPirAlgorithm {
		/// The rejected algorithm tag.
		algorithm: String,
	},

	/// A reply has the wrong ciphertext count.
	#[error("reply holds {actual} ciphertexts, expected {expected}")]
	InvalidReply {
		/// Ciphertexts present.
		actual: usize,
		/// Ciphertexts expected.
		expected: usize,
	},

	/// A response has the wrong reply count.
	#[error("response holds {actual} replies, expected {expected}")]
	InvalidResponse {
		/// Replies present.
		actual: usize,
		/// Replies expected.
		expected: usize,
	},

	/// Sharding configuration is inconsistent.
	#[error("invalid sharding: {reason}")]
	InvalidSharding {
		/// Which constraint failed.
		reason: String,
	},

	/// A cross-check between configuration and data failed.
	#[error("validation failed: {reason}")]
	ValidationError {
		/// What failed.
		reason: String,
	},

	/// The database is empty.
	#[error("database is empty")]
	EmptyDatabase,

	/// Cuckoo insertion failed even after the allowed evictions and
	/// expansions.
	#[error("failed to construct cuckoo table")]
	FailedToConstructCuckooTable,

	/// Serialized data is structurally invalid.
	#[error("corrupted data: {reason}")]
	CorruptedData {
		/// What was malformed.
		reason: String,
	},

	/// The database serialization version is unknown.
	#[error("unknown database serialization version {version}")]
	InvalidDatabaseSerializationVersion {
		/// The rejected version.
		version: u8,
	},

	/// A serialized plaintext tag is unknown.
	#[error("unknown database plaintext tag {tag}")]
	InvalidDatabaseSerializationPlaintextTag {
		/// The rejected tag.
		tag: u8,
	},

	/// Scheme-layer failure.
	#[error(transparent)]
	He(#[from] HeError),

	/// Word-level failure.
	#[error(transparent)]
	Math(#[from] MathError),
}

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, PirError>;
