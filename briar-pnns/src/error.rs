use briar_he::HeError;
use briar_math::MathError;
use thiserror::Error;

/// Failures surfaced by the nearest-neighbor engine.
#[derive(Debug, Error)]
pub enum PnnsError {
	/// A ciphertext matrix carries no ciphertexts.
	#[error("ciphertext array is empty")]
	EmptyCiphertextArray,

	/// A plaintext matrix carries no plaintexts.
	#[error("plaintext array is empty")]
	EmptyPlaintextArray,

	/// The vector database is empty.
	#[error("database is empty")]
	EmptyDatabase,

	/// A matrix does not have the two SIMD rows batching provides.
	#[error("expected {expected} SIMD rows, found {actual}")]
	IncorrectSimdRowsCount {
		/// Rows found.
		actual: usize,
		/// Rows required.
		expected: usize,
	},

	/// Matrix dimensions are degenerate.
	#[error("invalid matrix dimensions {row_count}x{column_count}")]
	InvalidMatrixDimensions {
		/// Row count.
		row_count: usize,
		/// Column count.
		column_count: usize,
	},

	/// A query does not carry one ciphertext matrix per plaintext modulus.
	#[error("query holds {actual} ciphertext matrices, expected {expected}")]
	InvalidQueryCiphertextMatrixCount {
		/// Matrices present.
		actual: usize,
		/// Matrices expected.
		expected: usize,
	},

	/// The data does not fit the SIMD slot grid.
	#[error("SIMD encoding does not support {reason}")]
	SimdEncodingNotSupported {
		/// Which bound failed.
		reason: String,
	},

	/// A cross-check between configuration and data failed.
	#[error("validation failed: {reason}")]
	ValidationError {
		/// What failed.
		reason: String,
	},

	/// A ciphertext matrix has the wrong ciphertext count.
	#[error("matrix holds {actual} ciphertexts, expected {expected}")]
	WrongCiphertextCount {
		/// Ciphertexts present.
		actual: usize,
		/// Ciphertexts expected.
		expected: usize,
	},

	/// An operand lives in a different context.
	#[error("operand belongs to a different context")]
	WrongContext,

	/// The client and server disagree on the plaintext-CRT modulus count.
	#[error("{actual} contexts supplied, expected {expected}")]
	WrongContextsCount {
		/// Contexts supplied.
		actual: usize,
		/// Contexts expected.
		expected: usize,
	},

	/// The requested distance metric does not match the database.
	#[error("wrong distance metric")]
	WrongDistanceMetric,

	/// An encoding was given the wrong number of values.
	#[error("{actual} values supplied, expected {expected}")]
	WrongEncodingValuesCount {
		/// Values supplied.
		actual: usize,
		/// Values expected.
		expected: usize,
	},

	/// The query was built under different encryption parameters.
	#[error("wrong encryption parameters")]
	WrongEncryptionParameters,

	/// A matrix has the wrong packing for this operation.
	#[error("wrong matrix packing")]
	WrongMatrixPacking,

	/// A plaintext matrix has the wrong plaintext count.
	#[error("matrix holds {actual} plaintexts, expected {expected}")]
	WrongPlaintextCount {
		/// Plaintexts present.
		actual: usize,
		/// Plaintexts expected.
		expected: usize,
	},

	/// Scheme-layer failure.
	#[error(transparent)]
	He(#[from] HeError),

	/// Word-level failure.
	#[error(transparent)]
	Math(#[from] MathError),
}

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, PnnsError>;
