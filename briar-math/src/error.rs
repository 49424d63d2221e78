use thiserror::Error;

/// Failures surfaced by the word-level primitives.
///
/// Precondition violations on the constant-time fast paths (an operand not
/// below its modulus, a modulus outside `[2, 2^62 - 1]`) are programming
/// errors and assert instead of returning one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MathError {
	/// The modulus is outside the supported range, or an even modulus is not
	/// a power of two.
	#[error("invalid modulus {modulus}")]
	InvalidModulus {
		/// The rejected modulus.
		modulus: u64,
	},

	/// Extended Euclid found a common factor.
	#[error("{value} is not invertible modulo {modulus}")]
	NotInvertible {
		/// The non-invertible value.
		value: u64,
		/// The modulus under which the inverse was requested.
		modulus: u64,
	},

	/// The prime search exhausted its range.
	#[error("no prime with {significant_bits} significant bits supports degree {degree}")]
	NoPrimeFound {
		/// Requested significant bit count.
		significant_bits: u32,
		/// The NTT degree the prime had to support.
		degree: usize,
	},

	/// A varint encodes a value wider than 64 bits.
	#[error("varint exceeds the 64-bit range")]
	VarintOverflow,

	/// A varint ends while its continuation bit is still set.
	#[error("varint ends with a dangling continuation bit")]
	VarintTruncated,

	/// Flat data length does not match the requested matrix shape.
	#[error("array of {actual} elements cannot have shape {row_count}x{column_count}")]
	InvalidArrayShape {
		/// Number of elements supplied.
		actual: usize,
		/// Requested row count.
		row_count: usize,
		/// Requested column count.
		column_count: usize,
	},
}

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, MathError>;
