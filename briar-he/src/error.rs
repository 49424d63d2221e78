use briar_math::MathError;
use thiserror::Error;

/// Failures surfaced by the ring, NTT, and BFV layers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeError {
	/// The polynomial degree is not a power of two in the supported range.
	#[error("invalid polynomial degree {degree}")]
	InvalidDegree {
		/// The rejected degree.
		degree: usize,
	},

	/// A context was built with no moduli.
	#[error("modulus chain is empty")]
	EmptyModulus,

	/// An odd modulus in the chain is not prime, or a modulus is out of
	/// range.
	#[error("invalid ring modulus {modulus}")]
	InvalidModulus {
		/// The rejected modulus.
		modulus: u64,
	},

	/// Two moduli in the chain share a factor.
	#[error("moduli {first} and {second} are not coprime")]
	CoprimeModuli {
		/// First offending modulus.
		first: u64,
		/// Second offending modulus.
		second: u64,
	},

	/// A polynomial context failed an internal consistency check.
	#[error("invalid polynomial context")]
	InvalidPolyContext,

	/// Two operands live in different polynomial contexts.
	#[error("polynomial context mismatch")]
	PolyContextMismatch,

	/// The modulus does not support a degree-`2N` NTT.
	#[error("modulus {modulus} is not NTT-friendly for degree {degree}")]
	InvalidNttModulus {
		/// The rejected modulus.
		modulus: u64,
		/// The NTT degree it had to support.
		degree: usize,
	},

	/// The plaintext modulus is out of range for the ciphertext moduli.
	#[error("invalid plaintext modulus {modulus}")]
	InvalidPlaintextModulus {
		/// The rejected plaintext modulus.
		modulus: u64,
	},

	/// The parameter set exceeds a structural bound of this implementation.
	#[error("unsupported parameters: {reason}")]
	UnsupportedParameters {
		/// Which bound failed.
		reason: String,
	},

	/// A serialized buffer has the wrong total length.
	#[error("serialized buffer holds {actual} bytes, expected {expected}")]
	SerializedBufferSizeMismatch {
		/// Bytes supplied.
		actual: usize,
		/// Bytes required by the context.
		expected: usize,
	},

	/// Encoded data does not fit one plaintext polynomial.
	#[error("{count} values exceed the plaintext capacity {capacity}")]
	EncodingDataExceedsCapacity {
		/// Values supplied.
		count: usize,
		/// Values that fit.
		capacity: usize,
	},

	/// SIMD encoding requested without an NTT-friendly plaintext modulus.
	#[error("plaintext modulus {modulus} does not support SIMD encoding")]
	SimdEncodingNotSupported {
		/// The plaintext modulus in use.
		modulus: u64,
	},

	/// The evaluation key has no Galois key for the requested element.
	#[error("no galois key for element {element}")]
	MissingGaloisKey {
		/// The requested Galois element.
		element: u64,
	},

	/// The evaluation key has no relinearization key.
	#[error("no relinearization key")]
	MissingRelinearizationKey,

	/// An invalid Galois element was supplied.
	#[error("invalid galois element {element} for degree {degree}")]
	InvalidGaloisElement {
		/// The rejected element.
		element: u64,
		/// Ring degree.
		degree: usize,
	},

	/// A ciphertext had an unexpected polynomial count.
	#[error("ciphertext holds {actual} polynomials, expected {expected}")]
	InvalidCiphertextSize {
		/// Polynomials present.
		actual: usize,
		/// Polynomials required.
		expected: usize,
	},

	/// Word-level failure.
	#[error(transparent)]
	Math(#[from] MathError),
}

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, HeError>;
