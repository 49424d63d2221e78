//! Word-level building blocks for the briar lattice cryptography workspace.
//!
//! Everything in this crate operates on machine words: constant-time modular
//! arithmetic with Barrett and Shoup precomputations, bit utilities, prime
//! search for NTT-friendly moduli, the dense [`Array2d`] store used for RNS
//! polynomial data and plaintext matrices, and the two byte codecs shared by
//! the wire formats (MSB-first coefficient bit-packing and unsigned LEB128
//! varints).
//!
//! The concrete scalar type is `u64` with `u128` double-width intermediates.
//! Moduli are restricted to `[2, 2^62 - 1]` so that lazy values below `4q`
//! never overflow a word.

#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod array2d;
mod bits;
mod error;
mod packing;
mod prime;
mod scalar;
mod varint;

pub use array2d::Array2d;
pub use bits::{
	ceil_log2, is_power_of_two, log2, next_power_of_two, previous_multiple,
	previous_power_of_two, reverse_bits,
};
pub use error::{MathError, Result};
pub use packing::{bytes_to_coefficients, coefficients_to_bytes, serialized_byte_count};
pub use prime::{generate_primes, is_prime};
pub use scalar::{
	add_mod, ct_eq, ct_ge, ct_gt, ct_lt, ct_select, centered_to_remainder, neg_mod,
	remainder_to_centered, sub_if_exceeds, sub_mod, Modulus, MultiplyConstant,
};
pub use varint::{read_varint, varint_size, write_varint};
