//! Galois automorphisms `x -> x^g` of the power-of-two cyclotomic ring.
//!
//! In the coefficient basis the automorphism is a signed permutation (the
//! wrap past `x^N` negates); in the evaluation basis it is a pure
//! permutation of the bit-reversed NTT slots. The two canonical elements
//! are `2N - 1` (swap the two SIMD rows) and powers of three (rotate the
//! SIMD columns).

use briar_math::{log2, neg_mod, reverse_bits, Modulus};

use crate::error::{HeError, Result};

/// Constructors for the canonical Galois elements.
pub struct GaloisElement;

impl GaloisElement {
	/// The element swapping the two SIMD rows: `2N - 1`.
	pub fn swapping_rows(degree: usize) -> u64 {
		2 * degree as u64 - 1
	}

	/// The element rotating the SIMD columns by `step`.
	///
	/// A negative step rotates slots toward lower column indices, a
	/// positive one toward higher indices; `|step|` must be smaller than
	/// `N/2`. Variable-time in `step`.
	pub fn rotating_columns(step: i64, degree: usize) -> Result<u64> {
		let columns = (degree / 2) as i64;
		if step == 0 || step <= -columns || step >= columns {
			return Err(HeError::InvalidGaloisElement {
				element: step.unsigned_abs(),
				degree,
			});
		}
		let exponent = if step < 0 {
			(-step) as u64
		} else {
			(columns - step) as u64
		};
		let order = Modulus::new(2 * degree as u64).expect("2N is a valid modulus");
		Ok(order.pow_mod(3, exponent))
	}

	/// The inverse element, satisfying `g * inverse = 1 (mod 2N)`.
	pub fn inverting(element: u64, degree: usize) -> Result<u64> {
		validate(element, degree)?;
		let order = Modulus::new(2 * degree as u64).expect("2N is a valid modulus");
		order
			.inverse_mod(element)
			.map_err(|_| HeError::InvalidGaloisElement { element, degree })
	}
}

fn validate(element: u64, degree: usize) -> Result<()> {
	debug_assert!(degree.is_power_of_two());
	if element % 2 == 0 || element <= 1 || element >= 2 * degree as u64 {
		return Err(HeError::InvalidGaloisElement { element, degree });
	}
	Ok(())
}

/// Applies `x -> x^g` to one residue row in the coefficient basis.
///
/// Input index `i` maps to output index `i*g mod N`, negated when the wrap
/// count `(i*g div N)` is odd.
pub(crate) fn apply_coeff_row(
	input: &[u64],
	output: &mut [u64],
	element: u64,
	modulus: &Modulus,
) {
	let degree = input.len();
	debug_assert!(degree.is_power_of_two() && output.len() == degree);
	let log_degree = log2(degree as u64);
	let mask = degree - 1;
	let q = modulus.value();
	for (i, &value) in input.iter().enumerate() {
		let raw = i * element as usize;
		let index = raw & mask;
		if (raw >> log_degree) & 1 == 1 {
			output[index] = neg_mod(value, q);
		} else {
			output[index] = value;
		}
	}
}

/// Applies `x -> x^g` to one residue row in the bit-reversed evaluation
/// basis. A pure permutation; the negacyclic sign is folded into the basis.
pub(crate) fn apply_eval_row(input: &[u64], output: &mut [u64], element: u64) {
	let degree = input.len();
	debug_assert!(degree.is_power_of_two() && output.len() == degree);
	let log_degree = log2(degree as u64);
	let mask = (degree - 1) as u64;
	for (i, slot) in output.iter_mut().enumerate() {
		let reversed = reverse_bits((i + degree) as u64, log_degree + 1);
		let index = (element.wrapping_mul(reversed) >> 1) & mask;
		*slot = input[reverse_bits(index, log_degree) as usize];
	}
}

/// Validates a Galois element for use on a degree-`degree` ring.
pub fn validate_element(element: u64, degree: usize) -> Result<()> {
	validate(element, degree)
}
