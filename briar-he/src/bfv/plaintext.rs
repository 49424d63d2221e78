//! BFV plaintexts.

use std::sync::Arc;

use briar_math::{bytes_to_coefficients, coefficients_to_bytes};

use crate::bfv::BfvContext;
use crate::error::{HeError, Result};
use crate::format::{Coeff, Eval};
use crate::poly::PolyRq;
use crate::PolyContext;

/// A plaintext polynomial: `N` coefficients modulo `t`.
#[derive(Debug, Clone)]
pub struct Plaintext {
	context: Arc<BfvContext>,
	coefficients: Vec<u64>,
}

impl PartialEq for Plaintext {
	fn eq(&self, other: &Self) -> bool {
		self.coefficients == other.coefficients
	}
}

impl Eq for Plaintext {}

impl Plaintext {
	/// Wraps coefficient data, zero-padding to the ring degree.
	pub fn new(context: &Arc<BfvContext>, mut coefficients: Vec<u64>) -> Result<Self> {
		if coefficients.len() > context.degree() {
			return Err(HeError::EncodingDataExceedsCapacity {
				count: coefficients.len(),
				capacity: context.degree(),
			});
		}
		let t = context.plain_modulus().value();
		debug_assert!(coefficients.iter().all(|&value| value < t));
		coefficients.resize(context.degree(), 0);
		Ok(Self {
			context: Arc::clone(context),
			coefficients,
		})
	}

	/// The all-zero plaintext.
	pub fn zero(context: &Arc<BfvContext>) -> Self {
		Self {
			context: Arc::clone(context),
			coefficients: vec![0; context.degree()],
		}
	}

	/// Packs bytes into coefficients at `bits_per_coefficient` bits each.
	///
	/// At most [`BfvContext::bytes_per_plaintext`] bytes fit.
	pub fn encode_coefficients(context: &Arc<BfvContext>, bytes: &[u8]) -> Result<Self> {
		if bytes.len() > context.bytes_per_plaintext() {
			return Err(HeError::EncodingDataExceedsCapacity {
				count: bytes.len(),
				capacity: context.bytes_per_plaintext(),
			});
		}
		let bits = context.bits_per_coefficient();
		let coefficient_count = (bytes.len() * 8).div_ceil(bits as usize);
		let coefficients = bytes_to_coefficients(bytes, coefficient_count, bits, 0);
		Self::new(context, coefficients)
	}

	/// Unpacks the full plaintext back into bytes
	/// (`ceil(N * bits_per_coefficient / 8)` of them).
	pub fn decode_coefficients(&self) -> Vec<u8> {
		coefficients_to_bytes(&self.coefficients, self.context.bits_per_coefficient(), 0)
	}

	/// Encodes slot values via the SIMD encoder.
	pub fn encode_simd(context: &Arc<BfvContext>, values: &[u64]) -> Result<Self> {
		let coefficients = context.simd_encoder()?.encode(values)?;
		Self::new(context, coefficients)
	}

	/// Decodes the plaintext into its SIMD slot values.
	pub fn decode_simd(&self) -> Result<Vec<u64>> {
		Ok(self.context.simd_encoder()?.decode(&self.coefficients))
	}

	/// The plaintext coefficients.
	pub fn coefficients(&self) -> &[u64] {
		&self.coefficients
	}

	/// Whether every coefficient is zero.
	pub fn is_zero(&self) -> bool {
		self.coefficients.iter().all(|&value| value == 0)
	}

	/// The owning context.
	pub fn context(&self) -> &Arc<BfvContext> {
		&self.context
	}

	/// Lifts into the ciphertext basis at `poly_context` and transforms to
	/// the evaluation basis, ready for ciphertext-plaintext products.
	pub fn to_eval(&self, poly_context: &Arc<PolyContext>) -> Result<EvalPlaintext> {
		let mut poly = PolyRq::<Coeff>::zero(poly_context);
		for row in 0..poly_context.modulus_count() {
			// Plaintext values are below t < q_i, so the lift is a copy.
			poly.row_mut(row).copy_from_slice(&self.coefficients);
		}
		Ok(EvalPlaintext {
			poly: poly.forward_ntt()?,
		})
	}

	/// Scales by `delta = floor(Q/t)` into the ciphertext basis; the
	/// encryption payload.
	pub(crate) fn to_delta_poly(&self) -> PolyRq<Coeff> {
		let poly_context = self.context.poly_context();
		let mut poly = PolyRq::<Coeff>::zero(poly_context);
		for (row, (constant, modulus)) in self
			.context
			.delta_rns()
			.iter()
			.zip(poly_context.moduli())
			.enumerate()
		{
			let q = modulus.value();
			for (slot, &coefficient) in poly.row_mut(row).iter_mut().zip(&self.coefficients) {
				*slot = constant.multiply(coefficient, q);
			}
		}
		poly
	}
}

/// A plaintext lifted to a ciphertext basis in the evaluation domain.
///
/// Ciphertext-plaintext multiplication consumes these; lifting once and
/// reusing them is what the PIR database processing does for every chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalPlaintext {
	poly: PolyRq<Eval>,
}

impl EvalPlaintext {
	/// The lifted polynomial.
	pub fn poly(&self) -> &PolyRq<Eval> {
		&self.poly
	}
}

#[cfg(test)]
mod tests {
	use crate::bfv::{BfvContext, BfvParameters};

	use super::*;

	fn context() -> Arc<BfvContext> {
		BfvContext::new(BfvParameters::insecure_testing(16, 257, 2).unwrap()).unwrap()
	}

	#[test]
	fn byte_encoding_round_trips() {
		let context = context();
		assert_eq!(context.bytes_per_plaintext(), 16);
		let bytes: Vec<u8> = (1..=16).collect();
		let plaintext = Plaintext::encode_coefficients(&context, &bytes).unwrap();
		let decoded = plaintext.decode_coefficients();
		assert_eq!(&decoded[..16], &bytes[..]);
		assert!(Plaintext::encode_coefficients(&context, &[0u8; 17]).is_err());
	}

	#[test]
	fn short_payloads_pad_with_zeros() {
		let context = context();
		let plaintext = Plaintext::encode_coefficients(&context, &[0xAB, 0xCD]).unwrap();
		assert_eq!(plaintext.coefficients()[0], 0xAB);
		assert_eq!(plaintext.coefficients()[1], 0xCD);
		assert!(plaintext.coefficients()[2..].iter().all(|&value| value == 0));
	}

	#[test]
	fn simd_round_trips_through_plaintext() {
		let context = context();
		let values: Vec<u64> = (0..16).map(|i| i * 16 % 257).collect();
		let plaintext = Plaintext::encode_simd(&context, &values).unwrap();
		assert_eq!(plaintext.decode_simd().unwrap(), values);
	}

	#[test]
	fn eval_lift_copies_rows() {
		let context = context();
		let plaintext = Plaintext::new(&context, vec![3; 16]).unwrap();
		let eval = plaintext.to_eval(context.poly_context()).unwrap();
		assert_eq!(eval.poly().modulus_count(), 2);
	}
}
