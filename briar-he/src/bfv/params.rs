//! BFV encryption parameters and their validated context.

use std::sync::Arc;

use briar_math::{
	ceil_log2, generate_primes, log2, Modulus, MultiplyConstant,
};
use serde::{Deserialize, Serialize};

use crate::bfv::simd::SimdEncoder;
use crate::error::{HeError, Result};
use crate::PolyContext;

/// Default error standard deviation, matching the usual RLWE choice.
pub const DEFAULT_ERROR_STD_DEV: f64 = 3.2;

/// Headroom bits reserved so tensor products can be accumulated before
/// scaling: up to [`MAX_TENSOR_ACCUMULATION`] terms plus the sign bit.
const TENSOR_HEADROOM_BITS: u32 = 12;

/// Largest inner-product length a single tensor accumulator supports.
pub const MAX_TENSOR_ACCUMULATION: usize = 1 << (TENSOR_HEADROOM_BITS - 2);

/// The user-facing BFV parameter set.
///
/// A light-weight value type; all validation and precomputation happens
/// when a [`BfvContext`] is built from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BfvParameters {
	/// Ring degree `N`, a power of two.
	pub degree: usize,
	/// Plaintext modulus `t`.
	pub plaintext_modulus: u64,
	/// Ciphertext moduli `q_0 .. q_{L-1}`, each NTT-friendly for `N`.
	pub coefficient_moduli: Vec<u64>,
	/// Standard deviation of the centered-binomial error distribution.
	pub error_std_dev: f64,
}

impl BfvParameters {
	/// Parameters with the default error distribution.
	pub fn new(degree: usize, plaintext_modulus: u64, coefficient_moduli: Vec<u64>) -> Self {
		Self {
			degree,
			plaintext_modulus,
			coefficient_moduli,
			error_std_dev: DEFAULT_ERROR_STD_DEV,
		}
	}

	/// Small-degree parameters with runtime-generated 26-bit moduli.
	///
	/// No security whatsoever; unit and integration tests only.
	pub fn insecure_testing(
		degree: usize,
		plaintext_modulus: u64,
		modulus_count: usize,
	) -> Result<Self> {
		let moduli = generate_primes(&vec![26; modulus_count], false, degree)?;
		Ok(Self::new(degree, plaintext_modulus, moduli))
	}
}

/// Validated parameters plus every precomputation the scheme needs:
/// the modulus-switching chain, the plaintext Barrett tables, the
/// `delta = floor(Q/t)` RNS constants, coefficient-codec widths, the SIMD
/// encoder when the plaintext modulus supports batching, and the auxiliary
/// basis for exact ciphertext multiplication.
///
/// Immutable and freely shared (`Arc`) once built.
#[derive(Debug)]
pub struct BfvContext {
	parameters: BfvParameters,
	poly_context: Arc<PolyContext>,
	plain_modulus: Modulus,
	delta_rns: Vec<MultiplyConstant>,
	bits_per_coefficient: u32,
	bytes_per_plaintext: usize,
	simd: Option<SimdEncoder>,
	mul: Option<MulPrecomputation>,
}

impl BfvContext {
	/// Validates `parameters` and performs all precomputations.
	pub fn new(parameters: BfvParameters) -> Result<Arc<Self>> {
		let poly_context = PolyContext::new(parameters.degree, &parameters.coefficient_moduli)?;
		// Every ciphertext modulus must support the NTT; encryption and all
		// homomorphic operations run through it.
		for row in 0..poly_context.modulus_count() {
			poly_context.ntt_context_for_row(row)?;
		}

		let t = parameters.plaintext_modulus;
		let plain_modulus =
			Modulus::new(t).map_err(|_| HeError::InvalidPlaintextModulus { modulus: t })?;
		if parameters
			.coefficient_moduli
			.iter()
			.any(|&q| q <= t)
		{
			return Err(HeError::InvalidPlaintextModulus { modulus: t });
		}

		// Q mod t, then delta = floor(Q/t) per modulus via
		// t * delta = -(Q mod t) (mod q_i).
		let mut q_mod_t = 1u64;
		for &q in &parameters.coefficient_moduli {
			q_mod_t = plain_modulus.mul_mod(q_mod_t, plain_modulus.reduce(q));
		}
		let mut delta_rns = Vec::with_capacity(poly_context.modulus_count());
		for modulus in poly_context.moduli() {
			let t_inverse = modulus.inverse_mod(modulus.reduce(t))?;
			let negated_remainder =
				briar_math::neg_mod(modulus.reduce(q_mod_t), modulus.value());
			let delta = modulus.mul_mod(negated_remainder, t_inverse);
			delta_rns.push(MultiplyConstant::new(delta, modulus));
		}

		let bits_per_coefficient = log2(t);
		let bytes_per_plaintext = parameters.degree * bits_per_coefficient as usize / 8;

		let simd = SimdEncoder::new(parameters.degree, t).ok();
		let mul = MulPrecomputation::new(&parameters, &poly_context).ok();
		tracing::debug!(
			degree = parameters.degree,
			moduli = parameters.coefficient_moduli.len(),
			batching = simd.is_some(),
			multiplication = mul.is_some(),
			"built BFV context"
		);

		Ok(Arc::new(Self {
			parameters,
			poly_context,
			plain_modulus,
			delta_rns,
			bits_per_coefficient,
			bytes_per_plaintext,
			simd,
			mul,
		}))
	}

	/// The parameter set this context was built from.
	pub fn parameters(&self) -> &BfvParameters {
		&self.parameters
	}

	/// The top of the modulus-switching chain.
	pub fn poly_context(&self) -> &Arc<PolyContext> {
		&self.poly_context
	}

	/// Ring degree.
	pub fn degree(&self) -> usize {
		self.parameters.degree
	}

	/// The plaintext modulus precomputation.
	pub fn plain_modulus(&self) -> &Modulus {
		&self.plain_modulus
	}

	/// `floor(Q/t) mod q_i` as Shoup constants.
	pub(crate) fn delta_rns(&self) -> &[MultiplyConstant] {
		&self.delta_rns
	}

	/// Bits of data each plaintext coefficient carries:
	/// `floor(log2(t))`.
	pub fn bits_per_coefficient(&self) -> u32 {
		self.bits_per_coefficient
	}

	/// Bytes of data one plaintext polynomial carries.
	pub fn bytes_per_plaintext(&self) -> usize {
		self.bytes_per_plaintext
	}

	/// The SIMD encoder, when `t` is prime and `t = 1 (mod 2N)`.
	pub fn simd_encoder(&self) -> Result<&SimdEncoder> {
		self.simd.as_ref().ok_or(HeError::SimdEncodingNotSupported {
			modulus: self.parameters.plaintext_modulus,
		})
	}

	/// Whether SIMD batching is available.
	pub fn supports_simd(&self) -> bool {
		self.simd.is_some()
	}

	/// The exact-multiplication precomputation.
	pub(crate) fn mul_precomputation(&self) -> Result<&MulPrecomputation> {
		self.mul.as_ref().ok_or_else(|| HeError::UnsupportedParameters {
			reason: "no auxiliary basis fits the 128-bit CRT composition bounds".to_string(),
		})
	}
}

/// CRT composition tables for one RNS basis: `M/m_i`, `(M/m_i)^{-1} mod
/// m_i`, and the product `M`, all bounded so the composition sum fits
/// `u128`.
#[derive(Debug, Clone)]
pub(crate) struct CrtComposer {
	moduli: Vec<Modulus>,
	hat: Vec<u128>,
	hat_inverse: Vec<MultiplyConstant>,
	product: u128,
	half: u128,
}

impl CrtComposer {
	pub(crate) fn new(moduli: &[Modulus]) -> Result<Self> {
		let mut product: u128 = 1;
		for modulus in moduli {
			product = product
				.checked_mul(modulus.value() as u128)
				.ok_or_else(|| HeError::UnsupportedParameters {
					reason: "modulus product exceeds 128 bits".to_string(),
				})?;
		}
		if product.checked_mul(moduli.len() as u128).map_or(true, |bound| bound >= 1 << 127) {
			return Err(HeError::UnsupportedParameters {
				reason: "CRT composition sum exceeds 127 bits".to_string(),
			});
		}
		let mut hat = Vec::with_capacity(moduli.len());
		let mut hat_inverse = Vec::with_capacity(moduli.len());
		for modulus in moduli {
			let m_hat = product / modulus.value() as u128;
			let reduced = modulus.reduce_u128(m_hat);
			let inverse = modulus.inverse_mod(reduced)?;
			hat.push(m_hat);
			hat_inverse.push(MultiplyConstant::new(inverse, modulus));
		}
		Ok(Self {
			moduli: moduli.to_vec(),
			hat,
			hat_inverse,
			product,
			half: product >> 1,
		})
	}

	/// The basis product `M`.
	pub(crate) fn product(&self) -> u128 {
		self.product
	}

	/// Composes RNS residues into the unique representative in `[0, M)`.
	pub(crate) fn compose(&self, residues: &[u64]) -> u128 {
		debug_assert_eq!(residues.len(), self.moduli.len());
		let mut sum: u128 = 0;
		for ((residue, modulus), (hat, hat_inverse)) in residues
			.iter()
			.zip(&self.moduli)
			.zip(self.hat.iter().zip(&self.hat_inverse))
		{
			let digit = hat_inverse.multiply(*residue, modulus.value());
			sum += digit as u128 * hat;
		}
		// sum < len * M; bring it into [0, M) branch-free.
		for _ in 0..self.moduli.len().saturating_sub(1) {
			sum = sub_if_exceeds_u128(sum, self.product);
		}
		sum
	}

	/// Composes residues and centers the result into `(-M/2, M/2]`,
	/// returned as `(magnitude, negative)`.
	pub(crate) fn compose_centered(&self, residues: &[u64]) -> (u128, bool) {
		let value = self.compose(residues);
		if value > self.half {
			(self.product - value, true)
		} else {
			(value, false)
		}
	}
}

#[inline(always)]
fn sub_if_exceeds_u128(x: u128, p: u128) -> u128 {
	let diff = x.wrapping_sub(p);
	diff.wrapping_add(p & 0u128.wrapping_sub(diff >> 127))
}

/// Auxiliary-basis precomputation for exact ciphertext multiplication.
///
/// The extended basis is `[p_1 .. p_k, q_0 .. q_{L-1}]` with the data
/// moduli last, so repeated divide-and-round steps peel exactly the data
/// basis and leave the scaled tensor in the auxiliary basis.
#[derive(Debug)]
pub(crate) struct MulPrecomputation {
	pub(crate) extended_context: Arc<PolyContext>,
	pub(crate) aux_context: Arc<PolyContext>,
	pub(crate) data_composer: CrtComposer,
	pub(crate) aux_composer: CrtComposer,
	pub(crate) aux_count: usize,
}

impl MulPrecomputation {
	fn new(parameters: &BfvParameters, poly_context: &Arc<PolyContext>) -> Result<Self> {
		let data_bits: u32 = parameters
			.coefficient_moduli
			.iter()
			.map(|&q| ceil_log2(q))
			.sum();
		let needed_bits = 2
			+ ceil_log2(parameters.plaintext_modulus)
			+ log2(parameters.degree as u64)
			+ data_bits
			+ TENSOR_HEADROOM_BITS;
		// Fewest primes whose product covers needed_bits while the
		// composition sum over the basis still fits 127 bits.
		let (aux_count, aux_bits) = (1..=8)
			.find_map(|count| {
				let bits = needed_bits.div_ceil(count) + 1;
				(bits <= 56 && count * bits <= 122).then_some((count as usize, bits))
			})
			.ok_or_else(|| HeError::UnsupportedParameters {
				reason: format!(
					"tensor basis of {needed_bits} bits does not fit the 128-bit composition bound"
				),
			})?;

		// Generate spares so primes colliding with the data moduli can be
		// discarded.
		let spare = parameters.coefficient_moduli.len();
		let candidates = generate_primes(
			&vec![aux_bits; aux_count + spare],
			false,
			parameters.degree,
		)?;
		let aux_moduli: Vec<u64> = candidates
			.into_iter()
			.filter(|prime| !parameters.coefficient_moduli.contains(prime))
			.take(aux_count)
			.collect();
		if aux_moduli.len() < aux_count {
			return Err(HeError::UnsupportedParameters {
				reason: "not enough distinct auxiliary primes".to_string(),
			});
		}

		let mut extended_moduli = aux_moduli;
		extended_moduli.extend(&parameters.coefficient_moduli);
		let extended_context = PolyContext::new(parameters.degree, &extended_moduli)?;
		let aux_context =
			PolyContext::context_at(&extended_context, parameters.coefficient_moduli.len())?;

		let data_composer = CrtComposer::new(poly_context.moduli())?;
		let aux_composer = CrtComposer::new(aux_context.moduli())?;

		Ok(Self {
			extended_context,
			aux_context,
			data_composer,
			aux_composer,
			aux_count,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builds_testing_parameters() {
		let context = BfvContext::new(BfvParameters::insecure_testing(64, 257, 3).unwrap()).unwrap();
		assert_eq!(context.degree(), 64);
		assert_eq!(context.bits_per_coefficient(), 8);
		assert_eq!(context.bytes_per_plaintext(), 64);
		assert!(context.supports_simd());
		assert!(context.mul_precomputation().is_ok());
	}

	#[test]
	fn rejects_oversized_plaintext_modulus() {
		let mut parameters = BfvParameters::insecure_testing(64, 257, 2).unwrap();
		parameters.plaintext_modulus = parameters.coefficient_moduli[0];
		assert!(matches!(
			BfvContext::new(parameters),
			Err(HeError::InvalidPlaintextModulus { .. })
		));
	}

	#[test]
	fn rejects_non_ntt_moduli() {
		// 1 << 20 is a valid ring modulus but not NTT-friendly.
		let parameters = BfvParameters::new(64, 257, vec![65537, 1 << 20]);
		assert!(matches!(
			BfvContext::new(parameters),
			Err(HeError::InvalidNttModulus { .. })
		));
	}

	#[test]
	fn delta_constants_are_consistent() {
		// Q = 65537 * 12289, t = 257: check t * delta + (Q mod t) = Q on
		// each residue.
		let context = BfvContext::new(BfvParameters::new(64, 257, vec![65537, 12289])).unwrap();
		let q_product: u128 = 65537u128 * 12289;
		let delta = (q_product / 257) as u64;
		for (constant, modulus) in context.delta_rns().iter().zip(context.poly_context().moduli())
		{
			assert_eq!(constant.multiplicand(), modulus.reduce_u128(delta as u128));
		}
	}

	#[test]
	fn crt_composer_round_trips() {
		let moduli: Vec<Modulus> = [65537u64, 12289, 40961]
			.iter()
			.map(|&q| Modulus::new(q).unwrap())
			.collect();
		let composer = CrtComposer::new(&moduli).unwrap();
		for value in [0u128, 1, 65537, 123_456_789_012, composer.product() - 1] {
			let residues: Vec<u64> =
				moduli.iter().map(|modulus| modulus.reduce_u128(value)).collect();
			assert_eq!(composer.compose(&residues), value);
		}
		let (magnitude, negative) = {
			let value = composer.product() - 5;
			let residues: Vec<u64> =
				moduli.iter().map(|modulus| modulus.reduce_u128(value)).collect();
			composer.compose_centered(&residues)
		};
		assert!(negative);
		assert_eq!(magnitude, 5);
	}

	#[test]
	fn simd_requires_batching_modulus() {
		// 251 is prime but not 1 mod 128.
		let context = BfvContext::new(BfvParameters::insecure_testing(64, 251, 2).unwrap()).unwrap();
		assert!(!context.supports_simd());
		assert!(matches!(
			context.simd_encoder(),
			Err(HeError::SimdEncodingNotSupported { modulus: 251 })
		));
	}
}
