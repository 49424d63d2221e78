//! Exact ciphertext-ciphertext multiplication.
//!
//! The tensor of two BFV ciphertexts must be computed over the integers,
//! then scaled by `t/Q` with rounding. This implementation does both
//! exactly, with no floating point and no approximate base conversion:
//!
//! 1. CRT-compose every coefficient to its centered representative and
//!    re-reduce it into an auxiliary NTT-friendly basis `B` whose product
//!    makes the combined basis `B x q` large enough for the scaled tensor.
//! 2. Tensor (and, for inner products, accumulate) in the evaluation basis
//!    of `B x q`.
//! 3. Multiply by `t`, then peel the `q` moduli one by one with
//!    divide-and-round — each step divides the represented value by one
//!    `q_i` exactly because `q_i` divides the basis product.
//! 4. Compose back from `B` into `q`.
//!
//! The only inexactness is the per-peel rounding, which lands in the noise
//! like any modulus switch.

use std::sync::Arc;

use briar_math::{ct_select, neg_mod};

use crate::bfv::params::{MulPrecomputation, MAX_TENSOR_ACCUMULATION};
use crate::bfv::BfvContext;
use crate::bfv::Ciphertext;
use crate::error::{HeError, Result};
use crate::format::{Coeff, Eval};
use crate::poly::{LazyAccumulator, PolyRq};
use crate::PolyContext;

/// Lifts a data-basis polynomial into the extended basis, centering each
/// coefficient so the extended residues represent the same integer.
fn lift_to_extended(
	mul: &MulPrecomputation,
	poly: &PolyRq<Coeff>,
) -> Result<PolyRq<Eval>> {
	let extended = &mul.extended_context;
	let aux_count = mul.aux_count;
	let data_count = poly.modulus_count();
	let degree = poly.degree();
	let mut lifted = PolyRq::<Coeff>::zero(extended);
	for row in 0..data_count {
		lifted
			.row_mut(aux_count + row)
			.copy_from_slice(poly.row(row));
	}
	let mut residues = vec![0u64; data_count];
	for column in 0..degree {
		for (row, residue) in residues.iter_mut().enumerate() {
			*residue = poly.row(row)[column];
		}
		let (magnitude, negative) = mul.data_composer.compose_centered(&residues);
		let sign_mask = 0u64.wrapping_sub(negative as u64);
		for row in 0..aux_count {
			let modulus = &extended.moduli()[row];
			let positive = modulus.reduce_u128(magnitude);
			let negated = neg_mod(positive, modulus.value());
			lifted.row_mut(row)[column] = ct_select(sign_mask, negated, positive);
		}
	}
	lifted.forward_ntt()
}

/// Composes an auxiliary-basis polynomial back into the data basis.
fn convert_to_data(
	mul: &MulPrecomputation,
	poly: &PolyRq<Coeff>,
	data_context: &Arc<PolyContext>,
) -> Result<PolyRq<Coeff>> {
	if poly.context() != &mul.aux_context {
		return Err(HeError::PolyContextMismatch);
	}
	let aux_count = poly.modulus_count();
	let degree = poly.degree();
	let mut output = PolyRq::<Coeff>::zero(data_context);
	let mut residues = vec![0u64; aux_count];
	for column in 0..degree {
		for (row, residue) in residues.iter_mut().enumerate() {
			*residue = poly.row(row)[column];
		}
		let (magnitude, negative) = mul.aux_composer.compose_centered(&residues);
		let sign_mask = 0u64.wrapping_sub(negative as u64);
		for row in 0..data_context.modulus_count() {
			let modulus = &data_context.moduli()[row];
			let positive = modulus.reduce_u128(magnitude);
			let negated = neg_mod(positive, modulus.value());
			output.row_mut(row)[column] = ct_select(sign_mask, negated, positive);
		}
	}
	Ok(output)
}

/// An accumulator for sums of ciphertext-ciphertext products: the
/// homomorphic inner products of the PIR response pipeline.
///
/// Accumulation happens on the unscaled tensor, so one scale-and-round
/// serves the whole inner product; `finalize` yields the size-3 ciphertext
/// to relinearize.
pub struct TensorProduct {
	context: Arc<BfvContext>,
	accumulators: [LazyAccumulator; 3],
	count: usize,
}

impl TensorProduct {
	/// An empty accumulator.
	///
	/// Fails with [`HeError::UnsupportedParameters`] when the parameter set
	/// has no auxiliary basis.
	pub fn new(context: &Arc<BfvContext>) -> Result<Self> {
		let mul = context.mul_precomputation()?;
		let extended = &mul.extended_context;
		Ok(Self {
			context: Arc::clone(context),
			accumulators: [
				LazyAccumulator::new(extended),
				LazyAccumulator::new(extended),
				LazyAccumulator::new(extended),
			],
			count: 0,
		})
	}

	/// Accumulates `lhs * rhs`. Both must be fresh-format size-2
	/// ciphertexts at the top of the chain.
	pub fn accumulate(
		&mut self,
		lhs: &Ciphertext<Coeff>,
		rhs: &Ciphertext<Coeff>,
	) -> Result<()> {
		if lhs.size() != 2 || rhs.size() != 2 {
			return Err(HeError::InvalidCiphertextSize {
				actual: lhs.size().max(rhs.size()),
				expected: 2,
			});
		}
		if lhs.poly_context() != self.context.poly_context()
			|| rhs.poly_context() != self.context.poly_context()
		{
			return Err(HeError::PolyContextMismatch);
		}
		if self.count >= MAX_TENSOR_ACCUMULATION {
			return Err(HeError::UnsupportedParameters {
				reason: format!(
					"tensor accumulation exceeds {MAX_TENSOR_ACCUMULATION} terms"
				),
			});
		}
		let mul = self.context.mul_precomputation()?;
		let l0 = lift_to_extended(mul, &lhs.polys()[0])?;
		let l1 = lift_to_extended(mul, &lhs.polys()[1])?;
		let r0 = lift_to_extended(mul, &rhs.polys()[0])?;
		let r1 = lift_to_extended(mul, &rhs.polys()[1])?;
		self.accumulators[0].add_product(&l0, &r0);
		self.accumulators[1].add_product(&l0, &r1);
		self.accumulators[1].add_product(&l1, &r0);
		self.accumulators[2].add_product(&l1, &r1);
		self.count += 1;
		Ok(())
	}

	/// Whether anything was accumulated.
	pub fn is_empty(&self) -> bool {
		self.count == 0
	}

	/// Scales by `t/Q` and returns the size-3 ciphertext in the data basis.
	pub fn finalize(self) -> Result<Ciphertext<Coeff>> {
		let context = self.context;
		let mul = context.mul_precomputation()?;
		let data_context = context.poly_context();
		let t = context.plain_modulus().value();
		let mut components = Vec::with_capacity(3);
		for accumulator in self.accumulators {
			let mut poly = accumulator.into_poly().inverse_ntt()?;
			poly.multiply_scalar_assign(t);
			for _ in 0..data_context.modulus_count() {
				poly.divide_and_round_q_last()?;
			}
			components.push(convert_to_data(mul, &poly, data_context)?);
		}
		Ok(Ciphertext::from_polys(&context, components))
	}
}

impl Ciphertext<Coeff> {
	/// The tensor product `self * rhs`: a size-3 ciphertext, ready for
	/// relinearization.
	pub fn multiply(&self, rhs: &Self) -> Result<Ciphertext<Coeff>> {
		let mut product = TensorProduct::new(self.context())?;
		product.accumulate(self, rhs)?;
		product.finalize()
	}
}

#[cfg(test)]
mod tests {
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	use crate::bfv::{
		BfvContext, BfvParameters, EvaluationKey, EvaluationKeyConfig, Plaintext, SecretKey,
	};

	use super::*;

	fn setup() -> (Arc<BfvContext>, SecretKey, EvaluationKey, StdRng) {
		let mut rng = StdRng::seed_from_u64(5);
		let context =
			BfvContext::new(BfvParameters::insecure_testing(32, 17, 3).unwrap()).unwrap();
		let secret_key = SecretKey::generate(&context, &mut rng);
		let evaluation_key = EvaluationKey::generate(
			&secret_key,
			&EvaluationKeyConfig::new(vec![], true),
			&mut rng,
		)
		.unwrap();
		(context, secret_key, evaluation_key, rng)
	}

	fn negacyclic_product(a: &[u64], b: &[u64], t: u64) -> Vec<u64> {
		let degree = a.len();
		let mut product = vec![0u64; degree];
		for i in 0..degree {
			for j in 0..degree {
				let term = a[i] * b[j] % t;
				let index = (i + j) % degree;
				if i + j < degree {
					product[index] = (product[index] + term) % t;
				} else {
					product[index] = (product[index] + t - term) % t;
				}
			}
		}
		product
	}

	#[test]
	fn multiplication_matches_plaintext_product() {
		let (context, secret_key, evaluation_key, mut rng) = setup();
		let a: Vec<u64> = (0..32).map(|i| (i * 5 + 1) % 17).collect();
		let b: Vec<u64> = (0..32).map(|i| (i * i + 3) % 17).collect();
		let ct_a = secret_key
			.encrypt(&Plaintext::new(&context, a.clone()).unwrap(), &mut rng)
			.unwrap();
		let ct_b = secret_key
			.encrypt(&Plaintext::new(&context, b.clone()).unwrap(), &mut rng)
			.unwrap();
		let mut product = ct_a.multiply(&ct_b).unwrap();
		assert_eq!(product.size(), 3);
		product.relinearize(&evaluation_key).unwrap();
		assert_eq!(product.size(), 2);
		let decrypted = secret_key.decrypt(&product).unwrap();
		assert_eq!(decrypted.coefficients(), negacyclic_product(&a, &b, 17).as_slice());
	}

	#[test]
	fn size_three_ciphertexts_decrypt_directly() {
		let (context, secret_key, _, mut rng) = setup();
		let a = Plaintext::new(&context, vec![2; 32]).unwrap();
		let b = Plaintext::new(&context, {
			let mut coefficients = vec![0u64; 32];
			coefficients[0] = 5;
			coefficients
		})
		.unwrap();
		let product = secret_key
			.encrypt(&a, &mut rng)
			.unwrap()
			.multiply(&secret_key.encrypt(&b, &mut rng).unwrap())
			.unwrap();
		let decrypted = secret_key.decrypt(&product).unwrap();
		assert_eq!(decrypted.coefficients(), vec![10; 32].as_slice());
	}

	#[test]
	fn accumulated_products_sum() {
		let (context, secret_key, evaluation_key, mut rng) = setup();
		let constant = |value: u64| {
			let mut coefficients = vec![0u64; 32];
			coefficients[0] = value;
			Plaintext::new(&context, coefficients).unwrap()
		};
		let pairs = [(2u64, 3u64), (4, 5)];
		let mut accumulator = TensorProduct::new(&context).unwrap();
		for (left, right) in pairs {
			let ct_left = secret_key.encrypt(&constant(left), &mut rng).unwrap();
			let ct_right = secret_key.encrypt(&constant(right), &mut rng).unwrap();
			accumulator.accumulate(&ct_left, &ct_right).unwrap();
		}
		let mut summed = accumulator.finalize().unwrap();
		summed.relinearize(&evaluation_key).unwrap();
		let decrypted = secret_key.decrypt(&summed).unwrap();
		// 2*3 + 4*5 = 26 = 9 mod 17.
		assert_eq!(decrypted.coefficients()[0], 9);
		assert!(decrypted.coefficients()[1..].iter().all(|&c| c == 0));
	}

	#[test]
	fn multiplied_responses_survive_modulus_switching() {
		let (context, secret_key, evaluation_key, mut rng) = setup();
		let a = Plaintext::new(&context, vec![3; 32]).unwrap();
		let b = Plaintext::new(&context, {
			let mut coefficients = vec![0u64; 32];
			coefficients[0] = 4;
			coefficients
		})
		.unwrap();
		let mut product = secret_key
			.encrypt(&a, &mut rng)
			.unwrap()
			.multiply(&secret_key.encrypt(&b, &mut rng).unwrap())
			.unwrap();
		product.relinearize(&evaluation_key).unwrap();
		product.mod_switch_to_single().unwrap();
		let decrypted = secret_key.decrypt(&product).unwrap();
		assert_eq!(decrypted.coefficients(), vec![12; 32].as_slice());
	}
}
