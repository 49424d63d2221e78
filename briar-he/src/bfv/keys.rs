//! Key-switching, Galois, and relinearization keys.

use std::collections::BTreeMap;
use std::sync::Arc;

use briar_math::add_mod;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::bfv::secret_key::SecretKey;
use crate::bfv::BfvContext;
use crate::error::{HeError, Result};
use crate::format::{Coeff, Eval};
use crate::poly::{LazyAccumulator, PolyRq};

/// Which keys a protocol needs the client to publish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationKeyConfig {
	/// Galois elements a key is generated for, sorted and deduplicated.
	pub galois_elements: Vec<u64>,
	/// Whether ciphertext-ciphertext products occur.
	pub has_relinearization_key: bool,
}

impl EvaluationKeyConfig {
	/// A config with sorted, deduplicated elements.
	pub fn new(mut galois_elements: Vec<u64>, has_relinearization_key: bool) -> Self {
		galois_elements.sort_unstable();
		galois_elements.dedup();
		Self {
			galois_elements,
			has_relinearization_key,
		}
	}

	/// The union of two configs.
	pub fn union(&self, other: &Self) -> Self {
		let mut elements = self.galois_elements.clone();
		elements.extend(&other.galois_elements);
		Self::new(
			elements,
			self.has_relinearization_key || other.has_relinearization_key,
		)
	}
}

/// A key switching a polynomial that multiplies some source secret into a
/// regular `(c0, c1)` pair under the current secret.
///
/// One `(b_i, a_i)` pair per RNS modulus: the switched polynomial is
/// decomposed into its residue digits, so the noise each digit contributes
/// stays bounded by its modulus.
pub struct KeySwitchKey {
	context: Arc<BfvContext>,
	b: Vec<PolyRq<Eval>>,
	a: Vec<PolyRq<Eval>>,
}

impl KeySwitchKey {
	/// Generates a key for `source` (the secret the switched polynomial
	/// multiplies, in the evaluation basis).
	pub(crate) fn generate<R: RngCore + CryptoRng>(
		secret_key: &SecretKey,
		source: &PolyRq<Eval>,
		rng: &mut R,
	) -> Result<Self> {
		let context = Arc::clone(secret_key.context());
		let poly_context = context.poly_context();
		let modulus_count = poly_context.modulus_count();
		let mut b = Vec::with_capacity(modulus_count);
		let mut a = Vec::with_capacity(modulus_count);
		for row in 0..modulus_count {
			let a_row = PolyRq::<Eval>::random_uniform(poly_context, rng);
			let error = PolyRq::random_centered_binomial(
				poly_context,
				context.parameters().error_std_dev,
				rng,
			)
			.forward_ntt()?;
			// b_i = -(a_i * s) - e_i, plus the source on residue row i only:
			// the RNS digit decomposition's CRT interpolation constant.
			let mut b_row = a_row.multiply(secret_key.poly());
			b_row.negate_assign();
			b_row.sub_assign(&error);
			let q = poly_context.moduli()[row].value();
			for (slot, &value) in b_row.row_mut(row).iter_mut().zip(source.row(row)) {
				*slot = add_mod(*slot, value, q);
			}
			b.push(b_row);
			a.push(a_row);
		}
		Ok(Self {
			context,
			b,
			a,
		})
	}

	/// Switches `poly` (in the coefficient basis, at the top of the chain),
	/// returning the `(c0, c1)` contribution to add to a ciphertext.
	pub(crate) fn apply(&self, poly: &PolyRq<Coeff>) -> Result<(PolyRq<Coeff>, PolyRq<Coeff>)> {
		let poly_context = self.context.poly_context();
		if poly.context() != poly_context {
			return Err(HeError::PolyContextMismatch);
		}
		let modulus_count = poly_context.modulus_count();
		let mut acc0 = LazyAccumulator::new(poly_context);
		let mut acc1 = LazyAccumulator::new(poly_context);
		for digit in 0..modulus_count {
			// Lift residue row `digit` to the full basis.
			let mut lifted = PolyRq::<Coeff>::zero(poly_context);
			for row in 0..modulus_count {
				let modulus = &poly_context.moduli()[row];
				for (slot, &value) in lifted
					.row_mut(row)
					.iter_mut()
					.zip(poly.row(digit))
				{
					*slot = modulus.reduce(value);
				}
			}
			let lifted = lifted.forward_ntt()?;
			acc0.add_product(&lifted, &self.b[digit]);
			acc1.add_product(&lifted, &self.a[digit]);
		}
		Ok((acc0.into_poly().inverse_ntt()?, acc1.into_poly().inverse_ntt()?))
	}
}

/// The keys a client publishes so the server can evaluate: Galois keys for
/// a set of elements plus an optional relinearization key.
pub struct EvaluationKey {
	galois_keys: BTreeMap<u64, KeySwitchKey>,
	relinearization_key: Option<KeySwitchKey>,
}

impl EvaluationKey {
	/// Generates all keys named by `config`.
	pub fn generate<R: RngCore + CryptoRng>(
		secret_key: &SecretKey,
		config: &EvaluationKeyConfig,
		rng: &mut R,
	) -> Result<Self> {
		let mut galois_keys = BTreeMap::new();
		for &element in &config.galois_elements {
			// The permuted c1 multiplies the permuted secret.
			let source = secret_key.poly().apply_galois(element)?;
			galois_keys.insert(element, KeySwitchKey::generate(secret_key, &source, rng)?);
		}
		let relinearization_key = if config.has_relinearization_key {
			let squared = secret_key.poly().multiply(secret_key.poly());
			Some(KeySwitchKey::generate(secret_key, &squared, rng)?)
		} else {
			None
		};
		tracing::debug!(
			galois_keys = galois_keys.len(),
			relinearization = relinearization_key.is_some(),
			"generated evaluation key"
		);
		Ok(Self {
			galois_keys,
			relinearization_key,
		})
	}

	/// The Galois elements keys exist for.
	pub fn galois_elements(&self) -> impl Iterator<Item = u64> + '_ {
		self.galois_keys.keys().copied()
	}

	/// Whether a key exists for `element`.
	pub fn has_galois_key(&self, element: u64) -> bool {
		self.galois_keys.contains_key(&element)
	}

	/// The key for `element`.
	pub(crate) fn galois_key(&self, element: u64) -> Result<&KeySwitchKey> {
		self.galois_keys
			.get(&element)
			.ok_or(HeError::MissingGaloisKey { element })
	}

	/// The relinearization key.
	pub(crate) fn relinearization_key(&self) -> Result<&KeySwitchKey> {
		self.relinearization_key
			.as_ref()
			.ok_or(HeError::MissingRelinearizationKey)
	}
}

#[cfg(test)]
mod tests {
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	use crate::bfv::{BfvParameters, Plaintext};
	use crate::GaloisElement;

	use super::*;

	fn setup() -> (Arc<BfvContext>, SecretKey, StdRng) {
		let mut rng = StdRng::seed_from_u64(99);
		let context =
			BfvContext::new(BfvParameters::insecure_testing(64, 257, 3).unwrap()).unwrap();
		let secret_key = SecretKey::generate(&context, &mut rng);
		(context, secret_key, rng)
	}

	#[test]
	fn config_union_merges_and_dedups() {
		let first = EvaluationKeyConfig::new(vec![9, 3, 3], false);
		let second = EvaluationKeyConfig::new(vec![3, 127], true);
		let union = first.union(&second);
		assert_eq!(union.galois_elements, vec![3, 9, 127]);
		assert!(union.has_relinearization_key);
	}

	#[test]
	fn galois_rotation_survives_key_switching() {
		let (context, secret_key, mut rng) = setup();
		// Rotating the SIMD columns left by one must shift every slot.
		let values: Vec<u64> = (1..=64).collect();
		let plaintext = Plaintext::encode_simd(&context, &values).unwrap();
		let element = GaloisElement::rotating_columns(-1, 64).unwrap();
		let evaluation_key = EvaluationKey::generate(
			&secret_key,
			&EvaluationKeyConfig::new(vec![element], false),
			&mut rng,
		)
		.unwrap();
		let ciphertext = secret_key.encrypt(&plaintext, &mut rng).unwrap();
		let rotated = ciphertext.apply_galois(element, &evaluation_key).unwrap();
		let decrypted = secret_key.decrypt(&rotated).unwrap();
		let slots = decrypted.decode_simd().unwrap();
		let mut expected: Vec<u64> = (1..=64).collect();
		expected[..32].rotate_left(1);
		expected[32..].rotate_left(1);
		assert_eq!(slots, expected);
	}

	#[test]
	fn row_swap_exchanges_simd_rows() {
		let (context, secret_key, mut rng) = setup();
		let values: Vec<u64> = (1..=64).collect();
		let plaintext = Plaintext::encode_simd(&context, &values).unwrap();
		let element = GaloisElement::swapping_rows(64);
		let evaluation_key = EvaluationKey::generate(
			&secret_key,
			&EvaluationKeyConfig::new(vec![element], false),
			&mut rng,
		)
		.unwrap();
		let ciphertext = secret_key.encrypt(&plaintext, &mut rng).unwrap();
		let swapped = ciphertext.apply_galois(element, &evaluation_key).unwrap();
		let decrypted = secret_key.decrypt(&swapped).unwrap();
		let slots = decrypted.decode_simd().unwrap();
		let expected: Vec<u64> = (33..=64).chain(1..=32).collect();
		assert_eq!(slots, expected);
	}

	#[test]
	fn missing_keys_are_reported() {
		let (_, secret_key, mut rng) = setup();
		let evaluation_key = EvaluationKey::generate(
			&secret_key,
			&EvaluationKeyConfig::new(vec![], false),
			&mut rng,
		)
		.unwrap();
		assert!(matches!(
			evaluation_key.galois_key(3),
			Err(HeError::MissingGaloisKey { element: 3 })
		));
		assert!(matches!(
			evaluation_key.relinearization_key(),
			Err(HeError::MissingRelinearizationKey)
		));
	}
}
