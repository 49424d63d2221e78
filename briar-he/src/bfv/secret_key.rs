//! Secret keys, symmetric encryption, and decryption.

use std::sync::Arc;

use rand::{CryptoRng, RngCore};

use crate::bfv::ciphertext::Ciphertext;
use crate::bfv::plaintext::Plaintext;
use crate::bfv::BfvContext;
use crate::error::{HeError, Result};
use crate::format::{Coeff, Eval};
use crate::poly::PolyRq;
use crate::PolyContext;

/// A ternary RLWE secret key, stored in the evaluation basis.
pub struct SecretKey {
	context: Arc<BfvContext>,
	poly: PolyRq<Eval>,
}

impl SecretKey {
	/// Samples a fresh ternary secret.
	pub fn generate<R: RngCore + CryptoRng>(context: &Arc<BfvContext>, rng: &mut R) -> Self {
		let ternary = PolyRq::random_ternary(context.poly_context(), rng);
		let poly = ternary
			.forward_ntt()
			.expect("ciphertext moduli are NTT-friendly by construction");
		Self {
			context: Arc::clone(context),
			poly,
		}
	}

	/// The owning context.
	pub fn context(&self) -> &Arc<BfvContext> {
		&self.context
	}

	/// The key in the evaluation basis, at the top of the chain.
	pub(crate) fn poly(&self) -> &PolyRq<Eval> {
		&self.poly
	}

	/// The key restricted to a descendant context: NTT rows are
	/// per-modulus, so dropping moduli drops rows.
	pub(crate) fn poly_at_level(&self, level: &Arc<PolyContext>) -> Result<PolyRq<Eval>> {
		if !self.context.poly_context().is_parent_of(level) {
			return Err(HeError::PolyContextMismatch);
		}
		let mut restricted = PolyRq::<Eval>::zero(level);
		for row in 0..level.modulus_count() {
			restricted.row_mut(row).copy_from_slice(self.poly.row(row));
		}
		Ok(restricted)
	}

	/// Symmetric BFV encryption: `c = (delta*m + e - a*s, a)` with uniform
	/// `a`, in the coefficient basis.
	pub fn encrypt<R: RngCore + CryptoRng>(
		&self,
		plaintext: &Plaintext,
		rng: &mut R,
	) -> Result<Ciphertext<Coeff>> {
		let poly_context = self.context.poly_context();
		let a = PolyRq::<Eval>::random_uniform(poly_context, rng);
		let a_times_s = a.multiply(&self.poly).inverse_ntt()?;
		let error = PolyRq::random_centered_binomial(
			poly_context,
			self.context.parameters().error_std_dev,
			rng,
		);
		let mut c0 = plaintext.to_delta_poly();
		c0.add_assign(&error);
		c0.sub_assign(&a_times_s);
		let c1 = a.inverse_ntt()?;
		Ok(Ciphertext::from_polys(&self.context, vec![c0, c1]))
	}

	/// Decrypts a ciphertext of any size at any chain level.
	///
	/// Computes the phase `sum_i c_i * s^i`, switches the modulus down to a
	/// single word, and rounds `t * x / q_0` per coefficient.
	pub fn decrypt(&self, ciphertext: &Ciphertext<Coeff>) -> Result<Plaintext> {
		if ciphertext.polys().is_empty() {
			return Err(HeError::InvalidCiphertextSize {
				actual: 0,
				expected: 2,
			});
		}
		let level = Arc::clone(ciphertext.polys()[0].context());
		let secret = self.poly_at_level(&level)?;

		let mut phase = ciphertext.polys()[0].clone();
		let mut secret_power = secret.clone();
		for (index, poly) in ciphertext.polys().iter().enumerate().skip(1) {
			let term = poly
				.clone()
				.forward_ntt()?
				.multiply(&secret_power)
				.inverse_ntt()?;
			phase.add_assign(&term);
			if index + 1 < ciphertext.polys().len() {
				secret_power.multiply_assign(&secret);
			}
		}

		while phase.context().next().is_some() {
			phase.divide_and_round_q_last()?;
		}

		let q0 = phase.context().moduli()[0].value();
		let t = self.context.plain_modulus().value();
		let half = (q0 >> 1) as u128;
		let coefficients: Vec<u64> = phase
			.row(0)
			.iter()
			.map(|&x| (((t as u128 * x as u128 + half) / q0 as u128) % t as u128) as u64)
			.collect();
		Plaintext::new(&self.context, coefficients)
	}
}

#[cfg(test)]
mod tests {
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	use crate::bfv::BfvParameters;

	use super::*;

	fn setup() -> (Arc<BfvContext>, SecretKey, StdRng) {
		let mut rng = StdRng::seed_from_u64(42);
		let context =
			BfvContext::new(BfvParameters::insecure_testing(64, 257, 3).unwrap()).unwrap();
		let secret_key = SecretKey::generate(&context, &mut rng);
		(context, secret_key, rng)
	}

	#[test]
	fn encrypt_decrypt_round_trips() {
		let (context, secret_key, mut rng) = setup();
		let coefficients: Vec<u64> = (0..64).map(|i| i * 4 % 257).collect();
		let plaintext = Plaintext::new(&context, coefficients.clone()).unwrap();
		let ciphertext = secret_key.encrypt(&plaintext, &mut rng).unwrap();
		let decrypted = secret_key.decrypt(&ciphertext).unwrap();
		assert_eq!(decrypted.coefficients(), coefficients.as_slice());
	}

	#[test]
	fn decryption_survives_modulus_switching() {
		let (context, secret_key, mut rng) = setup();
		let plaintext = Plaintext::new(&context, vec![7; 64]).unwrap();
		let mut ciphertext = secret_key.encrypt(&plaintext, &mut rng).unwrap();
		ciphertext.mod_switch_to_single().unwrap();
		assert_eq!(ciphertext.polys()[0].modulus_count(), 1);
		let decrypted = secret_key.decrypt(&ciphertext).unwrap();
		assert_eq!(decrypted.coefficients(), plaintext.coefficients());
	}

	#[test]
	fn ciphertexts_add_homomorphically() {
		let (context, secret_key, mut rng) = setup();
		let a = Plaintext::new(&context, vec![100; 64]).unwrap();
		let b = Plaintext::new(&context, vec![200; 64]).unwrap();
		let mut ciphertext = secret_key.encrypt(&a, &mut rng).unwrap();
		ciphertext.add_assign(&secret_key.encrypt(&b, &mut rng).unwrap());
		let decrypted = secret_key.decrypt(&ciphertext).unwrap();
		assert_eq!(decrypted.coefficients(), vec![300 % 257; 64].as_slice());
	}
}
