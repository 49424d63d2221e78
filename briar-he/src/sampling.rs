//! Random polynomial sampling.
//!
//! Every entry point takes a caller-supplied generator; there is no
//! process-wide source. Callers wanting a system CSPRNG pass
//! `rand::rngs::OsRng`, tests pass a seeded `StdRng`.

use rand::{CryptoRng, RngCore};

use crate::format::{Coeff, PolyFormat};
use crate::poly::PolyRq;
use crate::PolyContext;
use briar_math::centered_to_remainder;
use std::sync::Arc;

impl<F: PolyFormat> PolyRq<F> {
	/// Samples every coefficient uniformly from `[0, q_i)`.
	///
	/// Each coefficient takes a fresh 128-bit draw reduced by the
	/// double-word Barrett factor; the statistical bias is below `2^-64`
	/// for any supported modulus. Uniform randomness is basis-agnostic, so
	/// this exists in both formats.
	pub fn random_uniform<R: RngCore + CryptoRng>(
		context: &Arc<PolyContext>,
		rng: &mut R,
	) -> Self {
		let mut poly = Self::zero(context);
		for row in 0..context.modulus_count() {
			let modulus = context.moduli()[row].clone();
			for value in poly.row_mut(row).iter_mut() {
				let draw = (rng.next_u64() as u128) << 64 | rng.next_u64() as u128;
				*value = modulus.reduce_u128(draw);
			}
		}
		poly
	}
}

impl PolyRq<Coeff> {
	/// Samples coefficients from the ternary distribution `{-1, 0, 1}`.
	///
	/// 96 random bits per coefficient are reduced modulo 3, keeping the
	/// bias negligible.
	pub fn random_ternary<R: RngCore + CryptoRng>(
		context: &Arc<PolyContext>,
		rng: &mut R,
	) -> Self {
		let degree = context.degree();
		let mut centered = Vec::with_capacity(degree);
		for _ in 0..degree {
			let draw =
				(rng.next_u64() as u128) << 32 | (rng.next_u64() & 0xFFFF_FFFF) as u128;
			centered.push((draw % 3) as i64 - 1);
		}
		Self::from_centered(context, &centered)
	}

	/// Samples coefficients from the centered binomial distribution with
	/// the given standard deviation.
	///
	/// Uses `k = ceil(2 * sigma^2)` bits per half, so `sigma` must not
	/// exceed 4 (32 bits per half).
	pub fn random_centered_binomial<R: RngCore + CryptoRng>(
		context: &Arc<PolyContext>,
		std_dev: f64,
		rng: &mut R,
	) -> Self {
		let half_bits = (2.0 * std_dev * std_dev).ceil() as u32;
		assert!(half_bits >= 1 && half_bits <= 32, "std_dev out of range");
		let mask = (1u64 << half_bits) - 1;
		let degree = context.degree();
		let mut centered = Vec::with_capacity(degree);
		for _ in 0..degree {
			let draw = rng.next_u64();
			let first = (draw & mask).count_ones() as i64;
			let second = ((draw >> half_bits) & mask).count_ones() as i64;
			centered.push(first - second);
		}
		Self::from_centered(context, &centered)
	}

	/// Builds a polynomial from centered coefficients, reduced per modulus.
	pub fn from_centered(context: &Arc<PolyContext>, centered: &[i64]) -> Self {
		debug_assert_eq!(centered.len(), context.degree());
		let mut poly = Self::zero(context);
		for row in 0..context.modulus_count() {
			let q = context.moduli()[row].value();
			for (value, &coefficient) in poly.row_mut(row).iter_mut().zip(centered) {
				*value = centered_to_remainder(coefficient, q);
			}
		}
		poly
	}
}
