//! Negacyclic number-theoretic transform with Harvey lazy butterflies.
//!
//! A modulus `q` is NTT-friendly for degree `N` iff it is prime and
//! `q = 1 (mod 2N)`. The forward transform keeps values lazily bounded by a
//! running multiple `k` of `q` and only reduces when `k` would cross
//! `k_max = floor(u64::MAX / q) - 2`; the inverse transform keeps everything
//! below `2q` and folds the `N^{-1}` scaling into its last stage.

use briar_math::{is_prime, log2, reverse_bits, sub_if_exceeds, Modulus, MultiplyConstant};

use crate::error::{HeError, Result};

/// Whether `modulus` supports a degree-`degree` negacyclic NTT.
pub fn is_ntt_friendly(modulus: u64, degree: usize) -> bool {
	modulus % (2 * degree as u64) == 1 && is_prime(modulus)
}

/// Precomputed twiddle tables for one `(degree, modulus)` pair.
///
/// Immutable after construction and safe to share across threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NttContext {
	degree: usize,
	log_degree: u32,
	modulus: Modulus,
	/// `psi^bitrev(i)` for the forward pass, `psi` the minimal primitive
	/// `2N`-th root of unity; index 0 is unused.
	root_powers: Vec<MultiplyConstant>,
	/// Inverses of the forward twiddles, pre-permuted so the inverse pass
	/// reads them sequentially.
	inverse_root_powers: Vec<MultiplyConstant>,
	/// `N^{-1} mod q`, applied to the left half of the final stage.
	inverse_degree: MultiplyConstant,
	/// `N^{-1} * root_powers[1]^{-1} mod q`, fused for the right half.
	inverse_degree_root: MultiplyConstant,
	/// Largest lazy bound multiple before a mid-transform reduction.
	lazy_reduction_limit: u64,
	minimal_root: u64,
}

impl NttContext {
	/// Builds the tables, failing with [`HeError::InvalidNttModulus`] when
	/// the modulus does not support the degree.
	pub fn new(degree: usize, modulus: u64) -> Result<Self> {
		if !degree.is_power_of_two() || degree < 2 {
			return Err(HeError::InvalidDegree { degree });
		}
		if !is_ntt_friendly(modulus, degree) {
			return Err(HeError::InvalidNttModulus { modulus, degree });
		}
		let modulus = Modulus::new(modulus).map_err(|_| HeError::InvalidModulus { modulus })?;
		let q = modulus.value();
		let log_degree = log2(degree as u64);
		let root = minimal_primitive_root(degree, &modulus)?;

		let mut power = 1u64;
		let mut powers = Vec::with_capacity(degree);
		for _ in 0..degree {
			powers.push(power);
			power = modulus.mul_mod(power, root);
		}
		let mut root_powers = Vec::with_capacity(degree);
		for i in 0..degree {
			let exponent = reverse_bits(i as u64, log_degree) as usize;
			root_powers.push(MultiplyConstant::new(powers[exponent], &modulus));
		}

		// Inverse twiddles in the order the inverse stages consume them:
		// stage m = N/2 first, then N/4, down to m = 2 (the final stage uses
		// the fused constants below).
		let mut inverse_root_powers = Vec::with_capacity(degree);
		let mut m = degree >> 1;
		while m >= 1 {
			for i in 0..m {
				let forward = root_powers[m + i].multiplicand();
				let inverse = modulus.inverse_mod(forward)?;
				inverse_root_powers.push(MultiplyConstant::new(inverse, &modulus));
			}
			m >>= 1;
		}

		let inverse_degree_value = modulus.inverse_mod(degree as u64)?;
		let last_root_inverse = modulus.inverse_mod(root_powers[1].multiplicand())?;
		let inverse_degree = MultiplyConstant::new(inverse_degree_value, &modulus);
		let inverse_degree_root = MultiplyConstant::new(
			modulus.mul_mod(inverse_degree_value, last_root_inverse),
			&modulus,
		);

		Ok(Self {
			degree,
			log_degree,
			lazy_reduction_limit: u64::MAX / q - 2,
			root_powers,
			inverse_root_powers,
			inverse_degree,
			inverse_degree_root,
			minimal_root: root,
			modulus,
		})
	}

	/// The transform degree.
	pub fn degree(&self) -> usize {
		self.degree
	}

	/// The transform modulus.
	pub fn modulus(&self) -> &Modulus {
		&self.modulus
	}

	/// The minimal primitive `2N`-th root of unity the tables are built on.
	pub fn minimal_root(&self) -> u64 {
		self.minimal_root
	}

	/// In-place forward negacyclic NTT of one residue row.
	///
	/// Input coefficients must be in `[0, q)`; outputs are in `[0, q)` in
	/// bit-reversed evaluation order.
	pub fn forward(&self, values: &mut [u64]) {
		debug_assert_eq!(values.len(), self.degree);
		let q = self.modulus.value();
		let two_q = q << 1;
		// Values stay below lazy_bound * q throughout.
		let mut lazy_bound = 1u64;
		let mut m = 1;
		let mut t = self.degree >> 1;
		while m < self.degree {
			if lazy_bound + 2 > self.lazy_reduction_limit {
				for value in values.iter_mut() {
					*value = self.modulus.reduce(*value);
				}
				lazy_bound = 1;
			}
			for i in 0..m {
				let w = &self.root_powers[m + i];
				let offset = 2 * i * t;
				for j in offset..offset + t {
					let x = values[j];
					let lazy = w.multiply_lazy(values[j + t], q);
					values[j] = x + lazy;
					values[j + t] = x + two_q - lazy;
				}
			}
			lazy_bound += 2;
			m <<= 1;
			t >>= 1;
		}
		for value in values.iter_mut() {
			*value = self.modulus.reduce(*value);
		}
	}

	/// In-place inverse negacyclic NTT of one residue row.
	///
	/// Inverts [`NttContext::forward`] exactly, including the `N^{-1}`
	/// scaling; outputs are fully reduced.
	pub fn inverse(&self, values: &mut [u64]) {
		debug_assert_eq!(values.len(), self.degree);
		let q = self.modulus.value();
		let two_q = q << 1;
		// Undo the forward stages in reverse order; every intermediate
		// stays below 2q.
		let mut root_index = 0;
		let mut m = self.degree >> 1;
		let mut t = 1;
		while m > 1 {
			for i in 0..m {
				let w = &self.inverse_root_powers[root_index];
				root_index += 1;
				let offset = 2 * i * t;
				for j in offset..offset + t {
					let x = values[j];
					let y = values[j + t];
					values[j] = sub_if_exceeds(x + y, two_q);
					values[j + t] = w.multiply_lazy(x + two_q - y, q);
				}
			}
			m >>= 1;
			t <<= 1;
		}
		// Final stage, fused with the N^{-1} scaling: the left half takes
		// N^{-1}, the right half the combined N^{-1} * w^{-1} constant.
		let half = self.degree >> 1;
		for j in 0..half {
			let x = values[j];
			let y = values[j + half];
			values[j] = self.inverse_degree.multiply(x + y, q);
			values[j + half] = self.inverse_degree_root.multiply(x + two_q - y, q);
		}
	}
}

/// Finds the minimal primitive `2N`-th root of unity modulo `q`.
fn minimal_primitive_root(degree: usize, modulus: &Modulus) -> Result<u64> {
	let q = modulus.value();
	let group_order = 2 * degree as u64;
	let cofactor = (q - 1) / group_order;
	// Any candidate g yields a 2N-th root g^((q-1)/2N); it is primitive iff
	// its N-th power is -1. The minimum over all odd powers of one primitive
	// root is the global minimum, so the scan below is deterministic.
	let mut candidate = None;
	for g in 2..q {
		let root = modulus.pow_mod(g, cofactor);
		if modulus.pow_mod(root, degree as u64) == q - 1 {
			candidate = Some(root);
			break;
		}
	}
	let root = candidate.ok_or(HeError::InvalidNttModulus {
		modulus: q,
		degree,
	})?;
	let root_squared = modulus.mul_mod(root, root);
	let mut minimal = root;
	let mut current = root;
	for _ in 0..degree {
		current = modulus.mul_mod(current, root_squared);
		if current < minimal {
			minimal = current;
		}
	}
	Ok(minimal)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_unfriendly_moduli() {
		assert!(NttContext::new(8, 19).is_err());
		assert!(NttContext::new(8, 15).is_err());
		assert!(NttContext::new(12, 17).is_err());
		assert!(NttContext::new(8, 17).is_ok());
	}

	#[test]
	fn minimal_root_for_degree_eight() {
		// 3 is a primitive 16th root of unity mod 17 and the smallest one.
		let context = NttContext::new(8, 17).unwrap();
		assert_eq!(context.minimal_root(), 3);
		let modulus = Modulus::new(17).unwrap();
		assert_eq!(modulus.pow_mod(3, 8), 16);
	}

	#[test]
	fn delta_transforms_to_all_ones() {
		let context = NttContext::new(8, 17).unwrap();
		let mut values = [0u64; 8];
		values[0] = 1;
		context.forward(&mut values);
		assert_eq!(values, [1u64; 8]);
	}

	#[test]
	fn round_trip_small() {
		let context = NttContext::new(8, 17).unwrap();
		let original: [u64; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
		let mut values = original;
		context.forward(&mut values);
		assert_ne!(values, original);
		context.inverse(&mut values);
		assert_eq!(values, original);
	}

	#[test]
	fn round_trip_matches_schoolbook_negacyclic_product() {
		// Pointwise multiplication in the evaluation basis must agree with
		// the schoolbook product in Z_q[x]/(x^8 + 1).
		let q = 12289u64;
		let context = NttContext::new(8, q).unwrap();
		let modulus = Modulus::new(q).unwrap();
		let a: [u64; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
		let b: [u64; 8] = [8, 0, 7, 1, 0, 0, 2, 3];
		let mut expected = [0u64; 8];
		for i in 0..8 {
			for j in 0..8 {
				let product = modulus.mul_mod(a[i], b[j]);
				let index = (i + j) % 8;
				if i + j < 8 {
					expected[index] = briar_math::add_mod(expected[index], product, q);
				} else {
					expected[index] = briar_math::sub_mod(expected[index], product, q);
				}
			}
		}
		let mut a_eval = a;
		let mut b_eval = b;
		context.forward(&mut a_eval);
		context.forward(&mut b_eval);
		let mut product: Vec<u64> = a_eval
			.iter()
			.zip(b_eval.iter())
			.map(|(&x, &y)| modulus.mul_mod(x, y))
			.collect();
		context.inverse(&mut product);
		assert_eq!(product, expected);
	}

	#[test]
	fn round_trip_large_degree() {
		let primes = briar_math::generate_primes(&[26], false, 4096).unwrap();
		let context = NttContext::new(4096, primes[0]).unwrap();
		let original: Vec<u64> = (0..4096u64).map(|i| (i * i + 1) % primes[0]).collect();
		let mut values = original.clone();
		context.forward(&mut values);
		context.inverse(&mut values);
		assert_eq!(values, original);
	}
}
