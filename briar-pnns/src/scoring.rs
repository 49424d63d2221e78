//! Fixed-point encoding of float vectors and plaintext-CRT score decoding.

use briar_math::{centered_to_remainder, Array2d, Modulus};

use crate::error::{PnnsError, Result};

/// Scales each row of `matrix` to unit L2 norm.
///
/// All-zero rows are left untouched.
pub fn normalize_rows(matrix: &Array2d<f32>) -> Array2d<f32> {
	let mut normalized = matrix.clone();
	for row in 0..matrix.row_count() {
		let norm = matrix
			.row(row)
			.iter()
			.map(|&value| f64::from(value) * f64::from(value))
			.sum::<f64>()
			.sqrt();
		if norm > 0.0 {
			for value in normalized.row_mut(row) {
				*value = (f64::from(*value) / norm) as f32;
			}
		}
	}
	normalized
}

/// Multiplies by the scaling factor and rounds to the nearest integer.
pub fn scale_and_round(matrix: &Array2d<f32>, scaling_factor: u64) -> Result<Array2d<i64>> {
	let mut scaled = Vec::with_capacity(matrix.count());
	for row in 0..matrix.row_count() {
		for &value in matrix.row(row) {
			scaled.push((f64::from(value) * scaling_factor as f64).round() as i64);
		}
	}
	Ok(Array2d::new(scaled, matrix.row_count(), matrix.column_count())?)
}

/// Reduces signed fixed-point values into `[0, t)`.
pub fn reduce_signed(matrix: &Array2d<i64>, plaintext_modulus: u64) -> Result<Array2d<u64>> {
	let mut reduced = Vec::with_capacity(matrix.count());
	for row in 0..matrix.row_count() {
		for &value in matrix.row(row) {
			if value.unsigned_abs() >= plaintext_modulus / 2 {
				return Err(PnnsError::ValidationError {
					reason: format!(
						"scaled value {value} overflows plaintext modulus {plaintext_modulus}"
					),
				});
			}
			reduced.push(centered_to_remainder(value, plaintext_modulus));
		}
	}
	Ok(Array2d::new(reduced, matrix.row_count(), matrix.column_count())?)
}

/// CRT composition over the plaintext moduli: widens per-modulus scores
/// into `Z_T`, `T` the modulus product, then recenters into
/// `[-T/2, T/2)`.
pub struct PlaintextCrt {
	moduli: Vec<Modulus>,
	hat: Vec<u128>,
	hat_inverse: Vec<u64>,
	product: u128,
}

impl PlaintextCrt {
	/// Precomputes the composition constants.
	pub fn new(moduli: &[u64]) -> Result<Self> {
		let precomputed = moduli
			.iter()
			.map(|&value| Modulus::new(value))
			.collect::<briar_math::Result<Vec<_>>>()?;
		let mut product: u128 = 1;
		for &value in moduli {
			product = product.checked_mul(value as u128).ok_or_else(|| {
				PnnsError::ValidationError {
					reason: "plaintext modulus product overflows".to_string(),
				}
			})?;
		}
		let mut hat = Vec::with_capacity(moduli.len());
		let mut hat_inverse = Vec::with_capacity(moduli.len());
		for modulus in &precomputed {
			let value_hat = product / modulus.value() as u128;
			let inverse = modulus.inverse_mod(modulus.reduce_u128(value_hat))?;
			hat.push(value_hat);
			hat_inverse.push(inverse);
		}
		Ok(Self {
			moduli: precomputed,
			hat,
			hat_inverse,
			product,
		})
	}

	/// Composes one residue per modulus into the centered value.
	pub fn compose_centered(&self, residues: &[u64]) -> i64 {
		debug_assert_eq!(residues.len(), self.moduli.len());
		let mut sum: u128 = 0;
		for (((residue, modulus), hat), inverse) in residues
			.iter()
			.zip(&self.moduli)
			.zip(&self.hat)
			.zip(&self.hat_inverse)
		{
			let digit = modulus.mul_mod(modulus.reduce(*residue), *inverse);
			sum += digit as u128 * hat;
		}
		let value = sum % self.product;
		if value > self.product / 2 {
			-((self.product - value) as i64)
		} else {
			value as i64
		}
	}
}

/// Composes per-modulus score matrices and divides by the squared scaling
/// factor to recover float scores.
pub fn decode_scores(
	per_modulus: &[Array2d<u64>],
	plaintext_moduli: &[u64],
	scaling_factor: u64,
) -> Result<Array2d<f32>> {
	let first = per_modulus.first().ok_or(PnnsError::EmptyPlaintextArray)?;
	if per_modulus.len() != plaintext_moduli.len() {
		return Err(PnnsError::WrongContextsCount {
			actual: per_modulus.len(),
			expected: plaintext_moduli.len(),
		});
	}
	let crt = PlaintextCrt::new(plaintext_moduli)?;
	let divisor = (scaling_factor as f64) * (scaling_factor as f64);
	let mut scores = Vec::with_capacity(first.count());
	for row in 0..first.row_count() {
		for column in 0..first.column_count() {
			let residues: Vec<u64> = per_modulus
				.iter()
				.map(|matrix| *matrix.get(row, column))
				.collect();
			let composed = crt.compose_centered(&residues);
			scores.push((composed as f64 / divisor) as f32);
		}
	}
	Ok(Array2d::new(scores, first.row_count(), first.column_count())?)
}
