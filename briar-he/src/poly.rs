//! RNS polynomials over `Z_q[x]/(x^N + 1)`.

use std::marker::PhantomData;
use std::sync::Arc;

use briar_math::{
	add_mod, bytes_to_coefficients, coefficients_to_bytes, neg_mod, sub_if_exceeds, sub_mod,
	Array2d, MultiplyConstant,
};

use crate::error::{HeError, Result};
use crate::format::{Coeff, Eval, PolyFormat};
use crate::galois;
use crate::PolyContext;

/// A polynomial in `R_q` stored as a `(moduli, degree)` residue matrix.
///
/// Row `i` holds the coefficients modulo `q_i`; every residue is kept fully
/// reduced. The format parameter `F` records whether the columns are
/// standard coefficients ([`Coeff`]) or bit-reversed NTT evaluations
/// ([`Eval`]); operations that only make sense in one basis are only
/// defined there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolyRq<F: PolyFormat> {
	context: Arc<PolyContext>,
	data: Array2d<u64>,
	format: PhantomData<F>,
}

impl<F: PolyFormat> PolyRq<F> {
	/// The zero polynomial.
	pub fn zero(context: &Arc<PolyContext>) -> Self {
		Self {
			data: Array2d::zero(context.modulus_count(), context.degree()),
			context: Arc::clone(context),
			format: PhantomData,
		}
	}

	/// Wraps residue data; the shape must match the context.
	pub fn new(context: &Arc<PolyContext>, data: Array2d<u64>) -> Result<Self> {
		if data.row_count() != context.modulus_count() || data.column_count() != context.degree()
		{
			return Err(HeError::PolyContextMismatch);
		}
		#[cfg(debug_assertions)]
		for (row, modulus) in data.rows().zip(context.moduli()) {
			debug_assert!(row.iter().all(|&value| value < modulus.value()));
		}
		Ok(Self {
			data,
			context: Arc::clone(context),
			format: PhantomData,
		})
	}

	/// The polynomial's context.
	#[inline(always)]
	pub fn context(&self) -> &Arc<PolyContext> {
		&self.context
	}

	/// The ring degree.
	#[inline(always)]
	pub fn degree(&self) -> usize {
		self.context.degree()
	}

	/// Number of RNS rows.
	#[inline(always)]
	pub fn modulus_count(&self) -> usize {
		self.context.modulus_count()
	}

	/// The residue matrix.
	#[inline(always)]
	pub fn data(&self) -> &Array2d<u64> {
		&self.data
	}

	/// The residue matrix, mutable. Callers must preserve reduction.
	#[inline(always)]
	pub fn data_mut(&mut self) -> &mut Array2d<u64> {
		&mut self.data
	}

	/// The `row`-th residue row.
	#[inline(always)]
	pub fn row(&self, row: usize) -> &[u64] {
		self.data.row(row)
	}

	/// The `row`-th residue row, mutable.
	#[inline(always)]
	pub fn row_mut(&mut self, row: usize) -> &mut [u64] {
		self.data.row_mut(row)
	}

	fn assert_same_context(&self, other: &Self) {
		debug_assert!(self.context == other.context, "polynomial context mismatch");
	}

	/// `self += rhs`, per modulus.
	pub fn add_assign(&mut self, rhs: &Self) {
		self.assert_same_context(rhs);
		for (row, modulus) in (0..self.modulus_count()).zip(self.context.moduli().to_vec()) {
			let q = modulus.value();
			for (lhs, &value) in self.data.row_mut(row).iter_mut().zip(rhs.data.row(row)) {
				*lhs = add_mod(*lhs, value, q);
			}
		}
	}

	/// `self -= rhs`, per modulus.
	pub fn sub_assign(&mut self, rhs: &Self) {
		self.assert_same_context(rhs);
		for (row, modulus) in (0..self.modulus_count()).zip(self.context.moduli().to_vec()) {
			let q = modulus.value();
			for (lhs, &value) in self.data.row_mut(row).iter_mut().zip(rhs.data.row(row)) {
				*lhs = sub_mod(*lhs, value, q);
			}
		}
	}

	/// `self = -self`, per modulus.
	pub fn negate_assign(&mut self) {
		for row in 0..self.modulus_count() {
			let q = self.context.moduli()[row].value();
			for value in self.data.row_mut(row).iter_mut() {
				*value = neg_mod(*value, q);
			}
		}
	}

	/// Returns `self + rhs`.
	pub fn add(&self, rhs: &Self) -> Self {
		let mut sum = self.clone();
		sum.add_assign(rhs);
		sum
	}

	/// Returns `self - rhs`.
	pub fn sub(&self, rhs: &Self) -> Self {
		let mut difference = self.clone();
		difference.sub_assign(rhs);
		difference
	}

	/// Multiplies every row by the same scalar, reduced per modulus.
	pub fn multiply_scalar_assign(&mut self, scalar: u64) {
		for row in 0..self.modulus_count() {
			let modulus = self.context.moduli()[row].clone();
			let constant = MultiplyConstant::new(modulus.reduce(scalar), &modulus);
			let q = modulus.value();
			for value in self.data.row_mut(row).iter_mut() {
				*value = constant.multiply(*value, q);
			}
		}
	}

	/// Multiplies row `i` by `scalars[i]`: a scalar given in RNS form.
	pub fn multiply_rns_scalar_assign(&mut self, scalars: &[u64]) {
		debug_assert_eq!(scalars.len(), self.modulus_count());
		for row in 0..self.modulus_count() {
			let modulus = self.context.moduli()[row].clone();
			let constant = MultiplyConstant::new(modulus.reduce(scalars[row]), &modulus);
			let q = modulus.value();
			for value in self.data.row_mut(row).iter_mut() {
				*value = constant.multiply(*value, q);
			}
		}
	}

	/// Serializes the polynomial: per row, coefficients packed MSB-first at
	/// `ceil(log2(q_i)) - skip_lsbs` bits each.
	pub fn to_bytes(&self, skip_lsbs: u32) -> Vec<u8> {
		let mut bytes = Vec::with_capacity(self.context.serialized_byte_count(skip_lsbs));
		for (row, modulus) in self.data.rows().zip(self.context.moduli()) {
			bytes.extend(coefficients_to_bytes(row, modulus.ceil_log2(), skip_lsbs));
		}
		bytes
	}

	/// Deserializes a polynomial, validating the total byte count up front.
	///
	/// Coefficient ranges are not re-validated; producing in-range data is
	/// the serializer's contract.
	pub fn from_bytes(context: &Arc<PolyContext>, bytes: &[u8], skip_lsbs: u32) -> Result<Self> {
		let expected = context.serialized_byte_count(skip_lsbs);
		if bytes.len() != expected {
			return Err(HeError::SerializedBufferSizeMismatch {
				actual: bytes.len(),
				expected,
			});
		}
		let degree = context.degree();
		let mut data = Array2d::zero(context.modulus_count(), degree);
		let mut offset = 0usize;
		for (row, modulus) in context.moduli().iter().enumerate() {
			let bits = modulus.ceil_log2();
			let row_bytes = briar_math::serialized_byte_count(degree, bits, skip_lsbs);
			let coefficients =
				bytes_to_coefficients(&bytes[offset..offset + row_bytes], degree, bits, skip_lsbs);
			data.row_mut(row).copy_from_slice(&coefficients);
			offset += row_bytes;
		}
		Ok(Self {
			data,
			context: Arc::clone(context),
			format: PhantomData,
		})
	}

	pub(crate) fn retag<G: PolyFormat>(self) -> PolyRq<G> {
		PolyRq {
			context: self.context,
			data: self.data,
			format: PhantomData,
		}
	}
}

impl PolyRq<Coeff> {
	/// Transforms into the evaluation basis, walking the context chain for
	/// each modulus's tables.
	pub fn forward_ntt(mut self) -> Result<PolyRq<Eval>> {
		for row in 0..self.context.modulus_count() {
			let ntt = self.context.ntt_context_for_row(row)?;
			ntt.forward(self.data.row_mut(row));
		}
		Ok(self.retag())
	}

	/// Applies the automorphism `x -> x^element` in the coefficient basis.
	pub fn apply_galois(&self, element: u64) -> Result<PolyRq<Coeff>> {
		galois::validate_element(element, self.degree())?;
		let mut output = Self::zero(&self.context);
		for row in 0..self.modulus_count() {
			let modulus = &self.context.moduli()[row];
			galois::apply_coeff_row(self.data.row(row), output.data.row_mut(row), element, modulus);
		}
		Ok(output)
	}

	/// Multiplies by `x^power` (negacyclic): rotate and negate the wrapped
	/// range, per modulus.
	pub fn multiply_power_of_x(&mut self, power: i64) {
		let degree = self.degree();
		let two_degree = 2 * degree;
		let exponent = (power.unsigned_abs() as usize) % two_degree;
		if exponent == 0 {
			return;
		}
		let shift = exponent % degree;
		let negate_range = if power > 0 {
			if exponent < degree {
				0..exponent
			} else {
				exponent - degree..degree
			}
		} else if exponent < degree {
			degree - exponent..degree
		} else {
			0..two_degree - exponent
		};
		for row in 0..self.modulus_count() {
			let q = self.context.moduli()[row].value();
			if power > 0 {
				self.data.rotate_row_right(row, shift);
			} else {
				self.data.rotate_row_left(row, shift);
			}
			for value in &mut self.data.row_mut(row)[negate_range.clone()] {
				*value = neg_mod(*value, q);
			}
		}
	}

	/// Drops the last modulus with rounding: `round(q_last^{-1} * x)` in the
	/// remaining basis, then reparents to `context.next()`.
	pub fn divide_and_round_q_last(&mut self) -> Result<()> {
		let next = self
			.context
			.next()
			.cloned()
			.ok_or(HeError::InvalidPolyContext)?;
		let moduli = self.context.moduli().to_vec();
		let inverses = self
			.context
			.inverse_q_last()
			.expect("chained context carries q_last inverses")
			.to_vec();
		let last_row = moduli.len() - 1;
		let q_last = moduli[last_row].value();
		let half = q_last >> 1;
		// d = x + half mod q_last, taken from the dropped row.
		let rounded: Vec<u64> = self
			.data
			.row(last_row)
			.iter()
			.map(|&value| sub_if_exceeds(value + half, q_last))
			.collect();
		for row in 0..last_row {
			let modulus = &moduli[row];
			let q = modulus.value();
			let half_mod = modulus.reduce(half);
			let inverse = &inverses[row];
			for (value, &d) in self.data.row_mut(row).iter_mut().zip(&rounded) {
				let d_mod = modulus.reduce(d);
				let shifted = sub_mod(add_mod(*value, half_mod, q), d_mod, q);
				*value = inverse.multiply(shifted, q);
			}
		}
		self.data.remove_last_row();
		self.context = next;
		Ok(())
	}
}

impl PolyRq<Eval> {
	/// Transforms back into the coefficient basis.
	pub fn inverse_ntt(mut self) -> Result<PolyRq<Coeff>> {
		for row in 0..self.context.modulus_count() {
			let ntt = self.context.ntt_context_for_row(row)?;
			ntt.inverse(self.data.row_mut(row));
		}
		Ok(self.retag())
	}

	/// Coefficientwise product, per modulus.
	pub fn multiply_assign(&mut self, rhs: &Self) {
		self.assert_same_context(rhs);
		for row in 0..self.modulus_count() {
			let modulus = self.context.moduli()[row].clone();
			for (lhs, &value) in self.data.row_mut(row).iter_mut().zip(rhs.data.row(row)) {
				*lhs = modulus.mul_mod(*lhs, value);
			}
		}
	}

	/// Returns `self * rhs` coefficientwise.
	pub fn multiply(&self, rhs: &Self) -> Self {
		let mut product = self.clone();
		product.multiply_assign(rhs);
		product
	}

	/// Applies the automorphism `x -> x^element` in the evaluation basis (a
	/// pure slot permutation).
	pub fn apply_galois(&self, element: u64) -> Result<PolyRq<Eval>> {
		galois::validate_element(element, self.degree())?;
		let mut output = Self::zero(&self.context);
		for row in 0..self.modulus_count() {
			galois::apply_eval_row(self.data.row(row), output.data.row_mut(row), element);
		}
		Ok(output)
	}
}

/// A double-width accumulator for sums of coefficientwise products in the
/// evaluation basis.
///
/// Products are accumulated without reduction; a reduction pass runs only
/// when the context's lazy budget would be exceeded, and once at the end.
pub struct LazyAccumulator {
	context: Arc<PolyContext>,
	data: Vec<u128>,
	pending: usize,
	budget: usize,
}

impl LazyAccumulator {
	/// An empty accumulator over `context`.
	pub fn new(context: &Arc<PolyContext>) -> Self {
		Self {
			data: vec![0u128; context.modulus_count() * context.degree()],
			budget: context.max_lazy_product_accumulation_count(),
			pending: 0,
			context: Arc::clone(context),
		}
	}

	/// Accumulates `lhs * rhs` coefficientwise.
	pub fn add_product(&mut self, lhs: &PolyRq<Eval>, rhs: &PolyRq<Eval>) {
		debug_assert!(*lhs.context() == self.context && *rhs.context() == self.context);
		if self.pending == self.budget {
			self.reduce_in_place();
		}
		let degree = self.context.degree();
		for row in 0..self.context.modulus_count() {
			let offset = row * degree;
			let left = lhs.row(row);
			let right = rhs.row(row);
			for column in 0..degree {
				self.data[offset + column] += left[column] as u128 * right[column] as u128;
			}
		}
		self.pending += 1;
	}

	/// Adds an already-reduced polynomial.
	pub fn add_poly(&mut self, poly: &PolyRq<Eval>) {
		debug_assert!(*poly.context() == self.context);
		let degree = self.context.degree();
		for row in 0..self.context.modulus_count() {
			let offset = row * degree;
			for (column, &value) in poly.row(row).iter().enumerate() {
				self.data[offset + column] += value as u128;
			}
		}
	}

	fn reduce_in_place(&mut self) {
		let degree = self.context.degree();
		for (row, modulus) in self.context.moduli().iter().enumerate() {
			let offset = row * degree;
			for value in &mut self.data[offset..offset + degree] {
				*value = modulus.reduce_u128(*value) as u128;
			}
		}
		self.pending = 1;
	}

	/// Reduces into an evaluation-basis polynomial.
	pub fn into_poly(mut self) -> PolyRq<Eval> {
		self.reduce_in_place();
		let degree = self.context.degree();
		let mut output = PolyRq::zero(&self.context);
		for row in 0..self.context.modulus_count() {
			let offset = row * degree;
			for (column, value) in self.data[offset..offset + degree].iter().enumerate() {
				output.row_mut(row)[column] = *value as u64;
			}
		}
		output
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn context() -> Arc<PolyContext> {
		PolyContext::new(8, &[17, 97]).unwrap()
	}

	fn poly_from_rows(context: &Arc<PolyContext>, rows: &[&[u64]]) -> PolyRq<Coeff> {
		let flat: Vec<u64> = rows.iter().flat_map(|row| row.iter().copied()).collect();
		let data = Array2d::new(flat, rows.len(), rows[0].len()).unwrap();
		PolyRq::new(context, data).unwrap()
	}

	#[test]
	fn addition_and_negation_are_per_modulus() {
		let context = context();
		let a = poly_from_rows(&context, &[&[1, 2, 3, 4, 5, 6, 7, 8], &[1, 2, 3, 4, 5, 6, 7, 8]]);
		let b = poly_from_rows(
			&context,
			&[&[16, 16, 16, 16, 16, 16, 16, 16], &[96, 96, 96, 96, 96, 96, 96, 96]],
		);
		let sum = a.add(&b);
		assert_eq!(sum.row(0), &[0, 1, 2, 3, 4, 5, 6, 7]);
		assert_eq!(sum.row(1), &[0, 1, 2, 3, 4, 5, 6, 7]);
		let mut negated = sum.clone();
		negated.negate_assign();
		let round_trip = sum.add(&negated);
		assert_eq!(round_trip, PolyRq::zero(&context));
	}

	#[test]
	fn ntt_round_trip() {
		let context = context();
		let poly = poly_from_rows(&context, &[&[1, 2, 3, 4, 5, 6, 7, 8], &[8, 7, 6, 5, 4, 3, 2, 1]]);
		let round_trip = poly.clone().forward_ntt().unwrap().inverse_ntt().unwrap();
		assert_eq!(round_trip, poly);
	}

	#[test]
	fn eval_product_matches_negacyclic_convolution() {
		let context = PolyContext::new(8, &[17]).unwrap();
		// (1 + x) * (1 - x) = 1 - x^2.
		let a = poly_from_rows(&context, &[&[1, 1, 0, 0, 0, 0, 0, 0]]);
		let b = poly_from_rows(&context, &[&[1, 16, 0, 0, 0, 0, 0, 0]]);
		let mut product = a.forward_ntt().unwrap();
		product.multiply_assign(&b.forward_ntt().unwrap());
		let result = product.inverse_ntt().unwrap();
		assert_eq!(result.row(0), &[1, 0, 16, 0, 0, 0, 0, 0]);
	}

	#[test]
	fn power_of_x_wraps_with_negation() {
		let context = PolyContext::new(4, &[17]).unwrap();
		let base = poly_from_rows(&context, &[&[1, 2, 3, 4]]);

		let mut shifted = base.clone();
		shifted.multiply_power_of_x(1);
		assert_eq!(shifted.row(0), &[13, 1, 2, 3]);

		let mut back = shifted.clone();
		back.multiply_power_of_x(-1);
		assert_eq!(back, base);

		let mut negated = base.clone();
		negated.multiply_power_of_x(4);
		assert_eq!(negated.row(0), &[16, 15, 14, 13]);

		let mut wrapped = base.clone();
		wrapped.multiply_power_of_x(5);
		assert_eq!(wrapped.row(0), &[4, 16, 15, 14]);

		let mut inverse = base.clone();
		inverse.multiply_power_of_x(-5);
		let mut expected = base.clone();
		expected.multiply_power_of_x(3);
		assert_eq!(inverse, expected);
	}

	#[test]
	fn galois_round_trip_in_both_bases() {
		let context = context();
		let poly =
			poly_from_rows(&context, &[&[0, 1, 2, 3, 4, 5, 6, 7], &[7, 6, 5, 4, 3, 2, 1, 0]]);
		let element = 3u64;
		let inverse = crate::GaloisElement::inverting(element, 8).unwrap();
		let forward = poly.apply_galois(element).unwrap();
		let back = forward.apply_galois(inverse).unwrap();
		assert_eq!(back, poly);

		// The evaluation-basis action must commute with the NTT.
		let via_coeff = forward.clone().forward_ntt().unwrap();
		let via_eval = poly.clone().forward_ntt().unwrap().apply_galois(element).unwrap();
		assert_eq!(via_coeff, via_eval);
	}

	#[test]
	fn divide_and_round_scales_down() {
		let context = context();
		// Encode the constant polynomial v at value v * 97 across both rows,
		// so dividing by q_last = 97 must recover v exactly.
		let value = 5u64;
		let scaled = value * 97;
		let rows: Vec<Vec<u64>> = context
			.moduli()
			.iter()
			.map(|modulus| vec![modulus.reduce(scaled); 8])
			.collect();
		let mut poly =
			poly_from_rows(&context, &rows.iter().map(Vec::as_slice).collect::<Vec<_>>());
		poly.divide_and_round_q_last().unwrap();
		assert_eq!(poly.modulus_count(), 1);
		assert_eq!(poly.row(0), &[value; 8]);
	}

	#[test]
	fn serialization_round_trips() {
		let context = context();
		let poly = poly_from_rows(&context, &[&[1, 2, 3, 4, 5, 6, 7, 8], &[9, 10, 11, 12, 13, 96, 95, 94]]);
		let bytes = poly.to_bytes(0);
		assert_eq!(bytes.len(), context.serialized_byte_count(0));
		let decoded = PolyRq::<Coeff>::from_bytes(&context, &bytes, 0).unwrap();
		assert_eq!(decoded, poly);
		assert!(matches!(
			PolyRq::<Coeff>::from_bytes(&context, &bytes[1..], 0),
			Err(HeError::SerializedBufferSizeMismatch { .. })
		));
	}

	#[test]
	fn serialization_skipping_lsbs_truncates() {
		let context = PolyContext::new(8, &[97]).unwrap();
		let poly = poly_from_rows(&context, &[&[96, 5, 64, 33, 7, 1, 2, 90]]);
		let bytes = poly.to_bytes(2);
		let decoded = PolyRq::<Coeff>::from_bytes(&context, &bytes, 2).unwrap();
		for (decoded, original) in decoded.row(0).iter().zip(poly.row(0)) {
			assert_eq!(*decoded, original & !0b11);
		}
	}

	#[test]
	fn lazy_accumulator_matches_direct_products() {
		let context = context();
		let a = poly_from_rows(&context, &[&[1, 2, 3, 4, 5, 6, 7, 8], &[1, 1, 1, 1, 2, 2, 2, 2]])
			.forward_ntt()
			.unwrap();
		let b = poly_from_rows(&context, &[&[2, 2, 2, 2, 3, 3, 3, 3], &[5, 6, 7, 8, 9, 10, 11, 12]])
			.forward_ntt()
			.unwrap();
		let mut accumulator = LazyAccumulator::new(&context);
		accumulator.add_product(&a, &b);
		accumulator.add_product(&b, &a);
		let accumulated = accumulator.into_poly();
		let mut expected = a.multiply(&b);
		let mut doubled = expected.clone();
		doubled.add_assign(&expected);
		expected = doubled;
		assert_eq!(accumulated, expected);
	}
}
