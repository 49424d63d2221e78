//! BFV ciphertexts and the operations the protocol engines drive.

use std::sync::Arc;

use crate::bfv::keys::EvaluationKey;
use crate::bfv::plaintext::EvalPlaintext;
use crate::bfv::BfvContext;
use crate::error::{HeError, Result};
use crate::format::{Coeff, Eval, PolyFormat};
use crate::poly::{LazyAccumulator, PolyRq};
use crate::PolyContext;

/// A BFV ciphertext: two (or, before relinearization, three) polynomials
/// under the secret-key powers `(1, s, s^2)`.
///
/// Like polynomials, ciphertexts carry their basis in the type. Fresh
/// encryptions are `Coeff`; the evaluation engines convert to `Eval` for
/// plaintext products and back for rotations and serialization.
#[derive(Debug, Clone)]
pub struct Ciphertext<F: PolyFormat> {
	context: Arc<BfvContext>,
	polys: Vec<PolyRq<F>>,
}

impl<F: PolyFormat> PartialEq for Ciphertext<F> {
	fn eq(&self, other: &Self) -> bool {
		self.polys == other.polys
	}
}

impl<F: PolyFormat> Eq for Ciphertext<F> {}

impl<F: PolyFormat> Ciphertext<F> {
	pub(crate) fn from_polys(context: &Arc<BfvContext>, polys: Vec<PolyRq<F>>) -> Self {
		debug_assert!(!polys.is_empty());
		Self {
			context: Arc::clone(context),
			polys,
		}
	}

	/// A size-2 encryption of zero with no randomness: the additive
	/// identity, used when every term of an inner product is skipped.
	pub fn zero(context: &Arc<BfvContext>, poly_context: &Arc<PolyContext>) -> Self {
		Self {
			context: Arc::clone(context),
			polys: vec![PolyRq::zero(poly_context), PolyRq::zero(poly_context)],
		}
	}

	/// The owning scheme context.
	pub fn context(&self) -> &Arc<BfvContext> {
		&self.context
	}

	/// The component polynomials.
	pub fn polys(&self) -> &[PolyRq<F>] {
		&self.polys
	}

	/// The chain level the components live at.
	pub fn poly_context(&self) -> &Arc<PolyContext> {
		self.polys[0].context()
	}

	/// Number of component polynomials.
	pub fn size(&self) -> usize {
		self.polys.len()
	}

	fn check_compatible(&self, rhs: &Self) -> Result<()> {
		if self.polys.len() != rhs.polys.len() {
			return Err(HeError::InvalidCiphertextSize {
				actual: rhs.polys.len(),
				expected: self.polys.len(),
			});
		}
		if self.poly_context() != rhs.poly_context() {
			return Err(HeError::PolyContextMismatch);
		}
		Ok(())
	}

	/// `self += rhs`.
	pub fn add_assign(&mut self, rhs: &Self) {
		self.check_compatible(rhs).expect("incompatible ciphertexts");
		for (lhs, rhs) in self.polys.iter_mut().zip(&rhs.polys) {
			lhs.add_assign(rhs);
		}
	}

	/// `self -= rhs`.
	pub fn sub_assign(&mut self, rhs: &Self) {
		self.check_compatible(rhs).expect("incompatible ciphertexts");
		for (lhs, rhs) in self.polys.iter_mut().zip(&rhs.polys) {
			lhs.sub_assign(rhs);
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

	/// `self = -self`.
	pub fn negate_assign(&mut self) {
		for poly in &mut self.polys {
			poly.negate_assign();
		}
	}
}

impl Ciphertext<Coeff> {
	/// Transforms all components to the evaluation basis.
	pub fn to_eval(self) -> Result<Ciphertext<Eval>> {
		let context = self.context;
		let polys = self
			.polys
			.into_iter()
			.map(PolyRq::forward_ntt)
			.collect::<Result<Vec<_>>>()?;
		Ok(Ciphertext {
			context,
			polys,
		})
	}

	/// Multiplies by `x^power` componentwise.
	pub fn multiply_power_of_x(&mut self, power: i64) {
		for poly in &mut self.polys {
			poly.multiply_power_of_x(power);
		}
	}

	/// Applies the Galois automorphism `x -> x^element` and key-switches
	/// back under the original secret.
	///
	/// Requires a size-2 ciphertext at the top of the chain and the
	/// matching Galois key.
	pub fn apply_galois(&self, element: u64, evaluation_key: &EvaluationKey) -> Result<Self> {
		if self.polys.len() != 2 {
			return Err(HeError::InvalidCiphertextSize {
				actual: self.polys.len(),
				expected: 2,
			});
		}
		let key = evaluation_key.galois_key(element)?;
		let c0 = self.polys[0].apply_galois(element)?;
		let c1 = self.polys[1].apply_galois(element)?;
		let (mut switched0, switched1) = key.apply(&c1)?;
		switched0.add_assign(&c0);
		Ok(Self {
			context: Arc::clone(&self.context),
			polys: vec![switched0, switched1],
		})
	}

	/// Reduces a size-3 ciphertext back to size 2 with the relinearization
	/// key.
	pub fn relinearize(&mut self, evaluation_key: &EvaluationKey) -> Result<()> {
		if self.polys.len() != 3 {
			return Err(HeError::InvalidCiphertextSize {
				actual: self.polys.len(),
				expected: 3,
			});
		}
		let key = evaluation_key.relinearization_key()?;
		let quadratic = self.polys.pop().expect("size checked above");
		let (switched0, switched1) = key.apply(&quadratic)?;
		self.polys[0].add_assign(&switched0);
		self.polys[1].add_assign(&switched1);
		Ok(())
	}

	/// Switches the modulus down one level with divide-and-round.
	pub fn mod_switch_down(&mut self) -> Result<()> {
		for poly in &mut self.polys {
			poly.divide_and_round_q_last()?;
		}
		Ok(())
	}

	/// Switches down until a single modulus remains.
	pub fn mod_switch_to_single(&mut self) -> Result<()> {
		while self.polys[0].context().next().is_some() {
			self.mod_switch_down()?;
		}
		Ok(())
	}

	/// Serializes as `[size u8][modulus count u8][component bytes]`.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut bytes = Vec::new();
		bytes.push(self.polys.len() as u8);
		bytes.push(self.polys[0].modulus_count() as u8);
		for poly in &self.polys {
			bytes.extend(poly.to_bytes(0));
		}
		bytes
	}

	/// Deserializes, locating the chain level from the header.
	pub fn from_bytes(context: &Arc<BfvContext>, bytes: &[u8]) -> Result<Self> {
		if bytes.len() < 2 {
			return Err(HeError::SerializedBufferSizeMismatch {
				actual: bytes.len(),
				expected: 2,
			});
		}
		let size = bytes[0] as usize;
		let modulus_count = bytes[1] as usize;
		let top = context.poly_context();
		if size == 0 || modulus_count == 0 || modulus_count > top.modulus_count() {
			return Err(HeError::InvalidPolyContext);
		}
		let level = PolyContext::context_at(top, top.modulus_count() - modulus_count)?;
		let poly_bytes = level.serialized_byte_count(0);
		let expected = 2 + size * poly_bytes;
		if bytes.len() != expected {
			return Err(HeError::SerializedBufferSizeMismatch {
				actual: bytes.len(),
				expected,
			});
		}
		let mut polys = Vec::with_capacity(size);
		for index in 0..size {
			let start = 2 + index * poly_bytes;
			polys.push(PolyRq::from_bytes(&level, &bytes[start..start + poly_bytes], 0)?);
		}
		Ok(Self {
			context: Arc::clone(context),
			polys,
		})
	}
}

impl Ciphertext<Eval> {
	/// Transforms all components back to the coefficient basis.
	pub fn to_coeff(self) -> Result<Ciphertext<Coeff>> {
		let context = self.context;
		let polys = self
			.polys
			.into_iter()
			.map(PolyRq::inverse_ntt)
			.collect::<Result<Vec<_>>>()?;
		Ok(Ciphertext {
			context,
			polys,
		})
	}

	/// Multiplies every component by a plaintext in the evaluation basis.
	pub fn multiply_plain(&self, plaintext: &EvalPlaintext) -> Result<Self> {
		if self.poly_context() != plaintext.poly().context() {
			return Err(HeError::PolyContextMismatch);
		}
		let polys = self
			.polys
			.iter()
			.map(|poly| poly.multiply(plaintext.poly()))
			.collect();
		Ok(Self {
			context: Arc::clone(&self.context),
			polys,
		})
	}

	/// The inner product `sum_i ciphertexts[i] * plaintexts[i]`, skipping
	/// `None` plaintexts (the PIR zero-block short-circuit).
	///
	/// Products are accumulated lazily in double width; one reduction runs
	/// at the end.
	pub fn inner_product_plain<'a, I>(
		ciphertexts: &[Ciphertext<Eval>],
		plaintexts: I,
	) -> Result<Ciphertext<Eval>>
	where
		I: IntoIterator<Item = Option<&'a EvalPlaintext>>,
	{
		let first = ciphertexts.first().ok_or(HeError::InvalidCiphertextSize {
			actual: 0,
			expected: 1,
		})?;
		let context = Arc::clone(first.context());
		let poly_context = Arc::clone(first.poly_context());
		let size = first.size();
		let mut accumulators: Vec<LazyAccumulator> =
			(0..size).map(|_| LazyAccumulator::new(&poly_context)).collect();
		let mut any = false;
		for (ciphertext, plaintext) in ciphertexts.iter().zip(plaintexts) {
			let Some(plaintext) = plaintext else {
				continue;
			};
			if ciphertext.size() != size || ciphertext.poly_context() != &poly_context {
				return Err(HeError::PolyContextMismatch);
			}
			any = true;
			for (accumulator, poly) in accumulators.iter_mut().zip(&ciphertext.polys) {
				accumulator.add_product(poly, plaintext.poly());
			}
		}
		if !any {
			return Ok(Ciphertext::zero(&context, &poly_context));
		}
		Ok(Self {
			context,
			polys: accumulators.into_iter().map(LazyAccumulator::into_poly).collect(),
		})
	}
}
