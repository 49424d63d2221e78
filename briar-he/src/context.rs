//! The modulus-switching chain of polynomial contexts.

use std::sync::Arc;

use briar_math::{is_power_of_two, is_prime, Modulus, MultiplyConstant};

use crate::error::{HeError, Result};
use crate::ntt::NttContext;

/// Largest supported ring degree.
pub const MAX_DEGREE: usize = 1 << 17;

/// One node of the modulus-switching chain: a ring degree, an RNS modulus
/// list, and a link to the context with the last modulus dropped.
///
/// Built bottom-up at key-generation time; immutable and freely shared
/// afterwards. The NTT tables for the node's *last* modulus live on the node
/// itself, so walking the chain reaches the tables of every modulus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolyContext {
	degree: usize,
	moduli: Vec<Modulus>,
	next: Option<Arc<PolyContext>>,
	ntt_context: Option<NttContext>,
	/// `q_last^{-1} mod q_i` for each remaining modulus, used by
	/// divide-and-round modulus switching. Present iff `next` is.
	inverse_q_last: Option<Vec<MultiplyConstant>>,
}

impl PolyContext {
	/// Builds the chain for `moduli`, validating the invariants: the degree
	/// is a power of two, each modulus is prime or a power of two, the
	/// moduli are pairwise distinct with at most one power of two among
	/// them, and each fits `[2, 2^62 - 1]`.
	pub fn new(degree: usize, moduli: &[u64]) -> Result<Arc<Self>> {
		if !degree.is_power_of_two() || degree < 2 || degree > MAX_DEGREE {
			return Err(HeError::InvalidDegree { degree });
		}
		if moduli.is_empty() {
			return Err(HeError::EmptyModulus);
		}
		let mut power_of_two_count = 0usize;
		for (index, &q) in moduli.iter().enumerate() {
			if is_power_of_two(q) {
				power_of_two_count += 1;
			} else if !is_prime(q) {
				return Err(HeError::InvalidModulus { modulus: q });
			}
			for &earlier in &moduli[..index] {
				if earlier == q {
					return Err(HeError::CoprimeModuli {
						first: earlier,
						second: q,
					});
				}
			}
		}
		if power_of_two_count > 1 {
			let mut powers = moduli.iter().filter(|q| is_power_of_two(**q));
			return Err(HeError::CoprimeModuli {
				first: *powers.next().expect("two powers of two present"),
				second: *powers.next().expect("two powers of two present"),
			});
		}

		let precomputed = moduli
			.iter()
			.map(|&q| Modulus::new(q).map_err(|_| HeError::InvalidModulus { modulus: q }))
			.collect::<Result<Vec<_>>>()?;

		let next = if moduli.len() > 1 {
			Some(Self::new(degree, &moduli[..moduli.len() - 1])?)
		} else {
			None
		};

		let last = moduli[moduli.len() - 1];
		let ntt_context = NttContext::new(degree, last).ok();

		let inverse_q_last = match &next {
			Some(_) => {
				let mut inverses = Vec::with_capacity(precomputed.len() - 1);
				for modulus in &precomputed[..precomputed.len() - 1] {
					let inverse = modulus.inverse_mod(modulus.reduce(last))?;
					inverses.push(MultiplyConstant::new(inverse, modulus));
				}
				Some(inverses)
			},
			None => None,
		};

		Ok(Arc::new(Self {
			degree,
			moduli: precomputed,
			next,
			ntt_context,
			inverse_q_last,
		}))
	}

	/// The ring degree `N`.
	#[inline(always)]
	pub fn degree(&self) -> usize {
		self.degree
	}

	/// The precomputed RNS moduli, top context first.
	#[inline(always)]
	pub fn moduli(&self) -> &[Modulus] {
		&self.moduli
	}

	/// Number of RNS moduli at this level.
	#[inline(always)]
	pub fn modulus_count(&self) -> usize {
		self.moduli.len()
	}

	/// The context with the last modulus dropped, if any.
	#[inline(always)]
	pub fn next(&self) -> Option<&Arc<PolyContext>> {
		self.next.as_ref()
	}

	/// NTT tables for this level's last modulus, if it is NTT-friendly.
	#[inline(always)]
	pub fn ntt_context(&self) -> Option<&NttContext> {
		self.ntt_context.as_ref()
	}

	/// `q_last^{-1} mod q_i` constants for modulus switching.
	pub(crate) fn inverse_q_last(&self) -> Option<&[MultiplyConstant]> {
		self.inverse_q_last.as_deref()
	}

	/// NTT tables for the `row`-th modulus, found by walking the chain to
	/// the level where that modulus is last.
	pub fn ntt_context_for_row(&self, row: usize) -> Result<&NttContext> {
		debug_assert!(row < self.moduli.len());
		let mut level = self;
		for _ in 0..self.moduli.len() - 1 - row {
			level = level.next.as_deref().ok_or(HeError::InvalidPolyContext)?;
		}
		level.ntt_context.as_ref().ok_or(HeError::InvalidNttModulus {
			modulus: self.moduli[row].value(),
			degree: self.degree,
		})
	}

	/// The descendant `levels` hops down the chain (`0` returns `context`).
	pub fn context_at(context: &Arc<Self>, levels: usize) -> Result<Arc<Self>> {
		let mut current = Arc::clone(context);
		for _ in 0..levels {
			let next = current.next.clone().ok_or(HeError::InvalidPolyContext)?;
			current = next;
		}
		Ok(current)
	}

	/// Whether `self` equals `other` or sits above it in the chain.
	///
	/// The relation is reflexive and transitive over `next` links.
	pub fn is_parent_of(&self, other: &PolyContext) -> bool {
		let mut current = Some(self);
		while let Some(context) = current {
			if context == other {
				return true;
			}
			current = context.next.as_deref();
		}
		false
	}

	/// Largest number of double-width products of residues that can be
	/// accumulated without reduction.
	pub fn max_lazy_product_accumulation_count(&self) -> usize {
		let q_max = self
			.moduli
			.iter()
			.map(Modulus::value)
			.max()
			.expect("context has at least one modulus");
		let square = (q_max as u128 - 1) * (q_max as u128 - 1);
		((u128::MAX - q_max as u128) / square).min(usize::MAX as u128) as usize
	}

	/// Total serialized size in bytes of one polynomial at this level.
	pub fn serialized_byte_count(&self, skip_lsbs: u32) -> usize {
		self.moduli
			.iter()
			.map(|modulus| {
				briar_math::serialized_byte_count(self.degree, modulus.ceil_log2(), skip_lsbs)
			})
			.sum()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builds_a_linked_chain() {
		let context = PolyContext::new(8, &[17, 97, 113]).unwrap();
		assert_eq!(context.modulus_count(), 3);
		let next = context.next().unwrap();
		assert_eq!(next.modulus_count(), 2);
		let last = next.next().unwrap();
		assert_eq!(last.modulus_count(), 1);
		assert!(last.next().is_none());
		assert!(context.is_parent_of(last));
		assert!(context.is_parent_of(&context.clone()));
		assert!(!last.is_parent_of(&context));
	}

	#[test]
	fn validates_inputs() {
		assert!(matches!(
			PolyContext::new(12, &[17]),
			Err(HeError::InvalidDegree { degree: 12 })
		));
		assert!(matches!(PolyContext::new(8, &[]), Err(HeError::EmptyModulus)));
		assert!(matches!(
			PolyContext::new(8, &[15]),
			Err(HeError::InvalidModulus { modulus: 15 })
		));
		assert!(matches!(
			PolyContext::new(8, &[17, 17]),
			Err(HeError::CoprimeModuli { .. })
		));
		assert!(matches!(
			PolyContext::new(8, &[16, 32]),
			Err(HeError::CoprimeModuli { .. })
		));
		assert!(PolyContext::new(8, &[16, 17]).is_ok());
	}

	#[test]
	fn ntt_tables_follow_friendliness() {
		// 97 = 1 mod 16 and 17 = 1 mod 16 are both friendly for degree 8;
		// 2^10 is not.
		let context = PolyContext::new(8, &[17, 1 << 10]).unwrap();
		assert!(context.ntt_context().is_none());
		assert!(context.ntt_context_for_row(0).is_ok());
		assert!(context.ntt_context_for_row(1).is_err());
		let friendly = PolyContext::new(8, &[17, 97]).unwrap();
		assert!(friendly.ntt_context_for_row(0).is_ok());
		assert!(friendly.ntt_context_for_row(1).is_ok());
	}

	#[test]
	fn lazy_accumulation_budget_is_large_for_small_moduli() {
		let context = PolyContext::new(8, &[17]).unwrap();
		assert!(context.max_lazy_product_accumulation_count() > 1 << 32);
	}

	#[test]
	fn serialized_sizes_sum_rows() {
		let context = PolyContext::new(8, &[17, 97]).unwrap();
		// ceil(8*5/8) + ceil(8*7/8) = 5 + 7.
		assert_eq!(context.serialized_byte_count(0), 12);
		assert_eq!(context.serialized_byte_count(2), 3 + 5);
	}
}
